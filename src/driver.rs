// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Driver API.
//!
//! [`LidarDriver`] ties the connection lifecycle, the command channel and
//! the capture thread together behind the operations an application uses:
//!
//! ```no_run
//! use edgefirst_ydlidar::driver::{DriverConfig, LidarDriver};
//! use edgefirst_ydlidar::lidar::{MAX_SCAN_NODES, Sample};
//! use std::time::Duration;
//!
//! let driver = LidarDriver::new(DriverConfig::default());
//! driver.connect()?;
//! driver.start_scan()?;
//!
//! let mut nodes = vec![Sample::default(); MAX_SCAN_NODES];
//! let count = driver.grab_scan_data(&mut nodes, Duration::from_secs(2))?;
//! println!("{} samples", count);
//!
//! driver.stop_scan()?;
//! # Ok::<(), edgefirst_ydlidar::lidar::Error>(())
//! ```

use crate::{
    accumulator::{AccumulatorState, CaptureConfig, ScanAccumulator},
    command::{CommandClient, Field},
    connection::{Connection, ConnectionConfig, ConnectionState},
    discovery::DeviceInfo,
    lidar::{DriverError, Error, MAX_SCAN_NODES, Sample},
    protocol::LidarModel,
    scan::{LaserScan, ScanLimits},
    transport::{NetTransport, Transport},
};
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Driver settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriverConfig {
    /// Device IP address.
    pub address: IpAddr,
    /// Device TCP command port.
    pub command_port: u16,
    /// Local UDP port receiving frames.
    pub data_port: u16,
    /// Local UDP port receiving discovery broadcasts.
    pub discovery_port: u16,
    pub model: LidarModel,
    /// Receive deadline for one frame.
    pub data_timeout: Duration,
    /// Command channel connect timeout.
    pub connect_timeout: Duration,
    /// Command channel reply wait.
    pub response_timeout: Duration,
    /// Consecutive frame timeouts tolerated before reconnecting.
    pub timeout_threshold: usize,
    pub auto_reconnect: bool,
    /// Reconnect delay grows by this much per attempt.
    pub backoff_step: Duration,
    /// Maximum samples per revolution.
    pub capacity: usize,
    pub limits: ScanLimits,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 0, 11)),
            command_port: 8090,
            data_port: 8000,
            discovery_port: 8001,
            model: LidarModel::Tea,
            data_timeout: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(2000),
            response_timeout: Duration::from_millis(800),
            timeout_threshold: 1,
            auto_reconnect: true,
            backoff_step: Duration::from_millis(200),
            capacity: MAX_SCAN_NODES,
            limits: ScanLimits::default(),
        }
    }
}

impl DriverConfig {
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.command_port)
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            command_addr: self.command_addr(),
            data_port: self.data_port,
            discovery_port: self.discovery_port,
            connect_timeout: self.connect_timeout,
            data_timeout: self.data_timeout,
            backoff_step: self.backoff_step,
            auto_reconnect: self.auto_reconnect,
        }
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            dialect: self.model.dialect(),
            frame_timeout: self.data_timeout,
            timeout_threshold: self.timeout_threshold,
            capacity: self.capacity,
        }
    }
}

/// YDLIDAR TIA/TEA network driver.
#[derive(Debug)]
pub struct LidarDriver {
    config: DriverConfig,
    connection: Arc<Connection>,
    commands: CommandClient,
    accumulator: ScanAccumulator,
}

impl LidarDriver {
    /// Create a driver using operating system sockets.
    pub fn new(config: DriverConfig) -> Self {
        Self::with_transport(config, Arc::new(NetTransport::default()))
    }

    pub fn with_transport(config: DriverConfig, transport: Arc<dyn Transport>) -> Self {
        let commands = CommandClient::new(
            Arc::clone(&transport),
            config.command_addr(),
            config.connect_timeout,
            config.response_timeout,
        );

        Self {
            config,
            connection: Arc::new(Connection::new(transport, config.connection())),
            commands,
            accumulator: ScanAccumulator::new(config.capacity),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn model(&self) -> LidarModel {
        self.config.model
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_scanning(&self) -> bool {
        self.accumulator.is_running()
    }

    /// Open the command, data and discovery channels.
    pub fn connect(&self) -> Result<(), Error> {
        self.connection.connect()
    }

    /// Stop scanning if needed and close every channel.
    pub fn disconnect(&self) {
        if let Err(err) = self.stop_scan() {
            warn!("stop scan during disconnect: {}", err);
        }
        self.connection.disconnect();
    }

    /// Start measurement and the capture thread. Idempotent.
    pub fn start_scan(&self) -> Result<(), Error> {
        if self.accumulator.is_running() {
            debug!("already scanning");
            return Ok(());
        }
        if !self.connection.is_connected() {
            return Err(Error::NotOpen("device".to_string()));
        }

        self.commands.start_measurement()?;

        if let Err(err) = self
            .accumulator
            .start(Arc::clone(&self.connection), self.config.capture())
        {
            if let Err(stop) = self.commands.stop_measurement() {
                warn!("stop measurement after failed start: {}", stop);
            }
            return Err(err);
        }

        info!("scanning started ({})", self.config.model);
        Ok(())
    }

    /// Stop the capture thread and measurement. Idempotent.
    ///
    /// An in-flight reconnect is cancelled first. The thread is joined even
    /// if the stop command fails; that failure is then returned. May be
    /// called while another thread is blocked in [`Self::grab_scan_data`],
    /// which then returns [`Error::NotScanning`].
    pub fn stop_scan(&self) -> Result<(), Error> {
        if self.accumulator.state() == AccumulatorState::Idle {
            return Ok(());
        }

        self.accumulator.request_stop();
        self.connection.cancel_reconnect();

        let command = if self.connection.is_connected() {
            self.commands.stop_measurement()
        } else {
            Ok(())
        };

        self.accumulator.stop()?;
        info!("scanning stopped");
        command
    }

    /// Copy the latest complete revolution into `out`.
    ///
    /// Returns the number of samples written, never more than `out.len()`.
    /// Fails with [`Error::Timeout`] if no revolution completes within
    /// `timeout`, and with [`Error::NotScanning`] once the capture thread
    /// has stopped.
    pub fn grab_scan_data(&self, out: &mut [Sample], timeout: Duration) -> Result<usize, Error> {
        Ok(self.accumulator.grab(out, timeout)?.len)
    }

    /// Grab the latest revolution as a [`LaserScan`].
    pub fn grab_scan(&self, timeout: Duration) -> Result<LaserScan, Error> {
        let mut nodes = vec![Sample::default(); self.config.capacity];
        let taken = self.accumulator.grab(&mut nodes, timeout)?;
        Ok(LaserScan::from_samples(
            &nodes[..taken.len],
            taken.stamp,
            &self.config.limits,
        ))
    }

    /// Raw scan frequency reported by the device.
    pub fn scan_frequency(&self) -> Result<i32, Error> {
        self.commands.read(Field::MotorSpeed)
    }

    /// Set the scan frequency in Hz, where the model allows it.
    pub fn set_scan_frequency(&self, hz: f32) -> Result<i32, Error> {
        if !self.config.model.supports_scan_frequency(hz) {
            return Err(self.unsupported(format!(
                "scan frequency {} Hz on {}",
                hz, self.config.model
            )));
        }
        self.commands.write(Field::MotorSpeed, hz.round() as i32)
    }

    /// Adjust the scan frequency by a raw `delta`, e.g.
    /// [`crate::command::FREQUENCY_STEP_COARSE`].
    pub fn step_scan_frequency(&self, delta: i32) -> Result<i32, Error> {
        if self.config.model != LidarModel::Tia {
            return Err(self.unsupported(format!("scan frequency on {}", self.config.model)));
        }
        self.commands.step(Field::MotorSpeed, delta)
    }

    pub fn sampling_rate(&self) -> Result<i32, Error> {
        self.commands.read(Field::SampleRate)
    }

    pub fn set_sampling_rate(&self, rate: i32) -> Result<i32, Error> {
        self.commands.write(Field::SampleRate, rate)
    }

    /// Discovered devices as `"ydlidar<ip>"` → model.
    pub fn list_devices(&self) -> BTreeMap<String, String> {
        self.connection.registry().port_list()
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.connection.registry().snapshot()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.connection.set_auto_reconnect(enabled);
    }

    /// First connection-level fault since the last [`Self::clear_error`].
    pub fn last_error(&self) -> DriverError {
        self.connection.error().get()
    }

    pub fn describe_error(&self) -> &'static str {
        self.last_error().describe()
    }

    pub fn clear_error(&self) {
        self.connection.error().clear();
    }

    /// Record [`DriverError::Unsupported`] and build the matching error.
    fn unsupported(&self, what: String) -> Error {
        self.connection.error().set(DriverError::Unsupported);
        warn!("unsupported: {}", what);
        Error::Unsupported(what)
    }
}

impl Drop for LidarDriver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.command_addr().to_string(), "192.168.0.11:8090");
        assert_eq!(config.data_port, 8000);
        assert_eq!(config.discovery_port, 8001);
        assert_eq!(config.capacity, 7200);
        assert_eq!(config.timeout_threshold, 1);
        assert_eq!(config.capture().dialect, LidarModel::Tea.dialect());
        assert!(config.connection().auto_reconnect);
    }

    #[test]
    fn test_idle_driver() {
        let driver = LidarDriver::new(DriverConfig::default());
        assert_eq!(driver.state(), ConnectionState::Disconnected);
        assert!(!driver.is_scanning());
        assert_eq!(driver.describe_error(), "No error");

        // Not connected: start fails, stop is a no-op.
        assert!(matches!(driver.start_scan(), Err(Error::NotOpen(_))));
        driver.stop_scan().unwrap();

        let mut nodes = [Sample::default(); 8];
        assert!(matches!(
            driver.grab_scan_data(&mut nodes, Duration::from_millis(1)),
            Err(Error::NotScanning)
        ));
    }

    #[test]
    fn test_frequency_requires_tia() {
        let driver = LidarDriver::new(DriverConfig::default());
        assert!(matches!(
            driver.set_scan_frequency(10.0),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(driver.last_error(), DriverError::Unsupported);
        assert_eq!(driver.describe_error(), "unsupported operation");
        assert!(matches!(
            driver.step_scan_frequency(100),
            Err(Error::Unsupported(_))
        ));
    }
}
