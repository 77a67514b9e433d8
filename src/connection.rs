// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Connection lifecycle and auto-reconnect.
//!
//! A [`Connection`] owns the three device channels:
//!
//! - command: TCP, opened per request; `connect` only proves it can be opened
//! - data: UDP listener on a fixed local port, read by the capture thread
//! - discovery: UDP listener feeding the [`DeviceRegistry`]
//!
//! ```text
//! Disconnected ──connect──→ Connecting ──ok──→ Connected
//!      ↑                        │                  │
//!      └────────fail────────────┘             reconnect
//!      ↑                                           ↓
//!      └──────────aborted────────────────── Reconnecting ──ok──→ Connected
//! ```
//!
//! The reconnect procedure sleeps on a condition variable between attempts.
//! Disabling auto-reconnect wakes it, which is how [`Connection::cancel_reconnect`]
//! stops an in-flight procedure without polling.

use crate::{
    discovery::{DeviceRegistry, DiscoveryListener},
    lidar::{DriverError, Error, StickyError},
    packet_source::PacketSource,
    transport::Transport,
};
use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Upper bound of the reconnect retry counter.
pub const MAX_RETRIES: u32 = 25;

/// Receive deadline of the discovery listener; bounds how long closing the
/// channel waits for the thread.
const DISCOVERY_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Linear reconnect backoff.
///
/// Each call to [`Backoff::next_delay`] increments the retry counter, capped
/// at [`MAX_RETRIES`], and returns `retry * step`.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    step: Duration,
    retry: u32,
}

impl Backoff {
    pub fn new(step: Duration) -> Self {
        Self { step, retry: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.retry = (self.retry + 1).min(MAX_RETRIES);
        self.step * self.retry
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn reset(&mut self) {
        self.retry = 0;
    }
}

/// Addresses and timeouts used by a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Device command channel address.
    pub command_addr: SocketAddr,
    /// Local port of the data channel.
    pub data_port: u16,
    /// Local port of the discovery channel.
    pub discovery_port: u16,
    pub connect_timeout: Duration,
    /// Receive deadline of the data channel.
    pub data_timeout: Duration,
    pub backoff_step: Duration,
    pub auto_reconnect: bool,
}

#[derive(Debug)]
struct ReconnectControl {
    auto: bool,
    in_progress: bool,
}

/// Device channels and their lifecycle.
pub struct Connection {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    data: Mutex<Option<Box<dyn PacketSource>>>,
    discovery: Mutex<Option<DiscoveryListener>>,
    registry: DeviceRegistry,
    error: StickyError,
    control: Mutex<ReconnectControl>,
    control_changed: Condvar,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            data: Mutex::new(None),
            discovery: Mutex::new(None),
            registry: DeviceRegistry::new(),
            error: StickyError::new(),
            control: Mutex::new(ReconnectControl {
                auto: config.auto_reconnect,
                in_progress: false,
            }),
            control_changed: Condvar::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Sticky connection-level fault.
    pub fn error(&self) -> &StickyError {
        &self.error
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!("connection {} -> {}", *current, state);
            *current = state;
        }
    }

    fn control(&self) -> MutexGuard<'_, ReconnectControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the command, data and discovery channels, in that order.
    ///
    /// The first failure records [`DriverError::NotOpen`] and is returned;
    /// channels opened before it stay open until [`Connection::disconnect`].
    pub fn connect(&self) -> Result<(), Error> {
        self.set_state(ConnectionState::Connecting);
        match self.open_channels() {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("connected to {}", self.config.command_addr);
                Ok(())
            }
            Err(err) => {
                self.error.set(DriverError::NotOpen);
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    fn open_channels(&self) -> Result<(), Error> {
        let addr = self.config.command_addr;
        self.transport
            .probe(addr, self.config.connect_timeout)
            .map_err(|err| Error::NotOpen(format!("command channel {} ({})", addr, err)))?;
        debug!("command channel {} reachable", addr);

        let data = self
            .transport
            .open_data(self.config.data_port, self.config.data_timeout)
            .map_err(|err| {
                Error::NotOpen(format!("data channel :{} ({})", self.config.data_port, err))
            })?;
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
        debug!("data channel :{} open", self.config.data_port);

        let mut discovery = self.discovery.lock().unwrap_or_else(PoisonError::into_inner);
        if discovery.is_none() {
            let port = self.config.discovery_port;
            let source = self
                .transport
                .open_discovery(port, DISCOVERY_POLL)
                .map_err(|err| Error::NotOpen(format!("discovery channel :{} ({})", port, err)))?;
            *discovery = Some(DiscoveryListener::spawn(source, self.registry.clone())?);
            debug!("discovery channel :{} open", port);
        }

        Ok(())
    }

    /// Close every channel. Closing a closed channel is not an error.
    pub fn disconnect(&self) {
        self.close_channels();
        self.set_state(ConnectionState::Disconnected);
    }

    fn close_channels(&self) {
        if self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("data channel closed");
        }

        let listener = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut listener) = listener {
            if let Err(err) = listener.stop() {
                warn!("discovery listener: {}", err);
            }
            debug!("discovery channel closed");
        }
    }

    /// Receive from the data channel, blocking up to the data timeout.
    pub fn recv_data(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        match data.as_mut() {
            Some(source) => source.recv(buf),
            None => Err(Error::NotOpen("data channel".to_string())),
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.control().auto
    }

    /// Enable or disable auto-reconnect. Disabling wakes a reconnect that
    /// is waiting between attempts, which then gives up.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.control().auto = enabled;
        self.control_changed.notify_all();
    }

    pub fn is_reconnecting(&self) -> bool {
        self.control().in_progress
    }

    /// Stop an in-flight reconnect and wait for it to exit.
    ///
    /// Auto-reconnect is disabled for the duration and restored afterwards.
    pub fn cancel_reconnect(&self) {
        let mut control = self.control();
        if !control.in_progress {
            return;
        }

        let prior = control.auto;
        control.auto = false;
        self.control_changed.notify_all();
        debug!("waiting for reconnect to exit");

        let mut control = self
            .control_changed
            .wait_while(control, |control| control.in_progress)
            .unwrap_or_else(PoisonError::into_inner);
        control.auto = prior;
    }

    /// Re-establish the connection with linear backoff.
    ///
    /// Each attempt closes every channel, waits the next backoff delay, then
    /// connects again. Gives up with [`Error::ReconnectAborted`] as soon as
    /// auto-reconnect is disabled or `keep_going` returns false.
    pub fn reconnect(&self, keep_going: &dyn Fn() -> bool) -> Result<(), Error> {
        {
            let mut control = self.control();
            if !control.auto {
                return Err(Error::ReconnectAborted);
            }
            control.in_progress = true;
        }
        self.set_state(ConnectionState::Reconnecting);

        let mut backoff = Backoff::new(self.config.backoff_step);
        let result = loop {
            if !keep_going() {
                break Err(Error::ReconnectAborted);
            }

            self.close_channels();

            let delay = backoff.next_delay();
            if !self.sleep_while_enabled(delay) {
                break Err(Error::ReconnectAborted);
            }

            info!("reconnecting, attempt {}", backoff.retry());
            match self.open_channels() {
                Ok(()) => break Ok(()),
                Err(err) => {
                    self.error.set(DriverError::NotOpen);
                    warn!("reconnect failed: {}", err);
                }
            }
        };

        match &result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("reconnected to {}", self.config.command_addr);
            }
            Err(_) => {
                self.close_channels();
                self.set_state(ConnectionState::Disconnected);
            }
        }

        self.control().in_progress = false;
        self.control_changed.notify_all();
        result
    }

    /// Sleep for `delay` unless auto-reconnect is disabled first.
    /// Returns whether auto-reconnect is still enabled.
    fn sleep_while_enabled(&self, delay: Duration) -> bool {
        let control = self.control();
        let (control, _) = self
            .control_changed
            .wait_timeout_while(control, delay, |control| control.auto)
            .unwrap_or_else(PoisonError::into_inner);
        control.auto
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close_channels();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("error", &self.error.get())
            .finish()
    }
}

/// The data channel as a packet source for the capture thread.
impl PacketSource for Arc<Connection> {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.recv_data(buf)
    }
}
