// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Discovery broadcast listener.
//!
//! Sensors on the network periodically broadcast a JSON advertisement:
//!
//! ```json
//! {"ip":"192.168.0.11","model":"TIA","hardware":"1.0","software":"1.2.3"}
//! ```
//!
//! The listener thread parses these into a [`DeviceRegistry`] keyed by IP.
//! The registry is written only by that thread and read through snapshots.

use crate::{lidar::Error, packet_source::PacketSource};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, info, warn};

/// Advertised device identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub hardware: String,
    #[serde(default)]
    pub software: String,
}

impl DeviceInfo {
    /// Key used by [`DeviceRegistry::port_list`].
    pub fn key(&self) -> String {
        format!("ydlidar{}", self.ip)
    }
}

/// Parse one advertisement datagram, ignoring NUL padding.
pub fn parse_advertisement(datagram: &[u8]) -> Result<DeviceInfo, Error> {
    let end = datagram
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    Ok(serde_json::from_slice(&datagram[..end])?)
}

/// Devices seen on the network, de-duplicated by IP.
#[derive(Clone, Debug, Default)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<Vec<DeviceInfo>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device` unless its IP is already known. Returns true if added.
    pub fn insert(&self, device: DeviceInfo) -> bool {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        if devices.iter().any(|known| known.ip == device.ip) {
            return false;
        }
        devices.push(device);
        true
    }

    /// Copy of the current list, in discovery order.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Map of `"ydlidar<ip>"` to model name.
    pub fn port_list(&self) -> BTreeMap<String, String> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|device| (device.key(), device.model.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background thread receiving discovery broadcasts.
pub struct DiscoveryListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryListener {
    /// Start listening on `source`.
    ///
    /// The source must have a receive deadline so the thread notices
    /// [`DiscoveryListener::stop`].
    pub fn spawn(source: Box<dyn PacketSource>, registry: DeviceRegistry) -> Result<Self, Error> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("ydlidar-discovery".to_string())
                .spawn(move || listen(source, registry, running))
                .map_err(Error::Io)?
        };

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::ThreadPanic)?;
        }
        Ok(())
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn listen(mut source: Box<dyn PacketSource>, registry: DeviceRegistry, running: Arc<AtomicBool>) {
    debug!("discovery listener started");
    let mut buf = [0u8; 1024];

    while running.load(Ordering::Relaxed) {
        match source.recv(&mut buf) {
            Ok(len) => match parse_advertisement(&buf[..len]) {
                Ok(device) => {
                    let (ip, model) = (device.ip.clone(), device.model.clone());
                    if registry.insert(device) {
                        info!("found device {} model {}", ip, model);
                    }
                }
                Err(err) => warn!("ignoring discovery packet: {}", err),
            },
            Err(Error::Timeout) => continue,
            Err(err) => {
                warn!("discovery listener receive failed: {}", err);
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    debug!("discovery listener exiting");
}
