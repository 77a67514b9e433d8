// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! JSON command channel.
//!
//! Every command opens its own TCP connection to the device, sends a single
//! JSON object and reads a single JSON reply:
//!
//! - write: `{"motorSpeed":10}`
//! - read: `{"Read":"motorSpeed"}`
//!
//! The reply is an object carrying the field name and its integer value.

use crate::{lidar::Error, transport::Transport};
use serde_json::{Value, json};
use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};
use tracing::debug;

/// Raw scan frequency step of the "coarse" adjustment.
pub const FREQUENCY_STEP_COARSE: i32 = 100;

/// Raw scan frequency step of the "fine" adjustment.
pub const FREQUENCY_STEP_FINE: i32 = 10;

/// Value of `scanType` that starts measurement.
const SCAN_START: i32 = 0;

/// Value of `scanType` that stops measurement.
const SCAN_STOP: i32 = -1;

/// Configurable device fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    SampleRate,
    /// Scan frequency, raw device value
    MotorSpeed,
    /// 0 measures, -1 idles
    ScanType,
}

impl Field {
    /// Key used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Field::SampleRate => "samplerate",
            Field::MotorSpeed => "motorSpeed",
            Field::ScanType => "scanType",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn read_request(field: Field) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(&json!({ "Read": field.name() }))?)
}

pub fn write_request(field: Field, value: i32) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(&json!({ field.name(): value }))?)
}

/// Extract the integer value of `field` from a reply.
///
/// Trailing NUL padding is ignored.
pub fn parse_reply(field: Field, reply: &[u8]) -> Result<i32, Error> {
    let end = reply
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    let root: Value = serde_json::from_slice(&reply[..end])?;

    root.get(field.name())
        .and_then(Value::as_i64)
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| Error::Command(format!("reply has no integer {:?}: {}", field.name(), root)))
}

/// Client for the per-request command channel.
#[derive(Clone)]
pub struct CommandClient {
    transport: Arc<dyn Transport>,
    addr: SocketAddr,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl CommandClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        addr: SocketAddr,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            addr,
            connect_timeout,
            response_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn transfer(&self, field: Field, request: &[u8]) -> Result<i32, Error> {
        let reply = self.transport.exchange(
            self.addr,
            request,
            self.connect_timeout,
            self.response_timeout,
        )?;
        parse_reply(field, &reply)
    }

    /// Read the current value of `field`.
    pub fn read(&self, field: Field) -> Result<i32, Error> {
        let value = self.transfer(field, &read_request(field)?)?;
        debug!("read {} = {}", field, value);
        Ok(value)
    }

    /// Write `value` to `field`, returning the value echoed by the device.
    pub fn write(&self, field: Field, value: i32) -> Result<i32, Error> {
        let echoed = self.transfer(field, &write_request(field, value)?)?;
        debug!("wrote {} = {} (device reports {})", field, value, echoed);
        Ok(echoed)
    }

    pub fn start_measurement(&self) -> Result<(), Error> {
        self.write(Field::ScanType, SCAN_START)?;
        Ok(())
    }

    pub fn stop_measurement(&self) -> Result<(), Error> {
        self.write(Field::ScanType, SCAN_STOP)?;
        Ok(())
    }

    /// Read the scan frequency and write it back adjusted by `delta`.
    pub fn step(&self, field: Field, delta: i32) -> Result<i32, Error> {
        let current = self.read(field)?;
        self.write(field, current.saturating_add(delta))
    }
}

impl fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandClient")
            .field("addr", &self.addr)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}
