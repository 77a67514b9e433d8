// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common LiDAR types shared by every layer of the driver.
//!
//! This module provides the decoded [`Sample`] type, the crate-wide
//! [`Error`] enum and the sticky [`DriverError`] code reported to callers
//! after connection-level faults.

use crate::decoder::FrameError;
use std::{
    fmt,
    sync::{Mutex, PoisonError},
};

/// Maximum number of samples held by one revolution.
pub const MAX_SCAN_NODES: usize = 7200;

/// One decoded range measurement.
///
/// Angles are in 1/100 degree units, distances in raw device units (the
/// TIA/TEA report millimetres, divide by 1000 for metres).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    /// Absolute angle in 1/100°, always in `[0, 36000)`.
    pub angle: u16,
    /// Raw distance.
    pub distance: u16,
    /// Signal quality reported by the device.
    pub quality: u8,
    /// Set on the first sample of a revolution (the rotation crossed zero).
    pub sync: bool,
    /// Device time, interpolated across the frame the sample came from.
    pub timestamp: u64,
}

impl Sample {
    /// Angle in degrees.
    #[inline]
    pub fn angle_degrees(&self) -> f32 {
        self.angle as f32 / 100.0
    }

    /// Distance in metres.
    #[inline]
    pub fn range_meters(&self) -> f32 {
        self.distance as f32 / 1000.0
    }
}

/// Common error type for driver operations
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket operations)
    Io(std::io::Error),
    /// No data within the deadline
    Timeout,
    /// A channel could not be opened or is not open
    NotOpen(String),
    /// The capture thread is not running
    NotScanning,
    /// Invalid or discontinuous frame data
    Frame(FrameError),
    /// JSON encoding or decoding error
    Json(serde_json::Error),
    /// The device rejected or did not answer a command
    Command(String),
    /// Unknown device model or unsupported operation
    Unsupported(String),
    /// Auto-reconnect was disabled or cancelled before a connection succeeded
    ReconnectAborted,
    /// A driver thread panicked
    ThreadPanic,
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Timeout => write!(f, "operation timed out"),
            Error::NotOpen(what) => write!(f, "{} is not open", what),
            Error::NotScanning => write!(f, "lidar is not scanning"),
            Error::Frame(err) => write!(f, "frame error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::Command(msg) => write!(f, "command error: {}", msg),
            Error::Unsupported(what) => write!(f, "unsupported: {}", what),
            Error::ReconnectAborted => write!(f, "auto-reconnect aborted"),
            Error::ThreadPanic => write!(f, "driver thread panicked"),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Error::Frame(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Connection-level fault recorded for the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverError {
    #[default]
    NoError,
    /// A channel could not be opened
    NotOpen,
    /// No data arrived within the receive deadline
    Timeout,
    /// Fault propagated from the transport
    DeviceError,
    /// Unknown model requested
    Unsupported,
}

impl DriverError {
    /// Human-readable description of the code.
    pub fn describe(&self) -> &'static str {
        match self {
            DriverError::NoError => "No error",
            DriverError::NotOpen => "Device is not open",
            DriverError::Timeout => "Operation timed out",
            DriverError::DeviceError => "Device Failed",
            DriverError::Unsupported => "unsupported operation",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// First-error-wins holder for [`DriverError`].
///
/// Once a fault other than [`DriverError::NoError`] is recorded, later
/// faults are ignored until [`StickyError::clear`] is called.
#[derive(Debug, Default)]
pub struct StickyError {
    inner: Mutex<DriverError>,
}

impl StickyError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an error is already held. Returns true if stored.
    pub fn set(&self, err: DriverError) -> bool {
        let mut current = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == DriverError::NoError {
            *current = err;
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> DriverError {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = DriverError::NoError;
    }
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_error_first_wins() {
        let err = StickyError::new();
        assert_eq!(err.get(), DriverError::NoError);

        assert!(err.set(DriverError::Timeout));
        assert!(!err.set(DriverError::NotOpen));
        assert_eq!(err.get(), DriverError::Timeout);

        err.clear();
        assert!(err.set(DriverError::NotOpen));
        assert_eq!(err.get(), DriverError::NotOpen);
    }

    #[test]
    fn test_driver_error_descriptions() {
        assert_eq!(DriverError::NoError.describe(), "No error");
        assert_eq!(DriverError::NotOpen.describe(), "Device is not open");
        assert_eq!(DriverError::Timeout.to_string(), "Operation timed out");
    }

    #[test]
    fn test_io_timeouts_map_to_timeout() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, Error::Timeout));
        let err: Error = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(matches!(err, Error::Timeout));
        let err: Error = std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_sample_units() {
        let sample = Sample {
            angle: 35_950,
            distance: 1_250,
            ..Default::default()
        };
        assert!((sample.angle_degrees() - 359.5).abs() < 1e-4);
        assert!((sample.range_meters() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_timestamp_monotonic() {
        let a = timestamp().unwrap();
        let b = timestamp().unwrap();
        assert!(b >= a);
    }
}
