// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst YDLIDAR Driver Library
//!
//! Network driver for the YDLIDAR TIA and TEA time-of-flight sensors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ data channel │ → │ StreamReassembler │ → │ FrameDecoder │ → │ Revolution   │
//! │ (UDP)        │   │ (TEA only)        │   │              │   │ builder      │
//! └──────────────┘   └───────────────────┘   └──────────────┘   └──────┬───────┘
//!        ↑                     capture thread                          │ publish
//! ┌──────┴───────┐                                              ┌──────▼───────┐
//! │ Connection   │ ← reconnect on repeated timeouts             │ HandoffBuffer│
//! │ lifecycle    │                                              │ (latest wins)│
//! └──────────────┘                                              └──────┬───────┘
//!                                                                      │ grab
//!                                                               ┌──────▼───────┐
//!                                                               │ LidarDriver  │
//!                                                               └──────────────┘
//! ```
//!
//! The capture thread owns all decoding state. The caller only ever sees
//! complete revolutions, copied out of the single-slot hand-off buffer.
//!
//! # Modules
//!
//! - [`driver`]: Driver API and configuration
//! - [`protocol`]: Wire layout, dialects and sensor models
//! - [`decoder`]: Frame decoding, packet sequence and timestamp tracking
//! - [`reassembler`]: Stream frame reassembly for the TEA
//! - [`accumulator`]: Capture thread and revolution splitting
//! - [`buffer`]: Revolution arena and hand-off buffer
//! - [`connection`]: Channel lifecycle and auto-reconnect
//! - [`command`]: JSON command channel
//! - [`discovery`]: Discovery broadcast listener
//! - [`transport`]: Socket primitives
//! - [`packet_source`]: Packet source abstraction for testing
//! - [`scan`]: Conversion to degrees and metres
//! - [`lidar`]: Common types and error handling

pub mod accumulator;
pub mod buffer;
pub mod command;
pub mod connection;
pub mod decoder;
pub mod discovery;
pub mod driver;
pub mod lidar;
pub mod packet_source;
pub mod protocol;
pub mod reassembler;
pub mod scan;
pub mod transport;

// Re-exports for convenience
pub use driver::{DriverConfig, LidarDriver};
pub use lidar::{DriverError, Error, Sample};
pub use packet_source::PacketSource;
pub use protocol::LidarModel;
pub use scan::LaserScan;
pub use transport::Transport;
