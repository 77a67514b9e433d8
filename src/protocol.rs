// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! YDLIDAR TIA/TEA wire protocol.
//!
//! Both sensors stream the same frame layout; they differ only in how frames
//! are delimited on the network, which is captured by a [`Dialect`].
//!
//! # Frame Structure (824 bytes, big-endian)
//!
//! - 12 data blocks × 68 bytes = 816 bytes
//!   - Marker: 2 bytes, always `0xFFEE`
//!   - Start angle: 2 bytes, 1/100°
//!   - 16 packed samples × 4 bytes
//! - Timestamp: 4 bytes, wrapping device counter
//! - Factory word: 4 bytes, packet sequence number in bits 24-27
//!
//! ## Packed sample (32 bits)
//! - bits 29-24: angle delta from the previous sample of the block
//! - bits 23-16: signal quality
//! - bits 15-0: distance
//!
//! An all-zero word ends the block.
//!
//! ## Framing
//! - TIA: one frame per UDP datagram.
//! - TEA: frames are streamed back to back over UDP without datagram
//!   alignment, each one terminated by the trailer `0x21 0x43 0x65`.

use crate::lidar::Error;
use clap::ValueEnum;
use std::{fmt, str::FromStr};

/// Marker at the head of every data block.
pub const BLOCK_MARKER: u16 = 0xFFEE;

/// Number of data blocks per frame.
pub const BLOCKS_PER_FRAME: usize = 12;

/// Number of packed samples per data block.
pub const SAMPLES_PER_BLOCK: usize = 16;

/// Size of a data block in bytes.
pub const BLOCK_SIZE: usize = 4 + 4 * SAMPLES_PER_BLOCK;

/// Total frame size in bytes, without trailer.
pub const FRAME_SIZE: usize = BLOCKS_PER_FRAME * BLOCK_SIZE + 8;

/// Maximum samples a single frame can carry.
pub const MAX_FRAME_SAMPLES: usize = BLOCKS_PER_FRAME * SAMPLES_PER_BLOCK;

/// Stream frame trailer, in wire order.
pub const STREAM_TRAILER: [u8; 3] = [0x21, 0x43, 0x65];

/// One full rotation in 1/100° units.
pub const FULL_TURN: u32 = 36_000;

/// Offset of the timestamp word.
const TIMESTAMP_OFFSET: usize = BLOCKS_PER_FRAME * BLOCK_SIZE;

/// Offset of the factory word.
const FACTORY_OFFSET: usize = TIMESTAMP_OFFSET + 4;

/// How frames are delimited on the data channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Each UDP datagram carries exactly one frame.
    Datagram,
    /// Frames are streamed and separated by a trailer marker.
    Stream,
}

/// Wire dialect descriptor.
///
/// Parameterizes the single decoding engine over the differences between
/// sensor families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dialect {
    pub framing: Framing,
    pub block_marker: u16,
    pub trailer: [u8; 3],
    pub blocks: usize,
    pub samples_per_block: usize,
    /// Reject the whole frame on a bad block marker instead of skipping the
    /// block.
    pub strict_markers: bool,
}

impl Dialect {
    /// TIA: datagram framing, a bad marker invalidates the frame.
    pub const TIA: Dialect = Dialect {
        framing: Framing::Datagram,
        block_marker: BLOCK_MARKER,
        trailer: STREAM_TRAILER,
        blocks: BLOCKS_PER_FRAME,
        samples_per_block: SAMPLES_PER_BLOCK,
        strict_markers: true,
    };

    /// TEA: stream framing, a bad marker only drops its own block.
    pub const TEA: Dialect = Dialect {
        framing: Framing::Stream,
        block_marker: BLOCK_MARKER,
        trailer: STREAM_TRAILER,
        blocks: BLOCKS_PER_FRAME,
        samples_per_block: SAMPLES_PER_BLOCK,
        strict_markers: false,
    };

    /// Size of one data block in bytes.
    #[inline]
    pub fn block_size(&self) -> usize {
        4 + 4 * self.samples_per_block
    }

    /// Size of one frame in bytes, excluding any trailer.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.blocks * self.block_size() + 8
    }

    /// Maximum number of samples in one frame.
    #[inline]
    pub fn max_samples(&self) -> usize {
        self.blocks * self.samples_per_block
    }
}

/// Supported sensor models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LidarModel {
    /// YDLIDAR TIA, one frame per datagram
    Tia,
    /// YDLIDAR TEA, streamed frames with trailer
    #[default]
    Tea,
}

impl LidarModel {
    pub fn dialect(&self) -> Dialect {
        match self {
            LidarModel::Tia => Dialect::TIA,
            LidarModel::Tea => Dialect::TEA,
        }
    }

    /// Whether the scan frequency may be configured for this model.
    pub fn supports_scan_frequency(&self, hz: f32) -> bool {
        *self == LidarModel::Tia && (1.0..=64.0).contains(&hz)
    }
}

impl fmt::Display for LidarModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LidarModel::Tia => write!(f, "tia"),
            LidarModel::Tea => write!(f, "tea"),
        }
    }
}

impl FromStr for LidarModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tia" => Ok(LidarModel::Tia),
            "tea" => Ok(LidarModel::Tea),
            _ => Err(Error::Unsupported(format!("lidar model {:?}", s))),
        }
    }
}

/// Unpacked 32-bit sample word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PackedSample {
    /// Angle increment over the previous sample, 6 bits.
    pub delta: u8,
    pub quality: u8,
    pub distance: u16,
}

impl PackedSample {
    pub fn new(delta: u8, quality: u8, distance: u16) -> Self {
        Self {
            delta: delta & 0x3f,
            quality,
            distance,
        }
    }

    /// Decode a sample word. Returns `None` for the end-of-block sentinel.
    #[inline]
    pub fn decode(word: u32) -> Option<Self> {
        if word == 0 {
            return None;
        }

        Some(Self {
            delta: ((word >> 24) & 0x3f) as u8,
            quality: ((word >> 16) & 0xff) as u8,
            distance: (word & 0xffff) as u16,
        })
    }

    #[inline]
    pub fn encode(&self) -> u32 {
        ((self.delta as u32 & 0x3f) << 24) | ((self.quality as u32) << 16) | self.distance as u32
    }
}

/// Read a big-endian u16 at `offset`.
#[inline]
pub(crate) fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Read a big-endian u32 at `offset`.
#[inline]
pub(crate) fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Raw frame timestamp word.
#[inline]
pub fn frame_timestamp(dialect: &Dialect, frame: &[u8]) -> u32 {
    be_u32(frame, dialect.blocks * dialect.block_size())
}

/// Packet sequence number (0-15) from the factory word.
#[inline]
pub fn frame_sequence(dialect: &Dialect, frame: &[u8]) -> u8 {
    let factory = be_u32(frame, dialect.blocks * dialect.block_size() + 4);
    ((factory >> 24) & 0x0f) as u8
}

/// Encoder for synthetic frames.
///
/// Used by tests, benchmarks and the mock device; the driver itself only
/// decodes.
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    /// Create a frame with valid markers and empty blocks.
    pub fn new() -> Self {
        let mut bytes = vec![0u8; FRAME_SIZE];
        for block in 0..BLOCKS_PER_FRAME {
            let offset = block * BLOCK_SIZE;
            bytes[offset..offset + 2].copy_from_slice(&BLOCK_MARKER.to_be_bytes());
        }
        Self { bytes }
    }

    /// Fill a block with a start angle and up to 16 samples.
    pub fn block(mut self, index: usize, start_angle: u16, samples: &[PackedSample]) -> Self {
        let offset = index * BLOCK_SIZE;
        self.bytes[offset + 2..offset + 4].copy_from_slice(&start_angle.to_be_bytes());
        for (i, sample) in samples.iter().take(SAMPLES_PER_BLOCK).enumerate() {
            let at = offset + 4 + i * 4;
            self.bytes[at..at + 4].copy_from_slice(&sample.encode().to_be_bytes());
        }
        self
    }

    /// Overwrite the marker of a block.
    pub fn marker(mut self, index: usize, marker: u16) -> Self {
        let offset = index * BLOCK_SIZE;
        self.bytes[offset..offset + 2].copy_from_slice(&marker.to_be_bytes());
        self
    }

    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].copy_from_slice(&timestamp.to_be_bytes());
        self
    }

    pub fn sequence(mut self, sequence: u8) -> Self {
        let factory = ((sequence as u32 & 0x0f) << 24).to_be_bytes();
        self.bytes[FACTORY_OFFSET..FACTORY_OFFSET + 4].copy_from_slice(&factory);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    /// Frame followed by the stream trailer.
    pub fn build_with_trailer(self) -> Vec<u8> {
        let mut bytes = self.bytes;
        bytes.extend_from_slice(&STREAM_TRAILER);
        bytes
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(BLOCK_SIZE, 68);
        assert_eq!(FRAME_SIZE, 824);
        assert_eq!(Dialect::TIA.frame_size(), FRAME_SIZE);
        assert_eq!(Dialect::TEA.frame_size(), FRAME_SIZE);
        assert_eq!(Dialect::TEA.max_samples(), 192);
    }

    #[test]
    fn test_packed_sample_fields() {
        // delta = 0x2a, quality = 0x7f, distance = 0x1234
        let word = 0x2a7f_1234;
        let sample = PackedSample::decode(word).unwrap();
        assert_eq!(sample.delta, 0x2a);
        assert_eq!(sample.quality, 0x7f);
        assert_eq!(sample.distance, 0x1234);
        assert_eq!(sample.encode(), word);
    }

    #[test]
    fn test_packed_sample_ignores_top_bits() {
        let sample = PackedSample::decode(0xc100_0001).unwrap();
        assert_eq!(sample.delta, 0x01);
        assert_eq!(sample.distance, 1);
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(PackedSample::decode(0), None);
    }

    #[test]
    fn test_builder_header_words() {
        let frame = FrameBuilder::new().timestamp(0xdead_beef).sequence(0x1b).build();
        assert_eq!(frame_timestamp(&Dialect::TIA, &frame), 0xdead_beef);
        // Only the low nibble survives.
        assert_eq!(frame_sequence(&Dialect::TIA, &frame), 0x0b);
        assert_eq!(be_u16(&frame, 0), BLOCK_MARKER);
        assert_eq!(be_u16(&frame, BLOCK_SIZE * 11), BLOCK_MARKER);
    }

    #[test]
    fn test_trailer_appended() {
        let frame = FrameBuilder::new().build_with_trailer();
        assert_eq!(frame.len(), FRAME_SIZE + 3);
        assert_eq!(&frame[FRAME_SIZE..], &STREAM_TRAILER);
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("TIA".parse::<LidarModel>().unwrap(), LidarModel::Tia);
        assert_eq!("tea".parse::<LidarModel>().unwrap(), LidarModel::Tea);
        assert!(matches!(
            "g4".parse::<LidarModel>(),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(LidarModel::Tia.dialect().framing, Framing::Datagram);
        assert_eq!(LidarModel::Tea.dialect().framing, Framing::Stream);
    }

    #[test]
    fn test_scan_frequency_support() {
        assert!(LidarModel::Tia.supports_scan_frequency(10.0));
        assert!(LidarModel::Tia.supports_scan_frequency(64.0));
        assert!(!LidarModel::Tia.supports_scan_frequency(0.5));
        assert!(!LidarModel::Tia.supports_scan_frequency(65.0));
        // Only the TIA accepts frequency configuration.
        assert!(!LidarModel::Tea.supports_scan_frequency(10.0));
    }
}
