// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame decoding.
//!
//! [`FrameDecoder`] turns one complete frame into oriented [`Sample`]s. All
//! cross-frame state (packet sequence, timestamp extension, previous angle)
//! lives in the decoder, so every connection owns an independent instance.

use crate::{
    lidar::Sample,
    protocol::{Dialect, FULL_TURN, PackedSample, be_u16, be_u32, frame_sequence, frame_timestamp},
};
use std::fmt;

/// Reasons a frame is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a full frame
    Short(usize),
    /// A data block did not start with the expected marker
    BadMarker { block: usize, marker: u16 },
    /// The packet sequence number skipped
    SequenceGap { expected: u8, got: u8 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::Short(len) => write!(f, "short frame: {} bytes", len),
            FrameError::BadMarker { block, marker } => {
                write!(f, "bad marker {:#06x} in block {}", marker, block)
            }
            FrameError::SequenceGap { expected, got } => {
                write!(f, "packet dropout: expected {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Tracks the 4-bit wrapping packet counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceState {
    last: Option<u8>,
}

impl SequenceState {
    /// Accept `seq` if it follows the previous counter. The counter is
    /// always updated, so a single gap is reported once.
    pub fn check(&mut self, seq: u8) -> Result<(), FrameError> {
        let seq = seq & 0x0f;
        match self.last.replace(seq) {
            Some(last) if (last + 1) & 0x0f != seq => Err(FrameError::SequenceGap {
                expected: (last + 1) & 0x0f,
                got: seq,
            }),
            _ => Ok(()),
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Extends the wrapping 32-bit device counter to 64 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimestampState {
    last_raw: u32,
    wraps: u64,
    /// Extended timestamp of the previous frame.
    last: u64,
}

impl TimestampState {
    /// Extend a raw counter value, counting a wrap whenever it goes
    /// backwards.
    pub fn extend(&mut self, raw: u32) -> u64 {
        if raw < self.last_raw {
            self.wraps += 1;
        }
        self.last_raw = raw;
        (self.wraps << 32) | raw as u64
    }

    /// Spread timestamps evenly between the previous frame end and `end`.
    ///
    /// Sample `i` of `k` gets `end - (end - prev) * (k - i - 1) / k`.
    pub fn interpolate(&mut self, end: u64, samples: &mut [Sample]) {
        let k = samples.len() as u64;
        let span = end.saturating_sub(self.last);
        for (i, sample) in samples.iter_mut().enumerate() {
            sample.timestamp = end - span * (k - i as u64 - 1) / k;
        }
        self.last = end;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Summary of a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Number of samples written.
    pub samples: usize,
    /// Timestamp word as received.
    pub end_timestamp_raw: u32,
    /// Packet sequence number.
    pub packet_seq: u8,
}

/// Decoder for one data channel.
#[derive(Debug)]
pub struct FrameDecoder {
    dialect: Dialect,
    sequence: SequenceState,
    timestamp: TimestampState,
    last_angle: u16,
}

impl FrameDecoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sequence: SequenceState::default(),
            timestamp: TimestampState::default(),
            last_angle: 0,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Forget all cross-frame state.
    pub fn reset(&mut self) {
        self.resync();
        self.timestamp.reset();
    }

    /// Forget the packet sequence and previous angle after a reconnect.
    ///
    /// Timestamp extension is kept: the device counter keeps running while
    /// the network is down, so device time stays monotonic.
    pub fn resync(&mut self) {
        self.sequence.reset();
        self.last_angle = 0;
    }

    /// Decode `frame` into `out`, replacing its contents.
    ///
    /// On error `out` is left empty and no timestamp state is consumed.
    pub fn decode(&mut self, frame: &[u8], out: &mut Vec<Sample>) -> Result<DecodedFrame, FrameError> {
        out.clear();

        let frame_size = self.dialect.frame_size();
        if frame.len() < frame_size {
            return Err(FrameError::Short(frame.len()));
        }

        let block_size = self.dialect.block_size();
        if self.dialect.strict_markers {
            for block in 0..self.dialect.blocks {
                let marker = be_u16(frame, block * block_size);
                if marker != self.dialect.block_marker {
                    return Err(FrameError::BadMarker { block, marker });
                }
            }
        }

        let packet_seq = frame_sequence(&self.dialect, frame);
        self.sequence.check(packet_seq)?;

        for block in 0..self.dialect.blocks {
            let offset = block * block_size;
            if be_u16(frame, offset) != self.dialect.block_marker {
                continue;
            }

            let mut angle = be_u16(frame, offset + 2) as u32;
            for j in 0..self.dialect.samples_per_block {
                let Some(packed) = PackedSample::decode(be_u32(frame, offset + 4 + j * 4)) else {
                    break;
                };

                angle += packed.delta as u32;
                let absolute = (angle % FULL_TURN) as u16;
                out.push(Sample {
                    angle: absolute,
                    distance: packed.distance,
                    quality: packed.quality,
                    sync: absolute < self.last_angle,
                    timestamp: 0,
                });
                self.last_angle = absolute;
            }
        }

        let end_timestamp_raw = frame_timestamp(&self.dialect, frame);
        let end = self.timestamp.extend(end_timestamp_raw);
        self.timestamp.interpolate(end, out);

        Ok(DecodedFrame {
            samples: out.len(),
            end_timestamp_raw,
            packet_seq,
        })
    }
}
