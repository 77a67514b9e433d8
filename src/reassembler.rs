// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame reassembly for the stream dialect.
//!
//! The TEA streams frames without aligning them to datagrams. Every frame is
//! followed by a three byte trailer, so the reassembler hunts for a trailer,
//! then collects exactly one frame worth of bytes after it. Bytes read past
//! the end of a frame are kept for the next call, and a trailer split across
//! reads is still recognized.

use crate::protocol::Dialect;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Looking for a trailer; holds the number of trailer bytes matched.
    Seeking(usize),
    /// Trailer seen, copying frame bytes.
    Collecting,
}

/// Incremental frame reassembler.
#[derive(Debug)]
pub struct StreamReassembler {
    trailer: [u8; 3],
    frame_size: usize,
    phase: Phase,
    frame: Vec<u8>,
    pending: Vec<u8>,
}

impl StreamReassembler {
    pub fn new(dialect: &Dialect) -> Self {
        let frame_size = dialect.frame_size();
        Self {
            trailer: dialect.trailer,
            frame_size,
            phase: Phase::Seeking(0),
            frame: Vec::with_capacity(frame_size),
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Add a chunk of received bytes and return the next complete frame,
    /// if one is now available.
    ///
    /// Only one frame is returned per call. Call [`Self::next_frame`] until
    /// it yields `None` before reading more data.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<&[u8]> {
        self.pending.extend_from_slice(chunk);
        self.next_frame()
    }

    /// Return the next complete frame from bytes already buffered.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        let mut consumed = 0;
        let mut complete = false;

        while consumed < self.pending.len() {
            match self.phase {
                Phase::Seeking(matched) => {
                    let byte = self.pending[consumed];
                    consumed += 1;

                    let matched = if byte == self.trailer[matched] {
                        matched + 1
                    } else if byte == self.trailer[0] {
                        1
                    } else {
                        0
                    };

                    if matched == self.trailer.len() {
                        self.frame.clear();
                        self.phase = Phase::Collecting;
                    } else {
                        self.phase = Phase::Seeking(matched);
                    }
                }
                Phase::Collecting => {
                    let needed = self.frame_size - self.frame.len();
                    let available = (self.pending.len() - consumed).min(needed);
                    self.frame
                        .extend_from_slice(&self.pending[consumed..consumed + available]);
                    consumed += available;

                    if self.frame.len() == self.frame_size {
                        self.phase = Phase::Seeking(0);
                        complete = true;
                        break;
                    }
                }
            }
        }

        self.pending.drain(..consumed);

        if complete {
            Some(self.frame.as_slice())
        } else {
            None
        }
    }

    /// True while part of a frame has been collected.
    pub fn is_collecting(&self) -> bool {
        self.phase == Phase::Collecting
    }

    /// Number of received bytes not yet examined.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard all buffered bytes and restart the trailer search.
    pub fn reset(&mut self) {
        self.phase = Phase::Seeking(0);
        self.frame.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FRAME_SIZE, FrameBuilder, PackedSample, STREAM_TRAILER};

    fn frame(seq: u8) -> Vec<u8> {
        FrameBuilder::new()
            .block(0, 100, &[PackedSample::new(1, 2, 3)])
            .sequence(seq)
            .build()
    }

    #[test]
    fn test_frame_after_trailer() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        let mut stream = vec![0xaa, 0xbb];
        stream.extend_from_slice(&STREAM_TRAILER);
        stream.extend_from_slice(&frame(3));

        let out = reassembler.feed(&stream).map(|f| f.to_vec());
        assert_eq!(out, Some(frame(3)));
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn test_trailer_split_across_reads() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        assert!(reassembler.feed(&[0x21]).is_none());
        assert!(reassembler.feed(&[0x43, 0x65]).is_none());
        assert!(reassembler.is_collecting());

        let out = reassembler.feed(&frame(1)).map(|f| f.to_vec());
        assert_eq!(out, Some(frame(1)));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        let mut stream = STREAM_TRAILER.to_vec();
        stream.extend_from_slice(&frame(7));
        stream.extend_from_slice(&STREAM_TRAILER);

        let mut frames = Vec::new();
        for byte in &stream {
            if let Some(f) = reassembler.feed(std::slice::from_ref(byte)) {
                frames.push(f.to_vec());
            }
        }
        assert_eq!(frames, vec![frame(7)]);
    }

    #[test]
    fn test_partial_trailer_restarts_on_mismatch() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        // 0x21 0x21 0x43 0x65: the second 0x21 must restart the match.
        assert!(reassembler.feed(&[0x21, 0x21, 0x43]).is_none());
        assert!(reassembler.feed(&[0x65]).is_none());
        assert!(reassembler.is_collecting());
    }

    #[test]
    fn test_back_to_back_frames_keep_leftover() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        let mut stream = Vec::new();
        for seq in 0..3 {
            stream.extend_from_slice(&STREAM_TRAILER);
            stream.extend_from_slice(&frame(seq));
        }
        stream.extend_from_slice(&STREAM_TRAILER);

        let mut frames = Vec::new();
        // Deliver in chunks that do not line up with frame boundaries.
        for chunk in stream.chunks(500) {
            let mut next = reassembler.feed(chunk).map(|f| f.to_vec());
            while let Some(f) = next {
                frames.push(f);
                next = reassembler.next_frame().map(|f| f.to_vec());
            }
        }

        assert_eq!(frames, vec![frame(0), frame(1), frame(2)]);
    }

    #[test]
    fn test_single_read_with_two_frames() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        let mut stream = Vec::new();
        for seq in 4..6 {
            stream.extend_from_slice(&STREAM_TRAILER);
            stream.extend_from_slice(&frame(seq));
        }

        assert_eq!(reassembler.feed(&stream).map(|f| f.to_vec()), Some(frame(4)));
        assert_eq!(reassembler.next_frame().map(|f| f.to_vec()), Some(frame(5)));
        assert!(reassembler.next_frame().is_none());
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut reassembler = StreamReassembler::new(&Dialect::TEA);
        let mut stream = STREAM_TRAILER.to_vec();
        stream.extend_from_slice(&frame(0)[..FRAME_SIZE / 2]);
        assert!(reassembler.feed(&stream).is_none());
        assert!(reassembler.is_collecting());

        reassembler.reset();
        assert!(!reassembler.is_collecting());
        assert_eq!(reassembler.pending_len(), 0);

        // The rest of the old frame is not mistaken for a new one.
        assert!(reassembler.feed(&frame(0)[FRAME_SIZE / 2..]).is_none());
    }
}
