// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture thread: frames in, revolutions out.
//!
//! The [`ScanAccumulator`] runs a named thread that reads frames from the
//! data channel, appends decoded samples to a private [`ScanBuffer`] and
//! publishes each completed revolution to the shared [`HandoffBuffer`].
//!
//! Frame-level faults never leave the thread. Bad markers and sequence gaps
//! drop the frame; receive timeouts drop it too until more than
//! `timeout_threshold` happen in a row, which records
//! [`DriverError::Timeout`] and runs the reconnect procedure. Any other
//! receive failure records [`DriverError::DeviceError`] and reconnects at
//! once. A failed reconnect ends the thread.

use crate::{
    buffer::{HandoffBuffer, HandoffError, ScanBuffer, Taken},
    connection::Connection,
    decoder::{DecodedFrame, FrameDecoder},
    lidar::{DriverError, Error, Sample, timestamp},
    packet_source::PacketSource,
    protocol::{Dialect, Framing},
    reassembler::StreamReassembler,
};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

/// Largest datagram accepted on the data channel.
const MAX_DATAGRAM: usize = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Running,
    /// The thread was asked to stop, or exited on its own, and has not been
    /// joined yet.
    Stopping,
}

impl fmt::Display for AccumulatorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AccumulatorState::Idle => write!(f, "idle"),
            AccumulatorState::Running => write!(f, "running"),
            AccumulatorState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Reads complete frames from a packet source and decodes them.
///
/// In datagram framing one receive is one frame. In stream framing
/// receives are fed through a [`StreamReassembler`] until a frame completes
/// or the deadline passes.
#[derive(Debug)]
pub struct FrameReader {
    decoder: FrameDecoder,
    reassembler: Option<StreamReassembler>,
    buf: Vec<u8>,
    timeout: Duration,
}

impl FrameReader {
    pub fn new(dialect: Dialect, timeout: Duration) -> Self {
        let reassembler = match dialect.framing {
            Framing::Datagram => None,
            Framing::Stream => Some(StreamReassembler::new(&dialect)),
        };

        Self {
            decoder: FrameDecoder::new(dialect),
            reassembler,
            buf: vec![0u8; MAX_DATAGRAM.max(dialect.frame_size())],
            timeout,
        }
    }

    /// Drop partial input and the packet sequence after a reconnect.
    /// Device time carries over.
    pub fn resync(&mut self) {
        self.decoder.resync();
        if let Some(reassembler) = self.reassembler.as_mut() {
            reassembler.reset();
        }
    }

    /// Read and decode the next frame into `out`.
    ///
    /// Returns [`Error::Timeout`] when no complete frame arrives in time,
    /// [`Error::Frame`] for a rejected frame and the source's own error for
    /// any other receive failure. A partial stream frame is discarded when
    /// the receive fails or the deadline passes.
    pub fn read_frame<S: PacketSource + ?Sized>(
        &mut self,
        source: &mut S,
        out: &mut Vec<Sample>,
    ) -> Result<DecodedFrame, Error> {
        let Some(reassembler) = self.reassembler.as_mut() else {
            let len = source.recv(&mut self.buf)?;
            return Ok(self.decoder.decode(&self.buf[..len], out)?);
        };

        if let Some(frame) = reassembler.next_frame() {
            return Ok(self.decoder.decode(frame, out)?);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if Instant::now() >= deadline {
                reassembler.reset();
                return Err(Error::Timeout);
            }

            let len = match source.recv(&mut self.buf) {
                Ok(len) => len,
                Err(err) => {
                    reassembler.reset();
                    return Err(err);
                }
            };

            if let Some(frame) = reassembler.feed(&self.buf[..len]) {
                return Ok(self.decoder.decode(frame, out)?);
            }
        }
    }
}

/// Splits a sample stream into revolutions.
#[derive(Debug)]
pub struct RevolutionBuilder {
    current: ScanBuffer,
}

impl RevolutionBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: ScanBuffer::with_capacity(capacity),
        }
    }

    /// Revolution being built.
    pub fn current(&self) -> &ScanBuffer {
        &self.current
    }

    /// Let the current revolution be published at the next start marker
    /// even though it did not begin with one.
    pub fn mark_started(&mut self) {
        self.current.mark_started();
    }

    /// Append `samples`, publishing the revolution in progress at every
    /// start marker. Returns the number of revolutions published.
    pub fn ingest(&mut self, samples: &[Sample], handoff: &HandoffBuffer) -> usize {
        let mut published = 0;

        for sample in samples {
            if sample.sync {
                if self.current.is_started() && !self.current.is_empty() {
                    self.current.set_stamp(timestamp().unwrap_or_default());
                    trace!("revolution complete: {} samples", self.current.len());
                    handoff.publish(&mut self.current);
                    published += 1;
                } else {
                    self.current.clear();
                }
                self.current.mark_started();
            }
            self.current.push(*sample);
        }

        published
    }
}

/// Capture thread parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub dialect: Dialect,
    /// Deadline for one frame.
    pub frame_timeout: Duration,
    /// Consecutive timeouts tolerated before reconnecting.
    pub timeout_threshold: usize,
    /// Maximum samples per revolution.
    pub capacity: usize,
}

/// Owner of the capture thread and its hand-off slot.
pub struct ScanAccumulator {
    handoff: Arc<HandoffBuffer>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<Result<(), Error>>>>,
}

impl ScanAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            handoff: Arc::new(HandoffBuffer::new(capacity)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> MutexGuard<'_, Option<JoinHandle<Result<(), Error>>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_of(&self, handle: &Option<JoinHandle<Result<(), Error>>>) -> AccumulatorState {
        match (handle, self.running.load(Ordering::Acquire)) {
            (None, _) => AccumulatorState::Idle,
            (Some(_), true) => AccumulatorState::Running,
            (Some(_), false) => AccumulatorState::Stopping,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state_of(&self.handle())
    }

    /// True while the capture thread is producing revolutions.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn handoff(&self) -> &Arc<HandoffBuffer> {
        &self.handoff
    }

    /// Spawn the capture thread reading from `connection`.
    ///
    /// Does nothing if the thread is already running. A thread that exited
    /// on its own is joined first.
    pub fn start(&self, connection: Arc<Connection>, config: CaptureConfig) -> Result<(), Error> {
        let mut handle = self.handle();
        match self.state_of(&handle) {
            AccumulatorState::Running => return Ok(()),
            AccumulatorState::Stopping => Self::join(handle.take())?,
            AccumulatorState::Idle => {}
        }

        self.handoff.reset();
        self.running.store(true, Ordering::Release);

        let handoff = Arc::clone(&self.handoff);
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("ydlidar-capture".to_string())
            .spawn(move || capture(connection, handoff, running, config));

        match spawned {
            Ok(thread) => {
                *handle = Some(thread);
                debug!("capture thread started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(Error::Io(err))
            }
        }
    }

    /// Ask the capture thread to exit without waiting for it.
    ///
    /// The hand-off is signalled so a caller blocked in [`Self::grab`]
    /// returns at once.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.handoff.wake();
    }

    /// Stop the capture thread and wait for it. Idempotent.
    ///
    /// Callers blocked in [`Self::grab`] on other threads are released
    /// before the join.
    pub fn stop(&self) -> Result<(), Error> {
        self.request_stop();
        let mut handle = self.handle();
        Self::join(handle.take())
    }

    fn join(handle: Option<JoinHandle<Result<(), Error>>>) -> Result<(), Error> {
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.join().map_err(|_| Error::ThreadPanic)? {
            Ok(()) => debug!("capture thread joined"),
            Err(err) => debug!("capture thread had exited: {}", err),
        }
        Ok(())
    }

    /// Copy the latest revolution into `out`, waiting up to `timeout`.
    pub fn grab(&self, out: &mut [Sample], timeout: Duration) -> Result<Taken, Error> {
        if !self.is_running() {
            return Err(Error::NotScanning);
        }

        match self.handoff.take(out, timeout) {
            Ok(taken) => Ok(taken),
            Err(HandoffError::Timeout) => Err(Error::Timeout),
            Err(HandoffError::Empty) => Err(Error::NotScanning),
        }
    }
}

impl Drop for ScanAccumulator {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl fmt::Debug for ScanAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ScanAccumulator")
            .field("state", &self.state())
            .finish()
    }
}

fn capture(
    connection: Arc<Connection>,
    handoff: Arc<HandoffBuffer>,
    running: Arc<AtomicBool>,
    config: CaptureConfig,
) -> Result<(), Error> {
    debug!("capture thread running, {:?} framing", config.dialect.framing);

    let mut reader = FrameReader::new(config.dialect, config.frame_timeout);
    let mut builder = RevolutionBuilder::new(config.capacity);
    let mut samples = Vec::with_capacity(config.dialect.max_samples());
    let mut source = Arc::clone(&connection);
    let mut timeouts = 0usize;

    let result = loop {
        if !running.load(Ordering::Acquire) {
            break Ok(());
        }

        let fault = match reader.read_frame(&mut source, &mut samples) {
            Ok(frame) => {
                timeouts = 0;
                trace!("frame {} with {} samples", frame.packet_seq, frame.samples);
                builder.ingest(&samples, &handoff);
                continue;
            }
            Err(Error::Timeout) => {
                timeouts += 1;
                warn!("no data for frame ({} in a row)", timeouts);
                if timeouts <= config.timeout_threshold {
                    continue;
                }
                DriverError::Timeout
            }
            Err(Error::Frame(err)) => {
                warn!("dropping frame: {}", err);
                builder.mark_started();
                continue;
            }
            Err(Error::NotOpen(what)) => {
                warn!("{} is not open", what);
                DriverError::NotOpen
            }
            Err(err) => {
                warn!("data channel failed: {}", err);
                DriverError::DeviceError
            }
        };

        connection.error().set(fault);
        let keep_going = || running.load(Ordering::Acquire);
        match connection.reconnect(&keep_going) {
            Ok(()) => {
                reader.resync();
                builder.mark_started();
                timeouts = 0;
            }
            Err(_) if !running.load(Ordering::Acquire) => break Ok(()),
            Err(err) => {
                error!("reconnect failed, capture thread exiting: {}", err);
                break Err(err);
            }
        }
    };

    running.store(false, Ordering::Release);
    handoff.wake();
    debug!("capture thread exiting");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decoder::FrameError,
        packet_source::TestSource,
        protocol::{FrameBuilder, PackedSample},
    };

    fn sync_samples(angles: &[u16]) -> Vec<Sample> {
        let mut last = 0;
        angles
            .iter()
            .map(|&angle| {
                let sample = Sample {
                    angle,
                    distance: 1000,
                    sync: angle < last,
                    ..Default::default()
                };
                last = angle;
                sample
            })
            .collect()
    }

    fn angles(samples: &[Sample]) -> Vec<u16> {
        samples.iter().map(|s| s.angle).collect()
    }

    #[test]
    fn test_revolution_boundary() {
        let handoff = HandoffBuffer::new(16);
        let mut builder = RevolutionBuilder::new(16);
        // Running mid-stream: the revolution in progress counts as started.
        builder.mark_started();

        let published = builder.ingest(&sync_samples(&[35_000, 35_500, 200, 400]), &handoff);
        assert_eq!(published, 1);

        let mut out = [Sample::default(); 16];
        let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
        assert_eq!(angles(&out[..taken.len]), vec![35_000, 35_500]);
        assert!(taken.stamp > 0);

        // The 2° sample opens the next revolution.
        assert_eq!(angles(builder.current().as_slice()), vec![200, 400]);
        assert!(builder.current().as_slice()[0].sync);
    }

    #[test]
    fn test_partial_first_revolution_is_dropped() {
        let handoff = HandoffBuffer::new(16);
        let mut builder = RevolutionBuilder::new(16);

        // 350°, 355° precede the first start marker and are discarded.
        let mut stream = sync_samples(&[35_000, 35_500, 200, 400]);
        stream.extend(sync_samples(&[1_000, 30_000, 100]));
        assert_eq!(builder.ingest(&stream, &handoff), 1);

        let mut out = [Sample::default(); 16];
        let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
        assert_eq!(angles(&out[..taken.len]), vec![200, 400, 1_000, 30_000]);
    }

    #[test]
    fn test_revolution_capped_at_capacity() {
        let handoff = HandoffBuffer::new(4);
        let mut builder = RevolutionBuilder::new(4);
        builder.mark_started();

        builder.ingest(&sync_samples(&[10, 20, 30, 40, 50, 60, 5]), &handoff);

        let mut out = [Sample::default(); 8];
        let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
        assert_eq!(angles(&out[..taken.len]), vec![10, 20, 30, 60]);
    }

    fn datagram(seq: u8, start: u16) -> Vec<u8> {
        let samples: Vec<PackedSample> = (0..4).map(|_| PackedSample::new(10, 50, 1500)).collect();
        FrameBuilder::new()
            .block(0, start, &samples)
            .sequence(seq)
            .timestamp(1000 * (seq as u32 + 1))
            .build()
    }

    #[test]
    fn test_reader_datagram() {
        let mut reader = FrameReader::new(Dialect::TIA, Duration::from_millis(50));
        let mut source = TestSource::new(vec![datagram(0, 100), vec![0u8; 10]]);
        let mut out = Vec::new();

        let frame = reader.read_frame(&mut source, &mut out).unwrap();
        assert_eq!(frame.samples, 4);
        assert_eq!(angles(&out), vec![110, 120, 130, 140]);

        assert!(matches!(
            reader.read_frame(&mut source, &mut out),
            Err(Error::Frame(FrameError::Short(10)))
        ));
        // An exhausted source is a receive failure, not a timeout.
        assert!(matches!(
            reader.read_frame(&mut source, &mut out),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_reader_stream_reassembles_chunks() {
        let mut stream = Vec::new();
        for seq in 0..3 {
            stream.extend_from_slice(&crate::protocol::STREAM_TRAILER);
            stream.extend_from_slice(&datagram(seq, 1000 * seq as u16));
        }
        stream.extend_from_slice(&crate::protocol::STREAM_TRAILER);
        let chunks: Vec<Vec<u8>> = stream.chunks(300).map(<[u8]>::to_vec).collect();

        let mut reader = FrameReader::new(Dialect::TEA, Duration::from_secs(1));
        let mut source = TestSource::new(chunks);
        let mut out = Vec::new();

        let mut seqs = Vec::new();
        for _ in 0..3 {
            seqs.push(reader.read_frame(&mut source, &mut out).unwrap().packet_seq);
        }
        assert_eq!(seqs, vec![0, 1, 2]);
        assert!(matches!(
            reader.read_frame(&mut source, &mut out),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_reader_stream_timeout_discards_partial() {
        let mut partial = crate::protocol::STREAM_TRAILER.to_vec();
        partial.extend_from_slice(&datagram(0, 0)[..400]);

        let mut reader = FrameReader::new(Dialect::TEA, Duration::from_secs(1));
        let mut out = Vec::new();

        // Source fails mid-frame.
        let mut first = TestSource::new(vec![partial]);
        assert!(reader.read_frame(&mut first, &mut out).is_err());

        // The stale half frame is gone, so the tail alone completes nothing.
        let mut second = TestSource::new(vec![datagram(0, 0)[400..].to_vec()]);
        assert!(reader.read_frame(&mut second, &mut out).is_err());
        assert!(out.is_empty());
    }

    /// Replays `packets`, then reports every receive as a timeout.
    struct Replay(std::collections::VecDeque<Vec<u8>>);

    impl PacketSource for Replay {
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let packet = self.0.pop_front().ok_or(Error::Timeout)?;
            buf[..packet.len()].copy_from_slice(&packet);
            Ok(packet.len())
        }
    }

    #[test]
    fn test_reader_stream_deadline_is_timeout() {
        let mut reader = FrameReader::new(Dialect::TEA, Duration::from_millis(20));
        let mut source = Replay(vec![crate::protocol::STREAM_TRAILER.to_vec()].into());
        let mut out = Vec::new();
        assert!(matches!(
            reader.read_frame(&mut source, &mut out),
            Err(Error::Timeout)
        ));
    }

    fn stamped(seq: u8, timestamp: u32) -> Vec<u8> {
        let samples = [PackedSample::new(10, 50, 1500); 4];
        FrameBuilder::new()
            .block(0, 0, &samples)
            .sequence(seq)
            .timestamp(timestamp)
            .build()
    }

    #[test]
    fn test_device_time_survives_resync_across_wrap() {
        let mut reader = FrameReader::new(Dialect::TIA, Duration::from_millis(50));
        let mut out = Vec::new();

        let mut before = TestSource::new(vec![stamped(3, 0xffff_fff0), stamped(4, 0x10)]);
        reader.read_frame(&mut before, &mut out).unwrap();
        reader.read_frame(&mut before, &mut out).unwrap();
        let last = out[out.len() - 1].timestamp;
        assert_eq!(last, 0x1_0000_0010);

        // Reconnected: the packet counter restarts, the device clock did not.
        reader.resync();
        let mut after = TestSource::new(vec![stamped(11, 0x20)]);
        reader.read_frame(&mut after, &mut out).unwrap();
        assert!(out.iter().all(|s| s.timestamp > last));
        assert_eq!(out[out.len() - 1].timestamp, 0x1_0000_0020);
    }

    #[test]
    fn test_accumulator_idle() {
        let acc = ScanAccumulator::new(16);
        assert_eq!(acc.state(), AccumulatorState::Idle);

        let mut out = [Sample::default(); 4];
        assert!(matches!(
            acc.grab(&mut out, Duration::from_millis(1)),
            Err(Error::NotScanning)
        ));
        acc.stop().unwrap();
        assert_eq!(acc.state(), AccumulatorState::Idle);
    }
}
