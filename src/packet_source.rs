// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for the data and discovery channels.
//!
//! This module provides a blocking [`PacketSource`] trait that abstracts the
//! source of UDP packets, enabling:
//!
//! - **Live operation**: Reading from UDP sockets with a receive deadline
//! - **Testing**: Replaying synthetic frames built with
//!   [`crate::protocol::FrameBuilder`]
//!
//! # Example
//!
//! ```
//! use edgefirst_ydlidar::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::new(vec![vec![1, 2, 3], vec![4, 5]]);
//!
//! let mut buf = [0u8; 2048];
//! while let Ok(len) = source.recv(&mut buf) {
//!     assert!(len > 0);
//! }
//! ```

use crate::lidar::Error;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    net::{SocketAddr, UdpSocket},
    time::Duration,
};

/// Trait for packet sources.
///
/// `recv` blocks for at most the source's receive deadline and reports an
/// expired deadline as [`Error::Timeout`].
pub trait PacketSource: Send {
    /// Receive the next packet into the provided buffer.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes received
    /// - `Err` - Timeout, I/O or source error
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<T: PacketSource + ?Sized> PacketSource for Box<T> {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).recv(buf)
    }
}

/// Socket options for [`UdpSource::bind`].
#[derive(Clone, Copy, Debug)]
pub struct UdpOptions {
    /// Receive deadline for each `recv` call.
    pub timeout: Duration,
    /// Kernel receive buffer size, if it should be enlarged.
    pub recv_buffer: Option<usize>,
    /// Accept broadcast datagrams.
    pub broadcast: bool,
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            recv_buffer: None,
            broadcast: false,
        }
    }
}

/// UDP socket packet source for live sensor operation.
#[derive(Debug)]
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    /// Create a new UDP source from an existing socket.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind to an address and create a UDP source.
    ///
    /// The socket allows address reuse so a reconnect can rebind the fixed
    /// device ports while the previous socket is still closing.
    pub fn bind(addr: SocketAddr, options: UdpOptions) -> Result<Self, Error> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if options.broadcast {
            socket.set_broadcast(true)?;
        }
        if let Some(size) = options.recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }
        socket.bind(&SockAddr::from(addr))?;

        let source = Self::new(socket.into());
        source.set_timeout(options.timeout)?;
        Ok(source)
    }

    /// Change the receive deadline. A zero duration is raised to 1 ms.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let len = self.socket.recv(buf)?;
        Ok(len)
    }
}

/// Test packet source for unit testing.
///
/// Provides a sequence of pre-defined packets for testing driver logic
/// without hardware. Once exhausted every receive fails with
/// `UnexpectedEof`, which callers see as a transport failure.
#[derive(Debug, Clone)]
pub struct TestSource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl TestSource {
    /// Create a new test source with the given packets.
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }

    /// Create an empty test source.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl PacketSource for TestSource {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let Some(packet) = self.packets.get(self.index) else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no more packets",
            )));
        };

        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        self.index += 1;
        Ok(len)
    }
}
