// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Socket primitives used by the connection lifecycle.
//!
//! [`Transport`] is the seam between the driver and the network: the
//! command channel (a TCP connection opened per request), the data channel
//! and the discovery channel (both UDP listeners on fixed local ports).
//! [`NetTransport`] is the real implementation; tests substitute an
//! in-memory one.

use crate::{
    lidar::Error,
    packet_source::{PacketSource, UdpOptions, UdpSource},
};
use std::{
    io::{Read, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream},
    time::Duration,
};
use tracing::trace;

/// Largest command reply accepted.
const MAX_REPLY: usize = 1024;

/// Kernel receive buffer requested for the data channel.
const DATA_RECV_BUFFER: usize = 4 * 1024 * 1024;

pub trait Transport: Send + Sync {
    /// Open the command channel and close it again.
    fn probe(&self, addr: SocketAddr, timeout: Duration) -> Result<(), Error>;

    /// Send `request` on a fresh command connection and return the reply.
    fn exchange(
        &self,
        addr: SocketAddr,
        request: &[u8],
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Vec<u8>, Error>;

    /// Bind the data channel listener.
    fn open_data(&self, port: u16, timeout: Duration) -> Result<Box<dyn PacketSource>, Error>;

    /// Bind the discovery broadcast listener.
    fn open_discovery(&self, port: u16, timeout: Duration)
    -> Result<Box<dyn PacketSource>, Error>;
}

/// Operating system sockets.
#[derive(Clone, Debug)]
pub struct NetTransport {
    bind_ip: IpAddr,
}

impl NetTransport {
    /// Listen on `bind_ip` for the data and discovery channels.
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }
}

impl Default for NetTransport {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl Transport for NetTransport {
    fn probe(&self, addr: SocketAddr, timeout: Duration) -> Result<(), Error> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        drop(stream);
        Ok(())
    }

    fn exchange(
        &self,
        addr: SocketAddr,
        request: &[u8],
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let mut stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_write_timeout(Some(connect_timeout))?;
        stream.set_read_timeout(Some(response_timeout.max(Duration::from_millis(1))))?;
        stream.set_nodelay(true)?;

        stream.write_all(request)?;
        trace!(
            "command sent to {}: {}",
            addr,
            String::from_utf8_lossy(request)
        );

        let mut reply = vec![0u8; MAX_REPLY];
        let len = stream.read(&mut reply)?;
        if len == 0 {
            return Err(Error::Command(format!("{} closed without reply", addr)));
        }
        reply.truncate(len);
        trace!("command reply: {}", String::from_utf8_lossy(&reply));
        Ok(reply)
    }

    fn open_data(&self, port: u16, timeout: Duration) -> Result<Box<dyn PacketSource>, Error> {
        let options = UdpOptions {
            timeout,
            recv_buffer: Some(DATA_RECV_BUFFER),
            broadcast: false,
        };
        let source = UdpSource::bind(SocketAddr::new(self.bind_ip, port), options)?;
        Ok(Box::new(source))
    }

    fn open_discovery(
        &self,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn PacketSource>, Error> {
        let options = UdpOptions {
            timeout,
            recv_buffer: None,
            broadcast: true,
        };
        let source = UdpSource::bind(SocketAddr::new(self.bind_ip, port), options)?;
        Ok(Box::new(source))
    }
}
