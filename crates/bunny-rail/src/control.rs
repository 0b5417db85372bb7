//! Client side of the control-plane protocol.
//!
//! The proxy never touches the tables itself: it sends [`Command`]s to the
//! switch agent, which owns the hardware state. [`ControlPlane`] is the
//! seam between the two, so the session logic can run against a TCP agent
//! or an in-process table store alike.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::codec;
use crate::command::Command;
use crate::error::{RailError, Result};

/// Operations the switch agent exposes.
pub trait ControlPlane {
    /// Send a command that has no reply.
    fn send(&mut self, command: &Command) -> Result<()>;

    /// Read the execution cursor register of `robot_id`.
    fn actual_position(&mut self, robot_id: i32) -> Result<u32>;

    /// Send every command in order, stopping at the first failure.
    fn send_all(&mut self, commands: &[Command]) -> Result<()> {
        commands.iter().try_for_each(|c| self.send(c))
    }

    /// End the conversation.
    fn close(&mut self) -> Result<()> {
        self.send(&Command::Close)
    }
}

/// Opens one control-plane connection per request.
pub trait Connector {
    type Plane: ControlPlane;

    fn connect(&self) -> Result<Self::Plane>;
}

/// Control plane spoken over a byte stream.
pub struct StreamControlPlane<S> {
    stream: S,
}

impl<S: Read + Write> StreamControlPlane<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> ControlPlane for StreamControlPlane<S> {
    fn send(&mut self, command: &Command) -> Result<()> {
        debug!(code = command.code(), "control command");
        self.stream.write_all(&command.encode())?;
        Ok(())
    }

    fn actual_position(&mut self, robot_id: i32) -> Result<u32> {
        self.send(&Command::GetActualPosition { robot_id })?;
        self.stream.flush()?;
        codec::read_u32(&mut self.stream)
    }

    fn close(&mut self) -> Result<()> {
        self.send(&Command::Close)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Control plane over TCP.
pub type TcpControlPlane = StreamControlPlane<TcpStream>;

impl TcpControlPlane {
    /// Connect to a switch agent.
    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let stream = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

/// Connects to a fixed agent address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            RailError::Config("control plane address resolves to nothing".into())
        })?;
        Ok(Self { addr, timeout })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connector for TcpConnector {
    type Plane = TcpControlPlane;

    fn connect(&self) -> Result<TcpControlPlane> {
        TcpControlPlane::connect(self.addr, self.timeout)
    }
}
