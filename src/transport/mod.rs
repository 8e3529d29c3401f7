//! Observer transport.
//!
//! The simulation thread owns the transport and polls it once per tick
//! without blocking. Connection events are delivered to a
//! `ConnectionHandler`; each callback returns a `Flow` telling the
//! transport whether to keep the connection.

pub mod memory;
pub mod tcp;

use std::io;
use std::time::Duration;

use crate::error::TransportError;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// Whether a connection should stay open after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the connection.
    Continue,
    /// Close the connection.
    Stop,
}

/// One connected observer, as seen from a callback.
pub trait Peer {
    /// Printable peer address.
    fn peer(&self) -> &str;

    /// Reads available bytes without blocking; `Ok(0)` means nothing left.
    ///
    /// # Errors
    ///
    /// Propagates socket errors.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queues bytes for the peer; never blocks.
    ///
    /// # Errors
    ///
    /// Propagates socket errors.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Receives connection lifecycle and data events.
pub trait ConnectionHandler {
    /// A new observer connected.
    fn on_connected(&mut self, peer: &mut dyn Peer) -> Flow;

    /// An observer disconnected. The return value is ignored.
    fn on_closed(&mut self, peer: &mut dyn Peer) -> Flow;

    /// An observer sent data.
    fn on_data(&mut self, peer: &mut dyn Peer) -> Flow;
}

/// Listening endpoint plus its connected observers.
pub trait Transport {
    /// Binds the listening endpoint.
    ///
    /// # Errors
    ///
    /// `ListenFailed` if the port cannot be bound.
    fn listen(&mut self, port: u16) -> Result<(), TransportError>;

    /// Accepts connections and dispatches pending events.
    ///
    /// A zero `timeout` never waits.
    ///
    /// # Errors
    ///
    /// `NotListening` before `listen`, or a listener failure.
    fn poll(&mut self, timeout: Duration, handler: &mut dyn ConnectionHandler) -> Result<(), TransportError>;

    /// Sends `payload` to every connected observer.
    fn broadcast(&mut self, payload: &[u8]);

    /// Number of connected observers.
    fn connection_count(&self) -> usize;
}
