//! Non-blocking TCP transport on std sockets.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::TransportError;

use super::{ConnectionHandler, Flow, Peer, Transport};

/// Outgoing bytes buffered per observer before it is considered too slow
/// and dropped.
const MAX_OUTBOX_BYTES: usize = 16 * 1024 * 1024;

struct Connection {
    stream: TcpStream,
    peer: String,
    outbox: Vec<u8>,
    /// Set when a broadcast could not be queued; closed on the next poll.
    broken: bool,
}

impl Connection {
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn queue(&mut self, data: &[u8]) -> io::Result<()> {
        if self.outbox.len() + data.len() > MAX_OUTBOX_BYTES {
            return Err(io::Error::new(ErrorKind::Other, "observer too slow, outbox full"));
        }
        self.outbox.extend_from_slice(data);
        self.flush()
    }

    /// True if bytes are waiting; `Err` if the peer hung up.
    fn readable(&self) -> io::Result<bool> {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => Err(ErrorKind::UnexpectedEof.into()),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Peer for Connection {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            other => other,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.queue(data)
    }
}

/// TCP listener serving observers on all interfaces.
#[derive(Default)]
pub struct TcpTransport {
    listener: Option<TcpListener>,
    connections: Vec<Connection>,
}

impl TcpTransport {
    /// Creates a transport that is not yet listening.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound address, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn accept_pending(&mut self, handler: &mut dyn ConnectionHandler) -> Result<bool, TransportError> {
        let listener = self.listener.as_ref().ok_or(TransportError::NotListening)?;
        let mut activity = false;
        loop {
            let (stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            activity = true;

            if let Err(e) = stream.set_nonblocking(true) {
                warn!("dropping connection from {addr}: {e}");
                continue;
            }
            if let Err(e) = stream.set_nodelay(true) {
                debug!("could not disable Nagle for {addr}: {e}");
            }

            let mut conn = Connection {
                stream,
                peer: addr.to_string(),
                outbox: Vec::new(),
                broken: false,
            };
            match handler.on_connected(&mut conn) {
                Flow::Continue => self.connections.push(conn),
                Flow::Stop => debug!("handler refused connection from {addr}"),
            }
        }
        Ok(activity)
    }
}

impl Transport for TcpTransport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        let bind = |port: u16| -> io::Result<TcpListener> {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
            listener.set_nonblocking(true)?;
            Ok(listener)
        };
        let listener = bind(port).map_err(|source| TransportError::ListenFailed { port, source })?;
        self.listener = Some(listener);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration, handler: &mut dyn ConnectionHandler) -> Result<(), TransportError> {
        let mut activity = self.accept_pending(handler)?;

        let mut idx = 0;
        while idx < self.connections.len() {
            let conn = &mut self.connections[idx];
            let keep = !conn.broken
                && match conn.flush().and_then(|()| conn.readable()) {
                    Ok(true) => {
                        activity = true;
                        handler.on_data(conn) == Flow::Continue
                    }
                    Ok(false) => true,
                    Err(e) => {
                        debug!("connection to {} failed: {e}", conn.peer);
                        false
                    }
                };

            if keep {
                idx += 1;
            } else {
                let mut conn = self.connections.swap_remove(idx);
                handler.on_closed(&mut conn);
                activity = true;
            }
        }

        if !activity && !timeout.is_zero() {
            thread::sleep(timeout);
        }
        Ok(())
    }

    fn broadcast(&mut self, payload: &[u8]) {
        for conn in self.connections.iter_mut().filter(|c| !c.broken) {
            if let Err(e) = conn.queue(payload) {
                warn!("dropping observer {}: {e}", conn.peer);
                conn.broken = true;
            }
        }
    }

    fn connection_count(&self) -> usize {
        self.connections.iter().filter(|c| !c.broken).count()
    }
}
