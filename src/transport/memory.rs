//! In-process transport for tests and embedding.
//!
//! Observers are named handles driven from the owning side: `connect`,
//! `send_from` and `disconnect` queue events that the next `poll`
//! delivers, and everything written to an observer is kept for inspection.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::time::Duration;

use crate::error::TransportError;

use super::{ConnectionHandler, Flow, Peer, Transport};

#[derive(Debug, Default)]
struct MemoryPeer {
    name: String,
    inbox: VecDeque<u8>,
    received: Vec<u8>,
}

impl Peer for MemoryPeer {
    fn peer(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.received.extend_from_slice(data);
        Ok(())
    }
}

#[derive(Debug)]
enum Pending {
    Connect(String),
    Data(String, Vec<u8>),
    Disconnect(String),
}

/// Transport whose observers live in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    port: Option<u16>,
    refuse_listen: bool,
    pending: VecDeque<Pending>,
    peers: BTreeMap<String, MemoryPeer>,
    closed: BTreeMap<String, MemoryPeer>,
    broadcasts: Vec<Vec<u8>>,
}

impl MemoryTransport {
    /// Creates a transport that accepts `listen`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport whose `listen` fails.
    #[must_use]
    pub fn refusing() -> Self {
        Self {
            refuse_listen: true,
            ..Self::default()
        }
    }

    /// Port passed to `listen`, if it succeeded.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Queues a new observer connection.
    pub fn connect(&mut self, name: &str) {
        self.pending.push_back(Pending::Connect(name.to_string()));
    }

    /// Queues bytes sent by an observer.
    pub fn send_from(&mut self, name: &str, data: &[u8]) {
        self.pending.push_back(Pending::Data(name.to_string(), data.to_vec()));
    }

    /// Queues an observer hang-up.
    pub fn disconnect(&mut self, name: &str) {
        self.pending.push_back(Pending::Disconnect(name.to_string()));
    }

    /// Every payload broadcast so far.
    #[must_use]
    pub fn broadcasts(&self) -> &[Vec<u8>] {
        &self.broadcasts
    }

    /// Bytes written to an observer (open or closed) so far.
    #[must_use]
    pub fn received_by(&self, name: &str) -> Option<&[u8]> {
        self.peers
            .get(name)
            .or_else(|| self.closed.get(name))
            .map(|p| p.received.as_slice())
    }
}

impl Transport for MemoryTransport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        if self.refuse_listen {
            return Err(TransportError::ListenFailed {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "port refused"),
            });
        }
        self.port = Some(port);
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration, handler: &mut dyn ConnectionHandler) -> Result<(), TransportError> {
        if self.port.is_none() {
            return Err(TransportError::NotListening);
        }

        while let Some(event) = self.pending.pop_front() {
            match event {
                Pending::Connect(name) => {
                    let mut peer = MemoryPeer {
                        name: name.clone(),
                        ..MemoryPeer::default()
                    };
                    let flow = handler.on_connected(&mut peer);
                    match flow {
                        Flow::Continue => self.peers.insert(name, peer),
                        Flow::Stop => self.closed.insert(name, peer),
                    };
                }
                Pending::Data(name, data) => {
                    let Some(peer) = self.peers.get_mut(&name) else {
                        continue;
                    };
                    peer.inbox.extend(data);
                    if handler.on_data(peer) == Flow::Stop {
                        if let Some(peer) = self.peers.remove(&name) {
                            self.closed.insert(name, peer);
                        }
                    }
                }
                Pending::Disconnect(name) => {
                    if let Some(mut peer) = self.peers.remove(&name) {
                        handler.on_closed(&mut peer);
                        self.closed.insert(name, peer);
                    }
                }
            }
        }
        Ok(())
    }

    fn broadcast(&mut self, payload: &[u8]) {
        for peer in self.peers.values_mut() {
            peer.received.extend_from_slice(payload);
        }
        self.broadcasts.push(payload.to_vec());
    }

    fn connection_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Echo {
        closed: Vec<String>,
    }

    impl ConnectionHandler for Echo {
        fn on_connected(&mut self, peer: &mut dyn Peer) -> Flow {
            peer.write(b"welcome\n").unwrap();
            Flow::Continue
        }

        fn on_closed(&mut self, peer: &mut dyn Peer) -> Flow {
            self.closed.push(peer.peer().to_string());
            Flow::Continue
        }

        fn on_data(&mut self, peer: &mut dyn Peer) -> Flow {
            let mut buf = [0u8; 3];
            let n = peer.read(&mut buf).unwrap();
            peer.write(&buf[..n]).unwrap();
            Flow::Continue
        }
    }

    #[test]
    fn scripted_peer_sees_greeting_echo_and_broadcast() {
        let mut transport = MemoryTransport::new();
        transport.listen(4000).unwrap();
        let mut handler = Echo::default();

        transport.connect("a");
        transport.send_from("a", b"hey");
        transport.poll(Duration::ZERO, &mut handler).unwrap();
        transport.broadcast(b"tick\n");

        assert_eq!(transport.connection_count(), 1);
        assert_eq!(transport.received_by("a").unwrap(), b"welcome\nheytick\n");
        assert_eq!(transport.broadcasts(), &[b"tick\n".to_vec()]);
    }

    #[test]
    fn disconnect_notifies_handler_and_stops_broadcasts() {
        let mut transport = MemoryTransport::new();
        transport.listen(4000).unwrap();
        let mut handler = Echo::default();

        transport.connect("a");
        transport.disconnect("a");
        transport.poll(Duration::ZERO, &mut handler).unwrap();
        transport.broadcast(b"late");

        assert_eq!(handler.closed, vec!["a".to_string()]);
        assert_eq!(transport.connection_count(), 0);
        assert_eq!(transport.received_by("a").unwrap(), b"welcome\n");
    }

    #[test]
    fn refusing_transport_fails_to_listen() {
        let mut transport = MemoryTransport::refusing();
        assert!(matches!(transport.listen(1), Err(TransportError::ListenFailed { port: 1, .. })));
        assert!(matches!(
            transport.poll(Duration::ZERO, &mut Echo::default()),
            Err(TransportError::NotListening)
        ));
    }
}
