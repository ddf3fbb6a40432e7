//! TCP transport server: accepts connections, multiplexes reads across all
//! of them and delivers addressed or broadcast packets.
//!
//! Connections live in a slot-reuse table: a closed connection's slot is
//! cleared rather than removed, so indices stay stable for in-flight
//! iteration and a later accept can take the slot over. Sends and closes may
//! be issued concurrently with the poll loop; the table is lock-protected
//! and writes serialize per connection.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::select_all;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionId;
use crate::error::{Result, TransportError};
use crate::event::{EventQueue, TransportEvent};
use crate::metrics::TransportMetrics;
use crate::packet::{PacketBuffer, HEADER_LEN};
use crate::tcp::{self, TcpConfig};
use crate::transport::TransportServer;

/// One accepted peer: its identity, socket halves and receive accumulator.
#[derive(Debug)]
struct Peer {
    id: ConnectionId,
    read: OwnedReadHalf,
    write: tokio::sync::Mutex<OwnedWriteHalf>,
    rx: Mutex<PacketBuffer>,
}

/// TCP implementation of [`TransportServer`].
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    port: u16,
    config: TcpConfig,
    peers: Mutex<Vec<Option<Arc<Peer>>>>,
    events: EventQueue,
    metrics: TransportMetrics,
}

impl TcpServer {
    /// Bind and listen on the port given in `port_spec`; `"0"` or an empty
    /// spec requests an ephemeral port from the OS. Must be called within a
    /// tokio runtime.
    pub fn new(port_spec: &str) -> Result<Self> {
        Self::with_config(port_spec, TcpConfig::default())
    }

    /// Like [`TcpServer::new`] with explicit socket tuning.
    pub fn with_config(port_spec: &str, config: TcpConfig) -> Result<Self> {
        let requested = tcp::parse_port_spec(port_spec);
        let listener = tcp::bind_listener(requested, &config)?;
        let port = listener.local_addr().map_err(TransportError::Io)?.port();
        info!(port, "listening");
        Ok(Self {
            listener,
            port,
            config,
            peers: Mutex::new(Vec::new()),
            events: EventQueue::new(),
            metrics: TransportMetrics::new(),
        })
    }

    /// The port this server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Out-of-band destination spec clients can use to reach this server.
    pub fn connection_string(&self) -> String {
        format!("tcp://{}", self.port)
    }

    /// Wait up to `timeout` for socket activity: accept new peers, drain
    /// readable connections and queue the resulting events. Returns as soon
    /// as at least one packet was extracted, or once the timeout is
    /// exhausted.
    pub async fn process_events(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut extracted = 0;
        while extracted == 0 {
            let peers = self.snapshot();
            tokio::select! {
                biased;
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted.map_err(TransportError::Accept)?;
                    self.accept_peer(stream, addr)?;
                }
                (idx, res) = async {
                    if peers.is_empty() {
                        std::future::pending::<(usize, io::Result<()>)>().await
                    } else {
                        let readers: Vec<_> = peers
                            .iter()
                            .map(|p| Box::pin(p.read.readable()))
                            .collect();
                        let (res, idx, _) = select_all(readers).await;
                        (idx, res)
                    }
                } => {
                    match res {
                        Ok(()) => extracted += self.drain_peer(&peers[idx]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(TransportError::Io(e)),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    trace!("process_events reached its timeout");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Frame `payload` and write it to every tracked connection matching
    /// `target` whose state is positive (any state if `during_connect`, the
    /// path handshake greetings take to a still-pending peer). The first
    /// hard write failure propagates.
    pub async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        during_connect: bool,
    ) -> Result<()> {
        for peer in self.snapshot() {
            if target.matches(&peer.id) && (peer.id.state() > 0 || during_connect) {
                let mut write = peer.write.lock().await;
                tcp::write_packet(&mut write, payload).await?;
                self.metrics.inc_packets_sent();
                self.metrics.add_bytes_sent((HEADER_LEN + payload.len()) as u64);
            }
        }
        Ok(())
    }

    /// Snapshot of the currently tracked connections. May include identities
    /// whose state has already gone negative; callers must check.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Close every connection matching `target`: mark it closed, free its
    /// slot for reuse and release the socket.
    pub fn close(&self, target: &ConnectionId) {
        let mut peers = self.peers.lock().unwrap();
        for slot in peers.iter_mut() {
            if let Some(peer) = slot {
                if target.matches(&peer.id) {
                    debug!(conn = %peer.id, "closing connection");
                    peer.id.set_state(-1);
                    self.metrics.inc_connections_closed();
                    *slot = None;
                }
            }
        }
    }

    /// Pop the oldest queued transport event.
    pub fn next_event(&self) -> Option<TransportEvent> {
        self.events.pop()
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().unwrap().iter().flatten().cloned().collect()
    }

    fn accept_peer(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        tcp::apply_stream_options(&stream, &self.config)?;
        let id = ConnectionId::new(format!("tcp://{}:{}", addr.ip(), addr.port()));
        debug!(conn = %id, "accepted connection");
        let (read, write) = stream.into_split();
        let peer = Arc::new(Peer {
            id: id.clone(),
            read,
            write: tokio::sync::Mutex::new(write),
            rx: Mutex::new(PacketBuffer::new()),
        });

        let mut peers = self.peers.lock().unwrap();
        match peers.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(peer),
            None => peers.push(Some(peer)),
        }
        drop(peers);

        self.metrics.inc_connections_opened();
        self.events.push(TransportEvent::Connect(id));
        Ok(())
    }

    /// Drain whatever is currently readable on `peer`. A peer close (or a
    /// reset) becomes a `Disconnect` event plus cleanup rather than an
    /// error, so one bad connection cannot stop the server from servicing
    /// the others. Returns the number of complete packets extracted.
    fn drain_peer(&self, peer: &Peer) -> usize {
        let mut extracted = 0;
        let mut chunk = vec![0u8; self.config.recv_chunk];
        loop {
            match peer.read.try_read(&mut chunk) {
                Ok(0) => {
                    debug!(conn = %peer.id, "peer disconnected");
                    self.events.push(TransportEvent::Disconnect(peer.id.clone()));
                    self.close(&peer.id);
                    break;
                }
                Ok(n) => {
                    self.metrics.add_bytes_received(n as u64);
                    if peer.id.state() == 0 {
                        peer.id.set_state(1);
                    }
                    let mut rx = peer.rx.lock().unwrap();
                    rx.append(&chunk[..n]);
                    while let Some(packet) = rx.pop_packet() {
                        extracted += 1;
                        self.metrics.inc_packets_received();
                        self.events
                            .push(TransportEvent::Receive(peer.id.clone(), packet));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!(conn = %peer.id, error = %e, "peer reset");
                    self.events.push(TransportEvent::Disconnect(peer.id.clone()));
                    self.close(&peer.id);
                    break;
                }
                Err(e) => {
                    warn!(conn = %peer.id, error = %e, "recv error");
                    break;
                }
            }
        }
        extracted
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    async fn process_events(&self, timeout: Duration) -> Result<()> {
        TcpServer::process_events(self, timeout).await
    }

    async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        during_connect: bool,
    ) -> Result<()> {
        TcpServer::send_packet(self, payload, target, during_connect).await
    }

    fn connections(&self) -> Vec<ConnectionId> {
        TcpServer::connections(self)
    }

    fn close(&self, target: &ConnectionId) {
        TcpServer::close(self, target)
    }

    fn connection_string(&self) -> String {
        TcpServer::connection_string(self)
    }

    fn next_event(&self) -> Option<TransportEvent> {
        TcpServer::next_event(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assigns_an_ephemeral_port() {
        let server = TcpServer::new("0").unwrap();
        assert_ne!(server.port(), 0);
        assert_eq!(server.connection_string(), format!("tcp://{}", server.port()));
        assert!(server.connections().is_empty());
    }

    #[tokio::test]
    async fn rebinding_a_taken_port_fails() {
        let server = TcpServer::new("0").unwrap();
        let taken = server.port();
        let err = TcpServer::new(&taken.to_string())
            .err()
            .expect("rebinding should fail");
        match err {
            TransportError::Bind { port, .. } => assert_eq!(port, taken),
            other => panic!("expected a bind error, got {other}"),
        }
    }

    #[tokio::test]
    async fn process_events_honours_its_timeout() {
        let server = TcpServer::new("0").unwrap();
        let start = std::time::Instant::now();
        server.process_events(Duration::from_millis(200)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(190));
        assert!(server.next_event().is_none());
    }
}
