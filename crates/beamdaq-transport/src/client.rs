//! TCP transport client: owns exactly one outbound connection.
//!
//! The client is poll-driven and single-threaded-caller: the owner drives
//! [`TcpClient::process_events`] at its own cadence and drains the event
//! queue; there is no internal background task. Unlike the server, the
//! client has no peer to route around, so a reset on its one connection
//! propagates as an error instead of becoming a disconnect event.

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::connection::ConnectionId;
use crate::error::{Result, TransportError};
use crate::event::{EventQueue, TransportEvent};
use crate::metrics::TransportMetrics;
use crate::packet::{PacketBuffer, HEADER_LEN};
use crate::tcp::{self, TcpConfig};
use crate::transport::TransportClient;

/// TCP implementation of [`TransportClient`].
#[derive(Debug)]
pub struct TcpClient {
    id: ConnectionId,
    read: OwnedReadHalf,
    write: tokio::sync::Mutex<OwnedWriteHalf>,
    rx: Mutex<PacketBuffer>,
    events: EventQueue,
    metrics: TransportMetrics,
    config: TcpConfig,
}

impl TcpClient {
    /// Connect to `server_spec`, parsed as `host[:port]`. A missing host
    /// defaults to `localhost`, a missing port to the configured default; a
    /// server's advertised `tcp://<port>` connection string is accepted
    /// directly.
    pub async fn new(server_spec: &str) -> Result<Self> {
        Self::with_config(server_spec, TcpConfig::default()).await
    }

    /// Like [`TcpClient::new`] with explicit socket tuning.
    pub async fn with_config(server_spec: &str, config: TcpConfig) -> Result<Self> {
        let (host, port) = tcp::parse_server_spec(server_spec, config.default_port);
        let stream = tcp::connect_stream(&host, port, &config).await?;
        let id = ConnectionId::new(format!("tcp://{host}:{port}"));
        debug!(conn = %id, "connected");
        let (read, write) = stream.into_split();
        let metrics = TransportMetrics::new();
        metrics.inc_connections_opened();
        Ok(Self {
            id,
            read,
            write: tokio::sync::Mutex::new(write),
            rx: Mutex::new(PacketBuffer::new()),
            events: EventQueue::new(),
            metrics,
            config,
        })
    }

    /// Wait up to `timeout` for inbound data, queueing one [`Receive`] event
    /// per complete packet. Returns as soon as at least one packet was
    /// extracted, or once the timeout is exhausted.
    ///
    /// A peer close is fatal: packets extracted earlier in the same call
    /// remain queued, then [`TransportError::ConnectionReset`] is returned.
    ///
    /// [`Receive`]: TransportEvent::Receive
    pub async fn process_events(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut extracted = 0;
        while extracted == 0 {
            tokio::select! {
                biased;
                res = self.read.readable() => {
                    match res {
                        Ok(()) => extracted += self.drain()?,
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

    /// Frame `payload` and write it, iff `target` matches this client's own
    /// connection.
    pub async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        _during_connect: bool,
    ) -> Result<()> {
        if target.matches(&self.id) {
            let mut write = self.write.lock().await;
            tcp::write_packet(&mut write, payload).await?;
            self.metrics.inc_packets_sent();
            self.metrics.add_bytes_sent((HEADER_LEN + payload.len()) as u64);
        }
        Ok(())
    }

    /// Identity of this client's own connection.
    pub fn connection(&self) -> ConnectionId {
        self.id.clone()
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

    /// Drain whatever is currently readable. Returns the number of complete
    /// packets extracted.
    fn drain(&self) -> Result<usize> {
        let mut extracted = 0;
        let mut chunk = vec![0u8; self.config.recv_chunk];
        loop {
            match self.read.try_read(&mut chunk) {
                Ok(0) => {
                    debug!(conn = %self.id, "server closed the connection");
                    self.id.set_state(-1);
                    return Err(TransportError::ConnectionReset);
                }
                Ok(n) => {
                    self.metrics.add_bytes_received(n as u64);
                    if self.id.state() == 0 {
                        self.id.set_state(1);
                    }
                    let mut rx = self.rx.lock().unwrap();
                    rx.append(&chunk[..n]);
                    while let Some(packet) = rx.pop_packet() {
                        extracted += 1;
                        self.metrics.inc_packets_received();
                        self.events
                            .push(TransportEvent::Receive(self.id.clone(), packet));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    debug!(conn = %self.id, error = %e, "connection reset");
                    self.id.set_state(-1);
                    return Err(TransportError::ConnectionReset);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(extracted)
    }
}

#[async_trait]
impl TransportClient for TcpClient {
    async fn process_events(&self, timeout: Duration) -> Result<()> {
        TcpClient::process_events(self, timeout).await
    }

    async fn send_packet(
        &self,
        payload: &[u8],
        target: &ConnectionId,
        during_connect: bool,
    ) -> Result<()> {
        TcpClient::send_packet(self, payload, target, during_connect).await
    }

    fn connection(&self) -> ConnectionId {
        TcpClient::connection(self)
    }

    fn next_event(&self) -> Option<TransportEvent> {
        TcpClient::next_event(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // grab a port that is guaranteed unused, then close it again
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpClient::new(&format!("127.0.0.1:{port}"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn sends_only_to_matching_targets() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpClient::new(&format!("127.0.0.1:{port}")).await.unwrap();
        let (mut accepted, _) = listener.accept().await.unwrap();

        let unrelated = ConnectionId::new("tcp://10.0.0.1:1".into());
        client.send_packet(b"skip", &unrelated, false).await.unwrap();
        client
            .send_packet(b"sent", &client.connection(), false)
            .await
            .unwrap();

        let mut frame = [0u8; 8];
        accepted.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[..4], &[4, 0, 0, 0]);
        assert_eq!(&frame[4..], b"sent");
    }

    #[tokio::test]
    async fn wildcard_target_matches_own_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpClient::new(&format!("127.0.0.1:{port}")).await.unwrap();
        let (mut accepted, _) = listener.accept().await.unwrap();

        client
            .send_packet(b"hi", &ConnectionId::all(), false)
            .await
            .unwrap();

        let mut frame = [0u8; 6];
        accepted.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[4..], b"hi");
    }
}
