//! Shared TCP plumbing: endpoint spec parsing, socket tuning and framed
//! writes, used by both the client and the server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::{Result, TransportError};
use crate::packet::{encode, INLINE_FRAME_LIMIT};

/// Socket tuning applied to every stream this transport creates or accepts.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Enable `SO_KEEPALIVE` on created and accepted sockets.
    pub keepalive: bool,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// `SO_LINGER` applied to streams; `Some(0)` closes hard.
    pub linger: Option<Duration>,
    /// Upper bound on bytes pulled off a socket in one read call. Packets
    /// larger than this are reassembled across reads.
    pub recv_chunk: usize,
    /// Listen backlog (server only).
    pub backlog: u32,
    /// Port used when a client spec omits one.
    pub default_port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keepalive: true,
            nodelay: true,
            linger: Some(Duration::ZERO),
            recv_chunk: 10_000,
            backlog: 16,
            default_port: 44_000,
        }
    }
}

/// Parse a server port spec. An empty or unparseable spec requests an
/// ephemeral port from the OS.
pub(crate) fn parse_port_spec(spec: &str) -> u16 {
    spec.trim().parse().unwrap_or(0)
}

/// Parse a client destination spec: `host[:port]`, with a tolerated leading
/// `tcp://`. A missing host means `localhost`; a missing or unparseable port
/// means `default_port`. A bare all-digit spec is a port on localhost, so a
/// server's advertised `tcp://<port>` is directly usable.
pub(crate) fn parse_server_spec(spec: &str, default_port: u16) -> (String, u16) {
    let spec = spec.trim();
    let spec = spec.strip_prefix("tcp://").unwrap_or(spec);
    match spec.split_once(':') {
        Some((host, port)) => {
            let host = host.trim();
            let host = if host.is_empty() { "localhost" } else { host };
            (host.to_string(), port.trim().parse().unwrap_or(default_port))
        }
        None if spec.is_empty() => ("localhost".to_string(), default_port),
        None if spec.bytes().all(|b| b.is_ascii_digit()) => {
            ("localhost".to_string(), spec.parse().unwrap_or(default_port))
        }
        None => (spec.to_string(), default_port),
    }
}

fn new_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    Ok(socket)
}

/// Apply the configured options to a freshly connected or accepted stream.
pub(crate) fn apply_stream_options(stream: &TcpStream, config: &TcpConfig) -> Result<()> {
    stream.set_nodelay(config.nodelay)?;
    stream.set_linger(config.linger)?;
    SockRef::from(stream).set_keepalive(config.keepalive)?;
    Ok(())
}

/// Bind and listen on `port` (0 requests an ephemeral port). Must be called
/// within a tokio runtime.
pub(crate) fn bind_listener(port: u16, config: &TcpConfig) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = new_socket(addr).map_err(TransportError::SocketCreate)?;
    socket
        .bind(addr)
        .map_err(|e| TransportError::Bind { port, source: e })?;
    socket
        .listen(config.backlog)
        .map_err(|e| TransportError::Listen { port, source: e })
}

/// Resolve `host` and open a configured stream to it.
pub(crate) async fn connect_stream(host: &str, port: u16, config: &TcpConfig) -> Result<TcpStream> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::Lookup {
            host: host.to_string(),
            source: e,
        })?;
    let addr = addrs.next().ok_or_else(|| TransportError::Lookup {
        host: host.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
    })?;
    let socket = new_socket(addr).map_err(TransportError::SocketCreate)?;
    let stream = socket
        .connect(addr)
        .await
        .map_err(|e| TransportError::Connect {
            addr: format!("{host}:{port}"),
            source: e,
        })?;
    apply_stream_options(&stream, config)?;
    Ok(stream)
}

/// Frame `payload` and write it out. Small payloads go out in one buffer,
/// large ones as header then body. Partial writes are retried by the async
/// write loop; a zero-byte write result means the peer reset the connection.
pub(crate) async fn write_packet(write: &mut OwnedWriteHalf, payload: &[u8]) -> Result<()> {
    let result = if payload.len() < INLINE_FRAME_LIMIT {
        write.write_all(&encode(payload)).await
    } else {
        let header = (payload.len() as u32).to_le_bytes();
        match write.write_all(&header).await {
            Ok(()) => write.write_all(payload).await,
            err => err,
        }
    };
    result.map_err(|e| match e.kind() {
        io::ErrorKind::WriteZero => TransportError::ConnectionReset,
        _ => TransportError::Send(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            parse_server_spec("10.0.0.5:53211", 44_000),
            ("10.0.0.5".to_string(), 53211)
        );
    }

    #[test]
    fn defaults_missing_parts() {
        assert_eq!(
            parse_server_spec("somehost", 44_000),
            ("somehost".to_string(), 44_000)
        );
        assert_eq!(
            parse_server_spec(":5000", 44_000),
            ("localhost".to_string(), 5000)
        );
        assert_eq!(
            parse_server_spec("", 44_000),
            ("localhost".to_string(), 44_000)
        );
    }

    #[test]
    fn accepts_an_advertised_connection_string() {
        assert_eq!(
            parse_server_spec("tcp://53211", 44_000),
            ("localhost".to_string(), 53211)
        );
        assert_eq!(
            parse_server_spec("tcp://otherhost:53211", 44_000),
            ("otherhost".to_string(), 53211)
        );
    }

    #[test]
    fn parses_port_specs() {
        assert_eq!(parse_port_spec("44000"), 44_000);
        assert_eq!(parse_port_spec(""), 0);
        assert_eq!(parse_port_spec("0"), 0);
        assert_eq!(parse_port_spec("not-a-port"), 0);
    }
}
