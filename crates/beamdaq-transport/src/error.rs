use thiserror::Error;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] std::io::Error),

    #[error("failed to bind socket on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("failed to listen on port {port}: {source}")]
    Listen { port: u16, source: std::io::Error },

    #[error("error in accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("error looking up address '{host}': {source}")]
    Lookup { host: String, source: std::io::Error },

    #[error("error connecting to {addr}: {source} - is the server running?")]
    Connect { addr: String, source: std::io::Error },

    #[error("error sending data: {0}")]
    Send(#[source] std::io::Error),

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("no packet available")]
    NoPacket,

    #[error("unknown transport scheme '{0}'")]
    UnknownScheme(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
