//! Error types for token decoding, transport, configuration and startup.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// A wire payload that does not describe a valid token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token value 0 is neither a Ping nor a Pong")]
    ZeroValue,
    #[error("token value {0} has no representable generation")]
    OutOfRange(i64),
}

/// Failures of the ring links.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line framing error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("could not reach successor {address} after {attempts} attempts: {source}")]
    Connect {
        address: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("successor link is closed")]
    Closed,
}

/// Rejected process configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{0}` is not a host:port address")]
    InvalidAddress(String),
    #[error("node {0} cannot be its own successor")]
    SelfLoop(String),
    #[error("poisson rate must be a positive finite number, got {0}")]
    InvalidRate(f64),
    #[error("forwarding rounds start at 1")]
    ZeroRound,
    #[error("at least one connect attempt is required")]
    NoConnectAttempts,
    #[error("a ring needs at least 3 nodes, got {0}")]
    RingTooSmall(usize),
}

/// Anything that stops a node from joining the ring. Always fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
