//! Error types for the listening side.

use std::net::SocketAddr;
use std::time::Duration;

use grpc_quic_net::NetError;
use thiserror::Error;

/// Errors that can occur while listening for gRPC-over-QUIC connections.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error("server cannot be insecure")]
    Insecure,

    #[error("failed to resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("endpoint bind failed: {0}")]
    Bind(String),

    #[error("connection accept failed: {0}")]
    Accept(#[from] quinn::ConnectionError),

    #[error("failed to accept stream: {0}")]
    Stream(String),

    #[error("peer {peer} opened no stream within {timeout:?}")]
    StreamTimeout { peer: SocketAddr, timeout: Duration },

    #[error("listener closed")]
    ListenerClosed,

    #[error("transport configuration error: {0}")]
    Net(#[from] NetError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
