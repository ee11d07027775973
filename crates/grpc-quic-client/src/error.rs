//! Error types for the dialing side.

use grpc_quic_net::NetError;
use thiserror::Error;

/// Errors that can occur while dialing a gRPC-over-QUIC connection.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid dial configuration: {0}")]
    Config(String),

    #[error("failed to resolve {target}: {reason}")]
    Resolve { target: String, reason: String },

    #[error("endpoint creation failed: {0}")]
    Endpoint(String),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("failed to open stream: {0}")]
    Stream(String),

    #[error("dial {target} timed out after {timeout:?}")]
    Timeout {
        target: String,
        timeout: std::time::Duration,
    },

    #[error("transport configuration error: {0}")]
    Net(#[from] NetError),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
