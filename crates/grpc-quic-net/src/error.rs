//! Error types shared by the QUIC transport crates.

use thiserror::Error;

/// Errors raised while assembling TLS or QUIC transport configuration.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("QUIC transport configuration error: {0}")]
    TransportConfig(String),
}

/// Result type alias using [`NetError`].
pub type Result<T> = std::result::Result<T, NetError>;
