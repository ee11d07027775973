//! gRPC-over-QUIC transport core.
//!
//! Shared by `grpc-quic-client` and `grpc-quic-server`:
//!
//! - [`QuicConn`]: one QUIC session + one bidirectional stream as a byte stream
//! - [`QuicCredentials`]: transport security step that reuses the session's TLS
//! - ALPN pinning and rustls → quinn config builders
//! - Protocol identifiers reported to gRPC

pub mod conn;
pub mod credentials;
mod deadline;
pub mod error;
pub mod tls;
pub mod version;

pub use conn::{CloseHandle, ConnState, QuicConn, QuicConnectInfo};
pub use credentials::{AuthInfo, ProtocolInfo, QuicCredentials, TransportCredentials};
pub use error::NetError;
