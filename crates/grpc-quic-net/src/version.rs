//! Protocol identifiers reported to the RPC layer.
//!
//! No handshake bytes are exchanged by the credentials shim, but gRPC still
//! wants a stable identifier to key protocol-specific behaviour on.

/// Protocol version reported by [`crate::QuicCredentials::info`].
pub const PROTOCOL_VERSION: &str = "/quic/1.0.0";

/// Security protocol name reported alongside the version.
pub const SECURITY_PROTOCOL: &str = "quic-tls";

/// Authentication type carried in [`crate::AuthInfo`].
pub const AUTH_TYPE: &str = "quic-tls";
