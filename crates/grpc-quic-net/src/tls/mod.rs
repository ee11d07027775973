//! TLS and QUIC transport configuration.
//!
//! - Negotiation token (ALPN) pinning for client and server configs
//! - Insecure client verifier (encryption kept, authentication skipped)
//! - rustls → quinn config conversion with keep-alive and idle timeout

pub mod config;
pub mod verifier;

pub use config::{TransportSettings, ALPN_GRPC_QUIC};
