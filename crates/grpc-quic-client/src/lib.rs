//! gRPC-over-QUIC client side.
//!
//! - [`dial`]: a tonic [`Channel`](tonic::transport::Channel) whose
//!   connections are QUIC sessions carrying one stream each
//! - [`QuicDialer`]: dial a single [`QuicConn`](grpc_quic_net::QuicConn)
//! - [`DialOption`]: ordered functional options for the dial configuration

pub mod channel;
pub mod dialer;
pub mod error;
pub mod options;

pub use channel::{dial, dial_lazy, QuicConnector};
pub use dialer::QuicDialer;
pub use error::ClientError;
pub use options::{ClientConfig, DialOption};
