//! gRPC-over-QUIC server side.
//!
//! - [`new_server`]: bind a QUIC listener and get a tonic server builder plus
//!   the [`QuicIncoming`] stream to serve it with
//! - [`QuicListener`]: accept raw [`QuicConn`](grpc_quic_net::QuicConn)s
//! - [`ServerOption`]: ordered functional options for the listen configuration

pub mod error;
pub mod incoming;
pub mod listener;
pub mod options;

pub use error::ServerError;
pub use incoming::{new_server, QuicIncoming};
pub use listener::{ListenerSettings, QuicListener};
pub use options::{ServerConfig, ServerOption};
