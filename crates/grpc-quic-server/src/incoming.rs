//! gRPC servers that accept connections over QUIC.
//!
//! [`new_server`] binds a [`QuicListener`] and returns it as a
//! [`QuicIncoming`] stream for `tonic::transport::Server::serve_with_incoming`.
//! Every accepted connection passes through the credentials shim before
//! tonic sees it.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use grpc_quic_net::tls::config::build_quic_server_config;
use grpc_quic_net::{QuicConn, QuicCredentials, TransportCredentials};
use tokio_stream::Stream;
use tonic::transport::Server;
use tracing::warn;

use crate::error::{Result, ServerError};
use crate::listener::QuicListener;
use crate::options::{ServerConfig, ServerOption};

type AcceptFuture = Pin<Box<dyn Future<Output = Result<QuicConn>> + Send>>;

/// Bind `addr` and prepare a tonic server for it.
///
/// Add services to the returned builder and pass the [`QuicIncoming`] to
/// `serve_with_incoming` (or `serve_with_incoming_shutdown`).
pub async fn new_server(
    addr: &str,
    options: impl IntoIterator<Item = ServerOption>,
) -> Result<(Server, QuicIncoming)> {
    let mut config = ServerConfig::from_options(options)?;
    let tls = config
        .tls()
        .cloned()
        .ok_or_else(|| ServerError::Config("no TLS configuration set".into()))?;
    let quic_config = build_quic_server_config(tls, config.transport())?;

    let listener = QuicListener::bind(addr, quic_config, config.listener_settings()).await?;
    let server = config.configure_server(Server::builder());

    Ok((server, QuicIncoming::new(listener, QuicCredentials::new())))
}

/// Stream of secured connections accepted by a [`QuicListener`].
///
/// Sessions that fail to set up are logged and skipped. The stream ends
/// when the listener is closed.
pub struct QuicIncoming {
    listener: QuicListener,
    credentials: Box<dyn TransportCredentials>,
    pending: Option<AcceptFuture>,
}

impl QuicIncoming {
    pub fn new(listener: QuicListener, credentials: impl TransportCredentials + 'static) -> Self {
        Self {
            listener,
            credentials: Box::new(credentials),
            pending: None,
        }
    }

    /// Handle to the underlying listener, e.g. to close it from elsewhere.
    pub fn listener(&self) -> &QuicListener {
        &self.listener
    }
}

impl std::fmt::Debug for QuicIncoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicIncoming")
            .field("listener", &self.listener)
            .field("protocol", &self.credentials.info())
            .finish()
    }
}

impl Stream for QuicIncoming {
    type Item = Result<QuicConn>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let accept = this.pending.get_or_insert_with(|| {
                let listener = this.listener.clone();
                Box::pin(async move { listener.accept().await })
            });
            let result = ready!(accept.as_mut().poll(cx));
            this.pending = None;

            match result.and_then(|conn| Ok(this.credentials.server_handshake(conn)?)) {
                Ok((conn, _auth)) => return Poll::Ready(Some(Ok(conn))),
                Err(ServerError::ListenerClosed) => return Poll::Ready(None),
                Err(e) => warn!(error = %e, "skipping connection"),
            }
        }
    }
}
