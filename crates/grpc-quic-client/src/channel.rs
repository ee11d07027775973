//! gRPC channels whose connections run over QUIC.
//!
//! tonic's `Endpoint` drives HTTP/2 over whatever IO its connector returns.
//! [`QuicConnector`] dials a [`QuicConn`], runs it through
//! [`QuicCredentials`] and hands it to hyper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use grpc_quic_net::{QuicConn, QuicCredentials, TransportCredentials};
use hyper_util::rt::TokioIo;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::Service;
use tracing::debug;

use crate::dialer::QuicDialer;
use crate::error::{ClientError, Result};
use crate::options::{ClientConfig, DialOption};

/// Dial `target` (`host:port`) and wait for the first connection.
pub async fn dial(target: &str, options: impl IntoIterator<Item = DialOption>) -> Result<Channel> {
    let (endpoint, connector) = prepare(target, options)?;
    let channel = endpoint.connect_with_connector(connector).await?;
    Ok(channel)
}

/// Like [`dial`], but connects on the first request.
///
/// Configuration errors are still reported here. Must be called from
/// within a tokio runtime.
pub fn dial_lazy(target: &str, options: impl IntoIterator<Item = DialOption>) -> Result<Channel> {
    let (endpoint, connector) = prepare(target, options)?;
    Ok(endpoint.connect_with_connector_lazy(connector))
}

fn prepare(
    target: &str,
    options: impl IntoIterator<Item = DialOption>,
) -> Result<(Endpoint, QuicConnector)> {
    let mut config = ClientConfig::from_options(options)?;

    let mut credentials = if config.is_insecure() {
        QuicCredentials::unverified()
    } else {
        QuicCredentials::new()
    };
    if let Some(name) = config.server_name() {
        credentials.override_server_name(name);
    }

    let dialer = QuicDialer::new(&config)?;
    let endpoint = Endpoint::from_shared(format!("http://{target}"))?;
    let endpoint = config.configure_endpoint(endpoint);

    debug!(%target, insecure = config.is_insecure(), "prepared QUIC channel");

    Ok((endpoint, QuicConnector::new(dialer, credentials)))
}

/// tonic connector that dials QUIC and applies the credentials shim.
#[derive(Debug, Clone)]
pub struct QuicConnector {
    dialer: Arc<QuicDialer>,
    credentials: Arc<QuicCredentials>,
}

impl QuicConnector {
    pub fn new(dialer: QuicDialer, credentials: QuicCredentials) -> Self {
        Self {
            dialer: Arc::new(dialer),
            credentials: Arc::new(credentials),
        }
    }
}

impl Service<Uri> for QuicConnector {
    type Response = TokioIo<QuicConn>;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = Arc::clone(&self.dialer);
        let credentials = Arc::clone(&self.credentials);

        Box::pin(async move {
            let authority = uri
                .authority()
                .map(|authority| authority.as_str().to_owned())
                .ok_or_else(|| ClientError::Config(format!("target {uri} has no authority")))?;

            let conn = dialer.dial(&authority).await?;
            let (conn, _auth) = credentials.client_handshake(&authority, conn)?;
            Ok(TokioIo::new(conn))
        })
    }
}
