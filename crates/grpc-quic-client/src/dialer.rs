//! QUIC dialer producing one [`QuicConn`] per call.
//!
//! Each dial binds its own ephemeral UDP socket, establishes a session and
//! opens the single bidirectional stream that carries the connection. The
//! whole sequence runs under one deadline. On any failure, including the
//! deadline, the socket and session are closed before the error is returned.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use grpc_quic_net::conn::CLOSE_CODE;
use grpc_quic_net::tls::config::build_quic_client_config;
use grpc_quic_net::QuicConn;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::options::ClientConfig;

/// Dials gRPC-over-QUIC connections with a fixed configuration.
#[derive(Debug)]
pub struct QuicDialer {
    client_config: quinn::ClientConfig,
    server_name: Option<String>,
    timeout: Duration,
}

impl QuicDialer {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls = config
            .tls()
            .cloned()
            .ok_or_else(|| ClientError::Config("no transport security set".into()))?;
        let client_config = build_quic_client_config(tls, config.transport())?;

        Ok(Self {
            client_config,
            server_name: config.server_name().map(str::to_owned),
            timeout: config.timeout(),
        })
    }

    /// Dial `target` (`host:port`) and open the connection's stream.
    pub async fn dial(&self, target: &str) -> Result<QuicConn> {
        let deadline = Instant::now() + self.timeout;
        let timed_out = || ClientError::Timeout {
            target: target.to_owned(),
            timeout: self.timeout,
        };

        let remote = timeout_at(deadline, resolve(target))
            .await
            .map_err(|_| timed_out())??;

        let endpoint = self.bind_endpoint(remote)?;
        let server_name = self.server_name.as_deref().unwrap_or_else(|| host_of(target));

        match timeout_at(deadline, connect(&endpoint, remote, server_name)).await {
            Ok(Ok(conn)) => {
                info!(%target, %remote, "dialed QUIC session");
                Ok(conn)
            }
            Ok(Err(e)) => {
                endpoint.close(CLOSE_CODE, b"dial failed");
                warn!(%target, error = %e, "dial failed");
                Err(e)
            }
            Err(_) => {
                endpoint.close(CLOSE_CODE, b"dial timed out");
                warn!(%target, timeout = ?self.timeout, "dial timed out");
                Err(timed_out())
            }
        }
    }

    /// Bind an ephemeral UDP socket of the same family as `remote`.
    fn bind_endpoint(&self, remote: SocketAddr) -> Result<quinn::Endpoint> {
        let bind_addr = if remote.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let mut endpoint =
            quinn::Endpoint::client(bind_addr).map_err(|e| ClientError::Endpoint(e.to_string()))?;
        endpoint.set_default_client_config(self.client_config.clone());
        Ok(endpoint)
    }
}

/// Establish the session and open its one stream.
async fn connect(
    endpoint: &quinn::Endpoint,
    remote: SocketAddr,
    server_name: &str,
) -> Result<QuicConn> {
    let session = endpoint.connect(remote, server_name)?.await?;
    debug!(%remote, server_name, "session established");

    match session.open_bi().await {
        Ok((send, recv)) => Ok(QuicConn::dialed(endpoint.clone(), session, send, recv)),
        Err(e) => {
            session.close(CLOSE_CODE, b"stream open failed");
            Err(ClientError::Stream(e.to_string()))
        }
    }
}

async fn resolve(target: &str) -> Result<SocketAddr> {
    let resolve_error = |reason: String| ClientError::Resolve {
        target: target.to_owned(),
        reason,
    };

    tokio::net::lookup_host(target)
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses found".into()))
}

/// Host part of a `host:port` target, without IPv6 brackets.
///
/// A bare IPv6 address has no port to strip unless it is bracketed.
fn host_of(target: &str) -> &str {
    if let Some(rest) = target.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => target,
    }
}
