//! TLS and QUIC config builders for gRPC-over-QUIC endpoints.
//!
//! Both directions pin the ALPN list to [`ALPN_GRPC_QUIC`], whatever the
//! caller put there, so that both ends agree on the application protocol
//! during session establishment.
//!
//! The insecure client config still runs a full TLS 1.3 handshake: QUIC
//! never carries plaintext. Only certificate chain validation is skipped.

use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{IdleTimeout, TransportConfig};

use crate::error::{NetError, Result};
use crate::tls::verifier::SkipServerVerification;

/// ALPN protocol identifier for gRPC carried over this adapter.
pub const ALPN_GRPC_QUIC: &[u8] = b"grpc-quic-tls";

/// Default interval between keep-alive pings.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// Default idle timeout after which a silent session is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session QUIC transport parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Keep-alive ping interval. `None` disables keep-alive.
    pub keep_alive: Option<Duration>,
    /// Maximum idle time before the session is closed.
    pub idle_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl TransportSettings {
    /// Build the quinn transport config for these settings.
    pub fn to_transport_config(&self) -> Result<TransportConfig> {
        let idle = IdleTimeout::try_from(self.idle_timeout)
            .map_err(|e| NetError::TransportConfig(format!("idle timeout: {e}")))?;

        let mut transport = TransportConfig::default();
        transport
            .max_idle_timeout(Some(idle))
            .keep_alive_interval(self.keep_alive);
        Ok(transport)
    }
}

/// Overwrite the client's ALPN list with the gRPC-over-QUIC token.
pub fn pin_client_alpn(config: &mut rustls::ClientConfig) {
    config.alpn_protocols = vec![ALPN_GRPC_QUIC.to_vec()];
}

/// Overwrite the server's ALPN list with the gRPC-over-QUIC token.
pub fn pin_server_alpn(config: &mut rustls::ServerConfig) {
    config.alpn_protocols = vec![ALPN_GRPC_QUIC.to_vec()];
}

/// Build a `rustls::ClientConfig` that accepts any server certificate.
///
/// TLS 1.3 with the ring provider, no client certificate. Handshake
/// signatures are still checked, so the session key is bound to whatever
/// certificate the server presented.
pub fn build_insecure_client_tls_config() -> Result<rustls::ClientConfig> {
    let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| NetError::TlsConfig(format!("TLS version config: {e}")))?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(SkipServerVerification::new()))
    .with_no_client_auth();

    pin_client_alpn(&mut config);

    Ok(config)
}

/// Convert a rustls client config into a quinn client config.
pub fn build_quic_client_config(
    mut tls: rustls::ClientConfig,
    settings: &TransportSettings,
) -> Result<quinn::ClientConfig> {
    pin_client_alpn(&mut tls);

    let crypto = QuicClientConfig::try_from(tls)
        .map_err(|e| NetError::TlsConfig(format!("rustls→quinn: {e}")))?;

    let mut config = quinn::ClientConfig::new(Arc::new(crypto));
    config.transport_config(Arc::new(settings.to_transport_config()?));
    Ok(config)
}

/// Convert a rustls server config into a quinn server config.
pub fn build_quic_server_config(
    mut tls: rustls::ServerConfig,
    settings: &TransportSettings,
) -> Result<quinn::ServerConfig> {
    pin_server_alpn(&mut tls);

    let crypto = QuicServerConfig::try_from(tls)
        .map_err(|e| NetError::TlsConfig(format!("rustls→quinn: {e}")))?;

    let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(Arc::new(settings.to_transport_config()?));
    Ok(config)
}
