//! Shared fixtures: a self-signed server identity and a client that trusts it.

#![allow(dead_code)]

use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Name the test certificate is issued for.
pub const SERVER_NAME: &str = "localhost";

/// Init tracing subscriber (idempotent across tests via try_init).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_test_writer()
        .try_init();
}

/// Self-signed identity for `localhost`.
pub struct TestIdentity {
    pub cert: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestIdentity {
    pub fn generate() -> Self {
        let certified =
            rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()]).expect("cert gen");
        Self {
            cert: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
        }
    }

    pub fn server_tls(&self) -> rustls::ServerConfig {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_no_client_auth()
        .with_single_cert(vec![self.cert.clone()], key)
        .expect("server cert")
    }

    /// Client config that verifies the server against this certificate.
    pub fn trusting_client_tls(&self) -> rustls::ClientConfig {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.cert.clone()).expect("trust anchor");

        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_root_certificates(roots)
        .with_no_client_auth()
    }

    /// Client config that trusts nothing.
    pub fn distrusting_client_tls() -> rustls::ClientConfig {
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3")
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth()
    }
}
