//! Transport credentials that reuse the QUIC session's TLS handshake.
//!
//! gRPC expects every connection to pass through a transport-security step
//! before HTTP/2 starts. A QUIC session is authenticated and encrypted while
//! it is being established, so [`QuicCredentials`] only records what that
//! handshake produced and hands the connection back untouched. It never
//! sends or receives bytes and never rejects: certificate failures surface
//! earlier, as dial or accept errors.

use quinn::crypto::rustls::HandshakeData;
use quinn::Connection;
use rustls_pki_types::CertificateDer;
use tracing::debug;

use crate::conn::QuicConn;
use crate::error::Result;
use crate::version::{AUTH_TYPE, PROTOCOL_VERSION, SECURITY_PROTOCOL};

/// Protocol details reported by a [`TransportCredentials`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub protocol_version: &'static str,
    pub security_protocol: &'static str,
    pub server_name: Option<String>,
}

/// Security metadata for one established connection.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    /// ALPN protocol negotiated during the TLS handshake.
    pub alpn: Option<Vec<u8>>,
    /// SNI server name (server side: as sent by the client).
    pub server_name: Option<String>,
    /// Peer certificate chain, leaf first. Empty unless the handshake
    /// validated the peer's certificate.
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

impl AuthInfo {
    pub fn auth_type(&self) -> &'static str {
        AUTH_TYPE
    }

    /// Read the handshake results from an established session.
    pub fn from_session(session: &Connection, peer_verified: bool) -> Self {
        let (alpn, server_name) = session
            .handshake_data()
            .and_then(|data| data.downcast::<HandshakeData>().ok())
            .map(|data| (data.protocol, data.server_name))
            .unwrap_or_default();

        let peer_certificates = if peer_verified {
            session
                .peer_identity()
                .and_then(|identity| identity.downcast::<Vec<CertificateDer<'static>>>().ok())
                .map(|certs| *certs)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Self {
            alpn,
            server_name,
            peer_certificates,
        }
    }

    /// Leaf certificate of the peer, if one was validated.
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer_certificates.first()
    }
}

/// The transport-security step gRPC runs on every new connection.
pub trait TransportCredentials: Send + Sync {
    /// Secure an outgoing connection to `authority`.
    fn client_handshake(&self, authority: &str, conn: QuicConn) -> Result<(QuicConn, AuthInfo)>;

    /// Secure an accepted connection.
    fn server_handshake(&self, conn: QuicConn) -> Result<(QuicConn, AuthInfo)>;

    fn info(&self) -> ProtocolInfo;

    /// Override the server name reported in [`ProtocolInfo`].
    fn override_server_name(&mut self, server_name: &str);
}

/// Pass-through credentials for connections carried on a QUIC session.
#[derive(Debug, Clone)]
pub struct QuicCredentials {
    server_name: Option<String>,
    peer_verified: bool,
}

impl QuicCredentials {
    /// Credentials for sessions whose peer certificate was validated.
    pub fn new() -> Self {
        Self {
            server_name: None,
            peer_verified: true,
        }
    }

    /// Credentials for sessions dialed with certificate verification off.
    /// Peer certificates are not reported as an identity.
    pub fn unverified() -> Self {
        Self {
            server_name: None,
            peer_verified: false,
        }
    }

    fn secure(&self, mut conn: QuicConn) -> (QuicConn, AuthInfo) {
        let info = conn
            .session()
            .map(|session| AuthInfo::from_session(&session, self.peer_verified))
            .unwrap_or_default();
        conn.mark_secured(info.clone());
        (conn, info)
    }
}

impl Default for QuicCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportCredentials for QuicCredentials {
    fn client_handshake(&self, authority: &str, conn: QuicConn) -> Result<(QuicConn, AuthInfo)> {
        let (conn, info) = self.secure(conn);
        debug!(
            %authority,
            peer = %conn.remote_addr(),
            verified = !info.peer_certificates.is_empty(),
            "client handshake bypassed, session already secured"
        );
        Ok((conn, info))
    }

    fn server_handshake(&self, conn: QuicConn) -> Result<(QuicConn, AuthInfo)> {
        let (conn, info) = self.secure(conn);
        debug!(
            peer = %conn.remote_addr(),
            "server handshake bypassed, session already secured"
        );
        Ok((conn, info))
    }

    fn info(&self) -> ProtocolInfo {
        ProtocolInfo {
            protocol_version: PROTOCOL_VERSION,
            security_protocol: SECURITY_PROTOCOL,
            server_name: self.server_name.clone(),
        }
    }

    fn override_server_name(&mut self, server_name: &str) {
        self.server_name = Some(server_name.to_owned());
    }
}
