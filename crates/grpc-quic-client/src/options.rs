//! Dial configuration assembled from an ordered list of options.
//!
//! Options are applied in order and the first failure aborts; later options
//! override earlier ones (the last TLS config wins). A [`ClientConfig`] is
//! only handed out once it is complete, and is not mutated afterwards.

use std::fmt;
use std::time::Duration;

use grpc_quic_net::tls::config::{build_insecure_client_tls_config, pin_client_alpn};
use grpc_quic_net::tls::TransportSettings;
use tonic::transport::Endpoint;

use crate::error::{ClientError, Result};

/// Default bound on resolving, session establishment and stream open.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(20);

type EndpointOption = Box<dyn FnOnce(Endpoint) -> Endpoint + Send>;
type ApplyFn = Box<dyn FnOnce(&mut ClientConfig) -> Result<()> + Send>;

/// Everything needed to dial one gRPC-over-QUIC channel.
pub struct ClientConfig {
    tls: Option<rustls::ClientConfig>,
    insecure: bool,
    server_name: Option<String>,
    timeout: Duration,
    transport: TransportSettings,
    endpoint_options: Vec<EndpointOption>,
}

impl ClientConfig {
    fn empty() -> Self {
        Self {
            tls: None,
            insecure: false,
            server_name: None,
            timeout: DEFAULT_DIAL_TIMEOUT,
            transport: TransportSettings::default(),
            endpoint_options: Vec::new(),
        }
    }

    /// Apply `options` in order and check that transport security was set.
    pub fn from_options(options: impl IntoIterator<Item = DialOption>) -> Result<Self> {
        let mut config = Self::empty();
        for option in options {
            (option.0)(&mut config)?;
        }
        if config.tls.is_none() {
            return Err(ClientError::Config(
                "no transport security set (use DialOption::insecure() or DialOption::tls_config())"
                    .into(),
            ));
        }
        Ok(config)
    }

    /// The rustls config, with the ALPN token already pinned.
    pub fn tls(&self) -> Option<&rustls::ClientConfig> {
        self.tls.as_ref()
    }

    /// True when certificate verification is disabled.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }

    /// Apply the pass-through tonic options to `endpoint`, consuming them.
    pub(crate) fn configure_endpoint(&mut self, mut endpoint: Endpoint) -> Endpoint {
        for option in self.endpoint_options.drain(..) {
            endpoint = option(endpoint);
        }
        endpoint
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("alpn", &self.tls.as_ref().map(|tls| &tls.alpn_protocols))
            .field("insecure", &self.insecure)
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .field("transport", &self.transport)
            .field("endpoint_options", &self.endpoint_options.len())
            .finish()
    }
}

/// A single configuration step for [`ClientConfig`].
pub struct DialOption(ApplyFn);

impl DialOption {
    fn new(apply: impl FnOnce(&mut ClientConfig) -> Result<()> + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    /// Skip server certificate verification.
    ///
    /// The session is still encrypted: QUIC has no plaintext mode.
    pub fn insecure() -> Self {
        Self::new(|config| {
            config.tls = Some(build_insecure_client_tls_config()?);
            config.insecure = true;
            Ok(())
        })
    }

    /// Use the caller's rustls config. Its ALPN list is replaced with the
    /// gRPC-over-QUIC token; verification settings are kept.
    pub fn tls_config(tls: rustls::ClientConfig) -> Self {
        Self::new(move |config| {
            let mut tls = tls;
            pin_client_alpn(&mut tls);
            config.tls = Some(tls);
            config.insecure = false;
            Ok(())
        })
    }

    /// Name sent as SNI and checked against the server certificate.
    /// Defaults to the host part of the dial target.
    pub fn server_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |config| {
            if name.is_empty() {
                return Err(ClientError::Config("server name must not be empty".into()));
            }
            config.server_name = Some(name);
            Ok(())
        })
    }

    /// Bound on address resolution, session establishment and stream open.
    pub fn timeout(timeout: Duration) -> Self {
        Self::new(move |config| {
            if timeout.is_zero() {
                return Err(ClientError::Config("dial timeout must be non-zero".into()));
            }
            config.timeout = timeout;
            Ok(())
        })
    }

    /// Keep-alive ping interval for the session. `None` disables keep-alive.
    pub fn keep_alive(interval: Option<Duration>) -> Self {
        Self::new(move |config| {
            config.transport.keep_alive = interval;
            Ok(())
        })
    }

    /// Idle timeout after which a silent session is closed.
    pub fn idle_timeout(timeout: Duration) -> Self {
        Self::new(move |config| {
            config.transport.idle_timeout = timeout;
            Ok(())
        })
    }

    /// Pass-through configuration of the tonic endpoint.
    pub fn endpoint(configure: impl FnOnce(Endpoint) -> Endpoint + Send + 'static) -> Self {
        Self::new(move |config| {
            config.endpoint_options.push(Box::new(configure));
            Ok(())
        })
    }
}

impl fmt::Debug for DialOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DialOption")
    }
}
