//! Listen configuration assembled from an ordered list of options.
//!
//! Unlike the dial side there is no insecure mode: a QUIC server must
//! present a certificate, so [`ServerOption::insecure`] always fails.

use std::fmt;
use std::time::Duration;

use grpc_quic_net::tls::config::pin_server_alpn;
use grpc_quic_net::tls::TransportSettings;
use tonic::transport::Server;

use crate::error::{Result, ServerError};
use crate::listener::ListenerSettings;

type ServerBuilderOption = Box<dyn FnOnce(Server) -> Server + Send>;
type ApplyFn = Box<dyn FnOnce(&mut ServerConfig) -> Result<()> + Send>;

/// Everything needed to bind one gRPC-over-QUIC listener.
pub struct ServerConfig {
    tls: Option<rustls::ServerConfig>,
    transport: TransportSettings,
    listener: ListenerSettings,
    server_options: Vec<ServerBuilderOption>,
}

impl ServerConfig {
    fn empty() -> Self {
        Self {
            tls: None,
            transport: TransportSettings::default(),
            listener: ListenerSettings::default(),
            server_options: Vec::new(),
        }
    }

    /// Apply `options` in order and check that a TLS config was set.
    pub fn from_options(options: impl IntoIterator<Item = ServerOption>) -> Result<Self> {
        let mut config = Self::empty();
        for option in options {
            (option.0)(&mut config)?;
        }
        if config.tls.is_none() {
            return Err(ServerError::Config(
                "no TLS configuration set (use ServerOption::tls_config())".into(),
            ));
        }
        Ok(config)
    }

    /// The rustls config, with the ALPN token already pinned.
    pub fn tls(&self) -> Option<&rustls::ServerConfig> {
        self.tls.as_ref()
    }

    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        self.listener
    }

    /// Apply the pass-through tonic options to `server`, consuming them.
    pub(crate) fn configure_server(&mut self, mut server: Server) -> Server {
        for option in self.server_options.drain(..) {
            server = option(server);
        }
        server
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("alpn", &self.tls.as_ref().map(|tls| &tls.alpn_protocols))
            .field("transport", &self.transport)
            .field("listener", &self.listener)
            .field("server_options", &self.server_options.len())
            .finish()
    }
}

/// A single configuration step for [`ServerConfig`].
pub struct ServerOption(ApplyFn);

impl ServerOption {
    fn new(apply: impl FnOnce(&mut ServerConfig) -> Result<()> + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    /// Always fails: server-side encryption cannot be disabled.
    pub fn insecure() -> Self {
        Self::new(|_| Err(ServerError::Insecure))
    }

    /// Use the caller's rustls config with its ALPN list replaced by the
    /// gRPC-over-QUIC token.
    pub fn tls_config(tls: rustls::ServerConfig) -> Self {
        Self::new(move |config| {
            let mut tls = tls;
            pin_server_alpn(&mut tls);
            config.tls = Some(tls);
            Ok(())
        })
    }

    /// Keep-alive ping interval for accepted sessions. `None` disables it.
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

    /// How long an established session may take to open its stream.
    pub fn stream_accept_timeout(timeout: Duration) -> Self {
        Self::new(move |config| {
            if timeout.is_zero() {
                return Err(ServerError::Config(
                    "stream accept timeout must be non-zero".into(),
                ));
            }
            config.listener.stream_accept_timeout = timeout;
            Ok(())
        })
    }

    /// Number of ready connections buffered ahead of `accept()`.
    pub fn backlog(backlog: usize) -> Self {
        Self::new(move |config| {
            if backlog == 0 {
                return Err(ServerError::Config("backlog must be non-zero".into()));
            }
            config.listener.backlog = backlog;
            Ok(())
        })
    }

    /// Pass-through configuration of the tonic server builder.
    pub fn server(configure: impl FnOnce(Server) -> Server + Send + 'static) -> Self {
        Self::new(move |config| {
            config.server_options.push(Box::new(configure));
            Ok(())
        })
    }
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerOption")
    }
}
