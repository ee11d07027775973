//! QUIC listener yielding one [`QuicConn`] per accepted session.
//!
//! A background task accepts incoming sessions and hands each one to its
//! own task, which completes the QUIC handshake and waits for the peer's
//! first bidirectional stream. Finished connections (or per-session errors)
//! queue up for [`QuicListener::accept`]. A peer that never opens a stream
//! only holds up its own task until the stream-accept timeout fires.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grpc_quic_net::conn::CLOSE_CODE;
use grpc_quic_net::QuicConn;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};

/// Default time a new session has to open its stream.
pub const DEFAULT_STREAM_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of ready connections buffered ahead of `accept()`.
pub const DEFAULT_BACKLOG: usize = 64;

/// Accept-side tuning for a [`QuicListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSettings {
    pub stream_accept_timeout: Duration,
    /// Bounds both the ready queue and the sessions being set up. Once both
    /// are full, new sessions wait in quinn until `accept()` drains the queue.
    pub backlog: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            stream_accept_timeout: DEFAULT_STREAM_ACCEPT_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

struct Inner {
    local_addr: SocketAddr,
    /// Taken on close so the socket is released once sessions drain.
    endpoint: Mutex<Option<quinn::Endpoint>>,
    conns: tokio::sync::Mutex<mpsc::Receiver<Result<QuicConn>>>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Inner {
    fn endpoint(&self) -> Option<quinn::Endpoint> {
        self.endpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn close(&self) -> bool {
        if self.shutdown.send_replace(true) {
            return false;
        }
        self.accept_task.abort();
        let endpoint = self
            .endpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(endpoint) = endpoint {
            endpoint.close(CLOSE_CODE, b"listener closed");
        }
        info!(local_addr = %self.local_addr, "listener closed");
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A bound QUIC endpoint accepting gRPC-over-QUIC connections.
///
/// Cheap to clone; all clones share the same socket. The socket is closed
/// by [`close`](Self::close) or when the last clone is dropped.
#[derive(Clone)]
pub struct QuicListener {
    inner: Arc<Inner>,
}

impl QuicListener {
    /// Bind `addr` (`host:port`) and start accepting sessions.
    pub async fn bind(
        addr: &str,
        server_config: quinn::ServerConfig,
        settings: ListenerSettings,
    ) -> Result<Self> {
        if settings.backlog == 0 {
            return Err(ServerError::Config("backlog must be non-zero".into()));
        }

        let bind_addr = resolve(addr).await?;
        let endpoint = quinn::Endpoint::server(server_config, bind_addr)
            .map_err(|e| ServerError::Bind(format!("{bind_addr}: {e}")))?;
        let local_addr = endpoint
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let (tx, rx) = mpsc::channel(settings.backlog);
        let (shutdown, _) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            endpoint.clone(),
            local_addr,
            tx,
            shutdown.subscribe(),
            settings,
        ));

        info!(%local_addr, "listener bound");

        Ok(Self {
            inner: Arc::new(Inner {
                local_addr,
                endpoint: Mutex::new(Some(endpoint)),
                conns: tokio::sync::Mutex::new(rx),
                shutdown,
                accept_task,
            }),
        })
    }

    /// Wait for the next connection.
    ///
    /// Per-session failures are returned as errors; the listener keeps
    /// running and the caller may call `accept()` again. Once the listener
    /// is closed this returns [`ServerError::ListenerClosed`], including for
    /// calls already waiting.
    pub async fn accept(&self) -> Result<QuicConn> {
        let mut shutdown = self.inner.shutdown.subscribe();

        let mut conns = tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => return Err(ServerError::ListenerClosed),
            conns = self.inner.conns.lock() => conns,
        };

        tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => Err(ServerError::ListenerClosed),
            next = conns.recv() => next.unwrap_or(Err(ServerError::ListenerClosed)),
        }
    }

    /// Close the socket and wake all pending `accept()` calls.
    ///
    /// Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Number of sessions currently tracked by the endpoint.
    pub fn open_sessions(&self) -> usize {
        self.inner
            .endpoint()
            .map_or(0, |endpoint| endpoint.open_connections())
    }
}

impl std::fmt::Debug for QuicListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicListener")
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn accept_loop(
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
    tx: mpsc::Sender<Result<QuicConn>>,
    shutdown: watch::Receiver<bool>,
    settings: ListenerSettings,
) {
    let setup_slots = Arc::new(Semaphore::new(settings.backlog));
    let stream_timeout = settings.stream_accept_timeout;

    loop {
        // Held until the session's result is queued or dropped.
        let Ok(slot) = Arc::clone(&setup_slots).acquire_owned().await else {
            break;
        };
        let Some(incoming) = endpoint.accept().await else {
            break;
        };
        let tx = tx.clone();
        let mut shutdown = shutdown.clone();

        tokio::spawn(async move {
            let _slot = slot;
            let result = establish(incoming, local_addr, stream_timeout).await;
            if let Err(e) = &result {
                warn!(%local_addr, error = %e, "session setup failed");
            }
            // A connection left unclaimed at shutdown is dropped, which closes it.
            tokio::select! {
                _ = tx.send(result) => {}
                _ = wait_closed(&mut shutdown) => {}
            }
        });
    }
    debug!(%local_addr, "accept loop finished");
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn wait_closed(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Complete the handshake for one session and accept its stream.
async fn establish(
    incoming: quinn::Incoming,
    local_addr: SocketAddr,
    stream_timeout: Duration,
) -> Result<QuicConn> {
    let peer = incoming.remote_address();
    let session = incoming.await?;
    debug!(%peer, "session established, waiting for stream");

    match tokio::time::timeout(stream_timeout, session.accept_bi()).await {
        Ok(Ok((send, recv))) => {
            info!(%peer, "accepted connection");
            Ok(QuicConn::accepted(session, send, recv, Some(local_addr)))
        }
        Ok(Err(e)) => {
            session.close(CLOSE_CODE, b"stream accept failed");
            Err(ServerError::Stream(e.to_string()))
        }
        Err(_) => {
            session.close(CLOSE_CODE, b"no stream opened");
            Err(ServerError::StreamTimeout {
                peer,
                timeout: stream_timeout,
            })
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    let resolve_error = |reason: String| ServerError::Resolve {
        addr: addr.to_owned(),
        reason,
    };

    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses found".into()))
}
