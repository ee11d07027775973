//! A single QUIC bidirectional stream presented as a byte-stream connection.
//!
//! gRPC's HTTP/2 layer assumes one ordered byte stream per connection, the
//! way a TCP socket behaves. `QuicConn` binds exactly one bidirectional
//! stream to its session and exposes it through `AsyncRead`/`AsyncWrite`.
//! Nothing else may open streams on that session, so closing the connection
//! closes the session as well.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};

use quinn::{Connection, Endpoint, RecvStream, SendStream, VarInt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tonic::transport::server::Connected;
use tracing::debug;

use crate::credentials::AuthInfo;
use crate::deadline::Deadline;

/// Application error code sent in CONNECTION_CLOSE on a local close.
pub const CLOSE_CODE: VarInt = VarInt::from_u32(0);

const STATE_CREATED: u8 = 0;
const STATE_SECURED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lifecycle of a [`QuicConn`].
///
/// `Created → Secured → Closed`, or `Created → Closed` when setup fails
/// before credentials are applied. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Created,
    Secured,
    Closed,
}

/// Every quinn handle that keeps the session alive. Each of them holds the
/// session's UDP socket, so all are dropped together on close.
struct Live {
    session: Connection,
    send: SendStream,
    recv: RecvStream,
    /// Client endpoint created for this connection alone, if any.
    endpoint: Option<Endpoint>,
}

struct Shared {
    live: Mutex<Option<Live>>,
    remote_addr: SocketAddr,
    state: AtomicU8,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, Option<Live>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) -> bool {
        if self.state.swap(STATE_CLOSED, Ordering::AcqRel) == STATE_CLOSED {
            return false;
        }
        let live = self.live().take();
        if let Some(live) = live {
            live.session.close(CLOSE_CODE, b"connection closed");
            if let Some(endpoint) = &live.endpoint {
                endpoint.close(CLOSE_CODE, b"connection closed");
            }
        }
        debug!(peer = %self.remote_addr, "connection closed");
        true
    }

    /// Run `poll` against the live stream halves.
    fn poll_live<T>(
        &self,
        poll: impl FnOnce(&mut Live) -> Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        match self.live().as_mut() {
            Some(live) => poll(live),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn state(&self) -> ConnState {
        match self.state.load(Ordering::Acquire) {
            STATE_CREATED => ConnState::Created,
            STATE_SECURED => ConnState::Secured,
            _ => ConnState::Closed,
        }
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CLOSED
    }
}

/// Cloneable handle that closes a [`QuicConn`] from another task.
#[derive(Clone)]
pub struct CloseHandle {
    shared: Arc<Shared>,
}

impl CloseHandle {
    /// Close the connection. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// A QUIC session carrying exactly one bidirectional stream.
pub struct QuicConn {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    auth_info: Option<AuthInfo>,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl QuicConn {
    /// Wrap a stream accepted on a listener's session.
    ///
    /// The listener's endpoint is shared, so only the session is closed
    /// with this connection.
    pub fn accepted(
        session: Connection,
        send: SendStream,
        recv: RecvStream,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        Self::new(session, None, send, recv, local_addr)
    }

    /// Wrap a stream opened on a dialed session.
    ///
    /// `endpoint` was created for this session alone and is closed with it.
    /// Its UDP socket is released on close, even while the value lives on.
    pub fn dialed(endpoint: Endpoint, session: Connection, send: SendStream, recv: RecvStream) -> Self {
        let local_addr = endpoint.local_addr().ok();
        Self::new(session, Some(endpoint), send, recv, local_addr)
    }

    fn new(
        session: Connection,
        endpoint: Option<Endpoint>,
        send: SendStream,
        recv: RecvStream,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote_addr: session.remote_address(),
                live: Mutex::new(Some(Live {
                    session,
                    send,
                    recv,
                    endpoint,
                })),
                state: AtomicU8::new(STATE_CREATED),
            }),
            local_addr,
            auth_info: None,
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
        }
    }

    /// A handle to the underlying session, or `None` once closed.
    ///
    /// Do not open further streams on it. A held handle keeps the session's
    /// socket open until it is dropped.
    pub fn session(&self) -> Option<Connection> {
        self.shared
            .live()
            .as_ref()
            .map(|live| live.session.clone())
    }

    /// Local socket address of the session, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Remote address of the session.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    pub fn state(&self) -> ConnState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Security metadata recorded when credentials were applied.
    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.auth_info.as_ref()
    }

    /// Close the stream and its session.
    ///
    /// Safe to call repeatedly and from several tasks (via [`CloseHandle`]).
    /// Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Set the read deadline. `None` clears it.
    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    /// Set the write deadline. `None` clears it.
    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    /// Set both read and write deadlines.
    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
        self.write_deadline.set(at);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline.get()
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline.get()
    }

    /// Record credentials metadata and move `Created → Secured`.
    pub(crate) fn mark_secured(&mut self, info: AuthInfo) {
        let _ = self.shared.state.compare_exchange(
            STATE_CREATED,
            STATE_SECURED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.auth_info = Some(info);
    }

    /// Replace errors caused by a local close with a closed-connection error.
    fn check_io<T>(&self, result: io::Result<T>) -> io::Result<T> {
        match result {
            Err(_) if self.is_closed() => Err(closed_error()),
            other => other,
        }
    }
}

impl fmt::Debug for QuicConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicConn")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for QuicConn {
    fn drop(&mut self) {
        self.shared.close();
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "use of closed connection")
}

fn deadline_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

impl AsyncRead for QuicConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        if this.read_deadline.poll_expired(cx) {
            return Poll::Ready(Err(deadline_error()));
        }
        let result = ready!(this
            .shared
            .poll_live(|live| AsyncRead::poll_read(Pin::new(&mut live.recv), cx, buf)));
        Poll::Ready(this.check_io(result))
    }
}

impl AsyncWrite for QuicConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        if this.write_deadline.poll_expired(cx) {
            return Poll::Ready(Err(deadline_error()));
        }
        let result = ready!(this
            .shared
            .poll_live(|live| AsyncWrite::poll_write(Pin::new(&mut live.send), cx, buf)));
        Poll::Ready(this.check_io(result))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(Err(closed_error()));
        }
        let result = ready!(this
            .shared
            .poll_live(|live| AsyncWrite::poll_flush(Pin::new(&mut live.send), cx)));
        Poll::Ready(this.check_io(result))
    }

    /// Finish the send half. The receive half and the session stay open.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(Ok(()));
        }
        let result = ready!(this
            .shared
            .poll_live(|live| AsyncWrite::poll_shutdown(Pin::new(&mut live.send), cx)));
        Poll::Ready(this.check_io(result))
    }
}

/// Connection metadata exposed to tonic handlers via `Request::extensions`.
#[derive(Debug, Clone)]
pub struct QuicConnectInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: SocketAddr,
    pub auth_info: Option<AuthInfo>,
}

impl Connected for QuicConn {
    type ConnectInfo = QuicConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        QuicConnectInfo {
            local_addr: self.local_addr,
            remote_addr: self.remote_addr(),
            auth_info: self.auth_info.clone(),
        }
    }
}
