//! Bandwidth-limited TCP listener.
//!
//! # Algorithm
//!
//! Uses the Governor crate's Generic Cell Rate Algorithm (GCRA) over *bytes*
//! instead of requests. One direct (unkeyed) limiter meters reads and another
//! meters writes; both are shared by every connection the listener accepts,
//! so the configured ceiling is server-wide rather than per connection.
//!
//! Metering is prepaid: before an operation touches the socket, its
//! connection waits for the limiter to grant `min(len, burst)` cells, then
//! moves at most that many bytes. Any granted bytes the operation leaves
//! unused stay on the connection as credit for the next operation in the
//! same direction. Governor rejects a single request above its burst
//! capacity, so large buffers are moved in burst-sized pieces.
//!
//! ```text
//!   accept() ──▶ ThrottledStream ─┬─ poll_read  ─▶ wait for read grant  ─▶ inner read  (≤ grant)
//!                                 └─ poll_write ─▶ wait for write grant ─▶ inner write (≤ grant)
//!                                           │                  │
//!                                           ▼                  ▼
//!                                   Arc<Throttle> (read limiter, write limiter, counters)
//! ```
//!
//! # Configuration
//!
//! Limits are parsed from human strings (`2GB`, `500kb`, `1.5MiB`). The
//! burst equals one second of budget. Rates above `u32::MAX` bytes per second
//! saturate at that value.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::num::{NonZeroU32, NonZeroU64};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::error;

use crate::units::{UnitError, format_bytes, parse_bytes};

/// Default server-wide limit: 2 GB per second.
pub const DEFAULT_BANDWIDTH_LIMIT: u64 = 2_000_000_000;

/// Error type for bandwidth limit parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BandwidthError {
    #[error("invalid bandwidth limit '{value}': {source}")]
    Invalid { value: String, source: UnitError },
}

/// A bandwidth ceiling in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthLimit {
    Unlimited,
    PerSecond(NonZeroU64),
}

impl Default for BandwidthLimit {
    fn default() -> Self {
        NonZeroU64::new(DEFAULT_BANDWIDTH_LIMIT).map_or(Self::Unlimited, Self::PerSecond)
    }
}

impl FromStr for BandwidthLimit {
    type Err = BandwidthError;

    /// Parse `2m`, `2mb`, `2M` or `2MB` (all 2 000 000 B/s).
    ///
    /// An empty string selects the default. `0`, `off`, `none` and
    /// `unlimited` disable limiting.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "off" | "none" | "unlimited"
        ) {
            return Ok(Self::Unlimited);
        }

        let bytes = parse_bytes(trimmed).map_err(|source| BandwidthError::Invalid {
            value: s.to_string(),
            source,
        })?;
        Ok(NonZeroU64::new(bytes).map_or(Self::Unlimited, Self::PerSecond))
    }
}

impl fmt::Display for BandwidthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::PerSecond(rate) => write!(f, "{}/s", format_bytes(rate.get())),
        }
    }
}

/// Pending grant of bytes from a limiter.
type Grant = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Server-wide throttle state shared by all accepted connections.
pub struct Throttle {
    limit: BandwidthLimit,
    read: Option<Arc<DefaultDirectRateLimiter>>,
    write: Option<Arc<DefaultDirectRateLimiter>>,
    burst: NonZeroU32,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("limit", &self.limit)
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .finish_non_exhaustive()
    }
}

impl Throttle {
    pub fn new(limit: BandwidthLimit) -> Self {
        let (read, write, burst) = match limit {
            BandwidthLimit::Unlimited => (None, None, NonZeroU32::MAX),
            BandwidthLimit::PerSecond(rate) => {
                let rate = NonZeroU32::try_from(rate).unwrap_or(NonZeroU32::MAX);
                let quota = Quota::per_second(rate);
                (
                    Some(Arc::new(RateLimiter::direct(quota))),
                    Some(Arc::new(RateLimiter::direct(quota))),
                    rate,
                )
            }
        };

        Self {
            limit,
            read,
            write,
            burst,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> BandwidthLimit {
        self.limit
    }

    /// Total bytes read from all connections.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes written to all connections.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Which half of a connection a [`Meter`] pays for.
#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// Per-connection, per-direction allowance.
///
/// `credit` holds bytes already granted by the shared limiter but not yet
/// moved. It is lost when the connection closes, so a connection can only
/// ever overpay.
#[derive(Default)]
struct Meter {
    credit: usize,
    pending: Option<Grant>,
}

impl Meter {
    /// Wait until at least one byte of `want` is paid for, returning how
    /// many bytes may be moved now.
    fn poll_allowance(
        &mut self,
        cx: &mut Context<'_>,
        throttle: &Throttle,
        direction: Direction,
        want: usize,
    ) -> Poll<usize> {
        let limiter = match direction {
            Direction::Read => throttle.read.as_ref(),
            Direction::Write => throttle.write.as_ref(),
        };
        let Some(limiter) = limiter else {
            return Poll::Ready(want);
        };
        if want == 0 || self.credit > 0 {
            return Poll::Ready(want.min(self.credit));
        }

        let step = want.min(throttle.burst.get() as usize);
        let grant = self.pending.get_or_insert_with(|| {
            let limiter = limiter.clone();
            let cells = u32::try_from(step)
                .ok()
                .and_then(NonZeroU32::new)
                .unwrap_or(throttle.burst);
            Box::pin(async move {
                // Steps never exceed the burst, so capacity errors cannot occur
                let _ = limiter.until_n_ready(cells).await;
            })
        });
        ready!(grant.as_mut().poll(cx));
        self.pending = None;
        self.credit = step;
        Poll::Ready(want.min(self.credit))
    }

    fn consume(&mut self, bytes: usize) {
        self.credit = self.credit.saturating_sub(bytes);
    }
}

/// A connection metered against a shared [`Throttle`].
///
/// Every read and write is paid for before it reaches the inner stream and
/// is capped at the granted amount, so dropping a connection can never
/// leave bytes unaccounted.
pub struct ThrottledStream<S> {
    inner: S,
    throttle: Arc<Throttle>,
    read: Meter,
    write: Meter,
}

impl<S> ThrottledStream<S> {
    pub fn new(inner: S, throttle: Arc<Throttle>) -> Self {
        Self {
            inner,
            throttle,
            read: Meter::default(),
            write: Meter::default(),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.throttle.read.is_none() {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
            let read = buf.filled().len().saturating_sub(before);
            this.throttle
                .bytes_read
                .fetch_add(read as u64, Ordering::Relaxed);
            return Poll::Ready(Ok(()));
        }

        let want = buf.remaining();
        let allowed = ready!(this.read.poll_allowance(cx, &this.throttle, Direction::Read, want));

        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(allowed));
        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
        let read = limited.filled().len();
        buf.advance(read);

        this.read.consume(read);
        this.throttle
            .bytes_read
            .fetch_add(read as u64, Ordering::Relaxed);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let allowed =
            ready!(this.write.poll_allowance(cx, &this.throttle, Direction::Write, buf.len()));

        let chunk = buf.get(..allowed).unwrap_or(buf);
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, chunk))?;

        this.write.consume(written);
        this.throttle
            .bytes_written
            .fetch_add(written as u64, Ordering::Relaxed);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Peer address of a connection accepted by [`ThrottledListener`].
///
/// Use with `into_make_service_with_connect_info::<ClientAddr>()`; the
/// request log reads it back as `ConnectInfo<ClientAddr>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Connected<IncomingStream<'_, ThrottledListener>> for ClientAddr {
    fn connect_info(stream: IncomingStream<'_, ThrottledListener>) -> Self {
        Self(*stream.remote_addr())
    }
}

/// TCP listener whose connections share one bandwidth budget.
pub struct ThrottledListener {
    inner: TcpListener,
    throttle: Arc<Throttle>,
}

impl ThrottledListener {
    pub fn new(inner: TcpListener, throttle: Arc<Throttle>) -> Self {
        Self { inner, throttle }
    }

    pub async fn bind(addr: impl ToSocketAddrs, throttle: Arc<Throttle>) -> io::Result<Self> {
        Ok(Self::new(TcpListener::bind(addr).await?, throttle))
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }
}

impl axum::serve::Listener for ThrottledListener {
    type Io = ThrottledStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    return (ThrottledStream::new(stream, self.throttle.clone()), addr);
                }
                Err(e) => handle_accept_error(e).await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Per-connection failures are skipped; anything else (such as running out
/// of file descriptors) is logged and retried after a pause.
async fn handle_accept_error(e: io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }

    error!(error = %e, "Accept error, retrying in 1s");
    tokio::time::sleep(Duration::from_secs(1)).await;
}
