//! Server, connection, request and response limits.
//!
//! Defaults are the ones fixed by the design: an 8 KiB request-line/header
//! cap, a 100 MiB body cap, a 10,000-connection process-wide admission cap,
//! a 5 s DB-pool wait deadline and a 5-failure/5 s circuit breaker (the pool
//! defaults live in [`crate::config::PoolConfig`], not here).
//!
//! # Example
//! ```no_run
//! use blaze::App;
//! # async fn handler() -> &'static str { "ok" }
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! App::new().get("/", handler).listen(("127.0.0.1", 8080)).await
//! # }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, connection admission, and overload
/// behavior.
///
/// A fixed pool of `max_connections` worker tasks is spawned at startup; each
/// pulls accepted sockets off a shared admission queue and drives one
/// [`Session`](crate::server::connection) to completion before pulling the
/// next. This avoids a `tokio::spawn` per connection in favor of a bounded,
/// reusable worker pool.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of persistent worker tasks processing connections (default: `512`).
    pub max_connections: usize,

    /// Maximum number of accepted TCP connections waiting in the admission
    /// queue before new connections are immediately sent `503` (default: `1024`).
    pub max_pending_connections: usize,

    /// Process-wide cap on simultaneous connections (§5 "Connection
    /// accounting"); accept past this threshold closes the new socket
    /// immediately (default: `10,000`).
    pub max_total_connections: usize,

    /// Strategy for worker task waiting behavior when the admission queue is
    /// empty (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated worker tasks for queue-overflow `503` responses (default: `1`).
    pub count_503_handlers: usize,

    /// Format for error responses: structured JSON if `true`, an empty body
    /// otherwise (default: `true`).
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 512,
            max_pending_connections: 1024,
            max_total_connections: 10_000,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,
            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Uses [`tokio::task::yield_now()`]; high CPU usage, lowest latency.
    Yield,
    /// Uses [`tokio::time::sleep()`] for the given duration between polls.
    Sleep(Duration),
}

/// Connection-level timeouts and per-connection request accounting (§4.3 Session).
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Idle read timeout while waiting for a complete request frame
    /// (default: `2 s`); resets once dispatch starts (§4.3).
    pub socket_read_timeout: Duration,
    /// Write timeout for draining the response buffer (default: `3 s`).
    pub socket_write_timeout: Duration,
    /// Header-section timeout: if no `CRLF CRLF` arrives within this time
    /// while idle, the server sends `408` and closes (default: `2 s`, shares
    /// the read timeout per §4.3).
    pub header_timeout: Duration,
    /// Requests after which the connection is closed even if keep-alive
    /// (default: `1,000`).
    pub max_requests_per_connection: usize,
    /// Absolute connection lifetime safety net (default: `5 minutes`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            header_timeout: Duration::from_secs(2),
            max_requests_per_connection: 1_000,
            connection_lifetime: Duration::from_secs(300),
            _priv: (),
        }
    }
}

/// HTTP request parsing limits.
///
/// The request-line and the header section are each capped at
/// `header_section_size` bytes (default `8,192`, per §4.2); the finer-grained
/// per-header caps below additionally bound individual header names/values
/// and the count of headers, independent of the outer cap.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Cap, in bytes, on the request-line plus header section combined
    /// (default: `8,192`, per §4.2).
    pub header_section_size: usize,
    /// Maximum URL length in bytes including path and query string
    /// (default: `2,048`).
    pub url_size: usize,
    /// Maximum number of path segments (default: `32`).
    pub url_parts: usize,
    /// Maximum query string length in bytes (default: `2,048`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `64`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `64`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `128`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `4,096`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `100 MiB`, per §4.2).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            header_section_size: 8 * 1024,
            url_size: 2 * 1024,
            url_parts: 32,
            url_query_size: 2 * 1024,
            url_query_parts: 64,

            header_count: 64,
            header_name_size: 128,
            header_value_size: 4 * 1024,

            body_size: 100 * 1024 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated per-connection read-buffer size implied by
    /// these limits (header section cap plus body cap).
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.buffer = self.header_section_size + self.body_size;
        self
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
}

/// Response buffer allocation limits.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1,024 B`).
    pub default_capacity: usize,
    /// Buffer capacity above which the connection reallocates rather than
    /// retains the oversized buffer for reuse (default: `64 KiB`).
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 64 * 1024,
            _priv: (),
        }
    }
}
