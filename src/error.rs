//! Crate-wide error model (§7 of the design: Protocol, Routing, Binding, Auth,
//! Domain, Resource, Internal, Fatal), unifying the HTTP codec's low-level
//! parse failures with pipeline/binder/service/pool failures so every error
//! that can occur while serving a request maps deterministically to a status
//! code and an optional JSON body.

use crate::http::{query, types::Version};
use std::{fmt, io};

/// Low-level protocol errors raised while parsing a request. These always
/// close the connection after the error response is written (§4.2/§7.1).
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    InvalidUrl,
    Query(query::Error),
    InvalidVersion,
    UnsupportedVersion,
    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,
    TransferEncodingUnsupported,
    BodyTooLarge,
    BodyMismatch { expected: usize, available: usize },
    UnexpectedBody(usize),
    HeaderTimeout,
    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(&self, version: Version, json: bool) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;
        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;
        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        TransferEncodingUnsupported: "400 Bad Request", "62"
            => r#"{"error":"chunked transfer-encoding unsupported","code":"TE_UNSUPPORTED"}"#;
        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;
        HeaderTimeout: "408 Request Timeout", "53"
            => r#"{"error":"Header read timed out","code":"HEADER_TIMEOUT"}"#;
        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl std::error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Why a [`Router`](crate::Router) or [`Binder`](crate::binder) failed, or why
/// the dispatch of a request otherwise could not complete normally. Every
/// variant carries enough information to render an HTTP response and a
/// tracing log line (§7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request framing (§7.1); the connection is always closed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ErrorKind),

    /// No route matched `(method, path)` (§7.2).
    #[error("no route for {method} {path}")]
    Routing { method: String, path: String },

    /// Path/query/body conversion to a typed parameter failed (§7.3).
    #[error("binding failed: {0}")]
    Binding(String),

    /// Missing or invalid credentials (§7.4).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An explicit HTTP-typed failure raised by a handler (§7.5).
    #[error("{message}")]
    Domain { status: u16, message: String },

    /// Pool timeout, breaker-open, or query failure (§7.6).
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Any other unhandled failure from a handler or middleware (§7.7).
    #[error("internal error: {0}")]
    Internal(String),

    /// Startup-time failure: listener cannot bind, configuration invalid,
    /// service dependency cycle detected (§7.8). Aborts startup.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Failures surfaced by the DB pool / circuit breaker (§4.9, §7.6).
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
    #[error("circuit breaker open")]
    BreakerOpen,
    #[error("query failed: {0}")]
    Query(String),
}

impl Error {
    /// The status code this error maps to on the wire (§7).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Protocol(kind) => protocol_status(kind),
            Error::Routing { .. } => 404,
            Error::Binding(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::Domain { status, .. } => *status,
            Error::Resource(ResourceError::PoolTimeout | ResourceError::BreakerOpen) => 503,
            Error::Resource(ResourceError::Query(_)) => 500,
            Error::Internal(_) => 500,
            Error::Fatal(_) => 500,
        }
    }

    /// Whether the connection must be closed after this error is written.
    /// Only protocol-level framing errors force a close; every other error
    /// kind leaves the connection alive for the next pipelined request (§7).
    pub(crate) fn closes_connection(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    pub(crate) fn json_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string(), "status": self.status_code() })
    }
}

fn protocol_status(kind: &ErrorKind) -> u16 {
    match kind {
        ErrorKind::UnsupportedVersion => 505,
        ErrorKind::TooManyHeaders => 431,
        ErrorKind::BodyTooLarge => 413,
        ErrorKind::HeaderTimeout => 408,
        ErrorKind::ServiceUnavailable | ErrorKind::Io(_) => 503,
        _ => 400,
    }
}
