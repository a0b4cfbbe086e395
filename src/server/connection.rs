//! The per-worker session state machine (§4.3): reads, parses and dispatches
//! one request at a time off a single TCP (or TLS) stream, looping for as
//! long as keep-alive holds. Grounded on
//! `original_source/framework/src/server.cpp`'s `Session::do_read`/`on_read`
//! byte-buffer framing loop, generalized from that file's raw
//! `boost::asio::buffer` scanning to this crate's [`Parser::request_ready`]/
//! [`Parser::parse`] pair, and from its single fixed `Handler` callback to
//! this crate's router + middleware pipeline + typed binder stack.
//!
//! A [`Session`] owns its `Parser`/`Response`/`Connection` buffers and is
//! reused across every TCP connection a worker task ever serves (§5), not
//! just across keep-alive requests within one connection — this is what lets
//! the reactor avoid a `tokio::spawn` per accepted socket.

use crate::{
    error::{Error, ErrorKind},
    http::{
        request::{Parser, Request},
        response::Response,
        types::{StatusCode, Version},
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
    pipeline::Pipeline,
    router::Router,
    services::ServiceProvider,
    websocket::WebSocketRegistry,
};
use std::{io, path::Path, sync::Arc, time::Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Handles for the stack every session dispatches into: read-only once the
/// reactor starts accepting connections (§5).
pub(crate) struct Shared {
    pub(crate) router: Arc<Router>,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) services: Arc<ServiceProvider>,
    pub(crate) websockets: Arc<WebSocketRegistry>,
}

/// Per-connection accounting: when the TCP connection was accepted and how
/// many requests it has served, used to enforce `connection_lifetime` and
/// `max_requests_per_connection` (§4.3) even when the client keeps sending
/// `Connection: keep-alive`.
struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }

    fn expired(&self, limits: &ConnLimits) -> bool {
        self.request_count >= limits.max_requests_per_connection
            || self.created.elapsed() > limits.connection_lifetime
    }
}

/// One worker's reusable session state: the scratch read buffer, the
/// response builder, and connection accounting, none of which are
/// reallocated between sockets unless a response buffer outgrew
/// `RespLimits::max_capacity` (§5).
pub(crate) struct Session {
    parser: Parser,
    response: Response,
    connection: Connection,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
    json_errors: bool,
}

impl Session {
    pub(crate) fn new(
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
        json_errors: bool,
    ) -> Self {
        Self {
            parser: Parser::new(&req_limits),
            response: Response::new(&resp_limits),
            connection: Connection::new(),
            conn_limits,
            req_limits,
            resp_limits,
            json_errors,
        }
    }

    /// Drives one accepted connection to completion: reads and dispatches
    /// requests until the peer closes, keep-alive ends, or the connection
    /// is expired, then returns so the worker can pull its next socket.
    pub(crate) async fn serve<S>(&mut self, mut stream: S, shared: &Shared) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.connection.reset();

        loop {
            self.parser.reset();
            self.response.reset(&self.resp_limits);

            match self.read_request(&mut stream).await? {
                ReadOutcome::Closed => return Ok(()),
                ReadOutcome::TimedOut => {
                    return self
                        .write_protocol_error(&mut stream, ErrorKind::HeaderTimeout, Version::Http11)
                        .await;
                }
                ReadOutcome::Ready => {}
            }

            let parsed = match self.parser.parse(&self.req_limits) {
                Ok(parsed) => parsed,
                Err(kind) => {
                    let version = Version::Http11;
                    return self.write_protocol_error(&mut stream, kind, version).await;
                }
            };

            let request = parsed.request;
            self.connection.request_count += 1;

            if is_websocket_upgrade(&request) {
                if let Ok(path) = std::str::from_utf8(request.url().path()) {
                    if shared.websockets.contains(path) {
                        return shared.websockets.upgrade(path, &request, stream).await;
                    }
                }
            }

            let keep_alive = parsed.keep_alive && !self.connection.expired(&self.conn_limits);
            self.dispatch(request, keep_alive, shared).await;

            self.write_response(&mut stream).await?;

            if !self.response.keep_alive {
                return Ok(());
            }
        }
    }

    /// Reads off `stream` until [`Parser::request_ready`] is satisfied,
    /// respecting `header_timeout` as the idle-read deadline (§4.3).
    async fn read_request<S>(&mut self, stream: &mut S) -> io::Result<ReadOutcome>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if self.parser.request_ready() {
                return Ok(ReadOutcome::Ready);
            }

            match self
                .parser
                .fill_buffer(stream, self.conn_limits.header_timeout)
                .await
            {
                Ok(0) if !self.parser.has_room() => {
                    // Buffer is full but no full frame was recognized; hand
                    // off to `parse` anyway so its size-limit checks (too
                    // many headers, body too large, ...) produce the error.
                    return Ok(ReadOutcome::Ready);
                }
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadOutcome::TimedOut),
                Err(e) => return Err(e),
            }
        }
    }

    /// Routes and runs the middleware pipeline, writing either the handler's
    /// response or a §7-mapped error response into `self.response`.
    async fn dispatch(&mut self, mut request: Request, keep_alive: bool, shared: &Shared) {
        self.response.version = request.version();
        if !keep_alive {
            self.response.close();
        }

        let outcome = match shared.router.matches(request.method(), request.url().path()) {
            Some(route_match) => {
                request.insert(crate::binder::RouteParams {
                    segments: route_match.captures,
                    named: route_match.params,
                });
                shared
                    .pipeline
                    .run(&mut request, &mut self.response, &**route_match.handler, &shared.services)
                    .await
            }
            None if shared.router.path_matches_any_method(request.url().path()) => Err(Error::Domain {
                status: 405,
                message: "method not allowed".to_string(),
            }),
            None => Err(Error::Routing {
                method: format!("{:?}", request.method()),
                path: String::from_utf8_lossy(request.url().path()).into_owned(),
            }),
        };

        if let Err(err) = outcome {
            self.render_error(&err);
        }
    }

    /// Discards whatever the handler/middleware had already started writing
    /// and replaces it with a §7-mapped error response, preserving the
    /// keep-alive decision already made for this request.
    fn render_error(&mut self, err: &Error) {
        let keep_alive = self.response.keep_alive && !err.closes_connection();
        let version = self.response.version;
        self.response.reset(&self.resp_limits);
        self.response.version = version;
        if !keep_alive {
            self.response.close();
        }

        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::InternalServerError);
        let body = serde_json::to_vec(&err.json_body()).unwrap_or_default();
        self.response
            .status(status)
            .header("content-type", "application/json")
            .body(body);
    }

    async fn write_protocol_error<S>(
        &self,
        stream: &mut S,
        kind: ErrorKind,
        version: Version,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.conn_limits
            .send_error(stream, kind, version, self.json_errors)
            .await
    }

    async fn write_response<S>(&mut self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.conn_limits.write_bytes(stream, self.response.buffer()).await?;
        if let Some(path) = self.response.take_pending_file() {
            self.conn_limits.write_file(stream, &path).await?;
        }
        Ok(())
    }
}

enum ReadOutcome {
    Ready,
    Closed,
    TimedOut,
}

/// Whether `request` asks to switch to the WebSocket protocol (§4.8), per
/// [RFC 6455 §4.2.1](https://tools.ietf.org/html/rfc6455#section-4.2.1).
fn is_websocket_upgrade(request: &Request) -> bool {
    let upgrade = request.header("upgrade").map_or(false, |v| v.eq_ignore_ascii_case(b"websocket"));
    let connection = request
        .header("connection")
        .map_or(false, |v| contains_token(v, b"upgrade"));
    upgrade && connection
}

fn contains_token(header_value: &[u8], token: &[u8]) -> bool {
    header_value.split(|&b| b == b',').any(|part| {
        let trimmed = trim_ascii_whitespace(part);
        trimmed.eq_ignore_ascii_case(token)
    })
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

impl ConnLimits {
    /// Writes a protocol-level error directly, bypassing the [`Response`]
    /// builder since no [`Request`] was ever successfully parsed (§4.2/§7.1).
    /// Always followed by closing the connection.
    pub(crate) async fn send_error<S>(
        &self,
        stream: &mut S,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.write_bytes(stream, error.as_http(version, json_errors)).await
    }

    /// Writes `response` to `stream`, enforcing `socket_write_timeout` (§4.3).
    pub(crate) async fn write_bytes<S>(&self, stream: &mut S, response: &[u8]) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        tokio::select! {
            biased;
            result = stream.write_all(response) => result,
            _ = tokio::time::sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            }
        }
    }

    /// Streams a file body recorded by [`Response::file`] after the header
    /// section has already been written (§4.2 "efficient file responses").
    pub(crate) async fn write_file<S>(&self, stream: &mut S, path: &Path) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let mut file = tokio::fs::File::open(path).await?;
        tokio::select! {
            biased;
            result = tokio::io::copy(&mut file, stream) => { result.map(|_| ()) }
            _ = tokio::time::sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_expires_after_request_budget() {
        let mut limits = ConnLimits::default();
        limits.max_requests_per_connection = 2;
        let mut connection = Connection::new();
        assert!(!connection.expired(&limits));
        connection.request_count = 2;
        assert!(connection.expired(&limits));
    }

    #[test]
    fn contains_token_matches_case_insensitively_in_a_list() {
        assert!(contains_token(b"keep-alive, Upgrade", b"upgrade"));
        assert!(!contains_token(b"keep-alive", b"upgrade"));
    }
}
