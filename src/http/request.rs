//! Incremental HTTP/1.x request parser and the [`Request`] type handlers see.
//!
//! [`Parser`] owns a fixed-capacity, zero-initialized byte buffer — sized to
//! `header_section_size + body_size` — exactly like the buffer this module
//! generalizes from. The difference is what happens once a full request has
//! been recognized: instead of transmuting borrowed slices into `'static`
//! ones, the buffer is frozen into an owned, reference-counted [`Bytes`] and
//! every retained view (URL segments, header name/value, body) becomes a
//! cheap [`Bytes::slice`] of it. Freezing replaces the working buffer with a
//! fresh one, copying over only the handful of bytes belonging to the next
//! pipelined request, if any.

use crate::{
    error::ErrorKind,
    http::{
        query::Query,
        types::{Header, HeaderMap, Method, Url, Version},
    },
    limits::ReqLimits,
};
use bytes::Bytes;
use memchr::{memchr, memchr_iter};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    io,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::sleep,
};

type Span = (usize, usize);

/// Type-erased per-request storage for values middleware/binders attach as
/// they run (an authenticated principal, a parsed session, ...), keyed by
/// type. Modeled on `http::Extensions` from the wider Rust HTTP ecosystem.
#[derive(Default)]
pub(crate) struct Extensions(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Extensions {
    #[inline]
    pub(crate) fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|b| *b)
    }

    #[inline]
    pub(crate) fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref())
    }

    #[inline(always)]
    fn clear(&mut self) {
        self.0.clear();
    }
}

/// A fully parsed HTTP request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Option<Bytes>,
    #[allow(dead_code)]
    extensions: Extensions,
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.0.len())
            .finish()
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.url == other.url
            && self.version == other.version
            && self.headers == other.headers
            && self.body == other.body
    }
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: None,
            extensions: Extensions::default(),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = None;
        self.extensions.clear();
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// ([RFC 7230 §3.2](https://tools.ietf.org/html/rfc7230#section-3.2)).
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// All headers, in parse order.
    #[inline(always)]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter()
    }

    /// The value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// The request body, if any.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// A cheap clone of the body (shares the underlying allocation).
    #[inline(always)]
    pub(crate) fn body_bytes(&self) -> Option<Bytes> {
        self.body.clone()
    }

    #[inline(always)]
    pub(crate) fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    #[inline(always)]
    pub(crate) fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Stores a value in the request's context map (§4.6 `Context<T>`),
    /// keyed by `T`'s type. Replaces and returns any previous value of the
    /// same type. Middlewares use this to hand data downstream to later
    /// middlewares or the handler.
    #[inline(always)]
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    /// Reads a previously inserted context value of type `T`, if any.
    #[inline(always)]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions.get()
    }
}

/// Bundles the parsed [`Request`] with the connection-level signals the
/// session state machine needs: the negotiated version (already on
/// `request.version()`, repeated here for clarity) and whether the
/// connection should stay open for another pipelined request (§4.3).
pub(crate) struct ParsedRequest {
    pub(crate) request: Request,
    pub(crate) keep_alive: bool,
}

#[derive(Default)]
struct RawUrl {
    target: Span,
    path: Span,
    parts: Vec<Span>,
    query: Option<Span>,
    query_parts: Vec<(Span, Span)>,
}

struct RawHeader {
    name: Span,
    value: Span,
}

/// Owns the per-connection read buffer and the low-level, offset-based
/// parsing routines. A `Parser` is reused across every request on a
/// keep-alive connection (§4.3); [`Parser::parse`] is the only entry point
/// that produces a [`Request`].
#[derive(Debug)]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer: vec![0; limits.clone().precalculate().precalc.buffer].into_boxed_slice(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let limits = limits.clone().precalculate();
        let mut buffer = vec![0; limits.precalc.buffer.max(value.as_ref().len())];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    /// Reads more bytes from `stream` into the buffer, past whatever is
    /// already buffered, enforcing `time` as an idle-read deadline (§4.3's
    /// header timeout, or the socket read timeout once in a body). Generic
    /// over the transport so the same parser drives both plain and
    /// TLS-wrapped connections (§6 `listen_ssl`).
    pub(crate) async fn fill_buffer<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        time: Duration,
    ) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Ok(0);
        }

        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Bytes already buffered but not yet consumed by a parsed request.
    #[inline(always)]
    pub(crate) fn pending(&self) -> usize {
        self.len - self.position
    }

    #[inline(always)]
    pub(crate) fn has_room(&self) -> bool {
        self.len < self.buffer.len()
    }

    /// Peeks whether a complete request frame is already buffered: the
    /// header section terminated by a blank line and, if `Content-Length`
    /// is present, that many body bytes following it. Read-only — never
    /// advances `position` or touches bytes past `self.len` (unlike
    /// [`Parser::parse`]'s span helpers, which assume the caller already
    /// confirmed this). The session loop calls this after every
    /// [`Parser::fill_buffer`] to decide whether to keep reading or hand
    /// the buffer to `parse`.
    pub(crate) fn request_ready(&self) -> bool {
        let buffered = &self.buffer[self.position..self.len];

        let header_end = match find_subslice(buffered, b"\r\n\r\n") {
            Some(pos) => pos + 4,
            None => match find_subslice(buffered, b"\n\n") {
                Some(pos) => pos + 2,
                None => return false,
            },
        };

        match content_length_of(&buffered[..header_end]) {
            Some(needed) => buffered.len() - header_end >= needed,
            None => true,
        }
    }

    /// Clears the scratch buffer between connections so one `Parser` can be
    /// reused across a worker's entire sequence of accepted sockets, not
    /// just across keep-alive requests on a single one (§5 worker pool).
    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A best-effort, case-insensitive scan for `Content-Length` within a
/// not-yet-parsed header section, used only to decide whether enough body
/// bytes have been buffered (§4.3). [`Parser::parse_headers`] is the
/// authoritative parse; a malformed value here just means `request_ready`
/// falls back to treating the frame as complete, and the real error
/// surfaces from `parse` itself.
fn content_length_of(header_bytes: &[u8]) -> Option<usize> {
    for line in header_bytes.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut parts = line.splitn(2, |&b| b == b':');
        let name = parts.next()?;
        let value = parts.next()?;
        if name.eq_ignore_ascii_case(b"content-length") {
            let value = value.strip_prefix(b" ").unwrap_or(value);
            return crate::http::types::slice_to_usize(value);
        }
    }
    None
}

// Low-level buffer access
impl Parser {
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn checked_span(&self, start: usize, len: usize) -> Option<Span> {
        self.buffer.get(start..start + len)?;
        Some((start, len))
    }

    #[inline(always)]
    fn span_of(&self, sub: &[u8]) -> Span {
        let base = self.buffer.as_ptr() as usize;
        let ptr = sub.as_ptr() as usize;
        (ptr - base, sub.len())
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    /// Finds `delimiter` within `limit` bytes of the current position,
    /// advances past it, and returns the span before it.
    #[inline]
    fn find_span(&mut self, limit: usize, delimiter: u8) -> Option<Span> {
        let step = self.find_char(limit, delimiter)?;
        let start = self.position;
        self.position += step + 1;
        Some((start, step))
    }
}

// Parse first line
impl Parser {
    #[inline]
    fn parse_method(&mut self) -> Result<Method, ErrorKind> {
        // "OPTIONS " - the longest possible method with a trailing space.
        let slice = self.get_slice(0, 8).ok_or(ErrorKind::InvalidMethod)?;
        let (method, consumed) = Method::from_bytes(slice)?;
        self.position = consumed;
        Ok(method)
    }

    #[inline]
    fn parse_url(&mut self, limits: &ReqLimits) -> Result<RawUrl, ErrorKind> {
        let start = self.position;
        let rel_space = self
            .find_char(limits.url_size, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;
        let end = start + rel_space;

        if end == start || self.buffer[start] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        let rel_query = memchr(b'?', &self.buffer[start..end]);
        let path_end = rel_query.map(|q| start + q).unwrap_or(end);

        let target = self.checked_span(start, end - start).unwrap();
        let path = self.checked_span(start, path_end - start).unwrap();

        let mut parts = Vec::with_capacity(limits.url_parts);
        let mut last = start + 1;
        if path_end > last {
            for idx in memchr_iter(b'/', &self.buffer[last..path_end]) {
                let abs = last + idx;
                if abs > last {
                    if parts.len() == limits.url_parts {
                        return Err(ErrorKind::InvalidUrl);
                    }
                    parts.push((last, abs - last));
                }
                last = abs + 1;
            }
        }
        if last < path_end {
            if parts.len() == limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }
            parts.push((last, path_end - last));
        }

        let (query, query_parts) = match rel_query {
            Some(_) => {
                let q_slice = &self.buffer[path_end..end];
                let pairs: Vec<(&[u8], &[u8])> =
                    Query::parse(q_slice, limits.url_query_parts).map_err(ErrorKind::from)?;
                let spans = pairs
                    .into_iter()
                    .map(|(k, v)| (self.span_of(k), self.span_of(v)))
                    .collect();
                (Some((path_end, end - path_end)), spans)
            }
            None => (None, Vec::new()),
        };

        self.position = end + 1;

        Ok(RawUrl {
            target,
            path,
            parts,
            query,
            query_parts,
        })
    }

    #[inline]
    fn check_version(&mut self) -> Result<(Version, bool), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes).
        let (start, step) = self.find_span(10, b'\n').ok_or(ErrorKind::InvalidVersion)?;
        let slice = self.get_slice(start, step).ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        let (version, keep_alive) = Version::from_bytes(&slice[..8])?;
        self.has_crlf = slice.last() == Some(&b'\r');

        Ok((version, keep_alive))
    }
}

// Parse headers
impl Parser {
    #[inline]
    fn parse_headers(
        &mut self,
        limits: &ReqLimits,
        keep_alive: &mut bool,
    ) -> Result<(Vec<RawHeader>, Option<usize>), ErrorKind> {
        let mut raw = Vec::with_capacity(limits.header_count);
        let mut content_length = None;

        for _ in 0..=limits.header_count {
            let Some(header) = self.parse_header(limits)? else {
                return Ok((raw, content_length));
            };

            let name_bytes = self
                .get_slice(header.name.0, header.name.1)
                .ok_or(ErrorKind::InvalidHeader)?;

            match name_bytes {
                b"content-length" => {
                    let value = self
                        .get_slice(header.value.0, header.value.1)
                        .ok_or(ErrorKind::InvalidContentLength)?;
                    let len = crate::http::types::slice_to_usize(value)
                        .ok_or(ErrorKind::InvalidContentLength)?;
                    if len > limits.body_size {
                        return Err(ErrorKind::BodyTooLarge);
                    }
                    content_length = Some(len);
                }
                b"connection" => {
                    let value = self
                        .get_slice(header.value.0, header.value.1)
                        .ok_or(ErrorKind::InvalidConnection)?;
                    let mut normalized = [0; 10];
                    let len = crate::http::types::into_lower_case(value, &mut normalized);
                    match &normalized[..len] {
                        b"keep-alive" => *keep_alive = true,
                        b"close" => *keep_alive = false,
                        _ => return Err(ErrorKind::InvalidConnection),
                    }
                }
                b"transfer-encoding" => return Err(ErrorKind::TransferEncodingUnsupported),
                _ => raw.push(header),
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self, limits: &ReqLimits) -> Result<Option<RawHeader>, ErrorKind> {
        // HeaderName: value\r\n
        //                      |
        let line_start = self.position;
        let end = self
            .find_char(limits.header_section_size, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match self.get_slice(line_start + end - 1, 2) {
            Some([b'\r', b'\n']) if self.has_crlf => {}
            Some([_, b'\n']) if !self.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: value\r\n
        //           |
        let line = self.get_slice(line_start, end).ok_or(ErrorKind::InvalidHeader)?;
        let Some(split) = memchr(b':', line) else {
            self.check_end_of_headers(line_start, end)?;
            return Ok(None);
        };

        if self.get_slice(line_start + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = line_start + split + 2;
        let len_value = end - split - 2 - self.has_crlf as usize;

        if split > limits.header_name_size || len_value > limits.header_value_size {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = self
                .get_slice_mut(line_start, split)
                .ok_or(ErrorKind::InvalidHeader)?;
            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }
            crate::http::types::to_lower_case(name);
            (line_start, split)
        };

        let value = self
            .checked_span(value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        self.position = line_start + end + 1;

        Ok(Some(RawHeader { name, value }))
    }

    #[inline]
    fn check_end_of_headers(&mut self, line_start: usize, end: usize) -> Result<(), ErrorKind> {
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let tail = self
            .get_slice(line_start + end - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        let matches = match self.has_crlf {
            true => tail.ends_with(b"\r\n\r\n"),
            false => tail.ends_with(b"\n\n"),
        };
        if !matches {
            return Err(ErrorKind::InvalidHeader);
        }

        self.position = line_start + end + 1;
        Ok(())
    }
}

// Parse body
impl Parser {
    /// Validates that the bytes already buffered hold at least
    /// `Content-Length` bytes (§4.2) and consumes exactly that many,
    /// leaving any remaining buffered bytes untouched as a pipelined
    /// request's leftover. The caller is responsible for having read enough
    /// of the socket beforehand — this never itself waits for more bytes.
    #[inline]
    fn check_body(&mut self, content_length: Option<usize>) -> Result<Option<Span>, ErrorKind> {
        let available = self.len - self.position;

        match content_length {
            Some(len) if len <= available => {
                let span = self.checked_span(self.position, len).ok_or(
                    ErrorKind::BodyMismatch {
                        expected: len,
                        available,
                    },
                )?;
                self.position += len;
                Ok(Some(span))
            }
            Some(len) => Err(ErrorKind::BodyMismatch {
                expected: len,
                available,
            }),
            None => Ok(None),
        }
    }
}

// Top-level entry point
impl Parser {
    /// Parses exactly one request out of the buffered bytes, then freezes
    /// the buffer into an owned [`Bytes`] and rotates in a fresh working
    /// buffer, carrying over any bytes belonging to the next pipelined
    /// request.
    pub(crate) fn parse(&mut self, limits: &ReqLimits) -> Result<ParsedRequest, ErrorKind> {
        let method = self.parse_method()?;
        let raw_url = self.parse_url(limits)?;
        let (version, mut keep_alive) = self.check_version()?;

        let (raw_headers, content_length) = self.parse_headers(limits, &mut keep_alive)?;

        let body_span = self.check_body(content_length)?;

        let consumed = self.position;
        let leftover = self.len - consumed;

        let capacity = self.buffer.len();
        let old = std::mem::replace(&mut self.buffer, vec![0; capacity].into_boxed_slice());
        let frozen = Bytes::from(old.into_vec());

        if leftover > 0 {
            self.buffer[..leftover].copy_from_slice(&frozen[consumed..consumed + leftover]);
        }
        self.position = 0;
        self.len = leftover;
        self.has_crlf = false;

        let slice = |span: Span| frozen.slice(span.0..span.0 + span.1);

        let url = Url {
            target: slice(raw_url.target),
            path: slice(raw_url.path),
            parts: raw_url.parts.into_iter().map(slice).collect(),
            query: raw_url.query.map(slice),
            query_parts: raw_url
                .query_parts
                .into_iter()
                .map(|(k, v)| (slice(k), slice(v)))
                .collect(),
        };

        let headers = HeaderMap {
            headers: raw_headers
                .into_iter()
                .map(|h| Header::new(slice(h.name), slice(h.value)))
                .collect(),
            content_length,
        };

        let request = Request {
            method,
            url,
            version,
            headers,
            body: body_span.map(slice),
            extensions: Extensions::default(),
        };

        Ok(ParsedRequest { request, keep_alive })
    }
}

#[cfg(test)]
mod parser_tests {
    use super::*;
    use crate::tools::*;

    fn t(req: &str) -> (Parser, ReqLimits) {
        let limits = ReqLimits::default().precalculate();
        (Parser::from(&limits, req), limits)
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let (mut p, _) = t(method);

            match expected {
                Some(expected) => assert_eq!(p.parse_method(), Ok(expected)),
                None => assert_eq!(p.parse_method(), Err(ErrorKind::InvalidMethod)),
            }
        }
    }

    #[test]
    fn parse_url_segments_and_query() {
        let (mut p, limits) = t("/api/find?user=qwe&id=223 ");
        p.position = 0;

        let raw = p.parse_url(&limits).unwrap();
        assert_eq!(raw.parts.len(), 2);

        let seg = |span: Span| str_op(&p.buffer[span.0..span.0 + span.1]);
        assert_eq!(seg(raw.parts[0]), "api");
        assert_eq!(seg(raw.parts[1]), "find");
        assert_eq!(raw.query_parts.len(), 2);
    }

    #[test]
    fn parse_url_root_and_slash_collapsing() {
        for (input, expected) in [("/ ", vec![]), ("///api//user ", vec!["api", "user"])] {
            let (mut p, limits) = t(input);
            let raw = p.parse_url(&limits).unwrap();
            let seg = |span: Span| str_op(&p.buffer[span.0..span.0 + span.1]).to_string();
            let got: Vec<String> = raw.parts.into_iter().map(seg).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn parse_url_invalid() {
        for input in ["qwe ", " ", "qwe/qwe ", "/qwe"] {
            let (mut p, limits) = t(input);
            assert_eq!(p.parse_url(&limits), Err(ErrorKind::InvalidUrl));
        }
    }

    #[test]
    fn check_version_cases() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, false))),
            ("HTTP/1.1\n",     Ok((Version::Http11, true))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let (mut p, _) = t(value);
            assert_eq!(p.check_version().map(|(v, _)| v), expected.map(|(v, _)| v));
        }
    }

    #[test]
    fn parse_full_request_with_body() {
        let (mut p, limits) = t("POST /upload HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 17\r\n\r\n{\"data\": \"value\"}");

        let parsed = p.parse(&limits).unwrap();
        assert_eq!(parsed.request.method(), Method::Post);
        assert_eq!(parsed.request.url().path(), b"/upload");
        assert_eq!(
            str(parsed.request.header("content-type")),
            Some("application/json")
        );
        assert_eq!(parsed.request.body(), Some(b"{\"data\": \"value\"}" as &[u8]));
        assert!(parsed.keep_alive);
    }

    #[test]
    fn parse_keeps_pipelined_leftover() {
        let (mut p, limits) = t("GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n");
        let first = p.parse(&limits).unwrap();
        assert_eq!(first.request.url().path(), b"/");
        assert!(p.pending() > 0);

        // Enough bytes for the second request are already carried over.
        let second = p.parse(&limits).unwrap();
        assert_eq!(second.request.url().path(), b"/next");
    }

    #[test]
    fn rejects_transfer_encoding() {
        let (mut p, limits) = t("GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(p.parse(&limits), Err(ErrorKind::TransferEncodingUnsupported));
    }

    #[test]
    fn rejects_body_too_large() {
        let (mut p, limits) = t("POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\nbody");
        assert_eq!(p.parse(&limits), Err(ErrorKind::BodyTooLarge));
    }

    #[test]
    fn rejects_body_mismatch() {
        let (mut p, limits) = t("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort");
        assert_eq!(
            p.parse(&limits),
            Err(ErrorKind::BodyMismatch { expected: 10, available: 5 })
        );
    }

    #[test]
    fn request_ready_waits_for_full_headers() {
        let (p, _) = t("GET / HTTP/1.1\r\nHost: x");
        assert!(!p.request_ready());

        let (p, _) = t("GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(p.request_ready());
    }

    #[test]
    fn request_ready_waits_for_full_body() {
        let (p, _) = t("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort");
        assert!(!p.request_ready());

        let (p, _) = t("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nshort");
        assert!(p.request_ready());
    }

    #[test]
    fn rejects_too_many_headers() {
        let limits = ReqLimits {
            header_count: 2,
            ..ReqLimits::default()
        }
        .precalculate();
        let mut p = Parser::from(&limits, "GET / HTTP/1.1\r\na: 1\r\nb: 2\r\nc: 3\r\n\r\n");
        assert_eq!(p.parse(&limits), Err(ErrorKind::TooManyHeaders));
    }
}
