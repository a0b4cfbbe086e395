//! `blaze` is an async HTTP/1.1 application server framework: a non-blocking
//! reactor, an incremental HTTP codec, a keep-alive session state machine, a
//! linear-segment router, an onion-model middleware pipeline, typed parameter
//! binding, a singleton/transient service registry, WebSocket upgrade handling
//! with broadcast fan-out, a pooled async database gateway with a circuit
//! breaker and transaction scopes, and an outbound HTTP client.
//!
//! # Quick start
//!
//! ```no_run
//! use blaze::{App, Path};
//!
//! async fn greet(Path(name): Path<String>) -> String {
//!     format!("Hello, {name}!")
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     App::new()
//!         .get("/hello/:name", greet)
//!         .listen(("127.0.0.1", 8080))
//!         .await
//! }
//! ```
//!
//! # Scope
//!
//! HTTP/2, HTTP/3 and request bodies larger than the configured limit are not
//! supported. Relational mapping is limited to row-to-record projection and a
//! thin fluent `SELECT` builder, not a full ORM. Routing is linear
//! segment-matching; there is no pluggable routing algorithm.

pub(crate) mod app;
pub(crate) mod binder;
pub(crate) mod client;
pub(crate) mod config;
pub(crate) mod db;
pub(crate) mod error;
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod limits;
pub(crate) mod pipeline;
pub(crate) mod router;
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod reactor;
}
pub(crate) mod services;
pub(crate) mod websocket;

pub use crate::{
    app::{App, AppBuilder},
    binder::{Body, Context, FromRequest},
    client::{ClientError, FetchResponse, HttpClient},
    config::{ClientConfig, EnvError, PoolConfig, ServerConfig},
    db::{
        breaker::CircuitBreaker,
        pool::{DbError, Pool, PoolConnection, Transaction},
        repository::Repository,
        result::{DbResult, FromRow, Row},
    },
    error::{Error, ErrorKind},
    http::{
        query,
        request::Request,
        response::{write::{BodyWriter, WriteBuffer}, Handled, Response},
        types::{Header, HeaderMap, Method, StatusCode, Url, Version},
    },
    pipeline::{Middleware, Next, Pipeline},
    router::{RouteGroup, Router},
    services::ServiceProvider,
    websocket::{WebSocket, WebSocketHandlers},
};
pub use crate::binder::path::Path;
pub use crate::binder::query::Query;

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    let request = Request::new(&crate::limits::ReqLimits::default());
    let mut response = Response::new(&crate::limits::RespLimits::default());
    f(&request, &mut response);
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
