//! Reflection-free typed parameter binding (§4.6 "Binder"), grounded in the
//! wider Rust ecosystem's `extract<T: FromRequest<'a>>()` pattern and
//! generalized here into a per-parameter-shape dispatch: [`path::Path<T>`],
//! [`query::Query<T>`], [`Body<T>`], [`Context<T>`], and a plain `Arc<S>` for
//! a registered service. No `async-trait`: extraction uses the same hand
//! rolled [`BoxFuture`] as [`crate::pipeline`].
//!
//! Handlers are adapted into the pipeline's uniform `BoxHandler` shape by
//! [`Handler`], implemented for plain functions of up to four bindable
//! parameters (optionally followed by a trailing `&mut Response` for
//! handlers that need to set headers/status manually instead of returning a
//! body value).

pub mod path;
pub mod query;

use crate::{
    error::Error,
    http::{request::Request, response::Response, types::StatusCode},
    pipeline::BoxFuture,
    services::ServiceProvider,
};
use serde::de::DeserializeOwned;
use std::{any::Any, marker::PhantomData, sync::Arc};

pub use path::Path;
pub use query::Query;

/// Tracks how many positional `:name` segments [`Path<T>`] extractors have
/// already consumed from the current route match (§4.6 "the k-th captured
/// path segment"), so repeated `Path<T>` parameters in a handler's
/// signature consume segments left-to-right in declaration order.
#[derive(Default)]
pub struct PathCursor {
    next: usize,
}

/// The full set of route-match data a request carries once the router has
/// resolved it: positional decoded segments and named captures, stored as a
/// request extension by the dispatcher before the pipeline runs.
pub(crate) struct RouteParams {
    pub(crate) segments: Vec<String>,
    #[allow(dead_code)]
    pub(crate) named: std::collections::HashMap<String, String>,
}

/// Binds one parameter from the current request (§4.6). Implemented for
/// every bindable shape; a blanket impl covers `Arc<S>` for any registered
/// service type.
pub trait FromRequest<'a>: Sized {
    fn from_request(
        req: &'a Request,
        services: &'a ServiceProvider,
        cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>>;
}

/// Binds the current request itself (§4.6 "`Request` | the current
/// request"), for handlers that need raw access to headers/method/URL
/// alongside other extracted parameters.
impl<'a> FromRequest<'a> for &'a Request {
    fn from_request(
        req: &'a Request,
        _services: &'a ServiceProvider,
        _cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        Box::pin(async move { Ok(req) })
    }
}

/// Binds the request body, deserialized from JSON as `T` (§4.6 `Body<T>`).
/// Deserialization failure raises a 400 with a descriptive message.
pub struct Body<T>(pub T);

impl<'a, T> FromRequest<'a> for Body<T>
where
    T: DeserializeOwned + Send + 'a,
{
    fn from_request(
        req: &'a Request,
        _services: &'a ServiceProvider,
        _cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        Box::pin(async move {
            let body = req.body().unwrap_or(&[]);
            let value = serde_json::from_slice(body)
                .map_err(|e| Error::Binding(format!("invalid JSON body: {e}")))?;
            Ok(Body(value))
        })
    }
}

/// Binds a previously stored context value of type `T` (§4.6 `Context<T>`).
/// Middlewares populate these via [`crate::http::request::Request::insert`].
/// Fails with a `500` if absent, matching the spec's "fails with 500 if
/// absent".
pub struct Context<T>(pub T);

impl<'a, T> FromRequest<'a> for Context<T>
where
    T: Any + Send + Sync + Clone + 'a,
{
    fn from_request(
        req: &'a Request,
        _services: &'a ServiceProvider,
        _cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        Box::pin(async move {
            req.get::<T>()
                .cloned()
                .map(Context)
                .ok_or_else(|| Error::Internal(format!("missing context value: {}", std::any::type_name::<T>())))
        })
    }
}

/// Resolves a registered service by type (§4.6 "Reference to a registered
/// service type" / "Handle/owned-pointer to a registered service type"). No
/// wrapper type is needed: any `Arc<S>` handler parameter resolves `S` from
/// the service registry.
impl<'a, S> FromRequest<'a> for Arc<S>
where
    S: Any + Send + Sync + 'static,
{
    fn from_request(
        _req: &'a Request,
        services: &'a ServiceProvider,
        _cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        Box::pin(async move {
            services
                .resolve::<S>()
                .await
                .map_err(|e| Error::Internal(e.to_string()))
        })
    }
}

/// Converts a handler's return value into a wire response (§4.6/§6: `T` in
/// `void | string | JSON value | a model type | a sequence of a model
/// type`). Plain `()`/`String`/`&str` map directly; a model type or a
/// sequence of one is wrapped in [`Json`] to disambiguate from `String`,
/// which also implements [`serde::Serialize`].
pub trait IntoResponse {
    fn into_response(self, res: &mut Response);
}

impl IntoResponse for () {
    fn into_response(self, res: &mut Response) {
        res.status(StatusCode::Ok).body("");
    }
}

impl IntoResponse for String {
    fn into_response(self, res: &mut Response) {
        res.status(StatusCode::Ok)
            .header("content-type", "text/plain; charset=utf-8")
            .body(self);
    }
}

impl IntoResponse for &'static str {
    fn into_response(self, res: &mut Response) {
        res.status(StatusCode::Ok)
            .header("content-type", "text/plain; charset=utf-8")
            .body(self);
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self, res: &mut Response) {
        let body = serde_json::to_vec(&self).unwrap_or_default();
        res.status(StatusCode::Ok)
            .header("content-type", "application/json")
            .body(body);
    }
}

/// Wraps a model type (or a `Vec` of one) so its `Serialize` impl drives
/// the response body/content-type, without colliding with the concrete
/// `String`/`&str` impls above.
pub struct Json<T>(pub T);

impl<T: serde::Serialize> IntoResponse for Json<T> {
    fn into_response(self, res: &mut Response) {
        let body = serde_json::to_vec(&self.0).unwrap_or_default();
        res.status(StatusCode::Ok)
            .header("content-type", "application/json")
            .body(body);
    }
}

impl<T: IntoResponse> IntoResponse for Result<T, Error> {
    fn into_response(self, res: &mut Response) {
        match self {
            Ok(value) => value.into_response(res),
            Err(err) => {
                let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::InternalServerError);
                let body = serde_json::to_vec(&err.json_body()).unwrap_or_default();
                res.status(status).header("content-type", "application/json").body(body);
            }
        }
    }
}

/// Adapts a typed handler function into the pipeline's uniform
/// `(Request, Response, Services) -> Awaitable<()>` shape (§3 Route). `T`
/// is a marker describing the handler's argument list; it is inferred from
/// the closure/function type, never named explicitly at the call site.
pub trait Handler<T>: Clone + Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        services: &'a ServiceProvider,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Marker type for the zero-argument handler arity, to disambiguate its
/// `Handler<T>` impl from the one-argument-plus-response impl below.
pub struct NoArgs;
/// Marker wrapping an arity's argument tuple to additionally request
/// trailing manual `&mut Response` access.
pub struct WithResponse<Args>(PhantomData<Args>);

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<Func, Fut, Ret, $($arg,)*> Handler<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: std::future::Future<Output = Ret> + Send,
            Ret: IntoResponse,
            $($arg: for<'a> FromRequest<'a> + Send,)*
        {
            fn call<'a>(
                &'a self,
                req: &'a mut Request,
                res: &'a mut Response,
                services: &'a ServiceProvider,
            ) -> BoxFuture<'a, Result<(), Error>> {
                Box::pin(async move {
                    let mut cursor = PathCursor::default();
                    #[allow(unused_variables)]
                    let req_ref: &Request = &*req;
                    $(
                        let $arg = $arg::from_request(req_ref, services, &mut cursor).await?;
                    )*
                    let ret = (self)($($arg),*).await;
                    ret.into_response(res);
                    Ok(())
                })
            }
        }

        impl<Func, Fut, Ret, $($arg,)*> Handler<WithResponse<($($arg,)*)>> for Func
        where
            Func: Fn($($arg,)* &mut Response) -> Fut + Clone + Send + Sync + 'static,
            Fut: std::future::Future<Output = Result<(), Error>> + Send,
            $($arg: for<'a> FromRequest<'a> + Send,)*
        {
            fn call<'a>(
                &'a self,
                req: &'a mut Request,
                res: &'a mut Response,
                services: &'a ServiceProvider,
            ) -> BoxFuture<'a, Result<(), Error>> {
                Box::pin(async move {
                    let mut cursor = PathCursor::default();
                    #[allow(unused_variables)]
                    let req_ref: &Request = &*req;
                    $(
                        let $arg = $arg::from_request(req_ref, services, &mut cursor).await?;
                    )*
                    (self)($($arg,)* res).await
                })
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::{request::Parser, types::StatusCode},
        limits::{ReqLimits, RespLimits},
    };

    #[derive(serde::Deserialize)]
    struct Greeting {
        name: String,
    }

    async fn say_hello(Query(q): Query<Greeting>) -> String {
        format!("hello {}", q.name)
    }

    #[tokio::test]
    async fn handler_extracts_query_and_returns_string() {
        let req_limits = ReqLimits::default().precalculate();
        let resp_limits = RespLimits::default();
        let mut parser = Parser::from(&req_limits, "GET /greet?name=ada HTTP/1.1\r\n\r\n");
        let mut req = parser.parse(&req_limits).unwrap().request;
        let mut res = Response::new(&resp_limits);
        let services = ServiceProvider::new();

        Handler::call(&say_hello, &mut req, &mut res, &services)
            .await
            .unwrap();
        assert_eq!(res.status_for_test(), StatusCode::Ok);
    }
}
