//! Onion-model middleware pipeline (§4.5), grounded on
//! `original_source/framework/include/blaze/middleware.h`'s closure-based
//! `Middleware = fn(Request&, Response&, next)` shape, generalized to a
//! reified [`Next`] continuation so a middleware can run code both before and
//! after `await next()` without exceptions-as-control-flow (§9).

use crate::{error::Error, http::request::Request, http::response::Response, services::ServiceProvider};
use std::{future::Future, pin::Pin, sync::Arc};

/// A boxed, `Send` future — the crate's stand-in for `async fn` in trait
/// objects (no `async-trait` dependency; matches the donor's
/// `Handler::handle(...) -> impl Future<...> + Send` style, generalized to a
/// trait-object-friendly boxed form where dynamic dispatch is unavoidable).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The uniform shape every typed handler is adapted into by the binder (§3
/// Route: "a uniform `(Request, Response, Services) → Awaitable`").
pub(crate) type BoxHandler =
    dyn for<'a> Fn(&'a mut Request, &'a mut Response, &'a ServiceProvider) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync;

/// One pipeline layer. Implementations receive the request/response and a
/// reified [`Next`] continuation; awaiting `next.run(req, res)` transfers
/// control to the following layer (or the bound handler, at the last
/// position), and resumes this middleware exactly where it left off once
/// that inner call returns — the onion model (§4.5).
pub trait Middleware: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Adapts any `Fn(&mut Request, &mut Response, Next) -> BoxFuture<...>`
/// closure into [`Middleware`], so middleware is ordinarily written as a
/// plain closure rather than requiring a trait impl.
impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        self(req, res, next)
    }
}

/// The reified continuation passed to each middleware (§9 "onion-model
/// middleware without exceptions-as-control-flow"). Calling [`Next::run`]
/// advances to the next layer; at the last layer it invokes the bound
/// handler.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a BoxHandler,
    services: &'a ServiceProvider,
}

impl<'a> Next<'a> {
    /// Runs the remainder of the chain: the next middleware if any remain,
    /// otherwise the terminal handler.
    pub fn run(self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Result<(), Error>> {
        match self.middlewares.split_first() {
            Some((mw, rest)) => {
                let next = Next {
                    middlewares: rest,
                    handler: self.handler,
                    services: self.services,
                };
                mw.call(req, res, next)
            }
            None => (self.handler)(req, res, self.services),
        }
    }
}

/// Composes the registered middlewares with a matched route's handler into a
/// single awaitable computation (§4.5). Built once at startup from
/// [`crate::App`]'s accumulated middleware list; read-only thereafter (§5).
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub(crate) fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    /// Runs every middleware in order, finishing with `handler`, mapping any
    /// error via §7 — the caller (the session state machine) is responsible
    /// for turning an `Err` into a wire response.
    pub(crate) async fn run(
        &self,
        req: &mut Request,
        res: &mut Response,
        handler: &BoxHandler,
        services: &ServiceProvider,
    ) -> Result<(), Error> {
        let next = Next {
            middlewares: &self.middlewares,
            handler,
            services,
        };
        next.run(req, res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ReqLimits, RespLimits};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handler_ok() -> Box<BoxHandler> {
        Box::new(|_req, res, _services| {
            Box::pin(async move {
                res.status(crate::http::types::StatusCode::Ok).body("H");
                Ok(())
            })
        })
    }

    #[test]
    fn onion_order_records_before_and_after() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let mk = |enter: &'static str, exit: &'static str, order: Arc<std::sync::Mutex<Vec<&'static str>>>| {
            move |req: &mut Request, res: &mut Response, next: Next<'_>| -> BoxFuture<'_, Result<(), Error>> {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(enter);
                    let result = next.run(req, res).await;
                    order.lock().unwrap().push(exit);
                    result
                })
            }
        };

        let m1: Arc<dyn Middleware> = Arc::new(mk("m1-start", "m1-end", order.clone()));
        let m2: Arc<dyn Middleware> = Arc::new(mk("m2-start", "m2-end", order.clone()));
        let pipeline = Pipeline::new(vec![m1, m2]);

        let handler = handler_ok();
        let services = ServiceProvider::new();
        let req_limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let mut req = Request::new(&req_limits);
        let mut res = Response::new(&resp_limits);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(pipeline.run(&mut req, &mut res, &handler, &services))
            .unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["m1-start", "m2-start", "m2-end", "m1-end"]
        );
    }

    #[test]
    fn error_skips_remaining_afters() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let failing = move |_req: &mut Request, _res: &mut Response, _next: Next<'_>| -> BoxFuture<'_, Result<(), Error>> {
            Box::pin(async move { Err(Error::Internal("boom".into())) })
        };
        let c2 = counter.clone();
        let never_runs = move |req: &mut Request, res: &mut Response, next: Next<'_>| -> BoxFuture<'_, Result<(), Error>> {
            let c2 = c2.clone();
            Box::pin(async move {
                c2.fetch_add(1, Ordering::SeqCst);
                next.run(req, res).await
            })
        };

        let pipeline = Pipeline::new(vec![Arc::new(failing), Arc::new(never_runs)]);
        let handler = handler_ok();
        let services = ServiceProvider::new();
        let req_limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let mut req = Request::new(&req_limits);
        let mut res = Response::new(&resp_limits);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let result = rt.block_on(pipeline.run(&mut req, &mut res, &handler, &services));

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let _ = c;
    }
}
