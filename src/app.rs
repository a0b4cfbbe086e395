//! The host-facing API (§6): route/middleware/group registration, WebSocket
//! endpoint registration, service provisioning, and the two blocking entry
//! points, `listen`/`listen_ssl`. Grounded on the donor's `ServerBuilder`
//! (required components validated at `build()`, worker pool sized and
//! spawned there), generalized from a single `Handler` to the full
//! router+pipeline+services stack.

use crate::{
    binder::Handler,
    config::ServerConfig,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    pipeline::{BoxHandler, Middleware, Pipeline},
    router::{RouteGroup, Router},
    server::reactor::Reactor,
    services::ServiceProvider,
    websocket::{WebSocketHandlers, WebSocketRegistry},
    Method,
};
use std::{io, net::SocketAddr, path::Path, sync::Arc};

macro_rules! method_fn {
    ($name:ident, $method:expr) => {
        /// Registers a handler for this method and path (§6).
        pub fn $name<H, T>(mut self, path: &str, handler: H) -> Self
        where
            H: Handler<T> + Clone + Send + Sync + 'static,
            T: Send + 'static,
        {
            self.route($method, path, handler);
            self
        }
    };
}

/// The application: route table, middleware list, service registry and
/// WebSocket endpoints, assembled at startup and handed to the reactor by
/// `listen`/`listen_ssl` (§6).
pub struct App {
    pub(crate) router: Router,
    middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) services: ServiceProvider,
    pub(crate) websockets: WebSocketRegistry,
    config: ServerConfig,
}

impl App {
    /// A new, empty application with default limits (§4.12).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts a builder for configuring limits before any routes are added.
    pub fn builder() -> AppBuilder {
        AppBuilder {
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
            resp_limits: RespLimits::default(),
        }
    }

    /// Registers a route under any method (§6 `route(method, path, handler)`).
    /// Used internally by the per-method helpers below and by
    /// [`RouteGroup`](crate::router::RouteGroup).
    pub(crate) fn route<H, T>(&mut self, method: Method, path: &str, handler: H)
    where
        H: Handler<T> + Clone + Send + Sync + 'static,
        T: Send + 'static,
    {
        let handler = handler.clone();
        let boxed: Box<BoxHandler> = Box::new(move |req, res, services| handler.call(req, res, services));
        self.router.add_route(method, path, boxed);
    }

    method_fn!(get, Method::Get);
    method_fn!(post, Method::Post);
    method_fn!(put, Method::Put);
    method_fn!(delete, Method::Delete);
    method_fn!(patch, Method::Patch);
    method_fn!(head, Method::Head);
    method_fn!(options, Method::Options);

    /// Appends a middleware to the pipeline (§6 `use(middleware)`). Named
    /// `middleware` rather than `use` because the latter is a reserved word.
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Returns a builder that prefixes every subsequently registered path
    /// with `prefix` (§6 `group(prefix)`).
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup::new(self, prefix)
    }

    /// Registers a singleton service (§4.7).
    pub fn provide<T, F, Fut>(mut self, factory: F) -> Self
    where
        T: std::any::Any + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        self.services
            .provide::<T, F, Fut>(factory)
            .expect("service registration before listen() never fails");
        self
    }

    /// Registers a transient service (§4.7).
    pub fn provide_transient<T, F, Fut>(mut self, factory: F) -> Self
    where
        T: std::any::Any + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        self.services
            .provide_transient::<T, F, Fut>(factory)
            .expect("service registration before listen() never fails");
        self
    }

    /// Registers an already-constructed singleton service instance.
    pub fn provide_instance<T>(mut self, instance: T) -> Self
    where
        T: std::any::Any + Send + Sync + 'static,
    {
        self.services
            .provide_instance(instance)
            .expect("service registration before listen() never fails");
        self
    }

    /// Registers a WebSocket endpoint (§6 `ws(path, handlers)`, §4.8).
    pub fn ws(mut self, path: &str, handlers: WebSocketHandlers) -> Self {
        self.websockets.register(path, handlers);
        self
    }

    /// Fans `message` out to every session currently connected to `path`
    /// (§6 `broadcast(path, message)`, §4.8). No-op if `path` has no
    /// connected sessions (or is not a registered endpoint).
    pub async fn broadcast(&self, path: &str, message: impl Into<Vec<u8>>) {
        self.websockets.broadcast(path, message.into()).await;
    }

    /// Binds `addr` and serves plain HTTP, blocking until the process
    /// receives SIGINT/SIGTERM (§6 `listen(port)`).
    pub async fn listen(self, addr: impl Into<SocketAddr>) -> Result<(), io::Error> {
        let addr = addr.into();
        self.run(addr, None).await
    }

    /// Binds `addr` and serves HTTPS using the certificate/key at the given
    /// paths (§6 `listen_ssl(port, cert_path, key_path)`).
    pub async fn listen_ssl(
        self,
        addr: impl Into<SocketAddr>,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), io::Error> {
        let addr = addr.into();
        let tls = crate::server::reactor::TlsConfig::load(cert_path.as_ref(), key_path.as_ref())?;
        self.run(addr, Some(tls)).await
    }

    async fn run(
        mut self,
        addr: SocketAddr,
        tls: Option<crate::server::reactor::TlsConfig>,
    ) -> Result<(), io::Error> {
        self.services.close();
        let pipeline = Arc::new(Pipeline::new(self.middlewares));
        let router = Arc::new(self.router);
        let services = Arc::new(self.services);
        let websockets = Arc::new(self.websockets);

        let mut config = self.config;
        config.bind_addr = addr;

        Reactor::new(config, router, pipeline, services, websockets, tls)
            .run()
            .await
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures server/connection/request/response limits before any routes
/// exist (§4.12), mirroring the donor's `ServerBuilder`'s limit setters.
pub struct AppBuilder {
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl AppBuilder {
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = limits;
        self
    }

    pub fn conn_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = limits;
        self
    }

    pub fn req_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = limits;
        self
    }

    pub fn resp_limits(mut self, limits: RespLimits) -> Self {
        self.resp_limits = limits;
        self
    }

    pub fn build(self) -> App {
        let config = ServerConfig {
            bind_addr: ([0, 0, 0, 0], 0).into(),
            server_limits: self.server_limits,
            conn_limits: self.conn_limits,
            req_limits: self.req_limits.precalculate(),
            resp_limits: self.resp_limits,
            _priv: (),
        };

        App {
            router: Router::new(),
            middlewares: Vec::new(),
            services: ServiceProvider::new(),
            websockets: WebSocketRegistry::new(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn hello() -> &'static str {
        "hi"
    }

    #[test]
    fn route_registration_is_chainable() {
        let app = App::new().get("/", hello).post("/", hello);
        assert!(app.router.matches(Method::Get, b"/").is_some());
        assert!(app.router.matches(Method::Post, b"/").is_some());
    }

    #[test]
    fn group_prefixes_routes() {
        let mut app = App::new();
        app.group("/api").get("/users", hello);
        assert!(app.router.matches(Method::Get, b"/api/users").is_some());
    }
}
