//! The reactor: binds the listening socket and runs the fixed worker-pool
//! admission scheme (§5), grounded on `server_impl.rs`'s `Server`/
//! `ServerBuilder` (`SegQueue`-backed admission queue, `get_stream`'s
//! pop-or-wait loop, `spawn_worker`/`spawn_alarmist`/`spawn_quiet_alarmist`),
//! generalized from that file's single `Handler<S>` callback to this crate's
//! router + pipeline + service registry + WebSocket registry stack, and from
//! a plain `TcpListener` accept loop to one that also honors
//! `max_total_connections` and performs the TLS handshake for `listen_ssl`.
//! The listener bind itself (`SO_REUSEADDR` via `socket2`) and the graceful
//! shutdown on `SIGINT`/`SIGTERM` are grounded on
//! `original_source/framework/src/server.cpp` and `src/app.cpp`.

use crate::{
    config::ServerConfig,
    error::ErrorKind,
    http::types::Version,
    pipeline::Pipeline,
    router::Router,
    server::connection::{Session, Shared},
    services::ServiceProvider,
    websocket::WebSocketRegistry,
};
use crossbeam::queue::SegQueue;
use rustls_pemfile::{certs, private_key};
use socket2::{Domain, Socket, Type};
use std::{
    io,
    net::SocketAddr,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep,
};
use tokio_rustls::{
    rustls::{self, pki_types::PrivateKeyDer},
    TlsAcceptor,
};

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

/// A loaded server certificate/key pair, ready to terminate TLS on accepted
/// connections (§6 `listen_ssl`).
#[derive(Clone)]
pub(crate) struct TlsConfig {
    acceptor: TlsAcceptor,
}

impl TlsConfig {
    /// Reads a PEM certificate chain and private key from disk and builds a
    /// `rustls` server configuration with no client-auth (§6 `listen_ssl`).
    pub(crate) fn load(cert_path: &Path, key_path: &Path) -> io::Result<Self> {
        let cert_file = std::fs::File::open(cert_path)?;
        let mut cert_reader = io::BufReader::new(cert_file);
        let chain = certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "no certificates found"));
        }

        let key_file = std::fs::File::open(key_path)?;
        let mut key_reader = io::BufReader::new(key_file);
        let key: PrivateKeyDer<'static> = private_key(&mut key_reader)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found"))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

/// Binds `addr` and runs the fixed worker pool until the process receives
/// `SIGINT`/`SIGTERM` (§5, §6 `listen`/`listen_ssl`).
pub(crate) struct Reactor {
    config: ServerConfig,
    router: Arc<Router>,
    pipeline: Arc<Pipeline>,
    services: Arc<ServiceProvider>,
    websockets: Arc<WebSocketRegistry>,
    tls: Option<TlsConfig>,
}

impl Reactor {
    pub(crate) fn new(
        config: ServerConfig,
        router: Arc<Router>,
        pipeline: Arc<Pipeline>,
        services: Arc<ServiceProvider>,
        websockets: Arc<WebSocketRegistry>,
        tls: Option<TlsConfig>,
    ) -> Self {
        Self {
            config,
            router,
            pipeline,
            services,
            websockets,
            tls,
        }
    }

    pub(crate) async fn run(self) -> Result<(), io::Error> {
        let listener = bind_listener(self.config.bind_addr)?;

        let shared = Arc::new(Shared {
            router: self.router,
            pipeline: self.pipeline,
            services: self.services,
            websockets: self.websockets,
        });

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());
        let admitted = Arc::new(AtomicUsize::new(0));

        let server_limits = self.config.server_limits.clone();

        for _ in 0..server_limits.max_connections {
            spawn_worker(
                stream_queue.clone(),
                shared.clone(),
                self.config.conn_limits.clone(),
                self.config.req_limits.clone(),
                self.config.resp_limits.clone(),
                server_limits.json_errors,
                server_limits.wait_strategy.clone(),
                self.tls.clone(),
                admitted.clone(),
            );
        }

        if server_limits.count_503_handlers == 0 {
            spawn_quiet_alarmist(error_queue.clone(), server_limits.wait_strategy.clone(), admitted.clone());
        } else {
            for _ in 0..server_limits.count_503_handlers {
                spawn_alarmist(
                    error_queue.clone(),
                    server_limits.wait_strategy.clone(),
                    server_limits.json_errors,
                    admitted.clone(),
                );
            }
        }

        accept_loop(listener, stream_queue, error_queue, server_limits, admitted).await
    }
}

/// Binds a non-blocking listener with `SO_REUSEADDR` set, matching the
/// donor's `Listener::reuse_address(true)` (§5).
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: crate::limits::ServerLimits,
    admitted: Arc<AtomicUsize>,
) -> io::Result<()> {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_signal() => return Ok(()),

            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else { continue };

                if admitted.load(Ordering::Acquire) >= server_limits.max_total_connections {
                    drop(stream);
                    continue;
                }
                admitted.fetch_add(1, Ordering::AcqRel);

                if stream_queue.len() < server_limits.max_pending_connections {
                    stream_queue.push((stream, addr));
                } else {
                    error_queue.push((stream, addr));
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            unreachable!()
        };
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn get_stream(queue: &TcpQueue, wait: &crate::limits::WaitStrategy) -> (TcpStream, SocketAddr) {
    loop {
        if let Some(value) = queue.pop() {
            return value;
        }

        match wait {
            crate::limits::WaitStrategy::Yield => yield_now().await,
            crate::limits::WaitStrategy::Sleep(time) => sleep(*time).await,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    queue: TcpQueue,
    shared: Arc<Shared>,
    conn_limits: crate::limits::ConnLimits,
    req_limits: crate::limits::ReqLimits,
    resp_limits: crate::limits::RespLimits,
    json_errors: bool,
    wait_strategy: crate::limits::WaitStrategy,
    tls: Option<TlsConfig>,
    admitted: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        let mut session = Session::new(conn_limits, req_limits, resp_limits, json_errors);

        loop {
            let (stream, _addr) = get_stream(&queue, &wait_strategy).await;

            match &tls {
                Some(tls) => match tls.acceptor.clone().accept(stream).await {
                    Ok(tls_stream) => {
                        let _ = session.serve(tls_stream, &shared).await;
                    }
                    Err(_) => {}
                },
                None => {
                    let _ = session.serve(stream, &shared).await;
                }
            }

            admitted.fetch_sub(1, Ordering::AcqRel);
        }
    });
}

fn spawn_alarmist(queue: TcpQueue, wait_strategy: crate::limits::WaitStrategy, json_errors: bool, admitted: Arc<AtomicUsize>) {
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = get_stream(&queue, &wait_strategy).await;

            use tokio::io::AsyncWriteExt;
            let _ = stream
                .write_all(ErrorKind::ServiceUnavailable.as_http(Version::Http11, json_errors))
                .await;

            admitted.fetch_sub(1, Ordering::AcqRel);
        }
    });
}

fn spawn_quiet_alarmist(queue: TcpQueue, wait_strategy: crate::limits::WaitStrategy, admitted: Arc<AtomicUsize>) {
    tokio::spawn(async move {
        loop {
            let (stream, _) = get_stream(&queue, &wait_strategy).await;
            drop(stream);
            admitted.fetch_sub(1, Ordering::AcqRel);
        }
    });
}
