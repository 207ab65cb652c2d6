//! Per-page hub: one upstream socket shared by up to `max_clients` inspector
//! sessions.
//!
//! Client tasks rewrite request ids on the way in; the broker's single reader
//! task decodes them on the way out and routes each reply to the one client
//! that issued it. Events (messages without an `id`) fan out verbatim to every
//! attached client.
//!
//! The upstream socket is dialed lazily by the first client that needs it and
//! redialed on demand after it drops: a client that sends into a closed
//! upstream is detached, and the next attach for the page dials again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use crate::api::errors::Error;
use crate::config::RuntimeConfig;
use crate::metrics::{
    METRICS_ID_PROXY_CLIENTS_ATTACHED, METRICS_ID_PROXY_CLIENTS_REFUSED,
    METRICS_ID_PROXY_UPSTREAM_DIALS,
};
use crate::services::upstream::{self, UpstreamSender, UpstreamSlot, UpstreamStream};

/// How often the reader task checks for an installed upstream socket.
const UPSTREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long the reader waits for the first upstream socket before giving up.
const UPSTREAM_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue of one attached client; a writer task owns the sink half of
/// the client socket and drains this queue.
struct ClientHandle {
    tx: mpsc::UnboundedSender<ws::Message>,
}

/// One broker per distinct page id. Cheap to clone.
#[derive(Clone)]
pub(crate) struct PageBroker {
    inner: Arc<Shared>,
}

struct Shared {
    page_id: String,
    config: Arc<RuntimeConfig>,
    clients: Mutex<HashMap<u32, ClientHandle>>,
    // tokio mutex: the guard is held across the dial await so at most one
    // task dials the page at a time
    upstream: tokio::sync::Mutex<UpstreamSlot>,
}

impl PageBroker {
    pub(crate) fn new(page_id: String, config: Arc<RuntimeConfig>) -> Self {
        Self {
            inner: Arc::new(Shared {
                page_id,
                config,
                clients: Mutex::new(HashMap::new()),
                upstream: tokio::sync::Mutex::new(UpstreamSlot::default()),
            }),
        }
    }

    pub(crate) fn page_id(&self) -> &str {
        &self.inner.page_id
    }

    /// Runs one client session to completion: register, ensure the upstream
    /// socket exists, then relay frames until either side goes away.
    ///
    /// `path_qs` is the path+query the client connected with; a lazy dial
    /// reuses it so the browser sees the URL the client asked for.
    pub(crate) async fn attach(self, socket: WebSocket, path_qs: String) {
        let (sink, mut stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(client_id) = self.register(tx.clone()) else {
            // the handshake already succeeded; dropping the socket closes it
            // without exchanging any traffic
            return;
        };
        tokio::spawn(client_write_loop(sink, rx));
        tracing::info!("[CLIENT {client_id}] CONNECTED");

        if let Err(err) = self.ensure_upstream(&path_qs).await {
            tracing::warn!(
                "[CLIENT {client_id}] CONNECTION ERROR: {}: {err}",
                self.page_id()
            );
            self.detach(client_id);
            return;
        }

        let result = self.relay_client(client_id, &mut stream).await;
        self.detach(client_id);
        match result {
            Ok(()) | Err(Error::ConnectionClosed) => {
                tracing::info!("[CLIENT {client_id}] DISCONNECTED");
            }
            Err(Error::UpstreamClosed) => {
                tracing::info!("[CLIENT {client_id}] RECONNECTED");
            }
            Err(err) => {
                if let Some(frame) = err.into_close_frame() {
                    let _ = tx.send(ws::Message::Close(Some(frame)));
                }
            }
        }
        // dropping the last sender ends the writer task, which finishes the
        // closing handshake
    }

    /// Registers a new client under the smallest free id.
    ///
    /// Returns `None` when the page is at capacity. Reusing the slot of a
    /// departed client keeps every live id inside the codec's client field.
    fn register(&self, tx: mpsc::UnboundedSender<ws::Message>) -> Option<u32> {
        let max_clients = self.inner.config.max_clients;
        let mut clients = self.inner.clients.lock();
        if clients.len() >= max_clients {
            tracing::warn!("[CLIENT {}] CONNECTION FAILED", clients.len());
            ::metrics::counter!(METRICS_ID_PROXY_CLIENTS_REFUSED).increment(1);
            return None;
        }
        let client_id = (0..max_clients as u32)
            .find(|id| !clients.contains_key(id))
            .expect("a free id exists below capacity");
        clients.insert(client_id, ClientHandle { tx });
        ::metrics::gauge!(METRICS_ID_PROXY_CLIENTS_ATTACHED).increment(1);
        Some(client_id)
    }

    fn detach(&self, client_id: u32) {
        if self.inner.clients.lock().remove(&client_id).is_some() {
            ::metrics::gauge!(METRICS_ID_PROXY_CLIENTS_ATTACHED).decrement(1);
        }
    }

    /// Makes sure a live upstream socket exists, dialing if necessary.
    async fn ensure_upstream(&self, path_qs: &str) -> Result<(), tungstenite::Error> {
        let mut slot = self.inner.upstream.lock().await;
        if slot.is_open() {
            return Ok(());
        }
        let config = &self.inner.config;
        let url = format!(
            "ws://{}:{}{}",
            config.chrome_host, config.chrome_port, path_qs
        );
        tracing::debug!("[BROWSER {}] dialing {url}", self.inner.page_id);
        let socket = upstream::connect(&url).await?;
        ::metrics::counter!(METRICS_ID_PROXY_UPSTREAM_DIALS).increment(1);
        slot.install(socket);
        Ok(())
    }

    async fn upstream_sender(&self) -> Option<UpstreamSender> {
        self.inner.upstream.lock().await.sender()
    }

    async fn take_pending_read(&self) -> Option<(u64, UpstreamStream)> {
        self.inner.upstream.lock().await.take_pending_read()
    }

    /// Drops the writer of the given connection so client tasks observe the
    /// closed upstream on their next send.
    async fn close_upstream(&self, generation: u64) {
        self.inner.upstream.lock().await.close(generation);
    }

    /// Reads frames from one client until its socket or the upstream goes
    /// away.
    async fn relay_client(
        &self,
        client_id: u32,
        stream: &mut SplitStream<WebSocket>,
    ) -> Result<(), Error> {
        while let Some(msg) = stream.next().await {
            match msg? {
                ws::Message::Text(text) => {
                    let Some(upstream_tx) = self.upstream_sender().await else {
                        return Err(Error::UpstreamClosed);
                    };
                    let mut data = self.parse(text.as_str())?;
                    let request_id = data
                        .get("id")
                        .and_then(Value::as_u64)
                        .ok_or(Error::MissingId)?;
                    let encoded = self.inner.config.codec.encode(client_id, request_id)?;
                    data["id"] = Value::from(encoded);
                    tracing::debug!("[CLIENT {client_id}] >> {data}");
                    if upstream_tx
                        .send(tungstenite::Message::text(data.to_string()))
                        .is_err()
                    {
                        return Err(Error::UpstreamClosed);
                    }
                }
                ws::Message::Close(_) => return Ok(()),
                // pings are answered by axum; binary and pong frames are
                // ignored
                _ => {}
            }
        }
        Ok(())
    }

    /// Routes one upstream frame: replies go to exactly one client, events
    /// fan out verbatim to every attached client.
    fn route_upstream(&self, text: &str) -> Result<(), Error> {
        let mut data = self.parse(text)?;
        if data.get("id").is_none() {
            // an event; snapshot the client set and forward the original
            // frame, not a re-serialization
            let clients: Vec<(u32, mpsc::UnboundedSender<ws::Message>)> = self
                .inner
                .clients
                .lock()
                .iter()
                .map(|(id, handle)| (*id, handle.tx.clone()))
                .collect();
            for (client_id, tx) in clients {
                if tx.is_closed() {
                    continue;
                }
                tracing::debug!("[CLIENT {client_id}] << {text}");
                let _ = tx.send(ws::Message::text(text.to_owned()));
            }
            return Ok(());
        }
        let Some(encoded) = data
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
        else {
            // not an id this proxy handed out; nothing to route
            return Ok(());
        };
        let (client_id, request_id) = self.inner.config.codec.decode(encoded);
        let Some(tx) = self
            .inner
            .clients
            .lock()
            .get(&client_id)
            .map(|handle| handle.tx.clone())
        else {
            tracing::trace!(
                "[BROWSER {}] dropping reply for missing client {client_id}",
                self.inner.page_id
            );
            return Ok(());
        };
        data["id"] = Value::from(request_id);
        tracing::debug!("[CLIENT {client_id}] << {data}");
        let _ = tx.send(ws::Message::text(data.to_string()));
        Ok(())
    }

    /// Parses one JSON text frame, honoring the alternative-parser flag.
    fn parse(&self, text: &str) -> Result<Value, Error> {
        #[cfg(feature = "simd-json")]
        if self.inner.config.internal.simd_json {
            let mut buf = text.as_bytes().to_vec();
            return Ok(simd_json::serde::from_slice(&mut buf)?);
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Closes every client socket and the upstream connection.
    pub(crate) async fn shutdown(&self) {
        let clients: Vec<ClientHandle> = self
            .inner
            .clients
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        ::metrics::gauge!(METRICS_ID_PROXY_CLIENTS_ATTACHED).decrement(clients.len() as f64);
        for handle in clients {
            let _ = handle.tx.send(ws::Message::Close(Some(ws::CloseFrame {
                code: ws::close_code::AWAY,
                reason: "proxy shutting down".into(),
            })));
        }
        self.inner.upstream.lock().await.reset();
    }
}

/// Long-running reader for a page's upstream socket.
///
/// Spawned exactly once, when the broker is created: the first client may not
/// have triggered the dial yet, so the task polls for the socket before
/// reading. If no socket appears within the startup timeout the task exits.
/// After a connection existed once, the task keeps waiting for the socket a
/// reconnect installs, so one reader per page follows reconnects; attaches
/// never re-spawn it.
pub(crate) async fn upstream_reader_task(broker: PageBroker, cancel: CancellationToken) {
    let page_id = broker.page_id().to_owned();
    let mut connected_once = false;
    loop {
        let deadline =
            (!connected_once).then(|| tokio::time::Instant::now() + UPSTREAM_STARTUP_TIMEOUT);
        let (generation, mut stream) = loop {
            if let Some(pending) = broker.take_pending_read().await {
                break pending;
            }
            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                tracing::info!("[BROWSER {page_id}] DISCONNECTED");
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(UPSTREAM_POLL_INTERVAL) => {}
            }
        };
        tracing::info!("[BROWSER {page_id}] CONNECTED");
        connected_once = true;

        loop {
            let msg = tokio::select! {
                msg = stream.next() => msg,
                _ = cancel.cancelled() => return,
            };
            match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if let Err(err) = broker.route_upstream(text.as_str()) {
                        tracing::warn!("[BROWSER {page_id}] dropping malformed frame: {err}");
                        break;
                    }
                }
                // non-text frames are ignored
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!("[BROWSER {page_id}] read error: {err}");
                    break;
                }
                None => break,
            }
        }
        broker.close_upstream(generation).await;
        tracing::info!("[BROWSER {page_id}] DISCONNECTED");
        if cancel.is_cancelled() {
            return;
        }
    }
}

/// Owns the sink half of one client socket and serializes writes to it.
async fn client_write_loop(
    mut sink: SplitSink<WebSocket, ws::Message>,
    mut rx: mpsc::UnboundedReceiver<ws::Message>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
