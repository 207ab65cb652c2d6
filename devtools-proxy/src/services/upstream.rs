//! The browser side of a page broker: one WebSocket per page.
//!
//! Every client task writes to the upstream socket, so all writes funnel
//! through a single writer task that owns the sink half of the connection.
//! The read half is parked in the slot until the broker's reader task picks
//! it up. Connections carry a generation number so a reader finishing an old
//! stream cannot tear down a newer one installed by a reconnect.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of the current upstream connection.
pub(crate) type UpstreamStream = SplitStream<WebSocket>;

/// Sender into the queue drained by the upstream writer task.
pub(crate) type UpstreamSender = mpsc::UnboundedSender<tungstenite::Message>;

/// The current upstream connection of a page, if any.
///
/// The writer handle going away (slot cleared or writer task gone) is how
/// every other task observes that the upstream socket is closed.
#[derive(Default)]
pub(crate) struct UpstreamSlot {
    generation: u64,
    writer: Option<UpstreamSender>,
    pending_read: Option<UpstreamStream>,
}

impl UpstreamSlot {
    /// True while the writer task of a dialed connection is alive.
    pub(crate) fn is_open(&self) -> bool {
        self.writer.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Handle for sending frames to the browser, if the connection is open.
    pub(crate) fn sender(&self) -> Option<UpstreamSender> {
        self.writer.as_ref().filter(|tx| !tx.is_closed()).cloned()
    }

    /// Installs a freshly dialed connection, replacing whatever was there.
    pub(crate) fn install(&mut self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, rx));
        self.generation += 1;
        self.writer = Some(tx);
        self.pending_read = Some(stream);
    }

    /// Hands the read half of the latest connection to the reader task,
    /// tagged with its generation.
    pub(crate) fn take_pending_read(&mut self) -> Option<(u64, UpstreamStream)> {
        let generation = self.generation;
        self.pending_read.take().map(|stream| (generation, stream))
    }

    /// Clears the connection, but only if `generation` still names it.
    pub(crate) fn close(&mut self, generation: u64) {
        if self.generation == generation {
            self.writer = None;
            self.pending_read = None;
        }
    }

    /// Unconditionally clears the connection. Used at shutdown.
    pub(crate) fn reset(&mut self) {
        self.writer = None;
        self.pending_read = None;
    }
}

/// Dials the page endpoint on the browser.
pub(crate) async fn connect(url: &str) -> Result<WebSocket, tungstenite::Error> {
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(socket)
}

/// Owns the sink half of one upstream connection and serializes all writes.
async fn write_loop(
    mut sink: SplitSink<WebSocket, tungstenite::Message>,
    mut rx: mpsc::UnboundedReceiver<tungstenite::Message>,
) {
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    // finishes the closing handshake on a best-effort basis
    let _ = sink.close().await;
}
