//! WebSocket transport to the hgdb simulation runtime.
//!
//! Opens a single connection to `ws://<host>:<port>` and surfaces
//! `connected`, `message`, `closed` and `failed` events over a channel, per
//! spec.md §4.1. Frames are independent text frames; there is no
//! fragmentation to reassemble.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Events surfaced by the transport to whatever owns it (normally the
/// adapter's main task).
#[derive(Debug)]
pub enum TransportEvent {
    /// The WebSocket handshake completed. Emitted at most once.
    Connected,
    /// One complete text frame arrived.
    Message(String),
    /// The connection closed after having been open.
    Closed,
    /// The connection could not be established, or a fatal I/O error hit an
    /// already-open socket.
    Failed(String),
}

/// Handle used to send text frames once the transport has connected.
///
/// `send` never blocks and never fails visibly: the underlying channel has
/// no backpressure limit, matching "one text frame per `send` call, frames
/// are independent" (spec.md §4.1). A send issued before `Connected` queues
/// in the channel and is delivered as soon as the write half is ready.
#[derive(Clone)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
}

impl Transport {
    pub fn send(&self, text: String) {
        // The receiver only goes away once the connection task has already
        // reported Closed/Failed; a dropped send past that point is moot.
        let _ = self.outbound.send(text);
    }
}

/// Connect to `ws://<host>:<port>` and spawn the task that drives the
/// socket. Returns immediately; connect failure is reported as a
/// `TransportEvent::Failed` on the returned receiver rather than as a
/// `Result`, since the caller (the request queue / launch handshake) is
/// already set up to await events.
pub fn start(url: String) -> (Transport, mpsc::UnboundedReceiver<TransportEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(run(url, event_tx, out_rx));

    (Transport { outbound: out_tx }, event_rx)
}

async fn run(
    url: String,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    // Parse with `url` rather than handing the raw string to tungstenite
    // directly: a malformed `host:port` (spec.md §6's `:PORT` shorthand is
    // expanded before it gets here, but a caller could still pass garbage)
    // should fail as a connect error, not a panic deep in the WS handshake.
    let url = match Url::parse(&url) {
        Ok(url) => url,
        Err(err) => {
            let _ = event_tx.send(TransportEvent::Failed(format!("invalid hgdb address: {err}")));
            return;
        }
    };
    let stream = match tokio_tungstenite::connect_async(url).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            let _ = event_tx.send(TransportEvent::Failed(err.to_string()));
            return;
        }
    };
    let _ = event_tx.send(TransportEvent::Connected);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = event_tx.send(TransportEvent::Message(text));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(TransportEvent::Closed);
                        return;
                    }
                    Some(Ok(_other)) => {
                        // binary/ping/pong frames: the wire protocol is text-only.
                    }
                    Some(Err(err)) => {
                        let _ = event_tx.send(TransportEvent::Failed(err.to_string()));
                        return;
                    }
                }
            }
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if let Err(err) = write.send(Message::Text(text)).await {
                            let _ = event_tx.send(TransportEvent::Failed(err.to_string()));
                            return;
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        return;
                    }
                }
            }
        }
    }
}
