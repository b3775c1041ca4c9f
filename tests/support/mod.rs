//! In-process mock hgdb server: accepts one WebSocket connection and lets a
//! test script requests/push break events without a real simulator
//! (SPEC_FULL.md "Test tooling").

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub struct MockServer {
    pub port: u16,
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MockServer {
    /// Bind an ephemeral port and spawn the task that accepts exactly one
    /// connection and pumps frames to/from the two channels.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local_addr").port();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => return,
            };
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(v) = serde_json::from_str::<Value>(&text) {
                                    if in_tx.send(v).is_err() {
                                        break;
                                    }
                                }
                            }
                            _ => break,
                        }
                    }
                    outgoing = out_rx.recv() => {
                        match outgoing {
                            Some(text) => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Self { port, incoming: in_rx, outgoing: out_tx }
    }

    /// Wait for the next request frame the adapter sent, parsed back to JSON.
    pub async fn recv_request(&mut self) -> Value {
        self.incoming.recv().await.expect("adapter never sent a request")
    }

    pub fn reply(&self, token: &str, payload: Value) {
        self.send(json!({ "status": "success", "token": token, "payload": payload }));
    }

    pub fn reply_error(&self, token: &str, reason: &str) {
        self.send(json!({ "status": "error", "token": token, "payload": { "reason": reason } }));
    }

    /// Push an unsolicited `breakpoint` break event (no token).
    pub fn push_break(&self, payload: Value) {
        self.send(json!({ "type": "breakpoint", "payload": payload }));
    }

    fn send(&self, v: Value) {
        let _ = self.outgoing.send(v.to_string());
    }
}

/// A single-instance break payload with one flat local variable map, as
/// sent in spec.md §8 scenario S1.
pub fn single_instance_break(instance_id: u64, breakpoint_id: u64, local: Value) -> Value {
    json!({
        "filename": "/tmp/test.py",
        "line_num": 1,
        "column_num": 1,
        "time": 0,
        "instances": [
            {
                "instance_id": instance_id,
                "namespace_id": 0,
                "instance_name": format!("inst{instance_id}"),
                "breakpoint_id": breakpoint_id,
                "bp_type": "normal",
                "local": local,
                "generator": {},
            }
        ]
    })
}
