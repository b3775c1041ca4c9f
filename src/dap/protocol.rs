//! DAP wire envelopes and `Content-Length`-framed I/O.
//!
//! Grounded in the teacher's hand-rolled `DapRequest`/`DapResponse`/
//! `DapEvent` (src/bin/bs_dap.rs) and its stdio/TCP `DapTransport` split
//! (src/dap/transport.rs), adapted to async since the adapter itself is
//! the fully async piece (the DAP dispatcher wiring is explicitly out of
//! scope per spec.md §1 — this module only frames messages and defines
//! the raw envelope shapes).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapResponse {
    pub fn success(seq: i64, request: &DapRequest, body: Option<Value>) -> Self {
        Self {
            seq,
            r#type: "response",
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    pub fn error(seq: i64, request: &DapRequest, message: impl ToString) -> Self {
        Self {
            seq,
            r#type: "response",
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapEvent {
    pub fn new(seq: i64, event: &'static str, body: Option<Value>) -> Self {
        Self {
            seq,
            r#type: "event",
            event,
            body,
        }
    }
}

/// Content-Length-framed read/write over any async byte stream: stdio in
/// embedded mode, TCP in server mode (spec.md §6 `dapPort`).
pub struct Framed<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Framed<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn read_message(&mut self) -> std::io::Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = v.trim().parse().ok();
            }
        }

        let len = content_length.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "missing Content-Length header")
        })?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        let value: Value = serde_json::from_slice(&buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(value))
    }

    pub async fn write_message<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message_through_a_byte_buffer() {
        let msg = serde_json::json!({"seq": 1, "type": "request", "command": "threads"});
        let payload = serde_json::to_vec(&msg).unwrap();
        let framed_bytes = format!(
            "Content-Length: {}\r\n\r\n{}",
            payload.len(),
            String::from_utf8(payload).unwrap()
        );

        let mut framed = Framed::new(framed_bytes.as_bytes(), Vec::new());
        let read = framed.read_message().await.unwrap().unwrap();
        assert_eq!(read["command"], "threads");
    }

    #[tokio::test]
    async fn write_message_emits_content_length_header() {
        let mut out = Vec::new();
        {
            let mut framed = Framed::new(tokio::io::empty(), &mut out);
            framed
                .write_message(&serde_json::json!({"a": 1}))
                .await
                .unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Content-Length: "));
        assert!(text.ends_with("{\"a\":1}"));
    }
}
