//! Wire codec and token registry (spec.md §4.2).
//!
//! Outbound envelope: `{"request": true, "type": T, "token": S, "payload": P}`.
//! Inbound envelope has at minimum `status`, and optionally `token`, `type`,
//! `payload`. Dispatch rule: a `type == "breakpoint"` message is always a
//! server-initiated break event, regardless of token; everything else is
//! resolved against the token registry and dropped silently if no token
//! matches.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

pub const BREAKPOINT_EVENT_TYPE: &str = "breakpoint";

#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    pub request: bool,
    #[serde(rename = "type")]
    pub r#type: String,
    pub token: String,
    pub payload: Value,
}

impl OutboundEnvelope {
    pub fn new(r#type: impl Into<String>, token: impl Into<String>, payload: Value) -> Self {
        Self {
            request: true,
            r#type: r#type.into(),
            token: token.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> String {
        // Infallible: every field is a plain string/bool/Value.
        serde_json::to_string(self).expect("envelope always serializes")
    }
}

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub token: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl InboundEnvelope {
    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_break_event(&self) -> bool {
        self.r#type.as_deref() == Some(BREAKPOINT_EVENT_TYPE)
    }

    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }

    pub fn reason(&self) -> String {
        self.payload
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// Sequential, per-session monotonic token generator, optionally tagged
/// with a front-end prefix to avoid collisions when multiple adapters
/// share a server (spec.md §4.2).
pub struct TokenGenerator {
    prefix: String,
    next: AtomicU64,
}

impl TokenGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn next_token(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}

type Waiter = oneshot::Sender<Result<Value, Error>>;

/// Correlates outbound requests to their eventual response by token.
///
/// Each token resolves at most once and is removed from the table on
/// resolution (spec.md §3, Token registry entry invariants).
#[derive(Default)]
pub struct TokenRegistry {
    waiters: HashMap<String, Waiter>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuation for `token`, returning the receiver half the
    /// caller should await.
    pub fn register(&mut self, token: String) -> oneshot::Receiver<Result<Value, Error>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(token, tx);
        rx
    }

    /// Resolve `envelope`'s token against the registry. Does nothing
    /// (drops the frame silently) if there is no matching waiter, per
    /// spec.md §4.2.
    pub fn resolve(&mut self, envelope: InboundEnvelope) {
        let Some(token) = envelope.token.clone() else {
            return;
        };
        let Some(waiter) = self.waiters.remove(&token) else {
            return;
        };
        let result = if envelope.is_error() {
            Err(Error::RequestFailed(envelope.reason()))
        } else {
            Ok(envelope.payload)
        };
        let _ = waiter.send(result);
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_generator_is_monotonic_and_prefixed() {
        let gen = TokenGenerator::new("vscode-");
        assert_eq!(gen.next_token(), "vscode-0");
        assert_eq!(gen.next_token(), "vscode-1");
    }

    #[tokio::test]
    async fn resolve_matches_waiter_by_token_and_removes_it() {
        let mut registry = TokenRegistry::new();
        let rx = registry.register("t1".into());
        assert_eq!(registry.pending_count(), 1);

        registry.resolve(InboundEnvelope {
            r#type: None,
            token: Some("t1".into()),
            status: Some("success".into()),
            payload: serde_json::json!({"x": 1}),
        });

        assert_eq!(registry.pending_count(), 0);
        let payload = rx.await.unwrap().unwrap();
        assert_eq!(payload["x"], 1);
    }

    #[tokio::test]
    async fn resolve_with_unknown_token_is_dropped_silently() {
        let mut registry = TokenRegistry::new();
        let _rx = registry.register("t1".into());

        registry.resolve(InboundEnvelope {
            r#type: None,
            token: Some("other".into()),
            status: Some("success".into()),
            payload: Value::Null,
        });

        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn resolve_error_status_fails_the_waiter() {
        let mut registry = TokenRegistry::new();
        let rx = registry.register("t1".into());

        registry.resolve(InboundEnvelope {
            r#type: None,
            token: Some("t1".into()),
            status: Some("error".into()),
            payload: serde_json::json!({"reason": "bad file"}),
        });

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::RequestFailed(r) if r == "bad file"));
    }

    #[test]
    fn break_event_is_recognized_by_type_regardless_of_token() {
        let env = InboundEnvelope {
            r#type: Some("breakpoint".into()),
            token: Some("t1".into()),
            status: None,
            payload: Value::Null,
        };
        assert!(env.is_break_event());
    }
}
