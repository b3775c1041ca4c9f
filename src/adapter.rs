//! The adapter: composes transport, codec, request queue, session state,
//! breakpoint manager and filename index into the operations both front
//! ends (DAP and console) drive (spec.md §2 data flow, §4).

use crate::breakpoint::{BreakpointManager, BreakpointRecord, CurrentBreakpointLookup};
use crate::error::{Error, Result};
use crate::filenames::FilenameIndex;
use crate::protocol::{InboundEnvelope, OutboundEnvelope, TokenGenerator, TokenRegistry};
use crate::queue::RequestQueue;
use crate::session::SessionState;
use crate::transport::{self, Transport, TransportEvent};
use crate::{muted_error, weak_error};
use log::info;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// A break event or a mid-session transport failure, fanned out to
/// whichever front end owns the adapter (spec.md §4.1 "a mid-session close
/// raises a session ended signal").
pub enum AdapterEvent {
    Stopped { instance_ids: Vec<u64>, reason: &'static str },
    SessionEnded(String),
}

/// Result of a single `pump_one` step: either internal bookkeeping with
/// nothing for the front end, or an event the front end needs to see.
enum PumpOutcome {
    Progress,
    FrontEvent(AdapterEvent),
}

/// The shared core. Not `Clone`/`Sync`: per spec.md §5, all of session
/// state, the token registry and the breakpoint table are touched only
/// from the task that owns this struct.
pub struct Adapter {
    transport: Option<Transport>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    queue: RequestQueue,
    tokens: TokenGenerator,
    registry: TokenRegistry,
    pub session: SessionState,
    pub breakpoints: BreakpointManager,
    pub filenames: FilenameIndex,
    connected: bool,
    /// Break/session-ended events observed by [`request`](Adapter::request)
    /// while it was pumping the transport for an unrelated token, queued
    /// here for the next [`poll_event`](Adapter::poll_event) call. Without
    /// this, a break event arriving mid-request would be lost: `request`
    /// and `poll_event` share the one place that reads `transport_events`.
    pending_events: VecDeque<AdapterEvent>,
}

impl CurrentBreakpointLookup for SessionState {
    fn breakpoint_id_for_instance(&self, instance_id: u64) -> Option<u64> {
        self.instance(instance_id).map(|set| set.breakpoint_id)
    }
}

impl Adapter {
    pub fn new(token_prefix: impl Into<String>) -> Self {
        Self {
            transport: None,
            transport_events: None,
            queue: RequestQueue::new(),
            tokens: TokenGenerator::new(token_prefix),
            registry: TokenRegistry::new(),
            session: SessionState::new(),
            breakpoints: BreakpointManager::new(),
            filenames: FilenameIndex::new(),
            connected: false,
            pending_events: VecDeque::new(),
        }
    }

    /// Open the WebSocket to `host:port` (spec.md §4.1). Does not itself
    /// wait for `Connected`; callers that need the pre-connect queue to
    /// flush should await the first `poll_event()`.
    pub fn start(&mut self, host: &str, port: u16) {
        let url = format!("ws://{host}:{port}");
        let (transport, events) = transport::start(url);
        self.transport = Some(transport);
        self.transport_events = Some(events);
    }

    /// Send `payload` under a fresh `type: T` request, returning the
    /// resolved response payload (spec.md §4.2, §4.3).
    ///
    /// There is only one place that reads `transport_events` (`pump_one`),
    /// so a request awaiting its own token has to drive that pump itself
    /// rather than rely on some other concurrently-running loop to do it —
    /// nothing else is running concurrently on a single task. Break events
    /// and session-ended signals seen along the way are stashed in
    /// `pending_events` for the next `poll_event` call instead of being
    /// dropped.
    pub async fn request(&mut self, r#type: impl Into<String>, payload: Value) -> Result<Value> {
        let token = self.tokens.next_token();
        let envelope = OutboundEnvelope::new(r#type, token.clone(), payload);
        let mut rx = self.registry.register(token);
        self.send_raw(envelope.to_json());

        loop {
            match rx.try_recv() {
                Ok(resolved) => return resolved,
                Err(oneshot::error::TryRecvError::Closed) => return Err(Error::Cancelled),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            match self.pump_one().await {
                Some(PumpOutcome::FrontEvent(ev)) => self.pending_events.push_back(ev),
                Some(PumpOutcome::Progress) => {}
                None => return Err(Error::Cancelled),
            }
        }
    }

    /// Before `Connected`, every send is buffered here and flushed on
    /// connect; after, it goes straight to the transport (spec.md §4.3).
    fn send_raw(&mut self, text: String) {
        if self.connected {
            if let Some(t) = &self.transport {
                t.send(text);
                return;
            }
        }
        self.queue.push(text);
    }

    /// Wait for the initial TCP/WebSocket handshake to finish (spec.md §6:
    /// the console CLI fails fast if this doesn't happen before any
    /// request is sent). Returns once `Connected` has been observed; a
    /// connect failure surfaces as `Err`, never as a hang.
    ///
    /// This exists separately from `poll_event` because `Connected` is not
    /// itself a front event — `pump_one` treats it as bookkeeping (flush the
    /// pre-connect queue) and keeps looping. A caller that did
    /// `adapter.start(..); adapter.poll_event().await` to learn "are we
    /// connected yet" would block forever on a successful connect, since no
    /// further transport event arrives until *after* the first request is
    /// sent — which itself can't happen before the caller thinks it's
    /// connected. `wait_connected` stops at the right point instead.
    pub async fn wait_connected(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        loop {
            match self.pump_one().await {
                Some(PumpOutcome::Progress) if self.connected => return Ok(()),
                Some(PumpOutcome::Progress) => {}
                Some(PumpOutcome::FrontEvent(AdapterEvent::SessionEnded(reason))) => {
                    return Err(Error::SessionEnded(reason));
                }
                Some(PumpOutcome::FrontEvent(ev)) => self.pending_events.push_back(ev),
                None => return Err(Error::SessionEnded("transport closed before connecting".into())),
            }
        }
    }

    /// Drive the transport/session event loop. Must be polled continuously
    /// by the owning front end; returns `None` once the transport is gone
    /// for good.
    ///
    /// Drains anything [`request`](Adapter::request) buffered while it was
    /// pumping for its own token before pulling any new transport events, so
    /// break events surface in arrival order regardless of which call ended
    /// up reading them off the channel.
    pub async fn poll_event(&mut self) -> Option<AdapterEvent> {
        if let Some(ev) = self.pending_events.pop_front() {
            return Some(ev);
        }
        loop {
            match self.pump_one().await? {
                PumpOutcome::Progress => {}
                PumpOutcome::FrontEvent(ev) => return Some(ev),
            }
        }
    }

    /// Pull exactly one event off the transport and apply it: flush the
    /// queue on `Connected`, resolve a pending request or surface a break
    /// event on `Message`, and turn `Closed`/`Failed` into a session-ended
    /// front event. Returns `None` once the transport is gone for good.
    /// This is the single place that reads `transport_events` — both
    /// `poll_event` and `request` call through it so that neither can starve
    /// the other.
    async fn pump_one(&mut self) -> Option<PumpOutcome> {
        let events = self.transport_events.as_mut()?;
        let event = events.recv().await?;
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                if let Some(t) = &self.transport {
                    for payload in self.queue.drain() {
                        t.send(payload);
                    }
                }
                Some(PumpOutcome::Progress)
            }
            TransportEvent::Message(text) => match self.handle_inbound(&text) {
                Some(ev) => Some(PumpOutcome::FrontEvent(ev)),
                None => Some(PumpOutcome::Progress),
            },
            TransportEvent::Closed => {
                self.connected = false;
                Some(PumpOutcome::FrontEvent(AdapterEvent::SessionEnded(
                    "connection closed by server".into(),
                )))
            }
            TransportEvent::Failed(reason) => {
                self.connected = false;
                Some(PumpOutcome::FrontEvent(AdapterEvent::SessionEnded(reason)))
            }
        }
    }

    fn handle_inbound(&mut self, text: &str) -> Option<AdapterEvent> {
        let envelope = weak_error!(InboundEnvelope::parse(text), "protocol")?;

        if envelope.is_break_event() {
            return self.handle_break_event(envelope.payload);
        }

        self.registry.resolve(envelope);
        None
    }

    fn handle_break_event(&mut self, payload: Value) -> Option<AdapterEvent> {
        weak_error!(self.session.ingest_break_event(&payload), "protocol")?;
        let instance_ids = self.session.instance_ids_in_order();
        let reason = self
            .session
            .break_context
            .as_ref()
            .map(|ctx| ctx.reason.as_dap_str())
            .unwrap_or("breakpoint");
        info!(target: "breakpoint", "stopped at {}, {} instance(s)", reason, instance_ids.len());
        Some(AdapterEvent::Stopped { instance_ids, reason })
    }

    // ---------------------------------------------------------------- connection

    pub async fn connect(
        &mut self,
        db_filename: String,
        path_mapping: Option<(String, String)>,
    ) -> Result<()> {
        let mapping = path_mapping.map(|(src, dst)| json!({"src": src, "dst": dst}));
        let payload = json!({ "db_filename": db_filename, "path_mapping": mapping });
        self.request("connection", payload).await?;

        // Build the filename index once, right after connect, per spec.md
        // §3 "Filename index ... Built once from the server's file list
        // after connect." A failure here is non-fatal (bare-basename
        // resolution just keeps falling back to the raw name, per
        // `FilenameIndex::resolve`'s None case) so it's downgraded rather
        // than aborting an otherwise-successful connect.
        if let Some(files) = muted_error!(self.debugger_info("filenames").await, "adapter") {
            let files: Vec<String> = files
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            self.filenames = FilenameIndex::build(&files);
        }

        Ok(())
    }

    // ---------------------------------------------------------------- breakpoints

    /// spec.md §4.5 `verify`.
    pub async fn verify_breakpoint(
        &mut self,
        file: &str,
        line: u64,
        column: Option<u64>,
    ) -> Vec<BreakpointRecord> {
        let payload = json!({ "filename": file, "line_num": line, "column_num": column });
        let Some(response) = weak_error!(self.request("bp-location", payload).await, "breakpoint") else {
            return Vec::new();
        };
        let entries: Vec<BreakpointRecord> = response
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| {
                Some(BreakpointRecord {
                    id: v.get("id")?.as_u64()? as u32,
                    filename: file.to_string(),
                    line_num: v.get("line_num")?.as_u64()?,
                    column_num: v.get("column_num")?.as_u64()?,
                    valid: true,
                    condition: None,
                })
            })
            .collect();
        self.breakpoints.record_verified(entries)
    }

    /// spec.md §4.5 `setById`.
    pub async fn commit_breakpoint(&mut self, id: u32, condition: Option<String>) -> Result<()> {
        if self.breakpoints.set_condition(id, condition.clone()).is_none() {
            return Err(Error::BreakpointNotFound(id));
        }
        let payload = json!({ "id": id, "action": "add", "condition": condition });
        self.request("breakpoint-id", payload).await?;
        Ok(())
    }

    /// spec.md §4.5 `clearByFile`.
    pub async fn clear_breakpoints_in_file(&mut self, path: &str) -> Result<Vec<u32>> {
        let ids = self.breakpoints.clear_by_file(path);
        let payload = json!({ "filename": path, "action": "remove" });
        self.request("breakpoint", payload).await?;
        Ok(ids)
    }

    pub async fn remove_breakpoint(&mut self, id: u32) -> Result<()> {
        self.breakpoints.remove_by_id(id);
        let payload = json!({ "id": id, "action": "remove" });
        self.request("breakpoint-id", payload).await?;
        Ok(())
    }

    pub async fn add_data_breakpoint(
        &mut self,
        instance_id: u64,
        var_name: String,
        condition: Option<String>,
    ) -> Result<bool> {
        if !self
            .breakpoints
            .add_data_breakpoint(&self.session, instance_id, var_name.clone(), condition.clone())
        {
            return Ok(false);
        }
        let breakpoint_id = self
            .session
            .instance(instance_id)
            .map(|set| set.breakpoint_id)
            .ok_or(Error::NoBreakpointForInstance(instance_id))?;
        let payload = json!({
            "var_name": var_name,
            "breakpoint-id": breakpoint_id,
            "action": "add",
            "condition": condition,
        });
        self.request("data-breakpoint", payload).await?;
        Ok(true)
    }

    pub fn validate_data_breakpoint(&self, instance_id: u64) -> bool {
        self.breakpoints
            .validate_data_breakpoint(&self.session, instance_id)
    }

    pub async fn clear_data_breakpoints(&mut self) -> Result<()> {
        self.breakpoints.clear_data_breakpoints();
        self.request("data-breakpoint", json!({ "action": "clear" }))
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------- evaluation / variables

    /// spec.md §4.8 `evaluate`: forwarded with the current breakpoint id or
    /// an explicit instance scope (for `watch` context).
    pub async fn evaluate(
        &mut self,
        expression: String,
        breakpoint_id: u64,
        namespace_id: Option<u32>,
    ) -> Result<String> {
        let payload = json!({
            "breakpoint_id": breakpoint_id,
            "expression": expression,
            "namespace_id": namespace_id,
        });
        let response = self.request("evaluation", payload).await?;
        response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingField("result"))
    }

    /// spec.md §4.8 `setVariable`.
    pub async fn set_value(
        &mut self,
        var_name: String,
        value: i64,
        breakpoint_id: Option<u64>,
        instance_id: Option<u64>,
        namespace_id: Option<u32>,
    ) -> Result<()> {
        let payload = json!({
            "var_name": var_name,
            "value": value,
            "breakpoint_id": breakpoint_id,
            "instance_id": instance_id,
            "namespace_id": namespace_id,
        });
        self.request("set-value", payload).await?;
        Ok(())
    }

    // ---------------------------------------------------------------- flow control

    pub async fn send_command(&mut self, command: &'static str) -> Result<()> {
        self.request("command", json!({ "command": command })).await?;
        Ok(())
    }

    pub async fn continue_(&mut self) -> Result<()> {
        self.send_command("continue").await
    }

    pub async fn next(&mut self) -> Result<()> {
        self.send_command("step_over").await
    }

    pub async fn step_back(&mut self) -> Result<()> {
        self.send_command("step_back").await
    }

    pub async fn reverse_continue(&mut self) -> Result<()> {
        self.send_command("reverse_continue").await
    }

    pub async fn terminate(&mut self) -> Result<()> {
        self.send_command("stop").await
    }

    /// Time-travel jump, console-only (`go <time>`, spec.md §4.9).
    pub async fn go_to_time(&mut self, time: u64) -> Result<()> {
        self.request("command", json!({ "command": "go", "time": time }))
            .await?;
        Ok(())
    }

    pub async fn debugger_info(&mut self, command: &'static str) -> Result<Value> {
        self.request("debugger-info", json!({ "command": command })).await
    }

    pub fn break_context(&self) -> Option<&crate::session::BreakContext> {
        self.session.break_context.as_ref()
    }

    /// `(breakpoint_id, namespace_id)` of the console's currently selected
    /// instance, for `p`/`set` (spec.md §4.9). Fails the way §8's boundary
    /// behavior requires: "`set var=value` ... rejects when the current
    /// scope's breakpoint id is absent."
    pub fn current_scope_ids(&self) -> Result<(u64, u32)> {
        let ctx = self.break_context().ok_or(Error::NoScopeForSet)?;
        let instance_id = self.session.current_instance_id().ok_or(Error::NoScopeForSet)?;
        let set = self.session.instance(instance_id).ok_or(Error::NoScopeForSet)?;
        Ok((set.breakpoint_id, ctx.namespace_id))
    }
}
