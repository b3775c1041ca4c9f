//! DAP-facing surface: wire framing, per-request handlers, and the
//! request/event loop that ties them to an [`Adapter`](crate::adapter::Adapter).

pub mod handlers;
pub mod protocol;

use crate::adapter::{Adapter, AdapterEvent};
use crate::dap::handlers::DapState;
use crate::dap::protocol::{DapEvent, DapRequest, DapResponse, Framed};
use log::{error, info};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};

/// Drives one DAP client connection: reads requests, dispatches them to
/// `handlers::*`, and forwards adapter-originated break/session events as
/// DAP `stopped`/`terminated` events (spec.md §4.8, §2 data flow).
pub struct DapServer<R, W> {
    io: Framed<R, W>,
    adapter: Adapter,
    state: DapState,
    seq: i64,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> DapServer<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Framed::new(reader, writer),
            adapter: Adapter::new("dap-"),
            state: DapState::default(),
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                request = self.io.read_message() => {
                    match request {
                        Ok(Some(value)) => {
                            if let Err(err) = self.dispatch(value).await {
                                error!(target: "dap", "dispatch failed: {err}");
                            }
                        }
                        Ok(None) => return,
                        Err(err) => {
                            error!(target: "dap", "read error: {err}");
                            return;
                        }
                    }
                }
                event = self.adapter.poll_event() => {
                    match event {
                        Some(AdapterEvent::Stopped { instance_ids, reason }) => {
                            for instance_id in instance_ids {
                                let seq = self.next_seq();
                                let body = json!({
                                    "reason": reason,
                                    "threadId": instance_id,
                                    "allThreadsStopped": true,
                                });
                                let _ = self.io.write_message(&DapEvent::new(seq, "stopped", Some(body))).await;
                            }
                        }
                        Some(AdapterEvent::SessionEnded(reason)) => {
                            info!(target: "dap", "session ended: {reason}");
                            let seq = self.next_seq();
                            let _ = self.io.write_message(&DapEvent::new(seq, "terminated", None)).await;
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, raw: Value) -> std::io::Result<()> {
        let request: DapRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };

        let result = self.handle_command(&request).await;

        // A `cancel` targeting this very request_seq may have been queued
        // while it was in flight (spec.md §4.8 `cancel`, §5 "best-effort
        // attempt to suppress emitting its response"). Checked once, right
        // before the response would go out, and cleared either way.
        if self.state.cancelled.remove(&request.seq) {
            return Ok(());
        }

        let seq = self.next_seq();
        let response = match result {
            Ok(body) => DapResponse::success(seq, &request, body),
            Err(err) => DapResponse::error(seq, &request, err),
        };
        self.io.write_message(&response).await
    }

    async fn handle_command(&mut self, request: &DapRequest) -> Result<Option<Value>, String> {
        let args = &request.arguments;
        match request.command.as_str() {
            "launch" => {
                let (program, ip, port, mapping) = handlers::parse_launch_args(args);
                self.state.path_mapping = mapping;
                handlers::handle_launch(&mut self.adapter, program, &ip, port)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            "setBreakpoints" => {
                let file = args["source"]["path"].as_str().unwrap_or_default().to_string();
                let requested = args["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|bp| {
                        (
                            bp["line"].as_u64().unwrap_or(1),
                            bp["column"].as_u64(),
                            bp["condition"].as_str().map(str::to_string),
                        )
                    })
                    .collect::<Vec<_>>();
                let body = handlers::handle_set_breakpoints(&mut self.adapter, &self.state, &file, &requested)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Some(body))
            }
            "breakpointLocations" => {
                let file = args["source"]["path"].as_str().unwrap_or_default().to_string();
                let line = args["line"].as_u64().unwrap_or(1);
                Ok(Some(handlers::handle_breakpoint_locations(&self.adapter, &self.state, &file, line).await))
            }
            "threads" => Ok(Some(handlers::handle_threads(&self.adapter))),
            "stackTrace" => {
                let instance_id = args["threadId"].as_u64().unwrap_or(0);
                handlers::handle_stack_trace(&self.adapter, instance_id)
                    .map(Some)
                    .map_err(|e| e.to_string())
            }
            "scopes" => {
                let frame_id = args["frameId"].as_i64().unwrap_or(0);
                let mut body = handlers::handle_scopes(frame_id);
                if let Some(scopes) = body["scopes"].as_array_mut() {
                    for scope in scopes {
                        let kind = scope["__kind"].as_str().unwrap_or("local").to_string();
                        let instance_id = scope["__instance_id"].as_u64().unwrap_or(0);
                        let stack_index = scope["__stack_index"].as_u64().unwrap_or(0);
                        let reference =
                            handlers::alloc_scope_reference(&mut self.state, &kind, instance_id, stack_index);
                        scope["variablesReference"] = json!(reference);
                        if let Some(obj) = scope.as_object_mut() {
                            obj.remove("__kind");
                            obj.remove("__instance_id");
                            obj.remove("__stack_index");
                        }
                    }
                }
                Ok(Some(body))
            }
            "variables" => {
                let reference = args["variablesReference"].as_i64().unwrap_or(0);
                handlers::handle_variables(&self.adapter, &mut self.state, reference)
                    .map(Some)
                    .map_err(|e| e.to_string())
            }
            "setVariable" => {
                let reference = args["variablesReference"].as_i64().unwrap_or(0);
                let name = args["name"].as_str().unwrap_or_default();
                let value = args["value"].as_str().unwrap_or_default();
                handlers::handle_set_variable(&mut self.adapter, &self.state, reference, name, value)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            "evaluate" => {
                let expression = args["expression"].as_str().unwrap_or_default().to_string();
                let frame_id = args["frameId"].as_i64();
                let result = handlers::handle_evaluate(&mut self.adapter, expression, frame_id)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(Some(json!({ "result": result, "variablesReference": 0 })))
            }
            "dataBreakpointInfo" => {
                let variables_reference = args["variablesReference"].as_i64().unwrap_or(0);
                let name = args["name"].as_str().unwrap_or_default().to_string();
                Ok(Some(handlers::handle_data_breakpoint_info(
                    &self.adapter,
                    &self.state,
                    variables_reference,
                    name,
                )))
            }
            "setDataBreakpoints" => {
                let requests = args["breakpoints"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|bp| {
                        let (instance_id, name) = bp["dataId"].as_str()?.split_once(':')?;
                        Some((
                            instance_id.parse().ok()?,
                            name.to_string(),
                            bp["condition"].as_str().map(str::to_string),
                        ))
                    })
                    .collect::<Vec<_>>();
                handlers::handle_set_data_breakpoints(&mut self.adapter, requests)
                    .await
                    .map(Some)
                    .map_err(|e| e.to_string())
            }
            "continue" => self.adapter.continue_().await.map(|_| None).map_err(|e| e.to_string()),
            "next" => self.adapter.next().await.map(|_| None).map_err(|e| e.to_string()),
            "stepBack" => self.adapter.step_back().await.map(|_| None).map_err(|e| e.to_string()),
            "reverseContinue" => self
                .adapter
                .reverse_continue()
                .await
                .map(|_| None)
                .map_err(|e| e.to_string()),
            "terminate" => self.adapter.terminate().await.map(|_| None).map_err(|e| e.to_string()),
            "cancel" => {
                if let Some(request_id) = args["requestId"].as_i64() {
                    self.state.cancelled.insert(request_id);
                }
                Ok(None)
            }
            other => Err(format!("unsupported request: {other}")),
        }
    }
}
