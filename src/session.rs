//! Session state: the last known break context and per-instance frame sets
//! (spec.md §3 "Instance frame set" / "Break context", §4.4).

use crate::ids::pack_namespaced;
use crate::variable::{build_tree, VarNode};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointKind {
    Normal,
    Data,
}

/// One scope entry within an instance's frame list: the instance's locals
/// and generator variables, already dot-normalized (spec.md §4.6).
#[derive(Clone)]
pub struct Scope {
    pub local: VarNode,
    pub generator: VarNode,
}

/// All scopes currently attributed to one hardware instance.
pub struct InstanceFrameSet {
    pub instance_name: String,
    pub breakpoint_id: u64,
    pub namespace_id: u32,
    pub bp_type: BreakpointKind,
    pub scopes: Vec<Scope>,
}

/// The last known break context (spec.md §3).
pub struct BreakContext {
    pub filename: String,
    pub line_num: u64,
    pub column_num: u64,
    pub time: u64,
    pub current_instance_index: usize,
    pub current_scope_breakpoint_id: u64,
    pub namespace_id: u32,
    pub set_values: HashSet<String>,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    DataBreakpoint,
    Exception,
}

impl StopReason {
    pub fn as_dap_str(&self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::DataBreakpoint => "data breakpoint",
            StopReason::Exception => "exception",
        }
    }
}

/// Owns the session's mutable break state. Rebuilt atomically on every
/// break event (spec.md §3, "Instance frame set" lifecycle).
#[derive(Default)]
pub struct SessionState {
    pub break_context: Option<BreakContext>,
    /// Composite instance id (per §3) → that instance's frame set, in the
    /// order instances first appeared in the break payload.
    pub instances: IndexMap<u64, InstanceFrameSet>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a `breakpoint` server message, per spec.md §4.4.
    ///
    /// Expects `payload` shaped as:
    /// ```json
    /// {
    ///   "filename": "...", "line_num": 1, "column_num": 1, "time": 0,
    ///   "exception": false,
    ///   "instances": [
    ///     {"instance_id": 1, "namespace_id": 0, "instance_name": "...",
    ///      "breakpoint_id": 3, "bp_type": "normal",
    ///      "local": {"a": "1"}, "generator": {}}
    ///   ]
    /// }
    /// ```
    pub fn ingest_break_event(&mut self, payload: &Value) -> Result<(), crate::error::Error> {
        self.instances.clear();

        let filename = field_str(payload, "filename")?;
        let line_num = field_u64(payload, "line_num")?;
        let column_num = field_u64(payload, "column_num")?;
        let time = field_u64(payload, "time")?;
        let is_exception = payload
            .get("exception")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let raw_instances = payload
            .get("instances")
            .and_then(Value::as_array)
            .ok_or(crate::error::Error::MissingField("instances"))?;

        let mut any_data_bp = false;
        for raw in raw_instances {
            let instance_id = field_u64(raw, "instance_id")?;
            let namespace_id = field_u64(raw, "namespace_id").unwrap_or(0) as u32;
            let composite_id = pack_namespaced(namespace_id, instance_id as u32);

            let instance_name = field_str(raw, "instance_name")?;
            let breakpoint_id = field_u64(raw, "breakpoint_id")?;
            let bp_type = match raw.get("bp_type").and_then(Value::as_str) {
                Some("data") => BreakpointKind::Data,
                _ => BreakpointKind::Normal,
            };
            if bp_type == BreakpointKind::Data {
                any_data_bp = true;
            }

            let local = build_tree(&flat_map(raw, "local"));
            let generator = build_tree(&flat_map(raw, "generator"));
            let scope = Scope { local, generator };

            self.instances
                .entry(composite_id)
                .and_modify(|set| set.scopes.push(scope.clone()))
                .or_insert_with(|| InstanceFrameSet {
                    instance_name: instance_name.clone(),
                    breakpoint_id,
                    namespace_id,
                    bp_type: bp_type.clone(),
                    scopes: vec![scope],
                });
        }

        let reason = if is_exception {
            StopReason::Exception
        } else if any_data_bp {
            StopReason::DataBreakpoint
        } else {
            StopReason::Breakpoint
        };

        let (current_scope_breakpoint_id, namespace_id) = self
            .instances
            .values()
            .next()
            .map(|set| (set.breakpoint_id, set.namespace_id))
            .unwrap_or((0, 0));

        self.break_context = Some(BreakContext {
            filename,
            line_num,
            column_num,
            time,
            current_instance_index: 0,
            current_scope_breakpoint_id,
            namespace_id,
            set_values: HashSet::new(),
            reason,
        });

        Ok(())
    }

    /// One synthetic DAP thread id per instance, in insertion order
    /// (spec.md §4.7, §4.8 "threads").
    pub fn instance_ids_in_order(&self) -> Vec<u64> {
        self.instances.keys().copied().collect()
    }

    pub fn instance(&self, composite_id: u64) -> Option<&InstanceFrameSet> {
        self.instances.get(&composite_id)
    }

    pub fn current_instance_id(&self) -> Option<u64> {
        let idx = self.break_context.as_ref()?.current_instance_index;
        self.instances.keys().nth(idx).copied()
    }

    /// Re-derive `current_scope_breakpoint_id`/`namespace_id` after
    /// `current_instance_index` changes (console `thread <iid>`, spec.md
    /// §4.9).
    pub fn sync_current_scope_ids(&mut self) {
        let Some(iid) = self.current_instance_id() else { return };
        let Some(set) = self.instances.get(&iid) else { return };
        let (breakpoint_id, namespace_id) = (set.breakpoint_id, set.namespace_id);
        if let Some(ctx) = &mut self.break_context {
            ctx.current_scope_breakpoint_id = breakpoint_id;
            ctx.namespace_id = namespace_id;
        }
    }
}

fn field_str(v: &Value, field: &'static str) -> Result<String, crate::error::Error> {
    v.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(crate::error::Error::MissingField(field))
}

fn field_u64(v: &Value, field: &'static str) -> Result<u64, crate::error::Error> {
    v.get(field)
        .and_then(Value::as_u64)
        .ok_or(crate::error::Error::MissingField(field))
}

fn flat_map(v: &Value, field: &str) -> HashMap<String, String> {
    v.get(field)
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}
