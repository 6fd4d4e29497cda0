//! The message bus: pending queue, routing table, and edge evaluation.
//!
//! The bus owns the queue of pending [`StepMessage`]s and the routing table
//! that turns emitted events into new messages. The table is built once, at
//! bus construction, and is immutable afterwards:
//!
//! - process-level edges are indexed under `"{process_id}.{event}"`,
//! - each step's edges under `"{step_name}_{run_id}.{event}"`,
//! - nested processes are folded in recursively, so a parent bus can route
//!   events addressed to any descendant.
//!
//! Step namespaces embed run ids and process namespaces are authored names,
//! so the two families share one key space without collision.
//!
//! The queue is the only mutable hot path. It is guarded by a mutex so that
//! step code emitting mid-superstep (through its
//! [`StepContext`](crate::context::StepContext)) serializes cleanly against
//! the orchestrator's drain; the orchestrator remains the sole consumer.

use crate::context::ProcessContext;
use crate::definition::{ProcessInfo, StepInfo, StepNode};
use crate::edge::{Edge, OutputTarget, StateOp};
use crate::event::{ProcessEvent, GLOBAL_ERROR_EVENT};
use crate::group::EdgeGroup;
use crate::message::{
    StepMessage, AGENT_INVOKE_ENTRY_POINT, EMIT_SINK_ID, END_STEP_ID, SUBPROCESS_ENTRY_POINT,
};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Coarse kind of each routable destination, recorded at construction so
/// message materialization can special-case sub-process targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Function,
    Process,
    Map,
    Proxy,
    Agent,
}

impl StepKind {
    fn of(step: &StepInfo) -> Self {
        match &step.node {
            StepNode::Function { .. } => Self::Function,
            StepNode::Process(_) => Self::Process,
            StepNode::Map { .. } => Self::Map,
            StepNode::Proxy { .. } => Self::Proxy,
            StepNode::Agent { .. } => Self::Agent,
        }
    }
}

/// Maintains the pending message queue, the edge routing table, and the
/// registered edge groups for one process instance.
pub struct MessageBus {
    process_id: String,
    /// Qualified event id to edge list. Immutable after construction.
    routes: HashMap<String, Vec<Edge>>,
    /// Fallback list for error events with no matching edges.
    error_routes: Vec<Edge>,
    step_kinds: HashMap<String, StepKind>,
    groups: RwLock<HashMap<String, EdgeGroup>>,
    pending: Mutex<VecDeque<StepMessage>>,
    /// Public events that found no route; drained by the sub-process
    /// wrapper for upward forwarding. Empty unless collection is enabled.
    unrouted_public: Mutex<Vec<ProcessEvent>>,
    collect_unrouted: bool,
}

impl MessageBus {
    /// Build the routing table for a process. `collect_unrouted` is enabled
    /// by the sub-process wrapper so unconsumed public child events can be
    /// re-emitted against the parent bus.
    pub fn new(process: &ProcessInfo, collect_unrouted: bool) -> Self {
        let mut routes: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut step_kinds = HashMap::new();
        Self::fold_process(process, &mut routes, &mut step_kinds);

        let error_routes = process
            .edges
            .get(GLOBAL_ERROR_EVENT)
            .cloned()
            .unwrap_or_default();

        Self {
            process_id: process.id.clone(),
            routes,
            error_routes,
            step_kinds,
            groups: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            unrouted_public: Mutex::new(Vec::new()),
            collect_unrouted,
        }
    }

    fn fold_process(
        process: &ProcessInfo,
        routes: &mut HashMap<String, Vec<Edge>>,
        step_kinds: &mut HashMap<String, StepKind>,
    ) {
        for (event, edges) in &process.edges {
            let key = format!("{}.{}", process.id, event);
            routes.entry(key).or_default().extend(edges.iter().cloned());
        }
        for step in &process.steps {
            step_kinds.insert(step.step_id.clone(), StepKind::of(step));
            let namespace = crate::event::step_namespace(&step.step_id, &step.run_id);
            for (event, edges) in &step.edges {
                let key = format!("{namespace}.{event}");
                routes.entry(key).or_default().extend(edges.iter().cloned());
            }
            if let StepNode::Process(child) = &step.node {
                Self::fold_process(child, routes, step_kinds);
            }
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Kind of a routable destination, if it is part of this process tree.
    pub fn step_kind(&self, step_id: &str) -> Option<StepKind> {
        self.step_kinds.get(step_id).copied()
    }

    /// Route an emitted event: apply the context's event filter, find the
    /// edge list for the qualified id (falling back to the global error
    /// list for unhandled error events), evaluate conditions, and enqueue a
    /// message per matched edge.
    pub fn emit_event(&self, event: &ProcessEvent, ctx: &ProcessContext) {
        if let Some(filter) = &ctx.event_filter {
            if !filter(event) {
                debug!(event = %event.qualified_id(), "event filtered before routing");
                return;
            }
        }

        let qualified_id = event.qualified_id();
        let edges = match self.routes.get(&qualified_id) {
            Some(edges) => edges.as_slice(),
            None if event.is_error && !self.error_routes.is_empty() => {
                self.error_routes.as_slice()
            }
            None => {
                self.handle_unrouted(event, &qualified_id);
                return;
            }
        };

        // Conditions see one consistent snapshot of the process state.
        let state = ctx.state_snapshot();
        let matched: Vec<&Edge> = edges
            .iter()
            .filter(|e| !e.condition.is_default() && e.condition.evaluate(event, &state))
            .collect();
        let chosen: Vec<&Edge> = if matched.is_empty() {
            edges.iter().filter(|e| e.condition.is_default()).collect()
        } else {
            matched
        };

        if chosen.is_empty() {
            self.handle_unrouted(event, &qualified_id);
            return;
        }

        for edge in chosen {
            self.materialize(edge, event, &qualified_id, ctx);
        }
    }

    fn handle_unrouted(&self, event: &ProcessEvent, qualified_id: &str) {
        if event.is_error {
            warn!(event = %qualified_id, "unhandled error event; dropping");
        } else if self.collect_unrouted && event.is_public() {
            self.unrouted_public
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
        } else {
            debug!(event = %qualified_id, "no edges for event; discarding");
        }
    }

    /// Turn one matched edge into a pending message (or apply it directly,
    /// for state-update targets).
    fn materialize(&self, edge: &Edge, event: &ProcessEvent, qualified_id: &str, ctx: &ProcessContext) {
        match &edge.target {
            OutputTarget::Function {
                step_id,
                function_name,
                parameter_name,
            } => {
                let mut message = if self.step_kind(step_id) == Some(StepKind::Process) {
                    StepMessage::new(&event.source_id, step_id, SUBPROCESS_ENTRY_POINT, qualified_id)
                        .with_target_event(function_name.clone())
                } else {
                    StepMessage::new(&event.source_id, step_id, function_name, qualified_id)
                };
                message = message
                    .with_data(event.data.clone())
                    .with_thread_id(event.thread_id.clone());
                if let Some(name) = parameter_name {
                    if let Some(data) = &event.data {
                        message = message.with_parameter(name, data.clone());
                    }
                }
                if let Some(group_id) = &edge.group_id {
                    message = message.with_group(group_id);
                }
                self.enqueue(message);
            }
            OutputTarget::StateUpdate { path, op } => {
                match ctx.state.write() {
                    Ok(mut state) => apply_state_update(&mut state, path, *op, event.data.as_ref()),
                    Err(_) => warn!(%path, "process state lock poisoned; skipping update"),
                }
            }
            OutputTarget::Emit { topic, channel_key } => {
                let mut message =
                    StepMessage::new(&event.source_id, EMIT_SINK_ID, topic, qualified_id)
                        .with_data(event.data.clone());
                if let Some(key) = channel_key {
                    message = message.with_parameter("channel_key", Value::String(key.clone()));
                }
                self.enqueue(message);
            }
            OutputTarget::AgentInvoke { step_id, thread_id } => {
                let thread = thread_id.clone().or_else(|| event.thread_id.clone());
                let message =
                    StepMessage::new(&event.source_id, step_id, AGENT_INVOKE_ENTRY_POINT, qualified_id)
                        .with_data(event.data.clone())
                        .with_thread_id(thread);
                self.enqueue(message);
            }
            OutputTarget::End => {
                let message = StepMessage::new(&event.source_id, END_STEP_ID, "", qualified_id)
                    .with_data(event.data.clone());
                self.enqueue(message);
            }
        }
    }

    /// Inject an external event. The event's namespace must already be the
    /// target process id; routing is identical to internal emission.
    pub fn add_external_event(&self, event: ProcessEvent, ctx: &ProcessContext) {
        debug!(event = %event.qualified_id(), "external event received");
        self.emit_event(&event, ctx);
    }

    /// O(1) append to the pending queue.
    pub fn enqueue(&self, message: StepMessage) {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(message);
    }

    /// Atomically take the queue's current contents. Called once per
    /// superstep by the single consuming orchestrator.
    pub fn drain_pending(&self) -> Vec<StepMessage> {
        let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *pending).into()
    }

    /// Make an edge group discoverable by id.
    pub fn register_edge_group(&self, group: EdgeGroup) {
        self.groups
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(group.group_id.clone(), group);
    }

    pub fn edge_group(&self, group_id: &str) -> Option<EdgeGroup> {
        self.groups
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(group_id)
            .cloned()
    }

    /// Drain the public events that found no internal route. Used by the
    /// sub-process wrapper to forward them to the parent bus.
    pub fn take_unrouted_public(&self) -> Vec<ProcessEvent> {
        std::mem::take(&mut *self.unrouted_public.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("process_id", &self.process_id)
            .field("routes", &self.routes.len())
            .field("error_routes", &self.error_routes.len())
            .finish()
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !matches!(value, Value::Object(_)) {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Apply a state-update edge target to the shared process state.
fn apply_state_update(state: &mut Value, path: &str, op: StateOp, data: Option<&Value>) {
    let mut segments = path.split('.').peekable();
    let mut current = state;
    let mut leaf = String::new();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            leaf = segment.to_string();
            break;
        }
        current = ensure_object(current)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    let slot = ensure_object(current).entry(leaf).or_insert(Value::Null);

    match op {
        StateOp::Set => {
            *slot = data.cloned().unwrap_or(Value::Null);
        }
        StateOp::Append => {
            if !matches!(slot, Value::Array(_)) {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                items.push(data.cloned().unwrap_or(Value::Null));
            }
        }
        StateOp::Increment | StateOp::Decrement => {
            let sign = if op == StateOp::Increment { 1 } else { -1 };
            // Integer arithmetic when both sides are integral, floats
            // otherwise.
            let int_slot = if slot.is_null() {
                Some(0)
            } else {
                slot.as_i64()
            };
            // Non-numeric payloads fall back to the default step of one.
            let int_delta = match data {
                None => Some(1),
                Some(value) if !value.is_number() => Some(1),
                Some(value) => value.as_i64(),
            };
            if let (Some(current), Some(delta)) = (int_slot, int_delta) {
                *slot = Value::from(current + sign * delta);
            } else {
                let current = slot.as_f64().unwrap_or(0.0);
                let delta = data.and_then(Value::as_f64).unwrap_or(1.0);
                *slot = serde_json::json!(current + (sign as f64) * delta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_update_set_creates_nested_paths() {
        let mut state = json!({});
        apply_state_update(&mut state, "stats.last", StateOp::Set, Some(&json!("Go")));
        assert_eq!(state, json!({"stats": {"last": "Go"}}));
    }

    #[test]
    fn state_update_append_builds_arrays() {
        let mut state = json!({});
        apply_state_update(&mut state, "log", StateOp::Append, Some(&json!(1)));
        apply_state_update(&mut state, "log", StateOp::Append, Some(&json!(2)));
        assert_eq!(state, json!({"log": [1, 2]}));
    }

    #[test]
    fn state_update_increment_defaults_to_one() {
        let mut state = json!({"count": 4});
        apply_state_update(&mut state, "count", StateOp::Increment, None);
        assert_eq!(state, json!({"count": 5}));

        apply_state_update(&mut state, "count", StateOp::Decrement, Some(&json!(2)));
        assert_eq!(state, json!({"count": 3}));
    }

    #[test]
    fn state_update_falls_back_to_float_arithmetic() {
        let mut state = json!({"score": 1.5});
        apply_state_update(&mut state, "score", StateOp::Increment, Some(&json!(0.5)));
        assert_eq!(state["score"].as_f64(), Some(2.0));
    }
}
