//! Process and step definitions.
//!
//! The authored shape of a process: a tree of [`StepInfo`] records whose
//! inner step kind is the tagged [`StepNode`] variant - function, nested
//! process, map, proxy, or agent. Step behavior (handlers) is resolved by
//! name through the [`StepRegistry`](crate::registry::StepRegistry) when the
//! orchestrator materializes the process, so definitions stay plain data
//! apart from edge conditions and input mappings.

use crate::edge::Edge;
use crate::group::EdgeGroup;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Default step definition version recorded on persisted state.
pub const DEFAULT_STEP_VERSION: &str = "v1";

/// External topic route declared on a proxy step.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub topic: String,
    pub channel_key: Option<String>,
}

/// The concrete kind of a step.
#[derive(Debug, Clone)]
pub enum StepNode {
    /// User code resolved from the registry under `handler`.
    Function { handler: String },
    /// A nested process run to quiescence inside one parent superstep.
    Process(Box<ProcessInfo>),
    /// Fans a JSON array input across an element handler and emits the
    /// collected results as one array.
    Map { handler: String, function: String },
    /// Forwards events to external topics: local event name to route.
    Proxy { routes: HashMap<String, ProxyRoute> },
    /// A function step with conversation-thread affinity.
    Agent { handler: String },
}

impl StepNode {
    /// Registry key for variants backed by a user handler.
    pub fn handler_name(&self) -> Option<&str> {
        match self {
            Self::Function { handler } | Self::Map { handler, .. } | Self::Agent { handler } => {
                Some(handler)
            }
            Self::Process(_) | Self::Proxy { .. } => None,
        }
    }

    pub fn is_process(&self) -> bool {
        matches!(self, Self::Process(_))
    }
}

/// An authored step instance within a process.
#[derive(Debug, Clone)]
pub struct StepInfo {
    /// Authored name; unique within the process and the storage key.
    pub step_id: String,
    /// Unique instance id, assigned at definition time.
    pub run_id: String,
    /// Definition version recorded on persisted state.
    pub version: String,
    pub node: StepNode,
    /// Outgoing edges, keyed by local event id.
    pub edges: HashMap<String, Vec<Edge>>,
    /// AllOf joins delivering to this step, keyed by group id.
    pub incoming_edge_groups: HashMap<String, EdgeGroup>,
    /// Initial (or restored) user state.
    pub state: Option<Value>,
}

impl StepInfo {
    pub fn new(step_id: impl Into<String>, node: StepNode) -> Self {
        Self {
            step_id: step_id.into(),
            run_id: Uuid::new_v4().to_string(),
            version: DEFAULT_STEP_VERSION.to_string(),
            node,
            edges: HashMap::new(),
            incoming_edge_groups: HashMap::new(),
            state: None,
        }
    }

    /// A function step whose handler shares the step's name.
    pub fn function(step_id: impl Into<String>) -> Self {
        let step_id = step_id.into();
        let handler = step_id.clone();
        Self::new(step_id, StepNode::Function { handler })
    }

    /// A sub-process step named after the nested process. The step shares
    /// the nested process's run id, so edges declared on this step match
    /// events the wrapper re-emits under its namespace.
    pub fn process(info: ProcessInfo) -> Self {
        let step_id = info.id.clone();
        let run_id = info.run_id.clone();
        let mut step = Self::new(step_id, StepNode::Process(Box::new(info)));
        step.run_id = run_id;
        step
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Register an outgoing edge, keyed by its event name.
    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.entry(edge.event_name.clone()).or_default().push(edge);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.add_edge(edge);
        self
    }

    /// Declare an incoming AllOf join.
    pub fn with_edge_group(mut self, group: EdgeGroup) -> Self {
        self.incoming_edge_groups
            .insert(group.group_id.clone(), group);
        self
    }
}

/// A process definition: steps plus process-level edges.
///
/// A process is itself a kind of step - nested processes appear as
/// [`StepNode::Process`] entries in a parent's step list.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// Authored process name; also the namespace of process-level events.
    pub id: String,
    /// Unique instance id.
    pub run_id: String,
    pub version: String,
    /// Declared steps, in declaration order (disposal honors this order).
    pub steps: Vec<StepInfo>,
    /// Process-level edges (external-event routes and the global error
    /// list), keyed by event name.
    pub edges: HashMap<String, Vec<Edge>>,
    /// Shared user state visible to edge conditions and state-update
    /// targets.
    pub state: Value,
    /// Conversation threads observed by agent steps.
    pub threads: Vec<String>,
}

impl ProcessInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_id: Uuid::new_v4().to_string(),
            version: DEFAULT_STEP_VERSION.to_string(),
            steps: Vec::new(),
            edges: HashMap::new(),
            state: Value::Object(serde_json::Map::new()),
            threads: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn add_step(&mut self, step: StepInfo) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn with_step(mut self, step: StepInfo) -> Self {
        self.steps.push(step);
        self
    }

    /// Register a process-level edge, keyed by its event name.
    pub fn add_edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.entry(edge.event_name.clone()).or_default().push(edge);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.add_edge(edge);
        self
    }

    pub fn find_step(&self, step_id: &str) -> Option<&StepInfo> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;

    #[test]
    fn edges_are_keyed_by_event_name() {
        let mut process = ProcessInfo::new("proc");
        process.add_edge(Edge::to_function("proc", "Start", "Echo", "Echo"));
        process.add_edge(Edge::to_function("proc", "Start", "Audit", "Record"));

        assert_eq!(process.edges["Start"].len(), 2);
    }

    #[test]
    fn nested_process_steps_are_recognized() {
        let inner = ProcessInfo::new("Inner");
        let step = StepInfo::process(inner);
        assert_eq!(step.step_id, "Inner");
        assert!(step.node.is_process());
        assert!(step.node.handler_name().is_none());
    }

    #[test]
    fn function_steps_default_their_handler_name() {
        let step = StepInfo::function("Echo");
        assert_eq!(step.node.handler_name(), Some("Echo"));
        assert_eq!(step.version, DEFAULT_STEP_VERSION);
    }
}
