//! Scheduled step invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Reserved destination id that terminates the owning process.
pub const END_STEP_ID: &str = "__end__";

/// Reserved destination id for messages delivered to the external channel.
pub const EMIT_SINK_ID: &str = "__emit__";

/// Reserved entry-point name targeted when the destination is a sub-process.
pub const SUBPROCESS_ENTRY_POINT: &str = "run";

/// Entry-point name agent steps must expose for `AgentInvoke` edge targets.
pub const AGENT_INVOKE_ENTRY_POINT: &str = "invoke";

/// A scheduled invocation produced by edge evaluation and consumed by a step
/// executor during dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMessage {
    /// Step name (or external marker) whose event produced this message.
    pub source_id: String,
    /// Destination step id, or one of the reserved sinks.
    pub destination_id: String,
    /// Entry point to invoke on the destination.
    pub function_name: String,
    /// Qualified id of the event that produced this message; edge-group
    /// joins derive the contributing source identity from it.
    pub source_event_id: String,
    /// Event id delivered to a sub-process destination as its initial event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_event_id: Option<String>,
    /// Raw payload of the producing event.
    pub data: Option<Value>,
    /// Named parameters for the function call.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, Value>,
    /// Set while this message is a partial contribution to an AllOf join;
    /// cleared when the join releases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Conversation affinity for agent destinations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl StepMessage {
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        function_name: impl Into<String>,
        source_event_id: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            function_name: function_name.into(),
            source_event_id: source_event_id.into(),
            target_event_id: None,
            data: None,
            parameters: HashMap::new(),
            group_id: None,
            thread_id: None,
        }
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_target_event(mut self, target_event_id: impl Into<String>) -> Self {
        self.target_event_id = Some(target_event_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Whether this message terminates the owning process.
    pub fn is_end(&self) -> bool {
        self.destination_id == END_STEP_ID
    }
}
