//! Directed edges between event sources and invocation targets.
//!
//! An edge is keyed by its `(source_step_id, event_name)` pair - at bus
//! construction that pair becomes a qualified-event-id routing key. The edge
//! carries a tagged [`OutputTarget`], an optional [`EdgeCondition`], and an
//! optional group id marking it as a contribution to an AllOf join.

use crate::event::ProcessEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Predicate evaluated against the event and the current process user state.
pub type ConditionFn = Arc<dyn Fn(&ProcessEvent, &Value) -> bool + Send + Sync>;

/// Gate deciding whether an edge matches an emitted event.
///
/// Default edges participate only when no non-default edge matched the same
/// event; among parallel non-default edges, declaration order is not
/// observable.
#[derive(Clone, Default)]
pub enum EdgeCondition {
    /// Matches unconditionally.
    #[default]
    Always,
    /// Matches only when no non-default edge matched.
    Default,
    /// Matches when the predicate returns `true`.
    Predicate(ConditionFn),
}

impl EdgeCondition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&ProcessEvent, &Value) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Evaluate against an event. Default conditions evaluate `true`; the
    /// default/non-default tie-break happens in the bus.
    pub fn evaluate(&self, event: &ProcessEvent, state: &Value) -> bool {
        match self {
            Self::Always | Self::Default => true,
            Self::Predicate(f) => f(event, state),
        }
    }
}

impl std::fmt::Debug for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Default => write!(f, "Default"),
            Self::Predicate(_) => write!(f, "Predicate(<function>)"),
        }
    }
}

/// Mutation applied by a state-update edge target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateOp {
    /// Replace the value at the path.
    Set,
    /// Push onto the array at the path, creating it if absent.
    Append,
    /// Add the numeric payload (default 1) to the number at the path.
    Increment,
    /// Subtract the numeric payload (default 1) from the number at the path.
    Decrement,
}

/// Where a matched edge delivers its event.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Invoke a named entry point on a step. When the destination is a
    /// sub-process step, `function_name` is the event id to deliver inside
    /// the child and the message targets the reserved sub-process entry
    /// point instead.
    Function {
        step_id: String,
        function_name: String,
        /// When set, the event payload is packed under this parameter name.
        parameter_name: Option<String>,
    },
    /// Apply a mutation to the shared process user state.
    StateUpdate {
        /// Dot-separated path into the state object, e.g. `"stats.count"`.
        path: String,
        op: StateOp,
    },
    /// Forward the payload to an external topic through the process's
    /// external channel.
    Emit {
        topic: String,
        channel_key: Option<String>,
    },
    /// Invoke an agent step, pinning the conversation thread.
    AgentInvoke {
        step_id: String,
        /// Overrides the event's thread id when set.
        thread_id: Option<String>,
    },
    /// Terminate the owning process after the current superstep.
    End,
}

/// A directed link from a `(source step, event)` pair to an output target.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Authored name of the emitting step, or the process id for
    /// process-level edges.
    pub source_step_id: String,
    /// Local event id the edge listens for.
    pub event_name: String,
    pub target: OutputTarget,
    pub condition: EdgeCondition,
    /// Set when this edge contributes to an AllOf join on the destination.
    pub group_id: Option<String>,
}

impl Edge {
    pub fn new(
        source_step_id: impl Into<String>,
        event_name: impl Into<String>,
        target: OutputTarget,
    ) -> Self {
        Self {
            source_step_id: source_step_id.into(),
            event_name: event_name.into(),
            target,
            condition: EdgeCondition::Always,
            group_id: None,
        }
    }

    /// Shorthand for a function-target edge.
    pub fn to_function(
        source_step_id: impl Into<String>,
        event_name: impl Into<String>,
        step_id: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Self::new(
            source_step_id,
            event_name,
            OutputTarget::Function {
                step_id: step_id.into(),
                function_name: function_name.into(),
                parameter_name: None,
            },
        )
    }

    /// Shorthand for an end-sentinel edge.
    pub fn to_end(source_step_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self::new(source_step_id, event_name, OutputTarget::End)
    }

    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_parameter_name(mut self, parameter_name: impl Into<String>) -> Self {
        if let OutputTarget::Function { parameter_name: p, .. } = &mut self.target {
            *p = Some(parameter_name.into());
        }
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Destination step id, when the target is a step.
    pub fn destination_step(&self) -> Option<&str> {
        match &self.target {
            OutputTarget::Function { step_id, .. } | OutputTarget::AgentInvoke { step_id, .. } => {
                Some(step_id)
            }
            _ => None,
        }
    }
}
