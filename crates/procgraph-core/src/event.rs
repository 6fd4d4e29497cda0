//! In-flight event notifications and the qualified-id scheme.
//!
//! Every notification that moves through a process is a [`ProcessEvent`].
//! Routing is purely data-driven: the sole routing key is the **qualified
//! id** `"{namespace}.{local_event_id}"`, where the namespace is either the
//! owning process id (for process-level events) or `"{step_name}_{run_id}"`
//! (for events emitted inside a step instance). Unqualified local ids are
//! never used for routing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source id carried by events injected from outside the process.
pub const EXTERNAL_SOURCE_ID: &str = "__external__";

/// Local event id of the success notification for a function invocation.
pub const ON_RESULT_SUFFIX: &str = "OnResult";

/// Local event id of the failure notification for a function invocation.
pub const ON_ERROR_SUFFIX: &str = "OnError";

/// Reserved local event id emitted for each step's configuration edges when
/// the orchestrator runs its first superstep.
pub const ON_ENTER_EVENT: &str = "OnEnter";

/// Reserved process-level event name whose edges form the global error
/// routing list.
pub const GLOBAL_ERROR_EVENT: &str = "__error__";

/// Whether an event may cross the boundary of its enclosing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventVisibility {
    /// Confined to the emitting process; never matches parent edges.
    Internal,
    /// Eligible to be re-emitted on the parent orchestrator's bus.
    Public,
}

/// An in-flight notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// The emitting step's name, or [`EXTERNAL_SOURCE_ID`].
    pub source_id: String,
    /// Routing scope: `"{step_name}_{run_id}"` or the process id.
    pub namespace: String,
    /// Source-declared event symbol, e.g. `"Echo.OnResult"`.
    pub local_event_id: String,
    /// Payload; `None` for pure signals.
    pub data: Option<Value>,
    pub visibility: EventVisibility,
    /// Routes to the global error list when no edge matches.
    pub is_error: bool,
    /// Conversation affinity for agent steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ProcessEvent {
    /// Create a public event emitted by a step instance.
    pub fn from_step(
        step_name: impl Into<String>,
        run_id: &str,
        local_event_id: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let step_name = step_name.into();
        let namespace = step_namespace(&step_name, run_id);
        Self {
            source_id: step_name,
            namespace,
            local_event_id: local_event_id.into(),
            data,
            visibility: EventVisibility::Public,
            is_error: false,
            thread_id: None,
        }
    }

    /// Create an external event scoped to a process namespace.
    pub fn external(
        process_id: impl Into<String>,
        event_id: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            source_id: EXTERNAL_SOURCE_ID.to_string(),
            namespace: process_id.into(),
            local_event_id: event_id.into(),
            data,
            visibility: EventVisibility::Public,
            is_error: false,
            thread_id: None,
        }
    }

    pub fn with_visibility(mut self, visibility: EventVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    pub fn with_thread_id(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// The routing key: `"{namespace}.{local_event_id}"`.
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.namespace, self.local_event_id)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == EventVisibility::Public
    }
}

/// Namespace of events emitted inside a step instance.
pub fn step_namespace(step_name: &str, run_id: &str) -> String {
    format!("{step_name}_{run_id}")
}

/// Collapse a `source_event_id` to the stable `"{step}.{event}"` identity
/// used by edge groups.
///
/// Two forms are normalized: process-qualified ids (`"{process_id}.…"`) have
/// the prefix stripped, and step-namespaced ids (`"{step}_{run_id}.…"`) have
/// the run-id suffix removed from the namespace segment. The result is
/// stable across process restarts because neither form depends on run ids
/// after normalization.
pub fn source_key(source_event_id: &str, process_id: &str) -> String {
    let process_prefix = format!("{process_id}.");
    if let Some(rest) = source_event_id.strip_prefix(&process_prefix) {
        return rest.to_string();
    }
    match source_event_id.split_once('.') {
        Some((namespace, local)) => {
            // Run ids are UUIDs and never contain underscores, so the last
            // underscore always separates step name from run id.
            let step = namespace
                .rsplit_once('_')
                .map(|(step, _)| step)
                .unwrap_or(namespace);
            format!("{step}.{local}")
        }
        None => source_event_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qualified_id_is_namespace_prefixed() {
        let event = ProcessEvent::from_step("Echo", "run-7", "Echo.OnResult", Some(json!("Go")));
        assert_eq!(event.namespace, "Echo_run-7");
        assert_eq!(event.qualified_id(), "Echo_run-7.Echo.OnResult");
        assert!(event.is_public());
    }

    #[test]
    fn external_events_use_the_process_namespace() {
        let event = ProcessEvent::external("LinearProcess", "Start", Some(json!("Go")));
        assert_eq!(event.qualified_id(), "LinearProcess.Start");
        assert_eq!(event.source_id, EXTERNAL_SOURCE_ID);
    }

    #[test]
    fn source_key_strips_process_prefix() {
        assert_eq!(
            source_key("LinearProcess.A.Produce", "LinearProcess"),
            "A.Produce"
        );
    }

    #[test]
    fn source_key_collapses_step_namespaces() {
        assert_eq!(source_key("A_run-9.Produce", "proc"), "A.Produce");
        // Step names may themselves contain underscores.
        assert_eq!(
            source_key("my_step_1f9e.Produce", "proc"),
            "my_step.Produce"
        );
    }

    #[test]
    fn source_key_passes_through_unqualified_ids() {
        assert_eq!(source_key("Start", "proc"), "Start");
    }
}
