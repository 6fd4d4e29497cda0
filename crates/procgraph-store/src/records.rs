//! Persisted record types.
//!
//! All records are plain `serde` data: step state and edge-group payloads are
//! kept as [`serde_json::Value`] so the store stays agnostic of user state
//! types, mirroring how the runtime itself treats payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Key identifying a step instance within a process.
///
/// `step_id` is the authored step name (stable across runs); `run_id` is the
/// unique instance id assigned when the process was materialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub step_id: String,
    pub run_id: String,
}

impl RecordKey {
    pub fn new(step_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.step_id, self.run_id)
    }
}

/// The persisted user state of a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStateRecord {
    /// Authored step name.
    pub step_id: String,
    /// Instance id within the owning process.
    pub run_id: String,
    /// Step definition version the state was written under.
    pub version: String,
    /// User state snapshot; `None` for stateless steps.
    pub state: Option<Value>,
    /// Write timestamp.
    pub ts: DateTime<Utc>,
}

impl StepStateRecord {
    pub fn new(key: &RecordKey, version: impl Into<String>, state: Option<Value>) -> Self {
        Self {
            step_id: key.step_id.clone(),
            run_id: key.run_id.clone(),
            version: version.into(),
            state,
            ts: Utc::now(),
        }
    }
}

/// Accumulated partial inputs of the edge groups open on one step.
///
/// Outer map: group id. Inner map: source key (`"{step}.{event}"`) to the
/// last value observed from that source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDataRecord {
    pub step_id: String,
    pub run_id: String,
    /// Whether the data belongs to grouped (AllOf) edges. Ungrouped edge
    /// bookkeeping uses the same record shape with this flag cleared.
    pub is_group_edge: bool,
    pub groups: HashMap<String, HashMap<String, Value>>,
    pub ts: DateTime<Utc>,
}

impl EdgeDataRecord {
    pub fn new(
        key: &RecordKey,
        is_group_edge: bool,
        groups: HashMap<String, HashMap<String, Value>>,
    ) -> Self {
        Self {
            step_id: key.step_id.clone(),
            run_id: key.run_id.clone(),
            is_group_edge,
            groups,
            ts: Utc::now(),
        }
    }
}

/// Per-step entry inside a [`ProcessSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_id: String,
    pub run_id: String,
    pub state: Option<Value>,
    /// Present when the step is itself a nested process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Box<ProcessSnapshot>>,
}

/// A whole-process snapshot taken at a superstep boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Unique id of this snapshot.
    pub id: String,
    /// Process id (authored name).
    pub process_id: String,
    /// Run id of the process instance.
    pub run_id: String,
    /// Superstep the snapshot was taken after.
    pub superstep: usize,
    /// Shared user state of the process.
    pub state: Value,
    /// One entry per declared step, in declaration order.
    pub steps: Vec<StepSnapshot>,
    pub ts: DateTime<Utc>,
}

impl ProcessSnapshot {
    pub fn new(
        process_id: impl Into<String>,
        run_id: impl Into<String>,
        superstep: usize,
        state: Value,
        steps: Vec<StepSnapshot>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            process_id: process_id.into(),
            run_id: run_id.into(),
            superstep,
            state,
            steps,
            ts: Utc::now(),
        }
    }
}
