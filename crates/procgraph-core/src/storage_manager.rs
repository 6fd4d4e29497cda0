//! Glue between the runtime and a [`ProcessStore`] backend.
//!
//! The manager enforces the storage error policy of the engine: backend
//! failures are never fatal to a running process. Failed reads behave as if
//! the key were absent, failed writes as no-ops, and both are logged with
//! enough context to audit data loss. Hosts that need fail-fast semantics
//! wrap their backend and surface errors before handing it to the runtime.

use procgraph_store::{
    EdgeDataRecord, ProcessSnapshot, ProcessStore, RecordKey, StepStateRecord,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Checkpoint writer used by step executors (per invocation, per partial
/// join accumulation) and the orchestrator (per superstep).
pub struct StorageManager {
    store: Arc<dyn ProcessStore>,
}

impl StorageManager {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self { store }
    }

    pub async fn save_step_state(
        &self,
        step_id: &str,
        run_id: &str,
        version: &str,
        state: Option<Value>,
    ) {
        let key = RecordKey::new(step_id, run_id);
        let record = StepStateRecord::new(&key, version, state);
        if let Err(e) = self.store.save_step_state(&key, record).await {
            warn!(error = %e, %key, "failed to persist step state");
        }
    }

    pub async fn load_step_state(&self, step_id: &str, run_id: &str) -> Option<Value> {
        let key = RecordKey::new(step_id, run_id);
        match self.store.get_step_state(&key).await {
            Ok(record) => record.and_then(|r| r.state),
            Err(e) => {
                warn!(error = %e, %key, "failed to load step state; treating as absent");
                None
            }
        }
    }

    /// Persist the open edge-group partials of a step. An empty map clears
    /// the record, which is how released joins drop their partials.
    pub async fn save_edge_groups(
        &self,
        step_id: &str,
        run_id: &str,
        groups: HashMap<String, HashMap<String, Value>>,
    ) {
        let key = RecordKey::new(step_id, run_id);
        let record = EdgeDataRecord::new(&key, true, groups);
        if let Err(e) = self.store.save_step_edge_data(&key, record).await {
            warn!(error = %e, %key, "failed to persist edge-group data");
        }
    }

    pub async fn load_edge_groups(
        &self,
        step_id: &str,
        run_id: &str,
    ) -> Option<HashMap<String, HashMap<String, Value>>> {
        let key = RecordKey::new(step_id, run_id);
        match self.store.get_step_edge_data(&key).await {
            Ok(record) => record.filter(|r| r.is_group_edge).map(|r| r.groups),
            Err(e) => {
                warn!(error = %e, %key, "failed to load edge-group data; treating as absent");
                None
            }
        }
    }

    pub async fn save_process(&self, snapshot: ProcessSnapshot) {
        let key = RecordKey::new(&snapshot.process_id, &snapshot.run_id);
        if let Err(e) = self.store.save_process(&key, snapshot).await {
            warn!(error = %e, %key, "failed to persist process snapshot");
        }
    }

    pub async fn load_process(&self, process_id: &str, run_id: &str) -> Option<ProcessSnapshot> {
        let key = RecordKey::new(process_id, run_id);
        match self.store.get_process(&key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, %key, "failed to load process snapshot; treating as absent");
                None
            }
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.store.close().await {
            warn!(error = %e, "failed to close storage backend");
        }
    }
}
