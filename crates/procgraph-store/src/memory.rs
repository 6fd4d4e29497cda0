//! In-memory reference backend.
//!
//! `InMemoryProcessStore` keeps every record in `Arc<RwLock<HashMap>>` maps,
//! one per record kind. It is the backend used throughout the test suite and
//! is suitable for single-node deployments that only need restart continuity
//! within one host process.

use crate::error::{Result, StoreError};
use crate::records::{EdgeDataRecord, ProcessSnapshot, RecordKey, StepStateRecord};
use crate::store::ProcessStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory implementation of [`ProcessStore`].
///
/// Cloning is cheap and every clone shares the same underlying maps, so a
/// store handed to an orchestrator can be inspected from the host
/// afterwards. Each clone is an independent *handle*: closing one leaves
/// the shared data reachable through the others, which is what restart
/// continuity relies on when a rebuilt orchestrator reopens the backend.
#[derive(Default)]
pub struct InMemoryProcessStore {
    processes: Arc<RwLock<HashMap<RecordKey, ProcessSnapshot>>>,
    step_states: Arc<RwLock<HashMap<RecordKey, StepStateRecord>>>,
    edge_data: Arc<RwLock<HashMap<RecordKey, EdgeDataRecord>>>,
    closed: AtomicBool,
}

impl Clone for InMemoryProcessStore {
    fn clone(&self) -> Self {
        Self {
            processes: Arc::clone(&self.processes),
            step_states: Arc::clone(&self.step_states),
            edge_data: Arc::clone(&self.edge_data),
            closed: AtomicBool::new(false),
        }
    }
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all three key spaces.
    pub async fn record_count(&self) -> usize {
        self.processes.read().await.len()
            + self.step_states.read().await.len()
            + self.edge_data.read().await.len()
    }

    /// Drop every record. Useful between test cases.
    pub async fn clear(&self) {
        self.processes.write().await.clear();
        self.step_states.write().await.clear();
        self.edge_data.write().await.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn save_process(&self, key: &RecordKey, snapshot: ProcessSnapshot) -> Result<()> {
        self.ensure_open()?;
        self.processes.write().await.insert(key.clone(), snapshot);
        Ok(())
    }

    async fn get_process(&self, key: &RecordKey) -> Result<Option<ProcessSnapshot>> {
        self.ensure_open()?;
        Ok(self.processes.read().await.get(key).cloned())
    }

    async fn save_step_state(&self, key: &RecordKey, record: StepStateRecord) -> Result<()> {
        self.ensure_open()?;
        self.step_states.write().await.insert(key.clone(), record);
        Ok(())
    }

    async fn get_step_state(&self, key: &RecordKey) -> Result<Option<StepStateRecord>> {
        self.ensure_open()?;
        Ok(self.step_states.read().await.get(key).cloned())
    }

    async fn save_step_edge_data(&self, key: &RecordKey, record: EdgeDataRecord) -> Result<()> {
        self.ensure_open()?;
        let mut map = self.edge_data.write().await;
        if record.groups.is_empty() {
            map.remove(key);
        } else {
            map.insert(key.clone(), record);
        }
        Ok(())
    }

    async fn get_step_edge_data(&self, key: &RecordKey) -> Result<Option<EdgeDataRecord>> {
        self.ensure_open()?;
        Ok(self.edge_data.read().await.get(key).cloned())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
