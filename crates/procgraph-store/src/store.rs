//! The storage backend trait.

use crate::error::Result;
use crate::records::{EdgeDataRecord, ProcessSnapshot, RecordKey, StepStateRecord};
use async_trait::async_trait;

/// Storage backend contract for process, step, and edge-group records.
///
/// The orchestrator and step executors call these methods at well-defined
/// checkpoints: step state after every successful invocation, edge data after
/// every partial join accumulation, and a process snapshot once per
/// superstep. Implementations must be `Send + Sync`; the runtime serializes
/// operations per key, so backends only need whole-record atomicity.
///
/// Writes overwrite any existing record under the same key. Reads return
/// `Ok(None)` for absent keys; [`StoreError::NotFound`](crate::StoreError)
/// is reserved for backends where absence only surfaces as an error.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Persist a whole-process snapshot.
    async fn save_process(&self, key: &RecordKey, snapshot: ProcessSnapshot) -> Result<()>;

    /// Retrieve the latest snapshot for a process instance.
    async fn get_process(&self, key: &RecordKey) -> Result<Option<ProcessSnapshot>>;

    /// Persist the user state of a step.
    async fn save_step_state(&self, key: &RecordKey, record: StepStateRecord) -> Result<()>;

    /// Retrieve the persisted user state of a step.
    async fn get_step_state(&self, key: &RecordKey) -> Result<Option<StepStateRecord>>;

    /// Persist the partial edge-group data of a step.
    ///
    /// An empty `groups` map is a valid write and clears the record, which is
    /// how released joins drop their partials.
    async fn save_step_edge_data(&self, key: &RecordKey, record: EdgeDataRecord) -> Result<()>;

    /// Retrieve the partial edge-group data of a step.
    async fn get_step_edge_data(&self, key: &RecordKey) -> Result<Option<EdgeDataRecord>>;

    /// Release backend resources. Further operations may fail with
    /// [`StoreError::Closed`](crate::StoreError).
    async fn close(&self) -> Result<()>;
}
