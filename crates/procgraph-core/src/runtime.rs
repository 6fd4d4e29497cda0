//! Local runtime facade: start processes, get handles back.
//!
//! [`LocalProcessRuntime`] owns the shared services (registry, storage
//! backend, external channel, event filter) and turns a [`ProcessInfo`] plus
//! an initial event into a running orchestrator. The returned
//! [`ProcessHandle`] is the host-facing surface: inject external events,
//! request cancellation, and read the live process state.

use crate::bus::MessageBus;
use crate::context::{EventFilter, ProcessContext};
use crate::definition::ProcessInfo;
use crate::error::{ProcessError, Result};
use crate::event::ProcessEvent;
use crate::external::ExternalChannel;
use crate::orchestrator::{ProcessOrchestrator, RunOutcome, DEFAULT_MAX_SUPERSTEPS};
use crate::registry::StepRegistry;
use crate::storage_manager::StorageManager;
use procgraph_store::ProcessStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Host-side entry point for running processes on the local node.
pub struct LocalProcessRuntime {
    registry: Arc<StepRegistry>,
    storage: Option<Arc<StorageManager>>,
    external: Option<Arc<dyn ExternalChannel>>,
    event_filter: Option<EventFilter>,
    max_supersteps: usize,
}

impl LocalProcessRuntime {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            storage: None,
            external: None,
            event_filter: None,
            max_supersteps: DEFAULT_MAX_SUPERSTEPS,
        }
    }

    /// Attach a storage backend; snapshots and restart continuity are
    /// enabled for every process started afterwards.
    pub fn with_store(mut self, store: Arc<dyn ProcessStore>) -> Self {
        self.storage = Some(Arc::new(StorageManager::new(store)));
        self
    }

    pub fn with_external_channel(mut self, channel: Arc<dyn ExternalChannel>) -> Self {
        self.external = Some(channel);
        self
    }

    /// Install a predicate applied to every event before routing.
    pub fn with_event_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ProcessEvent) -> bool + Send + Sync + 'static,
    {
        self.event_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_max_supersteps(mut self, max_supersteps: usize) -> Self {
        self.max_supersteps = max_supersteps;
        self
    }

    /// Start a one-shot run: the orchestrator drives the graph until the
    /// end sentinel, quiescence, or the superstep bound.
    pub fn start(&self, process: ProcessInfo, initial: ProcessEvent) -> Result<ProcessHandle> {
        self.launch(process, initial, false)
    }

    /// Start in continuous mode: the orchestrator idles on an empty queue,
    /// waiting for [`ProcessHandle::send_event`], until stopped.
    pub fn start_continuous(
        &self,
        process: ProcessInfo,
        initial: ProcessEvent,
    ) -> Result<ProcessHandle> {
        self.launch(process, initial, true)
    }

    fn launch(
        &self,
        process: ProcessInfo,
        initial: ProcessEvent,
        continuous: bool,
    ) -> Result<ProcessHandle> {
        let bus = Arc::new(MessageBus::new(&process, false));
        let ctx = Arc::new(ProcessContext::root(
            process.id.clone(),
            process.run_id.clone(),
            process.state.clone(),
            Arc::clone(&bus),
            Arc::clone(&self.registry),
            self.storage.clone(),
            self.external.clone(),
            self.event_filter.clone(),
        ));
        let orchestrator = Arc::new(ProcessOrchestrator::new(process, Arc::clone(&ctx))?);

        let runner = Arc::clone(&orchestrator);
        let max_supersteps = self.max_supersteps;
        let join = tokio::spawn(async move {
            let outcome = if continuous {
                runner.run_continuous(Some(initial)).await
            } else {
                runner.execute_once(Some(initial), max_supersteps).await
            };
            runner.dispose().await;
            outcome
        });

        Ok(ProcessHandle {
            ctx,
            orchestrator,
            join: Mutex::new(Some(join)),
        })
    }
}

/// Handle to a running (or finished) process instance.
pub struct ProcessHandle {
    ctx: Arc<ProcessContext>,
    orchestrator: Arc<ProcessOrchestrator>,
    join: Mutex<Option<JoinHandle<Result<RunOutcome>>>>,
}

impl ProcessHandle {
    pub fn process_id(&self) -> &str {
        &self.ctx.process_id
    }

    pub fn run_id(&self) -> &str {
        &self.ctx.run_id
    }

    /// Inject an external event while the process runs. The event must be
    /// scoped to this process (see [`ProcessEvent::external`]).
    pub fn send_event(&self, event: ProcessEvent) {
        self.ctx.bus.add_external_event(event, &self.ctx);
    }

    /// Request cancellation and wait for the current superstep to drain.
    pub async fn stop(&self) -> Result<RunOutcome> {
        self.ctx.shutdown.request();
        self.join().await
    }

    /// Wait for the run to finish without cancelling it.
    pub async fn join(&self) -> Result<RunOutcome> {
        let handle = self.join.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ProcessError::Execution(format!("orchestrator task failed: {e}")))?,
            None => Err(ProcessError::Execution(
                "process handle already joined".to_string(),
            )),
        }
    }

    /// The current `ProcessInfo`, reflecting live step states and edges.
    pub async fn state(&self) -> ProcessInfo {
        self.orchestrator.state().await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("process_id", &self.ctx.process_id)
            .field("run_id", &self.ctx.run_id)
            .finish()
    }
}
