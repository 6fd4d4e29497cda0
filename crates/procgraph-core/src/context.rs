//! Per-process resource bundle and the step-facing context capability.
//!
//! [`ProcessContext`] is an immutable record threaded through every
//! component of a running process. The only interior-mutable fields are the
//! ones that must change after construction, and they are enumerated here:
//! the shared user `state` (mutated by state-update edges and read by edge
//! conditions) and the `shutdown` signal.

use crate::bus::MessageBus;
use crate::event::ProcessEvent;
use crate::external::ExternalChannel;
use crate::registry::StepRegistry;
use crate::storage_manager::StorageManager;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// Optional predicate applied to every emitted event before routing.
pub type EventFilter = Arc<dyn Fn(&ProcessEvent) -> bool + Send + Sync>;

/// Cooperative cancellation signal.
///
/// The orchestrator checks it between supersteps, stops issuing new
/// dispatches once requested, and drains the current superstep before
/// returning. In-flight step code observes the same signal through its
/// [`StepContext`].
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        if self.is_requested() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}

/// The per-process resource bundle.
pub struct ProcessContext {
    /// Authored process name; namespace of process-level events.
    pub process_id: String,
    /// Unique instance id of this process run.
    pub run_id: String,
    /// Set for nested processes.
    pub parent_process_id: Option<String>,
    /// The outermost process id; equals `process_id` at the root.
    pub root_process_id: String,
    pub bus: Arc<MessageBus>,
    pub registry: Arc<StepRegistry>,
    pub storage: Option<Arc<StorageManager>>,
    pub external: Option<Arc<dyn ExternalChannel>>,
    pub event_filter: Option<EventFilter>,
    /// Shared user state. Interior-mutable: state-update edges write it,
    /// edge conditions read it.
    pub state: Arc<RwLock<Value>>,
    pub shutdown: ShutdownSignal,
}

impl ProcessContext {
    /// Bundle for a root process.
    #[allow(clippy::too_many_arguments)]
    pub fn root(
        process_id: impl Into<String>,
        run_id: impl Into<String>,
        initial_state: Value,
        bus: Arc<MessageBus>,
        registry: Arc<StepRegistry>,
        storage: Option<Arc<StorageManager>>,
        external: Option<Arc<dyn ExternalChannel>>,
        event_filter: Option<EventFilter>,
    ) -> Self {
        let process_id = process_id.into();
        Self {
            root_process_id: process_id.clone(),
            process_id,
            run_id: run_id.into(),
            parent_process_id: None,
            bus,
            registry,
            storage,
            external,
            event_filter,
            state: Arc::new(RwLock::new(initial_state)),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Bundle for a nested process: kernel services, event filter, external
    /// channel, storage, and the shutdown signal are inherited; identity and
    /// the bus are the child's own.
    pub fn child(
        &self,
        process_id: impl Into<String>,
        run_id: impl Into<String>,
        initial_state: Value,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            run_id: run_id.into(),
            parent_process_id: Some(self.process_id.clone()),
            root_process_id: self.root_process_id.clone(),
            bus,
            registry: Arc::clone(&self.registry),
            storage: self.storage.clone(),
            external: self.external.clone(),
            event_filter: self.event_filter.clone(),
            state: Arc::new(RwLock::new(initial_state)),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Snapshot of the shared user state.
    pub fn state_snapshot(&self) -> Value {
        self.state.read().map(|s| s.clone()).unwrap_or(Value::Null)
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("process_id", &self.process_id)
            .field("run_id", &self.run_id)
            .field("parent_process_id", &self.parent_process_id)
            .field("root_process_id", &self.root_process_id)
            .finish()
    }
}

/// The context capability handed to user step code.
///
/// Emission through this handle produces a **public** event in the step's
/// namespace, routed immediately against the owning process's bus; resulting
/// messages are picked up by the next superstep's drain.
pub struct StepContext {
    step_name: String,
    run_id: String,
    thread_id: Option<String>,
    process: Arc<ProcessContext>,
}

impl StepContext {
    pub fn new(
        step_name: impl Into<String>,
        run_id: impl Into<String>,
        thread_id: Option<String>,
        process: Arc<ProcessContext>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            run_id: run_id.into(),
            thread_id,
            process,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Conversation thread of the triggering message, for agent steps.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn process_id(&self) -> &str {
        &self.process.process_id
    }

    /// Emit a named public event from this step.
    pub fn emit_event(&self, event_name: impl Into<String>, data: Option<Value>) {
        let event = ProcessEvent::from_step(&self.step_name, &self.run_id, event_name, data)
            .with_thread_id(self.thread_id.clone());
        self.process.bus.emit_event(&event, &self.process);
    }

    /// The process's external channel, when configured.
    pub fn external_channel(&self) -> Option<Arc<dyn ExternalChannel>> {
        self.process.external.clone()
    }

    /// Read-only snapshot of the shared process state.
    pub fn process_state(&self) -> Value {
        self.process.state_snapshot()
    }

    /// True once cancellation has been requested; long-running step bodies
    /// are expected to observe this cooperatively.
    pub fn is_cancelled(&self) -> bool {
        self.process.shutdown.is_requested()
    }
}
