//! The process orchestrator: drives the superstep loop to quiescence,
//! termination, or cancellation.
//!
//! Scheduling model is **per-process single-writer, intra-superstep
//! fan-out**: the orchestrator is the sole consumer of its bus's queue, and
//! within one superstep every drained message is dispatched concurrently.
//! The `join_all` barrier at the end of the superstep restores the
//! single-writer invariant before the next drain, which is what gives the
//! engine its causal-order guarantee: an event emitted in superstep N is
//! visible no earlier than superstep N+1.

use crate::context::ProcessContext;
use crate::definition::{ProcessInfo, StepNode};
use crate::error::{ProcessError, Result};
use crate::event::{EventVisibility, ProcessEvent, ON_ENTER_EVENT};
use crate::message::{StepMessage, EMIT_SINK_ID};
use crate::step::executor::StepExecutor;
use crate::step::ErrorRecord;
use futures::future::join_all;
use procgraph_store::{ProcessSnapshot, StepSnapshot};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Superstep bound applied when callers do not choose one.
pub const DEFAULT_MAX_SUPERSTEPS: usize = 100;

/// Consecutive empty supersteps tolerated (one-shot mode) before concluding
/// that no progress is possible.
pub const EMPTY_SUPERSTEP_THRESHOLD: usize = 5;

/// Pause between empty supersteps, giving asynchronous step code a window to
/// enqueue further work.
const IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// How a run ended. All of these are normal returns; errors are reserved for
/// definition faults and fatal dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A message reached the end sentinel.
    EndReached,
    /// The empty-superstep threshold was exceeded; no progress possible.
    Idle,
    /// The superstep bound was exhausted.
    SuperstepLimit,
    /// Cancellation was requested and the current superstep drained.
    Cancelled,
}

/// Owns one process instance and drives its superstep loop.
///
/// Construction validates the definition (unknown handlers, duplicate step
/// ids, dangling edge targets, and undeclared group sources are fatal before
/// any execution). Steps are materialized on the first run; handlers inside
/// them are activated lazily on their first message.
pub struct ProcessOrchestrator {
    definition: ProcessInfo,
    ctx: Arc<ProcessContext>,
    steps: RwLock<HashMap<String, Arc<Mutex<StepExecutor>>>>,
    materialized: AtomicBool,
    superstep: AtomicUsize,
}

impl ProcessOrchestrator {
    pub fn new(definition: ProcessInfo, ctx: Arc<ProcessContext>) -> Result<Self> {
        validate(&definition, &ctx)?;
        Ok(Self {
            definition,
            ctx,
            steps: RwLock::new(HashMap::new()),
            materialized: AtomicBool::new(false),
            superstep: AtomicUsize::new(0),
        })
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.ctx
    }

    /// Run until quiescence, termination, or cancellation, bounded by
    /// `max_supersteps`. The optional initial event is routed before the
    /// first drain.
    pub async fn execute_once(
        &self,
        initial: Option<ProcessEvent>,
        max_supersteps: usize,
    ) -> Result<RunOutcome> {
        self.ensure_materialized().await;
        if let Some(event) = initial {
            self.ctx.bus.emit_event(&event, &self.ctx);
        }
        self.run_loop(max_supersteps, false).await
    }

    /// Continuous mode: empty supersteps do not count toward the idle
    /// threshold; the orchestrator waits for further external events until
    /// cancelled.
    pub async fn run_continuous(&self, initial: Option<ProcessEvent>) -> Result<RunOutcome> {
        self.ensure_materialized().await;
        if let Some(event) = initial {
            self.ctx.bus.emit_event(&event, &self.ctx);
        }
        self.run_loop(usize::MAX, true).await
    }

    async fn run_loop(&self, max_supersteps: usize, continuous: bool) -> Result<RunOutcome> {
        let mut completed = 0usize;
        let mut empty_supersteps = 0usize;

        loop {
            if self.ctx.shutdown.is_requested() {
                info!(process = %self.ctx.process_id, "cancellation observed; stopping");
                return Ok(RunOutcome::Cancelled);
            }
            if completed >= max_supersteps {
                warn!(
                    process = %self.ctx.process_id,
                    max_supersteps,
                    "superstep bound exhausted"
                );
                return Ok(RunOutcome::SuperstepLimit);
            }

            let pending = self.ctx.bus.drain_pending();
            if pending.is_empty() {
                if continuous {
                    tokio::select! {
                        _ = self.ctx.shutdown.cancelled() => return Ok(RunOutcome::Cancelled),
                        _ = tokio::time::sleep(IDLE_INTERVAL) => continue,
                    }
                }
                empty_supersteps += 1;
                if empty_supersteps > EMPTY_SUPERSTEP_THRESHOLD {
                    debug!(process = %self.ctx.process_id, "no progress possible; quiescent");
                    return Ok(RunOutcome::Idle);
                }
                tokio::time::sleep(IDLE_INTERVAL).await;
                continue;
            }
            empty_supersteps = 0;

            let end_requested = pending.iter().any(StepMessage::is_end);
            let batch: Vec<StepMessage> =
                pending.into_iter().filter(|m| !m.is_end()).collect();

            debug!(
                process = %self.ctx.process_id,
                superstep = self.superstep.load(Ordering::SeqCst),
                messages = batch.len(),
                "dispatching superstep"
            );
            self.dispatch(batch).await?;

            completed += 1;
            self.superstep.fetch_add(1, Ordering::SeqCst);
            self.snapshot().await;

            if end_requested {
                info!(process = %self.ctx.process_id, "end sentinel reached; terminating");
                return Ok(RunOutcome::EndReached);
            }
        }
    }

    /// Dispatch one superstep's batch concurrently and join. The first
    /// dispatch error aborts the run; user-step failures never surface
    /// here - they are converted to `OnError` events by the executors.
    async fn dispatch(&self, messages: Vec<StepMessage>) -> Result<()> {
        let steps = self.steps.read().await;
        let invocations = messages.into_iter().map(|message| {
            let executor = steps.get(&message.destination_id).cloned();
            let ctx = Arc::clone(&self.ctx);
            async move {
                if message.destination_id == EMIT_SINK_ID {
                    deliver_external(&message, &ctx).await;
                    return Ok(());
                }
                match executor {
                    Some(executor) => executor.lock().await.execute(message, &ctx).await,
                    None => {
                        report_unknown_destination(&message, &ctx);
                        Ok(())
                    }
                }
            }
        });
        let results: Vec<Result<()>> = join_all(invocations).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Materialize every declared step, register its edge groups with the
    /// bus, and emit the synthetic `OnEnter` configuration events. When a
    /// prior snapshot exists in storage, step states and the shared user
    /// state are restored from it before any dispatch.
    async fn ensure_materialized(&self) {
        if self.materialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut restored_states: HashMap<String, Option<Value>> = HashMap::new();
        if let Some(storage) = &self.ctx.storage {
            if let Some(snapshot) = storage
                .load_process(&self.definition.id, &self.definition.run_id)
                .await
            {
                debug!(
                    process = %self.definition.id,
                    superstep = snapshot.superstep,
                    "restoring process from snapshot"
                );
                if let Ok(mut state) = self.ctx.state.write() {
                    *state = snapshot.state.clone();
                }
                for step in snapshot.steps {
                    restored_states.insert(step.step_id, step.state);
                }
            }
        }

        let mut steps = self.steps.write().await;
        for step in &self.definition.steps {
            for group in step.incoming_edge_groups.values() {
                self.ctx.bus.register_edge_group(group.clone());
            }
            let mut info = step.clone();
            if let Some(state) = restored_states.remove(&info.step_id) {
                // Per-invocation step records still win; this is the
                // fallback the executor consults when none exists.
                if state.is_some() {
                    info.state = state;
                }
            }
            steps.insert(
                info.step_id.clone(),
                Arc::new(Mutex::new(StepExecutor::new(info))),
            );
        }
        drop(steps);

        for step in &self.definition.steps {
            if step.edges.contains_key(ON_ENTER_EVENT) {
                let event =
                    ProcessEvent::from_step(&step.step_id, &step.run_id, ON_ENTER_EVENT, None)
                        .with_visibility(EventVisibility::Internal);
                self.ctx.bus.emit_event(&event, &self.ctx);
            }
        }
    }

    /// Current process definition with live step states folded in. This is
    /// the `ProcessInfo` surfaced by handles and persisted in snapshots.
    pub async fn state(&self) -> ProcessInfo {
        let mut definition = self.definition.clone();
        definition.state = self.ctx.state_snapshot();

        let steps = self.steps.read().await;
        let mut threads: Vec<String> = definition.threads.clone();
        for step in &mut definition.steps {
            if let Some(executor) = steps.get(&step.step_id) {
                let executor = executor.lock().await;
                *step = executor.info().clone();
                for thread in executor.threads() {
                    if !threads.iter().any(|t| t == thread) {
                        threads.push(thread.clone());
                    }
                }
            }
        }
        definition.threads = threads;
        definition
    }

    /// Persist a whole-process snapshot, when storage is configured.
    async fn snapshot(&self) {
        let Some(storage) = &self.ctx.storage else { return };
        let state = self.state().await;
        let superstep = self.superstep.load(Ordering::SeqCst);
        storage.save_process(snapshot_of(&state, superstep)).await;
    }

    /// Dispose each step in declaration order, then close the storage
    /// handle when this orchestrator owns the root process.
    pub async fn dispose(&self) {
        self.dispose_steps().await;
        if self.ctx.parent_process_id.is_none() {
            if let Some(storage) = &self.ctx.storage {
                storage.close().await;
            }
        }
    }

    /// Dispose steps without touching storage; used by the sub-process
    /// wrapper, whose storage handle belongs to the root.
    pub(crate) async fn dispose_steps(&self) {
        let steps = self.steps.read().await;
        for step in &self.definition.steps {
            if let Some(executor) = steps.get(&step.step_id) {
                executor.lock().await.dispose().await;
            }
        }
    }
}

impl std::fmt::Debug for ProcessOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOrchestrator")
            .field("process_id", &self.definition.id)
            .field("run_id", &self.definition.run_id)
            .field("superstep", &self.superstep.load(Ordering::SeqCst))
            .finish()
    }
}

/// Deliver an emit-target message through the external channel.
async fn deliver_external(message: &StepMessage, ctx: &ProcessContext) {
    let Some(channel) = &ctx.external else {
        warn!(
            topic = %message.function_name,
            "emit target with no external channel configured; dropping"
        );
        return;
    };
    let channel_key = message
        .parameters
        .get("channel_key")
        .and_then(Value::as_str);
    if let Err(e) = channel
        .emit(&message.function_name, channel_key, message.data.as_ref())
        .await
    {
        warn!(topic = %message.function_name, error = %e, "external emission failed");
    }
}

/// Surface a message addressed to an unknown step as an error event; falls
/// through to the global error list since no edge can match it.
fn report_unknown_destination(message: &StepMessage, ctx: &ProcessContext) {
    warn!(
        destination = %message.destination_id,
        function = %message.function_name,
        "message addressed to unknown step"
    );
    let record = ErrorRecord::new(
        &message.destination_id,
        &message.function_name,
        "destination step not found",
    );
    let event = ProcessEvent {
        source_id: message.destination_id.clone(),
        namespace: ctx.process_id.clone(),
        local_event_id: format!(
            "{}.{}.OnError",
            message.destination_id, message.function_name
        ),
        data: Some(record.to_value()),
        visibility: EventVisibility::Public,
        is_error: true,
        thread_id: message.thread_id.clone(),
    };
    ctx.bus.emit_event(&event, ctx);
}

/// Build the persisted snapshot form of a (state-refreshed) definition.
fn snapshot_of(info: &ProcessInfo, superstep: usize) -> ProcessSnapshot {
    let steps = info
        .steps
        .iter()
        .map(|step| StepSnapshot {
            step_id: step.step_id.clone(),
            run_id: step.run_id.clone(),
            state: step.state.clone(),
            process: match &step.node {
                StepNode::Process(child) => Some(Box::new(snapshot_of(child, superstep))),
                _ => None,
            },
        })
        .collect();
    ProcessSnapshot::new(
        info.id.clone(),
        info.run_id.clone(),
        superstep,
        info.state.clone(),
        steps,
    )
}

/// Construction-time validation: every fault here is fatal before any
/// execution.
fn validate(process: &ProcessInfo, ctx: &ProcessContext) -> Result<()> {
    let mut step_ids: HashSet<&str> = HashSet::new();
    for step in &process.steps {
        if !step_ids.insert(&step.step_id) {
            return Err(ProcessError::Configuration(format!(
                "duplicate step id '{}' in process '{}'",
                step.step_id, process.id
            )));
        }
        match &step.node {
            StepNode::Function { handler }
            | StepNode::Map { handler, .. }
            | StepNode::Agent { handler } => {
                if !ctx.registry.contains(handler) {
                    return Err(ProcessError::Configuration(format!(
                        "step '{}' references unregistered handler '{handler}'",
                        step.step_id
                    )));
                }
            }
            StepNode::Process(child) => validate(child, ctx)?,
            StepNode::Proxy { .. } => {}
        }
    }

    let all_edges = process
        .edges
        .values()
        .chain(process.steps.iter().flat_map(|s| s.edges.values()))
        .flatten();
    for edge in all_edges {
        if let Some(destination) = edge.destination_step() {
            if !step_ids.contains(destination) {
                return Err(ProcessError::Configuration(format!(
                    "edge for event '{}' targets unknown step '{destination}'",
                    edge.event_name
                )));
            }
        }
    }

    for step in &process.steps {
        for group in step.incoming_edge_groups.values() {
            for source in &group.sources {
                if !step_ids.contains(source.step_id.as_str()) {
                    return Err(ProcessError::Configuration(format!(
                        "edge group '{}' names unknown source step '{}'",
                        group.group_id, source.step_id
                    )));
                }
            }
        }
    }

    Ok(())
}
