//! Sub-process wrapper: a nested process embedded as a step.
//!
//! Each invocation builds a fresh child context and orchestrator over the
//! nested definition and runs it to quiescence inside the current parent
//! superstep. The synthetic initial event is **internal**, so it can never
//! leak back up; public events the child leaves unconsumed are re-emitted
//! against the parent bus afterwards.
//!
//! The child definition is updated in place after every run, so parent
//! snapshots and `state()` reports reflect the nested step states.

use crate::bus::MessageBus;
use crate::context::ProcessContext;
use crate::definition::ProcessInfo;
use crate::error::{ProcessError, Result};
use crate::event::{step_namespace, EventVisibility, ProcessEvent};
use crate::message::StepMessage;
use crate::orchestrator::{ProcessOrchestrator, DEFAULT_MAX_SUPERSTEPS};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Run the nested process for one delivered message.
///
/// Boxed because sub-processes may nest arbitrarily deep and the dispatch
/// path is recursive through the orchestrator.
pub(crate) fn run_subprocess<'a>(
    child: &'a mut ProcessInfo,
    message: &'a StepMessage,
    parent: &'a Arc<ProcessContext>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let target_event_id = message.target_event_id.clone().ok_or_else(|| {
            ProcessError::Execution(format!(
                "message for sub-process '{}' carries no target event id",
                child.id
            ))
        })?;

        let bus = Arc::new(MessageBus::new(child, true));
        let ctx = Arc::new(parent.child(
            child.id.clone(),
            child.run_id.clone(),
            child.state.clone(),
            Arc::clone(&bus),
        ));
        let orchestrator = ProcessOrchestrator::new(child.clone(), Arc::clone(&ctx))?;

        let initial = ProcessEvent::external(&child.id, target_event_id, message.data.clone())
            .with_visibility(EventVisibility::Internal)
            .with_thread_id(message.thread_id.clone());

        debug!(process = %child.id, "running sub-process to quiescence");
        let outcome = orchestrator
            .execute_once(Some(initial), DEFAULT_MAX_SUPERSTEPS)
            .await?;
        debug!(process = %child.id, ?outcome, "sub-process finished");

        // Keep the parent's view of the nested definition current.
        *child = orchestrator.state().await;
        child.state = ctx.state_snapshot();
        orchestrator.dispose_steps().await;

        // Unconsumed public child events surface under the wrapping step's
        // namespace, where parent-declared edges can match them. Internal
        // events were never collected and cannot leak here.
        let forward_namespace = step_namespace(&child.id, &child.run_id);
        for mut event in bus.take_unrouted_public() {
            event.source_id = child.id.clone();
            event.namespace = forward_namespace.clone();
            parent.bus.emit_event(&event, parent);
        }
        Ok(())
    })
}
