//! Per-step driver: input accumulation, readiness, invocation, and event
//! emission.
//!
//! One `StepExecutor` owns one step instance for the lifetime of an
//! orchestrator. It activates the user handler lazily on first message,
//! maintains an input template per entry point (one slot per data
//! parameter), invokes the entry point once every slot is filled, and turns
//! the outcome into a public `OnResult` / `OnError` event.
//!
//! Messages carrying a group id bypass the template path entirely: they are
//! fed to the step's [`EdgeGroupProcessor`](crate::group::EdgeGroupProcessor)
//! and, on release, the group-produced parameter map is executed directly.

use crate::context::{ProcessContext, StepContext};
use crate::definition::{StepInfo, StepNode};
use crate::error::{ProcessError, Result};
use crate::event::{source_key, ProcessEvent, ON_ERROR_SUFFIX, ON_RESULT_SUFFIX};
use crate::group::{EdgeGroupProcessor, GroupObservation};
use crate::message::StepMessage;
use crate::step::{agent, map, proxy, subprocess, ErrorRecord, StepHandler};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry-point name reported on `OnError` events raised by a failing
/// activation hook.
const ACTIVATE_FUNCTION: &str = "activate";

/// Driver for a single step instance.
pub struct StepExecutor {
    info: StepInfo,
    handler: Option<Box<dyn StepHandler>>,
    /// Data slot names per entry point; the immutable template.
    templates: HashMap<String, Vec<String>>,
    /// Current input slots per entry point.
    inputs: HashMap<String, HashMap<String, Option<Value>>>,
    /// Open AllOf joins, by group id. A processor is discarded on release.
    groups: HashMap<String, EdgeGroupProcessor>,
    /// Persisted partials loaded once, on first grouped message.
    stored_partials: Option<HashMap<String, HashMap<String, Value>>>,
    rehydrated: bool,
    threads: Vec<String>,
}

impl StepExecutor {
    pub fn new(info: StepInfo) -> Self {
        Self {
            info,
            handler: None,
            templates: HashMap::new(),
            inputs: HashMap::new(),
            groups: HashMap::new(),
            stored_partials: None,
            rehydrated: false,
            threads: Vec::new(),
        }
    }

    /// The step definition, with its state kept current after every
    /// successful invocation (and after every child run, for sub-process
    /// steps).
    pub fn info(&self) -> &StepInfo {
        &self.info
    }

    /// Conversation threads observed by this step.
    pub fn threads(&self) -> &[String] {
        &self.threads
    }

    /// Input slots of one entry point, for introspection and tests.
    pub fn input_slots(&self, function_name: &str) -> Option<&HashMap<String, Option<Value>>> {
        self.inputs.get(function_name)
    }

    /// Translate one delivered message into (at most) one invocation.
    ///
    /// User failures are converted into `OnError` events, never propagated;
    /// an `Err` from this method aborts the superstep and is reserved for
    /// definition-level faults that validation should have caught.
    pub async fn execute(&mut self, message: StepMessage, ctx: &Arc<ProcessContext>) -> Result<()> {
        if let StepNode::Process(child) = &mut self.info.node {
            return subprocess::run_subprocess(child, &message, ctx).await;
        }
        if let StepNode::Proxy { routes } = &self.info.node {
            return proxy::forward(routes, &message, ctx).await;
        }
        if matches!(self.info.node, StepNode::Agent { .. }) {
            agent::record_thread(&mut self.threads, message.thread_id.as_deref());
        }

        self.ensure_activated(ctx).await?;
        if self.handler.is_none() {
            // Activation failed; the OnError event is already in flight.
            return Ok(());
        }

        let map_function = match &self.info.node {
            StepNode::Map { function, .. } => Some(function.clone()),
            _ => None,
        };
        if let Some(function) = map_function {
            let result = {
                let handler = self.require_handler()?;
                let step_ctx = self.step_context(message.thread_id.clone(), ctx);
                map::run_map(handler, &function, &message, &step_ctx).await
            };
            self.publish_result(&function, result, message.thread_id.clone(), ctx)
                .await;
            return Ok(());
        }

        if message.group_id.is_some() {
            self.execute_grouped(message, ctx).await
        } else {
            self.execute_assigned(message, ctx).await
        }
    }

    /// Release handler resources. Called once, during orchestrator disposal.
    pub async fn dispose(&mut self) {
        if let Some(handler) = &mut self.handler {
            if let Err(e) = handler.dispose().await {
                warn!(step = %self.info.step_id, error = %e, "step dispose hook failed");
            }
        }
        self.handler = None;
    }

    /// Instantiate the handler, build the input templates from its declared
    /// entry points, restore persisted state, and run the activation hook.
    async fn ensure_activated(&mut self, ctx: &Arc<ProcessContext>) -> Result<()> {
        if self.handler.is_some() {
            return Ok(());
        }

        let handler_name = self.info.node.handler_name().ok_or_else(|| {
            ProcessError::Configuration(format!(
                "step '{}' has no user handler to activate",
                self.info.step_id
            ))
        })?;
        let mut handler = ctx.registry.create(handler_name).ok_or_else(|| {
            ProcessError::Configuration(format!(
                "no handler '{handler_name}' registered for step '{}'",
                self.info.step_id
            ))
        })?;

        self.templates = handler
            .entry_points()
            .into_iter()
            .map(|entry| {
                let slots: Vec<String> = entry.data_slots().map(str::to_string).collect();
                (entry.name, slots)
            })
            .collect();
        self.inputs = self
            .templates
            .iter()
            .map(|(name, slots)| (name.clone(), empty_slots(slots)))
            .collect();

        let restored = match &ctx.storage {
            Some(storage) => storage
                .load_step_state(&self.info.step_id, &self.info.run_id)
                .await
                .or_else(|| self.info.state.clone()),
            None => self.info.state.clone(),
        };
        if restored.is_some() {
            self.info.state = restored.clone();
        }

        if let Err(e) = handler.activate(restored).await {
            warn!(step = %self.info.step_id, error = %e, "step activation failed");
            self.emit_error(ACTIVATE_FUNCTION, e.to_string(), None, ctx);
            return Ok(());
        }
        self.handler = Some(handler);
        Ok(())
    }

    /// Normal (ungrouped) delivery: merge parameters into the entry point's
    /// input slots and invoke once every slot is filled.
    async fn execute_assigned(
        &mut self,
        message: StepMessage,
        ctx: &Arc<ProcessContext>,
    ) -> Result<()> {
        let Some(slots) = self.templates.get(&message.function_name) else {
            warn!(
                step = %self.info.step_id,
                function = %message.function_name,
                "message targets unknown function; dropping"
            );
            return Ok(());
        };
        let single_slot = (slots.len() == 1).then(|| slots[0].clone());

        let Some(inputs) = self.inputs.get_mut(&message.function_name) else {
            return Ok(());
        };

        for (name, value) in &message.parameters {
            match inputs.get_mut(name) {
                Some(slot) => {
                    if slot.is_some() {
                        warn!(
                            step = %self.info.step_id,
                            function = %message.function_name,
                            parameter = %name,
                            "overwriting previously assigned input"
                        );
                    }
                    *slot = Some(value.clone());
                }
                None => debug!(
                    step = %self.info.step_id,
                    function = %message.function_name,
                    parameter = %name,
                    "ignoring parameter with no matching slot"
                ),
            }
        }

        // Convenience for edges without an explicit parameter name: raw
        // event data fills a sole still-empty slot.
        if let (Some(data), Some(slot_name)) = (&message.data, &single_slot) {
            if let Some(slot) = inputs.get_mut(slot_name) {
                if slot.is_none() {
                    *slot = Some(data.clone());
                }
            }
        }

        let ready = inputs.values().all(Option::is_some);
        if !ready {
            return Ok(());
        }

        let arguments: HashMap<String, Value> = inputs
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect();
        let function_name = message.function_name.clone();
        self.invoke(&function_name, arguments, message.thread_id, ctx).await;
        Ok(())
    }

    /// Grouped delivery: accumulate through the AllOf processor and execute
    /// with the group-produced parameter map on release.
    async fn execute_grouped(
        &mut self,
        message: StepMessage,
        ctx: &Arc<ProcessContext>,
    ) -> Result<()> {
        let Some(group_id) = message.group_id.clone() else {
            return Ok(());
        };

        if !self.rehydrated {
            self.stored_partials = match &ctx.storage {
                Some(storage) => {
                    storage
                        .load_edge_groups(&self.info.step_id, &self.info.run_id)
                        .await
                }
                None => None,
            };
            self.rehydrated = true;
        }

        if !self.groups.contains_key(&group_id) {
            let declaration = self
                .info
                .incoming_edge_groups
                .get(&group_id)
                .cloned()
                .or_else(|| ctx.bus.edge_group(&group_id));
            let Some(declaration) = declaration else {
                warn!(
                    step = %self.info.step_id,
                    group = %group_id,
                    "message references undeclared edge group; dropping"
                );
                return Ok(());
            };
            let mut processor = EdgeGroupProcessor::new(declaration);
            if let Some(partial) = self
                .stored_partials
                .as_mut()
                .and_then(|stored| stored.remove(&group_id))
            {
                processor.rehydrate(partial);
            }
            self.groups.insert(group_id.clone(), processor);
        }

        let key = source_key(&message.source_event_id, ctx.bus.process_id());
        let Some(processor) = self.groups.get_mut(&group_id) else {
            return Ok(());
        };
        match processor.observe(&key, message.data.clone()) {
            GroupObservation::Incomplete => {
                self.persist_groups(ctx).await;
            }
            GroupObservation::Complete(parameters) => {
                self.groups.remove(&group_id);
                // Re-persisting without the released group clears its key.
                self.persist_groups(ctx).await;
                let function_name = message.function_name.clone();
                self.invoke(&function_name, parameters, message.thread_id, ctx).await;
            }
        }
        Ok(())
    }

    /// Execute the bound entry point and surface the outcome as an event.
    async fn invoke(
        &mut self,
        function_name: &str,
        arguments: HashMap<String, Value>,
        thread_id: Option<String>,
        ctx: &Arc<ProcessContext>,
    ) {
        let result = match self.handler.as_deref() {
            Some(handler) => {
                let step_ctx = self.step_context(thread_id.clone(), ctx);
                handler.invoke(function_name, arguments, &step_ctx).await
            }
            None => Err(ProcessError::Execution(format!(
                "step '{}' invoked before activation",
                self.info.step_id
            ))),
        };
        self.publish_result(function_name, result, thread_id, ctx).await;
    }

    /// Reset the entry point's slots, persist state on success, and emit the
    /// `OnResult` / `OnError` event.
    async fn publish_result(
        &mut self,
        function_name: &str,
        result: Result<Value>,
        thread_id: Option<String>,
        ctx: &Arc<ProcessContext>,
    ) {
        // Inputs reset after any invocation, success or error, so the next
        // invocation requires fresh inputs.
        if let Some(slots) = self.templates.get(function_name) {
            self.inputs
                .insert(function_name.to_string(), empty_slots(slots));
        }

        match result {
            Ok(value) => {
                self.info.state = self.handler.as_deref().and_then(StepHandler::state_snapshot);
                if let Some(storage) = &ctx.storage {
                    storage
                        .save_step_state(
                            &self.info.step_id,
                            &self.info.run_id,
                            &self.info.version,
                            self.info.state.clone(),
                        )
                        .await;
                }
                let event = ProcessEvent::from_step(
                    &self.info.step_id,
                    &self.info.run_id,
                    format!("{function_name}.{ON_RESULT_SUFFIX}"),
                    Some(value),
                )
                .with_thread_id(thread_id);
                ctx.bus.emit_event(&event, ctx);
            }
            Err(e) => {
                warn!(
                    step = %self.info.step_id,
                    function = %function_name,
                    error = %e,
                    "step invocation failed"
                );
                self.emit_error(function_name, e.to_string(), thread_id, ctx);
            }
        }
    }

    fn emit_error(
        &self,
        function_name: &str,
        message: String,
        thread_id: Option<String>,
        ctx: &Arc<ProcessContext>,
    ) {
        let record = ErrorRecord::new(&self.info.step_id, function_name, message);
        let event = ProcessEvent::from_step(
            &self.info.step_id,
            &self.info.run_id,
            format!("{function_name}.{ON_ERROR_SUFFIX}"),
            Some(record.to_value()),
        )
        .with_error(true)
        .with_thread_id(thread_id);
        ctx.bus.emit_event(&event, ctx);
    }

    /// Persist the open partials of every group on this step.
    async fn persist_groups(&self, ctx: &Arc<ProcessContext>) {
        let Some(storage) = &ctx.storage else { return };
        let groups: HashMap<String, HashMap<String, Value>> = self
            .groups
            .iter()
            .map(|(id, processor)| (id.clone(), processor.data().clone()))
            .collect();
        storage
            .save_edge_groups(&self.info.step_id, &self.info.run_id, groups)
            .await;
    }

    fn step_context(&self, thread_id: Option<String>, ctx: &Arc<ProcessContext>) -> StepContext {
        StepContext::new(
            &self.info.step_id,
            &self.info.run_id,
            thread_id,
            Arc::clone(ctx),
        )
    }

    fn require_handler(&self) -> Result<&dyn StepHandler> {
        self.handler.as_deref().ok_or_else(|| {
            ProcessError::Execution(format!(
                "step '{}' invoked before activation",
                self.info.step_id
            ))
        })
    }
}

fn empty_slots(slots: &[String]) -> HashMap<String, Option<Value>> {
    slots.iter().map(|name| (name.clone(), None)).collect()
}
