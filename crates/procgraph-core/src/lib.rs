//! # procgraph-core - Pregel-style process orchestration
//!
//! A declarative process runtime: user-defined steps connected by
//! event-driven edges, executed as a graph. Given a process definition
//! (steps, edges, edge groups, initial state) and an initial external
//! event, the orchestrator drives the graph to a terminal state by
//! repeatedly routing events into step invocations until no messages
//! remain.
//!
//! ## Execution model
//!
//! Execution proceeds in **supersteps**:
//!
//! 1. **Drain**: the message bus hands the orchestrator every pending
//!    message.
//! 2. **Dispatch**: each message is delivered to its destination step; all
//!    dispatches in a superstep run concurrently.
//! 3. **Barrier**: the superstep completes when every dispatch has settled.
//! 4. **Snapshot**: process state is persisted when storage is configured.
//!
//! Steps emit events; the bus evaluates the edges registered for each
//! event's qualified id and enqueues the resulting messages for the next
//! superstep. The loop ends when a message reaches the end sentinel, the
//! queue stays empty past the idle threshold, the superstep bound is
//! exhausted, or cancellation is requested.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use procgraph_core::{
//!     Edge, EntryPoint, LocalProcessRuntime, ProcessEvent, ProcessInfo,
//!     StepContext, StepHandler, StepInfo, StepRegistry,
//! };
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use std::collections::HashMap;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl StepHandler for Echo {
//!     fn entry_points(&self) -> Vec<EntryPoint> {
//!         vec![EntryPoint::new("Echo").with_data_parameter("message")]
//!     }
//!
//!     async fn invoke(
//!         &self,
//!         _function: &str,
//!         arguments: HashMap<String, Value>,
//!         _ctx: &StepContext,
//!     ) -> procgraph_core::Result<Value> {
//!         Ok(arguments["message"].clone())
//!     }
//! }
//!
//! # async fn example() -> procgraph_core::Result<()> {
//! let mut registry = StepRegistry::new();
//! registry.register("Echo", || Echo);
//!
//! let process = ProcessInfo::new("demo")
//!     .with_step(StepInfo::function("Echo"))
//!     .with_edge(Edge::to_function("demo", "Start", "Echo", "Echo"));
//!
//! let runtime = LocalProcessRuntime::new(registry);
//! let handle = runtime.start(
//!     process,
//!     ProcessEvent::external("demo", "Start", Some(Value::from("Go"))),
//! )?;
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`event`] / [`message`] - the two in-flight data types and the
//!   qualified-id scheme.
//! - [`edge`] / [`group`] - routing declarations: edges, conditions, edge
//!   groups (AllOf joins).
//! - [`definition`] - `ProcessInfo` / `StepInfo` and the step-kind variant.
//! - [`bus`] - pending queue plus the immutable routing table.
//! - [`step`] - the `StepHandler` contract and the per-variant executors.
//! - [`orchestrator`] - the superstep loop.
//! - [`context`] - per-process resources and the step context capability.
//! - [`registry`] - handler name resolution.
//! - [`storage_manager`] - checkpoint glue over `procgraph-store`.
//! - [`external`] - outbound channel for emit targets and proxy steps.
//! - [`runtime`] - the `start`/handle facade.

pub mod bus;
pub mod context;
pub mod definition;
pub mod edge;
pub mod error;
pub mod event;
pub mod external;
pub mod group;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod step;
pub mod storage_manager;

pub use bus::{MessageBus, StepKind};
pub use context::{EventFilter, ProcessContext, ShutdownSignal, StepContext};
pub use definition::{ProcessInfo, ProxyRoute, StepInfo, StepNode, DEFAULT_STEP_VERSION};
pub use edge::{ConditionFn, Edge, EdgeCondition, OutputTarget, StateOp};
pub use error::{ProcessError, Result};
pub use event::{
    step_namespace, EventVisibility, ProcessEvent, EXTERNAL_SOURCE_ID, GLOBAL_ERROR_EVENT,
    ON_ENTER_EVENT, ON_ERROR_SUFFIX, ON_RESULT_SUFFIX,
};
pub use external::{EmittedExternalEvent, ExternalChannel, RecordingExternalChannel};
pub use group::{EdgeGroup, EdgeGroupProcessor, GroupObservation, GroupSource, InputMapping};
pub use message::{
    StepMessage, AGENT_INVOKE_ENTRY_POINT, EMIT_SINK_ID, END_STEP_ID, SUBPROCESS_ENTRY_POINT,
};
pub use orchestrator::{
    ProcessOrchestrator, RunOutcome, DEFAULT_MAX_SUPERSTEPS, EMPTY_SUPERSTEP_THRESHOLD,
};
pub use registry::{HandlerFactory, StepRegistry};
pub use runtime::{LocalProcessRuntime, ProcessHandle};
pub use step::{EntryPoint, ErrorRecord, ParameterKind, ParameterSpec, StepHandler};
pub use storage_manager::StorageManager;
