//! The step kernel: user-authored units of work.
//!
//! A step is user code behind the [`StepHandler`] trait. Instead of runtime
//! reflection, handlers declare their callable surface explicitly through
//! [`EntryPoint`] descriptors: one entry per named function, one
//! [`ParameterSpec`] per parameter. Parameters whose kind is a context
//! capability are synthesized at call time and never appear as input slots
//! or on incoming edges.
//!
//! ```rust,ignore
//! struct Repeat;
//!
//! #[async_trait]
//! impl StepHandler for Repeat {
//!     fn entry_points(&self) -> Vec<EntryPoint> {
//!         vec![EntryPoint::new("Repeat").with_data_parameter("message")]
//!     }
//!
//!     async fn invoke(
//!         &self,
//!         function_name: &str,
//!         arguments: HashMap<String, Value>,
//!         _ctx: &StepContext,
//!     ) -> Result<Value> {
//!         let message = arguments["message"].as_str().unwrap_or_default();
//!         Ok(Value::String(format!("{message} {message}")))
//!     }
//! }
//! ```

pub mod agent;
pub mod executor;
pub mod map;
pub mod proxy;
pub mod subprocess;

use crate::context::StepContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What a declared parameter binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// A data slot filled from incoming messages.
    Data,
    /// The per-invocation [`StepContext`]; auto-injected.
    Context,
    /// The process's external channel handle; auto-injected.
    ExternalChannel,
}

/// One declared parameter of an entry point.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Data,
        }
    }
}

/// A named callable exposed by a step.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    pub parameters: Vec<ParameterSpec>,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_data_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec::data(name));
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Names of the parameters that form the input template (context-typed
    /// parameters excluded).
    pub fn data_slots(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.kind == ParameterKind::Data)
            .map(|p| p.name.as_str())
    }
}

/// User-authored step behavior.
///
/// Implementations are resolved by name from the
/// [`StepRegistry`](crate::registry::StepRegistry) and activated lazily on
/// first message. `invoke` takes `&self`; handlers that mutate state across
/// invocations use interior mutability and surface it via
/// [`state_snapshot`](Self::state_snapshot).
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Declare the callable surface. Called once at activation to build the
    /// per-function input templates.
    fn entry_points(&self) -> Vec<EntryPoint>;

    /// Hook invoked once before the first dispatch, with any state restored
    /// from storage.
    async fn activate(&mut self, _state: Option<Value>) -> Result<()> {
        Ok(())
    }

    /// Execute a named entry point. `arguments` holds exactly the data
    /// slots of the entry point; context capabilities arrive via `ctx`.
    async fn invoke(
        &self,
        function_name: &str,
        arguments: HashMap<String, Value>,
        ctx: &StepContext,
    ) -> Result<Value>;

    /// Current user state, persisted after every successful invocation.
    fn state_snapshot(&self) -> Option<Value> {
        None
    }

    /// Hook invoked during orchestrator disposal.
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Portable representation of a failed invocation, carried as the payload of
/// `OnError` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step_id: String,
    pub function_name: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(
        step_id: impl Into<String>,
        function_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            function_name: function_name.into(),
            message: message.into(),
        }
    }

    /// Serialize for use as event data. Serialization of this plain record
    /// cannot fail.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.to_string()))
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}: {}",
            self.step_id, self.function_name, self.message
        )
    }
}
