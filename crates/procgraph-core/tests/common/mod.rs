//! Shared step handlers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use procgraph_core::{EntryPoint, ProcessError, Result, StepContext, StepHandler};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Echoes the `message` argument back as its result.
pub struct Echo;

#[async_trait]
impl StepHandler for Echo {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("Echo").with_data_parameter("message")]
    }

    async fn invoke(
        &self,
        _function_name: &str,
        arguments: HashMap<String, Value>,
        _ctx: &StepContext,
    ) -> Result<Value> {
        Ok(arguments["message"].clone())
    }
}

/// Repeats the incoming message `n` times, tracking the last output and the
/// cumulative iteration count in restorable state.
pub struct Repeat {
    n: usize,
    state: Mutex<(String, u64)>,
}

impl Repeat {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            state: Mutex::new((String::new(), 0)),
        }
    }
}

#[async_trait]
impl StepHandler for Repeat {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("Repeat").with_data_parameter("message")]
    }

    async fn activate(&mut self, state: Option<Value>) -> Result<()> {
        if let Some(state) = state {
            let mut guard = self.state.lock().unwrap();
            guard.0 = state["lastMessage"].as_str().unwrap_or_default().to_string();
            guard.1 = state["iterations"].as_u64().unwrap_or(0);
        }
        Ok(())
    }

    async fn invoke(
        &self,
        _function_name: &str,
        arguments: HashMap<String, Value>,
        _ctx: &StepContext,
    ) -> Result<Value> {
        let message = arguments["message"].as_str().unwrap_or_default();
        let repeated = vec![message; self.n].join(" ");
        let mut guard = self.state.lock().unwrap();
        guard.0 = repeated.clone();
        guard.1 += self.n as u64;
        Ok(Value::String(repeated))
    }

    fn state_snapshot(&self) -> Option<Value> {
        let guard = self.state.lock().unwrap();
        Some(json!({"lastMessage": guard.0, "iterations": guard.1}))
    }
}

/// One recorded invocation of a [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub step: String,
    pub function: String,
    pub arguments: HashMap<String, Value>,
}

pub type SharedCalls = Arc<Mutex<Vec<RecordedCall>>>;

pub fn shared_calls() -> SharedCalls {
    Arc::new(Mutex::new(Vec::new()))
}

/// Records every invocation into a shared log. Exposes a zero-parameter
/// `Ping`, a single-parameter `Handle`, and `Combine` for join deliveries.
pub struct Recorder {
    calls: SharedCalls,
}

impl Recorder {
    pub fn new(calls: SharedCalls) -> Self {
        Self { calls }
    }
}

#[async_trait]
impl StepHandler for Recorder {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![
            EntryPoint::new("Ping"),
            EntryPoint::new("Handle").with_data_parameter("value"),
            EntryPoint::new("HandleError").with_data_parameter("error"),
            EntryPoint::new("Combine"),
        ]
    }

    async fn invoke(
        &self,
        function_name: &str,
        arguments: HashMap<String, Value>,
        ctx: &StepContext,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            step: ctx.step_name().to_string(),
            function: function_name.to_string(),
            arguments,
        });
        Ok(Value::Null)
    }
}

/// Emits a named event carrying a counter that increases per invocation.
pub struct Produce {
    event_name: String,
    base: i64,
    invocations: Mutex<i64>,
}

impl Produce {
    pub fn new(event_name: impl Into<String>, base: i64) -> Self {
        Self {
            event_name: event_name.into(),
            base,
            invocations: Mutex::new(0),
        }
    }
}

#[async_trait]
impl StepHandler for Produce {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("Go")]
    }

    async fn invoke(
        &self,
        _function_name: &str,
        _arguments: HashMap<String, Value>,
        ctx: &StepContext,
    ) -> Result<Value> {
        let mut count = self.invocations.lock().unwrap();
        *count += 1;
        let value = self.base + *count - 1;
        ctx.emit_event(self.event_name.clone(), Some(json!(value)));
        Ok(Value::Null)
    }
}

/// Always fails with the given message.
pub struct Failing {
    message: String,
}

impl Failing {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepHandler for Failing {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("f")]
    }

    async fn invoke(
        &self,
        _function_name: &str,
        _arguments: HashMap<String, Value>,
        _ctx: &StepContext,
    ) -> Result<Value> {
        Err(ProcessError::Execution(self.message.clone()))
    }
}
