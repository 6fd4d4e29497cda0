//! The non-function step variants: map, proxy, agent, and emit targets.

mod common;

use common::{shared_calls, Recorder};
use async_trait::async_trait;
use procgraph_core::{
    Edge, EntryPoint, LocalProcessRuntime, OutputTarget, ProcessEvent, ProcessInfo, ProxyRoute,
    RecordingExternalChannel, Result, StepContext, StepHandler, StepInfo, StepNode, StepRegistry,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Squares a single number; the element handler for map tests.
struct Squarer;

#[async_trait]
impl StepHandler for Squarer {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("Square").with_data_parameter("n")]
    }

    async fn invoke(
        &self,
        _function_name: &str,
        arguments: HashMap<String, Value>,
        _ctx: &StepContext,
    ) -> Result<Value> {
        let n = arguments["n"].as_i64().unwrap_or(0);
        Ok(json!(n * n))
    }
}

#[tokio::test]
async fn map_steps_fan_over_array_inputs() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    registry.register("Squarer", || Squarer);
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let process = ProcessInfo::new("Mapper")
        .with_step(
            StepInfo::new(
                "Fan",
                StepNode::Map {
                    handler: "Squarer".into(),
                    function: "Square".into(),
                },
            )
            .with_edge(
                Edge::to_function("Fan", "Square.OnResult", "Sink", "Handle")
                    .with_parameter_name("value"),
            ),
        )
        .with_step(StepInfo::new("Sink", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(Edge::to_function("Mapper", "Start", "Fan", "Square"));

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Mapper", "Start", Some(json!([1, 2, 3]))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].arguments["value"], json!([1, 4, 9]));
}

#[tokio::test]
async fn map_steps_reject_non_array_inputs_with_an_error_event() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    registry.register("Squarer", || Squarer);
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let process = ProcessInfo::new("Mapper")
        .with_step(StepInfo::new(
            "Fan",
            StepNode::Map {
                handler: "Squarer".into(),
                function: "Square".into(),
            },
        ))
        .with_step(StepInfo::new("H", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(Edge::to_function("Mapper", "Start", "Fan", "Square"))
        .with_edge(
            Edge::to_function("Mapper", procgraph_core::GLOBAL_ERROR_EVENT, "H", "HandleError")
                .with_parameter_name("error"),
        );

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Mapper", "Start", Some(json!("not-an-array"))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].arguments["error"]["message"]
        .as_str()
        .unwrap()
        .contains("array"));
}

#[tokio::test]
async fn proxy_steps_forward_to_external_topics() {
    let channel = RecordingExternalChannel::new();
    let mut registry = StepRegistry::new();
    registry.register("Recorder", || Recorder::new(shared_calls()));

    let process = ProcessInfo::new("Edge")
        .with_step(StepInfo::new(
            "Gateway",
            StepNode::Proxy {
                routes: HashMap::from([(
                    "Publish".to_string(),
                    ProxyRoute {
                        topic: "orders.created".into(),
                        channel_key: Some("orders".into()),
                    },
                )]),
            },
        ))
        .with_edge(Edge::to_function("Edge", "Start", "Gateway", "Publish"));

    let runtime =
        LocalProcessRuntime::new(registry).with_external_channel(Arc::new(channel.clone()));
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Edge", "Start", Some(json!({"id": 7}))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let emitted = channel.emitted().await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].topic, "orders.created");
    assert_eq!(emitted[0].channel_key.as_deref(), Some("orders"));
    assert_eq!(emitted[0].payload, Some(json!({"id": 7})));
}

#[tokio::test]
async fn emit_targets_deliver_through_the_external_channel() {
    let channel = RecordingExternalChannel::new();
    let mut registry = StepRegistry::new();
    registry.register("Recorder", || Recorder::new(shared_calls()));

    let process = ProcessInfo::new("Beacon")
        .with_step(StepInfo::new("Sink", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(Edge::new(
            "Beacon",
            "Alert",
            OutputTarget::Emit {
                topic: "alerts".into(),
                channel_key: None,
            },
        ));

    let runtime =
        LocalProcessRuntime::new(registry).with_external_channel(Arc::new(channel.clone()));
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Beacon", "Alert", Some(json!("red"))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let emitted = channel.emitted().await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].topic, "alerts");
    assert_eq!(emitted[0].payload, Some(json!("red")));
}

/// Minimal conversational step: echoes its prompt, tagged by thread.
struct Advisor {
    calls: common::SharedCalls,
}

#[async_trait]
impl StepHandler for Advisor {
    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::new("invoke").with_data_parameter("prompt")]
    }

    async fn invoke(
        &self,
        function_name: &str,
        arguments: HashMap<String, Value>,
        ctx: &StepContext,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push(common::RecordedCall {
            step: ctx.step_name().to_string(),
            function: function_name.to_string(),
            arguments: arguments.clone(),
        });
        Ok(json!({
            "reply": arguments["prompt"],
            "thread": ctx.thread_id(),
        }))
    }
}

#[tokio::test]
async fn agent_invoke_targets_pin_the_thread() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    let log = calls.clone();
    registry.register("Advisor", move || Advisor { calls: log.clone() });

    let process = ProcessInfo::new("Desk")
        .with_step(StepInfo::new("Advisor", StepNode::Agent { handler: "Advisor".into() }))
        .with_edge(Edge::new(
            "Desk",
            "Ask",
            OutputTarget::AgentInvoke {
                step_id: "Advisor".into(),
                thread_id: Some("t-9".into()),
            },
        ));

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Desk", "Ask", Some(json!("hello?"))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let state = handle.state().await;
    assert_eq!(state.threads, vec!["t-9".to_string()]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function, "invoke");
    assert_eq!(calls[0].arguments["prompt"], json!("hello?"));
}
