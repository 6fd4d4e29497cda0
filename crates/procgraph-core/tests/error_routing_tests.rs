//! Error propagation: user-step failures, the global error list, and
//! dispatch errors.

mod common;

use common::{shared_calls, Echo, Failing, Recorder};
use procgraph_core::{
    Edge, ErrorRecord, LocalProcessRuntime, ProcessEvent, ProcessInfo, StepInfo, StepNode,
    StepRegistry, GLOBAL_ERROR_EVENT,
};
use serde_json::json;

#[tokio::test]
async fn unhandled_step_errors_route_to_the_global_target() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    registry.register("F", || Failing::new("boom"));
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    // No edge is declared for F.f.OnError; the process-level error list
    // catches it.
    let process = ProcessInfo::new("Fragile")
        .with_step(StepInfo::new("F", StepNode::Function { handler: "F".into() }))
        .with_step(StepInfo::new("H", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(Edge::to_function("Fragile", "Start", "F", "f"))
        .with_edge(
            Edge::to_function("Fragile", GLOBAL_ERROR_EVENT, "H", "HandleError")
                .with_parameter_name("error"),
        );

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(process, ProcessEvent::external("Fragile", "Start", None))
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "the error handler must be invoked once");
    assert_eq!(calls[0].step, "H");

    let record: ErrorRecord =
        serde_json::from_value(calls[0].arguments["error"].clone()).unwrap();
    assert_eq!(record.step_id, "F");
    assert_eq!(record.function_name, "f");
    assert!(record.message.contains("boom"));
    assert!(record.to_string().starts_with("F.f:"));
}

#[tokio::test]
async fn handled_errors_take_the_declared_edge_instead() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    registry.register("F", || Failing::new("boom"));
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let process = ProcessInfo::new("Fragile")
        .with_step(
            StepInfo::new("F", StepNode::Function { handler: "F".into() }).with_edge(
                Edge::to_function("F", "f.OnError", "Local", "HandleError")
                    .with_parameter_name("error"),
            ),
        )
        .with_step(StepInfo::new("Local", StepNode::Function { handler: "Recorder".into() }))
        .with_step(StepInfo::new("Global", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(Edge::to_function("Fragile", "Start", "F", "f"))
        .with_edge(
            Edge::to_function("Fragile", GLOBAL_ERROR_EVENT, "Global", "HandleError")
                .with_parameter_name("error"),
        );

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(process, ProcessEvent::external("Fragile", "Start", None))
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].step, "Local", "declared error edges win over the global list");
}

#[tokio::test]
async fn messages_to_descendant_steps_surface_as_dispatch_errors() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    registry.register("Echo", || Echo);
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    // The folded routing table resolves child-process routes, but their
    // destinations are not dispatchable at the parent; the engine reports
    // them through the global error list rather than failing the run.
    let inner = ProcessInfo::new("Inner")
        .with_step(StepInfo::function("Echo"))
        .with_edge(Edge::to_function("Inner", "Begin", "Echo", "Echo"));

    let process = ProcessInfo::new("Outer")
        .with_step(StepInfo::process(inner))
        .with_step(StepInfo::new("H", StepNode::Function { handler: "Recorder".into() }))
        .with_edge(
            Edge::to_function("Outer", GLOBAL_ERROR_EVENT, "H", "HandleError")
                .with_parameter_name("error"),
        );

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(
            process,
            // Addressed to the child process's own namespace.
            ProcessEvent::external("Inner", "Begin", Some(json!("hi"))),
        )
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let record: ErrorRecord =
        serde_json::from_value(calls[0].arguments["error"].clone()).unwrap();
    assert_eq!(record.step_id, "Echo");
    assert!(record.message.contains("not found"));
}

#[tokio::test]
async fn unknown_functions_are_dropped_without_failing_the_run() {
    let mut registry = StepRegistry::new();
    registry.register("Echo", || Echo);

    let process = ProcessInfo::new("Typo")
        .with_step(StepInfo::function("Echo"))
        .with_edge(Edge::to_function("Typo", "Start", "Echo", "Echoo"));

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start(
            process,
            ProcessEvent::external("Typo", "Start", Some(json!("Go"))),
        )
        .unwrap();

    // The run still quiesces normally.
    handle.join().await.unwrap();
    let state = handle.state().await;
    assert!(state.find_step("Echo").unwrap().state.is_none());
}
