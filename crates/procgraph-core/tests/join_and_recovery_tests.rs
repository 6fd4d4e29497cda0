//! AllOf join scenarios: release semantics, input mappings, last-wins
//! accumulation, and restart continuity from persisted partials.

mod common;

use common::{shared_calls, Produce, Recorder};
use procgraph_core::{
    Edge, EdgeGroup, GroupSource, LocalProcessRuntime, ProcessEvent, ProcessInfo, RunOutcome,
    StepInfo, StepNode, StepRegistry,
};
use procgraph_store::{InMemoryProcessStore, ProcessStore, RecordKey};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Step `C` joins one `Produce` event from each of `A` and `B`. `A` fires on
/// `StartA`, `B` on `StartB`, so tests control exactly which sources have
/// contributed.
fn join_process(group: EdgeGroup) -> ProcessInfo {
    ProcessInfo::new("JoinProcess")
        .with_step(
            StepInfo::new("A", StepNode::Function { handler: "A".into() }).with_edge(
                Edge::to_function("A", "Produce", "C", "Combine").with_group("join"),
            ),
        )
        .with_step(
            StepInfo::new("B", StepNode::Function { handler: "B".into() }).with_edge(
                Edge::to_function("B", "Produce", "C", "Combine").with_group("join"),
            ),
        )
        .with_step(
            StepInfo::new("C", StepNode::Function { handler: "Recorder".into() })
                .with_edge_group(group),
        )
        .with_edge(Edge::to_function("JoinProcess", "StartA", "A", "Go"))
        .with_edge(Edge::to_function("JoinProcess", "StartB", "B", "Go"))
}

fn join_group() -> EdgeGroup {
    EdgeGroup::new(
        "join",
        vec![
            GroupSource::new("A", "Produce"),
            GroupSource::new("B", "Produce"),
        ],
    )
}

#[tokio::test]
async fn all_of_join_releases_exactly_once() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    let log = calls.clone();
    registry.register("A", || Produce::new("Produce", 1));
    registry.register("B", || Produce::new("Produce", 2));
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let store = InMemoryProcessStore::new();
    let process = join_process(join_group());
    let c_run_id = process.find_step("C").unwrap().run_id.clone();

    // The runtime closes its own storage handle on disposal; the test keeps
    // an independent handle over the same backing data.
    let runtime = LocalProcessRuntime::new(registry).with_store(Arc::new(store.clone()));
    let handle = runtime
        .start_continuous(process, ProcessEvent::external("JoinProcess", "StartA", None))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.send_event(ProcessEvent::external("JoinProcess", "StartB", None));
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "join must deliver exactly one invocation");
    assert_eq!(calls[0].function, "Combine");
    assert_eq!(calls[0].arguments["A.Produce"], json!(1));
    assert_eq!(calls[0].arguments["B.Produce"], json!(2));

    // The partial-join key is cleared on release.
    let key = RecordKey::new("C", c_run_id);
    assert!(store.get_step_edge_data(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn input_mapping_shapes_the_released_parameters() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    let log = calls.clone();
    registry.register("A", || Produce::new("Produce", 10));
    registry.register("B", || Produce::new("Produce", 20));
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let group = join_group().with_input_mapping(|data| {
        let total: i64 = data.values().filter_map(serde_json::Value::as_i64).sum();
        HashMap::from([("total".to_string(), json!(total))])
    });

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start_continuous(
            join_process(group),
            ProcessEvent::external("JoinProcess", "StartA", None),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.send_event(ProcessEvent::external("JoinProcess", "StartB", None));
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].arguments, HashMap::from([("total".to_string(), json!(30))]));
}

#[tokio::test]
async fn repeated_source_overwrites_without_releasing() {
    let calls = shared_calls();
    let mut registry = StepRegistry::new();
    let log = calls.clone();
    // A produces 1, then 2 on its second invocation.
    registry.register("A", || Produce::new("Produce", 1));
    registry.register("B", || Produce::new("Produce", 9));
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let runtime = LocalProcessRuntime::new(registry);
    let handle = runtime
        .start_continuous(
            join_process(join_group()),
            ProcessEvent::external("JoinProcess", "StartA", None),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.send_event(ProcessEvent::external("JoinProcess", "StartA", None));
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.send_event(ProcessEvent::external("JoinProcess", "StartB", None));
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "duplicate source must not release the join");
    // Last-wins: the second arrival from A replaced the first.
    assert_eq!(calls[0].arguments["A.Produce"], json!(2));
    assert_eq!(calls[0].arguments["B.Produce"], json!(9));
}

#[tokio::test]
async fn restart_rehydrates_the_partial_join() {
    let store = InMemoryProcessStore::new();
    let calls = shared_calls();

    // The definition is shared so run ids (the storage keys) are stable
    // across the rebuild.
    let process = {
        let mut registry = StepRegistry::new();
        registry.register("A", || Produce::new("Produce", 1));
        registry.register("B", || Produce::new("Produce", 2));
        let log = calls.clone();
        registry.register("Recorder", move || Recorder::new(log.clone()));

        let process = join_process(join_group());
        let runtime =
            LocalProcessRuntime::new(registry).with_store(Arc::new(store.clone()));
        let handle = runtime
            .start(
                process.clone(),
                ProcessEvent::external("JoinProcess", "StartA", None),
            )
            .unwrap();
        assert_eq!(handle.join().await.unwrap(), RunOutcome::Idle);
        process
    };

    assert!(
        calls.lock().unwrap().is_empty(),
        "join must not release with only one source observed"
    );
    let c_run_id = process.find_step("C").unwrap().run_id.clone();
    let key = RecordKey::new("C", c_run_id);
    let partial = store.get_step_edge_data(&key).await.unwrap().unwrap();
    assert_eq!(partial.groups["join"]["A.Produce"], json!(1));

    // Rebuild against the same backing store; only B fires now.
    let mut registry = StepRegistry::new();
    registry.register("A", || Produce::new("Produce", 1));
    registry.register("B", || Produce::new("Produce", 2));
    let log = calls.clone();
    registry.register("Recorder", move || Recorder::new(log.clone()));

    let runtime = LocalProcessRuntime::new(registry).with_store(Arc::new(store.clone()));
    let handle = runtime
        .start(process, ProcessEvent::external("JoinProcess", "StartB", None))
        .unwrap();
    handle.join().await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "rehydrated join must release after B fires");
    assert_eq!(calls[0].arguments["A.Produce"], json!(1));
    assert_eq!(calls[0].arguments["B.Produce"], json!(2));

    assert!(store.get_step_edge_data(&key).await.unwrap().is_none());
}
