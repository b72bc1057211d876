//! Processor tests against the in-memory store.
//!
//! These drive a `Processor` directly, without the dispatcher, so each test
//! controls exactly when an execution starts and resumes.

use std::sync::Arc;

use serde_json::{json, Value};

use db::{
    Execution, ExecutionStatus, FlowNode, JobStatus, MemoryStore, NewExecution, NewWorkflow,
    Store, Workflow, WorkflowOptions,
};
use instructions::builtin::{ConditionInstruction, EchoInstruction, EndInstruction, ManualInstruction};
use instructions::mock::MockInstruction;

use crate::registry::InstructionRegistry;
use crate::test_support::{chain, end_node, node};
use crate::Processor;

fn registry(mocks: &[(&str, &MockInstruction)]) -> Arc<InstructionRegistry> {
    let mut registry = InstructionRegistry::new();
    registry.register("condition", Arc::new(ConditionInstruction)).unwrap();
    registry.register("end", Arc::new(EndInstruction)).unwrap();
    registry.register("echo", Arc::new(EchoInstruction)).unwrap();
    registry.register("manual", Arc::new(ManualInstruction)).unwrap();
    for (name, mock) in mocks {
        registry.register(*name, Arc::new((*mock).clone())).unwrap();
    }
    Arc::new(registry)
}

/// Persist a workflow and one queueing execution for it.
async fn seed(
    store: &MemoryStore,
    nodes: Vec<FlowNode>,
    options: WorkflowOptions,
    context: Value,
) -> (Workflow, Execution) {
    let mut tx = store.begin().await.unwrap();
    let workflow = tx
        .save_workflow(NewWorkflow {
            options,
            ..NewWorkflow::new("k1", "manual", nodes)
        })
        .await
        .unwrap();
    let execution = tx
        .insert_execution(NewExecution {
            workflow_id: workflow.id,
            key: workflow.key.clone(),
            event_key: "event-1".into(),
            context,
            status: ExecutionStatus::Queueing,
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();
    (workflow, execution)
}

async fn processor(
    store: &MemoryStore,
    registry: &Arc<InstructionRegistry>,
    workflow: &Workflow,
    execution: Execution,
) -> Processor {
    Processor::new(
        Arc::new(store.clone()),
        Arc::clone(registry),
        workflow.clone(),
        execution,
    )
    .await
    .unwrap()
}

// ============================================================
// Linear flows
// ============================================================

#[tokio::test]
async fn linear_chain_resolves_and_links_jobs() {
    let store = MemoryStore::new();
    let last = MockInstruction::returning(json!({ "done": true }));
    let registry = registry(&[("mock", &last)]);
    let nodes = chain(vec![
        node(1, "echo", json!({ "value": "{{$context.x}}" })),
        node(2, "mock", Value::Null),
    ]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({ "x": 5 })).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Resolved);
    let jobs = store.list_jobs(p.execution().id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].result, json!(5));
    assert_eq!(jobs[1].upstream_id, Some(jobs[0].id));
    assert!(jobs.iter().all(|j| j.status == JobStatus::Resolved));
    assert_eq!(last.call_count(), 1);
}

#[tokio::test]
async fn empty_flow_resolves_immediately() {
    let store = MemoryStore::new();
    let (workflow, execution) = seed(&store, vec![], Default::default(), json!({})).await;

    let mut p = processor(&store, &registry(&[]), &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Resolved);
    assert!(p.jobs().is_empty());
}

#[tokio::test]
async fn end_node_sets_configured_status() {
    let store = MemoryStore::new();
    let after = MockInstruction::returning(Value::Null);
    let registry = registry(&[("mock", &after)]);
    let nodes = chain(vec![
        node(1, "end", json!({ "end_status": "failed" })),
        node(2, "mock", Value::Null),
    ]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({})).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Failed);
    assert_eq!(after.call_count(), 0, "nothing runs after an end node");
}

// ============================================================
// Branches
// ============================================================

/// 1 (condition) ─→ 4 (mock "after")
///  ├─ branch 1 → 2 (mock "yes")
///  └─ branch 0 → 3 (mock "no")
fn branching_flow() -> Vec<FlowNode> {
    let mut condition = node(
        1,
        "condition",
        json!({ "operator": "eq", "left": "{{$context.x}}", "right": 1 }),
    );
    condition.downstream_id = Some(4);
    let mut yes = node(2, "yes", Value::Null);
    yes.upstream_id = Some(1);
    yes.branch_index = Some(1);
    let mut no = node(3, "no", Value::Null);
    no.upstream_id = Some(1);
    no.branch_index = Some(0);
    let mut after = node(4, "after", Value::Null);
    after.upstream_id = Some(1);
    vec![condition, yes, no, after]
}

#[tokio::test]
async fn branch_runs_then_walks_out_to_owner_downstream() {
    let store = MemoryStore::new();
    let yes = MockInstruction::returning(json!("yes"));
    let no = MockInstruction::returning(json!("no"));
    let after = MockInstruction::returning(json!("after"));
    let registry = registry(&[("yes", &yes), ("no", &no), ("after", &after)]);
    let (workflow, execution) = seed(&store, branching_flow(), Default::default(), json!({ "x": 1 })).await;
    crate::validate_flow(&workflow.nodes).expect("flow should be valid");

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();

    let visited: Vec<i64> = p.jobs().iter().map(|j| j.node_id).collect();
    assert_eq!(visited, vec![1, 2, 4]);
    assert_eq!(no.call_count(), 0);
    assert_eq!(p.execution().status, ExecutionStatus::Resolved);
}

#[tokio::test]
async fn false_branch_is_taken_when_condition_fails() {
    let store = MemoryStore::new();
    let yes = MockInstruction::returning(json!("yes"));
    let no = MockInstruction::returning(json!("no"));
    let after = MockInstruction::returning(json!("after"));
    let registry = registry(&[("yes", &yes), ("no", &no), ("after", &after)]);
    let (workflow, execution) = seed(&store, branching_flow(), Default::default(), json!({ "x": 2 })).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();

    let visited: Vec<i64> = p.jobs().iter().map(|j| j.node_id).collect();
    assert_eq!(visited, vec![1, 3, 4]);
    assert_eq!(yes.call_count(), 0);
}

#[tokio::test]
async fn rejecting_condition_fails_the_execution() {
    let store = MemoryStore::new();
    let after = MockInstruction::returning(Value::Null);
    let registry = registry(&[("mock", &after)]);
    let nodes = chain(vec![
        node(1, "condition", json!({ "left": "{{$context.ok}}", "reject_on_false": true })),
        node(2, "mock", Value::Null),
    ]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({ "ok": false })).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Failed);
    assert_eq!(p.jobs()[0].status, JobStatus::Failed);
    assert_eq!(after.call_count(), 0);
}

// ============================================================
// Instruction failures
// ============================================================

#[tokio::test]
async fn instruction_error_leaves_execution_started() {
    let store = MemoryStore::new();
    let ok = MockInstruction::returning(json!({ "ok": true }));
    let boom = MockInstruction::failing("something broke");
    let never = MockInstruction::returning(json!({ "should": "not run" }));
    let registry = registry(&[("ok", &ok), ("boom", &boom), ("never", &never)]);
    let nodes = chain(vec![
        node(1, "ok", Value::Null),
        node(2, "boom", Value::Null),
        node(3, "never", Value::Null),
    ]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({})).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    // The failure is absorbed; only storage errors surface here.
    p.start().await.unwrap();

    let stored = store.get_execution(p.execution().id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Started);
    let last = p.last_job().unwrap();
    assert_eq!(last.node_id, 2);
    assert_eq!(last.status, JobStatus::Error);
    assert_eq!(never.call_count(), 0);
}

#[tokio::test]
async fn unregistered_instruction_is_recorded_as_error_job() {
    let store = MemoryStore::new();
    let nodes = vec![node(1, "query", Value::Null)];
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({})).await;

    let mut p = processor(&store, &registry(&[]), &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Started);
    assert_eq!(p.jobs()[0].status, JobStatus::Error);
}

// ============================================================
// Suspension and resumption
// ============================================================

#[tokio::test]
async fn resume_continues_after_the_suspended_node() {
    let store = MemoryStore::new();
    let first = MockInstruction::returning(Value::Null);
    let wait = MockInstruction::suspending();
    let next = MockInstruction::returning(json!({ "after": "resume" }));
    let registry = registry(&[("first", &first), ("wait", &wait), ("next", &next)]);
    let nodes = chain(vec![
        node(1, "first", Value::Null),
        node(2, "wait", Value::Null),
        node(3, "next", Value::Null),
    ]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({})).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();
    assert_eq!(p.execution().status, ExecutionStatus::Started);
    let mut pending = p.last_job().cloned().unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(next.call_count(), 0);

    pending.result = json!({ "approved": true });
    let execution = store.get_execution(p.execution().id).await.unwrap();
    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.resume(pending.clone()).await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Resolved);
    assert_eq!(first.call_count(), 1, "the flow does not restart from the root");
    assert_eq!(wait.call_count(), 1);
    assert_eq!(wait.resume_count(), 1);
    assert_eq!(next.call_count(), 1);

    let resumed = store.get_job(pending.id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Resolved);
    assert_eq!(resumed.result, json!({ "approved": true }));
    let jobs = store.list_jobs(p.execution().id).await.unwrap();
    assert_eq!(jobs.last().unwrap().upstream_id, Some(pending.id));
}

#[tokio::test]
async fn manual_node_rejected_on_resume_ends_execution() {
    let store = MemoryStore::new();
    let nodes = chain(vec![node(1, "manual", json!({ "form": {} })), end_node(2)]);
    let (workflow, execution) = seed(&store, nodes, Default::default(), json!({})).await;
    let registry = registry(&[]);

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();
    let mut job = p.last_job().cloned().unwrap();
    job.status = JobStatus::Rejected;

    let execution = store.get_execution(job.execution_id).await.unwrap();
    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.resume(job).await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Rejected);
    assert_eq!(p.jobs().len(), 1, "the end node never ran");
}

#[tokio::test]
async fn finished_execution_is_not_processed_again() {
    let store = MemoryStore::new();
    let mock = MockInstruction::returning(Value::Null);
    let registry = registry(&[("mock", &mock)]);
    let (workflow, execution) =
        seed(&store, vec![node(1, "mock", Value::Null)], Default::default(), json!({})).await;

    let mut p = processor(&store, &registry, &workflow, execution).await;
    p.start().await.unwrap();
    let finished = p.execution().clone();

    let mut again = processor(&store, &registry, &workflow, finished).await;
    again.start().await.unwrap();

    assert_eq!(mock.call_count(), 1);
    assert_eq!(store.list_jobs(again.execution().id).await.unwrap().len(), 1);
}

// ============================================================
// Cleanup
// ============================================================

#[tokio::test]
async fn execution_is_deleted_on_configured_status() {
    let store = MemoryStore::new();
    let options = WorkflowOptions {
        delete_execution_on_status: vec![ExecutionStatus::Resolved],
    };
    let (workflow, execution) = seed(&store, vec![end_node(1)], options, json!({})).await;

    let mut p = processor(&store, &registry(&[]), &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(p.execution().status, ExecutionStatus::Resolved);
    assert!(store.executions().await.is_empty());
    assert!(store.list_jobs(p.execution().id).await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_is_kept_on_other_statuses() {
    let store = MemoryStore::new();
    let options = WorkflowOptions {
        delete_execution_on_status: vec![ExecutionStatus::Resolved],
    };
    let nodes = vec![node(1, "end", json!({ "end_status": "failed" }))];
    let (workflow, execution) = seed(&store, nodes, options, json!({})).await;

    let mut p = processor(&store, &registry(&[]), &workflow, execution).await;
    p.start().await.unwrap();

    assert_eq!(store.executions().await.len(), 1);
}
