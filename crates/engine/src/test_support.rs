//! Builders and polling helpers shared by the engine test modules.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use db::{Execution, FlowNode, Job, MemoryStore, NodeId, Store};
use instructions::mock::MockInstruction;

use crate::{Engine, EngineBuilder, EngineConfig};

pub fn node(id: NodeId, instruction: &str, config: Value) -> FlowNode {
    FlowNode {
        id,
        key: format!("n{id}"),
        title: None,
        instruction: instruction.into(),
        config,
        upstream_id: None,
        downstream_id: None,
        branch_index: None,
    }
}

/// Link nodes one after another: nodes[0] → nodes[1] → … → nodes[n-1].
pub fn chain(mut nodes: Vec<FlowNode>) -> Vec<FlowNode> {
    let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.upstream_id = i.checked_sub(1).map(|p| ids[p]);
        node.downstream_id = ids.get(i + 1).copied();
    }
    nodes
}

pub fn end_node(id: NodeId) -> FlowNode {
    node(id, "end", json!({}))
}

/// Engine over `store` with the built-ins plus the given mocks.
pub fn engine(store: &MemoryStore, mocks: &[(&str, &MockInstruction)]) -> Arc<Engine> {
    engine_with(Arc::new(store.clone()), mocks, |_| {})
}

pub fn engine_with(
    store: Arc<dyn Store>,
    mocks: &[(&str, &MockInstruction)],
    customize: impl FnOnce(&mut EngineBuilder),
) -> Arc<Engine> {
    let mut builder = EngineBuilder::new(store);
    builder
        .config(EngineConfig {
            checker_interval: Duration::from_millis(200),
            sync_enabled: true,
        })
        .register_builtins()
        .unwrap();
    for (name, mock) in mocks {
        builder
            .register_instruction(*name, Arc::new((*mock).clone()))
            .unwrap();
    }
    customize(&mut builder);
    builder.build()
}

/// Poll the store until `done` holds for its executions.
pub async fn wait_for_executions<F>(store: &MemoryStore, mut done: F) -> Vec<Execution>
where
    F: FnMut(&[Execution]) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let executions = store.executions().await;
        if done(&executions) {
            return executions;
        }
        assert!(Instant::now() < deadline, "timed out; executions: {executions:#?}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the execution has a job matching `done`, and return it.
pub async fn wait_for_job<F>(store: &MemoryStore, execution_id: i64, mut done: F) -> Job
where
    F: FnMut(&Job) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let jobs = store.list_jobs(execution_id).await.unwrap();
        if let Some(job) = jobs.into_iter().find(|j| done(j)) {
            return job;
        }
        assert!(Instant::now() < deadline, "timed out waiting for a job");
        sleep(Duration::from_millis(10)).await;
    }
}
