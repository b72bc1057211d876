//! Read-only view of an execution handed to instructions.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use db::{Execution, ExecutionId, Job, WorkflowId};

/// Data an instruction may read while it runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub workflow_key: String,
    pub execution_id: ExecutionId,
    /// Snapshot of the triggering data.
    pub context: Value,
    /// Results of the jobs produced so far, keyed by node key.
    pub jobs_by_node_key: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution: &Execution) -> Self {
        Self {
            workflow_id: execution.workflow_id,
            workflow_key: execution.key.clone(),
            execution_id: execution.id,
            context: execution.context.clone(),
            jobs_by_node_key: HashMap::new(),
        }
    }

    /// Record a job result so later nodes can reference it.
    pub fn record(&mut self, node_key: &str, job: &Job) {
        self.jobs_by_node_key.insert(node_key.to_string(), job.result.clone());
    }

    /// Variables visible to `{{…}}` references.
    pub fn scope(&self) -> Value {
        let jobs: Map<String, Value> = self
            .jobs_by_node_key
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({
            "$context": self.context,
            "$jobsMapByNodeKey": jobs,
        })
    }

    /// Replace every string of the exact form `{{path}}` inside `value` with
    /// the scope value at `path` (dot separated). Unknown paths become `null`.
    pub fn resolve(&self, value: &Value) -> Value {
        let scope = self.scope();
        resolve_in(&scope, value)
    }
}

fn resolve_in(scope: &Value, value: &Value) -> Value {
    match value {
        Value::String(s) => match reference(s) {
            Some(path) => lookup(scope, path).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_in(scope, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_in(scope, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn reference(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    Some(inner.trim())
}

fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |cur, segment| match cur {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        let mut jobs = HashMap::new();
        jobs.insert("calc".to_string(), json!({ "total": 42, "items": [1, 2] }));
        ExecutionContext {
            workflow_id: 1,
            workflow_key: "k1".into(),
            execution_id: 7,
            context: json!({ "data": { "x": 1 } }),
            jobs_by_node_key: jobs,
        }
    }

    #[test]
    fn resolves_context_and_job_references() {
        let ctx = ctx();
        assert_eq!(ctx.resolve(&json!("{{ $context.data.x }}")), json!(1));
        assert_eq!(ctx.resolve(&json!("{{$jobsMapByNodeKey.calc.total}}")), json!(42));
        assert_eq!(ctx.resolve(&json!("{{$jobsMapByNodeKey.calc.items.1}}")), json!(2));
    }

    #[test]
    fn resolves_nested_values_and_keeps_literals() {
        let ctx = ctx();
        let resolved = ctx.resolve(&json!({ "a": ["{{$context.data.x}}", "plain"], "b": 3 }));
        assert_eq!(resolved, json!({ "a": [1, "plain"], "b": 3 }));
    }

    #[test]
    fn unknown_reference_is_null() {
        assert_eq!(ctx().resolve(&json!("{{$context.missing.deep}}")), Value::Null);
    }
}
