//! Flow validation — run this before persisting a workflow.
//!
//! Rules enforced:
//! 1. Node ids and node keys must be unique within the flow.
//! 2. Every `upstream_id`/`downstream_id` must reference an existing node,
//!    and downstream links must be mirrored by the target's `upstream_id`.
//! 3. Exactly one node has no upstream (the root); an empty flow is valid.
//! 4. Following downstream and branch links never revisits a node.
//!
//! Returns the root node id on success.

use std::collections::{HashMap, HashSet, VecDeque};

use db::{FlowNode, NodeId};

use crate::EngineError;

/// Validate the flow graph and return its root node.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] / [`EngineError::DuplicateNodeKey`]
/// - [`EngineError::UnknownNodeReference`] / [`EngineError::BrokenLink`]
/// - [`EngineError::BranchWithoutUpstream`] / [`EngineError::InvalidRoot`]
/// - [`EngineError::CycleDetected`]
pub fn validate_flow(nodes: &[FlowNode]) -> Result<Option<NodeId>, EngineError> {
    if nodes.is_empty() {
        return Ok(None);
    }

    // -----------------------------------------------------------------------
    // 1. Ensure node ids and keys are unique
    // -----------------------------------------------------------------------
    let mut by_id: HashMap<NodeId, &FlowNode> = HashMap::with_capacity(nodes.len());
    let mut keys: HashSet<&str> = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.id, node).is_some() {
            return Err(EngineError::DuplicateNodeId(node.id));
        }
        if !keys.insert(node.key.as_str()) {
            return Err(EngineError::DuplicateNodeKey(node.key.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate links
    // -----------------------------------------------------------------------
    for node in nodes {
        if let Some(up) = node.upstream_id {
            if !by_id.contains_key(&up) {
                return Err(EngineError::UnknownNodeReference {
                    node_id: node.id,
                    target: up,
                    side: "upstream",
                });
            }
        } else if node.branch_index.is_some() {
            return Err(EngineError::BranchWithoutUpstream(node.id));
        }

        if let Some(down) = node.downstream_id {
            let target = by_id.get(&down).ok_or(EngineError::UnknownNodeReference {
                node_id: node.id,
                target: down,
                side: "downstream",
            })?;
            if target.upstream_id != Some(node.id) || target.branch_index.is_some() {
                return Err(EngineError::BrokenLink { from: node.id, to: down });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Exactly one root
    // -----------------------------------------------------------------------
    let roots: Vec<NodeId> = nodes
        .iter()
        .filter(|n| n.upstream_id.is_none())
        .map(|n| n.id)
        .collect();
    if roots.len() != 1 {
        return Err(EngineError::InvalidRoot(roots.len()));
    }

    // -----------------------------------------------------------------------
    // 4. Acyclic (Kahn's algorithm over downstream + branch edges)
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut in_degree: HashMap<NodeId, usize> = nodes.iter().map(|n| (n.id, 0)).collect();

    for node in nodes {
        let mut edge = |from: NodeId, to: NodeId| {
            adjacency.entry(from).or_default().push(to);
            *in_degree.entry(to).or_insert(0) += 1;
        };
        if let Some(down) = node.downstream_id {
            edge(node.id, down);
        }
        if let (Some(up), Some(_)) = (node.upstream_id, node.branch_index) {
            edge(up, node.id);
        }
    }

    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(next) = adjacency.get(&id) {
            for &n in next {
                let deg = in_degree.entry(n).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(n);
                }
            }
        }
    }

    if visited != nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(Some(roots[0]))
}
