//! Graph validation and traversal
//!
//! Validation enforces the structural invariants every persisted flow must
//! hold: unique ids, edge reference integrity, entry existence, unambiguous
//! branching and acyclicity. Cycle detection is DFS with an explicit
//! recursion stack so the offending path can be reported.

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::error::{ErrorCode, RunError};
use crate::flow::{Flow, Node, DEFAULT_EDGE_LABEL};

/// Validate a flow's structural invariants
///
/// # Errors
///
/// - `DAG_INVALID` for duplicate ids, dangling edge references, a missing
///   entry node, or ambiguous branching (more than one unlabeled outgoing
///   edge, or duplicate labels on one node's outgoing edges).
/// - `DAG_CYCLE` when the graph contains a cycle; `data.path` carries the
///   offending node sequence.
pub fn validate_flow(flow: &Flow) -> Result<(), RunError> {
    let mut node_ids: HashSet<&str> = HashSet::new();
    for node in &flow.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(RunError::new(
                ErrorCode::DagInvalid,
                format!("duplicate node id: {}", node.id),
            ));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::new();
    for edge in &flow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(RunError::new(
                ErrorCode::DagInvalid,
                format!("duplicate edge id: {}", edge.id),
            ));
        }
        for endpoint in [&edge.from, &edge.to] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(RunError::new(
                    ErrorCode::DagInvalid,
                    format!("edge {} references unknown node: {endpoint}", edge.id),
                ));
            }
        }
    }

    if let Some(entry) = &flow.entry_node_id {
        if !node_ids.contains(entry.as_str()) {
            return Err(RunError::new(
                ErrorCode::DagInvalid,
                format!("entry node does not exist: {entry}"),
            ));
        }
    }

    check_branching(flow)?;
    check_acyclic(flow)
}

/// Reject ambiguous branching: at most one unlabeled outgoing edge per
/// node, and no repeated label among one node's outgoing edges.
fn check_branching(flow: &Flow) -> Result<(), RunError> {
    for node in &flow.nodes {
        let mut unlabeled = 0usize;
        let mut labels: HashSet<&str> = HashSet::new();
        for edge in flow.outgoing_edges(&node.id) {
            match &edge.label {
                None => unlabeled += 1,
                Some(label) => {
                    if !labels.insert(label.as_str()) {
                        return Err(RunError::new(
                            ErrorCode::DagInvalid,
                            format!("node {} has duplicate outgoing label: {label}", node.id),
                        ));
                    }
                }
            }
        }
        if unlabeled > 1 {
            return Err(RunError::new(
                ErrorCode::DagInvalid,
                format!("node {} has {unlabeled} unlabeled outgoing edges", node.id),
            ));
        }
    }
    Ok(())
}

fn check_acyclic(flow: &Flow) -> Result<(), RunError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &flow.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    // Iterative DFS; `path` mirrors the recursion stack so a back-edge can
    // report the full cycle.
    for start in flow.nodes.iter().map(|n| n.id.as_str()) {
        if marks.contains_key(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        while let Some((node, next_child)) = stack.last().copied() {
            if next_child == 0 {
                marks.insert(node, Mark::Visiting);
                path.push(node);
            }
            let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if next_child < children.len() {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let child = children[next_child];
                match marks.get(child) {
                    Some(Mark::Visiting) => {
                        let cycle_start = path.iter().position(|&n| n == child).unwrap_or(0);
                        let mut cycle: Vec<&str> = path[cycle_start..].to_vec();
                        cycle.push(child);
                        return Err(RunError::new(
                            ErrorCode::DagCycle,
                            format!("cycle detected: {}", cycle.join(" -> ")),
                        )
                        .with_data(json!({ "path": cycle })));
                    }
                    Some(Mark::Done) => {}
                    None => stack.push((child, 0)),
                }
            } else {
                marks.insert(node, Mark::Done);
                path.pop();
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Pick the next node leaving `node_id`
///
/// Resolution falls through: an edge matching the requested label, then
/// the `default`-labeled edge, then — when exactly one outgoing edge
/// exists — that edge. Otherwise there is no next node.
pub fn find_next_node<'a>(flow: &'a Flow, node_id: &str, label: Option<&str>) -> Option<&'a Node> {
    let outgoing: Vec<_> = flow.outgoing_edges(node_id).collect();

    if let Some(label) = label {
        if let Some(edge) = outgoing.iter().find(|e| e.label.as_deref() == Some(label)) {
            return flow.node(&edge.to);
        }
    }
    if let Some(edge) = outgoing
        .iter()
        .find(|e| e.label.as_deref() == Some(DEFAULT_EDGE_LABEL))
    {
        return flow.node(&edge.to);
    }
    if outgoing.len() == 1 {
        return flow.node(&outgoing[0].to);
    }
    None
}

/// All nodes reachable from `entry` by DFS, including `entry` itself
pub fn reachable_nodes(flow: &Flow, entry: &str) -> HashSet<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &flow.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut stack = vec![entry];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.to_string()) {
            continue;
        }
        if let Some(children) = adjacency.get(node) {
            stack.extend(children.iter().copied());
        }
    }
    seen
}

/// Resolve the node a run starts from
///
/// Precedence: explicit override, the flow's entry, any zero-in-degree
/// node that is not a trigger node, the first node.
pub fn resolve_entry_node<'a>(flow: &'a Flow, override_id: Option<&str>) -> Option<&'a Node> {
    if let Some(id) = override_id {
        return flow.node(id);
    }
    if let Some(id) = &flow.entry_node_id {
        if let Some(node) = flow.node(id) {
            return Some(node);
        }
    }

    let mut in_degree: HashMap<&str, usize> = flow.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &flow.edges {
        if let Some(deg) = in_degree.get_mut(edge.to.as_str()) {
            *deg += 1;
        }
    }
    flow.nodes
        .iter()
        .find(|n| in_degree.get(n.id.as_str()) == Some(&0) && !n.kind.starts_with("trigger"))
        .or_else(|| flow.nodes.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::tests::{edge, flow_with, node};
    use crate::flow::Edge;

    fn labeled(id: &str, from: &str, to: &str, label: &str) -> Edge {
        Edge {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            label: Some(label.to_string()),
        }
    }

    #[test]
    fn linear_flow_is_valid() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
        );
        validate_flow(&flow).expect("linear flow should validate");
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let flow = flow_with(vec![node("a"), node("a")], vec![]);
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagInvalid);
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let flow = flow_with(vec![node("a")], vec![edge("e1", "a", "ghost")]);
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagInvalid);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn missing_entry_is_rejected() {
        let mut flow = flow_with(vec![node("a")], vec![]);
        flow.entry_node_id = Some("nope".to_string());
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagInvalid);
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![
                labeled("e1", "a", "b", "x"),
                labeled("e2", "b", "c", "y"),
                labeled("e3", "c", "a", "z"),
            ],
        );
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagCycle);
        let path = err.data.unwrap()["path"].as_array().unwrap().len();
        assert_eq!(path, 4); // a -> b -> c -> a
    }

    #[test]
    fn ambiguous_unlabeled_branching_is_rejected() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b"), edge("e2", "a", "c")],
        );
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagInvalid);
        assert!(err.message.contains("unlabeled"));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![labeled("e1", "a", "b", "yes"), labeled("e2", "a", "c", "yes")],
        );
        let err = validate_flow(&flow).unwrap_err();
        assert_eq!(err.code, ErrorCode::DagInvalid);
    }

    #[test]
    fn diamond_with_labels_is_valid() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c"), node("d")],
            vec![
                labeled("e1", "a", "b", "left"),
                labeled("e2", "a", "c", "right"),
                edge("e3", "b", "d"),
                edge("e4", "c", "d"),
            ],
        );
        validate_flow(&flow).expect("labeled diamond should validate");
    }

    #[test]
    fn next_node_prefers_requested_label() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![
                labeled("e1", "a", "b", "default"),
                labeled("e2", "a", "c", "alt"),
            ],
        );
        assert_eq!(find_next_node(&flow, "a", Some("alt")).unwrap().id, "c");
        assert_eq!(find_next_node(&flow, "a", None).unwrap().id, "b");
        // Unknown label falls through to the default edge
        assert_eq!(find_next_node(&flow, "a", Some("missing")).unwrap().id, "b");
    }

    #[test]
    fn single_outgoing_edge_is_followed_without_label() {
        let flow = flow_with(vec![node("a"), node("b")], vec![edge("e1", "a", "b")]);
        assert_eq!(find_next_node(&flow, "a", None).unwrap().id, "b");
        assert!(find_next_node(&flow, "b", None).is_none());
    }

    #[test]
    fn multiple_labeled_edges_without_match_yield_none() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c")],
            vec![labeled("e1", "a", "b", "x"), labeled("e2", "a", "c", "y")],
        );
        assert!(find_next_node(&flow, "a", None).is_none());
    }

    #[test]
    fn reachable_nodes_walks_from_entry() {
        let flow = flow_with(
            vec![node("a"), node("b"), node("c"), node("island")],
            vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
        );
        let reachable = reachable_nodes(&flow, "a");
        assert!(reachable.contains("a"));
        assert!(reachable.contains("c"));
        assert!(!reachable.contains("island"));
    }

    #[test]
    fn entry_resolution_falls_through() {
        let mut flow = flow_with(
            vec![node("a"), node("b")],
            vec![edge("e1", "a", "b")],
        );

        // Explicit override wins
        assert_eq!(resolve_entry_node(&flow, Some("b")).unwrap().id, "b");
        // Then the flow's entry
        assert_eq!(resolve_entry_node(&flow, None).unwrap().id, "a");
        // Then zero in-degree
        flow.entry_node_id = None;
        assert_eq!(resolve_entry_node(&flow, None).unwrap().id, "a");
    }
}
