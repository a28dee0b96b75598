//! Reconciliation Merger
//!
//! Children are matched by `data-wire-key` when the incoming node has one,
//! otherwise by position and tag. Matched nodes are updated in place so
//! live bound data survives where the node's [`MergeMode`] asks for it;
//! unmatched incoming nodes are imported and unmatched live nodes dropped.

use serde_json::Map;

use super::{MergeError, MergeMode, NodeId, View};

/// Merge freshly rendered markup into the current view.
pub fn merge(current: &View, markup: &str) -> Result<View, MergeError> {
    let incoming = View::parse(markup)?;
    let mut merged = current.clone();
    merge_node(&mut merged, View::ROOT, &incoming, View::ROOT);
    merged.compact();
    Ok(merged)
}

pub(super) fn merge_node(live: &mut View, id: NodeId, incoming: &View, from: NodeId) {
    let source = &incoming.nodes[from];

    let data = match &source.mode {
        MergeMode::Default => source.data.clone(),
        MergeMode::PreserveLocal => live.nodes[id].data.clone(),
        MergeMode::SelectiveUpdate { new, old } => {
            let current = &live.nodes[id].data;
            let mut data: Map<_, _> = current.clone();
            for (key, value) in new {
                // Local edits since the snapshot win
                if current.get(key) == old.get(key) {
                    data.insert(key.clone(), value.clone());
                }
            }
            data
        }
    };

    let node = &mut live.nodes[id];
    node.kind = source.kind.clone();
    node.key = source.key.clone();
    node.component = source.component.clone();
    node.mode = source.mode.clone();
    node.data = data;

    merge_children(live, id, incoming, &source.children);
}

pub(super) fn merge_children(live: &mut View, parent: NodeId, incoming: &View, from: &[NodeId]) {
    let existing = live.nodes[parent].children.clone();
    let mut used = vec![false; existing.len()];
    let mut children = Vec::with_capacity(from.len());

    for (pos, &child) in from.iter().enumerate() {
        let source = &incoming.nodes[child];
        let matched = match &source.key {
            Some(key) => existing.iter().position(|&candidate| {
                let node = &live.nodes[candidate];
                node.key.as_ref() == Some(key) && node.same_shape(source)
            }),
            None => existing.get(pos).copied().and_then(|candidate| {
                let node = &live.nodes[candidate];
                (node.key.is_none() && node.same_shape(source)).then_some(pos)
            }),
        }
        .filter(|&index| !used[index]);

        match matched {
            Some(index) => {
                used[index] = true;
                merge_node(live, existing[index], incoming, child);
                children.push(existing[index]);
            }
            None => children.push(import(live, incoming, child)),
        }
    }

    live.nodes[parent].children = children;
}

/// Copy a subtree of `incoming` into `live`.
pub(super) fn import(live: &mut View, incoming: &View, from: NodeId) -> NodeId {
    let mut node = incoming.nodes[from].clone();
    node.children = incoming.nodes[from]
        .children
        .iter()
        .map(|&child| import(live, incoming, child))
        .collect();
    live.push(node)
}
