//! Client view model.
//!
//! A [`View`] is an arena of nodes parsed from rendered markup. Nodes that
//! carry bound data (`data-wire-data`) hold it as a JSON object which local
//! interaction may change between server round trips.
//!
//! # Markers
//!
//! | Attribute                 | Meaning                                       |
//! |---------------------------|-----------------------------------------------|
//! | `data-wire-component="id"`| node is the root of a bound widget            |
//! | `data-wire-key="k"`       | stable identity for matching during merge     |
//! | `data-wire-data='{..}'`   | bound data                                    |
//! | `data-wire-preserve`      | merge keeps the live bound data               |
//! | `data-wire-selective='{..}'` | merge applies a key only if unchanged locally |
//!
//! Markers are read once at parse time into a [`MergeMode`].

mod merge;
mod parse;

pub use merge::merge;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::html::{escape, escape_attr, is_void_element};

pub const COMPONENT_ATTR: &str = "data-wire-component";
pub const KEY_ATTR: &str = "data-wire-key";
pub const DATA_ATTR: &str = "data-wire-data";
pub const PRESERVE_ATTR: &str = "data-wire-preserve";
pub const SELECTIVE_ATTR: &str = "data-wire-selective";

pub type NodeId = usize;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("markup could not be parsed")]
    Parse,

    #[error("`{attr}` is not a JSON object")]
    Attribute {
        attr: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no node bound to component `{0}`")]
    UnknownComponent(String),
}

/// How a node's bound data is merged, decided once at parse time.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MergeMode {
    /// Incoming data replaces live data.
    #[default]
    Default,
    /// Live data is kept.
    PreserveLocal,
    /// Each incoming key applies only while the live value still equals
    /// the snapshot the server rendered against.
    SelectiveUpdate {
        new: Map<String, Value>,
        old: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Synthetic root holding top-level nodes
    Fragment,
    Element {
        tag: String,
        attrs: Vec<(String, Option<String>)>,
    },
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewNode {
    pub kind: NodeKind,
    pub key: Option<String>,
    pub component: Option<String>,
    pub data: Map<String, Value>,
    pub mode: MergeMode,
    pub children: Vec<NodeId>,
}

impl ViewNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            key: None,
            component: None,
            data: Map::new(),
            mode: MergeMode::Default,
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Whether two nodes can be merged into each other.
    fn same_shape(&self, other: &ViewNode) -> bool {
        match (&self.kind, &other.kind) {
            (NodeKind::Element { tag: a, .. }, NodeKind::Element { tag: b, .. }) => a == b,
            (NodeKind::Text(_), NodeKind::Text(_)) | (NodeKind::Fragment, NodeKind::Fragment) => true,
            _ => false,
        }
    }
}

/// Arena of view nodes. Node 0 is always the fragment root.
///
/// Merging and detaching compact the arena, so node ids taken before one
/// of those calls are stale after it.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    nodes: Vec<ViewNode>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            nodes: vec![ViewNode::new(NodeKind::Fragment)],
        }
    }
}

impl View {
    pub fn parse(markup: &str) -> Result<Self, MergeError> {
        parse::parse(markup)
    }

    pub const ROOT: NodeId = 0;

    pub fn node(&self, id: NodeId) -> Option<&ViewNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ViewNode> {
        self.nodes.get_mut(id)
    }

    /// Top-level nodes.
    pub fn roots(&self) -> &[NodeId] {
        &self.nodes[Self::ROOT].children
    }

    /// Nodes held by the arena, reachable or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, node: ViewNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Drop nodes no longer reachable from the root and renumber the rest
    /// in document order.
    pub(crate) fn compact(&mut self) {
        let mut remap = vec![None; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            if remap[id].is_some() {
                continue;
            }
            remap[id] = Some(order.len());
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        if order.len() == self.nodes.len() {
            return;
        }

        let mut old = std::mem::take(&mut self.nodes);
        self.nodes = order
            .iter()
            .map(|&id| {
                let mut node = std::mem::replace(&mut old[id], ViewNode::new(NodeKind::Fragment));
                node.children = node.children.iter().filter_map(|&child| remap[child]).collect();
                node
            })
            .collect();
    }

    /// Depth-first search for the node bound to `component`.
    pub fn find_component(&self, component: &str) -> Option<NodeId> {
        self.find(Self::ROOT, &|node| node.component.as_deref() == Some(component))
    }

    pub fn find_key(&self, key: &str) -> Option<NodeId> {
        self.find(Self::ROOT, &|node| node.key.as_deref() == Some(key))
    }

    fn find(&self, from: NodeId, pred: &dyn Fn(&ViewNode) -> bool) -> Option<NodeId> {
        let node = self.nodes.get(from)?;
        if pred(node) {
            return Some(from);
        }
        node.children.iter().find_map(|&child| self.find(child, pred))
    }

    /// Change bound data locally, as user interaction would.
    pub fn set_data(&mut self, id: NodeId, key: &str, value: Value) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.data.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Merge `incoming` into the subtree rooted at the node bound to
    /// `component`, in place.
    pub fn merge_component(&mut self, component: &str, incoming: &View) -> Result<(), MergeError> {
        let id = self
            .find_component(component)
            .ok_or_else(|| MergeError::UnknownComponent(component.to_string()))?;
        // The server renders without knowing the client's component id
        let bound = self.nodes[id].component.clone();
        match incoming.roots() {
            [single] => {
                if self.nodes[id].same_shape(&incoming.nodes[*single]) {
                    merge::merge_node(self, id, incoming, *single);
                } else {
                    let imported = merge::import(self, incoming, *single);
                    self.nodes[id] = self.nodes[imported].clone();
                }
            }
            // Several roots: merge into the bound node's children
            _ => merge::merge_children(self, id, incoming, incoming.roots()),
        }
        self.nodes[id].component = bound;
        self.compact();
        Ok(())
    }

    /// Unlink the node bound to `component` from its parent.
    pub fn detach_component(&mut self, component: &str) -> bool {
        let Some(id) = self.find_component(component) else {
            return false;
        };
        let Some(parent) = self
            .nodes
            .iter_mut()
            .find(|node| node.children.contains(&id))
        else {
            return false;
        };
        parent.children.retain(|&child| child != id);
        self.compact();
        true
    }

    /// Concatenated text content of a subtree.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if let NodeKind::Text(text) = &node.kind {
            out.push_str(text);
        }
        for &child in &node.children {
            self.collect_text(child, out);
        }
    }

    /// Serialize back to markup. Bound data is written from live values.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_node(Self::ROOT, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Fragment => {
                for &child in &node.children {
                    self.write_node(child, out);
                }
            }
            NodeKind::Text(text) => out.push_str(&escape(text)),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    let value = if name == DATA_ATTR {
                        Some(Value::Object(node.data.clone()).to_string())
                    } else {
                        value.clone()
                    };
                    out.push(' ');
                    out.push_str(name);
                    if let Some(value) = value {
                        out.push_str("=\"");
                        out.push_str(&escape_attr(&value));
                        out.push('"');
                    }
                }
                out.push('>');
                if is_void_element(tag) {
                    return;
                }
                for &child in &node.children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_markup_roundtrip_with_live_data() {
        let mut view = View::parse(
            r#"<div data-wire-component="c1" data-wire-data='{"name":"Bob"}'><input disabled><p>a &amp; b</p></div>"#,
        )
        .unwrap();
        let id = view.find_component("c1").unwrap();
        view.set_data(id, "name", json!("Dave"));

        let markup = view.to_markup();
        assert!(markup.starts_with(r#"<div data-wire-component="c1" data-wire-data="{&quot;name&quot;:&quot;Dave&quot;}">"#));
        assert!(markup.contains("<input disabled><p>a &amp; b</p>"));

        let again = View::parse(&markup).unwrap();
        let id = again.find_component("c1").unwrap();
        assert_eq!(again.node(id).unwrap().data["name"], "Dave");
    }

    #[test]
    fn test_merge_component_in_place() {
        let mut page = View::parse(
            r#"<main><section data-wire-component="c1"><p>old</p></section><aside>keep</aside></main>"#,
        )
        .unwrap();
        let fragment = View::parse(r#"<section data-wire-component="c1"><p>new</p></section>"#).unwrap();
        page.merge_component("c1", &fragment).unwrap();
        assert_eq!(
            page.to_markup(),
            r#"<main><section data-wire-component="c1"><p>new</p></section><aside>keep</aside></main>"#
        );

        assert!(matches!(
            page.merge_component("missing", &fragment),
            Err(MergeError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_detach_component() {
        let mut page = View::parse(
            r#"<main><section data-wire-component="c1"><p>x</p></section><aside>keep</aside></main>"#,
        )
        .unwrap();
        assert!(page.detach_component("c1"));
        assert!(!page.detach_component("c1"));
        assert_eq!(page.to_markup(), "<main><aside>keep</aside></main>");
        // root, main, aside, text
        assert_eq!(page.node_count(), 4);
    }

    #[test]
    fn test_repeated_merges_do_not_grow_arena() {
        let mut page = View::parse(r#"<div data-wire-component="c1"><ul><li>a</li></ul></div>"#).unwrap();
        let short = View::parse(r#"<div data-wire-component="c1"><ul><li>a</li></ul></div>"#).unwrap();
        let long = View::parse(r#"<div data-wire-component="c1"><ul><li>a</li><li>b</li></ul></div>"#).unwrap();
        let size = page.node_count();

        for _ in 0..5 {
            page.merge_component("c1", &long).unwrap();
            assert_eq!(page.node_count(), size + 2);
            page.merge_component("c1", &short).unwrap();
            assert_eq!(page.node_count(), size);
        }
        assert_eq!(page.to_markup(), r#"<div data-wire-component="c1"><ul><li>a</li></ul></div>"#);

        // A root of another shape replaces the node without leaving its
        // old subtree behind
        let swapped = View::parse(r#"<section data-wire-component="c1"><p>x</p></section>"#).unwrap();
        page.merge_component("c1", &swapped).unwrap();
        assert_eq!(page.to_markup(), r#"<section data-wire-component="c1"><p>x</p></section>"#);
        assert_eq!(page.node_count(), 4);
    }
}
