//! State tree envelope.
//!
//! The browser holds one envelope per mounted widget tree and returns it
//! with every call:
//!
//! ```text
//! { "blob": "<sealed state>", "key": "row-1", "public": { "count": 3 },
//!   "children": [ { "blob": ..., "public": ..., "children": [] } ] }
//! ```
//!
//! The blob is authoritative for class, key and private state. `key` is an
//! unauthenticated copy for client-side targeting and is ignored on decode.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One widget instance and its descendants, parent-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub blob: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub public: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Envelope>,
}

impl Envelope {
    pub fn new(blob: impl Into<String>, public: Map<String, Value>) -> Self {
        Self {
            blob: blob.into(),
            key: None,
            public,
            children: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_child(mut self, child: Envelope) -> Self {
        self.children.push(child);
        self
    }

    /// Number of instances in this tree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Envelope::count).sum::<usize>()
    }

    /// Follow a key path using the clear-text keys.
    pub fn find(&self, path: &TargetPath) -> Option<&Envelope> {
        path.segments().iter().try_fold(self, |node, segment| {
            node.children
                .iter()
                .find(|child| child.key.as_deref() == Some(segment.as_str()))
        })
    }

    pub fn find_mut(&mut self, path: &TargetPath) -> Option<&mut Envelope> {
        let mut node = self;
        for segment in path.segments() {
            node = node
                .children
                .iter_mut()
                .find(|child| child.key.as_deref() == Some(segment.as_str()))?;
        }
        Some(node)
    }
}

/// Child-key chain from the root to a target instance. Empty is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetPath(Vec<String>);

impl TargetPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(mut self, key: impl Into<String>) -> Self {
        self.0.push(key.into());
        self
    }
}

impl<S: Into<String>> FromIterator<S> for TargetPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("/"))
        }
    }
}
