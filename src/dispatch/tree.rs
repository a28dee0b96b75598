//! Live instance tree: envelope in, envelope out.

use serde_json::Value;

use super::{DispatchError, render::RenderView};
use crate::{
    codec::{DecodeError, StateCodec},
    envelope::{Envelope, TargetPath},
    widget::{Instance, Registry},
};

pub(super) struct Node {
    pub instance: Box<dyn Instance>,
    pub key: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn class(&self) -> &'static str {
        self.instance.descriptor().class
    }

    pub fn find_mut(&mut self, path: &TargetPath) -> Result<&mut Node, DispatchError> {
        let mut node = self;
        for segment in path.segments() {
            node = node
                .children
                .iter_mut()
                .find(|child| child.key.as_deref() == Some(segment.as_str()))
                .ok_or_else(|| DispatchError::TargetNotFound(path.to_string()))?;
        }
        Ok(node)
    }
}

/// Restore an instance from a full snapshot.
pub(super) fn restore(
    registry: &Registry,
    class: &str,
    state: Value,
) -> Result<Box<dyn Instance>, DispatchError> {
    let handle = registry
        .get(class)
        .ok_or_else(|| DispatchError::UnknownClass(class.to_string()))?;
    handle
        .clone()
        .restore(state)
        .map_err(|source| {
            DecodeError::Payload {
                class: class.to_string(),
                source,
            }
            .into()
        })
}

/// Decode an envelope tree. `expected` pins the root class.
pub(super) fn decode(
    codec: &StateCodec,
    registry: &Registry,
    envelope: &Envelope,
    expected: Option<&str>,
) -> Result<Node, DispatchError> {
    let opened = match expected {
        Some(class) => codec.open_as(&envelope.blob, class)?,
        None => codec.open(&envelope.blob)?,
    };

    let mut instance = restore(registry, &opened.class, opened.state)?;
    instance
        .apply_public(&envelope.public)
        .map_err(|source| DispatchError::PublicField {
            class: opened.class.clone(),
            source,
        })?;

    let children = envelope
        .children
        .iter()
        .map(|child| decode(codec, registry, child, None))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Node {
        instance,
        key: opened.key,
        children,
    })
}

/// Re-encode every instance, parent before children.
pub(super) fn encode(codec: &StateCodec, node: &Node) -> Result<Envelope, DispatchError> {
    let class = node.class();
    let state = node.instance.snapshot().map_err(|source| state_error(class, source))?;
    let blob = codec.seal(class, node.key.as_deref(), &state)?;
    let public = node
        .instance
        .public_values()
        .map_err(|source| state_error(class, source))?;

    let children = node
        .children
        .iter()
        .map(|child| encode(codec, child))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Envelope {
        blob,
        key: node.key.clone(),
        public,
        children,
    })
}

pub(super) fn view(node: &Node) -> Result<RenderView, DispatchError> {
    let class = node.class();
    Ok(RenderView {
        class,
        key: node.key.clone(),
        state: node.instance.snapshot().map_err(|source| state_error(class, source))?,
        public: node
            .instance
            .public_values()
            .map_err(|source| state_error(class, source))?,
        children: node.children.iter().map(view).collect::<Result<_, _>>()?,
    })
}

pub(super) fn state_error(class: &str, source: serde_json::Error) -> DispatchError {
    DispatchError::State {
        class: class.to_string(),
        source,
    }
}
