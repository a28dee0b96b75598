//! Markup to view, via `tl`.

use serde_json::{Map, Value};

use super::{
    COMPONENT_ATTR, DATA_ATTR, KEY_ATTR, MergeError, MergeMode, NodeId, NodeKind, PRESERVE_ATTR,
    SELECTIVE_ATTR, View, ViewNode,
};
use crate::utils::html::unescape;

pub(super) fn parse(markup: &str) -> Result<View, MergeError> {
    let dom = tl::parse(markup, tl::ParserOptions::default()).map_err(|_| MergeError::Parse)?;
    let parser = dom.parser();

    let mut view = View::default();
    let mut roots = Vec::new();
    for handle in dom.children() {
        if let Some(id) = convert(&mut view, *handle, parser)? {
            roots.push(id);
        }
    }
    view.nodes[View::ROOT].children = roots;
    Ok(view)
}

fn convert(
    view: &mut View,
    handle: tl::NodeHandle,
    parser: &tl::Parser,
) -> Result<Option<NodeId>, MergeError> {
    let Some(node) = handle.get(parser) else {
        return Ok(None);
    };

    match node {
        tl::Node::Tag(tag) => {
            let name = tag.name().as_utf8_str().to_lowercase();
            let attrs: Vec<(String, Option<String>)> = tag
                .attributes()
                .iter()
                .map(|(key, value)| {
                    let key: &str = key.as_ref();
                    (key.to_lowercase(), value.map(|v| unescape(&v).into_owned()))
                })
                .collect();

            let mut element = ViewNode::new(NodeKind::Element {
                tag: name,
                attrs: Vec::new(),
            });
            read_markers(&mut element, &attrs)?;
            if let NodeKind::Element { attrs: slot, .. } = &mut element.kind {
                *slot = attrs;
            }

            let mut children = Vec::new();
            for child in tag.children().top().iter() {
                if let Some(id) = convert(view, *child, parser)? {
                    children.push(id);
                }
            }
            element.children = children;
            Ok(Some(view.push(element)))
        }
        tl::Node::Raw(bytes) => {
            let text = bytes.as_utf8_str();
            if text.trim().is_empty() {
                return Ok(None);
            }
            Ok(Some(view.push(ViewNode::new(NodeKind::Text(
                unescape(&text).into_owned(),
            )))))
        }
        tl::Node::Comment(_) => Ok(None),
    }
}

/// Read identity, bound data and merge mode from marker attributes.
fn read_markers(node: &mut ViewNode, attrs: &[(String, Option<String>)]) -> Result<(), MergeError> {
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_deref().unwrap_or_default())
    };

    node.component = get(COMPONENT_ATTR).map(str::to_string);
    node.key = get(KEY_ATTR).map(str::to_string);
    if let Some(raw) = get(DATA_ATTR) {
        node.data = json_object(DATA_ATTR, raw)?;
    }

    node.mode = if get(PRESERVE_ATTR).is_some() {
        MergeMode::PreserveLocal
    } else if let Some(raw) = get(SELECTIVE_ATTR) {
        MergeMode::SelectiveUpdate {
            new: node.data.clone(),
            old: json_object(SELECTIVE_ATTR, raw)?,
        }
    } else {
        MergeMode::Default
    };
    Ok(())
}

fn json_object(attr: &'static str, raw: &str) -> Result<Map<String, Value>, MergeError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw).map_err(|source| MergeError::Attribute { attr, source })
}
