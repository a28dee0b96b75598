//! Dispatch Engine
//!
//! Runs one operation call against a stateless widget tree:
//!
//! ```text
//! envelope ──decode──► live tree ──walk target──► check operation
//!                                                      │
//!          ◄──encode── watchers settle ◄── invoke ◄────┘
//!                           │
//!                           └──► render target (unless no-update)
//! ```
//!
//! Nothing survives the call except what is sealed into the new envelope.
//! Any error aborts the call without producing an envelope, so a failed
//! operation never advances client state.

mod error;
pub mod render;
mod tree;
mod watch;

pub use error::DispatchError;
pub use render::{Asset, RenderView, Rendered, Renderer};

use std::sync::Arc;

use serde_json::Value;

use crate::{
    codec::StateCodec,
    debug,
    envelope::Envelope,
    protocol::{CallBody, CallSuccess, CallbackDescriptor, UserMessage},
    widget::{Attachment, CallContext, Registry, RequestMeta, Widget},
};

/// Default cap on watcher passes per call.
pub const DEFAULT_WATCH_LIMIT: usize = 10;

/// Side effects collected from the operation and its watchers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    pub messages: Vec<UserMessage>,
    pub callbacks: Vec<CallbackDescriptor>,
    pub attachment: Option<Attachment>,
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Whole tree, re-encoded
    pub envelope: Envelope,
    /// Target markup, `None` for no-update operations
    pub rendered: Option<Rendered>,
    pub result: Value,
    pub effects: SideEffects,
    /// Watcher passes needed to settle
    pub watch_passes: usize,
}

impl DispatchOutcome {
    /// Success body. Messages and attachments travel outside the body.
    pub fn to_success(&self) -> CallSuccess {
        let (js, styles) = self
            .rendered
            .as_ref()
            .map(Rendered::split_assets)
            .unwrap_or_default();
        CallSuccess {
            success: true,
            html: self.rendered.as_ref().map(|r| r.markup.clone()),
            state: self.envelope.clone(),
            js,
            styles,
            callbacks: self.effects.callbacks.clone(),
            result: self.result.clone(),
        }
    }
}

/// Initial tree description for first render.
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    class: &'static str,
    key: Option<String>,
    state: Value,
    children: Vec<Mount>,
}

impl Mount {
    pub fn new<W: Widget>(widget: &W) -> Result<Self, serde_json::Error> {
        Ok(Self {
            class: W::CLASS,
            key: None,
            state: serde_json::to_value(widget)?,
            children: Vec::new(),
        })
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn child(mut self, child: Mount) -> Self {
        self.children.push(child);
        self
    }
}

/// Stateless operation dispatcher.
pub struct Dispatcher {
    codec: Arc<StateCodec>,
    registry: Registry,
    renderer: Arc<dyn Renderer>,
    watch_limit: usize,
}

impl Dispatcher {
    pub fn new(codec: Arc<StateCodec>, registry: Registry, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            codec,
            registry,
            renderer,
            watch_limit: DEFAULT_WATCH_LIMIT,
        }
    }

    pub fn with_watch_limit(mut self, limit: usize) -> Self {
        self.watch_limit = limit;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    /// Encode and render a fresh tree.
    pub fn mount(&self, mount: &Mount) -> Result<(Envelope, Rendered), DispatchError> {
        let root = self.build(mount)?;
        let rendered = self.render(&root)?;
        let envelope = tree::encode(&self.codec, &root)?;
        Ok((envelope, rendered))
    }

    fn build(&self, mount: &Mount) -> Result<tree::Node, DispatchError> {
        Ok(tree::Node {
            instance: tree::restore(&self.registry, mount.class, mount.state.clone())?,
            key: mount.key.clone(),
            children: mount
                .children
                .iter()
                .map(|child| self.build(child))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Run `operation` on the instance addressed by `body.target`.
    ///
    /// `class` is the class the endpoint was called for; the root blob
    /// must belong to it.
    pub fn dispatch(
        &self,
        class: &str,
        operation: &str,
        body: &CallBody,
        request: RequestMeta,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut root = tree::decode(&self.codec, &self.registry, &body.envelope, Some(class))?;
        let target = root.find_mut(&body.target)?;

        let descriptor = target.instance.descriptor();
        let (index, info) =
            descriptor
                .operation(operation)
                .ok_or_else(|| DispatchError::UnknownOperation {
                    class: descriptor.class.to_string(),
                    operation: operation.to_string(),
                })?;
        if !info.spec.external {
            return Err(DispatchError::NotExternal {
                class: descriptor.class.to_string(),
                operation: operation.to_string(),
            });
        }
        let update = info.spec.update;

        let entry = target
            .instance
            .public_values()
            .map_err(|source| tree::state_error(target.class(), source))?;

        let mut ctx = CallContext::new(request);
        let result = target
            .instance
            .invoke(index, &body.args, &mut ctx)
            .map_err(|source| DispatchError::Operation {
                operation: operation.to_string(),
                source,
            })?;

        let watch_passes = watch::settle(target.instance.as_mut(), entry, self.watch_limit, &mut ctx)?;

        let rendered = if update {
            Some(self.render(target)?)
        } else {
            None
        };

        let envelope = tree::encode(&self.codec, &root)?;
        debug!(
            "dispatch";
            "{class}.{operation} at {} ({} instances, {watch_passes} watcher passes)",
            body.target,
            envelope.count()
        );

        Ok(DispatchOutcome {
            envelope,
            rendered,
            result,
            effects: SideEffects {
                messages: ctx.messages,
                callbacks: ctx.callbacks,
                attachment: ctx.attachment,
            },
            watch_passes,
        })
    }

    fn render(&self, node: &tree::Node) -> Result<Rendered, DispatchError> {
        let view = tree::view(node)?;
        self.renderer
            .render(&view)
            .map_err(|source| DispatchError::Render {
                class: node.class().to_string(),
                source,
            })
    }
}
