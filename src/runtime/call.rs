//! Calling server operations from a bound widget.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use super::{
    ContextInner, RuntimeError, RuntimeEvent, SyncContext, WidgetCell,
    rate::{Fire, RateGate},
    transport::{CallReply, CallRequest, ReplyPayload},
};
use crate::{
    debug,
    envelope::TargetPath,
    log,
    protocol::{CallBody, CallResponse, CallSuccess, ClientMessage},
    view::View,
};

/// Longest excerpt of a non-JSON failure body kept in the error.
const MAX_FAILURE_TEXT: usize = 200;

/// Handle to a widget bound into a [`SyncContext`].
#[derive(Clone)]
pub struct BoundWidget {
    pub(super) cell: Arc<WidgetCell>,
    ctx: SyncContext,
}

impl BoundWidget {
    pub(super) fn new(cell: Arc<WidgetCell>, ctx: SyncContext) -> Self {
        Self { cell, ctx }
    }

    pub fn component_id(&self) -> &str {
        &self.cell.id
    }

    pub fn class(&self) -> &str {
        &self.cell.manifest.class
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn is_removed(&self) -> bool {
        self.cell.is_removed()
    }

    /// Current public values, as the next call will send them.
    pub fn public(&self) -> Map<String, Value> {
        self.cell.state.lock().envelope.public.clone()
    }

    /// Change a public value locally. Only declared public fields are sent.
    pub fn set_public(&self, field: &str, value: Value) -> bool {
        if !self.cell.manifest.public.iter().any(|f| f == field) {
            return false;
        }
        self.cell
            .state
            .lock()
            .envelope
            .public
            .insert(field.to_string(), value);
        true
    }

    pub fn groups(&self) -> Vec<String> {
        self.cell.state.lock().groups.clone()
    }

    /// Attach `child` so its envelope travels with this widget's calls.
    pub fn adopt(&self, child: &BoundWidget) {
        let mut children = self.cell.children.lock();
        if !children.iter().any(|c| Arc::ptr_eq(c, &child.cell)) {
            children.push(Arc::clone(&child.cell));
        }
    }

    /// Invoke an external operation and resolve with its result.
    ///
    /// Operations declared with a rate policy go through the widget's gate
    /// for that operation; every caller shares it.
    pub async fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let manifest = self.cell.manifest.operation(operation).ok_or_else(|| {
            RuntimeError::UnknownOperation {
                class: self.cell.manifest.class.clone(),
                operation: operation.to_string(),
            }
        })?;

        match manifest.rate {
            Some(policy) => {
                let gate = self
                    .cell
                    .gates
                    .lock()
                    .entry(operation.to_string())
                    .or_insert_with(|| RateGate::new(policy, self.fire(operation)))
                    .clone();
                gate.submit(args).await
            }
            None => exchange(&self.ctx.inner, &self.cell, operation, args).await,
        }
    }

    /// Gate callback. Holds weak references so a pending timer never keeps
    /// a detached widget alive.
    fn fire(&self, operation: &str) -> Fire {
        let cell = Arc::downgrade(&self.cell);
        let ctx = Arc::downgrade(&self.ctx.inner);
        let operation = operation.to_string();
        Arc::new(move |args| {
            let cell: Weak<WidgetCell> = cell.clone();
            let ctx: Weak<ContextInner> = ctx.clone();
            let operation = operation.clone();
            Box::pin(async move {
                let (Some(cell), Some(ctx)) = (cell.upgrade(), ctx.upgrade()) else {
                    return Err(RuntimeError::Abandoned);
                };
                exchange(&ctx, &cell, &operation, args).await
            })
        })
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Join `group`. Queued while the channel is down.
    pub fn subscribe(&self, group: &str) -> Result<(), RuntimeError> {
        self.require_channel()?;
        {
            let mut state = self.cell.state.lock();
            if !state.groups.iter().any(|g| g == group) {
                state.groups.push(group.to_string());
            }
        }
        self.ctx.send(ClientMessage::Subscribe {
            group: group.to_string(),
            component_id: self.cell.id.clone(),
        });
        Ok(())
    }

    pub fn unsubscribe(&self, group: &str) -> Result<(), RuntimeError> {
        self.require_channel()?;
        self.cell.state.lock().groups.retain(|g| g != group);
        self.ctx.send(ClientMessage::Unsubscribe {
            group: group.to_string(),
            component_id: self.cell.id.clone(),
        });
        Ok(())
    }

    /// Publish `event` to the members of `group`.
    pub fn notify(&self, group: &str, event: &str, data: Value, exclude_self: bool) -> Result<(), RuntimeError> {
        self.require_channel()?;
        self.ctx.send(ClientMessage::Notify {
            group: group.to_string(),
            component_id: self.cell.id.clone(),
            event: event.to_string(),
            data,
            exclude_self,
        });
        Ok(())
    }

    fn require_channel(&self) -> Result<(), RuntimeError> {
        if self.cell.is_removed() {
            return Err(RuntimeError::Removed(self.cell.id.clone()));
        }
        match self.ctx.inner.connector {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NoChannel),
        }
    }
}

// ============================================================================
// Exchange
// ============================================================================

/// One request/response round trip for `operation`.
pub(super) async fn exchange(
    inner: &Arc<ContextInner>,
    cell: &Arc<WidgetCell>,
    operation: &str,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    if cell.is_removed() {
        return Err(RuntimeError::Removed(cell.id.clone()));
    }
    let endpoint = cell
        .manifest
        .operation(operation)
        .map(|op| op.endpoint.clone())
        .ok_or_else(|| RuntimeError::UnknownOperation {
            class: cell.manifest.class.clone(),
            operation: operation.to_string(),
        })?;

    let request = CallRequest {
        endpoint,
        body: CallBody {
            envelope: cell.envelope_tree(),
            args,
            target: TargetPath::root(),
        },
        current_url: inner.current_url.read().clone(),
        csrf_token: inner.csrf_token.clone(),
    };

    debug!("runtime"; "{} -> {}", cell.id, request.endpoint);
    let reply = inner.transport.call(request).await?;
    let success = accept(reply, inner, cell)?;
    let Some(success) = success else {
        return Ok(Value::Null);
    };

    apply(inner, cell, success).await
}

/// Validate a reply, publishing its messages. `None` for downloads.
fn accept(
    reply: CallReply,
    inner: &ContextInner,
    cell: &WidgetCell,
) -> Result<Option<CallSuccess>, RuntimeError> {
    let ok = reply.is_success();
    let status = reply.status;
    if !reply.marker {
        // Not from the endpoint; a failing status still says what happened
        return Err(match reply.payload {
            _ if ok => RuntimeError::MissingMarker,
            ReplyPayload::Text(text) => http_failure(status, &text),
            _ => http_failure(status, ""),
        });
    }
    if !reply.messages.is_empty() {
        inner.emit(RuntimeEvent::Messages {
            component_id: cell.id.clone(),
            messages: reply.messages.clone(),
        });
    }

    let body = match reply.payload {
        ReplyPayload::Download {
            filename,
            mime,
            bytes,
        } if ok => {
            inner.emit(RuntimeEvent::Download {
                component_id: cell.id.clone(),
                filename,
                mime,
                bytes,
            });
            return Ok(None);
        }
        ReplyPayload::Download { .. } => {
            return Err(RuntimeError::Call {
                status,
                kind: "http".into(),
                message: "unexpected attachment".into(),
            });
        }
        ReplyPayload::Text(text) => return Err(http_failure(status, &text)),
        ReplyPayload::Json(body) => body,
    };

    match serde_json::from_value::<CallResponse>(body) {
        Ok(CallResponse::Success(success)) if ok && success.success => Ok(Some(success)),
        Ok(CallResponse::Failure { error, .. }) => Err(RuntimeError::Call {
            status,
            kind: error.kind,
            message: error.message,
        }),
        Ok(CallResponse::Success(_)) | Err(_) => Err(http_failure(status, "")),
    }
}

/// Failure for a reply that carries no failure body of its own.
fn http_failure(status: u16, text: &str) -> RuntimeError {
    let text = text.trim();
    let message = if text.is_empty() {
        format!("unexpected response with status {status}")
    } else {
        text.chars().take(MAX_FAILURE_TEXT).collect()
    };
    RuntimeError::Call {
        status,
        kind: "http".into(),
        message,
    }
}

/// Apply state, markup, assets and callbacks; resolve with the result.
async fn apply(
    inner: &Arc<ContextInner>,
    cell: &Arc<WidgetCell>,
    success: CallSuccess,
) -> Result<Value, RuntimeError> {
    cell.apply_state(&success.state);

    if let Some(html) = &success.html {
        let incoming = View::parse(html)?;
        inner.document.lock().merge_component(&cell.id, &incoming)?;
    }

    let ctx = SyncContext {
        inner: Arc::clone(inner),
    };
    for url in success.js.iter().chain(&success.styles) {
        ctx.ensure_asset(url).await?;
    }

    let widget = BoundWidget::new(Arc::clone(cell), ctx);
    for callback in &success.callbacks {
        let name = callback.name();
        if let Err(e) = inner.commands.invoke(&widget, &name, &callback.args) {
            log!("runtime"; "callback {} from {}: {}", name, cell.id, e);
            return Err(e.into());
        }
    }

    Ok(success.result)
}
