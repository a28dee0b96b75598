//! Inbound message routing.

use std::sync::Arc;

use super::{RuntimeEvent, SyncContext, WidgetCell, merge_public};
use crate::{debug, log, protocol::ServerMessage};

/// What happens to a widget when the server removes its group.
pub trait RemovalHook: Send + Sync {
    fn remove(&self, ctx: &SyncContext, component_id: &str);
}

/// Drop the widget from the runtime and its node from the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDetach;

impl RemovalHook for PlainDetach {
    fn remove(&self, ctx: &SyncContext, component_id: &str) {
        ctx.detach(component_id);
    }
}

pub(super) fn route(ctx: &SyncContext, msg: ServerMessage) {
    match msg {
        ServerMessage::Connected { version } => {
            debug!("runtime"; "broker version {}", version);
        }
        ServerMessage::SubscriptionResponse {
            group,
            component_id,
            status,
            message,
        } => {
            if let Some(text) = &message {
                log!("runtime"; "{} in {}: {}", component_id, group, text);
            }
            ctx.inner.emit(RuntimeEvent::SubscriptionStatus {
                component_id,
                group,
                status,
                message,
            });
        }
        ServerMessage::Notify { group, event, data } => {
            for cell in members(ctx, &group) {
                ctx.inner.emit(RuntimeEvent::Notify {
                    component_id: cell.id.clone(),
                    group: group.clone(),
                    event: event.clone(),
                    data: data.clone(),
                });
            }
        }
        ServerMessage::UpdateData { group, data } => {
            for cell in members(ctx, &group) {
                merge_public(&cell, &data);
                ctx.inner.emit(RuntimeEvent::DataUpdated {
                    component_id: cell.id.clone(),
                });
            }
        }
        ServerMessage::Remove { group } => {
            let hook = Arc::clone(&ctx.inner.removal);
            for cell in members(ctx, &group) {
                hook.remove(ctx, &cell.id);
            }
        }
    }
}

/// Widgets of this context in `group`, sorted by id.
fn members(ctx: &SyncContext, group: &str) -> Vec<Arc<WidgetCell>> {
    let mut cells: Vec<_> = ctx
        .inner
        .widgets
        .iter()
        .filter(|entry| entry.value().in_group(group))
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    cells.sort_by(|a, b| a.id.cmp(&b.id));
    cells
}
