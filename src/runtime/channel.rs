//! Persistent duplex channel to the group broker.
//!
//! The channel opens on the first group message. A supervisor task owns
//! the connection: it replays what was queued while disconnected, routes
//! inbound messages, and reconnects on a fixed delay for as long as the
//! context lives.
//!
//! Ordering rules, all applied under the channel lock:
//! - messages sent while linked go straight out;
//! - messages sent while not linked queue up and go out in order, once,
//!   right after the next connect;
//! - after a drop, memberships that had reached the server are
//!   re-established before the queue is replayed.

use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

use futures_util::{SinkExt, StreamExt, future::BoxFuture};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ContextInner, RuntimeEvent, SyncContext, TransportError, route};
use crate::{
    debug, log,
    protocol::{ClientMessage, ServerMessage},
};

/// Both halves of one live connection.
pub struct Duplex {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    /// Ends when the connection drops
    pub inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Opens duplex connections to the broker.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Duplex, TransportError>>;
}

// ============================================================================
// WebSocket
// ============================================================================

/// [`Connector`] over WebSocket via `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `url` like `ws://127.0.0.1:5281`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Duplex, TransportError>> {
        Box::pin(async move {
            let (ws, _) = connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (mut write, mut read) = ws.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
            let (in_tx, in_rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(msg) = out_rx.recv().await {
                    if write.send(Message::Text(msg.to_json().into())).await.is_err() {
                        break;
                    }
                }
                let _ = write.close().await;
            });

            tokio::spawn(async move {
                while let Some(frame) = read.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => continue,
                    };
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("runtime"; "ignoring malformed message: {}", e),
                    }
                }
            });

            Ok(Duplex {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

// ============================================================================
// Channel state
// ============================================================================

#[derive(Default)]
pub(crate) struct ChannelState {
    link: Option<mpsc::UnboundedSender<ClientMessage>>,
    pending: VecDeque<ClientMessage>,
    /// `(group, component_id)` pairs whose subscribe reached a live link
    active: Vec<(String, String)>,
    started: bool,
}

impl ChannelState {
    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Send over the live link, or hand the message back.
    fn try_send(&mut self, msg: ClientMessage) -> Result<(), ClientMessage> {
        let Some(link) = &self.link else {
            return Err(msg);
        };
        match link.send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(msg)) => {
                self.link = None;
                Err(msg)
            }
        }
    }

    fn record(&mut self, msg: &ClientMessage) {
        match msg {
            ClientMessage::Subscribe {
                group,
                component_id,
            } => {
                let entry = (group.clone(), component_id.clone());
                if !self.active.contains(&entry) {
                    self.active.push(entry);
                }
            }
            ClientMessage::Unsubscribe {
                group,
                component_id,
            } => self
                .active
                .retain(|(g, c)| g != group || c != component_id),
            ClientMessage::Notify { .. } => {}
        }
    }

    fn send_or_queue(&mut self, msg: ClientMessage) {
        let recorded = msg.clone();
        match self.try_send(msg) {
            Ok(()) => self.record(&recorded),
            Err(msg) => self.pending.push_back(msg),
        }
    }

    /// Install a fresh link: restore memberships, then flush the queue.
    fn attach(&mut self, link: mpsc::UnboundedSender<ClientMessage>) -> usize {
        let resubscribe: Vec<ClientMessage> = self
            .active
            .iter()
            .map(|(group, component_id)| ClientMessage::Subscribe {
                group: group.clone(),
                component_id: component_id.clone(),
            })
            .collect();

        self.link = Some(link);
        let mut sent = 0;
        for msg in resubscribe {
            if self.try_send(msg).is_err() {
                return sent;
            }
            sent += 1;
        }
        while let Some(msg) = self.pending.pop_front() {
            let recorded = msg.clone();
            if let Err(msg) = self.try_send(msg) {
                self.pending.push_front(msg);
                return sent;
            }
            self.record(&recorded);
            sent += 1;
        }
        sent
    }
}

impl SyncContext {
    /// Send a group message, starting the channel on first use.
    pub(crate) fn send(&self, msg: ClientMessage) {
        let start = {
            let mut channel = self.inner.channel.lock();
            channel.send_or_queue(msg);
            !std::mem::replace(&mut channel.started, true)
        };
        if start {
            tokio::spawn(supervise(Arc::downgrade(&self.inner)));
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

async fn supervise(weak: Weak<ContextInner>) {
    loop {
        let Some((connector, delay)) = weak.upgrade().and_then(|inner| {
            inner
                .connector
                .clone()
                .map(|connector| (connector, inner.reconnect_delay))
        }) else {
            return;
        };

        match connector.connect().await {
            Ok(duplex) => {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let replayed = inner.channel.lock().attach(duplex.outbound);
                log!("runtime"; "channel connected, {} message(s) sent", replayed);
                inner.emit(RuntimeEvent::Connected);
                drop(inner);

                pump(&weak, duplex.inbound).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.channel.lock().link = None;
                inner.emit(RuntimeEvent::Disconnected);
                log!("runtime"; "channel dropped, retrying in {}ms", delay.as_millis());
            }
            Err(e) => {
                debug!("runtime"; "connect failed: {}", e);
            }
        }

        tokio::time::sleep(delay).await;
    }
}

/// Route inbound messages until the connection ends.
async fn pump(weak: &Weak<ContextInner>, mut inbound: mpsc::UnboundedReceiver<ServerMessage>) {
    while let Some(msg) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        route::route(&SyncContext { inner }, msg);
    }
}
