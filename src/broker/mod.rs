//! Group Broker
//!
//! Subscription groups over persistent connections.
//!
//! # Architecture
//!
//! ```text
//! connection A ──subscribe(g1)──►┐
//! connection B ──subscribe(g1)──►│  groups: g1 → {(A, chat), (B, chat)}
//!                                │
//! publish(g1, "typing") ─────────┴──► outbound[A] ──► pump A ──► socket
//!                                     outbound[B] ──► pump B ──► socket
//! ```
//!
//! Membership sits behind one lock. Every connection owns an unbounded
//! outbound queue drained by its own pump, so publishing never waits on a
//! slow peer and messages to one connection keep their publish order.

mod connection;
pub mod server;

pub use server::{BrokerServer, start_broker_server};

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    debug,
    protocol::{ClientMessage, ServerMessage, SubscriptionStatus},
};

/// Maximum group name length.
pub const MAX_GROUP_LEN: usize = 128;

pub type ConnectionId = u64;

/// A subscribed widget: the connection it lives on and its component id.
pub type Member = (ConnectionId, String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("invalid group name `{0}`")]
    InvalidGroup(String),

    #[error("component id must not be empty")]
    EmptyComponent,
}

/// Group membership registry and fan-out.
#[derive(Default)]
pub struct Broker {
    groups: RwLock<FxHashMap<String, FxHashSet<Member>>>,
    connections: DashMap<ConnectionId, Sender<ServerMessage>>,
    next_id: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its outbound queue.
    pub fn connect(&self) -> (ConnectionId, Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = unbounded();
        self.connections.insert(id, tx);
        debug!("broker"; "connection {id} registered ({} open)", self.connections.len());
        (id, rx)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Add a member to a group. The outcome is also sent to the
    /// subscribing connection, and to it alone.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        component_id: &str,
        group: &str,
    ) -> Result<(), BrokerError> {
        let outcome = self.try_subscribe(connection, component_id, group);
        let (status, message) = match &outcome {
            Ok(()) => (SubscriptionStatus::Subscribed, None),
            Err(e) => (SubscriptionStatus::Error, Some(e.to_string())),
        };
        self.send(
            connection,
            ServerMessage::SubscriptionResponse {
                group: group.to_string(),
                component_id: component_id.to_string(),
                status,
                message,
            },
        );
        outcome
    }

    fn try_subscribe(
        &self,
        connection: ConnectionId,
        component_id: &str,
        group: &str,
    ) -> Result<(), BrokerError> {
        validate_group(group)?;
        if component_id.is_empty() {
            return Err(BrokerError::EmptyComponent);
        }
        if !self.connections.contains_key(&connection) {
            return Err(BrokerError::UnknownConnection(connection));
        }
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .insert((connection, component_id.to_string()));
        debug!("broker"; "{component_id}@{connection} joined `{group}`");
        Ok(())
    }

    /// Remove a member from a group. Returns whether it was a member.
    pub fn unsubscribe(&self, connection: ConnectionId, component_id: &str, group: &str) -> bool {
        let removed = {
            let mut groups = self.groups.write();
            let removed = groups
                .get_mut(group)
                .is_some_and(|members| members.remove(&(connection, component_id.to_string())));
            if groups.get(group).is_some_and(FxHashSet::is_empty) {
                groups.remove(group);
            }
            removed
        };
        self.send(
            connection,
            ServerMessage::SubscriptionResponse {
                group: group.to_string(),
                component_id: component_id.to_string(),
                status: SubscriptionStatus::Unsubscribed,
                message: None,
            },
        );
        removed
    }

    /// Deliver an event to every connection with a member in `group`.
    /// Returns the number of connections reached.
    pub fn publish(
        &self,
        group: &str,
        event: &str,
        data: Value,
        exclude: Option<ConnectionId>,
    ) -> usize {
        self.fan_out(
            group,
            exclude,
            ServerMessage::Notify {
                group: group.to_string(),
                event: event.to_string(),
                data,
            },
        )
    }

    /// Merge `data` into the public fields of every member of `group`.
    pub fn push_update(&self, group: &str, data: Map<String, Value>) -> usize {
        self.fan_out(
            group,
            None,
            ServerMessage::UpdateData {
                group: group.to_string(),
                data,
            },
        )
    }

    /// Ask every member of `group` to detach.
    pub fn remove_component(&self, group: &str) -> usize {
        self.fan_out(
            group,
            None,
            ServerMessage::Remove {
                group: group.to_string(),
            },
        )
    }

    /// Drop one member from every group. Idempotent.
    pub fn remove_member(&self, connection: ConnectionId, component_id: &str) {
        let member = (connection, component_id.to_string());
        self.groups.write().retain(|_, members| {
            members.remove(&member);
            !members.is_empty()
        });
    }

    /// Tear down a connection and all its memberships. Idempotent.
    pub fn remove_connection(&self, connection: ConnectionId) {
        let was_open = self.connections.remove(&connection).is_some();
        self.groups.write().retain(|_, members| {
            members.retain(|(conn, _)| *conn != connection);
            !members.is_empty()
        });
        if was_open {
            debug!("broker"; "connection {connection} closed ({} open)", self.connections.len());
        }
    }

    /// Current members of a group, sorted.
    pub fn members(&self, group: &str) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .groups
            .read()
            .get(group)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Apply a message received from a connection.
    pub fn handle(&self, connection: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::Subscribe {
                group,
                component_id,
            } => {
                let _ = self.subscribe(connection, &component_id, &group);
            }
            ClientMessage::Unsubscribe {
                group,
                component_id,
            } => {
                self.unsubscribe(connection, &component_id, &group);
            }
            ClientMessage::Notify {
                group,
                event,
                data,
                exclude_self,
                ..
            } => {
                self.publish(&group, &event, data, exclude_self.then_some(connection));
            }
        }
    }

    fn fan_out(&self, group: &str, exclude: Option<ConnectionId>, message: ServerMessage) -> usize {
        let targets: Vec<ConnectionId> = {
            let groups = self.groups.read();
            let Some(members) = groups.get(group) else {
                debug!("broker"; "`{group}` has no members");
                return 0;
            };
            let mut ids: Vec<_> = members
                .iter()
                .map(|(conn, _)| *conn)
                .filter(|conn| Some(*conn) != exclude)
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in targets {
            if self.send(id, message.clone()) {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove_connection(id);
        }
        debug!("broker"; "`{group}` fan-out to {delivered} connections");
        delivered
    }

    /// Queue a message for one connection. Never blocks.
    fn send(&self, connection: ConnectionId, message: ServerMessage) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|tx| tx.send(message).is_ok())
    }
}

fn validate_group(group: &str) -> Result<(), BrokerError> {
    let valid = !group.is_empty()
        && group.len() <= MAX_GROUP_LEN
        && group
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    if valid {
        Ok(())
    } else {
        Err(BrokerError::InvalidGroup(group.to_string()))
    }
}
