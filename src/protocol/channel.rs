//! Duplex channel messages.
//!
//! # Client → server
//!
//! - `subscribe` / `unsubscribe`: join or leave a group for one widget
//! - `notify`: publish an event to a group
//!
//! # Server → client
//!
//! - `connected`: handshake done
//! - `subscription.response`: outcome of subscribe/unsubscribe, sent to the
//!   requesting connection only
//! - `notify`: event published to a group
//! - `component.update_data`: merge data into every member's public fields
//! - `component.remove`: detach every member of a group

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message sent by the client runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        group: String,
        component_id: String,
    },
    Unsubscribe {
        group: String,
        component_id: String,
    },
    Notify {
        group: String,
        component_id: String,
        event: String,
        #[serde(default)]
        data: Value,
        /// Skip delivery back to the sending connection
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        exclude_self: bool,
    },
}

impl ClientMessage {
    pub fn group(&self) -> &str {
        match self {
            Self::Subscribe { group, .. }
            | Self::Unsubscribe { group, .. }
            | Self::Notify { group, .. } => group,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Subscribed,
    Unsubscribed,
    Error,
}

/// Message pushed by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { version: String },

    #[serde(rename = "subscription.response")]
    SubscriptionResponse {
        group: String,
        component_id: String,
        status: SubscriptionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "notify")]
    Notify {
        group: String,
        event: String,
        #[serde(default)]
        data: Value,
    },

    #[serde(rename = "component.update_data")]
    UpdateData {
        group: String,
        data: Map<String, Value>,
    },

    #[serde(rename = "component.remove")]
    Remove { group: String },
}

impl ServerMessage {
    pub fn connected() -> Self {
        Self::Connected {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_shapes() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "notify",
            "group": "room-1",
            "component_id": "chat",
            "event": "typing",
        }))
        .unwrap();
        assert_eq!(msg.group(), "room-1");
        assert!(matches!(msg, ClientMessage::Notify { exclude_self: false, ref data, .. } if data.is_null()));

        let sub = ClientMessage::Subscribe {
            group: "g1".into(),
            component_id: "c".into(),
        };
        let value: Value = serde_json::from_str(&sub.to_json()).unwrap();
        assert_eq!(value, json!({ "type": "subscribe", "group": "g1", "component_id": "c" }));
    }

    #[test]
    fn test_server_message_type_names() {
        let update = ServerMessage::UpdateData {
            group: "g".into(),
            data: Map::new(),
        };
        assert!(update.to_json().contains(r#""type":"component.update_data""#));

        let parsed: ServerMessage = serde_json::from_value(json!({
            "type": "subscription.response",
            "group": "g",
            "component_id": "c",
            "status": "subscribed",
        }))
        .unwrap();
        assert!(matches!(
            parsed,
            ServerMessage::SubscriptionResponse {
                status: SubscriptionStatus::Subscribed,
                message: None,
                ..
            }
        ));

        let remove: ServerMessage =
            serde_json::from_str(r#"{"type":"component.remove","group":"g"}"#).unwrap();
        assert_eq!(remove, ServerMessage::Remove { group: "g".into() });
    }
}
