//! Wire Protocol
//!
//! JSON shapes exchanged between the dispatch endpoint and the client
//! runtime, plus the class manifest the client uses to bind widgets.
//!
//! # Call exchange
//!
//! ```text
//! POST /call/<class>/<operation>
//!   X-Wire-Request: true
//!   X-Wire-Current-Url: https://app.example/page
//!   X-CSRFToken: ...
//!   { "blob": "...", "public": {..}, "children": [..], "args": [..], "target": [..] }
//!
//! 200 OK
//!   X-Wire-Response: true
//!   X-Wire-Messages: [{"level":"info","text":"saved"}]
//!   { "success": true, "html": "...", "state": {..}, "js": [..], "styles": [..],
//!     "callbacks": [{"callback": ["chart", "refresh"], "args": [..]}], "result": .. }
//! ```

pub mod channel;
pub mod upload;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, TargetPath};

pub use channel::{ClientMessage, ServerMessage, SubscriptionStatus};

/// Request marker header.
pub const REQUEST_HEADER: &str = "X-Wire-Request";
/// Current browser URL header.
pub const CURRENT_URL_HEADER: &str = "X-Wire-Current-Url";
/// Cross-site request forgery token header.
pub const CSRF_HEADER: &str = "X-CSRFToken";
/// Response marker header.
pub const RESPONSE_HEADER: &str = "X-Wire-Response";
/// User-facing messages header (JSON array).
pub const MESSAGES_HEADER: &str = "X-Wire-Messages";

/// Multipart part name carrying the JSON body.
pub const MULTIPART_BODY_PART: &str = "__body";

/// Endpoint path for an operation call.
pub fn call_path(class: &str, operation: &str) -> String {
    format!("/call/{class}/{operation}")
}

// =============================================================================
// Call request / response
// =============================================================================

/// Body of an operation call.
/// Encode messages for the `X-Wire-Messages` header.
///
/// Header values must be visible ASCII, so the JSON array is percent-encoded.
pub fn encode_messages(messages: &[UserMessage]) -> String {
    let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".into());
    utf8_percent_encode(&json, HEADER_UNSAFE).to_string()
}

/// Decode an `X-Wire-Messages` header. Malformed headers yield no messages.
pub fn decode_messages(header: &str) -> Vec<UserMessage> {
    let json = percent_decode_str(header).decode_utf8_lossy();
    serde_json::from_str(&json).unwrap_or_default()
}

const HEADER_UNSAFE: &AsciiSet = &CONTROLS.add(b'%').add(b' ').add(b'"').add(b'\\');

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Child-key chain from the root to the invoked instance
    #[serde(default, skip_serializing_if = "TargetPath::is_root")]
    pub target: TargetPath,
}

/// Ordered command invocation the client executes after a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    /// Command path, e.g. `["chart", "refresh"]`
    pub callback: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallbackDescriptor {
    pub fn name(&self) -> String {
        self.callback.join(".")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing message queued during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl UserMessage {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// Successful call response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSuccess {
    /// Always `true`
    pub success: bool,
    /// Markup of the invoked widget (absent for no-update operations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Fresh envelope for the invoked widget subtree
    pub state: Envelope,
    #[serde(default)]
    pub js: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub callbacks: Vec<CallbackDescriptor>,
    #[serde(default)]
    pub result: Value,
}

/// Failure details in a failed call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Stable error kind (`integrity`, `not_external`, ...)
    pub kind: String,
    pub message: String,
}

/// Response body, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallResponse {
    Success(CallSuccess),
    Failure {
        success: bool,
        error: CallFailure,
    },
}

impl CallResponse {
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            success: false,
            error: CallFailure {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":{"kind":"encode","message":""}}"#.into())
    }
}

// =============================================================================
// Class manifest
// =============================================================================

/// Client-side rate limiting declared on an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RatePolicy {
    /// Run once `wait_ms` passed without another call.
    /// `immediate` fires the first call at once and drops the trailing one.
    Debounce { wait_ms: u64, immediate: bool },
    /// Run at most once per `wait_ms`.
    Throttle {
        wait_ms: u64,
        leading: bool,
        trailing: bool,
    },
}

/// What the client needs to know about one external operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationManifest {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RatePolicy>,
    pub update: bool,
}

/// What the client needs to know about a widget class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassManifest {
    pub class: String,
    pub public: Vec<String>,
    pub operations: Vec<OperationManifest>,
}

impl ClassManifest {
    pub fn operation(&self, name: &str) -> Option<&OperationManifest> {
        self.operations.iter().find(|op| op.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_body_flattens_envelope() {
        let body: CallBody = serde_json::from_value(json!({
            "blob": "abc",
            "public": { "count": 1 },
            "args": [5],
        }))
        .unwrap();
        assert_eq!(body.envelope.blob, "abc");
        assert_eq!(body.args, vec![json!(5)]);
        assert!(body.target.is_root());

        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("target").is_none());
        assert_eq!(value["public"]["count"], 1);
    }

    #[test]
    fn test_response_variants_parse() {
        let ok: CallResponse = serde_json::from_value(json!({
            "success": true,
            "state": { "blob": "b", "public": {} },
            "result": 3,
        }))
        .unwrap();
        assert!(matches!(ok, CallResponse::Success(ref s) if s.result == json!(3)));

        let failed = CallResponse::failure("not_external", "nope");
        let parsed: CallResponse = serde_json::from_str(&failed.to_json()).unwrap();
        match parsed {
            CallResponse::Failure { success, error } => {
                assert!(!success);
                assert_eq!(error.kind, "not_external");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_rate_policy_wire_shape() {
        let policy = RatePolicy::Throttle {
            wait_ms: 200,
            leading: true,
            trailing: false,
        };
        let value = serde_json::to_value(policy).unwrap();
        assert_eq!(value["kind"], "throttle");
        assert_eq!(value["wait_ms"], 200);
    }

    #[test]
    fn test_callback_name() {
        let cb = CallbackDescriptor {
            callback: vec!["chart".into(), "refresh".into()],
            args: vec![],
        };
        assert_eq!(cb.name(), "chart.refresh");
    }

    #[test]
    fn test_messages_header_survives_non_ascii() {
        let messages = vec![
            UserMessage::new(MessageLevel::Success, "saved \"draft\" ✓"),
            UserMessage::new(MessageLevel::Warning, "100% full"),
        ];
        let header = encode_messages(&messages);
        assert!(header.is_ascii());
        assert!(!header.contains(' '));
        assert_eq!(decode_messages(&header), messages);
        assert!(decode_messages("not json").is_empty());
    }
}
