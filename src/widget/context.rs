//! Per-call side channel for operations.

use serde_json::Value;

use crate::protocol::{CallbackDescriptor, MessageLevel, UserMessage};

/// Request metadata visible to operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Browser URL at call time (`X-Wire-Current-Url`)
    pub current_url: Option<String>,
}

/// A file returned to the browser as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// `Content-Disposition` header value.
    pub fn disposition(&self) -> String {
        let name: String = self
            .filename
            .chars()
            .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
            .collect();
        format!("attachment; filename=\"{name}\"")
    }
}

/// Collects side effects produced while an operation runs.
#[derive(Debug, Default)]
pub struct CallContext {
    request: RequestMeta,
    pub(crate) messages: Vec<UserMessage>,
    pub(crate) callbacks: Vec<CallbackDescriptor>,
    pub(crate) attachment: Option<Attachment>,
}

impl CallContext {
    pub fn new(request: RequestMeta) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    pub fn request(&self) -> &RequestMeta {
        &self.request
    }

    /// Queue a user-facing message.
    pub fn message(&mut self, level: MessageLevel, text: impl Into<String>) {
        self.messages.push(UserMessage::new(level, text));
    }

    /// Queue a client command, e.g. `ctx.callback("chart.refresh", vec![])`.
    pub fn callback(&mut self, path: &str, args: Vec<Value>) {
        self.callbacks.push(CallbackDescriptor {
            callback: path.split('.').map(str::to_string).collect(),
            args,
        });
    }

    /// Respond with a file download. A later call replaces an earlier one.
    pub fn attach(&mut self, filename: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) {
        self.attachment = Some(Attachment {
            filename: filename.into(),
            mime: mime.into(),
            bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_side_effects_are_ordered() {
        let mut ctx = CallContext::new(RequestMeta {
            current_url: Some("https://app.test/todo".into()),
        });
        ctx.message(MessageLevel::Info, "first");
        ctx.message(MessageLevel::Warning, "second");
        ctx.callback("chart.refresh", vec![json!(1)]);
        ctx.callback("focus", vec![]);

        assert_eq!(ctx.request().current_url.as_deref(), Some("https://app.test/todo"));
        assert_eq!(ctx.messages[1].text, "second");
        assert_eq!(ctx.callbacks[0].callback, ["chart", "refresh"]);
        assert_eq!(ctx.callbacks[1].callback, ["focus"]);
    }

    #[test]
    fn test_disposition_sanitizes_filename() {
        let attachment = Attachment {
            filename: "re\"port\n.csv".into(),
            mime: "text/csv".into(),
            bytes: vec![],
        };
        assert_eq!(attachment.disposition(), "attachment; filename=\"re_port_.csv\"");
    }
}
