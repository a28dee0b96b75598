//! Endpoint replies and their conversion to HTTP responses.

use anyhow::{Result, anyhow};
use serde::Serialize;
use tiny_http::{Header, Request, Response};

use crate::protocol::{CallResponse, MESSAGES_HEADER, RESPONSE_HEADER, UserMessage, encode_messages};

pub const JSON: &str = "application/json";
pub const PLAIN: &str = "text/plain; charset=utf-8";

/// Transport-independent reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: JSON.to_string(),
            headers: Vec::new(),
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn plain(status: u16, text: &str) -> Self {
        Self {
            status,
            content_type: PLAIN.to_string(),
            headers: Vec::new(),
            body: text.as_bytes().to_vec(),
        }
    }

    /// Endpoint reply carrying the response marker.
    pub fn call(status: u16, response: &CallResponse) -> Self {
        Self {
            status,
            content_type: JSON.to_string(),
            headers: vec![(RESPONSE_HEADER, "true".to_string())],
            body: response.to_json().into_bytes(),
        }
    }

    pub fn call_failure(status: u16, kind: &str, message: impl Into<String>) -> Self {
        Self::call(status, &CallResponse::failure(kind, message))
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn messages(self, messages: &[UserMessage]) -> Self {
        if messages.is_empty() {
            self
        } else {
            self.header(MESSAGES_HEADER, encode_messages(messages))
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Header values must be ASCII; anything else becomes `_`.
fn header(name: &str, value: &str) -> Result<Header> {
    let value: String = value
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|_| anyhow!("invalid header `{name}`"))
}

pub fn send(request: Request, reply: Reply) -> Result<()> {
    let mut response = Response::from_data(reply.body)
        .with_status_code(reply.status)
        .with_header(header("Content-Type", &reply.content_type)?);
    for (name, value) in &reply.headers {
        response.add_header(header(name, value)?);
    }
    request.respond(response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageLevel, decode_messages};

    #[test]
    fn test_messages_header_only_when_present() {
        let reply = Reply::call_failure(400, "integrity", "bad").messages(&[]);
        assert_eq!(reply.header_value("x-wire-response"), Some("true"));
        assert!(reply.header_value(MESSAGES_HEADER).is_none());

        let messages = vec![UserMessage::new(MessageLevel::Info, "héllo")];
        let reply = reply.messages(&messages);
        let raw = reply.header_value(MESSAGES_HEADER).unwrap();
        assert!(raw.is_ascii());
        assert_eq!(decode_messages(raw), messages);
    }

    #[test]
    fn test_non_ascii_header_sanitized() {
        let h = header("Content-Disposition", "attachment; filename=\"näme.txt\"").unwrap();
        assert_eq!(h.value.as_str(), "attachment; filename=\"n_me.txt\"");
    }
}
