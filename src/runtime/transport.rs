//! Request/response exchange with the dispatch endpoint.

use futures_util::future::BoxFuture;
use reqwest::{
    Client,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap},
    multipart::{Form, Part},
};
use serde_json::Value;

use super::TransportError;
use crate::{
    debug,
    protocol::{
        CSRF_HEADER, CURRENT_URL_HEADER, CallBody, MESSAGES_HEADER, MULTIPART_BODY_PART,
        REQUEST_HEADER, RESPONSE_HEADER, UserMessage, decode_messages,
        upload::{has_files, take_files},
    },
};

/// One call, as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Operation path, e.g. `/call/counter/increment`
    pub endpoint: String,
    pub body: CallBody,
    pub current_url: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    Json(Value),
    /// Body that is not JSON, e.g. a proxy error page
    Text(String),
    /// Binary attachment announced by `Content-Disposition`
    Download {
        filename: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallReply {
    pub status: u16,
    /// `X-Wire-Response` was present
    pub marker: bool,
    pub messages: Vec<UserMessage>,
    pub payload: ReplyPayload,
}

impl CallReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Carries calls to the server and fetches assets.
pub trait Transport: Send + Sync {
    fn call(&self, request: CallRequest) -> BoxFuture<'_, Result<CallReply, TransportError>>;

    /// Fetch a script or stylesheet URL named by a response.
    fn load_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;
}

// ============================================================================
// HTTP
// ============================================================================

/// [`Transport`] over HTTP via `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: String,
}

impl HttpTransport {
    /// `base` is the server origin, e.g. `http://127.0.0.1:5280`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        }
    }

    async fn send(&self, request: CallRequest) -> Result<CallReply, TransportError> {
        let CallRequest {
            endpoint,
            mut body,
            current_url,
            csrf_token,
        } = request;

        let mut builder = self
            .client
            .post(self.url(&endpoint))
            .header(REQUEST_HEADER, "true");
        if let Some(url) = current_url {
            builder = builder.header(CURRENT_URL_HEADER, url);
        }
        if let Some(token) = csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }

        builder = if has_files(&body) {
            let files = take_files(&mut body);
            let json = serde_json::to_string(&body)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            let mut form = Form::new().text(MULTIPART_BODY_PART, json);
            for (path, file) in files {
                let part = Part::bytes(file.bytes)
                    .file_name(file.name)
                    .mime_str(&file.mime)?;
                form = form.part(path, part);
            }
            debug!("runtime"; "multipart call to {}", endpoint);
            builder.multipart(form)
        } else {
            builder.json(&body)
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        Ok(read_reply(status, &headers, &bytes))
    }
}

impl Transport for HttpTransport {
    fn call(&self, request: CallRequest) -> BoxFuture<'_, Result<CallReply, TransportError>> {
        Box::pin(self.send(request))
    }

    fn load_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let response = self.client.get(self.url(url)).send().await?;
            response.error_for_status()?;
            Ok(())
        })
    }
}

/// Status, marker and messages are kept whatever the body holds, so the
/// caller can report the status of a reply that is not JSON.
fn read_reply(status: u16, headers: &HeaderMap, bytes: &[u8]) -> CallReply {
    let payload = match attachment_name(headers) {
        Some(filename) => ReplyPayload::Download {
            filename,
            mime: header_str(headers, CONTENT_TYPE.as_str())
                .unwrap_or("application/octet-stream")
                .to_string(),
            bytes: bytes.to_vec(),
        },
        None => match serde_json::from_slice(bytes) {
            Ok(value) => ReplyPayload::Json(value),
            Err(_) => ReplyPayload::Text(String::from_utf8_lossy(bytes).into_owned()),
        },
    };

    CallReply {
        status,
        marker: header_str(headers, RESPONSE_HEADER) == Some("true"),
        messages: header_str(headers, MESSAGES_HEADER)
            .map(decode_messages)
            .unwrap_or_default(),
        payload,
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Filename from `Content-Disposition: attachment; filename="..."`.
fn attachment_name(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, CONTENT_DISPOSITION.as_str())?;
    parse_disposition(value)
}

fn parse_disposition(value: &str) -> Option<String> {
    let mut parts = value.split(';').map(str::trim);
    if !parts.next()?.eq_ignore_ascii_case("attachment") {
        return None;
    }
    let name = parts
        .find_map(|p| p.strip_prefix("filename="))
        .map(|n| n.trim_matches('"').to_string())
        .unwrap_or_else(|| "download".to_string());
    Some(name)
}
