//! Dispatch endpoint and group broker.
//!
//! ```text
//! POST /call/<class>/<operation>     JSON or multipart call body
//! GET  /mount/<class>                fresh demo widget (markup + envelope)
//! GET  /manifest                     class manifests for the client runtime
//! POST /groups/<group>/update        push public data to a group
//! POST /groups/<group>/remove        remove a group's widgets
//! ws://<interface>:<ws_port>         group broker
//! ```
//!
//! Every call reply carries `X-Wire-Response: true`; replies without it
//! are treated by clients as not coming from this endpoint.

mod lifecycle;
mod request;
mod response;

pub use request::{RequestError, parse_call};
pub use response::Reply;

use std::{io::Read, sync::Arc, time::Instant};

use anyhow::Result;
use serde_json::{Map, Value, json};
use tiny_http::{Method, Request};

use crate::{
    broker::{Broker, start_broker_server},
    codec::StateCodec,
    config::{WireConfig, cfg},
    debug,
    dispatch::{DispatchError, Dispatcher},
    log,
    logger::{status_error, status_success},
    protocol::{CSRF_HEADER, CURRENT_URL_HEADER, CallResponse, RESPONSE_HEADER},
    widget::RequestMeta,
};

use super::demo;

/// Largest accepted request body.
pub const MAX_BODY: usize = 16 * 1024 * 1024;

/// Request headers the endpoint reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallHeaders {
    pub content_type: Option<String>,
    pub csrf_token: Option<String>,
    pub current_url: Option<String>,
}

impl CallHeaders {
    fn from_request(request: &Request) -> Self {
        let get = |name: &str| {
            request
                .headers()
                .iter()
                .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                .map(|h| h.value.to_string())
        };
        Self {
            content_type: get("Content-Type"),
            csrf_token: get(CSRF_HEADER),
            current_url: get(CURRENT_URL_HEADER),
        }
    }
}

/// Routes requests to the dispatcher and the broker.
pub struct Endpoint {
    dispatcher: Dispatcher,
    broker: Arc<Broker>,
    csrf_token: Option<String>,
}

impl Endpoint {
    pub fn new(dispatcher: Dispatcher, broker: Arc<Broker>, csrf_token: Option<String>) -> Self {
        Self {
            dispatcher,
            broker,
            csrf_token,
        }
    }

    /// Endpoint for the demo widgets, configured from `config`.
    pub fn demo(config: &WireConfig, broker: Arc<Broker>) -> Result<Self> {
        let codec = Arc::new(StateCodec::new(config.codec.keyring()?));
        let dispatcher = Dispatcher::new(codec, demo::registry()?, demo::renderer())
            .with_watch_limit(config.dispatch.watch_cycle_limit);
        Ok(Self::new(dispatcher, broker, config.serve.csrf_token.clone()))
    }

    pub fn route(&self, method: &Method, url: &str, headers: &CallHeaders, body: &[u8]) -> Reply {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (method, segments.as_slice()) {
            (Method::Post, ["call", class, operation]) => self.call(class, operation, headers, body),
            (Method::Get, ["mount", class]) => self.mount(class),
            (Method::Get, ["manifest"]) => Reply::json(200, &self.dispatcher.registry().manifests()),
            (Method::Post, ["groups", group, action]) => self.push(group, action, headers, body),
            _ => Reply::plain(404, "404 Not Found"),
        }
    }

    fn authorized(&self, headers: &CallHeaders) -> bool {
        match &self.csrf_token {
            Some(expected) => headers.csrf_token.as_deref() == Some(expected.as_str()),
            None => true,
        }
    }

    fn call(&self, class: &str, operation: &str, headers: &CallHeaders, body: &[u8]) -> Reply {
        let started = Instant::now();
        let label = format!("{class}.{operation}");

        if !self.authorized(headers) {
            status_error(&label, "missing or wrong CSRF token");
            return Reply::call_failure(403, "csrf", "CSRF token missing or incorrect");
        }

        let body = match parse_call(headers.content_type.as_deref(), body) {
            Ok(body) => body,
            Err(e) => {
                status_error(&label, &e.to_string());
                return Reply::call_failure(400, "bad_request", e.to_string());
            }
        };

        let meta = RequestMeta {
            current_url: headers.current_url.clone(),
        };
        match self.dispatcher.dispatch(class, operation, &body, meta) {
            Ok(outcome) => {
                status_success(&format!("{label} {}ms", started.elapsed().as_millis()));
                let reply = match &outcome.effects.attachment {
                    Some(file) => Reply {
                        status: 200,
                        content_type: file.mime.clone(),
                        headers: vec![(RESPONSE_HEADER, "true".to_string())],
                        body: file.bytes.clone(),
                    }
                    .header("Content-Disposition", file.disposition()),
                    None => Reply::call(200, &CallResponse::Success(outcome.to_success())),
                };
                reply.messages(&outcome.effects.messages)
            }
            Err(e) => {
                status_error(&label, &failure_detail(&e));
                Reply::call_failure(e.status(), e.kind(), e.public_message())
            }
        }
    }

    fn mount(&self, class: &str) -> Reply {
        let Some(mount) = demo::mount(class) else {
            return Reply::plain(404, "404 Not Found");
        };
        let mounted = mount.and_then(|mount| Ok(self.dispatcher.mount(&mount)?));
        match mounted {
            Ok((envelope, rendered)) => {
                let (js, styles) = rendered.split_assets();
                Reply::json(
                    200,
                    &json!({
                        "html": rendered.markup,
                        "state": envelope,
                        "js": js,
                        "styles": styles,
                    }),
                )
            }
            Err(e) => {
                log!("serve"; "mount {} failed: {:#}", class, e);
                Reply::plain(500, "500 Internal Server Error")
            }
        }
    }

    fn push(&self, group: &str, action: &str, headers: &CallHeaders, body: &[u8]) -> Reply {
        if !self.authorized(headers) {
            return Reply::plain(403, "403 Forbidden");
        }
        let delivered = match action {
            "update" => match serde_json::from_slice::<Map<String, Value>>(body) {
                Ok(data) => self.broker.push_update(group, data),
                Err(e) => return Reply::plain(400, &format!("expected a JSON object: {e}")),
            },
            "remove" => self.broker.remove_component(group),
            _ => return Reply::plain(404, "404 Not Found"),
        };
        debug!("serve"; "{} to {} reached {} connections", action, group, delivered);
        Reply::json(200, &json!({ "delivered": delivered }))
    }

    /// Answer one HTTP request.
    pub fn handle(&self, mut request: Request) -> Result<()> {
        if lifecycle::is_shutdown() {
            return response::send(request, Reply::plain(503, "503 Service Unavailable"));
        }

        let headers = CallHeaders::from_request(&request);
        let mut body = Vec::new();
        request
            .as_reader()
            .take(MAX_BODY as u64 + 1)
            .read_to_end(&mut body)?;
        let reply = if body.len() > MAX_BODY {
            Reply::call_failure(413, "bad_request", RequestError::TooLarge(MAX_BODY).to_string())
        } else {
            self.route(request.method(), request.url(), &headers, &body)
        };
        response::send(request, reply)
    }
}

/// Server-side detail for a failure, including causes hidden from clients.
fn failure_detail(e: &DispatchError) -> String {
    let mut detail = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        detail.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    detail
}

/// Run the endpoint and the broker until Ctrl+C.
pub fn serve() -> Result<()> {
    let config = cfg();
    let broker = Arc::new(Broker::new());
    let endpoint = Arc::new(Endpoint::demo(&config, Arc::clone(&broker))?);

    let broker_server = start_broker_server(broker, config.serve.interface, config.serve.ws_port)?;
    log!("broker"; "ws://{}:{}", config.serve.interface, broker_server.port());

    let (server, addr) = lifecycle::bind_with_retry(config.serve.interface, config.serve.port)?;
    let server = Arc::new(server);
    lifecycle::install_shutdown_handler(Arc::clone(&server))?;
    log!("serve"; "http://{}", addr);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.serve.worker_count())
        .thread_name(|i| format!("dispatch-{i}"))
        .build()?;

    for request in server.incoming_requests() {
        let endpoint = Arc::clone(&endpoint);
        pool.spawn(move || {
            if let Err(e) = endpoint.handle(request) {
                log!("serve"; "request error: {e}");
            }
        });
    }

    broker_server.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_parse_config,
        envelope::Envelope,
        protocol::{CallSuccess, MESSAGES_HEADER, ServerMessage, decode_messages},
    };

    fn endpoint(csrf: Option<&str>) -> (Endpoint, Arc<Broker>) {
        let mut config = test_parse_config("");
        config.serve.csrf_token = csrf.map(str::to_string);
        let broker = Arc::new(Broker::new());
        (Endpoint::demo(&config, Arc::clone(&broker)).unwrap(), broker)
    }

    fn json_headers() -> CallHeaders {
        CallHeaders {
            content_type: Some("application/json".into()),
            ..CallHeaders::default()
        }
    }

    fn mount(e: &Endpoint, class: &str) -> Envelope {
        let reply = e.route(&Method::Get, &format!("/mount/{class}"), &CallHeaders::default(), b"");
        assert_eq!(reply.status, 200);
        let value: Value = serde_json::from_slice(&reply.body).unwrap();
        serde_json::from_value(value["state"].clone()).unwrap()
    }

    fn call(e: &Endpoint, path: &str, body: Value, headers: &CallHeaders) -> Reply {
        e.route(&Method::Post, path, headers, &serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_call_roundtrip_over_routes() {
        let (e, _) = endpoint(None);
        let state = mount(&e, "counter");

        let reply = call(&e, "/call/counter/increment?x=1", json!(state), &json_headers());
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header_value(RESPONSE_HEADER), Some("true"));
        let success: CallSuccess = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(success.state.public["count"], 1);
        assert_eq!(success.js, vec!["/static/counter.js".to_string()]);
        assert!(success.html.unwrap().contains("<output>1</output>"));
    }

    #[test]
    fn test_failures_are_marked_and_typed() {
        let (e, _) = endpoint(None);
        let mut state = mount(&e, "counter");

        let reply = call(&e, "/call/counter/on_step_change", json!(state), &json_headers());
        assert_eq!(reply.status, 403);
        assert_eq!(reply.header_value(RESPONSE_HEADER), Some("true"));
        let body: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "not_external");

        state.blob.push('A');
        let reply = call(&e, "/call/counter/increment", json!(state), &json_headers());
        assert_eq!(reply.status, 400);

        let reply = e.route(&Method::Post, "/call/counter/increment", &json_headers(), b"{");
        let body: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["error"]["kind"], "bad_request");

        let reply = e.route(&Method::Get, "/nope", &CallHeaders::default(), b"");
        assert_eq!(reply.status, 404);
        assert!(reply.header_value(RESPONSE_HEADER).is_none());
    }

    #[test]
    fn test_csrf_token_checked() {
        let (e, _) = endpoint(Some("secret"));
        let state = mount(&e, "counter");

        let reply = call(&e, "/call/counter/increment", json!(state), &json_headers());
        assert_eq!(reply.status, 403);

        let headers = CallHeaders {
            csrf_token: Some("secret".into()),
            ..json_headers()
        };
        let reply = call(&e, "/call/counter/increment", json!(state), &headers);
        assert_eq!(reply.status, 200);
    }

    #[test]
    fn test_download_reply() {
        let (e, _) = endpoint(None);
        let mut state = mount(&e, "todo");
        state.public.insert("draft".into(), json!("milk"));
        let reply = call(&e, "/call/todo/add", json!(state), &json_headers());
        let success: CallSuccess = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(success.callbacks[0].name(), "todo.focus");

        let reply = call(&e, "/call/todo/export", json!(success.state), &json_headers());
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, "text/plain");
        assert!(reply.header_value("Content-Disposition").unwrap().starts_with("attachment; filename=\"todo-"));
        assert_eq!(reply.body, b"[ ] milk");
    }

    #[test]
    fn test_messages_header() {
        let (e, _) = endpoint(None);
        let state = mount(&e, "counter");
        let reply = call(&e, "/call/counter/undo", json!(state), &json_headers());
        let messages = decode_messages(reply.header_value(MESSAGES_HEADER).unwrap());
        assert_eq!(messages[0].text, "nothing to undo");
    }

    #[test]
    fn test_group_push_reaches_broker() {
        let (e, broker) = endpoint(None);
        let (conn, rx) = broker.connect();
        broker.subscribe(conn, "w1", "room").unwrap();
        while rx.try_recv().is_ok() {}

        let reply = e.route(&Method::Post, "/groups/room/update", &json_headers(), br#"{"count":4}"#);
        assert_eq!(reply.status, 200);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::UpdateData { .. })));

        let reply = e.route(&Method::Post, "/groups/room/update", &json_headers(), b"[1]");
        assert_eq!(reply.status, 400);
    }
}
