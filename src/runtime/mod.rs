//! Transport Runtime
//!
//! Client side of the protocol. A [`SyncContext`] owns everything the bound
//! widgets of one page share: the request transport, the lazily opened
//! duplex channel, registered commands, loaded assets, the document view
//! and an event bus. There is no global instance; every [`BoundWidget`]
//! holds the context it was bound through.
//!
//! ```text
//! BoundWidget::call ──► RateGate ──► exchange ──► Transport ──► server
//!                                       │
//!                    state ◄────────────┤ html ──► View merge
//!                    assets, callbacks ◄┘
//!
//! Connector ──► supervisor ──► route ──► RuntimeEvent / RemovalHook
//! ```

mod call;
mod channel;
mod commands;
mod error;
mod rate;
mod route;
mod transport;

pub use call::BoundWidget;
pub use channel::{Connector, Duplex, WsConnector};
pub use commands::CommandTable;
pub use error::{CommandError, RuntimeError, TransportError};
pub use route::{PlainDetach, RemovalHook};
pub use transport::{CallReply, CallRequest, HttpTransport, ReplyPayload, Transport};

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::{
    config::RuntimeConfig,
    envelope::Envelope,
    protocol::{ClassManifest, ClientMessage, SubscriptionStatus, UserMessage},
    view::{MergeError, View},
};
use rate::RateGate;

/// Reconnect delay when none is configured.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

const EVENT_CAPACITY: usize = 256;

/// Something that happened to the runtime or one of its widgets.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Connected,
    Disconnected,
    Notify {
        component_id: String,
        group: String,
        event: String,
        data: Value,
    },
    Messages {
        component_id: String,
        messages: Vec<UserMessage>,
    },
    SubscriptionStatus {
        component_id: String,
        group: String,
        status: SubscriptionStatus,
        message: Option<String>,
    },
    /// Public values changed by a group push
    DataUpdated { component_id: String },
    Removed { component_id: String },
    Download {
        component_id: String,
        filename: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

// ============================================================================
// Widget cells
// ============================================================================

pub(crate) struct WidgetState {
    pub envelope: Envelope,
    pub groups: Vec<String>,
}

/// Runtime-side record of one bound widget.
pub(crate) struct WidgetCell {
    pub id: String,
    pub manifest: ClassManifest,
    pub state: Mutex<WidgetState>,
    pub children: Mutex<Vec<Arc<WidgetCell>>>,
    pub gates: Mutex<FxHashMap<String, RateGate>>,
    pub removed: AtomicBool,
}

impl WidgetCell {
    fn new(id: String, manifest: ClassManifest, mut envelope: Envelope) -> Self {
        // Descendants are attached with `BoundWidget::adopt`
        envelope.children.clear();
        Self {
            id,
            manifest,
            state: Mutex::new(WidgetState {
                envelope,
                groups: Vec::new(),
            }),
            children: Mutex::new(Vec::new()),
            gates: Mutex::new(FxHashMap::default()),
            removed: AtomicBool::new(false),
        }
    }

    /// This widget's envelope including every adopted descendant.
    pub fn envelope_tree(&self) -> Envelope {
        let mut envelope = self.state.lock().envelope.clone();
        let children = self.children.lock().clone();
        envelope.children = children.iter().map(|child| child.envelope_tree()).collect();
        envelope
    }

    /// Take over the state the server returned. Keyed children are matched
    /// by key, unkeyed ones by their order among the unkeyed.
    pub fn apply_state(&self, envelope: &Envelope) {
        {
            let mut state = self.state.lock();
            state.envelope.blob.clone_from(&envelope.blob);
            state.envelope.key.clone_from(&envelope.key);
            state.envelope.public.clone_from(&envelope.public);
        }
        let children = self.children.lock().clone();
        let mut unkeyed = envelope.children.iter().filter(|c| c.key.is_none());
        for child in &children {
            let key = child.state.lock().envelope.key.clone();
            let returned = match key {
                Some(key) => envelope
                    .children
                    .iter()
                    .find(|c| c.key.as_deref() == Some(key.as_str())),
                None => unkeyed.next(),
            };
            if let Some(returned) = returned {
                child.apply_state(returned);
            }
        }
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.state.lock().groups.iter().any(|g| g == group)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Context
// ============================================================================

pub(crate) struct ContextInner {
    pub transport: Arc<dyn Transport>,
    pub connector: Option<Arc<dyn Connector>>,
    pub commands: CommandTable,
    pub removal: Arc<dyn RemovalHook>,
    pub reconnect_delay: Duration,
    pub csrf_token: Option<String>,
    pub current_url: RwLock<Option<String>>,
    pub widgets: DashMap<String, Arc<WidgetCell>>,
    pub document: Mutex<View>,
    pub loaded_assets: Mutex<FxHashSet<String>>,
    pub events: broadcast::Sender<RuntimeEvent>,
    pub channel: Mutex<channel::ChannelState>,
}

impl ContextInner {
    pub fn emit(&self, event: RuntimeEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Shared client runtime for one page.
#[derive(Clone)]
pub struct SyncContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl SyncContext {
    pub fn builder(transport: impl Transport + 'static) -> SyncContextBuilder {
        SyncContextBuilder::new(Arc::new(transport))
    }

    /// HTTP transport, WebSocket channel and reconnect delay from `[runtime]`.
    pub fn from_config(config: &RuntimeConfig) -> SyncContextBuilder {
        Self::builder(HttpTransport::new(config.endpoint.as_str()))
            .connector(WsConnector::new(config.channel_url.as_str()))
            .reconnect_delay(config.reconnect_delay())
    }

    /// Register a widget rendered on the page.
    pub fn bind(&self, component_id: impl Into<String>, manifest: ClassManifest, envelope: Envelope) -> BoundWidget {
        let id = component_id.into();
        let cell = Arc::new(WidgetCell::new(id.clone(), manifest, envelope));
        self.inner.widgets.insert(id, Arc::clone(&cell));
        BoundWidget::new(cell, self.clone())
    }

    pub fn widget(&self, component_id: &str) -> Option<BoundWidget> {
        self.inner
            .widgets
            .get(component_id)
            .map(|cell| BoundWidget::new(Arc::clone(cell.value()), self.clone()))
    }

    /// Remove a widget from the runtime and the document.
    pub fn detach(&self, component_id: &str) -> bool {
        let Some((_, cell)) = self.inner.widgets.remove(component_id) else {
            return false;
        };
        cell.removed.store(true, Ordering::Release);
        self.inner.document.lock().detach_component(component_id);

        let groups = std::mem::take(&mut cell.state.lock().groups);
        if self.inner.connector.is_some() {
            for group in groups {
                self.send(ClientMessage::Unsubscribe {
                    group,
                    component_id: component_id.to_string(),
                });
            }
        }
        self.inner.emit(RuntimeEvent::Removed {
            component_id: component_id.to_string(),
        });
        true
    }

    pub fn events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the document the widgets render into.
    pub fn set_document(&self, markup: &str) -> Result<(), MergeError> {
        *self.inner.document.lock() = View::parse(markup)?;
        Ok(())
    }

    pub fn document(&self) -> View {
        self.inner.document.lock().clone()
    }

    pub fn set_current_url(&self, url: impl Into<String>) {
        *self.inner.current_url.write() = Some(url.into());
    }

    pub fn is_asset_loaded(&self, url: &str) -> bool {
        self.inner.loaded_assets.lock().contains(url)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.lock().is_linked()
    }

    /// Load an asset unless an earlier response already did.
    async fn ensure_asset(&self, url: &str) -> Result<(), TransportError> {
        if !self.inner.loaded_assets.lock().insert(url.to_string()) {
            return Ok(());
        }
        let loaded = self.inner.transport.load_asset(url).await;
        if loaded.is_err() {
            self.inner.loaded_assets.lock().remove(url);
        }
        loaded
    }
}

pub struct SyncContextBuilder {
    transport: Arc<dyn Transport>,
    connector: Option<Arc<dyn Connector>>,
    commands: CommandTable,
    removal: Arc<dyn RemovalHook>,
    reconnect_delay: Duration,
    csrf_token: Option<String>,
    current_url: Option<String>,
}

impl SyncContextBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connector: None,
            commands: CommandTable::new(),
            removal: Arc::new(PlainDetach),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            csrf_token: None,
            current_url: None,
        }
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn removal(mut self, hook: impl RemovalHook + 'static) -> Self {
        self.removal = Arc::new(hook);
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }

    pub fn build(self) -> SyncContext {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SyncContext {
            inner: Arc::new(ContextInner {
                transport: self.transport,
                connector: self.connector,
                commands: self.commands,
                removal: self.removal,
                reconnect_delay: self.reconnect_delay,
                csrf_token: self.csrf_token,
                current_url: RwLock::new(self.current_url),
                widgets: DashMap::new(),
                document: Mutex::new(View::default()),
                loaded_assets: Mutex::new(FxHashSet::default()),
                events,
                channel: Mutex::new(channel::ChannelState::default()),
            }),
        }
    }
}

/// Merge a push into a widget's public values.
pub(crate) fn merge_public(cell: &WidgetCell, data: &Map<String, Value>) {
    let mut state = cell.state.lock();
    for (field, value) in data {
        state.envelope.public.insert(field.clone(), value.clone());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        dispatch::{DispatchError, Dispatcher, Mount},
        protocol::CallResponse,
        widget::RequestMeta,
    };
    use futures_util::future::BoxFuture;

    /// In-process transport calling a real dispatcher.
    pub(crate) struct LocalTransport {
        pub dispatcher: Dispatcher,
        pub requests: Mutex<Vec<CallRequest>>,
        pub assets: Mutex<Vec<String>>,
        pub drop_marker: bool,
    }

    impl LocalTransport {
        pub fn new(dispatcher: Dispatcher) -> Self {
            Self {
                dispatcher,
                requests: Mutex::new(Vec::new()),
                assets: Mutex::new(Vec::new()),
                drop_marker: false,
            }
        }

        fn answer(&self, request: CallRequest) -> CallReply {
            self.requests.lock().push(request.clone());

            let path = request.endpoint.trim_start_matches("/call/");
            let (class, op) = path.split_once('/').unwrap_or((path, ""));
            let meta = RequestMeta {
                current_url: request.current_url.clone(),
            };

            match self.dispatcher.dispatch(class, op, &request.body, meta) {
                Ok(outcome) => {
                    let payload = match &outcome.effects.attachment {
                        Some(file) => ReplyPayload::Download {
                            filename: file.filename.clone(),
                            mime: file.mime.clone(),
                            bytes: file.bytes.clone(),
                        },
                        None => ReplyPayload::Json(
                            serde_json::to_value(CallResponse::Success(outcome.to_success())).unwrap(),
                        ),
                    };
                    CallReply {
                        status: 200,
                        marker: !self.drop_marker,
                        messages: outcome.effects.messages.clone(),
                        payload,
                    }
                }
                Err(e) => failure(&e),
            }
        }
    }

    fn failure(e: &DispatchError) -> CallReply {
        CallReply {
            status: e.status(),
            marker: true,
            messages: vec![],
            payload: ReplyPayload::Json(
                serde_json::to_value(CallResponse::failure(e.kind(), e.public_message())).unwrap(),
            ),
        }
    }

    impl Transport for Arc<LocalTransport> {
        fn call(&self, request: CallRequest) -> BoxFuture<'_, Result<CallReply, TransportError>> {
            let reply = self.answer(request);
            Box::pin(async move { Ok(reply) })
        }

        fn load_asset<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
            self.assets.lock().push(url.to_string());
            Box::pin(async { Ok(()) })
        }
    }

    pub(crate) fn mount_counter(ctx: &SyncContext, transport: &LocalTransport, id: &str) -> BoundWidget {
        let counter = crate::widget::tests::Counter::default();
        let (envelope, rendered) = transport
            .dispatcher
            .mount(&Mount::new(&counter).unwrap())
            .unwrap();
        let markup = rendered.markup.replace(
            r#"data-wire-component="counter""#,
            &format!(r#"data-wire-component="{id}""#),
        );
        ctx.set_document(&markup).unwrap();
        let manifest = transport
            .dispatcher
            .registry()
            .get("counter")
            .unwrap()
            .descriptor()
            .manifest();
        ctx.bind(id, manifest, envelope)
    }

    #[test]
    fn test_from_config() {
        let config = RuntimeConfig {
            reconnect_delay_ms: 250,
            ..RuntimeConfig::default()
        };
        let ctx = SyncContext::from_config(&config).build();
        assert!(ctx.inner.connector.is_some());
        assert_eq!(ctx.inner.reconnect_delay, Duration::from_millis(250));
        assert!(!ctx.is_connected());
    }

    #[test]
    fn test_apply_state_matches_children_by_key() {
        let manifest = ClassManifest {
            class: "row".into(),
            public: vec!["n".into()],
            operations: vec![],
        };
        let cell = |blob: &str, key: Option<&str>| {
            let mut envelope = Envelope::new(blob, Map::new());
            envelope.key = key.map(str::to_string);
            Arc::new(WidgetCell::new(blob.to_string(), manifest.clone(), envelope))
        };
        let parent = cell("p", None);
        let (a, b, loose) = (cell("a", Some("a")), cell("b", Some("b")), cell("u", None));
        parent.children.lock().extend([Arc::clone(&a), Arc::clone(&b), Arc::clone(&loose)]);

        // Server returns the keyed children in the other order
        let returned = Envelope::new("p2", Map::new())
            .with_child(Envelope::new("u2", Map::new()))
            .with_child(Envelope::new("b2", Map::new()).with_key("b"))
            .with_child(Envelope::new("a2", Map::new()).with_key("a"));
        parent.apply_state(&returned);

        assert_eq!(parent.state.lock().envelope.blob, "p2");
        assert_eq!(a.state.lock().envelope.blob, "a2");
        assert_eq!(b.state.lock().envelope.blob, "b2");
        assert_eq!(loose.state.lock().envelope.blob, "u2");
    }

    #[test]
    fn test_detach_marks_removed_and_emits() {
        let transport = Arc::new(LocalTransport::new(crate::dispatch::tests::dispatcher()));
        let ctx = SyncContext::builder(Arc::clone(&transport)).build();
        let mut events = ctx.events();
        let widget = mount_counter(&ctx, &transport, "c1");

        assert!(ctx.detach("c1"));
        assert!(!ctx.detach("c1"));
        assert!(widget.is_removed());
        assert!(ctx.widget("c1").is_none());
        assert!(ctx.document().find_component("c1").is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            RuntimeEvent::Removed {
                component_id: "c1".into()
            }
        );
    }
}
