//! Widget classes.
//!
//! A widget is a serde-serializable struct plus a class declaration: which
//! of its fields are public (visible to and settable from the client) and
//! which operations it exposes.
//!
//! ```ignore
//! impl Widget for Counter {
//!     const CLASS: &'static str = "counter";
//!
//!     fn declare(class: &mut ClassBuilder<Self>) {
//!         class
//!             .public("count")
//!             .operation("increment", OperationSpec::external(), |w, _, _| {
//!                 w.count += 1;
//!                 Ok(Value::Null)
//!             });
//!     }
//! }
//! ```
//!
//! Declarations are erased into a [`ClassHandle`] so the dispatcher can
//! restore and drive instances of any registered class by name.

mod context;
mod registry;

pub use context::{Attachment, CallContext, RequestMeta};
pub use registry::Registry;

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::{ClassManifest, OperationManifest, RatePolicy, call_path};

/// A widget class.
pub trait Widget: Serialize + DeserializeOwned + Send + 'static {
    /// Stable class identifier, embedded in every blob.
    const CLASS: &'static str;

    /// Declare public fields and operations.
    fn declare(class: &mut ClassBuilder<Self>);
}

type Handler<W> =
    Box<dyn Fn(&mut W, &[Value], &mut CallContext) -> anyhow::Result<Value> + Send + Sync>;

// =============================================================================
// Declaration
// =============================================================================

/// How an operation may be called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub external: bool,
    /// Public fields whose change re-runs this operation
    pub watch: Vec<String>,
    pub rate: Option<RatePolicy>,
    /// Re-render after the call
    pub update: bool,
}

impl OperationSpec {
    /// Callable from the client.
    pub fn external() -> Self {
        Self {
            external: true,
            watch: Vec::new(),
            rate: None,
            update: true,
        }
    }

    /// Server-side only (watchers, helpers).
    pub fn internal() -> Self {
        Self {
            external: false,
            ..Self::external()
        }
    }

    pub fn watch(mut self, field: impl Into<String>) -> Self {
        self.watch.push(field.into());
        self
    }

    pub fn debounce(mut self, wait_ms: u64, immediate: bool) -> Self {
        self.rate = Some(RatePolicy::Debounce { wait_ms, immediate });
        self
    }

    pub fn throttle(mut self, wait_ms: u64, leading: bool, trailing: bool) -> Self {
        self.rate = Some(RatePolicy::Throttle {
            wait_ms,
            leading,
            trailing,
        });
        self
    }

    /// Refresh state only, skip re-rendering.
    pub fn no_update(mut self) -> Self {
        self.update = false;
        self
    }
}

/// Errors in a class declaration, reported at registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassError {
    #[error("class identifier `{0}` must be 1-255 bytes without '/'")]
    InvalidClassId(String),

    #[error("class `{0}` is already registered")]
    DuplicateClass(String),

    #[error("class `{class}` declares public field `{field}` twice")]
    DuplicatePublic { class: String, field: String },

    #[error("class `{class}` declares operation `{operation}` twice")]
    DuplicateOperation { class: String, operation: String },

    #[error("operation `{class}.{operation}` watches undeclared public field `{field}`")]
    UnknownWatchedField {
        class: String,
        operation: String,
        field: String,
    },

    #[error("operation `{class}.{operation}` has a rate policy but is not external")]
    RateOnInternal { class: String, operation: String },
}

/// Collects a class declaration.
pub struct ClassBuilder<W> {
    public: Vec<String>,
    operations: Vec<(String, OperationSpec, Handler<W>)>,
}

impl<W: Widget> ClassBuilder<W> {
    fn new() -> Self {
        Self {
            public: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Declare a public field. Declaration order is watcher order.
    pub fn public(&mut self, field: impl Into<String>) -> &mut Self {
        self.public.push(field.into());
        self
    }

    pub fn operation<F>(&mut self, name: impl Into<String>, spec: OperationSpec, handler: F) -> &mut Self
    where
        F: Fn(&mut W, &[Value], &mut CallContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.operations.push((name.into(), spec, Box::new(handler)));
        self
    }

    fn build(self) -> Result<WidgetClass<W>, ClassError> {
        let class = W::CLASS;
        if class.is_empty() || class.len() > u8::MAX as usize || class.contains('/') {
            return Err(ClassError::InvalidClassId(class.to_string()));
        }

        for (i, field) in self.public.iter().enumerate() {
            if self.public[..i].contains(field) {
                return Err(ClassError::DuplicatePublic {
                    class: class.to_string(),
                    field: field.clone(),
                });
            }
        }

        let mut operations = Vec::with_capacity(self.operations.len());
        let mut handlers = Vec::with_capacity(self.operations.len());
        for (name, spec, handler) in self.operations {
            if operations.iter().any(|op: &OperationInfo| op.name == name) {
                return Err(ClassError::DuplicateOperation {
                    class: class.to_string(),
                    operation: name,
                });
            }
            if let Some(field) = spec.watch.iter().find(|f| !self.public.contains(*f)) {
                return Err(ClassError::UnknownWatchedField {
                    class: class.to_string(),
                    operation: name,
                    field: field.clone(),
                });
            }
            if spec.rate.is_some() && !spec.external {
                return Err(ClassError::RateOnInternal {
                    class: class.to_string(),
                    operation: name,
                });
            }
            operations.push(OperationInfo { name, spec });
            handlers.push(handler);
        }

        Ok(WidgetClass {
            descriptor: ClassDescriptor {
                class,
                public: self.public,
                operations,
            },
            handlers,
        })
    }
}

// =============================================================================
// Erased class
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: String,
    pub spec: OperationSpec,
}

/// Validated, type-independent view of a class declaration.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub class: &'static str,
    pub public: Vec<String>,
    pub operations: Vec<OperationInfo>,
}

impl ClassDescriptor {
    pub fn operation(&self, name: &str) -> Option<(usize, &OperationInfo)> {
        self.operations.iter().enumerate().find(|(_, op)| op.name == name)
    }

    pub fn is_public(&self, field: &str) -> bool {
        self.public.iter().any(|f| f == field)
    }

    /// Operations watching `field`, in declaration order.
    pub fn watchers(&self, field: &str) -> impl Iterator<Item = (usize, &OperationInfo)> {
        self.operations
            .iter()
            .enumerate()
            .filter(move |(_, op)| op.spec.watch.iter().any(|w| w == field))
    }

    /// Client-side binding information (external operations only).
    pub fn manifest(&self) -> ClassManifest {
        ClassManifest {
            class: self.class.to_string(),
            public: self.public.clone(),
            operations: self
                .operations
                .iter()
                .filter(|op| op.spec.external)
                .map(|op| OperationManifest {
                    name: op.name.clone(),
                    endpoint: call_path(self.class, &op.name),
                    rate: op.spec.rate,
                    update: op.spec.update,
                })
                .collect(),
        }
    }
}

/// A registered class, driving instances without knowing their type.
pub trait ClassHandle: Send + Sync {
    fn descriptor(&self) -> &ClassDescriptor;

    /// Rebuild an instance from a full state snapshot.
    fn restore(self: Arc<Self>, state: Value) -> Result<Box<dyn Instance>, serde_json::Error>;
}

/// A live widget instance for the duration of one dispatch.
pub trait Instance: Send {
    fn descriptor(&self) -> &ClassDescriptor;

    /// Full field snapshot.
    fn snapshot(&self) -> Result<Value, serde_json::Error>;

    /// Replace all fields from a snapshot.
    fn replace(&mut self, state: Value) -> Result<(), serde_json::Error>;

    /// Run the operation at `index` in the descriptor.
    fn invoke(&mut self, index: usize, args: &[Value], ctx: &mut CallContext) -> anyhow::Result<Value>;

    /// Current values of the declared public fields.
    fn public_values(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let snapshot = self.snapshot()?;
        Ok(self
            .descriptor()
            .public
            .iter()
            .map(|field| {
                let value = snapshot.get(field).cloned().unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect())
    }

    /// Overwrite declared public fields. Unknown keys are ignored.
    fn apply_public(&mut self, values: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut snapshot = self.snapshot()?;
        let mut touched = false;
        if let Some(fields) = snapshot.as_object_mut() {
            for (field, value) in values {
                if self.descriptor().is_public(field) {
                    fields.insert(field.clone(), value.clone());
                    touched = true;
                }
            }
        }
        if touched {
            self.replace(snapshot)?;
        }
        Ok(())
    }
}

pub(crate) struct WidgetClass<W> {
    descriptor: ClassDescriptor,
    handlers: Vec<Handler<W>>,
}

impl<W: Widget> WidgetClass<W> {
    pub(crate) fn declare() -> Result<Self, ClassError> {
        let mut builder = ClassBuilder::new();
        W::declare(&mut builder);
        builder.build()
    }
}

impl<W: Widget> ClassHandle for WidgetClass<W> {
    fn descriptor(&self) -> &ClassDescriptor {
        &self.descriptor
    }

    fn restore(self: Arc<Self>, state: Value) -> Result<Box<dyn Instance>, serde_json::Error> {
        let widget: W = serde_json::from_value(state)?;
        Ok(Box::new(Live {
            class: self,
            widget,
        }))
    }
}

struct Live<W> {
    class: Arc<WidgetClass<W>>,
    widget: W,
}

impl<W: Widget> Instance for Live<W> {
    fn descriptor(&self) -> &ClassDescriptor {
        &self.class.descriptor
    }

    fn snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.widget)
    }

    fn replace(&mut self, state: Value) -> Result<(), serde_json::Error> {
        self.widget = serde_json::from_value(state)?;
        Ok(())
    }

    fn invoke(&mut self, index: usize, args: &[Value], ctx: &mut CallContext) -> anyhow::Result<Value> {
        let handler = self
            .class
            .handlers
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("operation index {index} out of range"))?;
        handler(&mut self.widget, args, ctx)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub(crate) struct Counter {
        pub count: i64,
        pub step: i64,
        #[serde(default)]
        pub audit: Vec<String>,
    }

    impl Widget for Counter {
        const CLASS: &'static str = "counter";

        fn declare(class: &mut ClassBuilder<Self>) {
            class
                .public("count")
                .public("step")
                .operation("increment", OperationSpec::external(), |w, _, _| {
                    w.count += w.step.max(1);
                    Ok(json!(w.count))
                })
                .operation("set", OperationSpec::external().debounce(100, false), |w, args, _| {
                    w.count = args.first().and_then(Value::as_i64).unwrap_or_default();
                    Ok(Value::Null)
                })
                .operation("reset", OperationSpec::internal(), |w, _, _| {
                    w.count = 0;
                    Ok(Value::Null)
                })
                .operation(
                    "on_count_change",
                    OperationSpec::internal().watch("count"),
                    |w, args, _| {
                        w.audit.push(Value::Array(args.to_vec()).to_string());
                        Ok(Value::Null)
                    },
                );
        }
    }

    struct Stateless;

    impl Serialize for Stateless {
        fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_unit()
        }
    }

    impl<'de> Deserialize<'de> for Stateless {
        fn deserialize<D: serde::Deserializer<'de>>(_: D) -> Result<Self, D::Error> {
            Ok(Stateless)
        }
    }

    fn build_with(declare: impl FnOnce(&mut ClassBuilder<Counter>)) -> Result<WidgetClass<Counter>, ClassError> {
        let mut builder = ClassBuilder::new();
        declare(&mut builder);
        builder.build()
    }

    #[test]
    fn test_declaration_is_validated() {
        let err = build_with(|c| {
            c.public("count")
                .operation("a", OperationSpec::external(), |_, _, _| Ok(Value::Null))
                .operation("a", OperationSpec::external(), |_, _, _| Ok(Value::Null));
        })
        .err();
        assert!(matches!(err, Some(ClassError::DuplicateOperation { .. })));

        let err = build_with(|c| {
            c.operation("a", OperationSpec::internal().watch("missing"), |_, _, _| Ok(Value::Null));
        })
        .err();
        assert!(matches!(err, Some(ClassError::UnknownWatchedField { field, .. }) if field == "missing"));

        let err = build_with(|c| {
            c.operation("a", OperationSpec::internal().throttle(10, true, true), |_, _, _| {
                Ok(Value::Null)
            });
        })
        .err();
        assert!(matches!(err, Some(ClassError::RateOnInternal { .. })));

        let err = build_with(|c| {
            c.public("count").public("count");
        })
        .err();
        assert!(matches!(err, Some(ClassError::DuplicatePublic { .. })));
    }

    #[test]
    fn test_manifest_lists_external_operations_only() {
        let class = WidgetClass::<Counter>::declare().unwrap();
        let manifest = class.descriptor().manifest();
        let names: Vec<_> = manifest.operations.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, ["increment", "set"]);
        assert_eq!(manifest.public, ["count", "step"]);
        assert_eq!(
            manifest.operation("set").unwrap().rate,
            Some(RatePolicy::Debounce {
                wait_ms: 100,
                immediate: false
            })
        );
        assert_eq!(manifest.operation("increment").unwrap().endpoint, "/call/counter/increment");
    }

    #[test]
    fn test_watchers_in_declaration_order() {
        let class = WidgetClass::<Counter>::declare().unwrap();
        let watchers: Vec<_> = class
            .descriptor()
            .watchers("count")
            .map(|(_, op)| op.name.as_str())
            .collect();
        assert_eq!(watchers, ["on_count_change"]);
        assert_eq!(class.descriptor().watchers("step").count(), 0);
    }

    #[test]
    fn test_apply_public_ignores_unknown_and_private() {
        let class = Arc::new(WidgetClass::<Counter>::declare().unwrap());
        let mut instance = class
            .restore(json!({ "count": 1, "step": 1, "audit": ["x"] }))
            .unwrap();

        let values = json!({ "count": 7, "audit": [], "bogus": true });
        instance.apply_public(values.as_object().unwrap()).unwrap();

        let snapshot = instance.snapshot().unwrap();
        assert_eq!(snapshot["count"], 7);
        assert_eq!(snapshot["audit"], json!(["x"]));
        assert_eq!(
            Value::Object(instance.public_values().unwrap()),
            json!({ "count": 7, "step": 1 })
        );
    }

    #[test]
    fn test_apply_public_rejects_wrong_type() {
        let class = Arc::new(WidgetClass::<Counter>::declare().unwrap());
        let mut instance = class.restore(json!({ "count": 1, "step": 1 })).unwrap();
        let values = json!({ "count": "many" });
        assert!(instance.apply_public(values.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_invoke_runs_handler() {
        let class = Arc::new(WidgetClass::<Counter>::declare().unwrap());
        let mut instance = class.restore(json!({ "count": 1, "step": 2 })).unwrap();
        let (index, _) = instance.descriptor().operation("increment").unwrap();
        let mut ctx = CallContext::default();
        let result = instance.invoke(index, &[], &mut ctx).unwrap();
        assert_eq!(result, json!(3));
    }

    #[test]
    fn test_unit_widget_has_no_public_values() {
        impl Widget for Stateless {
            const CLASS: &'static str = "stateless";
            fn declare(_: &mut ClassBuilder<Self>) {}
        }
        let class = Arc::new(WidgetClass::<Stateless>::declare().unwrap());
        let instance = class.restore(Value::Null).unwrap();
        assert!(instance.public_values().unwrap().is_empty());
    }
}
