//! Demo widgets served by `wirestate serve`.
//!
//! A counter and a todo list, rendered as plain markup. Enough to drive
//! every part of the protocol from a browser or the client runtime:
//! watchers, rate-limited operations, messages, callbacks, downloads and
//! multipart uploads.

use std::{collections::BTreeSet, sync::Arc};

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    codec::tagged::Tagged,
    dispatch::{Mount, RenderView, Rendered, Renderer},
    protocol::MessageLevel,
    utils::html::{escape, escape_attr},
    view::{COMPONENT_ATTR, DATA_ATTR, KEY_ATTR},
    widget::{CallContext, ClassBuilder, ClassError, OperationSpec, Registry, Widget},
};

// =============================================================================
// Counter
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub count: i64,
    pub step: i64,
    /// Private: every value the counter has held
    history: Vec<i64>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            count: 0,
            step: 1,
            history: Vec::new(),
        }
    }
}

impl Counter {
    fn shift(&mut self, by: i64) -> Value {
        self.history.push(self.count);
        self.count += by;
        json!(self.count)
    }
}

impl Widget for Counter {
    const CLASS: &'static str = "counter";

    fn declare(class: &mut ClassBuilder<Self>) {
        class
            .public("count")
            .public("step")
            .operation("increment", OperationSpec::external(), |w, _, _| {
                Ok(w.shift(w.step))
            })
            .operation("decrement", OperationSpec::external(), |w, _, _| {
                Ok(w.shift(-w.step))
            })
            .operation(
                "set",
                OperationSpec::external().debounce(300, false),
                |w, args, _| {
                    let Some(value) = args.first().and_then(Value::as_i64) else {
                        bail!("set expects an integer");
                    };
                    let by = value - w.count;
                    Ok(w.shift(by))
                },
            )
            .operation("undo", OperationSpec::external(), |w, _, ctx| {
                match w.history.pop() {
                    Some(previous) => w.count = previous,
                    None => ctx.message(MessageLevel::Info, "nothing to undo"),
                }
                Ok(json!(w.count))
            })
            .operation("set_step", OperationSpec::external(), |w, args, _| {
                w.step = args.first().and_then(Value::as_i64).unwrap_or(1);
                Ok(json!(w.step))
            })
            .operation(
                "on_step_change",
                OperationSpec::internal().watch("step"),
                |w, _, ctx| {
                    if w.step < 1 {
                        w.step = 1;
                        ctx.message(MessageLevel::Warning, "step must be at least 1");
                    }
                    Ok(Value::Null)
                },
            );
    }
}

// =============================================================================
// Todo list
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub items: Vec<String>,
    pub draft: String,
    /// Public file slot; an uploaded text file is split into items
    #[serde(default)]
    pub import: Value,
    #[serde(with = "crate::codec::tagged::set")]
    done: BTreeSet<usize>,
    #[serde(with = "crate::codec::tagged::datetime")]
    created: DateTime<Utc>,
}

impl Default for TodoList {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            draft: String::new(),
            import: Value::Null,
            done: BTreeSet::new(),
            created: Utc::now(),
        }
    }
}

fn index_arg(args: &[Value], len: usize) -> anyhow::Result<usize> {
    match args.first().and_then(Value::as_u64) {
        Some(i) if (i as usize) < len => Ok(i as usize),
        _ => bail!("expected an item index below {len}"),
    }
}

impl TodoList {
    fn import_file(&mut self, ctx: &mut CallContext) {
        let Some(Tagged::File(file)) = Tagged::from_value(&self.import) else {
            ctx.message(MessageLevel::Warning, "no file to import");
            return;
        };
        self.import = Value::Null;
        let text = String::from_utf8_lossy(&file.bytes);
        let before = self.items.len();
        self.items.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        ctx.message(
            MessageLevel::Success,
            format!("imported {} items from {}", self.items.len() - before, file.name),
        );
    }
}

impl Widget for TodoList {
    const CLASS: &'static str = "todo";

    fn declare(class: &mut ClassBuilder<Self>) {
        class
            .public("draft")
            .public("import")
            .operation("add", OperationSpec::external(), |w, _, ctx| {
                let item = std::mem::take(&mut w.draft);
                let item = item.trim();
                if item.is_empty() {
                    ctx.message(MessageLevel::Warning, "nothing to add");
                    return Ok(Value::Null);
                }
                w.items.push(item.to_string());
                ctx.callback("todo.focus", vec![json!(w.items.len() - 1)]);
                Ok(json!(w.items.len()))
            })
            .operation("toggle", OperationSpec::external(), |w, args, _| {
                let index = index_arg(args, w.items.len())?;
                if !w.done.remove(&index) {
                    w.done.insert(index);
                }
                Ok(json!(w.done.contains(&index)))
            })
            .operation("remove", OperationSpec::external(), |w, args, _| {
                let index = index_arg(args, w.items.len())?;
                w.items.remove(index);
                w.done = w
                    .done
                    .iter()
                    .filter(|&&i| i != index)
                    .map(|&i| if i > index { i - 1 } else { i })
                    .collect();
                Ok(Value::Null)
            })
            .operation(
                "export",
                OperationSpec::external().no_update().throttle(1000, true, false),
                |w, _, ctx| {
                    let lines: Vec<String> = w
                        .items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let mark = if w.done.contains(&i) { "x" } else { " " };
                            format!("[{mark}] {item}")
                        })
                        .collect();
                    let name = format!("todo-{}.txt", w.created.format("%Y%m%d"));
                    ctx.attach(name, "text/plain", lines.join("\n").into_bytes());
                    Ok(Value::Null)
                },
            )
            .operation("import", OperationSpec::external(), |w, _, ctx| {
                w.import_file(ctx);
                Ok(json!(w.items.len()))
            });
    }
}

// =============================================================================
// Registry and renderer
// =============================================================================

pub fn registry() -> Result<Registry, ClassError> {
    let mut registry = Registry::new();
    registry.register::<Counter>()?.register::<TodoList>()?;
    Ok(registry)
}

/// Initial tree for `/mount/<class>`.
pub fn mount(class: &str) -> Option<anyhow::Result<Mount>> {
    let mount = match class {
        Counter::CLASS => Mount::new(&Counter::default()),
        TodoList::CLASS => Mount::new(&TodoList::default()),
        _ => return None,
    };
    Some(mount.map_err(Into::into))
}

pub fn renderer() -> Arc<dyn Renderer> {
    Arc::new(render)
}

fn render(view: &RenderView) -> anyhow::Result<Rendered> {
    let data = Value::Object(view.public.clone()).to_string();
    let mut out = format!(
        "<section {COMPONENT_ATTR}=\"{}\" {DATA_ATTR}=\"{}\">",
        view.class,
        escape_attr(&data)
    );

    match view.class {
        Counter::CLASS => {
            let count = view.state["count"].as_i64().unwrap_or_default();
            out.push_str(&format!("<output>{count}</output>"));
            out.push_str("<button data-op=\"decrement\">-</button>");
            out.push_str("<button data-op=\"increment\">+</button>");
        }
        TodoList::CLASS => {
            out.push_str("<ul>");
            let items = view.state["items"].as_array().cloned().unwrap_or_default();
            for (i, item) in items.iter().enumerate() {
                let text = item.as_str().unwrap_or_default();
                out.push_str(&format!("<li {KEY_ATTR}=\"{i}\">{}</li>", escape(text)));
            }
            out.push_str("</ul><input name=\"draft\">");
        }
        other => bail!("no template for `{other}`"),
    }

    out.push_str("</section>");
    Ok(Rendered::markup(out)
        .script(format!("/static/{}.js", view.class))
        .style("/static/wirestate.css"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{Keyring, SealKey, StateCodec, tagged::FileUpload},
        dispatch::Dispatcher,
        envelope::{Envelope, TargetPath},
        protocol::CallBody,
        view::View,
        widget::RequestMeta,
    };

    fn dispatcher() -> Dispatcher {
        let key = SealKey::from_secret("demo", &[7; 32]).unwrap();
        let codec = Arc::new(StateCodec::new(Keyring::single(key)));
        Dispatcher::new(codec, registry().unwrap(), renderer())
    }

    fn call(d: &Dispatcher, class: &str, op: &str, envelope: Envelope, args: Vec<Value>) -> crate::dispatch::DispatchOutcome {
        let body = CallBody {
            envelope,
            args,
            target: TargetPath::root(),
        };
        d.dispatch(class, op, &body, RequestMeta::default()).unwrap()
    }

    #[test]
    fn test_counter_step_watcher_clamps() {
        let d = dispatcher();
        let (envelope, rendered) = d.mount(&mount("counter").unwrap().unwrap()).unwrap();
        assert!(View::parse(&rendered.markup).unwrap().find_component("counter").is_some());

        let outcome = call(&d, "counter", "set_step", envelope, vec![json!(-4)]);
        assert_eq!(outcome.envelope.public["step"], 1);
        assert_eq!(outcome.effects.messages.len(), 1);

        let mut envelope = outcome.envelope;
        envelope.public.insert("step".into(), json!(5));
        let outcome = call(&d, "counter", "increment", envelope, vec![]);
        assert_eq!(outcome.envelope.public["count"], 5);
        assert!(outcome.effects.messages.is_empty());

        let outcome = call(&d, "counter", "undo", outcome.envelope, vec![]);
        assert_eq!(outcome.result, json!(0));
    }

    #[test]
    fn test_todo_import_export() {
        let d = dispatcher();
        let (mut envelope, _) = d.mount(&mount("todo").unwrap().unwrap()).unwrap();
        let upload = FileUpload {
            name: "list.txt".into(),
            mime: "text/plain".into(),
            bytes: b"milk\n\n eggs \n".to_vec(),
        };
        envelope.public.insert("import".into(), Tagged::File(upload).to_value());

        let outcome = call(&d, "todo", "import", envelope, vec![]);
        assert_eq!(outcome.result, json!(2));
        assert_eq!(outcome.envelope.public["import"], Value::Null);
        assert_eq!(outcome.effects.messages[0].text, "imported 2 items from list.txt");

        let outcome = call(&d, "todo", "toggle", outcome.envelope, vec![json!(1)]);
        assert_eq!(outcome.result, json!(true));
        let markup = outcome.rendered.unwrap().markup;
        assert!(markup.contains("<li data-wire-key=\"1\">eggs</li>"), "{markup}");

        let outcome = call(&d, "todo", "export", outcome.envelope, vec![]);
        assert!(outcome.rendered.is_none());
        let attachment = outcome.effects.attachment.unwrap();
        assert_eq!(attachment.bytes, b"[ ] milk\n[x] eggs");
    }

    #[test]
    fn test_unknown_mount() {
        assert!(mount("nope").is_none());
    }
}
