//! Renderer seam.
//!
//! Templating lives outside this crate. The dispatcher hands the renderer
//! a read-only view of the target subtree and takes back markup plus the
//! asset URLs the markup needs.

use serde_json::{Map, Value};

/// Asset URL required by rendered markup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Script(String),
    Style(String),
}

/// Renderer output for one widget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub markup: String,
    pub assets: Vec<Asset>,
}

impl Rendered {
    pub fn markup(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            assets: Vec::new(),
        }
    }

    pub fn script(mut self, url: impl Into<String>) -> Self {
        self.assets.push(Asset::Script(url.into()));
        self
    }

    pub fn style(mut self, url: impl Into<String>) -> Self {
        self.assets.push(Asset::Style(url.into()));
        self
    }

    /// Script and style URLs, each deduplicated in first-seen order.
    pub fn split_assets(&self) -> (Vec<String>, Vec<String>) {
        let mut js: Vec<String> = Vec::new();
        let mut styles: Vec<String> = Vec::new();
        for asset in &self.assets {
            let (list, url) = match asset {
                Asset::Script(url) => (&mut js, url),
                Asset::Style(url) => (&mut styles, url),
            };
            if !list.contains(url) {
                list.push(url.clone());
            }
        }
        (js, styles)
    }
}

/// Read-only snapshot of a widget subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderView {
    pub class: &'static str,
    pub key: Option<String>,
    /// Full field snapshot, private fields included
    pub state: Value,
    pub public: Map<String, Value>,
    pub children: Vec<RenderView>,
}

pub trait Renderer: Send + Sync {
    fn render(&self, view: &RenderView) -> anyhow::Result<Rendered>;
}

impl<F> Renderer for F
where
    F: Fn(&RenderView) -> anyhow::Result<Rendered> + Send + Sync,
{
    fn render(&self, view: &RenderView) -> anyhow::Result<Rendered> {
        self(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_assets_dedups() {
        let rendered = Rendered::markup("<p></p>")
            .script("/a.js")
            .style("/a.css")
            .script("/a.js")
            .script("/b.js");
        let (js, styles) = rendered.split_assets();
        assert_eq!(js, ["/a.js", "/b.js"]);
        assert_eq!(styles, ["/a.css"]);
    }
}
