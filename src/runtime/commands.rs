//! Client commands named by callback descriptors.
//!
//! A callback `{"callback": ["chart", "refresh"], "args": [..]}` runs the
//! command registered as `chart.refresh` against the widget whose call
//! returned it. Names are checked when they are registered, so a response
//! can only reach handlers the page opted into.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{BoundWidget, CommandError};

type Handler = Arc<dyn Fn(&BoundWidget, &[Value]) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct CommandTable {
    commands: FxHashMap<String, Handler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<&mut Self, CommandError>
    where
        F: Fn(&BoundWidget, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if !valid_name(name) {
            return Err(CommandError::InvalidName(name.to_string()));
        }
        if self.commands.contains_key(name) {
            return Err(CommandError::Duplicate(name.to_string()));
        }
        self.commands.insert(name.to_string(), Arc::new(handler));
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Run `name` for `widget`.
    pub fn invoke(&self, widget: &BoundWidget, name: &str, args: &[Value]) -> Result<(), CommandError> {
        let handler = self
            .commands
            .get(name)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        handler(widget, args).map_err(|e| CommandError::Failed {
            name: name.to_string(),
            message: format!("{e:#}"),
        })
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
