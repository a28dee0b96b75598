//! Class registry: class identifier to erased class.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{ClassError, ClassHandle, Widget, WidgetClass};
use crate::protocol::ClassManifest;

/// Registered widget classes.
#[derive(Default, Clone)]
pub struct Registry {
    classes: FxHashMap<&'static str, Arc<dyn ClassHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a class.
    pub fn register<W: Widget>(&mut self) -> Result<&mut Self, ClassError> {
        if self.classes.contains_key(W::CLASS) {
            return Err(ClassError::DuplicateClass(W::CLASS.to_string()));
        }
        let class = WidgetClass::<W>::declare()?;
        self.classes.insert(W::CLASS, Arc::new(class));
        Ok(self)
    }

    pub fn get(&self, class: &str) -> Option<&Arc<dyn ClassHandle>> {
        self.classes.get(class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Manifests of all classes, sorted by class identifier.
    pub fn manifests(&self) -> Vec<ClassManifest> {
        let mut manifests: Vec<_> = self
            .classes
            .values()
            .map(|class| class.descriptor().manifest())
            .collect();
        manifests.sort_by(|a, b| a.class.cmp(&b.class));
        manifests
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.classes.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("classes", &names).finish()
    }
}
