use std::collections::BTreeMap;
use std::sync::Arc;

use super::builtin::{ExpectedElements, PatternDensity, PatternPresence};
use super::traits::Method;

/// Capability table keyed by method name.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: BTreeMap<String, Arc<dyn Method>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the built-in pattern methods.
    pub fn builtin() -> Self {
        Self::new()
            .with(PatternPresence)
            .with(PatternDensity)
            .with(ExpectedElements)
    }

    /// Register a method, replacing any earlier one of the same name.
    pub fn with(mut self, method: impl Method + 'static) -> Self {
        self.register(Arc::new(method));
        self
    }

    pub fn register(&mut self, method: Arc<dyn Method>) {
        self.methods.insert(method.name().to_string(), method);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Method>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
