//! Handler Registry
//!
//! Information Hiding:
//! - Content-kind to starter mapping hidden behind register/starter
//! - Factories for reusable handlers stored by fixed name

use super::handler::Handler;
use super::messages::ContentKind;
use std::collections::HashMap;
use std::sync::Arc;

pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// How a message whose request id has no live handler gets one.
#[derive(Clone)]
pub enum Starter {
    /// A fresh handler per request id.
    PerRequest(HandlerFactory),
    /// One long-lived handler, looked up by name.
    Reusable(&'static str),
}

/// Dispatch table built at agent startup
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    starters: HashMap<ContentKind, Starter>,
    reusable: HashMap<&'static str, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry carrying the status, request map, log and kill handlers every agent answers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Start a new handler for each request whose first message is of `kind`
    pub fn register<F>(&mut self, kind: ContentKind, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    {
        self.insert(kind, Starter::PerRequest(Arc::new(factory)));
        self
    }

    /// Route every message of `kinds` to the single handler called `name`
    pub fn register_reusable<F>(
        &mut self,
        name: &'static str,
        kinds: &[ContentKind],
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    {
        self.reusable.insert(name, Arc::new(factory));
        for kind in kinds {
            self.insert(*kind, Starter::Reusable(name));
        }
        self
    }

    fn insert(&mut self, kind: ContentKind, starter: Starter) {
        if self.starters.insert(kind, starter).is_some() {
            tracing::debug!("Replacing handler starter for {:?}", kind);
        }
    }

    pub fn starter(&self, kind: ContentKind) -> Option<&Starter> {
        self.starters.get(&kind)
    }

    pub fn reusable_factory(&self, name: &str) -> Option<HandlerFactory> {
        self.reusable.get(name).cloned()
    }

    pub fn starts(&self, kind: ContentKind) -> bool {
        self.starters.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ContentKind> {
        self.starters.keys().copied().collect()
    }
}
