//! Explicit provider registry (spec.md §9 REDESIGN FLAG, SPEC_FULL.md §10
//! item 4): a `name -> factory` map a caller builds and owns, replacing the
//! teacher's implicit `match effective_provider { "codex" => ... }`
//! dispatch in `SessionManager::send_message` with something tests can
//! populate with fakes instead of relying on global registration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SupervisorError};
use crate::provider::ProviderClient;

/// Builds a fresh [`ProviderClient`] on demand. Boxed so callers can
/// register closures that capture per-provider config.
pub type ProviderFactory = Arc<dyn Fn() -> Arc<dyn ProviderClient> + Send + Sync>;

#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Build a client for `name`, failing with `Configuration` if nothing
    /// is registered under it.
    pub fn build(&self, name: &str) -> Result<Arc<dyn ProviderClient>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SupervisorError::configuration(format!("no provider registered for {name}")))?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
