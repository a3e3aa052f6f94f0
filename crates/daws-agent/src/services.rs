// SPDX-License-Identifier: MIT OR Apache-2.0
//! The service bundle.
//!
//! Every agent receives an explicit [`Services`] at construction — no
//! lazily-initialized process globals. Dependencies are therefore visible in
//! every component's constructor, and tests swap in fakes freely.

use async_trait::async_trait;
use daws_cache::FingerprintCache;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::provider::{ProviderHandle, ProviderLimits};

/// Connection-pool abstraction over the relational store.
///
/// The schema, migrations, and seed tooling live outside the core; agents
/// only need async execute/fetch.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a statement, returning the affected row count.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Run a query, returning rows as JSON objects.
    async fn fetch(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<serde_json::Map<String, Value>>, DbError>;
}

/// Database-layer failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    /// The statement or query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// No connection could be obtained.
    #[error("connection unavailable: {0}")]
    Unavailable(String),
}

/// In-memory keyed JSON documents backing `knowledge_lookup` steps.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl KnowledgeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a document by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .expect("knowledge lock poisoned")
            .get(key)
            .cloned()
    }

    /// Insert or replace a document.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.entries
            .write()
            .expect("knowledge lock poisoned")
            .insert(key.into(), value);
    }

    /// All known keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("knowledge lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// Everything an agent needs, injected at construction.
#[derive(Clone)]
pub struct Services {
    /// Relational store, when configured.
    pub db: Option<Arc<dyn Database>>,
    /// Provider handles by name (`fmp`, `fred`, `newsapi`, `polygon`, ...).
    pub providers: BTreeMap<String, Arc<ProviderHandle>>,
    /// Shared result cache.
    pub cache: Arc<FingerprintCache>,
    /// Knowledge documents for lookup steps.
    pub knowledge: Arc<KnowledgeStore>,
}

impl Services {
    /// Start building a bundle.
    #[must_use]
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    /// Look up a provider handle by name.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<ProviderHandle>> {
        self.providers.get(name).cloned()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("db", &self.db.is_some())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`Services`].
#[derive(Default)]
pub struct ServicesBuilder {
    db: Option<Arc<dyn Database>>,
    providers: BTreeMap<String, Arc<ProviderHandle>>,
    cache: Option<Arc<FingerprintCache>>,
    knowledge: Option<Arc<KnowledgeStore>>,
}

/// Provider names whose API keys are read from `<NAME>_API_KEY`.
const KNOWN_PROVIDERS: &[&str] = &["fmp", "fred", "newsapi", "polygon"];

impl ServicesBuilder {
    /// Attach the database handle.
    #[must_use]
    pub fn database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Attach a provider handle.
    #[must_use]
    pub fn provider(mut self, handle: ProviderHandle) -> Self {
        self.providers
            .insert(handle.name().to_string(), Arc::new(handle));
        self
    }

    /// Share an existing cache instead of creating a fresh one.
    #[must_use]
    pub fn cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share an existing knowledge store.
    #[must_use]
    pub fn knowledge(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    /// Read provider credentials from the environment.
    ///
    /// For each known provider, `<NAME>_API_KEY` (uppercased) creates a
    /// handle with default limits. `DATABASE_URL` is noted but the core does
    /// not open connections itself; the host supplies the [`Database`]
    /// implementation.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        for name in KNOWN_PROVIDERS {
            let var = format!("{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                info!(target: "daws.services", provider = name, "provider configured from env");
                self.providers.insert(
                    (*name).to_string(),
                    Arc::new(ProviderHandle::new(*name, ProviderLimits::default()).with_api_key(key)),
                );
            }
        }
        if std::env::var("DATABASE_URL").is_ok() && self.db.is_none() {
            info!(target: "daws.services", "DATABASE_URL set; waiting for host-supplied pool");
        }
        self
    }

    /// Finish the bundle.
    #[must_use]
    pub fn build(self) -> Services {
        Services {
            db: self.db,
            providers: self.providers,
            cache: self.cache.unwrap_or_default(),
            knowledge: self.knowledge.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn knowledge_store_roundtrip() {
        let store = KnowledgeStore::new();
        store.put("sector_map", json!({"AAPL": "tech"}));
        assert_eq!(store.get("sector_map"), Some(json!({"AAPL": "tech"})));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.keys(), vec!["sector_map".to_string()]);
    }

    #[test]
    fn builder_defaults_are_usable() {
        let services = Services::builder().build();
        assert!(services.db.is_none());
        assert!(services.providers.is_empty());
        assert!(services.provider("fmp").is_none());
    }

    #[test]
    fn provider_handles_are_shared_by_name() {
        let services = Services::builder()
            .provider(ProviderHandle::new("fmp", ProviderLimits::default()))
            .build();
        assert!(services.provider("fmp").is_some());
        assert_eq!(services.provider("fmp").unwrap().name(), "fmp");
    }
}
