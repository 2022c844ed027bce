//! Per-app configuration consulted while indexing.

use adapt::storage::Result;
use async_trait::async_trait;
use domain::setting::AppSettings;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Where app configuration lives; `None` when the app has none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppConfigSource: Send + Sync {
    async fn app_config(&self, app_id: &str) -> Result<Option<AppSettings>>;
}

/// Serves the `[apps.*]` tables of `settings.toml`.
#[derive(Debug, Clone, Default)]
pub struct StaticAppConfig {
    apps: HashMap<String, AppSettings>,
}

impl StaticAppConfig {
    pub fn new(apps: HashMap<String, AppSettings>) -> Self {
        Self { apps }
    }
}

#[async_trait]
impl AppConfigSource for StaticAppConfig {
    async fn app_config(&self, app_id: &str) -> Result<Option<AppSettings>> {
        Ok(self.apps.get(app_id).cloned())
    }
}

/// Bounded LRU in front of an `AppConfigSource`. Apps without config are
/// cached too, as the default settings.
pub struct AppConfigCache<S> {
    source: S,
    cache: Mutex<LruCache<String, Arc<AppSettings>>>,
}

impl<S: AppConfigSource> AppConfigCache<S> {
    pub fn new(source: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, app_id: &str) -> Result<Arc<AppSettings>> {
        if let Some(hit) = self.cache.lock().get(app_id) {
            return Ok(hit.clone());
        }

        let config = Arc::new(self.source.app_config(app_id).await?.unwrap_or_default());
        debug!(app_id, "app config loaded");
        self.cache.lock().put(app_id.to_owned(), config.clone());
        Ok(config)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
