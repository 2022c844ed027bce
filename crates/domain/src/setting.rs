use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// sqlx connection URL, e.g. `sqlite://objstore.db`
    pub url: String,

    pub max_connections: Option<u32>,

    pub busy_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexingSettings {
    #[serde(default = "default_index_batch")]
    pub batch_size: usize,

    /// Pause between passes of `objstore index`
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_app_cache")]
    pub app_cache_capacity: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch(),
            interval_secs: default_interval(),
            app_cache_capacity: default_app_cache(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSettings {
    #[serde(default = "default_bulk_batch")]
    pub batch_size: usize,

    /// Conflict lookups issued concurrently per round trip in bulk upserts
    #[serde(default = "default_lookup_batch")]
    pub lookup_batch_size: usize,

    #[serde(default = "default_read_limit")]
    pub default_read_limit: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            batch_size: default_bulk_batch(),
            lookup_batch_size: default_lookup_batch(),
            default_read_limit: default_read_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSettings {
    pub fields_to_index: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    #[serde(default)]
    pub indexing: IndexingSettings,
    #[serde(default)]
    pub bulk: BulkSettings,
    #[serde(default)]
    pub apps: HashMap<String, AppSettings>,
}

fn default_index_batch() -> usize {
    1000
}

fn default_interval() -> u64 {
    60
}

fn default_app_cache() -> usize {
    256
}

fn default_bulk_batch() -> usize {
    500
}

fn default_lookup_batch() -> usize {
    20
}

fn default_read_limit() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let s: Settings = toml::from_str(
            r#"
            [store]
            url = "sqlite://objstore.db"
            "#,
        )
        .unwrap();

        assert_eq!(s.store.url, "sqlite://objstore.db");
        assert!(s.store.max_connections.is_none());
        assert_eq!(s.indexing.batch_size, 1000);
        assert_eq!(s.indexing.interval_secs, 60);
        assert_eq!(s.bulk.lookup_batch_size, 20);
        assert_eq!(s.bulk.default_read_limit, 100);
        assert!(s.apps.is_empty());
    }

    #[test]
    fn full_file_with_app_tables() {
        let s: Settings = toml::from_str(
            r#"
            [store]
            url = "sqlite::memory:"
            max_connections = 2
            busy_timeout_secs = 9

            [indexing]
            batch_size = 50

            [bulk]
            batch_size = 10

            [apps.app-1]
            fields_to_index = ["name", "address.city"]

            [apps.app-2]
            "#,
        )
        .unwrap();

        assert_eq!(s.store.max_connections, Some(2));
        assert_eq!(s.indexing.batch_size, 50);
        assert_eq!(s.indexing.app_cache_capacity, 256);
        assert_eq!(s.bulk.batch_size, 10);
        assert_eq!(s.bulk.lookup_batch_size, 20);
        assert_eq!(
            s.apps["app-1"].fields_to_index.as_deref(),
            Some(&["name".to_string(), "address.city".to_string()][..])
        );
        assert!(s.apps["app-2"].fields_to_index.is_none());
    }

    #[test]
    fn missing_store_section_is_rejected() {
        assert!(toml::from_str::<Settings>("[bulk]\nbatch_size = 1").is_err());
    }
}
