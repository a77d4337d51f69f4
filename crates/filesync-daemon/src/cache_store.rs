//! Durable last-write cache.
//!
//! Records live in `last_write_cache.json` inside the state directory: one JSON
//! object mapping `"cached-fs-file-<name>"` to the serialized record string.
//! The whole file is loaded at startup and rewritten on every `set`.

use async_trait::async_trait;
use filesync_core::cache::{CacheError, CacheRecord, CacheStore, Result, cache_key};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// File name of the cache inside the state directory.
pub const CACHE_FILE: &str = "last_write_cache.json";

/// Cache store backed by a JSON file.
pub struct JsonCacheStore {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory copy: key -> serialized record.
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonCacheStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let entries: BTreeMap<String, String> = match fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| CacheError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CacheError::Unavailable(e.to_string())),
        };
        debug!("Loaded {} cache record(s) from {:?}", entries.len(), path);

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    /// Write all entries, going through a temp file so a crash never leaves
    /// half a JSON document behind.
    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for JsonCacheStore {
    async fn get(&self, name: &str) -> Result<Option<CacheRecord>> {
        let entries = self.entries.lock().await;
        entries
            .get(&cache_key(name))
            .map(|json| CacheRecord::from_json(json))
            .transpose()
    }

    async fn set(&self, name: &str, record: &CacheRecord) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(cache_key(name), record.to_json()?);
        if let Err(e) = self.save(&entries).await {
            // Keep memory and disk in step: a failed set is not recorded.
            match previous {
                Some(json) => entries.insert(cache_key(name), json),
                None => entries.remove(&cache_key(name)),
            };
            return Err(e);
        }
        Ok(())
    }
}
