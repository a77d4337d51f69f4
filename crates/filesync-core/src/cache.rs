//! Last-write cache: what the engine last wrote to disk, per file name.
//!
//! The record is the baseline of a pass. If the file's mtime still matches it,
//! nothing touched the file since our write; otherwise the record's content is
//! what the external edit is diffed against.
//!
//! Records are stored under `"cached-fs-file-<name>"` as a JSON string of
//! `{name, content, lastModified}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

/// Fixed prefix of every cache key.
pub const CACHE_KEY_PREFIX: &str = "cached-fs-file";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Content and mtime of a file right after the engine last wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub name: String,
    pub content: String,
    /// File mtime recorded with the content, in the file system's units
    pub last_modified: u64,
}

impl CacheRecord {
    pub fn new(name: impl Into<String>, content: impl Into<String>, last_modified: u64) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            last_modified,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

/// Storage key for a file name.
pub fn cache_key(name: &str) -> String {
    format!("{}-{}", CACHE_KEY_PREFIX, name)
}

/// Durable key-value store for [`CacheRecord`]s.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<CacheRecord>>;

    async fn set(&self, name: &str, record: &CacheRecord) -> Result<()>;
}

/// In-memory cache store for testing.
///
/// Holds serialized records keyed by [`cache_key`], like the durable stores do.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
    sets: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `get`/`set` fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `set` calls
    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Raw stored value for a key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, name: &str) -> Result<Option<CacheRecord>> {
        self.check_available()?;
        let entries = self.entries.read().unwrap();
        entries
            .get(&cache_key(name))
            .map(|json| CacheRecord::from_json(json))
            .transpose()
    }

    async fn set(&self, name: &str, record: &CacheRecord) -> Result<()> {
        self.check_available()?;
        let json = record.to_json()?;
        self.entries.write().unwrap().insert(cache_key(name), json);
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for std::sync::Arc<T> {
    async fn get(&self, name: &str) -> Result<Option<CacheRecord>> {
        (**self).get(name).await
    }

    async fn set(&self, name: &str, record: &CacheRecord) -> Result<()> {
        (**self).set(name, record).await
    }
}
