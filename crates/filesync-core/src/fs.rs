//! FileSystem trait abstraction for the file side of a sync pass.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in filesync-daemon) - Uses tokio::fs
//!
//! Files are addressed by a plain name relative to the synchronized directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a text file: {0}")]
    NotText(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File state as read at the start of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Whether the file exists at all
    pub exists: bool,
    /// File content (empty when absent)
    pub content: String,
    /// Modification time, as an opaque monotonic stamp (0 when absent).
    /// `NativeFs` uses nanoseconds since epoch.
    pub last_modified: u64,
}

impl FileSnapshot {
    pub fn absent() -> Self {
        Self {
            exists: false,
            content: String::new(),
            last_modified: 0,
        }
    }

    pub fn present(content: impl Into<String>, last_modified: u64) -> Self {
        Self {
            exists: true,
            content: content.into(),
            last_modified,
        }
    }
}

/// Platform-independent file access used by the reconciler.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read content and mtime, or an absent snapshot if there is no such file
    async fn read_if_exists(&self, name: &str) -> Result<FileSnapshot>;

    /// Write `content` unless the file already holds exactly that.
    ///
    /// Fails with `NotFound` if the file is gone. Returns whether a write happened. Skipping identical writes keeps the
    /// mtime stable, which is what tells the next pass nothing changed on disk.
    async fn write_if_different(&self, name: &str, content: &str) -> Result<bool>;

    /// Create a new file with initial content
    async fn create(&self, name: &str, content: &str) -> Result<()>;
}

/// In-memory filesystem for testing.
///
/// Uses a logical clock for mtimes so that every write gets a distinct
/// modification time.
pub struct InMemoryFs {
    /// name -> (content, mtime)
    files: RwLock<HashMap<String, (String, u64)>>,
    clock: AtomicU64,
    writes: AtomicUsize,
    read_only: AtomicBool,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(1_000),
            writes: AtomicUsize::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Simulate an edit by another process (bumps the mtime, not counted as
    /// an engine write)
    pub fn write_external(&self, name: &str, content: &str) {
        let mtime = self.tick();
        let mut files = self.files.write().unwrap();
        files.insert(name.to_string(), (content.to_string(), mtime));
    }

    /// Bump the mtime without changing content
    pub fn touch(&self, name: &str) {
        let mtime = self.tick();
        let mut files = self.files.write().unwrap();
        if let Some(entry) = files.get_mut(name) {
            entry.1 = mtime;
        }
    }

    pub fn remove(&self, name: &str) {
        self.files.write().unwrap().remove(name);
    }

    /// Current content, if the file exists
    pub fn content(&self, name: &str) -> Option<String> {
        self.files.read().unwrap().get(name).map(|(c, _)| c.clone())
    }

    pub fn mtime(&self, name: &str) -> Option<u64> {
        self.files.read().unwrap().get(name).map(|(_, m)| *m)
    }

    /// Number of writes and creates performed through the trait
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make writes and creates fail with `PermissionDenied`
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(FsError::PermissionDenied(name.to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_if_exists(&self, name: &str) -> Result<FileSnapshot> {
        let files = self.files.read().unwrap();
        Ok(match files.get(name) {
            Some((content, mtime)) => FileSnapshot::present(content.clone(), *mtime),
            None => FileSnapshot::absent(),
        })
    }

    async fn write_if_different(&self, name: &str, content: &str) -> Result<bool> {
        match self.content(name) {
            None => return Err(FsError::NotFound(name.to_string())),
            Some(current) if current == content => return Ok(false),
            Some(_) => {}
        }
        self.check_writable(name)?;

        let mtime = self.tick();
        let mut files = self.files.write().unwrap();
        let Some(entry) = files.get_mut(name) else {
            return Err(FsError::NotFound(name.to_string()));
        };
        *entry = (content.to_string(), mtime);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn create(&self, name: &str, content: &str) -> Result<()> {
        self.check_writable(name)?;

        let mtime = self.tick();
        let mut files = self.files.write().unwrap();
        if files.contains_key(name) {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        files.insert(name.to_string(), (content.to_string(), mtime));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows a test to keep a handle on the filesystem it gave the reconciler
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read_if_exists(&self, name: &str) -> Result<FileSnapshot> {
        (**self).read_if_exists(name).await
    }

    async fn write_if_different(&self, name: &str, content: &str) -> Result<bool> {
        (**self).write_if_different(name, content).await
    }

    async fn create(&self, name: &str, content: &str) -> Result<()> {
        (**self).create(name, content).await
    }
}
