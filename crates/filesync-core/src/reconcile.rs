//! Reconciler: keeps one file on disk in agreement with a text document.
//!
//! Each pass reads the file, looks up the last-write cache record for it and
//! picks exactly one action (first match wins):
//!
//! 1. File absent → create it from the document (`Create`)
//! 2. No cache record → document overwrites the file (`OverwriteNoCache`)
//! 3. File mtime equals the cached mtime → only the document can have
//!    changed, so it overwrites the file (`OverwriteFromDocument`)
//! 4. Otherwise the file was edited externally. The cached content is the
//!    last point where file and document agreed, so the edit is computed as
//!    a diff from that baseline to the new file content and merged into the
//!    document (`Merge`). The merged text is then written back. A diff that
//!    comes out empty (mtime bumped, content unchanged) falls back to 3.
//!
//! Before merging, a file that already equals the document text is taken as
//! our own write whose cache record was lost, and handled as in 3. That only
//! holds while the document is unchanged since that write; once it moves on,
//! the stale baseline delta is merged again and its inserts are duplicated.
//!
//! The file is never diffed against the document directly: the document may
//! have received remote edits since the baseline, and those would be
//! misattributed to the file.
//!
//! Every action ends by writing the resulting text (only if it differs) and
//! recording it with the file's new mtime. A failure aborts the pass; nothing
//! is kept in flight, so the next pass starts over from fresh snapshots.

use crate::cache::{CacheError, CacheRecord, CacheStore};
use crate::diff::compute_edit_script;
use crate::document::{DocumentError, FILE_MERGE_ORIGIN, TextDocument};
use crate::events::{EventBus, SyncEvent, now_millis};
use crate::fs::{FileSystem, FsError};

use futures::future::join_all;
use futures::lock::Mutex as PassMutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl ReconcileError {
    /// Whether a later pass can be expected to succeed without intervention.
    ///
    /// An inconsistent edit script is a bug in the diff, not a transient
    /// condition.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Document(DocumentError::Script(_)))
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncAction {
    /// File was absent and got created from the document
    Create,
    /// Document text was written over the file
    OverwriteFromDocument,
    /// Like `OverwriteFromDocument`, but there was no cache record to compare with
    OverwriteNoCache,
    /// External file edits were merged into the document, then written back
    Merge,
}

/// Outcome of one pass for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub name: String,
    pub action: SyncAction,
    /// Whether the file was created or rewritten
    pub file_written: bool,
    /// Number of edit ops merged into the document (0 unless `Merge`)
    pub merged_ops: usize,
}

/// One async mutex per file name, so at most one pass per name is in flight.
#[derive(Default)]
struct PassLocks {
    locks: Mutex<HashMap<String, Arc<PassMutex<()>>>>,
}

impl PassLocks {
    fn handle(&self, name: &str) -> Arc<PassMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drop the entry once nobody else holds or waits on it.
    fn release(&self, name: &str, handle: Arc<PassMutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `handle`.
        if Arc::strong_count(&handle) == 2 {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Runs sync passes against a filesystem and a last-write cache.
pub struct Reconciler<F: FileSystem, C: CacheStore> {
    fs: F,
    cache: C,
    passes: PassLocks,
    events: Option<Arc<EventBus>>,
}

impl<F: FileSystem, C: CacheStore> Reconciler<F, C> {
    pub fn new(fs: F, cache: C) -> Self {
        Self {
            fs,
            cache,
            passes: PassLocks::default(),
            events: None,
        }
    }

    /// Publish pass events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Run one pass for `name`.
    ///
    /// If a pass for the same name is already running, this one waits for it
    /// to finish first.
    pub async fn sync<D: TextDocument + ?Sized>(&self, name: &str, doc: &D) -> Result<SyncReport> {
        let handle = self.passes.handle(name);
        let guard = handle.lock().await;
        let result = self.run_pass(name, doc).await;
        drop(guard);
        self.passes.release(name, handle);

        self.publish(name, &result);
        result
    }

    /// Run one pass for `name` unless one is already in flight, in which case
    /// the pass is dropped and `None` returned.
    pub async fn try_sync<D: TextDocument + ?Sized>(
        &self,
        name: &str,
        doc: &D,
    ) -> Result<Option<SyncReport>> {
        let handle = self.passes.handle(name);
        let Some(guard) = handle.try_lock() else {
            debug!("Pass for {} already in flight, dropping", name);
            self.passes.release(name, handle);
            return Ok(None);
        };
        let result = self.run_pass(name, doc).await;
        drop(guard);
        self.passes.release(name, handle);

        self.publish(name, &result);
        result.map(Some)
    }

    /// Run one pass per `(name, document)` pair, concurrently.
    ///
    /// Failures stay with their own name; they never abort the other passes.
    pub async fn sync_many<'a, D, I>(&self, docs: I) -> Vec<(String, Result<SyncReport>)>
    where
        D: TextDocument + ?Sized + 'a,
        I: IntoIterator<Item = (&'a str, &'a D)>,
    {
        join_all(docs.into_iter().map(|(name, doc)| async move {
            (name.to_string(), self.sync(name, doc).await)
        }))
        .await
    }

    async fn run_pass<D: TextDocument + ?Sized>(&self, name: &str, doc: &D) -> Result<SyncReport> {
        let file = self.fs.read_if_exists(name).await?;

        if !file.exists {
            let text = doc.text();
            info!("Creating {} from document ({} bytes)", name, text.len());
            self.fs.create(name, &text).await?;
            self.record(name, &text, None).await?;
            return Ok(SyncReport {
                name: name.to_string(),
                action: SyncAction::Create,
                file_written: true,
                merged_ops: 0,
            });
        }

        let Some(cached) = self.cache.get(name).await? else {
            debug!("No cache record for {}, document wins", name);
            return self
                .overwrite_from_document(name, doc, None, SyncAction::OverwriteNoCache)
                .await;
        };

        if file.last_modified == cached.last_modified {
            debug!("{} unchanged on disk since last write", name);
            return self
                .overwrite_from_document(name, doc, Some(&cached), SyncAction::OverwriteFromDocument)
                .await;
        }

        let script = compute_edit_script(&cached.content, &file.content);
        if script.is_empty() {
            debug!("{} touched without content change", name);
            return self
                .overwrite_from_document(name, doc, Some(&cached), SyncAction::OverwriteFromDocument)
                .await;
        }

        // File and document already agree (e.g. our last cache write was
        // lost); merging the baseline delta again would duplicate it.
        if file.content == doc.text() {
            debug!("{} already matches document, refreshing baseline", name);
            return self
                .overwrite_from_document(name, doc, Some(&cached), SyncAction::OverwriteFromDocument)
                .await;
        }

        doc.apply_edit_script(&script, FILE_MERGE_ORIGIN)?;
        info!("Merged {} external edit op(s) from {} into document", script.len(), name);
        self.emit(SyncEvent::DocumentMerged {
            name: name.to_string(),
            origin: FILE_MERGE_ORIGIN.to_string(),
            ops: script.len(),
            timestamp: now_millis(),
        });

        let merged = doc.text();
        let file_written = self.fs.write_if_different(name, &merged).await?;
        self.record(name, &merged, Some(&cached)).await?;

        Ok(SyncReport {
            name: name.to_string(),
            action: SyncAction::Merge,
            file_written,
            merged_ops: script.len(),
        })
    }

    async fn overwrite_from_document<D: TextDocument + ?Sized>(
        &self,
        name: &str,
        doc: &D,
        cached: Option<&CacheRecord>,
        action: SyncAction,
    ) -> Result<SyncReport> {
        let text = doc.text();
        let file_written = self.fs.write_if_different(name, &text).await?;
        if file_written {
            info!("Wrote document to {} ({} bytes)", name, text.len());
        }
        self.record(name, &text, cached).await?;

        Ok(SyncReport {
            name: name.to_string(),
            action,
            file_written,
            merged_ops: 0,
        })
    }

    /// Record `content` as the new baseline, with the file's current mtime.
    ///
    /// Skips the store when the record would not change.
    async fn record(&self, name: &str, content: &str, cached: Option<&CacheRecord>) -> Result<()> {
        let after = self.fs.read_if_exists(name).await?;
        if !after.exists {
            return Err(FsError::NotFound(name.to_string()).into());
        }

        // Someone wrote between our write and the re-read. Keep our content as
        // the baseline but with an mtime that can't match, so the next pass
        // diffs their edit against what we wrote.
        let last_modified = if after.content == content {
            after.last_modified
        } else {
            warn!("{} changed while being written, forcing a merge next pass", name);
            0
        };

        let record = CacheRecord::new(name, content, last_modified);
        if cached != Some(&record) {
            self.cache.set(name, &record).await?;
        }
        Ok(())
    }

    fn publish(&self, name: &str, result: &Result<SyncReport>) {
        match result {
            Ok(report) => {
                debug!("Pass for {} finished: {:?}", name, report.action);
                self.emit(SyncEvent::PassCompleted {
                    name: name.to_string(),
                    action: report.action,
                    file_written: report.file_written,
                    timestamp: now_millis(),
                });
            }
            Err(e) => {
                warn!("Pass for {} aborted: {}", name, e);
                self.emit(SyncEvent::PassFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.events {
            bus.emit(&event);
        }
    }
}
