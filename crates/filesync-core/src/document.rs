//! Document side of a sync pass: the CRDT text the file is kept in agreement with.
//!
//! `TextDocument` is the narrow interface the reconciler needs. `LoroTextDocument`
//! implements it over a Loro document holding a single `content` text container.
//!
//! Merges of external file edits are committed with [`FILE_MERGE_ORIGIN`] so
//! subscribers can tell them apart from editor or replication changes.

use crate::diff::{DiffError, EditOp, EditScript};
use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
use std::sync::Mutex;
use thiserror::Error;

/// Commit origin for changes merged in from the file.
pub const FILE_MERGE_ORIGIN: &str = "filesync:file-merge";

/// Name of the text container inside the Loro document.
const CONTENT_CONTAINER: &str = "content";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Loro error: {0}")]
    Loro(String),

    #[error("Rejected edit script: {0}")]
    Script(#[from] DiffError),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// A replicated text document.
pub trait TextDocument: Send + Sync {
    /// Current materialized text
    fn text(&self) -> String;

    /// Apply `script` as one transaction tagged with `origin`.
    ///
    /// Either every op takes effect or none does. An empty script is a no-op.
    fn apply_edit_script(&self, script: &EditScript, origin: &str) -> Result<()>;
}

impl<T: TextDocument + ?Sized> TextDocument for std::sync::Arc<T> {
    fn text(&self) -> String {
        (**self).text()
    }

    fn apply_edit_script(&self, script: &EditScript, origin: &str) -> Result<()> {
        (**self).apply_edit_script(script, origin)
    }
}

/// A Loro document holding one text
pub struct LoroTextDocument {
    doc: LoroDoc,
}

impl LoroTextDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Create a document with a fixed peer ID (keeps version vectors stable
    /// across restarts of the same replica).
    pub fn with_peer_id(peer_id: u64) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Create a document seeded with `text`.
    pub fn from_text(text: &str) -> Result<Self> {
        let document = Self::new();
        if !text.is_empty() {
            document
                .content()
                .insert(0, text)
                .map_err(|e| DocumentError::Loro(e.to_string()))?;
            document.doc.commit();
        }
        Ok(document)
    }

    /// Create a document by importing a snapshot or update bytes.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(Self { doc })
    }

    /// The underlying Loro document (for replication and subscriptions)
    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    /// Get the text container
    pub fn content(&self) -> LoroText {
        self.doc.get_text(CONTENT_CONTAINER)
    }

    /// Get current version vector
    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }

    /// Export full snapshot
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    /// Export updates since a version
    pub fn export_updates(&self, from: &VersionVector) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(from))
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    /// Import data from another replica
    pub fn import(&self, data: &[u8]) -> Result<()> {
        self.doc
            .import(data)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(())
    }

    /// Insert text at a unicode position and commit it as a local edit.
    pub fn insert(&self, pos: usize, text: &str) -> Result<()> {
        self.content()
            .insert(pos, text)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        self.doc.commit();
        Ok(())
    }
}

impl Default for LoroTextDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDocument for LoroTextDocument {
    fn text(&self) -> String {
        self.content().to_string()
    }

    fn apply_edit_script(&self, script: &EditScript, origin: &str) -> Result<()> {
        if script.is_empty() {
            return Ok(());
        }

        let text = self.content();
        // Validate up front: Loro ops can't be rolled back once queued in the
        // pending transaction.
        script.validate(text.len_unicode())?;

        let mut cursor = 0;
        for op in script {
            match op {
                EditOp::Retain(n) => cursor += n,
                EditOp::Delete(n) => text
                    .delete(cursor, *n)
                    .map_err(|e| DocumentError::Loro(e.to_string()))?,
                EditOp::Insert(s) => {
                    text.insert(cursor, s)
                        .map_err(|e| DocumentError::Loro(e.to_string()))?;
                    cursor += s.chars().count();
                }
            }
        }

        self.doc.set_next_commit_origin(origin);
        self.doc.commit();
        Ok(())
    }
}

/// Plain string document for testing.
///
/// Records the origin of every applied script.
#[derive(Default)]
pub struct PlainTextDocument {
    text: Mutex<String>,
    origins: Mutex<Vec<String>>,
}

impl PlainTextDocument {
    pub fn new(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            origins: Mutex::new(Vec::new()),
        }
    }

    /// Origins of the scripts applied so far, oldest first
    pub fn applied_origins(&self) -> Vec<String> {
        self.origins.lock().unwrap().clone()
    }
}

impl TextDocument for PlainTextDocument {
    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }

    fn apply_edit_script(&self, script: &EditScript, origin: &str) -> Result<()> {
        if script.is_empty() {
            return Ok(());
        }
        let mut text = self.text.lock().unwrap();
        *text = script.apply(&text)?;
        self.origins.lock().unwrap().push(origin.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_edit_script;
    use std::sync::Arc;

    #[test]
    fn test_new_document_is_empty() {
        let doc = LoroTextDocument::new();
        assert!(doc.text().is_empty());
    }

    #[test]
    fn test_apply_edit_script_to_moved_document() {
        // Script computed against "abc", applied to a document that has since
        // gained a suffix.
        let doc = LoroTextDocument::from_text("abcZ").unwrap();
        let script = compute_edit_script("abc", "abXc");

        doc.apply_edit_script(&script, FILE_MERGE_ORIGIN).unwrap();

        assert_eq!(doc.text(), "abXcZ");
    }

    #[test]
    fn test_apply_empty_script_is_noop() {
        let doc = LoroTextDocument::from_text("hello").unwrap();
        let before = doc.version();

        doc.apply_edit_script(&EditScript::default(), FILE_MERGE_ORIGIN)
            .unwrap();

        assert_eq!(doc.text(), "hello");
        assert_eq!(doc.version(), before);
    }

    #[test]
    fn test_inconsistent_script_is_rejected_whole() {
        let doc = LoroTextDocument::from_text("ab").unwrap();
        let script = EditScript::new(vec![
            EditOp::Insert("X".into()),
            EditOp::Retain(1),
            EditOp::Delete(5),
        ]);

        let result = doc.apply_edit_script(&script, FILE_MERGE_ORIGIN);

        assert!(matches!(result, Err(DocumentError::Script(_))));
        assert_eq!(doc.text(), "ab");
    }

    #[test]
    fn test_unicode_positions() {
        let doc = LoroTextDocument::from_text("héllo 🎉").unwrap();
        let script = compute_edit_script("héllo 🎉", "héllo wörld 🎉!");

        doc.apply_edit_script(&script, FILE_MERGE_ORIGIN).unwrap();

        assert_eq!(doc.text(), "héllo wörld 🎉!");
    }

    #[test]
    fn test_merge_commit_carries_origin() {
        let doc = LoroTextDocument::from_text("abc").unwrap();
        let origins = Arc::new(Mutex::new(Vec::new()));
        let origins_clone = Arc::clone(&origins);
        let _sub = doc.doc().subscribe_root(Arc::new(move |event: loro::event::DiffEvent<'_>| {
            origins_clone.lock().unwrap().push(event.origin.to_string());
        }));

        doc.apply_edit_script(&compute_edit_script("abc", "abXc"), FILE_MERGE_ORIGIN)
            .unwrap();

        assert_eq!(*origins.lock().unwrap(), vec![FILE_MERGE_ORIGIN.to_string()]);
    }

    #[test]
    fn test_merge_converges_with_concurrent_remote_edit() {
        let local = LoroTextDocument::with_peer_id(1).unwrap();
        local.insert(0, "shared line\n").unwrap();
        let remote = LoroTextDocument::with_peer_id(2).unwrap();
        remote.import(&local.export_snapshot().unwrap()).unwrap();

        // Remote replica appends while the file gets a prefix edit locally
        remote.insert(remote.text().chars().count(), "remote\n").unwrap();
        let script = compute_edit_script("shared line\n", "# title\nshared line\n");
        local.apply_edit_script(&script, FILE_MERGE_ORIGIN).unwrap();

        local
            .import(&remote.export_updates(&local.version()).unwrap())
            .unwrap();
        remote
            .import(&local.export_updates(&remote.version()).unwrap())
            .unwrap();

        assert_eq!(local.text(), "# title\nshared line\nremote\n");
        assert_eq!(remote.text(), local.text());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let doc = LoroTextDocument::from_text("persist me").unwrap();
        let restored = LoroTextDocument::from_snapshot(&doc.export_snapshot().unwrap()).unwrap();
        assert_eq!(restored.text(), "persist me");
    }

    #[test]
    fn test_plain_document_records_origins() {
        let doc = PlainTextDocument::new("abc");
        doc.apply_edit_script(&compute_edit_script("abc", "abXc"), FILE_MERGE_ORIGIN)
            .unwrap();
        assert_eq!(doc.text(), "abXc");
        assert_eq!(doc.applied_origins(), vec![FILE_MERGE_ORIGIN.to_string()]);
    }
}
