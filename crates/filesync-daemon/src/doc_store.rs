//! Persistence for the documents being synchronized.
//!
//! Each document is stored as a Loro snapshot at `<state-dir>/<name>.loro`, so
//! a restarted daemon picks up the same CRDT history instead of a fresh one.

use anyhow::{Context, Result};
use filesync_core::LoroTextDocument;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Snapshot storage for documents.
pub struct DocStore {
    state_dir: PathBuf,
}

impl DocStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{}.loro", name))
    }

    /// Load the stored document for `name`, or start an empty one.
    pub async fn load_or_create(&self, name: &str) -> Result<LoroTextDocument> {
        let path = self.snapshot_path(name);
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!("Loaded document snapshot {:?} ({} bytes)", path, bytes.len());
                LoroTextDocument::from_snapshot(&bytes)
                    .with_context(|| format!("Failed to import snapshot {:?}", path))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot for {}, starting empty document", name);
                Ok(LoroTextDocument::new())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read snapshot {:?}", path)),
        }
    }

    /// Save a snapshot of `doc` for `name`.
    pub async fn save(&self, name: &str, doc: &LoroTextDocument) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .await
            .with_context(|| format!("Failed to create state directory {:?}", self.state_dir))?;

        let path = self.snapshot_path(name);
        let tmp = path.with_extension("loro.tmp");
        fs::write(&tmp, doc.export_snapshot()?).await?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to write snapshot {:?}", path))
    }
}
