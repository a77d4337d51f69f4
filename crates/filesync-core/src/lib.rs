//! filesync-core: keeps a text file on disk in agreement with a Loro CRDT document.
//!
//! This crate provides the core functionality for:
//! - Character-level diffs as retain/delete/insert edit scripts
//! - Deciding, per sync pass, whether the file or the document changed
//! - Merging external file edits into the document as a tagged transaction
//! - FileSystem, CacheStore and TextDocument trait abstractions

pub mod cache;
pub mod diff;
pub mod document;
pub mod events;
pub mod fs;
pub mod paths;
pub mod reconcile;

pub use cache::{CacheRecord, CacheStore, InMemoryCacheStore};
pub use diff::{EditOp, EditScript, compute_edit_script};
pub use document::{FILE_MERGE_ORIGIN, LoroTextDocument, TextDocument};
pub use events::{EventBus, Subscription, SyncEvent};
pub use fs::{FileSnapshot, FileSystem, InMemoryFs};
pub use reconcile::{ReconcileError, Reconciler, SyncAction, SyncReport};
