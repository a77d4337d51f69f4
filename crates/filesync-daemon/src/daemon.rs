//! Daemon state and the pass scheduler.

use crate::cache_store::{CACHE_FILE, JsonCacheStore};
use crate::config::Config;
use crate::doc_store::DocStore;
use crate::native_fs::NativeFs;

use anyhow::Result;
use filesync_core::{EventBus, LoroTextDocument, Reconciler, Subscription, SyncAction, SyncEvent};
use loro::VersionVector;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A document being synchronized, with the version last saved to disk.
struct Tracked {
    name: String,
    doc: LoroTextDocument,
    saved_version: VersionVector,
}

/// Counts from one round of passes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub created: usize,
    pub overwritten: usize,
    pub merged: usize,
    pub failed: usize,
}

/// Daemon state holding all components.
pub struct Daemon {
    reconciler: Reconciler<NativeFs, JsonCacheStore>,
    docs: DocStore,
    tracked: Vec<Tracked>,
    config: Config,
    events: Arc<EventBus>,
    _event_log: Subscription,
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::DocumentMerged { name, origin, ops, .. } => {
            debug!("{}: merged {} op(s) from file as {}", name, ops, origin)
        }
        SyncEvent::PassCompleted {
            name,
            action,
            file_written,
            ..
        } => debug!("{}: {:?} (file written: {})", name, action, file_written),
        SyncEvent::PassFailed { name, error, .. } => debug!("{}: pass failed: {}", name, error),
    }
}

impl Daemon {
    /// Open the stores and load every configured document.
    pub async fn open(config: Config) -> Result<Self> {
        let fs = NativeFs::new(config.dir.clone());
        let cache = JsonCacheStore::open(&config.state_dir.join(CACHE_FILE)).await?;
        let docs = DocStore::new(config.state_dir.clone());

        let mut tracked = Vec::with_capacity(config.files.len());
        for name in &config.files {
            let doc = docs.load_or_create(name).await?;
            let saved_version = doc.version();
            tracked.push(Tracked {
                name: name.clone(),
                doc,
                saved_version,
            });
        }
        info!("Tracking {} file(s) in {:?}", tracked.len(), config.dir);

        let events = Arc::new(EventBus::new());
        let event_log = events.subscribe(log_event);

        Ok(Self {
            reconciler: Reconciler::new(fs, cache).with_events(Arc::clone(&events)),
            docs,
            tracked,
            config,
            events,
            _event_log: event_log,
        })
    }

    /// Bus carrying every pass's events
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Current document for `name`
    pub fn document(&self, name: &str) -> Option<&LoroTextDocument> {
        self.tracked.iter().find(|t| t.name == name).map(|t| &t.doc)
    }

    /// Run one pass for every file, then persist documents that changed.
    ///
    /// A failed pass is logged and counted; it never stops the other files.
    pub async fn run_once(&mut self) -> PassSummary {
        let results = self
            .reconciler
            .sync_many(self.tracked.iter().map(|t| (t.name.as_str(), &t.doc)))
            .await;

        let mut summary = PassSummary::default();
        for (name, result) in results {
            match result {
                Ok(report) => match report.action {
                    SyncAction::Create => summary.created += 1,
                    SyncAction::Merge => summary.merged += 1,
                    SyncAction::OverwriteFromDocument | SyncAction::OverwriteNoCache => {
                        summary.overwritten += 1
                    }
                },
                Err(e) => {
                    summary.failed += 1;
                    if !e.is_retryable() {
                        error!("Pass for {} hit an internal error: {}", name, e);
                    }
                }
            }
        }

        for tracked in &mut self.tracked {
            let version = tracked.doc.version();
            if version == tracked.saved_version {
                continue;
            }
            match self.docs.save(&tracked.name, &tracked.doc).await {
                Ok(()) => {
                    debug!("Saved document for {}", tracked.name);
                    tracked.saved_version = version;
                }
                Err(e) => warn!("Failed to save document for {}: {:#}", tracked.name, e),
            }
        }

        if summary.failed > 0 {
            warn!("{} of {} pass(es) failed", summary.failed, self.tracked.len());
        }
        summary
    }

    /// Run passes on the configured interval until Ctrl+C, or once if no
    /// interval is set.
    pub async fn run(mut self) -> Result<()> {
        let Some(period) = self.config.interval else {
            let summary = self.run_once().await;
            info!("Single pass done: {:?}", summary);
            return Ok(());
        };

        let mut ticker = tokio::time::interval(period);
        // A slow pass should delay the next one, not trigger a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Syncing every {:?}. Press Ctrl+C to stop.", period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    debug!("Pass round done: {:?}", summary);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Shutting down");
        Ok(())
    }
}
