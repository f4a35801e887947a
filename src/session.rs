//! Start / end workflow
//!
//! `start` captures the baseline and stores it under the correlation key.
//! `end` loads the baseline, captures the current counters and diffs them.
//! Every collaborator is handed in by the caller.

use crate::catalog::CounterCatalog;
use crate::error::AppError;
use crate::snapshot::{Diff, DiffEngine, Snapshot, SnapshotStore};
use crate::stats::StatSource;
use tracing::info;

pub struct Session<'a, S: StatSource + ?Sized> {
    source: &'a S,
    store: &'a SnapshotStore,
    catalog: &'a CounterCatalog,
}

impl<'a, S: StatSource + ?Sized> Session<'a, S> {
    pub fn new(source: &'a S, store: &'a SnapshotStore, catalog: &'a CounterCatalog) -> Self {
        Self {
            source,
            store,
            catalog,
        }
    }

    /// Capture and persist the baseline for `key`
    pub async fn start(&self, key: &str) -> Result<Snapshot, AppError> {
        // refuse before touching the database
        self.store.ensure_absent(key)?;

        let snapshot = Snapshot::capture(self.source).await?;
        self.store.create(key, &snapshot)?;

        info!(
            "Start snapshot for {} captured at {} ({} tables)",
            key,
            snapshot.captured_at(),
            snapshot.tables().len()
        );
        Ok(snapshot)
    }

    /// Diff the stored baseline for `key` against the database now
    pub async fn end(&self, key: &str) -> Result<Diff, AppError> {
        let old = self.store.load(key)?;
        let new = Snapshot::capture(self.source).await?;

        info!(
            "Comparing {} (captured {}) with counters at {}",
            key,
            old.captured_at(),
            new.captured_at()
        );

        DiffEngine::new(self.catalog)
            .compute(&old, &new, self.source)
            .await
    }
}
