//! Progress reporting for sync and derivation runs.

use skygent_core::StoreName;
use tracing::{info, warn};

use crate::LOG_TARGET;
use crate::resources::ResourceWarning;

#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub store: StoreName,
    pub source_key: String,
    pub processed: u64,
    pub stored: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Receives progress updates while a run is underway; the run's final
/// totals come back through its `SyncResult`.
pub trait SyncReporter: Send + Sync {
    fn progress(&self, progress: &SyncProgress) {
        let _ = progress;
    }

    fn warning(&self, warning: &ResourceWarning) {
        let _ = warning;
    }
}

/// Discards everything; the default for tests.
pub struct NullReporter;

impl SyncReporter for NullReporter {}

/// Logs progress through `tracing`; what the CLI installs.
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn progress(&self, progress: &SyncProgress) {
        info!(
            target: LOG_TARGET,
            store = %progress.store,
            source = %progress.source_key,
            processed = progress.processed,
            stored = progress.stored,
            skipped = progress.skipped,
            errors = progress.errors,
            "Sync progress"
        );
    }

    fn warning(&self, warning: &ResourceWarning) {
        warn!(
            target: LOG_TARGET,
            kind = ?warning.kind,
            actual = warning.actual,
            limit = warning.limit,
            "{}", warning.message
        );
    }
}
