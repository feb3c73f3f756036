//! The sync result monoid and the sync error taxonomy.

use serde::Serialize;
use skygent_filter::FilterEvalError;
use skygent_store::StoreError;
use snafu::Snafu;

use crate::source::PostSourceError;

/// How many per-item error samples a result retains. Totals keep counting
/// past the cap; keeping a prefix preserves `combine` associativity.
pub const MAX_ERROR_SAMPLES: usize = 20;

/// Which pipeline stage an error belongs to; drives the CLI exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStage {
    Source,
    Parse,
    Filter,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemError {
    pub stage: SyncStage,
    pub item: Option<String>,
    pub message: String,
}

/// Summary of a sync run.
///
/// Forms a monoid under [`combine`]: counts add, error samples concatenate
/// (capped to a prefix), so per-source and per-page results fold safely in
/// any grouping.
///
/// [`combine`]: SyncResult::combine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub posts_added: u64,
    pub posts_skipped: u64,
    pub errors_total: u64,
    pub errors: Vec<SyncItemError>,
}

impl SyncResult {
    pub const ZERO: SyncResult = SyncResult {
        posts_added: 0,
        posts_skipped: 0,
        errors_total: 0,
        errors: Vec::new(),
    };

    pub fn combine(mut self, other: SyncResult) -> SyncResult {
        self.posts_added += other.posts_added;
        self.posts_skipped += other.posts_skipped;
        self.errors_total += other.errors_total;
        self.errors.extend(other.errors);
        self.errors.truncate(MAX_ERROR_SAMPLES);
        self
    }

    pub fn record_error(&mut self, error: SyncItemError) {
        self.errors_total += 1;
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(error);
        }
    }
}

/// Fatal sync failures; per-item problems go into [`SyncResult`] instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("Source fetch failed"))]
    Source { source: PostSourceError },
    #[snafu(display("Store write failed"))]
    Store { source: StoreError },
    #[snafu(display("Filter evaluation cannot run"))]
    Filter { source: FilterEvalError },
    #[snafu(display("Aborted after {count} item errors (max {max})"))]
    TooManyErrors { count: u64, max: u64 },
    #[snafu(display("Item failed in strict mode ({stage:?}): {message}", stage = item.stage, message = item.message))]
    Strict { item: SyncItemError },
}

impl SyncError {
    pub fn stage(&self) -> SyncStage {
        match self {
            SyncError::Source { .. } => SyncStage::Source,
            SyncError::Store { .. } => SyncStage::Store,
            SyncError::Filter { .. } => SyncStage::Filter,
            SyncError::TooManyErrors { .. } => SyncStage::Source,
            SyncError::Strict { item } => item.stage,
        }
    }
}
