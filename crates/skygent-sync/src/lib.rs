//! Sync and derivation engines plus the effectful support capabilities.
//!
//! The sync engine pulls pages of raw records from a [`PostSource`]
//! capability, parses and filters them, commits survivors through the store
//! committer, and persists cursor checkpoints strictly behind the committed
//! tail. The derivation engine re-runs a filter over another store's event
//! log. Neither engine talks to the network directly: everything effectful
//! is a capability the caller injects, so tests run with synchronous fakes.

mod cache;
mod derive;
mod engine;
mod jetstream;
mod link_validator;
mod profiles;
mod report;
mod resources;
mod result;
mod source;
mod trending;

pub use cache::TtlCache;
pub use derive::{
    DerivationError, DerivationResult, DeriveOptions, derive, is_stale,
};
pub use engine::{CommitMode, SyncOptions, sync_source};
pub use jetstream::{
    JetstreamCaptureSource, JetstreamCommit, JetstreamEvent, raw_record_from_frame,
};
pub use link_validator::HttpLinkValidator;
pub use profiles::ProfileResolver;
pub use report::{NullReporter, SyncProgress, SyncReporter, TracingReporter};
pub use resources::{ResourceMonitor, ResourceWarning, ResourceWarningKind, human_bytes};
pub use result::{SyncError, SyncItemError, SyncResult, SyncStage, MAX_ERROR_SAMPLES};
pub use source::{NdjsonFileSource, Page, PostSource, PostSourceError, ProfileApi};
pub use trending::CachedTrendingTopics;

pub const LOG_TARGET: &str = "skygent::sync";

#[cfg(test)]
mod tests;
