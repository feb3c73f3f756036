//! The checkpointed sync engine.
//!
//! One run pulls pages from a [`PostSource`] starting at the stored cursor,
//! parses raw records, evaluates the filter with bounded concurrency,
//! commits survivors in atomic batches, and persists the cursor checkpoint
//! strictly after the batches it covers have committed. A crash therefore
//! leaves `checkpoint.last_event_seq` at or behind the store's actual tail;
//! resume re-fetches at most one checkpoint interval of already-stored
//! posts, which dedupe mode then skips.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use skygent_core::{DataSource, EventMeta, Post, PostUpsert, Timestamp, error_chain, parse_post};
use skygent_filter::{Capabilities, FilterEvalError, FilterHash, Predicate};
use skygent_store::{Store, SyncCheckpoint};
use snafu::ResultExt as _;
use tracing::{debug, info};

use crate::LOG_TARGET;
use crate::profiles::ProfileResolver;
use crate::report::{SyncProgress, SyncReporter};
use crate::result::{
    FilterSnafu, SourceSnafu, StoreSnafu, SyncError, SyncItemError, SyncResult, SyncStage,
};
use crate::source::PostSource;

/// Whether a run inserts only unseen posts or refreshes known ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Insert-if-missing; already-present URIs count as skipped.
    #[default]
    Dedupe,
    /// Unconditional upsert; every fetched post is (re)stored.
    Refresh,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub concurrency: usize,
    pub batch_size: usize,
    pub page_limit: usize,
    pub checkpoint_every: u64,
    pub checkpoint_interval: Duration,
    pub max_errors: Option<u64>,
    pub strict: bool,
    pub mode: CommitMode,
    /// Free-form label stamped into every event's meta.
    pub command_label: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 100,
            page_limit: 50,
            checkpoint_every: 200,
            checkpoint_interval: Duration::from_secs(5),
            max_errors: None,
            strict: false,
            mode: CommitMode::Dedupe,
            command_label: "sync".to_owned(),
        }
    }
}

/// Run one bounded sync of `source` into `store`.
///
/// `resolver`, when given, upgrades placeholder authors (posts whose handle
/// was unknown at parse time and fell back to the DID) before filtering.
#[allow(clippy::too_many_arguments)]
pub async fn sync_source(
    store: &Arc<Store>,
    source: &DataSource,
    predicate: Option<&Predicate>,
    filter_hash: Option<&FilterHash>,
    api: &dyn PostSource,
    caps: &Capabilities<'_>,
    resolver: Option<&ProfileResolver>,
    reporter: &dyn SyncReporter,
    opts: &SyncOptions,
) -> Result<SyncResult, SyncError> {
    let source_key = source.source_key();
    let current_hash = filter_hash.map(|h| h.as_str().to_owned());

    let checkpoint = store.load_sync_checkpoint(source).await.context(StoreSnafu)?;
    let mut cursor = match &checkpoint {
        Some(cp) if cp.filter_hash == current_hash => cp.cursor.clone(),
        Some(_) => {
            info!(
                target: LOG_TARGET,
                store = %store.name(),
                source = %source_key,
                "Filter hash changed; discarding cursor for a full rescan"
            );
            None
        }
        None => None,
    };

    let mut result = SyncResult::default();
    let mut processed: u64 = 0;
    let mut since_checkpoint: u64 = 0;
    let mut last_checkpoint_at = tokio::time::Instant::now();

    loop {
        let page = api
            .fetch_page(source, cursor.clone(), opts.page_limit)
            .await
            .context(SourceSnafu)?;
        let page_cursor = page.cursor.clone();
        let fetched = page.records.len() as u64;

        let mut posts = Vec::new();
        for raw in page.records {
            processed += 1;
            match parse_post(&raw) {
                Ok(post) => posts.push(post),
                Err(e) => {
                    let item = SyncItemError {
                        stage: SyncStage::Parse,
                        item: Some(raw.uri.clone()),
                        message: error_chain(&e),
                    };
                    if opts.strict {
                        return Err(SyncError::Strict { item });
                    }
                    result.record_error(item);
                }
            }
        }

        if let Some(resolver) = resolver {
            resolve_placeholder_handles(&mut posts, resolver, &mut result).await;
        }

        let survivors = filter_posts(posts, predicate, caps, opts.concurrency).await?;

        for chunk in survivors.chunks(opts.batch_size) {
            let upserts: Vec<PostUpsert> = chunk
                .iter()
                .cloned()
                .map(|post| PostUpsert {
                    post,
                    meta: EventMeta {
                        source: source.event_source(),
                        command: opts.command_label.clone(),
                        filter_expr_hash: current_hash.clone(),
                        created_at: Timestamp::now(),
                        source_store: None,
                    },
                })
                .collect();

            match opts.mode {
                CommitMode::Dedupe => {
                    let slots = store
                        .append_upserts_if_missing(upserts)
                        .await
                        .context(StoreSnafu)?;
                    for slot in &slots {
                        if slot.is_some() {
                            result.posts_added += 1;
                        } else {
                            result.posts_skipped += 1;
                        }
                    }
                }
                CommitMode::Refresh => {
                    let entries = store.append_upserts(upserts).await.context(StoreSnafu)?;
                    result.posts_added += entries.len() as u64;
                }
            }
        }

        if let Some(max) = opts.max_errors {
            if max < result.errors_total {
                return Err(SyncError::TooManyErrors {
                    count: result.errors_total,
                    max,
                });
            }
        }

        reporter.progress(&SyncProgress {
            store: store.name().clone(),
            source_key: source_key.clone(),
            processed,
            stored: result.posts_added,
            skipped: result.posts_skipped,
            errors: result.errors_total,
        });

        // Only now that the whole page is committed may the cursor advance.
        let drained = page_cursor.is_none() || (fetched == 0 && page_cursor == cursor);
        cursor = page_cursor;
        since_checkpoint += fetched;

        let checkpoint_due = opts.checkpoint_every <= since_checkpoint
            || opts.checkpoint_interval <= last_checkpoint_at.elapsed();
        if checkpoint_due || drained {
            persist_checkpoint(store, source, &cursor, &current_hash).await?;
            since_checkpoint = 0;
            last_checkpoint_at = tokio::time::Instant::now();
        }

        if drained {
            break;
        }
    }

    store
        .touch_source_synced(source, Timestamp::now())
        .await
        .context(StoreSnafu)?;

    debug!(
        target: LOG_TARGET,
        store = %store.name(),
        source = %source_key,
        added = result.posts_added,
        skipped = result.posts_skipped,
        errors = result.errors_total,
        "Sync finished"
    );
    Ok(result)
}

/// Replace DID-placeholder author handles with resolved handles. Resolution
/// failure is a per-run note, not an abort; the placeholder is still a
/// usable (if ugly) author value.
async fn resolve_placeholder_handles(
    posts: &mut [Post],
    resolver: &ProfileResolver,
    result: &mut SyncResult,
) {
    let dids: Vec<skygent_core::Did> = posts
        .iter()
        .filter(|p| p.author.as_str().starts_with("did:"))
        .filter_map(|p| p.author_did.clone())
        .collect();
    if dids.is_empty() {
        return;
    }

    match resolver.handles_for_dids(&dids).await {
        Ok(resolved) => {
            for post in posts.iter_mut() {
                if !post.author.as_str().starts_with("did:") {
                    continue;
                }
                if let Some(handle) = post.author_did.as_ref().and_then(|d| resolved.get(d)) {
                    post.author = handle.clone();
                }
            }
        }
        Err(e) => {
            result.record_error(SyncItemError {
                stage: SyncStage::Source,
                item: None,
                message: format!("handle resolution failed: {}", error_chain(&e)),
            });
        }
    }
}

/// Evaluate the predicate over a page of posts with bounded concurrency,
/// preserving input order.
async fn filter_posts(
    posts: Vec<Post>,
    predicate: Option<&Predicate>,
    caps: &Capabilities<'_>,
    concurrency: usize,
) -> Result<Vec<Post>, SyncError> {
    let Some(predicate) = predicate else {
        return Ok(posts);
    };

    let evaluated: Vec<(Post, Result<bool, FilterEvalError>)> = futures::stream::iter(
        posts.into_iter().map(|post| async move {
            let verdict = predicate.evaluate(&post, caps).await;
            (post, verdict)
        }),
    )
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut survivors = Vec::new();
    for (post, verdict) in evaluated {
        // A capability that is outright missing is a configuration problem,
        // not a per-item error.
        if verdict.context(FilterSnafu)? {
            survivors.push(post);
        }
    }
    Ok(survivors)
}

async fn persist_checkpoint(
    store: &Arc<Store>,
    source: &DataSource,
    cursor: &Option<String>,
    filter_hash: &Option<String>,
) -> Result<(), SyncError> {
    let last_event_seq = store.last_event_seq().await.context(StoreSnafu)?;
    store
        .save_sync_checkpoint(&SyncCheckpoint {
            source: source.clone(),
            cursor: cursor.clone(),
            last_event_seq,
            filter_hash: filter_hash.clone(),
            updated_at: Timestamp::now(),
        })
        .await
        .context(StoreSnafu)
}
