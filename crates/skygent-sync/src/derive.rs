//! The derivation engine: materialise one store from another's event log.
//!
//! A derivation streams the source log from its checkpoint, re-evaluates
//! the filter against every upsert, copies matches into the target (with
//! `source_store` stamped into their meta) and propagates deletions. A
//! changed filter hash invalidates the checkpoint and forces a rescan from
//! seq 0.

use std::sync::Arc;
use std::time::Duration;

use skygent_core::{EventSeq, PostEvent, PostUpsert, Timestamp};
use skygent_filter::{Capabilities, FilterEvalError, FilterHash, Predicate};
use skygent_store::{DerivationCheckpoint, EvaluationMode, Store, StoreError};
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info};

use crate::LOG_TARGET;

#[derive(Debug, Snafu)]
pub enum DerivationError {
    #[snafu(display(
        "Filter depends on live capabilities and cannot run in EventTime mode"
    ))]
    EventTimeIncompatible,
    #[snafu(transparent)]
    Store { source: StoreError },
    #[snafu(display("Filter evaluation failed during derivation"))]
    Eval { source: FilterEvalError },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationResult {
    pub events_processed: u64,
    pub events_matched: u64,
    pub deletes_propagated: u64,
    pub last_source_event_seq: EventSeq,
}

#[derive(Debug, Clone)]
pub struct DeriveOptions {
    pub page_size: usize,
    pub checkpoint_every: u64,
    pub checkpoint_interval: Duration,
    /// Use insert-if-missing on the target so re-derivations are idempotent.
    pub idempotent: bool,
    pub command_label: String,
}

impl Default for DeriveOptions {
    fn default() -> Self {
        Self {
            page_size: 500,
            checkpoint_every: 500,
            checkpoint_interval: Duration::from_secs(5),
            idempotent: true,
            command_label: "derive".to_owned(),
        }
    }
}

fn stamped_hash(filter_hash: &FilterHash, mode: EvaluationMode) -> FilterHash {
    match mode {
        EvaluationMode::EventTime => filter_hash.clone(),
        // DeriveTime runs consult live capabilities, so their checkpoints
        // must not satisfy a later EventTime derivation.
        EvaluationMode::DeriveTime => filter_hash.with_derive_time(),
    }
}

/// A view is stale when its checkpoint is missing, was produced by a
/// different filter, or lags the source log.
pub async fn is_stale(
    source_store: &Arc<Store>,
    target_store: &Arc<Store>,
    filter_hash: &FilterHash,
    mode: EvaluationMode,
) -> Result<bool, DerivationError> {
    let checkpoint = target_store
        .load_derivation_checkpoint(target_store.name(), source_store.name())
        .await?;
    let Some(checkpoint) = checkpoint else {
        return Ok(true);
    };
    if checkpoint.filter_hash != stamped_hash(filter_hash, mode).as_str() {
        return Ok(true);
    }
    let source_tail = source_store.last_event_seq().await?.unwrap_or(EventSeq::ZERO);
    Ok(checkpoint.last_source_event_seq < source_tail)
}

/// Run one bounded derivation pass; returns when the source log is drained.
pub async fn derive(
    source_store: &Arc<Store>,
    target_store: &Arc<Store>,
    predicate: &Predicate,
    filter_hash: &FilterHash,
    mode: EvaluationMode,
    caps: &Capabilities<'_>,
    opts: &DeriveOptions,
) -> Result<DerivationResult, DerivationError> {
    if mode == EvaluationMode::EventTime && !predicate.is_event_time_compatible() {
        return EventTimeIncompatibleSnafu.fail();
    }

    let hash = stamped_hash(filter_hash, mode);
    let previous = target_store
        .load_derivation_checkpoint(target_store.name(), source_store.name())
        .await?;

    let mut result = match &previous {
        Some(cp) if cp.filter_hash == hash.as_str() => DerivationResult {
            events_processed: cp.events_processed,
            events_matched: cp.events_matched,
            deletes_propagated: cp.deletes_propagated,
            last_source_event_seq: cp.last_source_event_seq,
        },
        Some(_) => {
            info!(
                target: LOG_TARGET,
                view = %target_store.name(),
                source = %source_store.name(),
                "Filter hash changed; re-deriving from the beginning"
            );
            DerivationResult::default()
        }
        None => DerivationResult::default(),
    };

    let mut since_checkpoint: u64 = 0;
    let mut last_checkpoint_at = tokio::time::Instant::now();

    loop {
        let events = source_store
            .events_after(result.last_source_event_seq, opts.page_size)
            .await?;
        if events.is_empty() {
            break;
        }

        for entry in events {
            match entry.record.event {
                PostEvent::PostUpsert(upsert) => {
                    let matched = match mode {
                        EvaluationMode::EventTime => predicate
                            .evaluate_pure(&upsert.post)
                            .context(EvalSnafu)?,
                        EvaluationMode::DeriveTime => predicate
                            .evaluate(&upsert.post, caps)
                            .await
                            .context(EvalSnafu)?,
                    };
                    if matched {
                        let mut meta = upsert.meta.clone();
                        meta.source_store = Some(source_store.name().clone());
                        meta.command = opts.command_label.clone();
                        meta.filter_expr_hash = Some(hash.as_str().to_owned());
                        let derived = PostUpsert {
                            post: upsert.post,
                            meta,
                        };
                        if opts.idempotent {
                            target_store.append_upsert_if_missing(derived).await?;
                        } else {
                            target_store.append_upsert(derived).await?;
                        }
                        result.events_matched += 1;
                    }
                }
                PostEvent::PostDelete(delete) => {
                    target_store.append_delete(delete).await?;
                    result.deletes_propagated += 1;
                }
            }

            result.events_processed += 1;
            result.last_source_event_seq = entry.seq;
            since_checkpoint += 1;

            if opts.checkpoint_every <= since_checkpoint
                || opts.checkpoint_interval <= last_checkpoint_at.elapsed()
            {
                save_checkpoint(source_store, target_store, &hash, mode, &result).await?;
                since_checkpoint = 0;
                last_checkpoint_at = tokio::time::Instant::now();
            }
        }
    }

    save_checkpoint(source_store, target_store, &hash, mode, &result).await?;
    debug!(
        target: LOG_TARGET,
        view = %target_store.name(),
        source = %source_store.name(),
        processed = result.events_processed,
        matched = result.events_matched,
        deletes = result.deletes_propagated,
        "Derivation pass finished"
    );
    Ok(result)
}

async fn save_checkpoint(
    source_store: &Arc<Store>,
    target_store: &Arc<Store>,
    hash: &FilterHash,
    mode: EvaluationMode,
    result: &DerivationResult,
) -> Result<(), DerivationError> {
    target_store
        .save_derivation_checkpoint(&DerivationCheckpoint {
            view_name: target_store.name().clone(),
            source_store: source_store.name().clone(),
            target_store: target_store.name().clone(),
            filter_hash: hash.as_str().to_owned(),
            evaluation_mode: mode,
            last_source_event_seq: result.last_source_event_seq,
            events_processed: result.events_processed,
            events_matched: result.events_matched,
            deletes_propagated: result.deletes_propagated,
            updated_at: Timestamp::now(),
        })
        .await?;
    Ok(())
}
