//! Checkpoint records: index, sync, derivation.
//!
//! Checkpoints are overwritten in place. The sync/derivation engines only
//! persist them *after* the batch they cover has committed, so a stored
//! `last_event_seq` never runs ahead of the log.

use rusqlite::{Connection, OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use skygent_core::{DataSource, EventSeq, StoreName, Timestamp};
use snafu::ResultExt as _;

use crate::{DatabaseSnafu, DecodeSnafu, Store, StoreResult, event_log_ops};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCheckpoint {
    pub index_name: String,
    pub version: u32,
    pub last_event_seq: EventSeq,
    pub event_count: u64,
    pub updated_at: Timestamp,
}

/// Per (store, data source) sync progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub source: DataSource,
    pub cursor: Option<String>,
    pub last_event_seq: Option<EventSeq>,
    pub filter_hash: Option<String>,
    pub updated_at: Timestamp,
}

/// Per (view, source) derivation progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationCheckpoint {
    pub view_name: StoreName,
    pub source_store: StoreName,
    pub target_store: StoreName,
    pub filter_hash: String,
    pub evaluation_mode: EvaluationMode,
    pub last_source_event_seq: EventSeq,
    pub events_processed: u64,
    pub events_matched: u64,
    pub deletes_propagated: u64,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Effectful leaves are forbidden; the result is reproducible from the
    /// source log alone.
    EventTime,
    /// Effectful leaves call live capabilities; the checkpoint's filter
    /// hash is stamped so a later EventTime run rescans from zero.
    DeriveTime,
}

impl EvaluationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::EventTime => "event_time",
            EvaluationMode::DeriveTime => "derive_time",
        }
    }

    pub fn from_str_stored(s: &str) -> Self {
        match s {
            "derive_time" => EvaluationMode::DeriveTime,
            _ => EvaluationMode::EventTime,
        }
    }
}

pub(crate) fn load_index_checkpoint_tx(
    conn: &Connection,
    index_name: &str,
) -> StoreResult<Option<IndexCheckpoint>> {
    conn.query_row(
        "SELECT version, last_event_seq, event_count, updated_at
         FROM index_checkpoints WHERE index_name = ?1",
        [index_name],
        |row| {
            Ok(IndexCheckpoint {
                index_name: index_name.to_owned(),
                version: row.get(0)?,
                last_event_seq: EventSeq(row.get(1)?),
                event_count: row.get(2)?,
                updated_at: Timestamp::from_unix_micros(row.get(3)?),
            })
        },
    )
    .optional()
    .context(DatabaseSnafu)
}

pub(crate) fn save_index_checkpoint_tx(
    conn: &Connection,
    checkpoint: &IndexCheckpoint,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO index_checkpoints (index_name, version, last_event_seq, event_count, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(index_name) DO UPDATE SET
            version = excluded.version,
            last_event_seq = excluded.last_event_seq,
            event_count = excluded.event_count,
            updated_at = excluded.updated_at",
        params![
            checkpoint.index_name,
            checkpoint.version,
            checkpoint.last_event_seq.0,
            checkpoint.event_count,
            checkpoint.updated_at.unix_micros(),
        ],
    )
    .context(DatabaseSnafu)?;
    Ok(())
}

pub(crate) fn delete_index_checkpoint_tx(conn: &Connection, index_name: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM index_checkpoints WHERE index_name = ?1",
        [index_name],
    )
    .context(DatabaseSnafu)?;
    Ok(())
}

impl Store {
    pub async fn index_checkpoint(&self) -> StoreResult<Option<IndexCheckpoint>> {
        self.read_with(|conn| load_index_checkpoint_tx(conn, crate::index_ops::POSTS_INDEX))
            .await
    }

    /// Load the sync checkpoint for a source, upgrading legacy rows that
    /// only recorded `last_event_id` by joining through the event log.
    pub async fn load_sync_checkpoint(
        &self,
        source: &DataSource,
    ) -> StoreResult<Option<SyncCheckpoint>> {
        let key = source.source_key();
        self.read_with(move |conn| {
            let row = conn
                .query_row(
                    "SELECT source_json, cursor, last_event_seq, last_event_id, filter_hash, updated_at
                     FROM sync_checkpoints WHERE source_key = ?1",
                    [&key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<u64>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    },
                )
                .optional()
                .context(DatabaseSnafu)?;

            let Some((source_json, cursor, seq, legacy_id, filter_hash, updated_at)) = row else {
                return Ok(None);
            };

            let source: DataSource = serde_json::from_str(&source_json).context(DecodeSnafu)?;
            let last_event_seq = match (seq, legacy_id) {
                (Some(seq), _) => Some(EventSeq(seq)),
                (None, Some(id)) => event_log_ops::seq_for_event_id_tx(conn, &id)?,
                (None, None) => None,
            };

            Ok(Some(SyncCheckpoint {
                source,
                cursor,
                last_event_seq,
                filter_hash,
                updated_at: Timestamp::from_unix_micros(updated_at),
            }))
        })
        .await
    }

    pub async fn save_sync_checkpoint(&self, checkpoint: &SyncCheckpoint) -> StoreResult<()> {
        let key = checkpoint.source.source_key();
        let source_json = serde_json::to_string(&checkpoint.source).context(DecodeSnafu)?;
        let checkpoint = checkpoint.clone();
        self.write_with(move |tx| {
            tx.execute(
                "INSERT INTO sync_checkpoints
                    (source_key, source_json, cursor, last_event_seq, last_event_id, filter_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
                 ON CONFLICT(source_key) DO UPDATE SET
                    source_json = excluded.source_json,
                    cursor = excluded.cursor,
                    last_event_seq = excluded.last_event_seq,
                    last_event_id = NULL,
                    filter_hash = excluded.filter_hash,
                    updated_at = excluded.updated_at",
                params![
                    key,
                    source_json,
                    checkpoint.cursor,
                    checkpoint.last_event_seq.map(|s| s.0),
                    checkpoint.filter_hash,
                    checkpoint.updated_at.unix_micros(),
                ],
            )
            .context(DatabaseSnafu)?;
            Ok(())
        })
        .await
    }

    pub async fn list_sync_checkpoints(&self) -> StoreResult<Vec<SyncCheckpoint>> {
        self.read_with(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT source_json, cursor, last_event_seq, filter_hash, updated_at
                     FROM sync_checkpoints ORDER BY source_key",
                )
                .context(DatabaseSnafu)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<u64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .context(DatabaseSnafu)?;

            let mut checkpoints = Vec::new();
            for row in rows {
                let (source_json, cursor, seq, filter_hash, updated_at) =
                    row.context(DatabaseSnafu)?;
                checkpoints.push(SyncCheckpoint {
                    source: serde_json::from_str(&source_json).context(DecodeSnafu)?,
                    cursor,
                    last_event_seq: seq.map(EventSeq),
                    filter_hash,
                    updated_at: Timestamp::from_unix_micros(updated_at),
                });
            }
            Ok(checkpoints)
        })
        .await
    }

    pub async fn load_derivation_checkpoint(
        &self,
        view_name: &StoreName,
        source_store: &StoreName,
    ) -> StoreResult<Option<DerivationCheckpoint>> {
        let view = view_name.clone();
        let source = source_store.clone();
        self.read_with(move |conn| {
            conn.query_row(
                "SELECT target_store, filter_hash, evaluation_mode, last_source_event_seq,
                        events_processed, events_matched, deletes_propagated, updated_at
                 FROM derivation_checkpoints
                 WHERE view_name = ?1 AND source_store = ?2",
                params![view.as_str(), source.as_str()],
                |row| {
                    Ok(DerivationCheckpoint {
                        view_name: view.clone(),
                        source_store: source.clone(),
                        target_store: row
                            .get::<_, String>(0)?
                            .parse()
                            .unwrap_or_else(|_| view.clone()),
                        filter_hash: row.get(1)?,
                        evaluation_mode: EvaluationMode::from_str_stored(
                            &row.get::<_, String>(2)?,
                        ),
                        last_source_event_seq: EventSeq(row.get(3)?),
                        events_processed: row.get(4)?,
                        events_matched: row.get(5)?,
                        deletes_propagated: row.get(6)?,
                        updated_at: Timestamp::from_unix_micros(row.get(7)?),
                    })
                },
            )
            .optional()
            .context(DatabaseSnafu)
        })
        .await
    }

    pub async fn save_derivation_checkpoint(
        &self,
        checkpoint: &DerivationCheckpoint,
    ) -> StoreResult<()> {
        let checkpoint = checkpoint.clone();
        self.write_with(move |tx| {
            tx.execute(
                "INSERT INTO derivation_checkpoints
                    (view_name, source_store, target_store, filter_hash, evaluation_mode,
                     last_source_event_seq, events_processed, events_matched,
                     deletes_propagated, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(view_name, source_store) DO UPDATE SET
                    target_store = excluded.target_store,
                    filter_hash = excluded.filter_hash,
                    evaluation_mode = excluded.evaluation_mode,
                    last_source_event_seq = excluded.last_source_event_seq,
                    events_processed = excluded.events_processed,
                    events_matched = excluded.events_matched,
                    deletes_propagated = excluded.deletes_propagated,
                    updated_at = excluded.updated_at",
                params![
                    checkpoint.view_name.as_str(),
                    checkpoint.source_store.as_str(),
                    checkpoint.target_store.as_str(),
                    checkpoint.filter_hash,
                    checkpoint.evaluation_mode.as_str(),
                    checkpoint.last_source_event_seq.0,
                    checkpoint.events_processed,
                    checkpoint.events_matched,
                    checkpoint.deletes_propagated,
                    checkpoint.updated_at.unix_micros(),
                ],
            )
            .context(DatabaseSnafu)?;
            Ok(())
        })
        .await
    }

    pub async fn list_derivation_checkpoints(&self) -> StoreResult<Vec<DerivationCheckpoint>> {
        self.read_with(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT view_name, source_store, target_store, filter_hash, evaluation_mode,
                            last_source_event_seq, events_processed, events_matched,
                            deletes_propagated, updated_at
                     FROM derivation_checkpoints ORDER BY view_name",
                )
                .context(DatabaseSnafu)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u64>(5)?,
                        row.get::<_, u64>(6)?,
                        row.get::<_, u64>(7)?,
                        row.get::<_, u64>(8)?,
                        row.get::<_, i64>(9)?,
                    ))
                })
                .context(DatabaseSnafu)?;

            let mut checkpoints = Vec::new();
            for row in rows {
                let (view, source, target, hash, mode, seq, processed, matched, deletes, at) =
                    row.context(DatabaseSnafu)?;
                let (Ok(view), Ok(source), Ok(target)) =
                    (view.parse(), source.parse(), target.parse())
                else {
                    continue;
                };
                checkpoints.push(DerivationCheckpoint {
                    view_name: view,
                    source_store: source,
                    target_store: target,
                    filter_hash: hash,
                    evaluation_mode: EvaluationMode::from_str_stored(&mode),
                    last_source_event_seq: EventSeq(seq),
                    events_processed: processed,
                    events_matched: matched,
                    deletes_propagated: deletes,
                    updated_at: Timestamp::from_unix_micros(at),
                });
            }
            Ok(checkpoints)
        })
        .await
    }
}
