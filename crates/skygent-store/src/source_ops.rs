//! Per-store source configuration (`store_sources` table).

use rusqlite::{OptionalExtension as _, params};
use skygent_core::{DataSource, StoreSource, Timestamp};
use snafu::ResultExt as _;

use crate::{DatabaseSnafu, DecodeSnafu, Store, StoreResult};

impl Store {
    pub async fn add_source(&self, source: StoreSource) -> StoreResult<()> {
        let id = source.id();
        let source_json = serde_json::to_string(&source.source).context(DecodeSnafu)?;
        self.write_with(move |tx| {
            tx.execute(
                "INSERT INTO store_sources (source_id, source_json, enabled, added_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(source_id) DO UPDATE SET
                    source_json = excluded.source_json,
                    enabled = excluded.enabled",
                params![
                    id,
                    source_json,
                    source.enabled,
                    source.added_at.unix_micros(),
                    source.last_synced_at.map(|t| t.unix_micros()),
                ],
            )
            .context(DatabaseSnafu)?;
            Ok(())
        })
        .await
    }

    pub async fn remove_source(&self, source: &DataSource) -> StoreResult<bool> {
        let id = source.source_key();
        self.write_with(move |tx| {
            let changed = tx
                .execute("DELETE FROM store_sources WHERE source_id = ?1", [&id])
                .context(DatabaseSnafu)?;
            Ok(0 < changed)
        })
        .await
    }

    pub async fn set_source_enabled(
        &self,
        source: &DataSource,
        enabled: bool,
    ) -> StoreResult<bool> {
        let id = source.source_key();
        self.write_with(move |tx| {
            let changed = tx
                .execute(
                    "UPDATE store_sources SET enabled = ?2 WHERE source_id = ?1",
                    params![id, enabled],
                )
                .context(DatabaseSnafu)?;
            Ok(0 < changed)
        })
        .await
    }

    /// Stamp the time a sync run last covered this source.
    pub async fn touch_source_synced(
        &self,
        source: &DataSource,
        at: Timestamp,
    ) -> StoreResult<()> {
        let id = source.source_key();
        self.write_with(move |tx| {
            tx.execute(
                "UPDATE store_sources SET last_synced_at = ?2 WHERE source_id = ?1",
                params![id, at.unix_micros()],
            )
            .context(DatabaseSnafu)?;
            Ok(())
        })
        .await
    }

    pub async fn list_sources(&self) -> StoreResult<Vec<StoreSource>> {
        self.read_with(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT source_json, enabled, added_at, last_synced_at
                     FROM store_sources ORDER BY added_at, source_id",
                )
                .context(DatabaseSnafu)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                })
                .context(DatabaseSnafu)?;

            let mut sources = Vec::new();
            for row in rows {
                let (source_json, enabled, added_at, last_synced_at) =
                    row.context(DatabaseSnafu)?;
                sources.push(StoreSource {
                    source: serde_json::from_str(&source_json).context(DecodeSnafu)?,
                    enabled,
                    added_at: Timestamp::from_unix_micros(added_at),
                    last_synced_at: last_synced_at.map(Timestamp::from_unix_micros),
                });
            }
            Ok(sources)
        })
        .await
    }

    pub async fn get_source(&self, source: &DataSource) -> StoreResult<Option<StoreSource>> {
        let id = source.source_key();
        self.read_with(move |conn| {
            conn.query_row(
                "SELECT source_json, enabled, added_at, last_synced_at
                 FROM store_sources WHERE source_id = ?1",
                [&id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()
            .context(DatabaseSnafu)?
            .map(|(source_json, enabled, added_at, last_synced_at)| {
                Ok(StoreSource {
                    source: serde_json::from_str(&source_json).context(DecodeSnafu)?,
                    enabled,
                    added_at: Timestamp::from_unix_micros(added_at),
                    last_synced_at: last_synced_at.map(Timestamp::from_unix_micros),
                })
            })
            .transpose()
        })
        .await
    }
}
