//! Low-level event-log operations.
//!
//! All functions here run inside a caller-provided connection/transaction;
//! the async surface lives in [`crate::committer`].

use rusqlite::{Connection, OptionalExtension as _, params};
use skygent_core::{
    EventId, EventLogEntry, EventRecord, EventSeq, PostEvent, Timestamp,
};
use snafu::ResultExt as _;

use crate::{DatabaseSnafu, DecodeSnafu, StoreResult};

/// Append one record; the database allocates the next `event_seq`.
///
/// `AUTOINCREMENT` guarantees the sequence is strictly monotone and never
/// reused; because the insert happens inside the committer's transaction, a
/// rollback also rolls the counter back, keeping the log gap-free.
pub(crate) fn append_event_tx(
    conn: &Connection,
    record: &EventRecord,
    now: Timestamp,
) -> StoreResult<EventLogEntry> {
    let payload = serde_json::to_string(record).context(DecodeSnafu)?;
    let source = match &record.event {
        PostEvent::PostUpsert(upsert) => Some(upsert.meta.source.as_str()),
        PostEvent::PostDelete(_) => None,
    };
    conn.execute(
        "INSERT INTO event_log (event_id, event_type, post_uri, payload_json, created_at, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id.to_string(),
            record.event.type_str(),
            record.post_uri().as_str(),
            payload,
            now.unix_micros(),
            source,
        ],
    )
    .context(DatabaseSnafu)?;

    let seq = EventSeq(conn.last_insert_rowid() as u64);
    Ok(EventLogEntry {
        seq,
        record: record.clone(),
    })
}

pub(crate) fn last_event_seq_tx(conn: &Connection) -> StoreResult<Option<EventSeq>> {
    let seq: Option<u64> = conn
        .query_row("SELECT MAX(event_seq) FROM event_log", [], |row| row.get(0))
        .context(DatabaseSnafu)?;
    Ok(seq.map(EventSeq))
}

pub(crate) fn last_event_id_tx(conn: &Connection) -> StoreResult<Option<EventId>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT event_id FROM event_log ORDER BY event_seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context(DatabaseSnafu)?;
    id.map(|s| serde_json::from_value::<EventId>(serde_json::Value::String(s)))
        .transpose()
        .context(DecodeSnafu)
}

pub(crate) fn event_count_tx(conn: &Connection) -> StoreResult<u64> {
    conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))
        .context(DatabaseSnafu)
}

/// Find the `event_seq` of a stored event id; used to upgrade legacy sync
/// checkpoints that only recorded `last_event_id`.
pub(crate) fn seq_for_event_id_tx(
    conn: &Connection,
    event_id: &str,
) -> StoreResult<Option<EventSeq>> {
    let seq: Option<u64> = conn
        .query_row(
            "SELECT event_seq FROM event_log WHERE event_id = ?1",
            [event_id],
            |row| row.get(0),
        )
        .optional()
        .context(DatabaseSnafu)?;
    Ok(seq.map(EventSeq))
}

/// Full event history of one post, ascending by seq.
pub(crate) fn events_for_post_tx(
    conn: &Connection,
    uri: &str,
    limit: usize,
) -> StoreResult<Vec<EventLogEntry>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT event_seq, payload_json FROM event_log
             WHERE post_uri = ?1
             ORDER BY event_seq ASC
             LIMIT ?2",
        )
        .context(DatabaseSnafu)?;

    let rows = stmt
        .query_map(params![uri, limit as i64], |row| {
            Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?))
        })
        .context(DatabaseSnafu)?;

    let mut entries = Vec::new();
    for row in rows {
        let (seq, payload) = row.context(DatabaseSnafu)?;
        let record: EventRecord = serde_json::from_str(&payload).context(DecodeSnafu)?;
        entries.push(EventLogEntry {
            seq: EventSeq(seq),
            record,
        });
    }
    Ok(entries)
}

/// Events with `seq > after`, ascending, at most `limit`.
pub(crate) fn events_after_tx(
    conn: &Connection,
    after: EventSeq,
    limit: usize,
) -> StoreResult<Vec<EventLogEntry>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT event_seq, payload_json FROM event_log
             WHERE ?1 < event_seq
             ORDER BY event_seq ASC
             LIMIT ?2",
        )
        .context(DatabaseSnafu)?;

    let rows = stmt
        .query_map(params![after.0, limit as i64], |row| {
            Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?))
        })
        .context(DatabaseSnafu)?;

    let mut entries = Vec::new();
    for row in rows {
        let (seq, payload) = row.context(DatabaseSnafu)?;
        let record: EventRecord = serde_json::from_str(&payload).context(DecodeSnafu)?;
        entries.push(EventLogEntry {
            seq: EventSeq(seq),
            record,
        });
    }
    Ok(entries)
}

/// Wipe the log and reset the sequence counter, so a cleared store starts
/// again at seq 1.
pub(crate) fn clear_log_tx(conn: &Connection) -> StoreResult<()> {
    conn.execute("DELETE FROM event_log", [])
        .context(DatabaseSnafu)?;
    conn.execute("DELETE FROM sqlite_sequence WHERE name = 'event_log'", [])
        .context(DatabaseSnafu)?;
    Ok(())
}
