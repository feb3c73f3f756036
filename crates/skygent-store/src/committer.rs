//! The committer: the only write path into a store.
//!
//! Every operation is one transaction covering the index mutation and the
//! log append, taken under the store's single write permit. On commit the
//! index and log agree; on any failure both roll back.

use futures::Stream;
use skygent_core::{
    EventId, EventLogEntry, EventRecord, EventSeq, PostDelete, PostEvent, PostUpsert, Timestamp,
};
use tracing::{debug, info};

use crate::{LOG_TARGET, Store, StoreResult, event_log_ops, index_ops};

impl Store {
    /// Unconditionally overwrite the row for the post's uri and append the
    /// event.
    pub async fn append_upsert(&self, upsert: PostUpsert) -> StoreResult<EventLogEntry> {
        let mut entries = self.append_upserts(vec![upsert]).await?;
        Ok(entries.pop().expect("one entry per input"))
    }

    /// Atomic batch of unconditional upserts: all events commit together
    /// and receive contiguous sequence numbers.
    pub async fn append_upserts(
        &self,
        upserts: Vec<PostUpsert>,
    ) -> StoreResult<Vec<EventLogEntry>> {
        if upserts.is_empty() {
            return Ok(vec![]);
        }
        let now = Timestamp::now();
        let new_events_tx = self.new_events_tx.clone();
        let count = upserts.len();
        let entries = self
            .write_with(move |tx| {
                let mut entries = Vec::with_capacity(upserts.len());
                for upsert in upserts {
                    let record = EventRecord::new(PostEvent::PostUpsert(upsert));
                    let entry = event_log_ops::append_event_tx(tx, &record, now)?;
                    index_ops::apply_event_tx(tx, &entry, now)?;
                    entries.push(entry);
                }
                let broadcast = entries.clone();
                tx.on_commit(move || {
                    for entry in broadcast {
                        let _ = new_events_tx.send(entry);
                    }
                });
                Ok(entries)
            })
            .await?;
        debug!(target: LOG_TARGET, store = %self.name, count, "Committed upserts");
        Ok(entries)
    }

    /// Insert only when no row for the uri exists yet. A duplicate writes
    /// nothing at all (no row, no event) and returns `None`.
    pub async fn append_upsert_if_missing(
        &self,
        upsert: PostUpsert,
    ) -> StoreResult<Option<EventLogEntry>> {
        let mut entries = self.append_upserts_if_missing(vec![upsert]).await?;
        Ok(entries.pop().expect("one slot per input"))
    }

    /// Batch insert-if-missing in one transaction; one `Option` per input,
    /// in input order.
    pub async fn append_upserts_if_missing(
        &self,
        upserts: Vec<PostUpsert>,
    ) -> StoreResult<Vec<Option<EventLogEntry>>> {
        if upserts.is_empty() {
            return Ok(vec![]);
        }
        let now = Timestamp::now();
        let new_events_tx = self.new_events_tx.clone();
        self.write_with(move |tx| {
            let mut slots = Vec::with_capacity(upserts.len());
            let mut committed = Vec::new();
            for upsert in upserts {
                if index_ops::post_row_exists_tx(tx, &upsert.post.uri)? {
                    slots.push(None);
                    continue;
                }
                let record = EventRecord::new(PostEvent::PostUpsert(upsert));
                let entry = event_log_ops::append_event_tx(tx, &record, now)?;
                index_ops::apply_event_tx(tx, &entry, now)?;
                committed.push(entry.clone());
                slots.push(Some(entry));
            }
            tx.on_commit(move || {
                for entry in committed {
                    let _ = new_events_tx.send(entry);
                }
            });
            Ok(slots)
        })
        .await
    }

    /// Append a deletion event and drop the row (if any).
    pub async fn append_delete(&self, delete: PostDelete) -> StoreResult<EventLogEntry> {
        let now = Timestamp::now();
        let new_events_tx = self.new_events_tx.clone();
        self.write_with(move |tx| {
            let record = EventRecord::new(PostEvent::PostDelete(delete));
            let entry = event_log_ops::append_event_tx(tx, &record, now)?;
            index_ops::apply_event_tx(tx, &entry, now)?;
            let broadcast = entry.clone();
            tx.on_commit(move || {
                let _ = new_events_tx.send(broadcast);
            });
            Ok(entry)
        })
        .await
    }

    pub async fn last_event_seq(&self) -> StoreResult<Option<EventSeq>> {
        self.read_with(event_log_ops::last_event_seq_tx).await
    }

    pub async fn last_event_id(&self) -> StoreResult<Option<EventId>> {
        self.read_with(event_log_ops::last_event_id_tx).await
    }

    pub async fn event_count(&self) -> StoreResult<u64> {
        self.read_with(event_log_ops::event_count_tx).await
    }

    pub async fn post_count(&self) -> StoreResult<u64> {
        self.read_with(index_ops::post_count_tx).await
    }

    /// The full upsert/delete history of one post, oldest first.
    pub async fn events_for_post(
        &self,
        uri: &skygent_core::PostUri,
        limit: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        let uri = uri.as_str().to_owned();
        self.read_with(move |conn| event_log_ops::events_for_post_tx(conn, &uri, limit))
            .await
    }

    /// Events strictly after `after`, ascending, at most `limit`.
    pub async fn events_after(
        &self,
        after: EventSeq,
        limit: usize,
    ) -> StoreResult<Vec<EventLogEntry>> {
        self.read_with(move |conn| event_log_ops::events_after_tx(conn, after, limit))
            .await
    }

    /// Lazy ordered stream over the whole log, paging underneath.
    pub fn stream_events(
        self: std::sync::Arc<Self>,
        page_size: usize,
    ) -> impl Stream<Item = StoreResult<EventLogEntry>> + use<> {
        let store = self;
        async_stream::try_stream! {
            let mut after = EventSeq::ZERO;
            loop {
                let page = store.events_after(after, page_size).await?;
                let Some(last) = page.last() else {
                    break;
                };
                after = last.seq;
                for entry in page {
                    yield entry;
                }
            }
        }
    }

    /// Drop everything the store owns: log, projection, checkpoints.
    pub async fn clear(&self) -> StoreResult<()> {
        use snafu::ResultExt as _;

        self.write_with(|tx| {
            event_log_ops::clear_log_tx(tx)?;
            index_ops::clear_index_tx(tx)?;
            tx.execute("DELETE FROM sync_checkpoints", [])
                .context(crate::DatabaseSnafu)?;
            tx.execute("DELETE FROM derivation_checkpoints", [])
                .context(crate::DatabaseSnafu)?;
            Ok(())
        })
        .await?;
        info!(target: LOG_TARGET, store = %self.name, "Cleared store");
        Ok(())
    }

    /// Rebuild the posts projection by replaying the event log from seq 0.
    ///
    /// This is the canonical recovery procedure: after it, the projection
    /// equals what committing the same events one by one would have
    /// produced. Returns the number of events applied.
    pub async fn rebuild_index(&self) -> StoreResult<u64> {
        let now = Timestamp::now();
        let applied = self
            .write_with(move |tx| {
                index_ops::clear_index_tx(tx)?;
                let mut applied = 0u64;
                let mut after = EventSeq::ZERO;
                loop {
                    let page = event_log_ops::events_after_tx(tx, after, 500)?;
                    let Some(last) = page.last() else {
                        break;
                    };
                    after = last.seq;
                    for entry in &page {
                        if index_ops::apply_event_tx(tx, entry, now)? {
                            applied += 1;
                        }
                    }
                }
                Ok(applied)
            })
            .await?;
        info!(target: LOG_TARGET, store = %self.name, applied, "Rebuilt post index from event log");
        Ok(applied)
    }
}
