//! The event envelope persisted in a store's event log.
//!
//! An [`EventRecord`] is immutable once appended. The store assigns each
//! appended record an [`EventSeq`]; the pair is an [`EventLogEntry`].
//! Replaying all entries from seq 0 reconstructs the post index exactly,
//! which makes the log the authoritative copy of a store.

use serde::{Deserialize, Serialize};

use crate::id::{EventId, EventSeq, PostUri, StoreName};
use crate::post::Post;
use crate::time::Timestamp;

/// Version stamped into every new [`EventRecord`]. Decoding any other
/// version is an error.
pub const EVENT_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    #[serde(deserialize_with = "de_version")]
    pub version: u32,
    pub event: PostEvent,
}

fn de_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let version = u32::deserialize(deserializer)?;
    if version != EVENT_RECORD_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported event record version {version} (expected {EVENT_RECORD_VERSION})"
        )));
    }
    Ok(version)
}

impl EventRecord {
    pub fn new(event: PostEvent) -> Self {
        Self {
            id: EventId::generate(),
            version: EVENT_RECORD_VERSION,
            event,
        }
    }

    pub fn post_uri(&self) -> &PostUri {
        match &self.event {
            PostEvent::PostUpsert(upsert) => &upsert.post.uri,
            PostEvent::PostDelete(delete) => &delete.uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum PostEvent {
    PostUpsert(PostUpsert),
    PostDelete(PostDelete),
}

impl PostEvent {
    /// The tag persisted into the log's `event_type` column.
    pub fn type_str(&self) -> &'static str {
        match self {
            PostEvent::PostUpsert(_) => "PostUpsert",
            PostEvent::PostDelete(_) => "PostDelete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpsert {
    pub post: Post,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDelete {
    pub uri: PostUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

/// Provenance attached to every upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub source: EventSource,
    /// Free-form label of the command/run that produced the event.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expr_hash: Option<String>,
    pub created_at: Timestamp,
    /// Set by the derivation engine to the store the event was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_store: Option<StoreName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Timeline,
    Feed,
    List,
    Author,
    Thread,
    Notifications,
    Jetstream,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Timeline => "timeline",
            EventSource::Feed => "feed",
            EventSource::List => "list",
            EventSource::Author => "author",
            EventSource::Thread => "thread",
            EventSource::Notifications => "notifications",
            EventSource::Jetstream => "jetstream",
        }
    }
}

/// A record as it sits in the log: the store-assigned sequence number plus
/// the immutable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub seq: EventSeq,
    pub record: EventRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{Handle, PostUri};

    fn upsert() -> PostEvent {
        PostEvent::PostUpsert(PostUpsert {
            post: Post::builder()
                .uri(PostUri::new("at://did:plc:abc/app.bsky.feed.post/1").unwrap())
                .author(Handle::new("alice.bsky.social").unwrap())
                .text("hello".to_owned())
                .created_at(Timestamp::parse_rfc3339("2026-01-01T00:10:00Z").unwrap())
                .build(),
            meta: EventMeta {
                source: EventSource::Timeline,
                command: "sync".to_owned(),
                filter_expr_hash: None,
                created_at: Timestamp::parse_rfc3339("2026-01-01T00:11:00Z").unwrap(),
                source_store: None,
            },
        })
    }

    #[test]
    fn record_round_trips_by_tag() {
        let record = EventRecord::new(upsert());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"_tag\":\"PostUpsert\""));
        let decoded: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn unknown_record_versions_are_rejected() {
        let mut value = serde_json::to_value(EventRecord::new(upsert())).unwrap();
        value["version"] = serde_json::json!(2);
        let err = serde_json::from_value::<EventRecord>(value).unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");
    }

    #[test]
    fn delete_round_trips_and_reports_target_uri() {
        let record = EventRecord::new(PostEvent::PostDelete(PostDelete {
            uri: PostUri::new("at://did:plc:abc/app.bsky.feed.post/1").unwrap(),
            cid: None,
        }));
        assert_eq!(record.version, EVENT_RECORD_VERSION);
        assert_eq!(
            record.post_uri().as_str(),
            "at://did:plc:abc/app.bsky.feed.post/1"
        );
        let json = serde_json::to_string(&record).unwrap();
        let decoded: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }
}
