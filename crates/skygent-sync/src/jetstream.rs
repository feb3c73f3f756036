//! Jetstream frame decoding.
//!
//! Jetstream delivers commit frames over a websocket; the websocket adapter
//! itself lives with the remote client, but the frame format is stable and
//! captured frame files are a common way to feed a store offline. This
//! module decodes frames into [`RawPostRecord`]s and provides
//! [`JetstreamCaptureSource`], a [`PostSource`] replaying an NDJSON capture
//! of frames. A live adapter must honour the reconnect policy constants in
//! `skygent_core::source`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use skygent_core::{DataSource, RawPostRecord};
use snafu::ResultExt as _;
use tracing::trace;

use crate::LOG_TARGET;
use crate::source::{MalformedRecordSnafu, Page, PostSource, PostSourceError, SourceIoSnafu};

pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// One frame off the jetstream firehose.
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamEvent {
    pub did: String,
    #[serde(rename = "time_us")]
    pub time_us: u64,
    pub kind: String,
    #[serde(default)]
    pub commit: Option<JetstreamCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamCommit {
    #[serde(default)]
    pub rev: String,
    pub operation: String,
    pub collection: String,
    pub rkey: String,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub cid: Option<String>,
}

/// Convert a commit frame into a raw post record.
///
/// Only post-collection create/update commits become records; identity
/// frames, account frames and deletes return `None` (deletion flows arrive
/// through explicit `PostDelete` events, not through sync).
pub fn raw_record_from_frame(frame: &JetstreamEvent) -> Option<RawPostRecord> {
    if frame.kind != "commit" {
        return None;
    }
    let commit = frame.commit.as_ref()?;
    if commit.collection != POST_COLLECTION {
        trace!(target: LOG_TARGET, collection = %commit.collection, "Skipping non-post frame");
        return None;
    }
    if commit.operation != "create" && commit.operation != "update" {
        return None;
    }
    let record = commit.record.clone()?;

    Some(RawPostRecord {
        uri: format!("at://{}/{}/{}", frame.did, commit.collection, commit.rkey),
        cid: commit.cid.clone(),
        author_did: Some(frame.did.clone()),
        author_handle: None,
        record,
        ..Default::default()
    })
}

/// Replays a captured jetstream session (one frame JSON per line).
///
/// Same cursor scheme as [`crate::NdjsonFileSource`]: the line offset, so
/// an interrupted sync resumes at its checkpoint.
pub struct JetstreamCaptureSource {
    path: PathBuf,
}

impl JetstreamCaptureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PostSource for JetstreamCaptureSource {
    async fn fetch_page(
        &self,
        _source: &DataSource,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<Page, PostSourceError> {
        let offset: usize = cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .context(SourceIoSnafu { path: &self.path })?;

        let mut records = Vec::new();
        let mut consumed = offset;
        for (line_no, line) in content.lines().enumerate().skip(offset) {
            if limit <= records.len() {
                break;
            }
            consumed = line_no + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let frame: JetstreamEvent =
                serde_json::from_str(trimmed).context(MalformedRecordSnafu {
                    path: &self.path,
                    line: line_no + 1,
                })?;
            if let Some(record) = raw_record_from_frame(&frame) {
                records.push(record);
            }
        }

        let total_lines = content.lines().count();
        let cursor = (consumed < total_lines).then(|| consumed.to_string());
        Ok(Page { records, cursor })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(kind: &str, collection: &str, operation: &str) -> JetstreamEvent {
        serde_json::from_value(json!({
            "did": "did:plc:abc",
            "time_us": 1_700_000_000_000_000u64,
            "kind": kind,
            "commit": {
                "rev": "aaa",
                "operation": operation,
                "collection": collection,
                "rkey": "3kabc",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": "hi from jetstream",
                    "createdAt": "2026-01-01T00:10:00Z",
                },
                "cid": "bafyfoo",
            },
        }))
        .unwrap()
    }

    #[test]
    fn post_create_frames_become_raw_records() {
        let raw = raw_record_from_frame(&frame("commit", POST_COLLECTION, "create")).unwrap();
        assert_eq!(raw.uri, "at://did:plc:abc/app.bsky.feed.post/3kabc");
        assert_eq!(raw.author_did.as_deref(), Some("did:plc:abc"));
        assert_eq!(raw.cid.as_deref(), Some("bafyfoo"));

        let post = skygent_core::parse_post(&raw).unwrap();
        assert_eq!(post.text, "hi from jetstream");
    }

    #[test]
    fn non_post_and_delete_frames_are_skipped() {
        assert!(raw_record_from_frame(&frame("identity", POST_COLLECTION, "create")).is_none());
        assert!(raw_record_from_frame(&frame("commit", "app.bsky.feed.like", "create")).is_none());
        assert!(raw_record_from_frame(&frame("commit", POST_COLLECTION, "delete")).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_source_filters_while_paging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.ndjson");
        let lines = [
            serde_json::to_string(&json!({
                "did": "did:plc:abc",
                "time_us": 1u64,
                "kind": "commit",
                "commit": {
                    "operation": "create",
                    "collection": POST_COLLECTION,
                    "rkey": "1",
                    "record": {"text": "a", "createdAt": "2026-01-01T00:00:00Z"},
                },
            }))
            .unwrap(),
            serde_json::to_string(&json!({
                "did": "did:plc:abc",
                "time_us": 2u64,
                "kind": "commit",
                "commit": {
                    "operation": "delete",
                    "collection": POST_COLLECTION,
                    "rkey": "1",
                },
            }))
            .unwrap(),
            serde_json::to_string(&json!({
                "did": "did:plc:abc",
                "time_us": 3u64,
                "kind": "commit",
                "commit": {
                    "operation": "create",
                    "collection": POST_COLLECTION,
                    "rkey": "2",
                    "record": {"text": "b", "createdAt": "2026-01-01T00:01:00Z"},
                },
            }))
            .unwrap(),
        ];
        tokio::fs::write(&path, lines.join("\n")).await.unwrap();

        let source = JetstreamCaptureSource::new(&path);
        let page = source
            .fetch_page(&DataSource::Timeline, None, 10)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.cursor, None);
        assert!(page.records[0].uri.ends_with("/1"));
        assert!(page.records[1].uri.ends_with("/2"));
    }
}
