//! Descriptors of remote post origins and the per-store source registry.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::event::EventSource;
use crate::id::{AtUri, Did, PostUri};
use crate::time::Timestamp;

/// Reconnect policy a jetstream adapter must honour: exponential backoff
/// from [`JETSTREAM_INITIAL_BACKOFF`] (doubling per failed attempt) capped
/// at [`JETSTREAM_MAX_BACKOFF`], reset after a healthy connection.
pub const JETSTREAM_INITIAL_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);
pub const JETSTREAM_MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(60);

/// Where posts come from. The remote client understands these; the sync
/// engine only uses them to key its checkpoints via [`DataSource::source_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum DataSource {
    Timeline,
    Feed {
        uri: AtUri,
    },
    List {
        uri: AtUri,
    },
    Author {
        actor: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<AuthorFeedFilter>,
        #[serde(default)]
        include_pins: bool,
    },
    Thread {
        uri: PostUri,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_height: Option<u32>,
    },
    Jetstream {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<Url>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        collections: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        dids: Vec<Did>,
        #[serde(default)]
        compress: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_message_size_bytes: Option<u64>,
    },
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorFeedFilter {
    PostsWithReplies,
    PostsNoReplies,
    PostsWithMedia,
    PostsAndAuthorThreads,
}

impl AuthorFeedFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorFeedFilter::PostsWithReplies => "posts_with_replies",
            AuthorFeedFilter::PostsNoReplies => "posts_no_replies",
            AuthorFeedFilter::PostsWithMedia => "posts_with_media",
            AuthorFeedFilter::PostsAndAuthorThreads => "posts_and_author_threads",
        }
    }
}

impl DataSource {
    /// Canonical checkpoint key for this source.
    ///
    /// Two descriptors that fetch the same posts must produce the same key:
    /// set-like fields (jetstream collections/dids) are sorted, and every
    /// field that changes what the source returns is included.
    pub fn source_key(&self) -> String {
        match self {
            DataSource::Timeline => "timeline".to_owned(),
            DataSource::Feed { uri } => format!("feed:{uri}"),
            DataSource::List { uri } => format!("list:{uri}"),
            DataSource::Author {
                actor,
                filter,
                include_pins,
            } => {
                let filter = filter.map(|f| f.as_str()).unwrap_or("default");
                format!("author:{actor}?filter={filter}&pins={include_pins}")
            }
            DataSource::Thread {
                uri,
                depth,
                parent_height,
            } => format!(
                "thread:{uri}?depth={}&parents={}",
                depth.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                parent_height
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            DataSource::Jetstream {
                endpoint,
                collections,
                dids,
                compress,
                max_message_size_bytes: _,
            } => {
                let mut collections: Vec<&str> =
                    collections.iter().map(String::as_str).collect();
                collections.sort_unstable();
                collections.dedup();
                let mut dids: Vec<&str> = dids.iter().map(Did::as_str).collect();
                dids.sort_unstable();
                dids.dedup();
                let endpoint = endpoint
                    .as_ref()
                    .map(Url::as_str)
                    .unwrap_or("default");
                format!(
                    "jetstream:{endpoint}?collections={}&dids={}&compress={compress}",
                    collections.join(","),
                    dids.join(","),
                )
            }
            DataSource::Notifications => "notifications".to_owned(),
        }
    }

    /// The provenance tag stamped into [`crate::EventMeta`] for posts pulled
    /// from this source.
    pub fn event_source(&self) -> EventSource {
        match self {
            DataSource::Timeline => EventSource::Timeline,
            DataSource::Feed { .. } => EventSource::Feed,
            DataSource::List { .. } => EventSource::List,
            DataSource::Author { .. } => EventSource::Author,
            DataSource::Thread { .. } => EventSource::Thread,
            DataSource::Jetstream { .. } => EventSource::Jetstream,
            DataSource::Notifications => EventSource::Notifications,
        }
    }
}

/// A source attached to a store's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSource {
    pub source: DataSource,
    pub enabled: bool,
    pub added_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
}

impl StoreSource {
    pub fn new(source: DataSource, added_at: Timestamp) -> Self {
        Self {
            source,
            enabled: true,
            added_at,
            last_synced_at: None,
        }
    }

    /// Identity of this source within its store.
    pub fn id(&self) -> String {
        self.source.source_key()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn author_key_includes_options() {
        let plain = DataSource::Author {
            actor: "alice.bsky.social".to_owned(),
            filter: None,
            include_pins: false,
        };
        let with_media = DataSource::Author {
            actor: "alice.bsky.social".to_owned(),
            filter: Some(AuthorFeedFilter::PostsWithMedia),
            include_pins: true,
        };
        assert_ne!(plain.source_key(), with_media.source_key());
    }

    #[test]
    fn jetstream_key_sorts_set_fields() {
        let a = DataSource::Jetstream {
            endpoint: None,
            collections: vec!["b".to_owned(), "a".to_owned()],
            dids: vec![
                Did::new("did:plc:two").unwrap(),
                Did::new("did:plc:one").unwrap(),
            ],
            compress: false,
            max_message_size_bytes: None,
        };
        let b = DataSource::Jetstream {
            endpoint: None,
            collections: vec!["a".to_owned(), "b".to_owned()],
            dids: vec![
                Did::new("did:plc:one").unwrap(),
                Did::new("did:plc:two").unwrap(),
            ],
            compress: false,
            max_message_size_bytes: None,
        };
        assert_eq!(a.source_key(), b.source_key());
    }

    #[test]
    fn descriptor_round_trips_as_tagged_json() {
        let source = DataSource::Thread {
            uri: PostUri::new("at://did:plc:abc/app.bsky.feed.post/1").unwrap(),
            depth: Some(6),
            parent_height: None,
        };
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"_tag\":\"Thread\""));
        let decoded: DataSource = serde_json::from_str(&json).unwrap();
        assert_eq!(source, decoded);
    }

    proptest! {
        #[test]
        fn jetstream_key_invariant_under_permutation(
            collections in proptest::collection::vec("[a-z]{1,8}", 0..5),
            raw_dids in proptest::collection::vec("[a-z0-9]{1,8}", 0..5),
            seed in any::<u64>(),
        ) {
            let dids: Vec<Did> = raw_dids
                .into_iter()
                .map(|s| Did::new(format!("did:plc:{s}")).unwrap())
                .collect();
            let source = DataSource::Jetstream {
                endpoint: None,
                collections: collections.clone(),
                dids: dids.clone(),
                compress: false,
                max_message_size_bytes: None,
            };
            let key = source.source_key();

            // Deterministic pseudo-shuffle driven by the seed.
            let mut shuffled_c = collections.clone();
            let mut shuffled_d = dids.clone();
            if !shuffled_c.is_empty() {
                let len_c = shuffled_c.len();
                shuffled_c.rotate_left((seed as usize) % len_c);
            }
            if !shuffled_d.is_empty() {
                let len_d = shuffled_d.len();
                shuffled_d.rotate_left((seed as usize) % len_d);
            }

            let shuffled = DataSource::Jetstream {
                endpoint: None,
                collections: shuffled_c,
                dids: shuffled_d,
                compress: false,
                max_message_size_bytes: None,
            };
            prop_assert_eq!(key, shuffled.source_key());
        }
    }
}
