use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use skygent_core::{
    DataSource, Handle, Hashtag, RawPostRecord, StoreName,
};
use skygent_filter::{Capabilities, FilterExpr, compile, expr_hash};
use skygent_store::{EvaluationMode, QueryOpts, Store};
use snafu::ResultExt as _;
use tempfile::{TempDir, tempdir};

use crate::derive::{DeriveOptions, derive, is_stale};
use crate::engine::{CommitMode, SyncOptions, sync_source};
use crate::report::NullReporter;
use crate::result::SyncError;
use crate::source::{NdjsonFileSource, Page, PostSource, PostSourceError};

type TestResult<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

async fn temp_store(name: &str) -> TestResult<(TempDir, Arc<Store>)> {
    let dir = tempdir()?;
    let store = Store::open(
        StoreName::new(name).unwrap(),
        dir.path().join("index.sqlite"),
    )
    .await
    .boxed()?;
    Ok((dir, Arc::new(store)))
}

fn raw(n: &str, author: &str, created_at: &str, text: &str) -> RawPostRecord {
    RawPostRecord {
        uri: format!("at://did:plc:demo/app.bsky.feed.post/{n}"),
        cid: Some(format!("cid-{n}")),
        author_did: Some("did:plc:demo".to_owned()),
        author_handle: Some(author.to_owned()),
        record: json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": created_at,
        }),
        ..Default::default()
    }
}

/// A deterministic in-memory source; the cursor is a page index.
struct PagedSource {
    pages: Vec<Vec<RawPostRecord>>,
}

#[async_trait]
impl PostSource for PagedSource {
    async fn fetch_page(
        &self,
        _source: &DataSource,
        cursor: Option<String>,
        _limit: usize,
    ) -> Result<Page, PostSourceError> {
        let index: usize = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
        let records = self.pages.get(index).cloned().unwrap_or_default();
        let cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(Page { records, cursor })
    }
}

fn ai_filter() -> FilterExpr {
    FilterExpr::Hashtag {
        tag: Hashtag::new("#ai").unwrap(),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn sync_dedupes_on_resync() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let api = PagedSource {
        pages: vec![vec![raw(
            "1",
            "alice.bsky.social",
            "2026-01-01T00:10:00Z",
            "hello #ai",
        )]],
    };
    let opts = SyncOptions::default();
    let caps = Capabilities::none();

    let first = sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &caps,
        None,
        &NullReporter,
        &opts,
    )
    .await
    .boxed()?;
    let second = sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &caps,
        None,
        &NullReporter,
        &opts,
    )
    .await
    .boxed()?;

    let combined = first.combine(second);
    assert_eq!(combined.posts_added, 1);
    assert_eq!(combined.posts_skipped, 1);
    assert_eq!(store.event_count().await.boxed()?, 1);
    assert_eq!(store.post_count().await.boxed()?, 1);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn sync_applies_filter_and_queries_back() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let api = PagedSource {
        pages: vec![vec![
            raw("1", "alice.bsky.social", "2026-01-01T00:10:00Z", "on #ai"),
            raw("2", "bob.bsky.social", "2026-01-01T12:00:00Z", "on #tech"),
        ]],
    };
    let expr = ai_filter();
    let predicate = compile(&expr).unwrap();
    let hash = expr_hash(&expr);

    let result = sync_source(
        &store,
        &DataSource::Timeline,
        Some(&predicate),
        Some(&hash),
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;
    assert_eq!(result.posts_added, 1);

    let posts = store
        .query_posts(&QueryOpts::default(), None, 10)
        .await
        .boxed()?;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].author, Handle::new("alice.bsky.social").unwrap());
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn sync_checkpoint_lags_committed_tail() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let api = PagedSource {
        pages: vec![
            vec![raw("1", "alice.bsky.social", "2026-01-01T00:10:00Z", "a")],
            vec![raw("2", "alice.bsky.social", "2026-01-01T00:11:00Z", "b")],
        ],
    };

    sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;

    let checkpoint = store
        .load_sync_checkpoint(&DataSource::Timeline)
        .await
        .boxed()?
        .expect("checkpoint written");
    let tail = store.last_event_seq().await.boxed()?;
    assert_eq!(checkpoint.last_event_seq, tail);
    assert_eq!(checkpoint.cursor, None);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn strict_mode_aborts_without_advancing_checkpoint() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let mut bad = raw("1", "alice.bsky.social", "2026-01-01T00:10:00Z", "x");
    bad.record = json!({"text": "missing createdAt"});
    let api = PagedSource {
        pages: vec![vec![bad]],
    };

    let err = sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions {
            strict: true,
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Strict { .. }));

    assert!(
        store
            .load_sync_checkpoint(&DataSource::Timeline)
            .await
            .boxed()?
            .is_none()
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn default_mode_collects_item_errors_and_max_errors_aborts() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let mut bad = raw("1", "alice.bsky.social", "2026-01-01T00:10:00Z", "x");
    bad.record = json!({"text": "missing createdAt"});
    let good = raw("2", "alice.bsky.social", "2026-01-01T00:11:00Z", "ok");
    let api = PagedSource {
        pages: vec![vec![bad.clone(), good]],
    };

    let result = sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;
    assert_eq!(result.posts_added, 1);
    assert_eq!(result.errors_total, 1);
    assert_eq!(result.errors.len(), 1);

    let api = PagedSource {
        pages: vec![vec![bad]],
    };
    let err = sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions {
            max_errors: Some(0),
            mode: CommitMode::Refresh,
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::TooManyErrors { .. }));
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn filter_hash_change_forces_full_rescan() -> TestResult {
    let (_dir, store) = temp_store("demo").await?;
    let api = PagedSource {
        pages: vec![vec![raw(
            "1",
            "alice.bsky.social",
            "2026-01-01T00:10:00Z",
            "on #ai",
        )]],
    };
    let caps = Capabilities::none();

    let expr = ai_filter();
    let predicate = compile(&expr).unwrap();
    let hash = expr_hash(&expr);
    sync_source(
        &store,
        &DataSource::Timeline,
        Some(&predicate),
        Some(&hash),
        &api,
        &caps,
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;

    // Same source, different filter: the stored cursor is discarded and the
    // already-stored post shows up as a dedupe skip.
    let other = FilterExpr::All;
    let predicate = compile(&other).unwrap();
    let hash = expr_hash(&other);
    let result = sync_source(
        &store,
        &DataSource::Timeline,
        Some(&predicate),
        Some(&hash),
        &api,
        &caps,
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;
    assert_eq!(result.posts_skipped, 1);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn ndjson_source_pages_with_line_cursor() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("capture.ndjson");
    let lines: Vec<String> = (0..5)
        .map(|n| {
            serde_json::to_string(&raw(
                &n.to_string(),
                "alice.bsky.social",
                "2026-01-01T00:10:00Z",
                "x",
            ))
            .unwrap()
        })
        .collect();
    tokio::fs::write(&path, lines.join("\n")).await?;

    let source = NdjsonFileSource::new(&path);
    let page1 = source
        .fetch_page(&DataSource::Timeline, None, 2)
        .await
        .boxed()?;
    assert_eq!(page1.records.len(), 2);
    assert_eq!(page1.cursor.as_deref(), Some("2"));

    let page3 = source
        .fetch_page(&DataSource::Timeline, Some("4".to_owned()), 2)
        .await
        .boxed()?;
    assert_eq!(page3.records.len(), 1);
    assert_eq!(page3.cursor, None);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn derivation_materialises_matches_and_propagates_deletes() -> TestResult {
    let (_dir_a, source_store) = temp_store("source").await?;
    let (_dir_b, target_store) = temp_store("view").await?;

    // Seed the source through the sync engine so events carry real meta.
    let api = PagedSource {
        pages: vec![vec![
            raw("1", "alice.bsky.social", "2026-01-01T00:10:00Z", "on #ai"),
            raw("2", "bob.bsky.social", "2026-01-01T12:00:00Z", "on #tech"),
        ]],
    };
    sync_source(
        &source_store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;
    source_store
        .append_delete(skygent_core::PostDelete {
            uri: "at://did:plc:demo/app.bsky.feed.post/2".parse().unwrap(),
            cid: None,
        })
        .await
        .boxed()?;

    let expr = ai_filter();
    let predicate = compile(&expr).unwrap();
    let hash = expr_hash(&expr);

    let result = derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;

    assert_eq!(result.events_processed, 3);
    assert_eq!(result.events_matched, 1);
    assert_eq!(result.deletes_propagated, 1);

    let posts = target_store
        .query_posts(&QueryOpts::default(), None, 10)
        .await
        .boxed()?;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].hashtags.contains(&Hashtag::new("#ai").unwrap()));
    assert_eq!(
        posts[0].uri.as_str(),
        "at://did:plc:demo/app.bsky.feed.post/1"
    );

    // The derived event is stamped with its source store.
    let events = target_store
        .events_after(skygent_core::EventSeq::ZERO, 10)
        .await
        .boxed()?;
    let skygent_core::PostEvent::PostUpsert(upsert) = &events[0].record.event else {
        panic!("expected upsert");
    };
    assert_eq!(
        upsert.meta.source_store.as_ref().map(|s| s.as_str()),
        Some("source")
    );

    // Re-deriving is incremental: nothing new to process.
    let again = derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;
    assert_eq!(again.events_processed, result.events_processed);
    assert_eq!(target_store.event_count().await.boxed()?, 2);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn staleness_tracks_tail_and_filter_hash() -> TestResult {
    let (_dir_a, source_store) = temp_store("source").await?;
    let (_dir_b, target_store) = temp_store("view").await?;

    let api = PagedSource {
        pages: vec![vec![raw(
            "1",
            "alice.bsky.social",
            "2026-01-01T00:10:00Z",
            "on #ai",
        )]],
    };
    sync_source(
        &source_store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;

    let expr = ai_filter();
    let predicate = compile(&expr).unwrap();
    let hash = expr_hash(&expr);

    // No checkpoint yet: stale.
    assert!(
        is_stale(&source_store, &target_store, &hash, EvaluationMode::EventTime)
            .await
            .boxed()?
    );

    derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;
    assert!(
        !is_stale(&source_store, &target_store, &hash, EvaluationMode::EventTime)
            .await
            .boxed()?
    );

    // New source event: stale again.
    sync_source(
        &source_store,
        &DataSource::Timeline,
        None,
        None,
        &PagedSource {
            pages: vec![vec![raw(
                "9",
                "bob.bsky.social",
                "2026-01-02T00:00:00Z",
                "more",
            )]],
        },
        &Capabilities::none(),
        None,
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;
    assert!(
        is_stale(&source_store, &target_store, &hash, EvaluationMode::EventTime)
            .await
            .boxed()?
    );

    // Changed filter: stale even at the same tail, and the next derivation
    // rescans from seq 0.
    derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;
    let other = expr_hash(&FilterExpr::All);
    assert!(
        is_stale(&source_store, &target_store, &other, EvaluationMode::EventTime)
            .await
            .boxed()?
    );
    let rescan = derive(
        &source_store,
        &target_store,
        &compile(&FilterExpr::All).unwrap(),
        &other,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;
    assert_eq!(rescan.events_processed, 2);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn derive_time_runs_stamp_their_checkpoint_hash() -> TestResult {
    let (_dir_a, source_store) = temp_store("source").await?;
    let (_dir_b, target_store) = temp_store("view").await?;

    source_store
        .append_upsert(crate::tests::upsert_fixture())
        .await
        .boxed()?;

    let expr = FilterExpr::Trending {
        tag: Hashtag::new("#ai").unwrap(),
        on_error: skygent_filter::ErrorPolicy::Include,
    };
    let predicate = compile(&expr).unwrap();
    let hash = expr_hash(&expr);

    // EventTime refuses the effectful filter outright.
    let err = derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::EventTime,
        &Capabilities::none(),
        &DeriveOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        crate::derive::DerivationError::EventTimeIncompatible
    ));

    // DeriveTime with an always-trending capability matches everything.
    struct AlwaysTrending;
    #[async_trait]
    impl skygent_filter::TrendingTopics for AlwaysTrending {
        async fn is_trending(
            &self,
            _tag: &str,
        ) -> Result<bool, skygent_filter::CapabilityError> {
            Ok(true)
        }
    }
    let trending = AlwaysTrending;
    let caps = Capabilities {
        link_validator: None,
        trending: Some(&trending),
    };
    derive(
        &source_store,
        &target_store,
        &predicate,
        &hash,
        EvaluationMode::DeriveTime,
        &caps,
        &DeriveOptions::default(),
    )
    .await
    .boxed()?;

    let checkpoint = target_store
        .load_derivation_checkpoint(target_store.name(), source_store.name())
        .await
        .boxed()?
        .expect("checkpoint written");
    assert!(checkpoint.filter_hash.ends_with("@DeriveTime"));

    // An EventTime view of the same base filter cannot reuse it.
    assert!(
        is_stale(&source_store, &target_store, &hash, EvaluationMode::EventTime)
            .await
            .boxed()?
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn resolver_upgrades_placeholder_author_handles() -> TestResult {
    struct OneProfileApi;

    #[async_trait]
    impl crate::source::ProfileApi for OneProfileApi {
        async fn resolve_handle(
            &self,
            _handle: &Handle,
        ) -> Result<skygent_core::Did, PostSourceError> {
            unimplemented!("not used in this test")
        }

        async fn get_profiles(
            &self,
            dids: &[skygent_core::Did],
        ) -> Result<Vec<(skygent_core::Did, Handle)>, PostSourceError> {
            Ok(dids
                .iter()
                .map(|did| (did.clone(), Handle::new("alice.bsky.social").unwrap()))
                .collect())
        }

        async fn get_trending_topics(&self) -> Result<Vec<String>, PostSourceError> {
            unimplemented!("not used in this test")
        }
    }

    let (_dir, store) = temp_store("demo").await?;
    // No handle in the raw record: the parser falls back to the DID.
    let mut record = raw("1", "ignored", "2026-01-01T00:10:00Z", "hi");
    record.author_handle = None;
    let api = PagedSource {
        pages: vec![vec![record]],
    };
    let resolver = crate::profiles::ProfileResolver::new(Arc::new(OneProfileApi));

    sync_source(
        &store,
        &DataSource::Timeline,
        None,
        None,
        &api,
        &Capabilities::none(),
        Some(&resolver),
        &NullReporter,
        &SyncOptions::default(),
    )
    .await
    .boxed()?;

    let posts = store
        .query_posts(&QueryOpts::default(), None, 10)
        .await
        .boxed()?;
    assert_eq!(posts[0].author, Handle::new("alice.bsky.social").unwrap());
    assert_eq!(
        posts[0].author_did.as_ref().map(|d| d.as_str()),
        Some("did:plc:demo")
    );
    Ok(())
}

pub(crate) fn upsert_fixture() -> skygent_core::PostUpsert {
    let mut post = skygent_core::Post::builder()
        .uri("at://did:plc:demo/app.bsky.feed.post/1".parse().unwrap())
        .author(Handle::new("alice.bsky.social").unwrap())
        .text("hello #ai".to_owned())
        .created_at("2026-01-01T00:10:00Z".parse().unwrap())
        .build();
    post.hashtags.insert(Hashtag::new("#ai").unwrap());
    skygent_core::PostUpsert {
        post,
        meta: skygent_core::EventMeta {
            source: skygent_core::EventSource::Timeline,
            command: "test".to_owned(),
            filter_expr_hash: None,
            created_at: "2026-01-01T00:10:00Z".parse().unwrap(),
            source_store: None,
        },
    }
}
