//! Forward-only schema migrations.
//!
//! Each migration is a SQL batch applied once, in order, inside the open
//! transaction; applied versions are recorded in the `migrations` table.
//! Opening a database whose recorded version exceeds the newest migration
//! known to this build fails instead of guessing.

use rusqlite::Transaction;
use snafu::ResultExt as _;

use crate::{DatabaseSnafu, DbVersionTooHighSnafu, StoreResult};

pub(crate) const MIGRATIONS: &[(u32, &str)] = &[(1, V1_SQL)];

const V1_SQL: &str = r#"
CREATE TABLE posts (
    uri TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    author TEXT NOT NULL,
    post_json TEXT NOT NULL,
    text TEXT NOT NULL,
    lang TEXT,
    is_reply INTEGER NOT NULL DEFAULT 0,
    is_quote INTEGER NOT NULL DEFAULT 0,
    is_repost INTEGER NOT NULL DEFAULT 0,
    is_original INTEGER NOT NULL DEFAULT 0,
    has_links INTEGER NOT NULL DEFAULT 0,
    has_media INTEGER NOT NULL DEFAULT 0,
    has_images INTEGER NOT NULL DEFAULT 0,
    has_video INTEGER NOT NULL DEFAULT 0,
    has_embed INTEGER NOT NULL DEFAULT 0,
    image_count INTEGER NOT NULL DEFAULT 0,
    alt_text TEXT,
    has_alt_text INTEGER NOT NULL DEFAULT 0,
    like_count INTEGER NOT NULL DEFAULT 0,
    repost_count INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    quote_count INTEGER NOT NULL DEFAULT 0,
    reply_parent_uri TEXT,
    reply_root_uri TEXT
);

CREATE INDEX idx_posts_author_created ON posts(author, created_at);
CREATE INDEX idx_posts_created_uri ON posts(created_at, uri);
CREATE INDEX idx_posts_created_date ON posts(created_date);
CREATE INDEX idx_posts_like_count ON posts(like_count);
CREATE INDEX idx_posts_is_reply ON posts(is_reply) WHERE is_reply = 1;
CREATE INDEX idx_posts_is_quote ON posts(is_quote) WHERE is_quote = 1;
CREATE INDEX idx_posts_is_repost ON posts(is_repost) WHERE is_repost = 1;
CREATE INDEX idx_posts_has_images ON posts(has_images) WHERE has_images = 1;
CREATE INDEX idx_posts_has_video ON posts(has_video) WHERE has_video = 1;
CREATE INDEX idx_posts_has_links ON posts(has_links) WHERE has_links = 1;
CREATE INDEX idx_posts_has_media ON posts(has_media) WHERE has_media = 1;

CREATE TABLE post_hashtag (
    uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (uri, tag)
);
CREATE INDEX idx_post_hashtag_tag ON post_hashtag(tag, uri);

CREATE TABLE post_lang (
    uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    lang TEXT NOT NULL,
    PRIMARY KEY (uri, lang)
);
CREATE INDEX idx_post_lang_lang ON post_lang(lang, uri);

CREATE VIRTUAL TABLE posts_fts USING fts5(
    text,
    alt_text,
    content='posts',
    content_rowid='rowid'
);

CREATE TRIGGER posts_fts_insert AFTER INSERT ON posts BEGIN
    INSERT INTO posts_fts(rowid, text, alt_text)
    VALUES (new.rowid, new.text, new.alt_text);
END;

CREATE TRIGGER posts_fts_delete AFTER DELETE ON posts BEGIN
    INSERT INTO posts_fts(posts_fts, rowid, text, alt_text)
    VALUES ('delete', old.rowid, old.text, old.alt_text);
END;

CREATE TRIGGER posts_fts_update AFTER UPDATE ON posts BEGIN
    INSERT INTO posts_fts(posts_fts, rowid, text, alt_text)
    VALUES ('delete', old.rowid, old.text, old.alt_text);
    INSERT INTO posts_fts(rowid, text, alt_text)
    VALUES (new.rowid, new.text, new.alt_text);
END;

CREATE TABLE event_log (
    event_seq INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL UNIQUE,
    event_type TEXT NOT NULL,
    post_uri TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    source TEXT
);
CREATE INDEX idx_event_log_post_uri ON event_log(post_uri, event_seq);

CREATE TABLE index_checkpoints (
    index_name TEXT PRIMARY KEY NOT NULL,
    version INTEGER NOT NULL,
    last_event_seq INTEGER NOT NULL,
    event_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE sync_checkpoints (
    source_key TEXT PRIMARY KEY NOT NULL,
    source_json TEXT NOT NULL,
    cursor TEXT,
    last_event_seq INTEGER,
    last_event_id TEXT,
    filter_hash TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE derivation_checkpoints (
    view_name TEXT NOT NULL,
    source_store TEXT NOT NULL,
    target_store TEXT NOT NULL,
    filter_hash TEXT NOT NULL,
    evaluation_mode TEXT NOT NULL,
    last_source_event_seq INTEGER NOT NULL,
    events_processed INTEGER NOT NULL DEFAULT 0,
    events_matched INTEGER NOT NULL DEFAULT 0,
    deletes_propagated INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (view_name, source_store)
);

CREATE TABLE store_sources (
    source_id TEXT PRIMARY KEY NOT NULL,
    source_json TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    added_at INTEGER NOT NULL,
    last_synced_at INTEGER
);

CREATE TABLE store_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub(crate) fn run_migrations_tx(tx: &Transaction) -> StoreResult<()> {
    tx.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .context(DatabaseSnafu)?;

    let current: u32 = tx
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .context(DatabaseSnafu)?;

    let latest = MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0);
    if latest < current {
        return DbVersionTooHighSnafu {
            db_version: current,
            code_version: latest,
        }
        .fail();
    }

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| current < *v) {
        tx.execute_batch(sql).context(DatabaseSnafu)?;
        tx.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![
                version,
                skygent_core::Timestamp::now().unix_micros()
            ],
        )
        .context(DatabaseSnafu)?;
    }

    Ok(())
}
