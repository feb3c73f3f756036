//! Projection of events into the queryable `posts` tables.
//!
//! The projection is idempotent by sequence number: every mutation goes
//! through [`apply_event_tx`], which consults the `posts` index checkpoint
//! and ignores events at or below it. Replay therefore can't double-apply.

use rusqlite::{Connection, params};
use skygent_core::{EventLogEntry, Post, PostEvent, PostUri, Timestamp};
use snafu::ResultExt as _;

use crate::checkpoint_ops::{self, IndexCheckpoint};
use crate::{DatabaseSnafu, DecodeSnafu, StoreResult};

/// Name of the posts projection in `index_checkpoints`.
pub(crate) const POSTS_INDEX: &str = "posts";
pub(crate) const POSTS_INDEX_VERSION: u32 = 1;

pub(crate) fn post_row_exists_tx(conn: &Connection, uri: &PostUri) -> StoreResult<bool> {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE uri = ?1)",
            [uri.as_str()],
            |row| row.get(0),
        )
        .context(DatabaseSnafu)?;
    Ok(exists != 0)
}

pub(crate) fn post_count_tx(conn: &Connection) -> StoreResult<u64> {
    conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
        .context(DatabaseSnafu)
}

/// Write the denormalised row for `post`, replacing any previous row.
pub(crate) fn upsert_post_row_tx(conn: &Connection, post: &Post) -> StoreResult<()> {
    let post_json = serde_json::to_string(post).context(DecodeSnafu)?;
    let metrics = post.metrics_or_zero();
    let lang = post
        .langs
        .as_deref()
        .and_then(|langs| langs.first())
        .map(|l| l.to_lowercase());

    conn.execute(
        "INSERT INTO posts (
            uri, created_at, created_date, author, post_json, text, lang,
            is_reply, is_quote, is_repost, is_original,
            has_links, has_media, has_images, has_video, has_embed,
            image_count, alt_text, has_alt_text,
            like_count, repost_count, reply_count, quote_count,
            reply_parent_uri, reply_root_uri
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19,
            ?20, ?21, ?22, ?23,
            ?24, ?25
        )
        ON CONFLICT(uri) DO UPDATE SET
            created_at = excluded.created_at,
            created_date = excluded.created_date,
            author = excluded.author,
            post_json = excluded.post_json,
            text = excluded.text,
            lang = excluded.lang,
            is_reply = excluded.is_reply,
            is_quote = excluded.is_quote,
            is_repost = excluded.is_repost,
            is_original = excluded.is_original,
            has_links = excluded.has_links,
            has_media = excluded.has_media,
            has_images = excluded.has_images,
            has_video = excluded.has_video,
            has_embed = excluded.has_embed,
            image_count = excluded.image_count,
            alt_text = excluded.alt_text,
            has_alt_text = excluded.has_alt_text,
            like_count = excluded.like_count,
            repost_count = excluded.repost_count,
            reply_count = excluded.reply_count,
            quote_count = excluded.quote_count,
            reply_parent_uri = excluded.reply_parent_uri,
            reply_root_uri = excluded.reply_root_uri",
        params![
            post.uri.as_str(),
            post.created_at.unix_micros(),
            post.created_at.day_bucket(),
            post.author.as_str(),
            post_json,
            post.text,
            lang,
            post.is_reply(),
            post.is_quote(),
            post.is_repost(),
            post.is_original(),
            post.has_links(),
            post.has_media(),
            post.has_images(),
            post.has_video(),
            post.has_embed(),
            post.image_count() as i64,
            post.alt_text_combined(),
            post.has_alt_text(),
            metrics.like_count,
            metrics.repost_count,
            metrics.reply_count,
            metrics.quote_count,
            post.reply.as_ref().map(|r| r.parent.as_str()),
            post.reply.as_ref().map(|r| r.root.as_str()),
        ],
    )
    .context(DatabaseSnafu)?;

    replace_ancillary_rows_tx(conn, post)
}

fn replace_ancillary_rows_tx(conn: &Connection, post: &Post) -> StoreResult<()> {
    conn.execute("DELETE FROM post_hashtag WHERE uri = ?1", [post.uri.as_str()])
        .context(DatabaseSnafu)?;
    for tag in &post.hashtags {
        conn.execute(
            "INSERT OR IGNORE INTO post_hashtag (uri, tag) VALUES (?1, ?2)",
            params![post.uri.as_str(), tag.as_str()],
        )
        .context(DatabaseSnafu)?;
    }

    conn.execute("DELETE FROM post_lang WHERE uri = ?1", [post.uri.as_str()])
        .context(DatabaseSnafu)?;
    for lang in post.langs.as_deref().unwrap_or_default() {
        conn.execute(
            "INSERT OR IGNORE INTO post_lang (uri, lang) VALUES (?1, ?2)",
            params![post.uri.as_str(), lang.to_lowercase()],
        )
        .context(DatabaseSnafu)?;
    }
    Ok(())
}

pub(crate) fn delete_post_row_tx(conn: &Connection, uri: &PostUri) -> StoreResult<()> {
    // Ancillary rows cascade; the FTS triggers clean up the text index.
    conn.execute("DELETE FROM posts WHERE uri = ?1", [uri.as_str()])
        .context(DatabaseSnafu)?;
    Ok(())
}

/// Apply one log entry to the projection, idempotently by seq.
pub(crate) fn apply_event_tx(
    conn: &Connection,
    entry: &EventLogEntry,
    now: Timestamp,
) -> StoreResult<bool> {
    let checkpoint = checkpoint_ops::load_index_checkpoint_tx(conn, POSTS_INDEX)?;
    if let Some(checkpoint) = &checkpoint {
        if entry.seq <= checkpoint.last_event_seq {
            return Ok(false);
        }
    }

    match &entry.record.event {
        PostEvent::PostUpsert(upsert) => upsert_post_row_tx(conn, &upsert.post)?,
        PostEvent::PostDelete(delete) => delete_post_row_tx(conn, &delete.uri)?,
    }

    let event_count = checkpoint.map(|c| c.event_count).unwrap_or(0) + 1;
    checkpoint_ops::save_index_checkpoint_tx(
        conn,
        &IndexCheckpoint {
            index_name: POSTS_INDEX.to_owned(),
            version: POSTS_INDEX_VERSION,
            last_event_seq: entry.seq,
            event_count,
            updated_at: now,
        },
    )?;
    Ok(true)
}

/// Reset the projection so a replay from seq 0 starts from scratch.
pub(crate) fn clear_index_tx(conn: &Connection) -> StoreResult<()> {
    conn.execute("DELETE FROM posts", [])
        .context(DatabaseSnafu)?;
    checkpoint_ops::delete_index_checkpoint_tx(conn, POSTS_INDEX)?;
    Ok(())
}

pub(crate) fn load_post_tx(conn: &Connection, json: &str) -> StoreResult<Post> {
    serde_json::from_str(json).context(DecodeSnafu)
}
