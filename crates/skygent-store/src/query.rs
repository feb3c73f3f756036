//! Single-store queries.
//!
//! A query is a SQL scan of `posts` constrained by the date range and by
//! whatever top-level filter conjuncts translate to SQL; the full predicate
//! is then re-evaluated in memory over the decoded rows, so pushdown is
//! purely an optimisation and can stay conservative. Query filters must be
//! pure; effectful leaves are rejected up front.

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use skygent_core::{Post, PostUri, Timestamp};
use skygent_filter::Predicate;
use snafu::ResultExt as _;

use crate::{DatabaseSnafu, EffectfulQueryFilterSnafu, Store, StoreResult, index_ops};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    /// Upper bound on rows scanned per call, filter hits or not.
    pub scan_limit: Option<usize>,
    pub order: SortOrder,
}

/// Keyset cursor over `(created_at, uri)`; the scan resumes strictly past
/// it in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCursor {
    pub created_at: Timestamp,
    pub uri: PostUri,
}

#[derive(Debug)]
pub(crate) struct ScanPage {
    pub posts: Vec<Post>,
    /// Position after the last scanned row; `None` when the scan is done.
    pub next: Option<PostCursor>,
}

fn first_effectful(predicate: &Predicate) -> Option<&'static str> {
    match predicate {
        Predicate::HasValidLinks { .. } => Some("link-validator"),
        Predicate::Trending { .. } => Some("trending-topics"),
        Predicate::Not(inner) => first_effectful(inner),
        Predicate::And(l, r) | Predicate::Or(l, r) => {
            first_effectful(l).or_else(|| first_effectful(r))
        }
        _ => None,
    }
}

/// Conjuncts reachable through `And` alone; anything under `Or`/`Not` stays
/// residual-only.
fn collect_conjuncts<'p>(predicate: &'p Predicate, out: &mut Vec<&'p Predicate>) {
    match predicate {
        Predicate::And(l, r) => {
            collect_conjuncts(l, out);
            collect_conjuncts(r, out);
        }
        other => out.push(other),
    }
}

fn push_clause(
    predicate: &Predicate,
    clauses: &mut Vec<String>,
    params: &mut Vec<SqlValue>,
) {
    fn placeholders(n: usize) -> String {
        itertools::Itertools::intersperse(std::iter::repeat_n("?", n), ", ").collect()
    }

    match predicate {
        Predicate::Author(handle) => {
            clauses.push("author = ?".to_owned());
            params.push(SqlValue::Text(handle.as_str().to_owned()));
        }
        Predicate::AuthorIn(handles) => {
            clauses.push(format!("author IN ({})", placeholders(handles.len())));
            params.extend(
                handles
                    .iter()
                    .map(|h| SqlValue::Text(h.as_str().to_owned())),
            );
        }
        Predicate::Hashtag(tag) => {
            clauses.push(
                "EXISTS (SELECT 1 FROM post_hashtag WHERE post_hashtag.uri = posts.uri AND tag = ?)"
                    .to_owned(),
            );
            params.push(SqlValue::Text(tag.as_str().to_owned()));
        }
        Predicate::HashtagIn(tags) => {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM post_hashtag WHERE post_hashtag.uri = posts.uri AND tag IN ({}))",
                placeholders(tags.len())
            ));
            params.extend(tags.iter().map(|t| SqlValue::Text(t.as_str().to_owned())));
        }
        Predicate::Language(langs) => {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM post_lang WHERE post_lang.uri = posts.uri AND lang IN ({}))",
                placeholders(langs.len())
            ));
            params.extend(langs.iter().map(|l| SqlValue::Text(l.clone())));
        }
        Predicate::IsReply => clauses.push("is_reply = 1".to_owned()),
        Predicate::IsQuote => clauses.push("is_quote = 1".to_owned()),
        Predicate::IsRepost => clauses.push("is_repost = 1".to_owned()),
        Predicate::IsOriginal => clauses.push("is_original = 1".to_owned()),
        Predicate::HasImages => clauses.push("has_images = 1".to_owned()),
        Predicate::HasVideo => clauses.push("has_video = 1".to_owned()),
        Predicate::HasLinks => clauses.push("has_links = 1".to_owned()),
        Predicate::HasMedia => clauses.push("has_media = 1".to_owned()),
        Predicate::HasEmbed => clauses.push("has_embed = 1".to_owned()),
        Predicate::HasAltText => clauses.push("has_alt_text = 1".to_owned()),
        Predicate::NoAltText => {
            clauses.push("has_images = 1 AND has_alt_text = 0".to_owned())
        }
        Predicate::MinImages(n) => {
            clauses.push("image_count >= ?".to_owned());
            params.push(SqlValue::Integer(i64::from(*n)));
        }
        Predicate::DateRange { start, end } => {
            clauses.push("created_at >= ? AND created_at <= ?".to_owned());
            params.push(SqlValue::Integer(start.unix_micros()));
            params.push(SqlValue::Integer(end.unix_micros()));
        }
        Predicate::Engagement {
            min_likes,
            min_reposts,
            min_replies,
            min_quotes,
        } => {
            for (column, min) in [
                ("like_count", min_likes),
                ("repost_count", min_reposts),
                ("reply_count", min_replies),
                ("quote_count", min_quotes),
            ] {
                if let Some(min) = min {
                    clauses.push(format!("{column} >= ?"));
                    params.push(SqlValue::Integer(*min as i64));
                }
            }
        }
        // Everything else (text contains, regexes, nested Or/Not trees)
        // stays residual-only.
        _ => {}
    }
}

impl Store {
    pub(crate) async fn scan_page(
        &self,
        opts: &QueryOpts,
        filter: Option<&Predicate>,
        cursor: Option<&PostCursor>,
        limit: usize,
    ) -> StoreResult<ScanPage> {
        if let Some(filter) = filter {
            if let Some(capability) = first_effectful(filter) {
                return EffectfulQueryFilterSnafu { capability }.fail();
            }
        }

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(since) = opts.since {
            clauses.push("created_at >= ?".to_owned());
            params.push(SqlValue::Integer(since.unix_micros()));
        }
        if let Some(until) = opts.until {
            clauses.push("created_at <= ?".to_owned());
            params.push(SqlValue::Integer(until.unix_micros()));
        }
        if let Some(filter) = filter {
            let mut conjuncts = Vec::new();
            collect_conjuncts(filter, &mut conjuncts);
            for conjunct in conjuncts {
                push_clause(conjunct, &mut clauses, &mut params);
            }
        }
        if let Some(cursor) = cursor {
            let cmp = match opts.order {
                SortOrder::Asc => ">",
                SortOrder::Desc => "<",
            };
            clauses.push(format!("(created_at, uri) {cmp} (?, ?)"));
            params.push(SqlValue::Integer(cursor.created_at.unix_micros()));
            params.push(SqlValue::Text(cursor.uri.as_str().to_owned()));
        }

        let direction = match opts.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let scan_cap = opts
            .scan_limit
            .unwrap_or(usize::MAX)
            .min(limit.max(1).saturating_mul(16))
            .min(i64::MAX as usize);
        let sql = format!(
            "SELECT post_json, created_at, uri FROM posts {where_clause}
             ORDER BY created_at {direction}, uri {direction}
             LIMIT {scan_cap}"
        );

        let scanned = self
            .read_with(move |conn| {
                let mut stmt = conn.prepare_cached(&sql).context(DatabaseSnafu)?;
                let mut rows = stmt
                    .query(params_from_iter(params))
                    .context(DatabaseSnafu)?;

                let mut posts = Vec::new();
                let mut next = None;
                let mut scanned = 0usize;
                let mut residual_err = None;
                while let Some(row) = rows.next().context(DatabaseSnafu)? {
                    scanned += 1;
                    let json: String = row.get(0).context(DatabaseSnafu)?;
                    let created_at: i64 = row.get(1).context(DatabaseSnafu)?;
                    let uri: String = row.get(2).context(DatabaseSnafu)?;
                    let post = index_ops::load_post_tx(conn, &json)?;

                    let matched = match filter {
                        Some(filter) => match filter.evaluate_pure(&post) {
                            Ok(m) => m,
                            Err(e) => {
                                residual_err = Some(e);
                                break;
                            }
                        },
                        None => true,
                    };
                    if matched {
                        posts.push(post);
                    }

                    if let Ok(uri) = uri.parse() {
                        next = Some(PostCursor {
                            created_at: Timestamp::from_unix_micros(created_at),
                            uri,
                        });
                    }
                    if limit <= posts.len() {
                        break;
                    }
                }

                // A short scan means the table (under these clauses) is
                // exhausted; no further page will produce anything.
                if scanned < scan_cap && posts.len() < limit && residual_err.is_none() {
                    next = None;
                }

                Ok((ScanPage { posts, next }, residual_err))
            })
            .await?;

        let (page, residual_err) = scanned;
        if let Some(err) = residual_err {
            // Purity was checked up front, so this only fires if the filter
            // grew a new effectful leaf kind unknown to `first_effectful`.
            return EffectfulQueryFilterSnafu {
                capability: match err {
                    skygent_filter::FilterEvalError::EffectfulLeaf { capability }
                    | skygent_filter::FilterEvalError::CapabilityUnavailable { capability } => {
                        capability
                    }
                },
            }
            .fail();
        }
        Ok(page)
    }

    /// Full-text search over `(text, alt_text)` using FTS5 `MATCH` syntax,
    /// newest first. Matching is token-based, unlike the `Contains` filter
    /// leaf's substring semantics.
    pub async fn search_posts(
        &self,
        match_query: &str,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        let match_query = match_query.to_owned();
        self.read_with(move |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT posts.post_json FROM posts_fts
                     JOIN posts ON posts.rowid = posts_fts.rowid
                     WHERE posts_fts MATCH ?1
                     ORDER BY posts.created_at DESC, posts.uri DESC
                     LIMIT ?2",
                )
                .context(DatabaseSnafu)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![match_query, limit as i64],
                    |row| row.get::<_, String>(0),
                )
                .context(DatabaseSnafu)?;

            let mut posts = Vec::new();
            for row in rows {
                let json = row.context(DatabaseSnafu)?;
                posts.push(index_ops::load_post_tx(conn, &json)?);
            }
            Ok(posts)
        })
        .await
    }

    /// Fetch up to `limit` matching posts in query order.
    pub async fn query_posts(
        &self,
        opts: &QueryOpts,
        filter: Option<&Predicate>,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        let mut out = Vec::new();
        let mut cursor: Option<PostCursor> = None;
        while out.len() < limit {
            let page = self
                .scan_page(opts, filter, cursor.as_ref(), limit - out.len())
                .await?;
            out.extend(page.posts);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(out)
    }
}
