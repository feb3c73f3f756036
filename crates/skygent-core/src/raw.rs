//! Decoding raw API records into [`Post`]s.
//!
//! A [`RawPostRecord`] is what a remote source hands over: the lexicon
//! record JSON plus whatever the surrounding view knew (handle, metrics,
//! repost reason). Parsing normalises all of it into the [`Post`] model and
//! extracts hashtags, mentions and links from both the rich-text facets and
//! the plain text.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use url::Url;

use crate::id::{Did, Handle, Hashtag, IdParseError, PostUri};
use crate::post::{Embed, Facet, FacetFeature, ImageEmbed, Post, PostMetrics, ReplyRef};
use crate::time::{Timestamp, TimestampParseError};

#[derive(Debug, Snafu)]
pub enum RawPostError {
    #[snafu(display("Record is missing `{field}`"))]
    MissingField { field: &'static str },
    #[snafu(display("Invalid post uri"))]
    InvalidUri { source: IdParseError },
    #[snafu(display("Invalid author"))]
    InvalidAuthor { source: IdParseError },
    #[snafu(display("Invalid createdAt"))]
    InvalidCreatedAt { source: TimestampParseError },
}

/// A post as fetched from the remote API, before normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPostRecord {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub author_did: Option<String>,
    #[serde(default)]
    pub author_handle: Option<String>,
    /// The `app.bsky.feed.post` lexicon record.
    pub record: Value,
    #[serde(default)]
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub quote_count: Option<u64>,
    /// Set when the surrounding feed view marked this as a repost.
    #[serde(default)]
    pub repost_of: Option<String>,
}

pub fn parse_post(raw: &RawPostRecord) -> Result<Post, RawPostError> {
    let uri = PostUri::new(&raw.uri).context(InvalidUriSnafu)?;

    let author_did = raw
        .author_did
        .as_deref()
        .map(Did::new)
        .transpose()
        .context(InvalidAuthorSnafu)?;
    let author = match raw.author_handle.as_deref() {
        Some(handle) => Handle::new(handle).context(InvalidAuthorSnafu)?,
        // A handle may be unresolved at ingest time; the DID string is a
        // valid (if ugly) handle placeholder until a resolver fills it in.
        None => Handle::new(raw.author_did.as_deref().context(MissingFieldSnafu {
            field: "authorHandle/authorDid",
        })?)
        .context(InvalidAuthorSnafu)?,
    };

    let text = raw
        .record
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let created_at_str = raw
        .record
        .get("createdAt")
        .and_then(Value::as_str)
        .context(MissingFieldSnafu { field: "createdAt" })?;
    let created_at = Timestamp::parse_rfc3339(created_at_str).context(InvalidCreatedAtSnafu)?;

    let facets = parse_facets(raw.record.get("facets"));
    let embed = raw.record.get("embed").map(parse_embed);
    let reply = parse_reply(raw.record.get("reply"));
    let langs = raw.record.get("langs").and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect::<Vec<_>>()
    });

    let mut hashtags = BTreeSet::new();
    let mut mentions = BTreeSet::new();
    let mut links = BTreeSet::new();
    extract_from_facets(&text, facets.as_deref().unwrap_or(&[]), &mut hashtags, &mut mentions, &mut links);
    extract_from_text(&text, &mut hashtags, &mut mentions, &mut links);
    if let Some(Embed::External { uri, .. }) = &embed {
        links.insert(uri.clone());
    }

    let metrics = (raw.like_count.is_some()
        || raw.repost_count.is_some()
        || raw.reply_count.is_some()
        || raw.quote_count.is_some())
    .then(|| PostMetrics {
        like_count: raw.like_count.unwrap_or(0),
        repost_count: raw.repost_count.unwrap_or(0),
        reply_count: raw.reply_count.unwrap_or(0),
        quote_count: raw.quote_count.unwrap_or(0),
    });

    let indexed_at = raw
        .indexed_at
        .as_deref()
        .and_then(|s| Timestamp::parse_rfc3339(s).ok());

    let repost_of = raw
        .repost_of
        .as_deref()
        .map(PostUri::new)
        .transpose()
        .context(InvalidUriSnafu)?;

    Ok(Post {
        uri,
        cid: raw.cid.clone(),
        author,
        author_did,
        text,
        created_at,
        hashtags,
        mentions,
        links,
        facets,
        reply,
        embed,
        repost_of,
        langs,
        metrics,
        indexed_at,
    })
}

/// Facets decode leniently: a facet containing an unknown feature type is
/// dropped rather than failing the whole post.
fn parse_facets(value: Option<&Value>) -> Option<Vec<Facet>> {
    let array = value?.as_array()?;
    let facets: Vec<Facet> = array
        .iter()
        .filter_map(|f| serde_json::from_value(f.clone()).ok())
        .collect();
    (!facets.is_empty()).then_some(facets)
}

fn parse_reply(value: Option<&Value>) -> Option<ReplyRef> {
    let value = value?;
    let parent = value.get("parent")?.get("uri")?.as_str()?;
    let root = value
        .get("root")
        .and_then(|r| r.get("uri"))
        .and_then(Value::as_str)
        .unwrap_or(parent);
    Some(ReplyRef {
        parent: PostUri::new(parent).ok()?,
        root: PostUri::new(root).ok()?,
    })
}

fn parse_embed(value: &Value) -> Embed {
    let kind = value
        .get("$type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    // `#view` suffixes appear when the record came through a hydrated view.
    match kind.trim_end_matches("#view") {
        "app.bsky.embed.images" => Embed::Images {
            images: value
                .get("images")
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .map(|img| ImageEmbed {
                            alt: img
                                .get("alt")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_owned(),
                            fullsize: img
                                .get("fullsize")
                                .and_then(Value::as_str)
                                .and_then(|s| Url::parse(s).ok()),
                            thumb: img
                                .get("thumb")
                                .and_then(Value::as_str)
                                .and_then(|s| Url::parse(s).ok()),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        },
        "app.bsky.embed.external" => {
            let external = value.get("external").unwrap_or(&Value::Null);
            match external
                .get("uri")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok())
            {
                Some(uri) => Embed::External {
                    uri,
                    title: external
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    description: external
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                },
                None => Embed::Unknown {
                    kind: kind.to_owned(),
                },
            }
        }
        "app.bsky.embed.video" => Embed::Video {
            alt: value
                .get("alt")
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        "app.bsky.embed.record" => {
            match value
                .get("record")
                .and_then(|r| r.get("uri"))
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
            {
                Some(record) => Embed::Record { record },
                None => Embed::Unknown {
                    kind: kind.to_owned(),
                },
            }
        }
        "app.bsky.embed.recordWithMedia" => {
            let record = value
                .get("record")
                .and_then(|r| r.get("record"))
                .and_then(|r| r.get("uri"))
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok());
            match record {
                Some(record) => Embed::RecordWithMedia {
                    record,
                    media: Box::new(
                        value
                            .get("media")
                            .map(parse_embed)
                            .unwrap_or(Embed::Unknown {
                                kind: String::new(),
                            }),
                    ),
                },
                None => Embed::Unknown {
                    kind: kind.to_owned(),
                },
            }
        }
        _ => Embed::Unknown {
            kind: kind.to_owned(),
        },
    }
}

fn extract_from_facets(
    text: &str,
    facets: &[Facet],
    hashtags: &mut BTreeSet<Hashtag>,
    mentions: &mut BTreeSet<Handle>,
    links: &mut BTreeSet<Url>,
) {
    for facet in facets {
        for feature in &facet.features {
            match feature {
                FacetFeature::Tag { tag } => {
                    if let Ok(tag) = Hashtag::new(tag) {
                        hashtags.insert(tag);
                    }
                }
                FacetFeature::Link { uri } => {
                    if let Ok(url) = Url::parse(uri) {
                        links.insert(url);
                    }
                }
                FacetFeature::Mention { .. } => {
                    // The facet carries the DID; the human-readable handle is
                    // the text the facet covers.
                    let covered = text
                        .get(facet.index.byte_start..facet.index.byte_end)
                        .unwrap_or_default();
                    if let Ok(handle) = Handle::new(covered.trim_start_matches('@')) {
                        mentions.insert(handle);
                    }
                }
            }
        }
    }
}

/// Plain-text scan for `#tags`, `@mentions` and `http(s)://` links that the
/// author's client never turned into facets.
fn extract_from_text(
    text: &str,
    hashtags: &mut BTreeSet<Hashtag>,
    mentions: &mut BTreeSet<Handle>,
    links: &mut BTreeSet<Url>,
) {
    for token in text.split_whitespace() {
        if let Some(tag) = token.strip_prefix('#') {
            let tag: String = tag
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if let Ok(tag) = Hashtag::new(&tag) {
                hashtags.insert(tag);
            }
        } else if let Some(mention) = token.strip_prefix('@') {
            let mention: String = mention
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '.' || *c == '-')
                .collect();
            let mention = mention.trim_end_matches('.');
            // A bare `@word` is not a mention; handles are dotted host names.
            if mention.contains('.') {
                if let Ok(handle) = Handle::new(mention) {
                    mentions.insert(handle);
                }
            }
        } else if token.starts_with("http://") || token.starts_with("https://") {
            let trimmed = token.trim_end_matches(['.', ',', ';', ':', ')', '!', '?']);
            if let Ok(url) = Url::parse(trimmed) {
                links.insert(url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(record: Value) -> RawPostRecord {
        RawPostRecord {
            uri: "at://did:plc:abc/app.bsky.feed.post/1".to_owned(),
            cid: Some("bafy123".to_owned()),
            author_did: Some("did:plc:abc".to_owned()),
            author_handle: Some("alice.bsky.social".to_owned()),
            record,
            ..Default::default()
        }
    }

    #[test]
    fn parses_text_created_at_and_langs() {
        let post = parse_post(&raw(json!({
            "$type": "app.bsky.feed.post",
            "text": "hello world",
            "createdAt": "2026-01-01T00:10:00Z",
            "langs": ["en", "pl"],
        })))
        .unwrap();

        assert_eq!(post.text, "hello world");
        assert_eq!(post.created_at.to_rfc3339(), "2026-01-01T00:10:00Z");
        assert_eq!(post.langs.as_deref(), Some(&["en".to_owned(), "pl".to_owned()][..]));
        assert!(post.is_original());
    }

    #[test]
    fn missing_created_at_is_an_error() {
        assert!(parse_post(&raw(json!({"text": "no timestamp"}))).is_err());
    }

    #[test]
    fn extracts_tags_mentions_links_from_text() {
        let post = parse_post(&raw(json!({
            "text": "talking #ai with @bob.bsky.social, see https://example.com/x.",
            "createdAt": "2026-01-01T00:10:00Z",
        })))
        .unwrap();

        assert!(post.hashtags.contains(&Hashtag::new("#ai").unwrap()));
        assert!(post.mentions.contains(&Handle::new("bob.bsky.social").unwrap()));
        assert!(post.links.contains(&Url::parse("https://example.com/x").unwrap()));
    }

    #[test]
    fn facet_extraction_dedupes_against_text_scan() {
        let text = "check #rust";
        let post = parse_post(&raw(json!({
            "text": text,
            "createdAt": "2026-01-01T00:10:00Z",
            "facets": [{
                "index": {"byteStart": 6, "byteEnd": 11},
                "features": [{"$type": "app.bsky.richtext.facet#tag", "tag": "rust"}],
            }],
        })))
        .unwrap();

        assert_eq!(post.hashtags.len(), 1);
        assert!(post.hashtags.contains(&Hashtag::new("#rust").unwrap()));
    }

    #[test]
    fn mention_facet_resolves_handle_from_covered_text() {
        let text = "hi @carol.example.com";
        let post = parse_post(&raw(json!({
            "text": text,
            "createdAt": "2026-01-01T00:10:00Z",
            "facets": [{
                "index": {"byteStart": 3, "byteEnd": 21},
                "features": [{"$type": "app.bsky.richtext.facet#mention", "did": "did:plc:carol"}],
            }],
        })))
        .unwrap();

        assert!(post.mentions.contains(&Handle::new("carol.example.com").unwrap()));
    }

    #[test]
    fn decodes_image_embed_with_alt() {
        let post = parse_post(&raw(json!({
            "text": "",
            "createdAt": "2026-01-01T00:10:00Z",
            "embed": {
                "$type": "app.bsky.embed.images",
                "images": [{"alt": "a cat"}, {"alt": ""}],
            },
        })))
        .unwrap();

        assert_eq!(post.image_count(), 2);
        assert_eq!(post.alt_texts(), vec!["a cat"]);
    }

    #[test]
    fn unknown_embed_kind_is_preserved() {
        let post = parse_post(&raw(json!({
            "text": "",
            "createdAt": "2026-01-01T00:10:00Z",
            "embed": {"$type": "app.bsky.embed.hologram"},
        })))
        .unwrap();

        assert_eq!(
            post.embed,
            Some(Embed::Unknown {
                kind: "app.bsky.embed.hologram".to_owned()
            })
        );
    }

    #[test]
    fn reply_refs_fall_back_to_parent_as_root() {
        let post = parse_post(&raw(json!({
            "text": "",
            "createdAt": "2026-01-01T00:10:00Z",
            "reply": {"parent": {"uri": "at://did:plc:abc/app.bsky.feed.post/0"}},
        })))
        .unwrap();

        let reply = post.reply.unwrap();
        assert_eq!(reply.parent, reply.root);
    }

    #[test]
    fn metrics_only_present_when_any_count_known() {
        let mut r = raw(json!({"text": "", "createdAt": "2026-01-01T00:10:00Z"}));
        assert!(parse_post(&r).unwrap().metrics.is_none());

        r.like_count = Some(3);
        let metrics = parse_post(&r).unwrap().metrics.unwrap();
        assert_eq!(metrics.like_count, 3);
        assert_eq!(metrics.repost_count, 0);
    }
}
