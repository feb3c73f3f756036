//! The normalised post model.
//!
//! A [`Post`] is the immutable record stored in PostUpsert events and
//! projected into the queryable index. Normalisation happens while parsing
//! the raw API record (see [`crate::raw`]); by the time a `Post` exists its
//! hashtag/mention/link sets are deduplicated and its timestamps are UTC.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::id::{AtUri, Did, Handle, Hashtag, PostUri};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub uri: PostUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub author: Handle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_did: Option<Did>,
    pub text: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hashtags: BTreeSet<Hashtag>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mentions: BTreeSet<Handle>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub links: BTreeSet<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<Facet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    /// URI of the post this one is a repost of, when the record arrived
    /// through a feed's repost reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repost_of: Option<PostUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub langs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PostMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub parent: PostUri,
    pub root: PostUri,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

/// Embedded media/record attached to a post.
///
/// Unknown embed kinds decode to [`Embed::Unknown`] instead of failing;
/// everything else must round-trip by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag")]
pub enum Embed {
    Images { images: Vec<ImageEmbed> },
    External { uri: Url, title: String, description: String },
    Video { alt: Option<String> },
    Record { record: AtUri },
    RecordWithMedia { record: AtUri, media: Box<Embed> },
    Unknown { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEmbed {
    #[serde(default)]
    pub alt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullsize: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<Url>,
}

/// A rich-text annotation over a byte range of the post text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteRange,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteRange {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: Did },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
}

#[bon::bon]
impl Post {
    /// Test- and parser-friendly constructor; set sets are deduplicated by
    /// their `BTreeSet` nature, hashtags normalised by [`Hashtag`] itself.
    #[builder]
    pub fn new(
        uri: PostUri,
        cid: Option<String>,
        author: Handle,
        author_did: Option<Did>,
        #[builder(default)] text: String,
        created_at: Timestamp,
        #[builder(default)] hashtags: BTreeSet<Hashtag>,
        #[builder(default)] mentions: BTreeSet<Handle>,
        #[builder(default)] links: BTreeSet<Url>,
        facets: Option<Vec<Facet>>,
        reply: Option<ReplyRef>,
        embed: Option<Embed>,
        repost_of: Option<PostUri>,
        langs: Option<Vec<String>>,
        metrics: Option<PostMetrics>,
        indexed_at: Option<Timestamp>,
    ) -> Self {
        Self {
            uri,
            cid,
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
        }
    }
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }

    /// A quote post embeds another post record.
    pub fn is_quote(&self) -> bool {
        matches!(
            self.embed,
            Some(Embed::Record { .. }) | Some(Embed::RecordWithMedia { .. })
        )
    }

    pub fn is_original(&self) -> bool {
        !self.is_reply() && !self.is_quote() && !self.is_repost()
    }

    pub fn has_embed(&self) -> bool {
        self.embed.is_some()
    }

    pub fn image_count(&self) -> usize {
        fn count(embed: &Embed) -> usize {
            match embed {
                Embed::Images { images } => images.len(),
                Embed::RecordWithMedia { media, .. } => count(media),
                _ => 0,
            }
        }
        self.embed.as_ref().map(count).unwrap_or(0)
    }

    pub fn has_images(&self) -> bool {
        0 < self.image_count()
    }

    pub fn has_video(&self) -> bool {
        fn is_video(embed: &Embed) -> bool {
            match embed {
                Embed::Video { .. } => true,
                Embed::RecordWithMedia { media, .. } => is_video(media),
                _ => false,
            }
        }
        self.embed.as_ref().map(is_video).unwrap_or(false)
    }

    pub fn has_media(&self) -> bool {
        self.has_images() || self.has_video()
    }

    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    /// Alt texts of all image embeds, in embed order, empties skipped.
    pub fn alt_texts(&self) -> Vec<&str> {
        fn collect<'p>(embed: &'p Embed, out: &mut Vec<&'p str>) {
            match embed {
                Embed::Images { images } => {
                    out.extend(images.iter().map(|i| i.alt.as_str()).filter(|a| !a.is_empty()))
                }
                Embed::Video { alt: Some(alt) } if !alt.is_empty() => out.push(alt),
                Embed::RecordWithMedia { media, .. } => collect(media, out),
                _ => {}
            }
        }
        let mut out = Vec::new();
        if let Some(embed) = &self.embed {
            collect(embed, &mut out);
        }
        out
    }

    /// All alt texts joined with a newline; what the FTS index stores.
    pub fn alt_text_combined(&self) -> Option<String> {
        let texts = self.alt_texts();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    pub fn has_alt_text(&self) -> bool {
        !self.alt_texts().is_empty()
    }

    pub fn metrics_or_zero(&self) -> PostMetrics {
        self.metrics.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_with_embed(embed: Option<Embed>) -> Post {
        Post::builder()
            .uri(PostUri::new("at://did:plc:abc/app.bsky.feed.post/1").unwrap())
            .author(Handle::new("alice.bsky.social").unwrap())
            .text("hello".to_owned())
            .created_at(Timestamp::parse_rfc3339("2026-01-01T00:10:00Z").unwrap())
            .maybe_embed(embed)
            .build()
    }

    #[test]
    fn json_round_trip_preserves_post() {
        let mut post = post_with_embed(Some(Embed::Images {
            images: vec![ImageEmbed {
                alt: "a cat".to_owned(),
                fullsize: None,
                thumb: None,
            }],
        }));
        post.hashtags.insert(Hashtag::new("#ai").unwrap());
        post.langs = Some(vec!["en".to_owned()]);

        let json = serde_json::to_string(&post).unwrap();
        let decoded: Post = serde_json::from_str(&json).unwrap();
        assert_eq!(post, decoded);
    }

    #[test]
    fn quote_and_media_classification() {
        let record = AtUri::new("at://did:plc:abc/app.bsky.feed.post/2").unwrap();
        let quote = post_with_embed(Some(Embed::Record {
            record: record.clone(),
        }));
        assert!(quote.is_quote());
        assert!(!quote.is_original());
        assert!(!quote.has_media());

        let with_media = post_with_embed(Some(Embed::RecordWithMedia {
            record,
            media: Box::new(Embed::Images {
                images: vec![ImageEmbed {
                    alt: String::new(),
                    fullsize: None,
                    thumb: None,
                }],
            }),
        }));
        assert!(with_media.is_quote());
        assert!(with_media.has_images());
        assert_eq!(with_media.image_count(), 1);
        assert!(!with_media.has_alt_text());
    }

    #[test]
    fn alt_text_aggregation_skips_empties() {
        let post = post_with_embed(Some(Embed::Images {
            images: vec![
                ImageEmbed {
                    alt: "first".to_owned(),
                    fullsize: None,
                    thumb: None,
                },
                ImageEmbed {
                    alt: String::new(),
                    fullsize: None,
                    thumb: None,
                },
                ImageEmbed {
                    alt: "third".to_owned(),
                    fullsize: None,
                    thumb: None,
                },
            ],
        }));
        assert_eq!(post.alt_text_combined().as_deref(), Some("first\nthird"));
    }

    #[test]
    fn unknown_embed_round_trips_by_tag() {
        let post = post_with_embed(Some(Embed::Unknown {
            kind: "app.bsky.embed.futuristic".to_owned(),
        }));
        let json = serde_json::to_string(&post).unwrap();
        let decoded: Post = serde_json::from_str(&json).unwrap();
        assert_eq!(post, decoded);
    }
}
