//! Predicate evaluation.
//!
//! Pure leaves are local boolean tests over the [`Post`]. The two effectful
//! leaves call injected capabilities and translate failures through their
//! [`ErrorPolicy`]. `And`/`Or` short-circuit left to right; `Not` inverts
//! whatever its child produced, including a policy-resolved outcome.

use std::future::Future;

use futures::future::BoxFuture;
use skygent_core::Post;
use snafu::Snafu;
use tracing::{debug, warn};

use crate::LOG_TARGET;
use crate::caps::{CapabilityError, LinkValidator, TrendingTopics};
use crate::compile::Predicate;
use crate::expr::ErrorPolicy;

/// The capabilities evaluation may call. All optional; evaluating an
/// effectful leaf without its capability is an error, not a policy matter.
#[derive(Clone, Copy, Default)]
pub struct Capabilities<'c> {
    pub link_validator: Option<&'c dyn LinkValidator>,
    pub trending: Option<&'c dyn TrendingTopics>,
}

impl<'c> Capabilities<'c> {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum FilterEvalError {
    #[snafu(display(
        "Effectful leaf needs the `{capability}` capability; only pure evaluation is available"
    ))]
    EffectfulLeaf { capability: &'static str },
    #[snafu(display("Capability `{capability}` is not configured"))]
    CapabilityUnavailable { capability: &'static str },
}

pub type EvalResult = std::result::Result<bool, FilterEvalError>;

impl Predicate {
    /// Evaluate without capabilities. Errors on any effectful leaf.
    pub fn evaluate_pure(&self, post: &Post) -> EvalResult {
        match self {
            Predicate::HasValidLinks { .. } => EffectfulLeafSnafu {
                capability: "link-validator",
            }
            .fail(),
            Predicate::Trending { .. } => EffectfulLeafSnafu {
                capability: "trending-topics",
            }
            .fail(),
            Predicate::Not(inner) => Ok(!inner.evaluate_pure(post)?),
            Predicate::And(l, r) => Ok(l.evaluate_pure(post)? && r.evaluate_pure(post)?),
            Predicate::Or(l, r) => Ok(l.evaluate_pure(post)? || r.evaluate_pure(post)?),
            leaf => Ok(leaf.pure_leaf(post)),
        }
    }

    /// Evaluate with capabilities. Deterministic given identical capability
    /// answers.
    pub fn evaluate<'a>(
        &'a self,
        post: &'a Post,
        caps: &'a Capabilities<'a>,
    ) -> BoxFuture<'a, EvalResult> {
        Box::pin(async move {
            match self {
                Predicate::HasValidLinks { on_error } => {
                    let validator = caps.link_validator.ok_or(
                        FilterEvalError::CapabilityUnavailable {
                            capability: "link-validator",
                        },
                    )?;
                    if post.links.is_empty() {
                        return Ok(false);
                    }
                    for link in &post.links {
                        let valid = with_policy(*on_error, "link-validator", || {
                            validator.is_valid(link)
                        })
                        .await;
                        if !valid {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Predicate::Trending { tag, on_error } => {
                    let trending =
                        caps.trending
                            .ok_or(FilterEvalError::CapabilityUnavailable {
                                capability: "trending-topics",
                            })?;
                    Ok(with_policy(*on_error, "trending-topics", || {
                        trending.is_trending(tag)
                    })
                    .await)
                }
                Predicate::Not(inner) => Ok(!inner.evaluate(post, caps).await?),
                Predicate::And(l, r) => {
                    if !l.evaluate(post, caps).await? {
                        return Ok(false);
                    }
                    r.evaluate(post, caps).await
                }
                Predicate::Or(l, r) => {
                    if l.evaluate(post, caps).await? {
                        return Ok(true);
                    }
                    r.evaluate(post, caps).await
                }
                leaf => Ok(leaf.pure_leaf(post)),
            }
        })
    }

    /// All pure leaf tests. Combinators and effectful leaves never reach
    /// here.
    fn pure_leaf(&self, post: &Post) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Never => false,
            Predicate::Author(handle) => post.author == *handle,
            Predicate::AuthorIn(handles) => handles.contains(&post.author),
            Predicate::Hashtag(tag) => post.hashtags.contains(tag),
            Predicate::HashtagIn(tags) => post.hashtags.iter().any(|t| tags.contains(t)),
            Predicate::Contains {
                needle,
                case_sensitive,
            } => {
                if *case_sensitive {
                    post.text.contains(needle)
                } else {
                    post.text.to_lowercase().contains(needle)
                }
            }
            Predicate::IsReply => post.is_reply(),
            Predicate::IsQuote => post.is_quote(),
            Predicate::IsRepost => post.is_repost(),
            Predicate::IsOriginal => post.is_original(),
            Predicate::HasImages => post.has_images(),
            Predicate::MinImages(n) => *n as usize <= post.image_count(),
            Predicate::HasAltText => post.has_alt_text(),
            Predicate::NoAltText => post.has_images() && !post.has_alt_text(),
            Predicate::AltText(needle) => post
                .alt_texts()
                .iter()
                .any(|alt| alt.to_lowercase().contains(needle)),
            Predicate::AltTextRegex(regex) => {
                post.alt_texts().iter().any(|alt| regex.is_match(alt))
            }
            Predicate::HasVideo => post.has_video(),
            Predicate::HasLinks => post.has_links(),
            Predicate::LinkContains(needle) => post
                .links
                .iter()
                .any(|l| l.as_str().to_lowercase().contains(needle)),
            Predicate::LinkRegex(regex) => {
                post.links.iter().any(|l| regex.is_match(l.as_str()))
            }
            Predicate::HasMedia => post.has_media(),
            Predicate::HasEmbed => post.has_embed(),
            Predicate::Language(langs) => post
                .langs
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|lang| {
                    let lang = lang.to_lowercase();
                    langs.contains(&lang)
                        || lang
                            .split('-')
                            .next()
                            .is_some_and(|primary| langs.contains(primary))
                }),
            Predicate::Regex(regexes) => regexes.iter().any(|r| r.is_match(&post.text)),
            Predicate::DateRange { start, end } => {
                *start <= post.created_at && post.created_at <= *end
            }
            Predicate::Engagement {
                min_likes,
                min_reposts,
                min_replies,
                min_quotes,
            } => {
                let metrics = post.metrics_or_zero();
                min_likes.is_none_or(|min| min <= metrics.like_count)
                    && min_reposts.is_none_or(|min| min <= metrics.repost_count)
                    && min_replies.is_none_or(|min| min <= metrics.reply_count)
                    && min_quotes.is_none_or(|min| min <= metrics.quote_count)
            }
            Predicate::HasValidLinks { .. }
            | Predicate::Trending { .. }
            | Predicate::Not(_)
            | Predicate::And(..)
            | Predicate::Or(..) => unreachable!("handled by the caller"),
        }
    }
}

/// Run a capability call under an [`ErrorPolicy`].
///
/// `Retry` backs off exponentially (`base * 2^attempt`) up to `max_retries`
/// additional attempts, then behaves like `Exclude`.
async fn with_policy<F, Fut>(policy: ErrorPolicy, capability: &'static str, call: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool, CapabilityError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(v) => return v,
            Err(e) => match policy {
                ErrorPolicy::Include => {
                    debug!(target: LOG_TARGET, %capability, err = %e, "Capability failed; policy includes");
                    return true;
                }
                ErrorPolicy::Exclude => {
                    debug!(target: LOG_TARGET, %capability, err = %e, "Capability failed; policy excludes");
                    return false;
                }
                ErrorPolicy::Retry {
                    max_retries,
                    base_delay,
                } => {
                    if max_retries <= attempt {
                        warn!(
                            target: LOG_TARGET,
                            %capability,
                            err = %e,
                            attempts = attempt + 1,
                            "Capability retries exhausted; excluding"
                        );
                        return false;
                    }
                    let delay = base_delay
                        .as_duration()
                        .saturating_mul(1u32 << attempt.min(16));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use skygent_core::{Handle, Hashtag, PostUri, Timestamp};
    use url::Url;

    use super::*;
    use crate::caps::CapabilityError;
    use crate::compile::compile;
    use crate::expr::{FilterExpr, RetryDelay};

    fn post() -> Post {
        let mut post = Post::builder()
            .uri(PostUri::new("at://did:plc:abc/app.bsky.feed.post/1").unwrap())
            .author(Handle::new("alice.bsky.social").unwrap())
            .text("talking about #ai".to_owned())
            .created_at(Timestamp::parse_rfc3339("2026-01-01T00:10:00Z").unwrap())
            .build();
        post.hashtags.insert(Hashtag::new("#ai").unwrap());
        post.links
            .insert(Url::parse("https://example.com/a").unwrap());
        post
    }

    struct CountingValidator {
        calls: AtomicU32,
        result: Result<bool, ()>,
    }

    #[async_trait]
    impl LinkValidator for CountingValidator {
        async fn is_valid(&self, _url: &Url) -> Result<bool, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .map_err(|_| CapabilityError::request("network down"))
        }
    }

    struct StaticTrending(bool);

    #[async_trait]
    impl TrendingTopics for StaticTrending {
        async fn is_trending(&self, _tag: &str) -> Result<bool, CapabilityError> {
            Ok(self.0)
        }
    }

    #[test]
    fn pure_leaves_and_combinators() {
        let post = post();
        let expr = FilterExpr::and(
            FilterExpr::Hashtag {
                tag: Hashtag::new("#ai").unwrap(),
            },
            FilterExpr::not(FilterExpr::Author {
                handle: Handle::new("spam.bsky.social").unwrap(),
            }),
        );
        let predicate = compile(&expr).unwrap();
        assert!(predicate.evaluate_pure(&post).unwrap());
    }

    #[test]
    fn pure_evaluation_rejects_effectful_leaves() {
        let predicate = compile(&FilterExpr::HasValidLinks {
            on_error: ErrorPolicy::Include,
        })
        .unwrap();
        assert_eq!(
            predicate.evaluate_pure(&post()),
            Err(FilterEvalError::EffectfulLeaf {
                capability: "link-validator"
            })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn and_short_circuits_before_capability_call() {
        let validator = CountingValidator {
            calls: AtomicU32::new(0),
            result: Ok(true),
        };
        let caps = Capabilities {
            link_validator: Some(&validator),
            trending: None,
        };
        let expr = FilterExpr::and(
            FilterExpr::None,
            FilterExpr::HasValidLinks {
                on_error: ErrorPolicy::Exclude,
            },
        );
        let predicate = compile(&expr).unwrap();
        assert!(!predicate.evaluate(&post(), &caps).await.unwrap());
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn not_inverts_policy_outcome() {
        let validator = CountingValidator {
            calls: AtomicU32::new(0),
            result: Err(()),
        };
        let caps = Capabilities {
            link_validator: Some(&validator),
            trending: None,
        };
        // Capability fails, policy includes, Not inverts the inclusion.
        let expr = FilterExpr::not(FilterExpr::HasValidLinks {
            on_error: ErrorPolicy::Include,
        });
        let predicate = compile(&expr).unwrap();
        assert!(!predicate.evaluate(&post(), &caps).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_exhaustion_excludes_and_counts_attempts() {
        let validator = CountingValidator {
            calls: AtomicU32::new(0),
            result: Err(()),
        };
        let caps = Capabilities {
            link_validator: Some(&validator),
            trending: None,
        };
        let expr = FilterExpr::HasValidLinks {
            on_error: ErrorPolicy::Retry {
                max_retries: 2,
                base_delay: RetryDelay::from_millis(1),
            },
        };
        let predicate = compile(&expr).unwrap();
        assert!(!predicate.evaluate(&post(), &caps).await.unwrap());
        // initial call + 2 retries
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trending_uses_injected_capability() {
        let trending = StaticTrending(true);
        let caps = Capabilities {
            link_validator: None,
            trending: Some(&trending),
        };
        let predicate = compile(&FilterExpr::Trending {
            tag: Hashtag::new("#AI").unwrap(),
            on_error: ErrorPolicy::Exclude,
        })
        .unwrap();
        assert!(predicate.evaluate(&post(), &caps).await.unwrap());
    }

    proptest::proptest! {
        // `evaluate(Not(e)) == !evaluate(e)` for pure expressions, and both
        // are deterministic across repeated evaluation.
        #[test]
        fn not_inverts_pure_expressions(
            text in "[a-z #]{0,30}",
            needle in "[a-z]{1,5}",
            reply in proptest::bool::ANY,
        ) {
            let mut post = post();
            post.text = text;
            post.reply = reply.then(|| skygent_core::ReplyRef {
                parent: post.uri.clone(),
                root: post.uri.clone(),
            });

            let exprs = [
                FilterExpr::Contains { text: needle, case_sensitive: false },
                FilterExpr::IsReply,
                FilterExpr::and(FilterExpr::IsReply, FilterExpr::HasImages),
            ];
            for expr in exprs {
                let plain = compile(&expr).unwrap();
                let negated = compile(&FilterExpr::not(expr)).unwrap();
                let value = plain.evaluate_pure(&post).unwrap();
                proptest::prop_assert_eq!(value, plain.evaluate_pure(&post).unwrap());
                proptest::prop_assert_eq!(!value, negated.evaluate_pure(&post).unwrap());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_capability_is_an_error_not_a_policy_matter() {
        let predicate = compile(&FilterExpr::Trending {
            tag: Hashtag::new("#ai").unwrap(),
            on_error: ErrorPolicy::Include,
        })
        .unwrap();
        let caps = Capabilities::none();
        assert_eq!(
            predicate.evaluate(&post(), &caps).await,
            Err(FilterEvalError::CapabilityUnavailable {
                capability: "trending-topics"
            })
        );
    }
}
