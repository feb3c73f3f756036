//! Compilation of [`FilterExpr`] trees into runnable [`Predicate`]s.
//!
//! Compile is pure: it validates structure and semantics (regexes, ranges,
//! thresholds) and pre-lowers everything evaluation needs (compiled
//! regexes, case-folded needles). Any failure names the path of the
//! offending node.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use skygent_core::{Handle, Hashtag, Timestamp};
use snafu::Snafu;

use crate::expr::{ErrorPolicy, FilterExpr};

#[derive(Debug, Snafu, Clone)]
#[snafu(display("Invalid filter at `{path}`: {message}"))]
pub struct FilterCompileError {
    pub path: String,
    pub message: String,
}

pub type CompileResult<T> = std::result::Result<T, FilterCompileError>;

/// A validated, lowered filter ready for evaluation.
#[derive(Debug)]
pub enum Predicate {
    All,
    Never,
    Author(Handle),
    AuthorIn(BTreeSet<Handle>),
    Hashtag(Hashtag),
    HashtagIn(BTreeSet<Hashtag>),
    Contains {
        needle: String,
        case_sensitive: bool,
    },
    IsReply,
    IsQuote,
    IsRepost,
    IsOriginal,
    HasImages,
    MinImages(u32),
    HasAltText,
    NoAltText,
    AltText(String),
    AltTextRegex(Regex),
    HasVideo,
    HasLinks,
    LinkContains(String),
    LinkRegex(Regex),
    HasMedia,
    HasEmbed,
    Language(BTreeSet<String>),
    Regex(Vec<Regex>),
    DateRange {
        start: Timestamp,
        end: Timestamp,
    },
    Engagement {
        min_likes: Option<u64>,
        min_reposts: Option<u64>,
        min_replies: Option<u64>,
        min_quotes: Option<u64>,
    },
    HasValidLinks {
        on_error: ErrorPolicy,
    },
    Trending {
        tag: String,
        on_error: ErrorPolicy,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// True when evaluation never needs a live capability.
    pub fn is_event_time_compatible(&self) -> bool {
        match self {
            Predicate::HasValidLinks { .. } | Predicate::Trending { .. } => false,
            Predicate::Not(inner) => inner.is_event_time_compatible(),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.is_event_time_compatible() && r.is_event_time_compatible()
            }
            _ => true,
        }
    }
}

pub fn compile(expr: &FilterExpr) -> CompileResult<Predicate> {
    compile_at(expr, &mut Vec::new())
}

fn err(path: &[&str], message: impl Into<String>) -> FilterCompileError {
    FilterCompileError {
        path: if path.is_empty() {
            "filter".to_owned()
        } else {
            path.join(".")
        },
        message: message.into(),
    }
}

fn compile_regex(
    pattern: &str,
    flags: Option<&str>,
    path: &[&str],
) -> CompileResult<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    if let Some(flags) = flags {
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'u' => {
                    builder.unicode(true);
                }
                other => {
                    return Err(err(
                        path,
                        format!("unsupported regex flag `{other}` (supported: i, m, s, u)"),
                    ));
                }
            }
        }
    }
    builder
        .build()
        .map_err(|e| err(path, format!("invalid regex `{pattern}`: {e}")))
}

fn validate_policy(policy: &ErrorPolicy, path: &[&str]) -> CompileResult<()> {
    if let ErrorPolicy::Retry { base_delay, .. } = policy {
        // `RetryDelay` parsing already enforces finite/non-negative, but the
        // policy can also be built programmatically.
        if u64::try_from(base_delay.as_duration().as_millis()).is_err() {
            return Err(err(path, "retry base delay out of range"));
        }
    }
    Ok(())
}

fn compile_at<'e>(expr: &'e FilterExpr, path: &mut Vec<&'e str>) -> CompileResult<Predicate> {
    Ok(match expr {
        FilterExpr::All => Predicate::All,
        FilterExpr::None => Predicate::Never,
        FilterExpr::Author { handle } => Predicate::Author(handle.clone()),
        FilterExpr::AuthorIn { handles } => {
            if handles.is_empty() {
                path.push("authorIn");
                return Err(err(path, "handles must not be empty"));
            }
            Predicate::AuthorIn(handles.iter().cloned().collect())
        }
        FilterExpr::Hashtag { tag } => Predicate::Hashtag(tag.clone()),
        FilterExpr::HashtagIn { tags } => {
            if tags.is_empty() {
                path.push("hashtagIn");
                return Err(err(path, "tags must not be empty"));
            }
            Predicate::HashtagIn(tags.iter().cloned().collect())
        }
        FilterExpr::Contains {
            text,
            case_sensitive,
        } => {
            if text.is_empty() {
                path.push("contains");
                return Err(err(path, "text must not be empty"));
            }
            Predicate::Contains {
                needle: if *case_sensitive {
                    text.clone()
                } else {
                    text.to_lowercase()
                },
                case_sensitive: *case_sensitive,
            }
        }
        FilterExpr::IsReply => Predicate::IsReply,
        FilterExpr::IsQuote => Predicate::IsQuote,
        FilterExpr::IsRepost => Predicate::IsRepost,
        FilterExpr::IsOriginal => Predicate::IsOriginal,
        FilterExpr::HasImages => Predicate::HasImages,
        FilterExpr::MinImages { n } => {
            if *n < 1 {
                path.push("minImages");
                return Err(err(path, "n must be at least 1"));
            }
            Predicate::MinImages(*n)
        }
        FilterExpr::HasAltText => Predicate::HasAltText,
        FilterExpr::NoAltText => Predicate::NoAltText,
        FilterExpr::AltText { text } => {
            if text.is_empty() {
                path.push("altText");
                return Err(err(path, "text must not be empty"));
            }
            Predicate::AltText(text.to_lowercase())
        }
        FilterExpr::AltTextRegex { pattern } => {
            path.push("altTextRegex");
            let regex = compile_regex(pattern, None, path)?;
            path.pop();
            Predicate::AltTextRegex(regex)
        }
        FilterExpr::HasVideo => Predicate::HasVideo,
        FilterExpr::HasLinks => Predicate::HasLinks,
        FilterExpr::LinkContains { text } => {
            if text.is_empty() {
                path.push("linkContains");
                return Err(err(path, "text must not be empty"));
            }
            Predicate::LinkContains(text.to_lowercase())
        }
        FilterExpr::LinkRegex { pattern } => {
            path.push("linkRegex");
            let regex = compile_regex(pattern, None, path)?;
            path.pop();
            Predicate::LinkRegex(regex)
        }
        FilterExpr::HasMedia => Predicate::HasMedia,
        FilterExpr::HasEmbed => Predicate::HasEmbed,
        FilterExpr::Language { langs } => {
            if langs.is_empty() {
                path.push("language");
                return Err(err(path, "langs must not be empty"));
            }
            Predicate::Language(langs.iter().map(|l| l.to_lowercase()).collect())
        }
        FilterExpr::Regex { patterns, flags } => {
            path.push("regex");
            if patterns.is_empty() {
                return Err(err(path, "patterns must not be empty"));
            }
            let mut regexes = Vec::with_capacity(patterns.len());
            for (i, pattern) in patterns.iter().enumerate() {
                let regex = compile_regex(pattern, flags.as_deref(), path).map_err(|mut e| {
                    e.path = format!("{}[{i}]", e.path);
                    e
                })?;
                regexes.push(regex);
            }
            path.pop();
            Predicate::Regex(regexes)
        }
        FilterExpr::DateRange { start, end } => {
            if end <= start {
                path.push("dateRange");
                return Err(err(path, "start must be strictly before end"));
            }
            Predicate::DateRange {
                start: *start,
                end: *end,
            }
        }
        FilterExpr::Engagement {
            min_likes,
            min_reposts,
            min_replies,
            min_quotes,
        } => {
            if min_likes.is_none()
                && min_reposts.is_none()
                && min_replies.is_none()
                && min_quotes.is_none()
            {
                path.push("engagement");
                return Err(err(path, "at least one threshold is required"));
            }
            Predicate::Engagement {
                min_likes: *min_likes,
                min_reposts: *min_reposts,
                min_replies: *min_replies,
                min_quotes: *min_quotes,
            }
        }
        FilterExpr::HasValidLinks { on_error } => {
            path.push("hasValidLinks");
            validate_policy(on_error, path)?;
            path.pop();
            Predicate::HasValidLinks {
                on_error: *on_error,
            }
        }
        FilterExpr::Trending { tag, on_error } => {
            path.push("trending");
            validate_policy(on_error, path)?;
            path.pop();
            Predicate::Trending {
                tag: tag.bare().to_lowercase(),
                on_error: *on_error,
            }
        }
        FilterExpr::Not { expr } => {
            path.push("not");
            let inner = compile_at(expr, path)?;
            path.pop();
            Predicate::Not(Box::new(inner))
        }
        FilterExpr::And { left, right } => {
            path.push("and.left");
            let l = compile_at(left, path)?;
            path.pop();
            path.push("and.right");
            let r = compile_at(right, path)?;
            path.pop();
            Predicate::And(Box::new(l), Box::new(r))
        }
        FilterExpr::Or { left, right } => {
            path.push("or.left");
            let l = compile_at(left, path)?;
            path.pop();
            path.push("or.right");
            let r = compile_at(right, path)?;
            path.pop();
            Predicate::Or(Box::new(l), Box::new(r))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    #[test]
    fn equal_date_range_bounds_are_rejected() {
        let expr = FilterExpr::DateRange {
            start: ts("2026-01-01T00:00:00Z"),
            end: ts("2026-01-01T00:00:00Z"),
        };
        let e = compile(&expr).unwrap_err();
        assert!(e.path.contains("dateRange"), "{e}");
    }

    #[test]
    fn empty_author_in_and_hashtag_in_are_rejected() {
        assert!(compile(&FilterExpr::AuthorIn { handles: vec![] }).is_err());
        assert!(compile(&FilterExpr::HashtagIn { tags: vec![] }).is_err());
    }

    #[test]
    fn regex_flags_outside_supported_set_are_rejected() {
        let expr = FilterExpr::Regex {
            patterns: vec!["ok".to_owned()],
            flags: Some("ix".to_owned()),
        };
        let e = compile(&expr).unwrap_err();
        assert!(e.message.contains('x'), "{e}");
    }

    #[test]
    fn invalid_regex_source_is_rejected_with_index_path() {
        let expr = FilterExpr::Regex {
            patterns: vec!["ok".to_owned(), "(unclosed".to_owned()],
            flags: None,
        };
        let e = compile(&expr).unwrap_err();
        assert!(e.path.ends_with("regex[1]"), "{e}");
    }

    #[test]
    fn engagement_requires_some_threshold() {
        let e = compile(&FilterExpr::Engagement {
            min_likes: None,
            min_reposts: None,
            min_replies: None,
            min_quotes: None,
        })
        .unwrap_err();
        assert!(e.path.contains("engagement"), "{e}");

        assert!(
            compile(&FilterExpr::Engagement {
                min_likes: Some(1),
                min_reposts: None,
                min_replies: None,
                min_quotes: None,
            })
            .is_ok()
        );
    }

    #[test]
    fn min_images_zero_is_rejected() {
        assert!(compile(&FilterExpr::MinImages { n: 0 }).is_err());
        assert!(compile(&FilterExpr::MinImages { n: 1 }).is_ok());
    }

    #[test]
    fn nested_error_paths_name_the_branch() {
        let expr = FilterExpr::and(
            FilterExpr::All,
            FilterExpr::not(FilterExpr::AuthorIn { handles: vec![] }),
        );
        let e = compile(&expr).unwrap_err();
        assert_eq!(e.path, "and.right.not.authorIn");
    }

    #[test]
    fn compiled_event_time_compatibility_matches_expr() {
        let pure = compile(&FilterExpr::IsReply).unwrap();
        assert!(pure.is_event_time_compatible());

        let effectful = compile(&FilterExpr::HasValidLinks {
            on_error: ErrorPolicy::Include,
        })
        .unwrap();
        assert!(!effectful.is_event_time_compatible());
    }
}
