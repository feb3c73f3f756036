//! The compact filter DSL.
//!
//! `hashtag:#ai AND NOT author:spam.bsky.social` style input: terms are
//! `key:body(,opt=val)*`, joined by `AND`/`OR` (adjacent terms mean `AND`),
//! `NOT` is unary, parentheses group, `@name` pulls a saved expression from
//! a [`FilterLibrary`]. Both this syntax and the tagged JSON decode to the
//! same [`FilterExpr`] tree.

use std::fmt;

use serde::Serialize;
use serde_json::json;
use skygent_core::{Handle, Hashtag, Timestamp};
use snafu::Snafu;
use time::Duration;

use crate::expr::{ErrorPolicy, FilterExpr, RetryDelay};

const VALID_KEYS: &[&str] = &[
    "hashtag", "tag", "author", "from", "contains", "is", "has", "engagement", "regex",
    "language", "lang", "date", "since", "until", "age", "links", "trending", "authorin",
    "hashtagin", "alttext",
];

/// Structured parse failure, machine-readable by design.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParseError {
    pub error: String,
    pub received: String,
    pub expected: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl FilterParseError {
    fn new(
        error: impl Into<String>,
        received: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            received: received.into(),
            expected: expected.into(),
            fix: None,
            details: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: received `{}`, expected {}",
            self.error, self.received, self.expected
        )?;
        if let Some(fix) = &self.fix {
            write!(f, " (try: {fix})")?;
        }
        Ok(())
    }
}

impl std::error::Error for FilterParseError {}

#[derive(Debug, Snafu)]
pub enum FilterLibraryError {
    #[snafu(display("Unknown filter `@{name}`"))]
    NotFound { name: String },
    #[snafu(display("Filter library failure"))]
    Library {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Resolves `@name` references while parsing.
pub trait FilterLibrary {
    fn resolve(&self, name: &str) -> Result<FilterExpr, FilterLibraryError>;
}

/// Library that knows no names; every `@name` fails.
pub struct NoLibrary;

impl FilterLibrary for NoLibrary {
    fn resolve(&self, name: &str) -> Result<FilterExpr, FilterLibraryError> {
        NotFoundSnafu { name }.fail()
    }
}

#[derive(Debug, Snafu)]
pub enum DslParseError {
    #[snafu(transparent)]
    Syntax { source: FilterParseError },
    #[snafu(transparent)]
    Library { source: FilterLibraryError },
}

/// Decode the tagged-JSON surface, wrapping serde failures in the same
/// structured error shape the DSL parser produces.
pub fn parse_json(input: &str) -> Result<FilterExpr, FilterParseError> {
    serde_json::from_str(input).map_err(|e| FilterParseError {
        error: "invalid filter JSON".to_owned(),
        received: truncate_for_error(input),
        expected: "a tagged expression like {\"_tag\":\"Hashtag\",\"tag\":\"#ai\"}".to_owned(),
        fix: None,
        details: Some(json!({ "serde": e.to_string() })),
    })
}

fn truncate_for_error(input: &str) -> String {
    const MAX: usize = 120;
    if input.len() <= MAX {
        input.to_owned()
    } else {
        let cut: String = input.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

pub fn parse_dsl(
    input: &str,
    now: Timestamp,
    library: &dyn FilterLibrary,
) -> Result<FilterExpr, DslParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(FilterParseError::new(
            "empty filter",
            input,
            "at least one `key:value` term",
        )
        .into());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        now,
        library,
    };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(FilterParseError::new(
            "trailing input",
            parser.tokens[parser.pos].describe(),
            "end of filter",
        )
        .into());
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Term(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "(".to_owned(),
            Token::RParen => ")".to_owned(),
            Token::And => "AND".to_owned(),
            Token::Or => "OR".to_owned(),
            Token::Not => "NOT".to_owned(),
            Token::Term(t) => t.clone(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '(' {
            chars.next();
            tokens.push(Token::LParen);
            continue;
        }
        if c == ')' {
            chars.next();
            tokens.push(Token::RParen);
            continue;
        }
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            if c == '"' {
                chars.next();
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == '"' {
                        closed = true;
                        break;
                    }
                    word.push(q);
                }
                if !closed {
                    return Err(FilterParseError::new(
                        "unterminated quote",
                        input,
                        "a closing `\"`",
                    ));
                }
                continue;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(match word.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            _ => Token::Term(word),
        });
    }
    Ok(tokens)
}

struct Parser<'l> {
    tokens: Vec<Token>,
    pos: usize,
    now: Timestamp,
    library: &'l dyn FilterLibrary,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<FilterExpr, DslParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = FilterExpr::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, DslParseError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                }
                // Adjacent terms are an implicit AND.
                Some(Token::Term(_)) | Some(Token::Not) | Some(Token::LParen) => {}
                _ => break,
            }
            let right = self.parse_unary()?;
            left = FilterExpr::and(left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, DslParseError> {
        match self.next() {
            Some(Token::Not) => Ok(FilterExpr::not(self.parse_unary()?)),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    other => Err(FilterParseError::new(
                        "unbalanced parentheses",
                        other.map(|t| t.describe()).unwrap_or_default(),
                        "a closing `)`",
                    )
                    .into()),
                }
            }
            Some(Token::Term(term)) => self.parse_term(&term),
            other => Err(FilterParseError::new(
                "expected a filter term",
                other.map(|t| t.describe()).unwrap_or_default(),
                "`key:value`, `NOT`, or `(`",
            )
            .into()),
        }
    }

    fn parse_term(&mut self, term: &str) -> Result<FilterExpr, DslParseError> {
        if let Some(name) = term.strip_prefix('@') {
            return Ok(self.library.resolve(name)?);
        }

        let Some((key, body)) = term.split_once(':') else {
            return Err(FilterParseError::new(
                "malformed term",
                term,
                "`key:value`",
            )
            .with_fix(format!("{term}:<value>"))
            .into());
        };

        let key_lower = key.to_ascii_lowercase();
        match key_lower.as_str() {
            "hashtag" | "tag" => Ok(FilterExpr::Hashtag {
                tag: parse_hashtag(body)?,
            }),
            "hashtagin" => {
                let tags = body
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(parse_hashtag)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterExpr::HashtagIn { tags })
            }
            "author" | "from" => Ok(FilterExpr::Author {
                handle: parse_handle(body)?,
            }),
            "authorin" => {
                let handles = body
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(parse_handle)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterExpr::AuthorIn { handles })
            }
            "contains" => {
                let (atom, opts) = split_opts(body);
                let mut case_sensitive = false;
                for (name, value) in opts {
                    match (name.as_str(), value.as_str()) {
                        ("case", "sensitive") => case_sensitive = true,
                        ("case", "insensitive") => case_sensitive = false,
                        _ => return Err(unknown_opt("contains", &name, &["case"]).into()),
                    }
                }
                Ok(FilterExpr::Contains {
                    text: atom,
                    case_sensitive,
                })
            }
            "is" => match body {
                "reply" => Ok(FilterExpr::IsReply),
                "quote" => Ok(FilterExpr::IsQuote),
                "repost" => Ok(FilterExpr::IsRepost),
                "original" => Ok(FilterExpr::IsOriginal),
                other => Err(FilterParseError::new(
                    "unknown `is:` kind",
                    other,
                    "reply | quote | repost | original",
                )
                .into()),
            },
            "has" => {
                let (atom, opts) = split_opts(body);
                match atom.as_str() {
                    "images" => {
                        for (name, value) in opts {
                            if name == "min" {
                                let n = value.parse().map_err(|_| {
                                    FilterParseError::new(
                                        "invalid image count",
                                        value,
                                        "a positive integer",
                                    )
                                })?;
                                return Ok(FilterExpr::MinImages { n });
                            }
                            return Err(unknown_opt("has:images", &name, &["min"]).into());
                        }
                        Ok(FilterExpr::HasImages)
                    }
                    "video" => Ok(FilterExpr::HasVideo),
                    "links" => Ok(FilterExpr::HasLinks),
                    "media" => Ok(FilterExpr::HasMedia),
                    "embed" => Ok(FilterExpr::HasEmbed),
                    "alttext" => Ok(FilterExpr::HasAltText),
                    other => Err(FilterParseError::new(
                        "unknown `has:` kind",
                        other,
                        "images | video | links | media | embed | alttext",
                    )
                    .into()),
                }
            }
            "engagement" => {
                let mut expr = FilterExpr::Engagement {
                    min_likes: None,
                    min_reposts: None,
                    min_replies: None,
                    min_quotes: None,
                };
                let FilterExpr::Engagement {
                    min_likes,
                    min_reposts,
                    min_replies,
                    min_quotes,
                } = &mut expr
                else {
                    unreachable!()
                };
                for part in body.split(',').filter(|s| !s.is_empty()) {
                    let Some((name, value)) = part.split_once('=') else {
                        return Err(FilterParseError::new(
                            "malformed engagement threshold",
                            part,
                            "`likes=N`, `reposts=N`, `replies=N` or `quotes=N`",
                        )
                        .into());
                    };
                    let n: u64 = value.parse().map_err(|_| {
                        FilterParseError::new("invalid threshold", value, "a non-negative integer")
                    })?;
                    match name {
                        "likes" => *min_likes = Some(n),
                        "reposts" => *min_reposts = Some(n),
                        "replies" => *min_replies = Some(n),
                        "quotes" => *min_quotes = Some(n),
                        other => {
                            return Err(unknown_opt(
                                "engagement",
                                other,
                                &["likes", "reposts", "replies", "quotes"],
                            )
                            .into());
                        }
                    }
                }
                Ok(expr)
            }
            "regex" => {
                let (pattern, opts) = split_opts(body);
                let mut flags = None;
                for (name, value) in opts {
                    if name == "flags" {
                        flags = Some(value);
                    } else {
                        return Err(unknown_opt("regex", &name, &["flags"]).into());
                    }
                }
                Ok(FilterExpr::Regex {
                    patterns: vec![pattern],
                    flags,
                })
            }
            "language" | "lang" => Ok(FilterExpr::Language {
                langs: body
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
            }),
            "date" => {
                let Some((start, end)) = body.split_once("..") else {
                    return Err(FilterParseError::new(
                        "malformed date range",
                        body,
                        "`start..end`",
                    )
                    .with_fix("date:2026-01-01..2026-02-01")
                    .into());
                };
                Ok(FilterExpr::DateRange {
                    start: parse_timestamp(start)?,
                    end: parse_timestamp(end)?,
                })
            }
            "since" => Ok(FilterExpr::DateRange {
                start: parse_timestamp(body)?,
                end: far_future(),
            }),
            "until" => Ok(FilterExpr::DateRange {
                start: Timestamp::UNIX_EPOCH,
                end: parse_timestamp(body)?,
            }),
            "age" => {
                let duration = parse_age(body)?;
                Ok(FilterExpr::DateRange {
                    start: self.now.saturating_sub(duration),
                    end: far_future(),
                })
            }
            "links" => {
                let (atom, opts) = split_opts(body);
                if let Some(text) = atom.strip_prefix("contains=") {
                    return Ok(FilterExpr::LinkContains {
                        text: text.to_owned(),
                    });
                }
                if let Some(pattern) = atom.strip_prefix("regex=") {
                    return Ok(FilterExpr::LinkRegex {
                        pattern: pattern.to_owned(),
                    });
                }
                if atom == "valid" {
                    return Ok(FilterExpr::HasValidLinks {
                        on_error: parse_policy_opts(&opts)?,
                    });
                }
                Err(FilterParseError::new(
                    "unknown `links:` form",
                    atom,
                    "valid | contains=<text> | regex=<pattern>",
                )
                .into())
            }
            "trending" => {
                let (atom, opts) = split_opts(body);
                Ok(FilterExpr::Trending {
                    tag: parse_hashtag(&atom)?,
                    on_error: parse_policy_opts(&opts)?,
                })
            }
            "alttext" => {
                let (atom, _) = split_opts(body);
                if let Some(pattern) = atom.strip_prefix("regex=") {
                    Ok(FilterExpr::AltTextRegex {
                        pattern: pattern.to_owned(),
                    })
                } else if atom == "none" {
                    Ok(FilterExpr::NoAltText)
                } else {
                    Ok(FilterExpr::AltText { text: atom })
                }
            }
            _ => Err(FilterParseError {
                error: "unknown filter key".to_owned(),
                received: key.to_owned(),
                expected: "a known filter key".to_owned(),
                fix: None,
                details: Some(json!({ "validTags": VALID_KEYS })),
            }
            .into()),
        }
    }
}

/// Splits `atom,opt=val,opt=val` into the atom and its options.
fn split_opts(body: &str) -> (String, Vec<(String, String)>) {
    let mut parts = body.split(',');
    let atom = parts.next().unwrap_or_default().to_owned();
    let opts = parts
        .filter_map(|p| {
            p.split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect();
    (atom, opts)
}

fn unknown_opt(key: &str, opt: &str, valid: &[&str]) -> FilterParseError {
    FilterParseError::new(
        format!("unknown option for `{key}`"),
        opt,
        valid.join(" | "),
    )
}

fn parse_policy_opts(opts: &[(String, String)]) -> Result<ErrorPolicy, FilterParseError> {
    let mut policy = ErrorPolicy::Exclude;
    let mut max_retries = 3u32;
    let mut base_delay = RetryDelay::from_millis(1000);
    let mut retry = false;
    for (name, value) in opts {
        match name.as_str() {
            "onerror" => match value.as_str() {
                "include" => policy = ErrorPolicy::Include,
                "exclude" => policy = ErrorPolicy::Exclude,
                "retry" => retry = true,
                other => {
                    return Err(FilterParseError::new(
                        "unknown error policy",
                        other,
                        "include | exclude | retry",
                    ));
                }
            },
            "maxretries" => {
                max_retries = value.parse().map_err(|_| {
                    FilterParseError::new("invalid maxretries", value, "a non-negative integer")
                })?;
            }
            "basedelay" => {
                base_delay = value.parse().map_err(|e: String| {
                    FilterParseError::new("invalid basedelay", value, e)
                })?;
            }
            other => {
                return Err(unknown_opt(
                    "error policy",
                    other,
                    &["onerror", "maxretries", "basedelay"],
                ));
            }
        }
    }
    if retry {
        policy = ErrorPolicy::Retry {
            max_retries,
            base_delay,
        };
    }
    Ok(policy)
}

fn parse_hashtag(s: impl AsRef<str>) -> Result<Hashtag, FilterParseError> {
    Hashtag::new(s.as_ref()).map_err(|e| {
        FilterParseError::new("invalid hashtag", s.as_ref(), "a single-word tag")
            .with_fix(format!("#{} ({e})", s.as_ref().trim_start_matches('#')))
    })
}

fn parse_handle(s: impl AsRef<str>) -> Result<Handle, FilterParseError> {
    Handle::new(s.as_ref()).map_err(|_| {
        FilterParseError::new(
            "invalid handle",
            s.as_ref(),
            "a lowercase handle like alice.bsky.social",
        )
    })
}

fn parse_timestamp(s: &str) -> Result<Timestamp, FilterParseError> {
    let s = s.trim();
    if let Ok(ts) = Timestamp::parse_rfc3339(s) {
        return Ok(ts);
    }
    // Date-only shorthand: midnight UTC.
    Timestamp::parse_rfc3339(&format!("{s}T00:00:00Z")).map_err(|_| {
        FilterParseError::new(
            "invalid date",
            s,
            "RFC-3339 (`2026-01-01T00:00:00Z`) or `YYYY-MM-DD`",
        )
    })
}

fn parse_age(s: &str) -> Result<Duration, FilterParseError> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| FilterParseError::new("invalid age", s, "`<n>h`, `<n>d` or `<n>w`"))?;
    let (amount, unit) = s.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| FilterParseError::new("invalid age amount", s, "a positive integer"))?;
    match unit {
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        "w" => Ok(Duration::weeks(amount)),
        other => Err(FilterParseError::new(
            "unknown age unit",
            other,
            "`h`, `d` or `w`",
        )),
    }
}

fn far_future() -> Timestamp {
    Timestamp::parse_rfc3339("9999-12-31T23:59:59Z").expect("valid timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::expr_hash;

    fn now() -> Timestamp {
        Timestamp::parse_rfc3339("2026-01-15T00:00:00Z").unwrap()
    }

    fn parse(input: &str) -> FilterExpr {
        parse_dsl(input, now(), &NoLibrary).unwrap()
    }

    #[test]
    fn tag_and_negated_author_parse_to_expected_tree() {
        let expr = parse("hashtag:#ai AND NOT author:spam.bsky.social");
        assert_eq!(
            expr,
            FilterExpr::and(
                FilterExpr::Hashtag {
                    tag: Hashtag::new("#ai").unwrap()
                },
                FilterExpr::not(FilterExpr::Author {
                    handle: Handle::new("spam.bsky.social").unwrap()
                }),
            )
        );

        // Hash must be stable across independent parses.
        let again = parse("hashtag:#ai AND NOT author:spam.bsky.social");
        assert_eq!(expr_hash(&expr), expr_hash(&again));
    }

    #[test]
    fn implicit_and_joins_adjacent_terms() {
        assert_eq!(
            parse("is:reply has:images"),
            FilterExpr::and(FilterExpr::IsReply, FilterExpr::HasImages)
        );
    }

    #[test]
    fn or_binds_looser_than_and() {
        assert_eq!(
            parse("is:reply AND has:images OR is:quote"),
            FilterExpr::or(
                FilterExpr::and(FilterExpr::IsReply, FilterExpr::HasImages),
                FilterExpr::IsQuote,
            )
        );
    }

    #[test]
    fn parentheses_group() {
        assert_eq!(
            parse("is:reply AND (has:images OR is:quote)"),
            FilterExpr::and(
                FilterExpr::IsReply,
                FilterExpr::or(FilterExpr::HasImages, FilterExpr::IsQuote),
            )
        );
    }

    #[test]
    fn quoted_bodies_keep_spaces() {
        assert_eq!(
            parse(r#"contains:"rust lang""#),
            FilterExpr::Contains {
                text: "rust lang".to_owned(),
                case_sensitive: false,
            }
        );
    }

    #[test]
    fn options_parse_after_comma() {
        assert_eq!(
            parse("contains:Rust,case=sensitive"),
            FilterExpr::Contains {
                text: "Rust".to_owned(),
                case_sensitive: true,
            }
        );
        assert_eq!(parse("has:images,min=3"), FilterExpr::MinImages { n: 3 });
        assert_eq!(
            parse("engagement:likes=10,quotes=2"),
            FilterExpr::Engagement {
                min_likes: Some(10),
                min_reposts: None,
                min_replies: None,
                min_quotes: Some(2),
            }
        );
    }

    #[test]
    fn links_and_trending_take_error_policies() {
        assert_eq!(
            parse("links:valid,onerror=retry,maxretries=2,basedelay=250ms"),
            FilterExpr::HasValidLinks {
                on_error: ErrorPolicy::Retry {
                    max_retries: 2,
                    base_delay: RetryDelay::from_millis(250),
                }
            }
        );
        assert_eq!(
            parse("trending:#ai,onerror=include"),
            FilterExpr::Trending {
                tag: Hashtag::new("#ai").unwrap(),
                on_error: ErrorPolicy::Include,
            }
        );
    }

    #[test]
    fn date_forms() {
        let expr = parse("date:2026-01-01..2026-02-01");
        let FilterExpr::DateRange { start, end } = expr else {
            panic!("expected date range");
        };
        assert_eq!(start.to_rfc3339(), "2026-01-01T00:00:00Z");
        assert_eq!(end.to_rfc3339(), "2026-02-01T00:00:00Z");

        let FilterExpr::DateRange { start, .. } = parse("age:7d") else {
            panic!("expected date range");
        };
        assert_eq!(start.to_rfc3339(), "2026-01-08T00:00:00Z");
    }

    #[test]
    fn unknown_key_reports_valid_tags() {
        let err = parse_dsl("hastag:#typo", now(), &NoLibrary).unwrap_err();
        let DslParseError::Syntax { source } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(source.received, "hastag");
        let tags = source.details.unwrap();
        assert!(tags["validTags"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "hashtag"));
    }

    #[test]
    fn named_filters_resolve_through_the_library() {
        struct OneFilter;
        impl FilterLibrary for OneFilter {
            fn resolve(&self, name: &str) -> Result<FilterExpr, FilterLibraryError> {
                if name == "noise" {
                    Ok(FilterExpr::IsRepost)
                } else {
                    NotFoundSnafu { name }.fail()
                }
            }
        }

        assert_eq!(
            parse_dsl("NOT @noise", now(), &OneFilter).unwrap(),
            FilterExpr::not(FilterExpr::IsRepost)
        );
        assert!(matches!(
            parse_dsl("@missing", now(), &OneFilter).unwrap_err(),
            DslParseError::Library {
                source: FilterLibraryError::NotFound { .. }
            }
        ));
    }

    #[test]
    fn unbalanced_parens_are_reported() {
        assert!(parse_dsl("(is:reply", now(), &NoLibrary).is_err());
        assert!(parse_dsl("is:reply)", now(), &NoLibrary).is_err());
    }

    #[test]
    fn json_surface_decodes_to_the_same_ast() {
        let from_json = parse_json(
            r##"{"_tag":"And",
                "left":{"_tag":"Hashtag","tag":"#ai"},
                "right":{"_tag":"Not","expr":{"_tag":"Author","handle":"spam.bsky.social"}}}"##,
        )
        .unwrap();
        let from_dsl = parse("hashtag:#ai AND NOT author:spam.bsky.social");
        assert_eq!(from_json, from_dsl);

        let err = parse_json("{\"_tag\":\"Nope\"}").unwrap_err();
        assert_eq!(err.error, "invalid filter JSON");
        assert!(err.details.unwrap()["serde"].as_str().is_some());
    }
}
