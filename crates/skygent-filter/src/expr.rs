//! The filter AST and its JSON surface.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skygent_core::{Handle, Hashtag, Timestamp};

/// A filter expression tree.
///
/// The serde representation is the external JSON surface: internally tagged
/// with `_tag`, camelCase fields, e.g. `{"_tag":"Hashtag","tag":"#ai"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all_fields = "camelCase")]
pub enum FilterExpr {
    All,
    None,
    Author {
        handle: Handle,
    },
    AuthorIn {
        handles: Vec<Handle>,
    },
    Hashtag {
        tag: Hashtag,
    },
    HashtagIn {
        tags: Vec<Hashtag>,
    },
    Contains {
        text: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    IsReply,
    IsQuote,
    IsRepost,
    IsOriginal,
    HasImages,
    MinImages {
        n: u32,
    },
    HasAltText,
    NoAltText,
    AltText {
        text: String,
    },
    AltTextRegex {
        pattern: String,
    },
    HasVideo,
    HasLinks,
    LinkContains {
        text: String,
    },
    LinkRegex {
        pattern: String,
    },
    HasMedia,
    HasEmbed,
    Language {
        langs: Vec<String>,
    },
    Regex {
        patterns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<String>,
    },
    DateRange {
        start: Timestamp,
        end: Timestamp,
    },
    Engagement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_likes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_reposts: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_replies: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_quotes: Option<u64>,
    },
    HasValidLinks {
        #[serde(default)]
        on_error: ErrorPolicy,
    },
    Trending {
        tag: Hashtag,
        #[serde(default)]
        on_error: ErrorPolicy,
    },
    Not {
        expr: Box<FilterExpr>,
    },
    And {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },
    Or {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },
}

impl FilterExpr {
    pub fn not(expr: FilterExpr) -> Self {
        FilterExpr::Not {
            expr: Box::new(expr),
        }
    }

    pub fn and(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::And {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: FilterExpr, right: FilterExpr) -> Self {
        FilterExpr::Or {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// True when no leaf needs a live capability: such an expression can be
    /// answered from event data alone at any later time.
    pub fn is_event_time_compatible(&self) -> bool {
        match self {
            FilterExpr::HasValidLinks { .. } | FilterExpr::Trending { .. } => false,
            FilterExpr::Not { expr } => expr.is_event_time_compatible(),
            FilterExpr::And { left, right } | FilterExpr::Or { left, right } => {
                left.is_event_time_compatible() && right.is_event_time_compatible()
            }
            _ => true,
        }
    }
}

/// What an effectful leaf does when its capability fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all_fields = "camelCase")]
pub enum ErrorPolicy {
    /// Treat the post as matching.
    Include,
    /// Treat the post as not matching.
    #[default]
    Exclude,
    /// Retry with exponential backoff; exhaustion behaves like `Exclude`.
    Retry {
        max_retries: u32,
        base_delay: RetryDelay,
    },
}

/// A human-writable delay (`"1 second"`, `"250 millis"`).
///
/// Millisecond precision internally; serialises back to the smallest unit
/// that renders without a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay(Duration);

impl RetryDelay {
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        if millis == 1000 {
            f.write_str("1 second")
        } else if millis % 1000 == 0 {
            write!(f, "{} seconds", millis / 1000)
        } else {
            write!(f, "{millis} millis")
        }
    }
}

impl FromStr for RetryDelay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration `{s}`"))?;
        let (amount, unit) = s.split_at(split);
        let amount: f64 = amount
            .parse()
            .map_err(|_| format!("invalid duration amount in `{s}`"))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("duration must be finite and non-negative: `{s}`"));
        }
        let millis = match unit.trim() {
            "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => amount,
            "s" | "sec" | "secs" | "second" | "seconds" => amount * 1000.0,
            "m" | "min" | "mins" | "minute" | "minutes" => amount * 60_000.0,
            other => return Err(format!("unknown duration unit `{other}`")),
        };
        Ok(Self(Duration::from_millis(millis.round() as u64)))
    }
}

impl Serialize for RetryDelay {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RetryDelay {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
