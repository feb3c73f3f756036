//! Branded identifier types.
//!
//! All of these wrap a normalised string (or integer) so that the rest of
//! the codebase can't confuse a handle with a hashtag or pass a raw string
//! where a store name is expected.

use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

use crate::define_str_id;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[snafu(display("Empty {what}"))]
    Empty { what: &'static str },
    #[snafu(display("Invalid {what} `{input}`: {reason}"))]
    Invalid {
        what: &'static str,
        input: String,
        reason: &'static str,
    },
}

fn invalid(what: &'static str, input: &str, reason: &'static str) -> IdParseError {
    IdParseError::Invalid {
        what,
        input: input.to_owned(),
        reason,
    }
}

fn validate_handle(s: &str) -> Result<String, IdParseError> {
    let s = s.strip_prefix('@').unwrap_or(s);
    if s.is_empty() {
        return Err(IdParseError::Empty { what: "handle" });
    }
    if s.chars()
        .any(|c| c.is_whitespace() || c.is_ascii_uppercase())
    {
        // Handles are host names; the network only ever hands out lowercase.
        return Err(invalid("handle", s, "must be lowercase without whitespace"));
    }
    Ok(s.to_owned())
}

fn validate_did(s: &str) -> Result<String, IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty { what: "did" });
    }
    if !s.starts_with("did:") {
        return Err(invalid("did", s, "must start with `did:`"));
    }
    Ok(s.to_owned())
}

fn validate_hashtag(s: &str) -> Result<String, IdParseError> {
    let tag = s.strip_prefix('#').unwrap_or(s);
    if tag.is_empty() {
        return Err(IdParseError::Empty { what: "hashtag" });
    }
    if tag.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(invalid("hashtag", s, "must be a single word"));
    }
    Ok(format!("#{tag}"))
}

fn validate_at_uri(s: &str) -> Result<String, IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty { what: "at-uri" });
    }
    if !s.starts_with("at://") {
        return Err(invalid("at-uri", s, "must start with `at://`"));
    }
    Ok(s.to_owned())
}

fn validate_store_name(s: &str) -> Result<String, IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty { what: "store name" });
    }
    if 64 < s.len() {
        return Err(invalid("store name", s, "must be at most 64 characters"));
    }
    let mut chars = s.chars();
    let first = chars.next().expect("non-empty");
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(invalid(
            "store name",
            s,
            "must start with a lowercase letter or digit",
        ));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            "store name",
            s,
            "may contain only lowercase letters, digits, `-` and `_`",
        ));
    }
    Ok(s.to_owned())
}

define_str_id! {
    /// A user handle (`alice.bsky.social`). Stored without the leading `@`.
    struct Handle, validate_handle
}

define_str_id! {
    /// A decentralised identifier (`did:plc:...`).
    struct Did, validate_did
}

define_str_id! {
    /// A hashtag, normalised to always carry the leading `#`.
    struct Hashtag, validate_hashtag
}

define_str_id! {
    /// Any AT-protocol URI (`at://did:plc:.../collection/rkey`).
    struct AtUri, validate_at_uri
}

define_str_id! {
    /// The name of a store; doubles as its directory name on disk.
    struct StoreName, validate_store_name
}

impl Hashtag {
    /// The tag without its leading `#`.
    pub fn bare(&self) -> &str {
        &self.as_str()[1..]
    }
}

/// The AT URI of a post record.
///
/// Same syntax as [`AtUri`]; kept as a distinct type because post URIs are
/// the identity of rows in the index and event targets of deletions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct PostUri(AtUri);

impl PostUri {
    pub fn new(s: impl AsRef<str>) -> Result<Self, IdParseError> {
        AtUri::new(s).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_at_uri(&self) -> &AtUri {
        &self.0
    }
}

impl From<AtUri> for PostUri {
    fn from(uri: AtUri) -> Self {
        Self(uri)
    }
}

impl fmt::Display for PostUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PostUri {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> serde::Deserialize<'de> for PostUri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        AtUri::deserialize(deserializer).map(Self)
    }
}

/// Globally unique event identifier.
///
/// ULIDs sort by creation time across processes; ordering *within* a store
/// is nevertheless given by [`EventSeq`], which the store allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(ulid::Ulid);

impl EventId {
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(ulid::Ulid::from_parts(timestamp_ms, random))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_str(s)?))
    }
}

impl serde::Serialize for EventId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for EventId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Position of an event within one store's log.
///
/// Allocated by the database on append: strictly monotone, gap-free,
/// starting at 1. `EventSeq::ZERO` is the "before any event" position used
/// by checkpoints.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct EventSeq(pub u64);

impl EventSeq {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EventSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for EventSeq {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_strips_at_prefix() {
        let h = Handle::new("@alice.bsky.social").unwrap();
        assert_eq!(h.as_str(), "alice.bsky.social");
        assert_eq!(h, Handle::new("alice.bsky.social").unwrap());
    }

    #[test]
    fn handle_rejects_whitespace_and_uppercase() {
        assert!(Handle::new("has space").is_err());
        assert!(Handle::new("Alice.bsky.social").is_err());
        assert!(Handle::new("").is_err());
    }

    #[test]
    fn hashtag_always_carries_hash() {
        assert_eq!(Hashtag::new("ai").unwrap().as_str(), "#ai");
        assert_eq!(Hashtag::new("#ai").unwrap().as_str(), "#ai");
        assert_eq!(Hashtag::new("#ai").unwrap().bare(), "ai");
        assert!(Hashtag::new("##ai").is_err());
        assert!(Hashtag::new("#").is_err());
    }

    #[test]
    fn store_name_charset() {
        assert!(StoreName::new("demo").is_ok());
        assert!(StoreName::new("my-store_2").is_ok());
        assert!(StoreName::new("-leading").is_err());
        assert!(StoreName::new("Has.Caps").is_err());
        assert!(StoreName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn at_uri_requires_scheme() {
        assert!(AtUri::new("at://did:plc:abc/app.bsky.feed.post/1").is_ok());
        assert!(AtUri::new("https://example.com").is_err());
    }

    #[test]
    fn event_id_round_trips_via_string() {
        let id = EventId::generate();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_rejects_invalid_ids() {
        assert!(serde_json::from_str::<Hashtag>("\"\"").is_err());
        assert!(serde_json::from_str::<Handle>("\"ok.example\"").is_ok());
    }
}
