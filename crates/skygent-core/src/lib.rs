//! Core domain types shared by every skygent crate.
//!
//! Everything here is plain data and pure helpers: branded identifier
//! types, the normalised [`Post`] model, the event envelope persisted in a
//! store's event log, the [`DataSource`] descriptors that name where posts
//! come from, and the [`error_chain`] log rendering. No I/O happens in
//! this crate.

pub mod err;
pub mod event;
pub mod id;
pub mod post;
pub mod raw;
pub mod source;
mod time;

pub use err::error_chain;
pub use event::{
    EVENT_RECORD_VERSION, EventLogEntry, EventMeta, EventRecord, EventSource, PostDelete,
    PostEvent, PostUpsert,
};
pub use id::{AtUri, Did, EventId, EventSeq, Handle, Hashtag, IdParseError, PostUri, StoreName};
pub use post::{
    ByteRange, Embed, Facet, FacetFeature, ImageEmbed, Post, PostMetrics, ReplyRef,
};
pub use raw::{RawPostError, RawPostRecord, parse_post};
pub use source::{AuthorFeedFilter, DataSource, StoreSource};
pub use time::{Timestamp, TimestampParseError};

/// Defines a validated, string-backed identifier type.
///
/// The wrapped string is normalised by `$validate` before construction, so
/// two values that compare equal render identically. Serde round-trips
/// through the string form and re-validates on decode.
#[macro_export]
macro_rules! define_str_id {
    (
        $(#[$outer:meta])*
        struct $t:tt, $validate:path
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $t(String);

        impl $t {
            pub fn new(s: impl AsRef<str>) -> Result<Self, $crate::id::IdParseError> {
                $validate(s.as_ref()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $t {
            type Err = $crate::id::IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $t {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $t {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
