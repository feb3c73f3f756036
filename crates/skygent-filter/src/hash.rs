//! Canonical filter hashing.
//!
//! The hash identifies a filter configuration in sync and derivation
//! checkpoints, so it must be stable across encode/decode round-trips and
//! across reorderings that don't change meaning. Canonicalisation sorts
//! object keys (serde_json already stores objects sorted), sorts the lists
//! of set-semantics operators, and normalises regex flag order; the result
//! is SHA-256 over the compact JSON.

use std::fmt;

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};

use crate::expr::FilterExpr;

/// Suffix stamped onto derivation checkpoints produced in DeriveTime mode:
/// such runs used live capabilities, so a later EventTime derivation must
/// not treat their checkpoint as equivalent.
pub const DERIVE_TIME_SUFFIX: &str = "@DeriveTime";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterHash(String);

impl FilterHash {
    pub fn from_stored(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn with_derive_time(&self) -> Self {
        if self.0.ends_with(DERIVE_TIME_SUFFIX) {
            self.clone()
        } else {
            Self(format!("{}{DERIVE_TIME_SUFFIX}", self.0))
        }
    }

    pub fn is_derive_time(&self) -> bool {
        self.0.ends_with(DERIVE_TIME_SUFFIX)
    }
}

impl fmt::Display for FilterHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical SHA-256 of an expression.
pub fn expr_hash(expr: &FilterExpr) -> FilterHash {
    let mut value = serde_json::to_value(expr).expect("expressions serialize");
    canonicalise(&mut value);
    let canonical = serde_json::to_string(&value).expect("values serialize");
    let digest = Sha256::digest(canonical.as_bytes());
    FilterHash(HEXLOWER.encode(&digest))
}

fn canonicalise(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let tag = map.get("_tag").and_then(Value::as_str).map(str::to_owned);
            match tag.as_deref() {
                Some("AuthorIn") => sort_string_array(map.get_mut("handles")),
                Some("HashtagIn") => sort_string_array(map.get_mut("tags")),
                Some("Language") => sort_string_array(map.get_mut("langs")),
                Some("Regex") => {
                    if let Some(Value::String(flags)) = map.get_mut("flags") {
                        let mut chars: Vec<char> = flags.chars().collect();
                        chars.sort_unstable();
                        chars.dedup();
                        *flags = chars.into_iter().collect();
                    }
                }
                _ => {}
            }
            for (_, v) in map.iter_mut() {
                canonicalise(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                canonicalise(item);
            }
        }
        _ => {}
    }
}

fn sort_string_array(value: Option<&mut Value>) {
    if let Some(Value::Array(items)) = value {
        items.sort_by(|a, b| {
            a.as_str()
                .unwrap_or_default()
                .cmp(b.as_str().unwrap_or_default())
        });
        items.dedup();
    }
}

#[cfg(test)]
mod tests {
    use skygent_core::{Handle, Hashtag};

    use super::*;
    use crate::expr::FilterExpr;

    #[test]
    fn hash_is_stable_across_encode_decode() {
        let expr = FilterExpr::and(
            FilterExpr::Hashtag {
                tag: Hashtag::new("#ai").unwrap(),
            },
            FilterExpr::not(FilterExpr::Author {
                handle: Handle::new("spam.bsky.social").unwrap(),
            }),
        );
        let hash = expr_hash(&expr);
        let json = serde_json::to_string(&expr).unwrap();
        let decoded: FilterExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, expr_hash(&decoded));
    }

    #[test]
    fn set_semantics_operators_hash_order_independently() {
        let a = FilterExpr::AuthorIn {
            handles: vec![
                Handle::new("bob.example").unwrap(),
                Handle::new("alice.example").unwrap(),
            ],
        };
        let b = FilterExpr::AuthorIn {
            handles: vec![
                Handle::new("alice.example").unwrap(),
                Handle::new("bob.example").unwrap(),
            ],
        };
        assert_eq!(expr_hash(&a), expr_hash(&b));
    }

    #[test]
    fn regex_flag_order_does_not_matter() {
        let a = FilterExpr::Regex {
            patterns: vec!["x".to_owned()],
            flags: Some("im".to_owned()),
        };
        let b = FilterExpr::Regex {
            patterns: vec!["x".to_owned()],
            flags: Some("mi".to_owned()),
        };
        assert_eq!(expr_hash(&a), expr_hash(&b));
    }

    #[test]
    fn different_expressions_hash_differently() {
        let a = FilterExpr::Hashtag {
            tag: Hashtag::new("#ai").unwrap(),
        };
        let b = FilterExpr::Hashtag {
            tag: Hashtag::new("#tech").unwrap(),
        };
        assert_ne!(expr_hash(&a), expr_hash(&b));
    }

    proptest::proptest! {
        #[test]
        fn hash_invariant_under_handle_permutation(
            names in proptest::collection::vec("[a-z]{1,8}", 1..6),
            rotation in 0usize..6,
        ) {
            let handles: Vec<Handle> = names
                .iter()
                .map(|n| Handle::new(format!("{n}.example")).unwrap())
                .collect();
            let mut rotated = handles.clone();
            rotated.rotate_left(rotation % handles.len().max(1));

            let a = FilterExpr::AuthorIn { handles };
            let b = FilterExpr::AuthorIn { handles: rotated };
            proptest::prop_assert_eq!(expr_hash(&a), expr_hash(&b));
        }
    }

    #[test]
    fn derive_time_suffix_is_idempotent() {
        let hash = expr_hash(&FilterExpr::All);
        let stamped = hash.with_derive_time();
        assert!(stamped.is_derive_time());
        assert_eq!(stamped, stamped.with_derive_time());
        assert_ne!(hash, stamped);
    }
}
