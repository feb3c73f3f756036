//! The filter expression language.
//!
//! A filter is a tagged-union tree ([`FilterExpr`]) with two surface
//! syntaxes: the tagged JSON this module's serde derives produce, and the
//! compact DSL in [`dsl`]. Expressions are validated and lowered by
//! [`compile`] into a [`Predicate`], which is what actually runs against
//! posts. [`hash`] produces the canonical SHA-256 identity used to key sync
//! and derivation checkpoints.

pub mod caps;
pub mod compile;
pub mod dsl;
pub mod eval;
pub mod expr;
pub mod hash;

pub use caps::{CapabilityError, CapabilityFailure, LinkValidator, TrendingTopics};
pub use compile::{FilterCompileError, Predicate, compile};
pub use dsl::{
    DslParseError, FilterLibrary, FilterLibraryError, FilterParseError, NoLibrary, parse_dsl,
    parse_json,
};
pub use eval::{Capabilities, FilterEvalError};
pub use expr::{ErrorPolicy, FilterExpr, RetryDelay};
pub use hash::{FilterHash, expr_hash};

pub const LOG_TARGET: &str = "skygent::filter";
