//! Capability interfaces for effectful filter leaves.
//!
//! The engine never talks to the network itself; `HasValidLinks` and
//! `Trending` leaves call whatever implementations the caller injects.
//! Production implementations live in `skygent-sync`; tests inject
//! synchronous fakes.

use async_trait::async_trait;
use snafu::Snafu;
use url::Url;

/// Whatever a capability implementation reports as the cause of a failure;
/// the engine only ever routes it through an error policy or logs it.
pub type CapabilityFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Snafu)]
pub enum CapabilityError {
    #[snafu(display("Capability request failed"))]
    Request { source: CapabilityFailure },
    #[snafu(display("Capability timed out"))]
    Timeout,
}

impl CapabilityError {
    pub fn request(source: impl Into<CapabilityFailure>) -> Self {
        CapabilityError::Request {
            source: source.into(),
        }
    }
}

/// Answers "does this URL resolve?" for the `HasValidLinks` leaf.
#[async_trait]
pub trait LinkValidator: Send + Sync {
    async fn is_valid(&self, url: &Url) -> Result<bool, CapabilityError>;
}

/// Answers "is this tag currently trending?" for the `Trending` leaf.
///
/// Comparison is case-insensitive with the leading `#` stripped; that
/// normalisation is the implementation's job so cached topic lists are
/// checked consistently.
#[async_trait]
pub trait TrendingTopics: Send + Sync {
    async fn is_trending(&self, tag: &str) -> Result<bool, CapabilityError>;
}
