//! Capability interfaces onto the remote API.
//!
//! The actual Bluesky client lives outside this workspace; these traits are
//! the seam it plugs into. [`NdjsonFileSource`] is the in-tree
//! implementation used by tests and by `sync --from-file`, replaying
//! previously captured raw records.

use std::path::PathBuf;

use async_trait::async_trait;
use skygent_core::{DataSource, Did, Handle, RawPostRecord};
use snafu::{ResultExt as _, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PostSourceError {
    #[snafu(display("Remote API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()))]
    Api {
        message: String,
        status: Option<u16>,
        operation: Option<String>,
    },
    #[snafu(display("Source I/O error at {}", path.display()))]
    SourceIo {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Malformed raw record at {path:?} line {line}"))]
    MalformedRecord {
        source: serde_json::Error,
        path: PathBuf,
        line: usize,
    },
    #[snafu(display("This source cannot serve `{source_key}`"))]
    Unsupported { source_key: String },
}

/// One page of raw records plus the cursor for the next page; `cursor:
/// None` means the source is drained.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawPostRecord>,
    pub cursor: Option<String>,
}

/// Paged access to a remote origin of posts.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_page(
        &self,
        source: &DataSource,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<Page, PostSourceError>;
}

/// Identity and discovery endpoints of the remote API.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn resolve_handle(&self, handle: &Handle) -> Result<Did, PostSourceError>;
    async fn get_profiles(&self, dids: &[Did]) -> Result<Vec<(Did, Handle)>, PostSourceError>;
    async fn get_trending_topics(&self) -> Result<Vec<String>, PostSourceError>;
}

/// Replays raw records from a newline-delimited JSON file.
///
/// The cursor is the line offset, so interrupted syncs resume exactly where
/// the checkpoint left off.
pub struct NdjsonFileSource {
    path: PathBuf,
}

impl NdjsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PostSource for NdjsonFileSource {
    async fn fetch_page(
        &self,
        _source: &DataSource,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<Page, PostSourceError> {
        let offset: usize = cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .context(SourceIoSnafu { path: &self.path })?;

        let mut records = Vec::new();
        let mut consumed = offset;
        for (line_no, line) in content.lines().enumerate().skip(offset) {
            if limit <= records.len() {
                break;
            }
            consumed = line_no + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record =
                serde_json::from_str(trimmed).context(MalformedRecordSnafu {
                    path: &self.path,
                    line: line_no + 1,
                })?;
            records.push(record);
        }

        let total_lines = content.lines().count();
        let cursor = (consumed < total_lines).then(|| consumed.to_string());
        Ok(Page { records, cursor })
    }
}
