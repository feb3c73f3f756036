use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "skygent", version, about = "Bluesky post stores: sync, filter, derive, query", long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Root directory holding stores, filters and caches.
    #[arg(long, global = true, env = "SKYGENT_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    #[arg(long, global = true, env = "SKYGENT_OUTPUT_FORMAT", default_value = "table")]
    pub output_format: OutputFormat,

    /// Render fewer columns / shorter text.
    #[arg(long, global = true, conflicts_with = "full")]
    pub compact: bool,

    #[arg(long, global = true)]
    pub full: bool,

    #[arg(long, global = true, default_value = "human")]
    pub log_format: LogFormat,

    /// Parallel filter evaluations during sync.
    #[arg(long, global = true, env = "SKYGENT_FILTER_CONCURRENCY")]
    pub sync_concurrency: Option<usize>,

    /// Posts per committed batch.
    #[arg(long, global = true)]
    pub sync_batch_size: Option<usize>,

    /// Records requested per API page.
    #[arg(long, global = true)]
    pub sync_page_limit: Option<usize>,

    /// Persist the sync cursor every N processed posts.
    #[arg(long, global = true)]
    pub checkpoint_every: Option<u64>,

    /// Persist the sync cursor at least this often.
    #[arg(long, global = true)]
    pub checkpoint_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Ndjson,
    Markdown,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Human,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Manage named stores.
    #[command(subcommand)]
    Store(StoreCmd),

    /// Pull posts from a source into a store.
    Sync {
        store: String,

        #[command(flatten)]
        source: SourceOpts,

        /// Filter expression (DSL or `@name`) applied before storing.
        #[arg(long)]
        filter: Option<String>,

        /// Re-store known posts instead of skipping them.
        #[arg(long)]
        refresh: bool,

        /// Stop at the first item error instead of skipping it.
        #[arg(long)]
        strict: bool,

        /// Abort once this many item errors accumulated.
        #[arg(long)]
        max_errors: Option<u64>,
    },

    /// Query one or more stores (comma-separated), newest first.
    Query {
        /// Store names, comma-separated.
        stores: String,

        #[arg(long)]
        filter: Option<String>,

        /// Full-text search (FTS5 MATCH syntax) instead of a table scan.
        #[arg(long = "match", value_name = "FTS_QUERY")]
        matching: Option<String>,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,

        /// Oldest first instead of newest first.
        #[arg(long)]
        asc: bool,
    },

    /// Materialise a derived store by filtering another store's events.
    Derive {
        /// Source store.
        #[arg(long)]
        from: String,

        /// Target (view) store; created with --create.
        #[arg(long)]
        to: String,

        #[arg(long)]
        filter: String,

        #[arg(long, default_value = "event-time")]
        mode: DeriveMode,

        /// Create the target store if it does not exist.
        #[arg(long)]
        create: bool,
    },

    /// Inspect derived-view freshness.
    #[command(subcommand)]
    View(ViewCmd),

    /// Work with filter expressions.
    #[command(subcommand)]
    Filter(FilterCmd),

    /// Periodically re-sync (and optionally re-derive) until interrupted.
    Watch {
        store: String,

        #[command(flatten)]
        source: SourceOpts,

        #[arg(long)]
        filter: Option<String>,

        /// Also keep this derived store fresh after each sync pass.
        #[arg(long)]
        derive_to: Option<String>,

        #[arg(long, default_value = "60")]
        interval_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum StoreCmd {
    Create {
        name: String,
    },
    List,
    /// Counts, checkpoints, sources and disk usage of one store.
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Rebuild the post index by replaying the event log from the start.
    Rebuild {
        name: String,
    },
    /// Show event-log entries: the tail of the log, or one post's history.
    Events {
        name: String,

        /// Restrict to the history of this post URI.
        #[arg(long, value_name = "AT_URI")]
        uri: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Attach a source to the store so `sync` without flags covers it.
    AddSource {
        name: String,

        #[command(flatten)]
        source: SourceOpts,
    },
}

#[derive(Debug, Subcommand)]
pub enum ViewCmd {
    /// Report whether a view is stale with respect to its source.
    Status {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        filter: String,

        #[arg(long, default_value = "event-time")]
        mode: DeriveMode,
    },
}

#[derive(Debug, Subcommand)]
pub enum FilterCmd {
    /// Parse + validate, print the canonical JSON and hash.
    Compile { expr: String },
    /// Parse + validate, report success.
    Validate { expr: String },
    /// Explain the expression tree in plain words.
    Describe { expr: String },
    /// Save an expression under a name for `@name` references.
    Save { name: String, expr: String },
    /// List saved filters with their hashes.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeriveMode {
    EventTime,
    DeriveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthorFilterArg {
    PostsWithReplies,
    PostsNoReplies,
    PostsWithMedia,
    PostsAndAuthorThreads,
}

/// Where posts come from. Exactly one may be given; with none, `sync` runs
/// every enabled source attached to the store.
#[derive(Debug, Args, Clone)]
pub struct SourceOpts {
    #[arg(long)]
    pub timeline: bool,

    #[arg(long, value_name = "AT_URI")]
    pub feed: Option<String>,

    #[arg(long, value_name = "AT_URI")]
    pub list: Option<String>,

    #[arg(long, value_name = "ACTOR")]
    pub author: Option<String>,

    /// Narrow an author feed (requires --author).
    #[arg(long, value_name = "KIND", requires = "author")]
    pub author_filter: Option<AuthorFilterArg>,

    /// Include pinned posts in an author feed (requires --author).
    #[arg(long, requires = "author")]
    pub include_pins: bool,

    #[arg(long, value_name = "AT_URI")]
    pub thread: Option<String>,

    #[arg(long)]
    pub notifications: bool,

    /// Replay raw records from an NDJSON capture instead of the remote API.
    #[arg(long, value_name = "PATH")]
    pub from_file: Option<PathBuf>,

    /// Replay jetstream frames from an NDJSON capture.
    #[arg(long, value_name = "PATH", conflicts_with = "from_file")]
    pub from_jetstream: Option<PathBuf>,
}
