mod cli;
mod error;
mod filter_lib;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use futures::StreamExt as _;
use serde_json::json;
use skygent_core::{AtUri, DataSource, StoreName, StoreSource, Timestamp, error_chain};
use skygent_filter::{
    Capabilities, FilterExpr, FilterHash, Predicate, compile, expr_hash, parse_dsl, parse_json,
};
use skygent_store::{EvaluationMode, QueryOpts, SortOrder, StoreManager, merge_stores};
use skygent_sync::{
    CommitMode, DeriveOptions, HttpLinkValidator, JetstreamCaptureSource, NdjsonFileSource,
    PostSource, ResourceMonitor, SyncOptions, SyncReporter as _, SyncResult, TracingReporter,
    derive, is_stale, sync_source,
};
use snafu::ResultExt as _;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    DeriveMode, FilterCmd, GlobalOpts, LogFormat, Opts, OptsCmd, SourceOpts, StoreCmd, ViewCmd,
};
use crate::error::{CliError, CliResult, IoSnafu, json_errors_enabled};
use crate::filter_lib::FsFilterLibrary;

pub const PROJECT_NAME: &str = "skygent";
pub const LOG_TARGET: &str = "skygent::cli";

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();

    if let Err(message) = init_logging(opts.global.log_format) {
        eprintln!("error: {message}");
        return ExitCode::from(2);
    }

    match handle_cmd(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_errors_enabled() {
                eprintln!(
                    "{}",
                    serde_json::to_string(&err.envelope()).expect("envelopes serialize")
                );
            } else {
                eprintln!("error: {}", error_chain(&err));
                if let Some(suggestion) = err.envelope()["error"]["suggestion"].as_str() {
                    eprintln!("  hint: {suggestion}");
                }
            }
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(format: LogFormat) -> Result<(), String> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    let result = match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|_| "Failed to initialize logging".to_owned())
}

/// Everything a command handler needs, resolved once.
struct Ctx {
    manager: StoreManager,
    root: PathBuf,
    global: GlobalOpts,
}

impl Ctx {
    fn new(global: GlobalOpts) -> CliResult<Self> {
        let root = match &global.store_root {
            Some(root) => root.clone(),
            None => directories::ProjectDirs::from("", "", PROJECT_NAME)
                .map(|dirs| dirs.data_dir().to_owned())
                .ok_or_else(|| {
                    CliError::config("cannot determine a data directory; set --store-root")
                })?,
        };
        Ok(Self {
            manager: StoreManager::new(root.clone()),
            root,
            global,
        })
    }

    fn library(&self) -> FsFilterLibrary {
        FsFilterLibrary::new(&self.root)
    }

    /// Accepts the compact DSL, `@name` references, or raw tagged JSON.
    fn parse_filter(&self, input: &str) -> CliResult<(FilterExpr, Predicate, FilterHash)> {
        let expr = if input.trim_start().starts_with('{') {
            parse_json(input).map_err(skygent_filter::DslParseError::from)?
        } else {
            parse_dsl(input, Timestamp::now(), &self.library())?
        };
        let predicate = compile(&expr)?;
        let hash = expr_hash(&expr);
        Ok((expr, predicate, hash))
    }

    fn sync_options(&self, strict: bool, max_errors: Option<u64>, refresh: bool) -> SyncOptions {
        let defaults = SyncOptions::default();
        SyncOptions {
            concurrency: self.global.sync_concurrency.unwrap_or(defaults.concurrency),
            batch_size: self.global.sync_batch_size.unwrap_or(defaults.batch_size),
            page_limit: self.global.sync_page_limit.unwrap_or(defaults.page_limit),
            checkpoint_every: self
                .global
                .checkpoint_every
                .unwrap_or(defaults.checkpoint_every),
            checkpoint_interval: self
                .global
                .checkpoint_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkpoint_interval),
            max_errors,
            strict,
            mode: if refresh {
                CommitMode::Refresh
            } else {
                CommitMode::Dedupe
            },
            command_label: "sync".to_owned(),
        }
    }

    fn resource_monitor(&self) -> ResourceMonitor {
        ResourceMonitor::new(
            &self.root,
            env_u64("SKYGENT_RESOURCE_MAX_STORE_BYTES"),
            env_u64("SKYGENT_RESOURCE_MAX_RSS_BYTES"),
        )
    }

    fn derive_options(&self) -> DeriveOptions {
        let defaults = DeriveOptions::default();
        DeriveOptions {
            checkpoint_every: env_u64("SKYGENT_DERIVATION_CHECKPOINT_EVERY")
                .unwrap_or(defaults.checkpoint_every),
            checkpoint_interval: env_u64("SKYGENT_DERIVATION_CHECKPOINT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkpoint_interval),
            ..defaults
        }
    }
}

fn env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok()?.parse().ok()
}

/// How long ago a checkpoint was written, coarsely; past two months the
/// relative form stops being useful and the absolute timestamp is shown.
fn age_since(now: Timestamp, then: Timestamp) -> String {
    let seconds = now.elapsed_since(then).whole_seconds().max(0) as u64;
    match seconds {
        0..=9 => "just now".to_owned(),
        10..=119 => format!("{seconds}s ago"),
        120..=7_199 => format!("{}m ago", seconds / 60),
        7_200..=172_799 => format!("{}h ago", seconds / 3_600),
        172_800..=5_183_999 => format!("{}d ago", seconds / 86_400),
        _ => then.to_rfc3339(),
    }
}

fn parse_store_name(name: &str) -> CliResult<StoreName> {
    name.parse()
        .map_err(|e: skygent_core::IdParseError| CliError::input(e.to_string()))
}

fn parse_cli_timestamp(s: &str) -> CliResult<Timestamp> {
    Timestamp::parse_rfc3339(s)
        .or_else(|_| Timestamp::parse_rfc3339(&format!("{s}T00:00:00Z")))
        .map_err(|_| {
            CliError::input(format!(
                "invalid timestamp `{s}`; use RFC-3339 or YYYY-MM-DD"
            ))
        })
}

fn source_from_opts(opts: &SourceOpts) -> CliResult<Option<DataSource>> {
    let mut sources = Vec::new();
    if opts.timeline {
        sources.push(DataSource::Timeline);
    }
    if let Some(uri) = &opts.feed {
        sources.push(DataSource::Feed {
            uri: parse_at_uri(uri)?,
        });
    }
    if let Some(uri) = &opts.list {
        sources.push(DataSource::List {
            uri: parse_at_uri(uri)?,
        });
    }
    if let Some(actor) = &opts.author {
        sources.push(DataSource::Author {
            actor: actor.clone(),
            filter: opts.author_filter.map(|f| match f {
                cli::AuthorFilterArg::PostsWithReplies => {
                    skygent_core::AuthorFeedFilter::PostsWithReplies
                }
                cli::AuthorFilterArg::PostsNoReplies => {
                    skygent_core::AuthorFeedFilter::PostsNoReplies
                }
                cli::AuthorFilterArg::PostsWithMedia => {
                    skygent_core::AuthorFeedFilter::PostsWithMedia
                }
                cli::AuthorFilterArg::PostsAndAuthorThreads => {
                    skygent_core::AuthorFeedFilter::PostsAndAuthorThreads
                }
            }),
            include_pins: opts.include_pins,
        });
    }
    if let Some(uri) = &opts.thread {
        sources.push(DataSource::Thread {
            uri: parse_at_uri(uri)?.into(),
            depth: None,
            parent_height: None,
        });
    }
    if opts.notifications {
        sources.push(DataSource::Notifications);
    }

    match sources.len() {
        0 => Ok(None),
        1 => Ok(sources.pop()),
        _ => Err(CliError::input(
            "give at most one of --timeline/--feed/--list/--author/--thread/--notifications",
        )),
    }
}

fn parse_at_uri(s: &str) -> CliResult<AtUri> {
    AtUri::new(s).map_err(|e| CliError::input(e.to_string()))
}

async fn handle_cmd(opts: Opts) -> CliResult<()> {
    let format = opts.global.output_format;
    let compact = opts.global.compact;
    let ctx = Ctx::new(opts.global)?;

    match opts.cmd {
        OptsCmd::Store(cmd) => handle_store_cmd(&ctx, cmd, format).await,
        OptsCmd::Sync {
            store,
            source,
            filter,
            refresh,
            strict,
            max_errors,
        } => {
            let name = parse_store_name(&store)?;
            let store = ctx.manager.open(&name).await?;

            let parsed = filter.as_deref().map(|f| ctx.parse_filter(f)).transpose()?;
            let (predicate, hash) = match &parsed {
                Some((_, predicate, hash)) => (Some(predicate), Some(hash)),
                None => (None, None),
            };

            let api = file_source(&source)?;
            let sync_opts = ctx.sync_options(strict, max_errors, refresh);
            let reporter = TracingReporter;

            for warning in ctx.resource_monitor().check().await {
                reporter.warning(&warning);
            }

            let sources = match source_from_opts(&source)? {
                Some(explicit) => {
                    // Remember explicitly-synced sources so a later bare
                    // `sync` covers them, without clobbering a disable.
                    if store.get_source(&explicit).await?.is_none() {
                        store
                            .add_source(StoreSource::new(explicit.clone(), Timestamp::now()))
                            .await?;
                    }
                    vec![explicit]
                }
                None => {
                    let attached: Vec<DataSource> = store
                        .list_sources()
                        .await?
                        .into_iter()
                        .filter(|s| s.enabled)
                        .map(|s| s.source)
                        .collect();
                    if attached.is_empty() {
                        return Err(CliError::input(
                            "store has no enabled sources; pass one (e.g. --timeline)",
                        ));
                    }
                    attached
                }
            };

            let caps = Capabilities::none();
            let validator = HttpLinkValidator::default();
            let caps = Capabilities {
                link_validator: Some(&validator),
                ..caps
            };

            let mut combined = SyncResult::ZERO;
            for data_source in &sources {
                let result = sync_source(
                    &store,
                    data_source,
                    predicate,
                    hash,
                    api.as_ref(),
                    &caps,
                    None,
                    &reporter,
                    &sync_opts,
                )
                .await?;
                combined = combined.combine(result);
            }

            output::print_sync_result(&combined, format);
            Ok(())
        }
        OptsCmd::Query {
            stores,
            filter,
            matching,
            since,
            until,
            limit,
            asc,
        } => {
            let mut handles = Vec::new();
            for name in stores.split(',').filter(|s| !s.is_empty()) {
                let name = parse_store_name(name.trim())?;
                handles.push(ctx.manager.open(&name).await?);
            }
            if handles.is_empty() {
                return Err(CliError::input("no stores given"));
            }

            let parsed = filter.as_deref().map(|f| ctx.parse_filter(f)).transpose()?;
            let predicate = parsed.map(|(_, predicate, _)| Arc::new(predicate));
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };

            let hits = if let Some(match_query) = &matching {
                search_stores(&handles, match_query, predicate.as_deref(), order, limit).await?
            } else {
                let query_opts = QueryOpts {
                    since: since.as_deref().map(parse_cli_timestamp).transpose()?,
                    until: until.as_deref().map(parse_cli_timestamp).transpose()?,
                    scan_limit: None,
                    order,
                };

                let stream = merge_stores(handles, query_opts, predicate);
                let mut stream = std::pin::pin!(stream.take(limit));
                let mut hits = Vec::new();
                while let Some(hit) = stream.next().await {
                    hits.push(hit?);
                }
                hits
            };

            output::print_hits(&hits, format, compact);
            Ok(())
        }
        OptsCmd::Derive {
            from,
            to,
            filter,
            mode,
            create,
        } => {
            let source_name = parse_store_name(&from)?;
            let target_name = parse_store_name(&to)?;
            let source_store = ctx.manager.open(&source_name).await?;
            let target_store = if create {
                match ctx.manager.open(&target_name).await {
                    Ok(store) => store,
                    Err(skygent_store::StoreManagerError::StoreNotFound { .. }) => {
                        ctx.manager.create(&target_name).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                ctx.manager.open(&target_name).await?
            };

            let (_, predicate, hash) = ctx.parse_filter(&filter)?;
            let mode = match mode {
                DeriveMode::EventTime => EvaluationMode::EventTime,
                DeriveMode::DeriveTime => EvaluationMode::DeriveTime,
            };

            let validator = HttpLinkValidator::default();
            let caps = Capabilities {
                link_validator: Some(&validator),
                trending: None,
            };

            let result = derive(
                &source_store,
                &target_store,
                &predicate,
                &hash,
                mode,
                &caps,
                &ctx.derive_options(),
            )
            .await?;

            output::print_value(
                &json!({
                    "view": target_name.as_str(),
                    "sourceStore": source_name.as_str(),
                    "eventsProcessed": result.events_processed,
                    "eventsMatched": result.events_matched,
                    "deletesPropagated": result.deletes_propagated,
                    "lastSourceEventSeq": result.last_source_event_seq.0,
                }),
                format,
            );
            Ok(())
        }
        OptsCmd::View(ViewCmd::Status {
            from,
            to,
            filter,
            mode,
        }) => {
            let source_store = ctx.manager.open(&parse_store_name(&from)?).await?;
            let target_store = ctx.manager.open(&parse_store_name(&to)?).await?;
            let (_, _, hash) = ctx.parse_filter(&filter)?;
            let mode = match mode {
                DeriveMode::EventTime => EvaluationMode::EventTime,
                DeriveMode::DeriveTime => EvaluationMode::DeriveTime,
            };

            let stale = is_stale(&source_store, &target_store, &hash, mode).await?;
            let checkpoint = target_store
                .load_derivation_checkpoint(target_store.name(), source_store.name())
                .await?;
            let source_tail = source_store.last_event_seq().await?;

            output::print_value(
                &json!({
                    "view": target_store.name().as_str(),
                    "sourceStore": source_store.name().as_str(),
                    "stale": stale,
                    "sourceLastEventSeq": source_tail.map(|s| s.0),
                    "checkpoint": checkpoint,
                }),
                format,
            );
            Ok(())
        }
        OptsCmd::Filter(cmd) => handle_filter_cmd(&ctx, cmd, format),
        OptsCmd::Watch {
            store,
            source,
            filter,
            derive_to,
            interval_secs,
        } => {
            handle_watch(
                &ctx,
                &store,
                &source,
                filter.as_deref(),
                derive_to.as_deref(),
                interval_secs,
                format,
            )
            .await
        }
    }
}

async fn handle_store_cmd(
    ctx: &Ctx,
    cmd: StoreCmd,
    format: cli::OutputFormat,
) -> CliResult<()> {
    match cmd {
        StoreCmd::Create { name } => {
            let name = parse_store_name(&name)?;
            ctx.manager.create(&name).await?;
            output::print_value(&json!({ "created": name.as_str() }), format);
            Ok(())
        }
        StoreCmd::List => {
            let names: Vec<String> = ctx
                .manager
                .list()
                .await?
                .into_iter()
                .map(|n| n.into_string())
                .collect();
            output::print_value(&json!(names), format);
            Ok(())
        }
        StoreCmd::Show { name } => {
            let name = parse_store_name(&name)?;
            let store = ctx.manager.open(&name).await?;

            let sources: Vec<_> = store.list_sources().await?;
            let now = Timestamp::now();
            let sync_checkpoints: Vec<_> = store
                .list_sync_checkpoints()
                .await?
                .into_iter()
                .map(|cp| {
                    json!({
                        "sourceKey": cp.source.source_key(),
                        "cursor": cp.cursor,
                        "lastEventSeq": cp.last_event_seq.map(|s| s.0),
                        "filterHash": cp.filter_hash,
                        "age": age_since(now, cp.updated_at),
                    })
                })
                .collect();
            let derivations = store.list_derivation_checkpoints().await?;
            let disk = ctx.manager.store_disk_usage(&name).await?;

            output::print_value(
                &json!({
                    "name": name.as_str(),
                    "posts": store.post_count().await?,
                    "events": store.event_count().await?,
                    "lastEventSeq": store.last_event_seq().await?.map(|s| s.0),
                    "indexCheckpoint": store
                        .index_checkpoint()
                        .await?
                        .map(|c| json!({
                            "lastEventSeq": c.last_event_seq.0,
                            "eventCount": c.event_count,
                        })),
                    "sources": sources,
                    "syncCheckpoints": sync_checkpoints,
                    "derivationCheckpoints": derivations,
                    "diskBytes": disk,
                    "diskHuman": skygent_sync::human_bytes(disk),
                }),
                format,
            );
            Ok(())
        }
        StoreCmd::Delete { name } => {
            let name = parse_store_name(&name)?;
            ctx.manager.delete(&name).await?;
            output::print_value(&json!({ "deleted": name.as_str() }), format);
            Ok(())
        }
        StoreCmd::Rebuild { name } => {
            let name = parse_store_name(&name)?;
            let store = ctx.manager.open(&name).await?;
            let applied = store.rebuild_index().await?;
            output::print_value(
                &json!({ "rebuilt": name.as_str(), "eventsApplied": applied }),
                format,
            );
            Ok(())
        }
        StoreCmd::Events { name, uri, limit } => {
            let name = parse_store_name(&name)?;
            let store = ctx.manager.open(&name).await?;
            let entries = match uri {
                Some(uri) => {
                    let uri = parse_at_uri(&uri)?.into();
                    store.events_for_post(&uri, limit).await?
                }
                None => {
                    // Tail of the log: start `limit` entries before the end.
                    let tail = store.last_event_seq().await?.map(|s| s.0).unwrap_or(0);
                    let after = skygent_core::EventSeq(tail.saturating_sub(limit as u64));
                    store.events_after(after, limit).await?
                }
            };
            output::print_value(&serde_json::to_value(&entries).expect("entries serialize"), format);
            Ok(())
        }
        StoreCmd::AddSource { name, source } => {
            let name = parse_store_name(&name)?;
            let store = ctx.manager.open(&name).await?;
            let Some(data_source) = source_from_opts(&source)? else {
                return Err(CliError::input(
                    "pass the source to attach (e.g. --timeline)",
                ));
            };
            store
                .add_source(StoreSource::new(data_source.clone(), Timestamp::now()))
                .await?;
            output::print_value(
                &json!({ "store": name.as_str(), "added": data_source.source_key() }),
                format,
            );
            Ok(())
        }
    }
}

fn handle_filter_cmd(ctx: &Ctx, cmd: FilterCmd, format: cli::OutputFormat) -> CliResult<()> {
    match cmd {
        FilterCmd::Compile { expr } => {
            let (expr, _, hash) = ctx.parse_filter(&expr)?;
            output::print_value(
                &json!({
                    "expr": expr,
                    "hash": hash.as_str(),
                    "eventTimeCompatible": expr.is_event_time_compatible(),
                }),
                format,
            );
            Ok(())
        }
        FilterCmd::Validate { expr } => {
            ctx.parse_filter(&expr)?;
            output::print_value(&json!({ "valid": true }), format);
            Ok(())
        }
        FilterCmd::Describe { expr } => {
            let (expr, _, _) = ctx.parse_filter(&expr)?;
            println!("{}", describe_expr(&expr, 0));
            Ok(())
        }
        FilterCmd::Save { name, expr } => {
            let (expr, _, hash) = ctx.parse_filter(&expr)?;
            let path = ctx.library().save(&name, &expr).context(IoSnafu)?;
            output::print_value(
                &json!({
                    "saved": name,
                    "hash": hash.as_str(),
                    "path": path.display().to_string(),
                }),
                format,
            );
            Ok(())
        }
        FilterCmd::List => {
            let entries: Vec<_> = ctx
                .library()
                .list()
                .context(IoSnafu)?
                .into_iter()
                .map(|(name, hash)| json!({ "name": name, "hash": hash.as_str() }))
                .collect();
            output::print_value(&json!(entries), format);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_watch(
    ctx: &Ctx,
    store: &str,
    source: &SourceOpts,
    filter: Option<&str>,
    derive_to: Option<&str>,
    interval_secs: u64,
    format: cli::OutputFormat,
) -> CliResult<()> {
    let name = parse_store_name(store)?;
    let store = ctx.manager.open(&name).await?;
    let api = file_source(source)?;
    let explicit = source_from_opts(source)?;
    let parsed = filter.map(|f| ctx.parse_filter(f)).transpose()?;
    let derive_target = match derive_to {
        Some(to) => Some(ctx.manager.open(&parse_store_name(to)?).await?),
        None => None,
    };
    if derive_target.is_some() && parsed.is_none() {
        return Err(CliError::input("--derive-to needs --filter"));
    }

    let reporter = TracingReporter;
    let sync_opts = ctx.sync_options(false, None, false);
    let validator = HttpLinkValidator::default();
    let caps = Capabilities {
        link_validator: Some(&validator),
        trending: None,
    };
    let monitor = ctx.resource_monitor();
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => (),
            _ = tokio::signal::ctrl_c() => break,
        }

        for warning in monitor.check().await {
            reporter.warning(&warning);
        }

        let sources = match &explicit {
            Some(s) => vec![s.clone()],
            None => store
                .list_sources()
                .await?
                .into_iter()
                .filter(|s| s.enabled)
                .map(|s| s.source)
                .collect(),
        };

        let (predicate, hash) = match &parsed {
            Some((_, predicate, hash)) => (Some(predicate), Some(hash)),
            None => (None, None),
        };
        let mut combined = SyncResult::ZERO;
        for data_source in &sources {
            let result = sync_source(
                &store,
                data_source,
                predicate,
                hash,
                api.as_ref(),
                &caps,
                None,
                &reporter,
                &sync_opts,
            )
            .await?;
            combined = combined.combine(result);
        }
        output::print_sync_result(&combined, format);

        if let (Some(target), Some((_, predicate, hash))) = (&derive_target, &parsed) {
            derive(
                &store,
                target,
                predicate,
                hash,
                EvaluationMode::EventTime,
                &caps,
                &ctx.derive_options(),
            )
            .await?;
        }

        tracing::info!(
            target: LOG_TARGET,
            store = %name,
            added = combined.posts_added,
            skipped = combined.posts_skipped,
            "Watch pass complete"
        );
    }
    Ok(())
}

/// Full-text search each store, then order and truncate the combined hits
/// under the same total order the merge uses.
async fn search_stores(
    stores: &[Arc<skygent_store::Store>],
    match_query: &str,
    predicate: Option<&Predicate>,
    order: SortOrder,
    limit: usize,
) -> CliResult<Vec<skygent_store::QueryHit>> {
    let mut hits = Vec::new();
    for store in stores {
        for post in store.search_posts(match_query, limit).await? {
            if let Some(predicate) = predicate {
                if !predicate.evaluate_pure(&post)? {
                    continue;
                }
            }
            hits.push(skygent_store::QueryHit {
                store: store.name().clone(),
                post,
            });
        }
    }
    hits.sort_by(|a, b| {
        let key = |h: &skygent_store::QueryHit| {
            (
                h.post.created_at,
                h.post.uri.as_str().to_owned(),
                h.store.as_str().to_owned(),
            )
        };
        match order {
            SortOrder::Asc => key(a).cmp(&key(b)),
            SortOrder::Desc => key(b).cmp(&key(a)),
        }
    });
    hits.truncate(limit);
    Ok(hits)
}

fn file_source(source: &SourceOpts) -> CliResult<Box<dyn PostSource>> {
    if let Some(path) = &source.from_file {
        return Ok(Box::new(NdjsonFileSource::new(path)));
    }
    if let Some(path) = &source.from_jetstream {
        return Ok(Box::new(JetstreamCaptureSource::new(path)));
    }
    // The remote Bluesky client is a separate component; this binary only
    // ships the capture replay sources.
    Err(CliError::config(
        "no post source available: pass --from-file or --from-jetstream \
         (the remote API client is not part of this build)",
    ))
}

fn describe_expr(expr: &FilterExpr, depth: usize) -> String {
    let pad = "  ".repeat(depth);
    match expr {
        FilterExpr::All => format!("{pad}every post"),
        FilterExpr::None => format!("{pad}no post"),
        FilterExpr::Author { handle } => format!("{pad}authored by @{handle}"),
        FilterExpr::AuthorIn { handles } => {
            let list: Vec<String> = handles.iter().map(|h| format!("@{h}")).collect();
            format!("{pad}authored by any of {}", list.join(", "))
        }
        FilterExpr::Hashtag { tag } => format!("{pad}tagged {tag}"),
        FilterExpr::HashtagIn { tags } => {
            let list: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            format!("{pad}tagged any of {}", list.join(", "))
        }
        FilterExpr::Contains {
            text,
            case_sensitive,
        } => format!(
            "{pad}text contains {text:?}{}",
            if *case_sensitive { " (case-sensitive)" } else { "" }
        ),
        FilterExpr::IsReply => format!("{pad}is a reply"),
        FilterExpr::IsQuote => format!("{pad}is a quote"),
        FilterExpr::IsRepost => format!("{pad}is a repost"),
        FilterExpr::IsOriginal => format!("{pad}is an original post"),
        FilterExpr::HasImages => format!("{pad}has images"),
        FilterExpr::MinImages { n } => format!("{pad}has at least {n} images"),
        FilterExpr::HasAltText => format!("{pad}images carry alt text"),
        FilterExpr::NoAltText => format!("{pad}images lack alt text"),
        FilterExpr::AltText { text } => format!("{pad}alt text contains {text:?}"),
        FilterExpr::AltTextRegex { pattern } => {
            format!("{pad}alt text matches /{pattern}/")
        }
        FilterExpr::HasVideo => format!("{pad}has video"),
        FilterExpr::HasLinks => format!("{pad}has links"),
        FilterExpr::LinkContains { text } => format!("{pad}a link contains {text:?}"),
        FilterExpr::LinkRegex { pattern } => format!("{pad}a link matches /{pattern}/"),
        FilterExpr::HasMedia => format!("{pad}has media"),
        FilterExpr::HasEmbed => format!("{pad}has an embed"),
        FilterExpr::Language { langs } => {
            format!("{pad}written in {}", langs.join(" or "))
        }
        FilterExpr::Regex { patterns, flags } => format!(
            "{pad}text matches any of /{}/{}",
            patterns.join("/, /"),
            flags.as_deref().unwrap_or("")
        ),
        FilterExpr::DateRange { start, end } => {
            format!("{pad}created between {start} and {end}")
        }
        FilterExpr::Engagement {
            min_likes,
            min_reposts,
            min_replies,
            min_quotes,
        } => {
            let mut parts = Vec::new();
            if let Some(n) = min_likes {
                parts.push(format!("{n}+ likes"));
            }
            if let Some(n) = min_reposts {
                parts.push(format!("{n}+ reposts"));
            }
            if let Some(n) = min_replies {
                parts.push(format!("{n}+ replies"));
            }
            if let Some(n) = min_quotes {
                parts.push(format!("{n}+ quotes"));
            }
            format!("{pad}has {}", parts.join(" and "))
        }
        FilterExpr::HasValidLinks { .. } => format!("{pad}all links resolve"),
        FilterExpr::Trending { tag, .. } => format!("{pad}{tag} is trending"),
        FilterExpr::Not { expr } => {
            format!("{pad}NOT:\n{}", describe_expr(expr, depth + 1))
        }
        FilterExpr::And { left, right } => format!(
            "{pad}ALL of:\n{}\n{}",
            describe_expr(left, depth + 1),
            describe_expr(right, depth + 1)
        ),
        FilterExpr::Or { left, right } => format!(
            "{pad}ANY of:\n{}\n{}",
            describe_expr(left, depth + 1),
            describe_expr(right, depth + 1)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_ages_render_coarsely_then_absolutely() {
        let now = Timestamp::parse_rfc3339("2026-03-01T12:00:00Z").unwrap();
        let at = |s: &str| Timestamp::parse_rfc3339(s).unwrap();

        assert_eq!(age_since(now, at("2026-03-01T11:59:55Z")), "just now");
        assert_eq!(age_since(now, at("2026-03-01T11:59:15Z")), "45s ago");
        assert_eq!(age_since(now, at("2026-03-01T11:30:00Z")), "30m ago");
        assert_eq!(age_since(now, at("2026-03-01T00:00:00Z")), "12h ago");
        assert_eq!(age_since(now, at("2026-02-20T12:00:00Z")), "9d ago");
        assert_eq!(
            age_since(now, at("2025-11-01T00:00:00Z")),
            "2025-11-01T00:00:00Z"
        );
        // A checkpoint "from the future" (clock skew) renders as fresh.
        assert_eq!(age_since(now, at("2026-03-01T12:00:05Z")), "just now");
    }
}
