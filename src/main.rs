//! pathreview - review a migration diff before copying.
//!
//! Usage:
//!   pathreview ls [PATH]                 List a folder of the diff
//!   pathreview search [TEXT]             Filtered, sorted list view
//!   pathreview exclude PATH...           Exclude nodes from the copy
//!   pathreview retry PATH...             Mark failed nodes for retry
//!   pathreview bulk-exclude FOLDER       Exclude the folder's selection
//!   pathreview watch                     Follow status, metrics and logs
//!   pathreview phase TARGET              Move the migration to another phase
//!   pathreview stats                     Review totals and the copy gate

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use itertools::Itertools;
use tracing_subscriber::EnvFilter;

use pathreview_api::{HttpReviewApi, LogLevel, ReviewApi};
use pathreview_core::{
    Comparison, DiffNode, MigrationPhase, NodeKey, ReviewConfig, SearchField, SearchQuery,
    SizeUnit, SortDir, SortField, StatusFilter, TypeFilter, normalize_path, resolve,
};
use pathreview_ops::{LedgerOutcome, MutationKind};
use pathreview_sync::{LoadOutcome, LogLine, ReviewSession, SyncEvent};

#[derive(Parser)]
#[command(
    name = "pathreview",
    version,
    about = "Review and edit a migration diff before copying",
    long_about = "pathreview talks to a running migration backend.\n\n\
                  Browse the discovered diff, exclude or retry nodes, follow the \
                  run's progress, and start the copy once review is done."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Migration to review (defaults to `migration_id` from the config file)
    #[arg(short, long, global = true)]
    migration: Option<String>,

    /// Backend base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Bearer token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Command {
    /// List the children of a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Load every page instead of the first
        #[arg(short, long)]
        all: bool,

        /// Include nodes that only exist on the destination
        #[arg(long)]
        dst_only: bool,

        #[arg(short = 'n', long)]
        page_size: Option<u64>,
    },

    /// Search the diff with filters
    Search(SearchArgs),

    /// Exclude nodes (and their descendants) from the copy
    Exclude { paths: Vec<String> },

    /// Undo an exclusion
    Unexclude { paths: Vec<String> },

    /// Mark failed nodes for retry
    Retry { paths: Vec<String> },

    /// Clear a retry mark
    Unretry { paths: Vec<String> },

    /// Exclude the selected children of a folder in one call
    BulkExclude(BulkArgs),

    /// Undo exclusions on the selected children of a folder in one call
    BulkUnexclude(BulkArgs),

    /// Follow status, queue metrics and logs until the run settles
    Watch {
        /// Only show these log levels
        #[arg(short, long)]
        level: Vec<LogLevel>,

        /// Do not print log lines
        #[arg(long)]
        no_logs: bool,
    },

    /// Move the migration to another phase
    Phase {
        /// Target phase, e.g. copy-in-progress
        target: MigrationPhase,

        /// Skip the copy readiness checks
        #[arg(long)]
        force: bool,
    },

    /// Show review totals and whether copying can start
    Stats,
}

#[derive(Args)]
struct SearchArgs {
    /// Free-text query
    text: Option<String>,

    /// Match the query against names instead of full paths
    #[arg(long)]
    name: bool,

    #[arg(short = 't', long = "type", default_value = "both")]
    type_filter: TypeFilter,

    /// Depth filter, e.g. `lte:3`
    #[arg(long)]
    depth: Option<String>,

    /// Size filter, e.g. `gt:10MB`
    #[arg(long)]
    size: Option<String>,

    #[arg(short, long)]
    status: Option<StatusFilter>,

    #[arg(long)]
    sort: Option<SortField>,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    /// Zero-based page to show
    #[arg(short, long, default_value = "0")]
    page: u64,

    #[arg(short = 'n', long)]
    page_size: Option<u64>,
}

#[derive(Args)]
struct BulkArgs {
    /// Folder whose children are edited
    folder: String,

    /// Only these child names (default: the folder's default selection)
    #[arg(short, long)]
    select: Vec<String>,

    /// Every child of the folder
    #[arg(short, long, conflicts_with = "select")]
    all: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.global.format;
    let (page_size, show_dst_only) = match &cli.command {
        Command::Ls {
            page_size,
            dst_only,
            ..
        } => (*page_size, *dst_only),
        Command::Search(args) => (args.page_size, false),
        _ => (None, false),
    };
    let mut session = open_session(&cli.global, page_size, show_dst_only)?;
    session
        .refresh_status()
        .await
        .context("Could not read migration status")?;

    match cli.command {
        Command::Ls { path, all, .. } => run_ls(&mut session, &path, all, format).await?,
        Command::Search(args) => run_search(&mut session, args, format).await?,
        Command::Exclude { paths } => run_edit(&mut session, &paths, MutationKind::Exclude).await?,
        Command::Unexclude { paths } => {
            run_edit(&mut session, &paths, MutationKind::Unexclude).await?
        }
        Command::Retry { paths } => run_edit(&mut session, &paths, MutationKind::MarkRetry).await?,
        Command::Unretry { paths } => {
            run_edit(&mut session, &paths, MutationKind::UnmarkRetry).await?
        }
        Command::BulkExclude(args) => run_bulk(&mut session, args, MutationKind::Exclude).await?,
        Command::BulkUnexclude(args) => {
            run_bulk(&mut session, args, MutationKind::Unexclude).await?
        }
        Command::Watch { level, no_logs } => run_watch(&mut session, level, no_logs, format).await?,
        Command::Phase { target, force } => run_phase(&mut session, target, force).await?,
        Command::Stats => run_stats(&mut session, format).await?,
    }

    session.close();
    Ok(())
}

/// Config file, then environment, then flags.
fn open_session(
    args: &GlobalArgs,
    page_size: Option<u64>,
    show_dst_only: bool,
) -> Result<ReviewSession> {
    let mut config = ReviewConfig::load_default()
        .context("Invalid config file")?
        .with_env_overrides()
        .with_overrides(args.api_base.clone(), args.token.clone());
    if let Some(size) = page_size {
        config.page_size = size;
    }
    config.show_dst_only |= show_dst_only;
    config.validate().context("Invalid configuration")?;

    let migration = args
        .migration
        .clone()
        .or_else(|| config.migration_id.clone())
        .ok_or_else(|| eyre!("No migration given; pass --migration or set migration_id"))?;

    let api: Arc<dyn ReviewApi> =
        Arc::new(HttpReviewApi::new(&config).context("Could not create API client")?);
    Ok(ReviewSession::new(api, migration, config))
}

fn loaded(outcome: LoadOutcome) -> Result<usize> {
    match outcome {
        LoadOutcome::Replaced(n) | LoadOutcome::Appended(n) => Ok(n),
        LoadOutcome::Failed(err) => Err(err).context("Page load failed"),
        LoadOutcome::Discarded(stale) => bail!("Page discarded ({stale:?})"),
    }
}

/// Open `path` and load every page of it.
async fn load_folder(session: &mut ReviewSession, path: &str) -> Result<()> {
    let ticket = session.open_folder(path);
    loaded(session.load(ticket).await)?;
    while let Some(ticket) = session.load_more() {
        loaded(session.load(ticket).await)?;
    }
    Ok(())
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn same_path(node: &DiffNode, path: &str) -> bool {
    normalize_path(&node.location_path).trim_end_matches('/') == path
}

/// Find the node at `path` by loading its parent folder.
async fn locate(session: &mut ReviewSession, path: &str) -> Result<NodeKey> {
    let path = normalize_path(path).trim_end_matches('/').to_string();
    if path.is_empty() {
        bail!("The root itself cannot be edited");
    }
    load_folder(session, &parent_of(&path)).await?;
    session
        .window()
        .items()
        .iter()
        .find(|n| same_path(n, &path))
        .map(|n| n.id.clone())
        .ok_or_else(|| eyre!("No node at {path}"))
}

async fn run_ls(session: &mut ReviewSession, path: &str, all: bool, format: OutputFormat) -> Result<()> {
    if all {
        load_folder(session, path).await?;
    } else {
        let ticket = session.open_folder(path);
        loaded(session.load(ticket).await)?;
    }

    print_window(session, format)?;
    if format == OutputFormat::Text {
        eprintln!("{}", session.window().breadcrumbs().iter().join(" > "));
    }
    Ok(())
}

/// Parse `op:value`, e.g. `gte:3`.
fn split_filter(raw: &str) -> Result<(Comparison, &str)> {
    let (op, value) = raw
        .split_once(':')
        .ok_or_else(|| eyre!("Filter must look like `op:value`, got {raw:?}"))?;
    let op = op
        .parse::<Comparison>()
        .map_err(|_| eyre!("Unknown comparison {op:?}; use eq, gt, gte, lt or lte"))?;
    Ok((op, value.trim()))
}

/// Parse a size with an optional unit suffix (bytes, KB, MB, GB).
fn parse_size(raw: &str) -> Result<(f64, SizeUnit)> {
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .with_context(|| format!("Invalid size {raw:?}"))?;
    let unit = match unit.trim() {
        "" => SizeUnit::Bytes,
        unit => unit
            .parse::<SizeUnit>()
            .map_err(|_| eyre!("Unknown size unit {unit:?}"))?,
    };
    Ok((value, unit))
}

fn build_query(args: &SearchArgs) -> Result<SearchQuery> {
    let mut query = SearchQuery::new()
        .with_text(args.text.as_deref().unwrap_or(""))
        .with_field(if args.name {
            SearchField::Name
        } else {
            SearchField::Path
        })
        .with_type(args.type_filter);

    if let Some(depth) = &args.depth {
        let (op, value) = split_filter(depth)?;
        let value: u32 = value
            .parse()
            .with_context(|| format!("Invalid depth {value:?}"))?;
        query = query.with_depth(op, value);
    }
    if let Some(size) = &args.size {
        let (op, value) = split_filter(size)?;
        let (value, unit) = parse_size(value)?;
        query = query.with_size(op, value, unit)?;
    }
    if let Some(status) = args.status {
        query = query.with_status(status);
    }
    if let Some(field) = args.sort {
        let dir = if args.desc { SortDir::Desc } else { SortDir::Asc };
        query = query.with_sort(field, dir);
    }
    Ok(query)
}

async fn run_search(session: &mut ReviewSession, args: SearchArgs, format: OutputFormat) -> Result<()> {
    let query = build_query(&args)?;
    let ticket = session.search(query);
    loaded(session.load(ticket).await)?;
    if args.page > 0 {
        let ticket = session
            .goto_page(args.page)
            .ok_or_else(|| eyre!("Page {} is past the last page", args.page))?;
        loaded(session.load(ticket).await)?;
    }

    print_window(session, format)?;
    if format == OutputFormat::Text {
        let pagination = session.window().pagination();
        match pagination.total_pages() {
            Some(pages) => eprintln!("Page {} of {}", pagination.page_index() + 1, pages.max(1)),
            None => eprintln!("Page {}", pagination.page_index() + 1),
        }
        if let Some(stats) = session.stats() {
            eprintln!(
                "{} matching ({} folders, {} files, {})",
                stats.total_items(),
                stats.folders,
                stats.files,
                format_size(stats.total_size)
            );
        }
    }
    Ok(())
}

fn print_window(session: &ReviewSession, format: OutputFormat) -> Result<()> {
    let phase = session.phase();
    let items = session.window().items();

    match format {
        OutputFormat::Text => {
            for node in items {
                let resolution = resolve(node, phase);
                let marker = if session.selection().state_of(node).is_selected() {
                    "*"
                } else {
                    " "
                };
                let size = node
                    .display_size()
                    .map(format_size)
                    .unwrap_or_else(|| "-".to_string());
                let action = resolution
                    .action
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                println!(
                    "{marker} {} {:<14} {:>10}  {:<50} {}",
                    resolution.category.symbol(),
                    resolution.category.to_string(),
                    size,
                    truncate(&display_path(node), 50),
                    action
                );
            }
            if items.is_empty() {
                println!(" (empty)");
            }
        }
        OutputFormat::Json => {
            let rows: Vec<_> = items
                .iter()
                .map(|node| {
                    let resolution = resolve(node, phase);
                    serde_json::json!({
                        "id": node.id,
                        "path": node.location_path,
                        "type": node.node_type,
                        "category": resolution.category,
                        "action": resolution.action,
                        "size": node.display_size(),
                        "selected": session.selection().state_of(node).is_selected(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

async fn run_edit(session: &mut ReviewSession, paths: &[String], kind: MutationKind) -> Result<()> {
    if paths.is_empty() {
        bail!("No paths given");
    }

    for path in paths {
        let id = locate(session, path).await?;
        let seq = session
            .edit(&id, Some(kind))
            .await
            .with_context(|| format!("Cannot {kind} {path}"))?;
        session.settle().await;

        if let Some(notice) = session.take_notices().into_iter().next() {
            bail!("{kind} {path} failed: {notice}");
        }
        // Phase rejections roll back without a notice.
        if let Some(LedgerOutcome::RolledBack { reason }) = session.ledger().outcome(seq) {
            bail!("{kind} {path} was rejected: {reason}");
        }
        eprintln!("{kind}: {path}");
    }
    Ok(())
}

async fn run_bulk(session: &mut ReviewSession, args: BulkArgs, kind: MutationKind) -> Result<()> {
    let folder = normalize_path(&args.folder).into_owned();
    load_folder(session, &folder).await?;

    if args.all {
        session.clear_selection();
        session.toggle_page_select();
    } else if !args.select.is_empty() {
        session.clear_selection();
        for name in &args.select {
            let id = session
                .window()
                .items()
                .iter()
                .find(|n| n.name == name.as_str())
                .map(|n| n.id.clone())
                .ok_or_else(|| eyre!("No child named {name:?} in {folder}"))?;
            session.toggle_select(&id);
        }
    }

    let count = session.selection().normalized_ids().len();
    session
        .bulk(kind)
        .await
        .with_context(|| format!("Cannot bulk {kind} in {folder}"))?;
    session.settle().await;

    if let Some(notice) = session.take_notices().into_iter().next() {
        bail!("Bulk {kind} failed: {notice}");
    }
    eprintln!("bulk {kind}: {count} node(s) in {folder}");
    Ok(())
}

async fn run_watch(
    session: &mut ReviewSession,
    levels: Vec<LogLevel>,
    no_logs: bool,
    format: OutputFormat,
) -> Result<()> {
    let levels: BTreeSet<LogLevel> = levels.into_iter().collect();
    session.logs_mut().set_filter(Some(levels.clone()));
    eprintln!("Watching {} ({})", session.migration(), session.phase());
    let (_handle, mut events) = session.observe();

    while let Some(event) = events.recv().await {
        match &event {
            SyncEvent::Status { status, phase } => match format {
                OutputFormat::Text => {
                    if *phase != session.phase() {
                        println!("phase: {phase} ({})", status.status);
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "status": status, "phase": phase }));
                }
            },
            SyncEvent::StatusFailed(err) => eprintln!("status unavailable: {err}"),
            SyncEvent::Metrics(report) => match format {
                OutputFormat::Text => {
                    for (stage, metrics) in report.stages() {
                        tracing::debug!(
                            stage,
                            pending = metrics.pending,
                            in_progress = metrics.in_progress,
                            "Queue metrics"
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::json!({ "metrics": report })),
            },
            SyncEvent::Logs(batch) if !no_logs => {
                let received = Utc::now();
                for entry in batch.clone().into_entries() {
                    let line = LogLine::from_entry(entry, received);
                    if !levels.is_empty() && !levels.contains(&line.level) {
                        continue;
                    }
                    match format {
                        OutputFormat::Text => println!("{line}"),
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::json!({
                                "id": line.id,
                                "level": line.level,
                                "time": line.timestamp,
                                "message": line.message,
                            })
                        ),
                    }
                }
            }
            SyncEvent::Finished(phase) => eprintln!("Migration reached {phase}; stopped watching"),
            _ => {}
        }
        session.on_sync_event(event);
    }

    if format == OutputFormat::Text
        && let Some(report) = session.metrics()
    {
        for (stage, metrics) in report.stages() {
            println!(
                "{stage:<5} pending {:>8}  in progress {:>8}  workers {:>3}",
                metrics.pending, metrics.in_progress, metrics.workers
            );
        }
    }
    Ok(())
}

async fn run_phase(session: &mut ReviewSession, target: MigrationPhase, force: bool) -> Result<()> {
    if target == MigrationPhase::CopyInProgress && !force {
        session
            .refresh_stats()
            .await
            .context("Could not read review stats")?;
        if let Some(blocker) = session.copy_blocker() {
            bail!("Cannot start copying: {blocker}");
        }
    }

    session
        .change_phase(target)
        .await
        .with_context(|| format!("Could not move to {target}"))?;
    eprintln!("Migration moved to {target}");
    Ok(())
}

async fn run_stats(session: &mut ReviewSession, format: OutputFormat) -> Result<()> {
    let stats = session
        .refresh_stats()
        .await
        .context("Could not read review stats")?
        .unwrap_or_default();
    let blocker = session.copy_blocker();

    match format {
        OutputFormat::Text => {
            println!("{}", "─".repeat(50));
            println!(" {} - {}", session.migration(), session.phase());
            println!("{}", "─".repeat(50));
            println!(" Folders     {:>10}", stats.folders);
            println!(" Files       {:>10}", stats.files);
            println!(" Total size  {:>10}", format_size(stats.total_size));
            println!(" Pending     {:>10}", stats.pending);
            println!(" Failed      {:>10}", stats.failed);
            println!(" Excluded    {:>10}", stats.excluded);
            if let Some(ratio) = stats.folder_file_ratio() {
                println!(" Folder/file {ratio:>10.2}");
            }
            println!();
            match blocker {
                Some(blocker) => println!(" Copy blocked: {blocker}"),
                None => println!(" Ready to copy"),
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "migration": session.migration(),
                    "phase": session.phase(),
                    "stats": stats,
                    "folderFileRatio": stats.folder_file_ratio(),
                    "canStartCopy": blocker.is_none(),
                    "copyBlocker": blocker.map(|b| b.to_string()),
                }))?
            );
        }
    }
    Ok(())
}

fn display_path(node: &DiffNode) -> String {
    if node.is_folder() {
        format!("{}/", node.location_path)
    } else {
        node.location_path.to_string()
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{kept}…")
    }
}
