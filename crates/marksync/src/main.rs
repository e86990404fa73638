//! marksync CLI - mirror Twitter/X bookmarks into a local store.

use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marksync::auth::{import_cookies, import_from_env, SessionStore};
use marksync::config::Config;
use marksync::enrichment::EnrichOptions;
use marksync::export::{self, ExportFormat};
use marksync::output::{self, Failure, Success};
use marksync::storage::{parse_since, QueryFilter, SortOrder};
use marksync::sync::SyncMode;
use marksync::twitter::BookmarkParser;
use marksync::{Engine, Error};

/// marksync - sync Twitter/X bookmarks into a local SQLite store.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(about = "Twitter/X bookmark sync engine")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the database and session
    #[arg(long, global = true, env = "MARKSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch new bookmarks from X
    Sync {
        /// Walk the entire feed instead of stopping at known bookmarks
        #[arg(long)]
        all: bool,

        /// Maximum feed pages to fetch
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_pages: Option<u32>,

        /// Enrich link metadata after syncing
        #[arg(long)]
        enrich: bool,

        /// Include page-text summaries when enriching
        #[arg(long, requires = "enrich")]
        summary: bool,
    },

    /// List stored bookmarks
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Search bookmark text, author username and display name
    Search {
        /// Search query
        query: String,

        /// Limit results
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,
    },

    /// Show store statistics
    Stats,

    /// Mark bookmarks as processed
    MarkProcessed {
        /// Tweet IDs or status URLs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Mark bookmarks as unprocessed
    MarkUnprocessed {
        /// Tweet IDs or status URLs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Fetch title and description for links in stored bookmarks
    Enrich {
        /// Re-enrich bookmarks that already have metadata
        #[arg(long)]
        force: bool,

        /// Include page-text summaries
        #[arg(long)]
        summary: bool,

        /// Concurrent fetches
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=32))]
        concurrency: Option<u32>,

        /// Maximum bookmarks to enrich
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,
    },

    /// Export bookmarks to a file
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Output file (default: bookmarks_<timestamp>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Import X session cookies from a browser export
    ImportCookies {
        /// Cookie export file (Playwright storage state or a name/value map).
        /// Falls back to TWITTER_AUTH_TOKEN / TWITTER_CT0.
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Only processed bookmarks
    #[arg(long, conflicts_with = "unprocessed")]
    processed: bool,

    /// Only unprocessed bookmarks
    #[arg(long)]
    unprocessed: bool,

    /// Filter by author username
    #[arg(long)]
    author: Option<String>,

    /// Only bookmarks first seen on or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Limit results
    #[arg(long)]
    limit: Option<u32>,

    /// Sort order: newest or oldest
    #[arg(long, default_value = "newest")]
    order: SortOrder,
}

impl FilterArgs {
    fn to_filter(&self) -> QueryFilter {
        let processed = match (self.processed, self.unprocessed) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        QueryFilter {
            processed,
            text: None,
            author: self.author.clone(),
            since: self.since,
            limit: self.limit,
            order: self.order,
        }
    }
}

/// A command failure plus whatever completed before it.
struct CommandFailure {
    error: Error,
    partial: Option<Value>,
}

impl From<Error> for CommandFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

type CommandResult = std::result::Result<Value, CommandFailure>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let err = Error::InvalidInput(e.to_string().trim().to_string());
            println!("{}", output::render(&Failure::new(&err)));
            return ExitCode::from(err.code());
        }
    };

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current item");
                cancel.cancel();
            }
        }
    });

    match run(cli.command, config, &cancel).await {
        Ok(data) => {
            println!("{}", output::render(&Success::new(data)));
            ExitCode::SUCCESS
        }
        Err(CommandFailure { error, partial }) => {
            tracing::debug!(code = error.code(), error = %error, "Command failed");
            let mut failure = Failure::new(&error);
            if let Some(partial) = partial {
                failure = failure.with_partial(partial);
            }
            println!("{}", output::render(&failure));
            ExitCode::from(error.code())
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default = if verbose {
        "marksync=debug,info"
    } else {
        "marksync=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;
    Ok(())
}

async fn run(command: Commands, config: Config, cancel: &CancellationToken) -> CommandResult {
    match command {
        Commands::ImportCookies { from } => run_import(&config, from),
        command => {
            let engine = Engine::open(config).await?;
            run_with_engine(command, &engine, cancel).await
        }
    }
}

async fn run_with_engine(
    command: Commands,
    engine: &Engine,
    cancel: &CancellationToken,
) -> CommandResult {
    match command {
        Commands::Sync {
            all,
            max_pages,
            enrich,
            summary,
        } => run_sync(engine, all, max_pages, enrich, summary, cancel).await,
        Commands::List { filter } => run_list(engine, &filter).await,
        Commands::Search { query, limit } => run_search(engine, &query, limit).await,
        Commands::Stats => Ok(to_value(&engine.store().stats().await?)?),
        Commands::MarkProcessed { ids } => run_mark(engine, &ids, true).await,
        Commands::MarkUnprocessed { ids } => run_mark(engine, &ids, false).await,
        Commands::Enrich {
            force,
            summary,
            concurrency,
            limit,
        } => {
            let opts = EnrichOptions {
                force,
                summary,
                concurrency: concurrency.map_or(engine.config().enrich_concurrency, |c| c as usize),
                limit,
            };
            let result = engine.enrich(&opts, cancel).await?;
            Ok(to_value(&result)?)
        }
        Commands::Export {
            format,
            output,
            filter,
        } => run_export(engine, format, output, &filter).await,
        Commands::ImportCookies { from } => run_import(engine.config(), from),
    }
}

async fn run_sync(
    engine: &Engine,
    all: bool,
    max_pages: Option<u32>,
    enrich: bool,
    summary: bool,
    cancel: &CancellationToken,
) -> CommandResult {
    let mode = if all { SyncMode::Full } else { SyncMode::Incremental };

    let report = engine.sync(mode, max_pages, cancel).await?;
    let sync_summary = match report.into_result() {
        Ok(s) => s,
        Err((partial, error)) => {
            return Err(CommandFailure {
                error,
                partial: Some(to_value(&partial)?),
            });
        }
    };

    let mut data = to_value(&sync_summary)?;
    data["mode"] = json!(mode);

    if enrich && !cancel.is_cancelled() {
        let opts = EnrichOptions {
            summary,
            concurrency: engine.config().enrich_concurrency,
            ..EnrichOptions::default()
        };
        match engine.enrich(&opts, cancel).await {
            Ok(result) => data["enrichment"] = to_value(&result)?,
            Err(error) => {
                return Err(CommandFailure {
                    error,
                    partial: Some(data),
                })
            }
        }
    }

    Ok(data)
}

async fn run_list(engine: &Engine, args: &FilterArgs) -> CommandResult {
    let filter = args.to_filter();
    let bookmarks = engine.store().query(&filter).await?;
    Ok(json!({
        "count": bookmarks.len(),
        "bookmarks": bookmarks,
    }))
}

async fn run_search(engine: &Engine, query: &str, limit: Option<u32>) -> CommandResult {
    let bookmarks = engine.store().search(query, limit).await?;
    Ok(json!({
        "query": query,
        "count": bookmarks.len(),
        "bookmarks": bookmarks,
    }))
}

async fn run_mark(engine: &Engine, inputs: &[String], processed: bool) -> CommandResult {
    let ids = inputs
        .iter()
        .map(|input| {
            BookmarkParser::extract_tweet_id(input)
                .ok_or_else(|| Error::InvalidInput(format!("not a tweet ID or URL: {input}")))
        })
        .collect::<marksync::Result<Vec<_>>>()?;

    let updated = engine.store().set_processed(&ids, processed).await?;
    tracing::info!(count = updated.len(), processed, "Updated processed flag");
    Ok(json!({ "updated": updated }))
}

async fn run_export(
    engine: &Engine,
    format: ExportFormat,
    output: Option<PathBuf>,
    args: &FilterArgs,
) -> CommandResult {
    let bookmarks = engine.store().query(&args.to_filter()).await?;
    let content = export::render(&bookmarks, format)?;
    let path = output.unwrap_or_else(|| export::default_filename(format, &Local::now()));
    export::write_export(&path, &content)?;

    Ok(json!({
        "path": path.display().to_string(),
        "format": format.extension(),
        "count": bookmarks.len(),
    }))
}

fn run_import(config: &Config, from: Option<PathBuf>) -> CommandResult {
    let credential = match &from {
        Some(path) => import_cookies(path)?,
        None => import_from_env()?,
    };

    let sessions = SessionStore::new(config.session_path());
    sessions.save(&credential)?;
    tracing::info!(
        path = %sessions.path().display(),
        cookies = credential.cookies.len(),
        "Imported session"
    );

    Ok(json!({
        "session_path": sessions.path().display().to_string(),
        "cookies": credential.cookies.keys().collect::<Vec<_>>(),
        "csrf_token": credential.csrf_token.is_some(),
    }))
}

fn to_value(value: &impl serde::Serialize) -> marksync::Result<Value> {
    Ok(serde_json::to_value(value)?)
}
