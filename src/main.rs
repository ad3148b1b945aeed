//! book-resolver: resolve podcast book mentions to canonical books.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use book_resolver_lib::commands::{self, AppContext};
use book_resolver_lib::{init_logging, AppConfig, AppError};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "book-resolver")]
#[command(about = "Match podcast book mentions to canonical books")]
#[command(version)]
struct Args {
    /// YAML config file
    #[arg(short, long, env = "BOOK_RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long)]
    db: Option<PathBuf>,

    /// Skip the external catalogue
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve mention candidates from a JSON-lines file (stdin if omitted)
    Ingest { input: Option<PathBuf> },
    /// Retry every mention that has no book yet
    Reprocess,
    /// List mentions that have no book yet
    Unresolved {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List canonical books
    Books,
    /// Show one book with its mentions
    Book { id: i64 },
    /// Merge LOSER into SURVIVOR
    Merge { loser: i64, survivor: i64 },
    /// Register an alternate title for a book
    Alias { id: i64, title: String },
    /// Episodes mentioning a book
    Mentions { id: i64 },
    /// Books mentioned on several podcasts
    CrossPodcast {
        #[arg(short, long, default_value = "2")]
        min_podcasts: usize,
    },
    /// Ledger history for an episode
    Episode { id: String },
    /// Query the external catalogue for a title
    Lookup { title: String },
    /// Store and ledger counts
    Stats,
}

#[tokio::main]
async fn main() {
    init_logging("info");
    let args = Args::parse();

    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let cwd = std::env::current_dir()?;
    let mut config = AppConfig::load(args.config.as_deref(), &cwd)?;
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if args.offline {
        config.lookup.enabled = false;
    }

    let ctx = AppContext::from_config(config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling pending jobs");
            on_signal.cancel();
        }
    });

    match args.command {
        Command::Ingest { input } => {
            let report = match input {
                Some(path) => {
                    let file = File::open(&path)
                        .map_err(|e| AppError::Io(format!("{}: {}", path.display(), e)))?;
                    commands::worker::ingest(&ctx, BufReader::new(file), &cancel).await?
                }
                None => commands::worker::ingest(&ctx, io::stdin().lock(), &cancel).await?,
            };
            print_json(&report)
        }
        Command::Reprocess => print_json(&commands::worker::reprocess(&ctx, &cancel).await?),
        Command::Unresolved { limit } => print_json(&commands::stats::list_unresolved(&ctx, limit)?),
        Command::Books => print_json(&commands::books::list_books(&ctx)?),
        Command::Book { id } => print_json(&commands::books::get_book(&ctx, id).await?),
        Command::Merge { loser, survivor } => {
            print_json(&commands::books::merge_books(&ctx, loser, survivor)?)
        }
        Command::Alias { id, title } => print_json(&commands::books::add_alias(&ctx, id, &title)?),
        Command::Mentions { id } => print_json(&commands::xref::book_mentions(&ctx, id).await?),
        Command::CrossPodcast { min_podcasts } => {
            print_json(&commands::xref::cross_podcast(&ctx, min_podcasts).await?)
        }
        Command::Episode { id } => print_json(&commands::stats::episode_history(&ctx, &id)?),
        Command::Lookup { title } => print_json(&commands::books::lookup_title(&ctx, &title).await?),
        Command::Stats => print_json(&commands::stats::get_stats(&ctx)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
