//! `signal-store`: inspect and edit the Signal Synthesis local store.
//!
//! Reads `config.toml` (or the path given with `--config`) and `SIGNAL_*`
//! environment variables, opens the store, and runs one command.
//!
//! ```
//! signal-store watch add ACME
//! signal-store follow watchlist
//! SIGNAL_STORE_PATH=/tmp/signal.db signal-store info
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use signal_core::analysis::AiSynthesis;
use signal_store_sqlite::{
  Observer, Store, StoreConfig,
  config::DEFAULT_STATEMENT_POOL_LIMIT,
  repository::{SummaryRepository, WatchlistRepository},
  schema::SchemaRegistry,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "signal-store", version, about = "Signal Synthesis local store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Followed tickers.
  #[command(subcommand)]
  Watch(WatchCommand),
  /// Saved analysis runs.
  #[command(subcommand)]
  History(HistoryCommand),
  /// Cached AI summaries.
  #[command(subcommand)]
  Summary(SummaryCommand),
  /// Delete every row of every table and compact the file.
  ClearAll,
  /// Print every delivery of a live query until interrupted.
  Follow {
    #[arg(value_enum)]
    target: FollowTarget,
  },
  /// Print the open report and schema identity.
  Info,
}

#[derive(Subcommand)]
enum WatchCommand {
  Add { symbol: String },
  Remove { symbol: String },
  List,
}

#[derive(Subcommand)]
enum HistoryCommand {
  List,
  Clear,
}

#[derive(Subcommand)]
enum SummaryCommand {
  Get {
    symbol: String,
  },
  Put {
    symbol:  String,
    #[arg(long)]
    summary: String,
    #[arg(long)]
    verdict: String,
    /// May be repeated.
    #[arg(long = "risk")]
    risks:   Vec<String>,
  },
  List,
  Delete {
    symbol: String,
  },
  Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum FollowTarget {
  Watchlist,
  History,
  Summaries,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CliConfig {
  store_path:                        PathBuf,
  #[serde(default)]
  fallback_to_destructive_migration: bool,
  #[serde(default = "default_pool_limit")]
  statement_pool_limit:              usize,
}

fn default_pool_limit() -> usize { DEFAULT_STATEMENT_POOL_LIMIT }

impl CliConfig {
  fn store_config(&self) -> StoreConfig {
    StoreConfig {
      statement_pool_limit: self.statement_pool_limit,
      ..StoreConfig::default()
    }
    .destructive_fallback(self.fallback_to_destructive_migration)
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .set_default("store_path", "~/.local/share/signal/signal.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("SIGNAL").try_parsing(true))
    .build()
    .context("failed to read config file")?;

  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }

  let store = Store::open(&store_path, cfg.store_config())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  run(&store, cli.command).await?;

  store.close().await.context("failed to close store")?;
  Ok(())
}

async fn run(store: &Store, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Watch(cmd) => {
      let repo = WatchlistRepository::new(store);
      match cmd {
        WatchCommand::Add { symbol } => {
          repo.add(&symbol).await.context("failed to add symbol")?;
        }
        WatchCommand::Remove { symbol } => {
          if !repo.remove(&symbol).await.context("failed to remove symbol")? {
            tracing::info!(%symbol, "not on the watchlist");
          }
        }
        WatchCommand::List => print_rows(&store.watchlist().get_all().await?)?,
      }
    }

    Command::History(cmd) => match cmd {
      HistoryCommand::List => print_rows(&store.history().get_all().await?)?,
      HistoryCommand::Clear => {
        let n = store.history().clear_all().await?;
        tracing::info!(removed = n, "history cleared");
      }
    },

    Command::Summary(cmd) => {
      let repo = SummaryRepository::new(store);
      match cmd {
        SummaryCommand::Get { symbol } => match repo.get(&symbol).await? {
          Some(synthesis) => print_json(&synthesis)?,
          None => tracing::info!(%symbol, "no cached summary"),
        },
        SummaryCommand::Put { symbol, summary, verdict, risks } => {
          repo
            .save(&symbol, &AiSynthesis { summary, risks, verdict })
            .await
            .context("failed to save summary")?;
        }
        SummaryCommand::List => print_rows(&store.ai_summaries().get_all().await?)?,
        SummaryCommand::Delete { symbol } => {
          let summaries = store.ai_summaries();
          match summaries.get_by_symbol(&symbol).await? {
            Some(row) => {
              summaries.delete(&row).await?;
            }
            None => tracing::info!(%symbol, "no cached summary"),
          }
        }
        SummaryCommand::Clear => {
          let n = repo.clear().await?;
          tracing::info!(removed = n, "summaries cleared");
        }
      }
    }

    Command::ClearAll => {
      store.clear_all_tables().await.context("failed to clear tables")?;
      tracing::info!("all tables cleared");
    }

    Command::Follow { target } => match target {
      FollowTarget::Watchlist => {
        follow(store.watchlist().observe_all().subscribe().await?).await?
      }
      FollowTarget::History => follow(store.history().observe_all().subscribe().await?).await?,
      FollowTarget::Summaries => {
        follow(store.ai_summaries().observe_all().subscribe().await?).await?
      }
    },

    Command::Info => {
      let registry = SchemaRegistry::current();
      let report = store.open_report();
      println!("schema version:  {}", registry.version);
      println!("identity hash:   {}", registry.identity_hash());
      println!("created:         {}", report.created);
      println!("destructive:     {}", report.destructive);
      match report.migrated_from {
        Some(v) => println!("migrated from:   {v}"),
        None => println!("migrated from:   -"),
      }
      for table in registry.table_names() {
        println!("table:           {table}");
      }
    }
  }
  Ok(())
}

/// Print each delivery as a JSON array until Ctrl-C or the store closes.
async fn follow<T: Serialize>(mut observer: Observer<T>) -> anyhow::Result<()> {
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      rows = observer.next() => match rows {
        Some(rows) => print_json(&rows)?,
        None => break,
      },
    }
  }
  Ok(())
}

fn print_rows<T: Serialize>(rows: &[T]) -> anyhow::Result<()> {
  for row in rows {
    println!("{}", serde_json::to_string(row)?);
  }
  Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
