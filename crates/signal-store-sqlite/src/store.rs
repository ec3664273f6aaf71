//! [`Store`]: the opened database and its three table accessors.

use std::{path::Path, sync::Arc};

use rusqlite::Connection;
use signal_core::policy::Table;
use tracing::{debug, info};

use crate::{
  Result,
  ai_summary::AiSummaries,
  channel::QueryChannel,
  config::StoreConfig,
  executor::WriteExecutor,
  history::History,
  invalidation::InvalidationTracker,
  lifecycle::{self, OpenReport},
  pool::StatementPool,
  schema::SchemaRegistry,
  watchlist::Watchlist,
};

/// Statement cache size; covers every pooled write plus the read queries.
const STATEMENT_CACHE_CAPACITY: usize = 32;

// ─── Shared context ──────────────────────────────────────────────────────────

/// What every accessor needs: the connection, the tracker, and the writer.
#[derive(Clone)]
pub(crate) struct Context {
  pub conn:    tokio_rusqlite::Connection,
  pub tracker: InvalidationTracker,
  pub writer:  WriteExecutor,
}

impl Context {
  /// Run a read on the connection thread, between write units.
  pub async fn read<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    Ok(self.conn.call(move |conn| Ok(f(&*conn)?)).await?)
  }

  pub fn channel<T, F>(&self, name: &'static str, tables: &[Table], query: F) -> QueryChannel<T>
  where
    T: Clone + Send + 'static,
    F: Fn(&Connection) -> rusqlite::Result<Vec<T>> + Send + Sync + 'static,
  {
    QueryChannel::new(name, tables, self.conn.clone(), self.tracker.clone(), query)
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A store backed by a single SQLite file (or memory).
///
/// Accessors are built once at open and borrowed from the store. Cloning is
/// cheap; clones share the connection, tracker and statement pool.
#[derive(Clone)]
pub struct Store {
  ctx:          Context,
  pool:         Arc<StatementPool>,
  report:       OpenReport,
  watchlist:    Watchlist,
  history:      History,
  ai_summaries: AiSummaries,
}

impl Store {
  /// Open (or create) a store at `path` and run the lifecycle sequence.
  pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    conn
      .call(|conn| {
        let mode: String =
          conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        Ok(())
      })
      .await?;
    info!(path = %path.display(), "opening store");
    Self::init(conn, config).await
  }

  /// Open an in-memory store. Nothing survives `close`.
  pub async fn open_in_memory(config: StoreConfig) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, config).await
  }

  async fn init(conn: tokio_rusqlite::Connection, config: StoreConfig) -> Result<Self> {
    let tracker = InvalidationTracker::new();
    let pool = Arc::new(StatementPool::new(config.statement_pool_limit));

    let registry = SchemaRegistry::current();
    let open_tracker = tracker.clone();
    let report = conn
      .call(move |conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(lifecycle::open(conn, &registry, &config, &open_tracker))
      })
      .await??;

    let writer = WriteExecutor::new(conn.clone(), Arc::clone(&pool), tracker.clone());
    let ctx = Context { conn, tracker, writer };

    Ok(Self {
      watchlist: Watchlist::new(ctx.clone()),
      history: History::new(ctx.clone()),
      ai_summaries: AiSummaries::new(ctx.clone()),
      ctx,
      pool,
      report,
    })
  }

  pub fn watchlist(&self) -> &Watchlist { &self.watchlist }

  pub fn history(&self) -> &History { &self.history }

  pub fn ai_summaries(&self) -> &AiSummaries { &self.ai_summaries }

  /// What the open sequence did.
  pub fn open_report(&self) -> &OpenReport { &self.report }

  pub fn tracker(&self) -> &InvalidationTracker { &self.ctx.tracker }

  pub fn statement_pool(&self) -> &StatementPool { &self.pool }

  /// Build a reactive channel for an arbitrary read over `tables`.
  pub fn observe<T, F>(&self, name: &'static str, tables: &[Table], query: F) -> QueryChannel<T>
  where
    T: Clone + Send + 'static,
    F: Fn(&Connection) -> rusqlite::Result<Vec<T>> + Send + Sync + 'static,
  {
    self.ctx.channel(name, tables, query)
  }

  /// Delete every row of every table in one unit, then compact the file.
  ///
  /// Compaction (`VACUUM`) is skipped if the connection is somehow still
  /// inside a transaction.
  pub async fn clear_all_tables(&self) -> Result<()> {
    self
      .ctx
      .writer
      .run("store.clear_all_tables", |unit| {
        for table in Table::ALL {
          unit.execute_unpooled(table, &format!("DELETE FROM {}", table.name()))?;
        }
        Ok(())
      })
      .await?;

    self
      .ctx
      .conn
      .call(|conn| {
        conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))?;
        if conn.is_autocommit() {
          conn.execute_batch("VACUUM")?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Tear down the tracker and close the connection. Observers of any
  /// channel see their stream end.
  pub async fn close(self) -> Result<()> {
    self.ctx.tracker.shutdown();
    self.ctx.conn.close().await?;
    info!("store closed");
    Ok(())
  }
}
