//! The transactional write executor.
//!
//! Every write runs as a unit: begin (IMMEDIATE), execute pooled
//! statements, mark successful, end. `end` commits only if the unit was
//! marked; otherwise it rolls back. Units run on the connection thread, one
//! at a time, and report the tables they changed to the
//! [`InvalidationTracker`] right after commit, so notifications follow
//! commit order. A rolled-back unit notifies nobody.

use std::{collections::BTreeSet, sync::Arc};

use rusqlite::{Connection, ErrorCode, Params, Transaction, TransactionBehavior};
use signal_core::policy::Table;
use tracing::{debug, warn};

use crate::{
  Error, Result,
  invalidation::InvalidationTracker,
  pool::{StatementPool, WriteOp},
};

/// Map a statement failure onto the store's error taxonomy.
pub(crate) fn classify(op: WriteOp, e: rusqlite::Error) -> Error {
  match e.sqlite_error_code() {
    Some(ErrorCode::ConstraintViolation) => Error::ConflictViolation {
      table:  op.table(),
      detail: e.to_string(),
    },
    Some(ErrorCode::OutOfMemory | ErrorCode::DiskFull | ErrorCode::CannotOpen) => {
      Error::ResourceExhausted(e.to_string())
    }
    _ => Error::TransactionAborted { unit: op_label(op), source: e },
  }
}

fn op_label(op: WriteOp) -> &'static str {
  match op {
    WriteOp::InsertWatchlist => "insert-watchlist",
    WriteOp::DeleteWatchlistBySymbol => "delete-watchlist-by-symbol",
    WriteOp::InsertHistory => "insert-history",
    WriteOp::DeleteAllHistory => "delete-all-history",
    WriteOp::InsertSummary => "insert-summary",
    WriteOp::DeleteSummary => "delete-summary",
    WriteOp::ClearSummaries => "clear-summaries",
  }
}

// ─── Unit ────────────────────────────────────────────────────────────────────

/// An open write transaction.
pub struct WriteUnit<'c> {
  tx:         Transaction<'c>,
  pool:       &'c StatementPool,
  touched:    BTreeSet<Table>,
  successful: bool,
}

impl<'c> WriteUnit<'c> {
  fn begin(conn: &'c mut Connection, pool: &'c StatementPool, label: &'static str) -> Result<Self> {
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|source| Error::TransactionAborted { unit: label, source })?;
    Ok(Self { tx, pool, touched: BTreeSet::new(), successful: false })
  }

  /// Run the pooled statement for `op`. Returns the number of rows changed;
  /// the op's table counts as touched only if that is non-zero.
  pub fn execute(&mut self, op: WriteOp, params: impl Params) -> Result<usize> {
    let mut stmt = self.pool.acquire(&self.tx, op)?;
    let changed = stmt.execute(params).map_err(|e| classify(op, e))?;
    if changed > 0 {
      self.touched.insert(op.table());
    }
    Ok(changed)
  }

  /// Run ad-hoc SQL against `table` outside the pool. Used for bulk
  /// maintenance that has no pooled statement.
  pub fn execute_unpooled(&mut self, table: Table, sql: &str) -> Result<usize> {
    let changed = self
      .tx
      .execute(sql, [])
      .map_err(|source| Error::TransactionAborted { unit: "unpooled", source })?;
    if changed > 0 {
      self.touched.insert(table);
    }
    Ok(changed)
  }

  pub fn last_insert_rowid(&self) -> i64 { self.tx.last_insert_rowid() }

  pub fn mark_successful(&mut self) { self.successful = true; }

  /// Commit if marked successful, otherwise roll back. Returns the tables
  /// that must be invalidated.
  fn end(self, label: &'static str) -> Result<BTreeSet<Table>> {
    if self.successful {
      self
        .tx
        .commit()
        .map_err(|source| Error::TransactionAborted { unit: label, source })?;
      Ok(self.touched)
    } else {
      self
        .tx
        .rollback()
        .map_err(|source| Error::TransactionAborted { unit: label, source })?;
      Ok(BTreeSet::new())
    }
  }
}

fn run_unit<F, R>(
  conn: &mut Connection,
  pool: &StatementPool,
  tracker: &InvalidationTracker,
  label: &'static str,
  f: F,
) -> Result<R>
where
  F: FnOnce(&mut WriteUnit<'_>) -> Result<R>,
{
  // Units block; they must only ever run on the dedicated connection thread.
  debug_assert!(
    tokio::runtime::Handle::try_current().is_err(),
    "write unit {label} executed on an async runtime thread"
  );

  let mut unit = WriteUnit::begin(conn, pool, label)?;
  let outcome = f(&mut unit);
  if outcome.is_ok() {
    unit.mark_successful();
  }
  let touched = unit.end(label)?;

  match outcome {
    Ok(value) => {
      debug!(unit = label, ?touched, "write unit committed");
      tracker.invalidate(&touched);
      Ok(value)
    }
    Err(e) => {
      warn!(unit = label, error = %e, "write unit rolled back");
      Err(e)
    }
  }
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Submits write units to the connection thread. Cloning is cheap.
#[derive(Clone)]
pub struct WriteExecutor {
  conn:    tokio_rusqlite::Connection,
  pool:    Arc<StatementPool>,
  tracker: InvalidationTracker,
}

impl WriteExecutor {
  pub(crate) fn new(
    conn: tokio_rusqlite::Connection,
    pool: Arc<StatementPool>,
    tracker: InvalidationTracker,
  ) -> Self {
    Self { conn, pool, tracker }
  }

  /// Run `f` as one atomic unit. Any error returned by `f` rolls the unit
  /// back and is returned unchanged.
  pub async fn run<F, R>(&self, label: &'static str, f: F) -> Result<R>
  where
    F: FnOnce(&mut WriteUnit<'_>) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let pool = Arc::clone(&self.pool);
    let tracker = self.tracker.clone();
    self
      .conn
      .call(move |conn| Ok(run_unit(conn, &pool, &tracker, label, f)))
      .await?
  }

  pub fn pool(&self) -> &StatementPool { &self.pool }
}
