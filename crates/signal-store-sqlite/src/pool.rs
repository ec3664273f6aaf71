//! The statement pool: one prepared statement per logical write.
//!
//! SQL for each [`WriteOp`] is rendered on first use and compiled through
//! the connection's statement cache, so later uses skip re-compilation. A
//! checked-out [`PooledStatement`] belongs to exactly one caller and goes
//! back to the pool when dropped, on every exit path.

use std::{
  collections::HashMap,
  ops::{Deref, DerefMut},
  sync::{Mutex, MutexGuard, PoisonError},
};

use rusqlite::{CachedStatement, Connection};
use signal_core::policy::{ConflictPolicy, Table};
use tracing::debug;

use crate::{Error, Result};

// ─── Logical writes ──────────────────────────────────────────────────────────

/// Every write the accessors issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
  InsertWatchlist,
  DeleteWatchlistBySymbol,
  InsertHistory,
  DeleteAllHistory,
  InsertSummary,
  DeleteSummary,
  ClearSummaries,
}

impl WriteOp {
  pub const ALL: [WriteOp; 7] = [
    WriteOp::InsertWatchlist,
    WriteOp::DeleteWatchlistBySymbol,
    WriteOp::InsertHistory,
    WriteOp::DeleteAllHistory,
    WriteOp::InsertSummary,
    WriteOp::DeleteSummary,
    WriteOp::ClearSummaries,
  ];

  pub fn table(self) -> Table {
    match self {
      WriteOp::InsertWatchlist | WriteOp::DeleteWatchlistBySymbol => Table::Watchlist,
      WriteOp::InsertHistory | WriteOp::DeleteAllHistory => Table::AnalysisHistory,
      WriteOp::InsertSummary | WriteOp::DeleteSummary | WriteOp::ClearSummaries => {
        Table::AiSummaries
      }
    }
  }

  /// The conflict policy, for inserts.
  pub fn policy(self) -> Option<ConflictPolicy> {
    match self {
      WriteOp::InsertWatchlist | WriteOp::InsertHistory | WriteOp::InsertSummary => {
        Some(self.table().insert_policy())
      }
      _ => None,
    }
  }

  /// Render the statement text. Inserts take their verb from the table's
  /// conflict policy.
  pub fn sql(self) -> String {
    let verb = self.table().insert_policy().sql_verb();
    match self {
      WriteOp::InsertWatchlist => {
        format!("{verb} INTO watchlist (symbol, addedAt) VALUES (?1, ?2)")
      }
      // A zero id binds as NULL so SQLite assigns the next one.
      WriteOp::InsertHistory => format!(
        "{verb} INTO analysis_history (id, generatedAt, intent, setupsJson)
         VALUES (NULLIF(?1, 0), ?2, ?3, ?4)"
      ),
      WriteOp::InsertSummary => format!(
        "{verb} INTO ai_summaries (symbol, summary, risksJson, verdict, generatedAt)
         VALUES (?1, ?2, ?3, ?4, ?5)"
      ),
      WriteOp::DeleteWatchlistBySymbol => {
        "DELETE FROM watchlist WHERE symbol = ?1".to_owned()
      }
      WriteOp::DeleteAllHistory => "DELETE FROM analysis_history".to_owned(),
      WriteOp::DeleteSummary => "DELETE FROM ai_summaries WHERE symbol = ?1".to_owned(),
      WriteOp::ClearSummaries => "DELETE FROM ai_summaries".to_owned(),
    }
  }
}

// ─── Pool ────────────────────────────────────────────────────────────────────

/// Usage counters for one pool entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
  /// The SQL has been rendered and first compiled.
  pub compiled:     bool,
  pub acquisitions: u64,
  pub in_flight:    usize,
}

struct Entry {
  sql:          String,
  acquisitions: u64,
  in_flight:    usize,
}

/// Per-[`WriteOp`] checkout bookkeeping over the connection statement cache.
pub struct StatementPool {
  limit:   usize,
  entries: Mutex<HashMap<WriteOp, Entry>>,
}

impl StatementPool {
  /// `limit` bounds simultaneous checkouts per op.
  pub fn new(limit: usize) -> Self {
    Self { limit: limit.max(1), entries: Mutex::new(HashMap::new()) }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<WriteOp, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Check out the statement for `op`, compiling it on first use.
  pub fn acquire<'c>(
    &'c self,
    conn: &'c Connection,
    op: WriteOp,
  ) -> Result<PooledStatement<'c>> {
    let sql = {
      let mut entries = self.lock();
      let entry = entries.entry(op).or_insert_with(|| {
        debug!(?op, "compiling pooled statement");
        Entry { sql: op.sql(), acquisitions: 0, in_flight: 0 }
      });
      if entry.in_flight >= self.limit {
        return Err(Error::ResourceExhausted(format!(
          "statement pool for {op:?} has {} handles checked out",
          entry.in_flight
        )));
      }
      // Reserve the slot before compiling; released below on failure.
      entry.in_flight += 1;
      entry.acquisitions += 1;
      entry.sql.clone()
    };

    match conn.prepare_cached(&sql) {
      Ok(stmt) => Ok(PooledStatement { stmt, pool: self, op }),
      Err(e) => {
        self.release(op);
        Err(crate::executor::classify(op, e))
      }
    }
  }

  fn release(&self, op: WriteOp) {
    if let Some(entry) = self.lock().get_mut(&op) {
      entry.in_flight = entry.in_flight.saturating_sub(1);
    }
  }

  pub fn stats(&self, op: WriteOp) -> PoolStats {
    self.lock().get(&op).map_or_else(PoolStats::default, |e| PoolStats {
      compiled:     true,
      acquisitions: e.acquisitions,
      in_flight:    e.in_flight,
    })
  }

  /// Total handles currently checked out across every op.
  pub fn in_flight(&self) -> usize { self.lock().values().map(|e| e.in_flight).sum() }
}

// ─── Checked-out handle ──────────────────────────────────────────────────────

/// A statement checked out of the pool. Returned on drop.
pub struct PooledStatement<'c> {
  stmt: CachedStatement<'c>,
  pool: &'c StatementPool,
  op:   WriteOp,
}

impl PooledStatement<'_> {
  pub fn op(&self) -> WriteOp { self.op }
}

impl<'c> Deref for PooledStatement<'c> {
  type Target = rusqlite::Statement<'c>;

  fn deref(&self) -> &Self::Target { &self.stmt }
}

impl DerefMut for PooledStatement<'_> {
  fn deref_mut(&mut self) -> &mut Self::Target { &mut self.stmt }
}

impl Drop for PooledStatement<'_> {
  fn drop(&mut self) { self.pool.release(self.op); }
}
