//! Tables and the conflict policy each write applies.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Table ───────────────────────────────────────────────────────────────────

/// A persisted table. The set is fixed for a given schema version.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Table {
  Watchlist,
  AnalysisHistory,
  AiSummaries,
}

impl Table {
  pub const ALL: [Table; 3] =
    [Table::Watchlist, Table::AnalysisHistory, Table::AiSummaries];

  /// The SQL table name.
  pub fn name(self) -> &'static str {
    match self {
      Table::Watchlist => "watchlist",
      Table::AnalysisHistory => "analysis_history",
      Table::AiSummaries => "ai_summaries",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|t| t.name() == name)
  }

  /// Policy applied when an insert collides with an existing key.
  pub fn insert_policy(self) -> ConflictPolicy {
    match self {
      Table::Watchlist | Table::AiSummaries => ConflictPolicy::Replace,
      Table::AnalysisHistory => ConflictPolicy::Abort,
    }
  }
}

impl fmt::Display for Table {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

// ─── ConflictPolicy ──────────────────────────────────────────────────────────

/// What an insert does when its key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
  /// Replace the existing row (idempotent upsert).
  Replace,
  /// Fail the statement and roll the unit back.
  Abort,
}

impl ConflictPolicy {
  /// The `INSERT OR ...` verb SQLite understands.
  pub fn sql_verb(self) -> &'static str {
    match self {
      ConflictPolicy::Replace => "INSERT OR REPLACE",
      ConflictPolicy::Abort => "INSERT OR ABORT",
    }
  }
}
