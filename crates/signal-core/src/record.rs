//! Persisted records, one struct per table row.
//!
//! Text fields are stored verbatim and timestamps are epoch milliseconds.
//! JSON payload columns (`setups_json`, `risks_json`) are opaque here; the
//! repositories in the store crate are the only code that parses them.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reject symbols that cannot act as a primary key.
pub fn validate_symbol(symbol: &str) -> Result<()> {
  if symbol.trim().is_empty() {
    return Err(Error::InvalidSymbol(symbol.to_owned()));
  }
  Ok(())
}

/// A ticker the user follows. Keyed by `symbol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistItem {
  pub symbol:   String,
  pub added_at: i64,
}

impl WatchlistItem {
  pub fn new(symbol: impl Into<String>, added_at: i64) -> Self {
    Self { symbol: symbol.into(), added_at }
  }
}

/// One generated analysis run. Append-only.
///
/// `id == 0` asks the store to assign the next id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub id:           i64,
  pub generated_at: i64,
  pub intent:       String,
  pub setups_json:  String,
}

impl HistoryRecord {
  /// A record whose id will be assigned on append.
  pub fn new(
    generated_at: i64,
    intent: impl Into<String>,
    setups_json: impl Into<String>,
  ) -> Self {
    Self {
      id: 0,
      generated_at,
      intent: intent.into(),
      setups_json: setups_json.into(),
    }
  }

  pub fn is_unassigned(&self) -> bool { self.id == 0 }
}

/// A cached AI summary for a symbol. Exactly one row per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSummary {
  pub symbol:       String,
  pub summary:      String,
  pub risks_json:   String,
  pub verdict:      String,
  pub generated_at: i64,
}
