//! Row mapping between SQLite rows and the record types.
//!
//! Column order in each `*_COLUMNS` constant matches the getter indices in
//! the corresponding mapper.

use rusqlite::Row;
use signal_core::record::{AiSummary, HistoryRecord, WatchlistItem};

pub const WATCHLIST_COLUMNS: &str = "symbol, addedAt";

pub const HISTORY_COLUMNS: &str = "id, generatedAt, intent, setupsJson";

pub const SUMMARY_COLUMNS: &str = "symbol, summary, risksJson, verdict, generatedAt";

pub fn watchlist_row(row: &Row<'_>) -> rusqlite::Result<WatchlistItem> {
  Ok(WatchlistItem { symbol: row.get(0)?, added_at: row.get(1)? })
}

pub fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
  Ok(HistoryRecord {
    id:           row.get(0)?,
    generated_at: row.get(1)?,
    intent:       row.get(2)?,
    setups_json:  row.get(3)?,
  })
}

pub fn summary_row(row: &Row<'_>) -> rusqlite::Result<AiSummary> {
  Ok(AiSummary {
    symbol:       row.get(0)?,
    summary:      row.get(1)?,
    risks_json:   row.get(2)?,
    verdict:      row.get(3)?,
    generated_at: row.get(4)?,
  })
}
