//! Repositories: translate domain values to and from table records.
//!
//! The accessors deal in raw rows with opaque JSON columns. These wrappers
//! own the JSON encoding and stamp timestamps, which is what the rest of the
//! application actually calls.

use chrono::{DateTime, Utc};
use signal_core::{
  analysis::{AiSynthesis, AnalysisResult, TradingIntent},
  record::{AiSummary, HistoryRecord, WatchlistItem},
};
use tracing::warn;

use crate::{AiSummaries, History, QueryChannel, Result, Store, Watchlist};

fn now_millis() -> i64 { Utc::now().timestamp_millis() }

// ─── Watchlist ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WatchlistRepository {
  watchlist: Watchlist,
}

impl WatchlistRepository {
  pub fn new(store: &Store) -> Self { Self { watchlist: store.watchlist().clone() } }

  /// Follow `symbol`, stamped with the current time.
  pub async fn add(&self, symbol: &str) -> Result<()> {
    self.watchlist.upsert(WatchlistItem::new(symbol, now_millis())).await
  }

  pub async fn remove(&self, symbol: &str) -> Result<bool> {
    self.watchlist.delete(symbol).await
  }

  /// Followed symbols, most recently added first.
  pub fn symbols(&self) -> QueryChannel<String> {
    self
      .watchlist
      .observe_all()
      .filter_map("watchlist.symbols", |item| Some(item.symbol))
  }
}

// ─── History ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HistoryRepository {
  history: History,
}

impl HistoryRepository {
  pub fn new(store: &Store) -> Self { Self { history: store.history().clone() } }

  /// Persist a completed analysis. Returns the assigned history id.
  pub async fn save(&self, result: &AnalysisResult) -> Result<i64> {
    let record = HistoryRecord::new(
      result.generated_at.timestamp_millis(),
      result.intent.as_str(),
      serde_json::to_string(&result.setups)?,
    );
    self.history.append(record).await
  }

  /// Saved analyses, newest first. Rows that cannot be decoded are skipped.
  pub fn observe(&self) -> QueryChannel<AnalysisResult> {
    self
      .history
      .observe_all()
      .filter_map("history.results", decode_history)
  }

  pub async fn clear(&self) -> Result<usize> { self.history.clear_all().await }
}

/// Decode a history row. Unknown intents and out-of-range timestamps drop
/// the row; a malformed setups payload decodes as no setups.
pub fn decode_history(record: HistoryRecord) -> Option<AnalysisResult> {
  let intent = match record.intent.parse::<TradingIntent>() {
    Ok(intent) => intent,
    Err(e) => {
      warn!(id = record.id, error = %e, "skipping history row");
      return None;
    }
  };
  let generated_at = DateTime::<Utc>::from_timestamp_millis(record.generated_at)?;
  let setups = serde_json::from_str(&record.setups_json).unwrap_or_else(|e| {
    warn!(id = record.id, error = %e, "unreadable setups payload");
    Vec::new()
  });
  Some(AnalysisResult { intent, generated_at, setups })
}

// ─── AI summaries ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SummaryRepository {
  summaries: AiSummaries,
}

impl SummaryRepository {
  pub fn new(store: &Store) -> Self { Self { summaries: store.ai_summaries().clone() } }

  /// The cached synthesis for `symbol`, if any.
  pub async fn get(&self, symbol: &str) -> Result<Option<AiSynthesis>> {
    let Some(row) = self.summaries.get_by_symbol(symbol).await? else {
      return Ok(None);
    };
    Ok(Some(AiSynthesis {
      summary: row.summary,
      risks:   serde_json::from_str(&row.risks_json)?,
      verdict: row.verdict,
    }))
  }

  /// Cache `synthesis` for `symbol`, replacing any previous one.
  pub async fn save(&self, symbol: &str, synthesis: &AiSynthesis) -> Result<()> {
    let row = AiSummary {
      symbol:       symbol.to_owned(),
      summary:      synthesis.summary.clone(),
      risks_json:   serde_json::to_string(&synthesis.risks)?,
      verdict:      synthesis.verdict.clone(),
      generated_at: now_millis(),
    };
    self.summaries.upsert(row).await
  }

  pub async fn clear(&self) -> Result<usize> { self.summaries.clear_all().await }
}
