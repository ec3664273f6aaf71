//! Domain values stored through the repositories.
//!
//! These are the shapes the rest of the application works with; the store
//! flattens them into [`HistoryRecord`](crate::record::HistoryRecord) and
//! [`AiSummary`](crate::record::AiSummary) rows.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The trading horizon an analysis was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingIntent {
  DayTrade,
  Swing,
  LongTerm,
}

impl TradingIntent {
  /// The name stored in the `intent` column.
  pub fn as_str(self) -> &'static str {
    match self {
      TradingIntent::DayTrade => "DAY_TRADE",
      TradingIntent::Swing => "SWING",
      TradingIntent::LongTerm => "LONG_TERM",
    }
  }
}

impl fmt::Display for TradingIntent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TradingIntent {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "DAY_TRADE" => Ok(TradingIntent::DayTrade),
      "SWING" => Ok(TradingIntent::Swing),
      "LONG_TERM" => Ok(TradingIntent::LongTerm),
      other => Err(Error::UnknownIntent(other.to_owned())),
    }
  }
}

/// A completed analysis run.
///
/// `setups` are kept as raw JSON values; their schema belongs to the
/// analysis pipeline, not the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  pub intent:       TradingIntent,
  pub generated_at: DateTime<Utc>,
  pub setups:       Vec<serde_json::Value>,
}

impl AnalysisResult {
  pub fn setup_count(&self) -> usize { self.setups.len() }
}

/// The AI-derived verdict on a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSynthesis {
  pub summary: String,
  pub risks:   Vec<String>,
  pub verdict: String,
}
