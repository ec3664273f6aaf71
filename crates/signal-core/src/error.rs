//! Error types for `signal-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid ticker symbol: {0:?}")]
  InvalidSymbol(String),

  #[error("unknown trading intent: {0:?}")]
  UnknownIntent(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
