//! Error type for `signal-store-sqlite`.

use signal_core::policy::Table;
use thiserror::Error;

use crate::validate::SchemaMismatch;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] signal_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The on-disk schema does not match the compiled registry. Fatal for the
  /// open attempt that produced it.
  #[error("schema mismatch: {0}")]
  SchemaMismatch(#[from] SchemaMismatch),

  #[error("migration from version {from} to {to} failed: {reason}")]
  MigrationFailed { from: i64, to: i64, reason: String },

  /// An insert violated its table's conflict policy.
  #[error("conflict on {table}: {detail}")]
  ConflictViolation { table: Table, detail: String },

  #[error("resource exhausted: {0}")]
  ResourceExhausted(String),

  /// A write unit failed and was rolled back.
  #[error("transaction {unit} aborted")]
  TransactionAborted {
    unit:   &'static str,
    #[source]
    source: rusqlite::Error,
  },

  #[error("operation cancelled")]
  Cancelled,

  #[error("store is closed")]
  Closed,
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::ConnectionClosed => Error::Closed,
      other => Error::Database(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
