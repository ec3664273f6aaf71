//! [`AiSummaries`] accessor over the `ai_summaries` cache.

use rusqlite::OptionalExtension as _;
use signal_core::{
  policy::Table,
  record::{AiSummary, validate_symbol},
};
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Result,
  channel::QueryChannel,
  encode::{SUMMARY_COLUMNS, summary_row},
  pool::WriteOp,
  store::Context,
};

/// Cached AI summaries, exactly one per symbol.
#[derive(Clone)]
pub struct AiSummaries {
  ctx: Context,
}

impl AiSummaries {
  pub(crate) fn new(ctx: Context) -> Self { Self { ctx } }

  /// Insert or replace the summary for `summary.symbol`. All fields are
  /// replaced in one statement.
  pub async fn upsert(&self, summary: AiSummary) -> Result<()> {
    validate_symbol(&summary.symbol)?;
    self
      .ctx
      .writer
      .run("ai_summaries.upsert", move |unit| {
        unit.execute(
          WriteOp::InsertSummary,
          rusqlite::params![
            summary.symbol,
            summary.summary,
            summary.risks_json,
            summary.verdict,
            summary.generated_at,
          ],
        )?;
        Ok(())
      })
      .await
  }

  /// Delete the row keyed by `summary.symbol`. Returns whether a row was
  /// removed.
  pub async fn delete(&self, summary: &AiSummary) -> Result<bool> {
    let symbol = summary.symbol.clone();
    self
      .ctx
      .writer
      .run("ai_summaries.delete", move |unit| {
        Ok(unit.execute(WriteOp::DeleteSummary, rusqlite::params![symbol])? > 0)
      })
      .await
  }

  /// Delete every summary. Returns the number removed.
  pub async fn clear_all(&self) -> Result<usize> {
    self
      .ctx
      .writer
      .run("ai_summaries.clear_all", |unit| {
        unit.execute(WriteOp::ClearSummaries, [])
      })
      .await
  }

  /// Point lookup. A missing row is `None`, not an error.
  pub async fn get_by_symbol(&self, symbol: &str) -> Result<Option<AiSummary>> {
    let symbol = symbol.to_owned();
    self.ctx.read(move |conn| query_one(conn, &symbol)).await
  }

  /// Point lookup that gives up with [`Error::Cancelled`] once `cancel`
  /// fires. Work not yet started on the connection thread is skipped.
  pub async fn get_by_symbol_cancellable(
    &self,
    symbol: &str,
    cancel: CancellationToken,
  ) -> Result<Option<AiSummary>> {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }

    let symbol = symbol.to_owned();
    let token = cancel.clone();
    let lookup = self.ctx.conn.call(move |conn| {
      if token.is_cancelled() {
        return Ok(Err(Error::Cancelled));
      }
      Ok(Ok(query_one(conn, &symbol)?))
    });

    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(Error::Cancelled),
      res = lookup => res?,
    }
  }

  pub async fn get_all(&self) -> Result<Vec<AiSummary>> {
    self.ctx.read(query_all).await
  }

  /// Live view of every summary. Unordered.
  pub fn observe_all(&self) -> QueryChannel<AiSummary> {
    self
      .ctx
      .channel("ai_summaries.all", &[Table::AiSummaries], query_all)
  }
}

fn query_one(conn: &rusqlite::Connection, symbol: &str) -> rusqlite::Result<Option<AiSummary>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {SUMMARY_COLUMNS} FROM ai_summaries WHERE symbol = ?1"
  ))?;
  stmt.query_row(rusqlite::params![symbol], summary_row).optional()
}

fn query_all(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<AiSummary>> {
  let mut stmt = conn.prepare_cached(&format!("SELECT {SUMMARY_COLUMNS} FROM ai_summaries"))?;
  let rows = stmt.query_map([], summary_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
