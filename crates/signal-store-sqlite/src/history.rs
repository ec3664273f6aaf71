//! [`History`] accessor over the append-only `analysis_history` table.

use signal_core::{policy::Table, record::HistoryRecord};

use crate::{
  Result,
  channel::QueryChannel,
  encode::{HISTORY_COLUMNS, history_row},
  pool::WriteOp,
  store::Context,
};

/// Generated analyses, newest first. Rows are never updated.
#[derive(Clone)]
pub struct History {
  ctx: Context,
}

impl History {
  pub(crate) fn new(ctx: Context) -> Self { Self { ctx } }

  /// Append `record` and return its id.
  ///
  /// An id of `0` is assigned by the store. A non-zero id that already
  /// exists fails with [`Error::ConflictViolation`](crate::Error::ConflictViolation)
  /// and leaves the table unchanged.
  pub async fn append(&self, record: HistoryRecord) -> Result<i64> {
    self
      .ctx
      .writer
      .run("history.append", move |unit| {
        unit.execute(
          WriteOp::InsertHistory,
          rusqlite::params![
            record.id,
            record.generated_at,
            record.intent,
            record.setups_json,
          ],
        )?;
        Ok(unit.last_insert_rowid())
      })
      .await
  }

  /// Delete every record. Returns the number removed.
  pub async fn clear_all(&self) -> Result<usize> {
    self
      .ctx
      .writer
      .run("history.clear_all", |unit| {
        unit.execute(WriteOp::DeleteAllHistory, [])
      })
      .await
  }

  pub async fn get_all(&self) -> Result<Vec<HistoryRecord>> {
    self.ctx.read(query_all).await
  }

  /// Live view of every record, newest `generated_at` first.
  pub fn observe_all(&self) -> QueryChannel<HistoryRecord> {
    self
      .ctx
      .channel("history.all", &[Table::AnalysisHistory], query_all)
  }
}

fn query_all(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<HistoryRecord>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {HISTORY_COLUMNS} FROM analysis_history ORDER BY generatedAt DESC, id DESC"
  ))?;
  let rows = stmt.query_map([], history_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
