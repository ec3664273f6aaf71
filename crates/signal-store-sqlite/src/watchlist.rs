//! [`Watchlist`] accessor over the `watchlist` table.

use signal_core::{
  policy::Table,
  record::{WatchlistItem, validate_symbol},
};

use crate::{
  Result,
  channel::QueryChannel,
  encode::{WATCHLIST_COLUMNS, watchlist_row},
  pool::WriteOp,
  store::Context,
};

/// Followed tickers, keyed by symbol. Re-adding a symbol replaces its
/// timestamp.
#[derive(Clone)]
pub struct Watchlist {
  ctx: Context,
}

impl Watchlist {
  pub(crate) fn new(ctx: Context) -> Self { Self { ctx } }

  /// Insert or replace `item`.
  pub async fn upsert(&self, item: WatchlistItem) -> Result<()> {
    validate_symbol(&item.symbol)?;
    self
      .ctx
      .writer
      .run("watchlist.upsert", move |unit| {
        unit.execute(
          WriteOp::InsertWatchlist,
          rusqlite::params![item.symbol, item.added_at],
        )?;
        Ok(())
      })
      .await
  }

  /// Remove `symbol`. Returns whether a row was removed; absent symbols are
  /// not an error.
  pub async fn delete(&self, symbol: &str) -> Result<bool> {
    let symbol = symbol.to_owned();
    self
      .ctx
      .writer
      .run("watchlist.delete", move |unit| {
        let removed =
          unit.execute(WriteOp::DeleteWatchlistBySymbol, rusqlite::params![symbol])?;
        Ok(removed > 0)
      })
      .await
  }

  /// Every item, most recently added first.
  pub async fn get_all(&self) -> Result<Vec<WatchlistItem>> {
    self.ctx.read(query_all).await
  }

  /// Live view of every item, most recently added first.
  pub fn observe_all(&self) -> QueryChannel<WatchlistItem> {
    self.ctx.channel("watchlist.all", &[Table::Watchlist], query_all)
  }
}

fn query_all(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<WatchlistItem>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {WATCHLIST_COLUMNS} FROM watchlist ORDER BY addedAt DESC, symbol ASC"
  ))?;
  let rows = stmt.query_map([], watchlist_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
