//! Integration tests for `Store` against in-memory and on-disk databases.

use std::{
  sync::{Arc, Mutex},
  time::Duration,
};

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, Transaction};
use signal_core::{
  analysis::{AiSynthesis, AnalysisResult, TradingIntent},
  policy::Table,
  record::{AiSummary, HistoryRecord, WatchlistItem},
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::{
  Error, Migration, Observer, SchemaMismatch, Store, StoreCallback, StoreConfig,
  pool::WriteOp,
  repository::{HistoryRepository, SummaryRepository, WatchlistRepository},
  schema::{self, SCHEMA_VERSION, SchemaRegistry},
};

async fn store() -> Store {
  Store::open_in_memory(StoreConfig::default())
    .await
    .expect("in-memory store")
}

fn item(symbol: &str, added_at: i64) -> WatchlistItem { WatchlistItem::new(symbol, added_at) }

fn summary(symbol: &str, version: &str, generated_at: i64) -> AiSummary {
  AiSummary {
    symbol:       symbol.into(),
    summary:      format!("summary {version}"),
    risks_json:   format!("[\"risk {version}\"]"),
    verdict:      format!("verdict {version}"),
    generated_at,
  }
}

/// Wait for the next delivery.
async fn next<T>(obs: &mut Observer<T>) -> Vec<T> {
  timeout(Duration::from_secs(5), obs.next())
    .await
    .expect("delivery timed out")
    .expect("channel closed")
}

/// Assert nothing further is delivered.
async fn assert_quiet<T: std::fmt::Debug>(obs: &mut Observer<T>) {
  if let Ok(extra) = timeout(Duration::from_millis(150), obs.next()).await {
    panic!("unexpected delivery: {extra:?}");
  }
}

// ─── Watchlist ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn watchlist_upsert_replaces_timestamp() {
  let s = store().await;
  s.watchlist().upsert(item("ACME", 100)).await.unwrap();
  s.watchlist().upsert(item("ACME", 200)).await.unwrap();

  let all = s.watchlist().get_all().await.unwrap();
  assert_eq!(all, vec![item("ACME", 200)]);
}

#[tokio::test]
async fn watchlist_delete_absent_is_noop() {
  let s = store().await;
  assert!(!s.watchlist().delete("NOPE").await.unwrap());

  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  assert!(s.watchlist().delete("ACME").await.unwrap());
  assert!(s.watchlist().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn watchlist_rejects_empty_symbol() {
  let s = store().await;
  let err = s.watchlist().upsert(item("", 1)).await.unwrap_err();
  assert!(matches!(err, Error::Core(signal_core::Error::InvalidSymbol(_))));
}

#[tokio::test]
async fn watchlist_reads_back_sorted_regardless_of_write_order() {
  let s = store().await;
  for (sym, at) in [("B", 20), ("D", 40), ("A", 10), ("C", 30)] {
    s.watchlist().upsert(item(sym, at)).await.unwrap();
  }

  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  let rows = next(&mut obs).await;
  assert_eq!(rows, vec![item("D", 40), item("C", 30), item("B", 20), item("A", 10)]);
}

#[tokio::test]
async fn watchlist_channel_tracks_committed_set() {
  let s = store().await;
  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  assert!(next(&mut obs).await.is_empty());

  s.watchlist().upsert(item("ACME", 100)).await.unwrap();
  assert_eq!(next(&mut obs).await, vec![item("ACME", 100)]);

  s.watchlist().upsert(item("BETA", 150)).await.unwrap();
  assert_eq!(next(&mut obs).await, vec![item("BETA", 150), item("ACME", 100)]);

  s.watchlist().upsert(item("ACME", 200)).await.unwrap();
  assert_eq!(next(&mut obs).await, vec![item("ACME", 200), item("BETA", 150)]);

  s.watchlist().delete("BETA").await.unwrap();
  assert_eq!(next(&mut obs).await, vec![item("ACME", 200)]);

  assert_quiet(&mut obs).await;
}

// ─── History ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_assigns_increasing_ids_and_orders_by_generated_at() {
  let s = store().await;
  let first = s.history().append(HistoryRecord::new(5, "SWING", "[]")).await.unwrap();
  let second = s.history().append(HistoryRecord::new(3, "SWING", "[]")).await.unwrap();
  assert!(second > first);

  let rows = s.history().get_all().await.unwrap();
  assert_eq!(rows.iter().map(|r| r.generated_at).collect::<Vec<_>>(), [5, 3]);
  assert_eq!(rows[0].id, first);
  assert_eq!(rows[1].id, second);
}

#[tokio::test]
async fn history_ids_are_not_reused_after_clear() {
  let s = store().await;
  let before = s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();
  s.history().clear_all().await.unwrap();
  let after = s.history().append(HistoryRecord::new(2, "SWING", "[]")).await.unwrap();
  assert!(after > before);
}

#[tokio::test]
async fn history_colliding_id_is_a_conflict_and_changes_nothing() {
  let s = store().await;
  let id = s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();

  let mut obs = s.history().observe_all().subscribe().await.unwrap();
  assert_eq!(next(&mut obs).await.len(), 1);

  let mut dup = HistoryRecord::new(2, "DAY_TRADE", "[1]");
  dup.id = id;
  let err = s.history().append(dup).await.unwrap_err();
  assert!(matches!(
    err,
    Error::ConflictViolation { table: Table::AnalysisHistory, .. }
  ));

  let rows = s.history().get_all().await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].intent, "SWING");

  // No notification for a rolled-back unit.
  assert_quiet(&mut obs).await;
  assert_eq!(s.statement_pool().stats(WriteOp::InsertHistory).in_flight, 0);
}

#[tokio::test]
async fn history_explicit_unused_id_is_kept() {
  let s = store().await;
  let mut rec = HistoryRecord::new(1, "LONG_TERM", "[]");
  rec.id = 42;
  assert_eq!(s.history().append(rec).await.unwrap(), 42);
}

#[tokio::test]
async fn clear_all_is_idempotent() {
  let s = store().await;
  s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();

  assert_eq!(s.history().clear_all().await.unwrap(), 1);
  assert_eq!(s.history().clear_all().await.unwrap(), 0);
  assert!(s.history().get_all().await.unwrap().is_empty());

  assert_eq!(s.ai_summaries().clear_all().await.unwrap(), 1);
  assert_eq!(s.ai_summaries().clear_all().await.unwrap(), 0);
  assert!(s.ai_summaries().get_all().await.unwrap().is_empty());
}

// ─── AI summaries ────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_lookup_on_empty_table_is_absent() {
  let s = store().await;
  assert_eq!(s.ai_summaries().get_by_symbol("XYZ").await.unwrap(), None);
}

#[tokio::test]
async fn summary_upsert_replaces_every_field() {
  let s = store().await;
  s.ai_summaries().upsert(summary("ACME", "old", 1)).await.unwrap();
  s.ai_summaries().upsert(summary("ACME", "new", 2)).await.unwrap();

  let got = s.ai_summaries().get_by_symbol("ACME").await.unwrap().unwrap();
  assert_eq!(got, summary("ACME", "new", 2));
  assert_eq!(s.ai_summaries().get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn summary_delete_matches_by_key() {
  let s = store().await;
  let row = summary("ACME", "a", 1);
  s.ai_summaries().upsert(row.clone()).await.unwrap();

  assert!(s.ai_summaries().delete(&row).await.unwrap());
  assert!(!s.ai_summaries().delete(&row).await.unwrap());
  assert_eq!(s.ai_summaries().get_by_symbol("ACME").await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_lookup_never_sees_mixed_fields() {
  let s = store().await;
  s.ai_summaries().upsert(summary("ACME", "0", 0)).await.unwrap();

  let writer = {
    let s = s.clone();
    tokio::spawn(async move {
      for i in 1..=50 {
        s.ai_summaries().upsert(summary("ACME", &i.to_string(), i)).await.unwrap();
      }
    })
  };

  for _ in 0..50 {
    let got = s.ai_summaries().get_by_symbol("ACME").await.unwrap().unwrap();
    let version = got.generated_at.to_string();
    assert_eq!(got, summary("ACME", &version, got.generated_at));
  }
  writer.await.unwrap();
}

#[tokio::test]
async fn cancelled_lookup_returns_cancelled() {
  let s = store().await;
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();

  let token = CancellationToken::new();
  token.cancel();
  let err = s
    .ai_summaries()
    .get_by_symbol_cancellable("ACME", token)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Cancelled));

  let live = s
    .ai_summaries()
    .get_by_symbol_cancellable("ACME", CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(live, Some(summary("ACME", "a", 1)));
}

#[tokio::test]
async fn lookup_cancelled_while_queued_behind_busy_connection() {
  let s = store().await;
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();

  // Occupy the connection thread.
  let slow = s.observe("slow", &[], |_: &Connection| {
    std::thread::sleep(Duration::from_millis(500));
    Ok(vec![()])
  });
  let busy = tokio::spawn(async move { slow.subscribe().await.map(|_| ()) });
  tokio::time::sleep(Duration::from_millis(50)).await;

  let token = CancellationToken::new();
  let canceller = {
    let token = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      token.cancel();
    })
  };

  let started = std::time::Instant::now();
  let err = s
    .ai_summaries()
    .get_by_symbol_cancellable("ACME", token)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Cancelled));
  assert!(started.elapsed() < Duration::from_millis(400));

  canceller.await.unwrap();
  busy.await.unwrap().unwrap();

  // The abandoned lookup leaves the store usable.
  assert_eq!(
    s.ai_summaries().get_by_symbol("ACME").await.unwrap(),
    Some(summary("ACME", "a", 1))
  );
}

// ─── Reactive channels ───────────────────────────────────────────────────────

#[tokio::test]
async fn channel_delivers_initial_then_once_per_commit() {
  let s = store().await;
  let mut obs = s.history().observe_all().subscribe().await.unwrap();
  assert!(next(&mut obs).await.is_empty());

  s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();
  assert_eq!(next(&mut obs).await.len(), 1);
  s.history().append(HistoryRecord::new(2, "SWING", "[]")).await.unwrap();
  assert_eq!(next(&mut obs).await.len(), 2);

  assert_quiet(&mut obs).await;
}

#[tokio::test]
async fn initial_result_is_in_hand_when_subscribe_returns() {
  let s = store().await;
  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  assert_eq!(obs.try_next(), Some(Vec::new()));
}

async fn write_straight_after_subscribe(s: Store) {
  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  s.watchlist().upsert(item("ACME", 100)).await.unwrap();

  assert!(next(&mut obs).await.is_empty());
  assert_eq!(next(&mut obs).await, vec![item("ACME", 100)]);
  assert_quiet(&mut obs).await;
}

#[tokio::test]
async fn write_straight_after_subscribe_is_a_separate_delivery() {
  write_straight_after_subscribe(store().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_straight_after_subscribe_is_a_separate_delivery_multi_thread() {
  write_straight_after_subscribe(store().await).await;
}

#[tokio::test]
async fn late_subscriber_skips_commits_before_its_snapshot() {
  let s = store().await;
  let channel = s.watchlist().observe_all();
  let mut first = channel.subscribe().await.unwrap();
  next(&mut first).await;

  // Commit lands before the second subscriber's snapshot is read.
  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  let mut second = channel.subscribe().await.unwrap();

  assert_eq!(next(&mut first).await, vec![item("ACME", 1)]);
  assert_eq!(next(&mut second).await, vec![item("ACME", 1)]);
  assert_quiet(&mut second).await;
  assert_quiet(&mut first).await;
}

#[tokio::test]
async fn failed_initial_query_detaches_observer() {
  let s = store().await;
  let channel = s.observe("broken", &[Table::Watchlist], |conn: &Connection| {
    conn
      .query_row("SELECT symbol FROM no_such_table", [], |row| row.get::<_, String>(0))
      .map(|symbol| vec![symbol])
  });

  let err = channel.subscribe().await.err().unwrap();
  assert!(matches!(err, Error::Sqlite(_)));
  assert_eq!(channel.observer_count(), 0);
  assert_eq!(s.tracker().subscription_count(), 0);
}

#[tokio::test]
async fn unrelated_commits_do_not_redeliver() {
  let s = store().await;
  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  next(&mut obs).await;

  s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();
  assert_quiet(&mut obs).await;
}

#[tokio::test]
async fn multi_table_commit_redelivers_once() {
  let s = store().await;
  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();

  let channel = s.observe(
    "counts",
    &[Table::Watchlist, Table::AiSummaries],
    |conn: &Connection| {
      let n: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM watchlist) + (SELECT COUNT(*) FROM ai_summaries)",
        [],
        |row| row.get(0),
      )?;
      Ok(vec![n])
    },
  );
  let mut obs = channel.subscribe().await.unwrap();
  assert_eq!(next(&mut obs).await, vec![2]);

  s.clear_all_tables().await.unwrap();
  assert_eq!(next(&mut obs).await, vec![0]);
  assert_quiet(&mut obs).await;
}

#[tokio::test]
async fn late_subscriber_gets_current_state_immediately() {
  let s = store().await;
  let channel = s.watchlist().observe_all();
  let mut first = channel.subscribe().await.unwrap();
  next(&mut first).await;

  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  next(&mut first).await;

  let mut second = channel.subscribe().await.unwrap();
  assert_eq!(next(&mut second).await, vec![item("ACME", 1)]);
  assert_quiet(&mut first).await;
}

#[tokio::test]
async fn every_observer_receives_each_commit() {
  let s = store().await;
  let channel = s.watchlist().observe_all();
  let mut a = channel.subscribe().await.unwrap();
  let mut b = channel.subscribe().await.unwrap();
  next(&mut a).await;
  next(&mut b).await;

  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  assert_eq!(next(&mut a).await, vec![item("ACME", 1)]);
  assert_eq!(next(&mut b).await, vec![item("ACME", 1)]);
}

#[tokio::test]
async fn dropping_last_observer_unregisters() {
  let s = store().await;
  let channel = s.watchlist().observe_all();
  let a = channel.subscribe().await.unwrap();
  let b = channel.subscribe().await.unwrap();
  assert_eq!(s.tracker().subscription_count(), 1);
  assert_eq!(channel.observer_count(), 2);

  drop(a);
  assert_eq!(s.tracker().subscription_count(), 1);

  drop(b);
  assert_eq!(channel.observer_count(), 0);
  assert_eq!(s.tracker().subscription_count(), 0);
  assert_eq!(s.tracker().observer_count(Table::Watchlist), 0);

  // Writes after detaching schedule nothing.
  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  assert_eq!(s.tracker().subscription_count(), 0);
}

#[tokio::test]
async fn close_ends_observer_streams() {
  let s = store().await;
  let mut obs = s.watchlist().observe_all().subscribe().await.unwrap();
  next(&mut obs).await;

  s.clone().close().await.unwrap();
  let end = timeout(Duration::from_secs(5), obs.next()).await.unwrap();
  assert!(end.is_none());

  let err = s.watchlist().get_all().await.unwrap_err();
  assert!(matches!(err, Error::Closed));
}

// ─── Store-level ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn clear_all_tables_empties_everything() {
  let s = store().await;
  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  s.history().append(HistoryRecord::new(1, "SWING", "[]")).await.unwrap();
  s.ai_summaries().upsert(summary("ACME", "a", 1)).await.unwrap();

  s.clear_all_tables().await.unwrap();
  s.clear_all_tables().await.unwrap();

  assert!(s.watchlist().get_all().await.unwrap().is_empty());
  assert!(s.history().get_all().await.unwrap().is_empty());
  assert!(s.ai_summaries().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn pooled_statements_are_reused_and_released() {
  let s = store().await;
  for i in 0..5 {
    s.watchlist().upsert(item("ACME", i)).await.unwrap();
  }
  let stats = s.statement_pool().stats(WriteOp::InsertWatchlist);
  assert!(stats.compiled);
  assert_eq!(stats.acquisitions, 5);
  assert_eq!(s.statement_pool().in_flight(), 0);
  assert!(!s.statement_pool().stats(WriteOp::ClearSummaries).compiled);
}

#[tokio::test]
async fn in_memory_open_reports_creation() {
  let s = store().await;
  assert!(s.open_report().created);
  assert_eq!(s.open_report().migrated_from, None);
  assert!(s.tracker().is_initialized());
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
  events: Mutex<Vec<&'static str>>,
}

impl Recorder {
  fn push(&self, event: &'static str) { self.events.lock().unwrap().push(event); }

  fn take(&self) -> Vec<&'static str> { std::mem::take(&mut *self.events.lock().unwrap()) }
}

impl StoreCallback for Recorder {
  fn on_create(&self, _: &Connection) { self.push("create"); }

  fn on_open(&self, _: &Connection) { self.push("open"); }

  fn on_destructive_migration(&self, _: &Connection) { self.push("destructive"); }

  fn on_pre_migrate(&self, _: &Connection) { self.push("pre_migrate"); }

  fn on_post_migrate(&self, _: &Connection) { self.push("post_migrate"); }
}

fn db_path(dir: &tempfile::TempDir) -> std::path::PathBuf { dir.path().join("signal.db") }

/// Write a version-0 database: watchlist without `addedAt`, one row, and a
/// trigger standing in for a derived structure.
fn write_v0(path: &std::path::Path) {
  let conn = Connection::open(path).unwrap();
  conn
    .execute_batch(
      "CREATE TABLE watchlist (symbol TEXT NOT NULL PRIMARY KEY);
       INSERT INTO watchlist (symbol) VALUES ('ACME');
       CREATE TRIGGER watchlist_touch AFTER INSERT ON watchlist BEGIN SELECT 1; END;
       CREATE TABLE store_master (
         id INTEGER PRIMARY KEY CHECK (id = 1),
         version INTEGER NOT NULL,
         identity_hash TEXT NOT NULL
       );
       INSERT INTO store_master (id, version, identity_hash) VALUES (1, 0, 'v0');",
    )
    .unwrap();
}

fn migrate_v0_to_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch("ALTER TABLE watchlist ADD COLUMN addedAt INTEGER NOT NULL DEFAULT 0;")?;
  for spec in SchemaRegistry::current().tables {
    tx.execute_batch(spec.ddl)?;
  }
  Ok(())
}

fn failing_step(tx: &Transaction<'_>) -> rusqlite::Result<()> {
  tx.execute_batch("ALTER TABLE watchlist ADD COLUMN addedAt INTEGER NOT NULL DEFAULT 0;")?;
  tx.execute_batch("SELECT * FROM no_such_table;")
}

fn incomplete_step(_: &Transaction<'_>) -> rusqlite::Result<()> { Ok(()) }

fn stored_version(path: &std::path::Path) -> i64 {
  let conn = Connection::open(path).unwrap();
  schema::read_master(&conn).unwrap().unwrap().version
}

#[tokio::test]
async fn fresh_file_creates_then_reopens_without_recreating() {
  let dir = tempfile::tempdir().unwrap();
  let recorder = Arc::new(Recorder::default());
  let config = StoreConfig::default().with_callback(recorder.clone());

  let s = Store::open(db_path(&dir), config.clone()).await.unwrap();
  assert!(s.open_report().created);
  assert_eq!(recorder.take(), ["create", "open"]);
  s.watchlist().upsert(item("ACME", 7)).await.unwrap();
  s.close().await.unwrap();

  let s = Store::open(db_path(&dir), config).await.unwrap();
  assert!(!s.open_report().created);
  assert_eq!(recorder.take(), ["open"]);
  assert_eq!(s.watchlist().get_all().await.unwrap(), vec![item("ACME", 7)]);
}

#[tokio::test]
async fn identity_hash_drift_is_fatal_without_fallback() {
  let dir = tempfile::tempdir().unwrap();
  Store::open(db_path(&dir), StoreConfig::default())
    .await
    .unwrap()
    .close()
    .await
    .unwrap();
  {
    let conn = Connection::open(db_path(&dir)).unwrap();
    schema::write_master(&conn, SCHEMA_VERSION, "drifted").unwrap();
  }

  let err = Store::open(db_path(&dir), StoreConfig::default())
    .await
    .err()
    .unwrap();
  assert!(matches!(
    err,
    Error::SchemaMismatch(SchemaMismatch::IdentityHash { ref found, .. }) if found == "drifted"
  ));
}

#[tokio::test]
async fn destructive_fallback_recreates_tables() {
  let dir = tempfile::tempdir().unwrap();
  let s = Store::open(db_path(&dir), StoreConfig::default()).await.unwrap();
  s.watchlist().upsert(item("ACME", 1)).await.unwrap();
  s.close().await.unwrap();
  {
    let conn = Connection::open(db_path(&dir)).unwrap();
    schema::write_master(&conn, SCHEMA_VERSION, "drifted").unwrap();
  }

  let recorder = Arc::new(Recorder::default());
  let config = StoreConfig::default()
    .destructive_fallback(true)
    .with_callback(recorder.clone());
  let s = Store::open(db_path(&dir), config).await.unwrap();

  assert!(s.open_report().destructive);
  assert_eq!(recorder.take(), ["destructive", "create", "open"]);
  assert!(s.watchlist().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn migration_upgrades_in_place() {
  let dir = tempfile::tempdir().unwrap();
  write_v0(&db_path(&dir));

  let recorder = Arc::new(Recorder::default());
  let config = StoreConfig::default()
    .with_migration(Migration::new(0, 1, migrate_v0_to_v1))
    .with_callback(recorder.clone());
  let s = Store::open(db_path(&dir), config).await.unwrap();

  assert_eq!(s.open_report().migrated_from, Some(0));
  assert!(!s.open_report().destructive);
  assert_eq!(recorder.take(), ["pre_migrate", "post_migrate", "open"]);
  assert_eq!(s.watchlist().get_all().await.unwrap(), vec![item("ACME", 0)]);

  s.close().await.unwrap();

  let conn = Connection::open(db_path(&dir)).unwrap();
  let triggers: i64 = conn
    .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger'", [], |row| {
      row.get(0)
    })
    .unwrap();
  assert_eq!(triggers, 0);
  assert_eq!(stored_version(&db_path(&dir)), SCHEMA_VERSION);
}

#[tokio::test]
async fn failed_migration_step_rolls_back() {
  let dir = tempfile::tempdir().unwrap();
  write_v0(&db_path(&dir));

  let config = StoreConfig::default().with_migration(Migration::new(0, 1, failing_step));
  let err = Store::open(db_path(&dir), config).await.err().unwrap();
  assert!(matches!(err, Error::MigrationFailed { from: 0, to: 1, .. }));

  assert_eq!(stored_version(&db_path(&dir)), 0);
  let conn = Connection::open(db_path(&dir)).unwrap();
  let info = crate::validate::read_table_info(&conn, "watchlist").unwrap().unwrap();
  assert_eq!(info.columns.len(), 1);
}

#[tokio::test]
async fn incomplete_migration_is_a_schema_mismatch() {
  let dir = tempfile::tempdir().unwrap();
  write_v0(&db_path(&dir));

  // Fatal even with the destructive fallback enabled.
  let config = StoreConfig::default()
    .destructive_fallback(true)
    .with_migration(Migration::new(0, 1, incomplete_step));
  let err = Store::open(db_path(&dir), config).await.err().unwrap();
  assert!(matches!(
    err,
    Error::SchemaMismatch(SchemaMismatch::Table { ref table, .. }) if table == "watchlist"
  ));
  assert_eq!(stored_version(&db_path(&dir)), 0);
}

#[tokio::test]
async fn missing_migration_path_fails() {
  let dir = tempfile::tempdir().unwrap();
  write_v0(&db_path(&dir));

  let err = Store::open(db_path(&dir), StoreConfig::default())
    .await
    .err()
    .unwrap();
  assert!(matches!(err, Error::MigrationFailed { from: 0, .. }));
}

// ─── Repositories ────────────────────────────────────────────────────────────

#[tokio::test]
async fn watchlist_repository_symbols() {
  let s = store().await;
  let repo = WatchlistRepository::new(&s);
  let mut obs = repo.symbols().subscribe().await.unwrap();
  assert!(next(&mut obs).await.is_empty());

  repo.add("ACME").await.unwrap();
  assert_eq!(next(&mut obs).await, vec!["ACME".to_owned()]);

  assert!(repo.remove("ACME").await.unwrap());
  assert!(next(&mut obs).await.is_empty());
}

#[tokio::test]
async fn history_repository_round_trips_results() {
  let s = store().await;
  let repo = HistoryRepository::new(&s);
  let result = AnalysisResult {
    intent:       TradingIntent::DayTrade,
    generated_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    setups:       vec![serde_json::json!({ "symbol": "ACME", "confidence": 80 })],
  };
  repo.save(&result).await.unwrap();
  s.history()
    .append(HistoryRecord::new(1, "NOT_AN_INTENT", "[]"))
    .await
    .unwrap();

  let mut obs = repo.observe().subscribe().await.unwrap();
  assert_eq!(next(&mut obs).await, vec![result]);

  repo.clear().await.unwrap();
  assert!(next(&mut obs).await.is_empty());
}

#[tokio::test]
async fn summary_repository_round_trips_synthesis() {
  let s = store().await;
  let repo = SummaryRepository::new(&s);
  assert_eq!(repo.get("ACME").await.unwrap(), None);

  let synthesis = AiSynthesis {
    summary: "Trending up".into(),
    risks:   vec!["earnings".into(), "liquidity".into()],
    verdict: "BUY".into(),
  };
  repo.save("ACME", &synthesis).await.unwrap();
  assert_eq!(repo.get("ACME").await.unwrap(), Some(synthesis));

  assert_eq!(repo.clear().await.unwrap(), 1);
  assert_eq!(repo.get("ACME").await.unwrap(), None);
}
