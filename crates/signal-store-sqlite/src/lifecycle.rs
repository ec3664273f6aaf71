//! The open sequence: create-if-absent, validate, migrate, ready.
//!
//! Everything here runs on the connection thread inside
//! [`Store::open`](crate::Store::open). Migrations run under a single
//! IMMEDIATE transaction, so a failing step leaves the file exactly as it was
//! before the attempt.

use std::fmt;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  config::StoreConfig,
  invalidation::InvalidationTracker,
  schema::{self, MasterRecord, SchemaRegistry},
  validate::{self, SchemaMismatch},
};

// ─── Hooks ───────────────────────────────────────────────────────────────────

/// Collaborator hooks invoked during the open sequence. All default to
/// no-ops.
pub trait StoreCallback: Send + Sync {
  /// Tables were created for the first time.
  fn on_create(&self, _conn: &Connection) {}

  /// The store reached the ready state.
  fn on_open(&self, _conn: &Connection) {}

  /// Every table was dropped and recreated; previous data is gone.
  fn on_destructive_migration(&self, _conn: &Connection) {}

  fn on_pre_migrate(&self, _conn: &Connection) {}

  fn on_post_migrate(&self, _conn: &Connection) {}
}

// ─── Migrations ──────────────────────────────────────────────────────────────

/// A single version step.
#[derive(Clone, Copy)]
pub struct Migration {
  pub from: i64,
  pub to:   i64,
  pub step: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

impl Migration {
  pub fn new(
    from: i64,
    to: i64,
    step: fn(&Transaction<'_>) -> rusqlite::Result<()>,
  ) -> Self {
    Self { from, to, step }
  }
}

impl fmt::Debug for Migration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Migration({} -> {})", self.from, self.to)
  }
}

/// Chain migrations from `from` up to `to`, always taking the longest jump
/// available. `None` if the gap cannot be bridged.
pub fn find_path(migrations: &[Migration], from: i64, to: i64) -> Option<Vec<Migration>> {
  if from >= to {
    return None;
  }

  let mut path = Vec::new();
  let mut current = from;
  while current < to {
    let next = migrations
      .iter()
      .filter(|m| m.from == current && m.to > current && m.to <= to)
      .max_by_key(|m| m.to)?;
    path.push(*next);
    current = next.to;
  }
  Some(path)
}

// ─── States ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Absent,
  Created,
  Validated,
  Migrating,
  Ready,
}

/// What the open sequence did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenReport {
  /// Tables were created from scratch.
  pub created:       bool,
  /// Version migrated from, if migrations ran.
  pub migrated_from: Option<i64>,
  /// Tables were dropped and recreated.
  pub destructive:   bool,
}

fn transition(state: &mut LifecycleState, next: LifecycleState) {
  debug!(from = ?*state, to = ?next, "store lifecycle");
  *state = next;
}

// ─── Open sequence ───────────────────────────────────────────────────────────

/// Drive a freshly opened connection to the ready state.
pub(crate) fn open(
  conn: &mut Connection,
  registry: &SchemaRegistry,
  config: &StoreConfig,
  tracker: &InvalidationTracker,
) -> Result<OpenReport> {
  let mut state = LifecycleState::Absent;
  let mut report = OpenReport::default();

  match schema::read_master(conn)? {
    None => {
      create(conn, registry, config)?;
      report.created = true;
      transition(&mut state, LifecycleState::Created);
      transition(&mut state, LifecycleState::Validated);
    }
    Some(master)
      if master.version == registry.version
        && master.identity_hash == registry.identity_hash() =>
    {
      validate::validate(conn, registry, &master.identity_hash)?;
      transition(&mut state, LifecycleState::Validated);
    }
    Some(master) => {
      transition(&mut state, LifecycleState::Migrating);
      migrate(conn, registry, config, &master, &mut report)?;
      transition(&mut state, LifecycleState::Validated);
    }
  }

  tracker.initialize(registry.table_names());
  for cb in &config.callbacks {
    cb.on_open(conn);
  }
  transition(&mut state, LifecycleState::Ready);

  info!(
    version = registry.version,
    created = report.created,
    migrated_from = ?report.migrated_from,
    destructive = report.destructive,
    "store ready"
  );
  Ok(report)
}

fn create(
  conn: &mut Connection,
  registry: &SchemaRegistry,
  config: &StoreConfig,
) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  registry.create_all(&tx)?;
  for cb in &config.callbacks {
    cb.on_create(&tx);
  }
  validate::validate(&tx, registry, &registry.identity_hash())?;
  tx.commit()?;
  info!(version = registry.version, "created store tables");
  Ok(())
}

fn migrate(
  conn: &mut Connection,
  registry: &SchemaRegistry,
  config: &StoreConfig,
  master: &MasterRecord,
  report: &mut OpenReport,
) -> Result<()> {
  let from = master.version;
  let to = registry.version;

  let Some(path) = find_path(&config.migrations, from, to) else {
    if config.fallback_to_destructive_migration {
      warn!(from, to, "no migration path, recreating all tables");
      return destructive(conn, registry, config, report);
    }
    if from == to {
      return Err(
        SchemaMismatch::IdentityHash {
          expected: registry.identity_hash(),
          found:    master.identity_hash.clone(),
        }
        .into(),
      );
    }
    return Err(Error::MigrationFailed {
      from,
      to,
      reason: "no migration path".to_owned(),
    });
  };

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  match apply_migrations(&tx, registry, config, &path) {
    Ok(()) => {
      tx.commit()?;
      report.migrated_from = Some(from);
      info!(from, to, steps = path.len(), "migrated store");
      Ok(())
    }
    // Re-validation failed after every step ran; fatal regardless of the
    // fallback setting.
    Err(e @ Error::SchemaMismatch(_)) => Err(e),
    Err(e) => {
      drop(tx);
      if config.fallback_to_destructive_migration {
        warn!(from, to, error = %e, "migration failed, recreating all tables");
        return destructive(conn, registry, config, report);
      }
      Err(Error::MigrationFailed { from, to, reason: e.to_string() })
    }
  }
}

fn apply_migrations(
  tx: &Transaction<'_>,
  registry: &SchemaRegistry,
  config: &StoreConfig,
  path: &[Migration],
) -> Result<()> {
  pre_migrate(tx)?;
  for cb in &config.callbacks {
    cb.on_pre_migrate(tx);
  }

  for m in path {
    debug!(from = m.from, to = m.to, "applying migration step");
    (m.step)(tx)?;
  }

  for cb in &config.callbacks {
    cb.on_post_migrate(tx);
  }

  validate::validate_structure(tx, registry)?;
  schema::write_master(tx, registry.version, &registry.identity_hash())?;
  Ok(())
}

/// Drop derived structures (triggers) that would block table rebuilds.
fn pre_migrate(conn: &Connection) -> rusqlite::Result<()> {
  let triggers = conn
    .prepare("SELECT name FROM sqlite_master WHERE type = 'trigger'")?
    .query_map([], |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for name in triggers {
    debug!(trigger = %name, "dropping trigger before migration");
    conn.execute_batch(&format!("DROP TRIGGER IF EXISTS \"{name}\""))?;
  }
  Ok(())
}

fn destructive(
  conn: &mut Connection,
  registry: &SchemaRegistry,
  config: &StoreConfig,
  report: &mut OpenReport,
) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  registry.drop_all(&tx)?;
  for cb in &config.callbacks {
    cb.on_destructive_migration(&tx);
  }
  registry.create_all(&tx)?;
  for cb in &config.callbacks {
    cb.on_create(&tx);
  }
  validate::validate(&tx, registry, &registry.identity_hash())?;
  tx.commit()?;

  report.destructive = true;
  report.created = true;
  Ok(())
}
