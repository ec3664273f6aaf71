//! Store configuration.

use std::{fmt, sync::Arc};

use serde::Deserialize;

use crate::lifecycle::{Migration, StoreCallback};

/// Default number of simultaneously checked-out statements per write.
pub const DEFAULT_STATEMENT_POOL_LIMIT: usize = 4;

/// Options applied when opening a [`Store`](crate::Store).
///
/// The serialisable part can be loaded from a config file; migrations and
/// callbacks are attached in code.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Drop and recreate every table when no migration path exists or a
  /// migration step fails. Loses data.
  pub fallback_to_destructive_migration: bool,
  /// Maximum in-flight handles per pooled write statement.
  pub statement_pool_limit:              usize,
  #[serde(skip)]
  pub migrations:                        Vec<Migration>,
  #[serde(skip)]
  pub callbacks:                         Vec<Arc<dyn StoreCallback>>,
}

impl StoreConfig {
  pub fn with_migration(mut self, migration: Migration) -> Self {
    self.migrations.push(migration);
    self
  }

  pub fn with_callback(mut self, callback: Arc<dyn StoreCallback>) -> Self {
    self.callbacks.push(callback);
    self
  }

  pub fn destructive_fallback(mut self, enabled: bool) -> Self {
    self.fallback_to_destructive_migration = enabled;
    self
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      fallback_to_destructive_migration: false,
      statement_pool_limit:              DEFAULT_STATEMENT_POOL_LIMIT,
      migrations:                        Vec::new(),
      callbacks:                         Vec::new(),
    }
  }
}

impl fmt::Debug for StoreConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreConfig")
      .field(
        "fallback_to_destructive_migration",
        &self.fallback_to_destructive_migration,
      )
      .field("statement_pool_limit", &self.statement_pool_limit)
      .field("migrations", &self.migrations)
      .field("callbacks", &self.callbacks.len())
      .finish()
  }
}
