//! The invalidation tracker: which subscriptions watch which tables.
//!
//! Owned by a [`Store`](crate::Store) and torn down with it. Write units
//! report the tables they changed after commit; every subscription watching
//! at least one of them receives exactly one [`Invalidation`] for that
//! commit, no matter how many of its tables changed.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use signal_core::policy::Table;
use tokio::sync::mpsc;
use tracing::debug;

/// One commit that touched tables a subscription watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
  /// Commit sequence number, increasing per tracker.
  pub seq:    u64,
  /// The watched tables that changed.
  pub tables: Vec<Table>,
}

struct Subscriber {
  tables: BTreeSet<Table>,
  tx:     mpsc::UnboundedSender<Invalidation>,
}

#[derive(Default)]
struct Registry {
  known:       BTreeSet<Table>,
  by_table:    HashMap<Table, BTreeSet<u64>>,
  subscribers: HashMap<u64, Subscriber>,
  next_id:     u64,
  seq:         u64,
}

impl Registry {
  fn remove(&mut self, id: u64) -> bool {
    let Some(sub) = self.subscribers.remove(&id) else {
      return false;
    };
    for table in sub.tables {
      if let Some(ids) = self.by_table.get_mut(&table) {
        ids.remove(&id);
        if ids.is_empty() {
          self.by_table.remove(&table);
        }
      }
    }
    true
  }
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// Maps table → live subscriptions. Cloning is cheap and shares the map.
#[derive(Clone, Default)]
pub struct InvalidationTracker {
  inner: Arc<Mutex<Registry>>,
}

impl InvalidationTracker {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Record the tables this tracker serves. Called once the store is ready.
  pub fn initialize(&self, tables: impl IntoIterator<Item = Table>) {
    let mut reg = self.lock();
    reg.known.extend(tables);
    debug!(tables = reg.known.len(), "invalidation tracker initialised");
  }

  pub fn is_initialized(&self) -> bool { !self.lock().known.is_empty() }

  /// Watch `tables`. Invalidations arrive on the returned receiver until the
  /// [`Subscription`] is dropped.
  pub fn register(
    &self,
    tables: &[Table],
  ) -> (Subscription, mpsc::UnboundedReceiver<Invalidation>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reg = self.lock();
    let id = reg.next_id;
    reg.next_id += 1;

    let tables: BTreeSet<Table> = tables.iter().copied().collect();
    debug_assert!(
      reg.known.is_empty() || tables.iter().all(|t| reg.known.contains(t)),
      "subscription watches a table the tracker does not serve"
    );
    for table in &tables {
      reg.by_table.entry(*table).or_default().insert(id);
    }
    reg.subscribers.insert(id, Subscriber { tables, tx });

    let subscription = Subscription { id, registry: Arc::downgrade(&self.inner) };
    (subscription, rx)
  }

  /// Notify every subscription watching any of `touched`. Each subscription
  /// gets one message per call.
  pub fn invalidate(&self, touched: &BTreeSet<Table>) {
    if touched.is_empty() {
      return;
    }

    let mut reg = self.lock();
    reg.seq += 1;
    let seq = reg.seq;

    let mut affected: HashMap<u64, Vec<Table>> = HashMap::new();
    for table in touched {
      if let Some(ids) = reg.by_table.get(table) {
        for id in ids {
          affected.entry(*id).or_default().push(*table);
        }
      }
    }

    let mut closed = Vec::new();
    for (id, tables) in affected {
      if let Some(sub) = reg.subscribers.get(&id)
        && sub.tx.send(Invalidation { seq, tables }).is_err()
      {
        closed.push(id);
      }
    }
    for id in closed {
      reg.remove(id);
    }

    debug!(seq, ?touched, subscribers = reg.subscribers.len(), "tables invalidated");
  }

  /// Sequence number of the latest invalidation, 0 before any commit.
  pub fn seq(&self) -> u64 { self.lock().seq }

  /// Number of live subscriptions.
  pub fn subscription_count(&self) -> usize { self.lock().subscribers.len() }

  /// Number of live subscriptions watching `table`.
  pub fn observer_count(&self, table: Table) -> usize {
    self.lock().by_table.get(&table).map_or(0, BTreeSet::len)
  }

  /// Drop every subscription. Receivers observe a closed channel.
  pub fn shutdown(&self) {
    let mut reg = self.lock();
    reg.subscribers.clear();
    reg.by_table.clear();
    reg.known.clear();
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Registration handle. Dropping it unregisters before `drop` returns.
pub struct Subscription {
  id:       u64,
  registry: Weak<Mutex<Registry>>,
}

impl Subscription {
  pub fn id(&self) -> u64 { self.id }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(self.id);
    }
  }
}
