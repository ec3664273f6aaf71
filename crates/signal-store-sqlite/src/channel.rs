//! Reactive query channels.
//!
//! A [`QueryChannel`] pairs a read query with the tables it depends on. The
//! first [`Observer`] registers it with the [`InvalidationTracker`] and
//! starts a refresh task. Subscribing runs the query on the connection
//! thread, so an observer's first result is the state at subscribe time,
//! ordered against every write. After that it receives one fresh result per
//! later commit that touched a watched table. Dropping the last observer
//! unregisters the subscription and stops the task before `drop` returns.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rusqlite::Connection;
use signal_core::policy::Table;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  invalidation::{Invalidation, InvalidationTracker, Subscription},
};

type QueryFn<T> = Arc<dyn Fn(&Connection) -> rusqlite::Result<Vec<T>> + Send + Sync>;

struct Active {
  _subscription: Subscription,
  task:          JoinHandle<()>,
}

struct Slot<T> {
  tx:       mpsc::UnboundedSender<Vec<T>>,
  /// Tracker sequence the first result was read at; `None` until it has
  /// been sent. Only commits after it are delivered.
  snapshot: Option<u64>,
}

struct State<T> {
  next_observer: u64,
  observers:     HashMap<u64, Slot<T>>,
  active:        Option<Active>,
}

struct Shared<T> {
  name:    &'static str,
  tables:  Vec<Table>,
  conn:    tokio_rusqlite::Connection,
  tracker: InvalidationTracker,
  query:   QueryFn<T>,
  state:   Mutex<State<T>>,
}

impl<T> Shared<T> {
  fn lock(&self) -> MutexGuard<'_, State<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// A live query whose result is re-delivered whenever a table it reads
/// changes. Cloning shares observers and the refresh task.
pub struct QueryChannel<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for QueryChannel<T> {
  fn clone(&self) -> Self { Self { shared: Arc::clone(&self.shared) } }
}

impl<T> QueryChannel<T>
where
  T: Clone + Send + 'static,
{
  pub(crate) fn new<F>(
    name: &'static str,
    tables: &[Table],
    conn: tokio_rusqlite::Connection,
    tracker: InvalidationTracker,
    query: F,
  ) -> Self
  where
    F: Fn(&Connection) -> rusqlite::Result<Vec<T>> + Send + Sync + 'static,
  {
    Self::from_query(name, tables.to_vec(), conn, tracker, Arc::new(query))
  }

  fn from_query(
    name: &'static str,
    tables: Vec<Table>,
    conn: tokio_rusqlite::Connection,
    tracker: InvalidationTracker,
    query: QueryFn<T>,
  ) -> Self {
    Self {
      shared: Arc::new(Shared {
        name,
        tables,
        conn,
        tracker,
        query,
        state: Mutex::new(State {
          next_observer: 0,
          observers:     HashMap::new(),
          active:        None,
        }),
      }),
    }
  }

  pub fn name(&self) -> &'static str { self.shared.name }

  pub fn tables(&self) -> &[Table] { &self.shared.tables }

  /// Number of attached observers.
  pub fn observer_count(&self) -> usize { self.shared.lock().observers.len() }

  /// Attach an observer. When this returns, the observer already holds the
  /// result as of subscription; writes issued afterwards arrive as further
  /// deliveries.
  ///
  /// Fails if the initial query fails; the observer is then detached.
  pub async fn subscribe(&self) -> Result<Observer<T>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = {
      let mut state = self.shared.lock();
      let id = state.next_observer;
      state.next_observer += 1;
      state.observers.insert(id, Slot { tx, snapshot: None });

      if state.active.is_none() {
        let (subscription, invalidations) = self.shared.tracker.register(&self.shared.tables);
        let task = tokio::spawn(refresh_loop(Arc::clone(&self.shared), invalidations));
        debug!(channel = self.shared.name, "query channel activated");
        state.active = Some(Active { _subscription: subscription, task });
      }
      id
    };
    // Detaches on every early return below, including cancellation.
    let observer = Observer { id, rx, shared: Arc::clone(&self.shared) };

    let shared = Arc::clone(&self.shared);
    self
      .shared
      .conn
      .call(move |conn| {
        let rows = match (shared.query)(&*conn) {
          Ok(rows) => rows,
          Err(e) => return Ok(Err(Error::from(e))),
        };
        // Commits invalidate on this thread, so no commit can land between
        // the query and reading the sequence.
        let seq = shared.tracker.seq();
        let mut state = shared.lock();
        if let Some(slot) = state.observers.get_mut(&id) {
          slot.snapshot = Some(seq);
          let _ = slot.tx.send(rows);
        }
        Ok(Ok(()))
      })
      .await??;

    Ok(observer)
  }

  /// Derive a channel over the same tables whose rows are mapped through
  /// `f`; rows mapped to `None` are dropped.
  pub fn filter_map<U, F>(&self, name: &'static str, f: F) -> QueryChannel<U>
  where
    U: Clone + Send + 'static,
    F: Fn(T) -> Option<U> + Send + Sync + 'static,
  {
    let inner = Arc::clone(&self.shared.query);
    let query: QueryFn<U> =
      Arc::new(move |conn| Ok(inner(conn)?.into_iter().filter_map(&f).collect()));
    QueryChannel::from_query(
      name,
      self.shared.tables.clone(),
      self.shared.conn.clone(),
      self.shared.tracker.clone(),
      query,
    )
  }
}

async fn refresh_loop<T>(
  shared: Arc<Shared<T>>,
  mut invalidations: mpsc::UnboundedReceiver<Invalidation>,
) where
  T: Clone + Send + 'static,
{
  // `None` once the tracker shuts down.
  while let Some(inv) = invalidations.recv().await {
    let query = Arc::clone(&shared.query);
    let rows = match shared.conn.call(move |conn| Ok(query(&*conn)?)).await {
      Ok(rows) => rows,
      Err(e) => match Error::from(e) {
        Error::Closed => break,
        e => {
          warn!(channel = shared.name, error = %e, "query channel refresh failed");
          continue;
        }
      },
    };

    let state = shared.lock();
    debug!(channel = shared.name, seq = inv.seq, rows = rows.len(), "re-delivering");
    for slot in state.observers.values() {
      if slot.snapshot.is_some_and(|snapshot| inv.seq > snapshot) {
        let _ = slot.tx.send(rows.clone());
      }
    }
  }

  debug!(channel = shared.name, "store closed, ending query channel");
  let active = {
    let mut state = shared.lock();
    state.observers.clear();
    state.active.take()
  };
  // Dropping `active` releases the subscription; the handle is our own task.
  drop(active);
}

// ─── Observer ────────────────────────────────────────────────────────────────

/// One consumer of a [`QueryChannel`]. Detaches on drop.
pub struct Observer<T> {
  id:     u64,
  rx:     mpsc::UnboundedReceiver<Vec<T>>,
  shared: Arc<Shared<T>>,
}

impl<T> Observer<T> {
  /// Wait for the next result. `None` once the store has closed.
  pub async fn next(&mut self) -> Option<Vec<T>> { self.rx.recv().await }

  /// Take a result that has already been delivered, if any.
  pub fn try_next(&mut self) -> Option<Vec<T>> { self.rx.try_recv().ok() }
}

impl<T> Drop for Observer<T> {
  fn drop(&mut self) {
    let active = {
      let mut state = self.shared.lock();
      state.observers.remove(&self.id);
      if state.observers.is_empty() { state.active.take() } else { None }
    };

    if let Some(active) = active {
      active.task.abort();
      drop(active);
      debug!(channel = self.shared.name, "query channel deactivated");
    }
  }
}
