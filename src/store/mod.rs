//! Reactive session state container.
//!
//! The [`Store`] is the single owner of [`SessionState`]. Every write goes
//! through [`Store::set_state`] (JSON deep merge) or [`Store::update`]
//! (closure applied to the latest snapshot under the lock), and every write
//! is followed by a subscriber notification carrying the new snapshot.

pub mod state;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

pub use state::{
    Agent, Department, Guest, IframeState, Message, Room, SessionState, Theme, Visitor,
    WidgetConfig,
};

/// Snapshot channel capacity. Lagging subscribers skip to the latest state.
const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state patch could not be applied: {0}")]
    InvalidPatch(#[from] serde_json::Error),
}

/// Shared handle to the session state. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<SessionState>,
    initial: SessionState,
    tx: broadcast::Sender<Arc<SessionState>>,
}

impl Store {
    /// Create a store seeded with `initial`, which is also what
    /// [`Store::reset`] restores.
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(initial.clone()),
                initial,
                tx,
            }),
        }
    }

    /// Synchronous snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    /// Initial state this store was created with.
    pub fn initial_state(&self) -> &SessionState {
        &self.inner.initial
    }

    /// Subscribe to post-write snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionState>> {
        self.inner.tx.subscribe()
    }

    /// Deep-merge `patch` into the state.
    ///
    /// Objects merge recursively, arrays and scalars replace, `null` clears.
    /// A patch that does not fit the state shape leaves the state untouched.
    pub async fn set_state(&self, patch: Value) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.inner.state.lock();
            let mut current = serde_json::to_value(&*state)?;
            merge_patch(&mut current, patch);
            let next: SessionState = serde_json::from_value(current)?;
            *state = next;
            Arc::new((*state).clone())
        };
        self.notify(snapshot).await;
        Ok(())
    }

    /// Apply `f` to the latest state under the lock, then notify.
    ///
    /// This is the read-then-write primitive: `f` always sees the most
    /// recent committed state, so concurrent handlers cannot lose each
    /// other's writes.
    pub async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SessionState) -> R,
    {
        let (result, snapshot) = {
            let mut state = self.inner.state.lock();
            let result = f(&mut state);
            (result, Arc::new((*state).clone()))
        };
        self.notify(snapshot).await;
        result
    }

    /// Restore the initial state, keeping the listed top-level fields
    /// (wire names) at their current values.
    pub async fn reset(&self, keep: &[&str]) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.inner.state.lock();
            let current = serde_json::to_value(&*state)?;
            let mut fresh = serde_json::to_value(&self.inner.initial)?;
            if let (Value::Object(fresh), Value::Object(current)) = (&mut fresh, current) {
                for key in keep {
                    if let Some(value) = current.get(*key) {
                        fresh.insert((*key).to_string(), value.clone());
                    }
                }
            }
            *state = serde_json::from_value(fresh)?;
            Arc::new((*state).clone())
        };
        self.notify(snapshot).await;
        Ok(())
    }

    async fn notify(&self, snapshot: Arc<SessionState>) {
        let receivers = self.inner.tx.receiver_count();
        // No subscribers is not an error: the widget may run headless.
        let _ = self.inner.tx.send(snapshot);
        debug!(receivers, "store: state committed");
        tokio::task::yield_now().await;
    }
}

/// JSON merge patch: objects merge key by key, `null` removes, anything
/// else replaces.
pub fn merge_patch(target: &mut Value, patch: Value) {
    match patch {
        Value::Object(patch) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(target) = target {
                for (key, value) in patch {
                    if value.is_null() {
                        target.remove(&key);
                    } else {
                        merge_patch(target.entry(key).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other,
    }
}
