//! Owned reactive container for one replica's session state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::model::{
    Door, Entity, ExploredRegion, GridType, MAX_EXPLORED_REGIONS, MapConfig, Measurement, Snapshot,
    Token,
};

type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Keeps a listener attached to a [`SessionStore`]. Dropping it detaches the
/// listener.
#[must_use = "dropping a subscription detaches the listener"]
pub struct Subscription {
    id: u64,
    store: Weak<SessionStore>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct SessionStore {
    state: RwLock<Snapshot>,
    measurement: RwLock<Option<Measurement>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    explored_limit: usize,
}

impl SessionStore {
    pub fn new(initial: Snapshot) -> Arc<Self> {
        Self::with_explored_limit(initial, MAX_EXPLORED_REGIONS)
    }

    pub fn with_explored_limit(initial: Snapshot, explored_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(initial),
            measurement: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            explored_limit,
        })
    }

    /// Registers `listener` to run after every mutation with the new state.
    /// Listeners run on the mutating thread and must not write to the store.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            store: Arc::downgrade(self),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.state.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let (result, after) = {
            let mut state = self.state.write();
            let result = f(&mut state);
            (result, state.clone())
        };
        self.notify(&after);
        result
    }

    pub fn replace(&self, snapshot: Snapshot) {
        self.update(|state| *state = snapshot);
    }

    fn notify(&self, snapshot: &Snapshot) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        trace!(
            target = "replica_sync.store",
            listeners = listeners.len(),
            "state changed"
        );
        for listener in listeners {
            listener(snapshot);
        }
    }

    /// Inserts or replaces an entity by id.
    pub fn upsert<E: Entity>(&self, entity: E) {
        self.update(|state| {
            let collection = E::collection_mut(state);
            match collection.iter_mut().find(|existing| existing.id() == entity.id()) {
                Some(slot) => *slot = entity,
                None => collection.push(entity),
            }
        });
    }

    /// Removes an entity by id. Returns false when it was not present.
    pub fn remove<E: Entity>(&self, id: &str) -> bool {
        self.update(|state| {
            let collection = E::collection_mut(state);
            let before = collection.len();
            collection.retain(|entity| entity.id() != id);
            collection.len() != before
        })
    }

    pub fn add_token(&self, token: Token) {
        self.upsert(token);
    }

    pub fn move_token(&self, id: &str, x: f64, y: f64) -> bool {
        self.update(|state| match state.tokens.iter_mut().find(|token| token.id == id) {
            Some(token) => {
                token.x = x;
                token.y = y;
                true
            }
            None => false,
        })
    }

    /// Flips a door and returns its new open state.
    pub fn toggle_door(&self, id: &str) -> Option<bool> {
        self.update(|state| {
            state.doors.iter_mut().find(|door| door.id == id).map(|door: &mut Door| {
                door.is_open = !door.is_open;
                door.is_open
            })
        })
    }

    pub fn set_map(&self, map: Option<MapConfig>) {
        self.update(|state| state.map = map);
    }

    pub fn set_grid_size(&self, grid_size: u32) {
        self.update(|state| state.grid_size = grid_size);
    }

    pub fn set_grid_type(&self, grid_type: GridType) {
        self.update(|state| state.grid_type = grid_type);
    }

    pub fn set_daylight_mode(&self, enabled: bool) {
        self.update(|state| state.is_daylight_mode = enabled);
    }

    pub fn push_explored_region(&self, region: ExploredRegion) {
        let limit = self.explored_limit;
        self.update(|state| state.push_explored_region(region, limit));
    }

    /// Current ephemeral measurement overlay. Not part of the snapshot and
    /// does not notify listeners.
    pub fn measurement(&self) -> Option<Measurement> {
        self.measurement.read().clone()
    }

    pub fn set_measurement(&self, measurement: Option<Measurement>) {
        *self.measurement.write() = measurement;
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("listeners", &self.listener_count())
            .field("explored_limit", &self.explored_limit)
            .finish_non_exhaustive()
    }
}
