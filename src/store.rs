//! In-process authoritative store of todo collections.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::model::{Identity, TodoCollection};

type Slot = Arc<Mutex<TodoCollection>>;

/// Source of truth for every identity's collection. Never fails.
///
/// Each identity has its own lock, so mutations of one identity are
/// serialized while different identities proceed independently. Collections
/// are created lazily, seeded with the default items, and live until the
/// store is dropped.
#[derive(Debug, Default)]
pub struct AuthoritativeStore {
    slots: RwLock<AHashMap<Identity, Slot>>,
}

impl AuthoritativeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the identity's collection, seeding it if absent.
    pub fn get(&self, identity: &Identity) -> TodoCollection {
        self.slot(identity).lock().clone()
    }

    /// Replaces the identity's collection wholesale.
    pub fn put(&self, identity: &Identity, collection: TodoCollection) {
        *self.slot(identity).lock() = collection;
    }

    /// Applies `f` to the identity's collection inside its critical section
    /// and returns the closure's result with a copy of the updated collection.
    pub fn update<R>(
        &self,
        identity: &Identity,
        f: impl FnOnce(&mut TodoCollection) -> R,
    ) -> (R, TodoCollection) {
        let slot = self.slot(identity);
        let mut collection = slot.lock();
        let result = f(&mut collection);
        (result, collection.clone())
    }

    /// Returns a copy of the identity's collection without seeding one.
    pub fn peek(&self, identity: &Identity) -> Option<TodoCollection> {
        let slot = self.slots.read().get(identity).cloned()?;
        let collection = slot.lock().clone();
        Some(collection)
    }

    /// Number of identities with a collection.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no identity has a collection yet.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, identity: &Identity) -> Slot {
        if let Some(slot) = self.slots.read().get(identity) {
            return Arc::clone(slot);
        }

        Arc::clone(
            self.slots
                .write()
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TodoCollection::seeded()))),
        )
    }
}
