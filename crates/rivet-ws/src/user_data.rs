//! Per-connection user data.
//!
//! Data handed to `upgrade` is stored in an app-wide map under a fresh
//! UUID; only the UUID travels through the engine with the socket. The map
//! entry is removed by a [`UserDataGuard`] held for the duration of the
//! close event, so it goes away exactly once however the close handler
//! finishes.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use uuid::Uuid;

/// App-wide map from association key to user data.
#[derive(Clone, Default)]
pub struct UserDataMap {
    inner: Rc<RefCell<HashMap<Uuid, Rc<dyn Any>>>>,
}

impl UserDataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under a fresh time-ordered UUID.
    pub fn insert(&self, value: Rc<dyn Any>) -> Uuid {
        let id = Uuid::now_v7();
        self.inner.borrow_mut().insert(id, value);
        id
    }

    /// Looks up the data stored under `id`.
    pub fn get(&self, id: &Uuid) -> Option<Rc<dyn Any>> {
        self.inner.borrow().get(id).cloned()
    }

    /// Removes the entry. Returns `false` if it was already gone.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.inner.borrow_mut().remove(id).is_some()
    }

    /// `true` if an entry exists for `id`.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.borrow().contains_key(id)
    }

    /// Number of live associations.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// `true` if no association is live.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl fmt::Debug for UserDataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataMap")
            .field("len", &self.len())
            .finish()
    }
}

/// Removes one association from a [`UserDataMap`] when dropped.
#[must_use = "the entry is removed as soon as the guard is dropped"]
pub struct UserDataGuard {
    map: UserDataMap,
    id: Option<Uuid>,
}

impl UserDataGuard {
    /// Guards the entry for `id`. A `None` id guards nothing.
    pub fn new(map: &UserDataMap, id: Option<Uuid>) -> Self {
        Self {
            map: map.clone(),
            id,
        }
    }

    /// The guarded key.
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }
}

impl Drop for UserDataGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.map.remove(&id);
        }
    }
}

impl fmt::Debug for UserDataGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UserDataGuard").field(&self.id).finish()
    }
}
