use std::sync::Arc;

use parking_lot::Mutex;

use super::Container;

/// Containers of one scope instance, indexed by object id.
///
/// Slots are filled lazily on first use. [`ObjectArena::take_all`] empties the
/// arena, so each scope is torn down once.
pub(crate) struct ObjectArena {
    slots: Mutex<Vec<Option<Arc<Container>>>>,
}

impl ObjectArena {
    pub fn new(objects: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; objects]),
        }
    }

    pub fn get(&self, object: usize) -> Option<Arc<Container>> {
        self.slots.lock().get(object).and_then(Clone::clone)
    }

    /// Returns the existing container or stores the one built by `create`.
    ///
    /// `create` runs without the lock held; if another thread stored a
    /// container first, that one wins and the new one is dropped unused.
    pub fn get_or_insert_with(&self, object: usize, create: impl FnOnce() -> Arc<Container>) -> Arc<Container> {
        if let Some(existing) = self.get(object) {
            return existing;
        }
        let created = create();
        let mut slots = self.slots.lock();
        if slots.len() <= object {
            slots.resize(object + 1, None);
        }
        match &slots[object] {
            Some(existing) => Arc::clone(existing),
            None => {
                slots[object] = Some(Arc::clone(&created));
                created
            }
        }
    }

    /// Removes all containers in object id order.
    pub fn take_all(&self) -> Vec<Arc<Container>> {
        self.slots.lock().iter_mut().filter_map(Option::take).collect()
    }
}
