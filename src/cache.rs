use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
};

use tracing::debug;

use crate::Result;

mod grouped;

pub use grouped::{GroupFactory, GroupedCache, MemberKey};

#[cfg(test)]
mod tests;

/// Builds the instances held by an [`InstanceCache`].
pub trait CacheFactory {
    type Data;
    type Id: Clone + Eq + Hash + Debug;
    type Instance: Clone;

    /// Derive the id of the instance `data` describes. Must be deterministic.
    fn id(&self, data: &Self::Data) -> Self::Id;
    fn create(&self, id: &Self::Id, data: Self::Data) -> Result<Self::Instance>;

    fn on_created(&self, id: &Self::Id, instance: &Self::Instance) {
        let _ = (id, instance);
    }
    /// Called once the last reference is released.
    fn on_released(&self, id: &Self::Id, instance: Self::Instance) {
        let _ = (id, instance);
    }
    /// Called when the release of an instance leaves the cache empty.
    fn on_empty(&self) {}
}

#[derive(Debug, Clone)]
pub struct CacheEntry<Id, T> {
    pub id: Id,
    pub instance: T,
    pub refcount: usize,
}

/// Result of [`InstanceCache::release`]. `instance` is set only when this release
/// disposed it.
#[derive(Debug, Clone)]
pub struct Released<T> {
    pub instance: Option<T>,
    pub refcount: usize,
}

struct Slot<T> {
    instance: T,
    refcount: usize,
}

/// A keyed cache that constructs instances lazily and disposes each one exactly when its
/// reference count returns to zero.
///
/// Factory hooks are never called while the cache is borrowed, so they may use the cache
/// again.
pub struct InstanceCache<F: CacheFactory> {
    factory: F,
    slots: RefCell<HashMap<F::Id, Slot<F::Instance>>>,
    is_disposed: Cell<bool>,
}

impl<F: CacheFactory> InstanceCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slots: RefCell::new(HashMap::new()),
            is_disposed: Cell::new(false),
        }
    }
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Return the instance for `data`, constructing it if needed, and take a reference.
    pub fn create(&self, data: F::Data) -> Result<CacheEntry<F::Id, F::Instance>> {
        let id = self.factory.id(&data);
        if let Some(entry) = self.acquire(&id) {
            return Ok(entry);
        }
        let instance = self.factory.create(&id, data)?;
        // The factory may have created the same id re-entrantly.
        if let Some(entry) = self.acquire(&id) {
            return Ok(entry);
        }
        self.slots.borrow_mut().insert(
            id.clone(),
            Slot {
                instance: instance.clone(),
                refcount: 1,
            },
        );
        self.is_disposed.set(false);
        debug!(?id, "cache instance created");
        self.factory.on_created(&id, &instance);
        Ok(CacheEntry {
            id,
            instance,
            refcount: 1,
        })
    }

    fn acquire(&self, id: &F::Id) -> Option<CacheEntry<F::Id, F::Instance>> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots.get_mut(id)?;
        slot.refcount += 1;
        Some(CacheEntry {
            id: id.clone(),
            instance: slot.instance.clone(),
            refcount: slot.refcount,
        })
    }

    /// Drop a reference. `force` disposes the instance regardless of its count.
    ///
    /// Releasing an unknown id does nothing and reports a count of zero.
    pub fn release(&self, id: &F::Id, force: bool) -> Released<F::Instance> {
        let removed = {
            let mut slots = self.slots.borrow_mut();
            let Some(slot) = slots.get_mut(id) else {
                return Released {
                    instance: None,
                    refcount: 0,
                };
            };
            slot.refcount = if force { 0 } else { slot.refcount - 1 };
            if slot.refcount > 0 {
                return Released {
                    instance: None,
                    refcount: slot.refcount,
                };
            }
            slots.remove(id).map(|slot| (slot.instance, slots.is_empty()))
        };
        let Some((instance, is_empty)) = removed else {
            return Released {
                instance: None,
                refcount: 0,
            };
        };
        debug!(?id, force, "cache instance released");
        self.factory.on_released(id, instance.clone());
        if is_empty {
            self.factory.on_empty();
        }
        Released {
            instance: Some(instance),
            refcount: 0,
        }
    }

    pub fn get_from_id(&self, id: &F::Id) -> Option<F::Instance> {
        self.slots.borrow().get(id).map(|s| s.instance.clone())
    }
    pub fn get_from_data(&self, data: &F::Data) -> Option<F::Instance> {
        self.get_from_id(&self.factory.id(data))
    }
    pub fn has(&self, id: &F::Id) -> bool {
        self.slots.borrow().contains_key(id)
    }
    pub fn refcount(&self, id: &F::Id) -> usize {
        self.slots.borrow().get(id).map_or(0, |s| s.refcount)
    }

    /// Return the existing instance without taking a reference, or create one.
    pub fn get_or_create(&self, data: F::Data) -> Result<F::Instance> {
        match self.get_from_data(&data) {
            Some(instance) => Ok(instance),
            None => Ok(self.create(data)?.instance),
        }
    }

    pub fn ids(&self) -> Vec<F::Id> {
        self.slots.borrow().keys().cloned().collect()
    }
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
    pub fn exists(&self, instance: &F::Instance) -> bool
    where
        F::Instance: PartialEq,
    {
        self.slots.borrow().values().any(|s| &s.instance == instance)
    }

    /// Force-release every instance. Calling it again does nothing.
    pub fn dispose(&self) {
        if self.is_disposed.replace(true) {
            return;
        }
        for id in self.ids() {
            self.release(&id, true);
        }
    }
}
