use std::{cell::RefCell, collections::HashMap, rc::Rc};

use tracing::debug;

use crate::{runtime::unique_id, Error, Result};

use super::{CacheFactory, InstanceCache};

/// Builds the members held by a [`GroupedCache`].
pub trait GroupFactory {
    type Data;
    type Instance: Clone;

    fn create(&self, group: &str, member: &str, data: Self::Data) -> Result<Self::Instance>;
    fn on_released(&self, group: &str, member: &str, instance: Self::Instance) {
        let _ = (group, member, instance);
    }
    /// Called when the last member of `group` is released.
    fn on_group_empty(&self, group: &str) {
        let _ = group;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub group: Rc<str>,
    pub member: Rc<str>,
}

struct Grouped<F> {
    inner: F,
    counts: RefCell<HashMap<Rc<str>, usize>>,
}

impl<F: GroupFactory> CacheFactory for Grouped<F> {
    type Data = (MemberKey, F::Data);
    type Id = MemberKey;
    type Instance = F::Instance;

    fn id(&self, data: &Self::Data) -> MemberKey {
        data.0.clone()
    }
    fn create(&self, id: &MemberKey, (_, data): Self::Data) -> Result<F::Instance> {
        self.inner.create(&id.group, &id.member, data)
    }
    fn on_created(&self, id: &MemberKey, _instance: &F::Instance) {
        *self.counts.borrow_mut().entry(id.group.clone()).or_default() += 1;
    }
    fn on_released(&self, id: &MemberKey, instance: F::Instance) {
        self.inner.on_released(&id.group, &id.member, instance);
        let is_empty = {
            let mut counts = self.counts.borrow_mut();
            match counts.get_mut(&id.group) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    counts.remove(&id.group);
                    true
                }
                None => false,
            }
        };
        if is_empty {
            debug!(group = &*id.group, "cache group emptied");
            self.inner.on_group_empty(&id.group);
        }
    }
}

/// An instance cache keyed by `(group, member)`.
///
/// Member ids are unique within a live group; registering one twice fails with
/// [`Error::IdExists`].
pub struct GroupedCache<F: GroupFactory>(InstanceCache<Grouped<F>>);

impl<F: GroupFactory> GroupedCache<F> {
    pub fn new(factory: F) -> Self {
        Self(InstanceCache::new(Grouped {
            inner: factory,
            counts: RefCell::new(HashMap::new()),
        }))
    }
    pub fn factory(&self) -> &F {
        &self.0.factory().inner
    }

    pub fn create(&self, group: &str, member: &str, data: F::Data) -> Result<F::Instance> {
        let key = MemberKey {
            group: group.into(),
            member: member.into(),
        };
        if self.0.has(&key) {
            return Err(Error::IdExists(format!("{group}/{member}")));
        }
        Ok(self.0.create((key, data))?.instance)
    }
    /// Register a member under a freshly generated id.
    pub fn create_member(&self, group: &str, data: F::Data) -> Result<(Rc<str>, F::Instance)> {
        let member: Rc<str> = unique_id().into();
        let instance = self.create(group, &member, data)?;
        Ok((member, instance))
    }

    pub fn get(&self, group: &str, member: &str) -> Option<F::Instance> {
        self.0.get_from_id(&MemberKey {
            group: group.into(),
            member: member.into(),
        })
    }
    pub fn has_group(&self, group: &str) -> bool {
        self.0.factory().counts.borrow().contains_key(group)
    }
    pub fn members(&self, group: &str) -> Vec<Rc<str>> {
        self.0
            .ids()
            .into_iter()
            .filter(|k| &*k.group == group)
            .map(|k| k.member)
            .collect()
    }
    /// Number of live members across all groups.
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn group_count(&self) -> usize {
        self.0.factory().counts.borrow().len()
    }

    pub fn release(&self, group: &str, member: &str) -> Option<F::Instance> {
        let key = MemberKey {
            group: group.into(),
            member: member.into(),
        };
        self.0.release(&key, true).instance
    }
    /// Release every member of `group`. Returns how many were released.
    pub fn release_group(&self, group: &str) -> usize {
        self.members(group)
            .into_iter()
            .filter(|member| self.release(group, member).is_some())
            .count()
    }

    pub fn dispose(&self) {
        self.0.dispose()
    }
}
