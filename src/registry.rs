use std::{rc::Rc, task::Poll};

use tracing::debug;

use crate::{
    accessor::AccessorChain,
    cache::{CacheFactory, InstanceCache},
    event::Multicast,
    runtime::config,
    ChangeEvent, Index, ObserverGroup, Result, Subscription, Value, WatchRule,
};

#[cfg(test)]
mod tests;

/// Identity of a watched location: the context (by identity for handles, by value for
/// primitives), normalised index and rule identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    context: Value,
    index: Index,
    rule: Option<usize>,
}

struct WatchRequest {
    key: WatchKey,
    context: Value,
    index: Index,
    rule: Option<WatchRule>,
}

#[derive(Clone)]
struct Registration {
    group: ObserverGroup,
    _forward: Rc<Subscription>,
}

struct WatchFactory {
    chain: AccessorChain,
    changed: Multicast<ChangeEvent>,
}

impl CacheFactory for WatchFactory {
    type Data = WatchRequest;
    type Id = WatchKey;
    type Instance = Registration;

    fn id(&self, data: &WatchRequest) -> WatchKey {
        data.key.clone()
    }
    fn create(&self, _id: &WatchKey, data: WatchRequest) -> Result<Registration> {
        let group = ObserverGroup::new(&self.chain, data.context, data.index, data.rule)?;
        let changed = self.changed.clone();
        let forward = group.subscribe(move |e| changed.emit(e));
        group.initialize();
        Ok(Registration {
            group,
            _forward: Rc::new(forward),
        })
    }
    fn on_released(&self, id: &WatchKey, instance: Registration) {
        debug!(index = %id.index, "watch released");
        instance.group.dispose();
    }
}

/// Reference counted registrations of watched locations.
///
/// Watching the same `(context, index, rule)` again shares the existing observer tree.
/// Every registration's events are also emitted on [`changed`](Self::changed).
#[derive(Clone)]
pub struct StateRegistry(Rc<RegistryData>);

struct RegistryData {
    chain: AccessorChain,
    cache: InstanceCache<WatchFactory>,
    changed: Multicast<ChangeEvent>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::with_accessors(AccessorChain::builtin())
    }
    pub fn with_accessors(chain: AccessorChain) -> Self {
        let changed = Multicast::new();
        Self(Rc::new(RegistryData {
            chain: chain.clone(),
            cache: InstanceCache::new(WatchFactory {
                chain: chain.clone(),
                changed: changed.clone(),
            }),
            changed,
        }))
    }

    pub fn accessors(&self) -> &AccessorChain {
        &self.0.chain
    }

    fn key(&self, context: &Value, index: Index, rule: Option<&WatchRule>) -> Result<(WatchKey, Index)> {
        let index = self
            .0
            .chain
            .resolve(context, &index)?
            .normalize_index(context, index);
        let key = WatchKey {
            context: context.clone(),
            index: index.clone(),
            rule: rule.map(WatchRule::id),
        };
        Ok((key, index))
    }

    /// Watch `index` of `context`. `rule == None` watches shallowly.
    ///
    /// Fails if no accessor handles the location or the location cannot be watched.
    pub fn watch_state(
        &self,
        context: &Value,
        index: impl Into<Index>,
        rule: Option<WatchRule>,
    ) -> Result<StateWatch> {
        let (key, index) = self.key(context, index.into(), rule.as_ref())?;
        let entry = self.0.cache.create(WatchRequest {
            key,
            context: context.clone(),
            index,
            rule,
        })?;
        debug!(index = %entry.id.index, refcount = entry.refcount, "watch");
        Ok(StateWatch {
            key: entry.id,
            group: entry.instance.group,
        })
    }

    /// Drop one reference. Returns the remaining count; the observer tree is disposed when
    /// it reaches zero.
    pub fn release_state(&self, context: &Value, index: impl Into<Index>, rule: Option<&WatchRule>) -> usize {
        match self.key(context, index.into(), rule) {
            Ok((key, _)) => self.0.cache.release(&key, false).refcount,
            Err(_) => 0,
        }
    }
    pub fn release(&self, watch: &StateWatch) -> usize {
        self.0.cache.release(&watch.key, false).refcount
    }

    /// The cached value of a live registration of the location, or a direct read.
    ///
    /// An unsettled async location reads as `undefined`.
    pub fn get_state(&self, context: &Value, index: impl Into<Index>) -> Result<Value> {
        let (key, index) = self.key(context, index.into(), None)?;
        let live = self
            .0
            .cache
            .ids()
            .into_iter()
            .find(|k| k.context == key.context && k.index == key.index)
            .and_then(|k| self.0.cache.get_from_id(&k));
        let value = match live {
            Some(r) => r.group.value(),
            _ => self.0.chain.get_resolved_value(context, &index)?,
        };
        Ok(match value {
            Poll::Ready(value) => value,
            Poll::Pending => Value::Undefined,
        })
    }

    pub fn set_state(&self, context: &Value, index: impl Into<Index>, value: Value) -> Result<()> {
        self.0.chain.set_value(context, &index.into(), value)
    }

    pub fn refcount(&self, watch: &StateWatch) -> usize {
        self.0.cache.refcount(&watch.key)
    }

    /// Events of every active registration.
    pub fn changed(&self) -> &Multicast<ChangeEvent> {
        &self.0.changed
    }
    /// Number of distinct live registrations.
    pub fn active(&self) -> usize {
        self.0.cache.len()
    }

    /// Dispose every registration.
    pub fn dispose(&self) {
        self.0.cache.dispose();
    }
}

/// A registration returned by [`StateRegistry::watch_state`]. Dropping it does not
/// release the registration.
#[derive(Clone)]
pub struct StateWatch {
    key: WatchKey,
    group: ObserverGroup,
}

impl StateWatch {
    pub fn key(&self) -> &WatchKey {
        &self.key
    }
    pub fn group(&self) -> &ObserverGroup {
        &self.group
    }
    pub fn value(&self) -> Poll<Value> {
        self.group.value()
    }
    pub fn is_active(&self) -> bool {
        !self.group.is_disposed()
    }

    /// Subscribe, first receiving the current value when the runtime is configured to
    /// emit it.
    pub fn subscribe(&self, f: impl FnMut(&ChangeEvent) + 'static) -> Subscription {
        self.subscribe_with(config().emit_initial, f)
    }
    pub fn subscribe_changes(&self, f: impl FnMut(&ChangeEvent) + 'static) -> Subscription {
        self.subscribe_with(false, f)
    }
    pub fn subscribe_with(
        &self,
        emit_initial: bool,
        mut f: impl FnMut(&ChangeEvent) + 'static,
    ) -> Subscription {
        if emit_initial {
            if let Some(e) = self.group.root().current_event() {
                f(&e);
            }
        }
        self.group.subscribe(f)
    }
}
