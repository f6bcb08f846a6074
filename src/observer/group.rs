use std::{
    cell::{Cell, RefCell},
    fmt,
    hash::{Hash, Hasher},
    mem::take,
    rc::Rc,
    task::Poll,
};

use tracing::{debug, trace};

use crate::{
    accessor::AccessorChain, event::Multicast, runtime::config, HookFilter, Index, Mutation,
    MutationSink, Result, Subscription, Value,
};

use super::{ChangeEvent, Observer};

/// Decides whether the value found at a location is itself observed recursively.
///
/// Called with `(index, value, context)`. Rules compare by identity, so the same closure
/// wrapped twice gives two different rules.
#[derive(Clone)]
pub struct WatchRule(Rc<dyn Fn(&Index, &Value, &Value) -> bool>);

impl WatchRule {
    pub fn new(f: impl Fn(&Index, &Value, &Value) -> bool + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Full recursion. Every call returns the same rule.
    pub fn always() -> Self {
        thread_local! {
            static ALWAYS: WatchRule = WatchRule::new(|_, _, _| true);
        }
        ALWAYS.with(|rule| rule.clone())
    }

    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
    pub fn approves(&self, index: &Index, value: &Value, context: &Value) -> bool {
        (self.0)(index, value, context)
    }
}
impl PartialEq for WatchRule {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
impl Eq for WatchRule {}
impl Hash for WatchRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}
impl fmt::Debug for WatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchRule({:x})", self.id())
    }
}

/// An [`Observer`] plus one child group per recursively observed location below it.
///
/// Child events are re-emitted with the group's own location prepended to their chain.
/// When the root value is replaced, the old subtree is disposed before the new one is
/// built, and the root's own event is emitted last.
#[derive(Clone)]
pub struct ObserverGroup(Rc<GroupData>);

struct GroupData {
    chain: AccessorChain,
    rule: Option<WatchRule>,
    depth: usize,
    ancestors: Rc<[usize]>,
    root: Observer,
    children: RefCell<Vec<Child>>,
    structure: RefCell<Subscription>,
    root_subscription: RefCell<Subscription>,
    changed: Multicast<ChangeEvent>,
    is_initialized: Cell<bool>,
    is_disposed: Cell<bool>,
}

struct Child {
    index: Index,
    group: ObserverGroup,
    _forward: Subscription,
}

impl ObserverGroup {
    /// Build an uninitialized group. `rule == None` observes the location shallowly.
    pub fn new(
        chain: &AccessorChain,
        context: Value,
        index: Index,
        rule: Option<WatchRule>,
    ) -> Result<Self> {
        let ancestors: Rc<[usize]> = context.identity().into_iter().collect();
        Self::build(chain.clone(), context, index, rule, 0, ancestors)
    }

    fn build(
        chain: AccessorChain,
        context: Value,
        index: Index,
        rule: Option<WatchRule>,
        depth: usize,
        ancestors: Rc<[usize]>,
    ) -> Result<Self> {
        let root = Observer::new(&chain, context, index)?;
        let data = Rc::new(GroupData {
            chain,
            rule,
            depth,
            ancestors,
            root,
            children: RefCell::new(Vec::new()),
            structure: RefCell::new(Subscription::empty()),
            root_subscription: RefCell::new(Subscription::empty()),
            changed: Multicast::new(),
            is_initialized: Cell::new(false),
            is_disposed: Cell::new(false),
        });
        let weak = Rc::downgrade(&data);
        let s = data.root.subscribe(move |e| {
            if let Some(data) = weak.upgrade() {
                data.on_root_change(e);
            }
        });
        *data.root_subscription.borrow_mut() = s;
        data.attach_children();
        Ok(Self(data))
    }

    pub fn root(&self) -> &Observer {
        &self.0.root
    }
    pub fn context(&self) -> &Value {
        self.0.root.context()
    }
    pub fn index(&self) -> &Index {
        self.0.root.index()
    }
    pub fn rule(&self) -> Option<&WatchRule> {
        self.0.rule.as_ref()
    }
    pub fn value(&self) -> Poll<Value> {
        self.0.root.value()
    }

    pub fn child(&self, index: &Index) -> Option<ObserverGroup> {
        self.0
            .children
            .borrow()
            .iter()
            .find(|c| &c.index == index)
            .map(|c| c.group.clone())
    }
    pub fn child_indexes(&self) -> Vec<Index> {
        self.0.children.borrow().iter().map(|c| c.index.clone()).collect()
    }
    /// Number of observers in this subtree, including the root.
    pub fn observer_count(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(|g| g.observer_count())
            .sum::<usize>()
    }
    fn children(&self) -> Vec<ObserverGroup> {
        self.0.children.borrow().iter().map(|c| c.group.clone()).collect()
    }

    pub fn subscribe(&self, f: impl FnMut(&ChangeEvent) + 'static) -> Subscription {
        self.0.changed.subscribe(f)
    }
    pub fn changed(&self) -> &Multicast<ChangeEvent> {
        &self.0.changed
    }

    /// Start emitting, for the whole subtree.
    pub fn initialize(&self) {
        self.0.is_initialized.set(true);
        self.0.root.initialize();
        for child in self.children() {
            child.initialize();
        }
    }
    pub fn is_initialized(&self) -> bool {
        self.0.is_initialized.get()
    }

    /// Dispose the subtree, children first. Calling it again does nothing.
    pub fn dispose(&self) {
        if self.0.is_disposed.replace(true) {
            return;
        }
        self.0.detach_children();
        let mut s = take(&mut *self.0.root_subscription.borrow_mut());
        s.unsubscribe();
        self.0.root.dispose();
        self.0.changed.close();
    }
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed.get()
    }
}

impl GroupData {
    fn recurses_into(&self, value: &Value) -> bool {
        value.is_async()
            || (value.is_container()
                && self.rule.as_ref().is_some_and(|rule| {
                    rule.approves(self.root.index(), value, self.root.context())
                }))
    }

    fn attach_children(self: &Rc<Self>) {
        let Poll::Ready(value) = self.root.value() else {
            return;
        };
        let Some(identity) = value.identity() else {
            return;
        };
        if !self.recurses_into(&value) {
            return;
        }
        if self.ancestors.contains(&identity) {
            trace!(index = %self.root.index(), "cyclic value not observed");
            return;
        }
        if self.depth + 1 >= config().max_depth {
            debug!(depth = self.depth, "max depth reached");
            return;
        }
        let ancestors: Rc<[usize]> = self.ancestors.iter().copied().chain([identity]).collect();
        for index in self.chain.get_indexes(&value) {
            self.add_child(&value, index, &ancestors);
        }
        if !value.is_async() {
            let sink = Rc::downgrade(self);
            let s = value.hook(HookFilter::Any, sink).unwrap_or_default();
            *self.structure.borrow_mut() = s;
        }
    }

    fn add_child(self: &Rc<Self>, value: &Value, index: Index, ancestors: &Rc<[usize]>) -> Option<ObserverGroup> {
        let group = match ObserverGroup::build(
            self.chain.clone(),
            value.clone(),
            index.clone(),
            self.rule.clone(),
            self.depth + 1,
            ancestors.clone(),
        ) {
            Ok(group) => group,
            Err(e) => {
                debug!(%index, error = %e, "child location not observed");
                return None;
            }
        };
        let weak = Rc::downgrade(self);
        let forward = group.subscribe(move |e| {
            if let Some(data) = weak.upgrade() {
                data.on_child_change(e);
            }
        });
        if self.is_initialized.get() {
            group.initialize();
        }
        self.children.borrow_mut().push(Child {
            index,
            group: group.clone(),
            _forward: forward,
        });
        Some(group)
    }

    fn detach_children(&self) {
        let children = take(&mut *self.children.borrow_mut());
        for child in &children {
            child.group.dispose();
        }
        drop(children);
        let mut s = take(&mut *self.structure.borrow_mut());
        s.unsubscribe();
    }

    fn on_child_change(&self, e: &ChangeEvent) {
        if self.is_disposed.get() {
            return;
        }
        self.changed.emit(&e.prepend(self.root.link()));
    }

    fn on_root_change(self: Rc<Self>, e: &ChangeEvent) {
        if self.is_disposed.get() {
            return;
        }
        let had_children = !self.children.borrow().is_empty();
        if had_children || e.new_value.identity().is_some() {
            trace!(index = %self.root.index(), "rebuild subtree");
            self.detach_children();
            self.attach_children();
        }
        self.changed.emit(e);
    }
}

/// Structure changes of the observed container: new locations get a child group.
impl MutationSink for GroupData {
    fn on_mutation(self: Rc<Self>, mutation: &Mutation) {
        if self.is_disposed.get() {
            return;
        }
        let Poll::Ready(value) = self.root.value() else {
            return;
        };
        if !mutation.target.same(&value)
            || self.children.borrow().iter().any(|c| c.index == mutation.index)
            || !self.chain.get_indexes(&value).any(|i| i == mutation.index)
        {
            return;
        }
        let ancestors: Rc<[usize]> = self
            .ancestors
            .iter()
            .copied()
            .chain(value.identity())
            .collect();
        let Some(child) = self.add_child(&value, mutation.index.clone(), &ancestors) else {
            return;
        };
        if !self.is_initialized.get() {
            return;
        }
        if let Some(e) = child.root().current_event() {
            self.on_child_change(&e);
        }
    }
}

impl fmt::Debug for ObserverGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverGroup")
            .field("root", &self.0.root)
            .field("children", &self.child_indexes())
            .finish()
    }
}
