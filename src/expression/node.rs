use std::{
    cell::{Cell, RefCell},
    mem::{replace, take},
    ops::Range,
    rc::Rc,
    task::Poll,
};

use tracing::{debug, trace};

use crate::{
    accessor::is_user_method,
    event::Multicast,
    registry::StateWatch,
    runtime::{config, defer, report_error},
    Array, CallIndex, ChangeEvent, Error, ErrorReport, Index, Result, Value,
};

use super::{
    ast::{Ast, AstKind, BinaryOp, LogicalOp, UnaryOp},
    builtins::object_literal,
    ops, ExpressionEngine,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dirty {
    Clean,
    MaybeDirty,
    Dirty,
}

#[derive(Clone)]
pub(crate) enum NodeKind {
    Literal(Value),
    Identifier(Rc<str>),
    /// `[object]`
    Member { property: Rc<str>, optional: bool },
    /// `[object, index]`
    Index { optional: bool },
    /// `[receiver, args..]`
    MethodCall { name: Rc<str>, optional: bool },
    /// `[callee, args..]`
    Call,
    /// `[callee, args..]`
    New,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// `[key, receiver]`
    In,
    Logical(LogicalOp),
    /// `[test, consequent, alternate]`
    Conditional,
    Sequence,
    Template(Rc<[Rc<str>]>),
    Array,
    Object(Rc<[Rc<str>]>),
}

pub(crate) struct NodeSlot {
    pub kind: NodeKind,
    pub name: &'static str,
    pub span: Range<usize>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub dirty: Dirty,
    pub value: Poll<Value>,
    pub binding: Option<Binding>,
    pub changed: Multicast<Value>,
}

/// The watched location a node currently reads.
#[derive(Clone)]
pub(crate) struct Binding {
    member: Rc<str>,
    context: usize,
    index: Index,
    watch: StateWatch,
}

fn lower(ast: &Ast) -> (NodeKind, Vec<&Ast>) {
    match &ast.kind {
        AstKind::Literal(v) => (NodeKind::Literal(v.clone()), Vec::new()),
        AstKind::Identifier(name) => (NodeKind::Identifier(name.clone()), Vec::new()),
        AstKind::Member {
            object,
            property,
            optional,
        } => (
            NodeKind::Member {
                property: property.clone(),
                optional: *optional,
            },
            vec![object],
        ),
        AstKind::Index {
            object,
            index,
            optional,
        } => (
            NodeKind::Index {
                optional: *optional,
            },
            vec![object, index],
        ),
        AstKind::Call { callee, args } => match &callee.kind {
            AstKind::Member {
                object,
                property,
                optional,
            } => (
                NodeKind::MethodCall {
                    name: property.clone(),
                    optional: *optional,
                },
                [&**object].into_iter().chain(args).collect(),
            ),
            _ => (NodeKind::Call, [&**callee].into_iter().chain(args).collect()),
        },
        AstKind::New { callee, args } => {
            (NodeKind::New, [&**callee].into_iter().chain(args).collect())
        }
        AstKind::Unary { op, operand } => (NodeKind::Unary(*op), vec![operand]),
        AstKind::Binary {
            op: BinaryOp::In,
            left,
            right,
        } => (NodeKind::In, vec![left, right]),
        AstKind::Binary { op, left, right } => (NodeKind::Binary(*op), vec![left, right]),
        AstKind::Logical { op, left, right } => (NodeKind::Logical(*op), vec![left, right]),
        AstKind::Conditional {
            test,
            consequent,
            alternate,
        } => (NodeKind::Conditional, vec![test, consequent, alternate]),
        AstKind::Sequence(items) => (NodeKind::Sequence, items.iter().collect()),
        AstKind::Template { quasis, exprs } => (
            NodeKind::Template(quasis.iter().cloned().collect()),
            exprs.iter().collect(),
        ),
        AstKind::Array(items) => (NodeKind::Array, items.iter().collect()),
        AstKind::Object(props) => (
            NodeKind::Object(props.iter().map(|(k, _)| k.clone()).collect()),
            props.iter().map(|(_, v)| v).collect(),
        ),
    }
}

fn build(ast: &Ast, parent: Option<usize>, nodes: &mut Vec<NodeSlot>) -> usize {
    let (kind, children) = lower(ast);
    let id = nodes.len();
    nodes.push(NodeSlot {
        kind,
        name: ast.kind.name(),
        span: ast.span.clone(),
        parent,
        children: Vec::new(),
        dirty: Dirty::Dirty,
        value: Poll::Pending,
        binding: None,
        changed: Multicast::new(),
    });
    let children = children
        .into_iter()
        .map(|child| build(child, Some(id), nodes))
        .collect();
    nodes[id].children = children;
    id
}

fn poll_same(a: &Poll<Value>, b: &Poll<Value>) -> bool {
    match (a, b) {
        (Poll::Ready(a), Poll::Ready(b)) => a.same(b),
        (Poll::Pending, Poll::Pending) => true,
        _ => false,
    }
}

fn all_ready(values: impl IntoIterator<Item = Poll<Value>>) -> Option<Vec<Value>> {
    values
        .into_iter()
        .map(|v| match v {
            Poll::Ready(v) => Some(v),
            Poll::Pending => None,
        })
        .collect()
}

fn read_nullish(receiver: &Value, what: &str) -> Error {
    Error::type_error(format!("cannot read properties of {receiver} (reading '{what}')"))
}

/// A compiled expression: an arena of nodes, node 0 being the root.
pub(crate) struct ExpressionData {
    pub(super) id: Rc<str>,
    pub(super) source: Rc<str>,
    pub(super) context: Value,
    pub(super) engine: ExpressionEngine,
    is_static: bool,
    pub(super) nodes: RefCell<Vec<NodeSlot>>,
    pub(super) changed: Multicast<Value>,
    evaluations: Cell<usize>,
    invalidated: RefCell<Vec<usize>>,
    is_updating: Cell<bool>,
    is_scheduled: Cell<bool>,
    is_disposed: Cell<bool>,
}

impl ExpressionData {
    pub(super) fn new(
        id: Rc<str>,
        source: Rc<str>,
        context: Value,
        engine: ExpressionEngine,
        ast: &Ast,
        is_static: bool,
    ) -> Rc<Self> {
        let mut nodes = Vec::new();
        build(ast, None, &mut nodes);
        Rc::new(Self {
            id,
            source,
            context,
            engine,
            is_static,
            nodes: RefCell::new(nodes),
            changed: Multicast::new(),
            evaluations: Cell::new(0),
            invalidated: RefCell::new(Vec::new()),
            is_updating: Cell::new(false),
            is_scheduled: Cell::new(false),
            is_disposed: Cell::new(false),
        })
    }

    pub(super) fn value(&self) -> Poll<Value> {
        self.node_value(0)
    }
    pub(super) fn node_value(&self, id: usize) -> Poll<Value> {
        self.nodes.borrow()[id].value.clone()
    }
    pub(super) fn fragment(&self, id: usize) -> String {
        let span = self.nodes.borrow()[id].span.clone();
        self.source.get(span).unwrap_or_default().to_string()
    }
    pub(super) fn evaluations(&self) -> usize {
        self.evaluations.get()
    }
    pub(super) fn is_disposed(&self) -> bool {
        self.is_disposed.get()
    }

    fn mark(&self, id: usize) {
        let mut nodes = self.nodes.borrow_mut();
        nodes[id].dirty = Dirty::Dirty;
        let mut parent = nodes[id].parent;
        while let Some(p) = parent {
            if nodes[p].dirty == Dirty::Clean {
                nodes[p].dirty = Dirty::MaybeDirty;
            }
            parent = nodes[p].parent;
        }
    }

    /// A location read by node `id` changed.
    pub(super) fn invalidate(self: &Rc<Self>, id: usize) {
        if self.is_disposed.get() {
            return;
        }
        self.mark(id);
        self.invalidated.borrow_mut().push(id);
        if self.is_updating.get() {
            return;
        }
        let transactions = self.engine.transactions();
        if transactions.is_suspended() {
            transactions.enqueue(self);
        } else if !self.is_scheduled.replace(true) {
            // Other nodes may read locations changed by the same batch.
            let this = Rc::downgrade(self);
            defer(move || {
                if let Some(this) = this.upgrade() {
                    this.is_scheduled.set(false);
                    this.update();
                }
            });
        }
    }

    /// Bring every dirty node up to date and emit the root value if it changed.
    ///
    /// Invalidations raised while updating are handled by further passes, up to
    /// `max_update_passes`.
    pub(super) fn update(self: &Rc<Self>) {
        if self.is_disposed.get() || self.is_updating.replace(true) {
            return;
        }
        let max_passes = config().max_update_passes;
        let mut passes = 0;
        loop {
            for id in take(&mut *self.invalidated.borrow_mut()) {
                self.mark(id);
            }
            if self.update_node(0) {
                if let Poll::Ready(value) = self.value() {
                    trace!(source = &*self.source, %value, "expression changed");
                    self.changed.emit(&value);
                }
            }
            passes += 1;
            if self.invalidated.borrow().is_empty() || self.is_disposed.get() {
                break;
            }
            if passes >= max_passes {
                report_error(
                    ErrorReport::new(Error::Cyclic(self.source.to_string()))
                        .with_context("expression update"),
                );
                self.invalidated.borrow_mut().clear();
                break;
            }
        }
        self.is_updating.set(false);
    }

    /// Returns `true` if the node's value changed.
    fn update_node(self: &Rc<Self>, id: usize) -> bool {
        let dirty = self.nodes.borrow()[id].dirty;
        match dirty {
            Dirty::Clean => return false,
            Dirty::MaybeDirty => {
                if !self.update_children(id) {
                    let mut nodes = self.nodes.borrow_mut();
                    if nodes[id].dirty == Dirty::MaybeDirty {
                        nodes[id].dirty = Dirty::Clean;
                        return false;
                    }
                }
            }
            Dirty::Dirty => {
                self.update_children(id);
            }
        }
        self.nodes.borrow_mut()[id].dirty = Dirty::Clean;
        if id == 0 {
            self.evaluations.set(self.evaluations.get() + 1);
        }
        let value = match self.evaluate(id) {
            Ok(value) => value,
            Err(e) => {
                report_error(ErrorReport::new(e).with_context(self.fragment(id)));
                Poll::Ready(Value::Undefined)
            }
        };
        let (old, changed) = {
            let mut nodes = self.nodes.borrow_mut();
            let node = &mut nodes[id];
            if poll_same(&node.value, &value) {
                return false;
            }
            (replace(&mut node.value, value.clone()), node.changed.clone())
        };
        drop(old);
        if let Poll::Ready(value) = &value {
            changed.emit(value);
        }
        true
    }

    /// Update the children the node's value depends on. Branches not taken by
    /// conditionals and short-circuiting operators are left as they are.
    fn update_children(self: &Rc<Self>, id: usize) -> bool {
        let (kind, children) = {
            let nodes = self.nodes.borrow();
            (nodes[id].kind.clone(), nodes[id].children.clone())
        };
        let lazy = matches!(kind, NodeKind::Conditional | NodeKind::Logical(_));
        if !lazy {
            let mut changed = false;
            for child in children {
                changed |= self.update_node(child);
            }
            return changed;
        }
        let mut changed = self.update_node(children[0]);
        let Poll::Ready(test) = self.node_value(children[0]) else {
            return changed;
        };
        if let Some(next) = self.taken_branch(&kind, &test, &children) {
            changed |= self.update_node(next);
        }
        changed
    }

    fn taken_branch(&self, kind: &NodeKind, test: &Value, children: &[usize]) -> Option<usize> {
        match kind {
            NodeKind::Conditional => Some(if test.truthy() {
                children[1]
            } else {
                children[2]
            }),
            NodeKind::Logical(op) => {
                let right = match op {
                    LogicalOp::And => test.truthy(),
                    LogicalOp::Or => !test.truthy(),
                    LogicalOp::Nullish => test.is_nullish(),
                };
                right.then_some(children[1])
            }
            _ => None,
        }
    }

    fn evaluate(self: &Rc<Self>, id: usize) -> Result<Poll<Value>> {
        let (kind, children) = {
            let nodes = self.nodes.borrow();
            (nodes[id].kind.clone(), nodes[id].children.clone())
        };
        if let NodeKind::Conditional | NodeKind::Logical(_) = kind {
            let Poll::Ready(test) = self.node_value(children[0]) else {
                return Ok(Poll::Pending);
            };
            return Ok(match self.taken_branch(&kind, &test, &children) {
                Some(next) => self.node_value(next),
                None => Poll::Ready(test),
            });
        }
        let Some(values) = all_ready(children.iter().map(|&c| self.node_value(c))) else {
            return Ok(Poll::Pending);
        };
        let value = match kind {
            NodeKind::Literal(value) => value,
            NodeKind::Identifier(name) => {
                let index = Index::key(name.clone());
                let chain = self.engine.accessors();
                if !chain.has_value(&self.context, &index) {
                    if let Some(global) = self.engine.global(&name) {
                        self.unbind(id);
                        return Ok(Poll::Ready(global));
                    }
                }
                let context = self.context.clone();
                return self.read(id, &context, index);
            }
            NodeKind::Member { property, optional } => {
                let object = &values[0];
                if object.is_nullish() {
                    self.unbind(id);
                    return match optional {
                        true => Ok(Poll::Ready(Value::Undefined)),
                        false => Err(read_nullish(object, &property)),
                    };
                }
                return self.read(id, object, Index::key(property));
            }
            NodeKind::Index { optional } => {
                let (object, index) = (&values[0], &values[1]);
                if object.is_nullish() {
                    self.unbind(id);
                    return match optional {
                        true => Ok(Poll::Ready(Value::Undefined)),
                        false => Err(read_nullish(object, &index.to_string())),
                    };
                }
                return self.read(id, object, Index::from_value(index));
            }
            NodeKind::MethodCall { name, optional } => {
                let receiver = &values[0];
                if receiver.is_nullish() {
                    self.unbind(id);
                    return match optional {
                        true => Ok(Poll::Ready(Value::Undefined)),
                        false => Err(read_nullish(receiver, &name)),
                    };
                }
                return self.call_method(id, receiver, &name, values[1..].to_vec());
            }
            NodeKind::Call => match &values[0] {
                Value::Function(f) => f.call(&Value::Undefined, &values[1..])?,
                _ => return Err(Error::NotCallable(self.fragment(children[0]))),
            },
            NodeKind::New => match &values[0] {
                Value::Function(f) => f.construct(&values[1..])?,
                _ => {
                    return Err(Error::type_error(format!(
                        "{} is not a constructor",
                        self.fragment(children[0])
                    )))
                }
            },
            NodeKind::Unary(op) => ops::unary(op, &values[0])?,
            NodeKind::Binary(op) => ops::binary(op, &values[0], &values[1])?,
            NodeKind::In => {
                let (key, receiver) = (&values[0], &values[1]);
                let index = ops::in_index(key, receiver)?;
                if !self.is_static {
                    self.bind(id, receiver, index.clone())?;
                }
                Value::Bool(self.engine.accessors().has_value(receiver, &index))
            }
            NodeKind::Sequence => values.last().cloned().unwrap_or_default(),
            NodeKind::Template(quasis) => {
                let mut s = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    s.push_str(quasi);
                    if let Some(value) = values.get(i) {
                        s.push_str(&value.to_string());
                    }
                }
                Value::from(s)
            }
            NodeKind::Array => Array::from(values).into(),
            NodeKind::Object(keys) => object_literal(keys.iter().cloned().zip(values)),
            NodeKind::Conditional | NodeKind::Logical(_) => unreachable!(),
        };
        Ok(Poll::Ready(value))
    }

    /// Read `index` of `context` through a live binding, resolving async values.
    fn read(self: &Rc<Self>, id: usize, context: &Value, index: Index) -> Result<Poll<Value>> {
        let chain = self.engine.accessors();
        let watch = if self.is_static || context.identity().is_none() {
            self.unbind(id);
            None
        } else {
            self.bind(id, context, index.clone())?.map(|(watch, _)| watch)
        };
        let value = match &watch {
            Some(watch) => watch.value(),
            None => match chain.get_resolved_value(context, &index) {
                Ok(value) => value,
                Err(Error::NoAccessor { .. }) if context.identity().is_none() => {
                    Poll::Ready(Value::Undefined)
                }
                Err(e) => return Err(e),
            },
        };
        let Poll::Ready(value) = value else {
            return Ok(Poll::Pending);
        };
        if !value.is_async() {
            return Ok(Poll::Ready(value));
        }
        match watch.and_then(|w| w.group().child(&Index::Resolved)) {
            Some(resolved) => Ok(resolved.value()),
            None => chain.get_resolved_value(&value, &Index::Resolved),
        }
    }

    fn call_method(
        self: &Rc<Self>,
        id: usize,
        receiver: &Value,
        name: &Rc<str>,
        args: Vec<Value>,
    ) -> Result<Poll<Value>> {
        let index = Index::Call(CallIndex::new(name.clone(), args));
        let chain = self.engine.accessors();
        let invoke = || match chain.get_value(receiver, &index) {
            Err(Error::NoAccessor { .. }) => Err(Error::NotCallable(format!(
                "{}.{name}",
                receiver.type_name()
            ))),
            r => r,
        };
        if self.is_static || receiver.identity().is_none() {
            self.unbind(id);
            return Ok(Poll::Ready(invoke()?));
        }
        let bound = match self.bind(id, receiver, index.clone()) {
            Err(Error::NoAccessor { .. }) => return Ok(Poll::Ready(invoke()?)),
            r => r?,
        };
        match bound {
            // A user method's observer only learns results of later calls.
            Some((_, true)) if is_user_method(receiver, name) => Ok(Poll::Ready(invoke()?)),
            Some((watch, _)) => Ok(watch.value()),
            None => Ok(Poll::Ready(invoke()?)),
        }
    }

    /// Bind node `id` to `(context, index)`, reusing its current binding when it matches.
    ///
    /// Returns the watch and whether it was newly created, or `None` if the location
    /// cannot be watched.
    fn bind(
        self: &Rc<Self>,
        id: usize,
        context: &Value,
        index: Index,
    ) -> Result<Option<(StateWatch, bool)>> {
        let identity = context.identity().unwrap_or(0);
        if let Some(b) = &self.nodes.borrow()[id].binding {
            if b.context == identity && b.index == index {
                return Ok(Some((b.watch.clone(), false)));
            }
        }
        self.unbind(id);
        let this = Rc::downgrade(self);
        let on_change = move |_: &ChangeEvent| {
            if let Some(this) = this.upgrade() {
                this.invalidate(id);
            }
        };
        match self
            .engine
            .bind(&self.id, context, index.clone(), Box::new(on_change))
        {
            Ok((member, watch)) => {
                trace!(node = id, %index, "bind");
                self.nodes.borrow_mut()[id].binding = Some(Binding {
                    member,
                    context: identity,
                    index,
                    watch: watch.clone(),
                });
                Ok(Some((watch, true)))
            }
            Err(Error::Readonly { .. } | Error::MethodNotWatchable { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn unbind(&self, id: usize) {
        let binding = self.nodes.borrow_mut()[id].binding.take();
        if let Some(binding) = binding {
            trace!(node = id, index = %binding.index, "unbind");
            self.engine.release_binding(&self.id, &binding.member);
        }
    }

    pub(super) fn is_bound(&self, id: usize) -> bool {
        self.nodes.borrow()[id].binding.is_some()
    }

    /// Release every binding and close every stream. Calling it again does nothing.
    pub(super) fn dispose(&self) {
        if self.is_disposed.replace(true) {
            return;
        }
        let (bindings, streams): (Vec<_>, Vec<_>) = self
            .nodes
            .borrow_mut()
            .iter_mut()
            .map(|n| (n.binding.take(), n.changed.clone()))
            .unzip();
        drop(bindings);
        let released = self.engine.release_group(&self.id);
        debug!(source = &*self.source, released, "expression disposed");
        for stream in streams {
            stream.close();
        }
        self.changed.close();
    }
}

impl Drop for ExpressionData {
    fn drop(&mut self) {
        self.dispose();
    }
}
