//! Expressions kept live against observed state.
//!
//! An expression is parsed once and compiled into a tree of nodes. Nodes that read a
//! location (identifiers, member and index access, method calls, `in`) hold a watch on
//! it through the [`StateRegistry`]. A change marks the reading node dirty and its
//! ancestors possibly dirty; the next update recomputes only nodes whose inputs actually
//! changed, and the expression emits when its root value changes.

use std::{ops::Range, rc::Rc, task::Poll};

use tracing::debug;

use crate::{
    accessor::AccessorChain,
    cache::{GroupFactory, GroupedCache},
    registry::StateWatch,
    runtime::unique_id,
    ChangeEvent, Index, Object, Result, StateRegistry, Subscription, Value,
};

mod ast;
mod builtins;
mod lexer;
mod node;
mod ops;
mod parser;
mod transaction;

pub use ast::{Ast, AstKind, BinaryOp, LogicalOp, UnaryOp};
pub use ops::{binary, loose_equals, strict_equals, unary};
pub use parser::parse;
pub use transaction::{Transaction, TransactionManager};

pub(crate) use node::ExpressionData;

#[cfg(test)]
mod tests;

struct BindingRequest {
    context: Value,
    index: Index,
    on_change: Box<dyn FnMut(&ChangeEvent)>,
}

struct BindingFactory {
    registry: StateRegistry,
}

/// A registry watch held by one expression node. Dropping it releases the watch.
struct BindingInstance {
    registry: StateRegistry,
    watch: StateWatch,
    _subscription: Subscription,
}

impl Drop for BindingInstance {
    fn drop(&mut self) {
        self.registry.release(&self.watch);
    }
}

impl GroupFactory for BindingFactory {
    type Data = BindingRequest;
    type Instance = Rc<BindingInstance>;

    fn create(&self, _group: &str, _member: &str, data: BindingRequest) -> Result<Self::Instance> {
        let watch = self.registry.watch_state(&data.context, data.index, None)?;
        let subscription = watch.subscribe_changes(data.on_change);
        Ok(Rc::new(BindingInstance {
            registry: self.registry.clone(),
            watch,
            _subscription: subscription,
        }))
    }
    fn on_group_empty(&self, group: &str) {
        debug!(group, "expression bindings released");
    }
}

/// Compiles expressions and owns their bindings and transactions.
#[derive(Clone)]
pub struct ExpressionEngine(Rc<EngineData>);

struct EngineData {
    registry: StateRegistry,
    bindings: GroupedCache<BindingFactory>,
    transactions: TransactionManager,
    globals: Object,
}

impl ExpressionEngine {
    pub fn new(registry: StateRegistry) -> Self {
        Self(Rc::new(EngineData {
            bindings: GroupedCache::new(BindingFactory {
                registry: registry.clone(),
            }),
            registry,
            transactions: TransactionManager::new(),
            globals: builtins::globals(),
        }))
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.0.registry
    }
    pub fn accessors(&self) -> &AccessorChain {
        self.0.registry.accessors()
    }
    pub fn transactions(&self) -> &TransactionManager {
        &self.0.transactions
    }

    /// Batch re-evaluations until the returned guard is dropped.
    pub fn transaction(&self) -> Transaction {
        self.0.transactions.transaction()
    }
    pub fn suspend(&self) {
        self.0.transactions.suspend()
    }
    pub fn resume(&self) {
        self.0.transactions.resume()
    }

    /// Compile `source` against `context` and evaluate it.
    ///
    /// Fails only on malformed source. Evaluation errors are reported to the error sink
    /// and leave the failing node `undefined`.
    pub fn compile(&self, source: &str, context: &Value) -> Result<Expression> {
        self.build(source, context, false)
    }

    /// Evaluate `source` once without watching anything.
    pub fn evaluate_once(&self, source: &str, context: &Value) -> Result<Poll<Value>> {
        let expression = self.build(source, context, true)?;
        let value = expression.value();
        expression.dispose();
        Ok(value)
    }

    fn build(&self, source: &str, context: &Value, is_static: bool) -> Result<Expression> {
        let ast = parse(source)?;
        let id: Rc<str> = format!("expr-{}", unique_id()).into();
        let data = ExpressionData::new(
            id,
            source.into(),
            context.clone(),
            self.clone(),
            &ast,
            is_static,
        );
        data.update();
        debug!(source, "expression compiled");
        Ok(Expression(data))
    }

    /// Number of live bindings across all expressions.
    pub fn binding_count(&self) -> usize {
        self.0.bindings.len()
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.0.globals.has(name).then(|| self.0.globals.get(name))
    }

    pub(crate) fn bind(
        &self,
        group: &str,
        context: &Value,
        index: Index,
        on_change: Box<dyn FnMut(&ChangeEvent)>,
    ) -> Result<(Rc<str>, StateWatch)> {
        let (member, instance) = self.0.bindings.create_member(
            group,
            BindingRequest {
                context: context.clone(),
                index,
                on_change,
            },
        )?;
        Ok((member, instance.watch.clone()))
    }
    pub(crate) fn release_binding(&self, group: &str, member: &str) {
        let released = self.0.bindings.release(group, member);
        drop(released);
    }
    pub(crate) fn release_group(&self, group: &str) -> usize {
        self.0.bindings.release_group(group)
    }
}

/// A compiled, live expression. Dropping the last handle disposes it.
#[derive(Clone)]
pub struct Expression(Rc<ExpressionData>);

impl Expression {
    pub fn source(&self) -> &str {
        &self.0.source
    }
    pub fn context(&self) -> &Value {
        &self.0.context
    }
    /// The current value, `Pending` while an async operand is unsettled.
    pub fn value(&self) -> Poll<Value> {
        self.0.value()
    }

    /// Subscribe to value changes, first receiving the current value if there is one.
    pub fn subscribe(&self, mut f: impl FnMut(&Value) + 'static) -> Subscription {
        if let Poll::Ready(value) = self.value() {
            f(&value);
        }
        self.0.changed.subscribe(f)
    }
    pub fn subscribe_changes(&self, f: impl FnMut(&Value) + 'static) -> Subscription {
        self.0.changed.subscribe(f)
    }

    pub fn root(&self) -> ExpressionNode {
        self.node(0)
    }
    fn node(&self, id: usize) -> ExpressionNode {
        ExpressionNode {
            expression: self.0.clone(),
            id,
        }
    }
    pub fn node_count(&self) -> usize {
        self.0.nodes.borrow().len()
    }

    /// How many times the root value has been recomputed.
    pub fn evaluation_count(&self) -> usize {
        self.0.evaluations()
    }
    /// Number of live bindings held by this expression.
    pub fn binding_count(&self) -> usize {
        self.0.engine.0.bindings.members(&self.0.id).len()
    }

    /// Release every binding. Calling it again does nothing.
    pub fn dispose(&self) {
        self.0.dispose()
    }
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed()
    }
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source())
            .field("value", &self.value())
            .finish()
    }
}

/// One node of a compiled [`Expression`].
#[derive(Clone)]
pub struct ExpressionNode {
    expression: Rc<ExpressionData>,
    id: usize,
}

impl ExpressionNode {
    /// The syntactic kind, such as `"member"` or `"binary"`.
    pub fn kind(&self) -> &'static str {
        self.expression.nodes.borrow()[self.id].name
    }
    pub fn span(&self) -> Range<usize> {
        self.expression.nodes.borrow()[self.id].span.clone()
    }
    /// The source text of this node.
    pub fn source(&self) -> String {
        self.expression.fragment(self.id)
    }
    pub fn value(&self) -> Poll<Value> {
        self.expression.node_value(self.id)
    }
    pub fn is_bound(&self) -> bool {
        self.expression.is_bound(self.id)
    }

    pub fn parent(&self) -> Option<ExpressionNode> {
        let parent = self.expression.nodes.borrow()[self.id].parent?;
        Some(self.with_id(parent))
    }
    pub fn children(&self) -> Vec<ExpressionNode> {
        let children = self.expression.nodes.borrow()[self.id].children.clone();
        children.into_iter().map(|id| self.with_id(id)).collect()
    }
    fn with_id(&self, id: usize) -> ExpressionNode {
        ExpressionNode {
            expression: self.expression.clone(),
            id,
        }
    }

    /// Subscribe to changes of this node's value.
    pub fn subscribe(&self, f: impl FnMut(&Value) + 'static) -> Subscription {
        let changed = self.expression.nodes.borrow()[self.id].changed.clone();
        changed.subscribe(f)
    }
}

impl std::fmt::Debug for ExpressionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionNode")
            .field("kind", &self.kind())
            .field("source", &self.source())
            .field("value", &self.value())
            .finish()
    }
}
