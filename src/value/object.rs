use std::{cell::RefCell, rc::Rc};

use crate::{
    runtime::batch, CallIndex, Error, Function, HookFilter, Index, Result, Subscription, Value,
};

use super::{Hooks, Mutation, MutationSink};

type Getter = Rc<dyn Fn(&Object) -> Value>;
type Setter = Rc<dyn Fn(&Object, Value) -> Result<()>>;

#[derive(Clone)]
enum Property {
    Data { value: Value, writable: bool },
    Computed { get: Getter, set: Option<Setter> },
}

/// How a property of an [`Object`] can be read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Writable,
    Readonly,
    Computed { settable: bool },
    Method,
}

/// Shared handle to a property bag. Property order is insertion order.
#[derive(Clone, Default)]
pub struct Object(Rc<ObjectData>);

#[derive(Default)]
struct ObjectData {
    props: RefCell<Vec<(Rc<str>, Property)>>,
    hooks: Hooks,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn from_entries<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let this = Self::new();
        for (key, value) in entries {
            this.insert(key, value);
        }
        this
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.0.props.borrow().iter().position(|(k, _)| &**k == key)
    }
    fn property(&self, key: &str) -> Option<Property> {
        self.0
            .props
            .borrow()
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, p)| p.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }
    pub fn len(&self) -> usize {
        self.0.props.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn property_kind(&self, key: &str) -> Option<PropertyKind> {
        Some(match self.property(key)? {
            Property::Data {
                value: Value::Function(_),
                ..
            } => PropertyKind::Method,
            Property::Data { writable: true, .. } => PropertyKind::Writable,
            Property::Data { writable: false, .. } => PropertyKind::Readonly,
            Property::Computed { set, .. } => PropertyKind::Computed {
                settable: set.is_some(),
            },
        })
    }

    /// Read a property. Getters run outside of any internal borrow.
    pub fn get(&self, key: &str) -> Value {
        match self.property(key) {
            Some(Property::Data { value, .. }) => value,
            Some(Property::Computed { get, .. }) => get(self),
            None => Value::Undefined,
        }
    }

    /// Write a property, adding it when missing.
    ///
    /// Fails with [`Error::Unsupported`] for readonly and getter-only properties.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        match self.property(key) {
            Some(Property::Data {
                writable: false, ..
            })
            | Some(Property::Computed { set: None, .. }) => Err(Error::Unsupported {
                type_name: "Object",
                index: key.to_string(),
            }),
            Some(Property::Computed { set: Some(set), .. }) => batch(|| {
                set(self, value)?;
                let value = self.get(key);
                self.notify(key, value);
                Ok(())
            }),
            Some(Property::Data { .. }) | None => {
                self.insert(key, value);
                Ok(())
            }
        }
    }

    /// Define or redefine `key` as a writable data property.
    pub fn insert(&self, key: impl Into<Rc<str>>, value: Value) -> &Self {
        let key = key.into();
        self.define(
            key.clone(),
            Property::Data {
                value: value.clone(),
                writable: true,
            },
        );
        self.notify(&key, value);
        self
    }
    pub fn define_readonly(&self, key: impl Into<Rc<str>>, value: Value) -> &Self {
        self.define(
            key.into(),
            Property::Data {
                value,
                writable: false,
            },
        );
        self
    }
    pub fn define_computed(
        &self,
        key: impl Into<Rc<str>>,
        get: impl Fn(&Object) -> Value + 'static,
        set: Option<Box<dyn Fn(&Object, Value) -> Result<()>>>,
    ) -> &Self {
        self.define(
            key.into(),
            Property::Computed {
                get: Rc::new(get),
                set: set.map(Rc::from),
            },
        );
        self
    }
    pub fn define_method(
        &self,
        name: impl Into<Rc<str>>,
        f: impl Fn(&Value, &[Value]) -> Result<Value> + 'static,
    ) -> &Self {
        let name = name.into();
        let f = Function::new(name.clone(), f);
        self.define(
            name,
            Property::Data {
                value: Value::Function(f),
                writable: true,
            },
        );
        self
    }
    fn define(&self, key: Rc<str>, prop: Property) {
        let old = {
            let mut props = self.0.props.borrow_mut();
            match props.iter_mut().find(|(k, _)| *k == key) {
                Some((_, p)) => Some(std::mem::replace(p, prop)),
                None => {
                    props.push((key, prop));
                    None
                }
            }
        };
        drop(old);
    }

    /// Remove a property. Returns `false` if it was absent.
    pub fn delete(&self, key: &str) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        let removed = self.0.props.borrow_mut().remove(index);
        drop(removed);
        self.notify(key, Value::Undefined);
        true
    }

    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.props.borrow().iter().map(|(k, _)| k.clone()).collect()
    }
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(&key);
                (key, value)
            })
            .collect()
    }

    /// Invoke the method stored at `name` and notify watchers of that call.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        let Value::Function(f) = self.get(name) else {
            return Err(Error::NotCallable(name.to_string()));
        };
        let result = f.call(&Value::Object(self.clone()), args)?;
        let arguments: Rc<[Value]> = args.into();
        let mut mutation = Mutation::new(
            Value::Object(self.clone()),
            Index::Call(CallIndex::new(name, arguments.clone())),
        )
        .with_value(result.clone());
        mutation.arguments = Some(arguments);
        self.0.hooks.notify(mutation);
        Ok(result)
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: std::rc::Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }
    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> usize {
        self.0.hooks.len()
    }

    fn notify(&self, key: &str, value: Value) {
        self.0.hooks.notify(
            Mutation::new(Value::Object(self.clone()), Index::Key(key.into())).with_value(value),
        );
    }
}
