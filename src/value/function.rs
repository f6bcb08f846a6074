use std::{fmt, rc::Rc};

use crate::{Error, Kind, Result, Value};

type CallFn = dyn Fn(&Value, &[Value]) -> Result<Value>;
type ConstructFn = dyn Fn(&[Value]) -> Result<Value>;

/// A native callable. Constructors additionally create instances with `new` and answer
/// `instanceof` for their instance kind.
#[derive(Clone)]
pub struct Function(Rc<FunctionData>);

struct FunctionData {
    name: Rc<str>,
    call: Box<CallFn>,
    construct: Option<(Kind, Box<ConstructFn>)>,
}

impl Function {
    pub fn new(
        name: impl Into<Rc<str>>,
        call: impl Fn(&Value, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionData {
            name: name.into(),
            call: Box::new(call),
            construct: None,
        }))
    }
    pub fn constructor(
        name: impl Into<Rc<str>>,
        instance_kind: Kind,
        call: impl Fn(&Value, &[Value]) -> Result<Value> + 'static,
        construct: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionData {
            name: name.into(),
            call: Box::new(call),
            construct: Some((instance_kind, Box::new(construct))),
        }))
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        (self.0.call)(this, args)
    }
    pub fn construct(&self, args: &[Value]) -> Result<Value> {
        match &self.0.construct {
            Some((_, construct)) => construct(args),
            None => Err(Error::type_error(format!("{} is not a constructor", self.name()))),
        }
    }
    /// `value instanceof self`.
    pub fn is_instance(&self, value: &Value) -> Result<bool> {
        match &self.0.construct {
            Some((kind, _)) => Ok(value.kind() == *kind),
            None => Err(Error::type_error(format!(
                "right-hand side of `instanceof` is not callable: {}",
                self.name()
            ))),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}()", self.name())
    }
}
