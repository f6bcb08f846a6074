use std::rc::Rc;

use crate::{Array, Date, Error, Function, Kind, Map, Object, Result, Set, Value};

/// Names resolved when the expression context does not define them.
pub(crate) fn globals() -> Object {
    let globals = Object::new();
    globals
        .define_readonly("undefined", Value::Undefined)
        .define_readonly("NaN", Value::Number(f64::NAN))
        .define_readonly("Infinity", Value::Number(f64::INFINITY))
        .define_readonly("Date", date_constructor().into())
        .define_readonly("Array", array_constructor().into())
        .define_readonly("Map", map_constructor().into())
        .define_readonly("Set", set_constructor().into())
        .define_readonly("Object", object_constructor().into());
    globals
}

fn number_arg(args: &[Value], i: usize, default: f64) -> f64 {
    args.get(i)
        .and_then(Value::to_number)
        .unwrap_or(default)
}

fn date_constructor() -> Function {
    Function::constructor(
        "Date",
        Kind::Date,
        |_, _| Ok(Value::from(Date::now().to_string())),
        |args| {
            let date = match args {
                [] => Date::now(),
                [Value::String(s)] => Date::parse(s),
                [Value::Date(d)] => Date::new(d.time()),
                [v] => Date::new(v.to_number().unwrap_or(f64::NAN)),
                _ => Date::from_parts(
                    number_arg(args, 0, f64::NAN),
                    number_arg(args, 1, 0.0),
                    number_arg(args, 2, 1.0),
                    number_arg(args, 3, 0.0),
                    number_arg(args, 4, 0.0),
                    number_arg(args, 5, 0.0),
                    number_arg(args, 6, 0.0),
                ),
            };
            Ok(date.into())
        },
    )
}

fn new_array(args: &[Value]) -> Result<Value> {
    Ok(match args {
        [Value::Number(n)] => {
            if n.fract() != 0.0 || *n < 0.0 || !n.is_finite() {
                return Err(Error::type_error("invalid array length"));
            }
            let array = Array::default();
            array.set_len(*n as usize)?;
            array.into()
        }
        _ => Array::from(args.to_vec()).into(),
    })
}

fn array_constructor() -> Function {
    Function::constructor("Array", Kind::Array, |_, args| new_array(args), new_array)
}

/// Items of an iterable argument: an array, a set or a map (as `[key, value]` pairs).
fn iter_items(value: &Value) -> Result<Vec<Value>> {
    Ok(match value {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Array(a) => a.to_vec(),
        Value::Set(s) => s.values(),
        Value::Map(m) => m
            .entries()
            .into_iter()
            .map(|(k, v)| Array::from(vec![k, v]).into())
            .collect(),
        v => return Err(Error::type_error(format!("{} is not iterable", v.type_name()))),
    })
}

fn map_constructor() -> Function {
    Function::constructor(
        "Map",
        Kind::Map,
        |_, _| Err(Error::type_error("constructor Map requires 'new'")),
        |args| {
            let map = Map::default();
            for entry in iter_items(&args.first().cloned().unwrap_or_default())? {
                let Value::Array(pair) = entry else {
                    return Err(Error::type_error(format!(
                        "iterator value {entry} is not an entry object"
                    )));
                };
                map.insert(pair.get(0), pair.get(1));
            }
            Ok(map.into())
        },
    )
}

fn set_constructor() -> Function {
    Function::constructor(
        "Set",
        Kind::Set,
        |_, _| Err(Error::type_error("constructor Set requires 'new'")),
        |args| {
            let items = iter_items(&args.first().cloned().unwrap_or_default())?;
            Ok(items.into_iter().collect::<Set>().into())
        },
    )
}

fn new_object(args: &[Value]) -> Result<Value> {
    Ok(match args.first() {
        Some(v) if v.is_container() => v.clone(),
        _ => Object::new().into(),
    })
}

fn object_constructor() -> Function {
    Function::constructor("Object", Kind::Object, |_, args| new_object(args), new_object)
}

/// A plain object built from `(key, value)` pairs of an object literal.
pub(crate) fn object_literal(entries: impl IntoIterator<Item = (Rc<str>, Value)>) -> Value {
    Object::from_entries(entries).into()
}
