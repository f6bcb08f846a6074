use crate::{Error, Index, Result, Value};

use super::ast::{BinaryOp, UnaryOp};


fn unsupported(op: impl std::fmt::Display, operands: &[&Value]) -> Error {
    let types = operands
        .iter()
        .map(|v| v.type_name())
        .collect::<Vec<_>>()
        .join(" and ");
    Error::type_error(format!("unsupported operand type(s) for {op}: {types}"))
}

fn number(op: impl std::fmt::Display + Copy, value: &Value, operands: &[&Value]) -> Result<f64> {
    match value {
        Value::Undefined => Ok(f64::NAN),
        _ => value.to_number().ok_or_else(|| unsupported(op, operands)),
    }
}

pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}
pub(crate) fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

pub(crate) fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Function(_) => "function",
        _ => "object",
    }
}

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value> {
    Ok(match op {
        UnaryOp::Not => Value::Bool(!value.truthy()),
        UnaryOp::TypeOf => Value::from(type_of(value)),
        UnaryOp::Neg => Value::Number(-number(op, value, &[value])?),
        UnaryOp::Plus => Value::Number(number(op, value, &[value])?),
        UnaryOp::BitNot => Value::Number(f64::from(!to_int32(number(op, value, &[value])?))),
    })
}

/// Strict equality. Unlike [`Value::same`], `NaN` is not equal to itself.
pub fn strict_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(l), Value::Number(r)) => l == r,
        _ => l.same(r),
    }
}

pub fn loose_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (l, r) if l.is_nullish() || r.is_nullish() => l.is_nullish() && r.is_nullish(),
        (Value::Number(_), Value::String(_) | Value::Bool(_))
        | (Value::String(_) | Value::Bool(_), Value::Number(_))
        | (Value::Bool(_), Value::String(_))
        | (Value::String(_), Value::Bool(_)) => l.to_number() == r.to_number(),
        _ => strict_equals(l, r),
    }
}

fn is_primitive_for_add(v: &Value) -> bool {
    matches!(
        v,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Date(_)
    )
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Option<std::cmp::Ordering>> {
    if let (Value::String(l), Value::String(r)) = (l, r) {
        return Ok(Some(l.cmp(r)));
    }
    let a = number(op, l, &[l, r])?;
    let b = number(op, r, &[l, r])?;
    Ok(a.partial_cmp(&b))
}

/// Evaluate a binary operator. `in` and `instanceof` are not handled here since they
/// read through the receiver.
pub fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use std::cmp::Ordering::*;
    use BinaryOp::*;
    let operands = [l, r];
    let num = |v: &Value| number(op, v, &operands);
    Ok(match op {
        Add => match (l, r) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                if matches!(l, Value::Function(_) | Value::Future(_) | Value::Stream(_))
                    || matches!(r, Value::Function(_) | Value::Future(_) | Value::Stream(_))
                {
                    return Err(unsupported(op, &operands));
                }
                Value::from(format!("{l}{r}"))
            }
            _ if is_primitive_for_add(l) && is_primitive_for_add(r) => {
                Value::Number(num(l)? + num(r)?)
            }
            _ => return Err(unsupported(op, &operands)),
        },
        Sub => Value::Number(num(l)? - num(r)?),
        Mul => Value::Number(num(l)? * num(r)?),
        Div => Value::Number(num(l)? / num(r)?),
        Rem => Value::Number(num(l)? % num(r)?),
        Exp => Value::Number(num(l)?.powf(num(r)?)),
        BitAnd => Value::Number(f64::from(to_int32(num(l)?) & to_int32(num(r)?))),
        BitOr => Value::Number(f64::from(to_int32(num(l)?) | to_int32(num(r)?))),
        BitXor => Value::Number(f64::from(to_int32(num(l)?) ^ to_int32(num(r)?))),
        Shl => Value::Number(f64::from(
            to_int32(num(l)?).wrapping_shl(to_uint32(num(r)?) & 31),
        )),
        Shr => Value::Number(f64::from(
            to_int32(num(l)?).wrapping_shr(to_uint32(num(r)?) & 31),
        )),
        UShr => Value::Number(f64::from(
            to_uint32(num(l)?).wrapping_shr(to_uint32(num(r)?) & 31),
        )),
        Eq => Value::Bool(loose_equals(l, r)),
        Ne => Value::Bool(!loose_equals(l, r)),
        StrictEq => Value::Bool(strict_equals(l, r)),
        StrictNe => Value::Bool(!strict_equals(l, r)),
        Lt => Value::Bool(compare(op, l, r)? == Some(Less)),
        Le => Value::Bool(matches!(compare(op, l, r)?, Some(Less | Equal))),
        Gt => Value::Bool(compare(op, l, r)? == Some(Greater)),
        Ge => Value::Bool(matches!(compare(op, l, r)?, Some(Greater | Equal))),
        InstanceOf => match r {
            Value::Function(f) => Value::Bool(f.is_instance(l)?),
            _ => return Err(Error::type_error("right-hand side of 'instanceof' is not callable")),
        },
        In => {
            return Err(Error::type_error(
                "'in' is evaluated against the live receiver",
            ))
        }
    })
}

/// The location an `in` test reads: `key in receiver`.
pub(crate) fn in_index(key: &Value, receiver: &Value) -> Result<Index> {
    if !receiver.is_container() {
        return Err(Error::type_error(format!(
            "cannot use 'in' operator to search for '{key}' in {}",
            receiver.type_name()
        )));
    }
    Ok(match receiver {
        Value::Map(_) | Value::Set(_) => Index::Value(key.clone()),
        _ => Index::from_value(key),
    })
}
