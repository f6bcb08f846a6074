use std::{cell::Cell, rc::Rc, task::Poll};

use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

use crate::{
    utils::test_helpers::record_errors, Error, Map, Object, Promise, Runtime, StateRegistry,
    Value,
};

use super::*;

fn context(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}
fn engine() -> ExpressionEngine {
    ExpressionEngine::new(StateRegistry::new())
}
fn object(v: &Value) -> &Object {
    v.as_object().unwrap()
}

#[test]
fn recompute_on_nested_mutation_and_replacement() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "a": 20, "b": { "c": 30 } }));
    let e = engine.compile("a + b.c", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("50");

    let old_b = ctx.get("b");
    object(&old_b).set("c", 40.into()).unwrap();
    cr.verify("60");

    object(&ctx).set("b", context(json!({ "c": 5 }))).unwrap();
    cr.verify("25");

    object(&old_b).set("c", 100.into()).unwrap();
    cr.verify(());
    assert_eq!(e.value(), Poll::Ready(Value::from(25)));
}

#[test]
fn unchanged_result_is_not_emitted() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "a": 1, "b": 2 }));
    let e = engine.compile("a > 0 && b > 0", &ctx).unwrap();
    let _s = e.subscribe_changes(|v| call!("{v}"));
    object(&ctx).set("a", 5.into()).unwrap();
    cr.verify(());
    object(&ctx).set("b", (-1).into()).unwrap();
    cr.verify("false");
}

#[test]
fn shared_location_emits_once_per_mutation() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "items": [1, 2, 3] }));
    let e = engine.compile("items.length + items.length", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("6");

    let items = ctx.get("items");
    let items = items.as_array().unwrap();
    items.pop();
    cr.verify("4");
    items.pop();
    cr.verify("2");
}

#[test]
fn no_intermediate_values_across_nodes() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "items": [1, 2] }));
    let source = "`${items.length} x${items.length === 1 ? '' : 's'}`";
    let e = engine.compile(source, &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("2 xs");
    ctx.get("items").as_array().unwrap().pop();
    cr.verify("1 x");
}

#[test]
fn slot_and_length_change_together() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "items": [1, 2] }));
    let e = engine.compile("items.length + ':' + items[2]", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("2:undefined");
    ctx.get("items").as_array().unwrap().push(7.into());
    cr.verify("3:7");
}

#[test]
fn only_affected_nodes_recompute() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "a": 1, "b": { "c": 2 } }));
    let e = engine.compile("a * 10 + b.c", &ctx).unwrap();
    let children = e.root().children();
    let _s0 = children[0].subscribe(|v| call!("left {v}"));
    let _s1 = children[1].subscribe(|v| call!("right {v}"));
    let _s = e.subscribe_changes(|v| call!("root {v}"));

    object(&ctx.get("b")).set("c", 3.into()).unwrap();
    cr.verify(["right 3", "root 13"]);
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify(["left 20", "root 23"]);
}

#[test]
fn rebinding_releases_old_location() {
    let engine = engine();
    let registry = engine.registry().clone();
    let ctx = context(json!({ "a": { "b": { "c": 1 } } }));
    let e = engine.compile("a.b.c", &ctx).unwrap();
    assert_eq!(e.binding_count(), 3);
    assert_eq!(registry.active(), 3);

    let old = ctx.get("a").get("b");
    object(&ctx.get("a"))
        .set("b", context(json!({ "c": 2 })))
        .unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::from(2)));
    assert_eq!(e.binding_count(), 3);
    assert_eq!(registry.active(), 3);
    assert_eq!(object(&old).hook_count(), 0);
}

#[test]
fn async_operand_emits_once_after_settlement() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let p = Promise::pending();
    let ctx = Value::from(Object::from_entries([("p", Value::from(p.clone()))]));
    let e = rt.engine().compile("p", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify(());
    assert_eq!(e.value(), Poll::Pending);

    p.resolve(5.into());
    cr.verify(());
    rt.update();
    cr.verify("5");
    rt.update();
    cr.verify(());
}

#[test]
fn pending_operand_keeps_parents_pending() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let p = Promise::pending();
    let ctx = Value::from(Object::from_entries([
        ("p", Value::from(p.clone())),
        ("n", Value::from(1)),
    ]));
    let e = rt.engine().compile("p.x + n", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    object(&ctx).set("n", 2.into()).unwrap();
    cr.verify(());

    p.resolve(context(json!({ "x": 40 })));
    rt.update();
    cr.verify("42");
}

#[test]
fn replaced_promise_is_rebound() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let first = Promise::resolved(1.into());
    let ctx = Value::from(Object::from_entries([("p", Value::from(first))]));
    let e = rt.engine().compile("p", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("1");

    let second = Promise::pending();
    object(&ctx).set("p", second.clone().into()).unwrap();
    cr.verify(());
    assert_eq!(e.value(), Poll::Pending);
    second.resolve(2.into());
    rt.update();
    cr.verify("2");
}

#[test]
fn transaction_batches_updates() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "a": 1, "b": 2 }));
    let e = engine.compile("a + b", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("3");
    let count = e.evaluation_count();
    {
        let _t = engine.transaction();
        object(&ctx).set("a", 10.into()).unwrap();
        object(&ctx).set("b", 20.into()).unwrap();
        cr.verify(());
    }
    cr.verify("30");
    assert_eq!(e.evaluation_count(), count + 1);

    object(&ctx).set("a", 11.into()).unwrap();
    object(&ctx).set("b", 21.into()).unwrap();
    cr.verify(["31", "32"]);
    assert_eq!(e.evaluation_count(), count + 3);
}

#[test]
fn nested_suspend() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "a": 1 }));
    let e = engine.compile("a", &ctx).unwrap();
    let _s = e.subscribe_changes(|v| call!("{v}"));
    engine.suspend();
    engine.suspend();
    object(&ctx).set("a", 2.into()).unwrap();
    engine.resume();
    cr.verify(());
    assert!(engine.transactions().is_suspended());
    engine.resume();
    cr.verify("2");
    engine.resume();
    assert!(!engine.transactions().is_suspended());
}

#[test]
fn parse_error_carries_offset() {
    let engine = engine();
    let e = engine.compile("a + * b", &Value::Undefined).unwrap_err();
    let Error::Parse(e) = e else {
        panic!("expected parse error");
    };
    assert_eq!(e.offset, 4);
    assert_eq!(e.source_text, "a + * b");
}

#[test]
fn operand_type_error_is_reported() {
    let mut rt = Runtime::new();
    let errors = record_errors(&mut rt);
    let ctx = context(json!({ "a": 1, "o": {} }));
    let e = rt.engine().compile("a - o", &ctx).unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::Undefined));
    assert_eq!(
        *errors.borrow(),
        ["unsupported operand type(s) for -: number and Object"]
    );
}

#[test]
fn reading_through_nullish_is_reported() {
    let mut rt = Runtime::new();
    let errors = record_errors(&mut rt);
    let ctx = context(json!({ "a": null }));
    let e = rt.engine().compile("a.b", &ctx).unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::Undefined));
    assert_eq!(
        *errors.borrow(),
        ["cannot read properties of null (reading 'b')"]
    );
    let e = rt.engine().compile("a?.b", &ctx).unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::Undefined));
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn untaken_branch_is_not_evaluated() {
    let mut rt = Runtime::new();
    let errors = record_errors(&mut rt);
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": null }));
    let e = rt.engine().compile("x ? x.y : 0", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("0");
    object(&ctx).set("x", context(json!({ "y": 3 }))).unwrap();
    cr.verify("3");
    assert!(errors.borrow().is_empty());
}

#[test]
fn cyclic_update_is_reported() {
    let mut rt = Runtime::new();
    let errors = record_errors(&mut rt);
    let ctx = context(json!({ "a": 0, "b": 0 }));
    let e = rt.engine().compile("a + b", &ctx).unwrap();
    let o = object(&ctx).clone();
    let _s = e.subscribe_changes(move |v| {
        let next = v.to_number().unwrap_or(0.0) + 1.0;
        o.set("a", Value::Number(next)).unwrap();
    });
    object(&ctx).set("b", 1.into()).unwrap();
    assert_eq!(*errors.borrow(), ["detect cyclic update in `a + b`"]);
}

#[test]
fn dispose_releases_bindings() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let registry = engine.registry().clone();
    let ctx = context(json!({ "a": 1, "b": { "c": 2 } }));
    let e = engine.compile("a + b.c", &ctx).unwrap();
    let _s = e.subscribe_changes(|v| call!("{v}"));
    assert_eq!(engine.binding_count(), 3);

    e.dispose();
    e.dispose();
    assert!(e.is_disposed());
    assert_eq!(engine.binding_count(), 0);
    assert_eq!(registry.active(), 0);
    object(&ctx).set("a", 5.into()).unwrap();
    cr.verify(());
    assert_eq!(object(&ctx).hook_count(), 0);
}

#[test]
fn drop_disposes() {
    let engine = engine();
    let ctx = context(json!({ "a": 1 }));
    let e = engine.compile("a", &ctx).unwrap();
    assert_eq!(engine.registry().active(), 1);
    drop(e);
    assert_eq!(engine.registry().active(), 0);
}

#[test]
fn expressions_share_registrations() {
    let engine = engine();
    let registry = engine.registry().clone();
    let ctx = context(json!({ "a": 1 }));
    let e0 = engine.compile("a + 1", &ctx).unwrap();
    let e1 = engine.compile("a * 2", &ctx).unwrap();
    assert_eq!(registry.active(), 1);
    assert_eq!(engine.binding_count(), 2);
    e0.dispose();
    assert_eq!(registry.active(), 1);
    object(&ctx).set("a", 4.into()).unwrap();
    assert_eq!(e1.value(), Poll::Ready(Value::from(8)));
    e1.dispose();
    assert_eq!(registry.active(), 0);
}

#[test]
fn object_method_calls_are_observed() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let counter = Rc::new(Cell::new(0));
    let o = Object::new();
    let c = counter.clone();
    o.define_method("next", move |_, _| {
        c.set(c.get() + 1);
        Ok(Value::Number(f64::from(c.get())))
    });
    let ctx = Value::from(Object::from_entries([("o", Value::from(o.clone()))]));
    let e = engine.compile("o.next()", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("1");
    assert_eq!(counter.get(), 1);

    o.call_method("next", &[]).unwrap();
    cr.verify("2");
    assert_eq!(counter.get(), 2);
    o.call_method("next", &[Value::from(1)]).unwrap();
    cr.verify(());
}

#[test]
fn builtin_method_recomputes_on_receiver_mutation() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let map = Map::new();
    let ctx = Value::from(Object::from_entries([("m", Value::from(map.clone()))]));
    let e = engine.compile("m.get('k') ?? 'none'", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("none");
    map.insert(Value::from("k"), Value::from(5));
    cr.verify("5");
    map.insert(Value::from("j"), Value::from(6));
    cr.verify(());
    map.delete(&Value::from("k"));
    cr.verify("none");
}

#[test]
fn index_and_in_follow_changes() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({ "arr": [10, 20], "i": 0, "o": {} }));
    let e = engine.compile("`${arr[i]} ${'x' in o}`", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("10 false");
    object(&ctx).set("i", 1.into()).unwrap();
    cr.verify("20 false");
    ctx.get("arr").as_array().unwrap().set(1, 25.into()).unwrap();
    cr.verify("25 false");
    object(&ctx.get("o")).insert("x", Value::Null);
    cr.verify("25 true");
    object(&ctx.get("o")).delete("x");
    cr.verify("25 false");
}

#[test]
fn identifier_added_later() {
    let mut cr = CallRecorder::new();
    let engine = engine();
    let ctx = context(json!({}));
    let e = engine.compile("later ?? 'missing'", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("missing");
    object(&ctx).insert("later", 1.into());
    cr.verify("1");
}

#[rstest]
#[case("new Date(0).getTime()", Value::from(0))]
#[case("new Date(2020, 0, 31).getMonth()", Value::from(0))]
#[case("[1, 2] instanceof Array", Value::Bool(true))]
#[case("new Map([['a', 1]]).get('a')", Value::from(1))]
#[case("new Set([1, 2, 2]).size", Value::from(2))]
#[case("typeof undefined", Value::from("undefined"))]
#[case("typeof Date", Value::from("function"))]
#[case("NaN === NaN", Value::Bool(false))]
#[case("-Infinity < 0", Value::Bool(true))]
#[case("'abc'.length", Value::from(3))]
#[case("'abc'.toUpperCase()", Value::from("ABC"))]
#[case("[1, 2, 3].join('-')", Value::from("1-2-3"))]
#[case("({ a: 1 }).a", Value::from(1))]
#[case("(1, 2, 3)", Value::from(3))]
#[case("0 || null || 'x'", Value::from("x"))]
#[case("0 ?? 'x'", Value::from(0))]
fn evaluates(#[case] source: &str, #[case] expected: Value) {
    let engine = engine();
    let value = engine.evaluate_once(source, &Value::Undefined).unwrap();
    assert_eq!(value, Poll::Ready(expected));
}

#[test]
fn numeric_keys_reach_objects_and_arrays() {
    let mut rt = Runtime::new();
    let errors = record_errors(&mut rt);
    let engine = rt.engine();
    let ctx = context(json!({ "o": { "1": 5 }, "arr": [7, 8] }));
    let read = |source: &str| engine.evaluate_once(source, &ctx).unwrap();
    assert_eq!(read("o[1]"), Poll::Ready(Value::from(5)));
    assert_eq!(read("arr['1']"), Poll::Ready(Value::from(8)));
    assert_eq!(read("arr['01']"), Poll::Ready(Value::Undefined));
    assert_eq!(errors.borrow().len(), 1);

    let mut cr = CallRecorder::new();
    let e = engine.compile("arr['0']", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("7");
    ctx.get("arr").as_array().unwrap().set(0, 9.into()).unwrap();
    cr.verify("9");
}

#[test]
fn evaluate_once_watches_nothing() {
    let engine = engine();
    let ctx = context(json!({ "a": 2, "b": { "c": 3 } }));
    let value = engine.evaluate_once("a * b.c", &ctx).unwrap();
    assert_eq!(value, Poll::Ready(Value::from(6)));
    assert_eq!(engine.registry().active(), 0);
    assert_eq!(object(&ctx).hook_count(), 0);
}

#[test]
fn node_tree() {
    let engine = engine();
    let ctx = context(json!({ "a": 20, "b": { "c": 30 } }));
    let e = engine.compile("a + b.c", &ctx).unwrap();
    let root = e.root();
    assert_eq!(root.kind(), "binary");
    assert_eq!(e.node_count(), 4);
    let children = root.children();
    assert_eq!(
        children.iter().map(|c| c.source()).collect::<Vec<_>>(),
        ["a", "b.c"]
    );
    let b = &children[1].children()[0];
    assert_eq!(b.kind(), "identifier");
    assert_eq!(b.span(), 4..5);
    assert!(b.is_bound());
    assert_eq!(b.parent().unwrap().source(), "b.c");
    assert!(root.parent().is_none());
    assert!(!root.is_bound());
    assert_eq!(children[1].value(), Poll::Ready(Value::from(30)));
}

#[test]
fn readonly_and_method_members_read_directly() {
    let engine = engine();
    let o = Object::new();
    o.define_readonly("ro", Value::from(2));
    o.define_method("m", |_, _| Ok(Value::Null));
    let ctx = Value::from(Object::from_entries([("o", Value::from(o))]));
    let e = engine.compile("o.ro + (typeof o.m === 'function' ? 1 : 0)", &ctx).unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::from(3)));
}
