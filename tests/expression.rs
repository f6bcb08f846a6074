use std::task::Poll;

use assert_call::{call, CallRecorder};
use mutwatch::*;
use serde_json::json;

fn context(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}

#[test]
fn live_sum() {
    let mut cr = CallRecorder::new();
    let rt = Runtime::new();
    let ctx = context(json!({ "a": 20, "b": { "c": 30 } }));
    let e = rt.engine().compile("a + b.c", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("50");

    ctx.get("b").as_object().unwrap().set("c", 40.into()).unwrap();
    cr.verify("60");
    ctx.as_object()
        .unwrap()
        .set("b", context(json!({ "c": 5 })))
        .unwrap();
    cr.verify("25");
}

#[test]
fn formatted_view_of_nested_state() {
    let mut cr = CallRecorder::new();
    let rt = Runtime::new();
    let ctx = context(json!({
        "user": { "first": "Ada", "last": "Lovelace" },
        "items": [1, 2, 3]
    }));
    let source = "`${user.first} ${user.last}: ${items.length} item${items.length === 1 ? '' : 's'}`";
    let e = rt.engine().compile(source, &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    cr.verify("Ada Lovelace: 3 items");

    let items = ctx.get("items");
    let items = items.as_array().unwrap();
    items.pop();
    items.pop();
    cr.verify(["Ada Lovelace: 2 items", "Ada Lovelace: 1 item"]);
    ctx.get("user")
        .as_object()
        .unwrap()
        .set("last", "King".into())
        .unwrap();
    cr.verify("Ada King: 1 item");
}

#[test]
fn transaction_guard_batches() {
    let mut cr = CallRecorder::new();
    let rt = Runtime::new();
    let engine = rt.engine();
    let ctx = context(json!({ "w": 2, "h": 3 }));
    let e = engine.compile("w * h", &ctx).unwrap();
    let _s = e.subscribe_changes(|v| call!("{v}"));
    let o = ctx.as_object().unwrap();
    {
        let t = engine.transaction();
        assert!(t.manager().is_suspended());
        o.set("w", 4.into()).unwrap();
        o.set("h", 5.into()).unwrap();
    }
    cr.verify("20");
}

#[test]
fn promise_operand() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let p = Promise::from_future(async { Value::from(2) });
    let ctx = Value::from(Object::from_entries([("p", Value::from(p))]));
    let e = rt.engine().compile("p * 10", &ctx).unwrap();
    let _s = e.subscribe(|v| call!("{v}"));
    assert_eq!(e.value(), Poll::Pending);
    rt.update();
    cr.verify("20");
}

#[test]
fn errors_go_to_the_sink() {
    let mut rt = Runtime::new();
    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = errors.clone();
    rt.set_error_sink(move |r: ErrorReport| {
        sink.borrow_mut().push(format!("{}: {}", r.context.unwrap_or_default(), r.message))
    });
    let ctx = context(json!({ "f": 1 }));
    let e = rt.engine().compile("f()", &ctx).unwrap();
    assert_eq!(e.value(), Poll::Ready(Value::Undefined));
    assert_eq!(*errors.borrow(), ["f(): f is not a function"]);

    let Err(Error::Parse(p)) = rt.engine().compile("f(", &ctx) else {
        panic!("expected parse error");
    };
    assert_eq!(p.offset, 2);
}

#[test]
fn node_inspection() {
    let rt = Runtime::new();
    let ctx = context(json!({ "a": { "b": [10, 20] }, "i": 1 }));
    let e = rt.engine().compile("a.b[i] ?? 0", &ctx).unwrap();
    let root = e.root();
    assert_eq!(root.kind(), "logical");
    let index = &root.children()[0];
    assert_eq!(index.kind(), "index");
    assert_eq!(index.source(), "a.b[i]");
    assert_eq!(index.value(), Poll::Ready(Value::from(20)));
    assert!(index.is_bound());
    assert_eq!(e.binding_count(), 4);
    e.dispose();
    assert_eq!(rt.registry().active(), 0);
}

#[test]
fn one_shot_evaluation() {
    let rt = Runtime::new();
    let ctx = context(json!({ "xs": [3, 1, 2] }));
    assert_eq!(
        rt.engine().evaluate_once("xs.join('') + '!'", &ctx).unwrap(),
        Poll::Ready(Value::from("312!"))
    );
    assert_eq!(rt.registry().active(), 0);
}
