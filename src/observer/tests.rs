use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::{Config, Object, Promise, Runtime};

use super::*;

fn context(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}
fn chain() -> AccessorChain {
    AccessorChain::builtin()
}
fn object(v: &Value) -> &Object {
    v.as_object().unwrap()
}
fn group(ctx: &Value, index: &str, rule: Option<WatchRule>) -> ObserverGroup {
    let g = ObserverGroup::new(&chain(), ctx.clone(), Index::key(index), rule).unwrap();
    g.initialize();
    g
}

#[test]
fn observer_emits_on_change() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "a": 1 }));
    let o = Observer::new(&chain(), ctx.clone(), Index::key("a")).unwrap();
    o.initialize();
    let _s = o.subscribe(|e| call!("{} {}", e.path(), e.new_value));
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify("a 2");
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify(());
    assert_eq!(o.value(), Poll::Ready(Value::from(2)));
}

#[test]
fn uninitialized_observer_follows_silently() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "a": 1 }));
    let o = Observer::new(&chain(), ctx.clone(), Index::key("a")).unwrap();
    let _s = o.subscribe(|e| call!("{}", e.new_value));
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify(());
    assert_eq!(o.value(), Poll::Ready(Value::from(2)));
    o.initialize();
    object(&ctx).set("a", 3.into()).unwrap();
    cr.verify("3");
}

#[test]
fn observer_set_writes_through() {
    let ctx = context(json!({ "a": 1 }));
    let o = Observer::new(&chain(), ctx.clone(), Index::key("a")).unwrap();
    o.set(5.into()).unwrap();
    assert_eq!(ctx.get("a"), Value::from(5));
    assert_eq!(o.value(), Poll::Ready(Value::from(5)));
}

#[test]
fn disposed_observer_is_silent() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "a": 1 }));
    let o = Observer::new(&chain(), ctx.clone(), Index::key("a")).unwrap();
    o.initialize();
    let _s = o.subscribe(|e| call!("{}", e.new_value));
    o.dispose();
    o.dispose();
    assert!(o.is_disposed());
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify(());
    assert_eq!(object(&ctx).hook_count(), 0);
}

#[test]
fn recursive_group_reports_chain() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": { "y": 10 } }));
    let g = group(&ctx, "x", Some(WatchRule::always()));
    let _s = g.subscribe(|e| call!("{} {}", e.path(), e.new_value));
    object(&ctx.get("x")).set("y", 30.into()).unwrap();
    cr.verify("x.y 30");
}

#[test]
fn event_chain_links_and_set_value() {
    let ctx = context(json!({ "x": { "y": 10 } }));
    let x = ctx.get("x");
    let g = group(&ctx, "x", Some(WatchRule::always()));
    let events = Rc::new(RefCell::new(Vec::new()));
    let ev = events.clone();
    let _s = g.subscribe(move |e| ev.borrow_mut().push(e.clone()));
    object(&x).set("y", 30.into()).unwrap();

    let e = events.borrow()[0].clone();
    assert!(e.target.same(&x));
    assert_eq!(e.index, Index::key("y"));
    assert_eq!(e.chain.len(), 2);
    assert!(e.chain[0].object.same(&ctx));
    assert!(e.chain[1].object.same(&x));
    e.set_value.unwrap().call(7.into()).unwrap();
    assert_eq!(x.get("y"), Value::from(7));
}

#[test]
fn shallow_group_ignores_nested_changes() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": { "y": 10 } }));
    let g = group(&ctx, "x", None);
    let _s = g.subscribe(|e| call!("{}", e.path()));
    object(&ctx.get("x")).set("y", 30.into()).unwrap();
    cr.verify(());
    object(&ctx).set("x", context(json!({ "y": 1 }))).unwrap();
    cr.verify("x");
    assert_eq!(g.observer_count(), 1);
}

#[test]
fn replaced_subtree_is_detached() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": { "y": 10 } }));
    let g = group(&ctx, "x", Some(WatchRule::always()));
    let _s = g.subscribe(|e| call!("{} {}", e.path(), e.new_value));
    let old = ctx.get("x");
    object(&ctx).set("x", context(json!({ "y": 20 }))).unwrap();
    cr.verify("x [object Object]");

    object(&old).set("y", 99.into()).unwrap();
    cr.verify(());
    assert_eq!(object(&old).hook_count(), 0);
    object(&ctx.get("x")).set("y", 21.into()).unwrap();
    cr.verify("x.y 21");
}

#[test]
fn added_property_is_observed() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": {} }));
    let g = group(&ctx, "x", Some(WatchRule::always()));
    let _s = g.subscribe(|e| call!("{}", e.path()));
    let x = ctx.get("x");
    object(&x).insert("z", context(json!({ "w": 1 })));
    cr.verify("x.z");
    assert_eq!(g.child_indexes(), [Index::key("z")]);
    object(&x.get("z")).set("w", 2.into()).unwrap();
    cr.verify("x.z.w");
}

#[test]
fn rule_limits_recursion() {
    let mut cr = CallRecorder::new();
    let ctx = context(json!({ "x": { "keep": { "v": 1 }, "skip": { "v": 1 } } }));
    let rule = WatchRule::new(|index, _, _| index.as_key() != Some("skip"));
    let g = group(&ctx, "x", Some(rule));
    let _s = g.subscribe(|e| call!("{}", e.path()));
    let x = ctx.get("x");
    object(&x.get("keep")).set("v", 2.into()).unwrap();
    cr.verify("x.keep.v");
    object(&x.get("skip")).set("v", 2.into()).unwrap();
    cr.verify(());
    object(&x).set("skip", 3.into()).unwrap();
    cr.verify("x.skip");
}

#[test]
fn cyclic_value_is_observed_once() {
    let x = Object::new();
    x.insert("me", Value::from(x.clone()));
    let ctx = Value::from(Object::from_entries([("x", Value::from(x.clone()))]));
    let g = group(&ctx, "x", Some(WatchRule::always()));
    assert_eq!(g.observer_count(), 2);
    g.dispose();
    x.delete("me");
}

#[test]
fn max_depth_stops_recursion() {
    let _rt = Runtime::with_config(Config {
        max_depth: 2,
        ..Config::default()
    })
    .unwrap();
    let ctx = context(json!({ "a": { "b": { "c": 1 } } }));
    let g = group(&ctx, "a", Some(WatchRule::always()));
    assert_eq!(g.observer_count(), 2);
}

#[test]
fn async_value_is_always_followed() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let p = Promise::pending();
    let ctx = Value::from(Object::from_entries([("p", Value::from(p.clone()))]));
    let g = group(&ctx, "p", None);
    let _s = g.subscribe(|e| call!("{} {}", e.path(), e.new_value));
    assert_eq!(g.child_indexes(), [Index::Resolved]);
    p.resolve(5.into());
    cr.verify(());
    rt.update();
    cr.verify("p.<resolved> 5");
    assert_eq!(
        g.child(&Index::Resolved).unwrap().value(),
        Poll::Ready(Value::from(5))
    );
}

#[test]
fn dispose_group_unhooks_everything() {
    let ctx = context(json!({ "x": { "y": { "z": 1 } } }));
    let g = group(&ctx, "x", Some(WatchRule::always()));
    assert_eq!(g.observer_count(), 3);
    g.dispose();
    assert!(g.is_disposed());
    assert_eq!(object(&ctx).hook_count(), 0);
    assert_eq!(object(&ctx.get("x")).hook_count(), 0);
    assert_eq!(object(&ctx.get("x").get("y")).hook_count(), 0);
}
