use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::{Config, Date, DateField, Error, Object, Promise, Runtime};

use super::*;

fn context(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}
fn object(v: &Value) -> &Object {
    v.as_object().unwrap()
}

#[test]
fn watch_is_reference_counted() {
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    let w0 = registry.watch_state(&ctx, "a", None).unwrap();
    let w1 = registry.watch_state(&ctx, "a", None).unwrap();
    assert_eq!(w0.key(), w1.key());
    assert_eq!(registry.refcount(&w0), 2);
    assert_eq!(registry.active(), 1);

    assert_eq!(registry.release(&w0), 1);
    assert!(w1.is_active());
    assert_eq!(registry.release_state(&ctx, "a", None), 0);
    assert!(!w1.is_active());
    assert_eq!(registry.active(), 0);
    assert_eq!(object(&ctx).hook_count(), 0);
}

#[test]
fn release_of_unknown_location_is_zero() {
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    assert_eq!(registry.release_state(&ctx, "a", None), 0);
    let w = registry.watch_state(&ctx, "a", None).unwrap();
    assert_eq!(registry.release(&w), 0);
    assert_eq!(registry.release(&w), 0);
}

#[test]
fn distinct_rules_are_distinct_registrations() {
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": { "b": 1 } }));
    let rule = WatchRule::always();
    let shallow = registry.watch_state(&ctx, "a", None).unwrap();
    let deep = registry.watch_state(&ctx, "a", Some(rule.clone())).unwrap();
    let deep2 = registry.watch_state(&ctx, "a", Some(WatchRule::always())).unwrap();
    let other = registry
        .watch_state(&ctx, "a", Some(WatchRule::new(|_, _, _| true)))
        .unwrap();
    assert_ne!(shallow.key(), deep.key());
    assert_eq!(deep.key(), deep2.key());
    assert_ne!(deep.key(), other.key());
    assert_eq!(registry.active(), 3);
}

#[test]
fn subscribe_emits_current_value_first() {
    let mut cr = CallRecorder::new();
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    let w = registry.watch_state(&ctx, "a", None).unwrap();
    let _s0 = w.subscribe(|e| call!("all {}", e.new_value));
    let _s1 = w.subscribe_changes(|e| call!("changes {}", e.new_value));
    cr.verify("all 1");
    object(&ctx).set("a", 2.into()).unwrap();
    cr.verify(["all 2", "changes 2"]);
}

#[test]
fn emit_initial_can_be_disabled() {
    let _rt = Runtime::with_config(Config {
        emit_initial: false,
        ..Config::default()
    })
    .unwrap();
    let mut cr = CallRecorder::new();
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    let w = registry.watch_state(&ctx, "a", None).unwrap();
    let _s = w.subscribe(|e| call!("{}", e.new_value));
    cr.verify(());
    let _s = w.subscribe_with(true, |e| call!("forced {}", e.new_value));
    cr.verify("forced 1");
}

#[test]
fn registry_forwards_every_registration() {
    let mut cr = CallRecorder::new();
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1, "b": { "c": 2 } }));
    let _s = registry.changed().subscribe(|e| call!("{} {}", e.path(), e.new_value));
    registry.watch_state(&ctx, "a", None).unwrap();
    registry
        .watch_state(&ctx, "b", Some(WatchRule::always()))
        .unwrap();
    object(&ctx).set("a", 5.into()).unwrap();
    cr.verify("a 5");
    object(&ctx.get("b")).set("c", 6.into()).unwrap();
    cr.verify("b.c 6");
}

#[test]
fn index_is_normalized() {
    let registry = StateRegistry::new();
    let date = Value::from(Date::new(0.0));
    let w0 = registry.watch_state(&date, "month", None).unwrap();
    let w1 = registry.watch_state(&date, DateField::Month, None).unwrap();
    assert_eq!(w0.key(), w1.key());
    assert_eq!(registry.refcount(&w0), 2);
    assert_eq!(w0.value(), Poll::Ready(Value::from(0)));
}

#[test]
fn unwatchable_locations_fail() {
    let registry = StateRegistry::new();
    let o = Object::new();
    o.define_readonly("ro", Value::from(1));
    o.define_method("m", |_, _| Ok(Value::Null));
    let ctx = Value::from(o);
    assert!(matches!(
        registry.watch_state(&ctx, "ro", None),
        Err(Error::Readonly { .. })
    ));
    assert!(matches!(
        registry.watch_state(&ctx, "m", None),
        Err(Error::MethodNotWatchable { .. })
    ));
    assert!(matches!(
        registry.watch_state(&Value::from(1), "x", None),
        Err(Error::NoAccessor { .. })
    ));
    assert_eq!(registry.active(), 0);
}

#[test]
fn get_state_reads_settled_value() {
    let mut rt = Runtime::new();
    let registry = rt.registry();
    let p = Promise::pending();
    let ctx = Value::from(Object::from_entries([
        ("p", Value::from(p.clone())),
        ("n", Value::from(3)),
    ]));
    assert_eq!(registry.get_state(&ctx, "n").unwrap(), Value::from(3));
    let w = registry.watch_state(&ctx, "p", None).unwrap();
    let resolved = w.group().child(&Index::Resolved).unwrap();
    assert_eq!(resolved.value(), Poll::Pending);
    assert_eq!(
        registry.get_state(&ctx.get("p"), Index::Resolved).unwrap(),
        Value::Undefined
    );
    p.resolve(8.into());
    rt.update();
    assert_eq!(
        registry.get_state(&ctx.get("p"), Index::Resolved).unwrap(),
        Value::from(8)
    );
}

#[test]
fn set_state_notifies_watchers() {
    let mut cr = CallRecorder::new();
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    let w = registry.watch_state(&ctx, "a", None).unwrap();
    let _s = w.subscribe_changes(|e| call!("{}", e.new_value));
    registry.set_state(&ctx, "a", 4.into()).unwrap();
    cr.verify("4");
    assert_eq!(registry.get_state(&ctx, "a").unwrap(), Value::from(4));
}

#[test]
fn dispose_releases_everything() {
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1, "b": 2 }));
    let wa = registry.watch_state(&ctx, "a", None).unwrap();
    registry.watch_state(&ctx, "a", None).unwrap();
    registry.watch_state(&ctx, "b", None).unwrap();
    registry.dispose();
    assert_eq!(registry.active(), 0);
    assert!(!wa.is_active());
    assert_eq!(object(&ctx).hook_count(), 0);
}

#[test]
fn events_after_release_are_not_forwarded() {
    let registry = StateRegistry::new();
    let ctx = context(json!({ "a": 1 }));
    let events = Rc::new(RefCell::new(Vec::new()));
    let ev = events.clone();
    let _s = registry
        .changed()
        .subscribe(move |e| ev.borrow_mut().push(e.new_value.clone()));
    let w = registry.watch_state(&ctx, "a", None).unwrap();
    object(&ctx).set("a", 2.into()).unwrap();
    registry.release(&w);
    object(&ctx).set("a", 3.into()).unwrap();
    assert_eq!(*events.borrow(), [Value::from(2)]);
}

#[test]
fn primitive_contexts_are_keyed_by_value() {
    let registry = StateRegistry::new();
    let a = registry.watch_state(&Value::from("abc"), "length", None).unwrap();
    let b = registry.watch_state(&Value::from("wxyz"), "length", None).unwrap();
    assert_eq!(a.value(), Poll::Ready(Value::from(3)));
    assert_eq!(b.value(), Poll::Ready(Value::from(4)));
    assert_eq!(registry.refcount(&a), 1);
    assert_eq!(registry.active(), 2);

    let c = registry.watch_state(&Value::from("abc"), "length", None).unwrap();
    assert_eq!(registry.refcount(&c), 2);
    assert_eq!(registry.get_state(&Value::from("wxyz"), "length").unwrap(), Value::from(4));
}

#[test]
fn oversized_slot_is_rejected() {
    let registry = StateRegistry::new();
    let arr = Value::from(vec![Value::from(1)]);
    for slot in [usize::MAX, u32::MAX as usize] {
        let e = registry.set_state(&arr, Index::Slot(slot), 2.into()).unwrap_err();
        assert!(matches!(e, Error::Type(_)));
    }
    assert_eq!(arr.as_array().unwrap().len(), 1);
    registry.set_state(&arr, Index::Slot(3), 2.into()).unwrap();
    assert_eq!(arr.as_array().unwrap().len(), 4);
}
