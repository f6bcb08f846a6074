use std::{cell::RefCell, rc::Rc, task::Poll};

use assert_call::{call, CallRecorder};
use mutwatch::*;
use serde_json::json;

fn context(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}

#[test]
fn deep_watch_reports_paths() {
    let mut cr = CallRecorder::new();
    let rt = Runtime::new();
    let registry = rt.registry();
    let ctx = context(json!({ "user": { "name": "a", "tags": ["x"] } }));
    let w = registry
        .watch_state(&ctx, "user", Some(WatchRule::always()))
        .unwrap();
    let _s = w.subscribe_changes(|e| call!("{} = {}", e.path(), e.new_value));

    let user = ctx.get("user");
    user.as_object().unwrap().set("name", "b".into()).unwrap();
    cr.verify("user.name = b");
    user.get("tags").as_array().unwrap().push("y".into());
    cr.verify("user.tags.1 = y");

    registry.release(&w);
    user.as_object().unwrap().set("name", "c".into()).unwrap();
    cr.verify(());
}

#[test]
fn change_events_can_write_back() {
    let rt = Runtime::new();
    let registry = rt.registry();
    let ctx = context(json!({ "count": 1 }));
    let w = registry.watch_state(&ctx, "count", None).unwrap();
    let setters = Rc::new(RefCell::new(Vec::new()));
    let s = setters.clone();
    let _s = w.subscribe(move |e| s.borrow_mut().extend(e.set_value.clone()));
    assert_eq!(setters.borrow().len(), 1);

    let set = setters.borrow()[0].clone();
    set.call(5.into()).unwrap();
    assert_eq!(ctx.get("count"), Value::from(5));
    assert_eq!(w.value(), Poll::Ready(Value::from(5)));
    assert_eq!(setters.borrow().len(), 2);
}

#[test]
fn map_entries_and_dates_are_watchable() {
    let mut cr = CallRecorder::new();
    let rt = Runtime::new();
    let registry = rt.registry();
    let map = Map::new();
    let date = Date::new(0.0);
    map.insert("when".into(), date.clone().into());
    let ctx = Value::from(Object::from_entries([("m", Value::from(map.clone()))]));
    let w = registry
        .watch_state(&ctx, "m", Some(WatchRule::always()))
        .unwrap();
    let _s = w.subscribe_changes(|e| call!("{} = {}", e.path(), e.new_value));

    date.set_field(DateField::Hours, 1.0).unwrap();
    cr.verify(["m.when.hours = 1", "m.when.time = 3600000"]);
    map.insert("other".into(), 1.into());
    cr.verify(["m.other = 1"]);
    map.delete(&"when".into());
    cr.verify(["m.when = undefined"]);
    date.set_field(DateField::Hours, 2.0).unwrap();
    cr.verify(());
}

#[test]
fn async_sources_settle_on_update() {
    let mut cr = CallRecorder::new();
    let mut rt = Runtime::new();
    let registry = rt.registry();
    let stream = AsyncStream::new();
    let ctx = Value::from(Object::from_entries([("s", Value::from(stream.clone()))]));
    let w = registry.watch_state(&ctx, "s", None).unwrap();
    let _s = w.subscribe_changes(|e| call!("{} = {}", e.path(), e.new_value));

    stream.push(1.into());
    stream.push(2.into());
    cr.verify(());
    rt.update();
    cr.verify(["s.<resolved> = 1", "s.<resolved> = 2"]);
    assert_eq!(
        registry.get_state(&ctx.get("s"), Index::Resolved).unwrap(),
        Value::from(2)
    );
}

#[test]
fn shared_registrations_are_counted() {
    let rt = Runtime::new();
    let registry = rt.registry();
    let ctx = context(json!({ "a": { "b": 1 } }));
    let rule = WatchRule::always();
    let w0 = registry.watch_state(&ctx, "a", Some(rule.clone())).unwrap();
    let w1 = registry.watch_state(&ctx, "a", Some(rule.clone())).unwrap();
    assert_eq!(registry.refcount(&w1), 2);
    assert_eq!(w0.group().observer_count(), 2);
    assert_eq!(registry.release_state(&ctx, "a", Some(&rule)), 1);
    assert_eq!(registry.release(&w0), 0);
    assert_eq!(registry.active(), 0);
}
