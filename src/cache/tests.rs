use std::rc::Rc;

use assert_call::{call, CallRecorder};

use crate::{Error, Runtime};

use super::*;

struct Factory;

impl CacheFactory for Factory {
    type Data = &'static str;
    type Id = String;
    type Instance = Rc<String>;

    fn id(&self, data: &&'static str) -> String {
        data.to_uppercase()
    }
    fn create(&self, id: &String, data: &'static str) -> Result<Rc<String>> {
        call!("create {data}");
        Ok(Rc::new(format!("{id}!")))
    }
    fn on_created(&self, id: &String, _instance: &Rc<String>) {
        call!("created {id}");
    }
    fn on_released(&self, id: &String, _instance: Rc<String>) {
        call!("released {id}");
    }
    fn on_empty(&self) {
        call!("empty");
    }
}

#[test]
fn create_is_idempotent() {
    let mut cr = CallRecorder::new();
    let cache = InstanceCache::new(Factory);
    let e0 = cache.create("a").unwrap();
    cr.verify(["create a", "created A"]);
    let e1 = cache.create("a").unwrap();
    cr.verify(());
    assert!(Rc::ptr_eq(&e0.instance, &e1.instance));
    assert_eq!(e0.refcount, 1);
    assert_eq!(e1.refcount, 2);
    assert_eq!(e1.id, "A");
}

#[test]
fn dispose_after_last_release() {
    let mut cr = CallRecorder::new();
    let cache = InstanceCache::new(Factory);
    let first = cache.create("a").unwrap().instance;
    for _ in 0..2 {
        let e = cache.create("a").unwrap();
        assert!(Rc::ptr_eq(&first, &e.instance));
    }
    cr.verify(["create a", "created A"]);

    assert_eq!(cache.release(&"A".into(), false).refcount, 2);
    assert_eq!(cache.release(&"A".into(), false).refcount, 1);
    cr.verify(());
    let r = cache.release(&"A".into(), false);
    cr.verify(["released A", "empty"]);
    assert_eq!(r.refcount, 0);
    assert!(Rc::ptr_eq(&r.instance.unwrap(), &first));
    assert!(!cache.has(&"A".into()));
}

#[test]
fn release_unknown_id() {
    let mut cr = CallRecorder::new();
    let cache = InstanceCache::new(Factory);
    let r = cache.release(&"X".into(), false);
    assert_eq!(r.refcount, 0);
    assert!(r.instance.is_none());
    cr.verify(());
}

#[test]
fn force_release() {
    let mut cr = CallRecorder::new();
    let cache = InstanceCache::new(Factory);
    cache.create("a").unwrap();
    cache.create("a").unwrap();
    cache.create("b").unwrap();
    cr.verify(["create a", "created A", "create b", "created B"]);
    cache.release(&"A".into(), true);
    cr.verify("released A");
    assert_eq!(cache.ids(), vec!["B".to_string()]);
}

#[test]
fn lookups() {
    let cache = InstanceCache::new(Factory);
    let mut cr = CallRecorder::new();
    assert!(cache.get_from_data(&"a").is_none());
    let a = cache.get_or_create("a").unwrap();
    let a2 = cache.get_or_create("a").unwrap();
    cr.verify(["create a", "created A"]);
    assert!(Rc::ptr_eq(&a, &a2));
    assert_eq!(cache.refcount(&"A".into()), 1);
    assert!(cache.exists(&a));
    assert_eq!(cache.get_from_id(&"A".into()).as_deref(), Some(&"A!".to_string()));
    assert_eq!(cache.len(), 1);
}

#[test]
fn dispose_is_idempotent() {
    let mut cr = CallRecorder::new();
    let cache = InstanceCache::new(Factory);
    cache.create("a").unwrap();
    cache.create("a").unwrap();
    cr.verify(["create a", "created A"]);
    cache.dispose();
    cr.verify(["released A", "empty"]);
    cache.dispose();
    cr.verify(());
    assert!(cache.is_empty());
}

struct Failing;

impl CacheFactory for Failing {
    type Data = u32;
    type Id = u32;
    type Instance = u32;
    fn id(&self, data: &u32) -> u32 {
        *data
    }
    fn create(&self, _id: &u32, data: u32) -> Result<u32> {
        if data == 0 {
            Err(Error::type_error("zero"))
        } else {
            Ok(data * 10)
        }
    }
}

#[test]
fn failed_create_leaves_no_entry() {
    let cache = InstanceCache::new(Failing);
    assert_eq!(cache.create(0).unwrap_err(), Error::type_error("zero"));
    assert!(!cache.has(&0));
    assert_eq!(cache.create(1).unwrap().instance, 10);
}

struct Members;

impl GroupFactory for Members {
    type Data = i32;
    type Instance = i32;
    fn create(&self, group: &str, member: &str, data: i32) -> Result<i32> {
        call!("create {group}/{member}");
        Ok(data)
    }
    fn on_released(&self, group: &str, member: &str, _instance: i32) {
        call!("released {group}/{member}");
    }
    fn on_group_empty(&self, group: &str) {
        call!("empty {group}");
    }
}

#[test]
fn grouped_duplicate_member() {
    let mut cr = CallRecorder::new();
    let cache = GroupedCache::new(Members);
    cache.create("g", "m", 1).unwrap();
    cr.verify("create g/m");
    assert_eq!(
        cache.create("g", "m", 2).unwrap_err(),
        Error::IdExists("g/m".into())
    );
    cr.verify(());
    cache.create("h", "m", 3).unwrap();
    cr.verify("create h/m");
    assert_eq!(cache.get("g", "m"), Some(1));
    assert_eq!(cache.group_count(), 2);
}

#[test]
fn grouped_release_group() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let cache = GroupedCache::new(Members);
    let (m0, _) = cache.create_member("g", 1).unwrap();
    let (m1, _) = cache.create_member("g", 2).unwrap();
    assert_ne!(m0, m1);
    cr.verify([format!("create g/{m0}"), format!("create g/{m1}")]);

    assert_eq!(cache.release("g", &m0), Some(1));
    cr.verify(format!("released g/{m0}"));
    assert!(cache.has_group("g"));

    assert_eq!(cache.release_group("g"), 1);
    cr.verify([format!("released g/{m1}"), "empty g".to_string()]);
    assert!(!cache.has_group("g"));
    assert_eq!(cache.release_group("g"), 0);
    cr.verify(());
}

#[test]
fn grouped_member_reusable_after_release() {
    let mut cr = CallRecorder::new();
    let cache = GroupedCache::new(Members);
    cache.create("g", "m", 1).unwrap();
    cache.release("g", "m");
    cr.verify(["create g/m", "released g/m", "empty g"]);
    cache.create("g", "m", 2).unwrap();
    cr.verify("create g/m");
    assert_eq!(cache.members("g"), vec![Rc::from("m")]);
}
