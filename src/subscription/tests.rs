use super::*;
use assert_call::{call, CallRecorder};
use std::cell::Cell;

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_fn(|| call!("drop"));
    }
    cr.verify("drop");
}

#[test]
fn unsubscribe_is_idempotent() {
    let mut cr = CallRecorder::new();
    let mut s = Subscription::from_fn(|| call!("drop"));
    s.unsubscribe();
    cr.verify("drop");
    s.unsubscribe();
    assert!(s.is_empty());
    drop(s);
    cr.verify(());
}

#[test]
fn from_weak_fn_calls_when_alive() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(9));
    {
        let _s = Subscription::from_weak_fn(Rc::downgrade(&rc), |rc| call!("{}", rc.get()));
    }
    cr.verify("9");
}

#[test]
fn from_weak_fn_noop_when_dead() {
    let mut cr = CallRecorder::new();
    let rc = Rc::new(Cell::new(1));
    let weak = Rc::downgrade(&rc);
    drop(rc);
    {
        let _s = Subscription::from_weak_fn(weak, |rc| call!("{}", rc.get()));
    }
    cr.verify(());
}

#[test]
fn from_iter_releases_all_in_order() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_iter([
            Subscription::from_fn(|| call!("a")),
            Subscription::from_fn(|| call!("b")),
        ]);
    }
    cr.verify(["a", "b"]);
}
