// #![include_doc("../README.md", start)]
//! # mutwatch
//!
//! `mutwatch` observes fine-grained mutations in a graph of shared values and keeps expressions over that graph up to date.
//!
//! > [!WARNING]
//! > This crate is in an early stage of development. APIs will change.
//!
//! ## Features
//!
//! - Shared value handles (`Object`, `Array`, `Map`, `Set`, `Date`) that report every write
//! - Observers for a single location, and observer groups that follow nested values
//! - A reference counted registry of watched locations
//! - Live expressions that recompute only the nodes affected by a change
//! - Async operands (`Promise`, `AsyncStream`) settled by a single-threaded runtime
//!
//! ## Example
//!
//! ```rust
//! use mutwatch::{Runtime, Value, WatchRule};
//!
//! let mut rt = Runtime::new();
//! let ctx: Value = serde_json::from_str(r#"{ "a": 20, "b": { "c": 30 } }"#).unwrap();
//!
//! let e = rt.engine().compile("a + b.c", &ctx).unwrap();
//! let _s = e.subscribe(|v| println!("{v}")); // prints "50"
//!
//! ctx.get("b").as_object().unwrap().set("c", 40.into()).unwrap(); // prints "60"
//!
//! let w = rt
//!     .registry()
//!     .watch_state(&ctx, "b", Some(WatchRule::always()))
//!     .unwrap();
//! let _s = w.subscribe_changes(|e| println!("{} = {}", e.path(), e.new_value));
//!
//! ctx.get("b").as_object().unwrap().set("c", 5.into()).unwrap(); // prints "b.c = 5" and "25"
//! rt.update();
//! ```
//!
//! Expressions use a small JavaScript-like syntax: member and index access, optional chaining, calls, `new`, unary and binary operators, `&&` `||` `??`, conditionals, template literals, array and object literals.
//!
//! ## License
//!
//! This project is dual licensed under Apache-2.0/MIT.
// #![include_doc("../README.md", end)]
