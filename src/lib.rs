//! Fine-grained mutation observation over a graph of shared values.
//!
//! Values are shared handles ([`Object`], [`Array`], [`Map`], [`Set`], [`Date`],
//! [`Promise`], [`AsyncStream`]) that report every write to the hooks installed on them.
//! On top of that:
//!
//! - [`AccessorChain`](accessor::AccessorChain) reads, writes and instruments one location
//!   of a value.
//! - [`Observer`] and [`ObserverGroup`] track a location, optionally recursing into the
//!   value stored there.
//! - [`StateRegistry`] shares reference counted observer trees per location.
//! - [`ExpressionEngine`] compiles expressions whose value is kept up to date as the
//!   values they read change.
//!
//! Async sources settle out of band; a [`Runtime`] delivers them on
//! [`update`](Runtime::update).

pub mod accessor;
pub mod cache;
mod config;
mod error;
pub mod event;
pub mod expression;
mod index;
mod observer;
pub mod registry;
pub mod runtime;
mod subscription;
#[cfg(doctest)]
mod tests_readme;
pub mod utils;
mod value;

pub use config::Config;
pub use error::{Error, ErrorReport, ErrorSink, ParseError, Result, TracingErrorSink};
pub use expression::{Expression, ExpressionEngine, ExpressionNode, Transaction};
pub use index::{CallIndex, Index};
pub use observer::{ChainLink, ChangeEvent, Observer, ObserverGroup, SetValue, WatchRule};
pub use registry::{StateRegistry, StateWatch};
pub use runtime::{report_error, IdGenerator, Runtime};
pub use subscription::Subscription;
pub use value::{
    Array, AsyncStream, Date, DateField, Function, HookFilter, Kind, Map, Mutation,
    MutationSink, Object, Promise, PromiseState, PropertyKind, Set, Value, MAX_ARRAY_LEN,
};
