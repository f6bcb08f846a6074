use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    future::{poll_fn, Future},
    mem::{replace, take},
    pin::{pin, Pin},
    rc::{Rc, Weak},
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Wake, Waker},
};

use futures::executor::block_on;
use slabmap::SlabMap;
use tracing::debug;

use crate::{
    error::default_error_sink, Config, ErrorReport, ErrorSink, ExpressionEngine, Result,
    StateRegistry, Value,
};


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    tasks: VecDeque<Task>,
    futures: SlabMap<Rc<SpawnedFuture>>,
    wakes: WakeRequests,
    error_sink: Rc<dyn ErrorSink>,
    ids: Rc<dyn IdGenerator>,
    config: Config,
    resolved: HashMap<usize, Value>,
    batch_depth: usize,
    deferred: VecDeque<Task>,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            tasks: VecDeque::new(),
            futures: SlabMap::new(),
            wakes: WakeRequests::default(),
            error_sink: default_error_sink(),
            ids: Rc::new(SequentialIdGenerator::default()),
            config: Config::default(),
            resolved: HashMap::new(),
            batch_depth: 0,
            deferred: VecDeque::new(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut())).ok()
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn push_task(&mut self, task: Task) {
        self.assert_exists();
        self.tasks.push_back(task);
        self.wakes.lock().wake();
    }
    fn wait_for_ready(&mut self, cx: &Context) -> Poll<()> {
        if !self.tasks.is_empty() {
            return Poll::Ready(());
        }
        let mut requests = self.wakes.lock();
        if !requests.wakes.is_empty() {
            return Poll::Ready(());
        }
        requests.waker = Some(cx.waker().clone());
        Poll::Pending
    }
    /// Returns the cleared state so that it is dropped outside the borrow.
    #[must_use]
    fn reset(&mut self) -> impl Sized {
        self.wakes.lock().wakes.clear();
        self.config = Config::default();
        self.is_runtime_exists = false;
        (
            take(&mut self.tasks),
            take(&mut self.futures),
            take(&mut self.resolved),
            replace(&mut self.error_sink, default_error_sink()),
            replace(&mut self.ids, Rc::new(SequentialIdGenerator::default())),
        )
    }
}

/// Single-threaded runtime driving out-of-band settlement of async sources.
///
/// Mutations are propagated synchronously; only deliveries from futures and streams
/// are deferred until [`update`](Self::update) runs.
pub struct Runtime {
    registry: StateRegistry,
    engine: ExpressionEngine,
    tasks_buffer: Vec<Task>,
}
impl Runtime {
    pub fn new() -> Self {
        Self::with_config(Config::default()).unwrap_or_else(|e| panic!("{e}"))
    }
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        }
        Globals::with(|g| g.config = config);
        let registry = StateRegistry::new();
        let engine = ExpressionEngine::new(registry.clone());
        debug!("runtime created");
        Ok(Self {
            registry,
            engine,
            tasks_buffer: Vec::new(),
        })
    }

    pub fn registry(&self) -> StateRegistry {
        self.registry.clone()
    }
    pub fn engine(&self) -> ExpressionEngine {
        self.engine.clone()
    }

    pub fn set_error_sink(&mut self, sink: impl ErrorSink + 'static) {
        let sink: Rc<dyn ErrorSink> = Rc::new(sink);
        Globals::with(|g| g.error_sink = sink);
    }
    pub fn set_id_generator(&mut self, ids: impl IdGenerator + 'static) {
        let ids: Rc<dyn IdGenerator> = Rc::new(ids);
        Globals::with(|g| g.ids = ids);
    }

    /// Deliver pending settlements and poll woken futures.
    ///
    /// Returns `true` if anything was performed.
    pub fn run_tasks(&mut self) -> bool {
        let mut handled = false;
        loop {
            let mut progressed = self.poll_woken_futures();
            let mut tasks = take(&mut self.tasks_buffer);
            Globals::with(|g| tasks.extend(g.tasks.drain(..)));
            for task in tasks.drain(..) {
                task.run();
                progressed = true;
            }
            self.tasks_buffer = tasks;
            if !progressed {
                return handled;
            }
            handled = true;
        }
    }

    /// Repeat [`run_tasks`](Self::run_tasks) until nothing is left to do.
    pub fn update(&mut self) {
        while self.run_tasks() {}
    }

    /// Wait while there is no process to be executed by [`update`](Self::update).
    pub async fn wait_for_ready(&mut self) {
        poll_fn(|cx| Globals::with(|g| g.wait_for_ready(cx))).await
    }

    /// Drive `fut` to completion on the current thread, running updates while it is pending.
    pub fn run<T>(&mut self, fut: impl Future<Output = T>) -> T {
        let mut fut = pin!(fut);
        block_on(poll_fn(|cx| loop {
            if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                return Poll::Ready(value);
            }
            if self.run_tasks() {
                continue;
            }
            if Globals::with(|g| g.wait_for_ready(cx)).is_pending() {
                return Poll::Pending;
            }
        }))
    }

    fn poll_woken_futures(&mut self) -> bool {
        let keys = Globals::with(|g| take(&mut g.wakes.lock().wakes));
        let mut handled = false;
        for key in keys {
            let Some(task) = Globals::with(|g| g.futures.get(key).cloned()) else {
                continue;
            };
            handled = true;
            if task.poll() {
                Globals::with(|g| g.futures.remove(key));
            }
        }
        handled
    }
}
impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
impl Drop for Runtime {
    fn drop(&mut self) {
        let garbage = Globals::try_with(|g| g.reset());
        drop(garbage);
        debug!("runtime dropped");
    }
}

/// A deferred unit of work run by [`Runtime::update`].
pub(crate) struct Task(Box<dyn FnOnce()>);

impl Task {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Task(Box::new(f))
    }
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, f: impl FnOnce(Rc<T>) + 'static) -> Self {
        Task::new(move || {
            if let Some(this) = this.upgrade() {
                f(this)
            }
        })
    }
    pub fn schedule(self) {
        Globals::with(|g| g.push_task(self))
    }
    fn run(self) {
        (self.0)()
    }
}

/// Run `f` as one notification batch. Work passed to [`defer`] inside the batch runs
/// after the outermost batch returns, so every listener has seen the whole batch first.
pub(crate) fn batch<T>(f: impl FnOnce() -> T) -> T {
    let outermost = Globals::with(|g| {
        g.batch_depth += 1;
        g.batch_depth == 1
    });
    let guard = BatchGuard;
    let value = f();
    if outermost {
        while let Some(task) = Globals::with(|g| g.deferred.pop_front()) {
            task.run();
        }
    }
    drop(guard);
    value
}

/// Run `f` at the end of the current batch, or now outside of one.
pub(crate) fn defer(f: impl FnOnce() + 'static) {
    let task = Task::new(f);
    let task = Globals::with(|g| match g.batch_depth {
        0 => Some(task),
        _ => {
            g.deferred.push_back(task);
            None
        }
    });
    if let Some(task) = task {
        task.run();
    }
}

struct BatchGuard;

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let garbage = Globals::try_with(|g| {
            g.batch_depth -= 1;
            match g.batch_depth {
                0 => take(&mut g.deferred),
                _ => VecDeque::new(),
            }
        });
        drop(garbage);
    }
}

/// Spawns a future polled by [`Runtime::update`].
pub(crate) fn spawn_local(fut: impl Future<Output = ()> + 'static) {
    let task = Rc::new(SpawnedFuture {
        future: RefCell::new(Some(Box::pin(fut))),
        waker: RefCell::new(None),
        is_polling: Cell::new(false),
    });
    Globals::with(|g| {
        g.assert_exists();
        let key = g.futures.insert(task.clone());
        *task.waker.borrow_mut() = Some(RawWake::new(&g.wakes, key).into());
        g.wakes.lock().push(key);
    });
}

struct SpawnedFuture {
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,
    waker: RefCell<Option<Waker>>,
    is_polling: Cell<bool>,
}
impl SpawnedFuture {
    /// Returns `true` when the future has completed.
    fn poll(&self) -> bool {
        if self.is_polling.replace(true) {
            return false;
        }
        let Some(waker) = self.waker.borrow().clone() else {
            self.is_polling.set(false);
            return true;
        };
        let mut future = self.future.borrow_mut().take();
        let done = match &mut future {
            Some(f) => f.as_mut().poll(&mut Context::from_waker(&waker)).is_ready(),
            None => true,
        };
        if !done {
            *self.future.borrow_mut() = future;
        }
        self.is_polling.set(false);
        done
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<Mutex<RawWakeRequests>>);

impl WakeRequests {
    fn lock(&self) -> MutexGuard<'_, RawWakeRequests> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
struct RawWakeRequests {
    wakes: Vec<usize>,
    waker: Option<Waker>,
}
impl RawWakeRequests {
    fn push(&mut self, key: usize) {
        if !self.wakes.contains(&key) {
            self.wakes.push(key);
        }
        self.wake();
    }
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

struct RawWake {
    requests: WakeRequests,
    key: usize,
}
impl RawWake {
    fn new(requests: &WakeRequests, key: usize) -> Arc<Self> {
        Arc::new(RawWake {
            requests: requests.clone(),
            key,
        })
    }
}

impl Wake for RawWake {
    fn wake(self: Arc<Self>) {
        self.requests.lock().push(self.key);
    }
}

/// Produces opaque unique ids.
pub trait IdGenerator {
    fn create(&self) -> String;
}

#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: Cell<u64>,
}
impl IdGenerator for SequentialIdGenerator {
    fn create(&self) -> String {
        let id = self.next.get();
        self.next.set(id + 1);
        format!("id{id}")
    }
}

pub(crate) fn unique_id() -> String {
    let ids = Globals::with(|g| g.ids.clone());
    ids.create()
}

pub(crate) fn config() -> Config {
    Globals::try_with(|g| g.config.clone()).unwrap_or_default()
}

/// Route a fault to the installed error sink.
pub fn report_error(report: ErrorReport) {
    if let Some(sink) = Globals::try_with(|g| g.error_sink.clone()) {
        sink.add(report);
    }
}

pub(crate) fn set_resolved(key: usize, value: Value) {
    let old = Globals::try_with(|g| g.resolved.insert(key, value));
    drop(old);
}
pub(crate) fn get_resolved(key: usize) -> Option<Value> {
    Globals::try_with(|g| g.resolved.get(&key).cloned()).flatten()
}
pub(crate) fn remove_resolved(key: usize) {
    let removed = Globals::try_with(|g| g.resolved.remove(&key));
    drop(removed);
}
