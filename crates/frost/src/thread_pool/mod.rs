// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Elastic worker pool driving work items and socket event handlers.
//!
//! # Architecture
//!
//! ```text
//!  execute / register / AsyncCompletion::complete
//!                 |
//!                 v
//!      crossbeam channel (Task) ----> worker 1..n  (grow at submit, shrink on idle)
//!                 ^                        |
//!                 |                        +-- Run(work)
//!                 |                        +-- Message: start_message -> message() -> finish_message
//!                 |                        +-- Finished: finished()
//!                 |
//!           supervisor thread: joins exited workers, fires the idle action
//! ```
//!
//! Every handler operation cycles through `Queued -> Started -> Ready`
//! (see [`handler`]); all transitions happen under the single pool lock,
//! while `message` and `finished` run outside it.

pub mod config;
pub mod handler;

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};

pub use config::ThreadPoolConfig;
pub use handler::{AsyncCompletion, AsyncStart, EventHandler, SocketOperation, ThreadPoolCurrent};

use handler::{HandlerEntry, HandlerKey, Step};

type Work = Box<dyn FnOnce() + Send>;
type IdleAction = Arc<dyn Fn() + Send + Sync>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the pool owning the current thread (0 = none).
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Supervisor wake-up interval when no server idle time is configured.
const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

// ============================================================================
// Tasks
// ============================================================================

enum Task {
    Run(Work),
    Message { key: HandlerKey, op: SocketOperation },
    Finished { key: HandlerKey, handler: Arc<dyn EventHandler> },
    Exit,
}

enum Supervise {
    Spawned(usize, JoinHandle<()>),
    Exited(usize),
    Shutdown,
}

// ============================================================================
// Shared state
// ============================================================================

struct PoolState {
    threads: usize,
    in_use: usize,
    queued: usize,
    next_thread_id: usize,
    destroyed: bool,
    last_activity: Instant,
    idle_fired: bool,
    handlers: HashMap<HandlerKey, HandlerEntry>,
}

pub(crate) struct Shared {
    pub(crate) config: ThreadPoolConfig,
    id: usize,
    state: Mutex<PoolState>,
    tasks_tx: Sender<Task>,
    tasks_rx: Receiver<Task>,
    supervisor_tx: Sender<Supervise>,
    idle_action: Mutex<Option<IdleAction>>,
}

impl Shared {
    // ------------------------------------------------------------------------
    // Submission and growth
    // ------------------------------------------------------------------------

    fn submit(self: &Arc<Self>, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(Error::PoolDestroyed);
        }
        self.enqueue(&mut state, task);
        Ok(())
    }

    fn enqueue(self: &Arc<Self>, state: &mut PoolState, task: Task) {
        if state.destroyed {
            return;
        }
        if self.tasks_tx.send(task).is_err() {
            return;
        }
        state.queued += 1;
        if state.in_use + state.queued > state.threads && state.threads < self.config.size_max {
            match self.spawn_worker(state) {
                Ok(()) => log::debug!(
                    "[thread-pool] {} grew to {} thread(s)",
                    self.config.name,
                    state.threads
                ),
                Err(e) => log::error!("[thread-pool] {} cannot create thread: {}", self.config.name, e),
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> std::io::Result<()> {
        let id = state.next_thread_id;
        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.config.name, id))
            .spawn(move || shared.run_worker(id))?;
        state.next_thread_id += 1;
        state.threads += 1;
        let _ = self.supervisor_tx.send(Supervise::Spawned(id, handle));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Worker loop
    // ------------------------------------------------------------------------

    fn run_worker(self: Arc<Self>, id: usize) {
        CURRENT_POOL.with(|c| c.set(self.id));
        log::trace!("[thread-pool] {}-{} started", self.config.name, id);

        while let Some(task) = self.next_task() {
            if catch_unwind(AssertUnwindSafe(|| self.run_task(task))).is_err() {
                log::error!("[thread-pool] {}-{}: task panicked", self.config.name, id);
            }
            let mut state = self.state.lock();
            state.in_use -= 1;
            state.last_activity = Instant::now();
        }

        log::trace!("[thread-pool] {}-{} exiting", self.config.name, id);
        let _ = self.supervisor_tx.send(Supervise::Exited(id));
    }

    /// Next task to run, or `None` when this thread must exit.
    fn next_task(&self) -> Option<Task> {
        loop {
            let received = match self.config.thread_idle_time {
                Some(idle) => self.tasks_rx.recv_timeout(idle),
                None => self
                    .tasks_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            let mut state = self.state.lock();
            match received {
                Ok(Task::Exit) => {
                    state.queued = state.queued.saturating_sub(1);
                    state.threads -= 1;
                    return None;
                }
                Ok(task) => {
                    state.queued = state.queued.saturating_sub(1);
                    state.in_use += 1;
                    state.last_activity = Instant::now();
                    state.idle_fired = false;
                    if self.config.size_warn > 0 && state.in_use == self.config.size_warn {
                        log::warn!(
                            "[thread-pool] {}: {} of {} threads busy (warning threshold {})",
                            self.config.name,
                            state.in_use,
                            self.config.size_max,
                            self.config.size_warn
                        );
                    }
                    return Some(task);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if state.threads > self.config.size {
                        state.threads -= 1;
                        log::debug!(
                            "[thread-pool] {} shrank to {} thread(s)",
                            self.config.name,
                            state.threads
                        );
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    state.threads -= 1;
                    return None;
                }
            }
        }
    }

    fn run_task(self: &Arc<Self>, task: Task) {
        match task {
            Task::Run(work) => work(),
            Task::Message { key, op } => self.dispatch(key, op),
            Task::Finished { key, handler } => {
                let mut current = ThreadPoolCurrent {
                    shared: self,
                    key,
                    operation: None,
                    io_completed: false,
                    restarted: false,
                };
                handler.finished(&mut current);
            }
            Task::Exit => {}
        }
    }

    // ------------------------------------------------------------------------
    // Handler dispatch
    // ------------------------------------------------------------------------

    fn dispatch(self: &Arc<Self>, key: HandlerKey, op: SocketOperation) {
        let handler = {
            let mut state = self.state.lock();
            let Some(entry) = state.handlers.get_mut(&key) else {
                return;
            };
            if !self.start_message(key, entry, op) {
                self.check_finished(&mut state, key);
                return;
            }
            Arc::clone(&entry.handler)
        };

        let mut current = ThreadPoolCurrent {
            shared: self,
            key,
            operation: Some(op),
            io_completed: false,
            restarted: false,
        };
        if catch_unwind(AssertUnwindSafe(|| handler.message(&mut current))).is_err() {
            log::error!(
                "[thread-pool] {}: {} panicked while servicing {}",
                self.config.name,
                handler.description(),
                op
            );
        }
        self.finish_message(key, op, current.restarted);
    }

    /// Move `op` towards `Ready`. Returns `true` when `message` should run now.
    fn start_message(self: &Arc<Self>, key: HandlerKey, entry: &mut HandlerEntry, op: SocketOperation) -> bool {
        let handler = Arc::clone(&entry.handler);
        let state = entry.op(op);
        match state.step {
            Some(Step::Started) => {
                state.step = Some(Step::Ready);
                match handler.finish_async(op) {
                    Ok(true) => {}
                    Ok(false) => {
                        state.step = None;
                        return false;
                    }
                    Err(e) => {
                        log::debug!("[thread-pool] {}: finishing {} failed: {}", handler.description(), op, e);
                        state.step = None;
                        return false;
                    }
                }
            }
            Some(Step::Queued) if state.registered => {
                state.generation += 1;
                let completion = self.completion(key, op, state.generation);
                match handler.start_async(op, completion) {
                    Ok(AsyncStart::Pending) => {
                        state.step = Some(Step::Started);
                        return false;
                    }
                    Ok(AsyncStart::Ready) => state.step = Some(Step::Ready),
                    Err(e) => {
                        log::debug!("[thread-pool] {}: starting {} failed: {}", handler.description(), op, e);
                        state.step = None;
                        return false;
                    }
                }
            }
            Some(Step::Ready) => {}
            Some(Step::Queued) | None => {
                state.step = None;
                return false;
            }
        }

        if state.registered {
            true
        } else {
            state.step = None;
            false
        }
    }

    /// Complete a dispatch: start the next wait unless `io_completed`
    /// already did, and deliver `finished` once nothing is pending.
    fn finish_message(self: &Arc<Self>, key: HandlerKey, op: SocketOperation, restarted: bool) {
        let mut state = self.state.lock();
        let task = match state.handlers.get_mut(&key) {
            Some(entry) if !restarted && entry.state(op).step == Some(Step::Ready) => self.advance(key, entry, op),
            Some(_) => None,
            None => return,
        };
        if let Some(task) = task {
            self.enqueue(&mut state, task);
        }
        self.check_finished(&mut state, key);
    }

    /// Leave `Ready`: start the next wait if still registered.
    fn advance(self: &Arc<Self>, key: HandlerKey, entry: &mut HandlerEntry, op: SocketOperation) -> Option<Task> {
        let handler = Arc::clone(&entry.handler);
        let state = entry.op(op);
        if !state.registered {
            state.step = None;
            return None;
        }
        state.generation += 1;
        let completion = self.completion(key, op, state.generation);
        match handler.start_async(op, completion) {
            Ok(AsyncStart::Pending) => {
                state.step = Some(Step::Started);
                None
            }
            Ok(AsyncStart::Ready) => Some(Task::Message { key, op }),
            Err(e) => {
                log::debug!("[thread-pool] {}: starting {} failed: {}", handler.description(), op, e);
                state.step = None;
                None
            }
        }
    }

    /// Early restart from [`ThreadPoolCurrent::io_completed`]. Returns
    /// `true` when the operation left `Ready`.
    pub(crate) fn restart(self: &Arc<Self>, key: HandlerKey, op: SocketOperation) -> bool {
        let mut state = self.state.lock();
        let task = match state.handlers.get_mut(&key) {
            Some(entry) if entry.state(op).step == Some(Step::Ready) && entry.state(op).registered => {
                self.advance(key, entry, op)
            }
            _ => return false,
        };
        if let Some(task) = task {
            self.enqueue(&mut state, task);
        }
        true
    }

    fn completion(self: &Arc<Self>, key: HandlerKey, op: SocketOperation, generation: u64) -> AsyncCompletion {
        AsyncCompletion {
            shared: Arc::downgrade(self),
            key,
            op,
            generation,
        }
    }

    pub(crate) fn async_completed(self: &Arc<Self>, key: HandlerKey, op: SocketOperation, generation: u64) {
        let mut state = self.state.lock();
        let current = match state.handlers.get_mut(&key) {
            Some(entry) => {
                let s = entry.op(op);
                s.step == Some(Step::Started) && s.generation == generation
            }
            None => false,
        };
        if current {
            self.enqueue(&mut state, Task::Message { key, op });
        }
    }

    fn register(self: &Arc<Self>, handler: &Arc<dyn EventHandler>, op: SocketOperation) -> Result<()> {
        let key = HandlerKey::of(handler);
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(Error::PoolDestroyed);
        }
        let entry = state
            .handlers
            .entry(key)
            .or_insert_with(|| HandlerEntry::new(Arc::clone(handler)));
        if entry.finish_requested {
            log::debug!("[thread-pool] {}: register after finish ignored", handler.description());
            return Ok(());
        }
        let s = entry.op(op);
        s.registered = true;
        if s.step.is_none() {
            s.step = Some(Step::Queued);
            self.enqueue(&mut state, Task::Message { key, op });
        }
        Ok(())
    }

    /// Clear `registered`; an outstanding wait is abandoned and the
    /// operation drained through one more dispatch.
    fn unregister_op(entry: &mut HandlerEntry, key: HandlerKey, op: SocketOperation) -> Option<Task> {
        let s = entry.op(op);
        s.registered = false;
        if s.step == Some(Step::Started) {
            s.step = Some(Step::Queued);
            s.generation += 1;
            Some(Task::Message { key, op })
        } else {
            None
        }
    }

    fn unregister(self: &Arc<Self>, handler: &Arc<dyn EventHandler>, op: SocketOperation) {
        let key = HandlerKey::of(handler);
        let mut state = self.state.lock();
        let task = state
            .handlers
            .get_mut(&key)
            .and_then(|entry| Self::unregister_op(entry, key, op));
        if let Some(task) = task {
            self.enqueue(&mut state, task);
        }
        self.check_finished(&mut state, key);
    }

    fn finish(self: &Arc<Self>, handler: &Arc<dyn EventHandler>) -> Result<()> {
        let key = HandlerKey::of(handler);
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(Error::PoolDestroyed);
        }
        let entry = state
            .handlers
            .entry(key)
            .or_insert_with(|| HandlerEntry::new(Arc::clone(handler)));
        entry.finish_requested = true;
        let tasks: Vec<Task> = [SocketOperation::Read, SocketOperation::Write]
            .into_iter()
            .filter_map(|op| Self::unregister_op(entry, key, op))
            .collect();
        for task in tasks {
            self.enqueue(&mut state, task);
        }
        self.check_finished(&mut state, key);
        Ok(())
    }

    fn check_finished(self: &Arc<Self>, state: &mut PoolState, key: HandlerKey) {
        let done = matches!(
            state.handlers.get(&key),
            Some(entry) if entry.finish_requested && !entry.has_pending()
        );
        if done {
            if let Some(entry) = state.handlers.remove(&key) {
                self.enqueue(
                    state,
                    Task::Finished {
                        key,
                        handler: entry.handler,
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Idle detection
    // ------------------------------------------------------------------------

    fn check_server_idle(&self) {
        let Some(idle) = self.config.server_idle_time else {
            return;
        };
        let Some(action) = self.idle_action.lock().clone() else {
            return;
        };
        let fire = {
            let mut state = self.state.lock();
            let quiet = state.in_use == 0 && state.queued == 0;
            if !state.destroyed && !state.idle_fired && quiet && state.last_activity.elapsed() >= idle {
                state.idle_fired = true;
                true
            } else {
                false
            }
        };
        if !fire {
            return;
        }
        log::debug!("[thread-pool] {} idle for {:?}, running idle action", self.config.name, idle);
        if catch_unwind(AssertUnwindSafe(|| action())).is_err() {
            log::error!("[thread-pool] {}: idle action panicked", self.config.name);
        }
    }
}

fn supervise(shared: &Shared, rx: &Receiver<Supervise>) {
    let tick = shared
        .config
        .server_idle_time
        .map_or(SUPERVISOR_TICK, |d| (d / 4).max(Duration::from_millis(5)));
    let mut workers: HashMap<usize, JoinHandle<()>> = HashMap::new();

    loop {
        match rx.recv_timeout(tick) {
            Ok(Supervise::Spawned(id, handle)) => {
                workers.insert(id, handle);
            }
            Ok(Supervise::Exited(id)) => {
                if let Some(handle) = workers.remove(&id) {
                    if handle.join().is_err() {
                        log::error!("[thread-pool] {}-{} panicked", shared.config.name, id);
                    }
                }
            }
            Ok(Supervise::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        shared.check_server_idle();
    }

    for (id, handle) in workers {
        if handle.join().is_err() {
            log::error!("[thread-pool] {}-{} panicked", shared.config.name, id);
        }
    }
    log::debug!("[thread-pool] {} stopped", shared.config.name);
}

// ============================================================================
// Public handles
// ============================================================================

/// Elastic worker pool.
///
/// Dropping the pool destroys it: queued work still runs, then every
/// worker exits and is joined.
pub struct ThreadPool {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Start a pool with `config.size` threads.
    pub fn new(config: ThreadPoolConfig) -> Result<Self> {
        config.validate().map_err(Error::config)?;

        let (tasks_tx, tasks_rx) = unbounded();
        let (supervisor_tx, supervisor_rx) = unbounded();
        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PoolState {
                threads: 0,
                in_use: 0,
                queued: 0,
                next_thread_id: 0,
                destroyed: false,
                last_activity: Instant::now(),
                idle_fired: false,
                handlers: HashMap::new(),
            }),
            tasks_tx,
            tasks_rx,
            supervisor_tx,
            idle_action: Mutex::new(None),
            config,
        });

        let supervisor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{}-supervisor", shared.config.name))
                .spawn(move || supervise(&shared, &supervisor_rx))?
        };
        let pool = Self {
            shared,
            supervisor: Mutex::new(Some(supervisor)),
        };

        let started = {
            let mut state = pool.shared.state.lock();
            (0..pool.shared.config.size).try_for_each(|_| pool.shared.spawn_worker(&mut state))
        };
        if let Err(e) = started {
            pool.destroy();
            return Err(e.into());
        }

        log::debug!(
            "[thread-pool] {} started with {} thread(s), max {}",
            pool.shared.config.name,
            pool.shared.config.size,
            pool.shared.config.size_max
        );
        Ok(pool)
    }

    pub fn config(&self) -> &ThreadPoolConfig {
        &self.shared.config
    }

    /// Queue a work item.
    pub fn execute(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.shared.submit(Task::Run(Box::new(work)))
    }

    /// Declare interest in `op`; the handler's first wait starts on a worker.
    pub fn register(&self, handler: &Arc<dyn EventHandler>, op: SocketOperation) -> Result<()> {
        self.shared.register(handler, op)
    }

    pub fn unregister(&self, handler: &Arc<dyn EventHandler>, op: SocketOperation) {
        self.shared.unregister(handler, op);
    }

    /// Unregister every operation and call `finished` once none is pending.
    pub fn finish(&self, handler: &Arc<dyn EventHandler>) -> Result<()> {
        self.shared.finish(handler)
    }

    /// Action run once the pool has been idle for `server_idle_time`.
    pub fn set_idle_action(&self, action: impl Fn() + Send + Sync + 'static) {
        *self.shared.idle_action.lock() = Some(Arc::new(action));
    }

    /// Weak handle for handlers and other threads.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().threads
    }

    pub fn in_use(&self) -> usize {
        self.shared.state.lock().in_use
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().queued
    }

    /// Stop accepting work, let queued work drain and join every thread.
    ///
    /// Called from one of the pool's own threads, it only signals shutdown.
    pub fn destroy(&self) {
        let handlers = {
            let mut state = self.shared.state.lock();
            if state.destroyed {
                return;
            }
            for _ in 0..state.threads {
                if self.shared.tasks_tx.send(Task::Exit).is_ok() {
                    state.queued += 1;
                }
            }
            state.destroyed = true;
            mem::take(&mut state.handlers)
        };
        drop(handlers);
        let _ = self.shared.supervisor_tx.send(Supervise::Shutdown);

        if CURRENT_POOL.with(Cell::get) == self.shared.id {
            log::warn!(
                "[thread-pool] {} destroyed from one of its own threads; not joining",
                self.shared.config.name
            );
            return;
        }
        if let Some(supervisor) = self.supervisor.lock().take() {
            if supervisor.join().is_err() {
                log::error!("[thread-pool] {} supervisor panicked", self.shared.config.name);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ThreadPool")
            .field("name", &self.shared.config.name)
            .field("threads", &state.threads)
            .field("in_use", &state.in_use)
            .field("queued", &state.queued)
            .finish()
    }
}

/// Non-owning pool handle; every call fails with [`Error::PoolDestroyed`]
/// once the pool is gone.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Weak<Shared>,
}

impl PoolHandle {
    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or(Error::PoolDestroyed)
    }

    pub fn execute(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.upgrade()?.submit(Task::Run(Box::new(work)))
    }

    pub fn register(&self, handler: &Arc<dyn EventHandler>, op: SocketOperation) -> Result<()> {
        self.upgrade()?.register(handler, op)
    }

    pub fn unregister(&self, handler: &Arc<dyn EventHandler>, op: SocketOperation) -> Result<()> {
        self.upgrade()?.unregister(handler, op);
        Ok(())
    }

    pub fn finish(&self, handler: &Arc<dyn EventHandler>) -> Result<()> {
        self.upgrade()?.finish(handler)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::sync::atomic::AtomicBool;

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_execute_runs_work() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("exec")).expect("pool");
        let (tx, rx) = bounded(1);
        pool.execute(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        })
        .expect("submit");
        let name = rx.recv_timeout(WAIT).expect("work ran");
        assert_eq!(name.as_deref(), Some("exec-0"));
    }

    #[test]
    fn test_panicking_work_does_not_kill_worker() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("panic")).expect("pool");
        pool.execute(|| panic!("boom")).expect("submit");
        let (tx, rx) = bounded(1);
        pool.execute(move || {
            let _ = tx.send(());
        })
        .expect("submit");
        rx.recv_timeout(WAIT).expect("second item ran");
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_grows_on_demand_and_shrinks_when_idle() {
        let config = ThreadPoolConfig::new("elastic")
            .with_size(1)
            .with_size_max(4)
            .with_thread_idle_time(Some(Duration::from_millis(50)));
        let pool = ThreadPool::new(config).expect("pool");

        let (release_tx, release_rx) = unbounded::<()>();
        let (started_tx, started_rx) = unbounded::<()>();
        for _ in 0..4 {
            let release = release_rx.clone();
            let started = started_tx.clone();
            pool.execute(move || {
                let _ = started.send(());
                let _ = release.recv_timeout(WAIT);
            })
            .expect("submit");
        }
        for _ in 0..4 {
            started_rx.recv_timeout(WAIT).expect("all four run concurrently");
        }
        assert_eq!(pool.thread_count(), 4);
        assert_eq!(pool.in_use(), 4);

        drop(release_tx);
        assert!(wait_until(|| pool.thread_count() == 1));
    }

    #[test]
    fn test_never_exceeds_size_max() {
        let config = ThreadPoolConfig::new("capped").with_size(1).with_size_max(2);
        let pool = ThreadPool::new(config).expect("pool");
        let (release_tx, release_rx) = unbounded::<()>();
        for _ in 0..6 {
            let release = release_rx.clone();
            pool.execute(move || {
                let _ = release.recv_timeout(WAIT);
            })
            .expect("submit");
        }
        assert!(pool.thread_count() <= 2);
        assert!(wait_until(|| pool.in_use() == 2));
        drop(release_tx);
        assert!(wait_until(|| pool.queued() == 0 && pool.in_use() == 0));
    }

    #[test]
    fn test_destroy_rejects_new_work() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("gone")).expect("pool");
        let handle = pool.handle();
        pool.destroy();
        assert!(matches!(pool.execute(|| {}), Err(Error::PoolDestroyed)));
        assert_eq!(pool.thread_count(), 0);
        drop(pool);
        assert!(matches!(handle.execute(|| {}), Err(Error::PoolDestroyed)));
    }

    #[test]
    fn test_idle_action_fires_once() {
        let config = ThreadPoolConfig::new("idle").with_server_idle_time(Some(Duration::from_millis(40)));
        let pool = ThreadPool::new(config).expect("pool");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        pool.set_idle_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ThreadPoolConfig::new("bad").with_size(2).with_size_max(1);
        assert!(matches!(ThreadPool::new(config), Err(Error::Config(_))));
    }

    /// Handler whose waits complete when the test says so.
    #[derive(Default)]
    struct ManualHandler {
        waiting: Mutex<Vec<AsyncCompletion>>,
        messages: AtomicUsize,
        finished: AtomicUsize,
        closing: AtomicBool,
    }

    impl EventHandler for ManualHandler {
        fn message(&self, _current: &mut ThreadPoolCurrent<'_>) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }

        fn finished(&self, current: &mut ThreadPoolCurrent<'_>) {
            assert!(current.operation().is_none());
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn start_async(&self, _op: SocketOperation, completion: AsyncCompletion) -> Result<AsyncStart> {
            self.waiting.lock().push(completion);
            Ok(AsyncStart::Pending)
        }

        fn finish_async(&self, _op: SocketOperation) -> Result<bool> {
            Ok(!self.closing.load(Ordering::SeqCst))
        }
    }

    impl ManualHandler {
        fn complete_one(&self) -> bool {
            let completion = self.waiting.lock().pop();
            match completion {
                Some(c) => {
                    c.complete();
                    true
                }
                None => false,
            }
        }

        fn waiting(&self) -> usize {
            self.waiting.lock().len()
        }
    }

    #[test]
    fn test_handler_dispatch_cycle() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("io")).expect("pool");
        let manual = Arc::new(ManualHandler::default());
        let handler: Arc<dyn EventHandler> = manual.clone();

        pool.register(&handler, SocketOperation::Read).expect("register");
        assert!(wait_until(|| manual.waiting() == 1));
        assert_eq!(manual.messages.load(Ordering::SeqCst), 0);

        for round in 1..=3 {
            assert!(manual.complete_one());
            assert!(wait_until(|| manual.messages.load(Ordering::SeqCst) == round));
            // The next wait is armed after each dispatch.
            assert!(wait_until(|| manual.waiting() == 1));
        }

        pool.finish(&handler).expect("finish");
        assert!(wait_until(|| manual.finished.load(Ordering::SeqCst) == 1));
        // The abandoned wait completing late is ignored.
        assert!(manual.complete_one());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(manual.messages.load(Ordering::SeqCst), 3);
        assert_eq!(manual.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finish_without_registration_still_calls_finished() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("fin")).expect("pool");
        let manual = Arc::new(ManualHandler::default());
        let handler: Arc<dyn EventHandler> = manual.clone();
        pool.finish(&handler).expect("finish");
        assert!(wait_until(|| manual.finished.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_cancelled_wait_is_dropped() {
        let pool = ThreadPool::new(ThreadPoolConfig::new("cancel")).expect("pool");
        let manual = Arc::new(ManualHandler::default());
        let handler: Arc<dyn EventHandler> = manual.clone();
        pool.register(&handler, SocketOperation::Read).expect("register");
        assert!(wait_until(|| manual.waiting() == 1));

        manual.closing.store(true, Ordering::SeqCst);
        assert!(manual.complete_one());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(manual.messages.load(Ordering::SeqCst), 0);
        assert_eq!(manual.waiting(), 0);

        pool.finish(&handler).expect("finish");
        assert!(wait_until(|| manual.finished.load(Ordering::SeqCst) == 1));
    }
}
