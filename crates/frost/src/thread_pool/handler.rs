// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event handler contract and per-operation dispatch state.

use std::fmt;
use std::sync::{Arc, Weak};

use super::Shared;
use crate::error::Result;

/// Direction of a socket operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketOperation {
    Read,
    Write,
}

impl SocketOperation {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }
}

impl fmt::Display for SocketOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Outcome of [`EventHandler::start_async`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncStart {
    /// The operation can proceed now; `message` is dispatched right away.
    Ready,
    /// Waiting on the socket; the handler calls [`AsyncCompletion::complete`] later.
    Pending,
}

/// Socket-driven object serviced by a [`ThreadPool`](super::ThreadPool).
///
/// `start_async` and `finish_async` run while the pool lock is held and
/// must not call back into the pool; they only arm or collect I/O.
/// `message` and `finished` run on a worker thread without the lock.
pub trait EventHandler: Send + Sync {
    /// Service one ready operation.
    fn message(&self, current: &mut ThreadPoolCurrent<'_>);

    /// Called once after [`ThreadPool::finish`](super::ThreadPool::finish),
    /// when no operation is pending any more.
    fn finished(&self, current: &mut ThreadPoolCurrent<'_>);

    /// Begin waiting for `op`.
    fn start_async(&self, op: SocketOperation, completion: AsyncCompletion) -> Result<AsyncStart>;

    /// Collect the result of a completed wait. `Ok(false)` drops the step
    /// (operation cancelled or handler closing).
    fn finish_async(&self, op: SocketOperation) -> Result<bool>;

    /// Label used in log lines.
    fn description(&self) -> String {
        "event handler".to_owned()
    }
}

/// Key of a registered handler: address of its shared allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct HandlerKey(usize);

impl HandlerKey {
    pub(crate) fn of(handler: &Arc<dyn EventHandler>) -> Self {
        Self(Arc::as_ptr(handler).cast::<()>() as usize)
    }
}

/// Where a handler operation is in its dispatch cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A message dispatch is queued on the pool.
    Queued,
    /// An asynchronous wait is outstanding.
    Started,
    /// Ready to service, or `message` is running.
    Ready,
}

/// Dispatch state of one (handler, operation) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct OpState {
    pub(crate) registered: bool,
    /// `Some` while the operation is pending.
    pub(crate) step: Option<Step>,
    /// Bumped for every wait started, so stale completions are ignored.
    pub(crate) generation: u64,
}

pub(crate) struct HandlerEntry {
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) ops: [OpState; 2],
    pub(crate) finish_requested: bool,
}

impl HandlerEntry {
    pub(crate) fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            ops: [OpState::default(); 2],
            finish_requested: false,
        }
    }

    pub(crate) fn op(&mut self, op: SocketOperation) -> &mut OpState {
        &mut self.ops[op.index()]
    }

    pub(crate) fn state(&self, op: SocketOperation) -> OpState {
        self.ops[op.index()]
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.ops.iter().any(|s| s.step.is_some())
    }
}

/// Completion handle passed to [`EventHandler::start_async`].
///
/// Completing after the pool is gone, or after the step was dropped, is a
/// no-op.
pub struct AsyncCompletion {
    pub(crate) shared: Weak<Shared>,
    pub(crate) key: HandlerKey,
    pub(crate) op: SocketOperation,
    pub(crate) generation: u64,
}

impl AsyncCompletion {
    pub fn operation(&self) -> SocketOperation {
        self.op
    }

    /// Report that the awaited operation can proceed.
    pub fn complete(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.async_completed(self.key, self.op, self.generation);
        }
    }
}

impl fmt::Debug for AsyncCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCompletion")
            .field("key", &self.key)
            .field("op", &self.op)
            .finish()
    }
}

/// Dispatch context handed to [`EventHandler::message`] and
/// [`EventHandler::finished`].
pub struct ThreadPoolCurrent<'a> {
    pub(crate) shared: &'a Arc<Shared>,
    pub(crate) key: HandlerKey,
    pub(crate) operation: Option<SocketOperation>,
    pub(crate) io_completed: bool,
    /// The next wait was already started by `io_completed`.
    pub(crate) restarted: bool,
}

impl ThreadPoolCurrent<'_> {
    /// Operation being serviced; `None` inside `finished`.
    pub fn operation(&self) -> Option<SocketOperation> {
        self.operation
    }

    /// Signal that the socket work of this step is done and only
    /// application processing remains.
    ///
    /// Unless the pool serializes dispatch, the next wait for the same
    /// operation starts immediately so another thread can service it.
    pub fn io_completed(&mut self) {
        if self.io_completed {
            return;
        }
        self.io_completed = true;
        if let Some(op) = self.operation {
            if !self.shared.config.serialize {
                self.restarted = self.shared.restart(self.key, op);
            }
        }
    }

    /// Pool name.
    pub fn pool_name(&self) -> &str {
        &self.shared.config.name
    }
}

impl fmt::Debug for ThreadPoolCurrent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolCurrent")
            .field("operation", &self.operation)
            .field("io_completed", &self.io_completed)
            .finish()
    }
}
