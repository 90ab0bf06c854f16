//! # Operation Futures
//!
//! Every enqueued operation hands its submitter an [`OpFuture`] and keeps
//! the matching [`Completer`]. The shared state is a mutex-guarded slot plus
//! a condvar; the worker completes it exactly once, after the operation's
//! side effects are in place.
//!
//! Dropping a future that has not completed marks the operation cancelled.
//! The worker checks the flag before executing and skips cancelled items,
//! so a cancelled operation leaves no visible side effect.

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use parking_lot::{Condvar, Mutex};

use crate::error::TangleError;

struct FutureInner<T> {
    result: Option<Result<T>>,
    done: bool,
    cancelled: bool,
}

struct FutureState<T> {
    inner: Mutex<FutureInner<T>>,
    cond: Condvar,
}

/// The submitter's half: wait for, poll, or cancel one operation.
pub struct OpFuture<T> {
    state: Arc<FutureState<T>>,
}

/// The worker's half: complete one operation.
pub(crate) struct Completer<T> {
    state: Arc<FutureState<T>>,
}

pub(crate) fn op_future<T>() -> (OpFuture<T>, Completer<T>) {
    let state = Arc::new(FutureState {
        inner: Mutex::new(FutureInner {
            result: None,
            done: false,
            cancelled: false,
        }),
        cond: Condvar::new(),
    });
    (
        OpFuture {
            state: Arc::clone(&state),
        },
        Completer { state },
    )
}

impl<T> OpFuture<T> {
    /// Blocks until the operation completes and returns its result.
    pub fn wait(self) -> Result<T> {
        let mut inner = self.state.inner.lock();
        while !inner.done {
            self.state.cond.wait(&mut inner);
        }
        match inner.result.take() {
            Some(result) => result,
            None => Err(TangleError::Cancelled.into()),
        }
    }

    /// Blocks up to `timeout` for completion. Returns whether the operation
    /// is done; the result is then collected with [`OpFuture::wait`].
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut inner = self.state.inner.lock();
        if inner.done {
            return true;
        }
        self.state.cond.wait_for(&mut inner, timeout);
        inner.done
    }

    pub fn is_done(&self) -> bool {
        self.state.inner.lock().done
    }

    /// Flags the operation cancelled. A no-op once the worker has executed
    /// it; otherwise the worker skips the item.
    pub fn cancel(&self) {
        let mut inner = self.state.inner.lock();
        if !inner.done {
            inner.cancelled = true;
        }
    }
}

impl<T> Drop for OpFuture<T> {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        if !inner.done {
            inner.cancelled = true;
        }
    }
}

impl<T> Completer<T> {
    /// True when the submitter dropped or cancelled the future before the
    /// worker reached the operation.
    pub fn is_cancelled(&self) -> bool {
        self.state.inner.lock().cancelled
    }

    /// Publishes the operation's result and wakes waiters. Completion is
    /// totally ordered after the operation's side effects because the worker
    /// calls this last.
    pub fn complete(self, result: Result<T>) {
        let mut inner = self.state.inner.lock();
        inner.result = Some(result);
        inner.done = true;
        drop(inner);
        self.state.cond.notify_all();
    }
}
