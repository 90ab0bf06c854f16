//! # Barriers
//!
//! A barrier is a queue sentinel. When the worker reaches it, the barrier's
//! future completes (the "reached" signal); if the barrier was created
//! closed, the worker then parks on the barrier's event until someone calls
//! [`Barrier::open`]. Everything enqueued behind a closed barrier waits with
//! it, which gives tests and callers a way to freeze the pipeline at a
//! known point.
//!
//! A [`BarrierCollection`] groups several barriers so they can be opened
//! together and awaited together.

use std::sync::Arc;

use eyre::Result;
use parking_lot::{Condvar, Mutex};

use super::future::OpFuture;

struct BarrierInner {
    open: bool,
    aborted: bool,
    reached: bool,
}

pub(crate) struct BarrierState {
    inner: Mutex<BarrierInner>,
    cond: Condvar,
}

impl BarrierState {
    /// Called by the worker when the sentinel is dequeued.
    pub(crate) fn mark_reached(&self) {
        let mut inner = self.inner.lock();
        inner.reached = true;
        drop(inner);
        self.cond.notify_all();
    }

    /// Parks the worker until the barrier opens (or disposal aborts it).
    pub(crate) fn wait_open(&self) {
        let mut inner = self.inner.lock();
        while !inner.open && !inner.aborted {
            self.cond.wait(&mut inner);
        }
    }

    /// Releases a parked worker without opening; used on disposal.
    pub(crate) fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        drop(inner);
        self.cond.notify_all();
    }
}

/// Caller handle for one barrier.
#[derive(Clone)]
pub struct Barrier {
    state: Arc<BarrierState>,
}

impl Barrier {
    pub(crate) fn new(open: bool) -> Self {
        Self {
            state: Arc::new(BarrierState {
                inner: Mutex::new(BarrierInner {
                    open,
                    aborted: false,
                    reached: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn state(&self) -> Arc<BarrierState> {
        Arc::clone(&self.state)
    }

    /// Opens the barrier, releasing the worker if it is parked here.
    pub fn open(&self) {
        let mut inner = self.state.inner.lock();
        inner.open = true;
        drop(inner);
        self.state.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.state.inner.lock().open
    }

    /// True once the worker has dequeued this barrier.
    pub fn is_reached(&self) -> bool {
        self.state.inner.lock().reached
    }
}

/// Several barriers opened and awaited as one unit.
#[derive(Default)]
pub struct BarrierCollection {
    entries: Vec<(Barrier, OpFuture<()>)>,
}

impl BarrierCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: Barrier, reached: OpFuture<()>) {
        self.entries.push((barrier, reached));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opens every member barrier.
    pub fn open_all(&self) {
        for (barrier, _) in &self.entries {
            barrier.open();
        }
    }

    /// Blocks until the worker has reached every member barrier.
    pub fn wait_all_reached(self) -> Result<()> {
        for (_, reached) in self.entries {
            reached.wait()?;
        }
        Ok(())
    }
}
