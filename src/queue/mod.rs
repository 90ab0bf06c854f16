//! # Operation Queue Primitives
//!
//! The engine funnels every operation through a FIFO served by one worker
//! thread. This module holds the pieces that make that work:
//!
//! - [`Mailbox`]: the queue itself, a mutex-guarded FIFO with a condvar
//!   wakeup, lazy-worker bookkeeping, idle-timeout receive, and disposal
//!   draining.
//! - [`OpFuture`]: the per-operation future, with shared-state completion,
//!   blocking wait, bounded wait, and drop-to-cancel.
//! - [`Barrier`] / [`BarrierCollection`]: queue sentinels that pause the
//!   worker while closed.
//!
//! Items execute strictly in enqueue order; an item's future resolves only
//! after its side effects. Dropping a future before its item runs cancels
//! the item: the worker skips it, leaving no visible effect.

mod barrier;
mod future;
mod mailbox;

pub use barrier::{Barrier, BarrierCollection};
pub(crate) use barrier::BarrierState;
pub use future::OpFuture;
pub(crate) use future::{op_future, Completer};
pub(crate) use mailbox::{Mailbox, RecvOutcome};
