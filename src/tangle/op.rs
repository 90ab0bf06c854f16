//! # Queue Items
//!
//! The tagged union of everything a tangle's worker executes. Each variant
//! carries its inputs plus the [`Completer`] half of the submitter's
//! future; the worker resolves the future strictly after the item's side
//! effects.
//!
//! `GetByIndex` through `CopyFrom` are the internal items behind
//! `FindResult` accessors; each revalidates the captured version before
//! touching the slot.

use std::sync::Arc;

use eyre::Report;

use crate::key::TangleKey;
use crate::queue::{BarrierState, Completer};

use super::find::FindSlot;
use super::Decision;

pub(crate) type UpdateFn<V> = Box<dyn FnOnce(&V) -> Decision<V> + Send>;
pub(crate) type VisitFn<V> = Box<dyn FnMut(&TangleKey, &V) + Send>;
pub(crate) type ReadFn = Box<dyn FnOnce(&[u8]) + Send>;
pub(crate) type DefaultFn<V> = Box<dyn Fn() -> V + Send>;

pub(crate) enum Operation<V> {
    Get {
        key: TangleKey,
        done: Completer<V>,
    },
    Set {
        key: TangleKey,
        value: V,
        allow_overwrite: bool,
        done: Completer<bool>,
    },
    Update {
        key: TangleKey,
        default: V,
        apply: UpdateFn<V>,
        done: Completer<bool>,
    },
    Find {
        key: TangleKey,
        done: Completer<FindSlot>,
    },
    GetByIndex {
        slot: FindSlot,
        done: Completer<V>,
    },
    SetByIndex {
        slot: FindSlot,
        value: V,
        done: Completer<()>,
    },
    ReadData {
        slot: FindSlot,
        read: ReadFn,
        done: Completer<()>,
    },
    CopyTo {
        slot: FindSlot,
        done: Completer<Vec<u8>>,
    },
    CopyFrom {
        slot: FindSlot,
        bytes: Vec<u8>,
        done: Completer<()>,
    },
    Select {
        keys: Vec<TangleKey>,
        make_default: DefaultFn<V>,
        done: Completer<Vec<(TangleKey, V)>>,
    },
    Keys {
        done: Completer<Vec<TangleKey>>,
    },
    Values {
        done: Completer<Vec<V>>,
    },
    ForEach {
        visit: VisitFn<V>,
        done: Completer<()>,
    },
    Barrier {
        barrier: Arc<BarrierState>,
        done: Completer<()>,
    },
    Batch {
        entries: Vec<(TangleKey, V)>,
        done: Completer<usize>,
    },
    Clear {
        done: Completer<()>,
    },
}

impl<V> Operation<V> {
    /// True when the submitter dropped or cancelled the future; the worker
    /// skips such items without executing them.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Operation::Get { done, .. } => done.is_cancelled(),
            Operation::Set { done, .. } => done.is_cancelled(),
            Operation::Update { done, .. } => done.is_cancelled(),
            Operation::Find { done, .. } => done.is_cancelled(),
            Operation::GetByIndex { done, .. } => done.is_cancelled(),
            Operation::SetByIndex { done, .. } => done.is_cancelled(),
            Operation::ReadData { done, .. } => done.is_cancelled(),
            Operation::CopyTo { done, .. } => done.is_cancelled(),
            Operation::CopyFrom { done, .. } => done.is_cancelled(),
            Operation::Select { done, .. } => done.is_cancelled(),
            Operation::Keys { done, .. } => done.is_cancelled(),
            Operation::Values { done, .. } => done.is_cancelled(),
            Operation::ForEach { done, .. } => done.is_cancelled(),
            Operation::Barrier { done, .. } => done.is_cancelled(),
            Operation::Batch { done, .. } => done.is_cancelled(),
            Operation::Clear { done, .. } => done.is_cancelled(),
        }
    }

    /// Fails the item's future without executing it.
    pub fn fail(self, err: Report) {
        match self {
            Operation::Get { done, .. } => done.complete(Err(err)),
            Operation::Set { done, .. } => done.complete(Err(err)),
            Operation::Update { done, .. } => done.complete(Err(err)),
            Operation::Find { done, .. } => done.complete(Err(err)),
            Operation::GetByIndex { done, .. } => done.complete(Err(err)),
            Operation::SetByIndex { done, .. } => done.complete(Err(err)),
            Operation::ReadData { done, .. } => done.complete(Err(err)),
            Operation::CopyTo { done, .. } => done.complete(Err(err)),
            Operation::CopyFrom { done, .. } => done.complete(Err(err)),
            Operation::Select { done, .. } => done.complete(Err(err)),
            Operation::Keys { done, .. } => done.complete(Err(err)),
            Operation::Values { done, .. } => done.complete(Err(err)),
            Operation::ForEach { done, .. } => done.complete(Err(err)),
            Operation::Barrier { done, .. } => done.complete(Err(err)),
            Operation::Batch { done, .. } => done.complete(Err(err)),
            Operation::Clear { done, .. } => done.complete(Err(err)),
        }
    }
}
