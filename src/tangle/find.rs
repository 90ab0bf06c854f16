//! # Find Results
//!
//! `Find` hands back a reusable reference to one slot: an opaque handle
//! carrying the tangle's identity (weakly), the version at find time, and
//! the slot coordinates. Every accessor revalidates the version on the
//! worker and enqueues its own item, so a handle that outlives any mutation
//! fails with `TangleModified` instead of touching a moved slot.

use std::sync::Weak;

use crate::codec::Codec;
use crate::error::TangleError;
use crate::queue::{op_future, OpFuture};

use super::op::Operation;
use super::Shared;

/// Captured slot coordinates: tangle version plus (node, slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FindSlot {
    pub version: u32,
    pub node: i64,
    pub slot: usize,
}

/// Future of a [`FindResult`].
pub struct FindFuture<V, C: Codec<V>> {
    pub(crate) inner: OpFuture<FindSlot>,
    pub(crate) shared: Weak<Shared<V, C>>,
}

impl<V: Send + 'static, C: Codec<V>> FindFuture<V, C> {
    pub fn wait(self) -> eyre::Result<FindResult<V, C>> {
        let FindFuture { inner, shared } = self;
        let slot = inner.wait()?;
        Ok(FindResult { shared, slot })
    }
}

/// A reusable reference to one found slot. Valid until the next mutation.
pub struct FindResult<V, C: Codec<V>> {
    shared: Weak<Shared<V, C>>,
    slot: FindSlot,
}

impl<V, C: Codec<V>> std::fmt::Debug for FindResult<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindResult").field("slot", &self.slot).finish_non_exhaustive()
    }
}

impl<V: Send + 'static, C: Codec<V>> FindResult<V, C> {
    /// The tangle version this handle was captured at.
    pub fn version(&self) -> u32 {
        self.slot.version
    }

    fn submit<T: Send + 'static>(
        &self,
        build: impl FnOnce(crate::queue::Completer<T>) -> Operation<V>,
    ) -> OpFuture<T> {
        let (future, done) = op_future();
        match self.shared.upgrade() {
            Some(shared) => shared.submit(build(done)),
            None => done.complete(Err(TangleError::TangleDisposed.into())),
        }
        future
    }

    /// Reads and deserializes the value at the captured slot.
    pub fn get_value(&self) -> OpFuture<V> {
        let slot = self.slot;
        self.submit(|done| Operation::GetByIndex { slot, done })
    }

    /// Overwrites the value at the captured slot. This mutates the tangle,
    /// so the handle itself becomes stale afterwards.
    pub fn set_value(&self, value: V) -> OpFuture<()> {
        let slot = self.slot;
        self.submit(|done| Operation::SetByIndex { slot, value, done })
    }

    /// Runs `read` over the raw value bytes on the worker thread, with the
    /// slot marked in-modification for the duration.
    pub fn read_data(&self, read: impl FnOnce(&[u8]) + Send + 'static) -> OpFuture<()> {
        let slot = self.slot;
        self.submit(|done| Operation::ReadData {
            slot,
            read: Box::new(read),
            done,
        })
    }

    /// Copies the raw value region out.
    pub fn copy_to(&self) -> OpFuture<Vec<u8>> {
        let slot = self.slot;
        self.submit(|done| Operation::CopyTo { slot, done })
    }

    /// Overwrites the value region with raw bytes (relocating if they do
    /// not fit). Mutates the tangle, staling the handle.
    pub fn copy_from(&self, bytes: Vec<u8>) -> OpFuture<()> {
        let slot = self.slot;
        self.submit(|done| Operation::CopyFrom { slot, bytes, done })
    }
}
