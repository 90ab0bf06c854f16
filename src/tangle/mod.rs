//! # Tangle Facade
//!
//! The public handle over one persistent ordered map. A `Tangle` owns the
//! three mapped segments (through the engine core), the operation mailbox,
//! and the observable counters; every public operation enqueues a work item
//! and returns an [`OpFuture`] resolved by the single worker thread.
//!
//! ## Lifecycle
//!
//! A tangle is opened through [`TangleBuilder`], which wires a storage
//! source (a directory by default), a value codec, and tuning knobs. The
//! worker thread is spawned lazily on the first enqueue and retires after
//! the idle timeout; disposal (explicit or on drop) drains the mailbox,
//! fails pending futures, and flushes the segments.
//!
//! ## Counters
//!
//! `count`, `version`, `wasted_data_bytes`, and `node_count` are atomics
//! readable from any thread without enqueuing work. `version` bumps on
//! every mutation and is what invalidates outstanding [`FindResult`]s.

mod find;
mod op;
mod worker;

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use eyre::{bail, eyre, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::btree::{BTree, STATUS_VALID};
use crate::codec::Codec;
use crate::config::{
    DATA_GROWTH_QUANTUM, DEFAULT_IDLE_TIMEOUT, INDEX_GROWTH_QUANTUM, INITIAL_SEGMENT_CAPACITY,
    MAX_BATCH_LEN,
};
use crate::error::TangleError;
use crate::key::TangleKey;
use crate::queue::{op_future, Barrier, BarrierState, Completer, Mailbox, OpFuture};
use crate::storage::{
    DirectorySource, MappedSegment, StorageSource, DATA_STREAM, INDEX_STREAM, KEYS_STREAM,
};

pub use find::{FindFuture, FindResult};
use op::Operation;

/// What an update callback decided about the stored value.
pub enum Decision<V> {
    /// Write this value over the old one.
    Replace(V),
    /// Leave the stored value untouched.
    KeepOld,
}

/// Engine state owned by whichever thread is currently the worker.
pub(crate) struct Core<V, C> {
    index: MappedSegment,
    keys: MappedSegment,
    data: MappedSegment,
    codec: C,
    scratch: Vec<u8>,
    /// Held so a source configured into the tangle lives as long as it.
    _source: Option<Arc<dyn StorageSource>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, C> Core<V, C> {
    /// Splits the core into disjoint borrows: the tree over the three
    /// segments, the codec, and the serialization scratch buffer.
    fn split(&mut self) -> Result<(BTree<'_>, &C, &mut Vec<u8>)> {
        let tree = BTree::open(&mut self.index, &mut self.keys, &mut self.data)?;
        Ok((tree, &self.codec, &mut self.scratch))
    }

    fn flush(&mut self) -> Result<()> {
        self.index.flush()?;
        self.keys.flush()?;
        self.data.flush()
    }
}

pub(crate) struct Shared<V, C> {
    mailbox: Mailbox<Operation<V>>,
    core: Mutex<Option<Core<V, C>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    active_barrier: Mutex<Option<Arc<BarrierState>>>,
    count: AtomicU64,
    version: AtomicU32,
    wasted: AtomicU64,
    node_count: AtomicU64,
    idle_timeout: Duration,
}

impl<V, C> Shared<V, C> {
    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn add_wasted(&self, orphaned: u64) {
        self.wasted.fetch_add(orphaned, Ordering::AcqRel);
    }

    fn note_insert(&self, node_count: i64) {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.node_count.store(node_count as u64, Ordering::Release);
        self.bump_version();
    }

    fn reset_counters(&self, node_count: i64) {
        self.count.store(0, Ordering::Release);
        self.wasted.store(0, Ordering::Release);
        self.node_count.store(node_count as u64, Ordering::Release);
        self.bump_version();
    }

    /// Poisons the mailbox, releases a barrier-parked worker, joins it,
    /// fails everything pending, and flushes the segments.
    fn teardown(&self) {
        let drained = self.mailbox.dispose();
        if let Some(barrier) = self.active_barrier.lock().take() {
            barrier.abort();
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        for op in drained {
            op.fail(TangleError::TangleDisposed.into());
        }
        for op in self.mailbox.drain() {
            op.fail(TangleError::TangleDisposed.into());
        }
        if let Some(core) = self.core.lock().as_mut() {
            if let Err(e) = core.flush() {
                warn!(error = %e, "flush on disposal failed");
            }
        }
    }
}

impl<V, C> Shared<V, C>
where
    V: Send + 'static,
    C: Codec<V>,
{
    pub(crate) fn submit(self: &Arc<Self>, op: Operation<V>) {
        match self.mailbox.push(op) {
            Ok(true) => self.spawn_worker(),
            Ok(false) => {}
            Err(op) => op.fail(TangleError::TangleDisposed.into()),
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("tangle-worker".into())
            .spawn(move || worker::run(shared));
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
            }
            Err(e) => {
                // Queued items stay put; the next submit retries the spawn.
                warn!(error = %e, "failed to spawn tangle worker");
                self.mailbox.mark_worker_stopped();
            }
        }
    }
}

/// A persistent, embedded, ordered key/value store.
///
/// `V` is the application value type; `C` the codec that serializes it.
/// All operations are asynchronous with respect to the calling thread: they
/// enqueue a work item and return a future.
pub struct Tangle<V, C: Codec<V>> {
    shared: Arc<Shared<V, C>>,
}

impl<V, C: Codec<V>> std::fmt::Debug for Tangle<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tangle").finish_non_exhaustive()
    }
}

impl<V, C> Tangle<V, C>
where
    V: Send + 'static,
    C: Codec<V>,
{
    pub fn builder() -> TangleBuilder<V, C> {
        TangleBuilder::new()
    }

    fn enqueue<T: Send + 'static>(
        &self,
        build: impl FnOnce(Completer<T>) -> Operation<V>,
    ) -> OpFuture<T> {
        let (future, done) = op_future();
        self.shared.submit(build(done));
        future
    }

    /// Looks a key up; the future fails with `KeyNotFound` on a miss.
    pub fn get(&self, key: impl Into<TangleKey>) -> OpFuture<V> {
        let key = key.into();
        self.enqueue(|done| Operation::Get { key, done })
    }

    /// Writes a value, overwriting any existing one. Resolves `true` once
    /// written.
    pub fn set(&self, key: impl Into<TangleKey>, value: V) -> OpFuture<bool> {
        let key = key.into();
        self.enqueue(|done| Operation::Set {
            key,
            value,
            allow_overwrite: true,
            done,
        })
    }

    /// Writes a value only if the key is absent. Resolves `false` when the
    /// key already existed (and leaves it untouched).
    pub fn add(&self, key: impl Into<TangleKey>, value: V) -> OpFuture<bool> {
        let key = key.into();
        self.enqueue(|done| Operation::Set {
            key,
            value,
            allow_overwrite: false,
            done,
        })
    }

    /// Updates an existing value through `apply`, or inserts `default` when
    /// the key is absent. Resolves `true` iff the tangle was mutated.
    pub fn add_or_update(
        &self,
        key: impl Into<TangleKey>,
        default: V,
        apply: impl FnOnce(&V) -> Decision<V> + Send + 'static,
    ) -> OpFuture<bool> {
        let key = key.into();
        self.enqueue(|done| Operation::Update {
            key,
            default,
            apply: Box::new(apply),
            done,
        })
    }

    /// Locates a key and returns a reusable reference to its slot, valid
    /// until the next mutation.
    pub fn find(&self, key: impl Into<TangleKey>) -> FindFuture<V, C> {
        let key = key.into();
        let (future, done) = op_future();
        let shared = Arc::downgrade(&self.shared);
        self.shared.submit(Operation::Find { key, done });
        FindFuture {
            inner: future,
            shared,
        }
    }

    /// Reads several keys in request order; absent keys yield the default.
    pub fn select(&self, keys: Vec<TangleKey>, default: V) -> OpFuture<Vec<(TangleKey, V)>>
    where
        V: Clone,
    {
        self.enqueue(|done| Operation::Select {
            keys,
            make_default: Box::new(move || default.clone()),
            done,
        })
    }

    /// All keys in ascending byte order, with their kind tags.
    pub fn keys(&self) -> OpFuture<Vec<TangleKey>> {
        self.enqueue(|done| Operation::Keys { done })
    }

    /// All values in ascending key order.
    pub fn values(&self) -> OpFuture<Vec<V>> {
        self.enqueue(|done| Operation::Values { done })
    }

    /// Visits every entry in ascending key order on the worker thread.
    pub fn for_each(
        &self,
        visit: impl FnMut(&TangleKey, &V) + Send + 'static,
    ) -> OpFuture<()> {
        self.enqueue(|done| Operation::ForEach {
            visit: Box::new(visit),
            done,
        })
    }

    /// Enqueues a barrier. The returned future resolves when the worker
    /// reaches it; while the barrier is closed the worker parks there,
    /// holding back everything enqueued after it.
    pub fn barrier(&self, open: bool) -> (Barrier, OpFuture<()>) {
        let barrier = Barrier::new(open);
        let state = barrier.state();
        let (future, done) = op_future();
        self.shared.submit(Operation::Barrier {
            barrier: state,
            done,
        });
        (barrier, future)
    }

    /// Executes up to [`MAX_BATCH_LEN`] writes as one queue item. Resolves
    /// to the number of entries written.
    pub fn batch(&self, entries: Vec<(TangleKey, V)>) -> OpFuture<usize> {
        let (future, done) = op_future();
        if entries.len() > MAX_BATCH_LEN {
            done.complete(Err(eyre!(
                "batch of {} items exceeds the {} item bound",
                entries.len(),
                MAX_BATCH_LEN
            )));
            return future;
        }
        self.shared.submit(Operation::Batch { entries, done });
        future
    }

    /// Resets the tangle to empty.
    pub fn clear(&self) -> OpFuture<()> {
        self.enqueue(|done| Operation::Clear { done })
    }

    /// Number of live entries.
    pub fn count(&self) -> u64 {
        self.shared.count.load(Ordering::Acquire)
    }

    /// Mutation counter; bumps on every write and invalidates outstanding
    /// find results.
    pub fn version(&self) -> u32 {
        self.shared.version()
    }

    /// Total bytes orphaned in the data segment by growing replacements.
    pub fn wasted_data_bytes(&self) -> u64 {
        self.shared.wasted.load(Ordering::Acquire)
    }

    /// Number of B-tree nodes in the index segment.
    pub fn node_count(&self) -> u64 {
        self.shared.node_count.load(Ordering::Acquire)
    }

    /// Tears the tangle down: pending operations fail with
    /// `TangleDisposed`, the worker is joined, and the segments are
    /// flushed. Called automatically on drop.
    pub fn dispose(&self) {
        self.shared.teardown();
        debug!("tangle disposed");
    }
}

impl<V, C: Codec<V>> Drop for Tangle<V, C> {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

/// Fluent configuration for opening a [`Tangle`].
pub struct TangleBuilder<V, C> {
    directory: Option<PathBuf>,
    name: String,
    source: Option<Arc<dyn StorageSource>>,
    codec: Option<C>,
    idle_timeout: Duration,
    initial_capacity: usize,
    _marker: PhantomData<fn() -> V>,
}

impl<V, C> Default for TangleBuilder<V, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, C> TangleBuilder<V, C> {
    pub fn new() -> Self {
        Self {
            directory: None,
            name: "tangle".to_string(),
            source: None,
            codec: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            initial_capacity: INITIAL_SEGMENT_CAPACITY,
            _marker: PhantomData,
        }
    }

    /// Backs the tangle with prefixed files under `path` (created on
    /// demand). The tangle owns the resulting source.
    pub fn directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.directory = Some(path.into());
        self
    }

    /// Stream-name prefix for the segment files. Defaults to `"tangle"`.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Backs the tangle with a caller-supplied storage source; ownership is
    /// shared with the caller.
    pub fn source(mut self, source: Arc<dyn StorageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn codec(mut self, codec: C) -> Self {
        self.codec = Some(codec);
        self
    }

    /// How long the worker lingers idle before flushing and retiring.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Mapped capacity given to freshly created segments.
    pub fn initial_capacity(mut self, bytes: usize) -> Self {
        self.initial_capacity = bytes;
        self
    }
}

impl<V, C> TangleBuilder<V, C>
where
    V: Send + 'static,
    C: Codec<V>,
{
    /// Opens or creates the tangle with the configured settings.
    pub fn open(self) -> Result<Tangle<V, C>> {
        let source: Arc<dyn StorageSource> = match (self.source, self.directory) {
            (Some(source), _) => source,
            (None, Some(directory)) => Arc::new(DirectorySource::new(directory, &self.name)?),
            (None, None) => {
                bail!("storage not specified: call .directory() or .source() first")
            }
        };
        let codec = match self.codec {
            Some(codec) => codec,
            None => bail!("codec not specified: call .codec() first"),
        };

        let index = MappedSegment::open(
            "index",
            source.open_stream(INDEX_STREAM)?,
            self.initial_capacity,
            INDEX_GROWTH_QUANTUM,
        )?;
        let keys = MappedSegment::open(
            "keys",
            source.open_stream(KEYS_STREAM)?,
            self.initial_capacity,
            DATA_GROWTH_QUANTUM,
        )?;
        let data = MappedSegment::open(
            "data",
            source.open_stream(DATA_STREAM)?,
            self.initial_capacity,
            DATA_GROWTH_QUANTUM,
        )?;

        let mut core = Core {
            index,
            keys,
            data,
            codec,
            scratch: Vec::with_capacity(256),
            _source: Some(source),
            _marker: PhantomData,
        };

        // One ordered pass recovers the observable counters; the live count
        // and wasted bytes are not stored in the format.
        let (count, live_bytes, node_count) = {
            let (mut tree, _, _) = core.split()?;
            let entries = tree.entries_in_order()?;
            let count = entries
                .iter()
                .filter(|(_, e)| e.status() == STATUS_VALID)
                .count() as u64;
            let live_bytes: i64 = entries
                .iter()
                .filter(|(_, e)| e.status() == STATUS_VALID)
                .map(|(_, e)| e.data_length() as i64)
                .sum();
            (count, live_bytes, tree.node_count())
        };
        let wasted = (core.data.len() - live_bytes).max(0) as u64;

        debug!(count, wasted, node_count, "tangle opened");

        Ok(Tangle {
            shared: Arc::new(Shared {
                mailbox: Mailbox::new(),
                core: Mutex::new(Some(core)),
                worker: Mutex::new(None),
                active_barrier: Mutex::new(None),
                count: AtomicU64::new(count),
                version: AtomicU32::new(0),
                wasted: AtomicU64::new(wasted),
                node_count: AtomicU64::new(node_count as u64),
                idle_timeout: self.idle_timeout,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Utf8Codec;
    use tempfile::tempdir;

    #[test]
    fn builder_without_storage_fails() {
        let result = Tangle::<String, Utf8Codec>::builder().codec(Utf8Codec).open();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("storage not specified"));
    }

    #[test]
    fn builder_without_codec_fails() {
        let dir = tempdir().unwrap();
        let result = Tangle::<String, Utf8Codec>::builder()
            .directory(dir.path())
            .open();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("codec not specified"));
    }

    #[test]
    fn open_creates_prefixed_segment_files() {
        let dir = tempdir().unwrap();
        let tangle = Tangle::<String, Utf8Codec>::builder()
            .directory(dir.path())
            .name("demo")
            .codec(Utf8Codec)
            .open()
            .unwrap();

        assert!(dir.path().join("demo.index").exists());
        assert!(dir.path().join("demo.keys").exists());
        assert!(dir.path().join("demo.data").exists());
        assert_eq!(tangle.count(), 0);
        assert_eq!(tangle.node_count(), 1);
    }

    #[test]
    fn fresh_tangle_counters_start_clean() {
        let dir = tempdir().unwrap();
        let tangle = Tangle::<String, Utf8Codec>::builder()
            .directory(dir.path())
            .codec(Utf8Codec)
            .open()
            .unwrap();

        assert_eq!(tangle.count(), 0);
        assert_eq!(tangle.version(), 0);
        assert_eq!(tangle.wasted_data_bytes(), 0);
    }
}
