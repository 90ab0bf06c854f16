//! # Worker Loop
//!
//! One worker thread per tangle executes every queue item. The worker takes
//! the engine core out of the shared slot at spawn, drains the mailbox in
//! enqueue order, and puts the core back when it exits, so exactly one
//! mutator exists at any moment and the B-tree never needs internal
//! locking.
//!
//! On an idle timeout the worker flushes the segments, returns the core,
//! and retires; if an item slipped in while it was flushing, retirement
//! fails and the worker reclaims the core and keeps going. Disposal drains
//! the mailbox and the disposer fails the pending futures after joining the
//! worker.
//!
//! Per-item errors fail that item's future; the worker keeps running.

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use tracing::{debug, warn};

use crate::btree::{
    BTree, ReplaceOutcome, SearchOutcome, SlotId, ValueEntry, STATUS_IN_MODIFICATION, STATUS_VALID,
};
use crate::codec::Codec;
use crate::config::MAX_BATCH_LEN;
use crate::error::TangleError;
use crate::key::{KeyKind, TangleKey};
use crate::queue::RecvOutcome;

use super::find::FindSlot;
use super::op::{DefaultFn, Operation, ReadFn, UpdateFn, VisitFn};
use super::{Core, Decision, Shared};

pub(crate) fn run<V, C>(shared: Arc<Shared<V, C>>)
where
    V: Send + 'static,
    C: Codec<V>,
{
    let mut core = match shared.core.lock().take() {
        Some(core) => core,
        None => {
            warn!("tangle worker spawned without a core; exiting");
            shared.mailbox.mark_worker_stopped();
            return;
        }
    };
    debug!("tangle worker started");

    loop {
        match shared.mailbox.recv(shared.idle_timeout) {
            RecvOutcome::Item(op) => execute(&shared, &mut core, op),
            RecvOutcome::TimedOut => {
                if let Err(e) = core.flush() {
                    warn!(error = %e, "idle flush failed");
                }
                // Return the core before retiring so a replacement worker
                // can pick it up; reclaim it if retirement loses the race
                // with a fresh enqueue.
                *shared.core.lock() = Some(core);
                if shared.mailbox.retire() {
                    debug!("tangle worker retired after idle timeout");
                    return;
                }
                core = match shared.core.lock().take() {
                    Some(core) => core,
                    None => return,
                };
            }
            RecvOutcome::Disposed => break,
        }
    }

    if let Err(e) = core.flush() {
        warn!(error = %e, "flush on disposal failed");
    }
    *shared.core.lock() = Some(core);
    debug!("tangle worker stopped for disposal");
}

fn execute<V, C>(shared: &Arc<Shared<V, C>>, core: &mut Core<V, C>, op: Operation<V>)
where
    V: Send + 'static,
    C: Codec<V>,
{
    if op.is_cancelled() {
        op.fail(TangleError::Cancelled.into());
        return;
    }

    match op {
        Operation::Get { key, done } => done.complete(exec_get(core, &key)),
        Operation::Set {
            key,
            value,
            allow_overwrite,
            done,
        } => done.complete(apply_set(shared, core, &key, &value, allow_overwrite)),
        Operation::Update {
            key,
            default,
            apply,
            done,
        } => done.complete(exec_update(shared, core, &key, &default, apply)),
        Operation::Find { key, done } => done.complete(exec_find(shared, core, &key)),
        Operation::GetByIndex { slot, done } => {
            done.complete(exec_get_by_index(shared, core, &slot))
        }
        Operation::SetByIndex { slot, value, done } => {
            done.complete(exec_set_by_index(shared, core, &slot, &value))
        }
        Operation::ReadData { slot, read, done } => {
            done.complete(exec_read_data(shared, core, &slot, read))
        }
        Operation::CopyTo { slot, done } => done.complete(exec_copy_to(shared, core, &slot)),
        Operation::CopyFrom { slot, bytes, done } => {
            done.complete(exec_copy_from(shared, core, &slot, &bytes))
        }
        Operation::Select {
            keys,
            make_default,
            done,
        } => done.complete(exec_select(core, &keys, &make_default)),
        Operation::Keys { done } => done.complete(exec_keys(core)),
        Operation::Values { done } => done.complete(exec_values(core)),
        Operation::ForEach { visit, done } => done.complete(exec_for_each(core, visit)),
        Operation::Barrier { barrier, done } => {
            // Register before signaling so disposal can always release a
            // parked worker; re-check disposal before parking to close the
            // race with an abort that fired before registration.
            *shared.active_barrier.lock() = Some(Arc::clone(&barrier));
            barrier.mark_reached();
            done.complete(Ok(()));
            if !shared.mailbox.is_disposed() {
                barrier.wait_open();
            }
            *shared.active_barrier.lock() = None;
        }
        Operation::Batch { entries, done } => done.complete(exec_batch(shared, core, &entries)),
        Operation::Clear { done } => done.complete(exec_clear(shared, core)),
    }
}

fn encode<V, C: Codec<V>>(
    codec: &C,
    key: &TangleKey,
    value: &V,
    scratch: &mut Vec<u8>,
) -> Result<()> {
    scratch.clear();
    codec.serialize(value, scratch).map_err(|e| {
        TangleError::SerializerFailed {
            key: key.clone(),
            detail: format!("{:#}", e),
        }
        .into()
    })
}

fn decode<V, C: Codec<V>>(codec: &C, key: &TangleKey, bytes: &[u8]) -> Result<V> {
    codec.deserialize(bytes).map_err(|e| {
        TangleError::SerializerFailed {
            key: key.clone(),
            detail: format!("{:#}", e),
        }
        .into()
    })
}

fn ensure_valid(id: &SlotId, entry: &ValueEntry) -> Result<()> {
    ensure!(
        entry.status() == STATUS_VALID,
        TangleError::InvalidData {
            node: id.node,
            slot: id.slot,
            status: entry.status(),
        }
    );
    Ok(())
}

fn entry_key(tree: &mut BTree<'_>, entry: &ValueEntry) -> Result<TangleKey> {
    let kind = KeyKind::from_tag(entry.key_kind())?;
    let bytes = tree.key_bytes(entry)?;
    TangleKey::from_raw(kind, &bytes)
}

fn read_value<V, C: Codec<V>>(
    tree: &mut BTree<'_>,
    codec: &C,
    key: &TangleKey,
    id: &SlotId,
) -> Result<V> {
    let entry = tree.entry(id)?;
    ensure_valid(id, &entry)?;
    let range = tree.value_range(&entry)?;
    decode(codec, key, range.as_slice())
}

fn exec_get<V, C: Codec<V>>(core: &mut Core<V, C>, key: &TangleKey) -> Result<V> {
    let (mut tree, codec, _) = core.split()?;
    match tree.find(key.as_bytes())? {
        SearchOutcome::Found(id) => read_value(&mut tree, codec, key, &id),
        SearchOutcome::Missing { .. } => bail!(TangleError::KeyNotFound(key.clone())),
    }
}

fn apply_set<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    key: &TangleKey,
    value: &V,
    allow_overwrite: bool,
) -> Result<bool> {
    let (mut tree, codec, scratch) = core.split()?;
    encode(codec, key, value, scratch)?;
    match tree.find(key.as_bytes())? {
        SearchOutcome::Found(id) => {
            if !allow_overwrite {
                return Ok(false);
            }
            match tree.replace(&id, scratch.as_slice())? {
                ReplaceOutcome::InPlace => {}
                ReplaceOutcome::Relocated { orphaned } => shared.add_wasted(orphaned),
            }
            shared.bump_version();
            Ok(true)
        }
        SearchOutcome::Missing { .. } => {
            tree.insert(key.as_bytes(), key.kind().tag(), scratch.as_slice())?;
            shared.note_insert(tree.node_count());
            Ok(true)
        }
    }
}

fn exec_update<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    key: &TangleKey,
    default: &V,
    apply: UpdateFn<V>,
) -> Result<bool> {
    let (mut tree, codec, scratch) = core.split()?;
    match tree.find(key.as_bytes())? {
        SearchOutcome::Found(id) => {
            let old = read_value(&mut tree, codec, key, &id)?;
            match apply(&old) {
                Decision::Replace(new) => {
                    encode(codec, key, &new, scratch)?;
                    match tree.replace(&id, scratch.as_slice())? {
                        ReplaceOutcome::InPlace => {}
                        ReplaceOutcome::Relocated { orphaned } => shared.add_wasted(orphaned),
                    }
                    shared.bump_version();
                    Ok(true)
                }
                Decision::KeepOld => Ok(false),
            }
        }
        SearchOutcome::Missing { .. } => {
            encode(codec, key, default, scratch)?;
            tree.insert(key.as_bytes(), key.kind().tag(), scratch.as_slice())?;
            shared.note_insert(tree.node_count());
            Ok(true)
        }
    }
}

fn exec_find<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    key: &TangleKey,
) -> Result<FindSlot> {
    let (mut tree, _, _) = core.split()?;
    match tree.find(key.as_bytes())? {
        SearchOutcome::Found(id) => Ok(FindSlot {
            version: shared.version(),
            node: id.node,
            slot: id.slot,
        }),
        SearchOutcome::Missing { .. } => bail!(TangleError::KeyNotFound(key.clone())),
    }
}

fn check_slot<V, C>(shared: &Shared<V, C>, slot: &FindSlot) -> Result<SlotId> {
    let actual = shared.version();
    ensure!(
        actual == slot.version,
        TangleError::TangleModified {
            expected: slot.version,
            actual,
        }
    );
    Ok(SlotId {
        node: slot.node,
        slot: slot.slot,
    })
}

fn exec_get_by_index<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    slot: &FindSlot,
) -> Result<V> {
    let id = check_slot(shared, slot)?;
    let (mut tree, codec, _) = core.split()?;
    let entry = tree.entry(&id)?;
    ensure_valid(&id, &entry)?;
    let key = entry_key(&mut tree, &entry)?;
    let range = tree.value_range(&entry)?;
    decode(codec, &key, range.as_slice())
}

fn exec_set_by_index<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    slot: &FindSlot,
    value: &V,
) -> Result<()> {
    let id = check_slot(shared, slot)?;
    let (mut tree, codec, scratch) = core.split()?;
    let entry = tree.entry(&id)?;
    ensure_valid(&id, &entry)?;
    let key = entry_key(&mut tree, &entry)?;
    encode(codec, &key, value, scratch)?;
    match tree.replace(&id, scratch.as_slice())? {
        ReplaceOutcome::InPlace => {}
        ReplaceOutcome::Relocated { orphaned } => shared.add_wasted(orphaned),
    }
    shared.bump_version();
    Ok(())
}

fn exec_read_data<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    slot: &FindSlot,
    read: ReadFn,
) -> Result<()> {
    let id = check_slot(shared, slot)?;
    let (mut tree, _, _) = core.split()?;
    let entry = tree.entry(&id)?;
    ensure_valid(&id, &entry)?;
    tree.set_entry_status(&id, STATUS_IN_MODIFICATION)?;
    {
        let range = tree.value_range(&entry)?;
        read(range.as_slice());
    }
    tree.set_entry_status(&id, STATUS_VALID)?;
    Ok(())
}

fn exec_copy_to<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    slot: &FindSlot,
) -> Result<Vec<u8>> {
    let id = check_slot(shared, slot)?;
    let (mut tree, _, _) = core.split()?;
    let entry = tree.entry(&id)?;
    ensure_valid(&id, &entry)?;
    let range = tree.value_range(&entry)?;
    Ok(range.as_slice().to_vec())
}

fn exec_copy_from<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    slot: &FindSlot,
    bytes: &[u8],
) -> Result<()> {
    let id = check_slot(shared, slot)?;
    let (mut tree, _, _) = core.split()?;
    let entry = tree.entry(&id)?;
    ensure_valid(&id, &entry)?;
    match tree.replace(&id, bytes)? {
        ReplaceOutcome::InPlace => {}
        ReplaceOutcome::Relocated { orphaned } => shared.add_wasted(orphaned),
    }
    shared.bump_version();
    Ok(())
}

fn exec_select<V, C: Codec<V>>(
    core: &mut Core<V, C>,
    keys: &[TangleKey],
    make_default: &DefaultFn<V>,
) -> Result<Vec<(TangleKey, V)>> {
    let (mut tree, codec, _) = core.split()?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let value = match tree.find(key.as_bytes())? {
            SearchOutcome::Found(id) => read_value(&mut tree, codec, key, &id)?,
            SearchOutcome::Missing { .. } => make_default(),
        };
        out.push((key.clone(), value));
    }
    Ok(out)
}

fn exec_keys<V, C: Codec<V>>(core: &mut Core<V, C>) -> Result<Vec<TangleKey>> {
    let (mut tree, _, _) = core.split()?;
    let entries = tree.entries_in_order()?;
    let mut out = Vec::with_capacity(entries.len());
    for (id, entry) in entries {
        ensure_valid(&id, &entry)?;
        out.push(entry_key(&mut tree, &entry)?);
    }
    Ok(out)
}

fn exec_values<V, C: Codec<V>>(core: &mut Core<V, C>) -> Result<Vec<V>> {
    let (mut tree, codec, _) = core.split()?;
    let entries = tree.entries_in_order()?;
    let mut out = Vec::with_capacity(entries.len());
    for (id, entry) in entries {
        ensure_valid(&id, &entry)?;
        let key = entry_key(&mut tree, &entry)?;
        let range = tree.value_range(&entry)?;
        out.push(decode(codec, &key, range.as_slice())?);
    }
    Ok(out)
}

fn exec_for_each<V, C: Codec<V>>(core: &mut Core<V, C>, mut visit: VisitFn<V>) -> Result<()> {
    let (mut tree, codec, _) = core.split()?;
    for (id, entry) in tree.entries_in_order()? {
        ensure_valid(&id, &entry)?;
        let key = entry_key(&mut tree, &entry)?;
        let value = {
            let range = tree.value_range(&entry)?;
            decode(codec, &key, range.as_slice())?
        };
        visit(&key, &value);
    }
    Ok(())
}

fn exec_batch<V, C: Codec<V>>(
    shared: &Shared<V, C>,
    core: &mut Core<V, C>,
    entries: &[(TangleKey, V)],
) -> Result<usize> {
    ensure!(
        entries.len() <= MAX_BATCH_LEN,
        "batch of {} items exceeds the {} item bound",
        entries.len(),
        MAX_BATCH_LEN
    );
    let mut written = 0;
    for (key, value) in entries {
        if apply_set(shared, core, key, value, true)? {
            written += 1;
        }
    }
    Ok(written)
}

fn exec_clear<V, C: Codec<V>>(shared: &Shared<V, C>, core: &mut Core<V, C>) -> Result<()> {
    let nodes = {
        let (mut tree, _, _) = core.split()?;
        tree.clear()?;
        tree.node_count()
    };
    shared.reset_counters(nodes);
    Ok(())
}
