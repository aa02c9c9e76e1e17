//! Real-time safe hand-off of plugin-originated parameter changes.
//!
//! The plugin calls [`ParameterListener::on_parameter_changed`] from whatever
//! thread it likes. The call never takes a lock and never allocates: changes
//! land in a [`ChangeBuffer`] that the UI thread drains at idle time.
//!
//! The buffer holds one slot per parameter known when it was built. A newer
//! change to the same id overwrites the slot, so the latest value always
//! wins and memory stays bounded by the parameter count. Writers racing on
//! one slot claim it in turn; a claim lasts two atomic stores. Changes for ids the
//! plugin never declared go to a fixed-size overflow ring; when that ring is
//! full the oldest record is dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF64;
use crossbeam_queue::ArrayQueue;

use crate::params::ParamId;

/// A change reported by the plugin, waiting to be flushed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingChange {
    pub id: ParamId,
    pub value: f64,
    /// Logical order in which the listener saw the change.
    pub sequence: u64,
}

/// What happened to a change pushed into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Merged with another change for the same id: an undrained one was
    /// replaced, or a newer one had already landed and this one was dropped.
    Coalesced,
    /// The overflow ring was full; its oldest record was dropped.
    Overflowed,
}

// Slot sequence while a writer or the drain holds the slot.
const CLAIMED: u64 = u64::MAX;

struct ChangeSlot {
    id: ParamId,
    value: AtomicF64,
    // 0 means nothing pending.
    sequence: AtomicU64,
    // Sequence of the value in `value`, kept across drains.
    written: AtomicU64,
}

impl ChangeSlot {
    /// Takes the slot and returns the pending sequence it held.
    #[inline]
    fn claim(&self) -> u64 {
        loop {
            let current = self.sequence.load(Ordering::Relaxed);
            if current != CLAIMED
                && self
                    .sequence
                    .compare_exchange_weak(current, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return current;
            }
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn release(&self, pending: u64) {
        self.sequence.store(pending, Ordering::Release);
    }
}

/// Bounded, allocation-free store of pending parameter changes.
pub struct ChangeBuffer {
    slots: Box<[ChangeSlot]>,
    overflow: ArrayQueue<PendingChange>,
    next_sequence: AtomicU64,
    dropped: AtomicU64,
}

impl ChangeBuffer {
    pub fn new(ids: impl IntoIterator<Item = ParamId>, overflow_capacity: usize) -> Self {
        let mut ids: Vec<ParamId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let slots = ids
            .into_iter()
            .map(|id| ChangeSlot {
                id,
                value: AtomicF64::new(0.0),
                sequence: AtomicU64::new(0),
                written: AtomicU64::new(0),
            })
            .collect();
        Self {
            slots,
            overflow: ArrayQueue::new(overflow_capacity.max(1)),
            next_sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Records a change. Safe to call from any number of threads at once,
    /// including several for the same id: the slot keeps whichever change
    /// took the later sequence.
    #[inline]
    pub fn push(&self, id: ParamId, value: f64) -> PushOutcome {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(slot) = self.slot(id) {
            let pending = slot.claim();
            if slot.written.load(Ordering::Relaxed) > sequence {
                slot.release(pending);
                return PushOutcome::Coalesced;
            }
            slot.value.store(value, Ordering::Relaxed);
            slot.written.store(sequence, Ordering::Relaxed);
            slot.release(sequence);
            return if pending == 0 {
                PushOutcome::Queued
            } else {
                PushOutcome::Coalesced
            };
        }

        let change = PendingChange {
            id,
            value,
            sequence,
        };
        match self.overflow.force_push(change) {
            None => PushOutcome::Queued,
            Some(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Overflowed
            }
        }
    }

    /// Moves every pending change into `out` and returns how many were moved.
    pub fn drain_into(&self, out: &mut Vec<PendingChange>) -> usize {
        let before = out.len();
        for slot in self.slots.iter() {
            if slot.sequence.load(Ordering::Relaxed) == 0 {
                continue;
            }
            let sequence = slot.claim();
            let value = slot.value.load(Ordering::Relaxed);
            slot.release(0);
            if sequence != 0 {
                out.push(PendingChange {
                    id: slot.id,
                    value,
                    sequence,
                });
            }
        }
        while let Some(change) = self.overflow.pop() {
            out.push(change);
        }
        out.len() - before
    }

    /// Throws away everything pending.
    pub fn clear(&self) -> usize {
        let mut discarded = Vec::with_capacity(self.capacity());
        self.drain_into(&mut discarded)
    }

    /// Number of changes currently waiting.
    pub fn depth(&self) -> usize {
        let pending_slots = self
            .slots
            .iter()
            .filter(|slot| slot.sequence.load(Ordering::Relaxed) != 0)
            .count();
        pending_slots + self.overflow.len()
    }

    /// Upper bound on [`ChangeBuffer::depth`].
    pub fn capacity(&self) -> usize {
        self.slots.len() + self.overflow.capacity()
    }

    pub fn is_tracked(&self, id: ParamId) -> bool {
        self.slot(id).is_some()
    }

    /// Overflow drops since the last call to [`ChangeBuffer::take_dropped`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    #[inline]
    fn slot(&self, id: ParamId) -> Option<&ChangeSlot> {
        self.slots
            .binary_search_by_key(&id, |slot| slot.id)
            .ok()
            .map(|index| &self.slots[index])
    }
}

impl std::fmt::Debug for ChangeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBuffer")
            .field("slots", &self.slots.len())
            .field("overflow_capacity", &self.overflow.capacity())
            .field("depth", &self.depth())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Callback object registered with a plugin instance.
///
/// Once deactivated, further callbacks are ignored. Deactivation happens when
/// the listener is removed from the plugin, so a callback racing with
/// teardown cannot reach state that is about to be released.
#[derive(Debug)]
pub struct ParameterListener {
    buffer: Arc<ChangeBuffer>,
    active: AtomicBool,
}

impl ParameterListener {
    pub fn new(buffer: Arc<ChangeBuffer>) -> Self {
        Self {
            buffer,
            active: AtomicBool::new(true),
        }
    }

    /// Entry point for the plugin. Never blocks, never allocates.
    #[inline]
    pub fn on_parameter_changed(&self, id: ParamId, value: f64) -> Option<PushOutcome> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        Some(self.buffer.push(id, value))
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> &Arc<ChangeBuffer> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ids(range: std::ops::Range<u32>) -> Vec<ParamId> {
        range.map(ParamId).collect()
    }

    #[test]
    fn same_id_changes_coalesce_to_latest() {
        let buffer = ChangeBuffer::new(ids(0..4), 8);
        assert_eq!(buffer.push(ParamId(1), 0.1), PushOutcome::Queued);
        assert_eq!(buffer.push(ParamId(1), 0.2), PushOutcome::Coalesced);
        assert_eq!(buffer.push(ParamId(1), 0.3), PushOutcome::Coalesced);
        assert_eq!(buffer.depth(), 1);

        let mut out = Vec::new();
        assert_eq!(buffer.drain_into(&mut out), 1);
        assert_eq!(out[0].id, ParamId(1));
        assert_eq!(out[0].value, 0.3);
        assert_eq!(out[0].sequence, 3);
        assert_eq!(buffer.depth(), 0);
    }

    #[test]
    fn flood_of_known_ids_stays_bounded() {
        let buffer = ChangeBuffer::new(ids(0..8), 4);
        for round in 0..10_000u32 {
            buffer.push(ParamId(round % 8), round as f64);
        }
        assert!(buffer.depth() <= 8);
        assert_eq!(buffer.dropped(), 0);

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        out.sort_by_key(|change| change.id);
        let last: Vec<f64> = out.iter().map(|change| change.value).collect();
        assert_eq!(last, (9_992..10_000).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn unlisted_ids_drop_oldest_when_full() {
        let buffer = ChangeBuffer::new(ids(0..1), 2);
        assert_eq!(buffer.push(ParamId(100), 1.0), PushOutcome::Queued);
        assert_eq!(buffer.push(ParamId(101), 2.0), PushOutcome::Queued);
        assert_eq!(buffer.push(ParamId(102), 3.0), PushOutcome::Overflowed);
        assert_eq!(buffer.depth(), 2);
        assert_eq!(buffer.take_dropped(), 1);
        assert_eq!(buffer.dropped(), 0);

        let mut out = Vec::new();
        buffer.drain_into(&mut out);
        let kept: Vec<u32> = out.iter().map(|change| change.id.0).collect();
        assert_eq!(kept, vec![101, 102]);
    }

    #[test]
    fn deactivated_listener_ignores_callbacks() {
        let buffer = Arc::new(ChangeBuffer::new(ids(0..2), 2));
        let listener = ParameterListener::new(Arc::clone(&buffer));
        assert_eq!(
            listener.on_parameter_changed(ParamId(0), 1.0),
            Some(PushOutcome::Queued)
        );
        listener.deactivate();
        assert_eq!(listener.on_parameter_changed(ParamId(1), 1.0), None);
        assert_eq!(buffer.depth(), 1);
    }

    #[test]
    fn concurrent_producers_never_lose_the_final_value() {
        let buffer = Arc::new(ChangeBuffer::new(ids(0..4), 16));
        let producers: Vec<_> = (0..4u32)
            .map(|id| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for step in 0..5_000 {
                        buffer.push(ParamId(id), step as f64);
                    }
                })
            })
            .collect();

        let mut seen = std::collections::BTreeMap::new();
        let mut out = Vec::new();
        while producers.iter().any(|handle| !handle.is_finished()) {
            out.clear();
            buffer.drain_into(&mut out);
            for change in &out {
                seen.insert(change.id, change.value);
            }
        }
        for handle in producers {
            handle.join().expect("producer");
        }
        out.clear();
        buffer.drain_into(&mut out);
        for change in &out {
            seen.insert(change.id, change.value);
        }

        assert_eq!(seen.len(), 4);
        assert!(seen.values().all(|value| *value == 4_999.0));
    }

    #[test]
    fn racing_writers_on_one_id_keep_the_latest_sequence() {
        let buffer = Arc::new(ChangeBuffer::new(ids(0..1), 4));
        let writers: Vec<_> = (0..4u32)
            .map(|writer| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for step in 0..5_000u32 {
                        buffer.push(ParamId(0), f64::from(writer * 10_000 + step));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        while writers.iter().any(|handle| !handle.is_finished()) {
            buffer.drain_into(&mut drained);
        }
        for handle in writers {
            handle.join().expect("writer");
        }
        buffer.drain_into(&mut drained);

        assert!(drained
            .windows(2)
            .all(|pair| pair[0].sequence < pair[1].sequence));
        let last = drained.last().expect("at least one change");
        assert_eq!(last.value % 10_000.0, 4_999.0);
        assert_eq!(buffer.depth(), 0);
    }
}
