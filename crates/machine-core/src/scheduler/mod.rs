//! Time-ordered timer queue.
//!
//! Timers live in a slab indexed by [`TimerId`]; arming pushes an entry onto a
//! binary heap keyed by `(expire, seq)`. Entries are never removed from the
//! heap eagerly: re-arming, disabling or removing a timer just makes its old
//! entry stale, and stale entries are discarded when they reach the top.
//! The arming sequence number breaks ties, so timers due at the same instant
//! fire in the order they were armed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::state::codec::{ByteReader, ByteWriter};
use crate::EmuTime;

/// Timer handles, targets and records.
pub mod timer;
pub(crate) use timer::TimerRecord;
pub use timer::{TimerCallbackId, TimerId, TimerTarget};

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SchedulerConfig {
    /// Longest slice executors run before the scheduler regains control.
    pub quantum: EmuTime,
    /// How long a pulsed line stays asserted.
    pub pulse_width: EmuTime,
}

/// Default slice length.
pub const DEFAULT_QUANTUM: EmuTime = EmuTime::from_micros(100);

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            pulse_width: DEFAULT_QUANTUM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    expire: EmuTime,
    seq: u64,
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    now: EmuTime,
    timers: Vec<TimerRecord>,
    free: Vec<u32>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_seq: u64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn now(&self) -> EmuTime {
        self.now
    }

    pub(crate) fn set_now(&mut self, now: EmuTime) {
        debug_assert!(now >= self.now, "scheduler time moved backwards");
        self.now = now;
    }

    pub(crate) fn alloc(&mut self, target: TimerTarget, temporary: bool) -> TimerId {
        if let Some(index) = self.free.pop() {
            if let Some(record) = self.timers.get_mut(index as usize) {
                let generation = record.generation.wrapping_add(1);
                *record = TimerRecord::new(target, generation, temporary);
                return TimerId { index, generation };
            }
        }
        let index = u32::try_from(self.timers.len()).unwrap_or(u32::MAX);
        self.timers.push(TimerRecord::new(target, 0, temporary));
        TimerId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn record(&self, id: TimerId) -> Option<&TimerRecord> {
        self.timers
            .get(id.index as usize)
            .filter(|record| record.live && record.generation == id.generation)
    }

    pub(crate) fn record_mut(&mut self, id: TimerId) -> Option<&mut TimerRecord> {
        self.timers
            .get_mut(id.index as usize)
            .filter(|record| record.live && record.generation == id.generation)
    }

    fn push(&mut self, id: TimerId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(record) = self.record_mut(id) {
            record.seq = seq;
            if record.enabled && !record.expire.is_never() {
                let entry = QueueEntry {
                    expire: record.expire,
                    seq,
                    index: id.index,
                    generation: id.generation,
                };
                self.queue.push(Reverse(entry));
            }
        }
    }

    /// Arms `id` to expire at `expire`. Returns `false` for stale handles.
    pub(crate) fn arm(
        &mut self,
        id: TimerId,
        start: EmuTime,
        expire: EmuTime,
        period: EmuTime,
    ) -> bool {
        let Some(record) = self.record_mut(id) else {
            return false;
        };
        record.start = start;
        record.expire = expire;
        record.period = period;
        record.enabled = true;
        self.push(id);
        true
    }

    pub(crate) fn disarm(&mut self, id: TimerId) -> bool {
        let Some(record) = self.record_mut(id) else {
            return false;
        };
        record.enabled = false;
        record.expire = EmuTime::NEVER;
        true
    }

    /// Returns the previous enable state.
    pub(crate) fn set_enabled(&mut self, id: TimerId, enabled: bool) -> Option<bool> {
        let record = self.record_mut(id)?;
        let previous = record.enabled;
        record.enabled = enabled;
        if enabled && !previous {
            self.push(id);
        }
        Some(previous)
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> bool {
        let Some(record) = self.record_mut(id) else {
            return false;
        };
        record.live = false;
        record.enabled = false;
        self.free.push(id.index);
        true
    }

    fn is_current(&self, entry: &QueueEntry) -> bool {
        self.timers.get(entry.index as usize).is_some_and(|record| {
            record.live
                && record.enabled
                && record.generation == entry.generation
                && record.seq == entry.seq
                && record.expire == entry.expire
        })
    }

    /// Earliest pending expiry, or [`EmuTime::NEVER`].
    pub(crate) fn next_expire(&mut self) -> EmuTime {
        while let Some(Reverse(entry)) = self.queue.peek() {
            if self.is_current(entry) {
                return entry.expire;
            }
            self.queue.pop();
        }
        EmuTime::NEVER
    }

    /// Pops the next timer due at or before `limit`.
    pub(crate) fn pop_due(&mut self, limit: EmuTime) -> Option<TimerId> {
        if self.next_expire() > limit {
            return None;
        }
        let Reverse(entry) = self.queue.pop()?;
        Some(TimerId {
            index: entry.index,
            generation: entry.generation,
        })
    }

    /// Frees every disarmed timer whose target matches. Armed ones are left
    /// to be defused when they fire.
    pub(crate) fn remove_idle(&mut self, matches: impl Fn(TimerTarget) -> bool) -> usize {
        let idle: Vec<TimerId> = (0_u32..)
            .zip(self.timers.iter())
            .filter(|(_, record)| record.live && !record.enabled && matches(record.target))
            .map(|(index, record)| TimerId {
                index,
                generation: record.generation,
            })
            .collect();
        for id in &idle {
            self.remove(*id);
        }
        idle.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.timers.iter().filter(|record| record.live).count()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = ByteWriter::new();
        out.u128(self.now.as_attos());
        out.u64(self.next_seq);
        out.u32(u32::try_from(self.timers.len()).unwrap_or(u32::MAX));
        for record in &self.timers {
            record.encode(&mut out);
        }
        out.finish()
    }

    /// Replaces the whole timer state. Leaves `self` untouched on malformed
    /// input.
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> Option<()> {
        let mut input = ByteReader::new(bytes);
        let now = EmuTime::from_attos(input.u128()?);
        let next_seq = input.u64()?;
        let count = input.u32()?;
        let mut timers = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            timers.push(TimerRecord::decode(&mut input)?);
        }
        if !input.is_empty() {
            return None;
        }

        let mut queue = BinaryHeap::with_capacity(timers.len());
        let mut free = Vec::new();
        for (index, record) in (0_u32..).zip(timers.iter()) {
            if !record.live {
                free.push(index);
            } else if record.enabled && !record.expire.is_never() {
                queue.push(Reverse(QueueEntry {
                    expire: record.expire,
                    seq: record.seq,
                    index,
                    generation: record.generation,
                }));
            }
        }
        free.reverse();

        self.now = now;
        self.next_seq = next_seq;
        self.timers = timers;
        self.free = free;
        self.queue = queue;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Scheduler, TimerCallbackId, TimerTarget};
    use crate::EmuTime;

    fn callback(n: u32) -> TimerTarget {
        TimerTarget::Callback(TimerCallbackId(n))
    }

    #[test]
    fn equal_expiry_fires_in_arming_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.alloc(callback(0), false);
        let b = scheduler.alloc(callback(1), false);
        let c = scheduler.alloc(callback(2), false);
        let t = EmuTime::from_micros(5);
        scheduler.arm(c, EmuTime::ZERO, t, EmuTime::ZERO);
        scheduler.arm(a, EmuTime::ZERO, t, EmuTime::ZERO);
        scheduler.arm(b, EmuTime::ZERO, EmuTime::from_micros(1), EmuTime::ZERO);

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop_due(t)).collect();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn rearming_discards_the_earlier_entry() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.alloc(callback(0), false);
        scheduler.arm(id, EmuTime::ZERO, EmuTime::from_micros(1), EmuTime::ZERO);
        scheduler.arm(id, EmuTime::ZERO, EmuTime::from_micros(9), EmuTime::ZERO);

        assert_eq!(scheduler.next_expire(), EmuTime::from_micros(9));
        assert_eq!(scheduler.pop_due(EmuTime::from_micros(5)), None);
        assert_eq!(scheduler.pop_due(EmuTime::from_micros(9)), Some(id));
        assert_eq!(scheduler.pop_due(EmuTime::NEVER), None);
    }

    #[test]
    fn disabled_timers_keep_their_expiry_until_reenabled() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.alloc(callback(0), false);
        scheduler.arm(id, EmuTime::ZERO, EmuTime::from_micros(3), EmuTime::ZERO);
        assert_eq!(scheduler.set_enabled(id, false), Some(true));
        assert_eq!(scheduler.next_expire(), EmuTime::NEVER);
        assert_eq!(scheduler.set_enabled(id, true), Some(false));
        assert_eq!(scheduler.next_expire(), EmuTime::from_micros(3));
    }

    #[test]
    fn removed_handles_go_stale_when_the_slot_is_reused() {
        let mut scheduler = Scheduler::new();
        let old = scheduler.alloc(callback(0), true);
        scheduler.arm(old, EmuTime::ZERO, EmuTime::from_micros(1), EmuTime::ZERO);
        assert!(scheduler.remove(old));
        assert!(!scheduler.remove(old));

        let new = scheduler.alloc(callback(1), false);
        assert_eq!(new.index, old.index);
        assert_ne!(new.generation, old.generation);
        assert!(scheduler.record(old).is_none());
        assert_eq!(scheduler.next_expire(), EmuTime::NEVER);
        assert_eq!(scheduler.live_count(), 1);
    }

    #[test]
    fn encoded_state_restores_queue_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.alloc(callback(0), false);
        let b = scheduler.alloc(callback(1), false);
        scheduler.arm(b, EmuTime::ZERO, EmuTime::from_micros(2), EmuTime::ZERO);
        scheduler.arm(a, EmuTime::ZERO, EmuTime::from_micros(2), EmuTime::ZERO);
        let bytes = scheduler.encode();

        let mut restored = Scheduler::new();
        assert_eq!(restored.decode(&bytes), Some(()));
        let order: Vec<_> = std::iter::from_fn(|| restored.pop_due(EmuTime::NEVER)).collect();
        assert_eq!(order, vec![b, a]);
        assert_eq!(restored.decode(&bytes[..bytes.len() - 1]), None);
    }

    proptest! {
        #[test]
        fn pops_are_time_ordered_and_fifo_on_ties(delays in proptest::collection::vec(0_u64..8, 1..64)) {
            let mut scheduler = Scheduler::new();
            let ids: Vec<_> = delays
                .iter()
                .map(|delay| {
                    let id = scheduler.alloc(callback(0), false);
                    scheduler.arm(id, EmuTime::ZERO, EmuTime::from_nanos(*delay), EmuTime::ZERO);
                    (*delay, id)
                })
                .collect();

            let mut expected = ids.clone();
            expected.sort_by_key(|(delay, _)| *delay);
            let fired: Vec<_> = std::iter::from_fn(|| scheduler.pop_due(EmuTime::NEVER)).collect();
            prop_assert_eq!(fired, expected.into_iter().map(|(_, id)| id).collect::<Vec<_>>());
        }
    }
}
