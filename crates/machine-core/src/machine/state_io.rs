//! Whole-machine save and restore.

use log::{debug, info, warn};

use super::Machine;
use crate::line::LineLatch;
use crate::memory::RegionKind;
use crate::scheduler::TimerId;
use crate::state::{
    validate_layout, LayoutCollector, LoadApplier, SaveCollector, Scoped, Snapshot, SnapshotEntry,
    StateItem, StateKey, StateVisitor,
};
use crate::{Clock, EmuTime, SnapshotVersion, StateError, SuspendReason};

const LOG_TARGET: &str = "machine_core::state";

const NO_TIMER: u64 = u64::MAX;

const fn timer_to_raw(timer: Option<TimerId>) -> u64 {
    match timer {
        Some(id) => ((id.index as u64) << 32) | id.generation as u64,
        None => NO_TIMER,
    }
}

fn timer_from_raw(raw: u64) -> Option<TimerId> {
    if raw == NO_TIMER {
        return None;
    }
    Some(TimerId {
        index: u32::try_from(raw >> 32).ok()?,
        generation: u32::try_from(raw & 0xFFFF_FFFF).ok()?,
    })
}

fn visit_time(visitor: &mut dyn StateVisitor, name: &str, time: &mut EmuTime) {
    let mut raw = time.as_attos();
    visitor.item(name, StateItem::U128(&mut raw));
    *time = EmuTime::from_attos(raw);
}

impl Machine {
    /// Every registered state key in save order.
    ///
    /// The layout depends only on the machine's configuration, never on the
    /// values being saved.
    pub fn state_layout(&mut self) -> Vec<StateKey> {
        let mut layout = LayoutCollector::default();
        self.visit_all(&mut layout);
        layout.keys
    }

    /// Captures the whole machine.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Busy`] while `run_until` is on the stack.
    pub fn save_state(&mut self) -> Result<Snapshot, StateError> {
        if self.dispatching {
            return Err(StateError::Busy);
        }
        let mut save = SaveCollector::default();
        self.visit_all(&mut save);
        info!(
            target: LOG_TARGET,
            "saved {} entries at {}",
            save.entries.len(),
            self.now()
        );
        Ok(Snapshot {
            version: SnapshotVersion::V1,
            entries: save.entries,
        })
    }

    /// Restores a snapshot taken from an identically configured machine.
    ///
    /// The layout is validated before anything is written, so a mismatched
    /// snapshot leaves the machine untouched. A value rejected while applying
    /// rolls the machine back to its state before the call.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Busy`] while running, or the first layout or
    /// value problem found.
    pub fn load_state(&mut self, snapshot: &Snapshot) -> Result<(), StateError> {
        if self.dispatching {
            return Err(StateError::Busy);
        }
        let layout = self.state_layout();
        validate_layout(&layout, &snapshot.entries).inspect_err(|err| {
            warn!(target: LOG_TARGET, "snapshot rejected: {err}");
        })?;

        let mut current = SaveCollector::default();
        self.visit_all(&mut current);
        if let Err(err) = self.apply_entries(&snapshot.entries) {
            warn!(target: LOG_TARGET, "snapshot rejected: {err}; state rolled back");
            if let Err(again) = self.apply_entries(&current.entries) {
                warn!(target: LOG_TARGET, "rollback failed: {again}");
            }
            return Err(err);
        }
        self.pending_inputs.clear();
        self.exec = None;
        debug!(target: LOG_TARGET, "restored {} entries", snapshot.entries.len());
        Ok(())
    }

    fn apply_entries(&mut self, entries: &[SnapshotEntry]) -> Result<(), StateError> {
        let mut load = LoadApplier::new(entries);
        let timers = self.visit_all(&mut load);
        if let Some(err) = load.error {
            return Err(err);
        }
        self.scheduler.decode(&timers).ok_or_else(|| StateError::Corrupt {
            key: "scheduler/timers".to_owned(),
        })
    }

    /// Visits every saved field; returns the (possibly replaced) scheduler
    /// blob.
    fn visit_all(&mut self, visitor: &mut dyn StateVisitor) -> Vec<u8> {
        let mut timers = self.scheduler.encode();
        visitor.item("scheduler/timers", StateItem::Blob(&mut timers));

        for index in self.devices.live_indices().collect::<Vec<_>>() {
            let Some(meta) = self.meta.get_mut(index as usize) else {
                continue;
            };
            let prefix = format!("sched/{}", meta.tag);
            let mut scoped = Scoped::new(&prefix, visitor);
            let mut hz = meta.clock.hz();
            scoped.item("clock", StateItem::U32(&mut hz));
            meta.clock = Clock::from_hz(hz);
            scoped.item("cycles", StateItem::U64(&mut meta.cycles));
            visit_time(&mut scoped, "epoch", &mut meta.epoch);
            let mut suspend = meta.suspend.bits();
            scoped.item("suspend", StateItem::U32(&mut suspend));
            meta.suspend = SuspendReason::from_bits(suspend);
            let mut waiting = meta.trigger.is_some();
            let mut trigger = meta.trigger.unwrap_or(0);
            scoped.item("waiting", StateItem::Bool(&mut waiting));
            scoped.item("trigger", StateItem::U32(&mut trigger));
            meta.trigger = waiting.then_some(trigger);
            let mut tick = timer_to_raw(meta.tick_timer);
            scoped.item("tick_timer", StateItem::U64(&mut tick));
            meta.tick_timer = timer_from_raw(tick);

            let tag = meta.tag.clone();
            if let Some(device) = self.devices.get_mut(index) {
                device.visit_state(&mut Scoped::new(&tag, visitor));
            }
        }

        for line in &mut self.lines {
            let prefix = format!("line/{}", line.name);
            let mut scoped = Scoped::new(&prefix, visitor);
            scoped.item("level", StateItem::Bool(&mut line.level));
            let mut latch = line.latch.as_u8();
            scoped.item("latch", StateItem::U8(&mut latch));
            match LineLatch::from_u8(latch) {
                Some(restored) => line.latch = restored,
                None => scoped.reject("latch"),
            }
            scoped.item("edge", StateItem::Bool(&mut line.edge_pending));
            scoped.item("transitions", StateItem::U64(&mut line.transitions));
            let mut release = timer_to_raw(line.release_timer);
            scoped.item("release_timer", StateItem::U64(&mut release));
            line.release_timer = timer_from_raw(release);
        }

        for bank in &mut self.banks {
            let key = format!("bank/{}/current", bank.name());
            let mut current = bank.current() as u64;
            visitor.item(&key, StateItem::U64(&mut current));
            let restored = usize::try_from(current)
                .ok()
                .is_some_and(|entry| bank.restore_selection(entry));
            if !restored {
                visitor.reject(&key);
            }
        }

        for space in &mut self.spaces {
            let key = format!("space/{}/last", space.name());
            let mut last = space.last_value();
            visitor.item(&key, StateItem::U64(&mut last));
            space.set_last_value(last);
        }

        for (_, region) in self.regions.iter_mut() {
            if region.kind() == RegionKind::Ram {
                let key = format!("region/{}", region.name());
                visitor.item(&key, StateItem::Bytes(region.data_mut()));
            }
        }

        timers
    }
}
