//! The scheduling loop and executor control.

use log::{debug, error, trace};

use super::{ExecContext, Machine, MachinePhase};
use crate::{Clock, DeviceId, EmuTime, RunError, RuntimeFault, SuspendReason, TraceEvent};

const LOG_TARGET: &str = "machine_core::scheduler";

/// Summary of one [`Machine::run_until`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunOutcome {
    /// Machine time on return.
    pub time: EmuTime,
    /// Scheduling rounds executed.
    pub slices: u64,
    /// Timers fired during the call.
    pub timers_fired: u64,
}

impl Machine {
    /// Advances emulation to `target`, firing every timer due at or before it.
    ///
    /// Executors run in slices bounded by the next timer expiry and the
    /// quantum; a slice ends early when a timer is armed inside it.
    ///
    /// # Errors
    ///
    /// [`RunError::NotRunning`] before `start` or after `stop`;
    /// [`RunError::Reentrant`] when called from inside a callback.
    pub fn run_until(&mut self, target: EmuTime) -> Result<RunOutcome, RunError> {
        if self.dispatching {
            error!(target: LOG_TARGET, "run_until re-entered from a callback");
            self.record_fault(RuntimeFault::Reentrancy);
            return Err(RunError::Reentrant);
        }
        if self.phase != MachinePhase::Running {
            return Err(RunError::NotRunning);
        }

        self.dispatching = true;
        let fired_before = self.diagnostics.timers_fired;
        let mut slices = 0_u64;
        loop {
            let now = self.scheduler.now();
            self.fire_due_timers(now);
            if now >= target || self.phase != MachinePhase::Running {
                break;
            }

            let mut slice_end = target.min(self.scheduler.next_expire());
            if !self.exec_order.is_empty() {
                slice_end = slice_end.min(now.saturating_add(self.config.quantum));
            }
            self.slice_end = slice_end;
            self.execute_slice(now);

            let end = self.slice_end.max(now);
            self.scheduler.set_now(end);
            slices += 1;
        }
        self.dispatching = false;

        let outcome = RunOutcome {
            time: self.scheduler.now(),
            slices,
            timers_fired: self.diagnostics.timers_fired - fired_before,
        };
        trace!(target: LOG_TARGET, "ran to {} in {slices} slices", outcome.time);
        Ok(outcome)
    }

    /// Advances emulation by `duration`.
    ///
    /// # Errors
    ///
    /// Same as [`Machine::run_until`].
    pub fn run_for(&mut self, duration: EmuTime) -> Result<RunOutcome, RunError> {
        let target = self.scheduler.now().saturating_add(duration);
        self.run_until(target)
    }

    fn execute_slice(&mut self, now: EmuTime) {
        let order = self.exec_order.clone();
        for id in order {
            let slice_end = self.slice_end;
            let Some(meta) = self.meta.get_mut(id.0 as usize) else {
                continue;
            };
            let target_cycles = meta.clock.time_to_cycles(slice_end.saturating_sub(meta.epoch));
            if target_cycles <= meta.cycles {
                continue;
            }
            let budget = target_cycles - meta.cycles;
            if !meta.suspend.is_empty() {
                meta.cycles = target_cycles;
                continue;
            }
            let start = meta.local_time(0);

            self.exec = Some(ExecContext {
                device: id,
                budget,
                consumed: 0,
                rebased: 0,
                aborted: false,
            });
            let ran = self
                .with_device(id, |device, machine| {
                    device
                        .as_executor()
                        .map_or(0, |executor| executor.execute(machine, budget))
                })
                .unwrap_or(0)
                .min(budget);
            let (aborted, rebased) = self
                .exec
                .take()
                .map_or((false, 0), |exec| (exec.aborted, exec.rebased));

            let Some(meta) = self.meta.get_mut(id.0 as usize) else {
                continue;
            };
            meta.cycles += ran.saturating_sub(rebased);
            if aborted {
                let local = meta.local_time(0);
                if local < self.slice_end {
                    self.slice_end = local.max(now);
                }
            }
            self.emit(TraceEvent::SliceExecuted {
                device: id,
                start,
                cycles: ran,
            });
        }
    }

    /// Charges cycles to the executing device so [`Machine::now`] advances
    /// mid-slice. Executors call this as they retire instructions.
    pub fn consume_cycles(&mut self, cycles: u64) {
        if let Some(exec) = self.exec.as_mut() {
            exec.consumed = exec.consumed.saturating_add(cycles);
        }
    }

    /// Returns `true` once the running slice was cut short; executors must
    /// return as soon as they see it.
    #[must_use]
    pub fn timeslice_aborted(&self) -> bool {
        self.exec.is_some_and(|exec| exec.aborted)
    }

    /// Cycles left in the running slice.
    #[must_use]
    pub fn cycles_remaining(&self) -> u64 {
        self.exec
            .map_or(0, |exec| exec.budget.saturating_sub(exec.consumed))
    }

    /// Device whose slice is running, if any.
    #[must_use]
    pub fn executing_device(&self) -> Option<DeviceId> {
        self.exec.map(|exec| exec.device)
    }

    /// Ends the running slice at the executor's current local time.
    pub fn abort_timeslice(&mut self) {
        if let Some(exec) = self.exec.as_mut() {
            exec.aborted = true;
        }
    }

    /// Adds suspend reasons. A suspended executor does not run; its local
    /// time keeps pace with the machine.
    pub fn suspend(&mut self, id: DeviceId, reason: SuspendReason) {
        let Some(meta) = self.meta.get_mut(id.0 as usize) else {
            return;
        };
        meta.suspend = meta.suspend.union(reason);
        debug!(target: LOG_TARGET, "`{}` suspended ({:#x})", meta.tag, meta.suspend.bits());
        if self.exec.is_some_and(|exec| exec.device == id) {
            self.abort_timeslice();
        }
    }

    /// Removes suspend reasons. The executor runs again once none remain.
    pub fn resume(&mut self, id: DeviceId, reason: SuspendReason) {
        let Some(meta) = self.meta.get_mut(id.0 as usize) else {
            return;
        };
        meta.suspend = meta.suspend.difference(reason);
        if reason.contains(SuspendReason::TRIGGER) {
            meta.trigger = None;
        }
        debug!(target: LOG_TARGET, "`{}` resumed ({:#x})", meta.tag, meta.suspend.bits());
    }

    /// Current suspend reasons.
    #[must_use]
    pub fn suspend_reasons(&self, id: DeviceId) -> SuspendReason {
        self.meta
            .get(id.0 as usize)
            .map_or(SuspendReason::NONE, |meta| meta.suspend)
    }

    /// Suspends an executor until [`Machine::trigger`] is called with
    /// `trigger`.
    pub fn spin_until_trigger(&mut self, id: DeviceId, trigger: u32) {
        if let Some(meta) = self.meta.get_mut(id.0 as usize) {
            meta.trigger = Some(trigger);
        }
        self.suspend(id, SuspendReason::TRIGGER);
    }

    /// Wakes every executor waiting on `trigger` and ends the running slice
    /// so they catch up.
    pub fn trigger(&mut self, trigger: u32) {
        let waiting: Vec<DeviceId> = (0_u32..)
            .zip(self.meta.iter())
            .filter(|(_, meta)| meta.trigger == Some(trigger))
            .map(|(index, _)| DeviceId(index))
            .collect();
        for id in waiting {
            self.resume(id, SuspendReason::TRIGGER);
        }
        self.abort_timeslice();
    }

    /// Changes a device's clock. Its local time is preserved; later cycles
    /// are counted at the new rate, and its tick timer is re-armed with the
    /// new tick period.
    pub fn set_clock(&mut self, id: DeviceId, hz: u32) {
        let now = self.now();
        let consumed = self
            .exec
            .filter(|exec| exec.device == id)
            .map_or(0, |exec| exec.consumed);
        let Some(meta) = self.meta.get_mut(id.0 as usize) else {
            return;
        };
        meta.epoch = meta.local_time(consumed).max(now);
        meta.cycles = 0;
        meta.clock = Clock::from_hz(hz);
        let clock = meta.clock;
        let tick = meta.tick_timer.zip(meta.tick_interval);
        debug!(target: LOG_TARGET, "`{}` clock set to {hz} Hz", meta.tag);
        if let Some(exec) = self.exec.as_mut().filter(|exec| exec.device == id) {
            exec.rebased = exec.rebased.saturating_add(exec.consumed);
            exec.consumed = 0;
            exec.aborted = true;
        }

        if let Some((timer, interval)) = tick {
            if clock.is_stopped() {
                self.timer_enable(timer, false);
            } else {
                let period = clock.cycles_to_time(interval);
                self.timer_adjust(timer, period, 0, period);
            }
        }
    }

    /// A device's clock.
    #[must_use]
    pub fn device_clock(&self, id: DeviceId) -> Option<Clock> {
        self.meta.get(id.0 as usize).map(|meta| meta.clock)
    }

    /// A device's local time: the machine time for idle devices, the time up
    /// to which an executor has run otherwise.
    #[must_use]
    pub fn device_time(&self, id: DeviceId) -> Option<EmuTime> {
        let meta = self.meta.get(id.0 as usize)?;
        if !meta.executor {
            return Some(self.now());
        }
        let consumed = self
            .exec
            .filter(|exec| exec.device == id)
            .map_or(0, |exec| exec.consumed);
        Some(meta.local_time(consumed))
    }
}

#[cfg(test)]
mod tests {
    use crate::{EmuTime, Machine, RunError};

    #[test]
    fn running_requires_start() {
        let mut machine = Machine::new();
        assert_eq!(
            machine.run_for(EmuTime::from_micros(1)),
            Err(RunError::NotRunning)
        );
        machine.start().expect("starts");
        let outcome = machine.run_for(EmuTime::from_micros(1)).expect("runs");
        assert_eq!(outcome.time, EmuTime::from_micros(1));
        machine.stop();
        assert_eq!(
            machine.run_for(EmuTime::from_micros(1)),
            Err(RunError::NotRunning)
        );
    }

    #[test]
    fn reentrant_run_is_refused() {
        let mut machine = Machine::new();
        machine.start().expect("starts");
        let callback = machine.add_timer_callback(|machine, _, _| {
            assert_eq!(
                machine.run_for(EmuTime::from_micros(1)),
                Err(RunError::Reentrant)
            );
        });
        machine.timer_set(
            EmuTime::from_micros(1),
            crate::TimerTarget::Callback(callback),
            0,
        );
        machine.run_for(EmuTime::from_micros(2)).expect("runs");
        assert_eq!(machine.diagnostics().reentrancy_violations, 1);
    }

    #[test]
    fn target_in_the_past_only_fires_due_timers() {
        let mut machine = Machine::new();
        machine.start().expect("starts");
        machine.run_for(EmuTime::from_micros(5)).expect("runs");
        let outcome = machine.run_until(EmuTime::from_micros(1)).expect("runs");
        assert_eq!(outcome.time, EmuTime::from_micros(5));
        assert_eq!(outcome.slices, 0);
    }
}
