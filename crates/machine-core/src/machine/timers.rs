//! Timer API and dispatch.

use log::{debug, trace, warn};

use super::Machine;
use crate::scheduler::{TimerId, TimerTarget};
use crate::slots::SlotError;
use crate::{EmuTime, RuntimeFault, TraceEvent};

const LOG_TARGET: &str = "machine_core::scheduler";

impl Machine {
    /// Current emulated time.
    ///
    /// While an executor runs this is its local time (slice start plus the
    /// cycles it has consumed), so timers armed mid-slice are anchored to
    /// the instruction that armed them.
    #[must_use]
    pub fn now(&self) -> EmuTime {
        self.exec
            .and_then(|exec| {
                self.meta
                    .get(exec.device.0 as usize)
                    .map(|meta| meta.local_time(exec.consumed))
            })
            .map_or(self.scheduler.now(), |local| local.max(self.scheduler.now()))
    }

    /// Allocates a disabled timer.
    pub fn timer_alloc(&mut self, target: TimerTarget) -> TimerId {
        self.scheduler.alloc(target, false)
    }

    /// Fires `target` once after `delay`; the timer frees itself afterwards.
    pub fn timer_set(&mut self, delay: EmuTime, target: TimerTarget, param: u64) -> TimerId {
        let id = self.scheduler.alloc(target, true);
        self.arm_timer(id, delay, param, EmuTime::ZERO);
        id
    }

    /// Fires `target` every `period`, first after one period.
    pub fn timer_pulse(&mut self, period: EmuTime, target: TimerTarget, param: u64) -> TimerId {
        let id = self.scheduler.alloc(target, false);
        self.arm_timer(id, period, param, period);
        id
    }

    /// Re-arms a timer: first expiry after `delay`, then every `period`
    /// (`ZERO` or `NEVER` for one-shot). Returns `false` for stale handles.
    pub fn timer_adjust(&mut self, id: TimerId, delay: EmuTime, param: u64, period: EmuTime) -> bool {
        self.arm_timer(id, delay, param, period)
    }

    /// Restarts a timer with a new delay, keeping its parameter and period.
    pub fn timer_reset(&mut self, id: TimerId, delay: EmuTime) -> bool {
        let Some(record) = self.scheduler.record(id).copied() else {
            return false;
        };
        self.arm_timer(id, delay, record.param, record.period)
    }

    /// Enables or disables a timer without changing its expiry. Returns the
    /// previous state, `false` for stale handles.
    pub fn timer_enable(&mut self, id: TimerId, enable: bool) -> bool {
        let previous = self.scheduler.set_enabled(id, enable).unwrap_or(false);
        if enable && !previous {
            let expire = self.scheduler.record(id).map_or(EmuTime::NEVER, |r| r.expire);
            self.shorten_slice(expire);
        }
        previous
    }

    /// Returns `true` if the timer is armed.
    #[must_use]
    pub fn timer_enabled(&self, id: TimerId) -> bool {
        self.scheduler.record(id).is_some_and(|record| record.enabled)
    }

    /// User parameter.
    #[must_use]
    pub fn timer_param(&self, id: TimerId) -> Option<u64> {
        self.scheduler.record(id).map(|record| record.param)
    }

    /// Replaces the user parameter.
    pub fn timer_set_param(&mut self, id: TimerId, param: u64) -> bool {
        self.scheduler.record_mut(id).map(|record| record.param = param).is_some()
    }

    /// Time until the next expiry; [`EmuTime::NEVER`] when disarmed or stale.
    #[must_use]
    pub fn timer_time_left(&self, id: TimerId) -> EmuTime {
        match self.scheduler.record(id) {
            Some(record) if record.enabled && !record.expire.is_never() => {
                record.expire.saturating_sub(self.now())
            }
            _ => EmuTime::NEVER,
        }
    }

    /// Time since the timer was last armed (or last fired, if periodic).
    #[must_use]
    pub fn timer_elapsed(&self, id: TimerId) -> EmuTime {
        self.scheduler
            .record(id)
            .map_or(EmuTime::ZERO, |record| self.now().saturating_sub(record.start))
    }

    /// When the timer was last armed.
    #[must_use]
    pub fn timer_start_time(&self, id: TimerId) -> EmuTime {
        self.scheduler.record(id).map_or(EmuTime::NEVER, |record| record.start)
    }

    /// Scheduled expiry, [`EmuTime::NEVER`] when disarmed or stale.
    #[must_use]
    pub fn timer_fire_time(&self, id: TimerId) -> EmuTime {
        match self.scheduler.record(id) {
            Some(record) if record.enabled => record.expire,
            _ => EmuTime::NEVER,
        }
    }

    /// Frees a timer; the handle goes stale.
    pub fn timer_remove(&mut self, id: TimerId) -> bool {
        self.scheduler.remove(id)
    }

    /// Number of allocated timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.scheduler.live_count()
    }

    fn arm_timer(&mut self, id: TimerId, delay: EmuTime, param: u64, period: EmuTime) -> bool {
        let start = self.now();
        let expire = if delay.is_never() {
            EmuTime::NEVER
        } else {
            start.saturating_add(delay)
        };
        let Some(record) = self.scheduler.record_mut(id) else {
            debug!(target: LOG_TARGET, "adjust of stale timer {id:?} ignored");
            return false;
        };
        record.param = param;
        self.scheduler.arm(id, start, expire, period);
        trace!(target: LOG_TARGET, "timer {id:?} armed for {expire}");
        self.shorten_slice(expire);
        true
    }

    /// Ends the running slice early when a timer now expires inside it.
    fn shorten_slice(&mut self, expire: EmuTime) {
        if let Some(exec) = self.exec.as_mut() {
            if expire < self.slice_end {
                self.slice_end = expire.max(self.scheduler.now());
                exec.aborted = true;
            }
        }
    }

    /// Fires every timer due at or before `limit`, in expiry order.
    pub(crate) fn fire_due_timers(&mut self, limit: EmuTime) {
        while let Some(id) = self.scheduler.pop_due(limit) {
            let Some(record) = self.scheduler.record(id).copied() else {
                continue;
            };
            let when = record.expire.max(self.scheduler.now());
            self.scheduler.set_now(when);

            if record.is_periodic() {
                self.scheduler
                    .arm(id, when, when.saturating_add(record.period), record.period);
            } else {
                self.scheduler.disarm(id);
            }

            self.diagnostics.record_timer_fired();
            self.emit(TraceEvent::TimerFired {
                time: when,
                timer: id,
                param: record.param,
            });
            trace!(target: LOG_TARGET, "timer {id:?} fired at {when}");
            self.dispatch_timer(id, record.target, record.param);

            if record.temporary && !self.timer_enabled(id) {
                self.scheduler.remove(id);
            }
        }
    }

    fn dispatch_timer(&mut self, id: TimerId, target: TimerTarget, param: u64) {
        let outcome = match target {
            TimerTarget::Device(device) => self
                .with_device(device, |device, machine| device.timer_fired(machine, id, param)),
            TimerTarget::DeviceTick(device) => {
                self.with_device(device, |device, machine| device.tick(machine))
            }
            TimerTarget::Callback(callback) => match self.timer_callbacks.checkout(callback.0) {
                Ok(mut f) => {
                    f(self, id, param);
                    self.timer_callbacks.checkin(callback.0, f);
                    Ok(())
                }
                Err(err) => Err(err),
            },
            TimerTarget::LineRelease(line) => {
                self.release_pulse(line);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(SlotError::Vacant) => {
                warn!(target: LOG_TARGET, "timer {id:?} target {target:?} is gone; timer defused");
                self.scheduler.remove(id);
                self.record_fault(RuntimeFault::DefusedTimer);
            }
            Err(SlotError::Busy) => {
                warn!(target: LOG_TARGET, "timer {id:?} target {target:?} is busy");
                self.record_fault(RuntimeFault::Reentrancy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::{EmuTime, Machine, TimerTarget};

    fn started() -> Machine {
        let mut machine = Machine::new();
        machine.start().expect("empty machine starts");
        machine
    }

    #[test]
    fn temporary_timers_free_themselves() {
        let mut machine = started();
        let hits = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&hits);
        let callback = machine.add_timer_callback(move |_, _, _| *seen.borrow_mut() += 1);

        let id = machine.timer_set(EmuTime::from_micros(5), TimerTarget::Callback(callback), 0);
        assert_eq!(machine.timer_count(), 1);
        machine.run_for(EmuTime::from_micros(10)).expect("runs");
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(machine.timer_count(), 0);
        assert!(!machine.timer_enabled(id));
    }

    #[test]
    fn periodic_timers_rearm_from_their_expiry() {
        let mut machine = started();
        let times = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&times);
        let callback =
            machine.add_timer_callback(move |machine, _, _| log.borrow_mut().push(machine.now()));
        let id = machine.timer_pulse(EmuTime::from_micros(3), TimerTarget::Callback(callback), 0);

        machine.run_for(EmuTime::from_micros(10)).expect("runs");
        assert_eq!(
            *times.borrow(),
            vec![
                EmuTime::from_micros(3),
                EmuTime::from_micros(6),
                EmuTime::from_micros(9)
            ]
        );
        assert_eq!(machine.timer_fire_time(id), EmuTime::from_micros(12));
        assert_eq!(machine.timer_time_left(id), EmuTime::from_micros(2));
    }

    #[test]
    fn disabled_timers_report_never() {
        let mut machine = started();
        let callback = machine.add_timer_callback(|_, _, _| {});
        let id = machine.timer_alloc(TimerTarget::Callback(callback));
        assert_eq!(machine.timer_time_left(id), EmuTime::NEVER);

        machine.timer_adjust(id, EmuTime::from_micros(4), 7, EmuTime::ZERO);
        assert_eq!(machine.timer_param(id), Some(7));
        assert_eq!(machine.timer_time_left(id), EmuTime::from_micros(4));
        assert!(machine.timer_enable(id, false));
        assert_eq!(machine.timer_time_left(id), EmuTime::NEVER);
    }

    #[test]
    fn stale_handles_are_ignored() {
        let mut machine = started();
        let callback = machine.add_timer_callback(|_, _, _| {});
        let id = machine.timer_alloc(TimerTarget::Callback(callback));
        assert!(machine.timer_remove(id));
        assert!(!machine.timer_adjust(id, EmuTime::from_micros(1), 0, EmuTime::ZERO));
        assert!(!machine.timer_remove(id));
        assert_eq!(machine.timer_param(id), None);
    }

    #[test]
    fn removed_callbacks_defuse_their_timers() {
        let mut machine = started();
        let callback = machine.add_timer_callback(|_, _, _| {});
        machine.timer_pulse(EmuTime::from_micros(1), TimerTarget::Callback(callback), 0);
        assert!(machine.remove_timer_callback(callback));

        machine.run_for(EmuTime::from_micros(5)).expect("runs");
        assert_eq!(machine.diagnostics().defused_dispatches, 1);
    }
}
