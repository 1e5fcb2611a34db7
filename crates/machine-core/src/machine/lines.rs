//! Line driving and subscriber notification.

use log::{trace, warn};

use super::{Machine, PendingInput};
use crate::line::{LineAction, LineLatch, LineSink};
use crate::scheduler::TimerTarget;
use crate::slots::SlotError;
use crate::{ConfigError, DeviceId, EmuTime, LineId, RuntimeFault, Slot, TraceEvent};

const LOG_TARGET: &str = "machine_core::line";

impl Machine {
    /// Adds a subscriber; it is notified of every later level change.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLine`] or [`ConfigError::UnknownDevice`].
    pub fn subscribe_line(&mut self, line: LineId, sink: LineSink) -> Result<(), ConfigError> {
        match sink {
            LineSink::Device { device, .. } if !self.devices.is_live(device.0) => {
                return Err(ConfigError::UnknownDevice(device.0));
            }
            _ => {}
        }
        let target = self
            .lines
            .get_mut(line.0 as usize)
            .ok_or(ConfigError::UnknownLine(line.0))?;
        target.subscribers.push(sink);
        Ok(())
    }

    /// Removes a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe_line(&mut self, line: LineId, sink: LineSink) -> bool {
        let Some(target) = self.lines.get_mut(line.0 as usize) else {
            return false;
        };
        let before = target.subscribers.len();
        target.subscribers.retain(|other| *other != sink);
        target.subscribers.len() != before
    }

    /// Drives a line. Returns `false` for unknown lines.
    pub fn set_line(&mut self, line: LineId, action: LineAction) -> bool {
        let Some(target) = self.lines.get_mut(line.0 as usize) else {
            warn!(target: LOG_TARGET, "action {action:?} on unknown line #{}", line.0);
            return false;
        };
        let release = target.release_timer;
        let (latch, level) = match action {
            LineAction::Clear => (LineLatch::None, false),
            LineAction::Assert => (LineLatch::None, true),
            LineAction::Hold => (LineLatch::Held, true),
            LineAction::Pulse => (LineLatch::Pulsed, true),
        };
        target.latch = latch;

        if action == LineAction::Pulse {
            let width = self.config.pulse_width;
            let timer = match release {
                Some(timer) => timer,
                None => {
                    let timer = self.timer_alloc(TimerTarget::LineRelease(line));
                    if let Some(target) = self.lines.get_mut(line.0 as usize) {
                        target.release_timer = Some(timer);
                    }
                    timer
                }
            };
            self.timer_adjust(timer, width, 0, EmuTime::ZERO);
        } else if let Some(timer) = release {
            self.scheduler.disarm(timer);
        }

        self.update_level(line, level);
        true
    }

    /// Drives the line bound to an output slot; unbound slots are no-ops.
    pub fn drive_line(&mut self, slot: &Slot<LineId>, action: LineAction) -> bool {
        slot.get().is_some_and(|line| self.set_line(line, action))
    }

    /// Current level; `false` for unknown lines.
    #[must_use]
    pub fn line_level(&self, line: LineId) -> bool {
        self.lines.get(line.0 as usize).is_some_and(|target| target.level())
    }

    /// Whether the line requests service: its level, or a latched rising
    /// edge for edge lines.
    #[must_use]
    pub fn line_active(&self, line: LineId) -> bool {
        self.lines
            .get(line.0 as usize)
            .is_some_and(|target| target.is_active())
    }

    /// Consumer acknowledge: clears a latched edge, and drops the line if it
    /// was held or pulsed. Plain assertions stay until their producer clears
    /// them.
    pub fn acknowledge_line(&mut self, line: LineId) {
        let Some(target) = self.lines.get_mut(line.0 as usize) else {
            return;
        };
        target.edge_pending = false;
        if target.latch == LineLatch::None {
            return;
        }
        target.latch = LineLatch::None;
        if let Some(timer) = target.release_timer {
            self.scheduler.disarm(timer);
        }
        self.update_level(line, false);
    }

    pub(crate) fn release_pulse(&mut self, line: LineId) {
        let Some(target) = self.lines.get_mut(line.0 as usize) else {
            return;
        };
        if target.latch != LineLatch::Pulsed {
            return;
        }
        target.latch = LineLatch::None;
        self.update_level(line, false);
    }

    fn update_level(&mut self, line: LineId, level: bool) {
        let Some(target) = self.lines.get_mut(line.0 as usize) else {
            return;
        };
        if !target.set_level(level) {
            return;
        }
        let subscribers = target.subscribers.clone();
        let time = self.now();
        trace!(
            target: LOG_TARGET,
            "`{}` -> {} at {time}",
            self.lines.get(line.0 as usize).map_or("?", |target| target.name()),
            u8::from(level)
        );
        self.emit(TraceEvent::LineChanged { time, line, level });

        for sink in subscribers {
            match sink {
                LineSink::Device { device, input } => self.deliver_input(device, input, level),
                LineSink::Callback(id) => match self.line_callbacks.checkout(id.0) {
                    Ok(mut callback) => {
                        callback(self, line, level);
                        self.line_callbacks.checkin(id.0, callback);
                    }
                    Err(SlotError::Vacant) => self.record_fault(RuntimeFault::DefusedTimer),
                    Err(SlotError::Busy) => {
                        warn!(target: LOG_TARGET, "line callback {} re-entered", id.0);
                        self.record_fault(RuntimeFault::Reentrancy);
                    }
                },
            }
        }
    }

    /// Notifies a device input, deferring it while the device is running.
    fn deliver_input(&mut self, device: DeviceId, input: u32, level: bool) {
        if self.devices.is_checked_out(device.0) {
            self.pending_inputs.push(PendingInput {
                device,
                input,
                level,
            });
            return;
        }
        match self.with_device(device, |target, machine| {
            target.input_changed(machine, input, level);
        }) {
            Ok(()) => {}
            Err(SlotError::Vacant) => self.record_fault(RuntimeFault::DefusedTimer),
            Err(SlotError::Busy) => self.pending_inputs.push(PendingInput {
                device,
                input,
                level,
            }),
        }
    }

    /// Delivers inputs that arrived while `device` was checked out.
    pub(crate) fn flush_inputs(&mut self, device: DeviceId) {
        while let Some(index) = self
            .pending_inputs
            .iter()
            .position(|pending| pending.device == device)
        {
            let pending = self.pending_inputs.remove(index);
            self.deliver_input(pending.device, pending.input, pending.level);
        }
    }
}
