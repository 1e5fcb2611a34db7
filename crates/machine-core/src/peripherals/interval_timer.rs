//! Programmable interval timer with an interrupt output.
//!
//! Counts `reload` cycles of its own clock, flags an underflow, and raises
//! its IRQ line. In auto-reload mode it restarts immediately. Reading STATUS
//! acknowledges: the underflow flag and the IRQ line are cleared. With
//! `irq_hold` configured the line instead drops by itself after that long,
//! the way some custom chips hold their interrupt for a fixed time.

use log::{debug, trace};

use crate::device::{Device, Slot, SlotInfo};
use crate::memory::Access;
use crate::scheduler::{TimerId, TimerTarget};
use crate::state::StateItem;
use crate::{Clock, ConfigError, DeviceId, EmuTime, LineAction, LineId, Machine, StateVisitor};

const LOG_TARGET: &str = "machine_core::peripherals";

/// Control register offset.
pub const REG_CONTROL: u64 = 0;
/// Status register offset.
pub const REG_STATUS: u64 = 1;
/// Reload value, low byte.
pub const REG_RELOAD_LO: u64 = 2;
/// Reload value, high byte.
pub const REG_RELOAD_HI: u64 = 3;
/// Current count, low byte.
pub const REG_COUNT_LO: u64 = 4;
/// Current count, high byte.
pub const REG_COUNT_HI: u64 = 5;
/// Identification register.
pub const REG_ID: u64 = 6;

/// Value of the identification register.
pub const INTERVAL_TIMER_ID: u8 = 0x7C;

/// CONTROL: counting enabled.
pub const CONTROL_ENABLE: u8 = 0x01;
/// CONTROL: restart after each underflow.
pub const CONTROL_AUTO_RELOAD: u8 = 0x02;
/// CONTROL: raise the IRQ line on underflow.
pub const CONTROL_IRQ_ENABLE: u8 = 0x04;
/// STATUS: an underflow happened since the last STATUS read.
pub const STATUS_UNDERFLOW: u8 = 0x01;

const PARAM_UNDERFLOW: u64 = 0;
const PARAM_RELEASE: u64 = 1;

/// Static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IntervalTimerConfig {
    /// Counting clock in Hz.
    pub clock_hz: u32,
    /// When set, the IRQ line is asserted for this long instead of being held
    /// until STATUS is read.
    pub irq_hold: Option<EmuTime>,
}

impl Default for IntervalTimerConfig {
    fn default() -> Self {
        Self {
            clock_hz: 1_000_000,
            irq_hold: None,
        }
    }
}

/// Programmable interval timer device.
#[derive(Debug)]
pub struct IntervalTimer {
    tag: String,
    config: IntervalTimerConfig,
    /// Interrupt output.
    pub irq: Slot<LineId>,
    counter: Option<TimerId>,
    release: Option<TimerId>,
    control: u8,
    status: u8,
    reload: u16,
    underflows: u32,
}

impl IntervalTimer {
    /// Creates a stopped timer.
    pub fn new(tag: impl Into<String>, config: IntervalTimerConfig) -> Self {
        Self {
            tag: tag.into(),
            config,
            irq: Slot::required("irq"),
            counter: None,
            release: None,
            control: 0,
            status: 0,
            reload: 0xFFFF,
            underflows: 0,
        }
    }

    /// Builder form of binding the IRQ output.
    #[must_use]
    pub fn with_irq(mut self, line: LineId) -> Self {
        self.irq.bind(line);
        self
    }

    /// CONTROL register.
    #[must_use]
    pub const fn control(&self) -> u8 {
        self.control
    }

    /// Underflows since reset.
    #[must_use]
    pub const fn underflows(&self) -> u32 {
        self.underflows
    }

    const fn clock(&self) -> Clock {
        Clock::from_hz(self.config.clock_hz)
    }

    fn period(&self) -> EmuTime {
        self.clock().cycles_to_time(u64::from(self.reload.max(1)))
    }

    fn restart(&mut self, machine: &mut Machine) {
        let Some(counter) = self.counter else {
            return;
        };
        if self.control & CONTROL_ENABLE == 0 {
            machine.timer_enable(counter, false);
            return;
        }
        let period = self.period();
        let repeat = if self.control & CONTROL_AUTO_RELOAD == 0 {
            EmuTime::ZERO
        } else {
            period
        };
        machine.timer_adjust(counter, period, PARAM_UNDERFLOW, repeat);
        trace!(target: LOG_TARGET, "`{}` counting {} cycles", self.tag, self.reload);
    }

    fn count(&self, machine: &Machine) -> u16 {
        let left = self
            .counter
            .map_or(EmuTime::NEVER, |counter| machine.timer_time_left(counter));
        if left.is_never() {
            return 0;
        }
        u16::try_from(self.clock().time_to_cycles_ceil(left)).unwrap_or(u16::MAX)
    }

    fn underflow(&mut self, machine: &mut Machine) {
        self.status |= STATUS_UNDERFLOW;
        self.underflows = self.underflows.wrapping_add(1);
        if self.control & CONTROL_AUTO_RELOAD == 0 {
            self.control &= !CONTROL_ENABLE;
        }
        if self.control & CONTROL_IRQ_ENABLE == 0 {
            return;
        }
        match (self.config.irq_hold, self.release) {
            (Some(hold), Some(release)) => {
                machine.drive_line(&self.irq, LineAction::Assert);
                machine.timer_adjust(release, hold, PARAM_RELEASE, EmuTime::ZERO);
            }
            _ => {
                machine.drive_line(&self.irq, LineAction::Hold);
            }
        }
    }
}

impl Device for IntervalTimer {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn clock_hz(&self) -> u32 {
        self.config.clock_hz
    }

    fn interface(&self) -> Vec<SlotInfo> {
        vec![self.irq.info()]
    }

    fn start(&mut self, machine: &mut Machine, id: DeviceId) -> Result<(), ConfigError> {
        if self.config.clock_hz == 0 {
            return Err(ConfigError::InvalidClock {
                device: self.tag.clone(),
            });
        }
        self.counter = Some(machine.timer_alloc(TimerTarget::Device(id)));
        if self.config.irq_hold.is_some() {
            self.release = Some(machine.timer_alloc(TimerTarget::Device(id)));
        }
        Ok(())
    }

    fn reset(&mut self, machine: &mut Machine) {
        self.control = 0;
        self.status = 0;
        self.reload = 0xFFFF;
        self.underflows = 0;
        for timer in [self.counter, self.release].into_iter().flatten() {
            machine.timer_enable(timer, false);
        }
        machine.drive_line(&self.irq, LineAction::Clear);
    }

    fn timer_fired(&mut self, machine: &mut Machine, _timer: TimerId, param: u64) {
        match param {
            PARAM_UNDERFLOW => self.underflow(machine),
            PARAM_RELEASE => {
                machine.drive_line(&self.irq, LineAction::Clear);
            }
            _ => debug!(target: LOG_TARGET, "`{}` ignored timer param {param}", self.tag),
        }
    }

    fn read(&mut self, machine: &mut Machine, access: Access) -> Option<u64> {
        let value = match access.offset {
            REG_CONTROL => self.control,
            REG_STATUS => {
                let status = self.status;
                self.status = 0;
                if self.config.irq_hold.is_none() {
                    machine.drive_line(&self.irq, LineAction::Clear);
                }
                status
            }
            REG_RELOAD_LO => self.reload.to_le_bytes()[0],
            REG_RELOAD_HI => self.reload.to_le_bytes()[1],
            REG_COUNT_LO => self.count(machine).to_le_bytes()[0],
            REG_COUNT_HI => self.count(machine).to_le_bytes()[1],
            REG_ID => INTERVAL_TIMER_ID,
            _ => return None,
        };
        Some(u64::from(value))
    }

    fn write(&mut self, machine: &mut Machine, access: Access, value: u64) {
        let byte = value.to_le_bytes()[0];
        match access.offset {
            REG_CONTROL => {
                let was_enabled = self.control & CONTROL_ENABLE != 0;
                self.control = byte & (CONTROL_ENABLE | CONTROL_AUTO_RELOAD | CONTROL_IRQ_ENABLE);
                if !was_enabled || self.control & CONTROL_ENABLE == 0 {
                    self.restart(machine);
                }
            }
            REG_RELOAD_LO => {
                self.reload = u16::from_le_bytes([byte, self.reload.to_le_bytes()[1]]);
            }
            REG_RELOAD_HI => {
                self.reload = u16::from_le_bytes([self.reload.to_le_bytes()[0], byte]);
            }
            _ => trace!(
                target: LOG_TARGET,
                "`{}` write {byte:#04x} to read-only offset {:#x}",
                self.tag,
                access.offset
            ),
        }
    }

    fn visit_state(&mut self, visitor: &mut dyn StateVisitor) {
        visitor.item("control", StateItem::U8(&mut self.control));
        visitor.item("status", StateItem::U8(&mut self.status));
        visitor.item("reload", StateItem::U16(&mut self.reload));
        visitor.item("underflows", StateItem::U32(&mut self.underflows));
    }
}
