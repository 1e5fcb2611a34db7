//! Timer handles, targets, and records.

use crate::state::codec::{ByteReader, ByteWriter};
use crate::{DeviceId, EmuTime, LineId};

/// Opaque timer handle. Stale handles (removed timers) are ignored by every
/// timer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimerId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to a timer callback closure registered with the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimerCallbackId(pub(crate) u32);

/// Who is notified when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TimerTarget {
    /// [`crate::Device::timer_fired`] on a device.
    Device(DeviceId),
    /// A closure registered with [`crate::Machine::add_timer_callback`].
    Callback(TimerCallbackId),
    /// Internal: revert a pulsed line.
    LineRelease(LineId),
    /// Internal: periodic [`crate::Device::tick`].
    DeviceTick(DeviceId),
}

impl TimerTarget {
    const fn encode(self) -> (u8, u32) {
        match self {
            Self::Device(id) => (0, id.0),
            Self::Callback(id) => (1, id.0),
            Self::LineRelease(id) => (2, id.0),
            Self::DeviceTick(id) => (3, id.0),
        }
    }

    const fn decode(tag: u8, raw: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Device(DeviceId(raw))),
            1 => Some(Self::Callback(TimerCallbackId(raw))),
            2 => Some(Self::LineRelease(LineId(raw))),
            3 => Some(Self::DeviceTick(DeviceId(raw))),
            _ => None,
        }
    }
}

/// One scheduler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerRecord {
    pub(crate) generation: u32,
    pub(crate) live: bool,
    pub(crate) target: TimerTarget,
    pub(crate) param: u64,
    pub(crate) enabled: bool,
    /// Freed automatically after firing unless re-armed.
    pub(crate) temporary: bool,
    /// Re-arm interval; `ZERO` or `NEVER` for one-shot.
    pub(crate) period: EmuTime,
    pub(crate) start: EmuTime,
    pub(crate) expire: EmuTime,
    /// Arming sequence; queue entries carrying another value are stale.
    pub(crate) seq: u64,
}

impl TimerRecord {
    pub(crate) const fn new(target: TimerTarget, generation: u32, temporary: bool) -> Self {
        Self {
            generation,
            live: true,
            target,
            param: 0,
            enabled: false,
            temporary,
            period: EmuTime::ZERO,
            start: EmuTime::ZERO,
            expire: EmuTime::NEVER,
            seq: 0,
        }
    }

    pub(crate) const fn is_periodic(&self) -> bool {
        !self.period.is_zero() && !self.period.is_never()
    }

    pub(crate) fn encode(&self, out: &mut ByteWriter) {
        let (tag, raw) = self.target.encode();
        out.u32(self.generation);
        out.bool(self.live);
        out.u8(tag);
        out.u32(raw);
        out.u64(self.param);
        out.bool(self.enabled);
        out.bool(self.temporary);
        out.u128(self.period.as_attos());
        out.u128(self.start.as_attos());
        out.u128(self.expire.as_attos());
        out.u64(self.seq);
    }

    pub(crate) fn decode(input: &mut ByteReader<'_>) -> Option<Self> {
        let generation = input.u32()?;
        let live = input.bool()?;
        let tag = input.u8()?;
        let raw = input.u32()?;
        Some(Self {
            generation,
            live,
            target: TimerTarget::decode(tag, raw)?,
            param: input.u64()?,
            enabled: input.bool()?,
            temporary: input.bool()?,
            period: EmuTime::from_attos(input.u128()?),
            start: EmuTime::from_attos(input.u128()?),
            expire: EmuTime::from_attos(input.u128()?),
            seq: input.u64()?,
        })
    }
}
