//! Signal lines connecting device outputs to inputs.

use crate::{DeviceId, TimerId};

/// Handle to a line owned by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineId(pub(crate) u32);

impl LineId {
    /// Raw line index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Handle to a line callback closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineCallbackId(pub(crate) u32);

/// How consumers sample a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineKind {
    /// Consumers look at the current level.
    #[default]
    Level,
    /// Rising edges are latched until acknowledged, so a short assertion is
    /// never missed.
    Edge,
}

/// What a producer does to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineAction {
    /// Drive low.
    Clear,
    /// Drive high until cleared.
    Assert,
    /// Drive high until the consumer acknowledges.
    Hold,
    /// Drive high, then release automatically after the pulse width.
    Pulse,
}

/// Why a line is currently high, beyond a plain assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineLatch {
    /// No latch.
    #[default]
    None,
    /// Held until acknowledged.
    Held,
    /// Pulsed; reverts on timeout or acknowledge.
    Pulsed,
}

impl LineLatch {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Held => 1,
            Self::Pulsed => 2,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Held),
            2 => Some(Self::Pulsed),
            _ => None,
        }
    }
}

/// A subscriber notified when a line changes level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineSink {
    /// [`crate::Device::input_changed`] with the given input number.
    Device {
        /// Receiving device.
        device: DeviceId,
        /// Device-defined input number.
        input: u32,
    },
    /// A closure registered with the machine.
    Callback(LineCallbackId),
}

/// A named signal.
#[derive(Debug, Clone)]
pub struct Line {
    pub(crate) name: String,
    pub(crate) kind: LineKind,
    pub(crate) level: bool,
    pub(crate) latch: LineLatch,
    pub(crate) edge_pending: bool,
    pub(crate) transitions: u64,
    pub(crate) subscribers: Vec<LineSink>,
    pub(crate) release_timer: Option<TimerId>,
}

impl Line {
    pub(crate) fn new(name: impl Into<String>, kind: LineKind) -> Self {
        Self {
            name: name.into(),
            kind,
            level: false,
            latch: LineLatch::None,
            edge_pending: false,
            transitions: 0,
            subscribers: Vec::new(),
            release_timer: None,
        }
    }

    /// Line name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sampling kind.
    #[must_use]
    pub const fn kind(&self) -> LineKind {
        self.kind
    }

    /// Current level.
    #[must_use]
    pub const fn level(&self) -> bool {
        self.level
    }

    /// Current latch.
    #[must_use]
    pub const fn latch(&self) -> LineLatch {
        self.latch
    }

    /// Returns `true` while an unacknowledged rising edge is latched.
    #[must_use]
    pub const fn edge_pending(&self) -> bool {
        self.edge_pending
    }

    /// Whether a consumer should treat the line as requesting service.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        match self.kind {
            LineKind::Level => self.level,
            LineKind::Edge => self.edge_pending,
        }
    }

    /// Number of level changes since creation.
    #[must_use]
    pub const fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Registered subscribers in notification order.
    #[must_use]
    pub fn subscribers(&self) -> &[LineSink] {
        &self.subscribers
    }

    /// Applies a level change; returns `true` when the level actually changed.
    pub(crate) fn set_level(&mut self, level: bool) -> bool {
        if self.level == level {
            return false;
        }
        self.level = level;
        self.transitions = self.transitions.wrapping_add(1);
        if level && self.kind == LineKind::Edge {
            self.edge_pending = true;
        }
        true
    }
}
