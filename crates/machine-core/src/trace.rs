//! Deterministic trace hooks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{DeviceId, EmuTime, InterruptKind, LineId, RuntimeFault, SpaceId, TimerId};

/// Events emitted in execution order while a sink is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// A timer expired and its target was dispatched.
    TimerFired {
        /// Scheduled expiry.
        time: EmuTime,
        /// Timer handle.
        timer: TimerId,
        /// User parameter.
        param: u64,
    },
    /// A line changed level.
    LineChanged {
        /// Time of the change.
        time: EmuTime,
        /// Line handle.
        line: LineId,
        /// New level.
        level: bool,
    },
    /// A CPU accepted an interrupt.
    InterruptTaken {
        /// Time the acknowledge started.
        time: EmuTime,
        /// Accepting CPU.
        device: DeviceId,
        /// Interrupt class.
        kind: InterruptKind,
    },
    /// An executor finished a slice.
    SliceExecuted {
        /// Executor.
        device: DeviceId,
        /// Local time at slice start.
        start: EmuTime,
        /// Cycles consumed.
        cycles: u64,
    },
    /// An access hit no handler.
    UnmappedAccess {
        /// Space accessed.
        space: SpaceId,
        /// Address accessed.
        address: u64,
        /// `true` for writes.
        write: bool,
    },
    /// A runtime fault was recorded.
    Fault {
        /// Time of the fault.
        time: EmuTime,
        /// Fault kind.
        fault: RuntimeFault,
    },
}

/// Sink trait for deterministic trace hooks.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, event: TraceEvent);
}

/// Sink that records every event; clones share the same buffer, so one clone
/// can be handed to the machine and the other inspected.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl TraceLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Drops every recorded event.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl TraceSink for TraceLog {
    fn on_event(&mut self, event: TraceEvent) {
        self.events.borrow_mut().push(event);
    }
}
