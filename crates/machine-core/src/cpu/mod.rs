//! CPU framework: the contract between instruction-set cores and the
//! scheduler.
//!
//! A [`CpuCore`] knows its instruction set and nothing else. [`Cpu`] wraps a
//! core into an executing device: it polls the input lines before every
//! fetch, runs the interrupt acknowledge sequence, and keeps the cycle
//! accounting that lets a slice end mid-instruction without ever reporting
//! more cycles than budgeted.

use crate::{LineId, SpaceId, StateVisitor};

/// Bus view handed to cores.
pub mod bus;
pub use bus::CpuBus;

/// CPU run states.
pub mod run_state;
pub use run_state::CpuRunState;

mod host;
pub use host::{Cpu, CpuStats};

/// Small 8-bit accumulator core used by demos and tests.
pub mod acc8;
pub use acc8::Acc8;

use crate::device::Slot;

/// Interrupt classes a core can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InterruptKind {
    /// Maskable request, taken while the core has interrupts enabled.
    Irq,
    /// Non-maskable request, taken on each rising edge.
    Nmi,
}

/// What one [`CpuCore::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepResult {
    /// An instruction retired.
    Executed(u32),
    /// A halt instruction retired; the core stops until reset.
    Halt(u32),
    /// A wait instruction retired; the core idles until an IRQ.
    WaitForInterrupt(u32),
    /// The fetched opcode is undefined.
    Illegal {
        /// Offending opcode.
        opcode: u32,
        /// Cycles charged for it.
        cycles: u32,
    },
}

impl StepResult {
    /// Cycles charged.
    #[must_use]
    pub const fn cycles(self) -> u32 {
        match self {
            Self::Executed(cycles) | Self::Halt(cycles) | Self::WaitForInterrupt(cycles) => cycles,
            Self::Illegal { cycles, .. } => cycles,
        }
    }
}

/// What happens when a core reports an undefined opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IllegalOpcodePolicy {
    /// Treat it as the core's documented no-operation and continue.
    #[default]
    Nop,
    /// Record an illegal-opcode fault, log it, and continue.
    Diagnose,
}

/// An instruction-set implementation.
pub trait CpuCore: 'static {
    /// Runs the reset sequence (typically loading a vector); returns its cost.
    fn reset(&mut self, bus: &mut CpuBus<'_>) -> u32;

    /// Fetches, decodes, and executes one instruction.
    fn step(&mut self, bus: &mut CpuBus<'_>) -> StepResult;

    /// Enters the handler for an accepted interrupt.
    fn take_interrupt(&mut self, bus: &mut CpuBus<'_>, kind: InterruptKind);

    /// Cycles charged for accepting an interrupt.
    fn irq_ack_cycles(&self, kind: InterruptKind) -> u32;

    /// Whether maskable interrupts are currently accepted.
    fn interrupts_enabled(&self) -> bool;

    /// Program counter.
    fn pc(&self) -> u64;

    /// Register names and values, for debuggers and traces.
    fn registers(&self) -> Vec<(&'static str, u64)>;

    /// Registers the core's saved state.
    fn visit_state(&mut self, visitor: &mut dyn StateVisitor);
}

/// Input lines a CPU samples before each fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInputs {
    /// Maskable interrupt request.
    pub irq: Slot<LineId>,
    /// Non-maskable interrupt (edge-triggered).
    pub nmi: Slot<LineId>,
    /// Reset, held while high.
    pub reset: Slot<LineId>,
    /// Halt, stalls fetching while high.
    pub halt: Slot<LineId>,
}

impl Default for CpuInputs {
    fn default() -> Self {
        Self {
            irq: Slot::optional("irq"),
            nmi: Slot::optional("nmi"),
            reset: Slot::optional("reset"),
            halt: Slot::optional("halt"),
        }
    }
}

/// Static configuration of a CPU device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    /// Clock in Hz; must be non-zero.
    pub clock_hz: u32,
    /// Data and operand space. Required.
    pub program: Slot<SpaceId>,
    /// Opcode space; defaults to the program space.
    pub opcodes: Slot<SpaceId>,
    /// Sampled input lines.
    pub inputs: CpuInputs,
    /// Undefined-opcode handling.
    pub illegal_opcode_policy: IllegalOpcodePolicy,
}

impl CpuConfig {
    /// Configuration with no bindings.
    #[must_use]
    pub fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            program: Slot::required("program"),
            opcodes: Slot::optional("opcodes"),
            inputs: CpuInputs::default(),
            illegal_opcode_policy: IllegalOpcodePolicy::default(),
        }
    }

    /// Binds the program space.
    #[must_use]
    pub fn with_program(mut self, space: SpaceId) -> Self {
        self.program.bind(space);
        self
    }

    /// Binds a separate opcode space.
    #[must_use]
    pub fn with_opcodes(mut self, space: SpaceId) -> Self {
        self.opcodes.bind(space);
        self
    }

    /// Connects the IRQ input.
    #[must_use]
    pub fn with_irq(mut self, line: LineId) -> Self {
        self.inputs.irq.bind(line);
        self
    }

    /// Connects the NMI input.
    #[must_use]
    pub fn with_nmi(mut self, line: LineId) -> Self {
        self.inputs.nmi.bind(line);
        self
    }

    /// Connects the reset input.
    #[must_use]
    pub fn with_reset_line(mut self, line: LineId) -> Self {
        self.inputs.reset.bind(line);
        self
    }

    /// Connects the halt input.
    #[must_use]
    pub fn with_halt_line(mut self, line: LineId) -> Self {
        self.inputs.halt.bind(line);
        self
    }

    /// Sets the undefined-opcode policy.
    #[must_use]
    pub const fn with_illegal_opcode_policy(mut self, policy: IllegalOpcodePolicy) -> Self {
        self.illegal_opcode_policy = policy;
        self
    }
}
