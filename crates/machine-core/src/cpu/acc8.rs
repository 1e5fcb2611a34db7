//! Acc8: a minimal 8-bit accumulator machine.
//!
//! Enough of an instruction set to exercise the CPU framework end to end:
//! loads and stores, a counted loop, interrupt masking, return from
//! interrupt, wait, and halt. Vectors live at the top of a 16-bit space and
//! the stack in page one.

use super::{CpuBus, CpuCore, InterruptKind, StepResult};
use crate::state::StateItem;
use crate::StateVisitor;

/// NMI vector.
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector.
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ vector.
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Zero flag.
pub const FLAG_Z: u8 = 0x02;
/// Interrupt-disable flag.
pub const FLAG_I: u8 = 0x04;
/// Negative flag.
pub const FLAG_N: u8 = 0x80;

const STACK_PAGE: u16 = 0x0100;
const RESET_CYCLES: u32 = 7;
const INTERRUPT_CYCLES: u32 = 7;
const ILLEGAL_CYCLES: u32 = 2;

/// Decoded operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// No operation.
    Nop,
    /// Load accumulator, immediate.
    LdaImmediate,
    /// Load accumulator, absolute.
    LdaAbsolute,
    /// Store accumulator, absolute.
    StaAbsolute,
    /// Jump, absolute.
    Jmp,
    /// Increment accumulator.
    Inc,
    /// Branch if not zero, relative.
    Bne,
    /// Clear interrupt disable.
    Cli,
    /// Set interrupt disable.
    Sei,
    /// Return from interrupt.
    Rti,
    /// Wait for interrupt.
    Wai,
    /// Halt until reset.
    Hlt,
}

/// Opcode, operation, and base cycle cost.
pub const OPCODE_TABLE: &[(u8, Op, u32)] = &[
    (0x00, Op::Nop, 2),
    (0xA9, Op::LdaImmediate, 2),
    (0xAD, Op::LdaAbsolute, 4),
    (0x8D, Op::StaAbsolute, 4),
    (0x4C, Op::Jmp, 3),
    (0x1A, Op::Inc, 2),
    (0xD0, Op::Bne, 2),
    (0x58, Op::Cli, 2),
    (0x78, Op::Sei, 2),
    (0x40, Op::Rti, 6),
    (0xCB, Op::Wai, 3),
    (0xDB, Op::Hlt, 3),
];

/// Looks up an opcode.
#[must_use]
pub fn decode(opcode: u8) -> Option<(Op, u32)> {
    OPCODE_TABLE
        .iter()
        .find(|(code, _, _)| *code == opcode)
        .map(|(_, op, cycles)| (*op, *cycles))
}

/// Architectural state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Acc8 {
    a: u8,
    sp: u8,
    p: u8,
    pc: u16,
}

impl Acc8 {
    /// Power-on state; registers are loaded by the reset sequence.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            a: 0,
            sp: 0xFD,
            p: FLAG_I,
            pc: 0,
        }
    }

    /// Accumulator.
    #[must_use]
    pub const fn a(&self) -> u8 {
        self.a
    }

    /// Stack pointer (offset into page one).
    #[must_use]
    pub const fn sp(&self) -> u8 {
        self.sp
    }

    /// Status flags.
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.p
    }

    fn set_nz(&mut self, value: u8) {
        self.p &= !(FLAG_Z | FLAG_N);
        if value == 0 {
            self.p |= FLAG_Z;
        }
        self.p |= value & FLAG_N;
    }

    fn fetch(&mut self, bus: &mut CpuBus<'_>) -> u8 {
        let value = bus.read_operand(u64::from(self.pc));
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self, bus: &mut CpuBus<'_>) -> u16 {
        let lo = self.fetch(bus);
        let hi = self.fetch(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn read_vector(bus: &mut CpuBus<'_>, vector: u16) -> u16 {
        let lo = bus.read_u8(u64::from(vector));
        let hi = bus.read_u8(u64::from(vector.wrapping_add(1)));
        u16::from_le_bytes([lo, hi])
    }

    fn push(&mut self, bus: &mut CpuBus<'_>, value: u8) {
        bus.write_u8(u64::from(STACK_PAGE | u16::from(self.sp)), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut CpuBus<'_>) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read_u8(u64::from(STACK_PAGE | u16::from(self.sp)))
    }
}

impl Default for Acc8 {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCore for Acc8 {
    fn reset(&mut self, bus: &mut CpuBus<'_>) -> u32 {
        self.sp = 0xFD;
        self.p = FLAG_I;
        self.pc = Self::read_vector(bus, RESET_VECTOR);
        RESET_CYCLES
    }

    fn step(&mut self, bus: &mut CpuBus<'_>) -> StepResult {
        let opcode = bus.read_opcode(u64::from(self.pc));
        self.pc = self.pc.wrapping_add(1);
        let Some((op, cycles)) = decode(opcode) else {
            return StepResult::Illegal {
                opcode: u32::from(opcode),
                cycles: ILLEGAL_CYCLES,
            };
        };

        match op {
            Op::Nop => {}
            Op::LdaImmediate => {
                self.a = self.fetch(bus);
                self.set_nz(self.a);
            }
            Op::LdaAbsolute => {
                let address = self.fetch_word(bus);
                self.a = bus.read_u8(u64::from(address));
                self.set_nz(self.a);
            }
            Op::StaAbsolute => {
                let address = self.fetch_word(bus);
                bus.write_u8(u64::from(address), self.a);
            }
            Op::Jmp => self.pc = self.fetch_word(bus),
            Op::Inc => {
                self.a = self.a.wrapping_add(1);
                self.set_nz(self.a);
            }
            Op::Bne => {
                let offset = i8::from_le_bytes([self.fetch(bus)]);
                if self.p & FLAG_Z == 0 {
                    self.pc = self.pc.wrapping_add_signed(i16::from(offset));
                    return StepResult::Executed(cycles + 1);
                }
            }
            Op::Cli => self.p &= !FLAG_I,
            Op::Sei => self.p |= FLAG_I,
            Op::Rti => {
                self.p = self.pull(bus);
                let lo = self.pull(bus);
                let hi = self.pull(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            Op::Wai => return StepResult::WaitForInterrupt(cycles),
            Op::Hlt => return StepResult::Halt(cycles),
        }
        StepResult::Executed(cycles)
    }

    fn take_interrupt(&mut self, bus: &mut CpuBus<'_>, kind: InterruptKind) {
        let [lo, hi] = self.pc.to_le_bytes();
        self.push(bus, hi);
        self.push(bus, lo);
        self.push(bus, self.p);
        self.p |= FLAG_I;
        let vector = match kind {
            InterruptKind::Irq => IRQ_VECTOR,
            InterruptKind::Nmi => NMI_VECTOR,
        };
        self.pc = Self::read_vector(bus, vector);
    }

    fn irq_ack_cycles(&self, _kind: InterruptKind) -> u32 {
        INTERRUPT_CYCLES
    }

    fn interrupts_enabled(&self) -> bool {
        self.p & FLAG_I == 0
    }

    fn pc(&self) -> u64 {
        u64::from(self.pc)
    }

    fn registers(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("a", u64::from(self.a)),
            ("sp", u64::from(self.sp)),
            ("p", u64::from(self.p)),
            ("pc", u64::from(self.pc)),
        ]
    }

    fn visit_state(&mut self, visitor: &mut dyn StateVisitor) {
        visitor.item("a", StateItem::U8(&mut self.a));
        visitor.item("sp", StateItem::U8(&mut self.sp));
        visitor.item("p", StateItem::U8(&mut self.p));
        visitor.item("pc", StateItem::U16(&mut self.pc));
    }
}
