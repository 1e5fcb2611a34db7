use crate::memory::{AccessWidth, SpaceId};
use crate::{EmuTime, Machine};

/// A CPU core's view of the machine: its program and opcode spaces.
///
/// Opcode fetches go through the opcode space so encrypted or split
/// program/opcode maps decode correctly; operands and data use the program
/// space.
#[derive(Debug)]
pub struct CpuBus<'a> {
    machine: &'a mut Machine,
    program: SpaceId,
    opcodes: SpaceId,
}

impl<'a> CpuBus<'a> {
    /// Binds a bus view. Pass the program space twice when there is no
    /// separate opcode space.
    pub fn new(machine: &'a mut Machine, program: SpaceId, opcodes: SpaceId) -> Self {
        Self {
            machine,
            program,
            opcodes,
        }
    }

    /// Fetches an opcode byte.
    pub fn read_opcode(&mut self, address: u64) -> u8 {
        self.machine.read_u8(self.opcodes, address)
    }

    /// Fetches an operand byte.
    pub fn read_operand(&mut self, address: u64) -> u8 {
        self.machine.read_u8(self.program, address)
    }

    /// Data read.
    pub fn read(&mut self, address: u64, width: AccessWidth) -> u64 {
        self.machine.read(self.program, address, width)
    }

    /// Data write.
    pub fn write(&mut self, address: u64, width: AccessWidth, value: u64) {
        self.machine.write(self.program, address, width, value);
    }

    /// Byte data read.
    pub fn read_u8(&mut self, address: u64) -> u8 {
        self.machine.read_u8(self.program, address)
    }

    /// Byte data write.
    pub fn write_u8(&mut self, address: u64, value: u8) {
        self.machine.write_u8(self.program, address, value);
    }

    /// The CPU's local time.
    #[must_use]
    pub fn now(&self) -> EmuTime {
        self.machine.now()
    }

    /// The whole machine, for cores that drive lines or ports directly.
    pub fn machine(&mut self) -> &mut Machine {
        self.machine
    }
}
