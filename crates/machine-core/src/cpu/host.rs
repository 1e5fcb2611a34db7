use log::{debug, trace, warn};

use super::{CpuBus, CpuConfig, CpuCore, CpuRunState, IllegalOpcodePolicy, InterruptKind, StepResult};
use crate::device::{Device, Executor, SlotInfo};
use crate::state::StateItem;
use crate::{ConfigError, DeviceId, LineId, Machine, RuntimeFault, StateVisitor, TraceEvent};

const LOG_TARGET: &str = "machine_core::cpu";

/// Execution counters kept by the CPU wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuStats {
    /// Instructions retired.
    pub instructions: u64,
    /// Interrupts accepted.
    pub interrupts: u64,
    /// Undefined opcodes encountered.
    pub illegal_opcodes: u64,
}

enum Advance {
    Cycles(u32),
    Idle,
}

/// A [`CpuCore`] packaged as an executing device.
#[derive(Debug)]
pub struct Cpu<C> {
    tag: String,
    config: CpuConfig,
    core: C,
    run_state: CpuRunState,
    id: Option<DeviceId>,
    /// Cycles of the last instruction that did not fit the previous slice.
    debt: u64,
    nmi_seen: bool,
    stats: CpuStats,
}

impl<C: CpuCore> Cpu<C> {
    /// Wraps `core`.
    pub fn new(tag: impl Into<String>, core: C, config: CpuConfig) -> Self {
        Self {
            tag: tag.into(),
            config,
            core,
            run_state: CpuRunState::Reset,
            id: None,
            debt: 0,
            nmi_seen: false,
            stats: CpuStats::default(),
        }
    }

    /// The instruction-set core.
    #[must_use]
    pub const fn core(&self) -> &C {
        &self.core
    }

    /// Mutable access to the core, for loaders and debuggers.
    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    /// Current run state.
    #[must_use]
    pub const fn run_state(&self) -> CpuRunState {
        self.run_state
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Execution counters.
    #[must_use]
    pub const fn stats(&self) -> CpuStats {
        self.stats
    }

    /// Program counter of the core.
    #[must_use]
    pub fn pc(&self) -> u64 {
        self.core.pc()
    }

    fn accept(&mut self, bus: &mut CpuBus<'_>, line: LineId, kind: InterruptKind) -> Advance {
        let time = bus.now();
        bus.machine().acknowledge_line(line);
        self.core.take_interrupt(bus, kind);
        self.run_state = CpuRunState::Running;
        self.stats.interrupts += 1;
        if let Some(device) = self.id {
            bus.machine().emit(TraceEvent::InterruptTaken { time, device, kind });
        }
        debug!(
            target: LOG_TARGET,
            "`{}` took {kind:?} at {time}, vector to {:#x}",
            self.tag,
            self.core.pc()
        );
        Advance::Cycles(self.core.irq_ack_cycles(kind))
    }

    /// Samples the inputs, then runs the reset sequence, an interrupt
    /// acknowledge, or one instruction.
    fn advance(&mut self, machine: &mut Machine) -> Advance {
        let Some(program) = self.config.program.get() else {
            return Advance::Idle;
        };
        let opcodes = self.config.opcodes.get().unwrap_or(program);
        let inputs = self.config.inputs;

        if inputs.reset.get().is_some_and(|line| machine.line_level(line)) {
            if self.run_state != CpuRunState::Reset {
                debug!(target: LOG_TARGET, "`{}` held in reset", self.tag);
                self.run_state = CpuRunState::Reset;
            }
            return Advance::Idle;
        }

        let mut bus = CpuBus::new(machine, program, opcodes);
        if self.run_state == CpuRunState::Reset {
            let cycles = self.core.reset(&mut bus);
            self.run_state = CpuRunState::Running;
            self.nmi_seen = false;
            debug!(
                target: LOG_TARGET,
                "`{}` reset, starting at {:#x}",
                self.tag,
                self.core.pc()
            );
            return Advance::Cycles(cycles);
        }

        if inputs.halt.get().is_some_and(|line| bus.machine().line_active(line)) {
            return Advance::Idle;
        }

        if let Some(line) = inputs.nmi.get() {
            let level = bus.machine().line_active(line);
            let rising = level && !self.nmi_seen;
            self.nmi_seen = level;
            if rising {
                return self.accept(&mut bus, line, InterruptKind::Nmi);
            }
        }

        if let Some(line) = inputs.irq.get() {
            if bus.machine().line_active(line) {
                if self.core.interrupts_enabled() {
                    return self.accept(&mut bus, line, InterruptKind::Irq);
                }
                if self.run_state == CpuRunState::WaitingForInterrupt {
                    self.run_state = CpuRunState::Running;
                }
            }
        }

        if self.run_state.is_idle() {
            return Advance::Idle;
        }

        let pc = self.core.pc();
        let result = self.core.step(&mut bus);
        match result {
            StepResult::Executed(_) => {}
            StepResult::Halt(_) => {
                debug!(target: LOG_TARGET, "`{}` halted at {pc:#x}", self.tag);
                self.run_state = CpuRunState::Halted;
            }
            StepResult::WaitForInterrupt(_) => {
                trace!(target: LOG_TARGET, "`{}` waiting for interrupt at {pc:#x}", self.tag);
                self.run_state = CpuRunState::WaitingForInterrupt;
            }
            StepResult::Illegal { opcode, .. } => {
                self.stats.illegal_opcodes += 1;
                match self.config.illegal_opcode_policy {
                    IllegalOpcodePolicy::Nop => {
                        trace!(target: LOG_TARGET, "`{}` illegal opcode {opcode:#x} at {pc:#x}", self.tag);
                    }
                    IllegalOpcodePolicy::Diagnose => {
                        warn!(target: LOG_TARGET, "`{}` illegal opcode {opcode:#x} at {pc:#x}", self.tag);
                        bus.machine().record_fault(RuntimeFault::IllegalOpcode);
                    }
                }
            }
        }
        self.stats.instructions += 1;
        Advance::Cycles(result.cycles())
    }
}

impl<C: CpuCore> Device for Cpu<C> {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn clock_hz(&self) -> u32 {
        self.config.clock_hz
    }

    fn interface(&self) -> Vec<SlotInfo> {
        vec![
            self.config.program.info(),
            self.config.opcodes.info(),
            self.config.inputs.irq.info(),
            self.config.inputs.nmi.info(),
            self.config.inputs.reset.info(),
            self.config.inputs.halt.info(),
        ]
    }

    fn start(&mut self, _machine: &mut Machine, id: DeviceId) -> Result<(), ConfigError> {
        if self.config.clock_hz == 0 {
            return Err(ConfigError::InvalidClock {
                device: self.tag.clone(),
            });
        }
        self.id = Some(id);
        Ok(())
    }

    fn reset(&mut self, _machine: &mut Machine) {
        self.run_state = CpuRunState::Reset;
        self.debt = 0;
        self.nmi_seen = false;
    }

    fn visit_state(&mut self, visitor: &mut dyn StateVisitor) {
        self.core.visit_state(visitor);
        let mut run_state = self.run_state.as_u8();
        visitor.item("run_state", StateItem::U8(&mut run_state));
        match CpuRunState::from_u8(run_state) {
            Some(state) => self.run_state = state,
            None => visitor.reject("run_state"),
        }
        visitor.item("debt", StateItem::U64(&mut self.debt));
        visitor.item("nmi_seen", StateItem::Bool(&mut self.nmi_seen));
        visitor.item("instructions", StateItem::U64(&mut self.stats.instructions));
        visitor.item("interrupts", StateItem::U64(&mut self.stats.interrupts));
    }

    fn as_executor(&mut self) -> Option<&mut dyn Executor> {
        Some(self)
    }
}

impl<C: CpuCore> Executor for Cpu<C> {
    fn execute(&mut self, machine: &mut Machine, budget: u64) -> u64 {
        if self.debt >= budget {
            self.debt -= budget;
            machine.consume_cycles(budget);
            return budget;
        }
        let mut ran = std::mem::take(&mut self.debt);
        machine.consume_cycles(ran);

        while ran < budget && !machine.timeslice_aborted() {
            match self.advance(machine) {
                Advance::Cycles(cycles) => {
                    let cycles = u64::from(cycles.max(1));
                    let room = budget - ran;
                    if cycles > room {
                        self.debt = cycles - room;
                        machine.consume_cycles(room);
                        ran = budget;
                    } else {
                        machine.consume_cycles(cycles);
                        ran += cycles;
                    }
                }
                Advance::Idle => {
                    machine.consume_cycles(budget - ran);
                    ran = budget;
                }
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::Cpu;
    use crate::cpu::{Acc8, CpuConfig, CpuRunState, IllegalOpcodePolicy};
    use crate::memory::{Handler, SpaceConfig};
    use crate::{EmuTime, LineAction, LineKind, Machine};

    const CLOCK: u32 = 1_000_000;

    fn rom_with(program: &[u8]) -> Vec<u8> {
        let mut rom = vec![0_u8; 0x1000];
        rom[..program.len()].copy_from_slice(program);
        // Reset vector -> 0xF000, IRQ vector -> 0xF800.
        rom[0xFFC] = 0x00;
        rom[0xFFD] = 0xF0;
        rom[0xFFE] = 0x00;
        rom[0xFFF] = 0xF8;
        rom[0x800] = 0x40; // RTI
        rom
    }

    fn boot(
        program: &[u8],
        configure: impl FnOnce(&mut Machine, CpuConfig) -> CpuConfig,
    ) -> (Machine, crate::DeviceId) {
        let mut machine = Machine::new();
        let space = machine.add_space(SpaceConfig::default()).expect("space");
        let ram = machine.add_ram("ram", 0x1000);
        let rom = machine.add_rom("rom", rom_with(program));
        machine
            .install_handler(space, 0x0000, 0x0FFF, Handler::Ram { region: ram, base: 0 })
            .expect("ram");
        machine
            .install_read(space, 0xF000, 0xFFFF, Handler::Rom { region: rom, base: 0 })
            .expect("rom");
        let config = configure(&mut machine, CpuConfig::new(CLOCK).with_program(space));
        let id = machine.add_device(Cpu::new("maincpu", Acc8::new(), config)).expect("cpu");
        machine.start().expect("starts");
        (machine, id)
    }

    #[test]
    fn slices_never_overrun_their_budget() {
        // JMP $F000 loops forever at 3 cycles an iteration.
        let (mut machine, id) = boot(&[0x4C, 0x00, 0xF0], |_, c| c);
        machine.run_for(EmuTime::from_micros(10)).expect("runs");
        assert_eq!(machine.device_time(id), Some(EmuTime::from_micros(10)));
        machine.run_for(EmuTime::from_nanos(4_500)).expect("runs");
        assert_eq!(machine.device_time(id), Some(EmuTime::from_micros(14)));
    }

    #[test]
    fn halt_stops_fetching() {
        let (mut machine, id) = boot(&[0xA9, 0x01, 0xDB], |_, c| c);
        machine.run_for(EmuTime::from_micros(100)).expect("runs");
        let cpu = machine.device::<Cpu<Acc8>>(id).expect("cpu");
        assert_eq!(cpu.run_state(), CpuRunState::Halted);
        assert_eq!(cpu.core().a(), 1);
        assert_eq!(cpu.stats().instructions, 2);
    }

    #[test]
    fn illegal_opcodes_follow_the_policy() {
        let (mut loud, _) = boot(&[0x02, 0xDB], |_, c| {
            c.with_illegal_opcode_policy(IllegalOpcodePolicy::Diagnose)
        });
        loud.run_for(EmuTime::from_micros(50)).expect("runs");
        assert_eq!(loud.diagnostics().illegal_opcodes, 1);

        let (mut quiet, id) = boot(&[0x02, 0xDB], |_, c| c);
        quiet.run_for(EmuTime::from_micros(50)).expect("runs");
        assert_eq!(quiet.diagnostics().illegal_opcodes, 0);
        assert_eq!(
            quiet.device::<Cpu<Acc8>>(id).map(|c| c.stats().illegal_opcodes),
            Some(1)
        );
    }

    #[test]
    fn wait_for_interrupt_wakes_on_irq() {
        // CLI; WAI; LDA #$07; HLT
        let program = [0x58, 0xCB, 0xA9, 0x07, 0xDB];
        let (mut machine, id) = boot(&program, |machine, c| {
            let irq = machine.add_line("irq", LineKind::Level);
            c.with_irq(irq)
        });
        let line = crate::LineId(0);

        machine.run_for(EmuTime::from_micros(40)).expect("runs");
        assert_eq!(
            machine.device::<Cpu<Acc8>>(id).map(Cpu::run_state),
            Some(CpuRunState::WaitingForInterrupt)
        );

        machine.set_line(line, LineAction::Hold);
        machine.run_for(EmuTime::from_micros(40)).expect("runs");
        let cpu = machine.device::<Cpu<Acc8>>(id).expect("cpu");
        assert_eq!(cpu.stats().interrupts, 1);
        assert_eq!(cpu.run_state(), CpuRunState::Halted);
        assert_eq!(cpu.core().a(), 0x07);
        assert!(!machine.line_level(line));
    }
}
