//! Line notifications and CPU interrupt servicing.

use std::cell::RefCell;
use std::rc::Rc;

use log as _;
use machine_core::{
    Acc8, Cpu, CpuConfig, DeviceId, EmuTime, Handler, IntervalTimer, IntervalTimerConfig,
    InterruptKind, LineAction, LineId, LineKind, LineSink, Machine, SpaceConfig, SpaceId,
    TraceEvent, TraceLog,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const CLOCK: u32 = 1_000_000;
const TIMER_BASE: u64 = 0x8000;

/// ROM image for 0xF000..=0xFFFF: `program` at 0xF000, `handler` at 0xF800,
/// reset vector to 0xF000, IRQ and NMI vectors to 0xF800.
fn rom(program: &[u8], handler: &[u8]) -> Vec<u8> {
    let mut image = vec![0_u8; 0x1000];
    image[..program.len()].copy_from_slice(program);
    image[0x800..0x800 + handler.len()].copy_from_slice(handler);
    for vector in [0xFFA, 0xFFE] {
        image[vector] = 0x00;
        image[vector + 1] = 0xF8;
    }
    image[0xFFC] = 0x00;
    image[0xFFD] = 0xF0;
    image
}

struct Board {
    machine: Machine,
    space: SpaceId,
    cpu: DeviceId,
    irq: LineId,
    nmi: LineId,
}

fn board(program: &[u8], handler: &[u8], with_timer: bool) -> Board {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut machine = Machine::new();
    let space = machine.add_space(SpaceConfig::default()).expect("space");
    let ram = machine.add_ram("ram", 0x1000);
    let rom = machine.add_rom("rom", rom(program, handler));
    machine
        .install_handler(space, 0x0000, 0x0FFF, Handler::Ram { region: ram, base: 0 })
        .expect("ram");
    machine
        .install_read(space, 0xF000, 0xFFFF, Handler::Rom { region: rom, base: 0 })
        .expect("rom");
    let irq = machine.add_line("irq", LineKind::Level);
    let nmi = machine.add_line("nmi", LineKind::Edge);
    if with_timer {
        let timer = machine
            .add_device(IntervalTimer::new("pit", IntervalTimerConfig::default()).with_irq(irq))
            .expect("timer");
        machine
            .install_handler(space, TIMER_BASE, TIMER_BASE + 7, Handler::Device(timer))
            .expect("timer mapped");
    }
    let config = CpuConfig::new(CLOCK)
        .with_program(space)
        .with_irq(irq)
        .with_nmi(nmi);
    let cpu = machine.add_device(Cpu::new("maincpu", Acc8::new(), config)).expect("cpu");
    machine.start().expect("starts");
    Board {
        machine,
        space,
        cpu,
        irq,
        nmi,
    }
}

fn stats(board: &Board) -> machine_core::CpuStats {
    board
        .machine
        .device::<Cpu<Acc8>>(board.cpu)
        .map(Cpu::stats)
        .expect("cpu present")
}

#[test]
fn timer_irq_raised_mid_slice_is_taken_before_the_next_opcode() {
    // Program the interval timer for 20 cycles, one-shot with IRQ, then spin.
    let program = [
        0xA9, 0x14, // LDA #20
        0x8D, 0x02, 0x80, // STA RELOAD_LO
        0xA9, 0x00, // LDA #0
        0x8D, 0x03, 0x80, // STA RELOAD_HI
        0xA9, 0x05, // LDA #ENABLE|IRQ_ENABLE
        0x8D, 0x00, 0x80, // STA CONTROL
        0x58, // CLI
        0x4C, 0x10, 0xF0, // JMP $F010
    ];
    // Read STATUS into RAM, then return.
    let handler = [0xAD, 0x01, 0x80, 0x8D, 0x20, 0x00, 0x40];
    let mut board = board(&program, &handler, true);
    let log = TraceLog::new();
    board.machine.set_trace_sink(Some(Box::new(log.clone())));

    board.machine.run_for(EmuTime::from_micros(200)).expect("runs");

    let events = log.events();
    let fired = events
        .iter()
        .find_map(|event| match event {
            TraceEvent::TimerFired { time, .. } => Some(*time),
            _ => None,
        })
        .expect("timer fired");
    let taken: Vec<EmuTime> = events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::InterruptTaken {
                time,
                kind: InterruptKind::Irq,
                ..
            } => Some(*time),
            _ => None,
        })
        .collect();
    assert_eq!(taken.len(), 1);
    assert!(taken[0] >= fired);
    assert!(taken[0] <= fired.saturating_add(EmuTime::from_micros(3)));

    assert_eq!(stats(&board).interrupts, 1);
    assert!(!board.machine.line_level(board.irq));
    assert_eq!(board.machine.read_u8(board.space, 0x0020), 0x01);
}

#[test]
fn held_interval_irq_drops_after_the_hold_time() {
    // CLI; spin. The handler burns 80 cycles before returning, longer than the
    // 21 us hold, so the IRQ is serviced once.
    let program = [0x58, 0x4C, 0x01, 0xF0];
    let handler = [0xA9, 0xF0, 0x1A, 0xD0, 0xFD, 0x40];
    let mut machine = Machine::new();
    let space = machine.add_space(SpaceConfig::default()).expect("space");
    let ram = machine.add_ram("ram", 0x1000);
    let image = machine.add_rom("rom", rom(&program, &handler));
    machine
        .install_handler(space, 0x0000, 0x0FFF, Handler::Ram { region: ram, base: 0 })
        .expect("ram");
    machine
        .install_read(space, 0xF000, 0xFFFF, Handler::Rom { region: image, base: 0 })
        .expect("rom");
    let irq = machine.add_line("irq", LineKind::Level);
    let timer = machine
        .add_device(
            IntervalTimer::new(
                "custom54",
                IntervalTimerConfig {
                    clock_hz: CLOCK,
                    irq_hold: Some(EmuTime::from_micros(21)),
                },
            )
            .with_irq(irq),
        )
        .expect("timer");
    machine
        .install_handler(space, TIMER_BASE, TIMER_BASE + 7, Handler::Device(timer))
        .expect("mapped");
    let cpu = machine
        .add_device(Cpu::new(
            "maincpu",
            Acc8::new(),
            CpuConfig::new(CLOCK).with_program(space).with_irq(irq),
        ))
        .expect("cpu");
    machine.start().expect("starts");

    machine.write_u8(space, TIMER_BASE + 2, 100);
    machine.write_u8(space, TIMER_BASE + 3, 0);
    machine.write_u8(space, TIMER_BASE, 0x05);
    machine.run_for(EmuTime::from_micros(110)).expect("runs");
    assert!(machine.line_level(irq));

    machine.run_for(EmuTime::from_micros(40)).expect("runs");
    assert!(!machine.line_level(irq));
    let cpu = machine.device::<Cpu<Acc8>>(cpu).expect("cpu");
    assert_eq!(cpu.stats().interrupts, 1);
}

#[test]
fn interrupt_acknowledge_costs_its_fixed_cycles() {
    // CLI; WAI; HLT. The handler stores A to a probe that records its time.
    let mut board = board(&[0x58, 0xCB, 0xDB], &[0x8D, 0x00, 0x20, 0x40], false);
    let probe = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&probe);
    let callback = board.machine.add_write_callback(move |machine, _, _| {
        seen.borrow_mut().push(machine.now());
    });
    board
        .machine
        .install_write(board.space, 0x2000, 0x2000, Handler::Write(callback))
        .expect("probe");
    let log = TraceLog::new();
    board.machine.set_trace_sink(Some(Box::new(log.clone())));

    board.machine.run_for(EmuTime::from_micros(30)).expect("runs");
    board.machine.set_line(board.irq, LineAction::Hold);
    board.machine.run_for(EmuTime::from_micros(30)).expect("runs");

    let taken = log
        .events()
        .iter()
        .find_map(|event| match event {
            TraceEvent::InterruptTaken { time, .. } => Some(*time),
            _ => None,
        })
        .expect("interrupt taken");
    assert_eq!(*probe.borrow(), vec![taken.saturating_add(EmuTime::from_micros(7))]);
}

#[test]
fn nmi_is_taken_once_per_rising_edge() {
    // Spin; the handler returns straight away.
    let mut board = board(&[0x4C, 0x00, 0xF0], &[0x40], false);
    board.machine.run_for(EmuTime::from_micros(20)).expect("runs");

    board.machine.set_line(board.nmi, LineAction::Assert);
    board.machine.run_for(EmuTime::from_micros(50)).expect("runs");
    assert_eq!(stats(&board).interrupts, 1);

    board.machine.set_line(board.nmi, LineAction::Clear);
    board.machine.run_for(EmuTime::from_micros(10)).expect("runs");
    board.machine.set_line(board.nmi, LineAction::Assert);
    board.machine.run_for(EmuTime::from_micros(10)).expect("runs");
    assert_eq!(stats(&board).interrupts, 2);
}

#[rstest]
#[case(LineAction::Assert, true)]
#[case(LineAction::Hold, false)]
#[case(LineAction::Pulse, false)]
fn acknowledge_drops_only_latched_assertions(#[case] action: LineAction, #[case] stays: bool) {
    let mut machine = Machine::new();
    let line = machine.add_line("int", LineKind::Level);
    machine.start().expect("starts");

    machine.set_line(line, action);
    machine.acknowledge_line(line);
    assert_eq!(machine.line_level(line), stays);
}

#[test]
fn pulses_release_after_the_configured_width() {
    let mut machine = Machine::new();
    let line = machine.add_line("strobe", LineKind::Edge);
    let edges = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&edges);
    let callback = machine.add_line_callback(move |machine, _, level| {
        seen.borrow_mut().push((machine.now(), level));
    });
    machine
        .subscribe_line(line, LineSink::Callback(callback))
        .expect("subscribed");
    machine.start().expect("starts");

    machine.set_line(line, LineAction::Pulse);
    machine.run_for(EmuTime::from_millis(1)).expect("runs");
    let width = machine.config().pulse_width;
    assert_eq!(*edges.borrow(), vec![(EmuTime::ZERO, true), (width, false)]);
}

fn action_strategy() -> impl Strategy<Value = LineAction> {
    prop_oneof![
        Just(LineAction::Clear),
        Just(LineAction::Assert),
        Just(LineAction::Hold),
    ]
}

proptest! {
    #[test]
    fn subscribers_see_one_notification_per_level_change(
        actions in proptest::collection::vec(action_strategy(), 1..48),
    ) {
        let mut machine = Machine::new();
        let line = machine.add_line("irq", LineKind::Level);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);
        let callback = machine.add_line_callback(move |_, _, level| seen.borrow_mut().push(level));
        machine
            .subscribe_line(line, LineSink::Callback(callback))
            .expect("subscribed");
        machine.start().expect("starts");

        let mut level = false;
        let mut expected = Vec::new();
        for action in actions {
            machine.set_line(line, action);
            let next = action != LineAction::Clear;
            if next != level {
                expected.push(next);
                level = next;
            }
        }
        prop_assert_eq!(calls.borrow().clone(), expected);
    }

    #[test]
    fn cpu_time_tracks_machine_time_within_one_cycle(
        steps in proptest::collection::vec(1_u64..250_000, 1..12),
    ) {
        let mut board = board(&[0x4C, 0x00, 0xF0], &[0x40], false);
        for nanos in steps {
            board.machine.run_for(EmuTime::from_nanos(nanos)).expect("runs");
            let now = board.machine.now();
            let local = board.machine.device_time(board.cpu).expect("cpu time");
            prop_assert!(local <= now);
            prop_assert!(now.saturating_sub(local) < EmuTime::from_micros(1));
        }
    }
}
