//! Whole-machine snapshots: layout stability, byte-exact restore, rejection.

use std::cell::RefCell;
use std::rc::Rc;

use log as _;
use machine_core::{
    Acc8, Cpu, CpuConfig, CpuCore, DeviceId, EmuTime, Handler, IntervalTimer, IntervalTimerConfig,
    LineKind, Machine, Snapshot, SpaceConfig, SpaceId, StateError, TimerTarget,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const COUNTER: u64 = 0x0030;

struct Board {
    machine: Machine,
    space: SpaceId,
    cpu: DeviceId,
}

/// A CPU whose IRQ handler counts auto-reloading interval-timer underflows.
fn board() -> Board {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut image = vec![0_u8; 0x1000];
    let program = [
        0xA9, 0x32, 0x8D, 0x02, 0x80, // reload = 50
        0xA9, 0x00, 0x8D, 0x03, 0x80, //
        0xA9, 0x07, 0x8D, 0x00, 0x80, // enable, auto-reload, irq
        0x58, // CLI
        0x4C, 0x10, 0xF0, // JMP $F010
    ];
    let handler = [
        0xAD, 0x30, 0x00, // LDA $0030
        0x1A, // INC
        0x8D, 0x30, 0x00, // STA $0030
        0xAD, 0x01, 0x80, // LDA STATUS
        0x40, // RTI
    ];
    image[..program.len()].copy_from_slice(&program);
    image[0x800..0x800 + handler.len()].copy_from_slice(&handler);
    image[0xFFD] = 0xF0;
    image[0xFFF] = 0xF8;

    let mut machine = Machine::new();
    let space = machine.add_space(SpaceConfig::default()).expect("space");
    let ram = machine.add_ram("ram", 0x1000);
    let rom = machine.add_rom("rom", image);
    machine
        .install_handler(space, 0x0000, 0x0FFF, Handler::Ram { region: ram, base: 0 })
        .expect("ram");
    machine
        .install_read(space, 0xF000, 0xFFFF, Handler::Rom { region: rom, base: 0 })
        .expect("rom");
    let irq = machine.add_line("irq", LineKind::Level);
    let timer = machine
        .add_device(IntervalTimer::new("pit", IntervalTimerConfig::default()).with_irq(irq))
        .expect("timer");
    machine
        .install_handler(space, 0x8000, 0x8007, Handler::Device(timer))
        .expect("timer mapped");
    let cpu = machine
        .add_device(Cpu::new(
            "maincpu",
            Acc8::new(),
            CpuConfig::new(1_000_000).with_program(space).with_irq(irq),
        ))
        .expect("cpu");
    machine.start().expect("starts");
    Board {
        machine,
        space,
        cpu,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Observation {
    time: EmuTime,
    counter: u8,
    registers: Vec<(&'static str, u64)>,
    interrupts: u64,
}

fn observe(board: &mut Board) -> Observation {
    let cpu = board.machine.device::<Cpu<Acc8>>(board.cpu).expect("cpu");
    let registers = cpu.core().registers();
    let interrupts = cpu.stats().interrupts;
    Observation {
        time: board.machine.now(),
        counter: board.machine.read_u8(board.space, COUNTER),
        registers,
        interrupts,
    }
}

#[test]
fn restored_machines_replay_identically() {
    let mut original = board();
    original.machine.run_for(EmuTime::from_micros(537)).expect("runs");
    let snapshot = original.machine.save_state().expect("saves");
    let bytes = snapshot.to_bytes();

    original.machine.run_for(EmuTime::from_micros(1_000)).expect("runs");
    let expected = observe(&mut original);
    assert!(expected.counter >= 25);

    let mut rewound = original;
    rewound.machine.load_state(&snapshot).expect("loads");
    rewound.machine.run_for(EmuTime::from_micros(1_000)).expect("runs");
    assert_eq!(observe(&mut rewound), expected);

    let mut fresh = board();
    let decoded = Snapshot::from_bytes(&bytes).expect("decodes");
    fresh.machine.load_state(&decoded).expect("loads");
    fresh.machine.run_for(EmuTime::from_micros(1_000)).expect("runs");
    assert_eq!(observe(&mut fresh), expected);
}

#[test]
fn layout_is_a_function_of_configuration() {
    let mut first = board();
    let mut second = board();
    second.machine.run_for(EmuTime::from_micros(300)).expect("runs");
    assert_eq!(first.machine.state_layout(), second.machine.state_layout());

    let keys: Vec<String> = first
        .machine
        .state_layout()
        .into_iter()
        .map(|key| key.key)
        .collect();
    assert_eq!(keys.first().map(String::as_str), Some("scheduler/timers"));
    assert!(keys.iter().any(|key| key == "pit/reload"));
    assert!(keys.iter().any(|key| key == "maincpu/pc"));
    assert!(keys.iter().any(|key| key == "region/ram"));
    assert!(!keys.iter().any(|key| key == "region/rom"));
}

#[test]
fn snapshots_from_other_configurations_are_rejected() {
    let mut donor = Machine::new();
    donor.add_ram("ram", 0x10);
    donor.start().expect("starts");
    let foreign = donor.save_state().expect("saves");

    let mut target = board();
    target.machine.run_for(EmuTime::from_micros(200)).expect("runs");
    let before = observe(&mut target);
    let result = target.machine.load_state(&foreign);
    assert!(matches!(result, Err(StateError::LayoutMismatch { .. })));
    assert_eq!(observe(&mut target), before);
}

#[test]
fn damaged_containers_fail_to_decode() {
    let mut board = board();
    let bytes = board.machine.save_state().expect("saves").to_bytes();

    assert_eq!(Snapshot::from_bytes(&bytes[..bytes.len() / 2]), Err(StateError::Truncated));
    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert_eq!(Snapshot::from_bytes(&wrong_magic), Err(StateError::BadMagic));
    let mut wrong_version = bytes;
    wrong_version[4] = 0x7F;
    assert_eq!(
        Snapshot::from_bytes(&wrong_version),
        Err(StateError::VersionMismatch(0x7F))
    );
}

#[test]
fn saving_from_a_callback_is_refused() {
    let mut machine = Machine::new();
    let result = Rc::new(RefCell::new(None));
    let seen = Rc::clone(&result);
    let callback = machine.add_timer_callback(move |machine, _, _| {
        *seen.borrow_mut() = Some(machine.save_state().map(|_| ()));
    });
    machine.start().expect("starts");
    machine.timer_set(EmuTime::from_micros(1), TimerTarget::Callback(callback), 0);
    machine.run_for(EmuTime::from_micros(2)).expect("runs");

    assert_eq!(*result.borrow(), Some(Err(StateError::Busy)));
}

#[rstest]
#[case("line/irq/latch", 9)]
#[case("maincpu/run_state", 7)]
fn rejected_values_roll_the_machine_back(#[case] key: &str, #[case] bad: u8) {
    let mut board = board();
    board.machine.run_for(EmuTime::from_micros(10)).expect("runs");
    let mut snapshot = board.machine.save_state().expect("saves");
    board.machine.run_for(EmuTime::from_micros(40)).expect("runs");
    let before = observe(&mut board);
    let cpu_time = board.machine.device_time(board.cpu);

    let entry = snapshot
        .entries
        .iter_mut()
        .find(|entry| entry.key == key)
        .expect("key saved");
    entry.data = vec![bad];
    assert_eq!(
        board.machine.load_state(&snapshot),
        Err(StateError::Corrupt { key: key.to_owned() })
    );
    assert_eq!(observe(&mut board), before);
    assert_eq!(board.machine.device_time(board.cpu), cpu_time);

    let mut untouched = self::board();
    untouched.machine.run_for(EmuTime::from_micros(10)).expect("runs");
    untouched.machine.run_for(EmuTime::from_micros(40)).expect("runs");
    untouched.machine.run_for(EmuTime::from_micros(500)).expect("runs");
    board.machine.run_for(EmuTime::from_micros(500)).expect("runs");
    assert_eq!(observe(&mut board), observe(&mut untouched));
}
