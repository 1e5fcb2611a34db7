//! Deterministic replay fingerprint used for cross-host comparison.
//!
//! Runs a small board (CPU, interval timer, IRQ line), saves mid-run, and
//! hashes the trace of the remaining run twice: once live and once after
//! restoring the snapshot. Both fingerprints must match on every host.

use machine_core::{
    Acc8, Cpu, CpuConfig, EmuTime, Handler, IntervalTimer, IntervalTimerConfig, LineKind, Machine,
    SpaceConfig, TraceEvent, TraceLog,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn board() -> Machine {
    let program = [
        0xA9, 0x40, 0x8D, 0x02, 0x80, // reload = 64
        0xA9, 0x00, 0x8D, 0x03, 0x80, //
        0xA9, 0x07, 0x8D, 0x00, 0x80, // enable, auto-reload, irq
        0x58, // CLI
        0xA9, 0x00, 0x1A, 0xD0, 0xFD, // count to 256
        0x4C, 0x10, 0xF0, // again
    ];
    let handler = [0xAD, 0x01, 0x80, 0x8D, 0x00, 0x02, 0x40];
    let mut image = vec![0_u8; 0x1000];
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
    machine
        .add_device(Cpu::new(
            "maincpu",
            Acc8::new(),
            CpuConfig::new(1_000_000).with_program(space).with_irq(irq),
        ))
        .expect("cpu");
    machine.start().expect("starts");
    machine
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn hash_events(events: &[TraceEvent]) -> String {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for event in events {
        match *event {
            TraceEvent::TimerFired { time, param, .. } => {
                hash_bytes(&mut hash, &[0x10]);
                hash_bytes(&mut hash, &time.as_attos().to_le_bytes());
                hash_bytes(&mut hash, &param.to_le_bytes());
            }
            TraceEvent::LineChanged { time, level, .. } => {
                hash_bytes(&mut hash, &[0x11, u8::from(level)]);
                hash_bytes(&mut hash, &time.as_attos().to_le_bytes());
            }
            TraceEvent::InterruptTaken { time, .. } => {
                hash_bytes(&mut hash, &[0x12]);
                hash_bytes(&mut hash, &time.as_attos().to_le_bytes());
            }
            TraceEvent::SliceExecuted { start, cycles, .. } => {
                hash_bytes(&mut hash, &[0x13]);
                hash_bytes(&mut hash, &start.as_attos().to_le_bytes());
                hash_bytes(&mut hash, &cycles.to_le_bytes());
            }
            TraceEvent::UnmappedAccess { address, write, .. } => {
                hash_bytes(&mut hash, &[0x14, u8::from(write)]);
                hash_bytes(&mut hash, &address.to_le_bytes());
            }
            TraceEvent::Fault { time, fault } => {
                hash_bytes(&mut hash, &[0x15, fault.as_u8()]);
                hash_bytes(&mut hash, &time.as_attos().to_le_bytes());
            }
        }
    }
    format!("{hash:016x}")
}

fn fingerprint(machine: &mut Machine) -> String {
    let log = TraceLog::new();
    machine.set_trace_sink(Some(Box::new(log.clone())));
    machine.run_for(EmuTime::from_millis(5)).expect("runs");
    machine.set_trace_sink(None);
    hash_events(&log.events())
}

fn main() {
    env_logger::builder().format_timestamp(None).init();

    let mut machine = board();
    machine.run_for(EmuTime::from_millis(2)).expect("runs");
    let snapshot = machine.save_state().expect("saves");
    let live = fingerprint(&mut machine);

    machine.load_state(&snapshot).expect("restores");
    let replayed = fingerprint(&mut machine);

    println!("{live}");
    if live != replayed {
        eprintln!("replay diverged: {replayed}");
        std::process::exit(1);
    }
}
