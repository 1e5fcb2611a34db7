//! Throughput harness for the scheduling and dispatch kernel.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p machine-core --release --example performance_harness
//! ```
//!
//! ## Metrics
//!
//! - Instructions per second across all threads
//! - Emulated cycles per second
//! - Real-time factor: how many 1 MHz machines one thread keeps at full speed
//!
//! Every thread builds and runs its own machines; a machine is never shared.

#![allow(clippy::pedantic)]

use machine_core::{
    Acc8, Cpu, CpuConfig, DeviceId, EmuTime, Handler, IntervalTimer, IntervalTimerConfig,
    LineKind, Machine, SpaceConfig,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const CLOCK_HZ: u32 = 1_000_000;
const FRAME: EmuTime = EmuTime::from_millis(10);
const NUM_THREADS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct BenchmarkResult {
    name: &'static str,
    instructions_per_second: f64,
    cycles_per_second: f64,
    realtime_factor: f64,
}

/// Builds a machine running `program` from 0xF000 with an IRQ handler at
/// 0xF800 and an interval timer at 0x8000.
fn machine(program: &[u8]) -> (Machine, DeviceId) {
    // Acknowledge the timer, return.
    let handler = [0xAD, 0x01, 0x80, 0x40];
    let mut image = vec![0_u8; 0x1000];
    image[..program.len()].copy_from_slice(program);
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
            CpuConfig::new(CLOCK_HZ).with_program(space).with_irq(irq),
        ))
        .expect("cpu");
    machine.start().expect("starts");
    (machine, cpu)
}

fn run_benchmark(name: &'static str, program: &'static [u8], duration: Duration) -> BenchmarkResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || {
                let (mut machine, cpu) = machine(program);
                let mut frames = 0u64;
                let start = Instant::now();
                while start.elapsed() < duration {
                    machine.run_for(FRAME).expect("runs");
                    frames += 1;
                }
                let instructions = machine
                    .device::<Cpu<Acc8>>(cpu)
                    .map_or(0, |cpu| cpu.stats().instructions);
                let cycles = frames * u64::from(CLOCK_HZ) / 100;
                tx.send((instructions, cycles)).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }
    drop(tx);

    let mut total_instructions = 0u64;
    let mut total_cycles = 0u64;
    for (inst, cyc) in rx {
        total_instructions += inst;
        total_cycles += cyc;
    }

    let elapsed_secs = duration.as_secs_f64();
    let cycles_per_second = total_cycles as f64 / elapsed_secs;
    BenchmarkResult {
        name,
        instructions_per_second: total_instructions as f64 / elapsed_secs,
        cycles_per_second,
        realtime_factor: cycles_per_second / NUM_THREADS as f64 / f64::from(CLOCK_HZ),
    }
}

/// JMP $F000.
const SPIN: &[u8] = &[0x4C, 0x00, 0xF0];

/// Store and reload a RAM byte forever.
const RAM_TRAFFIC: &[u8] = &[
    0xA9, 0x5A, // LDA #$5A
    0x8D, 0x00, 0x01, // STA $0100
    0xAD, 0x00, 0x01, // LDA $0100
    0x4C, 0x02, 0xF0, // JMP $F002
];

/// Interval timer reloading every 16 cycles with IRQs enabled.
const TIMER_HEAVY: &[u8] = &[
    0xA9, 0x10, 0x8D, 0x02, 0x80, // reload = 16
    0xA9, 0x00, 0x8D, 0x03, 0x80, //
    0xA9, 0x07, 0x8D, 0x00, 0x80, // enable, auto-reload, irq
    0x58, // CLI
    0x4C, 0x10, 0xF0, // JMP $F010
];

fn format_number(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2}K", value / 1_000.0)
    } else {
        format!("{value:.2}")
    }
}

fn print_results(results: &[BenchmarkResult]) {
    println!("{:<12} {:>14} {:>14} {:>10}", "benchmark", "instr/s", "cycles/s", "realtime");
    for result in results {
        println!(
            "{:<12} {:>14} {:>14} {:>9.1}x",
            result.name,
            format_number(result.instructions_per_second),
            format_number(result.cycles_per_second),
            result.realtime_factor
        );
    }
}

fn main() {
    env_logger::init();
    let warmup = Duration::from_millis(500);
    let benchmark_duration = Duration::from_secs(3);

    println!("Running warmup for {warmup:?}...");
    let _ = run_benchmark("spin", SPIN, warmup);

    println!("Running benchmarks for {benchmark_duration:?} each...\n");
    let results = [
        run_benchmark("spin", SPIN, benchmark_duration),
        run_benchmark("ram_traffic", RAM_TRAFFIC, benchmark_duration),
        run_benchmark("timer_heavy", TIMER_HEAVY, benchmark_duration),
    ];
    print_results(&results);
}
