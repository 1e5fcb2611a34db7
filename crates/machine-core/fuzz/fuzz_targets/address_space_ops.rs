#![no_main]

use libfuzzer_sys::fuzz_target;
use machine_core::{
    AccessWidth, EmuTime, Endianness, Handler, Machine, MapDirection, OpenBus, SpaceConfig,
    TimerTarget,
};

const WIDTHS: [AccessWidth; 4] = [
    AccessWidth::Byte,
    AccessWidth::Word,
    AccessWidth::DWord,
    AccessWidth::QWord,
];

fuzz_target!(|data: &[u8]| {
    let Some((&header, ops)) = data.split_first() else {
        return;
    };

    let config = SpaceConfig::new("fuzz", 8 + (header & 0x0F))
        .with_endianness(if header & 0x10 == 0 {
            Endianness::Little
        } else {
            Endianness::Big
        })
        .with_open_bus(if header & 0x20 == 0 {
            OpenBus::Constant(header)
        } else {
            OpenBus::LastValue
        });
    let mut machine = Machine::new();
    let Ok(space) = machine.add_space(config) else {
        return;
    };
    let ram = machine.add_ram("ram", 0x400);
    let rom = machine.add_rom("rom", (0..=255).collect());
    let bank = machine.add_bank("bank", true);
    let _ = machine.configure_bank_entries(bank, ram, 0, 4, 0x100);
    let callback = machine.add_read_callback(|_, access| access.address.rotate_left(7));
    let timer = machine.add_timer_callback(move |machine, _, param| {
        let _ = machine.set_bank(bank, usize::from(param.to_le_bytes()[0] & 3));
    });
    if machine.start().is_err() {
        return;
    }

    for op in ops.chunks_exact(6) {
        let address = u64::from(u16::from_le_bytes([op[1], op[2]]));
        let end = address.saturating_add(u64::from(op[3]));
        let width = WIDTHS[usize::from(op[4] & 3)];
        let value = u64::from(op[5]).wrapping_mul(0x0101_0101_0101_0101);
        match op[0] % 10 {
            0 => {
                let ram = Handler::Ram { region: ram, base: 0 };
                let _ = machine.install_handler(space, address, end, ram);
            }
            1 => {
                let rom = Handler::Rom { region: rom, base: 0 };
                let _ = machine.install_read(space, address, end, rom);
            }
            2 => {
                let _ = machine.install_handler(space, address, end, Handler::Bank(bank));
            }
            3 => {
                let _ = machine.install_read(space, address, end, Handler::Read(callback));
            }
            4 => {
                let _ = machine.install_mirrored(
                    space,
                    MapDirection::ReadWrite,
                    address,
                    end,
                    u64::from(op[5]),
                    Handler::Unmapped,
                );
            }
            5 => {
                let _ = machine.set_bank(bank, usize::from(op[5] & 7));
            }
            6 => {
                let _ = machine.read(space, address, width);
            }
            7 => machine.write(space, address, width, value),
            8 => {
                let _ = machine.peek(space, address, width);
                let _ = machine.poke(space, address, width, value);
            }
            _ => {
                machine.timer_set(
                    EmuTime::from_nanos(u64::from(op[5])),
                    TimerTarget::Callback(timer),
                    u64::from(op[1]),
                );
                let _ = machine.run_for(EmuTime::from_nanos(u64::from(op[3])));
            }
        }
    }
});
