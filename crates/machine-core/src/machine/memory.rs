//! Bus dispatch: resolving accesses through handler tables.

use log::{debug, trace, warn};

use super::Machine;
use crate::memory::map::Span;
use crate::memory::{Access, AccessWidth, Endianness, Handler, OpenBus, Segment, SpaceId};
use crate::slots::SlotError;
use crate::{RegionId, RuntimeFault, TraceEvent};

const LOG_TARGET: &str = "machine_core::memory";

impl Machine {
    /// Reads `width` bytes at `address` of `space`.
    ///
    /// Never fails: unmapped or refused accesses return the space's open-bus
    /// value and are recorded in the diagnostics.
    pub fn read(&mut self, space: SpaceId, address: u64, width: AccessWidth) -> u64 {
        let Some(target) = self.spaces.get(space.0 as usize) else {
            warn!(target: LOG_TARGET, "read from unknown space #{}", space.0);
            return OpenBus::default().value(width, 0);
        };
        let mask = target.address_mask();
        let address = address & mask;
        let last = address.wrapping_add(width.bytes() - 1) & mask;

        match target.read_table().span(address, last) {
            Span::Within(segment) => match self.read_segment(space, segment, address, width) {
                Some(value) => {
                    let value = value & width.mask();
                    if let Some(target) = self.spaces.get_mut(space.0 as usize) {
                        target.set_last_value(value);
                    }
                    value
                }
                None => self.open_bus(space, width),
            },
            Span::Unmapped => {
                self.unmapped(space, address, false);
                self.open_bus(space, width)
            }
            Span::Split => {
                let endianness = target.config().endianness;
                let bytes: Vec<u8> = (0..width.bytes())
                    .map(|index| {
                        let byte = self.read(space, address.wrapping_add(index) & mask, AccessWidth::Byte);
                        u8::try_from(byte & 0xFF).unwrap_or(u8::MAX)
                    })
                    .collect();
                endianness.compose(width, &bytes)
            }
        }
    }

    /// Writes `width` bytes of `value` at `address` of `space`.
    pub fn write(&mut self, space: SpaceId, address: u64, width: AccessWidth, value: u64) {
        let Some(target) = self.spaces.get(space.0 as usize) else {
            warn!(target: LOG_TARGET, "write to unknown space #{}", space.0);
            return;
        };
        let mask = target.address_mask();
        let address = address & mask;
        let last = address.wrapping_add(width.bytes() - 1) & mask;
        let value = value & width.mask();

        match target.write_table().span(address, last) {
            Span::Within(segment) => {
                if let Some(target) = self.spaces.get_mut(space.0 as usize) {
                    target.set_last_value(value);
                }
                self.write_segment(space, segment, address, width, value);
            }
            Span::Unmapped => self.unmapped(space, address, true),
            Span::Split => {
                let endianness = target.config().endianness;
                for index in 0..width.bytes() {
                    let byte = endianness.byte_at(width, value, index);
                    self.write(
                        space,
                        address.wrapping_add(index) & mask,
                        AccessWidth::Byte,
                        u64::from(byte),
                    );
                }
            }
        }
    }

    /// Byte read.
    pub fn read_u8(&mut self, space: SpaceId, address: u64) -> u8 {
        u8::try_from(self.read(space, address, AccessWidth::Byte) & 0xFF).unwrap_or(u8::MAX)
    }

    /// Byte write.
    pub fn write_u8(&mut self, space: SpaceId, address: u64, value: u8) {
        self.write(space, address, AccessWidth::Byte, u64::from(value));
    }

    /// Debugger read: resolves direct memory and banks through the read
    /// table without invoking callbacks, devices, or diagnostics. Anything
    /// else reads as open bus.
    #[must_use]
    pub fn peek(&self, space: SpaceId, address: u64, width: AccessWidth) -> u64 {
        let Some(target) = self.spaces.get(space.0 as usize) else {
            return OpenBus::default().value(width, 0);
        };
        let mask = target.address_mask();
        let address = address & mask;
        let last = address.wrapping_add(width.bytes() - 1) & mask;
        let endianness = target.config().endianness;
        let floating = target.config().open_bus.value(width, target.last_value());

        match target.read_table().span(address, last) {
            Span::Within(segment) => self
                .direct_target(segment, address)
                .and_then(|(region, offset, _)| self.region_read(region, offset, width, endianness))
                .unwrap_or(floating),
            Span::Unmapped => floating,
            Span::Split => {
                let bytes: Vec<u8> = (0..width.bytes())
                    .map(|index| {
                        let byte = self.peek(space, address.wrapping_add(index) & mask, AccessWidth::Byte);
                        u8::try_from(byte & 0xFF).unwrap_or(u8::MAX)
                    })
                    .collect();
                endianness.compose(width, &bytes)
            }
        }
    }

    /// Debugger write: stores into whatever direct memory or bank the read
    /// table shows at `address`, ROM included. Returns `false` if any byte had
    /// no backing memory.
    pub fn poke(&mut self, space: SpaceId, address: u64, width: AccessWidth, value: u64) -> bool {
        let Some(target) = self.spaces.get(space.0 as usize) else {
            return false;
        };
        let mask = target.address_mask();
        let address = address & mask;
        let last = address.wrapping_add(width.bytes() - 1) & mask;
        let endianness = target.config().endianness;

        match target.read_table().span(address, last) {
            Span::Within(segment) => match self.direct_target(segment, address) {
                Some((region, offset, _)) => {
                    self.region_write(region, offset, width, endianness, value)
                }
                None => false,
            },
            Span::Unmapped => false,
            Span::Split => (0..width.bytes())
                .map(|index| {
                    let byte = endianness.byte_at(width, value, index);
                    self.poke(
                        space,
                        address.wrapping_add(index) & mask,
                        AccessWidth::Byte,
                        u64::from(byte),
                    )
                })
                .fold(true, |all, stored| all && stored),
        }
    }

    /// Region, offset, and writability behind a direct-memory segment.
    fn direct_target(&self, segment: Segment, address: u64) -> Option<(RegionId, u64, bool)> {
        let offset = segment.offset(address);
        match segment.entry.handler {
            Handler::Ram { region, base } => Some((region, base.wrapping_add(offset), true)),
            Handler::Rom { region, base } => Some((region, base.wrapping_add(offset), false)),
            Handler::Bank(bank) => {
                let bank = self.banks.get(bank.0 as usize)?;
                let entry = bank.target()?;
                Some((entry.region, entry.offset.wrapping_add(offset), bank.writable()))
            }
            _ => None,
        }
    }

    fn region_read(
        &self,
        region: RegionId,
        offset: u64,
        width: AccessWidth,
        endianness: Endianness,
    ) -> Option<u64> {
        let bytes = self.regions.get(region)?.slice(offset, width.bytes())?;
        Some(endianness.compose(width, bytes))
    }

    fn region_write(
        &mut self,
        region: RegionId,
        offset: u64,
        width: AccessWidth,
        endianness: Endianness,
        value: u64,
    ) -> bool {
        let Some(bytes) = self
            .regions
            .get_mut(region)
            .and_then(|region| region.slice_mut(offset, width.bytes()))
        else {
            return false;
        };
        for (index, byte) in (0_u64..).zip(bytes.iter_mut()) {
            *byte = endianness.byte_at(width, value, index);
        }
        true
    }

    fn endianness(&self, space: SpaceId) -> Endianness {
        self.spaces
            .get(space.0 as usize)
            .map_or_else(Endianness::default, |target| target.config().endianness)
    }

    fn open_bus(&self, space: SpaceId, width: AccessWidth) -> u64 {
        self.spaces.get(space.0 as usize).map_or_else(
            || OpenBus::default().value(width, 0),
            |target| target.config().open_bus.value(width, target.last_value()),
        )
    }

    fn unmapped(&mut self, space: SpaceId, address: u64, write: bool) {
        let (name, loud) = self
            .spaces
            .get(space.0 as usize)
            .map_or(("?", true), |target| (target.name(), target.config().log_unmapped));
        let verb = if write { "write to" } else { "read from" };
        if loud {
            warn!(target: LOG_TARGET, "unmapped {verb} `{name}` at {address:#x}");
        } else {
            trace!(target: LOG_TARGET, "unmapped {verb} `{name}` at {address:#x}");
        }
        self.emit(TraceEvent::UnmappedAccess {
            space,
            address,
            write,
        });
        self.record_fault(if write {
            RuntimeFault::UnmappedWrite
        } else {
            RuntimeFault::UnmappedRead
        });
    }

    /// `None` floats the bus.
    fn read_segment(
        &mut self,
        space: SpaceId,
        segment: Segment,
        address: u64,
        width: AccessWidth,
    ) -> Option<u64> {
        let access = Access {
            address,
            offset: segment.offset(address),
            width,
        };
        match segment.entry.handler {
            Handler::Ram { .. } | Handler::Rom { .. } | Handler::Bank(_) => {
                let Some((region, offset, _)) = self.direct_target(segment, address) else {
                    debug!(target: LOG_TARGET, "bank at {address:#x} has no selected entry");
                    self.record_fault(RuntimeFault::BankOutOfRange);
                    return None;
                };
                let value = self.region_read(region, offset, width, self.endianness(space));
                if value.is_none() {
                    debug!(target: LOG_TARGET, "read at {address:#x} runs past its region");
                    self.record_fault(RuntimeFault::BankOutOfRange);
                }
                value
            }
            Handler::Read(id) => match self.read_callbacks.checkout(id.0) {
                Ok(mut callback) => {
                    let value = callback(self, access);
                    self.read_callbacks.checkin(id.0, callback);
                    Some(value)
                }
                Err(err) => {
                    self.refused(err, address);
                    None
                }
            },
            Handler::Device(device) => {
                match self.with_device(device, |device, machine| device.read(machine, access)) {
                    Ok(value) => value,
                    Err(err) => {
                        self.refused(err, address);
                        None
                    }
                }
            }
            Handler::Write(_) | Handler::Nop | Handler::Unmapped => None,
        }
    }

    fn write_segment(
        &mut self,
        space: SpaceId,
        segment: Segment,
        address: u64,
        width: AccessWidth,
        value: u64,
    ) {
        let access = Access {
            address,
            offset: segment.offset(address),
            width,
        };
        match segment.entry.handler {
            Handler::Ram { .. } | Handler::Rom { .. } | Handler::Bank(_) => {
                let Some((region, offset, writable)) = self.direct_target(segment, address) else {
                    debug!(target: LOG_TARGET, "bank at {address:#x} has no selected entry");
                    self.record_fault(RuntimeFault::BankOutOfRange);
                    return;
                };
                if !writable {
                    debug!(target: LOG_TARGET, "write of {value:#x} to read-only memory at {address:#x}");
                    self.record_fault(RuntimeFault::RomWrite);
                    return;
                }
                let endianness = self.endianness(space);
                if !self.region_write(region, offset, width, endianness, value) {
                    debug!(target: LOG_TARGET, "write at {address:#x} runs past its region");
                    self.record_fault(RuntimeFault::BankOutOfRange);
                }
            }
            Handler::Write(id) => match self.write_callbacks.checkout(id.0) {
                Ok(mut callback) => {
                    callback(self, access, value);
                    self.write_callbacks.checkin(id.0, callback);
                }
                Err(err) => self.refused(err, address),
            },
            Handler::Device(device) => {
                if let Err(err) =
                    self.with_device(device, |device, machine| device.write(machine, access, value))
                {
                    self.refused(err, address);
                }
            }
            Handler::Read(_) | Handler::Nop | Handler::Unmapped => {}
        }
    }

    /// A handler could not be entered: busy (re-entered) or removed.
    fn refused(&mut self, err: SlotError, address: u64) {
        match err {
            SlotError::Busy => {
                warn!(target: LOG_TARGET, "handler at {address:#x} re-entered; access dropped");
                self.record_fault(RuntimeFault::DeviceBusy);
            }
            SlotError::Vacant => {
                debug!(target: LOG_TARGET, "handler at {address:#x} was removed; access dropped");
                self.record_fault(RuntimeFault::DefusedTimer);
            }
        }
    }
}
