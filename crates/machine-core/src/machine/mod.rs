//! The machine: sole owner of every device, space, region, bank, line, and
//! timer of one emulated system.
//!
//! There is no global state; devices and callbacks receive `&mut Machine`
//! and reach everything through it. Several machines can coexist.

use std::fmt;

use log::{debug, error, info, warn};

use crate::device::DeviceId;
use crate::memory::{
    Access, AddressSpace, Bank, BankEntry, BankId, Handler, MapDirection, MapEntry, ReadHandlerId,
    Region, RegionArena, RegionId, RegionKind, SpaceConfig, SpaceId, WriteHandlerId,
};
use crate::scheduler::{Scheduler, SchedulerConfig, TimerCallbackId, TimerId, TimerTarget};
use crate::slots::{SlotError, Slots};
use crate::{
    Clock, ConfigError, Device, DeviceState, Diagnostics, EmuTime, Line, LineCallbackId, LineId,
    LineKind, RuntimeFault, SuspendReason, TraceEvent, TraceSink,
};

mod lines;
mod memory;
mod run;
mod state_io;
mod timers;

pub use run::RunOutcome;

const LOG_TARGET: &str = "machine_core::machine";

/// Read callback: returns the value driven onto the bus.
pub type ReadCallback = dyn FnMut(&mut Machine, Access) -> u64;
/// Write callback.
pub type WriteCallback = dyn FnMut(&mut Machine, Access, u64);
/// Timer callback, called with the expiring timer and its parameter.
pub type TimerCallback = dyn FnMut(&mut Machine, TimerId, u64);
/// Line callback, called with the line and its new level.
pub type LineCallback = dyn FnMut(&mut Machine, LineId, bool);

/// Machine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MachinePhase {
    /// Accepting devices and configuration.
    #[default]
    Configuring,
    /// Started; `run_until` may be called.
    Running,
    /// Stopped. Terminal.
    Stopped,
}

/// Scheduler bookkeeping for one device.
#[derive(Debug, Clone)]
pub(crate) struct DeviceMeta {
    pub(crate) tag: String,
    pub(crate) state: DeviceState,
    pub(crate) clock: Clock,
    pub(crate) executor: bool,
    /// Cycles consumed since `epoch`.
    pub(crate) cycles: u64,
    pub(crate) epoch: EmuTime,
    pub(crate) suspend: SuspendReason,
    pub(crate) trigger: Option<u32>,
    pub(crate) tick_timer: Option<TimerId>,
    /// Tick spacing in cycles of `clock`.
    pub(crate) tick_interval: Option<u64>,
}

impl DeviceMeta {
    pub(crate) const fn local_time(&self, extra_cycles: u64) -> EmuTime {
        if self.clock.is_stopped() {
            return self.epoch;
        }
        self.epoch
            .saturating_add(self.clock.cycles_to_time(self.cycles.saturating_add(extra_cycles)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingInput {
    pub(crate) device: DeviceId,
    pub(crate) input: u32,
    pub(crate) level: bool,
}

/// State of the executor currently running a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecContext {
    pub(crate) device: DeviceId,
    pub(crate) budget: u64,
    pub(crate) consumed: u64,
    /// Cycles of this slice already folded into the epoch by a clock change.
    pub(crate) rebased: u64,
    pub(crate) aborted: bool,
}

/// One emulated system.
pub struct Machine {
    config: SchedulerConfig,
    phase: MachinePhase,
    devices: Slots<Box<dyn Device>>,
    meta: Vec<DeviceMeta>,
    exec_order: Vec<DeviceId>,
    spaces: Vec<AddressSpace>,
    regions: RegionArena,
    banks: Vec<Bank>,
    lines: Vec<Line>,
    scheduler: Scheduler,
    read_callbacks: Slots<Box<ReadCallback>>,
    write_callbacks: Slots<Box<WriteCallback>>,
    timer_callbacks: Slots<Box<TimerCallback>>,
    line_callbacks: Slots<Box<LineCallback>>,
    diagnostics: Diagnostics,
    trace: Option<Box<dyn TraceSink>>,
    dispatching: bool,
    exec: Option<ExecContext>,
    slice_end: EmuTime,
    pending_inputs: Vec<PendingInput>,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("phase", &self.phase)
            .field("now", &self.scheduler.now())
            .field("devices", &self.meta.len())
            .field("spaces", &self.spaces.len())
            .field("lines", &self.lines.len())
            .field("timers", &self.scheduler.live_count())
            .finish_non_exhaustive()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Creates an empty machine with the default scheduler configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates an empty machine.
    ///
    /// A zero quantum is raised to one attosecond so slices always make
    /// progress.
    #[must_use]
    pub fn with_config(mut config: SchedulerConfig) -> Self {
        if config.quantum.is_zero() {
            config.quantum = EmuTime::from_attos(1);
        }
        Self {
            config,
            phase: MachinePhase::Configuring,
            devices: Slots::default(),
            meta: Vec::new(),
            exec_order: Vec::new(),
            spaces: Vec::new(),
            regions: RegionArena::new(),
            banks: Vec::new(),
            lines: Vec::new(),
            scheduler: Scheduler::new(),
            read_callbacks: Slots::default(),
            write_callbacks: Slots::default(),
            timer_callbacks: Slots::default(),
            line_callbacks: Slots::default(),
            diagnostics: Diagnostics::new(),
            trace: None,
            dispatching: false,
            exec: None,
            slice_end: EmuTime::ZERO,
            pending_inputs: Vec::new(),
        }
    }

    /// Scheduler configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> MachinePhase {
        self.phase
    }

    /// Diagnostic counters.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Records a recovered runtime fault at the current time.
    pub fn record_fault(&mut self, fault: RuntimeFault) {
        let time = self.now();
        self.diagnostics.record(fault, time);
        self.emit(TraceEvent::Fault { time, fault });
    }

    /// Attaches (or detaches) a trace sink.
    pub fn set_trace_sink(&mut self, sink: Option<Box<dyn TraceSink>>) {
        self.trace = sink;
    }

    pub(crate) fn emit(&mut self, event: TraceEvent) {
        if let Some(sink) = self.trace.as_mut() {
            sink.on_event(event);
        }
    }

    // --- address spaces, regions, banks --------------------------------

    /// Adds an address space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddressWidth`] for widths outside 8..=64.
    pub fn add_space(&mut self, config: SpaceConfig) -> Result<SpaceId, ConfigError> {
        let space = AddressSpace::new(config)?;
        let id = SpaceId(u32::try_from(self.spaces.len()).unwrap_or(u32::MAX));
        debug!(
            target: LOG_TARGET,
            "space `{}` added ({} address bits)",
            space.name(),
            space.config().address_bits
        );
        self.spaces.push(space);
        Ok(id)
    }

    /// Looks up a space.
    #[must_use]
    pub fn space(&self, id: SpaceId) -> Option<&AddressSpace> {
        self.spaces.get(id.0 as usize)
    }

    /// Finds a space by name.
    #[must_use]
    pub fn find_space(&self, name: &str) -> Option<SpaceId> {
        self.spaces
            .iter()
            .position(|space| space.name() == name)
            .and_then(|index| u32::try_from(index).ok())
            .map(SpaceId)
    }

    /// Adds an externally supplied read-only image.
    pub fn add_rom(&mut self, name: impl Into<String>, data: Vec<u8>) -> RegionId {
        self.regions.add(name, RegionKind::Rom, data)
    }

    /// Allocates zero-filled RAM.
    pub fn add_ram(&mut self, name: impl Into<String>, size: usize) -> RegionId {
        self.regions.add(name, RegionKind::Ram, vec![0; size])
    }

    /// Looks up a region.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Looks up a region mutably (for loaders and debuggers).
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id)
    }

    /// All regions.
    #[must_use]
    pub const fn regions(&self) -> &RegionArena {
        &self.regions
    }

    /// Adds an empty bank.
    pub fn add_bank(&mut self, name: impl Into<String>, writable: bool) -> BankId {
        let id = BankId(u32::try_from(self.banks.len()).unwrap_or(u32::MAX));
        self.banks.push(Bank::new(name, writable));
        id
    }

    /// Looks up a bank.
    #[must_use]
    pub fn bank(&self, id: BankId) -> Option<&Bank> {
        self.banks.get(id.0 as usize)
    }

    /// Appends one entry to a bank and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownBank`], [`ConfigError::UnknownRegion`], or
    /// [`ConfigError::RegionOverrun`] when `offset` is outside the region.
    pub fn add_bank_entry(
        &mut self,
        bank: BankId,
        region: RegionId,
        offset: u64,
    ) -> Result<usize, ConfigError> {
        let backing = self
            .regions
            .get(region)
            .ok_or(ConfigError::UnknownRegion(region.0))?;
        if usize::try_from(offset).map_or(true, |offset| offset >= backing.len()) {
            return Err(ConfigError::RegionOverrun {
                region: backing.name().to_owned(),
                offset,
                size: backing.len(),
            });
        }
        let target = self
            .banks
            .get_mut(bank.0 as usize)
            .ok_or(ConfigError::UnknownBank(bank.0))?;
        Ok(target.push(BankEntry { region, offset }))
    }

    /// Appends `count` entries at `base + n * stride` of one region.
    ///
    /// # Errors
    ///
    /// Same as [`Machine::add_bank_entry`]; entries before the failing one
    /// stay configured.
    pub fn configure_bank_entries(
        &mut self,
        bank: BankId,
        region: RegionId,
        base: u64,
        count: usize,
        stride: u64,
    ) -> Result<(), ConfigError> {
        let mut offset = base;
        for _ in 0..count {
            self.add_bank_entry(bank, region, offset)?;
            offset = offset.saturating_add(stride);
        }
        Ok(())
    }

    /// Selects the active entry of a bank.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownBank`] or
    /// [`ConfigError::BankEntryOutOfRange`]; the previous selection stays.
    pub fn set_bank(&mut self, bank: BankId, entry: usize) -> Result<(), ConfigError> {
        let target = self
            .banks
            .get_mut(bank.0 as usize)
            .ok_or(ConfigError::UnknownBank(bank.0))?;
        target.select(entry).inspect_err(|err| {
            warn!(target: LOG_TARGET, "{err}");
        })
    }

    // --- handler installation ------------------------------------------

    /// Installs a handler for reads of `start..=end`.
    ///
    /// # Errors
    ///
    /// See [`Machine::install_mirrored`].
    pub fn install_read(
        &mut self,
        space: SpaceId,
        start: u64,
        end: u64,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.install_mirrored(space, MapDirection::Read, start, end, u64::MAX, handler)
    }

    /// Installs a handler for writes of `start..=end`.
    ///
    /// # Errors
    ///
    /// See [`Machine::install_mirrored`].
    pub fn install_write(
        &mut self,
        space: SpaceId,
        start: u64,
        end: u64,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.install_mirrored(space, MapDirection::Write, start, end, u64::MAX, handler)
    }

    /// Installs a handler for both reads and writes of `start..=end`.
    ///
    /// # Errors
    ///
    /// See [`Machine::install_mirrored`].
    pub fn install_handler(
        &mut self,
        space: SpaceId,
        start: u64,
        end: u64,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.install_mirrored(space, MapDirection::ReadWrite, start, end, u64::MAX, handler)
    }

    /// Installs a handler whose range-relative offsets are folded through
    /// `mirror_mask`, so the target repeats every `mirror_mask + 1` bytes.
    ///
    /// The newest install wins where ranges overlap; overriding a different
    /// handler logs a warning.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed or out-of-space ranges, unknown
    /// handles, callbacks installed in the wrong direction, or direct-memory
    /// ranges that run past the end of their region.
    pub fn install_mirrored(
        &mut self,
        space: SpaceId,
        direction: MapDirection,
        start: u64,
        end: u64,
        mirror_mask: u64,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        let result = self
            .validate_handler(space, direction, start, end, mirror_mask, handler)
            .and_then(|()| {
                let target = self
                    .spaces
                    .get_mut(space.0 as usize)
                    .ok_or(ConfigError::UnknownSpace(space.0))?;
                let overridden =
                    target.install(direction, start, end, MapEntry::mirrored(handler, mirror_mask))?;
                if overridden && handler != Handler::Unmapped {
                    warn!(
                        target: LOG_TARGET,
                        "{:?} at {start:#x}..={end:#x} overrides an existing mapping in `{}`",
                        handler,
                        target.name()
                    );
                }
                Ok(())
            });
        if let Err(err) = &result {
            error!(target: LOG_TARGET, "install failed: {err}");
        }
        result
    }

    fn validate_handler(
        &self,
        space: SpaceId,
        direction: MapDirection,
        start: u64,
        end: u64,
        mirror_mask: u64,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        let target = self
            .spaces
            .get(space.0 as usize)
            .ok_or(ConfigError::UnknownSpace(space.0))?;
        target.check_range(start, end)?;

        match handler {
            Handler::Ram { region, base } | Handler::Rom { region, base } => {
                let backing = self
                    .regions
                    .get(region)
                    .ok_or(ConfigError::UnknownRegion(region.0))?;
                let last = base.saturating_add((end - start).min(mirror_mask));
                if usize::try_from(last).map_or(true, |last| last >= backing.len()) {
                    return Err(ConfigError::RegionOverrun {
                        region: backing.name().to_owned(),
                        offset: last,
                        size: backing.len(),
                    });
                }
            }
            Handler::Bank(bank) => {
                if self.banks.get(bank.0 as usize).is_none() {
                    return Err(ConfigError::UnknownBank(bank.0));
                }
            }
            Handler::Read(id) => {
                if direction.writes() {
                    return Err(ConfigError::HandlerDirection {
                        space: target.name().to_owned(),
                        kind: "read",
                        direction: direction.label(),
                    });
                }
                if !self.read_callbacks.is_live(id.0) {
                    return Err(ConfigError::UnresolvedCallback {
                        device: target.name().to_owned(),
                        slot: format!("read handler {}", id.0),
                    });
                }
            }
            Handler::Write(id) => {
                if direction.reads() {
                    return Err(ConfigError::HandlerDirection {
                        space: target.name().to_owned(),
                        kind: "write",
                        direction: direction.label(),
                    });
                }
                if !self.write_callbacks.is_live(id.0) {
                    return Err(ConfigError::UnresolvedCallback {
                        device: target.name().to_owned(),
                        slot: format!("write handler {}", id.0),
                    });
                }
            }
            Handler::Device(device) => {
                if !self.devices.is_live(device.0) {
                    return Err(ConfigError::UnknownDevice(device.0));
                }
            }
            Handler::Nop | Handler::Unmapped => {}
        }
        Ok(())
    }

    /// Registers a read callback.
    pub fn add_read_callback(
        &mut self,
        callback: impl FnMut(&mut Self, Access) -> u64 + 'static,
    ) -> ReadHandlerId {
        ReadHandlerId(self.read_callbacks.insert(Box::new(callback)))
    }

    /// Registers a write callback.
    pub fn add_write_callback(
        &mut self,
        callback: impl FnMut(&mut Self, Access, u64) + 'static,
    ) -> WriteHandlerId {
        WriteHandlerId(self.write_callbacks.insert(Box::new(callback)))
    }

    /// Registers a timer callback.
    pub fn add_timer_callback(
        &mut self,
        callback: impl FnMut(&mut Self, TimerId, u64) + 'static,
    ) -> TimerCallbackId {
        TimerCallbackId(self.timer_callbacks.insert(Box::new(callback)))
    }

    /// Registers a line callback; subscribe it with
    /// [`Machine::subscribe_line`].
    pub fn add_line_callback(
        &mut self,
        callback: impl FnMut(&mut Self, LineId, bool) + 'static,
    ) -> LineCallbackId {
        LineCallbackId(self.line_callbacks.insert(Box::new(callback)))
    }

    /// Drops a timer callback. Timers still targeting it are defused when
    /// they fire.
    pub fn remove_timer_callback(&mut self, id: TimerCallbackId) -> bool {
        self.timer_callbacks.remove(id.0).is_some()
    }

    /// Drops a line callback. Subscriptions still naming it are defused.
    pub fn remove_line_callback(&mut self, id: LineCallbackId) -> bool {
        self.line_callbacks.remove(id.0).is_some()
    }

    // --- devices --------------------------------------------------------

    /// Adds a device.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyStarted`] once the machine runs, or
    /// [`ConfigError::DuplicateTag`].
    pub fn add_device<D: Device>(&mut self, device: D) -> Result<DeviceId, ConfigError> {
        if self.phase != MachinePhase::Configuring {
            return Err(ConfigError::AlreadyStarted);
        }
        let tag = device.tag().to_owned();
        if self.find_device(&tag).is_some() {
            error!(target: LOG_TARGET, "duplicate device tag `{tag}`");
            return Err(ConfigError::DuplicateTag { tag });
        }
        let clock = Clock::from_hz(device.clock_hz());
        let id = DeviceId(self.devices.insert(Box::new(device)));
        debug!(target: LOG_TARGET, "device `{tag}` added as #{}", id.0);
        self.meta.push(DeviceMeta {
            tag,
            state: DeviceState::Constructed,
            clock,
            executor: false,
            cycles: 0,
            epoch: EmuTime::ZERO,
            suspend: SuspendReason::NONE,
            trigger: None,
            tick_timer: None,
            tick_interval: None,
        });
        Ok(id)
    }

    /// Finds a live device by tag.
    #[must_use]
    pub fn find_device(&self, tag: &str) -> Option<DeviceId> {
        self.devices
            .live_indices()
            .find(|index| {
                self.meta
                    .get(*index as usize)
                    .is_some_and(|meta| meta.tag == tag)
            })
            .map(DeviceId)
    }

    /// Borrows a device as its concrete type. `None` while it is running.
    #[must_use]
    pub fn device<T: Device>(&self, id: DeviceId) -> Option<&T> {
        let device: &dyn Device = &**self.devices.get(id.0)?;
        device.as_any().downcast_ref()
    }

    /// Mutably borrows a device as its concrete type.
    pub fn device_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        let device: &mut dyn Device = &mut **self.devices.get_mut(id.0)?;
        device.as_any_mut().downcast_mut()
    }

    /// Lifecycle state of a device.
    #[must_use]
    pub fn device_state(&self, id: DeviceId) -> Option<DeviceState> {
        self.meta.get(id.0 as usize).map(|meta| meta.state)
    }

    /// Tag of a device, also after removal.
    #[must_use]
    pub fn device_tag(&self, id: DeviceId) -> Option<&str> {
        self.meta.get(id.0 as usize).map(|meta| meta.tag.as_str())
    }

    /// Returns `true` while `id` refers to a device that was not removed.
    #[must_use]
    pub fn is_device_live(&self, id: DeviceId) -> bool {
        self.devices.is_live(id.0)
    }

    /// Checks a device out, runs `f`, checks it back in, then delivers any
    /// line changes that arrived while it was busy.
    pub(crate) fn with_device<R>(
        &mut self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn Device, &mut Self) -> R,
    ) -> Result<R, SlotError> {
        let mut device = self.devices.checkout(id.0)?;
        let result = f(&mut *device, self);
        if self.devices.checkin(id.0, device).is_some() {
            debug!(target: LOG_TARGET, "device #{} dropped after removal", id.0);
        }
        self.flush_inputs(id);
        Ok(result)
    }

    /// Validates configuration, starts every device, and performs the
    /// power-on reset.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; the machine then stays in
    /// [`MachinePhase::Configuring`]. Devices started before the failure are
    /// stopped and the timers they allocated are freed.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.phase != MachinePhase::Configuring {
            return Err(ConfigError::AlreadyStarted);
        }
        let result = self.validate_interfaces().and_then(|()| self.start_devices());
        match &result {
            Ok(()) => info!(
                target: LOG_TARGET,
                "machine started with {} devices ({} executing)",
                self.meta.len(),
                self.exec_order.len()
            ),
            Err(err) => error!(target: LOG_TARGET, "machine refused to start: {err}"),
        }
        result
    }

    fn live_devices(&self) -> Vec<DeviceId> {
        self.devices.live_indices().map(DeviceId).collect()
    }

    fn validate_interfaces(&self) -> Result<(), ConfigError> {
        for id in self.live_devices() {
            let Some(device) = self.devices.get(id.0) else {
                return Err(ConfigError::UnknownDevice(id.0));
            };
            if let Some(slot) = device
                .interface()
                .into_iter()
                .find(|slot| slot.is_unresolved())
            {
                return Err(ConfigError::UnresolvedCallback {
                    device: device.tag().to_owned(),
                    slot: slot.name.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn start_devices(&mut self) -> Result<(), ConfigError> {
        let ids = self.live_devices();
        let timers = self.scheduler.encode();
        let mut started = Vec::new();
        let mut executors = Vec::new();
        let mut tickers = Vec::new();

        for id in &ids {
            let id = *id;
            match self.start_device(id, &mut started) {
                Ok((executor, tick)) => {
                    if executor {
                        executors.push(id);
                    }
                    if let Some(period) = tick {
                        tickers.push((id, period));
                    }
                }
                Err(err) => {
                    self.roll_back_start(&started, &timers);
                    return Err(err);
                }
            }
        }

        self.exec_order = executors;
        for (id, period) in tickers {
            let timer = self.timer_pulse(period, TimerTarget::DeviceTick(id), 0);
            if let Some(meta) = self.meta.get_mut(id.0 as usize) {
                meta.tick_timer = Some(timer);
            }
        }
        let now = self.scheduler.now();
        for id in &ids {
            if let Some(meta) = self.meta.get_mut(id.0 as usize) {
                meta.state = DeviceState::Running;
                meta.epoch = now;
                meta.cycles = 0;
            }
        }
        self.phase = MachinePhase::Running;
        self.reset();
        Ok(())
    }

    /// Starts one device; returns whether it executes and its tick period.
    fn start_device(
        &mut self,
        id: DeviceId,
        started: &mut Vec<DeviceId>,
    ) -> Result<(bool, Option<EmuTime>), ConfigError> {
        let (executor, hz, tick, result) = self
            .with_device(id, |device, machine| {
                let executor = device.as_executor().is_some();
                let hz = device.clock_hz();
                let tick = device.tick_interval();
                (executor, hz, tick, device.start(machine, id))
            })
            .map_err(|_| ConfigError::UnknownDevice(id.0))?;
        result?;
        started.push(id);

        let meta = self
            .meta
            .get_mut(id.0 as usize)
            .ok_or(ConfigError::UnknownDevice(id.0))?;
        if executor && hz == 0 {
            return Err(ConfigError::InvalidClock {
                device: meta.tag.clone(),
            });
        }
        meta.clock = Clock::from_hz(hz);
        meta.executor = executor;
        meta.state = DeviceState::Started;
        let interval = tick.filter(|cycles| *cycles > 0 && hz > 0);
        meta.tick_interval = interval;
        Ok((executor, interval.map(|cycles| meta.clock.cycles_to_time(cycles))))
    }

    /// Stops the devices a failed start already started and drops every
    /// timer allocated since `timers` was encoded.
    fn roll_back_start(&mut self, started: &[DeviceId], timers: &[u8]) {
        for id in started.iter().rev() {
            let _ = self.with_device(*id, |device, machine| device.stop(machine));
            if let Some(meta) = self.meta.get_mut(id.0 as usize) {
                meta.state = DeviceState::Constructed;
                meta.executor = false;
                meta.tick_interval = None;
            }
        }
        if self.scheduler.decode(timers).is_none() {
            warn!(target: LOG_TARGET, "timer table could not be rolled back");
        }
        debug!(target: LOG_TARGET, "rolled back {} started devices", started.len());
    }

    /// Resets every live device in creation order.
    pub fn reset(&mut self) {
        debug!(target: LOG_TARGET, "machine reset at {}", self.now());
        for id in self.live_devices() {
            self.reset_device(id);
        }
    }

    /// Resets one device. Returns `false` if it is gone or busy.
    pub fn reset_device(&mut self, id: DeviceId) -> bool {
        self.with_device(id, |device, machine| device.reset(machine))
            .is_ok()
    }

    /// Stops every device. The machine cannot be restarted.
    pub fn stop(&mut self) {
        if self.phase == MachinePhase::Stopped {
            return;
        }
        for id in self.live_devices() {
            if self.with_device(id, |device, machine| device.stop(machine)).is_err() {
                warn!(target: LOG_TARGET, "device #{} busy during stop", id.0);
            }
            if let Some(meta) = self.meta.get_mut(id.0 as usize) {
                meta.state = DeviceState::Stopped;
            }
        }
        self.exec_order.clear();
        self.phase = MachinePhase::Stopped;
        info!(target: LOG_TARGET, "machine stopped at {}", self.now());
    }

    /// Tears a device down. Its idle timers are freed; armed timers and line
    /// subscriptions stay behind and are defused when they next dispatch.
    ///
    /// A device removing itself is not sent `stop`; it is dropped as soon as
    /// its running method returns.
    pub fn remove_device(&mut self, id: DeviceId) -> bool {
        if !self.devices.is_live(id.0) {
            return false;
        }
        if !self.devices.is_checked_out(id.0) {
            let _ = self.with_device(id, |device, machine| device.stop(machine));
        }
        self.devices.remove(id.0);
        self.exec_order.retain(|other| *other != id);
        self.pending_inputs.retain(|pending| pending.device != id);
        let tick = self.meta.get_mut(id.0 as usize).and_then(|meta| {
            meta.state = DeviceState::Stopped;
            meta.tick_timer.take()
        });
        if let Some(timer) = tick {
            self.timer_remove(timer);
        }
        let freed = self.scheduler.remove_idle(|target| match target {
            TimerTarget::Device(owner) | TimerTarget::DeviceTick(owner) => owner == id,
            TimerTarget::Callback(_) | TimerTarget::LineRelease(_) => false,
        });
        if self.exec.is_some_and(|exec| exec.device == id) {
            self.abort_timeslice();
        }
        debug!(target: LOG_TARGET, "device #{} removed, {freed} idle timers freed", id.0);
        true
    }

    /// Creates a line, initially low with no subscribers.
    pub fn add_line(&mut self, name: impl Into<String>, kind: LineKind) -> LineId {
        let id = LineId(u32::try_from(self.lines.len()).unwrap_or(u32::MAX));
        self.lines.push(Line::new(name, kind));
        id
    }

    /// Looks up a line.
    #[must_use]
    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::{Machine, MachinePhase};
    use crate::memory::{Handler, MapDirection, SpaceConfig};
    use crate::{ConfigError, Device, DeviceState, Slot, SlotInfo, SpaceId};

    struct Probe {
        tag: &'static str,
        bus: Slot<SpaceId>,
        resets: u32,
    }

    impl Probe {
        fn new(tag: &'static str) -> Self {
            Self {
                tag,
                bus: Slot::required("bus"),
                resets: 0,
            }
        }
    }

    impl Device for Probe {
        fn tag(&self) -> &str {
            self.tag
        }

        fn interface(&self) -> Vec<SlotInfo> {
            vec![self.bus.info()]
        }

        fn reset(&mut self, _machine: &mut Machine) {
            self.resets += 1;
        }
    }

    #[test]
    fn unresolved_required_slot_blocks_start() {
        let mut machine = Machine::new();
        machine.add_device(Probe::new("pia")).expect("added");
        assert_eq!(
            machine.start(),
            Err(ConfigError::UnresolvedCallback {
                device: "pia".into(),
                slot: "bus".into(),
            })
        );
        assert_eq!(machine.phase(), MachinePhase::Configuring);
    }

    #[test]
    fn start_runs_power_on_reset_once() {
        let mut machine = Machine::new();
        let space = machine.add_space(SpaceConfig::default()).expect("space");
        let mut probe = Probe::new("pia");
        probe.bus.bind(space);
        let id = machine.add_device(probe).expect("added");

        machine.start().expect("starts");
        assert_eq!(machine.device::<Probe>(id).map(|p| p.resets), Some(1));
        assert_eq!(machine.device_state(id), Some(DeviceState::Running));
        assert_eq!(machine.start(), Err(ConfigError::AlreadyStarted));
        assert!(matches!(
            machine.add_device(Probe::new("late")),
            Err(ConfigError::AlreadyStarted)
        ));
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut machine = Machine::new();
        machine.add_device(Probe::new("crtc")).expect("added");
        assert_eq!(
            machine.add_device(Probe::new("crtc")),
            Err(ConfigError::DuplicateTag { tag: "crtc".into() })
        );
    }

    #[test]
    fn direct_memory_ranges_must_fit_their_region() {
        let mut machine = Machine::new();
        let space = machine.add_space(SpaceConfig::default()).expect("space");
        let ram = machine.add_ram("ram", 0x800);

        assert!(machine
            .install_handler(space, 0x0000, 0x07FF, Handler::Ram { region: ram, base: 0 })
            .is_ok());
        assert!(matches!(
            machine.install_handler(space, 0x0000, 0x0FFF, Handler::Ram { region: ram, base: 0 }),
            Err(ConfigError::RegionOverrun { .. })
        ));
        assert!(machine
            .install_mirrored(
                space,
                MapDirection::ReadWrite,
                0x0000,
                0x1FFF,
                0x07FF,
                Handler::Ram { region: ram, base: 0 },
            )
            .is_ok());
    }

    #[test]
    fn callbacks_must_match_their_direction() {
        let mut machine = Machine::new();
        let space = machine.add_space(SpaceConfig::default()).expect("space");
        let read = machine.add_read_callback(|_, _| 0);
        assert!(matches!(
            machine.install_write(space, 0, 0xFF, Handler::Read(read)),
            Err(ConfigError::HandlerDirection { kind: "read", .. })
        ));
        assert!(machine.install_read(space, 0, 0xFF, Handler::Read(read)).is_ok());
    }

    #[test]
    fn bank_entries_are_bounded_by_their_region() {
        let mut machine = Machine::new();
        let rom = machine.add_rom("banks", vec![0; 0x4000]);
        let bank = machine.add_bank("rombank", false);
        machine
            .configure_bank_entries(bank, rom, 0, 4, 0x1000)
            .expect("four pages fit");
        assert_eq!(machine.bank(bank).map(|b| b.entries().len()), Some(4));
        assert!(matches!(
            machine.add_bank_entry(bank, rom, 0x4000),
            Err(ConfigError::RegionOverrun { .. })
        ));
        assert!(matches!(
            machine.set_bank(bank, 4),
            Err(ConfigError::BankEntryOutOfRange { entry: 4, count: 4, .. })
        ));
    }
}
