//! Peripheral registry: port-mask dispatch and activation lifecycle (C10).
//!
//! Disk, IDE, and network add-ons share one shape: a set of I/O ports
//! they answer, and (for ROMCS cartridges) a ROM image they page into
//! the low 16KiB while active. `Registry` holds one `PeripheralSlot`
//! per known add-on and walks the list on every port access and on
//! every settings change, exactly like the bus already walks its own
//! fixed port decode in `bus.rs` — this just makes that decode
//! pluggable instead of hardcoded per add-on.

use western_digital_wd179x::{Variant, Wd179x};

use crate::debugger::PagingObserver;
use crate::memory::SpectrumMemory;

/// Whether a peripheral slot can ever be active on the current model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Not fitted on this model; `update()` skips it entirely.
    Never,
    /// Fitted, enabled/disabled by a setting.
    Optional,
    /// Always active when the registry runs (no setting gates it).
    Always,
}

/// One port the peripheral answers: `(addr & mask) == value` selects it.
#[derive(Debug, Clone, Copy)]
pub struct PortMatch {
    pub mask: u16,
    pub value: u16,
}

/// Behaviour a peripheral slot's occupant must implement.
pub trait PeripheralPorts {
    /// Read this peripheral's register at `port`. `None` means this
    /// peripheral doesn't decode this port after all (shouldn't happen
    /// if the slot's `PortMatch` list is accurate, but keeps the trait
    /// honest about partial decodes).
    fn read(&mut self, port: u16) -> Option<u8>;

    /// Write `value` to this peripheral's register at `port`.
    fn write(&mut self, port: u16, value: u8);

    /// Called when the slot transitions from inactive to active: page
    /// in any ROMCS image this peripheral owns, reporting the change
    /// through `observer` so a debugger can see it.
    fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver);

    /// Called when the slot transitions from active to inactive: unpage
    /// whatever `activate` paged in.
    fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver);

    /// Advance any internal T-state clock this peripheral keeps (disk
    /// controller step/settle/search timing, for instance). Most
    /// peripherals have no such clock, hence the no-op default.
    fn tick(&mut self, _tstates: u32) {}
}

/// One entry in the peripheral registry.
pub struct PeripheralSlot {
    pub name: &'static str,
    pub presence: Presence,
    pub active: bool,
    pub ports: Vec<PortMatch>,
    pub device: Box<dyn PeripheralPorts>,
}

impl PeripheralSlot {
    fn decodes(&self, port: u16) -> bool {
        self.ports.iter().any(|m| (port & m.mask) == m.value)
    }
}

/// The full set of disk/IDE/network add-ons known to the emulator.
pub struct Registry {
    slots: Vec<PeripheralSlot>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn add(&mut self, slot: PeripheralSlot) {
        self.slots.push(slot);
    }

    /// Re-evaluate activation state for every slot against the supplied
    /// enable flags (one per slot, matched positionally in insertion
    /// order). `Never` slots are always skipped; `Always` slots activate
    /// unconditionally; `Optional` slots follow the corresponding flag.
    pub fn update(
        &mut self,
        enabled: &[bool],
        memory: &mut dyn SpectrumMemory,
        observer: &mut dyn PagingObserver,
    ) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let should_be_active = match slot.presence {
                Presence::Never => false,
                Presence::Always => true,
                Presence::Optional => enabled.get(i).copied().unwrap_or(false),
            };
            if should_be_active && !slot.active {
                slot.device.activate(memory, observer);
                slot.active = true;
            } else if !should_be_active && slot.active {
                slot.device.deactivate(memory, observer);
                slot.active = false;
            }
        }
    }

    /// Dispatch a port read to every active slot that decodes it,
    /// AND-combining every responding slot's byte (open-bus simulation:
    /// an idle data bus floats high, so a slot that doesn't drive a bit
    /// leaves it a 1, and two slots driving the same line at once is
    /// modelled as the wired-AND of both).
    #[must_use]
    pub fn read(&mut self, port: u16) -> Option<u8> {
        let mut result: Option<u8> = None;
        for slot in &mut self.slots {
            if slot.active && slot.decodes(port) {
                if let Some(value) = slot.device.read(port) {
                    result = Some(result.map_or(value, |acc| acc & value));
                }
            }
        }
        result
    }

    /// Dispatch a port write to every active slot that decodes it.
    pub fn write(&mut self, port: u16, value: u8) {
        for slot in &mut self.slots {
            if slot.active && slot.decodes(port) {
                slot.device.write(port, value);
            }
        }
    }

    /// Advance every active slot's internal clock by `tstates`. Called
    /// once per CPU T-state from `Spectrum::tick` so disk controllers can
    /// pace step/settle/search delays against real simulated time.
    pub fn tick(&mut self, tstates: u32) {
        for slot in &mut self.slots {
            if slot.active {
                slot.device.tick(tstates);
            }
        }
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&PeripheralSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn slot_mut(&mut self, name: &str) -> Option<&mut PeripheralSlot> {
        self.slots.iter_mut().find(|s| s.name == name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Beta-128 disk interface: WD1793 behind ports `$1F/$3F/$5F/$7F/$FF`,
/// ROMCS-selected TR-DOS ROM while enabled.
pub mod beta128 {
    use super::{PagingObserver, PeripheralPorts, PortMatch, Wd179x, Variant};
    use crate::memory::SpectrumMemory;

    pub struct Beta128 {
        fdc: Wd179x,
        rom: Box<[u8]>,
        system_register: u8,
    }

    impl Beta128 {
        #[must_use]
        pub fn new(rom: Box<[u8]>) -> Self {
            Self {
                fdc: Wd179x::new(Variant::Fd1793),
                rom,
                system_register: 0,
            }
        }

        #[must_use]
        pub fn ports() -> Vec<PortMatch> {
            vec![
                PortMatch { mask: 0xFF, value: 0x1F },
                PortMatch { mask: 0xFF, value: 0x3F },
                PortMatch { mask: 0xFF, value: 0x5F },
                PortMatch { mask: 0xFF, value: 0x7F },
                PortMatch { mask: 0xFF, value: 0xFF },
            ]
        }
    }

    impl PeripheralPorts for Beta128 {
        fn read(&mut self, port: u16) -> Option<u8> {
            match port & 0xFF {
                0x1F => Some(self.fdc.read_status()),
                0x3F => Some(self.fdc.read_track()),
                0x5F => Some(self.fdc.read_sector()),
                0x7F => Some(self.fdc.read_data()),
                0xFF => Some(self.system_register | 0x3F),
                _ => None,
            }
        }

        fn write(&mut self, port: u16, value: u8) {
            match port & 0xFF {
                0x1F => self.fdc.write_command(value),
                0x3F => self.fdc.write_track(value),
                0x5F => self.fdc.write_sector(value),
                0x7F => self.fdc.write_data(value),
                0xFF => {
                    self.system_register = value;
                    self.fdc.select_drive(usize::from(value & 0x03));
                    self.fdc.select_side(u8::from(value & 0x10 == 0));
                }
                _ => {}
            }
        }

        fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(Some(self.rom.clone()), "beta128", observer);
        }

        fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(None, "beta128", observer);
        }

        fn tick(&mut self, tstates: u32) {
            self.fdc.tick(tstates);
        }
    }
}

/// +D and DISCiPLE: both WD1772-based cartridges with their own ROMCS
/// ROM and a printer/joystick port set alongside the disk ports; the
/// disk-facing half is identical to Beta-128's port shape so it's
/// built on the same `Wd179x` wiring with a different fixed port set.
pub mod plusd {
    use super::{PagingObserver, PeripheralPorts, PortMatch, Wd179x, Variant};
    use crate::memory::SpectrumMemory;

    pub struct PlusD {
        fdc: Wd179x,
        rom: Box<[u8]>,
    }

    impl PlusD {
        #[must_use]
        pub fn new(rom: Box<[u8]>) -> Self {
            Self { fdc: Wd179x::new(Variant::Wd1772), rom }
        }

        #[must_use]
        pub fn ports() -> Vec<PortMatch> {
            vec![
                PortMatch { mask: 0xFF, value: 0xE3 },
                PortMatch { mask: 0xFF, value: 0xE7 },
                PortMatch { mask: 0xFF, value: 0xEB },
                PortMatch { mask: 0xFF, value: 0xEF },
                PortMatch { mask: 0xFF, value: 0xF3 },
            ]
        }
    }

    impl PeripheralPorts for PlusD {
        fn read(&mut self, port: u16) -> Option<u8> {
            match port & 0xFF {
                0xE3 => Some(self.fdc.read_status()),
                0xE7 => Some(self.fdc.read_track()),
                0xEB => Some(self.fdc.read_sector()),
                0xEF => Some(self.fdc.read_data()),
                0xF3 => None,
                _ => None,
            }
        }

        fn write(&mut self, port: u16, value: u8) {
            match port & 0xFF {
                0xE3 => self.fdc.write_command(value),
                0xE7 => self.fdc.write_track(value),
                0xEB => self.fdc.write_sector(value),
                0xEF => self.fdc.write_data(value),
                0xF3 => self.fdc.select_drive(usize::from(value & 0x01)),
                _ => {}
            }
        }

        fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(Some(self.rom.clone()), "plusd", observer);
        }

        fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(None, "plusd", observer);
        }

        fn tick(&mut self, tstates: u32) {
            self.fdc.tick(tstates);
        }
    }
}

/// Opus Discovery: a third WD1770-based cartridge. Its own snapshot
/// format is intentionally left unimplemented — loading one returns a
/// typed error rather than guessing at an undocumented layout.
pub mod opus {
    use super::{PagingObserver, PeripheralPorts, PortMatch, Wd179x, Variant};
    use crate::memory::SpectrumMemory;

    pub struct Opus {
        fdc: Wd179x,
        rom: Box<[u8]>,
    }

    impl Opus {
        #[must_use]
        pub fn new(rom: Box<[u8]>) -> Self {
            Self { fdc: Wd179x::new(Variant::Wd1770), rom }
        }

        #[must_use]
        pub fn ports() -> Vec<PortMatch> {
            vec![PortMatch { mask: 0xF8, value: 0x38 }]
        }

        /// Opus's own snapshot format has no documented layout in the
        /// surviving sources this emulator was built against.
        ///
        /// # Errors
        ///
        /// Always returns `Err` — not implemented.
        pub fn load_snapshot(&mut self, _data: &[u8]) -> Result<(), OpusSnapshotError> {
            Err(OpusSnapshotError::NotImplemented)
        }
    }

    /// Error loading an Opus Discovery native snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OpusSnapshotError {
        NotImplemented,
    }

    impl std::fmt::Display for OpusSnapshotError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::NotImplemented => {
                    write!(f, "Opus Discovery native snapshot format is not implemented")
                }
            }
        }
    }

    impl std::error::Error for OpusSnapshotError {}

    impl PeripheralPorts for Opus {
        fn read(&mut self, port: u16) -> Option<u8> {
            match port & 0x07 {
                0 => Some(self.fdc.read_status()),
                1 => Some(self.fdc.read_track()),
                2 => Some(self.fdc.read_sector()),
                3 => Some(self.fdc.read_data()),
                _ => None,
            }
        }

        fn write(&mut self, port: u16, value: u8) {
            match port & 0x07 {
                0 => self.fdc.write_command(value),
                1 => self.fdc.write_track(value),
                2 => self.fdc.write_sector(value),
                3 => self.fdc.write_data(value),
                _ => {}
            }
        }

        fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(Some(self.rom.clone()), "opus", observer);
        }

        fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(None, "opus", observer);
        }

        fn tick(&mut self, tstates: u32) {
            self.fdc.tick(tstates);
        }
    }
}

/// IDE task-file register block, common to the simple 8-bit interface,
/// ZXATASP, ZXCF, and DivIDE — the shared task-file register contract,
/// without a full ATA command set (that's a delegated collaborator's job).
pub mod ide {
    use super::{PagingObserver, PeripheralPorts, PortMatch};
    use crate::memory::SpectrumMemory;

    /// The eight task-file registers, decoded by the low 3 address
    /// bits of the interface's port window.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TaskFile {
        pub data: u16,
        pub error_features: u8,
        pub sector_count: u8,
        pub sector_number: u8,
        pub cylinder_low: u8,
        pub cylinder_high: u8,
        pub drive_head: u8,
        pub status_command: u8,
    }

    /// DivIDE automaps its ROM in on any ROM-space access and unmaps it
    /// once the program writes past `$1FF8`; that handshake lives here
    /// because only this slot knows which interface it is.
    pub struct DivIde {
        pub task_file: TaskFile,
        rom: Box<[u8]>,
        automapped: bool,
        write_protected: bool,
    }

    impl DivIde {
        #[must_use]
        pub fn new(rom: Box<[u8]>, write_protected: bool) -> Self {
            Self { task_file: TaskFile::default(), rom, automapped: false, write_protected }
        }

        #[must_use]
        pub fn ports() -> Vec<PortMatch> {
            vec![PortMatch { mask: 0xE3, value: 0xA3 }]
        }

        fn register(&self, port: u16) -> u8 {
            match (port >> 2) & 0x07 {
                0 => self.task_file.data as u8,
                1 => self.task_file.error_features,
                2 => self.task_file.sector_count,
                3 => self.task_file.sector_number,
                4 => self.task_file.cylinder_low,
                5 => self.task_file.cylinder_high,
                6 => self.task_file.drive_head,
                _ => self.task_file.status_command,
            }
        }
    }

    impl PeripheralPorts for DivIde {
        fn read(&mut self, port: u16) -> Option<u8> {
            Some(self.register(port))
        }

        fn write(&mut self, port: u16, value: u8) {
            if self.write_protected {
                return;
            }
            match (port >> 2) & 0x07 {
                0 => self.task_file.data = u16::from(value),
                1 => self.task_file.error_features = value,
                2 => self.task_file.sector_count = value,
                3 => self.task_file.sector_number = value,
                4 => self.task_file.cylinder_low = value,
                5 => self.task_file.cylinder_high = value,
                6 => self.task_file.drive_head = value,
                _ => self.task_file.status_command = value,
            }
        }

        fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            if !self.automapped {
                memory.page_romcs(Some(self.rom.clone()), "divide", observer);
                self.automapped = true;
            }
        }

        fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(None, "divide", observer);
            self.automapped = false;
        }
    }
}

/// Spectranet network/ROM/filesystem card: a ROMCS page and its port
/// range are modelled; the network stack itself is out of scope, the
/// same way no particular rendering toolkit is in scope.
pub mod spectranet {
    use super::{PagingObserver, PeripheralPorts, PortMatch};
    use crate::memory::SpectrumMemory;

    pub struct Spectranet {
        rom: Box<[u8]>,
        page_register: u8,
    }

    impl Spectranet {
        #[must_use]
        pub fn new(rom: Box<[u8]>) -> Self {
            Self { rom, page_register: 0 }
        }

        #[must_use]
        pub fn ports() -> Vec<PortMatch> {
            vec![PortMatch { mask: 0xFF, value: 0x9B }, PortMatch { mask: 0xFF, value: 0xBB }]
        }
    }

    impl PeripheralPorts for Spectranet {
        fn read(&mut self, port: u16) -> Option<u8> {
            (port & 0xFF == 0x9B).then_some(self.page_register)
        }

        fn write(&mut self, port: u16, value: u8) {
            if port & 0xFF == 0x9B {
                self.page_register = value;
            }
        }

        fn activate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(Some(self.rom.clone()), "spectranet", observer);
        }

        fn deactivate(&mut self, memory: &mut dyn SpectrumMemory, observer: &mut dyn PagingObserver) {
            memory.page_romcs(None, "spectranet", observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::Debugger;
    use crate::memory::Memory48K;

    fn dummy_rom() -> Box<[u8]> {
        vec![0u8; 0x4000].into_boxed_slice()
    }

    #[test]
    fn never_present_slot_is_never_activated() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "beta128",
            presence: Presence::Never,
            active: false,
            ports: beta128::Beta128::ports(),
            device: Box::new(beta128::Beta128::new(dummy_rom())),
        });
        let mut memory = Memory48K::new(&dummy_rom());
        registry.update(&[true], &mut memory, &mut Debugger::new());
        assert!(!registry.slot("beta128").unwrap().active);
    }

    #[test]
    fn optional_slot_activates_when_flag_set() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "beta128",
            presence: Presence::Optional,
            active: false,
            ports: beta128::Beta128::ports(),
            device: Box::new(beta128::Beta128::new(dummy_rom())),
        });
        let mut memory = Memory48K::new(&dummy_rom());
        registry.update(&[true], &mut memory, &mut Debugger::new());
        assert!(registry.slot("beta128").unwrap().active);
        registry.update(&[false], &mut memory, &mut Debugger::new());
        assert!(!registry.slot("beta128").unwrap().active);
    }

    #[test]
    fn inactive_slot_does_not_answer_ports() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "beta128",
            presence: Presence::Optional,
            active: false,
            ports: beta128::Beta128::ports(),
            device: Box::new(beta128::Beta128::new(dummy_rom())),
        });
        assert_eq!(registry.read(0x1F), None);
    }

    #[test]
    fn active_slot_answers_its_ports() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "beta128",
            presence: Presence::Always,
            active: false,
            ports: beta128::Beta128::ports(),
            device: Box::new(beta128::Beta128::new(dummy_rom())),
        });
        let mut memory = Memory48K::new(&dummy_rom());
        registry.update(&[], &mut memory, &mut Debugger::new());
        assert!(registry.read(0x1F).is_some());
    }

    #[test]
    fn divide_write_protect_drops_task_file_writes() {
        use ide::DivIde;

        // Port $A3 decodes to the data register ((port >> 2) & 7 == 0).
        let mut dev = DivIde::new(dummy_rom(), true);
        dev.write(0xA3, 0x55);
        assert_eq!(dev.task_file.data, 0);

        let mut writable = DivIde::new(dummy_rom(), false);
        writable.write(0xA3, 0x55);
        assert_eq!(writable.task_file.data, 0x55);
    }

    #[test]
    fn opus_snapshot_load_is_not_implemented() {
        let mut dev = opus::Opus::new(dummy_rom());
        assert!(dev.load_snapshot(&[]).is_err());
    }

    /// Fixed-byte stub peripheral for exercising multi-slot port overlap.
    struct FixedByte(u8);

    impl PeripheralPorts for FixedByte {
        fn read(&mut self, _port: u16) -> Option<u8> {
            Some(self.0)
        }
        fn write(&mut self, _port: u16, _value: u8) {}
        fn activate(&mut self, _memory: &mut dyn SpectrumMemory, _observer: &mut dyn PagingObserver) {}
        fn deactivate(&mut self, _memory: &mut dyn SpectrumMemory, _observer: &mut dyn PagingObserver) {}
    }

    #[test]
    fn overlapping_active_slots_and_combine_their_reads() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "a",
            presence: Presence::Always,
            active: false,
            ports: vec![PortMatch { mask: 0x00FF, value: 0x001F }],
            device: Box::new(FixedByte(0b1101_1111)),
        });
        registry.add(PeripheralSlot {
            name: "b",
            presence: Presence::Always,
            active: false,
            ports: vec![PortMatch { mask: 0x00FF, value: 0x001F }],
            device: Box::new(FixedByte(0b1111_1011)),
        });
        let mut memory = Memory48K::new(&dummy_rom());
        registry.update(&[], &mut memory, &mut Debugger::new());
        assert_eq!(registry.read(0x1F), Some(0b1101_1011));
    }

    #[test]
    fn single_active_slot_passes_its_byte_through_unchanged() {
        let mut registry = Registry::new();
        registry.add(PeripheralSlot {
            name: "a",
            presence: Presence::Always,
            active: false,
            ports: vec![PortMatch { mask: 0x00FF, value: 0x001F }],
            device: Box::new(FixedByte(0x5A)),
        });
        let mut memory = Memory48K::new(&dummy_rom());
        registry.update(&[], &mut memory, &mut Debugger::new());
        assert_eq!(registry.read(0x1F), Some(0x5A));
    }
}
