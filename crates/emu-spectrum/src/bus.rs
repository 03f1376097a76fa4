//! Spectrum bus: memory and I/O routing.
//!
//! The bus connects the Z80 CPU to memory, video, keyboard, and beeper.
//! I/O routing is model-aware: v1 implements port $FE only. Future models
//! will add $7FFD (128K banking), $FFFD/$BFFD (AY audio), $FF (Timex SCLD),
//! etc. Disk/IDE/network add-ons (Beta-128, +D, Opus, DivIDE) are routed
//! through the `peripherals::Registry` instead of being hardcoded here.
//!
//! # Contention
//!
//! Memory contention is delegated to the ULA via `ula.contention()`.
//! The bus adds the returned wait states to the `ReadResult`. I/O contention
//! is similarly delegated via `ula.io_contention()`.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{Bus, ReadResult};
use gi_ay_3_8910::Ay3_8910;
use nec_upd765::Upd765;
use sinclair_ula::Ula;

use crate::beeper::BeeperState;
use crate::keyboard::KeyboardState;
use crate::memory::SpectrumMemory;
use crate::peripherals::Registry;
use crate::rzx::RzxSession;

/// The Spectrum bus, implementing `emu_core::Bus`.
///
/// Owns the memory, ULA, keyboard, and beeper subsystems. The CPU
/// accesses all of these through the `Bus` trait.
pub struct SpectrumBus {
    pub memory: Box<dyn SpectrumMemory>,
    pub ula: Ula,
    pub keyboard: KeyboardState,
    pub beeper: BeeperState,
    /// Last value written to port $FE (for EAR bit and border).
    pub last_fe_write: u8,
    /// Kempston joystick state: bits 0-4 = right, left, down, up, fire (active-high).
    pub kempston: u8,
    /// AY-3-8910 sound chip (present on 128K/+2/+3 models).
    pub ay: Option<Ay3_8910>,
    /// NEC uPD765 floppy disk controller (present on +3 only).
    pub fdc: Option<Upd765>,
    /// Tape EAR override: `Some(level)` when TZX signal is active, `None`
    /// falls back to MIC loopback (bit 3 of last $FE write).
    pub tape_ear: Option<bool>,
    /// RZX capture/replay session (§4.7, C8). Idle unless a recording or
    /// playback is active; every `IN` passes through it so playback can
    /// substitute recorded bytes transparently to the rest of the bus.
    pub rzx: RzxSession,
    /// Disk/IDE/network add-on registry (§4.9, C10): Beta-128, +D, Opus,
    /// and DivIDE all live here instead of as bespoke hardcoded ports.
    pub peripherals: Registry,
    /// Issue 2 vs Issue 3 keyboard ULA read behaviour (§4.3/§6 `issue2`).
    pub issue2: bool,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(
        memory: Box<dyn SpectrumMemory>,
        ula: Ula,
        beeper: BeeperState,
        issue2: bool,
    ) -> Self {
        Self {
            memory,
            ula,
            keyboard: KeyboardState::new(),
            beeper,
            last_fe_write: 0,
            kempston: 0,
            ay: None,
            fdc: None,
            tape_ear: None,
            rzx: RzxSession::new(),
            peripherals: Registry::new(),
            issue2,
        }
    }

    /// Enable the AY sound chip (for 128K/+2/+3 models).
    pub fn enable_ay(&mut self, cpu_frequency: u32, sample_rate: u32) {
        // AY clock is CPU clock / 2 on the Spectrum 128
        self.ay = Some(Ay3_8910::new(cpu_frequency / 2, sample_rate));
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u32) -> ReadResult {
        let addr16 = addr as u16;
        let data = self.memory.read(addr16);
        let wait = self.ula.contention(self.memory.contended_page(addr16));

        // Snow: CPU read from display memory during ULA fetch → corrupts ULA's bitmap
        if addr16 >= 0x4000 && addr16 <= 0x5AFF && self.ula.is_screen_fetch_phase() {
            self.ula.set_snow_byte(data);
        }

        ReadResult::with_wait(data, wait)
    }

    fn write(&mut self, addr: u32, value: u8) -> u8 {
        let addr16 = addr as u16;
        let wait = self.ula.contention(self.memory.contended_page(addr16));
        self.memory.write(addr16, value);
        wait
    }

    fn io_read(&mut self, addr: u32) -> ReadResult {
        let port = addr as u16;
        let ula_port = port & 0x01 == 0;
        let contended_high = self.memory.contended_page(port);
        let wait = self.ula.io_contention(ula_port, contended_high);

        // Kempston joystick (§6: `(port & 0x00E0) == 0x0000`, wider than
        // just $1F so clone decodes that ignore the high bits still hit it).
        if port & 0x00E0 == 0x0000 {
            let joystick = self.kempston;
            let combined = self.peripherals.read(port).map_or(joystick, |p| p & joystick);
            return ReadResult::with_wait(self.rzx.on_io_read(combined), wait);
        }

        // Port $2FFD: FDC main status register (+3 only)
        if port & 0xF002 == 0x2000 {
            if let Some(ref fdc) = self.fdc {
                let value = fdc.read_msr();
                return ReadResult::with_wait(self.rzx.on_io_read(value), wait);
            }
        }

        // Port $3FFD: FDC data register read (+3 only)
        if port & 0xF002 == 0x3000 {
            if let Some(ref mut fdc) = self.fdc {
                let value = fdc.read_data();
                return ReadResult::with_wait(self.rzx.on_io_read(value), wait);
            }
        }

        // Disk/IDE/network peripheral registry (Beta-128, +D, Opus, DivIDE).
        if let Some(value) = self.peripherals.read(port) {
            return ReadResult::with_wait(self.rzx.on_io_read(value), wait);
        }

        // Port $FE (active when bit 0 is clear)
        let data = if ula_port {
            let addr_high = (port >> 8) as u8;
            let keyboard = self.keyboard.read(addr_high) & 0x1F;
            // Bit 7: always 1 on both issues. Bit 5: always 1 on Issue 3;
            // on Issue 2 it instead reflects EAR, reading 0 (clearing the
            // bit) only once EAR has gone low (§3 Issue-2/Issue-3 quirk).
            // Bit 6: EAR input proper. When a TZX signal is active, EAR
            // comes from the tape; otherwise it reflects MIC output
            // (bit 3 of the last $FE write).
            let ear_high = if let Some(level) = self.tape_ear {
                level
            } else {
                self.last_fe_write & 0x08 != 0
            };
            let bit5 = if self.issue2 && !ear_high { 0x00 } else { 0x20 };
            let bit6 = if ear_high { 0x40 } else { 0x00 };
            keyboard | 0x80 | bit5 | bit6
        } else if port & 0xC002 == 0xC000 {
            // Port $FFFD: AY register read
            if let Some(ay) = &self.ay {
                ay.read_data()
            } else {
                0xFF
            }
        } else {
            // Non-ULA ports: floating bus leaks ULA data bus
            let mem = &*self.memory;
            self.ula.floating_bus(|a| mem.peek(a))
        };

        ReadResult::with_wait(self.rzx.on_io_read(data), wait)
    }

    fn io_write(&mut self, addr: u32, value: u8) -> u8 {
        let port = addr as u16;
        let ula_port = port & 0x01 == 0;
        let contended_high = self.memory.contended_page(port);
        let wait = self.ula.io_contention(ula_port, contended_high);

        // Port $FE (active when bit 0 is clear)
        if ula_port {
            self.last_fe_write = value;
            // Bit 0-2: border colour
            self.ula.set_border_colour(value & 0x07);
            // Bit 3: MIC output (tape) -- ignored
            // Bit 4: beeper
            self.beeper.set_level((value >> 4) & 1);
        }

        // Port $7FFD: 128K bank switching (bit 1 set, bit 15 clear)
        if port & 0x8002 == 0x0000 && !ula_port {
            self.memory.write_bank_register(value);
        }

        // Port $1FFD: +3 memory/disk banking (bit 12 set, bit 1 clear, not ULA)
        if port & 0xF002 == 0x1000 && !ula_port {
            self.memory.write_plus3_register(value);
        }

        // Port $3FFD: FDC data register write (+3 only)
        if port & 0xF002 == 0x3000 {
            if let Some(ref mut fdc) = self.fdc {
                fdc.write_data(value);
            }
        }

        // Port $FFFD: AY register select
        if port & 0xC002 == 0xC000 && let Some(ay) = &mut self.ay {
            ay.select_register(value);
        }

        // Port $BFFD: AY data write
        if port & 0xC002 == 0x8000 && let Some(ay) = &mut self.ay {
            ay.write_data(value);
        }

        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory48K;

    fn make_bus() -> SpectrumBus {
        let rom = vec![0u8; 0x4000];
        let memory = Box::new(Memory48K::new(&rom));
        let ula = Ula::new();
        let beeper = BeeperState::new(3_500_000, 48_000);
        SpectrumBus::new(memory, ula, beeper, false)
    }

    #[test]
    fn memory_read_write() {
        let mut bus = make_bus();
        bus.write(0x8000, 0xAB);
        assert_eq!(bus.read(0x8000).value, 0xAB);
    }

    #[test]
    fn rom_write_ignored() {
        let mut bus = make_bus();
        bus.write(0x0000, 0xFF);
        assert_eq!(bus.read(0x0000).value, 0x00); // ROM was all zeros
    }

    #[test]
    fn keyboard_read_via_io() {
        let mut bus = make_bus();
        // No keys pressed -- all bits high
        let result = bus.io_read(0xFEFE); // Port $FE, scan row 0
        assert_eq!(result.value & 0x1F, 0x1F);

        // Press SHIFT (row 0, bit 0)
        bus.keyboard.set_key(0, 0, true);
        let result = bus.io_read(0xFEFE);
        assert_eq!(result.value & 0x01, 0x00); // Active low
    }

    #[test]
    fn border_and_beeper_via_io() {
        let mut bus = make_bus();
        // Write port $FE: border=2 (red), beeper=1
        bus.io_write(0x00FE, 0x12); // 0b0001_0010: beeper=1, border=010
        assert_eq!(bus.ula.border_colour(), 2);
        assert_eq!(bus.beeper.level(), 1);
    }

    #[test]
    fn unimplemented_port_returns_ff() {
        let mut bus = make_bus();
        let result = bus.io_read(0x00FF); // Odd port, not $FE
        assert_eq!(result.value, 0xFF);
    }

    #[test]
    fn kempston_port_returns_joystick_state() {
        let mut bus = make_bus();
        // No buttons pressed
        let result = bus.io_read(0x001F);
        assert_eq!(result.value, 0x00);

        // Press right (bit 0) and fire (bit 4)
        bus.kempston = 0b0001_0001;
        let result = bus.io_read(0x001F);
        assert_eq!(result.value, 0x11);
    }

    #[test]
    fn tape_ear_overrides_mic_loopback() {
        let mut bus = make_bus();

        // Set MIC bit high — without tape_ear, EAR should reflect MIC
        bus.io_write(0x00FE, 0x08);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x40, "MIC loopback");

        // Override with tape_ear = Some(false) — EAR should be 0
        bus.tape_ear = Some(false);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x00, "tape_ear=false overrides MIC");

        // Override with tape_ear = Some(true) — EAR should be 1
        bus.tape_ear = Some(true);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x40, "tape_ear=true");

        // Remove override — MIC loopback resumes
        bus.tape_ear = None;
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x40, "MIC loopback restored");

        // Clear MIC bit — EAR should now be 0 again
        bus.io_write(0x00FE, 0x00);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x00, "MIC cleared, no tape_ear");
    }

    #[test]
    fn snow_triggered_by_display_read_during_fetch() {
        let mut bus = make_bus();

        // Write a known value into display memory
        bus.write(0x4000, 0xAB);

        // Position ULA at a screen fetch phase (line 64, T-state 0)
        bus.ula.set_position(64, 0);
        assert!(bus.ula.is_screen_fetch_phase());

        // Read from display memory — should trigger snow
        let result = bus.read(0x4000);
        assert_eq!(result.value, 0xAB);
        assert!(bus.ula.has_snow_byte(), "snow_byte should be set after display read during fetch");
    }

    #[test]
    fn no_snow_outside_fetch_phase() {
        let mut bus = make_bus();
        bus.write(0x4000, 0xAB);

        // Position ULA at idle phase (line 64, T-state 4)
        bus.ula.set_position(64, 4);
        assert!(!bus.ula.is_screen_fetch_phase());

        bus.read(0x4000);
        assert!(!bus.ula.has_snow_byte(), "no snow during idle phase");
    }

    #[test]
    fn no_snow_outside_display_memory() {
        let mut bus = make_bus();

        // Position ULA at fetch phase
        bus.ula.set_position(64, 0);
        assert!(bus.ula.is_screen_fetch_phase());

        // Read from outside display memory ($5B00 = above attribute area)
        bus.read(0x5B00);
        assert!(!bus.ula.has_snow_byte(), "no snow outside $4000-$5AFF");

        // Read from RAM above screen area
        bus.read(0x8000);
        assert!(!bus.ula.has_snow_byte(), "no snow in upper RAM");
    }

    #[test]
    fn ear_reflects_mic_output() {
        let mut bus = make_bus();

        // No write to $FE yet — MIC bit 3 = 0, so EAR bit 6 = 0
        let result = bus.io_read(0xFEFE);
        assert_eq!(result.value & 0x40, 0x00, "EAR should be 0 when MIC is 0");

        // Write to $FE with MIC bit (bit 3) set
        bus.io_write(0x00FE, 0x08);
        let result = bus.io_read(0xFEFE);
        assert_eq!(result.value & 0x40, 0x40, "EAR should be 1 when MIC is 1");

        // Write to $FE with MIC bit clear
        bus.io_write(0x00FE, 0x00);
        let result = bus.io_read(0xFEFE);
        assert_eq!(result.value & 0x40, 0x00, "EAR should be 0 when MIC is 0");
    }

    #[test]
    fn issue3_bit5_always_high_regardless_of_ear() {
        let mut bus = make_bus();
        bus.issue2 = false;
        bus.tape_ear = Some(false);
        assert_eq!(bus.io_read(0xFEFE).value & 0x20, 0x20, "bit5 stays set on Issue 3 when EAR is low");
        bus.tape_ear = Some(true);
        assert_eq!(bus.io_read(0xFEFE).value & 0x20, 0x20, "bit5 stays set on Issue 3 when EAR is high");
    }

    #[test]
    fn issue2_bit5_tracks_ear_low() {
        let mut bus = make_bus();
        bus.issue2 = true;
        bus.tape_ear = Some(false);
        assert_eq!(bus.io_read(0xFEFE).value, 0xBF, "bit5 clears alongside bit6 on Issue 2 when EAR is low");
        bus.tape_ear = Some(true);
        assert_eq!(bus.io_read(0xFEFE).value, 0xFF, "bit5 and bit6 both set on Issue 2 when EAR is high");
    }

    #[test]
    fn registry_peripheral_port_is_routed_and_and_combined_with_kempston() {
        use crate::debugger::Debugger;
        use crate::memory::Memory48K;
        use crate::peripherals::{PeripheralSlot, Presence, beta128};

        let mut bus = make_bus();
        let rom = vec![0u8; 0x4000].into_boxed_slice();
        bus.peripherals.add(PeripheralSlot {
            name: "beta128",
            presence: Presence::Always,
            active: false,
            ports: beta128::Beta128::ports(),
            device: Box::new(beta128::Beta128::new(rom)),
        });
        let mut memory = Memory48K::new(&[0u8; 0x4000]);
        bus.peripherals.update(&[], &mut memory, &mut Debugger::new());

        // $1F is both Kempston and a Beta-128 port; the registry's answer
        // must be routed and AND-combined with the joystick byte.
        bus.kempston = 0xFF;
        let fdc_status = bus.io_read(0x001F).value;
        assert_ne!(fdc_status, 0xFF, "Beta-128 FDC status should mask the open joystick byte");

        // $3F only decodes through the registry (track register).
        let track = bus.io_read(0x003F).value;
        assert_eq!(track, 0x00, "freshly-reset WD179x track register reads 0");
    }
}
