//! Top-level Spectrum system.
//!
//! The master crystal runs at 14 MHz. All component timing derives from this:
//! - ULA (video): ticks every 2 crystal ticks (7 MHz pixel clock)
//! - CPU (Z80): ticks every 4 crystal ticks (3.5 MHz, normal speed)
//!
//! The CPU divider is runtime-configurable for turbo modes (7/14/28 MHz on
//! Pentagon, Scorpion, and Next), but v1 always uses 4 (3.5 MHz).
//!
//! # Frame loop
//!
//! `run_frame()` ticks the master clock until the ULA signals frame complete.
//! One frame = 69,888 T-states = 279,552 crystal ticks (48K PAL).

#![allow(clippy::cast_possible_truncation)]

use emu_core::{Cpu, Observable, Tickable, Value};
use sinclair_ula::Ula;
use zilog_z80::Z80;

use crate::beeper::BeeperState;
use crate::bus::SpectrumBus;
use crate::config::{EmulatorSettings, SpectrumConfig, SpectrumModel};
use crate::debugger::{BreakpointKind, Debugger};
use crate::input::{InputQueue, SpectrumKey};
use crate::memory::{Memory128K, Memory48K, MemoryPlus3, SpectrumMemory};
use crate::peripherals::{self, PeripheralSlot, Presence};
use crate::recorder::TapeRecorder;
use crate::rzx::{EmbeddedSnapshotKind, RzxMode, RzxRecording};
use crate::tap::TapFile;
use crate::tape::TapeDeck;
use crate::tzx::{TzxBlock, TzxFile};
use crate::tzx_signal::TzxSignal;

/// CPU clock divider (crystal ticks per CPU T-state).
/// 4 = 3.5 MHz (normal speed for all Sinclair models).
const CPU_DIVIDER: u64 = 4;

/// Video clock divider (crystal ticks per pixel clock tick).
/// 2 = 7 MHz (ULA pixel clock).
const VIDEO_DIVIDER: u64 = 2;

/// Default audio output sample rate.
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// CPU frequency in Hz (3.5 MHz).
const CPU_FREQUENCY: u32 = 3_500_000;

/// ROM address of the LD-BYTES routine (tape loading entry point).
const LD_BYTES_ADDR: u16 = 0x0556;

/// ROM address of the SA-BYTES routine (tape saving entry point).
const SA_BYTES_ADDR: u16 = 0x04C2;

/// ZX Spectrum system.
pub struct Spectrum {
    cpu: Z80,
    bus: SpectrumBus,
    /// Master crystal tick counter.
    master_clock: u64,
    /// CPU clock divider (crystal ticks per CPU T-state).
    cpu_divider: u64,
    /// Completed frame counter.
    frame_count: u64,
    /// Timed input event queue for scripted key sequences.
    input_queue: InputQueue,
    /// Virtual tape deck for TAP loading (ROM trap / instant load).
    tape: TapeDeck,
    /// AY clock toggle (ticks every other CPU T-state).
    ay_toggle: bool,
    /// Spectrum model (stored for TZX 48K detection).
    model: SpectrumModel,
    /// TZX signal generator for real-time tape loading.
    tzx_signal: Option<TzxSignal>,
    /// RLE tape recorder (§4.6); samples MIC output while active.
    tape_recorder: TapeRecorder,
    /// CPU instruction count at the start of the current frame, used to
    /// compute the per-frame instruction count RZX (§4.7) stores.
    rzx_frame_start_instr: u64,
    /// Emulator-wide settings (§6) this machine was built with.
    settings: EmulatorSettings,
    /// Breakpoint registry and run-mode state machine (C9). The host
    /// (`mcp.rs`, or a future frontend) arms breakpoints through
    /// [`Self::debugger_mut`] and stops ticking once [`Self::halted`]
    /// reports true.
    debugger: Debugger,
    /// CPU instruction count last time an Execute breakpoint was checked,
    /// so `tick()` can tell an instruction just completed (the Z80 core
    /// only exposes a running total, not a per-instruction edge).
    last_instruction_count: u64,
    /// Whether the ULA's INT line was active last CPU tick, so the `ula.int`
    /// event breakpoint fires once per interrupt rather than once per
    /// T-state the line stays asserted.
    last_int_active: bool,
}

impl Spectrum {
    /// Create a new Spectrum from the given configuration, using the
    /// historical-default `EmulatorSettings`. See [`Self::with_settings`]
    /// for machine-class/peripheral configuration.
    ///
    /// # Panics
    ///
    /// Panics if the model is not yet supported or the ROM size is wrong.
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        Self::with_settings(config, EmulatorSettings::default())
    }

    /// Create a new Spectrum from the given configuration and settings
    /// (§6). Peripherals gated by `settings` still need their ROM image
    /// loaded by the caller via `enable_beta128`/`enable_plusd`/
    /// `enable_opus`/`enable_divide` — reading ROM files is the caller's
    /// job (see `main.rs`), not this constructor's.
    ///
    /// # Panics
    ///
    /// Panics if the model is not yet supported or the ROM size is wrong.
    #[must_use]
    pub fn with_settings(config: &SpectrumConfig, settings: EmulatorSettings) -> Self {
        let memory: Box<dyn SpectrumMemory> = match config.model {
            SpectrumModel::Spectrum48K => Box::new(Memory48K::new(&config.rom)),
            SpectrumModel::Spectrum128K | SpectrumModel::SpectrumPlus2 => {
                Box::new(Memory128K::new(&config.rom))
            }
            SpectrumModel::SpectrumPlus2A | SpectrumModel::SpectrumPlus3 => {
                Box::new(MemoryPlus3::new(&config.rom))
            }
            other => panic!("Model {other:?} is not yet supported"),
        };

        let has_ay = !matches!(
            config.model,
            SpectrumModel::Spectrum16K | SpectrumModel::Spectrum48K
        );

        let ula = Ula::new();
        let beeper = BeeperState::new(CPU_FREQUENCY, AUDIO_SAMPLE_RATE);
        let mut bus = SpectrumBus::new(memory, ula, beeper, settings.issue2);
        bus.rzx.set_competition_mode(settings.competition_mode);
        if has_ay {
            bus.enable_ay(CPU_FREQUENCY, AUDIO_SAMPLE_RATE);
            if let Some(ay) = &mut bus.ay {
                ay.set_stereo(gi_ay_3_8910::StereoMode::Acb);
            }
        }
        if matches!(
            config.model,
            SpectrumModel::SpectrumPlus2A | SpectrumModel::SpectrumPlus3
        ) {
            bus.fdc = Some(nec_upd765::Upd765::new());
        }

        Self {
            cpu: Z80::new(),
            bus,
            master_clock: 0,
            cpu_divider: CPU_DIVIDER,
            frame_count: 0,
            input_queue: InputQueue::new(),
            tape: TapeDeck::new(),
            ay_toggle: false,
            model: config.model,
            tzx_signal: None,
            tape_recorder: TapeRecorder::new(CPU_FREQUENCY),
            rzx_frame_start_instr: 0,
            settings,
            debugger: Debugger::new(),
            last_instruction_count: 0,
            last_int_active: false,
        }
    }

    /// The settings this machine was built with (§6).
    #[must_use]
    pub fn settings(&self) -> &EmulatorSettings {
        &self.settings
    }

    /// Read-only view of the breakpoint registry (C9).
    #[must_use]
    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    /// Mutable access to the breakpoint registry, for a host to arm and
    /// disarm breakpoints and resume from a halt.
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// Whether a breakpoint has fired and the host should stop ticking.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.debugger.mode() == crate::debugger::Mode::Halted
    }

    /// Enable the Beta-128 (TR-DOS) disk interface with the given ROM image.
    pub fn enable_beta128(&mut self, rom: Box<[u8]>) {
        self.add_peripheral(PeripheralSlot {
            name: "beta128",
            presence: Presence::Always,
            active: false,
            ports: peripherals::beta128::Beta128::ports(),
            device: Box::new(peripherals::beta128::Beta128::new(rom)),
        });
    }

    /// Enable the +D disk interface with the given ROM image. DISCiPLE
    /// shares this same port wiring (§4.9 doc comment on `peripherals::plusd`),
    /// so `settings.disciple` also routes here.
    pub fn enable_plusd(&mut self, rom: Box<[u8]>) {
        self.add_peripheral(PeripheralSlot {
            name: "plusd",
            presence: Presence::Always,
            active: false,
            ports: peripherals::plusd::PlusD::ports(),
            device: Box::new(peripherals::plusd::PlusD::new(rom)),
        });
    }

    /// Enable the Opus Discovery disk interface with the given ROM image.
    pub fn enable_opus(&mut self, rom: Box<[u8]>) {
        self.add_peripheral(PeripheralSlot {
            name: "opus",
            presence: Presence::Always,
            active: false,
            ports: peripherals::opus::Opus::ports(),
            device: Box::new(peripherals::opus::Opus::new(rom)),
        });
    }

    /// Enable the DivIDE interface with the given ROM image, optionally
    /// write-protecting the attached CF/IDE media (`settings.divide_wp`).
    pub fn enable_divide(&mut self, rom: Box<[u8]>, write_protected: bool) {
        self.add_peripheral(PeripheralSlot {
            name: "divide",
            presence: Presence::Always,
            active: false,
            ports: peripherals::ide::DivIde::ports(),
            device: Box::new(peripherals::ide::DivIde::new(rom, write_protected)),
        });
    }

    fn add_peripheral(&mut self, slot: PeripheralSlot) {
        self.bus.peripherals.add(slot);
        // `update` needs `&mut self.debugger` as the PagingObserver and
        // `&mut self.bus.memory` at the same time; take the debugger out
        // so the two borrows don't overlap, then replay what it queued
        // against `self` (now free again) once it's back in place.
        let mut debugger = std::mem::take(&mut self.debugger);
        self.bus.peripherals.update(&[], &mut *self.bus.memory, &mut debugger);
        self.debugger = debugger;
        self.drain_paging_events();
    }

    /// Replay paging events queued by the `PagingObserver` impl through
    /// `check_event`, now that `self` is free to serve as the `Observable`
    /// the conditional-expression evaluator needs.
    fn drain_paging_events(&mut self) {
        let mut debugger = std::mem::take(&mut self.debugger);
        for (event_type, event_detail) in debugger.drain_events() {
            debugger.check_event(&event_type, &event_detail, self);
        }
        self.debugger = debugger;
    }

    /// Load a DSK/EDSK disk image into the +3's uPD765 FDC, drive 0.
    ///
    /// # Errors
    ///
    /// Returns an error if no FDC is fitted on this model, or the image
    /// fails to parse.
    pub fn load_dsk(&mut self, data: &[u8]) -> Result<(), String> {
        let image = nec_upd765::dsk::parse_dsk(data)?;
        let fdc = self.bus.fdc.as_mut().ok_or("This model has no floppy disk controller")?;
        fdc.insert_disk(0, image);
        Ok(())
    }

    /// Run one complete frame (until the ULA signals frame complete).
    ///
    /// Processes any pending input queue events at the start of the frame,
    /// then ticks the master clock until the ULA signals frame complete.
    ///
    /// Returns the number of CPU T-states executed during the frame.
    pub fn run_frame(&mut self) -> u64 {
        self.input_queue.process(self.frame_count, &mut self.bus.keyboard);
        self.frame_count += 1;

        let start_ticks = self.cpu.total_ticks();

        loop {
            self.tick();
            if self.bus.ula.take_frame_complete() || self.halted() {
                break;
            }
        }

        let instr_count = self
            .cpu
            .instructions_executed()
            .saturating_sub(self.rzx_frame_start_instr);
        self.bus.rzx.end_frame(instr_count.try_into().unwrap_or(u16::MAX));
        self.rzx_frame_start_instr = self.cpu.instructions_executed();

        self.cpu.total_ticks() - start_ticks
    }

    /// Reference to the framebuffer (ARGB32).
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.ula.framebuffer()
    }

    /// Framebuffer width in pixels.
    #[must_use]
    pub fn framebuffer_width(&self) -> u32 {
        self.bus.ula.framebuffer_width()
    }

    /// Framebuffer height in pixels.
    #[must_use]
    pub fn framebuffer_height(&self) -> u32 {
        self.bus.ula.framebuffer_height()
    }

    /// Take the mixed audio buffer (beeper + AY if present). Drains both.
    ///
    /// Returns stereo samples as `[left, right]` pairs. The beeper is mono
    /// (duplicated to both channels); the AY provides stereo via ACB panning.
    pub fn take_audio_buffer(&mut self) -> Vec<[f32; 2]> {
        let beeper = self.bus.beeper.take_buffer();
        if let Some(ay) = &mut self.bus.ay {
            let ay_buf = ay.take_buffer();
            let len = beeper.len().min(ay_buf.len());
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let b = beeper[i];
                out.push([
                    (b + ay_buf[i][0]) * 0.5,
                    (b + ay_buf[i][1]) * 0.5,
                ]);
            }
            out
        } else {
            // No AY — beeper only, duplicate mono to stereo.
            beeper.into_iter().map(|s| [s, s]).collect()
        }
    }

    /// Reference to the CPU.
    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    /// Mutable reference to the CPU.
    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    /// Reference to the bus.
    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    /// Mutable reference to the bus.
    pub fn bus_mut(&mut self) -> &mut SpectrumBus {
        &mut self.bus
    }

    /// Master clock tick count.
    #[must_use]
    pub fn master_clock(&self) -> u64 {
        self.master_clock
    }

    /// Completed frame count.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Mutable reference to the timed input queue.
    pub fn input_queue(&mut self) -> &mut InputQueue {
        &mut self.input_queue
    }

    /// Press a key immediately (stays pressed until released).
    pub fn press_key(&mut self, key: SpectrumKey) {
        if let Some(bit) = key.kempston_bit() {
            self.bus.kempston |= 1 << bit;
        } else {
            let (row, bit) = key.matrix();
            self.bus.keyboard.set_key(row, bit, true);
        }
    }

    /// Release a key.
    pub fn release_key(&mut self, key: SpectrumKey) {
        if let Some(bit) = key.kempston_bit() {
            self.bus.kempston &= !(1 << bit);
        } else {
            let (row, bit) = key.matrix();
            self.bus.keyboard.set_key(row, bit, false);
        }
    }

    /// Release all keys.
    pub fn release_all_keys(&mut self) {
        self.bus.keyboard.release_all();
        self.bus.kempston = 0;
    }

    /// Insert a TAP file into the tape deck.
    pub fn insert_tap(&mut self, tap: TapFile) {
        self.tape.insert(tap);
    }

    /// Eject the tape.
    pub fn eject_tape(&mut self) {
        self.tape.eject();
    }

    /// Rewind the tape to the start.
    pub fn rewind_tape(&mut self) {
        self.tape.rewind();
    }

    /// Reference to the tape deck.
    #[must_use]
    pub fn tape(&self) -> &TapeDeck {
        &self.tape
    }

    /// Insert a TZX file and start playback.
    pub fn insert_tzx(&mut self, tzx: TzxFile) {
        let is_48k = self.model == SpectrumModel::Spectrum48K;
        let mut signal = TzxSignal::new(tzx.blocks, is_48k, CPU_FREQUENCY);
        signal.play();
        self.tzx_signal = Some(signal);
    }

    /// Eject the TZX tape and restore MIC loopback.
    pub fn eject_tzx(&mut self) {
        self.tzx_signal = None;
        self.bus.tape_ear = None;
    }

    /// Whether a TZX signal is currently playing.
    #[must_use]
    pub fn is_tzx_playing(&self) -> bool {
        self.tzx_signal
            .as_ref()
            .is_some_and(|s| s.is_playing())
    }

    /// The Spectrum model.
    #[must_use]
    pub fn model(&self) -> SpectrumModel {
        self.model
    }

    /// Check for and handle the ROM tape-loading trap.
    ///
    /// The Spectrum ROM's `LD-BYTES` routine at $0556 is the standard entry
    /// point for loading data from tape. Instead of emulating tape signal
    /// timing, we intercept this address and copy data directly from the
    /// TAP file into memory, reproducing `trap_load_block`'s (§4.6)
    /// register side effects exactly so the ROM's own caller (which reads
    /// carry, B, H, L, DE and IX on return) can't tell the difference.
    ///
    /// Register conventions on entry to LD-BYTES:
    ///   A  = expected flag byte ($00 for header, $FF for data)
    ///   DE = number of bytes expected
    ///   IX = destination address in memory
    ///   Carry flag = set for LOAD, clear for VERIFY
    ///
    /// On exit: carry set/clear mirrors success/failure; B = 0xB0 on
    /// success; H holds the running XOR parity of every byte touched,
    /// including the flag; L holds the last byte transferred (or the
    /// byte that failed verification); DE is decremented and IX advanced
    /// by the number of bytes actually transferred, not the number
    /// requested.
    fn check_tape_trap(&mut self) {
        if self.cpu.regs.pc != LD_BYTES_ADDR || !self.tape.is_loaded() {
            return;
        }

        let expected_flag = self.cpu.regs.a;
        let de = self.cpu.regs.de();
        let dest_addr = self.cpu.regs.ix;
        let is_load = self.cpu.regs.f & 0x01 != 0; // Carry flag

        // Get the next block from the tape
        let Some(block) = self.tape.next_block() else {
            // No more blocks -- let the ROM routine run (it will time out)
            return;
        };

        let flag = block.flag;
        let payload = &block.data;
        // `TapBlock` stores flag/data/checksum separately; the checksum
        // itself is just the XOR of everything before it.
        let checksum = payload.iter().fold(flag, |acc, &b| acc ^ b);
        let byte_at = |i: usize| -> u8 {
            if i < payload.len() { payload[i] } else { checksum }
        };

        // The block ID byte seeds both L and the running parity.
        let mut parity = flag;
        self.cpu.regs.l = flag;

        if flag != expected_flag {
            // Flag mismatch -- ROM would report "Tape loading error".
            self.cpu.regs.h = parity;
            self.cpu.regs.f &= !0x01; // Clear carry
            self.pop_ret();
            return;
        }

        // Virtual byte stream after the flag: the payload, then the
        // checksum byte. `read` is how much of that this request can touch.
        let after_flag_len = payload.len() + 1;
        let read = (de as usize).min(after_flag_len);
        if read > 0 {
            self.cpu.regs.l = byte_at(read - 1);
        }

        let mut transferred = 0usize;
        let mut verify_failed = false;
        for i in 0..read {
            let byte = byte_at(i);
            parity ^= byte;
            if is_load {
                self.bus.memory.write(dest_addr.wrapping_add(i as u16), byte);
            } else {
                let mem_byte = self.bus.memory.read(dest_addr.wrapping_add(i as u16));
                if mem_byte != byte {
                    // Verification failure: the byte that failed becomes
                    // L, and it does not count toward bytes transferred.
                    self.cpu.regs.l = byte;
                    verify_failed = true;
                    break;
                }
            }
            transferred = i + 1;
        }

        if !verify_failed && de as usize == transferred && transferred < after_flag_len {
            // Exactly the requested byte count was transferred and a
            // checksum byte remains to fold into the parity check.
            parity ^= byte_at(transferred);
            self.cpu.regs.a = parity;
            self.cpu.regs.b = 0xB0;
            self.cpu.regs.f |= 0x01; // Set carry: success.
        } else if !verify_failed {
            // Ran out of data before satisfying the request (or consumed
            // exactly the checksum byte with nothing left to check parity
            // against): failure, no parity byte available.
            self.cpu.regs.b = 0;
            self.cpu.regs.l = 1;
            self.cpu.regs.f &= !0x01; // Clear carry.
        } else {
            // Verify mismatch mid-transfer: B is left as the ROM's own
            // trap never reassigns it on this path.
            self.cpu.regs.f &= !0x01; // Clear carry.
        }

        self.cpu.regs.h = parity;
        self.cpu.regs.set_de(de.wrapping_sub(transferred as u16));
        self.cpu.regs.ix = dest_addr.wrapping_add(transferred as u16);

        // Pop return address from stack and redirect PC
        self.pop_ret();
    }

    /// Check for and handle the ROM tape-saving trap (§4.6 "tape trap
    /// saver"): reads `A` (flag), `DE` bytes from `IX`, and appends a
    /// fresh block to the tape image instead of emulating the SAVE
    /// routine's pulse-by-pulse output.
    fn check_save_trap(&mut self) {
        if self.cpu.regs.pc != SA_BYTES_ADDR {
            return;
        }
        let flag = self.cpu.regs.a;
        let len = self.cpu.regs.de() as usize;
        let src = self.cpu.regs.ix;
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            data.push(self.bus.memory.read(src.wrapping_add(i as u16)));
        }
        self.tape.append_block(flag, data);
        self.cpu.regs.f |= 0x01; // Carry set: save succeeded.
        self.pop_ret();
    }

    /// Whether tape traps (load + save) are active: gated by
    /// `settings.tape_traps` and disabled automatically while a TZX signal
    /// drives the EAR bit in real time, same rule as the load trap.
    fn tape_traps_active(&self) -> bool {
        self.settings.tape_traps && self.bus.tape_ear.is_none()
    }

    /// Start recording the MIC output as a fresh pulse-sequence block.
    pub fn start_tape_recording(&mut self) {
        let initial_level = (self.bus.last_fe_write >> 3) & 1 != 0;
        self.tape_recorder.start(initial_level);
    }

    /// Stop recording, returning the captured block for the host to
    /// append to whatever tape image format it is persisting.
    pub fn stop_tape_recording(&mut self) -> TzxBlock {
        self.tape_recorder.stop()
    }

    #[must_use]
    pub fn is_tape_recording(&self) -> bool {
        self.tape_recorder.is_active()
    }

    /// Start an RZX recording session (§4.7). `snapshot` is the raw bytes
    /// of a snapshot file (SNA or Z80, whichever the caller loaded to put
    /// the machine into its current state) embedded in the first IRB so
    /// playback can restore it; `None` means the recording continues from
    /// whatever state a prior RZX block already established.
    pub fn start_rzx_recording(&mut self, snapshot: Option<(EmbeddedSnapshotKind, Vec<u8>)>) {
        self.rzx_frame_start_instr = self.cpu.instructions_executed();
        self.bus
            .rzx
            .start_recording(u32::from(self.bus.ula.line_tstate()), snapshot);
    }

    /// Start replaying a previously captured RZX recording. Every `IN`
    /// during playback returns the recorded byte instead of the live bus
    /// value (§4.7 determinism invariant).
    pub fn start_rzx_playback(&mut self, recording: RzxRecording) {
        self.rzx_frame_start_instr = self.cpu.instructions_executed();
        self.bus.rzx.start_playback(recording);
    }

    /// Stop the current RZX recording or playback.
    pub fn stop_rzx(&mut self) {
        self.bus.rzx.stop();
    }

    #[must_use]
    pub fn rzx_mode(&self) -> RzxMode {
        self.bus.rzx.mode()
    }

    /// Finished recording, if any is in progress; consumes the session's
    /// accumulated state, leaving it idle.
    pub fn take_rzx_recording(&mut self) -> RzxRecording {
        std::mem::take(&mut self.bus.rzx).into_recording()
    }

    /// Last RZX playback error (exhaustion mid-frame), if any, cleared
    /// once read — same de-duplication shape as the rest of the UI error
    /// path (§7).
    pub fn take_rzx_error(&mut self) -> Option<String> {
        self.bus.rzx.take_error()
    }

    /// Pop the return address from the stack and redirect the CPU to it.
    fn pop_ret(&mut self) {
        let sp = self.cpu.regs.sp;
        let lo = self.bus.memory.read(sp);
        let hi = self.bus.memory.read(sp.wrapping_add(1));
        let ret_addr = u16::from(lo) | (u16::from(hi) << 8);
        self.cpu.regs.sp = sp.wrapping_add(2);
        self.cpu.set_pc(ret_addr);
    }
}

impl Tickable for Spectrum {
    fn tick(&mut self) {
        self.master_clock += 1;

        // Video ticks at 7 MHz (every 2 crystal ticks)
        if self.master_clock.is_multiple_of(VIDEO_DIVIDER) {
            let mem = &*self.bus.memory;
            self.bus.ula.tick(|addr| mem.vram_peek(addr));
        }

        // CPU ticks at 3.5 MHz (every 4 crystal ticks)
        if self.master_clock.is_multiple_of(self.cpu_divider) {
            // Advance TZX signal (one T-state) before CPU tick
            if let Some(ref mut signal) = self.tzx_signal {
                let level = signal.tick();
                self.bus.tape_ear = Some(level);
                if signal.is_finished() {
                    self.bus.tape_ear = None;
                }
            }

            // Check INT from ULA
            let int_active = self.bus.ula.int_active();
            if int_active {
                self.cpu.interrupt();
            }
            if int_active && !self.last_int_active {
                let mut debugger = std::mem::take(&mut self.debugger);
                debugger.check_event("ula", "int", self);
                self.debugger = debugger;
            }
            self.last_int_active = int_active;
            self.cpu.tick(&mut self.bus);
            // ROM traps: only when no TZX signal is driving the EAR bit.
            // TZX loading uses the ROM's own LD-BYTES/SA-BYTES via real
            // signal timing, so the traps must not short-circuit it.
            if self.tape_traps_active() {
                self.check_tape_trap();
                self.check_save_trap();
            }
            // Sample audio at CPU rate
            self.bus.beeper.sample();
            if self.tape_recorder.is_active() {
                let mic_level = (self.bus.last_fe_write >> 3) & 1 != 0;
                self.tape_recorder.tick(mic_level);
            }

            // AY clocks at half CPU rate (1.7734 MHz)
            self.ay_toggle = !self.ay_toggle;
            if self.ay_toggle && let Some(ay) = &mut self.bus.ay {
                ay.tick();
            }

            // Disk controllers (and any other peripheral with an internal
            // clock) pace their own step/settle/search delays off this.
            self.bus.peripherals.tick(1);

            // Breakpoints (C9): an instruction boundary just completed once
            // `instructions_executed()` advances, at which point `regs.pc`
            // already holds the address of the *next* instruction — the
            // same convention `mcp.rs`'s step helpers rely on.
            let instr_count = self.cpu.instructions_executed();
            if instr_count != self.last_instruction_count {
                self.last_instruction_count = instr_count;
                let pc = self.cpu.regs.pc;
                let mut debugger = std::mem::take(&mut self.debugger);
                debugger.check(BreakpointKind::Execute, pc, self);
                self.debugger = debugger;
            }
            let tstate = self.cpu.total_ticks() as u32;
            let mut debugger = std::mem::take(&mut self.debugger);
            debugger.check_time(tstate, self);
            self.debugger = debugger;
        }
    }
}

impl Observable for Spectrum {
    fn query(&self, path: &str) -> Option<Value> {
        // Route queries to sub-components
        if let Some(rest) = path.strip_prefix("cpu.") {
            self.cpu.query(rest)
        } else if let Some(rest) = path.strip_prefix("ula.") {
            match rest {
                "line" => Some(self.bus.ula.line().into()),
                "tstate" => Some(self.bus.ula.line_tstate().into()),
                "border" => Some(self.bus.ula.border_colour().into()),
                _ => None,
            }
        } else if let Some(rest) = path.strip_prefix("memory.") {
            let addr =
                if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
                    u16::from_str_radix(hex, 16).ok()
                } else if let Some(hex) = rest.strip_prefix('$') {
                    u16::from_str_radix(hex, 16).ok()
                } else {
                    rest.parse().ok()
                };
            addr.map(|a| Value::U8(self.bus.memory.peek(a)))
        } else if let Some(rest) = path.strip_prefix("ay.") {
            let ay = self.bus.ay.as_ref()?;
            match rest {
                "buffer_len" => Some(Value::U64(ay.buffer_len() as u64)),
                _ => None,
            }
        } else {
            match path {
                "master_clock" => Some(self.master_clock.into()),
                "cpu_divider" => Some(self.cpu_divider.into()),
                _ => self.cpu.query(path),
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cpu.<z80_paths>",
            "ula.line",
            "ula.tstate",
            "ula.border",
            "memory.<address>",
            "master_clock",
            "cpu_divider",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpectrumConfig, SpectrumModel};

    fn make_spectrum() -> Spectrum {
        // Use a minimal ROM that just halts: DI; HALT
        let mut rom = vec![0u8; 0x4000];
        rom[0] = 0xF3; // DI
        rom[1] = 0x76; // HALT
        Spectrum::new(&SpectrumConfig {
            model: SpectrumModel::Spectrum48K,
            rom,
        })
    }

    #[test]
    fn master_clock_advances() {
        let mut spec = make_spectrum();
        assert_eq!(spec.master_clock(), 0);
        spec.tick();
        assert_eq!(spec.master_clock(), 1);
    }

    #[test]
    fn run_frame_returns_tstate_count() {
        let mut spec = make_spectrum();
        let tstates = spec.run_frame();
        // Should be close to 69888 (may vary by a few due to instruction
        // boundaries not aligning exactly with frame boundaries)
        assert!(
            tstates >= 69_888 && tstates <= 69_900,
            "Expected ~69888 T-states, got {tstates}"
        );
    }

    #[test]
    fn framebuffer_correct_size() {
        let spec = make_spectrum();
        assert_eq!(spec.framebuffer_width(), 320);
        assert_eq!(spec.framebuffer_height(), 288);
        assert_eq!(spec.framebuffer().len(), 320 * 288);
    }

    #[test]
    fn observable_cpu_pc() {
        let spec = make_spectrum();
        let pc = spec.query("cpu.pc");
        assert_eq!(pc, Some(Value::U16(0)));
    }

    #[test]
    fn observable_ula() {
        let spec = make_spectrum();
        assert!(spec.query("ula.line").is_some());
        assert!(spec.query("ula.tstate").is_some());
        assert!(spec.query("ula.border").is_some());
    }

    #[test]
    fn observable_memory() {
        let mut spec = make_spectrum();
        assert_eq!(spec.query("memory.0x0000"), Some(Value::U8(0xF3)));

        spec.bus.memory.write(0x8000, 0xAB);
        assert_eq!(spec.query("memory.0x8000"), Some(Value::U8(0xAB)));
    }

    #[test]
    fn load_trap_sets_b_0xb0_and_advances_de_ix_on_success() {
        let mut spec = make_spectrum();
        let data = vec![0x01, 0x02, 0x03];
        spec.insert_tap(TapFile {
            blocks: vec![crate::tap::TapBlock { flag: 0xFF, data: data.clone() }],
        });
        spec.cpu.regs.pc = LD_BYTES_ADDR;
        spec.cpu.regs.a = 0xFF; // expected flag
        spec.cpu.regs.set_de(data.len() as u16);
        spec.cpu.regs.ix = 0x8000;
        spec.cpu.regs.f |= 0x01; // carry set: LOAD
        spec.cpu.regs.sp = 0xFFF0;
        spec.bus.memory.write(0xFFF0, 0x00);
        spec.bus.memory.write(0xFFF1, 0x90);

        spec.check_tape_trap();

        assert_eq!(spec.bus.memory.read(0x8000), 0x01);
        assert_eq!(spec.bus.memory.read(0x8001), 0x02);
        assert_eq!(spec.bus.memory.read(0x8002), 0x03);
        assert_eq!(spec.cpu.regs.f & 0x01, 0x01, "carry set on success");
        assert_eq!(spec.cpu.regs.b, 0xB0, "B=0xB0 on success (§4.6/E3)");
        assert_eq!(
            spec.cpu.regs.h, 0,
            "H's running XOR parity cancels out against the block's own checksum byte on success"
        );
        assert_eq!(spec.cpu.regs.a, 0, "A holds the same parity byte H does");
        assert_eq!(spec.cpu.regs.l, 0x03, "L holds the last byte transferred");
        assert_eq!(spec.cpu.regs.de(), 0, "DE decremented by bytes transferred");
        assert_eq!(spec.cpu.regs.ix, 0x8003, "IX advanced by bytes transferred");
        assert_eq!(spec.cpu.regs.pc, 0x9000, "returns via popped address");
    }

    #[test]
    fn load_trap_flag_mismatch_fails_without_transferring() {
        let mut spec = make_spectrum();
        spec.insert_tap(TapFile {
            blocks: vec![crate::tap::TapBlock { flag: 0x00, data: vec![0xAA] }],
        });
        spec.cpu.regs.pc = LD_BYTES_ADDR;
        spec.cpu.regs.a = 0xFF; // expects a data block, tape has a header block
        spec.cpu.regs.set_de(1);
        spec.cpu.regs.ix = 0x8000;
        spec.cpu.regs.f |= 0x01;
        spec.cpu.regs.sp = 0xFFF0;
        spec.bus.memory.write(0xFFF0, 0x00);
        spec.bus.memory.write(0xFFF1, 0x90);

        spec.check_tape_trap();

        assert_eq!(spec.cpu.regs.f & 0x01, 0, "carry clear on flag mismatch");
        assert_eq!(spec.cpu.regs.l, 0x00, "L holds the block's flag byte");
        assert_eq!(spec.bus.memory.read(0x8000), 0, "no data copied on mismatch");
    }

    #[test]
    fn verify_trap_succeeds_when_memory_matches_block() {
        let mut spec = make_spectrum();
        let data = vec![0x10, 0x20];
        spec.bus.memory.write(0x8000, 0x10);
        spec.bus.memory.write(0x8001, 0x20);
        spec.insert_tap(TapFile {
            blocks: vec![crate::tap::TapBlock { flag: 0xFF, data: data.clone() }],
        });
        spec.cpu.regs.pc = LD_BYTES_ADDR;
        spec.cpu.regs.a = 0xFF;
        spec.cpu.regs.set_de(data.len() as u16);
        spec.cpu.regs.ix = 0x8000;
        spec.cpu.regs.f &= !0x01; // carry clear: VERIFY
        spec.cpu.regs.sp = 0xFFF0;
        spec.bus.memory.write(0xFFF0, 0x00);
        spec.bus.memory.write(0xFFF1, 0x90);

        spec.check_tape_trap();

        assert_eq!(spec.cpu.regs.f & 0x01, 0x01, "carry set: verify matched");
        assert_eq!(spec.cpu.regs.b, 0xB0);
        assert_eq!(spec.cpu.regs.de(), 0);
        assert_eq!(spec.cpu.regs.ix, 0x8002);
    }

    #[test]
    fn verify_trap_fails_on_mismatch_and_does_not_advance_past_it() {
        let mut spec = make_spectrum();
        let data = vec![0x10, 0x20];
        spec.bus.memory.write(0x8000, 0x10);
        spec.bus.memory.write(0x8001, 0xFF); // mismatch on the second byte
        spec.insert_tap(TapFile {
            blocks: vec![crate::tap::TapBlock { flag: 0xFF, data: data.clone() }],
        });
        spec.cpu.regs.pc = LD_BYTES_ADDR;
        spec.cpu.regs.a = 0xFF;
        spec.cpu.regs.set_de(data.len() as u16);
        spec.cpu.regs.ix = 0x8000;
        spec.cpu.regs.f &= !0x01; // carry clear: VERIFY
        spec.cpu.regs.b = 0x42; // sentinel: must be left untouched on this path
        spec.cpu.regs.sp = 0xFFF0;
        spec.bus.memory.write(0xFFF0, 0x00);
        spec.bus.memory.write(0xFFF1, 0x90);

        spec.check_tape_trap();

        assert_eq!(spec.cpu.regs.f & 0x01, 0, "carry clear: verify mismatch");
        assert_eq!(spec.cpu.regs.b, 0x42, "B untouched on a verify mismatch");
        assert_eq!(spec.cpu.regs.l, 0x20, "L holds the byte that failed to verify");
        assert_eq!(spec.cpu.regs.de(), 1, "only the matching byte counted as transferred");
        assert_eq!(spec.cpu.regs.ix, 0x8001, "IX advanced only past the matching byte");
    }

    #[test]
    fn save_trap_appends_block_and_sets_carry() {
        let mut spec = make_spectrum();
        spec.bus.memory.write(0x8000, 0x11);
        spec.bus.memory.write(0x8001, 0x22);
        spec.cpu.regs.pc = SA_BYTES_ADDR;
        spec.cpu.regs.a = 0xFF;
        spec.cpu.regs.d = 0x00;
        spec.cpu.regs.e = 0x02;
        spec.cpu.regs.ix = 0x8000;
        spec.cpu.regs.f &= !0x01;
        spec.cpu.regs.sp = 0xFFF0;
        spec.bus.memory.write(0xFFF0, 0x00);
        spec.bus.memory.write(0xFFF1, 0x90);

        spec.check_save_trap();

        assert!(spec.tape.is_dirty());
        let bytes = spec.tape.save().expect("appended tape serialises");
        let reparsed = TapFile::parse(&bytes).expect("appended block is valid TAP");
        assert_eq!(reparsed.blocks[0].flag, 0xFF);
        assert_eq!(reparsed.blocks[0].data, vec![0x11, 0x22]);
        assert_eq!(spec.cpu.regs.f & 0x01, 0x01, "carry set on success");
        assert_eq!(spec.cpu.regs.pc, 0x9000, "returns via popped address");
    }

    #[test]
    fn tape_recording_captures_mic_transitions() {
        let mut spec = make_spectrum();
        spec.start_tape_recording();
        assert!(spec.is_tape_recording());
        for _ in 0..200 {
            spec.tick();
        }
        let block = spec.stop_tape_recording();
        assert!(!spec.is_tape_recording());
        assert!(matches!(block, crate::tzx::TzxBlock::PulseSequence { .. }));
    }

    #[test]
    fn rzx_recording_closes_one_frame_per_run_frame() {
        let mut spec = make_spectrum();
        spec.start_rzx_recording(None);
        assert_eq!(spec.rzx_mode(), RzxMode::Recording);

        spec.run_frame();
        spec.run_frame();
        spec.stop_rzx();

        let recording = spec.take_rzx_recording();
        assert_eq!(recording.blocks.len(), 1);
        assert_eq!(recording.blocks[0].frames.len(), 2);
        assert!(
            recording.blocks[0].frames[0].instruction_count > 0,
            "a 69888 T-state frame executes more than zero instructions"
        );
        assert_eq!(spec.rzx_mode(), RzxMode::Idle);
    }

    #[test]
    fn rzx_playback_substitutes_recorded_byte_over_live_state() {
        use emu_core::Bus;

        let mut recorder = make_spectrum();
        recorder.start_rzx_recording(None);
        // No keys pressed: Kempston port reads 0x00 live.
        let recorded_value = recorder.bus_mut().io_read(0x001F).value;
        assert_eq!(recorded_value, 0x00);
        recorder.run_frame();
        recorder.stop_rzx();
        let recording = recorder.take_rzx_recording();
        assert_eq!(recording.blocks[0].frames[0].in_bytes, vec![0x00]);

        let mut player = make_spectrum();
        player.start_rzx_playback(recording);
        assert_eq!(player.rzx_mode(), RzxMode::Playing);
        // Different live state this time -- playback must ignore it.
        player.bus_mut().kempston = 0xFF;
        let replayed = player.bus_mut().io_read(0x001F).value;
        assert_eq!(replayed, 0x00, "playback returns the recorded byte, not live 0xFF");
    }

    #[test]
    fn with_settings_threads_issue2_into_the_bus() {
        let mut rom = vec![0u8; 0x4000];
        rom[0] = 0xF3;
        rom[1] = 0x76;
        let config = SpectrumConfig { model: SpectrumModel::Spectrum48K, rom };
        let mut settings = EmulatorSettings::default();
        settings.issue2 = true;
        let spec = Spectrum::with_settings(&config, settings);
        assert!(spec.bus().issue2);
        assert!(spec.settings().issue2);
    }

    #[test]
    fn with_settings_threads_competition_mode_into_rzx() {
        let mut rom = vec![0u8; 0x4000];
        rom[0] = 0xF3;
        rom[1] = 0x76;
        let config = SpectrumConfig { model: SpectrumModel::Spectrum48K, rom };
        let mut settings = EmulatorSettings::default();
        settings.competition_mode = true;
        let spec = Spectrum::with_settings(&config, settings);
        assert!(spec.bus().rzx.competition_mode());
    }

    #[test]
    fn tape_traps_disabled_by_settings_let_rom_time_out() {
        let mut rom = vec![0u8; 0x4000];
        rom[0] = 0xF3;
        rom[1] = 0x76;
        let config = SpectrumConfig { model: SpectrumModel::Spectrum48K, rom };
        let mut settings = EmulatorSettings::default();
        settings.tape_traps = false;
        let mut spec = Spectrum::with_settings(&config, settings);
        assert!(!spec.tape_traps_active());
    }

    #[test]
    fn enable_beta128_activates_slot_and_pages_rom() {
        let mut spec = make_spectrum();
        let rom = vec![0xAAu8; 0x4000].into_boxed_slice();
        spec.enable_beta128(rom);
        assert!(spec.bus().peripherals.slot("beta128").unwrap().active);
    }

    #[test]
    fn load_dsk_rejects_models_without_an_fdc() {
        let mut spec = make_spectrum();
        let err = spec.load_dsk(&[]).unwrap_err();
        assert!(err.contains("floppy disk controller"));
    }

    #[test]
    fn enable_beta128_fires_a_paging_event_breakpoint() {
        use crate::debugger::Life;

        let mut spec = make_spectrum();
        spec.debugger_mut().add_event_breakpoint("paging", "page:0:beta128", None, Life::Permanent);
        let rom = vec![0xAAu8; 0x4000].into_boxed_slice();
        spec.enable_beta128(rom);
        assert!(spec.halted());
    }

    #[test]
    fn execute_breakpoint_halts_tick_loop_at_the_target_pc() {
        use crate::debugger::Life;

        let mut spec = make_spectrum();
        // ROM is DI (at $0000); HALT (at $0001) — the HALT opcode never
        // advances PC again, so a breakpoint on $0001 is reachable exactly
        // once the DI instruction completes.
        spec.debugger_mut().add_breakpoint(BreakpointKind::Execute, 0x0001, None, Life::Permanent);

        for _ in 0..40 {
            spec.tick();
            if spec.halted() {
                break;
            }
        }

        assert!(spec.halted());
        assert_eq!(spec.cpu().regs.pc, 0x0001);
    }

    #[test]
    fn resume_clears_halted_state() {
        use crate::debugger::Life;

        let mut spec = make_spectrum();
        spec.debugger_mut().add_breakpoint(BreakpointKind::Execute, 0x0001, None, Life::OneShot);
        for _ in 0..40 {
            spec.tick();
            if spec.halted() {
                break;
            }
        }
        assert!(spec.halted());
        spec.debugger_mut().resume();
        assert!(!spec.halted());
    }
}
