//! Cycle-accurate ZX Spectrum emulator.
//!
//! Covers the Sinclair/Amstrad/clone family (16K through Pentagon/Scorpion),
//! a Z80 core and AY/ULA/FDC chips delegated to sibling crates, tape (TAP/TZX)
//! and RZX record/playback, a breakpoint debugger, and a peripheral registry
//! for the disk/IDE interfaces the family grew over its lifetime. The system
//! ticks at 14 MHz (master crystal); the ULA runs at 7 MHz and the CPU at
//! 3.5 MHz, both derived by integer division (faster on Pentagon/Scorpion
//! turbo modes, see `machine`).

mod beeper;
mod bus;
pub mod capture;
mod config;
pub mod debugger;
pub mod input;
mod keyboard;
pub mod keyboard_map;
pub mod machine;
pub mod mcp;
mod memory;
mod palette;
pub mod peripherals;
pub mod recorder;
pub mod rzx;
pub mod sna;
mod spectrum;
pub mod tape;
pub mod timer;
pub mod z80;

/// TAP file format — delegated to the `format-spectrum-tap` collaborator,
/// which knows nothing about a live machine. Re-exported under the
/// historical module name so the rest of this crate can keep writing
/// `crate::tap::TapFile`.
pub use format_spectrum_tap as tap;
/// TZX file format and T-state-accurate signal generator — delegated to
/// the `format-tzx` collaborator, same rationale as `tap` above.
pub use format_tzx as tzx;
pub use format_tzx::signal as tzx_signal;

pub use beeper::BeeperState;
pub use bus::SpectrumBus;
pub use config::{EmulatorSettings, SpectrumConfig, SpectrumModel};
pub use debugger::Debugger;
pub use input::{InputQueue, SpectrumKey};
pub use keyboard::KeyboardState;
pub use machine::MachineTiming;
pub use memory::{Memory128K, Memory48K, MemoryPlus3, SpectrumMemory};
pub use recorder::TapeRecorder;
pub use rzx::{EmbeddedSnapshotKind, RzxMode, RzxRecording};
pub use sna::load_sna;
pub use spectrum::Spectrum;
pub use tap::TapFile;
pub use tape::TapeDeck;
pub use timer::Pacer;
pub use tzx::TzxFile;
pub use tzx_signal::TzxSignal;
pub use z80::load_z80;
