//! Spectrum model configuration.

use std::path::PathBuf;

/// Supported Spectrum models.
///
/// The emulator uses trait objects (`Box<dyn SpectrumMemory>`, `Box<dyn SpectrumVideo>`)
/// internally, selected by this enum at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumModel {
    // Sinclair
    Spectrum16K,
    Spectrum48K,
    Spectrum128K,
    SpectrumPlus2,
    SpectrumPlus2A,
    SpectrumPlus3,
    SpectrumSE,
    // Timex
    TimexTC2048,
    TimexTS2068,
    // Russian/Eastern European
    Pentagon128,
    ScorpionZS256,
    // Modern
    SpectrumNext,
}

/// Configuration for creating a Spectrum instance.
pub struct SpectrumConfig {
    pub model: SpectrumModel,
    /// ROM data. Must be the correct size for the model (16,384 bytes for 48K).
    pub rom: Vec<u8>,
}

/// Emulator-wide settings (§6): machine-class quirks and peripheral
/// enablement that live outside any one snapshot or tape format, carried
/// from the CLI into `Spectrum`/`SpectrumBus` at construction time.
#[derive(Debug, Clone)]
pub struct EmulatorSettings {
    /// Keyboard Issue 2 vs Issue 3 ULA read behaviour (§4.3).
    pub issue2: bool,
    /// Whether the LD-BYTES/SA-BYTES ROM traps intercept tape loading/saving.
    pub tape_traps: bool,
    /// Accelerate tape loading while inside a recognised loader routine.
    pub fastload: bool,
    /// Auto-load the inserted tape/disk image on reset, as the real
    /// machine's AUTO LOAD or a disk's boot sector would.
    pub auto_load: bool,
    /// Prompt before destructive actions (resetting, ejecting media).
    pub confirm_actions: bool,
    /// Emulation speed as a percentage of real time (100 = real time).
    pub emulation_speed: u32,
    /// Display refresh rate in Hz.
    pub frame_rate: u32,
    /// Enable the Beta-128 (TR-DOS) disk interface.
    pub beta128: bool,
    /// Enable the +D disk interface.
    pub plusd: bool,
    /// Enable the Opus Discovery disk interface.
    pub opus: bool,
    /// Enable the DISCiPLE disk interface (shares the +D port wiring).
    pub disciple: bool,
    /// Enable the DivIDE IDE interface.
    pub divide_enabled: bool,
    /// Write-protect the DivIDE-attached CF/IDE media.
    pub divide_wp: bool,
    /// Enable the Kempston mouse.
    pub kempston_mouse: bool,
    /// Prefer compressed block encoding when persisting RZX recordings.
    pub rzx_compression: bool,
    /// Disable the fast-forward/rewind UI affordances for competition play.
    pub competition_mode: bool,
    pub beta128_rom: Option<PathBuf>,
    pub plusd_rom: Option<PathBuf>,
    pub opus_rom: Option<PathBuf>,
    pub divide_rom: Option<PathBuf>,
}

impl Default for EmulatorSettings {
    /// Historical fuse/Spectaculator defaults: loader traps, fastload,
    /// auto-load, and confirm-actions on; every peripheral off.
    fn default() -> Self {
        Self {
            issue2: false,
            tape_traps: true,
            fastload: true,
            auto_load: true,
            confirm_actions: true,
            emulation_speed: 100,
            frame_rate: 50,
            beta128: false,
            plusd: false,
            opus: false,
            disciple: false,
            divide_enabled: false,
            divide_wp: false,
            kempston_mouse: false,
            rzx_compression: true,
            competition_mode: false,
            beta128_rom: None,
            plusd_rom: None,
            opus_rom: None,
            divide_rom: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_historical_fuse_defaults() {
        let settings = EmulatorSettings::default();
        assert!(!settings.issue2);
        assert!(settings.tape_traps);
        assert!(settings.fastload);
        assert!(settings.auto_load);
        assert!(settings.confirm_actions);
        assert_eq!(settings.emulation_speed, 100);
        assert_eq!(settings.frame_rate, 50);
        assert!(!settings.beta128);
        assert!(!settings.plusd);
        assert!(!settings.opus);
        assert!(!settings.disciple);
        assert!(!settings.divide_enabled);
        assert!(!settings.divide_wp);
        assert!(!settings.kempston_mouse);
        assert!(settings.rzx_compression);
        assert!(!settings.competition_mode);
    }
}
