//! Per-model timing table and reset-time memory map selection.
//!
//! Every Spectrum-family model differs chiefly in T-states-per-frame,
//! CPU clock, contention window placement, and ROM/RAM page counts.
//! Rather than a bespoke struct per model, `MachineTiming` is a small
//! lookup table keyed by `SpectrumModel`; `PagedMemory`-backed model
//! structs (`Memory48K`, `Memory128K`, `MemoryPlus3`) consult it for
//! their reset-time page layout and the contention parameters `bus.rs`
//! needs. Figures below are the well-known fuse/spectaculator constants
//! for each machine.

use crate::config::SpectrumModel;

/// Timing and memory-map constants for one Spectrum-family model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineTiming {
    /// CPU clock in Hz.
    pub cpu_frequency: u32,
    /// T-states in one video frame.
    pub tstates_per_frame: u32,
    /// T-state within the frame at which the first interrupt fires.
    pub interrupt_tstate: u32,
    /// Length of the interrupt pulse, in T-states.
    pub interrupt_length: u32,
    /// T-state of the first screen-fetch contention window.
    pub contention_start: u32,
    /// Number of 16 KiB ROM pages fitted.
    pub rom_pages: u8,
    /// Number of 16 KiB RAM pages fitted.
    pub ram_pages: u8,
    /// Whether the model has a 128K-style bank-select port (`$7FFD`).
    pub has_128k_paging: bool,
    /// Whether the model has the +3-style extended paging port (`$1FFD`).
    pub has_plus3_paging: bool,
}

impl MachineTiming {
    /// Look up the timing table entry for a model.
    #[must_use]
    pub fn for_model(model: SpectrumModel) -> Self {
        match model {
            SpectrumModel::Spectrum16K => Self {
                cpu_frequency: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_tstate: 0,
                interrupt_length: 32,
                contention_start: 14_335,
                rom_pages: 1,
                ram_pages: 1,
                has_128k_paging: false,
                has_plus3_paging: false,
            },
            SpectrumModel::Spectrum48K => Self {
                cpu_frequency: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_tstate: 0,
                interrupt_length: 32,
                contention_start: 14_335,
                rom_pages: 1,
                ram_pages: 4,
                has_128k_paging: false,
                has_plus3_paging: false,
            },
            SpectrumModel::Spectrum128K | SpectrumModel::SpectrumPlus2 => Self {
                cpu_frequency: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_tstate: 0,
                interrupt_length: 36,
                contention_start: 14_361,
                rom_pages: 2,
                ram_pages: 8,
                has_128k_paging: true,
                has_plus3_paging: false,
            },
            SpectrumModel::SpectrumPlus2A | SpectrumModel::SpectrumPlus3 => Self {
                cpu_frequency: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_tstate: 0,
                interrupt_length: 36,
                contention_start: 14_361,
                rom_pages: 4,
                ram_pages: 8,
                has_128k_paging: true,
                has_plus3_paging: true,
            },
            SpectrumModel::SpectrumSE => Self {
                cpu_frequency: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_tstate: 0,
                interrupt_length: 36,
                contention_start: 14_361,
                rom_pages: 2,
                ram_pages: 8,
                has_128k_paging: true,
                has_plus3_paging: false,
            },
            SpectrumModel::TimexTC2048 => Self {
                cpu_frequency: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_tstate: 0,
                interrupt_length: 32,
                contention_start: 14_335,
                rom_pages: 1,
                ram_pages: 4,
                has_128k_paging: false,
                has_plus3_paging: false,
            },
            SpectrumModel::TimexTS2068 => Self {
                cpu_frequency: 3_500_000,
                tstates_per_frame: 69_888,
                interrupt_tstate: 0,
                interrupt_length: 32,
                contention_start: 14_335,
                rom_pages: 2,
                ram_pages: 4,
                has_128k_paging: false,
                has_plus3_paging: false,
            },
            SpectrumModel::Pentagon128 => Self {
                // Pentagon runs no contention and a longer frame; clones
                // traded timing fidelity for a simpler, faster ULA.
                cpu_frequency: 3_546_900,
                tstates_per_frame: 71_680,
                interrupt_tstate: 0,
                interrupt_length: 36,
                contention_start: u32::MAX,
                rom_pages: 2,
                ram_pages: 8,
                has_128k_paging: true,
                has_plus3_paging: false,
            },
            SpectrumModel::ScorpionZS256 => Self {
                cpu_frequency: 3_546_900,
                tstates_per_frame: 71_680,
                interrupt_tstate: 0,
                interrupt_length: 36,
                contention_start: u32::MAX,
                rom_pages: 4,
                ram_pages: 16,
                has_128k_paging: true,
                has_plus3_paging: false,
            },
            SpectrumModel::SpectrumNext => Self {
                cpu_frequency: 3_546_900,
                tstates_per_frame: 70_908,
                interrupt_tstate: 0,
                interrupt_length: 32,
                contention_start: 14_361,
                rom_pages: 4,
                ram_pages: 8,
                has_128k_paging: true,
                has_plus3_paging: true,
            },
        }
    }

    /// Divider from the 14 MHz-class master clock tick rate down to one
    /// CPU T-state. The master clock in `Spectrum` runs at `2 *
    /// cpu_frequency` (the ULA's half-T-state video resolution), so the
    /// CPU advances once every two master ticks on every model.
    #[must_use]
    pub fn cpu_divider(self) -> u32 {
        2
    }

    /// Nominal frames per second implied by this timing table.
    #[must_use]
    pub fn frame_rate(self) -> f64 {
        f64::from(self.cpu_frequency) / f64::from(self.tstates_per_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_48k_matches_well_known_constants() {
        let t = MachineTiming::for_model(SpectrumModel::Spectrum48K);
        assert_eq!(t.tstates_per_frame, 69_888);
        assert_eq!(t.cpu_frequency, 3_500_000);
        assert_eq!(t.ram_pages, 4);
        assert!(!t.has_128k_paging);
    }

    #[test]
    fn spectrum_128k_has_paging_and_longer_frame() {
        let t = MachineTiming::for_model(SpectrumModel::Spectrum128K);
        assert_eq!(t.tstates_per_frame, 70_908);
        assert!(t.has_128k_paging);
        assert!(!t.has_plus3_paging);
        assert_eq!(t.ram_pages, 8);
    }

    #[test]
    fn plus3_has_extended_paging() {
        let t = MachineTiming::for_model(SpectrumModel::SpectrumPlus3);
        assert!(t.has_plus3_paging);
        assert_eq!(t.rom_pages, 4);
    }

    #[test]
    fn pentagon_has_no_contention_window() {
        let t = MachineTiming::for_model(SpectrumModel::Pentagon128);
        assert_eq!(t.contention_start, u32::MAX);
        assert_eq!(t.tstates_per_frame, 71_680);
    }

    #[test]
    fn frame_rate_is_approximately_fifty_hertz() {
        let t = MachineTiming::for_model(SpectrumModel::Spectrum48K);
        assert!((t.frame_rate() - 50.08).abs() < 0.1);
    }

    #[test]
    fn every_model_has_a_timing_entry() {
        let models = [
            SpectrumModel::Spectrum16K,
            SpectrumModel::Spectrum48K,
            SpectrumModel::Spectrum128K,
            SpectrumModel::SpectrumPlus2,
            SpectrumModel::SpectrumPlus2A,
            SpectrumModel::SpectrumPlus3,
            SpectrumModel::SpectrumSE,
            SpectrumModel::TimexTC2048,
            SpectrumModel::TimexTS2068,
            SpectrumModel::Pentagon128,
            SpectrumModel::ScorpionZS256,
            SpectrumModel::SpectrumNext,
        ];
        for model in models {
            let t = MachineTiming::for_model(model);
            assert!(t.tstates_per_frame > 0);
            assert!(t.cpu_frequency > 0);
        }
    }
}
