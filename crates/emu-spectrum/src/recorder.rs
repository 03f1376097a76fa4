//! Tape recording (§4.6, last paragraph): samples the MIC output level
//! once every `processor_speed / 44100` T-states and run-length-encodes
//! the sampled levels into a pulse sequence, exactly as a real tape
//! recorder digitises what the Spectrum is trying to save.
//!
//! The wire-level RLE byte encoding (short runs as one byte, long runs as
//! a zero-prefixed 32-bit little-endian count) is a storage detail of
//! whatever tape-image format ultimately persists the result — itself a
//! collaborator concern per the Non-goals. What this module owns is the
//! sampling and run-length accumulation; it hands back the decoded pulse
//! lengths directly as a [`format_tzx::TzxBlock::PulseSequence`], the
//! same in-memory shape `format-tzx` already uses for arbitrary pulse
//! data, rather than re-deriving a second byte-oriented encoding.

use format_tzx::TzxBlock;

/// Captures the MIC output level over time and produces a pulse-sequence
/// tape block once stopped.
pub struct TapeRecorder {
    active: bool,
    /// T-states per sample (`processor_speed / 44100`).
    sample_period: u32,
    counter: u32,
    last_level: bool,
    /// Current run length, in samples.
    run_samples: u32,
    pulses: Vec<u16>,
}

impl TapeRecorder {
    #[must_use]
    pub fn new(processor_speed: u32) -> Self {
        Self {
            active: false,
            sample_period: (processor_speed / 44_100).max(1),
            counter: 0,
            last_level: false,
            run_samples: 0,
            pulses: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin a new recording. `initial_level` is the MIC level observed
    /// at the moment recording starts.
    pub fn start(&mut self, initial_level: bool) {
        self.active = true;
        self.counter = 0;
        self.run_samples = 0;
        self.last_level = initial_level;
        self.pulses.clear();
    }

    /// Sample the current MIC level. Call once per T-state while active;
    /// a no-op when not recording.
    pub fn tick(&mut self, level: bool) {
        if !self.active {
            return;
        }
        self.counter += 1;
        if self.counter < self.sample_period {
            return;
        }
        self.counter = 0;
        if level == self.last_level {
            self.run_samples += 1;
        } else {
            self.flush_run();
            self.last_level = level;
            self.run_samples = 1;
        }
    }

    fn flush_run(&mut self) {
        if self.run_samples == 0 {
            return;
        }
        let tstates = self.run_samples.saturating_mul(self.sample_period);
        self.pulses.push(tstates.min(u32::from(u16::MAX)) as u16);
    }

    /// Stop recording, flushing the in-progress run and returning the
    /// captured pulses as a single tape block.
    pub fn stop(&mut self) -> TzxBlock {
        self.flush_run();
        self.active = false;
        TzxBlock::PulseSequence {
            pulses: std::mem::take(&mut self.pulses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_recorder_ignores_ticks() {
        let mut rec = TapeRecorder::new(3_500_000);
        for _ in 0..1000 {
            rec.tick(true);
        }
        assert!(!rec.is_active());
    }

    #[test]
    fn records_a_single_run_as_one_pulse() {
        let mut rec = TapeRecorder::new(44_100 * 10); // sample_period = 10
        rec.start(false);
        for _ in 0..100 {
            rec.tick(false);
        }
        let block = rec.stop();
        match block {
            TzxBlock::PulseSequence { pulses } => {
                assert_eq!(pulses.len(), 1);
                assert_eq!(pulses[0], 100);
            }
            _ => panic!("expected PulseSequence"),
        }
    }

    #[test]
    fn level_transition_starts_a_new_run() {
        let mut rec = TapeRecorder::new(44_100 * 10); // sample_period = 10
        rec.start(false);
        for _ in 0..50 {
            rec.tick(false);
        }
        for _ in 0..30 {
            rec.tick(true);
        }
        let block = rec.stop();
        match block {
            TzxBlock::PulseSequence { pulses } => {
                assert_eq!(pulses, vec![50, 30]);
            }
            _ => panic!("expected PulseSequence"),
        }
    }

    #[test]
    fn stop_without_new_samples_still_flushes_current_run() {
        let mut rec = TapeRecorder::new(44_100 * 10);
        rec.start(true);
        for _ in 0..25 {
            rec.tick(true);
        }
        let block = rec.stop();
        match block {
            TzxBlock::PulseSequence { pulses } => assert_eq!(pulses, vec![25]),
            _ => panic!("expected PulseSequence"),
        }
        assert!(!rec.is_active());
    }
}
