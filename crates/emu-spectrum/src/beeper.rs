//! Beeper (1-bit speaker) audio generation.
//!
//! The ULA's beeper is driven by bit 4 of port `$FE` writes: a single
//! on/off level, sampled once per CPU T-state and downsampled to the
//! host's audio rate exactly like `gi-ay-3-8910`'s tone generators —
//! accumulate-and-average rather than nearest-neighbour, so a beeper
//! level held for a fraction of a sample period still contributes its
//! correct share of the averaged output.

/// 1-bit beeper sample generator.
pub struct BeeperState {
    /// Current output level (0 or 1, from port `$FE` bit 4).
    level: u8,
    accumulator: f32,
    sample_count: u32,
    ticks_per_sample: f32,
    buffer: Vec<f32>,
}

impl BeeperState {
    /// `cpu_frequency` is the CPU clock in Hz (3.5 MHz on 48K/128K);
    /// `sample_rate` is the audio output rate (typically 48,000).
    #[must_use]
    pub fn new(cpu_frequency: u32, sample_rate: u32) -> Self {
        Self {
            level: 0,
            accumulator: 0.0,
            sample_count: 0,
            ticks_per_sample: cpu_frequency as f32 / sample_rate as f32,
            buffer: Vec::with_capacity(sample_rate as usize / 50 + 1),
        }
    }

    /// Set the beeper output level (0 or 1).
    pub fn set_level(&mut self, level: u8) {
        self.level = level & 1;
    }

    /// Current output level.
    #[must_use]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Advance one CPU T-state, accumulating the current level into the
    /// downsampling window and emitting a sample once the window fills.
    pub fn sample(&mut self) {
        self.accumulator += f32::from(self.level);
        self.sample_count += 1;

        if self.sample_count as f32 >= self.ticks_per_sample {
            let n = self.sample_count as f32;
            // Centre around 0, full excursion -1.0..=1.0.
            self.buffer.push(self.accumulator / n * 2.0 - 1.0);
            self.accumulator = 0.0;
            self.sample_count = 0;
        }
    }

    /// Take the audio output buffer (drains it). One sample per channel.
    pub fn take_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }

    /// Number of samples currently buffered.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
