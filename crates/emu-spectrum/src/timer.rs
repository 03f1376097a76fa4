//! Real-time frame pacing and speed estimation (C11).

use std::time::{Duration, Instant};

/// Number of one-second wall-clock samples kept for the running speed
/// estimate.
const SPEED_SAMPLES: usize = 10;

/// Paces emulated frames against wall-clock time and reports the
/// emulator's running speed as a percentage of real-time.
pub struct Pacer {
    frame_duration: Duration,
    next_deadline: Option<Instant>,
    sample_window_start: Instant,
    frames_this_window: u32,
    speed_samples: Vec<f64>,
}

impl Pacer {
    /// `frame_rate` is the model's nominal frames/second (see
    /// `MachineTiming::frame_rate`).
    #[must_use]
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_duration: Duration::from_secs_f64(1.0 / frame_rate),
            next_deadline: None,
            sample_window_start: Instant::now(),
            frames_this_window: 0,
            speed_samples: Vec::with_capacity(SPEED_SAMPLES),
        }
    }

    /// Call once per emulated frame. Sleeps (in up-to-10ms slices) until
    /// the next frame's wall-clock deadline, then records the deadline
    /// for the following call. The first call establishes the baseline
    /// and returns immediately.
    pub fn sleep_to_deadline(&mut self) {
        let now = Instant::now();
        let deadline = match self.next_deadline {
            Some(d) => d,
            None => {
                self.next_deadline = Some(now + self.frame_duration);
                self.sample_window_start = now;
                return;
            }
        };

        let mut remaining = deadline.saturating_duration_since(now);
        while remaining > Duration::ZERO {
            let slice = remaining.min(Duration::from_millis(10));
            std::thread::sleep(slice);
            remaining = deadline.saturating_duration_since(Instant::now());
        }

        self.next_deadline = Some(deadline + self.frame_duration);
        self.record_frame();
    }

    /// Record a frame without sleeping — used when audio buffer
    /// occupancy is the pacing signal instead of wall-clock sleep.
    pub fn record_frame(&mut self) {
        self.frames_this_window += 1;
        let elapsed = self.sample_window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let expected_frames = elapsed.as_secs_f64() / self.frame_duration.as_secs_f64();
            let speed = f64::from(self.frames_this_window) / expected_frames * 100.0;
            if self.speed_samples.len() == SPEED_SAMPLES {
                self.speed_samples.remove(0);
            }
            self.speed_samples.push(speed);
            self.frames_this_window = 0;
            self.sample_window_start = Instant::now();
        }
    }

    /// Average running speed as a percentage of real-time, over the
    /// last up-to-10 one-second samples. Returns 100.0 until the first
    /// sample window completes.
    #[must_use]
    pub fn speed_percent(&self) -> f64 {
        if self.speed_samples.is_empty() {
            return 100.0;
        }
        self.speed_samples.iter().sum::<f64>() / self.speed_samples.len() as f64
    }

    /// Nominal duration of one frame.
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_defaults_to_one_hundred_percent() {
        let pacer = Pacer::new(50.08);
        assert!((pacer.speed_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn frame_duration_matches_frame_rate() {
        let pacer = Pacer::new(50.0);
        assert!((pacer.frame_duration().as_secs_f64() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn first_sleep_call_establishes_baseline_without_blocking() {
        let mut pacer = Pacer::new(1000.0);
        let start = Instant::now();
        pacer.sleep_to_deadline();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn record_frame_accumulates_without_panicking() {
        let mut pacer = Pacer::new(50.0);
        for _ in 0..5 {
            pacer.record_frame();
        }
        assert!(pacer.speed_percent() > 0.0);
    }
}
