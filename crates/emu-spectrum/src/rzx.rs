//! RZX input-recording record/playback (C8).
//!
//! An RZX recording is a sequence of Input Recording Blocks (IRBs).
//! Each IRB carries an optional embedded snapshot (an SNA or Z80 image,
//! reusing the existing loader collaborators), the T-state the block
//! starts at, and a run of frames; each frame names how many
//! instructions to execute and the exact bytes the Z80 core's `IN`
//! instruction consumed during those instructions. Replaying a frame
//! means feeding those bytes back to `io_read` instead of querying the
//! bus, which is what makes playback bit-for-bit deterministic
//! regardless of what real peripheral state would otherwise return.

/// One frame within an Input Recording Block.
#[derive(Debug, Clone, Default)]
pub struct RzxFrame {
    /// Number of Z80 instructions executed during this frame.
    pub instruction_count: u16,
    /// Bytes returned by every `IN` during this frame, in order.
    pub in_bytes: Vec<u8>,
}

/// An embedded snapshot format tag, named but not further interpreted
/// here — loading is delegated to `sna::load_sna` / `z80::load_z80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedSnapshotKind {
    Sna,
    Z80,
}

/// One Input Recording Block.
#[derive(Debug, Clone, Default)]
pub struct InputRecordingBlock {
    /// Embedded snapshot bytes and format, if this IRB starts a
    /// recording rather than continuing one.
    pub snapshot: Option<(EmbeddedSnapshotKind, Vec<u8>)>,
    /// T-state the first frame in this block begins at.
    pub initial_tstate: u32,
    pub frames: Vec<RzxFrame>,
}

/// A full RZX recording: an ordered sequence of IRBs.
#[derive(Debug, Clone, Default)]
pub struct RzxRecording {
    pub blocks: Vec<InputRecordingBlock>,
}

impl RzxRecording {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of frames across every block.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.blocks.iter().map(|b| b.frames.len()).sum()
    }
}

/// Whether the Spectrum's input path is free-running, capturing every
/// `IN` for later playback, or replaying previously captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RzxMode {
    #[default]
    Idle,
    Recording,
    Playing,
}

/// Drives RZX capture/replay against the bus's `io_read` path.
///
/// Owned by `Spectrum`, which is the only collaborator that touches
/// both the bus and the recording — the WD-FDC and peripheral-registry
/// crates stay unaware that RZX exists, matching how those crates are
/// built purely in terms of ports and never see a `Spectrum`.
#[derive(Debug, Default)]
pub struct RzxSession {
    mode: RzxMode,
    recording: RzxRecording,
    current_frame: RzxFrame,
    /// When playing back, the bytes still to be consumed this frame.
    playback_cursor: usize,
    playback_block: usize,
    playback_frame: usize,
    /// Set when playback runs out of recorded `IN` bytes mid-frame (§4.7:
    /// "playback aborts with an error and normal frame scheduling is
    /// reinstated"). The caller should check this once per frame and fall
    /// back to live bus reads / its own frame-length scheduling once set.
    last_error: Option<String>,
    /// `competition_mode` disables the fast-forward UI affordance and
    /// refuses to start recording unless playback is idle; enforced by
    /// `main.rs`, not this struct — recorded here only as metadata on
    /// the produced `RzxRecording`... (competition mode itself carries
    /// no in-band data, so there's nothing further to store).
    competition_mode: bool,
}

impl RzxSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(&self) -> RzxMode {
        self.mode
    }

    #[must_use]
    pub fn competition_mode(&self) -> bool {
        self.competition_mode
    }

    pub fn set_competition_mode(&mut self, enabled: bool) {
        self.competition_mode = enabled;
    }

    /// Begin recording a new session starting at `initial_tstate`, with
    /// an optional embedded snapshot.
    pub fn start_recording(
        &mut self,
        initial_tstate: u32,
        snapshot: Option<(EmbeddedSnapshotKind, Vec<u8>)>,
    ) {
        self.recording = RzxRecording::new();
        self.recording.blocks.push(InputRecordingBlock {
            snapshot,
            initial_tstate,
            frames: Vec::new(),
        });
        self.current_frame = RzxFrame::default();
        self.mode = RzxMode::Recording;
    }

    /// Begin replaying a previously captured recording.
    pub fn start_playback(&mut self, recording: RzxRecording) {
        self.recording = recording;
        self.playback_cursor = 0;
        self.playback_block = 0;
        self.playback_frame = 0;
        self.mode = RzxMode::Playing;
    }

    pub fn stop(&mut self) {
        if self.mode == RzxMode::Recording && !self.current_frame.in_bytes.is_empty() {
            let count = self.current_frame.instruction_count;
            self.end_frame(count);
        }
        self.mode = RzxMode::Idle;
    }

    /// Called by the bus's `io_read` wrapper on every `IN`. In recording
    /// mode, captures `value` for later playback and passes it through
    /// unchanged. In playback mode, ignores `value` entirely and
    /// returns the recorded byte instead — this is what makes replay
    /// deterministic.
    pub fn on_io_read(&mut self, value: u8) -> u8 {
        match self.mode {
            RzxMode::Idle => value,
            RzxMode::Recording => {
                self.current_frame.in_bytes.push(value);
                value
            }
            RzxMode::Playing => {
                let byte = self
                    .recording
                    .blocks
                    .get(self.playback_block)
                    .and_then(|block| block.frames.get(self.playback_frame))
                    .and_then(|frame| frame.in_bytes.get(self.playback_cursor).copied());
                match byte {
                    Some(byte) => {
                        self.playback_cursor += 1;
                        byte
                    }
                    None => {
                        self.last_error = Some(
                            "RZX playback exhausted mid-frame; reverting to live input".into(),
                        );
                        self.mode = RzxMode::Idle;
                        value
                    }
                }
            }
        }
    }

    /// Called once per emulated frame with the number of instructions
    /// just executed, closing out the current IRB frame.
    pub fn end_frame(&mut self, instruction_count: u16) {
        match self.mode {
            RzxMode::Idle => {}
            RzxMode::Recording => {
                self.current_frame.instruction_count = instruction_count;
                let frame = std::mem::take(&mut self.current_frame);
                if let Some(block) = self.recording.blocks.last_mut() {
                    block.frames.push(frame);
                }
            }
            RzxMode::Playing => {
                self.playback_cursor = 0;
                self.playback_frame += 1;
                if self.playback_frame
                    >= self.recording.blocks.get(self.playback_block).map_or(0, |b| b.frames.len())
                {
                    self.playback_frame = 0;
                    self.playback_block += 1;
                    if self.playback_block >= self.recording.blocks.len() {
                        self.mode = RzxMode::Idle;
                    }
                }
            }
        }
    }

    /// Consume this session, producing the finished recording.
    #[must_use]
    pub fn into_recording(self) -> RzxRecording {
        self.recording
    }

    /// Take (clear) the last playback error, if any, e.g. to surface it
    /// through the UI's de-duplicated error path (§7).
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_captures_in_bytes() {
        let mut session = RzxSession::new();
        session.start_recording(0, None);
        assert_eq!(session.on_io_read(0x1F), 0x1F);
        assert_eq!(session.on_io_read(0xFF), 0xFF);
        session.end_frame(100);
        let rec = session.into_recording();
        assert_eq!(rec.blocks[0].frames[0].in_bytes, vec![0x1F, 0xFF]);
        assert_eq!(rec.blocks[0].frames[0].instruction_count, 100);
    }

    #[test]
    fn playback_returns_recorded_bytes_regardless_of_live_value() {
        let mut recorder = RzxSession::new();
        recorder.start_recording(0, None);
        recorder.on_io_read(0xAB);
        recorder.end_frame(10);
        let recording = recorder.into_recording();

        let mut player = RzxSession::new();
        player.start_playback(recording);
        // Live value passed in is ignored entirely during playback.
        assert_eq!(player.on_io_read(0x00), 0xAB);
    }

    #[test]
    fn playback_returns_idle_once_all_blocks_consumed() {
        let mut recorder = RzxSession::new();
        recorder.start_recording(0, None);
        recorder.on_io_read(1);
        recorder.end_frame(5);
        let recording = recorder.into_recording();

        let mut player = RzxSession::new();
        player.start_playback(recording);
        player.on_io_read(0);
        player.end_frame(5);
        assert_eq!(player.mode(), RzxMode::Idle);
    }

    #[test]
    fn playback_exhausted_mid_frame_aborts_and_reverts_to_idle() {
        let mut recorder = RzxSession::new();
        recorder.start_recording(0, None);
        recorder.on_io_read(0x11);
        recorder.end_frame(50);
        let recording = recorder.into_recording();

        let mut player = RzxSession::new();
        player.start_playback(recording);
        assert_eq!(player.on_io_read(0x00), 0x11);
        // Second IN this frame has no recorded byte: abort.
        let live = player.on_io_read(0x99);
        assert_eq!(live, 0x99, "falls back to the live value once exhausted");
        assert_eq!(player.mode(), RzxMode::Idle);
        assert!(player.take_error().is_some());
        assert!(player.take_error().is_none(), "error is cleared once taken");
    }

    #[test]
    fn idle_mode_passes_values_through_unchanged() {
        let mut session = RzxSession::new();
        assert_eq!(session.on_io_read(0x42), 0x42);
    }

    #[test]
    fn frame_count_sums_across_blocks() {
        let mut rec = RzxRecording::new();
        rec.blocks.push(InputRecordingBlock {
            snapshot: None,
            initial_tstate: 0,
            frames: vec![RzxFrame::default(), RzxFrame::default()],
        });
        rec.blocks.push(InputRecordingBlock {
            snapshot: None,
            initial_tstate: 0,
            frames: vec![RzxFrame::default()],
        });
        assert_eq!(rec.frame_count(), 3);
    }
}
