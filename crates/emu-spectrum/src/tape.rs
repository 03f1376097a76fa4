//! Tape deck state machine.
//!
//! Manages the currently loaded TAP file and tracks which block to
//! deliver next when the ROM tape loading routine is trapped.

use crate::tap::{TapBlock, TapFile};

/// Virtual tape deck: holds a TAP file and a block cursor.
pub struct TapeDeck {
    tap: Option<TapFile>,
    block_index: usize,
    /// Set when the save trap (or any other mutation) has appended a
    /// block since the tape was last loaded/saved. Mirrors §4.5/§4.6's
    /// "dirty flag" for disk images, applied to tape images too.
    dirty: bool,
}

impl TapeDeck {
    /// Create an empty tape deck (no tape inserted).
    #[must_use]
    pub fn new() -> Self {
        Self {
            tap: None,
            block_index: 0,
            dirty: false,
        }
    }

    /// Insert a TAP file into the deck.
    pub fn insert(&mut self, tap: TapFile) {
        self.tap = Some(tap);
        self.block_index = 0;
        self.dirty = false;
    }

    /// Eject the current tape.
    pub fn eject(&mut self) {
        self.tap = None;
        self.block_index = 0;
        self.dirty = false;
    }

    /// Append a freshly-saved block (the save trap's product) to the tape
    /// image, creating an empty tape if none is loaded, and mark dirty.
    pub fn append_block(&mut self, flag: u8, data: Vec<u8>) {
        self.tap
            .get_or_insert_with(|| TapFile { blocks: Vec::new() })
            .blocks
            .push(TapBlock { flag, data });
        self.dirty = true;
    }

    /// Whether the tape image has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialise the current tape image back to TAP bytes and clear the
    /// dirty flag, e.g. after the host writes it to disk.
    #[must_use]
    pub fn save(&mut self) -> Option<Vec<u8>> {
        let bytes = self.tap.as_ref().map(TapFile::to_bytes);
        if bytes.is_some() {
            self.dirty = false;
        }
        bytes
    }

    /// Whether a tape is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.tap.is_some()
    }

    /// Return the next block and advance the cursor, or `None` if no more
    /// blocks are available.
    pub fn next_block(&mut self) -> Option<&TapBlock> {
        let tap = self.tap.as_ref()?;
        if self.block_index >= tap.blocks.len() {
            return None;
        }
        let block = &tap.blocks[self.block_index];
        self.block_index += 1;
        Some(block)
    }

    /// Rewind the tape to the start.
    pub fn rewind(&mut self) {
        self.block_index = 0;
    }

    /// Current block index (0-based).
    #[must_use]
    pub fn block_index(&self) -> usize {
        self.block_index
    }

    /// Total number of blocks on the tape.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.tap.as_ref().map_or(0, |t| t.blocks.len())
    }
}

impl Default for TapeDeck {
    fn default() -> Self {
        Self::new()
    }
}
