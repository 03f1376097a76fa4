//! TAP file format parser.
//!
//! TAP is the simplest Spectrum tape format: sequential blocks of data,
//! each preceded by a 2-byte little-endian length word. Each block contains
//! a flag byte, data bytes, and a checksum byte (XOR of flag + data).
//!
//! A typical program consists of two blocks:
//!   1. Header block (flag $00, 17 bytes of metadata)
//!   2. Data block (flag $FF, the actual program/data)

/// A single block from a TAP file.
#[derive(Debug, Clone)]
pub struct TapBlock {
    /// Flag byte: $00 = header, $FF = data.
    pub flag: u8,
    /// Block data (excludes the flag and checksum bytes).
    pub data: Vec<u8>,
}

/// A parsed TAP file containing sequential blocks.
#[derive(Debug, Clone)]
pub struct TapFile {
    /// The blocks in the TAP file, in order.
    pub blocks: Vec<TapBlock>,
}

impl TapFile {
    /// Parse a TAP file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed (truncated block, bad length).
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        let mut blocks = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            // Need at least 2 bytes for the block length
            if offset + 2 > data.len() {
                return Err(format!(
                    "Truncated TAP file: expected 2-byte length at offset {offset}"
                ));
            }

            let block_len = u16::from(data[offset]) | (u16::from(data[offset + 1]) << 8);
            offset += 2;

            let block_len = block_len as usize;
            if block_len < 2 {
                return Err(format!(
                    "TAP block at offset {} has length {block_len}, minimum is 2 (flag + checksum)",
                    offset - 2
                ));
            }

            if offset + block_len > data.len() {
                return Err(format!(
                    "Truncated TAP block at offset {}: need {block_len} bytes, only {} remain",
                    offset - 2,
                    data.len() - offset
                ));
            }

            let flag = data[offset];
            let checksum = data[offset + block_len - 1];
            let block_data = &data[offset + 1..offset + block_len - 1];

            // Verify checksum: XOR of flag + all data bytes
            let mut expected = flag;
            for &byte in block_data {
                expected ^= byte;
            }
            if expected != checksum {
                return Err(format!(
                    "TAP block at offset {}: checksum mismatch (expected ${expected:02X}, got ${checksum:02X})",
                    offset - 2
                ));
            }

            blocks.push(TapBlock {
                flag,
                data: block_data.to_vec(),
            });

            offset += block_len;
        }

        Ok(Self { blocks })
    }

    /// Serialise back to TAP bytes: each block gets its 2-byte length
    /// word and trailing XOR checksum recomputed.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for block in &self.blocks {
            let mut checksum = block.flag;
            for &b in &block.data {
                checksum ^= b;
            }
            let len = (block.data.len() + 2) as u16;
            out.push((len & 0xFF) as u8);
            out.push((len >> 8) as u8);
            out.push(block.flag);
            out.extend_from_slice(&block.data);
            out.push(checksum);
        }
        out
    }
}
