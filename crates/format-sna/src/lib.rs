//! SNA snapshot file format (48K) — pure parse, no machine-state coupling.
//!
//! The 48K SNA format is 49,179 bytes: a 27-byte header holding the Z80
//! register state, followed by 49,152 bytes of RAM ($4000-$FFFF). PC is
//! not stored in the header — the original loader pushes it onto the
//! stack before saving, so the consumer must pop it back off after
//! restoring RAM and SP.
//!
//! This crate only parses the bytes into a typed struct; applying that
//! struct to a running machine (writing registers, paging RAM, popping
//! PC off the stack) is the emulator integration crate's job — SNA's
//! on-disk layout is exactly the kind of "particular snapshot file
//! layout" this workspace delegates to an external collaborator.

#![allow(clippy::cast_possible_truncation)]

/// Size of a well-formed 48K SNA file.
pub const SNA_48K_SIZE: usize = 49_179;

/// Header size in bytes.
const HEADER_SIZE: usize = 27;

/// Z80 register state as stored in an SNA header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnaRegisters {
    pub i: u8,
    pub l_alt: u8,
    pub h_alt: u8,
    pub e_alt: u8,
    pub d_alt: u8,
    pub c_alt: u8,
    pub b_alt: u8,
    pub f_alt: u8,
    pub a_alt: u8,
    pub l: u8,
    pub h: u8,
    pub e: u8,
    pub d: u8,
    pub c: u8,
    pub b: u8,
    pub iy: u16,
    pub ix: u16,
    /// Byte 19 bit 2: IFF2. SNA doesn't distinguish IFF1 from IFF2 — both
    /// flip-flops are set from this single bit on load.
    pub iff2: bool,
    pub r: u8,
    pub f: u8,
    pub a: u8,
    pub sp: u16,
    pub im: u8,
    pub border: u8,
}

/// A parsed 48K SNA snapshot: header registers plus raw RAM image.
#[derive(Debug, Clone)]
pub struct SnaFile {
    pub regs: SnaRegisters,
    /// 49,152 bytes covering $4000-$FFFF, in address order.
    pub ram: Vec<u8>,
}

impl SnaFile {
    /// Parse a 48K SNA snapshot from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not exactly [`SNA_48K_SIZE`] bytes.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() != SNA_48K_SIZE {
            return Err(format!(
                "SNA file must be exactly {SNA_48K_SIZE} bytes, got {}",
                data.len()
            ));
        }

        let regs = SnaRegisters {
            i: data[0],
            l_alt: data[1],
            h_alt: data[2],
            e_alt: data[3],
            d_alt: data[4],
            c_alt: data[5],
            b_alt: data[6],
            f_alt: data[7],
            a_alt: data[8],
            l: data[9],
            h: data[10],
            e: data[11],
            d: data[12],
            c: data[13],
            b: data[14],
            iy: u16::from(data[15]) | (u16::from(data[16]) << 8),
            ix: u16::from(data[17]) | (u16::from(data[18]) << 8),
            iff2: data[19] & 0x04 != 0,
            r: data[20],
            f: data[21],
            a: data[22],
            sp: u16::from(data[23]) | (u16::from(data[24]) << 8),
            im: data[25],
            border: data[26] & 0x07,
        };

        let ram = data[HEADER_SIZE..].to_vec();

        Ok(Self { regs, ram })
    }

    /// Serialise back to a 49,179-byte SNA image.
    ///
    /// `pc` and the two bytes it occupies on the stack are the caller's
    /// responsibility — SNA stores PC only implicitly, pushed onto the
    /// stack at `sp - 2`, so the caller must have already placed it
    /// there in `ram` before calling this (matching what a real save
    /// routine does: push PC, then dump memory).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SNA_48K_SIZE);
        let r = &self.regs;
        out.push(r.i);
        out.push(r.l_alt);
        out.push(r.h_alt);
        out.push(r.e_alt);
        out.push(r.d_alt);
        out.push(r.c_alt);
        out.push(r.b_alt);
        out.push(r.f_alt);
        out.push(r.a_alt);
        out.push(r.l);
        out.push(r.h);
        out.push(r.e);
        out.push(r.d);
        out.push(r.c);
        out.push(r.b);
        out.push(r.iy as u8);
        out.push((r.iy >> 8) as u8);
        out.push(r.ix as u8);
        out.push((r.ix >> 8) as u8);
        out.push(if r.iff2 { 0x04 } else { 0x00 });
        out.push(r.r);
        out.push(r.f);
        out.push(r.a);
        out.push(r.sp as u8);
        out.push((r.sp >> 8) as u8);
        out.push(r.im);
        out.push(r.border);
        out.extend_from_slice(&self.ram);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sna(sp: u16, border: u8) -> Vec<u8> {
        let mut data = vec![0u8; SNA_48K_SIZE];
        data[0] = 0x3F; // I
        data[20] = 0x42; // R
        data[21] = 0xFF; // F
        data[22] = 0xAA; // A
        data[23] = sp as u8;
        data[24] = (sp >> 8) as u8;
        data[25] = 1; // IM 1
        data[26] = border;
        data
    }

    #[test]
    fn parse_wrong_size_errors() {
        assert!(SnaFile::parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn parse_reads_registers() {
        let data = make_sna(0x8000, 2);
        let sna = SnaFile::parse(&data).expect("valid SNA");
        assert_eq!(sna.regs.i, 0x3F);
        assert_eq!(sna.regs.r, 0x42);
        assert_eq!(sna.regs.f, 0xFF);
        assert_eq!(sna.regs.a, 0xAA);
        assert_eq!(sna.regs.im, 1);
        assert_eq!(sna.regs.sp, 0x8000);
        assert_eq!(sna.regs.border, 2);
        assert_eq!(sna.ram.len(), 49_152);
    }

    #[test]
    fn iff2_bit_extracted_from_byte_19() {
        let mut data = make_sna(0x8000, 0);
        data[19] = 0x04;
        let sna = SnaFile::parse(&data).expect("valid SNA");
        assert!(sna.regs.iff2);

        data[19] = 0x00;
        let sna = SnaFile::parse(&data).expect("valid SNA");
        assert!(!sna.regs.iff2);
    }

    #[test]
    fn border_masked_to_three_bits() {
        let data = make_sna(0x8000, 0xFF);
        let sna = SnaFile::parse(&data).expect("valid SNA");
        assert_eq!(sna.regs.border, 0x07);
    }

    #[test]
    fn round_trip_preserves_registers() {
        let data = make_sna(0xC000, 5);
        let sna = SnaFile::parse(&data).expect("valid SNA");
        let out = sna.to_bytes();
        assert_eq!(out, data);
    }
}
