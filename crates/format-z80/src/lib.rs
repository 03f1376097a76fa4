//! .Z80 snapshot file format (v1, v2, v3) — pure parse, no machine-state
//! coupling.
//!
//! **Version 1** (offset 6-7 PC != 0): 30-byte header + one memory block
//! covering the full 48K RAM image, optionally RLE-compressed.
//!
//! **Version 2/3** (offset 6-7 PC == 0): 30-byte base header + a
//! variable-length extended header + one or more page-tagged memory
//! blocks, each independently compressed or not. Supports 48K and 128K
//! hardware.
//!
//! As with `format-sna`, this crate stops at parsing: mapping a page
//! number onto a live machine's bank layout is the emulator
//! integration crate's job (§1 Non-goals: "any particular on-disk
//! snapshot file layout").

#![allow(clippy::cast_possible_truncation)]

use format_sna::SnaFile;

/// Minimum size for a v1 header.
const V1_HEADER_SIZE: usize = 30;

/// Z80 register state shared by every format version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Z80Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub a_alt: u8,
    pub f_alt: u8,
    pub b_alt: u8,
    pub c_alt: u8,
    pub d_alt: u8,
    pub e_alt: u8,
    pub h_alt: u8,
    pub l_alt: u8,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
}

/// One decompressed memory block, tagged with its page number.
///
/// For v1 files there is exactly one page carrying [`V1_RAM_PAGE`] and
/// 0xC000 bytes (the whole 48K RAM image, $4000-$FFFF). For v2/v3 files
/// each page is 0x4000 bytes and `page_id` follows the on-disk page
/// numbering (v1-style 4/5/8 for 48K machines, 3-10 for 128K banks).
#[derive(Debug, Clone)]
pub struct Z80Page {
    pub page_id: u8,
    pub data: Vec<u8>,
}

/// Sentinel `page_id` used for the single v1 block (not a real on-disk
/// page number — v1 has no page tagging at all).
pub const V1_RAM_PAGE: u8 = 0xFF;

/// A parsed .Z80 snapshot.
#[derive(Debug, Clone)]
pub struct Z80File {
    /// 1, 2, or 3.
    pub version: u8,
    pub regs: Z80Registers,
    pub border: u8,
    /// Hardware mode byte from the extended header (0 for v1).
    pub hw_mode: u8,
    /// Port $7FFD snapshot (128K bank/ROM/shadow-screen select), 0 for v1.
    pub port_7ffd: u8,
    /// Selected AY register and the full 16-register bank, if present.
    pub ay: Option<(u8, [u8; 16])>,
    pub pages: Vec<Z80Page>,
}

impl Z80File {
    /// Parse a .Z80 snapshot from raw bytes, detecting the version
    /// automatically and decompressing every memory block.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too short, a block is truncated,
    /// or RLE decompression runs out of source bytes.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < V1_HEADER_SIZE {
            return Err(format!(
                "Z80 file too short: need at least {V1_HEADER_SIZE} bytes, got {}",
                data.len()
            ));
        }

        let version = detect_version(data);
        if version == 1 {
            parse_v1(data)
        } else {
            parse_v2v3(data, version)
        }
    }
}

/// Detect the .Z80 format version.
fn detect_version(data: &[u8]) -> u8 {
    let pc = u16::from(data[6]) | (u16::from(data[7]) << 8);
    if pc != 0 {
        return 1;
    }

    if data.len() < 32 {
        return 2; // Fallback: treat as v2
    }

    let ext_len = u16::from(data[30]) | (u16::from(data[31]) << 8);
    match ext_len {
        23 => 2,
        _ => 3, // 54/55 = v3; unknown lengths treated as v3 too
    }
}

/// Parse the base 30-byte header shared by every version.
///
/// Returns `(registers-without-pc, flags_byte_1)`; the caller fills in
/// `pc` (v1 reads it from offsets 6-7, v2/v3 from the extended header).
fn parse_base_header(data: &[u8]) -> (Z80Registers, u8) {
    let mut regs = Z80Registers {
        a: data[0],
        f: data[1],
        c: data[2],
        b: data[3],
        l: data[4],
        h: data[5],
        sp: u16::from(data[8]) | (u16::from(data[9]) << 8),
        i: data[10],
        ..Z80Registers::default()
    };

    let flags1 = if data[12] == 255 { 1 } else { data[12] };
    regs.r = (data[11] & 0x7F) | ((flags1 & 0x01) << 7);

    regs.e = data[13];
    regs.d = data[14];
    regs.c_alt = data[15];
    regs.b_alt = data[16];
    regs.e_alt = data[17];
    regs.d_alt = data[18];
    regs.l_alt = data[19];
    regs.h_alt = data[20];
    regs.a_alt = data[21];
    regs.f_alt = data[22];
    regs.iy = u16::from(data[23]) | (u16::from(data[24]) << 8);
    regs.ix = u16::from(data[25]) | (u16::from(data[26]) << 8);
    regs.iff1 = data[27] != 0;
    regs.iff2 = data[28] != 0;

    let flags2 = data[29];
    regs.im = flags2 & 0x03;

    (regs, flags1)
}

fn parse_v1(data: &[u8]) -> Result<Z80File, String> {
    let (mut regs, flags1) = parse_base_header(data);
    regs.pc = u16::from(data[6]) | (u16::from(data[7]) << 8);

    let border = (flags1 >> 1) & 0x07;
    let compressed = flags1 & 0x20 != 0;
    let mem_data = &data[V1_HEADER_SIZE..];

    let mut ram = vec![0u8; 0xC000]; // 48K: $4000-$FFFF
    if compressed {
        decompress(mem_data, &mut ram)?;
    } else {
        let len = mem_data.len().min(ram.len());
        ram[..len].copy_from_slice(&mem_data[..len]);
    }

    Ok(Z80File {
        version: 1,
        regs,
        border,
        hw_mode: 0,
        port_7ffd: 0,
        ay: None,
        pages: vec![Z80Page {
            page_id: V1_RAM_PAGE,
            data: ram,
        }],
    })
}

fn parse_v2v3(data: &[u8], version: u8) -> Result<Z80File, String> {
    let (mut regs, flags1) = parse_base_header(data);

    if data.len() < 32 {
        return Err("Z80 v2/v3 file too short for extended header".to_string());
    }

    let ext_len = u16::from(data[30]) | (u16::from(data[31]) << 8);
    let ext_header_start = 32;
    let ext_header_end = ext_header_start + ext_len as usize;

    if data.len() < ext_header_end {
        return Err(format!(
            "Z80 file too short: extended header needs {ext_header_end} bytes"
        ));
    }

    regs.pc = u16::from(data[32]) | (u16::from(data[33]) << 8);
    let hw_mode = data[34];
    let port_7ffd = data[35];

    let has_ay_data = ext_header_end >= 55;
    let ay = if has_ay_data {
        let ay_selected = data[38];
        let mut ay_registers = [0u8; 16];
        ay_registers.copy_from_slice(&data[39..55]);
        Some((ay_selected, ay_registers))
    } else {
        None
    };

    let border = (flags1 >> 1) & 0x07;

    let mut pages = Vec::new();
    let mut pos = ext_header_end;
    while pos + 3 <= data.len() {
        let block_len = u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8);
        let page_id = data[pos + 2];
        pos += 3;

        let (block_data, compressed, consumed) = if block_len == 0xFFFF {
            if pos + 0x4000 > data.len() {
                return Err(format!("Z80 uncompressed block at page {page_id} truncated"));
            }
            (&data[pos..pos + 0x4000], false, 0x4000)
        } else {
            let bl = block_len as usize;
            if pos + bl > data.len() {
                return Err(format!("Z80 compressed block at page {page_id} truncated"));
            }
            (&data[pos..pos + bl], true, bl)
        };

        let mut page_ram = vec![0u8; 0x4000];
        if compressed {
            decompress(block_data, &mut page_ram)?;
        } else {
            let len = block_data.len().min(0x4000);
            page_ram[..len].copy_from_slice(&block_data[..len]);
        }

        pages.push(Z80Page {
            page_id,
            data: page_ram,
        });
        pos += consumed;
    }

    Ok(Z80File {
        version,
        regs,
        border,
        hw_mode,
        port_7ffd,
        ay,
        pages,
    })
}

/// Whether an extended-header hardware-mode byte indicates 128K-class
/// hardware (as opposed to a plain 48K machine).
#[must_use]
pub fn is_128k_hardware(version: u8, hw_mode: u8) -> bool {
    if version == 2 {
        matches!(hw_mode, 3 | 4)
    } else {
        matches!(hw_mode, 4 | 5 | 6 | 7 | 12 | 13)
    }
}

/// Decompress Z80-format RLE data.
///
/// Escape sequence: `ED ED xx yy` means repeat byte `yy` × `xx` times.
/// A lone `ED` not followed by another `ED` is copied literally.
///
/// # Errors
///
/// Never actually fails — kept `Result`-returning to match the
/// collaborator's other parse entry points and leave room for a future
/// "unexpected end of compressed stream" diagnostic.
pub fn decompress(src: &[u8], dst: &mut [u8]) -> Result<(), String> {
    let mut si = 0;
    let mut di = 0;

    while si < src.len() && di < dst.len() {
        if si + 3 < src.len() && src[si] == 0xED && src[si + 1] == 0xED {
            let count = src[si + 2] as usize;
            let value = src[si + 3];
            for _ in 0..count {
                if di < dst.len() {
                    dst[di] = value;
                    di += 1;
                }
            }
            si += 4;
        } else {
            dst[di] = src[si];
            di += 1;
            si += 1;
        }
    }

    Ok(())
}

/// Build a [`Z80File`] equivalent to an already-parsed 48K SNA snapshot.
///
/// Used by format-conversion tooling (not the emulator itself) that
/// wants to re-save an SNA as a .Z80 — SNA carries no alternate-format
/// metadata (border aside), so this always produces a v1-shaped,
/// uncompressed single-page file.
#[must_use]
pub fn from_sna(sna: &SnaFile) -> Z80File {
    let r = &sna.regs;
    let regs = Z80Registers {
        a: r.a,
        f: r.f,
        b: r.b,
        c: r.c,
        d: r.d,
        e: r.e,
        h: r.h,
        l: r.l,
        a_alt: r.a_alt,
        f_alt: r.f_alt,
        b_alt: r.b_alt,
        c_alt: r.c_alt,
        d_alt: r.d_alt,
        e_alt: r.e_alt,
        h_alt: r.h_alt,
        l_alt: r.l_alt,
        ix: r.ix,
        iy: r.iy,
        sp: r.sp,
        pc: 0, // SNA's implicit PC lives on the stack, not in the header
        i: r.i,
        r: r.r,
        iff1: r.iff2,
        iff2: r.iff2,
        im: r.im,
    };

    Z80File {
        version: 1,
        regs,
        border: r.border,
        hw_mode: 0,
        port_7ffd: 0,
        ay: None,
        pages: vec![Z80Page {
            page_id: V1_RAM_PAGE,
            data: sna.ram.clone(),
        }],
    }
}
