//! .Z80 snapshot loader for ZX Spectrum (v1, v2, v3 formats).
//!
//! Byte-level parsing and RLE decompression are delegated to the
//! `format-z80` collaborator; this module applies the parsed state to a
//! live [`Spectrum`] — registers directly, and memory pages by mapping
//! each page number onto the model's actual bank layout (48K address
//! ranges, or 128K bank-switched pages via the $7FFD port), which is
//! inherently machine-specific and has no place in a pure file-format
//! parser.

#![allow(clippy::cast_possible_truncation)]

use emu_core::Cpu;
use format_z80::{Z80File, Z80Page, V1_RAM_PAGE};

use crate::Spectrum;

/// Load a .Z80 snapshot into the given Spectrum instance.
///
/// Detects the format version automatically. The Spectrum must already be
/// created with the correct model — 128K snapshots require a 128K model.
///
/// # Errors
///
/// Returns an error if the data is too short, the format is unrecognised,
/// or decompression fails.
pub fn load_z80(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), String> {
    let z80 = Z80File::parse(data)?;

    spectrum.cpu_mut().reset();
    let cpu = spectrum.cpu_mut();
    let regs = &mut cpu.regs;
    let r = &z80.regs;

    regs.a = r.a;
    regs.f = r.f;
    regs.b = r.b;
    regs.c = r.c;
    regs.d = r.d;
    regs.e = r.e;
    regs.h = r.h;
    regs.l = r.l;
    regs.a_alt = r.a_alt;
    regs.f_alt = r.f_alt;
    regs.b_alt = r.b_alt;
    regs.c_alt = r.c_alt;
    regs.d_alt = r.d_alt;
    regs.e_alt = r.e_alt;
    regs.h_alt = r.h_alt;
    regs.l_alt = r.l_alt;
    regs.ix = r.ix;
    regs.iy = r.iy;
    regs.sp = r.sp;
    regs.pc = r.pc;
    regs.i = r.i;
    regs.r = r.r;
    regs.iff1 = r.iff1;
    regs.iff2 = r.iff2;
    regs.im = r.im;

    spectrum.bus_mut().ula.set_border_colour(z80.border);

    let is_128k = z80.version != 1 && format_z80::is_128k_hardware(z80.version, z80.hw_mode);

    if is_128k {
        spectrum.bus_mut().memory.write_bank_register(z80.port_7ffd);
    }

    if let Some((selected, registers)) = z80.ay {
        if let Some(ay) = &mut spectrum.bus_mut().ay {
            for reg in 0..16u8 {
                ay.select_register(reg);
                ay.write_data(registers[reg as usize]);
            }
            ay.select_register(selected);
        }
    }

    for page in &z80.pages {
        if page.page_id == V1_RAM_PAGE {
            load_v1_ram(spectrum, page);
        } else if is_128k {
            load_128k_page(spectrum, page, z80.port_7ffd)?;
        } else {
            load_48k_page(spectrum, page)?;
        }
    }

    Ok(())
}

/// Write a v1 snapshot's single full-RAM block to $4000-$FFFF.
fn load_v1_ram(spectrum: &mut Spectrum, page: &Z80Page) {
    let bus = spectrum.bus_mut();
    for (i, &byte) in page.data.iter().enumerate() {
        bus.memory.write(0x4000u16 + i as u16, byte);
    }
}

/// Load a 48K page into the Spectrum memory.
///
/// Page mapping for 48K snapshots:
///   4 -> $8000-$BFFF
///   5 -> $C000-$FFFF
///   8 -> $4000-$7FFF
fn load_48k_page(spectrum: &mut Spectrum, page: &Z80Page) -> Result<(), String> {
    let base_addr: u16 = match page.page_id {
        4 => 0x8000,
        5 => 0xC000,
        8 => 0x4000,
        _ => return Ok(()), // Skip unknown pages (ROM pages, etc.)
    };

    let bus = spectrum.bus_mut();
    for (i, &byte) in page.data.iter().enumerate() {
        bus.memory.write(base_addr + i as u16, byte);
    }
    Ok(())
}

/// Load a 128K page into the correct bank.
///
/// Page mapping for 128K snapshots:
///   3 -> bank 0, 4 -> bank 1, 5 -> bank 2, 6 -> bank 3,
///   7 -> bank 4, 8 -> bank 5, 9 -> bank 6, 10 -> bank 7
fn load_128k_page(spectrum: &mut Spectrum, page: &Z80Page, port_7ffd: u8) -> Result<(), String> {
    let bank = match page.page_id {
        3 => 0,
        4 => 1,
        5 => 2,
        6 => 3,
        7 => 4,
        8 => 5,
        9 => 6,
        10 => 7,
        _ => return Ok(()), // Skip ROM pages
    };

    // Bank 5 is always at $4000, bank 2 at $8000. Other banks need to be
    // paged in at $C000.
    let bus = spectrum.bus_mut();
    match bank {
        5 => {
            for (i, &byte) in page.data.iter().enumerate() {
                bus.memory.write(0x4000u16 + i as u16, byte);
            }
        }
        2 => {
            for (i, &byte) in page.data.iter().enumerate() {
                bus.memory.write(0x8000u16 + i as u16, byte);
            }
        }
        _ => {
            bus.memory.write_bank_register((port_7ffd & 0xF8) | bank);
            for (i, &byte) in page.data.iter().enumerate() {
                bus.memory.write(0xC000u16 + i as u16, byte);
            }
            bus.memory.write_bank_register(port_7ffd);
        }
    }

    Ok(())
}
