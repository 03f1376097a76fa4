//! SNA snapshot loader for 48K Spectrum.
//!
//! Byte-level parsing is delegated to the `format-sna` collaborator; this
//! module only applies the parsed state to a live [`Spectrum`] — CPU
//! registers, RAM, border colour, and popping PC off the stack (SNA
//! doesn't store PC directly; the saving routine pushes it, so loading
//! pops it back off after RAM is in place).

use emu_core::Cpu;
use format_sna::SnaFile;

use crate::Spectrum;

/// Load a 48K SNA snapshot into the given Spectrum instance.
///
/// Sets all Z80 registers, loads RAM ($4000-$FFFF), sets the border colour,
/// and pops PC from the stack.
///
/// # Errors
///
/// Returns an error if the data is not exactly 49,179 bytes, or if the
/// stack pointer doesn't point into RAM ($4000-$FFFF).
pub fn load_sna(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), String> {
    let sna = SnaFile::parse(data)?;

    // Reset the CPU to clear the micro-op pipeline, then set registers.
    spectrum.cpu_mut().reset();

    let cpu = spectrum.cpu_mut();
    let regs = &mut cpu.regs;
    let r = &sna.regs;

    regs.i = r.i;
    regs.l_alt = r.l_alt;
    regs.h_alt = r.h_alt;
    regs.e_alt = r.e_alt;
    regs.d_alt = r.d_alt;
    regs.c_alt = r.c_alt;
    regs.b_alt = r.b_alt;
    regs.f_alt = r.f_alt;
    regs.a_alt = r.a_alt;
    regs.l = r.l;
    regs.h = r.h;
    regs.e = r.e;
    regs.d = r.d;
    regs.c = r.c;
    regs.b = r.b;
    regs.iy = r.iy;
    regs.ix = r.ix;
    regs.iff1 = r.iff2;
    regs.iff2 = r.iff2;
    regs.r = r.r;
    regs.f = r.f;
    regs.a = r.a;
    regs.sp = r.sp;
    regs.im = r.im;

    // Load RAM ($4000-$FFFF).
    // We need to downcast the memory to Memory48K to use load_ram.
    // The bus memory is a Box<dyn SpectrumMemory>, so we write byte by byte.
    let bus = spectrum.bus_mut();
    for (i, &byte) in sna.ram.iter().enumerate() {
        let addr = 0x4000u16 + i as u16;
        bus.memory.write(addr, byte);
    }

    bus.ula.set_border_colour(r.border);

    // Pop PC from the stack: read 2 bytes at SP from RAM, increment SP.
    let sp = spectrum.cpu().regs.sp;
    if sp < 0x4000 {
        return Err(format!(
            "SNA stack pointer ${sp:04X} points into ROM — cannot pop PC"
        ));
    }

    let pc_lo = spectrum.bus().memory.read(sp);
    let pc_hi = spectrum.bus().memory.read(sp.wrapping_add(1));
    let pc = u16::from(pc_lo) | (u16::from(pc_hi) << 8);

    spectrum.cpu_mut().regs.sp = sp.wrapping_add(2);
    spectrum.cpu_mut().regs.pc = pc;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpectrumConfig, SpectrumModel};
    use format_sna::SNA_48K_SIZE;

    fn make_spectrum() -> Spectrum {
        let rom = vec![0u8; 0x4000];
        Spectrum::new(&SpectrumConfig {
            model: SpectrumModel::Spectrum48K,
            rom,
        })
    }

    fn make_sna(sp: u16, pc: u16) -> Vec<u8> {
        let mut data = vec![0u8; SNA_48K_SIZE];

        data[0] = 0x3F; // I
        data[20] = 0x42; // R
        data[21] = 0xFF; // F
        data[22] = 0xAA; // A
        data[23] = sp as u8;
        data[24] = (sp >> 8) as u8;
        data[25] = 1; // IM 1
        data[26] = 2; // Border = red

        let sp_offset = (sp - 0x4000) as usize;
        data[27 + sp_offset] = pc as u8;
        data[27 + sp_offset + 1] = (pc >> 8) as u8;

        data
    }

    #[test]
    fn load_sna_sets_registers() {
        let mut spec = make_spectrum();
        let sna = make_sna(0x8000, 0x1234);

        load_sna(&mut spec, &sna).expect("load_sna should succeed");

        let regs = &spec.cpu().regs;
        assert_eq!(regs.i, 0x3F);
        assert_eq!(regs.r, 0x42);
        assert_eq!(regs.f, 0xFF);
        assert_eq!(regs.a, 0xAA);
        assert_eq!(regs.im, 1);
        assert_eq!(regs.pc, 0x1234);
        assert_eq!(regs.sp, 0x8002); // SP advanced by 2 after pop
    }

    #[test]
    fn load_sna_sets_border() {
        let mut spec = make_spectrum();
        let sna = make_sna(0x8000, 0x0000);

        load_sna(&mut spec, &sna).expect("load_sna should succeed");

        assert_eq!(spec.bus().ula.border_colour(), 2);
    }

    #[test]
    fn load_sna_wrong_size() {
        let mut spec = make_spectrum();
        let result = load_sna(&mut spec, &[0u8; 100]);
        assert!(result.is_err());
    }

    #[test]
    fn load_sna_sp_in_rom() {
        let mut spec = make_spectrum();
        let mut sna = vec![0u8; SNA_48K_SIZE];
        sna[23] = 0x00; // SP = 0x0000 (in ROM)
        sna[24] = 0x00;

        let result = load_sna(&mut spec, &sna);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("points into ROM"));
    }
}
