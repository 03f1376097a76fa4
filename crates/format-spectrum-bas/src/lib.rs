//! ZX Spectrum BASIC tokeniser.
//!
//! Converts plain-text BASIC source (one statement per line, a line
//! number optionally followed by whitespace) into the tokenised byte
//! form the ROM's `LOAD`/editor expect: keywords collapse to single
//! token bytes ($A5-$FF), and every numeric literal keeps its ASCII
//! text but gets a hidden 5-byte floating-point form appended after it
//! (marked by a `0x0E` lead byte), exactly as the ROM's line editor
//! does when a line is entered.
//!
//! This is pure text-to-bytes transformation with no tape or Z80
//! dependency — the sibling `format-spectrum-tap` crate wraps the
//! result into a TAP header/data block pair (see [`to_tap_blocks`]).

use format_spectrum_tap::TapBlock;

/// One BASIC keyword and its token byte, in strict match-priority order
/// (longest textual match wins when two keywords share a prefix, e.g.
/// `GO TO` vs `GO SUB`).
///
/// Token codes $A5-$FF, in the order the 48K ROM defines them.
const KEYWORDS: &[(&str, u8)] = &[
    ("RND", 0xA5),
    ("INKEY$", 0xA6),
    ("PI", 0xA7),
    ("FN", 0xA8),
    ("POINT", 0xA9),
    ("SCREEN$", 0xAA),
    ("ATTR", 0xAB),
    ("AT", 0xAC),
    ("TAB", 0xAD),
    ("VAL$", 0xAE),
    ("CODE", 0xAF),
    ("VAL", 0xB0),
    ("LEN", 0xB1),
    ("SIN", 0xB2),
    ("COS", 0xB3),
    ("TAN", 0xB4),
    ("ASN", 0xB5),
    ("ACS", 0xB6),
    ("ATN", 0xB7),
    ("LN", 0xB8),
    ("EXP", 0xB9),
    ("INT", 0xBA),
    ("SQR", 0xBB),
    ("SGN", 0xBC),
    ("ABS", 0xBD),
    ("PEEK", 0xBE),
    ("IN", 0xBF),
    ("USR", 0xC0),
    ("STR$", 0xC1),
    ("CHR$", 0xC2),
    ("NOT", 0xC3),
    ("BIN", 0xC4),
    ("OR", 0xC5),
    ("AND", 0xC6),
    ("<=", 0xC7),
    (">=", 0xC8),
    ("<>", 0xC9),
    ("LINE", 0xCA),
    ("THEN", 0xCB),
    ("TO", 0xCC),
    ("STEP", 0xCD),
    ("DEF FN", 0xCE),
    ("CAT", 0xCF),
    ("FORMAT", 0xD0),
    ("MOVE", 0xD1),
    ("ERASE", 0xD2),
    ("OPEN #", 0xD3),
    ("CLOSE #", 0xD4),
    ("MERGE", 0xD5),
    ("VERIFY", 0xD6),
    ("BEEP", 0xD7),
    ("CIRCLE", 0xD8),
    ("INK", 0xD9),
    ("PAPER", 0xDA),
    ("FLASH", 0xDB),
    ("BRIGHT", 0xDC),
    ("INVERSE", 0xDD),
    ("OVER", 0xDE),
    ("OUT", 0xDF),
    ("LPRINT", 0xE0),
    ("LLIST", 0xE1),
    ("STOP", 0xE2),
    ("READ", 0xE3),
    ("DATA", 0xE4),
    ("RESTORE", 0xE5),
    ("NEW", 0xE6),
    ("BORDER", 0xE7),
    ("CONTINUE", 0xE8),
    ("DIM", 0xE9),
    ("REM", 0xEA),
    ("FOR", 0xEB),
    ("GO TO", 0xEC),
    ("GOTO", 0xEC),
    ("GO SUB", 0xED),
    ("GOSUB", 0xED),
    ("INPUT", 0xEE),
    ("LOAD", 0xEF),
    ("LIST", 0xF0),
    ("LET", 0xF1),
    ("PAUSE", 0xF2),
    ("NEXT", 0xF3),
    ("POKE", 0xF4),
    ("PRINT", 0xF5),
    ("PLOT", 0xF6),
    ("RUN", 0xF7),
    ("SAVE", 0xF8),
    ("RANDOMIZE", 0xF9),
    ("IF", 0xFA),
    ("CLS", 0xFB),
    ("DRAW", 0xFC),
    ("CLEAR", 0xFD),
    ("RETURN", 0xFE),
    ("COPY", 0xFF),
];

/// `ENTER`, the line terminator in a stored BASIC program.
const ENTER: u8 = 0x0D;
/// Lead byte marking a hidden 5-byte floating-point number follows.
const NUMBER_MARKER: u8 = 0x0E;

/// One tokenised BASIC line: its line number and the encoded statement
/// bytes (without the trailing `ENTER` or the length prefix — those are
/// added when assembling into a program image).
#[derive(Debug, Clone)]
pub struct TokenisedLine {
    pub line_number: u16,
    pub bytes: Vec<u8>,
}

/// Tokenise one line of BASIC text (without its line number) into ROM
/// token bytes.
///
/// Keyword matching stops inside string literals (`"..."`) and after a
/// `REM` token, where the remainder of the line is copied verbatim —
/// matching the ROM editor's own behaviour, since a quoted `PRINT`
/// should stay as text, not collapse to a token.
#[must_use]
pub fn tokenise_statement(text: &str) -> Vec<u8> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut in_string = false;
    let mut in_rem = false;

    while i < chars.len() {
        let c = chars[i];

        if in_rem {
            out.push(c as u8);
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            out.push(c as u8);
            i += 1;
            continue;
        }

        if in_string {
            out.push(c as u8);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let (digits, consumed) = scan_number(&chars[i..]);
            out.extend_from_slice(digits.as_bytes());
            out.push(NUMBER_MARKER);
            out.extend_from_slice(&encode_float(&digits));
            i += consumed;
            continue;
        }

        if let Some((keyword, token, len)) = match_keyword(&chars[i..]) {
            out.push(token);
            if keyword == "REM" {
                in_rem = true;
            }
            i += len;
            continue;
        }

        out.push(c as u8);
        i += 1;
    }

    out
}

/// Find the longest keyword in [`KEYWORDS`] matching the start of
/// `chars`, case-insensitively, requiring a non-identifier character
/// (or end of input) immediately after so `PRINTER` doesn't collapse
/// to `PRINT` + `ER`.
fn match_keyword(chars: &[char]) -> Option<(&'static str, u8, usize)> {
    let mut best: Option<(&'static str, u8, usize)> = None;

    for &(kw, token) in KEYWORDS {
        let kw_chars: Vec<char> = kw.chars().collect();
        if chars.len() < kw_chars.len() {
            continue;
        }
        let candidate: String = chars[..kw_chars.len()].iter().collect();
        if !candidate.eq_ignore_ascii_case(kw) {
            continue;
        }

        let boundary_ok = chars
            .get(kw_chars.len())
            .is_none_or(|&next| !(next.is_ascii_alphanumeric() || next == '$'));
        if !boundary_ok {
            continue;
        }

        if best.is_none_or(|(_, _, len)| kw_chars.len() > len) {
            best = Some((kw, token, kw_chars.len()));
        }
    }

    best
}

/// Scan a numeric literal (digits, at most one `.`, optional `E`
/// exponent) starting at `chars[0]`. Returns the literal text and the
/// number of `char`s consumed.
fn scan_number(chars: &[char]) -> (String, usize) {
    let mut end = 0;
    let mut seen_dot = false;

    while end < chars.len() {
        let c = chars[end];
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            end += 1;
        } else if (c == 'e' || c == 'E')
            && end > 0
            && chars
                .get(end + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '+' || *n == '-')
        {
            end += 1;
            if matches!(chars.get(end), Some('+' | '-')) {
                end += 1;
            }
        } else {
            break;
        }
    }

    (chars[..end].iter().collect(), end)
}

/// Encode a decimal literal into the Sinclair 5-byte floating-point
/// form stored after the `0x0E` marker.
///
/// Integers in `0..=65535` use the ROM's compact integer form: byte 0
/// is always `0x00`, byte 1 is the sign (`0x00` positive, `0xFF`
/// negative — unsigned literals are always positive), bytes 2-3 are
/// the 16-bit value little-endian, byte 4 is unused (`0x00`). Anything
/// else uses the general exponent+mantissa form: byte 0 is the
/// base-2 exponent biased by 128, bytes 1-4 are the 32-bit mantissa
/// with an implicit leading 1 bit folded into the sign bit of byte 1.
fn encode_float(text: &str) -> [u8; 5] {
    let value: f64 = text.parse().unwrap_or(0.0);

    if value >= 0.0 && value <= 65535.0 && value.fract() == 0.0 {
        let n = value as u32;
        return [0x00, 0x00, (n & 0xFF) as u8, ((n >> 8) & 0xFF) as u8, 0x00];
    }

    encode_general_float(value)
}

/// General (non-integer-fast-path) Sinclair float encoding.
fn encode_general_float(value: f64) -> [u8; 5] {
    if value == 0.0 {
        return [0, 0, 0, 0, 0];
    }

    let sign = value < 0.0;
    let mut mantissa = value.abs();

    // Normalise to [1, 2), tracking the binary exponent.
    let mut exponent: i32 = 0;
    while mantissa >= 2.0 {
        mantissa /= 2.0;
        exponent += 1;
    }
    while mantissa < 1.0 {
        mantissa *= 2.0;
        exponent -= 1;
    }

    // Drop the implicit leading 1, scale the remaining 32 fractional
    // bits into a u32.
    let frac = mantissa - 1.0;
    let mantissa_bits = (frac * f64::from(1u32 << 31)).round() as u64;
    let mantissa_bits = mantissa_bits.min(u64::from(u32::MAX)) as u32;

    let exp_byte = (exponent + 128).clamp(0, 255) as u8;
    let mut mantissa_bytes = mantissa_bits.to_be_bytes();
    if sign {
        mantissa_bytes[0] |= 0x80;
    } else {
        mantissa_bytes[0] &= 0x7F;
    }

    [
        exp_byte,
        mantissa_bytes[0],
        mantissa_bytes[1],
        mantissa_bytes[2],
        mantissa_bytes[3],
    ]
}

/// Tokenise a full BASIC program: one `(line_number, statement_text)`
/// pair per source line, already split by the caller (a leading
/// `"10 PRINT ..."` line should be split into `(10, "PRINT ...")`
/// before calling).
///
/// # Errors
///
/// Returns an error if any line number is out of the valid range
/// `0..=9999` (the ROM editor's own limit) or a tokenised line's body
/// would exceed 65,535 bytes.
pub fn tokenise_program(lines: &[(u16, &str)]) -> Result<Vec<TokenisedLine>, String> {
    let mut out = Vec::with_capacity(lines.len());
    for &(line_number, text) in lines {
        if line_number > 9999 {
            return Err(format!(
                "line number {line_number} exceeds the ROM editor's maximum of 9999"
            ));
        }
        let bytes = tokenise_statement(text);
        if bytes.len() > 0xFFFF {
            return Err(format!("tokenised line {line_number} exceeds 65535 bytes"));
        }
        out.push(TokenisedLine { line_number, bytes });
    }
    Ok(out)
}

/// Assemble tokenised lines into a BASIC program image: for each line,
/// a big-endian line number, a little-endian length of the statement
/// bytes plus the trailing `ENTER`, the statement bytes, then `ENTER`.
#[must_use]
pub fn assemble_program(lines: &[TokenisedLine]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        let content_len = (line.bytes.len() + 1) as u16; // + ENTER
        out.push((line.line_number >> 8) as u8);
        out.push((line.line_number & 0xFF) as u8);
        out.push((content_len & 0xFF) as u8);
        out.push((content_len >> 8) as u8);
        out.extend_from_slice(&line.bytes);
        out.push(ENTER);
    }
    out
}

/// Build the TAP header + data block pair for a tokenised BASIC
/// program, as `SAVE "name"` would produce.
///
/// `auto_start` is the `LINE` a `SAVE "name" LINE n` would record (the
/// ROM's auto-run line number); `None` means "no auto-start" (encoded
/// as `0x8000` per the standard header convention).
#[must_use]
pub fn to_tap_blocks(name: &str, program: &[u8], auto_start: Option<u16>) -> Vec<TapBlock> {
    let mut header = Vec::with_capacity(17);
    header.push(0); // type 0: Program
    let mut padded_name = [b' '; 10];
    for (i, b) in name.bytes().take(10).enumerate() {
        padded_name[i] = b;
    }
    header.extend_from_slice(&padded_name);
    let len = program.len() as u16;
    header.push((len & 0xFF) as u8);
    header.push((len >> 8) as u8);
    let line = auto_start.unwrap_or(0x8000);
    header.push((line & 0xFF) as u8);
    header.push((line >> 8) as u8);
    // "Program length" field — length of the program itself excluding
    // any variables area; we have no separate variables area, so this
    // equals the total length.
    header.push((len & 0xFF) as u8);
    header.push((len >> 8) as u8);

    vec![
        TapBlock {
            flag: 0x00,
            data: header,
        },
        TapBlock {
            flag: 0xFF,
            data: program.to_vec(),
        },
    ]
}
