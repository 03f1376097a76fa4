//! `bas2tap` — converts a plain-text BASIC listing into a loadable TAP file.
//!
//! Usage: `bas2tap [--line N] [--name NAME] <input.bas> <output.tap>`
//!
//! Each input line must start with a line number; everything after the
//! first run of whitespace is the statement text passed to the tokeniser.
//! Blank lines and lines starting with `#` are skipped, so listings can
//! carry a shebang-style comment header.

use std::env;
use std::fs;
use std::process::ExitCode;

use format_spectrum_bas::{assemble_program, to_tap_blocks, tokenise_program};
use format_spectrum_tap::TapFile;

struct CliArgs {
    input: String,
    output: String,
    name: String,
    auto_start: Option<u16>,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut name = String::from("PROGRAM");
    let mut auto_start = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                i += 1;
                name = args
                    .get(i)
                    .ok_or("--name requires a value")?
                    .clone();
            }
            "--line" => {
                i += 1;
                let value = args.get(i).ok_or("--line requires a value")?;
                auto_start = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("invalid --line value: {value}"))?,
                );
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    if positional.len() != 2 {
        return Err("usage: bas2tap [--line N] [--name NAME] <input.bas> <output.tap>".to_string());
    }

    Ok(CliArgs {
        input: positional[0].clone(),
        output: positional[1].clone(),
        name,
        auto_start,
    })
}

/// Split one source line into `(line_number, statement_text)`.
fn parse_source_line(raw: &str, line_no_in_file: usize) -> Result<Option<(u16, String)>, String> {
    let trimmed = raw.trim_end();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let number_text = parts
        .next()
        .ok_or_else(|| format!("line {line_no_in_file}: missing line number"))?;
    let number = number_text
        .parse::<u16>()
        .map_err(|_| format!("line {line_no_in_file}: '{number_text}' is not a line number"))?;
    let statement = parts.next().unwrap_or("").trim_start().to_string();

    Ok(Some((number, statement)))
}

fn run(cli: &CliArgs) -> Result<(), String> {
    let source = fs::read_to_string(&cli.input)
        .map_err(|e| format!("reading {}: {e}", cli.input))?;

    let mut parsed = Vec::new();
    for (i, raw_line) in source.lines().enumerate() {
        if let Some((number, text)) = parse_source_line(raw_line, i + 1)? {
            parsed.push((number, text));
        }
    }

    let borrowed: Vec<(u16, &str)> = parsed.iter().map(|(n, t)| (*n, t.as_str())).collect();
    let tokenised = tokenise_program(&borrowed)?;
    let program = assemble_program(&tokenised);
    let blocks = to_tap_blocks(&cli.name, &program, cli.auto_start);

    let tap = TapFile { blocks };
    fs::write(&cli.output, tap.to_bytes()).map_err(|e| format!("writing {}: {e}", cli.output))?;

    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("bas2tap: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(&cli) {
        eprintln!("bas2tap: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
