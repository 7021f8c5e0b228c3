use std::env;
use std::fs;
use std::process::ExitCode;

use horselib::bytecode::Program;
use horselib::vm::{execute_program, StdIoHost, VmConfig};

const EXIT_IO: u8 = 3;
const EXIT_DECODE: u8 = 13;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode, String> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        return Err("Usage: horserun run [--trace] <file.h64bc>".to_string());
    };
    if cmd != "run" {
        return Err("Unknown command. Supported: run".to_string());
    }

    let (config, path) = parse_run_args(args, "Usage: horserun run [--trace] <file.h64bc>")?;
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("horserun: error: failed to read `{path}`: {e}");
            return Ok(ExitCode::from(EXIT_IO));
        }
    };
    let mut program = match Program::from_bytes(&bytes) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("horserun: error: failed to decode `{path}`: {e}");
            return Ok(ExitCode::from(EXIT_DECODE));
        }
    };
    program.symbols.freeze_member_names();

    let mut host = StdIoHost;
    let code = execute_program(&program, &mut host, config);
    Ok(ExitCode::from((code & 0xFF) as u8))
}

fn parse_run_args(
    mut args: impl Iterator<Item = String>,
    usage: &str,
) -> Result<(VmConfig, String), String> {
    let mut trace = false;
    let mut path: Option<String> = None;
    for arg in args.by_ref() {
        if arg == "--trace" {
            trace = true;
            continue;
        }
        if path.is_none() {
            path = Some(arg);
        } else {
            return Err(usage.to_string());
        }
    }
    let Some(path) = path else {
        return Err(usage.to_string());
    };
    let max_call_depth = match env::var("HORSE64_MAX_CALL_DEPTH") {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|_| "HORSE64_MAX_CALL_DEPTH must be a positive integer".to_string())?,
        Err(_) => VmConfig::default().max_call_depth,
    };
    Ok((
        VmConfig {
            trace,
            max_call_depth,
            ..VmConfig::default()
        },
        path,
    ))
}
