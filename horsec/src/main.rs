use std::env;
use std::fs;
use std::process::ExitCode;

use horselib::bytecode::{disassemble_func, program_stats, Program};

const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_DECODE: u8 = 13;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn run() -> Result<ExitCode, String> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        return Err("Usage: horsec stats <file.h64bc> | horsec disasm <file.h64bc>".to_string());
    };

    match cmd.as_str() {
        "stats" => {
            let Some(path) = args.next() else {
                return Err("Usage: horsec stats <file.h64bc>".to_string());
            };
            if args.next().is_some() {
                return Err("Usage: horsec stats <file.h64bc>".to_string());
            }
            let program = load_program(&path)?;
            match program {
                Ok(program) => {
                    print!("{}", program_stats(&program));
                    Ok(ExitCode::SUCCESS)
                }
                Err(code) => Ok(code),
            }
        }
        "disasm" => {
            let Some(path) = args.next() else {
                return Err("Usage: horsec disasm <file.h64bc>".to_string());
            };
            if args.next().is_some() {
                return Err("Usage: horsec disasm <file.h64bc>".to_string());
            }
            let program = load_program(&path)?;
            match program {
                Ok(program) => {
                    for func_id in 0..program.funcs.len() as u32 {
                        let name = program
                            .symbols
                            .func_symbol(func_id)
                            .and_then(|s| s.name.as_deref())
                            .unwrap_or("(unnamed)");
                        println!("func id={func_id} name: \"{name}\"");
                        print!("{}", disassemble_func(&program, func_id));
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(code) => Ok(code),
            }
        }
        _ => Err("Unknown command. Supported: stats, disasm".to_string()),
    }
}

fn load_program(path: &str) -> Result<Result<Program, ExitCode>, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("horsec: error: failed to read `{path}`: {e}");
            return Ok(Err(ExitCode::from(EXIT_IO)));
        }
    };
    match Program::from_bytes(&bytes) {
        Ok(program) => Ok(Ok(program)),
        Err(e) => {
            eprintln!("horsec: error: failed to decode `{path}`: {e}");
            Ok(Err(ExitCode::from(EXIT_DECODE)))
        }
    }
}
