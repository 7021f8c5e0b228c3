//! Builtin core library: error classes and native functions every program
//! starts with.
//!
//! Registration order is fixed so the ids below stay valid for every
//! program; `Program::new` runs both registration passes before any user
//! code is added.

use crate::bytecode::{NativeFn, Program, RegisterError};
use crate::vm::{NativeCallContext, NativeOutcome, Value};

pub const BASE_ERROR_CLASS: u32 = 0;
pub const RUNTIME_ERROR_CLASS: u32 = 1;
pub const OUT_OF_MEMORY_ERROR_CLASS: u32 = 2;
pub const TYPE_ERROR_CLASS: u32 = 3;
pub const VALUE_ERROR_CLASS: u32 = 4;
pub const DIVISION_BY_ZERO_ERROR_CLASS: u32 = 5;
pub const INVALID_INSTRUCTION_ERROR_CLASS: u32 = 6;

pub const PRINT_FUNC: u32 = 0;
pub const RAISE_FUNC: u32 = 1;

/// Registers the builtin error classes in their fixed order.
pub fn register_error_classes(program: &mut Program) -> Result<(), RegisterError> {
    let base = program.add_class("BaseError", None, None, None)?;
    debug_assert_eq!(base, BASE_ERROR_CLASS);
    let runtime = program.add_class("RuntimeError", None, None, None)?;
    program.set_class_base(runtime, base);
    for name in [
        "OutOfMemoryError",
        "TypeError",
        "ValueError",
        "DivisionByZeroError",
        "InvalidInstructionError",
    ] {
        let id = program.add_class(name, None, None, None)?;
        program.set_class_base(id, runtime);
    }
    Ok(())
}

/// Registers the builtin native functions.
pub fn register_funcs(program: &mut Program) -> Result<(), RegisterError> {
    let print = program.register_native_function(
        "print",
        native_print,
        1,
        vec![None],
        true,
        None,
        None,
        None,
    )?;
    debug_assert_eq!(print, PRINT_FUNC);
    let raise = program.register_native_function(
        "raise",
        native_raise,
        1,
        vec![None],
        false,
        None,
        None,
        None,
    )?;
    debug_assert_eq!(raise, RAISE_FUNC);
    Ok(())
}

/// Resolves a native lookup string (`module.name` form) back to its
/// callback; used when decoding a program image.
pub fn native_by_lookup(lookup: &str) -> Option<NativeFn> {
    match lookup {
        "$$builtin.print" => Some(native_print),
        "$$builtin.raise" => Some(native_raise),
        _ => None,
    }
}

fn native_print(ctx: &mut NativeCallContext<'_>) -> NativeOutcome {
    let mut line = String::new();
    for i in 0..ctx.arg_count() {
        if i > 0 {
            line.push(' ');
        }
        let arg = ctx.arg(i);
        line.push_str(&ctx.display_string(&arg));
    }
    match ctx.write_line(&line) {
        Ok(()) => NativeOutcome::Ok(Value::None),
        Err(e) => NativeOutcome::Error(e),
    }
}

fn native_raise(ctx: &mut NativeCallContext<'_>) -> NativeOutcome {
    let arg = ctx.arg(0);
    match ctx.class_id_of(&arg) {
        Some(class_id) => {
            let message = ctx.exception_message(&arg);
            NativeOutcome::Raise { class_id, message }
        }
        None => NativeOutcome::Raise {
            class_id: TYPE_ERROR_CLASS,
            message: "raise expects an error class or instance".to_string(),
        },
    }
}
