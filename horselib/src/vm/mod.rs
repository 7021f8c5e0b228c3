//! Bytecode VM entrypoint and public VM surface.
//!
//! Internals are split into:
//! - `error`: VM runtime error types
//! - `config`: runtime execution configuration
//! - `host_trait` + `host`: I/O boundary for builtins
//! - `value`: the tagged value union
//! - `heap`: reference-counted object pool with cycle collection
//! - `stack`: the value stack with function-frame floors
//! - `exceptions`: catch frames
//! - `runner`: the interpreter dispatch loop

mod config;
mod error;
mod exceptions;
mod heap;
mod host;
mod host_trait;
mod runner;
mod stack;
mod value;

use crate::bytecode::Program;
use crate::unicode;

pub use config::{VmConfig, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK_ENTRIES};
pub use error::{VmError, VmErrorKind};
pub use exceptions::{CatchFrame, ExceptionInfo};
pub use heap::{Heap, HeapId, IterKind, ObjectPayload, ValueKey};
pub use host::{StdIoHost, TestHost};
pub use host_trait::HostIo;
pub use runner::RunOutcome;
pub use stack::{Stack, ALLOC_EMERGENCY_MARGIN};
pub use value::Value;

/// Per-thread execution state. Threads share nothing but the read-only
/// program; each owns its stack, heap, globals, and catch frames.
#[derive(Debug)]
pub struct VmThread {
    pub stack: Stack,
    pub heap: Heap,
    pub globals: Vec<Value>,
    pub catch_frames: Vec<CatchFrame>,
    pub config: VmConfig,
    pub(crate) pending_exception: Option<ExceptionInfo>,
}

impl VmThread {
    pub fn new(program: &Program, config: VmConfig) -> Self {
        Self {
            stack: Stack::new(config.max_stack_entries),
            heap: Heap::new(),
            globals: vec![Value::None; program.globals.len()],
            catch_frames: Vec::new(),
            config,
            pending_exception: None,
        }
    }

    /// Runs one function to completion on this thread.
    pub fn run_function(
        &mut self,
        program: &Program,
        host: &mut dyn HostIo,
        func_id: u32,
    ) -> Result<RunOutcome, VmError> {
        runner::run_function(program, self, host, func_id)
    }

    /// Releases every global slot; used at teardown and by leak audits.
    pub fn drop_globals(&mut self) {
        for idx in 0..self.globals.len() {
            let mut value = std::mem::replace(&mut self.globals[idx], Value::None);
            self.heap.free_value(&mut value);
        }
    }
}

/// Outcome a native callback hands back to the interpreter.
pub enum NativeOutcome {
    Ok(Value),
    Raise { class_id: u32, message: String },
    Error(VmError),
}

/// Call context passed to native functions: the argument slice plus heap
/// and host access.
pub struct NativeCallContext<'a> {
    pub program: &'a Program,
    pub heap: &'a mut Heap,
    pub host: &'a mut dyn HostIo,
    args: &'a [Value],
}

impl<'a> NativeCallContext<'a> {
    pub(crate) fn new(
        program: &'a Program,
        heap: &'a mut Heap,
        host: &'a mut dyn HostIo,
        args: &'a [Value],
    ) -> Self {
        Self {
            program,
            heap,
            host,
            args,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, idx: usize) -> Value {
        self.args.get(idx).cloned().unwrap_or(Value::None)
    }

    /// Allocates a heap string; the returned value owns one external
    /// reference, which transfers to whatever root receives it.
    pub fn alloc_str(&mut self, text: &str) -> Value {
        Value::HeapRef(
            self.heap
                .alloc(ObjectPayload::Str(unicode::str_to_utf32(text))),
        )
    }

    pub fn write_line(&mut self, s: &str) -> Result<(), VmError> {
        self.host.write(s, true)
    }

    /// The class of a class reference or of an instance/exception object.
    pub fn class_id_of(&self, value: &Value) -> Option<u32> {
        match value {
            Value::ClassRef(id) => Some(*id),
            Value::HeapRef(id) => match &self.heap.get(*id).payload {
                ObjectPayload::Instance { class_id, .. } => Some(*class_id),
                ObjectPayload::Exception { class_id, .. } => Some(*class_id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Message to attach when raising from this value: an exception's own
    /// message, otherwise the class name.
    pub fn exception_message(&self, value: &Value) -> String {
        if let Value::HeapRef(id) = value {
            if let ObjectPayload::Exception { message, .. } = &self.heap.get(*id).payload {
                return message.clone();
            }
        }
        self.class_id_of(value)
            .map(|id| self.program.symbols.class_name(id).to_string())
            .unwrap_or_default()
    }

    /// Display form used by `print`.
    pub fn display_string(&self, value: &Value) -> String {
        display_value(self.program, self.heap, value)
    }
}

pub(crate) fn display_value(program: &Program, heap: &Heap, value: &Value) -> String {
    match value {
        Value::None => "none".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => format!("{v}"),
        Value::FuncRef(id) => format!("<func {id}>"),
        Value::ClassRef(id) => format!("<class {}>", program.symbols.class_name(*id)),
        Value::HeapRef(id) => match &heap.get(*id).payload {
            ObjectPayload::Str(units) => unicode::utf32_to_string_lossy(units),
            ObjectPayload::List(items) => format!("<list of {}>", items.len()),
            ObjectPayload::Set(items) => format!("<set of {}>", items.len()),
            ObjectPayload::Map(entries) => format!("<map of {}>", entries.len()),
            ObjectPayload::Vector(items) => format!("<vector of {}>", items.len()),
            ObjectPayload::Instance { class_id, .. } => {
                format!("<{} instance>", program.symbols.class_name(*class_id))
            }
            ObjectPayload::Iterator { .. } => "<iterator>".to_string(),
            ObjectPayload::Exception { class_id, message } => {
                format!("{}: {message}", program.symbols.class_name(*class_id))
            }
            ObjectPayload::Closure { func_id, .. } => format!("<closure of func {func_id}>"),
        },
    }
}

/// Runs `$$globalinit` (when present) and then `main` on a fresh thread.
/// An uncaught exception in either prints `Uncaught <ClassName>` to stderr
/// and yields a non-zero exit code; `main`'s integer return value becomes
/// the exit code otherwise.
pub fn execute_program(program: &Program, host: &mut dyn HostIo, config: VmConfig) -> i32 {
    let mut thread = VmThread::new(program, config);

    if let Some(globalinit) = program.globalinit_func_index {
        match thread.run_function(program, host, globalinit) {
            Ok(RunOutcome::Returned(mut value)) => {
                thread.heap.free_value(&mut value);
            }
            Ok(RunOutcome::Uncaught(info)) => {
                eprintln!("Uncaught {}", program.symbols.class_name(info.class_id));
                thread.drop_globals();
                return 1;
            }
            Err(e) => {
                eprintln!("horsevm: fatal error in $$globalinit: {e}");
                thread.drop_globals();
                return 1;
            }
        }
    }

    let Some(main_func) = program.main_func_index else {
        eprintln!("horsevm: program has no main func");
        thread.drop_globals();
        return 1;
    };
    let exit_code = match thread.run_function(program, host, main_func) {
        Ok(RunOutcome::Returned(mut value)) => {
            let code = match value {
                Value::Int(code) => (code & 0xFF) as i32,
                _ => 0,
            };
            thread.heap.free_value(&mut value);
            code
        }
        Ok(RunOutcome::Uncaught(info)) => {
            eprintln!("Uncaught {}", program.symbols.class_name(info.class_id));
            1
        }
        Err(e) => {
            eprintln!("horsevm: fatal error in main: {e}");
            1
        }
    };
    thread.drop_globals();
    exit_code
}
