//! `CALL` handling: bytecode frames, native callbacks, and class-call
//! construction.

use crate::corelib;
use crate::vm::{NativeCallContext, NativeOutcome, ObjectPayload, Value};

use super::{Exec, Fault, Flow, Frame};

pub(super) fn call(
    ex: &mut Exec<'_>,
    floor: usize,
    return_slot: u16,
    callee_slot: u16,
    arg_count: u16,
) -> Result<Flow, Fault> {
    let callee_abs = ex.abs_slot(floor, callee_slot)?;
    let return_abs = ex.abs_slot(floor, return_slot)?;
    let args_start = callee_abs + 1;
    if args_start + arg_count as usize > ex.thread.stack.len() {
        return Err(Fault::invalid_instruction(
            "call: argument slots outside the current frame",
        ));
    }

    match *ex.thread.stack.get(callee_abs) {
        Value::FuncRef(func_id) => {
            let entry = &ex.program.funcs[func_id as usize];
            if entry.is_native {
                call_native(ex, func_id, return_abs, args_start, arg_count as usize)
            } else {
                if !entry.capture_source_slots.is_empty() {
                    return Err(Fault::invalid_instruction(
                        "call: capturing function must be called through its closure",
                    ));
                }
                if arg_count != entry.input_stack_size {
                    return Err(Fault::type_mismatch(format!(
                        "call: function expects {} values, got {arg_count}",
                        entry.input_stack_size
                    )));
                }
                push_frame(ex, func_id, args_start, return_abs, false)?;
                Ok(Flow::Continue)
            }
        }
        Value::ClassRef(class_id) => {
            call_class(ex, class_id, return_abs, args_start, arg_count as usize)
        }
        Value::HeapRef(heap_id) => {
            let func_id = match &ex.thread.heap.get(heap_id).payload {
                ObjectPayload::Closure { func_id, .. } => *func_id,
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "call: cannot call a {} value",
                        other.type_name()
                    )))
                }
            };
            call_closure(ex, heap_id, func_id, return_abs, args_start, arg_count)
        }
        ref other => Err(Fault::type_mismatch(format!(
            "call: cannot call a {} value",
            other.type_name()
        ))),
    }
}

/// A closure call is an ordinary bytecode call that additionally seeds the
/// callee's capture slots (right after the arguments) with the closure's
/// bound values.
fn call_closure(
    ex: &mut Exec<'_>,
    closure_id: crate::vm::HeapId,
    func_id: u32,
    return_abs: usize,
    args_start: usize,
    arg_count: u16,
) -> Result<Flow, Fault> {
    let entry = &ex.program.funcs[func_id as usize];
    if entry.is_native {
        return Err(Fault::invalid_instruction(
            "call: closure refers to a native function",
        ));
    }
    if arg_count != entry.input_stack_size {
        return Err(Fault::type_mismatch(format!(
            "call: function expects {} values, got {arg_count}",
            entry.input_stack_size
        )));
    }
    let capture_base = args_start + entry.input_stack_size as usize;
    push_frame(ex, func_id, args_start, return_abs, false)?;

    // The callee slot below the new floor keeps the closure alive for the
    // whole call; the copies become fresh roots of their own.
    let bound: Vec<Value> = match &ex.thread.heap.get(closure_id).payload {
        ObjectPayload::Closure { bound, .. } => bound.clone(),
        _ => unreachable!("checked by the caller"),
    };
    if capture_base + bound.len() > ex.thread.stack.len() {
        return Err(Fault::invalid_instruction(
            "call: closure capture slots outside the callee frame",
        ));
    }
    for (offset, value) in bound.into_iter().enumerate() {
        if let Value::HeapRef(id) = value {
            ex.thread.heap.incr_external(id);
        }
        let t = &mut *ex.thread;
        t.stack.put(&mut t.heap, capture_base + offset, value);
    }
    Ok(Flow::Continue)
}

/// Opens a bytecode frame whose slot zero is at `new_floor`. Arguments are
/// already in place there.
fn push_frame(
    ex: &mut Exec<'_>,
    func_id: u32,
    new_floor: usize,
    return_slot_abs: usize,
    discard_return: bool,
) -> Result<(), Fault> {
    if ex.frames.len() >= ex.thread.config.max_call_depth {
        return Err(Fault::Raise {
            class_id: corelib::RUNTIME_ERROR_CLASS,
            message: format!(
                "call stack limit exceeded ({})",
                ex.thread.config.max_call_depth
            ),
        });
    }
    let entry = &ex.program.funcs[func_id as usize];
    let needed = new_floor + entry.input_stack_size as usize + entry.inner_stack_size as usize;
    {
        let t = &mut *ex.thread;
        if !t.stack.to_size(&mut t.heap, needed, false) {
            return Err(Fault::out_of_memory("call: stack limit reached"));
        }
        // Everything at or above the callee floor is forfeited by the
        // caller. The slots past the arguments may be reused caller slots;
        // the callee starts from none values there.
        for idx in new_floor + entry.input_stack_size as usize..needed {
            t.stack.put(&mut t.heap, idx, Value::None);
        }
    }
    ex.frames.push(Frame {
        func_id,
        pc: 0,
        floor: new_floor,
        return_slot_abs,
        discard_return,
    });
    ex.thread.stack.current_func_floor = new_floor;
    Ok(())
}

fn call_native(
    ex: &mut Exec<'_>,
    func_id: u32,
    return_abs: usize,
    args_start: usize,
    arg_count: usize,
) -> Result<Flow, Fault> {
    let entry = &ex.program.funcs[func_id as usize];
    let callback = entry.native.expect("native entries carry their callback");
    // Argument slots stay live on the stack for the duration of the call;
    // the context only borrows them.
    let args: Vec<Value> = (args_start..args_start + arg_count)
        .map(|idx| ex.thread.stack.get(idx).clone())
        .collect();
    let outcome = {
        let t = &mut *ex.thread;
        let mut ctx = NativeCallContext::new(ex.program, &mut t.heap, &mut *ex.host, &args);
        callback(&mut ctx)
    };
    match outcome {
        NativeOutcome::Ok(value) => {
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, return_abs, value);
            Ok(Flow::Continue)
        }
        NativeOutcome::Raise { class_id, message } => Err(Fault::Raise { class_id, message }),
        NativeOutcome::Error(e) => Err(Fault::Fatal(e)),
    }
}

/// Calling a class constructs an instance. Error classes become exception
/// objects; other classes get their member variables zeroed, then
/// `$$varinit` and `init` run when present.
fn call_class(
    ex: &mut Exec<'_>,
    class_id: u32,
    return_abs: usize,
    args_start: usize,
    arg_count: usize,
) -> Result<Flow, Fault> {
    if ex
        .program
        .class_is_or_inherits(class_id, corelib::BASE_ERROR_CLASS)
    {
        let message = ex.program.symbols.class_name(class_id).to_string();
        let exception = ex.thread.heap.alloc(ObjectPayload::Exception {
            class_id,
            message,
        });
        let t = &mut *ex.thread;
        t.stack.put(&mut t.heap, return_abs, Value::HeapRef(exception));
        return Ok(Flow::Continue);
    }

    let vars = vec![Value::None; ex.program.instance_var_count(class_id)];
    let instance = ex
        .thread
        .heap
        .alloc(ObjectPayload::Instance { class_id, vars });
    {
        let t = &mut *ex.thread;
        t.stack
            .put(&mut t.heap, return_abs, Value::HeapRef(instance));
    }

    let init_func = ex.program.init_func_of(class_id);
    if let Some(init_func) = init_func {
        let entry = &ex.program.funcs[init_func as usize];
        if arg_count + 1 != entry.input_stack_size as usize {
            return Err(Fault::type_mismatch(format!(
                "call: init expects {} values, got {}",
                entry.input_stack_size as usize - 1,
                arg_count
            )));
        }
    } else if arg_count != 0 {
        return Err(Fault::type_mismatch(
            "call: class without init takes no arguments",
        ));
    }

    // Synthesized calls append self (+ args) above the caller's slots.
    // Frames run in push order reversed, so push init first and $$varinit
    // second: $$varinit initializes member defaults before init runs.
    if let Some(init_func) = init_func {
        let new_floor = ex.thread.stack.len();
        let args: Vec<Value> = (args_start..args_start + arg_count)
            .map(|idx| ex.thread.stack.get(idx).clone())
            .collect();
        push_frame(ex, init_func, new_floor, usize::MAX, true)?;
        ex.thread.heap.incr_external(instance);
        {
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, new_floor, Value::HeapRef(instance));
        }
        for (offset, value) in args.into_iter().enumerate() {
            if let Value::HeapRef(id) = value {
                ex.thread.heap.incr_external(id);
            }
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, new_floor + 1 + offset, value);
        }
    }
    if let Some(varinit_func) = ex.program.varinit_func_of(class_id) {
        let new_floor = ex.thread.stack.len();
        push_frame(ex, varinit_func, new_floor, usize::MAX, true)?;
        ex.thread.heap.incr_external(instance);
        {
            let t = &mut *ex.thread;
            t.stack.put(&mut t.heap, new_floor, Value::HeapRef(instance));
        }
    }
    Ok(Flow::Continue)
}
