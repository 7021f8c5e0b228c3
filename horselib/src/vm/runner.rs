//! The interpreter loop: one handler per opcode, a tight central dispatch.

mod arith;
mod calls;
mod containers;

use crate::bytecode::{Instruction, Program};
use crate::corelib;

use super::{CatchFrame, ExceptionInfo, HostIo, Value, VmError, VmErrorKind, VmThread};

/// How a function run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Normal completion; the value carries one external reference when it
    /// is a heap object.
    Returned(Value),
    /// An exception left the outermost frame without a matching catch.
    Uncaught(ExceptionInfo),
}

/// One in-progress bytecode function activation.
#[derive(Debug, Clone, Copy)]
pub(super) struct Frame {
    pub func_id: u32,
    pub pc: usize,
    pub floor: usize,
    /// Absolute stack slot the return value lands in; unused when
    /// `discard_return` is set (synthesized `init` / `$$varinit` calls).
    pub return_slot_abs: usize,
    pub discard_return: bool,
}

/// A fault produced by an instruction handler: either an exception routed
/// through the catch machinery, or a fatal VM error.
pub(super) enum Fault {
    Raise { class_id: u32, message: String },
    Fatal(VmError),
}

impl Fault {
    pub fn type_mismatch(message: impl Into<String>) -> Fault {
        Fault::Raise {
            class_id: corelib::TYPE_ERROR_CLASS,
            message: message.into(),
        }
    }

    pub fn invalid_instruction(message: impl Into<String>) -> Fault {
        Fault::Raise {
            class_id: corelib::INVALID_INSTRUCTION_ERROR_CLASS,
            message: message.into(),
        }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Fault {
        Fault::Raise {
            class_id: corelib::OUT_OF_MEMORY_ERROR_CLASS,
            message: message.into(),
        }
    }
}

pub(super) enum Flow {
    Continue,
    Done(RunOutcome),
}

pub(super) struct Exec<'a> {
    pub program: &'a Program,
    pub thread: &'a mut VmThread,
    pub host: &'a mut dyn HostIo,
    pub frames: Vec<Frame>,
}

pub(super) fn run_function(
    program: &Program,
    thread: &mut VmThread,
    host: &mut dyn HostIo,
    func_id: u32,
) -> Result<RunOutcome, VmError> {
    let entry = program.funcs.get(func_id as usize).ok_or_else(|| {
        VmError::new(
            VmErrorKind::InternalError,
            format!("no function with id {func_id}"),
        )
    })?;
    if entry.is_native {
        return Err(VmError::new(
            VmErrorKind::InternalError,
            "cannot run a native function as a thread entry point",
        ));
    }

    let initial_floor = thread.stack.len();
    let initial_catch_depth = thread.catch_frames.len();
    let saved_func_floor = thread.stack.current_func_floor;

    let needed = initial_floor + entry.input_stack_size as usize + entry.inner_stack_size as usize;
    {
        let t = &mut *thread;
        if !t.stack.to_size(&mut t.heap, needed, false) {
            return Ok(RunOutcome::Uncaught(ExceptionInfo {
                class_id: corelib::OUT_OF_MEMORY_ERROR_CLASS,
                message: "stack exhausted before entering function".to_string(),
            }));
        }
    }
    thread.stack.current_func_floor = initial_floor;

    let mut ex = Exec {
        program,
        thread,
        host,
        frames: vec![Frame {
            func_id,
            pc: 0,
            floor: initial_floor,
            return_slot_abs: usize::MAX,
            discard_return: true,
        }],
    };

    let outcome = loop {
        let frame = *ex.frames.last().expect("frame stack never empties here");
        let func = &program.funcs[frame.func_id as usize];
        if frame.pc >= func.code.len() {
            // Fell off the end: implicit `return none`.
            match ex.do_return(Value::None) {
                Some(outcome) => break outcome,
                None => continue,
            }
        }
        let instr = &func.code[frame.pc];
        if ex.thread.config.trace {
            eprintln!(
                "[trace] f{}@{} {}",
                frame.func_id,
                frame.pc,
                instr.opcode().name()
            );
        }
        ex.frames.last_mut().expect("checked above").pc = frame.pc + 1;

        let result = ex.step(instr, frame.floor);
        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Done(outcome)) => break outcome,
            Err(Fault::Fatal(e)) => return Err(e),
            Err(Fault::Raise { class_id, message }) => {
                if let Some(outcome) = ex.dispatch_raise(class_id, message) {
                    break outcome;
                }
            }
        }
    };

    if ex.thread.config.trace {
        if let RunOutcome::Uncaught(info) = &outcome {
            eprintln!("[trace] uncaught exception class={}", info.class_id);
            ex.thread.stack.dump();
        }
    }

    // Leave the thread the way we found it regardless of outcome.
    {
        let t = &mut *ex.thread;
        t.stack.to_size(&mut t.heap, initial_floor, false);
    }
    ex.thread.catch_frames.truncate(initial_catch_depth);
    ex.thread.pending_exception = None;
    ex.thread.stack.current_func_floor = saved_func_floor;
    Ok(outcome)
}

impl<'a> Exec<'a> {
    fn step(&mut self, instr: &Instruction, floor: usize) -> Result<Flow, Fault> {
        match instr {
            Instruction::SetConst { slot, value } => {
                let abs = self.abs_slot(floor, *slot)?;
                let materialized = containers::materialize_const(self, value);
                let t = &mut *self.thread;
                t.stack.put(&mut t.heap, abs, materialized);
                Ok(Flow::Continue)
            }
            Instruction::SetGlobal { global_id, slot } => {
                let abs = self.abs_slot(floor, *slot)?;
                if *global_id as usize >= self.thread.globals.len() {
                    return Err(Fault::invalid_instruction(format!(
                        "setglobal: no global slot {global_id}"
                    )));
                }
                let value = self.copy_from_slot(abs);
                let idx = *global_id as usize;
                let mut old = std::mem::replace(&mut self.thread.globals[idx], value);
                self.thread.heap.free_value(&mut old);
                Ok(Flow::Continue)
            }
            Instruction::GetGlobal { slot, global_id } => {
                let abs = self.abs_slot(floor, *slot)?;
                if *global_id as usize >= self.thread.globals.len() {
                    return Err(Fault::invalid_instruction(format!(
                        "getglobal: no global slot {global_id}"
                    )));
                }
                let value = self.thread.globals[*global_id as usize].clone();
                if let Value::HeapRef(id) = value {
                    self.thread.heap.incr_external(id);
                }
                let t = &mut *self.thread;
                t.stack.put(&mut t.heap, abs, value);
                Ok(Flow::Continue)
            }
            Instruction::GetFunc { slot, func_id } => {
                let abs = self.abs_slot(floor, *slot)?;
                let Some(entry) = self.program.funcs.get(*func_id as usize) else {
                    return Err(Fault::invalid_instruction(format!(
                        "getfunc: no function {func_id}"
                    )));
                };
                // A capturing function snapshots its captured values from
                // the defining frame at creation time; capture-free
                // functions stay plain references.
                let value = if entry.capture_source_slots.is_empty() {
                    Value::FuncRef(*func_id)
                } else {
                    let mut bound = Vec::with_capacity(entry.capture_source_slots.len());
                    for &source in &entry.capture_source_slots {
                        let source_abs = self.abs_slot(floor, source)?;
                        let captured = self.thread.stack.get(source_abs).clone();
                        if let Value::HeapRef(id) = captured {
                            self.thread.heap.incr_heap(id);
                        }
                        bound.push(captured);
                    }
                    Value::HeapRef(self.thread.heap.alloc(super::ObjectPayload::Closure {
                        func_id: *func_id,
                        bound,
                    }))
                };
                let t = &mut *self.thread;
                t.stack.put(&mut t.heap, abs, value);
                Ok(Flow::Continue)
            }
            Instruction::GetClass { slot, class_id } => {
                let abs = self.abs_slot(floor, *slot)?;
                if *class_id as usize >= self.program.classes.len() {
                    return Err(Fault::invalid_instruction(format!(
                        "getclass: no class {class_id}"
                    )));
                }
                let t = &mut *self.thread;
                t.stack.put(&mut t.heap, abs, Value::ClassRef(*class_id));
                Ok(Flow::Continue)
            }
            Instruction::ValueCopy { dest, src } => {
                let src_abs = self.abs_slot(floor, *src)?;
                let dest_abs = self.abs_slot(floor, *dest)?;
                let value = self.copy_from_slot(src_abs);
                let t = &mut *self.thread;
                t.stack.put(&mut t.heap, dest_abs, value);
                Ok(Flow::Continue)
            }
            Instruction::BinOp { op, dest, lhs, rhs } => {
                arith::bin_op(self, floor, *op, *dest, *lhs, *rhs)?;
                Ok(Flow::Continue)
            }
            Instruction::UnOp { op, dest, operand } => {
                arith::un_op(self, floor, *op, *dest, *operand)?;
                Ok(Flow::Continue)
            }
            Instruction::Call {
                return_slot,
                callee_slot,
                arg_count,
            } => calls::call(self, floor, *return_slot, *callee_slot, *arg_count),
            Instruction::SetTop { top } => {
                let target = floor + *top as usize;
                let t = &mut *self.thread;
                if !t.stack.to_size(&mut t.heap, target, false) {
                    return Err(Fault::out_of_memory("settop: stack limit reached"));
                }
                Ok(Flow::Continue)
            }
            Instruction::ReturnValue { slot } => {
                let abs = self.abs_slot(floor, *slot)?;
                let value = self.thread.stack.take(abs);
                match self.do_return(value) {
                    Some(outcome) => Ok(Flow::Done(outcome)),
                    None => Ok(Flow::Continue),
                }
            }
            Instruction::JumpTarget { .. } => Ok(Flow::Continue),
            Instruction::CondJump { slot, target } => {
                let abs = self.abs_slot(floor, *slot)?;
                if !self.thread.stack.get(abs).is_truthy() {
                    self.jump_to(*target);
                }
                Ok(Flow::Continue)
            }
            Instruction::Jump { target } => {
                self.jump_to(*target);
                Ok(Flow::Continue)
            }
            Instruction::NewIterator { dest, source } => {
                containers::new_iterator(self, floor, *dest, *source)?;
                Ok(Flow::Continue)
            }
            Instruction::Iterate {
                dest,
                iterator,
                end_target,
            } => {
                containers::iterate(self, floor, *dest, *iterator, *end_target)?;
                Ok(Flow::Continue)
            }
            Instruction::PushCatchFrame {
                handler_target,
                finally_target,
            } => {
                self.thread.catch_frames.push(CatchFrame {
                    caught_class_ids: Vec::new(),
                    handler_target: *handler_target,
                    finally_target: *finally_target,
                    call_depth: self.frames.len(),
                    saved_stack_floor: self.thread.stack.len(),
                    finally_entered: false,
                });
                Ok(Flow::Continue)
            }
            Instruction::AddCatchType { class_id } => {
                if *class_id as usize >= self.program.classes.len() {
                    return Err(Fault::invalid_instruction(format!(
                        "addcatchtype: no class {class_id}"
                    )));
                }
                let Some(frame) = self.thread.catch_frames.last_mut() else {
                    return Err(Fault::invalid_instruction(
                        "addcatchtype without an open catch frame",
                    ));
                };
                frame.caught_class_ids.push(*class_id);
                Ok(Flow::Continue)
            }
            Instruction::AddCatchTypeByRef { slot } => {
                let abs = self.abs_slot(floor, *slot)?;
                let Value::ClassRef(class_id) = *self.thread.stack.get(abs) else {
                    return Err(Fault::type_mismatch(
                        "addcatchtypebyref: slot does not hold a class reference",
                    ));
                };
                let Some(frame) = self.thread.catch_frames.last_mut() else {
                    return Err(Fault::invalid_instruction(
                        "addcatchtypebyref without an open catch frame",
                    ));
                };
                frame.caught_class_ids.push(class_id);
                Ok(Flow::Continue)
            }
            Instruction::PopCatchFrame => {
                if self.thread.catch_frames.pop().is_none() {
                    return Err(Fault::invalid_instruction(
                        "popcatchframe without an open catch frame",
                    ));
                }
                if let Some(pending) = self.thread.pending_exception.take() {
                    // The finally block ran through; keep unwinding.
                    return Err(Fault::Raise {
                        class_id: pending.class_id,
                        message: pending.message,
                    });
                }
                Ok(Flow::Continue)
            }
            Instruction::JumpToFinally => {
                let Some(frame) = self.thread.catch_frames.last_mut() else {
                    return Err(Fault::invalid_instruction(
                        "jumptofinally without an open catch frame",
                    ));
                };
                let Some(finally_target) = frame.finally_target else {
                    return Err(Fault::invalid_instruction(
                        "jumptofinally on a frame without a finally block",
                    ));
                };
                frame.finally_entered = true;
                self.jump_to(finally_target);
                Ok(Flow::Continue)
            }
            Instruction::GetMember {
                dest,
                object,
                name_id,
            } => {
                containers::get_member(self, floor, *dest, *object, *name_id)?;
                Ok(Flow::Continue)
            }
            Instruction::NewList { dest } => containers::new_container(
                self,
                floor,
                *dest,
                super::ObjectPayload::List(Vec::new()),
            ),
            Instruction::AddToList { list, value } => {
                containers::add_to_list(self, floor, *list, *value)?;
                Ok(Flow::Continue)
            }
            Instruction::NewSet { dest } => containers::new_container(
                self,
                floor,
                *dest,
                super::ObjectPayload::Set(Default::default()),
            ),
            Instruction::AddToSet { set, value } => {
                containers::add_to_set(self, floor, *set, *value)?;
                Ok(Flow::Continue)
            }
            Instruction::NewVector { dest } => containers::new_container(
                self,
                floor,
                *dest,
                super::ObjectPayload::Vector(Vec::new()),
            ),
            Instruction::PutVector {
                vector,
                index,
                value,
            } => {
                containers::put_vector(self, floor, *vector, *index, *value)?;
                Ok(Flow::Continue)
            }
            Instruction::NewMap { dest } => containers::new_container(
                self,
                floor,
                *dest,
                super::ObjectPayload::Map(Default::default()),
            ),
            Instruction::PutMap { map, key, value } => {
                containers::put_map(self, floor, *map, *key, *value)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Absolute stack index for a frame-relative slot, bounds-checked.
    pub(super) fn abs_slot(&self, floor: usize, slot: u16) -> Result<usize, Fault> {
        let abs = floor + slot as usize;
        if abs >= self.thread.stack.len() {
            return Err(Fault::invalid_instruction(format!(
                "slot {slot} outside the current frame"
            )));
        }
        Ok(abs)
    }

    /// Clones a slot's value as a new root reference.
    pub(super) fn copy_from_slot(&mut self, abs: usize) -> Value {
        let value = self.thread.stack.get(abs).clone();
        if let Value::HeapRef(id) = value {
            self.thread.heap.incr_external(id);
        }
        value
    }

    fn jump_to(&mut self, target: u32) {
        self.frames
            .last_mut()
            .expect("jump executes inside a frame")
            .pc = target as usize;
    }

    /// Pops the active frame, delivering `value` to the caller. Returns the
    /// final outcome when the outermost frame returns.
    pub(super) fn do_return(&mut self, mut value: Value) -> Option<RunOutcome> {
        let frame = self.frames.pop().expect("return executes inside a frame");
        // Catch frames the callee never popped die with it.
        while self
            .thread
            .catch_frames
            .last()
            .map(|c| c.call_depth > self.frames.len())
            .unwrap_or(false)
        {
            self.thread.catch_frames.pop();
        }
        {
            let t = &mut *self.thread;
            t.stack.to_size(&mut t.heap, frame.floor, false);
        }
        if self.frames.is_empty() {
            return Some(RunOutcome::Returned(value));
        }
        self.thread.stack.current_func_floor =
            self.frames.last().expect("checked above").floor;
        if frame.discard_return {
            self.thread.heap.free_value(&mut value);
        } else {
            let t = &mut *self.thread;
            t.stack.put(&mut t.heap, frame.return_slot_abs, value);
        }
        None
    }

    /// Routes a raised exception through the catch-frame stack. Returns the
    /// uncaught outcome when no frame takes it.
    pub(super) fn dispatch_raise(
        &mut self,
        class_id: u32,
        message: String,
    ) -> Option<RunOutcome> {
        loop {
            let Some(top) = self.thread.catch_frames.last() else {
                return Some(RunOutcome::Uncaught(ExceptionInfo { class_id, message }));
            };
            let matches = top
                .caught_class_ids
                .iter()
                .any(|&caught| self.program.class_is_or_inherits(class_id, caught));
            let run_finally = top.finally_target.is_some() && !top.finally_entered;
            if !matches && !run_finally {
                self.thread.catch_frames.pop();
                continue;
            }

            let (call_depth, saved_stack_floor) = (top.call_depth, top.saved_stack_floor);
            self.frames.truncate(call_depth);
            {
                let t = &mut *self.thread;
                t.stack.to_size(&mut t.heap, saved_stack_floor, true);
            }
            self.thread.stack.current_func_floor = self
                .frames
                .last()
                .expect("catch frame depth is within the frame stack")
                .floor;

            let top = self
                .thread
                .catch_frames
                .last_mut()
                .expect("still present, checked above");
            let target = if matches {
                // Consumed: a second raise inside the handler escapes.
                top.caught_class_ids.clear();
                self.thread.pending_exception = None;
                top.handler_target
            } else {
                top.finally_entered = true;
                self.thread.pending_exception = Some(ExceptionInfo { class_id, message });
                top.finally_target.expect("run_finally checked")
            };
            self.jump_to(target);
            return None;
        }
    }
}
