//! Human-readable listings of a program: per-function disassembly and the
//! table stats summary.

use std::fmt::Write as _;

use super::{ConstValue, Instruction, Program};
use crate::unicode;

fn const_to_string(value: &ConstValue) -> String {
    match value {
        ConstValue::None => "none".to_string(),
        ConstValue::Bool(b) => b.to_string(),
        ConstValue::Int(v) => v.to_string(),
        ConstValue::Float(v) => format!("{v:?}"),
        ConstValue::Str(units) => {
            format!("\"{}\"", unicode::utf32_to_string_lossy(units))
        }
    }
}

/// One line per instruction: index, mnemonic, operands.
pub fn disassemble_func(program: &Program, func_id: u32) -> String {
    let mut out = String::new();
    let func = &program.funcs[func_id as usize];
    if func.is_native {
        let lookup = func.native_lookup.as_deref().unwrap_or("?");
        let _ = writeln!(out, "  <native: {lookup}>");
        return out;
    }
    for (idx, instr) in func.code.iter().enumerate() {
        let _ = write!(out, "  {idx:4}  {}", instr.opcode().name());
        match instr {
            Instruction::SetConst { slot, value } => {
                let _ = write!(out, " slot={slot} value={}", const_to_string(value));
            }
            Instruction::SetGlobal { global_id, slot } => {
                let _ = write!(out, " global={global_id} slot={slot}");
            }
            Instruction::GetGlobal { slot, global_id } => {
                let _ = write!(out, " slot={slot} global={global_id}");
            }
            Instruction::GetFunc { slot, func_id } => {
                let _ = write!(out, " slot={slot} func={func_id}");
            }
            Instruction::GetClass { slot, class_id } => {
                let _ = write!(out, " slot={slot} class={class_id}");
            }
            Instruction::ValueCopy { dest, src } => {
                let _ = write!(out, " dest={dest} src={src}");
            }
            Instruction::BinOp { op, dest, lhs, rhs } => {
                let _ = write!(out, " op={op:?} dest={dest} lhs={lhs} rhs={rhs}");
            }
            Instruction::UnOp { op, dest, operand } => {
                let _ = write!(out, " op={op:?} dest={dest} operand={operand}");
            }
            Instruction::Call {
                return_slot,
                callee_slot,
                arg_count,
            } => {
                let _ = write!(
                    out,
                    " return={return_slot} callee={callee_slot} args={arg_count}"
                );
            }
            Instruction::SetTop { top } => {
                let _ = write!(out, " top={top}");
            }
            Instruction::ReturnValue { slot } => {
                let _ = write!(out, " slot={slot}");
            }
            Instruction::JumpTarget { id } => {
                let _ = write!(out, " id={id}");
            }
            Instruction::CondJump { slot, target } => {
                let _ = write!(out, " slot={slot} target={target}");
            }
            Instruction::Jump { target } => {
                let _ = write!(out, " target={target}");
            }
            Instruction::NewIterator { dest, source } => {
                let _ = write!(out, " dest={dest} source={source}");
            }
            Instruction::Iterate {
                dest,
                iterator,
                end_target,
            } => {
                let _ = write!(out, " dest={dest} iter={iterator} end={end_target}");
            }
            Instruction::PushCatchFrame {
                handler_target,
                finally_target,
            } => {
                let _ = write!(out, " handler={handler_target}");
                if let Some(finally_target) = finally_target {
                    let _ = write!(out, " finally={finally_target}");
                }
            }
            Instruction::AddCatchType { class_id } => {
                let _ = write!(out, " class={class_id}");
            }
            Instruction::AddCatchTypeByRef { slot } => {
                let _ = write!(out, " slot={slot}");
            }
            Instruction::GetMember {
                dest,
                object,
                name_id,
            } => {
                let name = program.symbols.member_name(*name_id).unwrap_or("?");
                let _ = write!(out, " dest={dest} object={object} name={name_id} ({name})");
            }
            Instruction::PopCatchFrame | Instruction::JumpToFinally => {}
            Instruction::NewList { dest }
            | Instruction::NewSet { dest }
            | Instruction::NewVector { dest }
            | Instruction::NewMap { dest } => {
                let _ = write!(out, " dest={dest}");
            }
            Instruction::AddToList { list, value } => {
                let _ = write!(out, " list={list} value={value}");
            }
            Instruction::AddToSet { set, value } => {
                let _ = write!(out, " set={set} value={value}");
            }
            Instruction::PutVector {
                vector,
                index,
                value,
            } => {
                let _ = write!(out, " vector={vector} index={index} value={value}");
            }
            Instruction::PutMap { map, key, value } => {
                let _ = write!(out, " map={map} key={key} value={value}");
            }
        }
        out.push('\n');
    }
    out
}

/// Table summary in the style of the compiler's info output: counts first,
/// then one line per function and class.
pub fn program_stats(program: &Program) -> String {
    let prefix = "horsec: info:";
    let mut out = String::new();
    let _ = writeln!(out, "{prefix} bytecode func count: {}", program.funcs.len());
    let _ = writeln!(
        out,
        "{prefix} bytecode global vars count: {}",
        program.globals.len()
    );
    let _ = writeln!(
        out,
        "{prefix} bytecode class count: {}",
        program.classes.len()
    );
    for (id, func) in program.funcs.iter().enumerate() {
        let name = program
            .symbols
            .func_symbol(id as u32)
            .and_then(|s| s.name.as_deref())
            .unwrap_or("(unnamed)");
        let mut line = format!(
            "{prefix} bytecode func id={id} name: \"{name}\" native: {}",
            u8::from(func.is_native)
        );
        if !func.is_native && !func.code.is_empty() {
            let _ = write!(line, " code: {} ops", func.code.len());
        }
        if program.main_func_index == Some(id as u32) {
            line.push_str(" (PROGRAM START)");
        }
        if let Some(class_id) = func.associated_class_id {
            let _ = write!(line, " (CLASS: {class_id})");
        }
        let _ = writeln!(out, "{line}");
    }
    for (id, _class) in program.classes.iter().enumerate() {
        let name = program.symbols.class_name(id as u32);
        let _ = writeln!(out, "{prefix} bytecode class id={id} name: \"{name}\"");
    }
    out
}
