//! Byte image of a program.
//!
//! Instruction streams serialize as fixed-size records: the opcode is the
//! first byte of every record and fully determines the record size. String
//! constants live in a per-function pool section so `SETCONST` records stay
//! fixed-size (the payload is the pool index).

use super::symbols::{ClassSymbol, DebugSymbols, FuncSymbol, GlobalVarSymbol};
use super::{
    BinOpCode, ClassEntry, ConstValue, FuncEntry, GlobalVarEntry, Instruction, Opcode, Program,
    UnOpCode,
};
use crate::corelib;

const MAGIC: &[u8; 4] = b"H64B";
const VERSION: u32 = 1;
const NO_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of image")]
    UnexpectedEof,
    #[error("invalid image magic header")]
    BadMagic,
    #[error("unsupported image version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid opcode byte {0:#04x}")]
    InvalidOpcode(u8),
    #[error("invalid UTF-8 in image string")]
    InvalidUtf8,
    #[error("no registered native function `{0}`")]
    UnknownNative(String),
    #[error("corrupt image: {0}")]
    Corrupt(&'static str),
}

/// Record size in bytes for `op`, opcode byte included.
pub(super) fn record_size(op: Opcode) -> usize {
    match op {
        Opcode::Invalid | Opcode::PopCatchFrame | Opcode::JumpToFinally => 1,
        Opcode::SetTop
        | Opcode::ReturnValue
        | Opcode::AddCatchTypeByRef
        | Opcode::NewList
        | Opcode::NewSet
        | Opcode::NewVector
        | Opcode::NewMap => 3,
        Opcode::ValueCopy
        | Opcode::JumpTarget
        | Opcode::Jump
        | Opcode::NewIterator
        | Opcode::AddCatchType
        | Opcode::AddToList
        | Opcode::AddToSet => 5,
        Opcode::UnOp => 6,
        Opcode::SetGlobal
        | Opcode::GetGlobal
        | Opcode::GetFunc
        | Opcode::GetClass
        | Opcode::Call
        | Opcode::CondJump
        | Opcode::PutMap => 7,
        Opcode::BinOp => 8,
        Opcode::Iterate
        | Opcode::PushCatchFrame
        | Opcode::GetMember
        | Opcode::PutVector => 9,
        Opcode::SetConst => 12,
    }
}

fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_opt_u32(out: &mut Vec<u8>, v: Option<u32>) {
    write_u32(out, v.unwrap_or(NO_INDEX));
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_opt_str(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            write_u8(out, 1);
            write_str(out, s);
        }
        None => write_u8(out, 0),
    }
}

const CONST_TAG_NONE: u8 = 0;
const CONST_TAG_BOOL: u8 = 1;
const CONST_TAG_INT: u8 = 2;
const CONST_TAG_FLOAT: u8 = 3;
const CONST_TAG_STR: u8 = 4;

fn encode_instr(instr: &Instruction, strings: &mut Vec<Vec<u32>>, out: &mut Vec<u8>) {
    let start = out.len();
    write_u8(out, instr.opcode() as u8);
    match instr {
        Instruction::SetConst { slot, value } => {
            write_u16(out, *slot);
            match value {
                ConstValue::None => {
                    write_u8(out, CONST_TAG_NONE);
                    write_u64(out, 0);
                }
                ConstValue::Bool(b) => {
                    write_u8(out, CONST_TAG_BOOL);
                    write_u64(out, u64::from(*b));
                }
                ConstValue::Int(v) => {
                    write_u8(out, CONST_TAG_INT);
                    write_u64(out, *v as u64);
                }
                ConstValue::Float(v) => {
                    write_u8(out, CONST_TAG_FLOAT);
                    write_u64(out, v.to_bits());
                }
                ConstValue::Str(units) => {
                    write_u8(out, CONST_TAG_STR);
                    strings.push(units.clone());
                    write_u64(out, strings.len() as u64 - 1);
                }
            }
        }
        Instruction::SetGlobal { global_id, slot } => {
            write_u32(out, *global_id);
            write_u16(out, *slot);
        }
        Instruction::GetGlobal { slot, global_id } => {
            write_u16(out, *slot);
            write_u32(out, *global_id);
        }
        Instruction::GetFunc { slot, func_id } => {
            write_u16(out, *slot);
            write_u32(out, *func_id);
        }
        Instruction::GetClass { slot, class_id } => {
            write_u16(out, *slot);
            write_u32(out, *class_id);
        }
        Instruction::ValueCopy { dest, src } => {
            write_u16(out, *dest);
            write_u16(out, *src);
        }
        Instruction::BinOp { op, dest, lhs, rhs } => {
            write_u8(out, *op as u8);
            write_u16(out, *dest);
            write_u16(out, *lhs);
            write_u16(out, *rhs);
        }
        Instruction::UnOp { op, dest, operand } => {
            write_u8(out, *op as u8);
            write_u16(out, *dest);
            write_u16(out, *operand);
        }
        Instruction::Call {
            return_slot,
            callee_slot,
            arg_count,
        } => {
            write_u16(out, *return_slot);
            write_u16(out, *callee_slot);
            write_u16(out, *arg_count);
        }
        Instruction::SetTop { top } => write_u16(out, *top),
        Instruction::ReturnValue { slot } => write_u16(out, *slot),
        Instruction::JumpTarget { id } => write_u32(out, *id),
        Instruction::CondJump { slot, target } => {
            write_u16(out, *slot);
            write_u32(out, *target);
        }
        Instruction::Jump { target } => write_u32(out, *target),
        Instruction::NewIterator { dest, source } => {
            write_u16(out, *dest);
            write_u16(out, *source);
        }
        Instruction::Iterate {
            dest,
            iterator,
            end_target,
        } => {
            write_u16(out, *dest);
            write_u16(out, *iterator);
            write_u32(out, *end_target);
        }
        Instruction::PushCatchFrame {
            handler_target,
            finally_target,
        } => {
            write_u32(out, *handler_target);
            write_opt_u32(out, *finally_target);
        }
        Instruction::AddCatchType { class_id } => write_u32(out, *class_id),
        Instruction::AddCatchTypeByRef { slot } => write_u16(out, *slot),
        Instruction::PopCatchFrame | Instruction::JumpToFinally => {}
        Instruction::GetMember {
            dest,
            object,
            name_id,
        } => {
            write_u16(out, *dest);
            write_u16(out, *object);
            write_u32(out, *name_id);
        }
        Instruction::NewList { dest }
        | Instruction::NewSet { dest }
        | Instruction::NewVector { dest }
        | Instruction::NewMap { dest } => write_u16(out, *dest),
        Instruction::AddToList { list, value } => {
            write_u16(out, *list);
            write_u16(out, *value);
        }
        Instruction::AddToSet { set, value } => {
            write_u16(out, *set);
            write_u16(out, *value);
        }
        Instruction::PutVector {
            vector,
            index,
            value,
        } => {
            write_u16(out, *vector);
            write_u32(out, *index);
            write_u16(out, *value);
        }
        Instruction::PutMap { map, key, value } => {
            write_u16(out, *map);
            write_u16(out, *key);
            write_u16(out, *value);
        }
    }
    debug_assert_eq!(out.len() - start, record_size(instr.opcode()));
}

struct Reader<'a> {
    bytes: &'a [u8],
    idx: usize,
}

impl<'a> Reader<'a> {
    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.idx + len > self.bytes.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let out = &self.bytes[self.idx..self.idx + len];
        self.idx += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_exact(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_exact(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_opt_u32(&mut self) -> Result<Option<u32>, DecodeError> {
        let v = self.read_u32()?;
        Ok((v != NO_INDEX).then_some(v))
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_exact(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_u8()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_str()?))
    }
}

fn decode_instr(rd: &mut Reader<'_>, strings: &[Vec<u32>]) -> Result<Instruction, DecodeError> {
    let opcode_byte = rd.read_u8()?;
    let opcode =
        Opcode::from_u8(opcode_byte).ok_or(DecodeError::InvalidOpcode(opcode_byte))?;
    Ok(match opcode {
        Opcode::Invalid => return Err(DecodeError::InvalidOpcode(opcode_byte)),
        Opcode::SetConst => {
            let slot = rd.read_u16()?;
            let tag = rd.read_u8()?;
            let payload = rd.read_u64()?;
            let value = match tag {
                CONST_TAG_NONE => ConstValue::None,
                CONST_TAG_BOOL => ConstValue::Bool(payload != 0),
                CONST_TAG_INT => ConstValue::Int(payload as i64),
                CONST_TAG_FLOAT => ConstValue::Float(f64::from_bits(payload)),
                CONST_TAG_STR => {
                    let units = strings
                        .get(payload as usize)
                        .ok_or(DecodeError::Corrupt("string pool index out of range"))?;
                    ConstValue::Str(units.clone())
                }
                _ => return Err(DecodeError::Corrupt("unknown constant tag")),
            };
            Instruction::SetConst { slot, value }
        }
        Opcode::SetGlobal => Instruction::SetGlobal {
            global_id: rd.read_u32()?,
            slot: rd.read_u16()?,
        },
        Opcode::GetGlobal => Instruction::GetGlobal {
            slot: rd.read_u16()?,
            global_id: rd.read_u32()?,
        },
        Opcode::GetFunc => Instruction::GetFunc {
            slot: rd.read_u16()?,
            func_id: rd.read_u32()?,
        },
        Opcode::GetClass => Instruction::GetClass {
            slot: rd.read_u16()?,
            class_id: rd.read_u32()?,
        },
        Opcode::ValueCopy => Instruction::ValueCopy {
            dest: rd.read_u16()?,
            src: rd.read_u16()?,
        },
        Opcode::BinOp => {
            let op = decode_binop(rd.read_u8()?)?;
            Instruction::BinOp {
                op,
                dest: rd.read_u16()?,
                lhs: rd.read_u16()?,
                rhs: rd.read_u16()?,
            }
        }
        Opcode::UnOp => {
            let op = decode_unop(rd.read_u8()?)?;
            Instruction::UnOp {
                op,
                dest: rd.read_u16()?,
                operand: rd.read_u16()?,
            }
        }
        Opcode::Call => Instruction::Call {
            return_slot: rd.read_u16()?,
            callee_slot: rd.read_u16()?,
            arg_count: rd.read_u16()?,
        },
        Opcode::SetTop => Instruction::SetTop {
            top: rd.read_u16()?,
        },
        Opcode::ReturnValue => Instruction::ReturnValue {
            slot: rd.read_u16()?,
        },
        Opcode::JumpTarget => Instruction::JumpTarget { id: rd.read_u32()? },
        Opcode::CondJump => Instruction::CondJump {
            slot: rd.read_u16()?,
            target: rd.read_u32()?,
        },
        Opcode::Jump => Instruction::Jump {
            target: rd.read_u32()?,
        },
        Opcode::NewIterator => Instruction::NewIterator {
            dest: rd.read_u16()?,
            source: rd.read_u16()?,
        },
        Opcode::Iterate => Instruction::Iterate {
            dest: rd.read_u16()?,
            iterator: rd.read_u16()?,
            end_target: rd.read_u32()?,
        },
        Opcode::PushCatchFrame => Instruction::PushCatchFrame {
            handler_target: rd.read_u32()?,
            finally_target: rd.read_opt_u32()?,
        },
        Opcode::AddCatchType => Instruction::AddCatchType {
            class_id: rd.read_u32()?,
        },
        Opcode::AddCatchTypeByRef => Instruction::AddCatchTypeByRef {
            slot: rd.read_u16()?,
        },
        Opcode::PopCatchFrame => Instruction::PopCatchFrame,
        Opcode::GetMember => Instruction::GetMember {
            dest: rd.read_u16()?,
            object: rd.read_u16()?,
            name_id: rd.read_u32()?,
        },
        Opcode::JumpToFinally => Instruction::JumpToFinally,
        Opcode::NewList => Instruction::NewList {
            dest: rd.read_u16()?,
        },
        Opcode::AddToList => Instruction::AddToList {
            list: rd.read_u16()?,
            value: rd.read_u16()?,
        },
        Opcode::NewSet => Instruction::NewSet {
            dest: rd.read_u16()?,
        },
        Opcode::AddToSet => Instruction::AddToSet {
            set: rd.read_u16()?,
            value: rd.read_u16()?,
        },
        Opcode::NewVector => Instruction::NewVector {
            dest: rd.read_u16()?,
        },
        Opcode::PutVector => Instruction::PutVector {
            vector: rd.read_u16()?,
            index: rd.read_u32()?,
            value: rd.read_u16()?,
        },
        Opcode::NewMap => Instruction::NewMap {
            dest: rd.read_u16()?,
        },
        Opcode::PutMap => Instruction::PutMap {
            map: rd.read_u16()?,
            key: rd.read_u16()?,
            value: rd.read_u16()?,
        },
    })
}

fn decode_binop(v: u8) -> Result<BinOpCode, DecodeError> {
    Ok(match v {
        0 => BinOpCode::Add,
        1 => BinOpCode::Subtract,
        2 => BinOpCode::Multiply,
        3 => BinOpCode::Divide,
        4 => BinOpCode::Modulo,
        5 => BinOpCode::Equals,
        6 => BinOpCode::NotEquals,
        7 => BinOpCode::Smaller,
        8 => BinOpCode::SmallerEqual,
        9 => BinOpCode::Bigger,
        10 => BinOpCode::BiggerEqual,
        _ => return Err(DecodeError::Corrupt("unknown binop code")),
    })
}

fn decode_unop(v: u8) -> Result<UnOpCode, DecodeError> {
    Ok(match v {
        0 => UnOpCode::Negate,
        1 => UnOpCode::Not,
        _ => return Err(DecodeError::Corrupt("unknown unop code")),
    })
}

impl Program {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        write_u32(&mut out, VERSION);

        write_u32(&mut out, self.funcs.len() as u32);
        for func in &self.funcs {
            write_u8(&mut out, u8::from(func.is_native));
            if func.is_native {
                write_str(&mut out, func.native_lookup.as_deref().unwrap_or(""));
            }
            write_u16(&mut out, func.arg_count);
            write_u8(&mut out, u8::from(func.last_is_multiarg));
            write_u16(&mut out, func.input_stack_size);
            write_u16(&mut out, func.inner_stack_size);
            write_opt_u32(&mut out, func.associated_class_id);
            write_u16(&mut out, func.kwarg_names.len() as u16);
            for kwarg in &func.kwarg_names {
                write_opt_str(&mut out, kwarg.as_deref());
            }
            write_u16(&mut out, func.capture_source_slots.len() as u16);
            for &slot in &func.capture_source_slots {
                write_u16(&mut out, slot);
            }
            if !func.is_native {
                let mut strings = Vec::new();
                let mut code = Vec::new();
                for instr in &func.code {
                    encode_instr(instr, &mut strings, &mut code);
                }
                write_u32(&mut out, strings.len() as u32);
                for units in &strings {
                    write_u32(&mut out, units.len() as u32);
                    for &unit in units {
                        write_u32(&mut out, unit);
                    }
                }
                write_u32(&mut out, code.len() as u32);
                out.extend_from_slice(&code);
            }
        }

        write_u32(&mut out, self.classes.len() as u32);
        for class in &self.classes {
            write_opt_u32(&mut out, class.base_class_global_id);
            write_u8(&mut out, u8::from(class.has_varinit_func));
            write_u32(&mut out, class.methods.len() as u32);
            for &(name_id, func_id) in &class.methods {
                write_u32(&mut out, name_id);
                write_u32(&mut out, func_id);
            }
            write_u32(&mut out, class.vars.len() as u32);
            for &name_id in &class.vars {
                write_u32(&mut out, name_id);
            }
        }

        write_u32(&mut out, self.globals.len() as u32);
        for global in &self.globals {
            write_u8(&mut out, u8::from(global.is_const));
        }

        encode_symbols(&self.symbols, &mut out);
        write_opt_u32(&mut out, self.main_func_index);
        write_opt_u32(&mut out, self.globalinit_func_index);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut rd = Reader { bytes, idx: 0 };
        if rd.read_exact(4)? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = rd.read_u32()?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let mut program = Program::bare();

        let func_count = rd.read_u32()? as usize;
        for _ in 0..func_count {
            let is_native = rd.read_u8()? != 0;
            let native_lookup = if is_native {
                Some(rd.read_str()?)
            } else {
                None
            };
            let native = match native_lookup.as_deref() {
                Some(lookup) => Some(
                    corelib::native_by_lookup(lookup)
                        .ok_or_else(|| DecodeError::UnknownNative(lookup.to_string()))?,
                ),
                None => None,
            };
            let arg_count = rd.read_u16()?;
            let last_is_multiarg = rd.read_u8()? != 0;
            let input_stack_size = rd.read_u16()?;
            let inner_stack_size = rd.read_u16()?;
            let associated_class_id = rd.read_opt_u32()?;
            let kwarg_count = rd.read_u16()? as usize;
            let mut kwarg_names = Vec::with_capacity(kwarg_count);
            for _ in 0..kwarg_count {
                kwarg_names.push(rd.read_opt_str()?);
            }
            let capture_count = rd.read_u16()? as usize;
            let mut capture_source_slots = Vec::with_capacity(capture_count);
            for _ in 0..capture_count {
                capture_source_slots.push(rd.read_u16()?);
            }
            let code = if is_native {
                Vec::new()
            } else {
                let string_count = rd.read_u32()? as usize;
                let mut strings = Vec::with_capacity(string_count);
                for _ in 0..string_count {
                    let len = rd.read_u32()? as usize;
                    let mut units = Vec::with_capacity(len);
                    for _ in 0..len {
                        units.push(rd.read_u32()?);
                    }
                    strings.push(units);
                }
                let code_bytes = rd.read_u32()? as usize;
                let code_end = rd.idx + code_bytes;
                if code_end > rd.bytes.len() {
                    return Err(DecodeError::UnexpectedEof);
                }
                let mut code = Vec::new();
                while rd.idx < code_end {
                    code.push(decode_instr(&mut rd, &strings)?);
                }
                if rd.idx != code_end {
                    return Err(DecodeError::Corrupt("instruction stream overruns section"));
                }
                code
            };
            program.funcs.push(FuncEntry {
                is_native,
                code,
                native,
                native_lookup,
                arg_count,
                kwarg_names,
                last_is_multiarg,
                input_stack_size,
                inner_stack_size,
                capture_source_slots,
                associated_class_id,
            });
        }

        let class_count = rd.read_u32()? as usize;
        for _ in 0..class_count {
            let base_class_global_id = rd.read_opt_u32()?;
            let has_varinit_func = rd.read_u8()? != 0;
            let method_count = rd.read_u32()? as usize;
            let mut methods = Vec::with_capacity(method_count);
            for _ in 0..method_count {
                let name_id = rd.read_u32()?;
                let func_id = rd.read_u32()?;
                methods.push((name_id, func_id));
            }
            let var_count = rd.read_u32()? as usize;
            let mut vars = Vec::with_capacity(var_count);
            for _ in 0..var_count {
                vars.push(rd.read_u32()?);
            }
            program
                .classes
                .push(ClassEntry::rebuild(base_class_global_id, has_varinit_func, methods, vars));
        }

        let global_count = rd.read_u32()? as usize;
        for _ in 0..global_count {
            program.globals.push(GlobalVarEntry {
                is_const: rd.read_u8()? != 0,
            });
        }

        program.symbols = decode_symbols(&mut rd)?;
        program.special_name_ids = super::SpecialNameIds {
            to_str: special_id(&program.symbols, "to_str")?,
            length: special_id(&program.symbols, "length")?,
            init: special_id(&program.symbols, "init")?,
            destroy: special_id(&program.symbols, "destroy")?,
            clone: special_id(&program.symbols, "clone")?,
            equals: special_id(&program.symbols, "equals")?,
            hash: special_id(&program.symbols, "hash")?,
        };
        program.main_func_index = rd.read_opt_u32()?;
        program.globalinit_func_index = rd.read_opt_u32()?;
        Ok(program)
    }
}

fn special_id(symbols: &DebugSymbols, name: &str) -> Result<u32, DecodeError> {
    symbols
        .member_name_id(name)
        .ok_or(DecodeError::Corrupt("special member name missing from image"))
}

fn encode_symbols(symbols: &DebugSymbols, out: &mut Vec<u8>) {
    write_u32(out, symbols.member_name_count() as u32);
    for id in 0..symbols.member_name_count() as u32 {
        write_str(out, symbols.member_name(id).unwrap_or(""));
    }
    write_u32(out, symbols.file_uris.len() as u32);
    for uri in &symbols.file_uris {
        write_str(out, uri);
    }
    write_u32(out, symbols.module_symbols.len() as u32);
    for module in &symbols.module_symbols {
        write_str(out, &module.module_path);
        write_opt_str(out, module.library_name.as_deref());
        write_u32(out, module.func_symbols.len() as u32);
        for sym in &module.func_symbols {
            write_opt_str(out, sym.name.as_deref());
            write_u32(out, sym.global_id);
            write_opt_u32(out, sym.fileuri_index);
            write_u16(out, sym.arg_count);
            write_u8(out, u8::from(sym.has_self_arg));
            write_u8(out, u8::from(sym.last_arg_is_multiarg));
        }
        write_u32(out, module.class_symbols.len() as u32);
        for sym in &module.class_symbols {
            write_str(out, &sym.name);
            write_u32(out, sym.global_id);
            write_opt_u32(out, sym.fileuri_index);
        }
        write_u32(out, module.globalvar_symbols.len() as u32);
        for sym in &module.globalvar_symbols {
            write_str(out, &sym.name);
            write_u32(out, sym.global_id);
            write_opt_u32(out, sym.fileuri_index);
            write_u8(out, u8::from(sym.is_const));
        }
    }
    write_opt_str(out, symbols.main_module_path.as_deref());
    write_opt_u32(out, symbols.main_fileuri_index);
}

fn decode_symbols(rd: &mut Reader<'_>) -> Result<DebugSymbols, DecodeError> {
    let mut symbols = DebugSymbols::new();
    let member_count = rd.read_u32()? as usize;
    for _ in 0..member_count {
        let name = rd.read_str()?;
        symbols.intern_member_name(&name);
    }
    let uri_count = rd.read_u32()? as usize;
    for _ in 0..uri_count {
        let uri = rd.read_str()?;
        symbols.intern_file_uri(&uri);
    }
    let module_count = rd.read_u32()? as usize;
    for _ in 0..module_count {
        let module_path = rd.read_str()?;
        let library_name = rd.read_opt_str()?;
        let module_idx = if module_path.is_empty() {
            super::symbols::BUILTIN_MODULE_INDEX
        } else {
            symbols.module_index(Some(&module_path), library_name.as_deref())
        };
        let func_count = rd.read_u32()? as usize;
        for _ in 0..func_count {
            let name = rd.read_opt_str()?;
            let global_id = rd.read_u32()?;
            let fileuri_index = rd.read_opt_u32()?;
            let arg_count = rd.read_u16()?;
            let has_self_arg = rd.read_u8()? != 0;
            let last_arg_is_multiarg = rd.read_u8()? != 0;
            let module = &mut symbols.module_symbols[module_idx];
            let entry_idx = module.func_symbols.len() as u32;
            if let Some(name) = name.as_deref() {
                if !has_self_arg {
                    module.func_name_to_entry.insert(name.to_string(), entry_idx);
                }
            }
            module.func_symbols.push(FuncSymbol {
                name,
                global_id,
                fileuri_index,
                arg_count,
                has_self_arg,
                last_arg_is_multiarg,
            });
            grow_to(&mut symbols.func_id_to_module, global_id as usize);
            symbols.func_id_to_module[global_id as usize] = (module_idx as u32, entry_idx);
        }
        let class_count = rd.read_u32()? as usize;
        for _ in 0..class_count {
            let name = rd.read_str()?;
            let global_id = rd.read_u32()?;
            let fileuri_index = rd.read_opt_u32()?;
            let module = &mut symbols.module_symbols[module_idx];
            let entry_idx = module.class_symbols.len() as u32;
            module.class_name_to_entry.insert(name.clone(), entry_idx);
            module.class_symbols.push(ClassSymbol {
                name,
                global_id,
                fileuri_index,
            });
            grow_to(&mut symbols.class_id_to_module, global_id as usize);
            symbols.class_id_to_module[global_id as usize] = (module_idx as u32, entry_idx);
        }
        let var_count = rd.read_u32()? as usize;
        for _ in 0..var_count {
            let name = rd.read_str()?;
            let global_id = rd.read_u32()?;
            let fileuri_index = rd.read_opt_u32()?;
            let is_const = rd.read_u8()? != 0;
            let module = &mut symbols.module_symbols[module_idx];
            let entry_idx = module.globalvar_symbols.len() as u32;
            module
                .globalvar_name_to_entry
                .insert(name.clone(), entry_idx);
            module.globalvar_symbols.push(GlobalVarSymbol {
                name,
                global_id,
                fileuri_index,
                is_const,
            });
            grow_to(&mut symbols.globalvar_id_to_module, global_id as usize);
            symbols.globalvar_id_to_module[global_id as usize] = (module_idx as u32, entry_idx);
        }
    }
    symbols.main_module_path = rd.read_opt_str()?;
    symbols.main_fileuri_index = rd.read_opt_u32()?;
    Ok(symbols)
}

fn grow_to(table: &mut Vec<(u32, u32)>, index: usize) {
    if table.len() <= index {
        table.resize(index + 1, (0, 0));
    }
}
