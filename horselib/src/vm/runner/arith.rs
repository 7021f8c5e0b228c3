//! `BINOP` / `UNOP` handlers.

use crate::bytecode::{BinOpCode, UnOpCode};
use crate::corelib;
use crate::vm::{ObjectPayload, Value};

use super::{Exec, Fault};

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        _ => None,
    }
}

pub(super) fn bin_op(
    ex: &mut Exec<'_>,
    floor: usize,
    op: BinOpCode,
    dest: u16,
    lhs: u16,
    rhs: u16,
) -> Result<(), Fault> {
    let lhs_abs = ex.abs_slot(floor, lhs)?;
    let rhs_abs = ex.abs_slot(floor, rhs)?;
    let dest_abs = ex.abs_slot(floor, dest)?;
    let a = ex.thread.stack.get(lhs_abs).clone();
    let b = ex.thread.stack.get(rhs_abs).clone();

    let result = match op {
        BinOpCode::Add => match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
            (Value::HeapRef(ia), Value::HeapRef(ib)) => {
                let (sa, sb) = match (
                    &ex.thread.heap.get(*ia).payload,
                    &ex.thread.heap.get(*ib).payload,
                ) {
                    (ObjectPayload::Str(sa), ObjectPayload::Str(sb)) => (sa, sb),
                    _ => {
                        return Err(Fault::type_mismatch(
                            "binop add: operands must be numbers or strings",
                        ))
                    }
                };
                let mut joined = sa.clone();
                joined.extend_from_slice(sb);
                Value::HeapRef(ex.thread.heap.alloc(ObjectPayload::Str(joined)))
            }
            _ => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => Value::Float(x + y),
                _ => {
                    return Err(Fault::type_mismatch(
                        "binop add: operands must be numbers or strings",
                    ))
                }
            },
        },
        BinOpCode::Subtract | BinOpCode::Multiply => match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => match op {
                BinOpCode::Subtract => Value::Int(x.wrapping_sub(*y)),
                _ => Value::Int(x.wrapping_mul(*y)),
            },
            _ => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => match op {
                    BinOpCode::Subtract => Value::Float(x - y),
                    _ => Value::Float(x * y),
                },
                _ => return Err(Fault::type_mismatch("binop: operands must be numbers")),
            },
        },
        BinOpCode::Divide | BinOpCode::Modulo => match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                if *y == 0 {
                    return Err(Fault::Raise {
                        class_id: corelib::DIVISION_BY_ZERO_ERROR_CLASS,
                        message: "division by zero".to_string(),
                    });
                }
                match op {
                    BinOpCode::Divide => Value::Int(x.wrapping_div(*y)),
                    _ => Value::Int(x.wrapping_rem(*y)),
                }
            }
            _ => match (as_f64(&a), as_f64(&b)) {
                (Some(x), Some(y)) => {
                    if y == 0.0 {
                        return Err(Fault::Raise {
                            class_id: corelib::DIVISION_BY_ZERO_ERROR_CLASS,
                            message: "division by zero".to_string(),
                        });
                    }
                    match op {
                        BinOpCode::Divide => Value::Float(x / y),
                        _ => Value::Float(x % y),
                    }
                }
                _ => return Err(Fault::type_mismatch("binop: operands must be numbers")),
            },
        },
        BinOpCode::Equals => Value::Bool(ex.thread.heap.values_equal(&a, &b)),
        BinOpCode::NotEquals => Value::Bool(!ex.thread.heap.values_equal(&a, &b)),
        BinOpCode::Smaller
        | BinOpCode::SmallerEqual
        | BinOpCode::Bigger
        | BinOpCode::BiggerEqual => match (as_f64(&a), as_f64(&b)) {
            (Some(x), Some(y)) => Value::Bool(match op {
                BinOpCode::Smaller => x < y,
                BinOpCode::SmallerEqual => x <= y,
                BinOpCode::Bigger => x > y,
                _ => x >= y,
            }),
            _ => {
                return Err(Fault::type_mismatch(
                    "binop comparison: operands must be numbers",
                ))
            }
        },
    };

    let t = &mut *ex.thread;
    t.stack.put(&mut t.heap, dest_abs, result);
    Ok(())
}

pub(super) fn un_op(
    ex: &mut Exec<'_>,
    floor: usize,
    op: UnOpCode,
    dest: u16,
    operand: u16,
) -> Result<(), Fault> {
    let operand_abs = ex.abs_slot(floor, operand)?;
    let dest_abs = ex.abs_slot(floor, dest)?;
    let value = ex.thread.stack.get(operand_abs).clone();
    let result = match op {
        UnOpCode::Negate => match value {
            Value::Int(v) => Value::Int(v.wrapping_neg()),
            Value::Float(v) => Value::Float(-v),
            _ => return Err(Fault::type_mismatch("unop negate: operand must be a number")),
        },
        UnOpCode::Not => match value {
            Value::Bool(v) => Value::Bool(!v),
            _ => return Err(Fault::type_mismatch("unop not: operand must be a bool")),
        },
    };
    let t = &mut *ex.thread;
    t.stack.put(&mut t.heap, dest_abs, result);
    Ok(())
}
