mod common;

use common::*;
use horselib::bytecode::{
    BinOpCode, ConstValue, DecodeError, Instruction, Opcode, Program, UnOpCode,
};
use horselib::unicode::str_to_utf32;

fn every_instruction_once() -> Vec<Instruction> {
    vec![
        Instruction::SetConst {
            slot: 0,
            value: ConstValue::Str(str_to_utf32("const")),
        },
        Instruction::SetConst {
            slot: 1,
            value: ConstValue::Float(2.5),
        },
        Instruction::SetGlobal {
            global_id: 0,
            slot: 0,
        },
        Instruction::GetGlobal {
            slot: 0,
            global_id: 0,
        },
        Instruction::GetFunc { slot: 0, func_id: 0 },
        Instruction::GetClass {
            slot: 0,
            class_id: 0,
        },
        Instruction::ValueCopy { dest: 1, src: 0 },
        Instruction::BinOp {
            op: BinOpCode::SmallerEqual,
            dest: 2,
            lhs: 0,
            rhs: 1,
        },
        Instruction::UnOp {
            op: UnOpCode::Not,
            dest: 2,
            operand: 2,
        },
        Instruction::Call {
            return_slot: 0,
            callee_slot: 1,
            arg_count: 2,
        },
        Instruction::SetTop { top: 4 },
        Instruction::JumpTarget { id: 9 },
        Instruction::CondJump { slot: 2, target: 0 },
        Instruction::Jump { target: 0 },
        Instruction::NewIterator { dest: 1, source: 0 },
        Instruction::Iterate {
            dest: 2,
            iterator: 1,
            end_target: 0,
        },
        Instruction::PushCatchFrame {
            handler_target: 1,
            finally_target: Some(2),
        },
        Instruction::PushCatchFrame {
            handler_target: 1,
            finally_target: None,
        },
        Instruction::AddCatchType { class_id: 0 },
        Instruction::AddCatchTypeByRef { slot: 0 },
        Instruction::PopCatchFrame,
        Instruction::GetMember {
            dest: 0,
            object: 1,
            name_id: 0,
        },
        Instruction::JumpToFinally,
        Instruction::NewList { dest: 0 },
        Instruction::AddToList { list: 0, value: 1 },
        Instruction::NewSet { dest: 0 },
        Instruction::AddToSet { set: 0, value: 1 },
        Instruction::NewVector { dest: 0 },
        Instruction::PutVector {
            vector: 0,
            index: 3,
            value: 1,
        },
        Instruction::NewMap { dest: 0 },
        Instruction::PutMap {
            map: 0,
            key: 1,
            value: 2,
        },
        Instruction::ReturnValue { slot: 0 },
    ]
}

#[test]
fn program_image_round_trips_exactly() {
    let mut program = program_with_main(every_instruction_once(), 5);
    program
        .add_global_var("g", true, Some("main.h64"), Some("main"), None)
        .expect("global");
    let class = program
        .add_class("Thing", Some("main.h64"), Some("main"), None)
        .expect("class");
    program.set_class_base(class, horselib::corelib::BASE_ERROR_CLASS);
    program
        .register_class_member(class, "weight", None)
        .expect("member");
    program
        .register_function(
            Some("poke"),
            Some("main.h64"),
            1,
            vec![Some("amount".to_string())],
            false,
            Some("main"),
            None,
            Some(class),
        )
        .expect("method");
    let capturing = program
        .register_function(
            Some("grabber"),
            Some("main.h64"),
            0,
            Vec::new(),
            false,
            Some("main"),
            None,
            None,
        )
        .expect("capturing func");
    program.set_func_capture_sources(capturing, vec![2, 5]);

    let bytes = program.to_bytes();
    let decoded = Program::from_bytes(&bytes).expect("decode");

    assert_eq!(decoded.funcs.len(), program.funcs.len());
    for (a, b) in program.funcs.iter().zip(&decoded.funcs) {
        assert_eq!(a.is_native, b.is_native);
        assert_eq!(a.code, b.code);
        assert_eq!(a.arg_count, b.arg_count);
        assert_eq!(a.kwarg_names, b.kwarg_names);
        assert_eq!(a.input_stack_size, b.input_stack_size);
        assert_eq!(a.inner_stack_size, b.inner_stack_size);
        assert_eq!(a.capture_source_slots, b.capture_source_slots);
        assert_eq!(a.associated_class_id, b.associated_class_id);
        assert_eq!(a.native_lookup, b.native_lookup);
    }

    assert_eq!(decoded.classes.len(), program.classes.len());
    for (a, b) in program.classes.iter().zip(&decoded.classes) {
        assert_eq!(a.base_class_global_id, b.base_class_global_id);
        assert_eq!(a.methods, b.methods);
        assert_eq!(a.vars, b.vars);
        assert_eq!(a.has_varinit_func, b.has_varinit_func);
    }

    assert_eq!(decoded.main_func_index, program.main_func_index);
    assert_eq!(decoded.globalinit_func_index, program.globalinit_func_index);
    assert_eq!(decoded.special_name_ids, program.special_name_ids);
    assert_eq!(
        decoded.symbols.member_name_count(),
        program.symbols.member_name_count()
    );

    // The rebuilt bucket tables answer the same lookups.
    let weight_id = decoded.symbols.member_name_id("weight").expect("interned");
    assert_eq!(
        decoded.lookup_class_member(class, weight_id),
        program.lookup_class_member(class, weight_id)
    );

    // Symbol name maps survived: find the class by name again.
    let module = decoded.symbols.find_module("main", None).expect("module");
    assert!(module.class_name_to_entry.contains_key("Thing"));
}

#[test]
fn decoded_image_still_executes() {
    let program = program_with_main(
        vec![
            Instruction::SetConst {
                slot: 0,
                value: ConstValue::Int(41),
            },
            Instruction::SetConst {
                slot: 1,
                value: ConstValue::Int(1),
            },
            Instruction::BinOp {
                op: BinOpCode::Add,
                dest: 2,
                lhs: 0,
                rhs: 1,
            },
            Instruction::ReturnValue { slot: 2 },
        ],
        3,
    );
    let decoded = Program::from_bytes(&program.to_bytes()).expect("decode");
    let (outcome, _output, _thread) = run_main(&decoded);
    match outcome {
        horselib::vm::RunOutcome::Returned(horselib::vm::Value::Int(v)) => assert_eq!(v, 42),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn bad_magic_is_rejected() {
    assert!(matches!(
        Program::from_bytes(b"NOPE....."),
        Err(DecodeError::BadMagic)
    ));
}

#[test]
fn truncated_images_are_rejected() {
    let program = program_with_main(every_instruction_once(), 5);
    let bytes = program.to_bytes();
    let truncated = &bytes[..bytes.len() / 2];
    assert!(Program::from_bytes(truncated).is_err());
}

#[test]
fn record_sizes_are_determined_by_the_opcode() {
    // Decoding knows each record's size from its first byte alone; the
    // no-operand records are 1 byte, the largest fixed record is SETCONST.
    assert_eq!(Opcode::PopCatchFrame.record_size(), 1);
    assert_eq!(Opcode::JumpToFinally.record_size(), 1);
    assert_eq!(Opcode::SetConst.record_size(), 12);
    for instr in every_instruction_once() {
        assert!(instr.opcode().record_size() >= 1);
    }
}
