mod common;

use common::*;
use horselib::bytecode::{BinOpCode, ConstValue, Instruction};
use horselib::corelib;
use horselib::unicode::str_to_utf32;
use horselib::vm::{execute_program, RunOutcome, TestHost, Value, VmConfig};

fn str_const(s: &str) -> ConstValue {
    ConstValue::Str(str_to_utf32(s))
}

fn print_str(slot_base: u16, text: &str) -> Vec<Instruction> {
    vec![
        Instruction::GetFunc {
            slot: slot_base,
            func_id: corelib::PRINT_FUNC,
        },
        Instruction::SetConst {
            slot: slot_base + 1,
            value: str_const(text),
        },
        Instruction::Call {
            return_slot: slot_base + 2,
            callee_slot: slot_base,
            arg_count: 1,
        },
    ]
}

fn raise_class(slot_base: u16, class_id: u32) -> Vec<Instruction> {
    vec![
        Instruction::GetFunc {
            slot: slot_base,
            func_id: corelib::RAISE_FUNC,
        },
        Instruction::GetClass {
            slot: slot_base + 1,
            class_id,
        },
        Instruction::Call {
            return_slot: slot_base + 2,
            callee_slot: slot_base,
            arg_count: 1,
        },
    ]
}

#[test]
fn caught_exception_runs_the_handler_and_exits_zero() {
    // do { raise ValueError() } rescue ValueError { print("ok") }
    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 6,
            finally_target: None,
        },
        Instruction::AddCatchType {
            class_id: corelib::VALUE_ERROR_CLASS,
        },
    ];
    code.extend(raise_class(0, corelib::VALUE_ERROR_CLASS)); // 2..=4
    code.push(Instruction::Jump { target: 10 }); // 5 (skipped by the raise)
    code.push(Instruction::PopCatchFrame); // 6: handler
    code.extend(print_str(0, "ok")); // 7..=9
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 10
    code.push(Instruction::ReturnValue { slot: 0 }); // 11
    let program = program_with_main(code, 3);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "ok\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn uncaught_exception_reports_the_class_and_exits_nonzero() {
    let mut code = raise_class(0, corelib::VALUE_ERROR_CLASS);
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    });
    code.push(Instruction::ReturnValue { slot: 0 });
    let program = program_with_main(code, 3);

    let (outcome, _output, _thread) = run_main(&program);
    match outcome {
        RunOutcome::Uncaught(info) => {
            assert_eq!(info.class_id, corelib::VALUE_ERROR_CLASS);
            assert_eq!(program.symbols.class_name(info.class_id), "ValueError");
        }
        other => panic!("expected an uncaught exception, got {other:?}"),
    }

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_ne!(exit_code, 0);
}

#[test]
fn ancestor_classes_catch_derived_exceptions() {
    // DivisionByZeroError inherits RuntimeError; a RuntimeError frame
    // catches the divide fault.
    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 7,
            finally_target: None,
        },
        Instruction::AddCatchType {
            class_id: corelib::RUNTIME_ERROR_CLASS,
        },
        Instruction::SetConst {
            slot: 0,
            value: ConstValue::Int(1),
        },
        Instruction::SetConst {
            slot: 1,
            value: ConstValue::Int(0),
        },
        Instruction::BinOp {
            op: BinOpCode::Divide,
            dest: 2,
            lhs: 0,
            rhs: 1,
        }, // raises DivisionByZeroError
        Instruction::PopCatchFrame, // 5 (not reached)
        Instruction::Jump { target: 11 }, // 6 (not reached)
        Instruction::PopCatchFrame, // 7: handler
    ];
    code.extend(print_str(0, "caught")); // 8..=10
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 11
    code.push(Instruction::ReturnValue { slot: 0 }); // 12
    let program = program_with_main(code, 3);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "caught\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn innermost_matching_frame_wins() {
    // Outer frame catches BaseError, inner frame catches ValueError; the
    // raise lands in the inner handler.
    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 13,
            finally_target: None,
        },
        Instruction::AddCatchType {
            class_id: corelib::BASE_ERROR_CLASS,
        },
        Instruction::PushCatchFrame {
            handler_target: 8,
            finally_target: None,
        },
        Instruction::AddCatchType {
            class_id: corelib::VALUE_ERROR_CLASS,
        },
    ];
    code.extend(raise_class(0, corelib::VALUE_ERROR_CLASS)); // 4..=6
    code.push(Instruction::Jump { target: 17 }); // 7 (not reached)
    code.push(Instruction::PopCatchFrame); // 8: inner handler
    code.extend(print_str(0, "inner")); // 9..=11
    code.push(Instruction::Jump { target: 17 }); // 12
    code.push(Instruction::PopCatchFrame); // 13: outer handler (not reached)
    code.extend(print_str(0, "outer")); // 14..=16
    code.push(Instruction::PopCatchFrame); // 17: drop the outer frame
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 18
    code.push(Instruction::ReturnValue { slot: 0 }); // 19
    let program = program_with_main(code, 3);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "inner\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn addcatchtypebyref_reads_the_class_from_a_slot() {
    let mut code = vec![
        Instruction::GetClass {
            slot: 3,
            class_id: corelib::VALUE_ERROR_CLASS,
        },
        Instruction::PushCatchFrame {
            handler_target: 8,
            finally_target: None,
        },
        Instruction::AddCatchTypeByRef { slot: 3 },
    ];
    code.extend(raise_class(0, corelib::VALUE_ERROR_CLASS)); // 3..=5
    code.push(Instruction::PopCatchFrame); // 6 (not reached)
    code.push(Instruction::Jump { target: 12 }); // 7
    code.push(Instruction::PopCatchFrame); // 8: handler
    code.extend(print_str(0, "byref")); // 9..=11
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 12
    code.push(Instruction::ReturnValue { slot: 0 }); // 13
    let program = program_with_main(code, 4);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "byref\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn exceptions_unwind_through_call_frames() {
    // main opens a catch frame, then calls a function that raises.
    let mut program = program_with_main(Vec::new(), 0);
    let mut thrower_code = raise_class(0, corelib::VALUE_ERROR_CLASS);
    thrower_code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::None,
    });
    thrower_code.push(Instruction::ReturnValue { slot: 0 });
    let thrower = add_func(&mut program, "thrower", 0, thrower_code, 3);

    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 6,
            finally_target: None,
        },
        Instruction::AddCatchType {
            class_id: corelib::VALUE_ERROR_CLASS,
        },
        Instruction::GetFunc {
            slot: 0,
            func_id: thrower,
        },
        Instruction::Call {
            return_slot: 1,
            callee_slot: 0,
            arg_count: 0,
        },
        Instruction::PopCatchFrame, // 4 (not reached)
        Instruction::Jump { target: 10 }, // 5
        Instruction::PopCatchFrame, // 6: handler
    ];
    code.extend(print_str(0, "unwound")); // 7..=9
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 10
    code.push(Instruction::ReturnValue { slot: 0 }); // 11
    let main = program.main_func_index.expect("main set");
    program.set_func_code(main, code, 3);

    let (outcome, output, thread) = run_main(&program);
    assert!(matches!(outcome, RunOutcome::Returned(Value::Int(0))));
    assert_eq!(output, "unwound\n");
    assert_eq!(thread.heap.live_count(), 0);
}

#[test]
fn finally_runs_before_the_exception_keeps_unwinding() {
    // An inner frame with only a finally block: the raise enters the
    // finally, then POPCATCHFRAME re-raises into the outer handler.
    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 13,
            finally_target: None,
        }, // 0: outer
        Instruction::AddCatchType {
            class_id: corelib::VALUE_ERROR_CLASS,
        }, // 1
        Instruction::PushCatchFrame {
            handler_target: 0,
            finally_target: Some(8),
        }, // 2: inner, finally only
    ];
    code.extend(raise_class(0, corelib::VALUE_ERROR_CLASS)); // 3..=5
    code.push(Instruction::JumpToFinally); // 6 (normal path, not reached)
    code.push(Instruction::Jump { target: 17 }); // 7 (not reached)
    code.extend(print_str(0, "finally")); // 8..=10: finally body
    code.push(Instruction::PopCatchFrame); // 11: re-raises the pending exception
    code.push(Instruction::Jump { target: 17 }); // 12 (not reached)
    code.push(Instruction::PopCatchFrame); // 13: outer handler
    code.extend(print_str(0, "handled")); // 14..=16
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 17
    code.push(Instruction::ReturnValue { slot: 0 }); // 18
    let program = program_with_main(code, 3);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "finally\nhandled\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn jumptofinally_on_the_normal_path_keeps_no_pending_exception() {
    let mut code = vec![
        Instruction::PushCatchFrame {
            handler_target: 0,
            finally_target: Some(3),
        },
        Instruction::JumpToFinally, // 1
        Instruction::Jump { target: 7 }, // 2 (not reached)
    ];
    code.extend(print_str(0, "cleanup")); // 3..=5
    code.push(Instruction::PopCatchFrame); // 6: nothing pending, continues
    code.push(Instruction::SetConst {
        slot: 0,
        value: ConstValue::Int(0),
    }); // 7
    code.push(Instruction::ReturnValue { slot: 0 }); // 8
    let program = program_with_main(code, 3);

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "cleanup\n");
    assert_eq!(exit_code, 0);
}

#[test]
fn raising_an_exception_instance_uses_its_class() {
    // ValueError() constructs an exception object; raise consumes it.
    let mut code = vec![
        Instruction::GetClass {
            slot: 1,
            class_id: corelib::VALUE_ERROR_CLASS,
        },
        Instruction::Call {
            return_slot: 0,
            callee_slot: 1,
            arg_count: 0,
        }, // slot 0 = exception instance
        Instruction::GetFunc {
            slot: 1,
            func_id: corelib::RAISE_FUNC,
        },
        Instruction::ValueCopy { dest: 2, src: 0 },
        Instruction::Call {
            return_slot: 3,
            callee_slot: 1,
            arg_count: 1,
        },
    ];
    code.push(Instruction::ReturnValue { slot: 0 }); // not reached
    let program = program_with_main(code, 4);

    let (outcome, _output, thread) = run_main(&program);
    match outcome {
        RunOutcome::Uncaught(info) => {
            assert_eq!(info.class_id, corelib::VALUE_ERROR_CLASS);
        }
        other => panic!("expected an uncaught exception, got {other:?}"),
    }
    assert_eq!(thread.heap.live_count(), 0);
}
