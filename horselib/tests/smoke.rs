mod common;

use common::*;
use horselib::ast::{Ast, StorageRef};
use horselib::bytecode::{ConstValue, Instruction};
use horselib::corelib;
use horselib::project::{parse_and_resolve, Environment};
use horselib::unicode::str_to_utf32;
use horselib::vm::{execute_program, TestHost, VmConfig};

/// Front to back: resolve `func main { print("hi") }`, emit the handful of
/// instructions a code generator would, and run it.
#[test]
fn resolved_hello_program_executes_end_to_end() {
    let mut ast = Ast::new("main.h64");
    let scope = ast.new_scope(ast.root_scope);
    let print_ref = ident(&mut ast, "print");
    let hi = lit_str(&mut ast, "hi");
    let print_call = call(&mut ast, print_ref, vec![hi]);
    add_global_func(&mut ast, "main", &[], scope, vec![print_call]);

    let mut imports = MapImportResolver::default();
    imports.asts.insert("main.h64".to_string(), ast);
    let mut program = parse_and_resolve(Environment::new(""), &mut imports, &["main.h64"])
        .expect("resolution succeeds");

    let main_id = program.main_func_index.expect("main extracted");
    // What the (external) emitter would produce for the resolved call: the
    // callee's storage annotation names the builtin print slot.
    program.set_func_code(
        main_id,
        vec![
            Instruction::GetFunc {
                slot: 0,
                func_id: corelib::PRINT_FUNC,
            },
            Instruction::SetConst {
                slot: 1,
                value: ConstValue::Str(str_to_utf32("hi")),
            },
            Instruction::Call {
                return_slot: 2,
                callee_slot: 0,
                arg_count: 1,
            },
            Instruction::SetConst {
                slot: 0,
                value: ConstValue::Int(0),
            },
            Instruction::ReturnValue { slot: 0 },
        ],
        3,
    );

    let mut host = TestHost::default();
    let exit_code = execute_program(&program, &mut host, VmConfig::default());
    assert_eq!(host.output, "hi\n");
    assert_eq!(exit_code, 0);
}

/// The resolved storage annotation is what the emitter keys on: make sure
/// a builtin call site carries the builtin func id it must emit.
#[test]
fn resolution_produces_the_storage_the_emitter_needs() {
    let mut ast = Ast::new("main.h64");
    let scope = ast.new_scope(ast.root_scope);
    let print_ref = ident(&mut ast, "print");
    let hi = lit_str(&mut ast, "hi");
    let print_call = call(&mut ast, print_ref, vec![hi]);
    add_global_func(&mut ast, "main", &[], scope, vec![print_call]);

    let (project, _program) = resolve_single(ast);
    assert!(project.messages.success());
    let ast = &project.asts[0];
    match ast.node(print_ref).storage {
        Some(StorageRef::Builtin(horselib::ast::BuiltinRef::Func(id))) => {
            assert_eq!(id, corelib::PRINT_FUNC);
        }
        other => panic!("expected builtin func storage, got {other:?}"),
    }
}
