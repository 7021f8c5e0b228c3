mod common;

use common::*;
use horselib::ast::{Ast, StorageRef};
use horselib::diagnostic::MessageKind;

fn module_with_greet() -> Ast {
    let mut ast = Ast::new("b.h64");
    let scope = ast.new_scope(ast.root_scope);
    let hi = lit_str(&mut ast, "hi");
    let greet_ret = ret(&mut ast, Some(hi));
    add_global_func(&mut ast, "greet", &[], scope, vec![greet_ret]);
    ast
}

/// Entry `a.h64`: `import b  func main { return b.greet() }`.
fn entry_importing_b() -> (Ast, horselib::ast::NodeId) {
    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["b"]);
    let scope = ast.new_scope(ast.root_scope);
    let b_ref = ident(&mut ast, "b");
    let access = member(&mut ast, b_ref, "greet");
    let call_node = call(&mut ast, access, vec![]);
    let ret_stmt = ret(&mut ast, Some(call_node));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);
    (ast, b_ref)
}

#[test]
fn cross_module_reference_copies_the_target_storage() {
    let (entry, b_ref) = entry_importing_b();
    let imports =
        MapImportResolver::default().with_module("b", "b.h64", module_with_greet());
    let (project, program) = resolve_with(entry, imports);
    assert!(project.messages.success(), "{:?}", project.messages.as_slice());

    // The imported AST was materialized and built exactly once.
    let b_idx = project.ast_index_by_uri("b.h64").expect("b loaded");
    assert!(project.asts[b_idx].global_storage_built);
    assert_eq!(project.asts[b_idx].module_path.as_deref(), Some("b"));

    // The reference to `b` carries greet's global func storage.
    let greet_symbol = program
        .symbols
        .find_module("b", None)
        .expect("module symbols")
        .func_symbols
        .iter()
        .find(|s| s.name.as_deref() == Some("greet"))
        .expect("greet registered");
    assert_eq!(
        project.asts[0].node(b_ref).storage,
        Some(StorageRef::GlobalFunc(greet_symbol.global_id))
    );
}

#[test]
fn unknown_module_path_is_reported() {
    // `import b` but the reference says `c.greet()`.
    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["b"]);
    let scope = ast.new_scope(ast.root_scope);
    let b_ref = ident(&mut ast, "b");
    let access = member(&mut ast, b_ref, "greet");
    let call_node = call(&mut ast, access, vec![]);
    let ret_stmt = ret(&mut ast, Some(call_node));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);
    // Break the import by renaming its components after binding.
    if let horselib::ast::NodeKind::Import { components, .. } =
        &mut ast.node_mut(ast.root_nodes[0]).kind
    {
        components[0] = "c".to_string();
    }

    let imports =
        MapImportResolver::default().with_module("c", "b.h64", module_with_greet());
    let (project, _program) = resolve_with(ast, imports);
    assert_eq!(
        project.messages.count_kind(MessageKind::UnknownModulePath),
        1
    );
}

#[test]
fn bare_module_reference_is_reported() {
    // `import b  func main { return b }`
    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["b"]);
    let scope = ast.new_scope(ast.root_scope);
    let b_ref = ident(&mut ast, "b");
    let ret_stmt = ret(&mut ast, Some(b_ref));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);

    let imports =
        MapImportResolver::default().with_module("b", "b.h64", module_with_greet());
    let (project, _program) = resolve_with(ast, imports);
    assert_eq!(
        project.messages.count_kind(MessageKind::BareModuleReference),
        1
    );
}

#[test]
fn missing_item_in_module_is_reported_as_unknown_identifier() {
    // `import b  func main { return b.nope() }`
    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["b"]);
    let scope = ast.new_scope(ast.root_scope);
    let b_ref = ident(&mut ast, "b");
    let access = member(&mut ast, b_ref, "nope");
    let call_node = call(&mut ast, access, vec![]);
    let ret_stmt = ret(&mut ast, Some(call_node));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);

    let imports =
        MapImportResolver::default().with_module("b", "b.h64", module_with_greet());
    let (project, _program) = resolve_with(ast, imports);
    assert_eq!(
        project.messages.count_kind(MessageKind::UnknownIdentifier),
        1
    );
}

#[test]
fn unresolvable_import_is_reported() {
    let (entry, _b_ref) = entry_importing_b();
    let (project, _program) = resolve_with(entry, MapImportResolver::default());
    assert!(project.messages.count_kind(MessageKind::ImportNotFound) >= 1);
}

#[test]
fn dotted_import_paths_match_the_longest_chain() {
    // `import util.text  func main { return util.text.greet() }`
    let mut target = Ast::new("util/text.h64");
    let scope = target.new_scope(target.root_scope);
    let hi = lit_str(&mut target, "hi");
    let greet_ret = ret(&mut target, Some(hi));
    add_global_func(&mut target, "greet", &[], scope, vec![greet_ret]);

    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["util", "text"]);
    let scope = ast.new_scope(ast.root_scope);
    let util_ref = ident(&mut ast, "util");
    let text_access = member(&mut ast, util_ref, "text");
    let greet_access = member(&mut ast, text_access, "greet");
    let call_node = call(&mut ast, greet_access, vec![]);
    let ret_stmt = ret(&mut ast, Some(call_node));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);

    let imports =
        MapImportResolver::default().with_module("util.text", "util/text.h64", target);
    let (project, program) = resolve_with(ast, imports);
    assert!(project.messages.success(), "{:?}", project.messages.as_slice());

    let greet_symbol = program
        .symbols
        .find_module("util.text", None)
        .expect("module symbols")
        .func_symbols
        .iter()
        .find(|s| s.name.as_deref() == Some("greet"))
        .expect("greet registered");
    assert_eq!(
        project.asts[0].node(util_ref).storage,
        Some(StorageRef::GlobalFunc(greet_symbol.global_id))
    );
}

#[test]
fn two_imports_sharing_a_prefix_bind_one_definition() {
    // `import util.text` and `import util.math` both bind `util`.
    let mut text = Ast::new("util/text.h64");
    let scope = text.new_scope(text.root_scope);
    let hi = lit_str(&mut text, "hi");
    let greet_ret = ret(&mut text, Some(hi));
    add_global_func(&mut text, "greet", &[], scope, vec![greet_ret]);

    let mut math = Ast::new("util/math.h64");
    let scope = math.new_scope(math.root_scope);
    let zero = lit_int(&mut math, 0);
    let zero_ret = ret(&mut math, Some(zero));
    add_global_func(&mut math, "zero", &[], scope, vec![zero_ret]);

    let mut ast = Ast::new("a.h64");
    add_import(&mut ast, &["util", "text"]);
    add_import(&mut ast, &["util", "math"]);
    let scope = ast.new_scope(ast.root_scope);
    let util_ref = ident(&mut ast, "util");
    let math_access = member(&mut ast, util_ref, "math");
    let zero_access = member(&mut ast, math_access, "zero");
    let call_node = call(&mut ast, zero_access, vec![]);
    let ret_stmt = ret(&mut ast, Some(call_node));
    add_global_func(&mut ast, "main", &[], scope, vec![ret_stmt]);

    // Both imports share one definition with an additional declaration.
    let root_def = ast
        .query_scope(ast.root_scope, "util", false)
        .expect("util bound");
    assert_eq!(ast.definition(root_def).additional_decls.len(), 1);

    let imports = MapImportResolver::default()
        .with_module("util.text", "util/text.h64", text)
        .with_module("util.math", "util/math.h64", math);
    let (project, program) = resolve_with(ast, imports);
    assert!(project.messages.success(), "{:?}", project.messages.as_slice());

    let zero_symbol = program
        .symbols
        .find_module("util.math", None)
        .expect("module symbols")
        .func_symbols
        .iter()
        .find(|s| s.name.as_deref() == Some("zero"))
        .expect("zero registered");
    assert_eq!(
        project.asts[0].node(util_ref).storage,
        Some(StorageRef::GlobalFunc(zero_symbol.global_id))
    );
}

#[test]
fn module_path_derivation_is_deterministic() {
    use horselib::paths::module_path_from_relative;
    assert_eq!(
        module_path_from_relative("util/text.h64").unwrap(),
        "util.text"
    );
    assert_eq!(
        module_path_from_relative("util/text.h64").unwrap(),
        module_path_from_relative("./util//text.h64").unwrap()
    );
}
