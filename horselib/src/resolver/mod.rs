//! Scope resolution: global-storage assignment and identifier binding.
//!
//! Runs per AST in two latched passes. The first pass registers every
//! globally visible declaration in the program tables and annotates the
//! declaring expressions with their storage; the second binds every
//! identifier reference to a definition, a builtin, or an imported module
//! item, detecting closure captures along the way.

mod varstorage;

use std::collections::HashSet;

use crate::ast::{Ast, BinOpKind, BuiltinRef, NodeId, NodeKind, StorageRef};
use crate::bytecode::{Program, RegisterError};
use crate::diagnostic::MessageKind;
use crate::paths;
use crate::project::{ImportResolver, Project};
use crate::scope::DefRef;

/// Longest dotted access chain the resolver follows when matching a
/// reference against import statements. A configured limit, not a language
/// rule.
pub const IMPORT_CHAIN_MAX: usize = 16;

fn report(ast: &mut Ast, kind: MessageKind, message: String, node: Option<NodeId>) {
    let uri = ast.file_uri.clone();
    let (line, column) = match node {
        Some(id) => {
            let n = ast.node(id);
            (Some(n.line), Some(n.column))
        }
        None => (None, None),
    };
    ast.messages.error(kind, message, uri, line, column);
}

/// Resolves one AST and its whole import closure against `program`.
/// `extract_main` marks this AST as a program entry file.
pub fn resolve_ast(
    project: &mut Project,
    program: &mut Program,
    import_resolver: &mut dyn ImportResolver,
    ast_idx: usize,
    extract_main: bool,
) {
    resolve_entries(project, program, import_resolver, &[ast_idx], extract_main);
}

/// Resolves a set of entry ASTs (a whole source tree) and their import
/// closures. Exactly one `main` must exist across the entries when
/// `extract_main` is set.
pub fn resolve_entries(
    project: &mut Project,
    program: &mut Program,
    import_resolver: &mut dyn ImportResolver,
    entry_indexes: &[usize],
    extract_main: bool,
) {
    // The storage pass runs once per AST (latched), so whether an AST
    // extracts `main` must not depend on whether the entry loop or another
    // entry's import recursion reaches it first.
    let entry_set: HashSet<usize> = if extract_main {
        entry_indexes.iter().copied().collect()
    } else {
        HashSet::new()
    };
    for &idx in entry_indexes {
        build_storage(project, program, import_resolver, idx, &entry_set);
    }

    let storage_ok = project.asts.iter().all(|ast| ast.messages.success());
    if storage_ok {
        if extract_main && program.main_func_index.is_none() {
            let first = entry_indexes.first().copied().unwrap_or(0);
            let ast = &mut project.asts[first];
            report(
                ast,
                MessageKind::UnknownIdentifier,
                "no \"main\" func found to use as the program start".to_string(),
                None,
            );
        } else {
            for idx in 0..project.asts.len() {
                resolve_identifiers(project, program, idx);
            }
            let resolved_ok = project.asts.iter().all(|ast| ast.messages.success());
            if resolved_ok {
                for idx in 0..project.asts.len() {
                    wire_class_bases(&mut project.asts[idx], program);
                    varstorage::assign_local_storage(&mut project.asts[idx], program);
                }
            }
        }
    }

    for idx in 0..project.asts.len() {
        let mut messages = std::mem::take(&mut project.asts[idx].messages);
        let failed = !messages.success();
        messages.transfer_messages(&mut project.messages);
        project.asts[idx].messages = messages;
        if failed {
            project.asts[idx].messages.mark_failed();
        }
    }
}

/// Pass one for a single AST: derive the module path, preload imports, and
/// assign global storage for every declaration, recursing over the import
/// closure.
pub fn build_global_storage(
    project: &mut Project,
    program: &mut Program,
    import_resolver: &mut dyn ImportResolver,
    ast_idx: usize,
    extract_main: bool,
) {
    let entry_set: HashSet<usize> = if extract_main {
        std::iter::once(ast_idx).collect()
    } else {
        HashSet::new()
    };
    build_storage(project, program, import_resolver, ast_idx, &entry_set);
}

/// Pass one worker. `entry_set` names every entry AST of the compilation:
/// an AST extracts `main` exactly when it is in the set, no matter whether
/// the entry loop or an import edge reaches it first (the
/// `global_storage_built` latch makes the first visit the only one).
fn build_storage(
    project: &mut Project,
    program: &mut Program,
    import_resolver: &mut dyn ImportResolver,
    ast_idx: usize,
    entry_set: &HashSet<usize>,
) {
    if project.asts[ast_idx].global_storage_built {
        return;
    }
    let extract_main = entry_set.contains(&ast_idx);
    let mut ast = project.take_ast(ast_idx);
    // Latched even when the pass fails below.
    ast.global_storage_built = true;

    if project.environment.stage_debug {
        eprintln!(
            "horsec: debug: build_global_storage start on {}",
            ast.file_uri
        );
    }

    derive_module_path(project, &mut ast);
    preload_imports(project, import_resolver, &mut ast);

    let order = {
        let mut order = Vec::with_capacity(ast.node_count());
        ast.visit_post(|id| order.push(id));
        order
    };
    for node_id in order {
        global_storage_visit(&mut ast, program, node_id, extract_main);
    }

    // Imports of this file, resolved to their cached AST slots.
    let mut imported: Vec<usize> = Vec::new();
    for node_id in ast.node_ids() {
        if let NodeKind::Import {
            referenced_file_uri: Some(uri),
            ..
        } = &ast.node(node_id).kind
        {
            if let Some(idx) = project.ast_index_by_uri(uri) {
                if idx != ast_idx && !imported.contains(&idx) {
                    imported.push(idx);
                }
            }
        }
    }
    project.put_back_ast(ast_idx, ast);

    for idx in imported {
        build_storage(project, program, import_resolver, idx, entry_set);
    }

    if project.environment.stage_debug {
        eprintln!(
            "horsec: debug: build_global_storage completed on {}",
            project.asts[ast_idx].file_uri
        );
    }
}

/// Computes the dotted module path from the file URI relative to the
/// project root, when the parser did not already supply one.
fn derive_module_path(project: &Project, ast: &mut Ast) {
    if ast.module_path.is_some() {
        return;
    }
    let Some(rel) = paths::relative_to_root(&project.environment.project_root, &ast.file_uri)
    else {
        let uri = ast.file_uri.clone();
        report(
            ast,
            MessageKind::FileNotInProject,
            format!(
                "file {uri} is not under the project root {}",
                project.environment.project_root
            ),
            None,
        );
        return;
    };
    match paths::module_path_from_relative(&rel) {
        Ok(module_path) => {
            ast.module_path = Some(module_path);
        }
        Err(paths::ModulePathError::HasDots(bad)) => {
            report(
                ast,
                MessageKind::ModulePathHasDots,
                format!("cannot integrate module with dots in file path: {bad}"),
                None,
            );
        }
        Err(paths::ModulePathError::NotInProject(bad)) => {
            report(
                ast,
                MessageKind::FileNotInProject,
                format!("failed to locate this file path inside the project: {bad}"),
                None,
            );
        }
    }
}

/// Materializes every imported AST through the external resolver, caching
/// by file URI.
fn preload_imports(
    project: &mut Project,
    import_resolver: &mut dyn ImportResolver,
    ast: &mut Ast,
) {
    let import_nodes: Vec<NodeId> = ast
        .node_ids()
        .filter(|&id| matches!(ast.node(id).kind, NodeKind::Import { .. }))
        .collect();
    for node_id in import_nodes {
        let (components, library) = match &ast.node(node_id).kind {
            NodeKind::Import {
                components,
                library,
                referenced_file_uri,
            } => {
                if referenced_file_uri.is_some() {
                    continue;
                }
                (components.clone(), library.clone())
            }
            _ => unreachable!("filtered above"),
        };
        let file_uri = match import_resolver.resolve_import(
            &ast.file_uri,
            &components,
            library.as_deref(),
        ) {
            Ok(uri) => uri,
            Err(_) => {
                report(
                    ast,
                    MessageKind::ImportNotFound,
                    format!(
                        "couldn't resolve import, module \"{}\" not found",
                        components.join(".")
                    ),
                    Some(node_id),
                );
                continue;
            }
        };
        match project.get_ast(import_resolver, &file_uri) {
            Ok(_) => {
                if let NodeKind::Import {
                    referenced_file_uri, ..
                } = &mut ast.node_mut(node_id).kind
                {
                    *referenced_file_uri = Some(paths::normalize(&file_uri));
                }
            }
            Err(message) => {
                report(
                    ast,
                    MessageKind::ImportNotFound,
                    format!("failed to process import: {message}"),
                    Some(node_id),
                );
            }
        }
    }
}

fn register_error_kind(err: RegisterError) -> MessageKind {
    match err {
        RegisterError::DuplicateSymbol => MessageKind::DuplicateSymbol,
        RegisterError::DuplicateClassMember => MessageKind::DuplicateClassMember,
        RegisterError::TooManyMethods => MessageKind::TooManyMethods,
    }
}

/// Storage assignment for one visited node (post-order callback of pass
/// one). Also interns call-site keyword-argument names.
fn global_storage_visit(ast: &mut Ast, program: &mut Program, node_id: NodeId, extract_main: bool) {
    if let NodeKind::Call { args, .. } = &ast.node(node_id).kind {
        let kwarg_names: Vec<String> = args
            .iter()
            .filter_map(|a| a.name.clone())
            .collect();
        for name in kwarg_names {
            program.symbols.intern_member_name(&name);
        }
    }

    match &ast.node(node_id).kind {
        NodeKind::VarDef { .. }
        | NodeKind::ClassDef { .. }
        | NodeKind::FuncDef(_) => {}
        _ => return,
    }
    let Some(scope) = ast.containing_scope(node_id) else {
        report(
            ast,
            MessageKind::MalformedAst,
            "internal error: failed to obtain scope, malformed AST?".to_string(),
            Some(node_id),
        );
        return;
    };
    let is_global = ast.scope(scope).is_global;
    let needs_storage = ast.node(node_id).storage.is_none()
        && match &ast.node(node_id).kind {
            NodeKind::ClassDef { .. } => true,
            NodeKind::FuncDef(f) => f.func_id.is_none(),
            // Class member variables register through their owning class
            // even though the class body scope is not global.
            NodeKind::VarDef { .. } => is_global || ast.owning_class(node_id).is_some(),
            _ => false,
        };
    if !needs_storage {
        return;
    }
    compute_item_storage(ast, program, node_id, extract_main);
}

/// Assigns program-table storage for one declaration, recursing into the
/// owning class first where needed.
fn compute_item_storage(ast: &mut Ast, program: &mut Program, node_id: NodeId, extract_main: bool) {
    if ast.node(node_id).storage.is_some() {
        return;
    }
    let Some(scope) = ast.containing_scope(node_id) else {
        return;
    };
    let is_global = ast.scope(scope).is_global;
    let module_path = ast.module_path.clone();
    let library_name = ast.library_name.clone();
    let file_uri = ast.file_uri.clone();

    match &ast.node(node_id).kind {
        NodeKind::VarDef { name, is_const, .. } if is_global => {
            let (name, is_const) = (name.clone(), *is_const);
            match program.add_global_var(
                &name,
                is_const,
                Some(&file_uri),
                module_path.as_deref(),
                library_name.as_deref(),
            ) {
                Ok(global_id) => {
                    ast.node_mut(node_id).storage = Some(StorageRef::GlobalVar(global_id));
                }
                Err(err) => {
                    report(
                        ast,
                        register_error_kind(err),
                        format!("cannot declare global var \"{name}\": {err}"),
                        Some(node_id),
                    );
                }
            }
        }
        NodeKind::ClassDef { name, .. } => {
            let name = name.clone();
            match program.add_class(
                &name,
                Some(&file_uri),
                module_path.as_deref(),
                library_name.as_deref(),
            ) {
                Ok(class_id) => {
                    ast.node_mut(node_id).storage = Some(StorageRef::GlobalClass(class_id));
                }
                Err(err) => {
                    report(
                        ast,
                        register_error_kind(err),
                        format!("cannot declare class \"{name}\": {err}"),
                        Some(node_id),
                    );
                }
            }
        }
        NodeKind::VarDef { name, .. } => {
            // A var directly inside a class body is a member variable; a
            // function boundary in between makes it an ordinary local.
            let name = name.clone();
            let Some(owning_class) = ast.owning_class(node_id) else {
                return;
            };
            if ast.node(owning_class).storage.is_none() {
                compute_item_storage(ast, program, owning_class, extract_main);
            }
            let Some(StorageRef::GlobalClass(class_id)) = ast.node(owning_class).storage
            else {
                return;
            };
            if let Err(err) = program.register_class_member(class_id, &name, None) {
                report(
                    ast,
                    register_error_kind(err),
                    format!("cannot declare class member \"{name}\": {err}"),
                    Some(node_id),
                );
                return;
            }
            if !ast.is_none_var_def(node_id)
                && !program.classes[class_id as usize].has_varinit_func
            {
                match program.register_function(
                    Some("$$varinit"),
                    Some(&file_uri),
                    0,
                    Vec::new(),
                    false,
                    module_path.as_deref(),
                    library_name.as_deref(),
                    Some(class_id),
                ) {
                    Ok(_) => {
                        program.classes[class_id as usize].has_varinit_func = true;
                    }
                    Err(err) => {
                        report(
                            ast,
                            register_error_kind(err),
                            format!("cannot register $$varinit: {err}"),
                            Some(node_id),
                        );
                    }
                }
            }
        }
        NodeKind::FuncDef(func) => {
            let name = func.name.clone();
            let arg_count = func.params.len() as u16;
            let kwarg_names: Vec<Option<String>> = func
                .params
                .iter()
                .map(|p| p.has_default.then(|| p.name.clone()))
                .collect();
            let last_is_multiarg = func.last_is_multiarg;

            let owning_class = ast.owning_class(node_id);
            let class_id = match owning_class {
                Some(class_node) => {
                    if ast.node(class_node).storage.is_none() {
                        compute_item_storage(ast, program, class_node, extract_main);
                    }
                    match ast.node(class_node).storage {
                        Some(StorageRef::GlobalClass(id)) => Some(id),
                        _ => return,
                    }
                }
                None => None,
            };

            match program.register_function(
                name.as_deref(),
                Some(&file_uri),
                arg_count,
                kwarg_names,
                last_is_multiarg,
                module_path.as_deref(),
                library_name.as_deref(),
                class_id,
            ) {
                Ok(func_id) => {
                    if let Some(func) = ast.func_def_mut(node_id) {
                        func.func_id = Some(func_id);
                    }
                    if is_global {
                        ast.node_mut(node_id).storage = Some(StorageRef::GlobalFunc(func_id));
                        if extract_main && name.as_deref() == Some("main") {
                            extract_main_func(ast, program, node_id, func_id, &file_uri);
                        }
                    }
                }
                Err(err) => {
                    let label = name.as_deref().unwrap_or("<inline>");
                    report(
                        ast,
                        register_error_kind(err),
                        format!("cannot declare func \"{label}\": {err}"),
                        Some(node_id),
                    );
                }
            }
        }
        _ => {}
    }
}

fn extract_main_func(
    ast: &mut Ast,
    program: &mut Program,
    node_id: NodeId,
    func_id: u32,
    file_uri: &str,
) {
    if program.main_func_index.is_some() {
        report(
            ast,
            MessageKind::DuplicateMain,
            "unexpected duplicate main func found".to_string(),
            Some(node_id),
        );
        return;
    }
    program.main_func_index = Some(func_id);
    program.symbols.main_module_path = ast.module_path.clone();
    program.symbols.main_fileuri_index = Some(program.intern_file_uri(file_uri));
}

/// Copies resolved base-class references into the program tables: a class
/// whose `base` expression resolved to a class slot records that slot as
/// its base.
fn wire_class_bases(ast: &mut Ast, program: &mut Program) {
    for node_id in ast.node_ids() {
        let NodeKind::ClassDef {
            base: Some(base_ref),
            ..
        } = ast.node(node_id).kind
        else {
            continue;
        };
        let Some(StorageRef::GlobalClass(class_id)) = ast.node(node_id).storage else {
            continue;
        };
        let base_id = match ast.node(base_ref).storage {
            Some(StorageRef::GlobalClass(id)) => Some(id),
            Some(StorageRef::Builtin(BuiltinRef::Class(id))) => Some(id),
            _ => None,
        };
        let Some(base_id) = base_id else {
            report(
                ast,
                MessageKind::MalformedAst,
                "class base expression does not name a class".to_string(),
                Some(base_ref),
            );
            continue;
        };
        program.set_class_base(class_id, base_id);
    }
}

/// Pass two: bind every identifier reference.
fn resolve_identifiers(project: &mut Project, program: &mut Program, ast_idx: usize) {
    if project.asts[ast_idx].identifiers_resolved {
        return;
    }
    let mut ast = project.take_ast(ast_idx);
    // Latched even when the pass fails below.
    ast.identifiers_resolved = true;

    if project.environment.stage_debug {
        eprintln!(
            "horsec: debug: resolve_identifiers start on {}",
            ast.file_uri
        );
    }

    let order = {
        let mut order = Vec::with_capacity(ast.node_count());
        ast.visit_post(|id| order.push(id));
        order
    };
    for node_id in order {
        if matches!(ast.node(node_id).kind, NodeKind::IdentifierRef { .. }) {
            resolve_identifier_ref(project, program, &mut ast, ast_idx, node_id);
        }
    }

    project.put_back_ast(ast_idx, ast);
}

/// True when `binop` is a member-by-identifier operation with `child` on
/// its left and a plain identifier on its right.
fn is_member_chain_link(ast: &Ast, binop: NodeId, child: NodeId) -> bool {
    match &ast.node(binop).kind {
        NodeKind::BinaryOp {
            op: BinOpKind::MemberByIdentifier,
            lhs,
            rhs,
        } => *lhs == child && matches!(ast.node(*rhs).kind, NodeKind::IdentifierRef { .. }),
        _ => false,
    }
}

fn member_rhs_name(ast: &Ast, binop: NodeId) -> Option<String> {
    match &ast.node(binop).kind {
        NodeKind::BinaryOp {
            op: BinOpKind::MemberByIdentifier,
            rhs,
            ..
        } => match &ast.node(*rhs).kind {
            NodeKind::IdentifierRef { name } => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn resolve_identifier_ref(
    project: &Project,
    program: &mut Program,
    ast: &mut Ast,
    ast_idx: usize,
    node_id: NodeId,
) {
    let name = match &ast.node(node_id).kind {
        NodeKind::IdentifierRef { name } => name.clone(),
        _ => return,
    };

    // The right-hand side of `a.b` is a member name resolved at runtime by
    // id; it only needs interning here.
    let parent = ast.node(node_id).parent;
    if let Some(parent) = parent {
        if let NodeKind::BinaryOp {
            op: BinOpKind::MemberByIdentifier,
            rhs,
            ..
        } = &ast.node(parent).kind
        {
            if *rhs == node_id {
                if ast.node(node_id).storage.is_none() {
                    program.symbols.intern_member_name(&name);
                }
                return;
            }
        }
    }

    if name == "self" || name == "base" {
        if ast.surrounding_class(node_id).is_none() {
            report(
                ast,
                MessageKind::SelfOutsideMethod,
                format!("unexpected identifier \"{name}\", not inside a class func"),
                Some(node_id),
            );
        }
        return;
    }

    let Some(scope) = ast.containing_scope(node_id) else {
        report(
            ast,
            MessageKind::MalformedAst,
            "internal error: failed to obtain scope, malformed AST?".to_string(),
            Some(node_id),
        );
        return;
    };

    let Some(def_ref) = ast.query_scope(scope, &name, true) else {
        if let Some(builtin) = builtin_storage(program, &name) {
            ast.node_mut(node_id).storage = Some(StorageRef::Builtin(builtin));
            ast.node_mut(node_id).resolved_to_builtin = true;
        } else {
            report(
                ast,
                MessageKind::UnknownIdentifier,
                format!(
                    "unexpected unknown identifier \"{name}\", variable or module not found"
                ),
                Some(node_id),
            );
        }
        return;
    };

    ast.node_mut(node_id).resolved_to_def = Some(def_ref);
    let decl = ast.definition(def_ref).declaration;

    match &ast.node(decl).kind {
        NodeKind::Import { .. } => {
            resolve_import_reference(project, ast, ast_idx, node_id, def_ref, &name);
        }
        NodeKind::VarDef { .. }
        | NodeKind::For { .. }
        | NodeKind::ClassDef { .. }
        | NodeKind::FuncDef(_) => {
            resolve_local_reference(ast, node_id, def_ref, decl, &name);
        }
        _ => {
            report(
                ast,
                MessageKind::InternalError,
                format!("internal error: identifier \"{name}\" points to an unhandled declaration"),
                Some(node_id),
            );
        }
    }
}

fn builtin_storage(program: &Program, name: &str) -> Option<BuiltinRef> {
    let builtins = program.symbols.builtin_module();
    if let Some(&entry) = builtins.func_name_to_entry.get(name) {
        return Some(BuiltinRef::Func(
            builtins.func_symbols[entry as usize].global_id,
        ));
    }
    if let Some(&entry) = builtins.class_name_to_entry.get(name) {
        return Some(BuiltinRef::Class(
            builtins.class_symbols[entry as usize].global_id,
        ));
    }
    if let Some(&entry) = builtins.globalvar_name_to_entry.get(name) {
        return Some(BuiltinRef::Var(
            builtins.globalvar_symbols[entry as usize].global_id,
        ));
    }
    None
}

/// A reference to a file-local declaration: flag usage, detect closure
/// captures, and copy the declaration's storage when it is known already.
fn resolve_local_reference(
    ast: &mut Ast,
    node_id: NodeId,
    def_ref: DefRef,
    decl: NodeId,
    name: &str,
) {
    let is_self_reference = is_descendant_of(ast, node_id, decl)
        && !matches!(ast.node(decl).kind, NodeKind::For { .. });
    if !is_self_reference {
        ast.definition_mut(def_ref).ever_used = true;

        // A var-def of an outer function referenced from a nested function
        // body is a closure capture: every function between the reference
        // and the defining function binds it.
        let decl_func = ast.surrounding_func(decl);
        let ref_func = ast.surrounding_func(node_id);
        if matches!(ast.node(decl).kind, NodeKind::VarDef { .. })
            && decl_func.is_some()
            && ref_func != decl_func
        {
            ast.definition_mut(def_ref).closure_bound = true;
            let mut cursor = ref_func;
            while let Some(func_node) = cursor {
                if Some(func_node) == decl_func {
                    break;
                }
                if let Some(func) = ast.func_def_mut(func_node) {
                    if !func.closure_captures.contains(&def_ref) {
                        func.closure_captures.push(def_ref);
                    }
                }
                cursor = ast.surrounding_func(func_node);
            }
            if cursor != decl_func {
                report(
                    ast,
                    MessageKind::MalformedAst,
                    "internal error: closure capture walk left the defining function".to_string(),
                    Some(node_id),
                );
                return;
            }
        }
    }

    // A definition record pointing at a function under a different name is
    // a parameter binding; its slot is assigned by local storage, not by
    // the function's own storage.
    let is_param_ref =
        matches!(&ast.node(decl).kind, NodeKind::FuncDef(f) if f.name.as_deref() != Some(name));
    if is_param_ref {
        return;
    }

    if let Some(storage) = ast.node(decl).storage {
        ast.node_mut(node_id).storage = Some(storage);
    } else if ast
        .containing_scope(decl)
        .map(|s| ast.scope(s).is_global)
        .unwrap_or(false)
    {
        // Global storage was assigned in pass one, so a bare global here
        // means pass one silently failed.
        report(
            ast,
            MessageKind::InternalError,
            "internal error: global declaration has no storage".to_string(),
            Some(node_id),
        );
    }
}

fn is_descendant_of(ast: &Ast, node: NodeId, ancestor: NodeId) -> bool {
    let mut cursor = Some(node);
    while let Some(id) = cursor {
        if id == ancestor {
            return true;
        }
        cursor = ast.node(id).parent;
    }
    false
}

/// A reference whose definition is an import statement: rebuild the dotted
/// module path from the member-access chain, match it against the imports
/// binding this name, and resolve the single accessed item inside the
/// target module.
fn resolve_import_reference(
    project: &Project,
    ast: &mut Ast,
    ast_idx: usize,
    node_id: NodeId,
    def_ref: DefRef,
    name: &str,
) {
    // Follow the tree to the full dotted path: climb while both the parent
    // and the grandparent continue the member-by-identifier chain, so the
    // final member access (the item inside the module) is left alone.
    let mut elements = vec![name.to_string()];
    let mut chain_top = node_id;
    loop {
        let Some(parent) = ast.node(chain_top).parent else {
            break;
        };
        if !is_member_chain_link(ast, parent, chain_top) {
            break;
        }
        let Some(grandparent) = ast.node(parent).parent else {
            break;
        };
        if !is_member_chain_link(ast, grandparent, parent) {
            break;
        }
        let Some(next_element) = member_rhs_name(ast, parent) else {
            break;
        };
        chain_top = parent;
        elements.push(next_element);
        if elements.len() > IMPORT_CHAIN_MAX {
            report(
                ast,
                MessageKind::ImportChainTooDeep,
                format!("unexpected import chain exceeding maximum nesting of {IMPORT_CHAIN_MAX}"),
                Some(node_id),
            );
            return;
        }
    }

    // Find the import statement whose components equal the chain exactly.
    let mut matched: Option<NodeId> = None;
    let declarations: Vec<NodeId> = ast.definition(def_ref).all_declarations().collect();
    for decl in declarations {
        if let NodeKind::Import { components, .. } = &ast.node(decl).kind {
            if components.len() == elements.len()
                && components.iter().zip(&elements).all(|(a, b)| a == b)
            {
                matched = Some(decl);
            }
        }
    }
    let full_path = elements.join(".");
    let Some(matched) = matched else {
        report(
            ast,
            MessageKind::UnknownModulePath,
            format!(
                "unexpected reference to module path \"{full_path}\", \
                 not found among this file's imports"
            ),
            Some(node_id),
        );
        return;
    };

    // Modules can only be used by accessing an item with one further `.`.
    let access = ast.node(chain_top).parent;
    let item_name = match access {
        Some(access) if is_member_chain_link(ast, access, chain_top) => {
            member_rhs_name(ast, access)
        }
        _ => None,
    };
    let Some(item_name) = item_name else {
        report(
            ast,
            MessageKind::BareModuleReference,
            format!(
                "unexpected standalone use of module {full_path}, instead of accessing \
                 any element from the module via \".\""
            ),
            Some(node_id),
        );
        return;
    };

    let referenced_uri = match &ast.node(matched).kind {
        NodeKind::Import {
            referenced_file_uri: Some(uri),
            ..
        } => uri.clone(),
        _ => {
            // The import never loaded; an error was reported back then.
            return;
        }
    };

    // The target may be this very file when the import cycles back.
    let target_storage = {
        let target_idx = project.ast_index_by_uri(&referenced_uri);
        let target_ast: &Ast = match target_idx {
            Some(idx) if idx == ast_idx => ast,
            Some(idx) => &project.asts[idx],
            None => {
                report(
                    ast,
                    MessageKind::InternalError,
                    format!("internal error: imported AST {referenced_uri} disappeared"),
                    Some(node_id),
                );
                return;
            }
        };
        match target_ast.query_scope(target_ast.root_scope, &item_name, false) {
            Some(target_def) => {
                let decl = target_ast.definition(target_def).declaration;
                Some(target_ast.node(decl).storage)
            }
            None => None,
        }
    };

    match target_storage {
        Some(storage) => {
            if let Some(storage) = storage {
                ast.node_mut(node_id).storage = Some(storage);
            }
            ast.definition_mut(def_ref).ever_used = true;
        }
        None => {
            report(
                ast,
                MessageKind::UnknownIdentifier,
                format!(
                    "unexpected unknown identifier \"{item_name}\" \
                     not found in module \"{full_path}\""
                ),
                Some(node_id),
            );
        }
    }
}
