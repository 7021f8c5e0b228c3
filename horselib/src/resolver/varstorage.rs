//! Local storage assignment: concrete slot indices for parameters, closure
//! captures, and function-local variables.
//!
//! Runs after identifier resolution succeeded. Frame layout per function:
//! `self` (methods only), then parameters, then one slot per closure
//! capture, then the locals in declaration order.

use crate::ast::{Ast, NodeId, NodeKind, StorageRef};
use crate::bytecode::Program;

fn func_input_size(ast: &Ast, program: &Program, func_node: NodeId) -> Option<usize> {
    let func = ast.func_def(func_node)?;
    let func_id = func.func_id?;
    let is_method = program.funcs[func_id as usize].associated_class_id.is_some();
    Some(func.params.len() + usize::from(is_method))
}

pub(crate) fn assign_local_storage(ast: &mut Ast, program: &mut Program) {
    let func_nodes: Vec<NodeId> = ast
        .node_ids()
        .filter(|&id| matches!(ast.node(id).kind, NodeKind::FuncDef(_)))
        .collect();

    for &func_node in &func_nodes {
        let Some(input) = func_input_size(ast, program, func_node) else {
            continue;
        };
        let func_id = ast
            .func_def(func_node)
            .and_then(|f| f.func_id)
            .expect("checked by func_input_size");
        let capture_count = ast
            .func_def(func_node)
            .map(|f| f.closure_captures.len())
            .unwrap_or(0);
        let mut next_slot = input + capture_count;

        let local_defs: Vec<NodeId> = ast
            .node_ids()
            .filter(|&id| match &ast.node(id).kind {
                NodeKind::VarDef { .. } => {
                    ast.node(id).storage.is_none()
                        && ast.owning_class(id).is_none()
                        && ast.surrounding_func(id) == Some(func_node)
                }
                NodeKind::For { .. } => ast.surrounding_func(id) == Some(func_node),
                _ => false,
            })
            .collect();
        for def_node in local_defs {
            ast.node_mut(def_node).storage = Some(StorageRef::Local(next_slot as u16));
            next_slot += 1;
        }

        let inner = (next_slot - input) as u16;
        if let Some(func) = ast.func_def_mut(func_node) {
            func.inner_local_count = inner;
        }
        let entry = &mut program.funcs[func_id as usize];
        if entry.inner_stack_size < inner {
            entry.inner_stack_size = inner;
        }
    }

    assign_capture_sources(ast, program, &func_nodes);
    fixup_references(ast, program);
}

/// Records, per capturing function, the defining-frame slots `GETFUNC`
/// snapshots its bound values from. A capture that lives in the immediate
/// parent uses the parent's local slot; one relayed through the parent
/// uses the parent's own capture slot. Runs after every function's local
/// slots are assigned, since parent capture positions must be final.
fn assign_capture_sources(ast: &Ast, program: &mut Program, func_nodes: &[NodeId]) {
    for &func_node in func_nodes {
        let Some(func_id) = ast.func_def(func_node).and_then(|f| f.func_id) else {
            continue;
        };
        let captures = ast
            .func_def(func_node)
            .map(|f| f.closure_captures.clone())
            .unwrap_or_default();
        if captures.is_empty() {
            continue;
        }
        // Captures only bind variables of enclosing functions, so a
        // capturing function always has one.
        let Some(parent) = ast.surrounding_func(func_node) else {
            continue;
        };
        let mut sources = Vec::with_capacity(captures.len());
        let mut complete = true;
        for def_ref in captures {
            let decl = ast.definition(def_ref).declaration;
            let source = if ast.surrounding_func(decl) == Some(parent) {
                match ast.node(decl).storage {
                    Some(StorageRef::Local(slot)) => Some(slot),
                    _ => None,
                }
            } else {
                let capture_pos = ast
                    .func_def(parent)
                    .and_then(|f| f.closure_captures.iter().position(|&c| c == def_ref));
                match (capture_pos, func_input_size(ast, program, parent)) {
                    (Some(pos), Some(input)) => Some((input + pos) as u16),
                    _ => None,
                }
            };
            match source {
                Some(slot) => sources.push(slot),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            program.set_func_capture_sources(func_id, sources);
        }
    }
}

/// Copies the now-known local slots onto the identifier references that
/// resolved to them, mapping closure-captured definitions to the capture
/// slot of the referencing function.
fn fixup_references(ast: &mut Ast, program: &Program) {
    let ref_nodes: Vec<NodeId> = ast
        .node_ids()
        .filter(|&id| matches!(ast.node(id).kind, NodeKind::IdentifierRef { .. }))
        .collect();

    for node_id in ref_nodes {
        if ast.node(node_id).storage.is_some() {
            continue;
        }
        let name = match &ast.node(node_id).kind {
            NodeKind::IdentifierRef { name } => name.clone(),
            _ => continue,
        };

        if name == "self" || name == "base" {
            let is_method_body = ast
                .surrounding_func(node_id)
                .and_then(|f| func_input_size(ast, program, f).zip(ast.func_def(f)))
                .map(|(input, func)| input > func.params.len())
                .unwrap_or(false);
            if is_method_body {
                ast.node_mut(node_id).storage = Some(StorageRef::Local(0));
            }
            continue;
        }

        let Some(def_ref) = ast.node(node_id).resolved_to_def else {
            continue;
        };
        let decl = ast.definition(def_ref).declaration;
        let ref_func = ast.surrounding_func(node_id);

        match &ast.node(decl).kind {
            NodeKind::VarDef { .. } | NodeKind::For { .. } => {
                let Some(StorageRef::Local(decl_slot)) = ast.node(decl).storage else {
                    continue;
                };
                let decl_func = ast.surrounding_func(decl);
                if ref_func == decl_func {
                    ast.node_mut(node_id).storage = Some(StorageRef::Local(decl_slot));
                    continue;
                }
                // Captured: the reference uses the capture slot of its own
                // function, not the defining function's local slot.
                let Some(ref_func) = ref_func else {
                    continue;
                };
                let capture_pos = ast
                    .func_def(ref_func)
                    .and_then(|f| f.closure_captures.iter().position(|&c| c == def_ref));
                let Some(capture_pos) = capture_pos else {
                    continue;
                };
                let Some(input) = func_input_size(ast, program, ref_func) else {
                    continue;
                };
                ast.node_mut(node_id).storage =
                    Some(StorageRef::Local((input + capture_pos) as u16));
            }
            NodeKind::FuncDef(func) => {
                // A parameter reference: the definition record points at
                // the function that declares the parameter. Only refs that
                // execute in that function's own frame get its slot.
                if ref_func != Some(decl) {
                    continue;
                }
                let Some(param_pos) = func.params.iter().position(|p| p.name == name) else {
                    continue;
                };
                let Some(input) = func_input_size(ast, program, decl) else {
                    continue;
                };
                let self_offset = input - func.params.len();
                ast.node_mut(node_id).storage =
                    Some(StorageRef::Local((self_offset + param_pos) as u16));
            }
            _ => {}
        }
    }
}
