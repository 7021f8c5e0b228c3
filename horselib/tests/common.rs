#![allow(dead_code)]

use std::collections::HashMap;

use horselib::ast::{Ast, CallArg, FuncDef, Literal, NodeId, NodeKind, Param, ScopeId};
use horselib::bytecode::{Instruction, Program};
use horselib::project::{Environment, ImportError, ImportResolver, Project};
use horselib::resolver;
use horselib::vm::{RunOutcome, TestHost, VmConfig, VmThread};

pub fn lit_none(ast: &mut Ast) -> NodeId {
    ast.push_node(NodeKind::Literal(Literal::None), 1, 1)
}

pub fn lit_int(ast: &mut Ast, value: i64) -> NodeId {
    ast.push_node(NodeKind::Literal(Literal::Int(value)), 1, 1)
}

pub fn lit_str(ast: &mut Ast, value: &str) -> NodeId {
    ast.push_node(NodeKind::Literal(Literal::Str(value.to_string())), 1, 1)
}

pub fn ident(ast: &mut Ast, name: &str) -> NodeId {
    ast.push_node(
        NodeKind::IdentifierRef {
            name: name.to_string(),
        },
        1,
        1,
    )
}

pub fn call(ast: &mut Ast, callee: NodeId, args: Vec<NodeId>) -> NodeId {
    let call_args = args
        .iter()
        .map(|&value| CallArg { name: None, value })
        .collect();
    let node = ast.push_node(
        NodeKind::Call {
            callee,
            args: call_args,
        },
        1,
        1,
    );
    ast.set_parent(callee, node);
    for arg in args {
        ast.set_parent(arg, node);
    }
    node
}

pub fn ret(ast: &mut Ast, value: Option<NodeId>) -> NodeId {
    let node = ast.push_node(NodeKind::Return { value }, 1, 1);
    if let Some(value) = value {
        ast.set_parent(value, node);
    }
    node
}

pub fn member(ast: &mut Ast, lhs: NodeId, rhs_name: &str) -> NodeId {
    let rhs = ident(ast, rhs_name);
    let node = ast.push_node(
        NodeKind::BinaryOp {
            op: horselib::ast::BinOpKind::MemberByIdentifier,
            lhs,
            rhs,
        },
        1,
        1,
    );
    ast.set_parent(lhs, node);
    ast.set_parent(rhs, node);
    node
}

/// Builds a function node: body nodes get their parent set and parameter
/// names are defined in `scope`. The caller still binds the function's own
/// name and attaches the node somewhere.
pub fn make_func(
    ast: &mut Ast,
    name: Option<&str>,
    params: &[&str],
    scope: ScopeId,
    body: Vec<NodeId>,
) -> NodeId {
    let node = ast.push_node(
        NodeKind::FuncDef(FuncDef {
            name: name.map(str::to_string),
            is_inline: name.is_none(),
            params: params
                .iter()
                .map(|p| Param {
                    name: (*p).to_string(),
                    has_default: false,
                })
                .collect(),
            last_is_multiarg: false,
            scope,
            body: body.clone(),
            func_id: None,
            closure_captures: Vec::new(),
            inner_local_count: 0,
        }),
        1,
        1,
    );
    for stmt in body {
        ast.set_parent(stmt, node);
    }
    for param in params {
        ast.scope_mut(scope).define(param, node);
    }
    node
}

pub fn add_global_func(
    ast: &mut Ast,
    name: &str,
    params: &[&str],
    scope: ScopeId,
    body: Vec<NodeId>,
) -> NodeId {
    let node = make_func(ast, Some(name), params, scope, body);
    let root = ast.root_scope;
    ast.scope_mut(root).define(name, node);
    ast.attach_root(node);
    node
}

pub fn make_var(ast: &mut Ast, name: &str, value: Option<NodeId>) -> NodeId {
    let node = ast.push_node(
        NodeKind::VarDef {
            name: name.to_string(),
            is_const: false,
            value,
        },
        1,
        1,
    );
    if let Some(value) = value {
        ast.set_parent(value, node);
    }
    node
}

pub fn add_global_var(ast: &mut Ast, name: &str, value: Option<NodeId>) -> NodeId {
    let node = make_var(ast, name, value);
    let root = ast.root_scope;
    ast.scope_mut(root).define(name, node);
    ast.attach_root(node);
    node
}

pub fn add_import(ast: &mut Ast, components: &[&str]) -> NodeId {
    let node = ast.push_node(
        NodeKind::Import {
            components: components.iter().map(|c| (*c).to_string()).collect(),
            library: None,
            referenced_file_uri: None,
        },
        1,
        1,
    );
    let root = ast.root_scope;
    ast.scope_mut(root).define(components[0], node);
    ast.attach_root(node);
    node
}

/// Import resolver over fixed maps, standing in for the external loader.
#[derive(Default)]
pub struct MapImportResolver {
    /// Dotted module path -> file URI.
    pub modules: HashMap<String, String>,
    /// File URI -> parsed AST.
    pub asts: HashMap<String, Ast>,
}

impl MapImportResolver {
    pub fn with_module(mut self, dotted: &str, uri: &str, ast: Ast) -> Self {
        self.modules.insert(dotted.to_string(), uri.to_string());
        self.asts.insert(uri.to_string(), ast);
        self
    }
}

impl ImportResolver for MapImportResolver {
    fn resolve_import(
        &mut self,
        _from_uri: &str,
        components: &[String],
        _library: Option<&str>,
    ) -> Result<String, ImportError> {
        self.modules
            .get(&components.join("."))
            .cloned()
            .ok_or(ImportError::NotFound)
    }

    fn get_ast(&mut self, file_uri: &str) -> Result<Ast, String> {
        self.asts
            .remove(file_uri)
            .ok_or_else(|| format!("no such file: {file_uri}"))
    }
}

/// Resolves a single-file program with no imports.
pub fn resolve_single(ast: Ast) -> (Project, Program) {
    resolve_with(ast, MapImportResolver::default())
}

/// Resolves two entry files (a two-file source tree).
pub fn resolve_pair(first: Ast, second: Ast) -> (Project, Program) {
    resolve_entries_with(vec![first, second], MapImportResolver::default())
}

/// Resolves a source tree whose entry files are given in order, with the
/// supplied import resolver handling anything they import.
pub fn resolve_entries_with(entries: Vec<Ast>, mut imports: MapImportResolver) -> (Project, Program) {
    let mut project = Project::new(Environment::new(""));
    let mut program = Program::new();
    let entry_indexes: Vec<usize> = entries
        .into_iter()
        .map(|ast| project.add_ast(ast))
        .collect();
    resolver::resolve_entries(
        &mut project,
        &mut program,
        &mut imports,
        &entry_indexes,
        true,
    );
    (project, program)
}

pub fn resolve_with(ast: Ast, mut imports: MapImportResolver) -> (Project, Program) {
    let mut project = Project::new(Environment::new(""));
    let mut program = Program::new();
    let entry = project.add_ast(ast);
    resolver::resolve_ast(&mut project, &mut program, &mut imports, entry, true);
    (project, program)
}

/// Registers one bytecode function named `main` and installs its code.
pub fn program_with_main(code: Vec<Instruction>, inner_stack_size: u16) -> Program {
    let mut program = Program::new();
    let main = program
        .register_function(
            Some("main"),
            Some("main.h64"),
            0,
            Vec::new(),
            false,
            Some("main"),
            None,
            None,
        )
        .expect("register main");
    program.set_func_code(main, code, inner_stack_size);
    program.main_func_index = Some(main);
    program
}

pub fn add_func(
    program: &mut Program,
    name: &str,
    arg_count: u16,
    code: Vec<Instruction>,
    inner_stack_size: u16,
) -> u32 {
    let func_id = program
        .register_function(
            Some(name),
            Some("main.h64"),
            arg_count,
            vec![None; arg_count as usize],
            false,
            Some("main"),
            None,
            None,
        )
        .expect("register function");
    program.set_func_code(func_id, code, inner_stack_size);
    func_id
}

/// Runs a program's main func on a fresh thread with a capturing host.
pub fn run_main(program: &Program) -> (RunOutcome, String, VmThread) {
    let mut thread = VmThread::new(program, VmConfig::default());
    let mut host = TestHost::default();
    let outcome = thread
        .run_function(
            program,
            &mut host,
            program.main_func_index.expect("main func set"),
        )
        .expect("no fatal vm error");
    (outcome, host.output, thread)
}
