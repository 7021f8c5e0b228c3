//! Compile project: the AST cache, the import loader boundary, and the
//! host-facing entry points.

use std::collections::HashMap;

use crate::ast::Ast;
use crate::bytecode::Program;
use crate::diagnostic::{MessageKind, ResultBag};
use crate::paths;
use crate::resolver;

/// Explicit environment for the resolver; holds what the original kept in
/// process-wide state (project base path and friends).
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Root all module paths are derived relative to.
    pub project_root: String,
    /// Emit per-pass progress lines on stderr.
    pub stage_debug: bool,
}

impl Environment {
    pub fn new(project_root: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            stage_debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("module not found")]
    NotFound,
}

/// External collaborator that maps dotted import paths to file URIs and
/// produces parsed ASTs.
pub trait ImportResolver {
    fn resolve_import(
        &mut self,
        from_uri: &str,
        components: &[String],
        library: Option<&str>,
    ) -> Result<String, ImportError>;

    fn get_ast(&mut self, file_uri: &str) -> Result<Ast, String>;
}

/// All ASTs of one compilation, cached by normalized file URI so every
/// distinct source is parsed once.
#[derive(Debug, Default)]
pub struct Project {
    pub environment: Environment,
    pub asts: Vec<Ast>,
    uri_to_ast: HashMap<String, usize>,
    pub messages: ResultBag,
}

impl Project {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            asts: Vec::new(),
            uri_to_ast: HashMap::new(),
            messages: ResultBag::new(),
        }
    }

    pub fn ast_index_by_uri(&self, file_uri: &str) -> Option<usize> {
        self.uri_to_ast.get(&paths::normalize(file_uri)).copied()
    }

    /// Adds a pre-parsed AST (the entry file usually arrives this way).
    pub fn add_ast(&mut self, ast: Ast) -> usize {
        let key = paths::normalize(&ast.file_uri);
        let idx = self.asts.len();
        self.asts.push(ast);
        self.uri_to_ast.insert(key, idx);
        idx
    }

    /// Returns the cached AST for `file_uri`, loading it through the
    /// external resolver on first request.
    pub fn get_ast(
        &mut self,
        import_resolver: &mut dyn ImportResolver,
        file_uri: &str,
    ) -> Result<usize, String> {
        let key = paths::normalize(file_uri);
        if let Some(&idx) = self.uri_to_ast.get(&key) {
            return Ok(idx);
        }
        let ast = import_resolver.get_ast(file_uri)?;
        Ok(self.add_ast(ast))
    }

    /// Takes an AST out for a mutable pass; `put_back_ast` must follow.
    /// The slot holds a placeholder meanwhile, so lookups by URI against
    /// the taken AST must go through the returned value.
    pub(crate) fn take_ast(&mut self, idx: usize) -> Ast {
        std::mem::replace(&mut self.asts[idx], Ast::new(String::new()))
    }

    pub(crate) fn put_back_ast(&mut self, idx: usize, ast: Ast) {
        self.asts[idx] = ast;
    }
}

/// Host entry point: loads the source tree's entry files, resolves their
/// import closures, and returns the program with assigned global storage.
/// Exactly one of the entries must declare `main`. Errors come back as the
/// project's collected diagnostics.
pub fn parse_and_resolve(
    environment: Environment,
    import_resolver: &mut dyn ImportResolver,
    entry_uris: &[&str],
) -> Result<Program, ResultBag> {
    let mut project = Project::new(environment);
    let mut program = Program::new();

    let mut entry_indexes = Vec::with_capacity(entry_uris.len());
    for &entry_uri in entry_uris {
        match project.get_ast(import_resolver, entry_uri) {
            Ok(idx) => entry_indexes.push(idx),
            Err(message) => {
                project.messages.error(
                    MessageKind::ImportNotFound,
                    format!("failed to load entry file: {message}"),
                    entry_uri,
                    None,
                    None,
                );
                return Err(project.messages);
            }
        }
    }

    resolver::resolve_entries(
        &mut project,
        &mut program,
        import_resolver,
        &entry_indexes,
        true,
    );

    if project.messages.success() {
        program.symbols.freeze_member_names();
        Ok(program)
    } else {
        Err(project.messages)
    }
}

/// Host entry point: executes a resolved program and returns its exit
/// code. Thin wrapper so hosts need only the two calls the interface
/// promises.
pub fn execute(program: &Program) -> i32 {
    let mut host = crate::vm::StdIoHost;
    crate::vm::execute_program(program, &mut host, crate::vm::VmConfig::default())
}
