//! Name scopes and definition records.
//!
//! Scopes live in the arena of their owning [`crate::ast::Ast`]; parent
//! links are arena indices so the scope tree can be walked without
//! reference cycles.

use std::collections::HashMap;

use crate::ast::{NodeId, ScopeId};

/// A definition binds one identifier to its declaring expression. Repeated
/// declarations of the same identifier in one scope (multiple `import foo.*`
/// statements binding the prefix `foo`) land in `additional_decls`.
#[derive(Debug, Clone)]
pub struct ScopeDef {
    pub identifier: String,
    pub declaration: NodeId,
    pub additional_decls: Vec<NodeId>,
    pub ever_used: bool,
    pub closure_bound: bool,
}

impl ScopeDef {
    pub fn new(identifier: impl Into<String>, declaration: NodeId) -> Self {
        Self {
            identifier: identifier.into(),
            declaration,
            additional_decls: Vec::new(),
            ever_used: false,
            closure_bound: false,
        }
    }

    /// The declaring expression plus every additional declaration.
    pub fn all_declarations(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.declaration).chain(self.additional_decls.iter().copied())
    }
}

/// Reference to a definition: owning scope plus index into its definition
/// list. Stable for the lifetime of the AST (definitions are append-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefRef {
    pub scope: ScopeId,
    pub index: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub definitions: Vec<ScopeDef>,
    name_to_definition: HashMap<String, u32>,
    pub parent: Option<ScopeId>,
    pub is_global: bool,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>, is_global: bool) -> Self {
        Self {
            definitions: Vec::new(),
            name_to_definition: HashMap::new(),
            parent,
            is_global,
        }
    }

    /// Adds a declaration for `identifier`. A repeat binding of the same
    /// name extends the existing definition's `additional_decls`.
    pub fn define(&mut self, identifier: &str, declaration: NodeId) {
        if let Some(&idx) = self.name_to_definition.get(identifier) {
            self.definitions[idx as usize]
                .additional_decls
                .push(declaration);
            return;
        }
        let idx = self.definitions.len() as u32;
        self.definitions.push(ScopeDef::new(identifier, declaration));
        self.name_to_definition.insert(identifier.to_string(), idx);
    }

    /// Looks `identifier` up in this scope only.
    pub fn query_local(&self, identifier: &str) -> Option<u32> {
        self.name_to_definition.get(identifier).copied()
    }
}
