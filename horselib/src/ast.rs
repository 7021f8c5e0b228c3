//! Arena-backed abstract syntax tree.
//!
//! The parser (an external collaborator) produces these trees with parent
//! links set and scopes populated. Back-references are arena indices; every
//! traversal goes through the owning [`Ast`].

use crate::diagnostic::ResultBag;
use crate::scope::{DefRef, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Where a resolved reference's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRef {
    GlobalFunc(u32),
    GlobalClass(u32),
    GlobalVar(u32),
    Local(u16),
    Builtin(BuiltinRef),
}

/// Builtin references keep which program table they index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinRef {
    Func(u32),
    Class(u32),
    Var(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Smaller,
    SmallerEqual,
    Bigger,
    BiggerEqual,
    /// `a.b` where `b` names a member resolved at runtime by name id.
    MemberByIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpKind {
    Negate,
    Not,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Parameters with a default value are addressable by keyword at call
    /// sites.
    pub has_default: bool,
}

#[derive(Debug, Clone)]
pub struct CallArg {
    /// Keyword name for `f(x: 1)` style arguments, `None` for positional.
    pub name: Option<String>,
    pub value: NodeId,
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    /// `None` only for inline (anonymous) functions.
    pub name: Option<String>,
    pub is_inline: bool,
    pub params: Vec<Param>,
    pub last_is_multiarg: bool,
    pub scope: ScopeId,
    pub body: Vec<NodeId>,
    /// Program-table id once the global-storage pass registered it.
    pub func_id: Option<u32>,
    /// Outer-function variable definitions this function captures.
    pub closure_captures: Vec<DefRef>,
    /// Slot count past the arguments, set by local storage assignment.
    pub inner_local_count: u16,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Literal(Literal),
    IdentifierRef {
        name: String,
    },
    BinaryOp {
        op: BinOpKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    UnaryOp {
        op: UnOpKind,
        operand: NodeId,
    },
    Call {
        callee: NodeId,
        args: Vec<CallArg>,
    },
    VarDef {
        name: String,
        is_const: bool,
        value: Option<NodeId>,
    },
    FuncDef(FuncDef),
    ClassDef {
        name: String,
        base: Option<NodeId>,
        scope: ScopeId,
        body: Vec<NodeId>,
    },
    Import {
        components: Vec<String>,
        library: Option<String>,
        /// File URI of the referenced AST once the loader materialized it.
        referenced_file_uri: Option<String>,
    },
    For {
        iterator_name: String,
        iterable: NodeId,
        scope: ScopeId,
        body: Vec<NodeId>,
    },
    Assign {
        target: NodeId,
        value: NodeId,
    },
    Return {
        value: Option<NodeId>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub line: u32,
    pub column: u32,
    pub storage: Option<StorageRef>,
    pub resolved_to_def: Option<DefRef>,
    pub resolved_to_builtin: bool,
}

/// One parsed source file.
#[derive(Debug, Clone)]
pub struct Ast {
    pub file_uri: String,
    pub module_path: Option<String>,
    pub library_name: Option<String>,
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
    pub root_scope: ScopeId,
    pub root_nodes: Vec<NodeId>,
    pub messages: ResultBag,
    pub global_storage_built: bool,
    pub identifiers_resolved: bool,
}

impl Ast {
    pub fn new(file_uri: impl Into<String>) -> Self {
        Self {
            file_uri: file_uri.into(),
            module_path: None,
            library_name: None,
            nodes: Vec::new(),
            scopes: vec![Scope::new(None, true)],
            root_scope: ScopeId(0),
            root_nodes: Vec::new(),
            messages: ResultBag::new(),
            global_storage_built: false,
            identifiers_resolved: false,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(Some(parent), false));
        id
    }

    pub fn push_node(&mut self, kind: NodeKind, line: u32, column: u32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            line,
            column,
            storage: None,
            resolved_to_def: None,
            resolved_to_builtin: false,
        });
        id
    }

    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.node_mut(child).parent = Some(parent);
    }

    pub fn attach_root(&mut self, node: NodeId) {
        self.root_nodes.push(node);
    }

    /// The scope a node owns, if it is a scope owner.
    pub fn owned_scope(&self, id: NodeId) -> Option<ScopeId> {
        match &self.node(id).kind {
            NodeKind::FuncDef(f) => Some(f.scope),
            NodeKind::ClassDef { scope, .. } => Some(*scope),
            NodeKind::For { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    /// The scope that contains `id`: the owned scope of the nearest
    /// scope-owning ancestor, or the file's global scope. `None` signals a
    /// malformed tree (a parent chain that loops past the arena bound).
    pub fn containing_scope(&self, id: NodeId) -> Option<ScopeId> {
        let mut hops = 0usize;
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            if let Some(scope) = self.owned_scope(parent) {
                return Some(scope);
            }
            cursor = self.node(parent).parent;
            hops += 1;
            if hops > self.nodes.len() {
                return None;
            }
        }
        Some(self.root_scope)
    }

    /// Lexical lookup from `scope`, optionally walking parent scopes.
    pub fn query_scope(&self, scope: ScopeId, name: &str, walk_parents: bool) -> Option<DefRef> {
        let mut cursor = Some(scope);
        while let Some(scope_id) = cursor {
            let scope = self.scope(scope_id);
            if let Some(index) = scope.query_local(name) {
                return Some(DefRef {
                    scope: scope_id,
                    index,
                });
            }
            if !walk_parents {
                return None;
            }
            cursor = scope.parent;
        }
        None
    }

    pub fn definition(&self, def: DefRef) -> &crate::scope::ScopeDef {
        &self.scope(def.scope).definitions[def.index as usize]
    }

    pub fn definition_mut(&mut self, def: DefRef) -> &mut crate::scope::ScopeDef {
        &mut self.scopes[def.scope.0 as usize].definitions[def.index as usize]
    }

    /// Direct children of a node, in source order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).kind {
            NodeKind::Literal(_) | NodeKind::IdentifierRef { .. } | NodeKind::Import { .. } => {
                Vec::new()
            }
            NodeKind::BinaryOp { lhs, rhs, .. } => vec![*lhs, *rhs],
            NodeKind::UnaryOp { operand, .. } => vec![*operand],
            NodeKind::Call { callee, args } => {
                let mut out = vec![*callee];
                out.extend(args.iter().map(|a| a.value));
                out
            }
            NodeKind::VarDef { value, .. } => value.iter().copied().collect(),
            NodeKind::FuncDef(f) => f.body.clone(),
            NodeKind::ClassDef { base, body, .. } => {
                let mut out: Vec<NodeId> = base.iter().copied().collect();
                out.extend_from_slice(body);
                out
            }
            NodeKind::For { iterable, body, .. } => {
                let mut out = vec![*iterable];
                out.extend_from_slice(body);
                out
            }
            NodeKind::Assign { target, value } => vec![*target, *value],
            NodeKind::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Post-order traversal over the whole file (children before parents,
    /// root statements in source order).
    pub fn visit_post(&self, mut f: impl FnMut(NodeId)) {
        let mut stack: Vec<(NodeId, bool)> = self
            .root_nodes
            .iter()
            .rev()
            .map(|&n| (n, false))
            .collect();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                f(id);
                continue;
            }
            stack.push((id, true));
            for child in self.children(id).into_iter().rev() {
                stack.push((child, false));
            }
        }
    }

    /// The nearest enclosing function definition, if any.
    pub fn surrounding_func(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            if matches!(self.node(parent).kind, NodeKind::FuncDef(_)) {
                return Some(parent);
            }
            cursor = self.node(parent).parent;
        }
        None
    }

    /// The nearest enclosing class whose body contains `id` without an
    /// intervening function (i.e. `id` sits directly in a class body).
    pub fn owning_class(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            match self.node(parent).kind {
                NodeKind::ClassDef { .. } => return Some(parent),
                NodeKind::FuncDef(_) => return None,
                _ => {}
            }
            cursor = self.node(parent).parent;
        }
        None
    }

    /// The class whose method body contains `id`, if any (functions do not
    /// break this walk; used for `self` / `base` checks).
    pub fn surrounding_class(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            if matches!(self.node(parent).kind, NodeKind::ClassDef { .. }) {
                return Some(parent);
            }
            cursor = self.node(parent).parent;
        }
        None
    }

    pub fn func_def(&self, id: NodeId) -> Option<&FuncDef> {
        match &self.node(id).kind {
            NodeKind::FuncDef(f) => Some(f),
            _ => None,
        }
    }

    pub fn func_def_mut(&mut self, id: NodeId) -> Option<&mut FuncDef> {
        match &mut self.node_mut(id).kind {
            NodeKind::FuncDef(f) => Some(f),
            _ => None,
        }
    }

    /// True when a var definition has no initializer or a `none` literal
    /// one; such members need no `$$varinit` support.
    pub fn is_none_var_def(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::VarDef { value: None, .. } => true,
            NodeKind::VarDef {
                value: Some(value), ..
            } => matches!(self.node(*value).kind, NodeKind::Literal(Literal::None)),
            _ => false,
        }
    }
}
