use std::fmt;

/// Closed set of diagnostic kinds produced by resolution and the program
/// tables. VM runtime faults have their own kinds in `vm::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    UnknownIdentifier,
    UnknownModulePath,
    BareModuleReference,
    SelfOutsideMethod,
    DuplicateMain,
    ImportChainTooDeep,
    ModulePathHasDots,
    FileNotInProject,
    MalformedAst,
    DuplicateClassMember,
    TooManyMethods,
    DuplicateSymbol,
    ImportNotFound,
    InternalError,
}

impl MessageKind {
    pub fn code(self) -> &'static str {
        match self {
            MessageKind::UnknownIdentifier => "E-RESOLVE-UNKNOWN-IDENTIFIER",
            MessageKind::UnknownModulePath => "E-RESOLVE-UNKNOWN-MODULE-PATH",
            MessageKind::BareModuleReference => "E-RESOLVE-BARE-MODULE-REF",
            MessageKind::SelfOutsideMethod => "E-RESOLVE-SELF-OUTSIDE-METHOD",
            MessageKind::DuplicateMain => "E-RESOLVE-DUPLICATE-MAIN",
            MessageKind::ImportChainTooDeep => "E-RESOLVE-IMPORT-CHAIN-DEPTH",
            MessageKind::ModulePathHasDots => "E-RESOLVE-MODULE-PATH-DOTS",
            MessageKind::FileNotInProject => "E-RESOLVE-FILE-NOT-IN-PROJECT",
            MessageKind::MalformedAst => "E-RESOLVE-MALFORMED-AST",
            MessageKind::DuplicateClassMember => "E-PROGRAM-DUPLICATE-MEMBER",
            MessageKind::TooManyMethods => "E-PROGRAM-TOO-MANY-METHODS",
            MessageKind::DuplicateSymbol => "E-PROGRAM-DUPLICATE-SYMBOL",
            MessageKind::ImportNotFound => "E-RESOLVE-IMPORT-NOT-FOUND",
            MessageKind::InternalError => "E-INTERNAL",
        }
    }
}

/// One collected diagnostic. `line`/`column` are 1-based; `None` means the
/// message is not anchored to a source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub file_uri: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        message: impl Into<String>,
        file_uri: impl Into<String>,
        line: Option<u32>,
        column: Option<u32>,
    ) -> Self {
        Self {
            kind,
            file_uri: file_uri.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.file_uri)?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, ":{line}:{column}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Accumulates diagnostics for one AST or for the whole project. The
/// success flag latches to false on the first error and is never reset.
#[derive(Debug, Clone, Default)]
pub struct ResultBag {
    failed: bool,
    items: Vec<Message>,
}

impl ResultBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&self) -> bool {
        !self.failed
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn push(&mut self, message: Message) {
        self.failed = true;
        self.items.push(message);
    }

    pub fn error(
        &mut self,
        kind: MessageKind,
        message: impl Into<String>,
        file_uri: impl Into<String>,
        line: Option<u32>,
        column: Option<u32>,
    ) {
        self.push(Message::new(kind, message, file_uri, line, column));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.items
    }

    pub fn count_kind(&self, kind: MessageKind) -> usize {
        self.items.iter().filter(|m| m.kind == kind).count()
    }

    /// Moves every message into `target`, carrying the failure latch along.
    /// The source keeps its latch, so an AST that already failed stays
    /// failed after its messages bubble up to the project bag.
    pub fn transfer_messages(&mut self, target: &mut ResultBag) {
        if self.failed {
            target.failed = true;
        }
        target.items.append(&mut self.items);
    }
}
