use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmErrorKind {
    OutOfMemory,
    InvalidInstruction,
    UncaughtException,
    DivisionByZero,
    TypeMismatch,
    HostError,
    InternalError,
}

impl VmErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            VmErrorKind::OutOfMemory => "E-VM-OOM",
            VmErrorKind::InvalidInstruction => "E-VM-INVALID-INSTRUCTION",
            VmErrorKind::UncaughtException => "E-VM-UNCAUGHT",
            VmErrorKind::DivisionByZero => "E-VM-DIV-ZERO",
            VmErrorKind::TypeMismatch => "E-VM-TYPE",
            VmErrorKind::HostError => "E-VM-HOST",
            VmErrorKind::InternalError => "E-VM-INTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
    /// Set for `UncaughtException` so a host can look the class up.
    pub uncaught_class_id: Option<u32>,
}

impl VmError {
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            uncaught_class_id: None,
        }
    }

    pub fn uncaught(class_id: u32, message: impl Into<String>) -> Self {
        Self {
            kind: VmErrorKind::UncaughtException,
            message: message.into(),
            uncaught_class_id: Some(class_id),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VmError {}
