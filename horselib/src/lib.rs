//! Horse64 core: front-end scope resolution and the bytecode execution
//! core.
//!
//! The lexer/parser, file loading, and import-URI resolution are external
//! collaborators: the parser hands over [`ast::Ast`] trees, and import
//! loading goes through the [`project::ImportResolver`] trait. This crate
//! owns everything between those boundaries: the program tables, the
//! scope resolver, and the register-based VM.

pub mod ast;
pub mod bytecode;
pub mod corelib;
pub mod diagnostic;
pub mod paths;
pub mod project;
pub mod resolver;
pub mod scope;
pub mod unicode;
pub mod vm;

pub use project::{execute, parse_and_resolve};
