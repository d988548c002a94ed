//! # tessera-engine
//!
//! A restricted, CUE-compatible configuration language.
//!
//! - **Parser**: lexing, AST construction and validation of source files.
//! - **Value**: the value lattice and unification.
//! - **Eval**: lazy evaluation of references, definitions and comprehensions.
//! - **Load**: grouping of staged files into package instances.
//! - **Selector**: path expressions over value trees.
//! - **Context**: the entry point used by the builders.

pub mod context;
pub mod eval;
pub mod load;
pub mod parser;
pub mod selector;
pub mod value;

pub use context::{Context, ContextOptions};
pub use load::{DataFile, Instance, LoadConfig, SourceText};
pub use selector::{Navigable, Selector};
pub use value::Value;
