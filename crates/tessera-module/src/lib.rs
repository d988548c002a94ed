//! # tessera-module
//!
//! Builds a single module instance and renders its objects.
//!
//! - **Builder**: stages the module, merges user values, evaluates the
//!   package and exports `objects`.
//! - **Values**: deep merge of value documents.

pub mod builder;
pub mod values;

pub use builder::ModuleBuilder;
