//! # tessera-bundle
//!
//! Compiles bundle files into validated instance descriptors.
//!
//! - **Workspace**: stages the input files in order.
//! - **Inject**: replaces `@tessera(...)` markers with runtime values.
//! - **Builder**: composes, validates and extracts the bundle.
//! - **Bundle**: the extracted records.

pub mod builder;
pub mod bundle;
pub mod inject;
pub mod workspace;

pub use builder::BundleBuilder;
pub use bundle::{Bundle, BundleInstance, DeferredValue};
pub use inject::Injector;
