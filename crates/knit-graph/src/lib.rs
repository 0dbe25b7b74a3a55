//! # knit-graph
//!
//! Graph data structures shared by the knit build pipeline.
//!
//! - [`ModuleId`]: canonical identity of a module (cleaned absolute path plus an
//!   optional tag for synthesized modules)
//! - [`ModuleNode`] / [`ModuleKind`]: a loaded module and what kind it is
//! - [`ModuleGraph`]: arena storage with first-discovery order and
//!   [`stable_order`](ModuleGraph::stable_order)
//! - [`Runtime`]: the filesystem abstraction every other crate reads through
//!
//! Cycles are stored as plain id edges in the arena, so no reference counting
//! or interior mutability is involved.

pub mod error;
pub mod graph;
pub mod module;
pub mod module_id;
pub mod runtime;
pub mod validation;

pub use error::{GraphError, Result};
pub use graph::ModuleGraph;
pub use module::{ModuleKind, ModuleNode, ModuleNodeBuilder};
pub use module_id::{COMPILED_TAG, FOREIGN_TAG, ModuleId, ModuleIdError};
pub use runtime::{FileMetadata, Runtime, RuntimeError, RuntimeResult};
pub use validation::{PathTraversalError, normalize_and_validate_path, validate_path_within_root};

#[cfg(not(target_family = "wasm"))]
pub use runtime::native::NativeRuntime;

#[cfg(any(test, feature = "test-utils"))]
pub use runtime::test_utils;
