//! Error types for graph construction and integrity checks.

use thiserror::Error;

use crate::{ModuleId, ModuleIdError};

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A node with this id is already part of the graph.
    #[error("module already present in graph: {0}")]
    DuplicateModule(ModuleId),

    /// The id does not name a node of the graph.
    #[error("module not found in graph: {0}")]
    ModuleNotFound(ModuleId),

    /// A node references a dependency that has no node of its own.
    #[error("dangling edge: {from} depends on {to}, which is not in the graph")]
    DanglingEdge { from: ModuleId, to: ModuleId },

    /// An entry id has no node.
    #[error("entry module not found in graph: {0}")]
    UnknownEntry(ModuleId),

    #[error(transparent)]
    ModuleId(#[from] ModuleIdError),
}
