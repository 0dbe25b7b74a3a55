//! Filesystem abstraction for the knit pipeline.
//!
//! The resolver, loaders, compiler bridge and output writer never touch
//! `std::fs` directly; everything goes through a [`Runtime`]. Builds are a pure
//! function of what the runtime reports, which is what lets tests run against
//! an in-memory snapshot.

#[cfg(not(target_family = "wasm"))]
pub mod native;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur during runtime operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// File not found
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Other runtime error
    #[error("runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_))
    }
}

/// File metadata
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Whether this is a file
    pub is_file: bool,
    /// Last modified timestamp (milliseconds since epoch)
    pub modified: Option<u64>,
}

/// Platform runtime trait.
///
/// Implementations must be cheap to share (`Arc<dyn Runtime>`) and safe to
/// call from concurrently running load tasks.
#[async_trait]
pub trait Runtime: Send + Sync + std::fmt::Debug {
    /// Read a file from the filesystem
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>>;

    /// Write a file, replacing any existing content
    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()>;

    /// Get file metadata
    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata>;

    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Create a directory
    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()>;

    /// Remove a file
    async fn remove_file(&self, path: &Path) -> RuntimeResult<()>;

    /// Remove a directory and everything below it
    async fn remove_dir_all(&self, path: &Path) -> RuntimeResult<()>;

    /// Move a file, replacing the destination if it exists
    async fn rename(&self, from: &Path, to: &Path) -> RuntimeResult<()>;

    /// Names of the entries of a directory
    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>>;

    /// The working directory used when no project root is configured
    fn get_cwd(&self) -> RuntimeResult<PathBuf>;

    /// `true` if `path` exists and is a regular file.
    async fn is_file(&self, path: &Path) -> bool {
        self.metadata(path).await.is_ok_and(|m| m.is_file)
    }

    /// `true` if `path` exists and is a directory.
    async fn is_dir(&self, path: &Path) -> bool {
        self.metadata(path).await.is_ok_and(|m| m.is_dir)
    }
}
