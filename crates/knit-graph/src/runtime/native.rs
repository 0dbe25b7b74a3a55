//! Native filesystem runtime.
//!
//! Wraps `std::fs`, running each blocking call on tokio's blocking pool so
//! load waves and compile jobs keep making progress while disk I/O is pending.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::task;

use crate::runtime::{FileMetadata, Runtime, RuntimeError, RuntimeResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> RuntimeError {
    if err.kind() == ErrorKind::NotFound {
        RuntimeError::FileNotFound(path.to_path_buf())
    } else {
        RuntimeError::Io(format!("failed to {action} {}: {err}", path.display()))
    }
}

async fn blocking<T, F>(f: F) -> RuntimeResult<T>
where
    F: FnOnce() -> RuntimeResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| RuntimeError::Other(format!("task join error: {e}")))?
}

#[async_trait]
impl Runtime for NativeRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        let path = path.to_path_buf();
        blocking(move || std::fs::read(&path).map_err(|e| io_error("read", &path, e))).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        let content = content.to_vec();
        blocking(move || std::fs::write(&path, content).map_err(|e| io_error("write", &path, e)))
            .await
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        let path = path.to_path_buf();
        blocking(move || {
            let metadata = std::fs::metadata(&path).map_err(|e| io_error("stat", &path, e))?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64);

            Ok(FileMetadata {
                size: metadata.len(),
                is_dir: metadata.is_dir(),
                is_file: metadata.is_file(),
                modified,
            })
        })
        .await
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        blocking(move || {
            let result = if recursive {
                std::fs::create_dir_all(&path)
            } else {
                std::fs::create_dir(&path)
            };
            result.map_err(|e| io_error("create directory", &path, e))
        })
        .await
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        blocking(move || std::fs::remove_file(&path).map_err(|e| io_error("remove", &path, e)))
            .await
    }

    async fn remove_dir_all(&self, path: &Path) -> RuntimeResult<()> {
        let path = path.to_path_buf();
        blocking(move || {
            std::fs::remove_dir_all(&path).map_err(|e| io_error("remove directory", &path, e))
        })
        .await
    }

    async fn rename(&self, from: &Path, to: &Path) -> RuntimeResult<()> {
        let from = from.to_path_buf();
        let to = to.to_path_buf();
        blocking(move || std::fs::rename(&from, &to).map_err(|e| io_error("rename", &from, e)))
            .await
    }

    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>> {
        let path = path.to_path_buf();
        blocking(move || {
            let entries = std::fs::read_dir(&path).map_err(|e| io_error("read directory", &path, e))?;

            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| io_error("read directory entry in", &path, e))?;
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    fn get_cwd(&self) -> RuntimeResult<PathBuf> {
        std::env::current_dir()
            .map_err(|e| RuntimeError::Io(format!("failed to get current working directory: {e}")))
    }
}
