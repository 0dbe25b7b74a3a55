//! In-memory runtime for tests.
//!
//! `MemoryRuntime` holds a snapshot of files keyed by cleaned absolute path.
//! Directories exist implicitly above every file, or explicitly once created.
//! It also counts reads per path, so tests can assert a module was loaded
//! exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use path_clean::PathClean;
use rustc_hash::FxHashMap;

use crate::runtime::{FileMetadata, Runtime, RuntimeError, RuntimeResult};

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    reads: FxHashMap<PathBuf, usize>,
}

impl State {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
            || self
                .files
                .keys()
                .any(|file| file != path && file.starts_with(path))
    }
}

#[derive(Debug)]
pub struct MemoryRuntime {
    cwd: PathBuf,
    state: Mutex<State>,
}

impl MemoryRuntime {
    /// Create an empty snapshot rooted at `cwd`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd = cwd.into().clean();
        let mut state = State::default();
        state.dirs.extend(cwd.ancestors().map(Path::to_path_buf));
        Self {
            cwd,
            state: Mutex::new(state),
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.clean()
        } else {
            self.cwd.join(path).clean()
        }
    }

    /// Add a file. Relative paths are taken relative to the cwd.
    pub fn with_file(self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = self.absolute(path.as_ref());
        self.state.lock().files.insert(path, content.into());
    }

    /// Current content of a file, if present.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = self.absolute(path.as_ref());
        self.state.lock().files.get(&path).cloned()
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// How many times `read_file` was called for `path`.
    pub fn read_count(&self, path: impl AsRef<Path>) -> usize {
        let path = self.absolute(path.as_ref());
        self.state.lock().reads.get(&path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Runtime for MemoryRuntime {
    async fn read_file(&self, path: &Path) -> RuntimeResult<Vec<u8>> {
        let path = self.absolute(path);
        let mut state = self.state.lock();
        *state.reads.entry(path.clone()).or_default() += 1;
        state
            .files
            .get(&path)
            .cloned()
            .ok_or(RuntimeError::FileNotFound(path))
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> RuntimeResult<()> {
        let path = self.absolute(path);
        let mut state = self.state.lock();
        if let Some(parent) = path.parent() {
            if !state.is_dir(parent) {
                return Err(RuntimeError::FileNotFound(parent.to_path_buf()));
            }
        }
        state.files.insert(path, content.to_vec());
        Ok(())
    }

    async fn metadata(&self, path: &Path) -> RuntimeResult<FileMetadata> {
        let path = self.absolute(path);
        let state = self.state.lock();
        if let Some(content) = state.files.get(&path) {
            return Ok(FileMetadata {
                size: content.len() as u64,
                is_dir: false,
                is_file: true,
                modified: None,
            });
        }
        if state.is_dir(&path) {
            return Ok(FileMetadata {
                size: 0,
                is_dir: true,
                is_file: false,
                modified: None,
            });
        }
        Err(RuntimeError::FileNotFound(path))
    }

    fn exists(&self, path: &Path) -> bool {
        let path = self.absolute(path);
        let state = self.state.lock();
        state.files.contains_key(&path) || state.is_dir(&path)
    }

    async fn create_dir(&self, path: &Path, recursive: bool) -> RuntimeResult<()> {
        let path = self.absolute(path);
        let mut state = self.state.lock();
        if state.files.contains_key(&path) {
            return Err(RuntimeError::Io(format!(
                "{} exists and is a file",
                path.display()
            )));
        }
        if recursive {
            for ancestor in path.ancestors() {
                state.dirs.insert(ancestor.to_path_buf());
            }
        } else {
            state.dirs.insert(path);
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> RuntimeResult<()> {
        let path = self.absolute(path);
        self.state
            .lock()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or(RuntimeError::FileNotFound(path))
    }

    async fn remove_dir_all(&self, path: &Path) -> RuntimeResult<()> {
        let path = self.absolute(path);
        let mut state = self.state.lock();
        if !state.is_dir(&path) {
            return Err(RuntimeError::FileNotFound(path));
        }
        state.files.retain(|file, _| !file.starts_with(&path));
        state.dirs.retain(|dir| !dir.starts_with(&path));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> RuntimeResult<()> {
        let from = self.absolute(from);
        let to = self.absolute(to);
        let mut state = self.state.lock();
        let content = state
            .files
            .remove(&from)
            .ok_or_else(|| RuntimeError::FileNotFound(from.clone()))?;
        state.files.insert(to, content);
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> RuntimeResult<Vec<String>> {
        let path = self.absolute(path);
        let state = self.state.lock();
        if !state.is_dir(&path) {
            return Err(RuntimeError::FileNotFound(path));
        }

        let children = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|entry| entry.strip_prefix(&path).ok())
            .filter_map(|relative| relative.components().next())
            .map(|first| first.as_os_str().to_string_lossy().into_owned())
            .collect::<BTreeSet<_>>();
        Ok(children.into_iter().collect())
    }

    fn get_cwd(&self) -> RuntimeResult<PathBuf> {
        Ok(self.cwd.clone())
    }
}
