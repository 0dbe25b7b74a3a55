//! External compiler bridge.
//!
//! The graph builder hands a [`UnitDescriptor`] to [`CompilerBridge::compile`]
//! and gets a [`CompileHandle`] back immediately. The compile runs on its own
//! tokio task while traversal of other branches continues; the builder awaits
//! the handle once there is nothing else to load.
//!
//! Within one bridge a unit is compiled at most once: every request for the
//! same descriptor receives a clone of the same shared handle.

mod error;
mod wasm_pack;

pub use error::CompileError;
pub use wasm_pack::WasmPackCompiler;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use knit_config::ForeignCompileOptions;
use knit_graph::{COMPILED_TAG, ModuleId, Runtime};
use parking_lot::Mutex;
use path_clean::PathClean;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// Everything that determines one compile job. Two equal descriptors are the
/// same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitDescriptor {
    /// Directory holding the unit's `Cargo.toml`.
    pub unit_dir: PathBuf,
    /// Absolute directory the compiler writes to.
    pub out_dir: PathBuf,
    /// Base name of the produced files.
    pub out_name: String,
    pub target: String,
    pub release: bool,
}

#[derive(Debug, Deserialize)]
struct CargoManifest {
    package: Option<CargoPackage>,
}

#[derive(Debug, Deserialize)]
struct CargoPackage {
    name: String,
}

impl UnitDescriptor {
    /// Describe the unit in `unit_dir`. When `options.out_name` is unset the
    /// crate's package name is read from its `Cargo.toml`.
    pub async fn from_options(
        unit_dir: &Path,
        options: &ForeignCompileOptions,
        runtime: &dyn Runtime,
    ) -> Result<Self, CompileError> {
        let unit_dir = unit_dir.clean();
        let out_name = match &options.out_name {
            Some(name) => name.clone(),
            None => package_out_name(&unit_dir, runtime).await?,
        };

        Ok(Self {
            out_dir: unit_dir.join(&options.out_dir).clean(),
            unit_dir,
            out_name,
            target: options.target.clone(),
            release: options.release,
        })
    }

    /// `<out_dir>/<out_name>_bg.wasm`
    pub fn binary_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_bg.wasm", self.out_name))
    }

    /// `<out_dir>/<out_name>.js`
    pub fn glue_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.js", self.out_name))
    }
}

async fn package_out_name(unit_dir: &Path, runtime: &dyn Runtime) -> Result<String, CompileError> {
    let manifest_path = unit_dir.join("Cargo.toml");
    let invalid = |reason: String| CompileError::InvalidUnit {
        path: manifest_path.clone(),
        reason,
    };

    let bytes = runtime
        .read_file(&manifest_path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
    let manifest: CargoManifest = toml::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    let package = manifest
        .package
        .ok_or_else(|| invalid("no [package] table".to_string()))?;

    Ok(package.name.replace('-', "_"))
}

/// Raw files produced by a successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOutput {
    pub binary: Vec<u8>,
    pub glue_source: Vec<u8>,
}

/// A compiled unit, ready to be spliced into the graph.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    /// Placeholder id the unit was discovered under.
    pub unit: ModuleId,
    pub binary: Vec<u8>,
    pub glue_source: Vec<u8>,
    /// Script module that replaces the placeholder.
    pub glue_module_id: ModuleId,
    /// Asset module holding the binary.
    pub asset_module_id: ModuleId,
}

impl CompiledArtifact {
    pub fn new(
        unit: ModuleId,
        descriptor: &UnitDescriptor,
        output: &CompilerOutput,
    ) -> Result<Self, CompileError> {
        let id_for = |path: PathBuf| {
            ModuleId::new(&path)
                .map(|id| id.with_tag(COMPILED_TAG))
                .map_err(|e| CompileError::InvalidUnit {
                    path,
                    reason: e.to_string(),
                })
        };

        Ok(Self {
            unit,
            binary: output.binary.clone(),
            glue_source: output.glue_source.clone(),
            glue_module_id: id_for(descriptor.glue_path())?,
            asset_module_id: id_for(descriptor.binary_path())?,
        })
    }
}

/// Runs the external compiler for one unit.
#[async_trait]
pub trait ForeignCompiler: Send + Sync + fmt::Debug {
    async fn compile(&self, unit: &UnitDescriptor) -> Result<CompilerOutput, CompileError>;
}

pub type CompileResult = Result<Arc<CompilerOutput>, CompileError>;

/// Awaitable result of a compile job. Cloning is cheap and every clone
/// settles to the same result.
pub type CompileHandle = Shared<BoxFuture<'static, CompileResult>>;

struct Job {
    handle: CompileHandle,
    abort: AbortHandle,
}

/// Deduplicating front for a [`ForeignCompiler`]. One bridge serves one build.
pub struct CompilerBridge {
    compiler: Arc<dyn ForeignCompiler>,
    jobs: Mutex<FxHashMap<UnitDescriptor, Job>>,
}

impl CompilerBridge {
    pub fn new(compiler: Arc<dyn ForeignCompiler>) -> Self {
        Self {
            compiler,
            jobs: Mutex::new(FxHashMap::default()),
        }
    }

    /// Start compiling `unit`, or join the job already running for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn compile(&self, unit: UnitDescriptor) -> CompileHandle {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get(&unit) {
            debug!(unit = %unit.unit_dir.display(), "joining existing compile job");
            return job.handle.clone();
        }

        info!(unit = %unit.unit_dir.display(), target = %unit.target, "starting compile job");
        let compiler = Arc::clone(&self.compiler);
        let task_unit = unit.clone();
        let task = tokio::spawn(async move { compiler.compile(&task_unit).await.map(Arc::new) });
        let abort = task.abort_handle();

        let handle = async move {
            match task.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(CompileError::Cancelled),
                Err(err) => Err(CompileError::Panicked(err.to_string())),
            }
        }
        .boxed()
        .shared();

        jobs.insert(
            unit,
            Job {
                handle: handle.clone(),
                abort,
            },
        );
        handle
    }

    /// Abort every job that has not finished. Their handles settle as
    /// [`CompileError::Cancelled`]; a running compiler process is killed.
    pub fn cancel_all(&self) {
        let jobs = self.jobs.lock();
        let mut cancelled = 0usize;
        for job in jobs.values() {
            if !job.abort.is_finished() {
                job.abort.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "cancelled compile jobs");
        }
    }

    /// Number of distinct jobs started so far.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Drop for CompilerBridge {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl fmt::Debug for CompilerBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerBridge")
            .field("compiler", &self.compiler)
            .field("jobs", &self.job_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_graph::test_utils::MemoryRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Counting {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ForeignCompiler for Counting {
        async fn compile(&self, unit: &UnitDescriptor) -> Result<CompilerOutput, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CompilerOutput {
                binary: b"\0asm".to_vec(),
                glue_source: format!("// {}", unit.out_name).into_bytes(),
            })
        }
    }

    fn unit(name: &str) -> UnitDescriptor {
        UnitDescriptor {
            unit_dir: PathBuf::from("/proj/crate"),
            out_dir: PathBuf::from("/proj/crate/pkg"),
            out_name: name.to_string(),
            target: "web".to_string(),
            release: true,
        }
    }

    #[tokio::test]
    async fn same_unit_compiles_once() {
        let compiler = Arc::new(Counting {
            delay: Some(Duration::from_millis(20)),
            ..Counting::default()
        });
        let bridge = CompilerBridge::new(compiler.clone());

        let handles: Vec<_> = (0..8).map(|_| bridge.compile(unit("app"))).collect();
        let results = futures::future::join_all(handles).await;

        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.job_count(), 1);
        for result in results {
            assert_eq!(result.unwrap().glue_source, b"// app");
        }
    }

    #[tokio::test]
    async fn distinct_units_compile_separately() {
        let compiler = Arc::new(Counting::default());
        let bridge = CompilerBridge::new(compiler.clone());

        let a = bridge.compile(unit("a")).await.unwrap();
        let b = bridge.compile(unit("b")).await.unwrap();
        assert_ne!(a.glue_source, b.glue_source);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_settles_handles() {
        let compiler = Arc::new(Counting {
            delay: Some(Duration::from_secs(60)),
            ..Counting::default()
        });
        let bridge = CompilerBridge::new(compiler);

        let handle = bridge.compile(unit("slow"));
        bridge.cancel_all();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn out_name_comes_from_the_package_name() {
        let runtime = MemoryRuntime::new("/proj").with_file(
            "/proj/crate/Cargo.toml",
            "[package]\nname = \"my-app\"\nversion = \"0.1.0\"\n",
        );
        let unit = UnitDescriptor::from_options(
            Path::new("/proj/crate"),
            &ForeignCompileOptions::default(),
            &runtime,
        )
        .await
        .unwrap();

        assert_eq!(unit.out_name, "my_app");
        assert_eq!(unit.out_dir, PathBuf::from("/proj/crate/pkg"));
        assert_eq!(unit.binary_path(), PathBuf::from("/proj/crate/pkg/my_app_bg.wasm"));
        assert_eq!(unit.glue_path(), PathBuf::from("/proj/crate/pkg/my_app.js"));
    }

    #[tokio::test]
    async fn workspace_manifest_is_not_a_unit() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file("/proj/crate/Cargo.toml", "[workspace]\nmembers = []\n");
        let err = UnitDescriptor::from_options(
            Path::new("/proj/crate"),
            &ForeignCompileOptions::default(),
            &runtime,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidUnit { .. }));
    }
}
