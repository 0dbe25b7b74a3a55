//! Shared test utilities for knit-bundler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use knit_bundler::{Bundler, CompileError, CompilerOutput, ForeignCompiler, UnitDescriptor};
use knit_config::BuildConfig;
use knit_graph::test_utils::MemoryRuntime;
use regex::Regex;

pub const BINARY: &[u8] = b"\0asm\x01\0\0\0";

/// Stands in for wasm-pack: counts calls and can fail or hang.
#[derive(Debug, Default)]
pub struct FakeCompiler {
    pub calls: AtomicUsize,
    pub fail: Option<CompileError>,
    pub delay: Option<Duration>,
    /// Set when an in-flight compile future is dropped before finishing.
    pub dropped: Arc<AtomicBool>,
}

impl FakeCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: CompileError) -> Arc<Self> {
        Arc::new(Self {
            fail: Some(err),
            ..Self::default()
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            delay: Some(Duration::from_secs(3600)),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ForeignCompiler for FakeCompiler {
    async fn compile(&self, unit: &UnitDescriptor) -> Result<CompilerOutput, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            let flag = DropFlag(Arc::clone(&self.dropped));
            tokio::time::sleep(delay).await;
            std::mem::forget(flag);
        }
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        Ok(CompilerOutput {
            binary: BINARY.to_vec(),
            glue_source: format!(
                "export default async function init() {{\n  const url = new URL('{name}_bg.wasm', import.meta.url);\n  return fetch(url);\n}}\n",
                name = unit.out_name
            )
            .into_bytes(),
        })
    }
}

/// A small app: a script entry importing a stylesheet, a JSON asset and the
/// wasm crate; the stylesheet references an image.
pub fn app_project() -> MemoryRuntime {
    MemoryRuntime::new("/proj")
        .with_file(
            "/proj/src/index.js",
            "import init from '../crate';\nimport './style.css';\nimport data from './data.json';\ninit();\n",
        )
        .with_file(
            "/proj/src/style.css",
            "@import './reset.css';\nbody { background: url(./logo.png); }\n",
        )
        .with_file("/proj/src/reset.css", "* { margin: 0; }\n")
        .with_file("/proj/src/logo.png", "PNG")
        .with_file("/proj/src/data.json", "{\"answer\": 42}")
        .with_file(
            "/proj/crate/Cargo.toml",
            "[package]\nname = \"hello-wasm\"\nversion = \"0.1.0\"\n",
        )
        .with_file(
            "/proj/public/index.html",
            "<!doctype html>\n<html>\n<head><title>app</title></head>\n<body>\n<div id=\"app\"></div>\n</body>\n</html>\n",
        )
}

pub fn app_config() -> BuildConfig {
    let mut config = BuildConfig::with_entry("src/index.js");
    config.foreign_compile_unit_dir = Some("crate".into());
    config.html_template = Some("public/index.html".into());
    config
}

pub fn bundler(config: BuildConfig, runtime: &Arc<MemoryRuntime>, compiler: &Arc<FakeCompiler>) -> Bundler {
    Bundler::new(config)
        .runtime(runtime.clone())
        .compiler(compiler.clone())
}

/// Module syntax left in a bundle, which a classic script cannot parse.
pub fn leftover_module_syntax(bundle: &str) -> Vec<String> {
    let pattern = Regex::new(r#"\b(?:import|export)(?:\s+[\w$]|\s*[{*"'])|\bimport\s*\.\s*meta"#).unwrap();
    pattern.find_iter(bundle).map(|m| m.as_str().to_string()).collect()
}

/// Run `script` with node, passing a file holding `bundle` as
/// `process.argv[1]`, and return its trimmed stdout. `None` when node is not
/// installed.
pub fn run_node(script: &str, bundle: &str) -> Option<String> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.js");
    std::fs::write(&path, bundle).unwrap();

    let output = match std::process::Command::new("node").arg("-e").arg(script).arg(&path).output() {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("node is not installed; skipping execution");
            return None;
        }
        Err(err) => panic!("failed to start node: {err}"),
    };
    assert!(
        output.status.success(),
        "node failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    Some(String::from_utf8(output.stdout).unwrap().trim().to_string())
}
