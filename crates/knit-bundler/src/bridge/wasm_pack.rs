//! `wasm-pack` process driver.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use knit_config::ForeignCompileOptions;
use knit_graph::Runtime;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{CompileError, CompilerOutput, ForeignCompiler, UnitDescriptor};

const DEFAULT_PROGRAM: &str = "wasm-pack";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Runs `wasm-pack build` (or a configured stand-in) in the unit directory
/// and reads the produced binary and glue through the [`Runtime`].
///
/// Custom argument lists may use `{out_dir}`, `{out_name}` and `{target}`,
/// which are replaced per unit.
#[derive(Debug, Clone)]
pub struct WasmPackCompiler {
    program: String,
    args: Option<Vec<String>>,
    timeout_secs: u64,
    runtime: Arc<dyn Runtime>,
}

impl WasmPackCompiler {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            runtime,
        }
    }

    pub fn from_options(options: &ForeignCompileOptions, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            program: options.program.clone(),
            args: options.args.clone(),
            timeout_secs: options.timeout_secs,
            runtime,
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Arguments passed to the compiler for `unit`.
    pub fn command_args(&self, unit: &UnitDescriptor) -> Vec<String> {
        let out_dir = unit.out_dir.to_string_lossy();
        match &self.args {
            Some(args) => args
                .iter()
                .map(|arg| {
                    arg.replace("{out_dir}", &out_dir)
                        .replace("{out_name}", &unit.out_name)
                        .replace("{target}", &unit.target)
                })
                .collect(),
            None => vec![
                "build".to_string(),
                "--target".to_string(),
                unit.target.clone(),
                "--out-dir".to_string(),
                out_dir.into_owned(),
                "--out-name".to_string(),
                unit.out_name.clone(),
                if unit.release { "--release" } else { "--dev" }.to_string(),
            ],
        }
    }

    async fn read_output(&self, path: &Path) -> Result<Vec<u8>, CompileError> {
        if !self.runtime.is_file(path).await {
            return Err(CompileError::MissingOutput {
                path: path.to_path_buf(),
            });
        }
        Ok(self.runtime.read_file(path).await?)
    }
}

#[async_trait]
impl ForeignCompiler for WasmPackCompiler {
    async fn compile(&self, unit: &UnitDescriptor) -> Result<CompilerOutput, CompileError> {
        let args = self.command_args(unit);
        debug!(program = %self.program, ?args, dir = %unit.unit_dir.display(), "spawning compiler");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&unit.unit_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| CompileError::spawn(&self.program, &e))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| CompileError::Timeout {
                timeout_secs: self.timeout_secs,
            })?
            .map_err(|e| CompileError::spawn(&self.program, &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, unit = %unit.unit_dir.display(), "compiler failed");
            return Err(CompileError::exit(exit_code, stderr));
        }

        let binary = self.read_output(&unit.binary_path()).await?;
        let glue_source = self.read_output(&unit.glue_path()).await?;
        debug!(
            binary_bytes = binary.len(),
            glue_bytes = glue_source.len(),
            "compiler output read"
        );

        Ok(CompilerOutput {
            binary,
            glue_source,
        })
    }
}
