//! Errors from the external compiler.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Why a foreign unit failed to compile.
///
/// Handles are shared between every requester of a unit, so the error is
/// `Clone` and carries owned strings rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CompileError {
    /// The compiler process could not be started.
    #[error("failed to start '{program}': {message}")]
    #[diagnostic(
        code(knit::compile::spawn_failed),
        help("Check that the compiler is installed and on PATH (try `cargo install wasm-pack`)")
    )]
    Spawn { program: String, message: String },

    /// The compiler exited unsuccessfully.
    #[error("compiler exited with code {exit_code}")]
    #[diagnostic(code(knit::compile::exit))]
    Exit {
        exit_code: i32,
        #[help]
        stderr: String,
    },

    /// The compiler did not finish in time.
    #[error("compiler timed out after {timeout_secs} seconds")]
    #[diagnostic(
        code(knit::compile::timeout),
        help("Raise foreign_compile.timeout_secs or check whether the build is stuck")
    )]
    Timeout { timeout_secs: u64 },

    /// The compiler succeeded but an expected output file is absent.
    #[error("compiler output missing: {}", path.display())]
    #[diagnostic(
        code(knit::compile::missing_output),
        help("Check foreign_compile.out_dir and foreign_compile.out_name against what the compiler writes")
    )]
    MissingOutput { path: PathBuf },

    /// The unit directory does not describe a compilable crate.
    #[error("invalid compile unit {}: {reason}", path.display())]
    #[diagnostic(code(knit::compile::invalid_unit))]
    InvalidUnit { path: PathBuf, reason: String },

    #[error("runtime error while compiling: {0}")]
    #[diagnostic(code(knit::compile::runtime))]
    Runtime(String),

    /// The job was aborted before it finished.
    #[error("compile job cancelled")]
    #[diagnostic(code(knit::compile::cancelled))]
    Cancelled,

    #[error("compile job panicked: {0}")]
    #[diagnostic(code(knit::compile::panicked))]
    Panicked(String),
}

impl CompileError {
    pub fn spawn(program: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            message: source.to_string(),
        }
    }

    pub fn exit(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Exit {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<knit_graph::RuntimeError> for CompileError {
    fn from(err: knit_graph::RuntimeError) -> Self {
        match err {
            knit_graph::RuntimeError::FileNotFound(path) => Self::MissingOutput { path },
            other => Self::Runtime(other.to_string()),
        }
    }
}
