#![cfg_attr(docsrs, feature(doc_cfg))]

//! # knit-bundler
//!
//! Knit bundler - module graph construction, external compilation and
//! deterministic emission on top of the `knit-graph` foundation.
//!
//! A build resolves the configured entries, loads every reachable module
//! through its kind's loader chain, hands the foreign compile unit to an
//! external compiler (wasm-pack by default) and splices the result back into
//! the graph, then emits a content-hashed script bundle, stylesheet and assets
//! plus an HTML shell. Identical inputs always produce byte-identical output.
//!
//! ## Quick Start
//!
//! ```no_run
//! use knit_bundler::{Bundler, WriteOptions};
//! use knit_config::BuildConfig;
//! use knit_graph::NativeRuntime;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BuildConfig::with_entry("src/index.js");
//! let output = Bundler::new(config).build().await?;
//!
//! for asset in output.manifest.assets() {
//!     println!("{} ({} bytes)", asset.filename, asset.content.len());
//! }
//! output.write(&NativeRuntime, output.write_options).await?;
//! # Ok(()) }
//! ```

pub mod bridge;
pub mod emitter;
pub mod extract;
pub mod graph_builder;
pub mod html;
pub mod link;
pub mod loaders;
pub mod output;
pub mod plugins;
pub mod resolver;

mod bundler;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use bridge::{
    CompileError, CompiledArtifact, CompilerBridge, CompilerOutput, ForeignCompiler,
    UnitDescriptor, WasmPackCompiler,
};
pub use bundler::Bundler;
pub use emitter::{AssetKind, BuildManifest, EmitError, EmitOptions, EmittedAsset};
pub use graph_builder::GraphBuilder;
pub use html::{TemplateError, inject};
pub use loaders::{FnLoader, Loader, LoaderContext, LoaderRegistry, TransformError};
pub use output::{BuildOutput, HtmlDocument, WriteOptions};
pub use plugins::{
    HookName, Plugin, PluginContext, PluginDriver, PluginError, PluginFactory,
};
pub use resolver::{ResolutionError, Resolved, Resolver, ResolverOptions, Strategy};

use std::fmt;

use knit_config::ConfigError;
use knit_graph::{GraphError, ModuleId, RuntimeError};

/// Error types for knit-bundler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Plugin(PluginError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A failure while processing one module.
    #[error("{module_id}: {source}")]
    Graph {
        module_id: ModuleId,
        #[source]
        source: Box<Error>,
    },

    /// The finished graph violates an integrity rule.
    #[error("invalid module graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid output path (e.g., directory traversal attempt).
    #[error("invalid output path: {0}")]
    InvalidOutputPath(String),

    /// Output file already exists and overwrite is disabled.
    #[error("output exists: {0}")]
    OutputExists(String),

    /// The build was aborted from outside.
    #[error("build cancelled")]
    Cancelled,
}

/// Result type alias for knit-bundler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], looking through [`Error::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resolution,
    Transform,
    Compile,
    Plugin,
    Template,
    InvalidGraph,
    Emit,
    Config,
    Runtime,
    Io,
    InvalidOutputPath,
    OutputExists,
    Cancelled,
}

/// Where an error came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOrigin {
    Module(ModuleId),
    Plugin { plugin: String, hook: HookName },
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOrigin::Module(id) => write!(f, "module {id}"),
            ErrorOrigin::Plugin { plugin, hook } => write!(f, "plugin '{plugin}' ({hook})"),
        }
    }
}

impl Error {
    /// Wrap `source` with the module being processed when it occurred.
    pub fn in_module(module_id: &ModuleId, source: impl Into<Error>) -> Self {
        Error::Graph {
            module_id: module_id.clone(),
            source: Box::new(source.into()),
        }
    }

    /// The innermost error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution(_) => ErrorKind::Resolution,
            Error::Transform(_) => ErrorKind::Transform,
            Error::Compile(CompileError::Cancelled) => ErrorKind::Cancelled,
            Error::Compile(_) => ErrorKind::Compile,
            Error::Plugin(_) => ErrorKind::Plugin,
            Error::Template(_) => ErrorKind::Template,
            Error::Graph { source, .. } => source.kind(),
            Error::InvalidGraph(_) => ErrorKind::InvalidGraph,
            Error::Emit(_) => ErrorKind::Emit,
            Error::Config(_) => ErrorKind::Config,
            Error::Runtime(_) => ErrorKind::Runtime,
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidOutputPath(_) => ErrorKind::InvalidOutputPath,
            Error::OutputExists(_) => ErrorKind::OutputExists,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The most specific module, or plugin and hook, the error names.
    pub fn origin(&self) -> Option<ErrorOrigin> {
        match self {
            Error::Graph { module_id, source } => source
                .origin()
                .or_else(|| Some(ErrorOrigin::Module(module_id.clone()))),
            Error::Transform(err) => Some(ErrorOrigin::Module(err.module_id.clone())),
            Error::Plugin(err) => Some(ErrorOrigin::Plugin {
                plugin: err.plugin.clone(),
                hook: err.hook,
            }),
            Error::Emit(EmitError::UnsupportedSyntax { module, .. }) => {
                Some(ErrorOrigin::Module(module.clone()))
            }
            Error::Resolution(ResolutionError::NotFound { importer, .. })
            | Error::Resolution(ResolutionError::Ambiguous { importer, .. }) => {
                importer.clone().map(ErrorOrigin::Module)
            }
            _ => None,
        }
    }

    fn inner_diagnostic(&self) -> Option<&dyn miette::Diagnostic> {
        match self {
            Error::Resolution(err) => Some(err),
            Error::Transform(err) => Some(err),
            Error::Compile(err) => Some(err),
            Error::Plugin(err) => Some(err),
            Error::Template(err) => Some(err),
            Error::Emit(err) => Some(err),
            Error::Graph { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// The HTML plugin reports template problems as [`TemplateError`]; those
/// surface as [`Error::Template`] rather than a generic plugin failure.
impl From<PluginError> for Error {
    fn from(err: PluginError) -> Self {
        let PluginError {
            hook,
            plugin,
            cause,
        } = err;
        match cause.downcast::<TemplateError>() {
            Ok(template) => Error::Template(*template),
            Err(cause) => Error::Plugin(PluginError {
                hook,
                plugin,
                cause,
            }),
        }
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn fmt::Display + '_>> {
        if let Some(inner) = self.inner_diagnostic() {
            return inner.code();
        }
        Some(Box::new(match self {
            Error::InvalidGraph(_) => "knit::graph::invalid",
            Error::Config(_) => "knit::config",
            Error::Runtime(_) => "knit::runtime",
            Error::Io(_) => "knit::io",
            Error::InvalidOutputPath(_) => "knit::output::invalid_path",
            Error::OutputExists(_) => "knit::output::exists",
            Error::Cancelled => "knit::cancelled",
            _ => "knit::error",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn fmt::Display + '_>> {
        if let Some(inner) = self.inner_diagnostic() {
            return inner.help();
        }
        match self {
            Error::Config(err) => err
                .hint()
                .map(|hint| Box::new(hint) as Box<dyn fmt::Display + '_>),
            Error::InvalidOutputPath(_) => Some(Box::new(
                "Output filenames must stay inside output_dir and must not contain '..' or null bytes",
            )),
            Error::OutputExists(_) => Some(Box::new(
                "Pass WriteOptions { overwrite: true, .. } or set clean = true",
            )),
            _ => None,
        }
    }
}
