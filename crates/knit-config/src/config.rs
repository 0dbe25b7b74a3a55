//! Build configuration for knit.
//!
//! Every knob the pipeline reads lives in [`BuildConfig`]. Keys are
//! snake_case; unknown keys are rejected so that typos surface as errors
//! instead of silently falling back to defaults.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use knit_graph::ModuleKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, Result};

pub const DEFAULT_OUTPUT_FILENAME_PATTERN: &str = "[name].[contenthash].js";
pub const DEFAULT_STYLE_FILENAME_PATTERN: &str = "[name].[contenthash].css";
pub const DEFAULT_ASSET_FILENAME_PATTERN: &str = "[name].[contenthash].[ext]";

/// Where the HTML shell receives its asset tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPoint {
    /// Immediately before `</head>`.
    Head,
    /// Immediately before `</body>`.
    #[default]
    Body,
    /// Replace the first occurrence of a literal marker, e.g. `{{ASSETS}}`.
    Marker(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Entry specifiers, resolved relative to `root`.
    #[serde(default)]
    pub entry: Vec<String>,

    /// Project root. Defaults to the directory the config was loaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_output_filename_pattern")]
    pub output_filename_pattern: String,

    #[serde(default = "default_style_filename_pattern")]
    pub style_filename_pattern: String,

    #[serde(default = "default_asset_filename_pattern")]
    pub asset_filename_pattern: String,

    /// Prefix for every URL the bundle and the HTML shell reference.
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Empty `output_dir` before writing.
    #[serde(default)]
    pub clean: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_template: Option<PathBuf>,

    #[serde(default = "default_html_filename")]
    pub html_filename: String,

    #[serde(default)]
    pub html_injection_point: InjectionPoint,

    /// Loader chains keyed by module kind (`script`, `style`, ...), applied in order.
    #[serde(default)]
    pub loaders: IndexMap<String, Vec<String>>,

    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,

    /// Specifier prefix rewrites, e.g. `"@" = "src"`.
    #[serde(default)]
    pub alias: IndexMap<String, String>,

    /// Directory of the foreign compile unit (a crate with a `Cargo.toml`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_compile_unit_dir: Option<PathBuf>,

    #[serde(default)]
    pub foreign_compile: ForeignCompileOptions,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            entry: Vec::new(),
            root: None,
            output_dir: default_output_dir(),
            output_filename_pattern: default_output_filename_pattern(),
            style_filename_pattern: default_style_filename_pattern(),
            asset_filename_pattern: default_asset_filename_pattern(),
            public_path: default_public_path(),
            clean: false,
            html_template: None,
            html_filename: default_html_filename(),
            html_injection_point: InjectionPoint::default(),
            loaders: IndexMap::new(),
            plugins: Vec::new(),
            alias: IndexMap::new(),
            foreign_compile_unit_dir: None,
            foreign_compile: ForeignCompileOptions::default(),
        }
    }
}

impl BuildConfig {
    /// Config with a single entry and defaults everywhere else.
    pub fn with_entry(entry: impl Into<String>) -> Self {
        Self {
            entry: vec![entry.into()],
            ..Self::default()
        }
    }

    /// Create from a JSON value (programmatic config).
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            hint: Some(e.to_string()),
        })
    }

    /// Project root: the configured one, or `cwd` when unset. Relative roots
    /// are taken relative to `cwd`.
    pub fn root_dir(&self, cwd: &Path) -> PathBuf {
        match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd.to_path_buf(),
        }
    }

    /// Output directory resolved against `root`.
    pub fn output_path(&self, root: &Path) -> PathBuf {
        root.join(&self.output_dir)
    }

    /// Foreign unit directory resolved against `root`.
    pub fn unit_dir(&self, root: &Path) -> Option<PathBuf> {
        self.foreign_compile_unit_dir.as_ref().map(|dir| root.join(dir))
    }

    /// Loader chains with their kind names parsed.
    pub fn loader_chains(&self) -> Result<Vec<(ModuleKind, Vec<String>)>> {
        self.loaders
            .iter()
            .map(|(kind, chain)| {
                let parsed = kind.parse::<ModuleKind>().map_err(|message| {
                    ConfigError::SchemaValidation {
                        message,
                        hint: Some(
                            "Loader chains are keyed by 'script', 'style', 'foreign_compiled' or 'asset'"
                                .to_string(),
                        ),
                    }
                })?;
                Ok((parsed, chain.clone()))
            })
            .collect()
    }

    /// Plugin descriptors that are switched on, in declaration order.
    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.plugins.iter().filter(|plugin| plugin.enabled)
    }
}

/// A plugin referenced by name from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDescriptor {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Plugin-specific options, forwarded untouched to the plugin factory.
    #[serde(default)]
    pub options: Value,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// How the external compiler is invoked for the foreign unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignCompileOptions {
    /// Compiler executable.
    #[serde(default = "default_program")]
    pub program: String,

    /// Full argument list. When unset, `build --target <target> --out-dir
    /// <out_dir> --out-name <out_name> --release|--dev` is used. `{out_dir}`,
    /// `{out_name}` and `{target}` are substituted in custom arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Output directory, relative to the unit directory.
    #[serde(default = "default_compile_out_dir")]
    pub out_dir: PathBuf,

    /// Base name of the produced files. Defaults to the crate's package name
    /// with `-` replaced by `_`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_name: Option<String>,

    #[serde(default = "default_compile_target")]
    pub target: String,

    #[serde(default = "default_true")]
    pub release: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ForeignCompileOptions {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: None,
            out_dir: default_compile_out_dir(),
            out_name: None,
            target: default_compile_target(),
            release: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_output_filename_pattern() -> String {
    DEFAULT_OUTPUT_FILENAME_PATTERN.to_string()
}

fn default_style_filename_pattern() -> String {
    DEFAULT_STYLE_FILENAME_PATTERN.to_string()
}

fn default_asset_filename_pattern() -> String {
    DEFAULT_ASSET_FILENAME_PATTERN.to_string()
}

fn default_public_path() -> String {
    "./".to_string()
}

fn default_html_filename() -> String {
    "index.html".to_string()
}

fn default_true() -> bool {
    true
}

fn default_program() -> String {
    "wasm-pack".to_string()
}

fn default_compile_out_dir() -> PathBuf {
    PathBuf::from("pkg")
}

fn default_compile_target() -> String {
    "web".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}
