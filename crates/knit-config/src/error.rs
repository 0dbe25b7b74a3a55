//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    // Filesystem validation errors
    #[error("entry path not found: {}", path.display())]
    EntryNotFound { path: PathBuf },

    #[error("html template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("foreign compile unit not found: {} (expected a directory containing Cargo.toml)", path.display())]
    UnitNotFound { path: PathBuf },

    // Config parsing/loading errors
    #[error("config not found")]
    NotFound,

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid config value for '{field}'")]
    InvalidValue { field: String, hint: Option<String> },

    // Schema validation errors (no filesystem checks)
    #[error("no entries specified")]
    NoEntries,

    #[error("schema validation failed: {message}")]
    SchemaValidation {
        message: String,
        hint: Option<String>,
    },

    #[error("unknown loader '{name}' in chain for '{kind}'")]
    UnknownLoader { kind: String, name: String },

    #[error("unknown plugin '{name}'")]
    UnknownPlugin { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Human-readable suggestion for fixing the error, when one exists.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { hint, .. } | Self::SchemaValidation { hint, .. } => {
                hint.as_deref()
            }
            Self::NoEntries => Some("Add at least one path to 'entry', e.g. entry = [\"src/index.js\"]"),
            Self::NotFound => Some("Create knit.toml or add a 'knit' field to package.json"),
            Self::UnknownLoader { .. } => Some("Register the loader before building, or fix the name"),
            Self::UnknownPlugin { .. } => Some("Built-in plugins are 'html' and 'copy'; register a factory for others"),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        let field = err
            .path
            .last()
            .cloned()
            .unwrap_or_else(|| "configuration".to_string());
        Self::InvalidValue {
            field,
            hint: Some(err.to_string()),
        }
    }
}
