//! Pluggable config validation strategies
//!
//! Schema validation needs nothing but the config itself; filesystem
//! validation additionally checks that referenced paths exist.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::{ConfigError, Result};

/// Trait for pluggable config validation strategies
pub trait ConfigValidator {
    fn validate(&self, config: &BuildConfig) -> Result<()>;
}

/// Schema-only validation (no filesystem checks)
pub struct SchemaValidator;

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &BuildConfig) -> Result<()> {
        if config.entry.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        if config.entry.iter().any(|entry| entry.trim().is_empty()) {
            return Err(ConfigError::SchemaValidation {
                message: "entry specifiers cannot be empty".to_string(),
                hint: Some("Remove empty strings from the 'entry' array".to_string()),
            });
        }

        check_pattern(
            "output_filename_pattern",
            &config.output_filename_pattern,
            &["[name]", "[contenthash]"],
        )?;
        check_pattern(
            "style_filename_pattern",
            &config.style_filename_pattern,
            &["[name]", "[contenthash]"],
        )?;
        check_pattern(
            "asset_filename_pattern",
            &config.asset_filename_pattern,
            &["[name]", "[contenthash]", "[ext]"],
        )?;

        if config.html_filename.trim().is_empty() || config.html_filename.contains(['/', '\\']) {
            return Err(ConfigError::SchemaValidation {
                message: format!("invalid html_filename '{}'", config.html_filename),
                hint: Some("Use a plain file name such as 'index.html'".to_string()),
            });
        }

        config.loader_chains()?;

        let mut seen = HashSet::new();
        for plugin in &config.plugins {
            if plugin.name.trim().is_empty() {
                return Err(ConfigError::SchemaValidation {
                    message: "plugin name cannot be empty".to_string(),
                    hint: Some("Give every entry in 'plugins' a name".to_string()),
                });
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(ConfigError::SchemaValidation {
                    message: format!("plugin '{}' is listed more than once", plugin.name),
                    hint: Some("Merge the options into a single plugin entry".to_string()),
                });
            }
        }

        for (prefix, target) in &config.alias {
            if prefix.is_empty() || target.is_empty() {
                return Err(ConfigError::SchemaValidation {
                    message: "alias prefixes and targets cannot be empty".to_string(),
                    hint: None,
                });
            }
        }

        if config.foreign_compile.timeout_secs == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "foreign_compile.timeout_secs must be greater than zero".to_string(),
                hint: None,
            });
        }

        Ok(())
    }
}

/// Placeholders in brackets must be among `allowed`; patterns may not contain
/// path separators.
fn check_pattern(field: &str, pattern: &str, allowed: &[&str]) -> Result<()> {
    if pattern.trim().is_empty() || pattern.contains(['/', '\\']) {
        return Err(ConfigError::SchemaValidation {
            message: format!("{field} '{pattern}' is not a plain file name pattern"),
            hint: Some("Patterns name a single file, e.g. '[name].[contenthash].js'".to_string()),
        });
    }

    let mut rest = pattern;
    while let Some(start) = rest.find('[') {
        let Some(len) = rest[start..].find(']') else {
            return Err(ConfigError::SchemaValidation {
                message: format!("{field} '{pattern}' has an unclosed placeholder"),
                hint: None,
            });
        };
        let placeholder = &rest[start..start + len + 1];
        if !allowed.contains(&placeholder) {
            return Err(ConfigError::SchemaValidation {
                message: format!("{field} uses unknown placeholder {placeholder}"),
                hint: Some(format!("Supported placeholders: {}", allowed.join(", "))),
            });
        }
        rest = &rest[start + len + 1..];
    }
    Ok(())
}

/// Filesystem validator
///
/// Runs [`SchemaValidator`] first, then checks that entries, the HTML template
/// and the foreign unit exist below `root`.
pub struct FsValidator {
    root: PathBuf,
}

impl FsValidator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ConfigValidator for FsValidator {
    fn validate(&self, config: &BuildConfig) -> Result<()> {
        SchemaValidator.validate(config)?;

        for entry in &config.entry {
            // Bare package entries are left to the resolver.
            let looks_like_path = entry.starts_with('.') || entry.starts_with('/') || entry.contains('/');
            let path = self.root.join(entry);
            if looks_like_path && !path.exists() && !has_probe_match(&path) {
                return Err(ConfigError::EntryNotFound { path });
            }
        }

        if let Some(template) = &config.html_template {
            let path = self.root.join(template);
            if !path.is_file() {
                return Err(ConfigError::TemplateNotFound { path });
            }
        }

        if let Some(unit) = config.unit_dir(&self.root) {
            if !unit.join("Cargo.toml").is_file() {
                return Err(ConfigError::UnitNotFound { path: unit });
            }
        }

        Ok(())
    }
}

/// Entries may omit their extension (`./src/index`).
fn has_probe_match(path: &Path) -> bool {
    ["js", "mjs", "cjs", "jsx", "ts", "tsx", "css"]
        .iter()
        .any(|ext| {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(ext);
            Path::new(&candidate).is_file()
        })
}

/// Convenience function for schema-only validation
pub fn validate_schema(config: &BuildConfig) -> Result<()> {
    SchemaValidator.validate(config)
}

/// Convenience function for filesystem validation
pub fn validate_fs(config: &BuildConfig, root: impl AsRef<Path>) -> Result<()> {
    FsValidator::new(root).validate(config)
}
