//! Layered configuration loading.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults ([`BuildConfig::default`])
//! 2. the project config file: `knit.toml`, `knit.config.json`, or the `knit`
//!    field of `package.json` (first one found wins)
//! 3. `KNIT_*` environment variables (`KNIT_OUTPUT_DIR=build`,
//!    `KNIT_FOREIGN_COMPILE__RELEASE=false`)
//!
//! Config files may spell keys in camelCase (`outputDir`); they are folded to
//! snake_case before merging so both spellings land on the same field.

use std::fs;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{ConfigError, Result};

pub const TOML_CONFIG_FILE: &str = "knit.toml";
pub const JSON_CONFIG_FILE: &str = "knit.config.json";
pub const PACKAGE_JSON_FIELD: &str = "knit";

const ENV_PREFIX: &str = "KNIT_";

/// Top-level keys the environment layer may set. Anything else carrying the
/// prefix (e.g. `KNIT_LOG`) belongs to someone else.
const ENV_KEYS: &[&str] = &[
    "entry",
    "root",
    "output_dir",
    "output_filename_pattern",
    "style_filename_pattern",
    "asset_filename_pattern",
    "public_path",
    "clean",
    "html_template",
    "html_filename",
    "html_injection_point",
    "foreign_compile_unit_dir",
    "foreign_compile",
];

/// Finds and merges configuration sources for one project directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    root: PathBuf,
    file: Option<PathBuf>,
    use_env: bool,
}

impl ConfigLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file: None,
            use_env: true,
        }
    }

    /// Use this file instead of discovering one.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(self.root.join(path));
        self
    }

    /// Skip the environment layer.
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Find a config file in the root directory.
    ///
    /// Searches `knit.toml`, then `knit.config.json`, then a `package.json`
    /// carrying a non-null `knit` field.
    pub fn find(&self) -> Option<PathBuf> {
        for name in [TOML_CONFIG_FILE, JSON_CONFIG_FILE] {
            let path = self.root.join(name);
            if path.is_file() {
                return Some(path);
            }
        }

        let pkg_path = self.root.join("package.json");
        let content = fs::read_to_string(&pkg_path).ok()?;
        let parsed: Value = serde_json::from_str(&content).ok()?;
        parsed
            .get(PACKAGE_JSON_FIELD)
            .is_some_and(|field| !field.is_null())
            .then_some(pkg_path)
    }

    /// The merged figment, before extraction.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(BuildConfig::default()));

        let file = match &self.file {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound),
            Some(path) => Some(path.clone()),
            None => self.find(),
        };

        if let Some(path) = file {
            debug!(path = %path.display(), "loading config file");
            let value = read_config_file(&path)?;
            figment = figment.merge(Serialized::defaults(normalize_keys(value)));
        }

        if self.use_env {
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX).split("__").filter(|key| {
                    let head = key.as_str().split('.').next().unwrap_or_default();
                    ENV_KEYS.iter().any(|known| head.eq_ignore_ascii_case(known))
                }),
            );
        }

        Ok(figment)
    }

    /// Load and merge every layer. The returned config always has `root` set.
    pub fn load(&self) -> Result<BuildConfig> {
        let mut config: BuildConfig = self.figment()?.extract()?;
        config.root = Some(config.root_dir(&self.root));
        Ok(config)
    }
}

/// Load configuration for the current working directory.
pub fn discover() -> Result<BuildConfig> {
    let root = std::env::current_dir()?;
    ConfigLoader::new(root).load()
}

fn read_config_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if file_name == "package.json" {
        let parsed: Value = serde_json::from_str(&content).map_err(|e| ConfigError::InvalidValue {
            field: "package.json".to_string(),
            hint: Some(format!("Invalid JSON: {e}")),
        })?;
        return match parsed.get(PACKAGE_JSON_FIELD) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(ConfigError::InvalidValue {
                field: PACKAGE_JSON_FIELD.to_string(),
                hint: Some("Add a 'knit' object to your package.json".to_string()),
            }),
        };
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            let parsed: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::InvalidValue {
                field: "toml".to_string(),
                hint: Some(format!("Invalid TOML syntax: {e}")),
            })?;
            serde_json::to_value(parsed).map_err(|e| ConfigError::InvalidValue {
                field: "toml".to_string(),
                hint: Some(format!("TOML to JSON conversion failed: {e}")),
            })
        }
        Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::InvalidValue {
            field: file_name,
            hint: Some(format!("Invalid JSON: {e}")),
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Fold camelCase keys of the structural objects to snake_case. Maps whose
/// keys are user data (`loaders`, `alias`, plugin `options`) are left alone.
fn normalize_keys(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };

    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let key = camel_to_snake(&key);
        let value = match (key.as_str(), value) {
            ("foreign_compile", Value::Object(inner)) => Value::Object(rename_keys(inner)),
            ("plugins", Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(inner) => Value::Object(rename_keys(inner)),
                        other => other,
                    })
                    .collect(),
            ),
            (_, value) => value,
        };
        out.insert(key, value);
    }
    Value::Object(out)
}

fn rename_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| (camel_to_snake(&key), value))
        .collect()
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_folding() {
        assert_eq!(camel_to_snake("outputFilenamePattern"), "output_filename_pattern");
        assert_eq!(camel_to_snake("output_dir"), "output_dir");
        assert_eq!(camel_to_snake("clean"), "clean");
    }

    #[test]
    fn normalize_leaves_user_maps_alone() {
        let value = normalize_keys(json!({
            "publicPath": "/static/",
            "alias": { "myLib": "src/lib" },
            "foreignCompile": { "outDir": "pkg2" },
            "plugins": [{ "name": "copy", "options": { "fromDir": "static" } }]
        }));

        assert_eq!(value["public_path"], json!("/static/"));
        assert_eq!(value["alias"]["myLib"], json!("src/lib"));
        assert_eq!(value["foreign_compile"]["out_dir"], json!("pkg2"));
        assert_eq!(value["plugins"][0]["options"]["fromDir"], json!("static"));
    }
}
