//! Stylesheet loader backed by lightningcss.
//!
//! [`CssLoader`] parses every style module it sees, optionally minifies it and
//! prints it back. It runs in the `style` loader chain like any other loader,
//! so `@import` and `url()` references survive and are still picked up by
//! dependency extraction afterwards.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use knit_bundler::Bundler;
//! use knit_config::BuildConfig;
//! use knit_plugin_css::CssLoader;
//!
//! let mut config = BuildConfig::with_entry("src/index.js");
//! config.loaders.insert("style".into(), vec!["css-minify".into()]);
//! let bundler = Bundler::new(config).loader(Arc::new(CssLoader::new()));
//! # let _ = bundler;
//! ```

use knit_bundler::{Loader, LoaderContext};
use knit_graph::ModuleKind;
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use serde::Deserialize;
use tracing::debug;

/// Options for [`CssLoader`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CssOptions {
    pub minify: bool,
    /// Only modules whose path contains one of these substrings are
    /// processed. Empty means every style module.
    pub include: Vec<String>,
    /// Modules whose path contains one of these substrings pass through
    /// untouched. Checked before `include`.
    pub exclude: Vec<String>,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            minify: true,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl CssOptions {
    pub fn with_minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }
}

/// The `css-minify` loader.
#[derive(Debug, Clone, Default)]
pub struct CssLoader {
    options: CssOptions,
}

impl CssLoader {
    pub const NAME: &'static str = "css-minify";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CssOptions) -> Self {
        Self { options }
    }

    /// Build from a JSON options object such as `{ "minify": false }`.
    pub fn from_value(options: &serde_json::Value) -> anyhow::Result<Self> {
        let options = if options.is_null() {
            CssOptions::default()
        } else {
            CssOptions::deserialize(options)?
        };
        Ok(Self::with_options(options))
    }

    pub fn options(&self) -> &CssOptions {
        &self.options
    }

    fn should_process(&self, path: &str) -> bool {
        if self.options.exclude.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }
        self.options.include.is_empty() || self.options.include.iter().any(|p| path.contains(p.as_str()))
    }

    /// Parse `source` and print it back, minified when enabled.
    pub fn process(&self, filename: &str, source: &str) -> anyhow::Result<String> {
        let mut stylesheet = StyleSheet::parse(
            source,
            ParserOptions {
                filename: filename.to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("failed to parse {filename}: {e}"))?;

        if self.options.minify {
            stylesheet
                .minify(MinifyOptions::default())
                .map_err(|e| anyhow::anyhow!("failed to minify {filename}: {e}"))?;
        }

        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: self.options.minify,
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow::anyhow!("failed to print {filename}: {e}"))?;
        Ok(printed.code)
    }
}

impl Loader for CssLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&self, content: Vec<u8>, cx: &LoaderContext<'_>) -> anyhow::Result<Vec<u8>> {
        let path = cx.module_id.path_string();
        if cx.kind != ModuleKind::Style || !self.should_process(&path) {
            return Ok(content);
        }

        let source = String::from_utf8(content)?;
        let processed = self.process(&path, &source)?;
        debug!(
            module = %cx.module_id,
            before = source.len(),
            after = processed.len(),
            minify = self.options.minify,
            "processed stylesheet"
        );
        Ok(processed.into_bytes())
    }
}
