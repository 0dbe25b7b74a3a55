use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use knit_config::InjectionPoint;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{HookName, Plugin, PluginContext};
use crate::emitter::BuildManifest;
use crate::html::{DEFAULT_TEMPLATE, inject};

/// Options accepted under `plugins = [{ name = "html", options = { ... } }]`.
/// Each one overrides the matching top-level config key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlPluginOptions {
    /// Template path, relative to the project root.
    pub template: Option<PathBuf>,
    pub filename: Option<String>,
    pub inject: Option<InjectionPoint>,
}

impl HtmlPluginOptions {
    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).context("invalid html plugin options")
    }
}

/// Produces the HTML shell from the final manifest.
#[derive(Debug, Clone, Default)]
pub struct HtmlPlugin {
    options: HtmlPluginOptions,
}

impl HtmlPlugin {
    pub fn new(options: HtmlPluginOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    fn hooks(&self) -> &[HookName] {
        &[HookName::AfterEmit]
    }

    async fn after_emit(&self, cx: &mut PluginContext, manifest: &BuildManifest) -> anyhow::Result<()> {
        let template = match &self.options.template {
            Some(path) => {
                let path = cx.root.join(path);
                let bytes = cx
                    .runtime
                    .read_file(&path)
                    .await
                    .with_context(|| format!("failed to read HTML template {}", path.display()))?;
                String::from_utf8(bytes).context("HTML template is not valid UTF-8")?
            }
            None => cx
                .html_template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        };

        let point = self
            .options
            .inject
            .clone()
            .unwrap_or_else(|| cx.injection_point.clone());
        let html = inject(&template, manifest, &point, &cx.public_path)?;

        if let Some(filename) = &self.options.filename {
            cx.html_filename = filename.clone();
        }
        debug!(filename = %cx.html_filename, bytes = html.len(), "generated HTML shell");
        cx.html = Some(html);
        Ok(())
    }
}
