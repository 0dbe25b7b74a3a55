use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use knit_config::{ConfigError, PluginDescriptor};
use serde_json::Value;

use super::{CopyPlugin, HtmlPlugin, HtmlPluginOptions, Plugin};

/// Builds a plugin from its descriptor options.
pub type PluginConstructor = Arc<dyn Fn(&Value) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Maps plugin names used in configuration to constructors.
#[derive(Clone, Default)]
pub struct PluginFactory {
    constructors: IndexMap<String, PluginConstructor>,
}

impl PluginFactory {
    /// A factory that knows no plugins.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A factory with the built-in `html` and `copy` plugins.
    pub fn with_builtins() -> Self {
        let mut factory = Self::empty();
        factory.register("html", |options: &Value| {
            let plugin: Arc<dyn Plugin> = Arc::new(HtmlPlugin::new(HtmlPluginOptions::from_value(options)?));
            Ok(plugin)
        });
        factory.register("copy", |options: &Value| {
            let plugin: Arc<dyn Plugin> = Arc::new(CopyPlugin::from_value(options)?);
            Ok(plugin)
        });
        factory
    }

    /// Add or replace the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate the plugin a descriptor names.
    pub fn create(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>, ConfigError> {
        let constructor =
            self.constructors
                .get(&descriptor.name)
                .ok_or_else(|| ConfigError::UnknownPlugin {
                    name: descriptor.name.clone(),
                })?;
        constructor(&descriptor.options).map_err(|err| ConfigError::InvalidValue {
            field: format!("plugins.{}.options", descriptor.name),
            hint: Some(format!("{err:#}")),
        })
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactory")
            .field("plugins", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
