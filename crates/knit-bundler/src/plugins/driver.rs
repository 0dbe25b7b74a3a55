use std::sync::Arc;

use knit_graph::{ModuleGraph, ModuleId, ModuleNode};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{HookName, Plugin, PluginContext, PluginError};
use crate::emitter::BuildManifest;

/// Ordered handler lists, one per hook.
#[derive(Debug, Clone, Default)]
pub struct PluginDriver {
    handlers: FxHashMap<HookName, Vec<Arc<dyn Plugin>>>,
}

impl PluginDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `plugin` to the handlers of `hook`.
    pub fn register(&mut self, hook: HookName, plugin: Arc<dyn Plugin>) {
        self.handlers.entry(hook).or_default().push(plugin);
    }

    /// Register `plugin` for every hook it declares.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        for hook in plugin.hooks() {
            self.register(*hook, Arc::clone(&plugin));
        }
    }

    pub fn handlers(&self, hook: HookName) -> &[Arc<dyn Plugin>] {
        self.handlers.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_handlers(&self, hook: HookName) -> bool {
        !self.handlers(hook).is_empty()
    }

    /// Names of the plugins registered for `hook`, in run order.
    pub fn plugin_names(&self, hook: HookName) -> Vec<&str> {
        self.handlers(hook).iter().map(|p| p.name()).collect()
    }

    pub async fn run_init(&self, cx: &mut PluginContext) -> Result<(), PluginError> {
        for plugin in self.handlers(HookName::Init) {
            trace!(plugin = plugin.name(), "init");
            plugin
                .init(cx)
                .await
                .map_err(|e| PluginError::new(HookName::Init, plugin.name(), e))?;
        }
        Ok(())
    }

    /// Thread `specifier` through every before-resolve handler; each sees the
    /// previous handler's rewrite.
    pub async fn run_before_resolve(
        &self,
        cx: &mut PluginContext,
        specifier: &str,
        importer: &ModuleId,
    ) -> Result<String, PluginError> {
        let mut current = specifier.to_string();
        for plugin in self.handlers(HookName::BeforeResolve) {
            let rewritten = plugin
                .before_resolve(cx, &current, importer)
                .await
                .map_err(|e| PluginError::new(HookName::BeforeResolve, plugin.name(), e))?;
            if let Some(rewritten) = rewritten {
                trace!(plugin = plugin.name(), from = %current, to = %rewritten, "specifier rewritten");
                current = rewritten;
            }
        }
        Ok(current)
    }

    /// Extra specifiers from every after-load handler, in handler order.
    pub async fn run_after_load(
        &self,
        cx: &mut PluginContext,
        module: &ModuleNode,
    ) -> Result<Vec<String>, PluginError> {
        let mut extra = Vec::new();
        for plugin in self.handlers(HookName::AfterLoad) {
            let added = plugin
                .after_load(cx, module)
                .await
                .map_err(|e| PluginError::new(HookName::AfterLoad, plugin.name(), e))?;
            extra.extend(added);
        }
        Ok(extra)
    }

    pub async fn run_graph_complete(
        &self,
        cx: &mut PluginContext,
        graph: &ModuleGraph,
    ) -> Result<(), PluginError> {
        for plugin in self.handlers(HookName::GraphComplete) {
            plugin
                .graph_complete(cx, graph)
                .await
                .map_err(|e| PluginError::new(HookName::GraphComplete, plugin.name(), e))?;
        }
        Ok(())
    }

    pub async fn run_before_emit(
        &self,
        cx: &mut PluginContext,
        graph: &ModuleGraph,
    ) -> Result<(), PluginError> {
        for plugin in self.handlers(HookName::BeforeEmit) {
            plugin
                .before_emit(cx, graph)
                .await
                .map_err(|e| PluginError::new(HookName::BeforeEmit, plugin.name(), e))?;
        }
        Ok(())
    }

    pub async fn run_after_emit(
        &self,
        cx: &mut PluginContext,
        manifest: &BuildManifest,
    ) -> Result<(), PluginError> {
        for plugin in self.handlers(HookName::AfterEmit) {
            plugin
                .after_emit(cx, manifest)
                .await
                .map_err(|e| PluginError::new(HookName::AfterEmit, plugin.name(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knit_config::BuildConfig;
    use knit_graph::test_utils::MemoryRuntime;
    use parking_lot::Mutex;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn hooks(&self) -> &[HookName] {
            &[HookName::Init, HookName::BeforeResolve, HookName::GraphComplete]
        }

        async fn init(&self, cx: &mut PluginContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:init", self.name));
            cx.variables.insert(self.name.to_string(), true.into());
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }

        async fn before_resolve(
            &self,
            _cx: &mut PluginContext,
            specifier: &str,
            _importer: &ModuleId,
        ) -> anyhow::Result<Option<String>> {
            Ok(Some(format!("{specifier}+{}", self.name)))
        }
    }

    fn context() -> PluginContext {
        PluginContext::new(
            &BuildConfig::default(),
            "/proj",
            Arc::new(MemoryRuntime::new("/proj")),
        )
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail,
        })
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.register_plugin(recorder("first", &log, false));
        driver.register_plugin(recorder("second", &log, false));

        let mut cx = context();
        driver.run_init(&mut cx).await.unwrap();
        assert_eq!(*log.lock(), vec!["first:init", "second:init"]);
        assert_eq!(cx.variables.len(), 2);

        let importer = ModuleId::new("/proj/a.js").unwrap();
        let spec = driver
            .run_before_resolve(&mut cx, "./x", &importer)
            .await
            .unwrap();
        assert_eq!(spec, "./x+first+second");
    }

    #[tokio::test]
    async fn failure_names_hook_and_plugin_and_stops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.register_plugin(recorder("broken", &log, true));
        driver.register_plugin(recorder("never", &log, false));

        let err = driver.run_init(&mut context()).await.unwrap_err();
        assert_eq!(err.hook, HookName::Init);
        assert_eq!(err.plugin, "broken");
        assert_eq!(*log.lock(), vec!["broken:init"]);
    }

    #[tokio::test]
    async fn explicit_registration_only_wires_that_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut driver = PluginDriver::new();
        driver.register(HookName::GraphComplete, recorder("only", &log, false));

        assert!(!driver.has_handlers(HookName::Init));
        assert_eq!(driver.plugin_names(HookName::GraphComplete), vec!["only"]);
        driver.run_init(&mut context()).await.unwrap();
        assert!(log.lock().is_empty());
    }
}
