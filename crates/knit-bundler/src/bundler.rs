use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use knit_config::{BuildConfig, ConfigError, validate_schema};
use knit_graph::{NativeRuntime, Runtime};
use path_clean::PathClean;
use tracing::{debug, info};

use crate::bridge::{CompilerBridge, ForeignCompiler, WasmPackCompiler};
use crate::emitter::{EmitOptions, emit};
use crate::graph_builder::GraphBuilder;
use crate::loaders::{Loader, LoaderRegistry};
use crate::output::{BuildOutput, HtmlDocument, WriteOptions};
use crate::plugins::{HtmlPlugin, Plugin, PluginContext, PluginDriver, PluginFactory};
use crate::resolver::{ForeignUnitLayout, Resolver, ResolverOptions};
use crate::{Error, Result};

/// Runs builds for one configuration.
///
/// Every [`build`](Bundler::build) starts from scratch: a fresh plugin
/// context, resolver and compiler bridge. Nothing is cached between builds.
///
/// ```no_run
/// use std::sync::Arc;
/// use knit_bundler::{Bundler, FnLoader, LoaderContext};
/// use knit_config::BuildConfig;
///
/// # async fn run() -> knit_bundler::Result<()> {
/// let mut config = BuildConfig::with_entry("src/index.js");
/// config.loaders.insert("style".into(), vec!["banner".into()]);
///
/// let output = Bundler::new(config)
///     .loader(Arc::new(FnLoader::new("banner", |css: Vec<u8>, _cx: &LoaderContext<'_>| {
///         Ok([b"/* built by knit */\n".as_slice(), css.as_slice()].concat())
///     })))
///     .build()
///     .await?;
/// # let _ = output;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Bundler {
    config: BuildConfig,
    runtime: Arc<dyn Runtime>,
    compiler: Option<Arc<dyn ForeignCompiler>>,
    loaders: LoaderRegistry,
    plugins: Vec<Arc<dyn Plugin>>,
    factory: PluginFactory,
}

impl Bundler {
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            runtime: Arc::new(NativeRuntime),
            compiler: None,
            loaders: LoaderRegistry::new(),
            plugins: Vec::new(),
            factory: PluginFactory::with_builtins(),
        }
    }

    /// Filesystem used for every read and for compiler outputs.
    pub fn runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replace the wasm-pack compiler.
    pub fn compiler(mut self, compiler: Arc<dyn ForeignCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Make a loader available to the `loaders` chains.
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loaders.register(loader);
        self
    }

    /// Add a plugin instance. Instances run after the plugins named in the
    /// configuration, in the order they were added.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Replace the factory that turns configured plugin names into plugins.
    pub fn plugin_factory(mut self, factory: PluginFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build until `abort` completes. An aborted build cancels its compile
    /// jobs, kills the compiler process and returns [`Error::Cancelled`].
    pub async fn build_with_abort<F>(&self, abort: F) -> Result<BuildOutput>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = abort => {
                info!("build aborted");
                Err(Error::Cancelled)
            }
            result = self.build() => result,
        }
    }

    pub async fn build(&self) -> Result<BuildOutput> {
        let started = Instant::now();
        let config = &self.config;
        validate_schema(config)?;

        let root = config.root_dir(&self.runtime.get_cwd()?).clean();
        self.check_unit(&root).await?;

        let mut loaders = self.loaders.clone();
        loaders.from_config(&config.loaders)?;
        let driver = self.plugin_driver()?;

        let mut cx = PluginContext::new(config, &root, Arc::clone(&self.runtime));
        cx.html_template = self.read_template(&root).await?;
        driver.run_init(&mut cx).await?;

        let resolver = Resolver::new(
            ResolverOptions {
                root: root.clone(),
                alias: config.alias.clone(),
                foreign_unit: config
                    .unit_dir(&root)
                    .map(|dir| ForeignUnitLayout::new(dir, &config.foreign_compile.out_dir)),
            },
            Arc::clone(&self.runtime),
        );
        let compiler = self.compiler.clone().unwrap_or_else(|| {
            Arc::new(WasmPackCompiler::from_options(
                &config.foreign_compile,
                Arc::clone(&self.runtime),
            ))
        });
        let bridge = CompilerBridge::new(compiler);

        let graph = GraphBuilder::new(
            &resolver,
            &loaders,
            &driver,
            &bridge,
            &config.foreign_compile,
            Arc::clone(&self.runtime),
        )
        .build(&config.entry, &mut cx)
        .await?;

        driver.run_graph_complete(&mut cx, &graph).await?;
        driver.run_before_emit(&mut cx, &graph).await?;

        let mut manifest = emit(&graph, &EmitOptions::from_config(config, &root))?;
        for asset in std::mem::take(&mut cx.extra_assets) {
            manifest.push(asset)?;
        }

        driver.run_after_emit(&mut cx, &manifest).await?;
        for asset in std::mem::take(&mut cx.extra_assets) {
            manifest.push(asset)?;
        }

        let html = cx.html.take().map(|content| HtmlDocument {
            filename: cx.html_filename.clone(),
            content,
        });

        info!(
            modules = graph.len(),
            assets = manifest.len(),
            html = html.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build complete"
        );

        Ok(BuildOutput {
            graph,
            manifest,
            html,
            output_dir: cx.output_dir,
            write_options: WriteOptions {
                clean: config.clean,
                ..WriteOptions::default()
            },
        })
    }

    /// Configured plugins, then added instances. An `html_template` without a
    /// configured `html` plugin gets the default one.
    fn plugin_driver(&self) -> Result<PluginDriver> {
        let mut driver = PluginDriver::new();
        let mut has_html = false;

        let configured = self
            .config
            .enabled_plugins()
            .map(|descriptor| self.factory.create(descriptor))
            .collect::<std::result::Result<Vec<_>, ConfigError>>()?;

        for plugin in configured.into_iter().chain(self.plugins.iter().cloned()) {
            has_html |= plugin.name() == "html";
            debug!(plugin = plugin.name(), hooks = ?plugin.hooks(), "registering plugin");
            driver.register_plugin(plugin);
        }

        if !has_html && self.config.html_template.is_some() {
            driver.register_plugin(Arc::new(HtmlPlugin::default()));
        }
        Ok(driver)
    }

    async fn check_unit(&self, root: &Path) -> Result<()> {
        let Some(dir) = self.config.unit_dir(root) else {
            return Ok(());
        };
        if !self.runtime.is_file(&dir.join("Cargo.toml")).await {
            return Err(ConfigError::UnitNotFound { path: dir }.into());
        }
        Ok(())
    }

    async fn read_template(&self, root: &Path) -> Result<Option<String>> {
        let Some(template) = &self.config.html_template else {
            return Ok(None);
        };
        let path = root.join(template).clean();
        let bytes = match self.runtime.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                return Err(ConfigError::TemplateNotFound { path }.into());
            }
            Err(err) => return Err(err.into()),
        };
        String::from_utf8(bytes).map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                field: "html_template".to_string(),
                hint: Some(format!("{} is not valid UTF-8: {e}", path.display())),
            }
            .into()
        })
    }
}
