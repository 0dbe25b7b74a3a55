//! Plugin hooks and the built-in plugins driven through full builds.

mod helpers;

use std::sync::Arc;

use async_trait::async_trait;
use helpers::{FakeCompiler, app_config, app_project, bundler};
use knit_bundler::{
    AssetKind, BuildManifest, EmittedAsset, ErrorKind, ErrorOrigin, HookName, Plugin,
    PluginContext, PluginFactory, TemplateError,
};
use knit_config::{BuildConfig, InjectionPoint, PluginDescriptor};
use knit_graph::test_utils::MemoryRuntime;
use knit_graph::{ModuleGraph, ModuleId, ModuleNode};
use parking_lot::Mutex;
use serde_json::json;

/// Records every hook call and rewrites `virtual:config` to a real file.
#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn hooks(&self) -> &[HookName] {
        &HookName::ALL
    }

    async fn init(&self, _cx: &mut PluginContext) -> anyhow::Result<()> {
        self.calls.lock().push("init".to_string());
        Ok(())
    }

    async fn before_resolve(
        &self,
        _cx: &mut PluginContext,
        specifier: &str,
        _importer: &ModuleId,
    ) -> anyhow::Result<Option<String>> {
        self.calls.lock().push(format!("before-resolve {specifier}"));
        Ok((specifier == "virtual:config").then(|| "./config.js".to_string()))
    }

    async fn after_load(&self, _cx: &mut PluginContext, module: &ModuleNode) -> anyhow::Result<Vec<String>> {
        self.calls.lock().push(format!("after-load {}", module.id.file_stem()));
        Ok(Vec::new())
    }

    async fn graph_complete(&self, _cx: &mut PluginContext, graph: &ModuleGraph) -> anyhow::Result<()> {
        self.calls.lock().push(format!("graph-complete {}", graph.len()));
        Ok(())
    }

    async fn before_emit(&self, cx: &mut PluginContext, _graph: &ModuleGraph) -> anyhow::Result<()> {
        self.calls.lock().push("before-emit".to_string());
        cx.emit_asset(EmittedAsset::new("build-info.txt", "ok", AssetKind::Other, None));
        Ok(())
    }

    async fn after_emit(&self, _cx: &mut PluginContext, manifest: &BuildManifest) -> anyhow::Result<()> {
        self.calls.lock().push(format!("after-emit {}", manifest.len()));
        Ok(())
    }
}

fn small_project() -> Arc<MemoryRuntime> {
    Arc::new(
        MemoryRuntime::new("/proj")
            .with_file("/proj/src/index.js", "import config from 'virtual:config';\n")
            .with_file("/proj/src/config.js", "export default {};\n"),
    )
}

#[tokio::test]
async fn hooks_run_in_phase_order() {
    let recorder = Arc::new(Recorder::default());
    let output = bundler(BuildConfig::with_entry("src/index.js"), &small_project(), &FakeCompiler::new())
        .plugin(recorder.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(
        *recorder.calls.lock(),
        vec![
            "init",
            "after-load index",
            "before-resolve virtual:config",
            "after-load config",
            "graph-complete 2",
            "before-emit",
            "after-emit 2",
        ]
    );
    // Plugin assets follow everything the emitter produced.
    assert_eq!(output.manifest.filenames().last(), Some(&"build-info.txt"));

    let bundle = output.manifest.entry().unwrap().text();
    assert!(bundle.contains("\"virtual:config\":\"src/config.js\""));
}

#[derive(Debug)]
struct Failing;

#[async_trait]
impl Plugin for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn hooks(&self) -> &[HookName] {
        &[HookName::GraphComplete]
    }

    async fn graph_complete(&self, _cx: &mut PluginContext, _graph: &ModuleGraph) -> anyhow::Result<()> {
        anyhow::bail!("refusing to continue")
    }
}

#[tokio::test]
async fn failing_hook_aborts_with_plugin_and_hook_named() {
    let err = bundler(BuildConfig::with_entry("src/index.js"), &small_project(), &FakeCompiler::new())
        .plugin(Arc::new(Failing))
        .build()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Plugin);
    assert_eq!(
        err.origin(),
        Some(ErrorOrigin::Plugin {
            plugin: "failing".to_string(),
            hook: HookName::GraphComplete,
        })
    );
}

#[tokio::test]
async fn marker_injection_replaces_the_marker() {
    let runtime = Arc::new(
        app_project().with_file(
            "/proj/public/shell.html",
            "<html><body><main>{{ASSETS}}</main></body></html>",
        ),
    );
    let mut config = app_config();
    config.html_template = Some("public/shell.html".into());
    config.html_injection_point = InjectionPoint::Marker("{{ASSETS}}".to_string());

    let output = bundler(config, &runtime, &FakeCompiler::new()).build().await.unwrap();
    let html = output.html.unwrap().content;
    assert!(!html.contains("{{ASSETS}}"));
    assert!(html.starts_with("<html><body><main><link rel=\"stylesheet\""));
    assert!(html.ends_with("</script>\n</main></body></html>"));
}

#[tokio::test]
async fn missing_marker_is_a_template_error() {
    let mut config = app_config();
    config.html_injection_point = InjectionPoint::Marker("{{ASSETS}}".to_string());

    let err = bundler(config, &Arc::new(app_project()), &FakeCompiler::new())
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Template);
    assert!(matches!(
        err,
        knit_bundler::Error::Template(TemplateError::MissingMarker { .. })
    ));
}

#[tokio::test]
async fn configured_html_plugin_overrides_filename() {
    let mut config = app_config();
    config.plugins = vec![PluginDescriptor::new("html").with_options(json!({ "filename": "app.html" }))];

    let output = bundler(config, &Arc::new(app_project()), &FakeCompiler::new())
        .build()
        .await
        .unwrap();
    assert_eq!(output.html.unwrap().filename, "app.html");
}

#[tokio::test]
async fn copy_plugin_from_config_adds_static_files() {
    let runtime = Arc::new(
        app_project()
            .with_file("/proj/static/robots.txt", "User-agent: *")
            .with_file("/proj/static/icons/a.svg", "<svg/>"),
    );
    let mut config = app_config();
    config.plugins = vec![PluginDescriptor::new("copy").with_options(json!({
        "patterns": [{ "from": "static" }]
    }))];

    let output = bundler(config, &runtime, &FakeCompiler::new()).build().await.unwrap();
    let robots = output.manifest.get("robots.txt").unwrap();
    assert_eq!(robots.kind, AssetKind::Other);
    assert_eq!(robots.content, b"User-agent: *");
    assert!(output.manifest.get("icons/a.svg").is_some());
    // Copied files are not referenced from the HTML shell.
    assert!(!output.html.unwrap().content.contains("robots.txt"));
}

#[tokio::test]
async fn disabled_and_unknown_plugins() {
    let mut config = BuildConfig::with_entry("src/index.js");
    let mut disabled = PluginDescriptor::new("no-such-plugin");
    disabled.enabled = false;
    config.plugins = vec![disabled];
    assert!(
        bundler(config.clone(), &small_project(), &FakeCompiler::new())
            .build()
            .await
            .is_ok()
    );

    config.plugins[0].enabled = true;
    let err = bundler(config, &small_project(), &FakeCompiler::new())
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn custom_factories_make_plugins_configurable() {
    let recorder = Arc::new(Recorder::default());
    let mut factory = PluginFactory::with_builtins();
    let shared = recorder.clone();
    factory.register("recorder", move |_options: &serde_json::Value| {
        let plugin: Arc<dyn Plugin> = shared.clone();
        Ok(plugin)
    });

    let mut config = BuildConfig::with_entry("src/index.js");
    config.plugins = vec![PluginDescriptor::new("recorder")];
    bundler(config, &small_project(), &FakeCompiler::new())
        .plugin_factory(factory)
        .build()
        .await
        .unwrap();

    assert_eq!(recorder.calls.lock().first().map(String::as_str), Some("init"));
}
