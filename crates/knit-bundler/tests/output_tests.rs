//! Writing build results to an output directory.

mod helpers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use helpers::{BINARY, FakeCompiler, app_config, app_project, bundler};
use knit_bundler::{Error, WriteOptions};
use knit_graph::NativeRuntime;

#[tokio::test]
async fn writes_manifest_and_html_into_the_output_dir() {
    let runtime = Arc::new(app_project());
    let output = bundler(app_config(), &runtime, &FakeCompiler::new())
        .build()
        .await
        .unwrap();
    assert_eq!(output.output_dir, Path::new("/proj/dist"));

    let written = output.write(runtime.as_ref(), output.write_options).await.unwrap();
    assert_eq!(written.len(), output.manifest.len() + 1);
    assert_eq!(written.last().unwrap(), Path::new("/proj/dist/index.html"));

    for asset in output.manifest.assets() {
        let path = PathBuf::from("/proj/dist").join(&asset.filename);
        assert_eq!(runtime.file(&path).as_deref(), Some(asset.content.as_slice()));
    }
    let binary = output
        .manifest
        .assets()
        .iter()
        .find(|a| a.filename.ends_with(".wasm"))
        .unwrap();
    assert_eq!(binary.content, BINARY);
}

#[tokio::test]
async fn clean_from_config_drops_stale_output() {
    let runtime = Arc::new(app_project().with_file("/proj/dist/bundle.old.js", "stale"));
    let mut config = app_config();
    config.clean = true;

    let output = bundler(config, &runtime, &FakeCompiler::new()).build().await.unwrap();
    assert!(output.write_options.clean);
    output.write(runtime.as_ref(), output.write_options).await.unwrap();

    assert!(runtime.file("/proj/dist/bundle.old.js").is_none());
    assert!(runtime.file("/proj/dist/index.html").is_some());
}

#[tokio::test]
async fn second_write_without_overwrite_fails() {
    let runtime = Arc::new(app_project());
    let output = bundler(app_config(), &runtime, &FakeCompiler::new())
        .build()
        .await
        .unwrap();
    let keep = WriteOptions {
        clean: false,
        overwrite: false,
    };

    output.write(runtime.as_ref(), keep).await.unwrap();
    let err = output.write(runtime.as_ref(), keep).await.unwrap_err();
    assert!(matches!(err, Error::OutputExists(_)));
}

#[tokio::test]
async fn writes_to_a_real_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = bundler(app_config(), &Arc::new(app_project()), &FakeCompiler::new())
        .build()
        .await
        .unwrap();

    output
        .write_to(&NativeRuntime, dir.path(), WriteOptions::default())
        .await
        .unwrap();

    let html = std::fs::read_to_string(dir.path().join("index.html")).unwrap();
    let script = output.manifest.entry().unwrap();
    assert!(html.contains(&script.filename));
    assert_eq!(std::fs::read(dir.path().join(&script.filename)).unwrap(), script.content);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
