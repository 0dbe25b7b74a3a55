//! Build results and writing them to disk.

pub mod writer;

use std::path::{Path, PathBuf};

use knit_graph::{ModuleGraph, Runtime};

use crate::Result;
use crate::emitter::BuildManifest;

pub use writer::{WriteOptions, write_files};

/// The generated HTML shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    /// Output-relative filename, `index.html` unless configured otherwise.
    pub filename: String,
    pub content: String,
}

/// Everything one build produced. Nothing is on disk until [`write`] is
/// called.
///
/// [`write`]: BuildOutput::write
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: ModuleGraph,
    pub manifest: BuildManifest,
    pub html: Option<HtmlDocument>,
    /// Absolute output directory from the configuration.
    pub output_dir: PathBuf,
    /// Write options derived from the configuration (`clean`).
    pub write_options: WriteOptions,
}

impl BuildOutput {
    /// Files in write order: manifest assets, then the HTML shell.
    pub fn files(&self) -> Vec<(&str, &[u8])> {
        let mut files: Vec<(&str, &[u8])> = self
            .manifest
            .assets()
            .iter()
            .map(|asset| (asset.filename.as_str(), asset.content.as_slice()))
            .collect();
        if let Some(html) = &self.html {
            files.push((html.filename.as_str(), html.content.as_bytes()));
        }
        files
    }

    /// Write every file into the configured output directory.
    pub async fn write(&self, runtime: &dyn Runtime, options: WriteOptions) -> Result<Vec<PathBuf>> {
        self.write_to(runtime, &self.output_dir, options).await
    }

    /// Write every file into `dir` instead of the configured directory.
    pub async fn write_to(
        &self,
        runtime: &dyn Runtime,
        dir: &Path,
        options: WriteOptions,
    ) -> Result<Vec<PathBuf>> {
        write_files(runtime, dir, &self.files(), options).await
    }
}
