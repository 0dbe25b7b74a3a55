//! Module graph construction.
//!
//! Traversal is breadth-first in waves. A module is memoized the moment it is
//! first resolved, which fixes its discovery index. Each wave reads and
//! transforms its modules concurrently; linking (after-load hooks, dependency
//! extraction, before-resolve hooks, resolution) then runs over the wave in
//! discovery order, so the graph never depends on which read finished first.
//!
//! A foreign unit becomes a placeholder node and a compile job. Traversal of
//! everything else carries on; once no loadable work is left, the jobs are
//! awaited in discovery order and each artifact is spliced in: the glue script
//! takes the placeholder's place and the binary is appended as an asset. The
//! glue runs through the script loader chain and its own dependencies are
//! traversed like any other module's.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use knit_config::ForeignCompileOptions;
use knit_graph::{COMPILED_TAG, ModuleGraph, ModuleId, ModuleKind, ModuleNode, Runtime};
use path_clean::PathClean;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::bridge::{CompileHandle, CompiledArtifact, CompilerBridge, UnitDescriptor};
use crate::extract::{extract_dependencies, request_for};
use crate::loaders::LoaderRegistry;
use crate::plugins::{PluginContext, PluginDriver};
use crate::resolver::{Resolved, Resolver};
use crate::{Error, Result};

/// A memoized module waiting for its load.
#[derive(Debug, Clone)]
struct Pending {
    id: ModuleId,
    kind: ModuleKind,
    is_entry: bool,
}

enum Loaded {
    Module(ModuleNode),
    Foreign {
        placeholder: ModuleNode,
        descriptor: UnitDescriptor,
    },
}

struct Job {
    unit: ModuleId,
    descriptor: UnitDescriptor,
    handle: CompileHandle,
}

#[derive(Default)]
struct Traversal {
    memo: FxHashSet<ModuleId>,
    queue: Vec<Pending>,
    jobs: VecDeque<Job>,
    /// Binary paths of spliced artifacts, for glue that references them.
    compiled: FxHashMap<PathBuf, ModuleId>,
}

impl Traversal {
    /// Memoize `id`; only the first call for an id queues it.
    fn discover(&mut self, id: &ModuleId, kind: ModuleKind, is_entry: bool) -> bool {
        if !self.memo.insert(id.clone()) {
            return false;
        }
        self.queue.push(Pending {
            id: id.clone(),
            kind,
            is_entry,
        });
        true
    }
}

pub struct GraphBuilder<'a> {
    resolver: &'a Resolver,
    loaders: &'a LoaderRegistry,
    plugins: &'a PluginDriver,
    bridge: &'a CompilerBridge,
    compile_options: &'a ForeignCompileOptions,
    runtime: Arc<dyn Runtime>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        resolver: &'a Resolver,
        loaders: &'a LoaderRegistry,
        plugins: &'a PluginDriver,
        bridge: &'a CompilerBridge,
        compile_options: &'a ForeignCompileOptions,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            resolver,
            loaders,
            plugins,
            bridge,
            compile_options,
            runtime,
        }
    }

    /// Build the graph reachable from `entries`.
    ///
    /// On failure every outstanding compile job is cancelled and no graph is
    /// returned.
    pub async fn build(&self, entries: &[String], cx: &mut PluginContext) -> Result<ModuleGraph> {
        let result = self.traverse(entries, cx).await;
        if result.is_err() {
            self.bridge.cancel_all();
        }
        result
    }

    async fn traverse(&self, entries: &[String], cx: &mut PluginContext) -> Result<ModuleGraph> {
        let mut graph = ModuleGraph::new();
        let mut state = Traversal::default();

        for entry in entries {
            let resolved = self.resolver.resolve(entry, None).await?;
            if !state.discover(&resolved.id, resolved.kind, true) {
                debug!(entry = %entry, "duplicate entry");
            }
        }

        loop {
            while !state.queue.is_empty() {
                let wave = std::mem::take(&mut state.queue);
                debug!(modules = wave.len(), "loading wave");
                // The whole wave settles first, so the failure reported is the
                // earliest discovered rather than the first to finish.
                let loaded = join_all(wave.iter().map(|pending| self.load(pending)))
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>>>()?;

                for item in loaded {
                    match item {
                        Loaded::Module(mut node) => {
                            self.link(&mut node, &mut state, cx).await?;
                            graph.add_module(node)?;
                        }
                        Loaded::Foreign {
                            placeholder,
                            descriptor,
                        } => {
                            let handle = self.bridge.compile(descriptor.clone());
                            state.jobs.push_back(Job {
                                unit: placeholder.id.clone(),
                                descriptor,
                                handle,
                            });
                            graph.add_module(placeholder)?;
                        }
                    }
                }
            }

            let Some(job) = state.jobs.pop_front() else {
                break;
            };
            self.splice_artifact(job, &mut graph, &mut state, cx).await?;
        }

        graph.validate()?;
        info!(
            modules = graph.len(),
            entries = graph.entries().len(),
            "module graph complete"
        );
        Ok(graph)
    }

    /// Read and transform one module, or describe a foreign unit.
    async fn load(&self, pending: &Pending) -> Result<Loaded> {
        let id = &pending.id;

        if pending.kind == ModuleKind::ForeignCompiled {
            let descriptor =
                UnitDescriptor::from_options(id.as_path(), self.compile_options, self.runtime.as_ref())
                    .await
                    .map_err(|e| Error::in_module(id, e))?;
            let placeholder = ModuleNode::builder(id.clone(), ModuleKind::ForeignCompiled)
                .entry(pending.is_entry)
                .build();
            return Ok(Loaded::Foreign {
                placeholder,
                descriptor,
            });
        }

        let raw = self
            .runtime
            .read_file(id.as_path())
            .await
            .map_err(|e| Error::in_module(id, e))?;
        let transformed = self
            .loaders
            .run(pending.kind, id, self.resolver.root(), raw.clone())
            .map_err(|e| Error::in_module(id, e))?;
        debug!(module = %id, kind = %pending.kind, bytes = raw.len(), "loaded");

        Ok(Loaded::Module(
            ModuleNode::builder(id.clone(), pending.kind)
                .raw_content(raw)
                .transformed_content(transformed)
                .entry(pending.is_entry)
                .build(),
        ))
    }

    /// Run after-load hooks, extract and resolve dependencies of `node`, and
    /// memoize any new targets.
    async fn link(&self, node: &mut ModuleNode, state: &mut Traversal, cx: &mut PluginContext) -> Result<()> {
        let extra = self
            .plugins
            .run_after_load(cx, node)
            .await
            .map_err(|e| Error::in_module(&node.id, e))?;

        let mut specifiers = if node.kind.has_dependencies() {
            extract_dependencies(node.kind, &node.transformed_content)
        } else {
            Vec::new()
        };
        for specifier in extra {
            if !specifiers.contains(&specifier) {
                specifiers.push(specifier);
            }
        }

        for specifier in specifiers {
            let request = request_for(node.kind, &specifier);
            let request = self
                .plugins
                .run_before_resolve(cx, &request, &node.id)
                .await
                .map_err(|e| Error::in_module(&node.id, e))?;

            if let Some(target) = compiled_sibling(&node.id, &request, &state.compiled) {
                node.link(specifier, target);
                continue;
            }

            let Resolved { id, kind, .. } = self
                .resolver
                .resolve(&request, Some(&node.id))
                .await
                .map_err(|e| Error::in_module(&node.id, e))?;
            if state.discover(&id, kind, false) {
                debug!(from = %node.id, to = %id, "discovered");
            }
            node.link(specifier, id);
        }
        Ok(())
    }

    /// Await a compile job and put its artifact in place of the placeholder.
    async fn splice_artifact(
        &self,
        job: Job,
        graph: &mut ModuleGraph,
        state: &mut Traversal,
        cx: &mut PluginContext,
    ) -> Result<()> {
        let output = job
            .handle
            .await
            .map_err(|e| Error::in_module(&job.unit, e))?;
        let artifact = CompiledArtifact::new(job.unit.clone(), &job.descriptor, &output)
            .map_err(|e| Error::in_module(&job.unit, e))?;
        info!(
            unit = %job.unit,
            binary_bytes = artifact.binary.len(),
            "compiled unit ready"
        );

        let glue_id = artifact.glue_module_id.clone();
        let asset_id = artifact.asset_module_id.clone();
        state.memo.insert(glue_id.clone());
        state.memo.insert(asset_id.clone());
        state
            .compiled
            .insert(job.descriptor.binary_path(), asset_id.clone());

        let transformed = self
            .loaders
            .run(
                ModuleKind::Script,
                &glue_id,
                self.resolver.root(),
                artifact.glue_source.clone(),
            )
            .map_err(|e| Error::in_module(&glue_id, e))?;
        let mut glue = ModuleNode::builder(glue_id.clone(), ModuleKind::Script)
            .raw_content(artifact.glue_source)
            .transformed_content(transformed)
            .build();

        self.link(&mut glue, state, cx).await?;
        if !glue.dependencies.contains(&asset_id) {
            let file_name = format!("./{}_bg.wasm", job.descriptor.out_name);
            glue.link(file_name, asset_id.clone());
        }

        let binary = ModuleNode::builder(asset_id, ModuleKind::Asset)
            .content(artifact.binary)
            .build();
        graph.splice(&job.unit, glue, vec![binary])?;
        Ok(())
    }
}

/// Glue may name its binary relative to itself (`new URL("app_bg.wasm",
/// import.meta.url)`); that maps straight to the binary's asset node.
fn compiled_sibling(
    importer: &ModuleId,
    request: &str,
    compiled: &FxHashMap<PathBuf, ModuleId>,
) -> Option<ModuleId> {
    if importer.tag() != Some(COMPILED_TAG) {
        return None;
    }
    let base = importer.as_path().parent()?;
    let path = request.split(['?', '#']).next().unwrap_or(request);
    compiled.get(&base.join(path).clean()).cloned()
}
