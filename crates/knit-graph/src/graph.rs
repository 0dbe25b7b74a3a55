//! Arena-style module graph.
//!
//! Nodes live in a single map keyed by [`ModuleId`] and reference each other
//! by id only, so import cycles need no shared ownership. The map keeps
//! first-discovery order, which is also the tie-breaker for every ordering the
//! graph hands out.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::IndexMap;

use crate::error::{GraphError, Result};
use crate::{ModuleId, ModuleKind, ModuleNode};

#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    nodes: IndexMap<ModuleId, ModuleNode>,
    entries: Vec<ModuleId>,
}

impl ModuleGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Its position in discovery order is the insertion position.
    pub fn add_module(&mut self, node: ModuleNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateModule(node.id));
        }
        if node.is_entry && !self.entries.contains(&node.id) {
            self.entries.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Mark an existing node as an entry. Entry order is call order.
    pub fn add_entry(&mut self, id: &ModuleId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownEntry(id.clone()))?;
        node.is_entry = true;
        if !self.entries.contains(id) {
            self.entries.push(id.clone());
        }
        Ok(())
    }

    pub fn get(&self, id: &ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(id)
    }

    /// Mutable access, used while a node's own load phase is still running.
    pub fn get_mut(&mut self, id: &ModuleId) -> Option<&mut ModuleNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entry ids in the order they were declared.
    pub fn entries(&self) -> &[ModuleId] {
        &self.entries
    }

    /// Nodes in first-discovery order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.values()
    }

    /// Nodes of one kind in first-discovery order.
    pub fn modules_of_kind(&self, kind: ModuleKind) -> impl Iterator<Item = &ModuleNode> {
        self.nodes.values().filter(move |node| node.kind == kind)
    }

    /// Position of `id` in first-discovery order.
    pub fn discovery_index(&self, id: &ModuleId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    /// Direct dependencies of `id`, in source order.
    pub fn dependencies(&self, id: &ModuleId) -> Result<&[ModuleId]> {
        self.nodes
            .get(id)
            .map(|node| node.dependencies.as_slice())
            .ok_or_else(|| GraphError::ModuleNotFound(id.clone()))
    }

    /// Modules that depend on `id`, in discovery order.
    pub fn dependents(&self, id: &ModuleId) -> Vec<&ModuleId> {
        self.nodes
            .values()
            .filter(|node| node.dependencies.contains(id))
            .map(|node| &node.id)
            .collect()
    }

    /// Replace `placeholder` with `replacement` at the same discovery position,
    /// append `appended` at the end, and rewire every edge and entry that
    /// pointed at the placeholder to the replacement.
    pub fn splice(
        &mut self,
        placeholder: &ModuleId,
        mut replacement: ModuleNode,
        appended: Vec<ModuleNode>,
    ) -> Result<()> {
        let Some(old) = self.nodes.get(placeholder) else {
            return Err(GraphError::ModuleNotFound(placeholder.clone()));
        };
        if replacement.id != *placeholder && self.nodes.contains_key(&replacement.id) {
            return Err(GraphError::DuplicateModule(replacement.id));
        }
        replacement.is_entry |= old.is_entry;

        let new_id = replacement.id.clone();
        let mut replacement = Some(replacement);
        let previous = std::mem::take(&mut self.nodes);
        for (id, node) in previous {
            if &id == placeholder {
                if let Some(node) = replacement.take() {
                    self.nodes.insert(node.id.clone(), node);
                }
            } else {
                self.nodes.insert(id, node);
            }
        }

        for node in self.nodes.values_mut() {
            node.retarget(placeholder, &new_id);
        }
        for entry in &mut self.entries {
            if entry == placeholder {
                *entry = new_id.clone();
            }
        }

        for node in appended {
            self.add_module(node)?;
        }
        Ok(())
    }

    /// Check that every edge and entry names a node of the graph.
    pub fn validate(&self) -> Result<()> {
        for entry in &self.entries {
            if !self.nodes.contains_key(entry) {
                return Err(GraphError::UnknownEntry(entry.clone()));
            }
        }
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::DanglingEdge {
                        from: node.id.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Dependency-first order of all nodes.
    ///
    /// Kahn's algorithm where, among the nodes whose dependencies have all
    /// been placed, the one discovered first goes next. When only cycles
    /// remain, the earliest-discovered unplaced node is placed to break them.
    /// The result depends only on the graph's content and discovery order.
    pub fn stable_order(&self) -> Vec<&ModuleId> {
        let count = self.nodes.len();
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, node) in self.nodes.values().enumerate() {
            for dep in &node.dependencies {
                let Some(dep_index) = self.nodes.get_index_of(dep) else {
                    continue;
                };
                if dep_index == index || dependents[dep_index].contains(&index) {
                    continue;
                }
                dependents[dep_index].push(index);
                pending[index] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut placed = vec![false; count];
        let mut order = Vec::with_capacity(count);
        let mut next_unplaced = 0;

        while order.len() < count {
            let index = match ready.pop() {
                Some(Reverse(index)) if placed[index] => continue,
                Some(Reverse(index)) => index,
                None => {
                    while placed[next_unplaced] {
                        next_unplaced += 1;
                    }
                    next_unplaced
                }
            };

            placed[index] = true;
            order.push(index);
            for &dependent in &dependents[index] {
                pending[dependent] = pending[dependent].saturating_sub(1);
                if pending[dependent] == 0 && !placed[dependent] {
                    ready.push(Reverse(dependent));
                }
            }
        }

        order
            .into_iter()
            .filter_map(|index| self.nodes.get_index(index).map(|(id, _)| id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ModuleId {
        ModuleId::new(format!("/p/{name}")).unwrap()
    }

    fn script(name: &str, deps: &[&str]) -> ModuleNode {
        let mut builder = ModuleNode::builder(id(name), ModuleKind::Script);
        for dep in deps {
            builder = builder.dependency(format!("./{dep}"), id(dep));
        }
        builder.build()
    }

    fn order(graph: &ModuleGraph) -> Vec<String> {
        graph
            .stable_order()
            .into_iter()
            .map(|id| id.file_stem().into_owned())
            .collect()
    }

    #[test]
    fn duplicate_module_is_rejected() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &[])).unwrap();
        let err = graph.add_module(script("a.js", &[])).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateModule(_)));
    }

    #[test]
    fn validate_reports_dangling_edges() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["missing.js"])).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));
    }

    #[test]
    fn dependencies_come_first() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["b.js", "c.js"])).unwrap();
        graph.add_module(script("b.js", &["c.js"])).unwrap();
        graph.add_module(script("c.js", &[])).unwrap();
        graph.add_entry(&id("a.js")).unwrap();

        assert_eq!(order(&graph), vec!["c", "b", "a"]);
    }

    #[test]
    fn ties_follow_discovery_order() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["c.js", "b.js"])).unwrap();
        graph.add_module(script("c.js", &[])).unwrap();
        graph.add_module(script("b.js", &[])).unwrap();

        assert_eq!(order(&graph), vec!["c", "b", "a"]);
    }

    #[test]
    fn cycles_are_broken_by_discovery_order() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["b.js"])).unwrap();
        graph.add_module(script("b.js", &["a.js"])).unwrap();

        assert_eq!(order(&graph), vec!["a", "b"]);
    }

    #[test]
    fn self_import_does_not_block() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["a.js", "b.js"])).unwrap();
        graph.add_module(script("b.js", &[])).unwrap();

        assert_eq!(order(&graph), vec!["b", "a"]);
    }

    #[test]
    fn dependents_lists_importers() {
        let mut graph = ModuleGraph::new();
        graph.add_module(script("a.js", &["c.js"])).unwrap();
        graph.add_module(script("b.js", &["c.js"])).unwrap();
        graph.add_module(script("c.js", &[])).unwrap();

        let dependents: Vec<_> = graph.dependents(&id("c.js"));
        assert_eq!(dependents, vec![&id("a.js"), &id("b.js")]);
    }

    #[test]
    fn splice_keeps_position_and_rewires() {
        let unit = id("crate").with_tag("foreign");
        let glue = id("crate/pkg/app.js").with_tag("compiled");
        let wasm = id("crate/pkg/app_bg.wasm").with_tag("compiled");

        let mut graph = ModuleGraph::new();
        graph
            .add_module(
                ModuleNode::builder(id("a.js"), ModuleKind::Script)
                    .dependency("../crate", unit.clone())
                    .dependency("./z.js", id("z.js"))
                    .entry(true)
                    .build(),
            )
            .unwrap();
        graph
            .add_module(ModuleNode::builder(unit.clone(), ModuleKind::ForeignCompiled).build())
            .unwrap();
        graph.add_module(script("z.js", &[])).unwrap();

        let glue_node = ModuleNode::builder(glue.clone(), ModuleKind::Script)
            .dependency("./app_bg.wasm", wasm.clone())
            .build();
        let wasm_node = ModuleNode::builder(wasm.clone(), ModuleKind::Asset).build();
        graph.splice(&unit, glue_node, vec![wasm_node]).unwrap();

        assert!(!graph.contains(&unit));
        assert_eq!(graph.discovery_index(&glue), Some(1));
        assert_eq!(graph.discovery_index(&wasm), Some(3));
        assert_eq!(graph.dependencies(&id("a.js")).unwrap()[0], glue);
        graph.validate().unwrap();
    }
}
