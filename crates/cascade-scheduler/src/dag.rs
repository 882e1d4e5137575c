//! The stage DAG.
//!
//! Nodes are stage indices; edges are never declared, only derived: stage t
//! precedes stage s iff t declares as an output a file s declares as an
//! input. Equal stages (same identity hash) are deduplicated on add.

use cascade_core::{Error, Result, Stage};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directed acyclic graph of stages, with the two lookup indexes the
/// scheduler relies on: identity hash → index (dedup) and output path →
/// producing index (edge derivation).
#[derive(Debug, Default)]
pub struct StageDag {
    pub(crate) graph: DiGraph<(), ()>,
    pub(crate) stages: Vec<Stage>,
    pub(crate) names: Vec<String>,
    pub(crate) counter: usize,
    pub(crate) producers: HashMap<PathBuf, usize>,
    pub(crate) identities: HashMap<String, usize>,
    pub(crate) skipped: usize,
}

impl StageDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage.
    ///
    /// A stage whose identity hash is already registered is silently
    /// dropped and counted as skipped (`Ok(None)`). Otherwise the stage
    /// receives the next index, its outputs are claimed, and a node is
    /// added to the graph. Indices never change once assigned.
    pub fn add(&mut self, stage: Stage) -> Result<Option<usize>> {
        let identity = stage.identity();
        if self.identities.contains_key(&identity) {
            self.skipped += 1;
            return Ok(None);
        }

        let index = self.counter;
        for output in stage.outputs() {
            if let Some(&first) = self.producers.get(output) {
                return Err(Error::DuplicateOutput {
                    path: output.display().to_string(),
                    first,
                    second: index,
                });
            }
        }

        self.identities.insert(identity, index);
        for output in stage.outputs() {
            self.producers.insert(output.clone(), index);
        }
        self.names.push(stage.name().to_string());
        self.stages.push(stage);
        self.graph.add_node(());
        self.counter += 1;

        Ok(Some(index))
    }

    /// Bulk-forward every stage of another DAG into this one, carrying its
    /// skip counter along.
    pub fn add_pipeline(&mut self, other: StageDag) -> Result<()> {
        self.skipped += other.skipped;
        for stage in other.stages {
            self.add(stage)?;
        }
        Ok(())
    }

    /// Derive edges from output→input path matches. Idempotent; existing
    /// edges are never duplicated or removed.
    pub fn create_edges(&mut self) {
        for i in 0..self.stages.len() {
            for input in self.stages[i].inputs() {
                if let Some(&producer) = self.producers.get(input) {
                    self.graph
                        .update_edge(NodeIndex::new(producer), NodeIndex::new(i), ());
                }
            }
        }
        debug!(edges = self.graph.edge_count(), "Derived dependency edges");
    }

    /// A cycle in the derived graph is a configuration error.
    pub fn ensure_acyclic(&self) -> Result<()> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|_| Error::CycleDetected)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Number of adds dropped as duplicates.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn stage(&self, index: usize) -> Result<&Stage> {
        self.stages.get(index).ok_or(Error::StageNotFound(index))
    }

    pub fn stage_mut(&mut self, index: usize) -> Result<&mut Stage> {
        self.stages
            .get_mut(index)
            .ok_or(Error::StageNotFound(index))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn predecessors(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Incoming)
    }

    pub fn successors(&self, index: usize) -> Vec<usize> {
        self.neighbors(index, Direction::Outgoing)
    }

    // Sorted by index so promotion order is deterministic.
    fn neighbors(&self, index: usize, direction: Direction) -> Vec<usize> {
        let mut neighbors: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), direction)
            .map(|n| n.index())
            .collect();
        neighbors.sort_unstable();
        neighbors
    }

    /// Every transitive successor of the given index, excluding the index
    /// itself.
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let start = NodeIndex::new(index);
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                found.push(node.index());
            }
        }
        found
    }

    /// Stage indices in dependency order.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|n| n.index()).collect())
            .map_err(|_| Error::CycleDetected)
    }

    pub(crate) fn edges(&self) -> Vec<(usize, usize)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index()))
            .collect()
    }

    /// Write the stage listing to `<name>-pipeline-stages.txt` under the
    /// given directory and log the dedup summary.
    pub fn print_stages(&self, name: &str, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}-pipeline-stages.txt", name));
        let mut listing = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            listing.push_str(&format!("{}  {}\n", i, stage.render()));
        }
        std::fs::write(&path, listing)?;
        info!(
            skipped = self.skipped,
            total = self.stages.len(),
            "Stages registered"
        );
        Ok(path)
    }
}
