//! Durable checkpoints.
//!
//! A checkpoint is a directory of separately serialized JSON sections:
//! the graph structure, the stage array, the name array, the next-index
//! counter, both lookup indexes, and the processed-set. Any section that
//! fails to read marks the whole checkpoint corrupt; recovery from a
//! corrupt checkpoint is rebuilding the pipeline from scratch.

use crate::dag::StageDag;
use cascade_core::{Error, Result, Stage};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_VERSION: u32 = 1;

const MANIFEST: &str = "manifest.json";
const GRAPH: &str = "graph.json";
const STAGES: &str = "stages.json";
const NAMES: &str = "names.json";
const COUNTER: &str = "counter.json";
const OUTPUTHASH: &str = "outputhash.json";
const STAGEHASH: &str = "stagehash.json";
const PROCESSED: &str = "processed.json";

#[derive(Serialize, Deserialize)]
struct Manifest {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    nodes: usize,
    edges: Vec<(usize, usize)>,
}

/// Checkpoint directory handle.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a checkpoint directory, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when a previous run left a snapshot here.
    pub fn exists(&self) -> bool {
        self.dir.join(MANIFEST).exists()
    }

    pub fn save(&self, dag: &StageDag, processed: &BTreeSet<usize>) -> Result<()> {
        self.write_section(
            MANIFEST,
            &Manifest {
                version: CHECKPOINT_VERSION,
            },
        )?;
        self.write_section(
            GRAPH,
            &GraphSnapshot {
                nodes: dag.graph.node_count(),
                edges: dag.edges(),
            },
        )?;
        self.write_section(STAGES, &dag.stages)?;
        self.write_section(NAMES, &dag.names)?;
        self.write_section(COUNTER, &dag.counter)?;
        self.write_section(OUTPUTHASH, &dag.producers)?;
        self.write_section(STAGEHASH, &dag.identities)?;
        self.write_section(PROCESSED, processed)?;
        Ok(())
    }

    pub fn load(&self) -> Result<(StageDag, BTreeSet<usize>)> {
        let manifest: Manifest = self.read_section(MANIFEST)?;
        if manifest.version != CHECKPOINT_VERSION {
            return Err(Error::CheckpointVersion {
                found: manifest.version,
                expected: CHECKPOINT_VERSION,
            });
        }

        let snapshot: GraphSnapshot = self.read_section(GRAPH)?;
        let stages: Vec<Stage> = self.read_section(STAGES)?;
        let names: Vec<String> = self.read_section(NAMES)?;
        let counter: usize = self.read_section(COUNTER)?;
        let producers: HashMap<PathBuf, usize> = self.read_section(OUTPUTHASH)?;
        let identities: HashMap<String, usize> = self.read_section(STAGEHASH)?;
        let processed: BTreeSet<usize> = self.read_section(PROCESSED)?;

        if snapshot.nodes != stages.len() || names.len() != stages.len() {
            return Err(Error::CheckpointCorrupt(GRAPH.to_string()));
        }

        let mut graph = DiGraph::new();
        for _ in 0..snapshot.nodes {
            graph.add_node(());
        }
        for &(from, to) in &snapshot.edges {
            if from >= snapshot.nodes || to >= snapshot.nodes {
                return Err(Error::CheckpointCorrupt(GRAPH.to_string()));
            }
            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
        }

        Ok((
            StageDag {
                graph,
                stages,
                names,
                counter,
                producers,
                identities,
                skipped: 0,
            },
            processed,
        ))
    }

    fn write_section<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }

    fn read_section<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = fs::read(self.dir.join(name))
            .map_err(|_| Error::CheckpointCorrupt(name.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|_| Error::CheckpointCorrupt(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use cascade_core::{ArgFragment, Stage, StageStatus};

    fn cmd(argv: &[&str], inputs: &[&str], outputs: &[&str]) -> Stage {
        let mut fragments: Vec<ArgFragment> = argv.iter().copied().map(ArgFragment::text).collect();
        fragments.extend(inputs.iter().map(ArgFragment::input));
        fragments.extend(outputs.iter().map(ArgFragment::output));
        Stage::command(&fragments).unwrap()
    }

    fn diamond() -> StageDag {
        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &["/x"])).unwrap();
        dag.add(cmd(&["b"], &["/x"], &["/y1"])).unwrap();
        dag.add(cmd(&["c"], &["/x"], &["/y2"])).unwrap();
        dag.add(cmd(&["d"], &["/y1", "/y2"], &["/w"])).unwrap();
        dag
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();

        let mut scheduler = Scheduler::new(diamond()).with_checkpoint(
            CheckpointStore::create(dir.path()).unwrap(),
        );
        scheduler.initialize().unwrap();
        scheduler.get_runnable_stage_index().unwrap();
        scheduler.set_stage_finished(0, true).unwrap();

        let (dag, processed) = store.load().unwrap();
        assert_eq!(dag.len(), 4);
        assert_eq!(dag.counter, 4);
        assert_eq!(dag.names, vec!["a", "b", "c", "d"]);
        assert_eq!(dag.edges().len(), 4);
        assert_eq!(dag.producers.len(), 4);
        assert_eq!(dag.identities.len(), 4);
        assert!(dag.stage(0).unwrap().is_finished());
        assert_eq!(processed.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_missing_section_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        assert!(!store.exists());
        assert!(matches!(
            store.load(),
            Err(Error::CheckpointCorrupt(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        store
            .write_section(MANIFEST, &Manifest { version: 99 })
            .unwrap();
        assert!(matches!(
            store.load(),
            Err(Error::CheckpointVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_restart_reverts_running_stage() {
        // crash with b finished and c running: on restart c re-enters the
        // queue, d stays pending behind it
        let dir = tempfile::tempdir().unwrap();

        let mut scheduler = Scheduler::new(diamond()).with_checkpoint(
            CheckpointStore::create(dir.path()).unwrap(),
        );
        scheduler.initialize().unwrap();
        scheduler.get_runnable_stage_index().unwrap();
        scheduler.set_stage_finished(0, true).unwrap();
        scheduler.get_runnable_stage_index().unwrap(); // b
        scheduler.get_runnable_stage_index().unwrap(); // c running
        scheduler.set_stage_finished(1, true).unwrap();
        drop(scheduler);

        let mut resumed =
            Scheduler::restore(CheckpointStore::create(dir.path()).unwrap()).unwrap();
        resumed.initialize().unwrap();

        assert!(resumed.dag().stage(0).unwrap().is_finished());
        assert!(resumed.dag().stage(1).unwrap().is_finished());
        assert_eq!(resumed.processed_stage_count(), 2);
        assert_eq!(resumed.get_runnable_stage_index(), Some(2));
        assert_eq!(resumed.get_runnable_stage_index(), None);
    }

    #[test]
    fn test_restart_makes_failed_branch_runnable_again() {
        let dir = tempfile::tempdir().unwrap();

        let mut scheduler = Scheduler::new(diamond()).with_checkpoint(
            CheckpointStore::create(dir.path()).unwrap(),
        );
        scheduler.initialize().unwrap();
        scheduler.get_runnable_stage_index().unwrap();
        scheduler.set_stage_finished(0, true).unwrap();
        scheduler.get_runnable_stage_index().unwrap();
        scheduler.get_runnable_stage_index().unwrap();
        scheduler.set_stage_finished(1, true).unwrap();
        scheduler.set_stage_failed(2).unwrap();
        assert!(!scheduler.continue_loop());
        drop(scheduler);

        let mut resumed =
            Scheduler::restore(CheckpointStore::create(dir.path()).unwrap()).unwrap();
        resumed.initialize().unwrap();

        // the failed stage and its blocked descendant are pending again
        assert_eq!(resumed.dag().stage(2).unwrap().status(), StageStatus::Runnable);
        assert_eq!(resumed.processed_stage_count(), 2);
        assert!(resumed.continue_loop());
        assert_eq!(resumed.get_runnable_stage_index(), Some(2));
        resumed.set_stage_finished(2, false).unwrap();
        assert_eq!(resumed.get_runnable_stage_index(), Some(3));
    }
}
