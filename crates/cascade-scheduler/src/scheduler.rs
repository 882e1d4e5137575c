//! The runtime scheduler state machine.
//!
//! Owns the DAG plus the mutable run state: the FIFO ready-queue, the
//! processed-set, and per-stage statuses. All coordinator operations bottom
//! out here; the coordinator serializes access, so nothing in this module
//! needs its own locking.

use crate::checkpoint::CheckpointStore;
use crate::dag::StageDag;
use cascade_core::protocol::StageDescriptor;
use cascade_core::{Result, StageStatus};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// Worker URI attributed to stages skipped on warm start.
const PREVIOUS_RUN_URI: &str = "previous-run";

pub struct Scheduler {
    dag: StageDag,
    runnable: VecDeque<usize>,
    processed: BTreeSet<usize>,
    checkpoint: Option<CheckpointStore>,
}

impl Scheduler {
    pub fn new(dag: StageDag) -> Self {
        Self {
            dag,
            runnable: VecDeque::new(),
            processed: BTreeSet::new(),
            checkpoint: None,
        }
    }

    /// Resume from a checkpoint.
    ///
    /// Finished stages stay finished. Every other stage is removed from the
    /// processed-set and has its status reset to unset, so stages that were
    /// running, failed, or blocked behind a failure at the time of the
    /// crash are re-evaluated like any other pending stage. The caller
    /// recomputes the ready-queue via [`initialize`](Self::initialize).
    pub fn restore(store: CheckpointStore) -> Result<Self> {
        let (mut dag, mut processed) = store.load()?;

        let mut finished = 0usize;
        for i in 0..dag.len() {
            if dag.stage(i)?.is_finished() {
                finished += 1;
            } else {
                processed.remove(&i);
                dag.stage_mut(i)?.set_unset();
            }
        }
        info!(
            finished,
            total = dag.len(),
            "Restored pipeline from checkpoint"
        );

        Ok(Self {
            dag,
            runnable: VecDeque::new(),
            processed,
            checkpoint: Some(store),
        })
    }

    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn dag(&self) -> &StageDag {
        &self.dag
    }

    /// Called once all stages have been added: derives edges, rejects
    /// cycles, and seeds the ready-queue with the graph heads.
    pub fn initialize(&mut self) -> Result<()> {
        self.runnable.clear();
        self.dag.create_edges();
        self.dag.ensure_acyclic()?;
        self.compute_graph_heads();
        Ok(())
    }

    /// Enqueue every stage that is not finished and whose predecessors (if
    /// any) are all finished. Run after warm-start marking or a restore so
    /// already-finished prefixes are not re-dispatched.
    fn compute_graph_heads(&mut self) {
        let mut heads = Vec::new();
        for i in 0..self.dag.len() {
            if !self.dag.stages[i].is_finished() && self.predecessors_finished(i) {
                self.enqueue(i);
                heads.push(i);
            }
        }
        info!(?heads, "Graph heads");
    }

    fn predecessors_finished(&self, index: usize) -> bool {
        self.dag
            .predecessors(index)
            .iter()
            .all(|&p| self.dag.stages[p].is_finished())
    }

    fn enqueue(&mut self, index: usize) {
        self.dag.stages[index].set_runnable();
        self.runnable.push_back(index);
    }

    /// Pop the next runnable index and mark it running.
    pub fn get_runnable_stage_index(&mut self) -> Option<usize> {
        let index = self.runnable.pop_front()?;
        self.dag.stages[index].set_running();
        Some(index)
    }

    /// Return a stage the worker could not host: status back to unset, index
    /// to the tail of the queue.
    pub fn requeue(&mut self, index: usize) -> Result<()> {
        self.dag.stage_mut(index)?.set_unset();
        self.runnable.push_back(index);
        Ok(())
    }

    pub fn descriptor(&self, index: usize) -> Result<StageDescriptor> {
        Ok(StageDescriptor::new(index, self.dag.stage(index)?))
    }

    pub fn set_stage_started(&self, index: usize, worker_uri: &str) -> Result<()> {
        let stage = self.dag.stage(index)?;
        debug!(index, worker = worker_uri, stage = %stage.render(), "Starting stage");
        Ok(())
    }

    /// Mark a stage finished and promote any successor whose predecessors
    /// are now all finished.
    ///
    /// Idempotent: a repeated call on a finished index is a no-op, and a
    /// call on a failed index is ignored (finish and fail are mutually
    /// exclusive; the first report wins).
    pub fn set_stage_finished(&mut self, index: usize, save_state: bool) -> Result<()> {
        match self.dag.stage(index)?.status() {
            StageStatus::Finished | StageStatus::Failed => return Ok(()),
            _ => {}
        }

        info!(index, stage = %self.dag.stages[index].render(), "Finished stage");
        self.dag.stages[index].set_finished();
        self.processed.insert(index);

        if save_state {
            self.save_checkpoint()?;
        }

        for successor in self.dag.successors(index) {
            if self.check_if_runnable(successor) && !self.runnable.contains(&successor) {
                self.enqueue(successor);
            }
        }
        Ok(())
    }

    fn check_if_runnable(&self, index: usize) -> bool {
        let status = self.dag.stages[index].status();
        if status == StageStatus::Finished
            || status == StageStatus::Running
            || self.processed.contains(&index)
        {
            return false;
        }
        self.predecessors_finished(index)
    }

    /// Mark a stage failed and move every transitive successor into the
    /// processed-set without touching its status. Those stages never run;
    /// the pipeline continues on unaffected branches.
    pub fn set_stage_failed(&mut self, index: usize) -> Result<()> {
        match self.dag.stage(index)?.status() {
            StageStatus::Finished | StageStatus::Failed => return Ok(()),
            _ => {}
        }

        self.dag.stages[index].set_failed();
        self.processed.insert(index);

        let blocked = self.dag.descendants(index);
        let blocked_names: Vec<&str> = blocked
            .iter()
            .map(|&i| self.dag.names[i].as_str())
            .collect();
        warn!(
            index,
            stage = %self.dag.stages[index].render(),
            ?blocked_names,
            "Stage failed; descendants will not run"
        );
        for descendant in blocked {
            self.processed.insert(descendant);
        }

        self.save_checkpoint()
    }

    /// Drain the initial ready-queue, marking command stages whose declared
    /// inputs and outputs all exist on disk as finished without dispatch.
    /// Everything else is re-queued in its original order. No checkpoint is
    /// written while skipping.
    pub fn skip_completed_stages(&mut self) -> Result<()> {
        let mut deferred = Vec::new();
        let mut skipped = 0usize;

        while let Some(index) = self.get_runnable_stage_index() {
            let stage = &self.dag.stages[index];
            if !stage.is_command() || !stage.is_effectively_complete() {
                deferred.push(index);
                continue;
            }
            self.set_stage_started(index, PREVIOUS_RUN_URI)?;
            self.set_stage_finished(index, false)?;
            skipped += 1;
        }

        for index in deferred {
            self.requeue(index)?;
        }

        info!(skipped, "Stages already complete on disk");
        Ok(())
    }

    /// True while any stage remains unprocessed. The coordinator treats the
    /// first false as latching and begins shutdown.
    pub fn continue_loop(&self) -> bool {
        self.dag.len() > self.processed.len()
    }

    pub fn stage_count(&self) -> usize {
        self.dag.len()
    }

    pub fn processed_stage_count(&self) -> usize {
        self.processed.len()
    }

    pub fn runnable_count(&self) -> usize {
        self.runnable.len()
    }

    pub fn has_failures(&self) -> bool {
        self.dag
            .stages
            .iter()
            .any(|s| s.status() == StageStatus::Failed)
    }

    fn save_checkpoint(&self) -> Result<()> {
        if let Some(store) = &self.checkpoint {
            store.save(&self.dag, &self.processed)?;
            debug!("Checkpoint written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{ArgFragment, Stage};

    fn cmd(argv: &[&str], inputs: &[&str], outputs: &[&str]) -> Stage {
        let mut fragments: Vec<ArgFragment> = argv.iter().copied().map(ArgFragment::text).collect();
        fragments.extend(inputs.iter().map(ArgFragment::input));
        fragments.extend(outputs.iter().map(ArgFragment::output));
        Stage::command(&fragments).unwrap()
    }

    fn linear_chain() -> Scheduler {
        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &["/x"])).unwrap();
        dag.add(cmd(&["b"], &["/x"], &["/y"])).unwrap();
        dag.add(cmd(&["c"], &["/y"], &["/z"])).unwrap();
        let mut scheduler = Scheduler::new(dag);
        scheduler.initialize().unwrap();
        scheduler
    }

    fn diamond() -> Scheduler {
        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &["/x"])).unwrap();
        dag.add(cmd(&["b"], &["/x"], &["/y1"])).unwrap();
        dag.add(cmd(&["c"], &["/x"], &["/y2"])).unwrap();
        dag.add(cmd(&["d"], &["/y1", "/y2"], &["/w"])).unwrap();
        let mut scheduler = Scheduler::new(dag);
        scheduler.initialize().unwrap();
        scheduler
    }

    #[test]
    fn test_linear_chain_dispatch_order() {
        let mut s = linear_chain();

        assert_eq!(s.get_runnable_stage_index(), Some(0));
        assert_eq!(s.get_runnable_stage_index(), None);

        s.set_stage_finished(0, false).unwrap();
        assert_eq!(s.get_runnable_stage_index(), Some(1));
        s.set_stage_finished(1, false).unwrap();
        assert_eq!(s.get_runnable_stage_index(), Some(2));
        s.set_stage_finished(2, false).unwrap();

        assert!(!s.continue_loop());
        assert!(!s.has_failures());
    }

    #[test]
    fn test_diamond_middle_stages_concurrent() {
        let mut s = diamond();

        assert_eq!(s.get_runnable_stage_index(), Some(0));
        s.set_stage_finished(0, false).unwrap();

        // b and c are both dispatchable before either finishes
        assert_eq!(s.get_runnable_stage_index(), Some(1));
        assert_eq!(s.get_runnable_stage_index(), Some(2));
        assert_eq!(s.get_runnable_stage_index(), None);

        // d needs both
        s.set_stage_finished(1, false).unwrap();
        assert_eq!(s.get_runnable_stage_index(), None);
        s.set_stage_finished(2, false).unwrap();
        assert_eq!(s.get_runnable_stage_index(), Some(3));
    }

    #[test]
    fn test_dispatch_marks_running() {
        let mut s = linear_chain();
        let i = s.get_runnable_stage_index().unwrap();
        assert_eq!(s.dag().stage(i).unwrap().status(), StageStatus::Running);
    }

    #[test]
    fn test_requeue_resets_status_and_goes_to_tail() {
        let mut s = diamond();
        s.get_runnable_stage_index().unwrap();
        s.set_stage_finished(0, false).unwrap();

        let b = s.get_runnable_stage_index().unwrap();
        s.requeue(b).unwrap();
        assert_eq!(s.dag().stage(b).unwrap().status(), StageStatus::Unset);

        // c was queued before the requeue, so it comes out first
        assert_eq!(s.get_runnable_stage_index(), Some(2));
        assert_eq!(s.get_runnable_stage_index(), Some(b));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut s = linear_chain();
        s.get_runnable_stage_index().unwrap();
        s.set_stage_finished(0, false).unwrap();
        s.set_stage_finished(0, false).unwrap();

        assert_eq!(s.processed_stage_count(), 1);
        // b was promoted exactly once
        assert_eq!(s.runnable_count(), 1);
    }

    #[test]
    fn test_fail_after_finish_ignored() {
        let mut s = linear_chain();
        s.get_runnable_stage_index().unwrap();
        s.set_stage_finished(0, false).unwrap();
        s.set_stage_failed(0).unwrap();

        assert_eq!(s.dag().stage(0).unwrap().status(), StageStatus::Finished);
        assert!(!s.has_failures());
    }

    #[test]
    fn test_failure_blocks_descendants() {
        let mut s = diamond();
        s.get_runnable_stage_index().unwrap();
        s.set_stage_finished(0, false).unwrap();
        s.get_runnable_stage_index().unwrap(); // b
        s.get_runnable_stage_index().unwrap(); // c

        s.set_stage_finished(1, false).unwrap();
        s.set_stage_failed(2).unwrap();

        // d entered the processed-set without running, status untouched
        assert_eq!(s.processed_stage_count(), 4);
        assert!(!s.continue_loop());
        assert!(s.has_failures());
        assert_eq!(s.dag().stage(3).unwrap().status(), StageStatus::Unset);
        assert_eq!(s.get_runnable_stage_index(), None);
    }

    #[test]
    fn test_finished_predecessor_does_not_promote_blocked_stage() {
        let mut s = diamond();
        s.get_runnable_stage_index().unwrap();
        s.set_stage_finished(0, false).unwrap();
        s.get_runnable_stage_index().unwrap();
        s.get_runnable_stage_index().unwrap();

        s.set_stage_failed(2).unwrap();
        // b finishing afterwards must not enqueue d: it is already processed
        s.set_stage_finished(1, false).unwrap();
        assert_eq!(s.get_runnable_stage_index(), None);
        assert!(!s.continue_loop());
    }

    #[test]
    fn test_warm_start_skips_complete_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        let y = dir.path().join("y");
        std::fs::write(&x, "x").unwrap();

        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &[x.to_str().unwrap()])).unwrap();
        dag.add(cmd(
            &["b"],
            &[x.to_str().unwrap()],
            &[y.to_str().unwrap()],
        ))
        .unwrap();
        let mut s = Scheduler::new(dag);
        s.initialize().unwrap();
        s.skip_completed_stages().unwrap();

        // a was marked finished without dispatch; b is first out of the queue
        assert!(s.dag().stage(0).unwrap().is_finished());
        assert_eq!(s.processed_stage_count(), 1);
        assert_eq!(s.get_runnable_stage_index(), Some(1));
    }

    #[test]
    fn test_warm_start_skips_whole_chain_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        let y = dir.path().join("y");
        std::fs::write(&x, "x").unwrap();
        std::fs::write(&y, "y").unwrap();

        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &[x.to_str().unwrap()])).unwrap();
        dag.add(cmd(
            &["b"],
            &[x.to_str().unwrap()],
            &[y.to_str().unwrap()],
        ))
        .unwrap();
        let mut s = Scheduler::new(dag);
        s.initialize().unwrap();
        s.skip_completed_stages().unwrap();

        assert!(!s.continue_loop());
        assert_eq!(s.get_runnable_stage_index(), None);
    }

    #[test]
    fn test_warm_start_requires_inputs_too() {
        // partial presence: output exists but an input is missing
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let out = dir.path().join("out");
        std::fs::write(&out, "o").unwrap();

        let mut dag = StageDag::new();
        dag.add(cmd(
            &["a"],
            &[missing.to_str().unwrap()],
            &[out.to_str().unwrap()],
        ))
        .unwrap();
        let mut s = Scheduler::new(dag);
        s.initialize().unwrap();
        s.skip_completed_stages().unwrap();

        assert!(!s.dag().stage(0).unwrap().is_finished());
        assert_eq!(s.get_runnable_stage_index(), Some(0));
    }

    #[test]
    fn test_abstract_stages_never_warm_skipped() {
        let mut dag = StageDag::new();
        dag.add(Stage::abstracted("group", vec![], vec![])).unwrap();
        let mut s = Scheduler::new(dag);
        s.initialize().unwrap();
        s.skip_completed_stages().unwrap();

        assert!(!s.dag().stage(0).unwrap().is_finished());
        assert_eq!(s.get_runnable_stage_index(), Some(0));
    }
}
