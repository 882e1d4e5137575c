//! Batch-queue submission script export.
//!
//! Serializes the DAG as a list of hold-submitted batch jobs plus the
//! `qalter` directives that chain them: each job is submitted held, given
//! a hold on its predecessors' job names, and then released. Command
//! stages whose declared files already exist on disk are left out
//! entirely, as are holds on them.

use crate::dag::StageDag;
use cascade_core::Result;
use std::collections::HashSet;

/// Submission command used when the driver does not supply one.
pub const DEFAULT_SUBMIT_COMMAND: &str = "sge_batch_hold -l vf=2G";

/// One stage flattened for export: its index, rendered command, and the
/// indices it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatStage {
    pub index: usize,
    pub command: String,
    pub depends_on: Vec<usize>,
}

/// Flatten the DAG into dependency order.
pub fn flatten(dag: &StageDag) -> Result<Vec<FlatStage>> {
    let order = dag.topological_order()?;
    order
        .into_iter()
        .map(|index| {
            Ok(FlatStage {
                index,
                command: dag.stage(index)?.render(),
                depends_on: dag.predecessors(index),
            })
        })
        .collect()
}

/// Render the submission script. Returns the script lines and the number
/// of stages skipped because their outputs (and inputs) already exist.
pub fn batch_script(
    dag: &StageDag,
    submit: &str,
    job_prefix: &str,
) -> Result<(Vec<String>, usize)> {
    let job_name = |index: usize| format!("{}_{}", job_prefix, index);

    let mut script = Vec::new();
    let mut submitted: HashSet<usize> = HashSet::new();
    let mut skipped = 0usize;

    for flat in flatten(dag)? {
        let stage = dag.stage(flat.index)?;
        if stage.is_command() && stage.is_effectively_complete() {
            skipped += 1;
            continue;
        }

        let name = job_name(flat.index);
        script.push(format!("{} -J {} {}", submit, name, flat.command));

        let holds: Vec<String> = flat
            .depends_on
            .iter()
            .filter(|dep| submitted.contains(dep))
            .map(|&dep| job_name(dep))
            .collect();
        if !holds.is_empty() {
            script.push(format!("qalter -hold_jid {} {}", holds.join(","), name));
        }
        script.push(format!("qalter -h U {}", name));
        submitted.insert(flat.index);
    }

    Ok((script, skipped))
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

    #[test]
    fn test_flatten_orders_by_dependency() {
        let mut dag = StageDag::new();
        dag.add(cmd(&["b"], &["/x"], &["/y"])).unwrap();
        dag.add(cmd(&["a"], &[], &["/x"])).unwrap();
        dag.create_edges();

        let flat = flatten(&dag).unwrap();
        assert_eq!(flat[0].index, 1);
        assert_eq!(flat[1].index, 0);
        assert_eq!(flat[1].depends_on, vec![1]);
    }

    #[test]
    fn test_script_holds_and_releases() {
        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &["/x"])).unwrap();
        dag.add(cmd(&["b"], &["/x"], &["/y"])).unwrap();
        dag.create_edges();

        let (script, skipped) = batch_script(&dag, DEFAULT_SUBMIT_COMMAND, "demo").unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(
            script,
            vec![
                "sge_batch_hold -l vf=2G -J demo_0 a /x".to_string(),
                "qalter -h U demo_0".to_string(),
                "sge_batch_hold -l vf=2G -J demo_1 b /x /y".to_string(),
                "qalter -hold_jid demo_0 demo_1".to_string(),
                "qalter -h U demo_1".to_string(),
            ]
        );
    }

    #[test]
    fn test_script_skips_complete_stages_and_their_holds() {
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x");
        std::fs::write(&x, "x").unwrap();

        let mut dag = StageDag::new();
        dag.add(cmd(&["a"], &[], &[x.to_str().unwrap()])).unwrap();
        dag.add(cmd(&["b"], &[x.to_str().unwrap()], &["/missing"]))
            .unwrap();
        dag.create_edges();

        let (script, skipped) = batch_script(&dag, "qsub", "demo").unwrap();
        assert_eq!(skipped, 1);
        // only b is submitted, with no hold on the skipped producer
        assert_eq!(script.len(), 2);
        assert!(script[0].starts_with("qsub -J demo_1 b "));
        assert_eq!(script[1], "qalter -h U demo_1");
    }
}
