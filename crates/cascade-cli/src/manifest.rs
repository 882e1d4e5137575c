//! Pipeline manifest loading.
//!
//! The driver-facing stage-construction surface: a YAML list of stages,
//! each an argument vector whose elements may be tagged `in:`, `out:`, or
//! `log:`. Untagged elements are plain text. Abstract stages declare
//! `inputs`/`outputs` and carry no args.

use cascade_core::{ArgFragment, Error, Result, Stage};
use cascade_scheduler::StageDag;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct PipelineManifest {
    pub stages: Vec<ManifestStage>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestStage {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    #[serde(default)]
    pub log: Option<PathBuf>,
    #[serde(default)]
    pub mem: Option<f64>,
    #[serde(default)]
    pub procs: Option<u32>,
}

pub fn load(path: &Path) -> Result<StageDag> {
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<StageDag> {
    let manifest: PipelineManifest =
        serde_yaml::from_str(contents).map_err(|e| Error::Serialization(e.to_string()))?;

    let mut dag = StageDag::new();
    for entry in manifest.stages {
        dag.add(build_stage(entry)?)?;
    }
    Ok(dag)
}

fn build_stage(entry: ManifestStage) -> Result<Stage> {
    let mut stage = match entry.args {
        Some(args) => {
            if !entry.inputs.is_empty() || !entry.outputs.is_empty() {
                return Err(Error::InvalidStage(
                    "command stages tag their files inside args".to_string(),
                ));
            }
            let fragments: Vec<ArgFragment> = args.iter().map(|raw| parse_fragment(raw)).collect();
            let mut stage = Stage::command(&fragments)?;
            if let Some(name) = entry.name {
                stage = stage.with_name(name);
            }
            stage
        }
        None => {
            let name = entry.name.ok_or_else(|| {
                Error::InvalidStage("a stage without args needs a name".to_string())
            })?;
            Stage::abstracted(name, entry.inputs, entry.outputs)
        }
    };

    if let Some(log) = entry.log {
        stage = stage.with_log(log);
    }
    if let Some(mem) = entry.mem {
        stage = stage.with_mem(mem);
    }
    if let Some(procs) = entry.procs {
        stage = stage.with_procs(procs);
    }
    Ok(stage)
}

fn parse_fragment(raw: &str) -> ArgFragment {
    if let Some(path) = raw.strip_prefix("in:") {
        ArgFragment::input(path)
    } else if let Some(path) = raw.strip_prefix("out:") {
        ArgFragment::output(path)
    } else if let Some(path) = raw.strip_prefix("log:") {
        ArgFragment::log(path)
    } else {
        ArgFragment::text(raw)
    }
}
