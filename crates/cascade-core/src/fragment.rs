//! Tagged command-line fragments.
//!
//! A stage's argument vector is assembled from fragments, each tagged with
//! the role it plays: an input file the command reads, an output file it
//! produces, its log file, or plain text. Input and output sets are derived
//! by filtering the fragments, never by mutating the stage afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One element of a stage's argument vector, tagged by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgFragment {
    /// A file the command reads. Produces a dependency edge if another
    /// stage declares the same path as an output.
    Input(PathBuf),
    /// A file the command produces.
    Output(PathBuf),
    /// The stage's log file.
    Log(PathBuf),
    /// Literal argument text.
    Text(String),
}

impl ArgFragment {
    pub fn input(path: impl Into<PathBuf>) -> Self {
        ArgFragment::Input(path.into())
    }

    pub fn output(path: impl Into<PathBuf>) -> Self {
        ArgFragment::Output(path.into())
    }

    pub fn log(path: impl Into<PathBuf>) -> Self {
        ArgFragment::Log(path.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        ArgFragment::Text(text.into())
    }

    /// Render this fragment into its argv element.
    pub fn render(&self) -> String {
        match self {
            ArgFragment::Input(p) | ArgFragment::Output(p) | ArgFragment::Log(p) => {
                p.display().to_string()
            }
            ArgFragment::Text(t) => t.clone(),
        }
    }

    /// The path carried by file-typed fragments.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArgFragment::Input(p) | ArgFragment::Output(p) | ArgFragment::Log(p) => Some(p),
            ArgFragment::Text(_) => None,
        }
    }
}
