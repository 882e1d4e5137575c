//! Local stage process execution for Cascade.

pub mod process;

pub use process::{StageOutcome, execute_stage};
