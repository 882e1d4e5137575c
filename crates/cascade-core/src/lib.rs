//! Cascade Core
//!
//! Core domain types, wire types, and error handling for Cascade.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod error;
pub mod fragment;
pub mod protocol;
pub mod stage;

pub use error::{Error, Result};
pub use fragment::ArgFragment;
pub use stage::{Stage, StagePayload, StageStatus};
