//! Pipeline scheduling and orchestration for Cascade.

pub mod checkpoint;
pub mod dag;
pub mod scheduler;
pub mod script;

pub use checkpoint::CheckpointStore;
pub use dag::StageDag;
pub use scheduler::Scheduler;
pub use script::batch_script;
