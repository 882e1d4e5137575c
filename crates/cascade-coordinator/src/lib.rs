//! HTTP coordinator for Cascade.
//!
//! A single authoritative service: all scheduler state sits behind one
//! mutex, every remote operation executes atomically against it, and
//! workers are fully parallel with each other and with the coordinator.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use server::Coordinator;
pub use state::AppState;
