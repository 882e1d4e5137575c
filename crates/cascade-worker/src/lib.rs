//! Remote stage executor for Cascade.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod worker;

pub use client::CoordinatorClient;
pub use config::WorkerConfig;
pub use worker::Worker;
