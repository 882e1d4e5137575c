//! Request handlers.

pub mod health;
pub mod stages;
pub mod workers;
