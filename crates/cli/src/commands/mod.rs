pub mod agents;
pub mod config;
pub mod simulate;
