pub mod bridge_config;
pub mod command;
pub mod errors;
pub mod github;
pub mod graph;
pub mod lint;
pub mod mail;
pub mod notes;
pub mod orchestrator;
pub mod telemetry;
