pub mod cluster;
pub mod config;
pub mod node;
pub mod service;
pub mod telemetry;
