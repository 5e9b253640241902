#![doc = include_str!("../README.md")]

pub mod common;
pub use common::*;
// Re-exported so downstream crates reach both layers through this crate.
pub use collector_register;
pub use collector_worker;
