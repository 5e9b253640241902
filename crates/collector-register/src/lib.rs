#![doc = include_str!("../README.md")]

mod cache;
mod config;
mod dao;
mod entity;
mod error;
mod id;
mod service;
mod worker;

pub use crate::cache::*;
pub use crate::config::*;
pub use crate::dao::*;
pub use crate::entity::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::service::*;
pub use crate::worker::*;

#[cfg(test)]
mod tests;
