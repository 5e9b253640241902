#![doc = include_str!("../README.md")]

mod consumer;
mod error;
mod message;
mod provider;
mod queue;
mod registry;
mod remote;
mod role;
mod selector;
mod worker;
mod worker_ref;

pub use crate::error::*;
pub use crate::message::*;
pub use crate::provider::*;
pub use crate::queue::{QueueConfig, QueuePolicy};
pub use crate::registry::*;
pub use crate::remote::{LoopbackChannel, Peer, RemoteChannel, decode, encode};
pub use crate::role::*;
pub use crate::selector::*;
pub use crate::worker::*;
pub use crate::worker_ref::*;
pub use async_trait::async_trait;

#[cfg(test)]
mod tests;
