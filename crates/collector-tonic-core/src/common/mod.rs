//! Shared gRPC contract of collector nodes.
//!
//! - [`proto`]: generated messages, clients and servers, plus conversions to
//!   the register types.
//! - [`error`]: the unified [`Error`] and its mapping onto `tonic::Status`.

pub mod error;
pub mod proto;

pub use error::*;
