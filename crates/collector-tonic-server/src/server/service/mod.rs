//! gRPC services exposed by a collector node.
//!
//! ## Structure
//!
//! - [`remote`] - `RemoteCommon`, the node-to-node entry point delivering
//!   worker messages to locally deployed remote roles.
//! - [`register`] - `Register`, the agent-facing identifier registration.

pub mod register;
pub mod remote;
