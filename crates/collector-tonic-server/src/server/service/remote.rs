//! Receiving end of node-to-node dispatch.

use crate::server::{
    node::Node,
    telemetry::{increment_remote_dispatch_errors, increment_remote_dispatches},
};
use collector_tonic_core::{
    Error,
    proto::{RemoteMessage, RemoteReply, remote_common_server::RemoteCommon},
};
use tonic::{Request, Response, Status};

/// Resolves the target role of each incoming message in the local registry
/// and runs the remote-deployed worker serving it.
#[derive(Clone)]
pub struct RemoteCommonService {
    node: Node,
}

impl RemoteCommonService {
    pub fn new(node: Node) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl RemoteCommon for RemoteCommonService {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(role = %req.get_ref().target_role)))]
    async fn dispatch(&self, req: Request<RemoteMessage>) -> Result<Response<RemoteReply>, Status> {
        if self.node.is_shutting_down() {
            return Err(Error::ServiceShutdown.into());
        }

        let RemoteMessage {
            target_role,
            payload,
        } = req.into_inner();
        if target_role.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "target_role must not be empty".to_string(),
            }
            .into());
        }

        increment_remote_dispatches(&target_role);
        match self.node.registry.dispatch_remote(&target_role, payload).await {
            Ok(payload) => Ok(Response::new(RemoteReply { payload })),
            Err(e) => {
                increment_remote_dispatch_errors(&target_role);
                #[cfg(feature = "tracing")]
                tracing::warn!("remote dispatch to {} failed: {}", target_role, e);
                Err(Error::from(e).into())
            }
        }
    }
}
