//! gRPC transport between collector nodes.
//!
//! [`GrpcRemoteChannel`] carries worker messages to the `RemoteCommon`
//! service of a peer. Channels are connected lazily, so a node boots even
//! while some of its peers are still down; calls to an unreachable peer fail
//! with [`collector_worker::Error::Remote`].

use bytes::Bytes;
use collector_register::RegisterServices;
use collector_tonic_core::proto::{RemoteMessage, remote_common_client::RemoteCommonClient};
use collector_worker::{Error, Peer, RemoteChannel, async_trait};
use core::time::Duration;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

#[derive(Clone)]
pub struct GrpcRemoteChannel {
    address: String,
    client: RemoteCommonClient<Channel>,
}

impl GrpcRemoteChannel {
    /// Creates a lazily connected channel to the node at `address`.
    pub fn connect_lazy(address: &str, connect_timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut endpoint = Endpoint::from_shared(address.to_string())?.tcp_nodelay(true);
        if let Some(timeout) = connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        let client = RemoteCommonClient::new(endpoint.connect_lazy())
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd);

        Ok(Self {
            address: address.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RemoteChannel for GrpcRemoteChannel {
    async fn dispatch(&self, role: &str, payload: Bytes) -> collector_worker::Result<Bytes> {
        let request = RemoteMessage {
            target_role: role.to_string(),
            payload,
        };

        // Clients are cheap clones sharing the underlying channel.
        let mut client = self.client.clone();
        match client.dispatch(request).await {
            Ok(reply) => Ok(reply.into_inner().payload),
            Err(status) => Err(remote_error(&self.address, role, &status)),
        }
    }
}

fn remote_error(address: &str, role: &str, status: &Status) -> Error {
    match status.code() {
        Code::NotFound => Error::WorkerNotFound {
            role: role.to_string(),
        },
        _ => Error::Remote {
            role: role.to_string(),
            reason: format!("{address}: {:?}: {}", status.code(), status.message()),
        },
    }
}

/// Connects the register roles of this node to every configured peer.
///
/// The advertised address of this node is recognized among `peers` and
/// served in process; every other address gets a [`GrpcRemoteChannel`].
pub fn connect_cluster(
    services: &RegisterServices,
    advertise_addr: &str,
    peers: &[String],
    remote_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    if peers.is_empty() {
        return Ok(());
    }

    let mut nodes = Vec::with_capacity(peers.len());
    for address in peers.iter().filter(|address| *address != advertise_addr) {
        let channel = GrpcRemoteChannel::connect_lazy(address, remote_timeout)?;
        nodes.push(Peer::new(address.clone(), Arc::new(channel)));
    }

    services.connect_peers(&nodes, remote_timeout)?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        local = advertise_addr,
        remote = nodes.len(),
        "connected register roles to cluster"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_worker_not_found() {
        let err = remote_error("http://10.0.0.2:11800", "Ghost", &Status::not_found("gone"));
        assert!(matches!(err, Error::WorkerNotFound { role } if role == "Ghost"));
    }

    #[test]
    fn other_statuses_keep_peer_and_reason() {
        let err = remote_error(
            "http://10.0.0.2:11800",
            "Echo",
            &Status::unavailable("connection refused"),
        );
        let Error::Remote { role, reason } = err else {
            panic!("expected a remote error");
        };
        assert_eq!(role, "Echo");
        assert!(reason.contains("http://10.0.0.2:11800"));
        assert!(reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn rejects_malformed_addresses() {
        assert!(GrpcRemoteChannel::connect_lazy("not a uri", None).is_err());
        assert!(GrpcRemoteChannel::connect_lazy("http://127.0.0.1:1", None).is_ok());
    }
}
