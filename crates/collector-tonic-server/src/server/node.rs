//! Worker graph of a single collector node.

use crate::server::{cluster::connect_cluster, config::ServerConfig};
use collector_register::{RegisterServices, Storage};
use collector_worker::WorkerRegistry;
use core::time::Duration;
use std::sync::Arc;

/// The registry and the register services built on top of it.
#[derive(Clone)]
pub struct Node {
    pub registry: Arc<WorkerRegistry>,
    pub services: Arc<RegisterServices>,
}

impl Node {
    /// Registers every provider, starts the registry and connects the remote
    /// roles to the configured peers.
    ///
    /// Any failure here is fatal: a node must not serve traffic with an
    /// incomplete worker graph.
    pub fn boot(config: &ServerConfig, storage: &Storage) -> anyhow::Result<Self> {
        let registry = Arc::new(WorkerRegistry::with_local_address(
            config.advertise_addr.clone(),
        ));
        let services = RegisterServices::install(&registry, storage, &config.register)?;
        registry.start()?;

        connect_cluster(
            &services,
            &config.advertise_addr,
            &config.peers,
            config.register.remote_timeout,
        )?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            address = registry.local_address(),
            remote_roles = ?registry.remote_roles(),
            "worker graph started"
        );

        Ok(Self {
            registry,
            services: Arc::new(services),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.registry.is_shutting_down()
    }

    /// Stops accepting work and waits up to `grace` per queued worker.
    pub async fn shutdown(&self, grace: Duration) {
        self.registry.shutdown(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::server::config::CliArgs;

    fn config(args: &[&str]) -> ServerConfig {
        let args = CliArgs::try_parse_from(
            core::iter::once("collector-tonic-server").chain(args.iter().copied()),
        )
        .unwrap();
        ServerConfig::try_from(args).unwrap()
    }

    #[tokio::test]
    async fn single_node_boot_serves_register_roles() {
        let node = Node::boot(&config(&[]), &Storage::memory()).unwrap();
        assert_eq!(node.registry.remote_roles().len(), 3);

        let id = node
            .services
            .service_names
            .resolve_service_id(-1, "/orders")
            .await
            .unwrap();
        assert_eq!(id, -1);

        node.shutdown(Duration::from_millis(100)).await;
        assert!(node.is_shutting_down());
    }

    #[tokio::test]
    async fn clustered_boot_connects_peers_lazily() {
        let node = Node::boot(
            &config(&[
                "--advertise-addr",
                "http://127.0.0.1:11800",
                "--peers",
                "http://127.0.0.1:11800,http://127.0.0.1:1",
            ]),
            &Storage::memory(),
        )
        .unwrap();
        assert_eq!(node.registry.local_address(), "http://127.0.0.1:11800");
        node.shutdown(Duration::from_millis(100)).await;
    }
}
