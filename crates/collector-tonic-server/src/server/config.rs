use anyhow::bail;
use clap::{Parser, ValueEnum};
use collector_register::{RegisterConfig, RetryPolicy};
use collector_worker::{QueueConfig, QueuePolicy};
use core::time::Duration;

/// Overflow behavior of the serial register queues.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicyArg {
    Block,
    Reject,
    DropOldest,
}

impl From<QueuePolicyArg> for QueuePolicy {
    fn from(policy: QueuePolicyArg) -> Self {
        match policy {
            QueuePolicyArg::Block => QueuePolicy::Block,
            QueuePolicyArg::Reject => QueuePolicy::Reject,
            QueuePolicyArg::DropOldest => QueuePolicy::DropOldest,
        }
    }
}

/// Runtime configuration for the `collector-tonic-server` binary.
///
/// Every value can be given as a CLI argument or an environment variable
/// (also read from `.env`). Defaults suit a single-node deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "collector-tonic-server",
    version,
    about = "A collector node serving identifier registration and node-to-node dispatch over gRPC"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:11800" or "/tmp/collector.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:11800"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// URI under which peers reach this node.
    ///
    /// Must appear verbatim in `PEERS` when peers are configured: remote
    /// roles order their candidates by this address, and every node has to
    /// agree on the order.
    ///
    /// Environment variable: `ADVERTISE_ADDR`
    #[arg(long, env = "ADVERTISE_ADDR", default_value_t = String::from("http://127.0.0.1:11800"))]
    pub advertise_addr: String,

    /// Comma-separated URIs of every collector node, this one included.
    ///
    /// Leave empty for a single-node deployment.
    ///
    /// Environment variable: `PEERS`
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Serial register worker instances per entity kind.
    ///
    /// Environment variable: `SERIAL_INSTANCES`
    #[arg(long, env = "SERIAL_INSTANCES", default_value_t = 2)]
    pub serial_instances: usize,

    /// Capacity of each serial register worker queue.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = QueueConfig::DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// What a full serial register queue does with new requests.
    ///
    /// Environment variable: `QUEUE_POLICY`
    #[arg(long, env = "QUEUE_POLICY", value_enum, default_value_t = QueuePolicyArg::Block)]
    pub queue_policy: QueuePolicyArg,

    /// Deadline of calls to peer nodes in milliseconds; `0` waits indefinitely.
    ///
    /// Environment variable: `REMOTE_TIMEOUT_MS`
    #[arg(long, env = "REMOTE_TIMEOUT_MS", default_value_t = 0)]
    pub remote_timeout_ms: u64,

    /// Time each queued worker gets to finish its current message on
    /// shutdown, in milliseconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_MS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 5_000)]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub advertise_addr: String,
    pub peers: Vec<String>,
    pub register: RegisterConfig,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.serial_instances == 0 {
            bail!("SERIAL_INSTANCES must be greater than 0");
        }

        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }

        let peers: Vec<String> = args
            .peers
            .into_iter()
            .map(|peer| peer.trim().to_string())
            .filter(|peer| !peer.is_empty())
            .collect();

        for peer in peers.iter().chain(core::iter::once(&args.advertise_addr)) {
            if let Err(e) = peer.parse::<tonic::transport::Uri>() {
                bail!("invalid node address {peer:?}: {e}");
            }
        }

        if !peers.is_empty() && !peers.contains(&args.advertise_addr) {
            bail!(
                "ADVERTISE_ADDR ({}) must be listed in PEERS ({})",
                args.advertise_addr,
                peers.join(",")
            );
        }

        let remote_timeout =
            (args.remote_timeout_ms > 0).then(|| Duration::from_millis(args.remote_timeout_ms));

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            advertise_addr: args.advertise_addr,
            peers,
            register: RegisterConfig {
                serial_instances: args.serial_instances,
                queue: QueueConfig::new(args.queue_capacity, args.queue_policy.into()),
                // Register RPCs never wait for an identifier; agents re-poll.
                retry: RetryPolicy::default(),
                remote_timeout,
            },
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
        })
    }
}
