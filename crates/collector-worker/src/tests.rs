use crate::{
    BoxError, Error, LoopbackChannel, Peer, QueueConfig, RemoteChannel, Result, Role,
    SelectorKind, Worker, WorkerProvider, WorkerRef, WorkerRefs, WorkerRegistry,
};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore};

const COUNT: Role<u64> = Role::new("CountWorker", SelectorKind::Rolling);
const GHOST: Role<u64> = Role::new("Ghost", SelectorKind::Rolling);
const GATED: Role<u64> = Role::new("GatedWorker", SelectorKind::Rolling);
const DOUBLE: Role<u64, u64> = Role::new("DoubleWorker", SelectorKind::Rolling);
const FRONT: Role<u64, u64> = Role::new("FrontWorker", SelectorKind::Rolling);
const ECHO: Role<u64, String> = Role::new("EchoWorker", SelectorKind::HashCode);
const PARTITIONED: Role<()> = Role::new("PartitionedWorker", SelectorKind::HashCode);

/// Records which instance handled each message.
struct Count {
    instance: usize,
    hits: Arc<Mutex<Vec<usize>>>,
}

#[crate::async_trait]
impl Worker for Count {
    type Message = u64;
    type Output = ();

    async fn on_work(&self, _message: u64) -> core::result::Result<(), BoxError> {
        self.hits.lock()[self.instance] += 1;
        Ok(())
    }
}

fn count_provider(instances: usize, hits: &Arc<Mutex<Vec<usize>>>) -> WorkerProvider<Count> {
    let next = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(hits);
    WorkerProvider::new(COUNT, move || Count {
        instance: next.fetch_add(1, Ordering::Relaxed),
        hits: Arc::clone(&hits),
    })
    .instances(instances)
}

/// Blocks on `gate` for every message so the test controls the queue depth.
struct Gated {
    started: Arc<Notify>,
    gate: Arc<Semaphore>,
    seen: Arc<Mutex<Vec<u64>>>,
}

#[crate::async_trait]
impl Worker for Gated {
    type Message = u64;
    type Output = ();

    async fn on_work(&self, message: u64) -> core::result::Result<(), BoxError> {
        self.started.notify_one();
        self.gate.acquire().await?.forget();
        self.seen.lock().push(message);
        Ok(())
    }
}

struct GatedHarness {
    registry: WorkerRegistry,
    started: Arc<Notify>,
    gate: Arc<Semaphore>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl GatedHarness {
    fn start(config: QueueConfig) -> Self {
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Semaphore::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let registry = WorkerRegistry::new();
        let (s, g, v) = (Arc::clone(&started), Arc::clone(&gate), Arc::clone(&seen));
        registry
            .register_provider(
                WorkerProvider::new(GATED, move || Gated {
                    started: Arc::clone(&s),
                    gate: Arc::clone(&g),
                    seen: Arc::clone(&v),
                })
                .queued(config),
            )
            .unwrap();
        registry.start().unwrap();

        Self {
            registry,
            started,
            gate,
            seen,
        }
    }

    async fn wait_for_seen(&self, len: usize) -> Vec<u64> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.seen.lock().len() >= len {
                    return self.seen.lock().clone();
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }
}

struct Double;

#[crate::async_trait]
impl Worker for Double {
    type Message = u64;
    type Output = u64;

    async fn on_work(&self, message: u64) -> core::result::Result<u64, BoxError> {
        if message == 0 {
            return Err("zero is not allowed".into());
        }
        Ok(message * 2)
    }
}

/// Forwards to the doubling role it resolved during boot.
struct Front {
    back: Option<WorkerRefs<u64, u64>>,
}

#[crate::async_trait]
impl Worker for Front {
    type Message = u64;
    type Output = u64;

    fn pre_start(&mut self, registry: &WorkerRegistry) -> Result<()> {
        self.back = Some(registry.lookup(&DOUBLE)?);
        Ok(())
    }

    async fn on_work(&self, message: u64) -> core::result::Result<u64, BoxError> {
        let back = self.back.as_ref().ok_or("front worker not started")?;
        Ok(back.ask(message).await? + 1)
    }
}

struct Echo {
    node: &'static str,
}

#[crate::async_trait]
impl Worker for Echo {
    type Message = u64;
    type Output = String;

    async fn on_work(&self, message: u64) -> core::result::Result<String, BoxError> {
        Ok(format!("{}:{message}", self.node))
    }
}

struct Partitioned;

#[crate::async_trait]
impl Worker for Partitioned {
    type Message = ();
    type Output = ();

    async fn on_work(&self, _message: ()) -> core::result::Result<(), BoxError> {
        Ok(())
    }
}

/// Peer that never answers.
struct Unresponsive;

#[crate::async_trait]
impl RemoteChannel for Unresponsive {
    async fn dispatch(&self, _role: &str, _payload: Bytes) -> Result<Bytes> {
        core::future::pending().await
    }
}

#[tokio::test]
async fn duplicate_role_keeps_first_provider() {
    let hits = Arc::new(Mutex::new(vec![0; 2]));
    let registry = WorkerRegistry::new();

    registry.register_provider(count_provider(1, &hits)).unwrap();
    let err = registry
        .register_provider(count_provider(2, &hits))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateRole { ref role } if role == "CountWorker"));

    registry.start().unwrap();
    assert_eq!(registry.lookup(&COUNT).unwrap().len(), 1);
}

#[tokio::test]
async fn lookup_unknown_role_fails() {
    let registry = WorkerRegistry::new();
    registry.start().unwrap();

    let err = registry.lookup(&GHOST).unwrap_err();
    assert!(matches!(err, Error::WorkerNotFound { ref role } if role == "Ghost"));
    assert!(matches!(
        registry.find_provider("Ghost"),
        Err(Error::ProviderNotFound { .. })
    ));
}

#[tokio::test]
async fn rolling_selector_spreads_evenly() {
    let hits = Arc::new(Mutex::new(vec![0; 3]));
    let registry = WorkerRegistry::new();
    registry.register_provider(count_provider(3, &hits)).unwrap();
    registry.start().unwrap();

    let refs = registry.lookup(&COUNT).unwrap();
    assert_eq!(refs.len(), 3);
    for i in 0..9 {
        refs.tell(i).await.unwrap();
    }

    assert_eq!(*hits.lock(), vec![3, 3, 3]);
}

#[tokio::test]
async fn hash_role_requires_partition_key() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(WorkerProvider::new(PARTITIONED, || Partitioned))
        .unwrap();
    registry.start().unwrap();

    let err = registry.lookup(&PARTITIONED).unwrap().tell(()).await.unwrap_err();
    assert!(matches!(err, Error::MissingPartitionKey { .. }));
}

#[tokio::test]
async fn reject_queue_fails_when_full() {
    let harness = GatedHarness::start(QueueConfig::reject(2));
    let refs = harness.registry.lookup(&GATED).unwrap();

    refs.tell(1).await.unwrap();
    harness.started.notified().await;

    refs.tell(2).await.unwrap();
    refs.tell(3).await.unwrap();
    let err = refs.tell(4).await.unwrap_err();
    assert!(matches!(err, Error::QueueFull { ref role } if role == "GatedWorker"));

    harness.gate.add_permits(3);
    assert_eq!(harness.wait_for_seen(3).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn drop_oldest_queue_evicts_head() {
    let harness = GatedHarness::start(QueueConfig::drop_oldest(2));
    let refs = harness.registry.lookup(&GATED).unwrap();

    refs.tell(1).await.unwrap();
    harness.started.notified().await;

    for message in 2..=4 {
        refs.tell(message).await.unwrap();
    }

    harness.gate.add_permits(3);
    assert_eq!(harness.wait_for_seen(3).await, vec![1, 3, 4]);
}

#[tokio::test]
async fn rapid_tells_before_consumer_runs() {
    // The consumer task cannot run before the test yields, so all three
    // messages race for the two slots.
    let harness = GatedHarness::start(QueueConfig::reject(2));
    harness.gate.add_permits(3);
    let refs = harness.registry.lookup(&GATED).unwrap();

    refs.tell(1).await.unwrap();
    refs.tell(2).await.unwrap();
    assert!(matches!(refs.tell(3).await, Err(Error::QueueFull { .. })));
    assert_eq!(harness.wait_for_seen(2).await, vec![1, 2]);

    let harness = GatedHarness::start(QueueConfig::drop_oldest(2));
    harness.gate.add_permits(3);
    let refs = harness.registry.lookup(&GATED).unwrap();

    for message in 1..=3 {
        refs.tell(message).await.unwrap();
    }
    assert_eq!(harness.wait_for_seen(2).await, vec![2, 3]);
}

#[tokio::test]
async fn queued_ask_returns_reply() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(
            WorkerProvider::new(DOUBLE, || Double)
                .queued(QueueConfig::block(8))
                .instances(2),
        )
        .unwrap();
    registry.start().unwrap();

    let refs = registry.lookup(&DOUBLE).unwrap();
    assert_eq!(refs.ask(21).await.unwrap(), 42);
    assert_eq!(refs.ask(5).await.unwrap(), 10);

    let err = refs.ask(0).await.unwrap_err();
    assert!(matches!(err, Error::Invocation { ref role, .. } if role == "DoubleWorker"));
}

#[tokio::test]
async fn queued_tell_failure_is_dropped() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(WorkerProvider::new(DOUBLE, || Double).queued(QueueConfig::default()))
        .unwrap();
    registry.start().unwrap();

    let refs = registry.lookup(&DOUBLE).unwrap();
    refs.tell(0).await.unwrap();
    assert_eq!(refs.ask(4).await.unwrap(), 8);
}

#[tokio::test]
async fn sync_failure_surfaces_to_caller() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(WorkerProvider::new(DOUBLE, || Double))
        .unwrap();
    registry.start().unwrap();

    let err = registry.lookup(&DOUBLE).unwrap().tell(0).await.unwrap_err();
    assert!(matches!(err, Error::Invocation { .. }));
    assert!(err.to_string().contains("DoubleWorker"));
}

#[tokio::test]
async fn boot_creates_dependencies_first() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(
            WorkerProvider::new(FRONT, || Front { back: None }).with_dependency(DOUBLE.name()),
        )
        .unwrap();
    registry
        .register_provider(WorkerProvider::new(DOUBLE, || Double).queued(QueueConfig::default()))
        .unwrap();
    registry.start().unwrap();

    assert_eq!(registry.lookup(&FRONT).unwrap().ask(10).await.unwrap(), 21);
}

#[test]
fn boot_fails_on_missing_dependency() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(
            WorkerProvider::new(FRONT, || Front { back: None }).with_dependency(DOUBLE.name()),
        )
        .unwrap();

    let err = registry.start().unwrap_err();
    assert!(matches!(err, Error::ProviderNotFound { ref role } if role == "DoubleWorker"));
}

#[tokio::test]
async fn failed_creation_is_final() {
    let registry = WorkerRegistry::new();
    // Front's pre_start looks up DOUBLE, which nobody provides.
    registry
        .register_provider(WorkerProvider::new(FRONT, || Front { back: None }))
        .unwrap();

    let err = registry.start().unwrap_err();
    assert!(matches!(err, Error::WorkerNotFound { ref role } if role == "DoubleWorker"));

    let err = registry.start().unwrap_err();
    assert!(matches!(err, Error::BootFailed { ref reason } if reason.contains("FrontWorker")));
    assert!(registry.is_shutting_down());
    assert!(registry.lookup(&FRONT).is_err());
}

#[test]
fn boot_fails_on_dependency_cycle() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(
            WorkerProvider::new(FRONT, || Front { back: None }).with_dependency(DOUBLE.name()),
        )
        .unwrap();
    registry
        .register_provider(WorkerProvider::new(DOUBLE, || Double).with_dependency(FRONT.name()))
        .unwrap();

    let Err(Error::DependencyCycle { mut roles }) = registry.start() else {
        panic!("expected a dependency cycle");
    };
    roles.sort();
    assert_eq!(roles, vec!["DoubleWorker", "FrontWorker"]);
}

#[test]
fn put_rejects_mismatched_types() {
    const MISTYPED: Role<String, u64> = Role::new("DoubleWorker", SelectorKind::Rolling);

    let registry = WorkerRegistry::new();
    registry
        .put(&DOUBLE, WorkerRef::sync(DOUBLE.name(), Arc::new(Double)))
        .unwrap();

    assert!(matches!(
        registry.lookup(&MISTYPED),
        Err(Error::RoleTypeMismatch { .. })
    ));
}

fn echo_node(address: &'static str) -> Arc<WorkerRegistry> {
    let registry = Arc::new(WorkerRegistry::with_local_address(address));
    registry
        .register_provider(WorkerProvider::new(ECHO, move || Echo { node: address }).remote())
        .unwrap();
    registry.start().unwrap();
    registry
}

#[tokio::test]
async fn remote_role_resolves_to_same_node_everywhere() {
    let node_a = echo_node("node-a");
    let node_b = echo_node("node-b");
    let peers = [
        Peer::new("node-a", Arc::new(LoopbackChannel::new(&node_a))),
        Peer::new("node-b", Arc::new(LoopbackChannel::new(&node_b))),
    ];
    node_a.connect_peers(&ECHO, &peers, None).unwrap();
    node_b.connect_peers(&ECHO, &peers, None).unwrap();

    let refs_a = node_a.lookup(&ECHO).unwrap();
    let refs_b = node_b.lookup(&ECHO).unwrap();
    assert_eq!(refs_a.len(), 2);
    assert_eq!(refs_b.len(), 2);
    assert_eq!(node_a.remote_roles(), vec!["EchoWorker"]);

    assert_eq!(refs_a.ask(4).await.unwrap(), "node-a:4");
    assert_eq!(refs_b.ask(4).await.unwrap(), "node-a:4");
    assert_eq!(refs_a.ask(7).await.unwrap(), "node-b:7");
    assert_eq!(refs_b.ask(7).await.unwrap(), "node-b:7");
}

#[tokio::test]
async fn dispatch_to_unknown_remote_role_fails() {
    let registry = echo_node("node-a");
    let err = registry
        .dispatch_remote("Ghost", Bytes::from_static(b"1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WorkerNotFound { .. }));

    let err = registry
        .dispatch_remote("EchoWorker", Bytes::from_static(b"not json"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Codec { .. }));
}

#[tokio::test(start_paused = true)]
async fn remote_call_times_out() {
    let peer = Peer::new("node-z", Arc::new(Unresponsive));
    let remote: WorkerRef<u64, String> =
        WorkerRef::wire(ECHO.name(), peer, Some(Duration::from_millis(50)));

    let err = remote.ask(1).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_millis(50)));
}

#[tokio::test]
async fn shutdown_refuses_queued_work() {
    let registry = WorkerRegistry::new();
    registry
        .register_provider(WorkerProvider::new(DOUBLE, || Double).queued(QueueConfig::default()))
        .unwrap();
    registry.start().unwrap();
    let refs = registry.lookup(&DOUBLE).unwrap();

    registry.shutdown(Duration::from_secs(1)).await;

    assert!(registry.is_shutting_down());
    assert!(matches!(refs.tell(1).await, Err(Error::ServiceShutdown)));
}
