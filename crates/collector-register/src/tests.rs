use crate::{
    Application, Instance, MemoryDao, OsInfo, RegisterConfig, RegisterDao, RegisterError,
    RegisterServices, RetryPolicy, ServiceName, Storage, StorageError,
};
use collector_worker::{LoopbackChannel, Peer, WorkerRegistry};
use core::time::Duration;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

struct Stores {
    applications: Arc<MemoryDao<Application>>,
    instances: Arc<MemoryDao<Instance>>,
    service_names: Arc<MemoryDao<ServiceName>>,
}

impl Stores {
    fn new() -> Self {
        Self {
            applications: Arc::new(MemoryDao::new()),
            instances: Arc::new(MemoryDao::new()),
            service_names: Arc::new(MemoryDao::new()),
        }
    }

    fn storage(&self) -> Storage {
        Storage {
            applications: Arc::clone(&self.applications) as Arc<dyn RegisterDao<Application>>,
            instances: Arc::clone(&self.instances) as Arc<dyn RegisterDao<Instance>>,
            heartbeats: Arc::clone(&self.instances) as Arc<dyn crate::InstanceDao>,
            service_names: Arc::clone(&self.service_names) as Arc<dyn RegisterDao<ServiceName>>,
        }
    }
}

struct Node {
    registry: Arc<WorkerRegistry>,
    services: Arc<RegisterServices>,
}

fn config() -> RegisterConfig {
    RegisterConfig {
        serial_instances: 2,
        retry: RetryPolicy::new(200, Duration::from_millis(5)),
        ..RegisterConfig::default()
    }
}

fn start_node(address: &str, storage: &Storage, config: &RegisterConfig) -> Node {
    let registry = Arc::new(WorkerRegistry::with_local_address(address));
    let services = RegisterServices::install(&registry, storage, config).unwrap();
    registry.start().unwrap();
    Node {
        registry,
        services: Arc::new(services),
    }
}

fn os_info() -> OsInfo {
    OsInfo {
        os_name: "Linux".into(),
        host_name: "agent-host".into(),
        process_no: 1,
        ipv4s: vec!["10.0.0.1".into()],
    }
}

/// Storage whose writes always fail.
struct Unwritable;

#[async_trait::async_trait]
impl<E: crate::Registrable> RegisterDao<E> for Unwritable {
    async fn find_id(&self, _key: &E::Key) -> Result<i32, StorageError> {
        Ok(0)
    }

    async fn min_max(&self) -> Result<(i32, i32), StorageError> {
        Ok((0, 0))
    }

    async fn insert(&self, _entity: &E) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".into()))
    }

    async fn upsert(&self, _entity: &E) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".into()))
    }

    async fn get(&self, _id: i32) -> Result<Option<E>, StorageError> {
        Ok(None)
    }
}

#[tokio::test]
async fn instance_ids_start_at_one_and_are_cached() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());
    let instances = &node.services.instances;

    let a = instances
        .get_or_create_instance_id(-1, "agent-a", 100, &os_info())
        .await
        .unwrap();
    let b = instances
        .get_or_create_instance_id(-1, "agent-b", 100, &os_info())
        .await
        .unwrap();
    assert_eq!((a, b), (1, 2));
    assert_eq!(instances.service().dispatched(), 2);

    let again = instances
        .get_or_create_instance_id(-1, "agent-a", 200, &os_info())
        .await
        .unwrap();
    assert_eq!(again, 1);
    assert_eq!(instances.service().dispatched(), 2);
    assert_eq!(stores.instances.len(), 2);
}

#[tokio::test]
async fn service_names_bootstrap_with_reserved_record() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());
    let names = &node.services.service_names;

    assert_eq!(names.get_or_create_service_id(42, "checkout").await.unwrap(), 0);
    assert_eq!(names.resolve_service_id(42, "checkout").await.unwrap(), -1);
    assert_eq!(names.resolve_service_id(42, "cart").await.unwrap(), 2);

    let stored: Vec<_> = stores
        .service_names
        .records()
        .into_iter()
        .map(|record| (record.service_id, record.service_name))
        .collect();
    assert_eq!(
        stored,
        vec![
            (-1, "checkout".to_string()),
            (1, "None".to_string()),
            (2, "cart".to_string())
        ]
    );

    let dispatched = names.service().dispatched();
    assert_eq!(names.get_or_create_service_id(42, "checkout").await.unwrap(), -1);
    assert_eq!(names.service().dispatched(), dispatched);
}

#[tokio::test]
async fn applications_bootstrap_with_user_record() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());
    let applications = &node.services.applications;

    assert_eq!(applications.resolve_application_id("shop").await.unwrap(), -1);
    assert_eq!(applications.resolve_application_id("billing").await.unwrap(), 2);

    let user = stores.applications.get(1).await.unwrap().unwrap();
    assert_eq!(user.application_code, "User");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_for_one_key_share_an_id() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());

    let tasks = (0..8).map(|_| {
        let services = Arc::clone(&node.services);
        tokio::spawn(async move { services.service_names.resolve_service_id(42, "checkout").await })
    });
    let ids: HashSet<i32> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(ids, HashSet::from([-1]));
    assert_eq!(stores.service_names.len(), 2);

    let tasks = (0..8).map(|_| {
        let services = Arc::clone(&node.services);
        tokio::spawn(async move {
            services
                .instances
                .get_or_create_instance_id(-1, "agent-a", 100, &os_info())
                .await
        })
    });
    let ids: HashSet<i32> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(ids, HashSet::from([1]));
    assert_eq!(stores.instances.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_never_share_an_id() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());

    let tasks = (0..12).map(|i| {
        let services = Arc::clone(&node.services);
        tokio::spawn(async move {
            services
                .service_names
                .resolve_service_id(7, &format!("/endpoint/{i}"))
                .await
        })
    });
    let ids: HashSet<i32> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(ids.len(), 12);
    assert!(!ids.contains(&0));
    assert!(!ids.contains(&1));
    assert_eq!(stores.service_names.len(), 13);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_converge_on_shared_storage() {
    let stores = Stores::new();
    let storage = stores.storage();
    let node_a = start_node("node-a", &storage, &config());
    let node_b = start_node("node-b", &storage, &config());

    let peers = [
        Peer::new("node-a", Arc::new(LoopbackChannel::new(&node_a.registry))),
        Peer::new("node-b", Arc::new(LoopbackChannel::new(&node_b.registry))),
    ];
    node_a.services.connect_peers(&peers, None).unwrap();
    node_b.services.connect_peers(&peers, None).unwrap();

    let (from_a, from_b) = tokio::join!(
        node_a.services.service_names.resolve_service_id(3, "/pay"),
        node_b.services.service_names.resolve_service_id(3, "/pay"),
    );
    assert_eq!(from_a.unwrap(), from_b.unwrap());

    let os_a = os_info();
    let os_b = os_info();
    let (from_a, from_b) = tokio::join!(
        node_a
            .services
            .instances
            .get_or_create_instance_id(3, "agent-x", 100, &os_a),
        node_b
            .services
            .instances
            .get_or_create_instance_id(3, "agent-x", 100, &os_b),
    );
    assert_eq!(from_a.unwrap(), from_b.unwrap());
    assert_eq!(stores.instances.len(), 1);

    let mut ids = HashSet::new();
    for i in 0..6 {
        let node = if i % 2 == 0 { &node_a } else { &node_b };
        let id = node
            .services
            .applications
            .resolve_application_id(&format!("app-{i}"))
            .await
            .unwrap();
        assert!(ids.insert(id), "application id {id} handed out twice");
    }
}

#[tokio::test]
async fn failed_persist_leaves_cache_empty() {
    let stores = Stores::new();
    let mut storage = stores.storage();
    storage.instances = Arc::new(Unwritable);
    storage.service_names = Arc::new(Unwritable);
    let config = RegisterConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        ..config()
    };
    let node = start_node("local", &storage, &config);
    let instances = &node.services.instances;

    let err = instances
        .get_or_create_instance_id(-1, "agent-a", 100, &os_info())
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::Dispatch(_)));
    assert_eq!(instances.service().cached(&(-1, "agent-a".to_string())), None);

    assert!(instances
        .get_or_create_instance_id(-1, "agent-a", 100, &os_info())
        .await
        .is_err());
    assert_eq!(instances.service().dispatched(), 2);

    let err = node
        .services
        .service_names
        .resolve_service_id(1, "/never")
        .await
        .unwrap_err();
    assert!(matches!(err, RegisterError::NotAssigned { attempts: 3, .. }));
}

#[tokio::test]
async fn recover_and_heartbeat() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());
    let instances = &node.services.instances;

    instances
        .recover(7, -1, "agent-r", 100, &os_info())
        .await
        .unwrap();
    let id = instances
        .get_or_create_instance_id(-1, "agent-r", 100, &os_info())
        .await
        .unwrap();
    assert_eq!(id, 7);
    assert_eq!(instances.service().dispatched(), 0);

    instances.heartbeat(7, 12_345).await.unwrap();
    let stored = stores.instances.get(7).await.unwrap().unwrap();
    assert_eq!(stored.heartbeat_time, 12_345);
    assert_eq!(OsInfo::from_json(&stored.os_info).unwrap(), os_info());

    let err = instances.heartbeat(99, 1).await.unwrap_err();
    assert!(matches!(
        err,
        RegisterError::Storage(StorageError::NotFound { id: 99, .. })
    ));
}

#[tokio::test]
async fn recover_keeps_one_record_per_key() {
    let stores = Stores::new();
    let node = start_node("local", &stores.storage(), &config());
    let instances = &node.services.instances;

    let a = instances
        .get_or_create_instance_id(-1, "agent-a", 100, &os_info())
        .await
        .unwrap();
    let b = instances
        .get_or_create_instance_id(-1, "agent-b", 100, &os_info())
        .await
        .unwrap();
    assert_eq!((a, b), (1, 2));

    // agent-b comes back holding agent-a's id.
    instances
        .recover(1, -1, "agent-b", 100, &os_info())
        .await
        .unwrap();
    let stored: Vec<_> = stores
        .instances
        .records()
        .into_iter()
        .map(|record| (record.instance_id, record.agent_uuid))
        .collect();
    assert_eq!(stored, vec![(1, "agent-b".to_string())]);

    let service = instances.service();
    assert_eq!(service.cached(&(-1, "agent-a".to_string())), None);
    assert_eq!(service.cached(&(-1, "agent-b".to_string())), Some(1));

    let a = instances
        .get_or_create_instance_id(-1, "agent-a", 200, &os_info())
        .await
        .unwrap();
    assert_eq!(a, 2);
    assert_eq!(stores.instances.len(), 2);
}

#[tokio::test]
async fn install_twice_is_rejected() {
    let stores = Stores::new();
    let registry = Arc::new(WorkerRegistry::new());
    RegisterServices::install(&registry, &stores.storage(), &config()).unwrap();

    let err = RegisterServices::install(&registry, &stores.storage(), &config())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RegisterError::Dispatch(collector_worker::Error::DuplicateRole { .. })
    ));
}
