//! Records that receive cluster-wide identifiers.
//!
//! Each entity is also the message sent through its register roles: callers
//! dispatch a provisional record with `id == 0` and the serial worker fills in
//! the identifier. Routing hashes the natural key, so every request for the
//! same key reaches the same serial worker anywhere in the cluster.

use crate::{Result, id};
use collector_worker::{Message, Role, SelectorKind, partition_hash};
use core::fmt::Debug;
use core::hash::Hash;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Identifier of the reserved application standing for end users.
pub const USER_APPLICATION_ID: i32 = 1;
pub const USER_APPLICATION_CODE: &str = "User";
/// Identifier of the reserved "no service" record.
pub const NONE_SERVICE_ID: i32 = 1;
pub const NONE_SERVICE_NAME: &str = "None";

pub const APPLICATION_REGISTER_REMOTE: Role<Application, i32> =
    Role::new("ApplicationRegisterRemoteWorker", SelectorKind::HashCode);
pub const APPLICATION_REGISTER_SERIAL: Role<Application, i32> =
    Role::new("ApplicationRegisterSerialWorker", SelectorKind::HashCode);
pub const INSTANCE_REGISTER_REMOTE: Role<Instance, i32> =
    Role::new("InstanceRegisterRemoteWorker", SelectorKind::HashCode);
pub const INSTANCE_REGISTER_SERIAL: Role<Instance, i32> =
    Role::new("InstanceRegisterSerialWorker", SelectorKind::HashCode);
pub const SERVICE_NAME_REGISTER_REMOTE: Role<ServiceName, i32> =
    Role::new("ServiceNameRegisterRemoteWorker", SelectorKind::HashCode);
pub const SERVICE_NAME_REGISTER_SERIAL: Role<ServiceName, i32> =
    Role::new("ServiceNameRegisterSerialWorker", SelectorKind::HashCode);

/// A record allocated through the get-or-create protocol.
pub trait Registrable:
    Message + Clone + Debug + Serialize + DeserializeOwned + Sync
{
    /// Natural key the identifier is allocated for.
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Short name used in logs and errors.
    const KIND: &'static str;
    /// Cluster-facing role; forwards to [`Registrable::SERIAL_ROLE`].
    const REMOTE_ROLE: Role<Self, i32>;
    /// Local queued role performing the allocation.
    const SERIAL_ROLE: Role<Self, i32>;
    /// Whether callers wait for the identifier instead of re-polling.
    const INLINE: bool;
    /// Identifier given to the first real record of an empty store.
    const FIRST_ID: i32;

    fn key(&self) -> Self::Key;

    fn id(&self) -> i32;

    fn set_id(&mut self, id: i32);

    /// Record written ahead of the first real one, if the kind reserves one.
    fn reserved() -> Option<Self> {
        None
    }

    /// Identifier following the current `(min, max)` range of the store.
    ///
    /// # Errors
    ///
    /// [`RegisterError::IdSpaceExhausted`](crate::RegisterError::IdSpaceExhausted).
    fn next_id(min: i32, max: i32) -> Result<i32>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub application_id: i32,
    pub application_code: String,
    pub register_time: i64,
}

impl Application {
    pub fn new(application_code: impl Into<String>, register_time: i64) -> Self {
        Self {
            application_id: 0,
            application_code: application_code.into(),
            register_time,
        }
    }
}

impl Message for Application {
    fn partition_key(&self) -> Option<u64> {
        Some(partition_hash(&self.application_code))
    }
}

impl Registrable for Application {
    type Key = String;

    const KIND: &'static str = "application";
    const REMOTE_ROLE: Role<Self, i32> = APPLICATION_REGISTER_REMOTE;
    const SERIAL_ROLE: Role<Self, i32> = APPLICATION_REGISTER_SERIAL;
    const INLINE: bool = false;
    const FIRST_ID: i32 = -1;

    fn key(&self) -> String {
        self.application_code.clone()
    }

    fn id(&self) -> i32 {
        self.application_id
    }

    fn set_id(&mut self, id: i32) {
        self.application_id = id;
    }

    fn reserved() -> Option<Self> {
        Some(Self {
            application_id: USER_APPLICATION_ID,
            application_code: USER_APPLICATION_CODE.to_string(),
            register_time: 0,
        })
    }

    fn next_id(min: i32, max: i32) -> Result<i32> {
        id::next_balanced_id(Self::KIND, min, max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: i32,
    pub application_id: i32,
    pub agent_uuid: String,
    pub register_time: i64,
    pub heartbeat_time: i64,
    /// [`OsInfo`] encoded as JSON.
    pub os_info: String,
}

impl Instance {
    pub fn new(
        application_id: i32,
        agent_uuid: impl Into<String>,
        register_time: i64,
        os_info: String,
    ) -> Self {
        Self {
            instance_id: 0,
            application_id,
            agent_uuid: agent_uuid.into(),
            register_time,
            heartbeat_time: register_time,
            os_info,
        }
    }
}

impl Message for Instance {
    fn partition_key(&self) -> Option<u64> {
        Some(partition_hash(&(self.application_id, self.agent_uuid.as_str())))
    }
}

impl Registrable for Instance {
    type Key = (i32, String);

    const KIND: &'static str = "instance";
    const REMOTE_ROLE: Role<Self, i32> = INSTANCE_REGISTER_REMOTE;
    const SERIAL_ROLE: Role<Self, i32> = INSTANCE_REGISTER_SERIAL;
    const INLINE: bool = true;
    const FIRST_ID: i32 = 1;

    fn key(&self) -> (i32, String) {
        (self.application_id, self.agent_uuid.clone())
    }

    fn id(&self) -> i32 {
        self.instance_id
    }

    fn set_id(&mut self, id: i32) {
        self.instance_id = id;
    }

    fn next_id(min: i32, max: i32) -> Result<i32> {
        id::next_sequential_id(Self::KIND, min, max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceName {
    pub service_id: i32,
    pub application_id: i32,
    pub service_name: String,
    pub register_time: i64,
}

impl ServiceName {
    pub fn new(application_id: i32, service_name: impl Into<String>, register_time: i64) -> Self {
        Self {
            service_id: 0,
            application_id,
            service_name: service_name.into(),
            register_time,
        }
    }
}

impl Message for ServiceName {
    fn partition_key(&self) -> Option<u64> {
        Some(partition_hash(&(self.application_id, self.service_name.as_str())))
    }
}

impl Registrable for ServiceName {
    type Key = (i32, String);

    const KIND: &'static str = "service name";
    const REMOTE_ROLE: Role<Self, i32> = SERVICE_NAME_REGISTER_REMOTE;
    const SERIAL_ROLE: Role<Self, i32> = SERVICE_NAME_REGISTER_SERIAL;
    const INLINE: bool = false;
    const FIRST_ID: i32 = -1;

    fn key(&self) -> (i32, String) {
        (self.application_id, self.service_name.clone())
    }

    fn id(&self) -> i32 {
        self.service_id
    }

    fn set_id(&mut self, id: i32) {
        self.service_id = id;
    }

    fn reserved() -> Option<Self> {
        Some(Self {
            service_id: NONE_SERVICE_ID,
            application_id: 0,
            service_name: NONE_SERVICE_NAME.to_string(),
            register_time: 0,
        })
    }

    fn next_id(min: i32, max: i32) -> Result<i32> {
        id::next_balanced_id(Self::KIND, min, max)
    }
}

/// Host description reported by an agent when its instance registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub os_name: String,
    pub host_name: String,
    pub process_no: i32,
    pub ipv4s: Vec<String>,
}

impl OsInfo {
    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// # Errors
    ///
    /// Propagates `serde_json` deserialization failures.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
