use crate::{Instance, InstanceDao, RegisterDao, Registrable, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

struct Tables<E: Registrable> {
    by_id: BTreeMap<i32, E>,
    by_key: HashMap<E::Key, i32>,
}

/// In-process [`RegisterDao`]. Both indexes sit behind one lock so inserts
/// check key and identifier uniqueness atomically.
pub struct MemoryDao<E: Registrable> {
    tables: RwLock<Tables<E>>,
}

impl<E: Registrable> MemoryDao<E> {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                by_id: BTreeMap::new(),
                by_key: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored record, ordered by identifier.
    pub fn records(&self) -> Vec<E> {
        self.tables.read().by_id.values().cloned().collect()
    }
}

impl<E: Registrable> Default for MemoryDao<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<E: Registrable> RegisterDao<E> for MemoryDao<E> {
    async fn find_id(&self, key: &E::Key) -> Result<i32, StorageError> {
        Ok(self.tables.read().by_key.get(key).copied().unwrap_or(0))
    }

    async fn min_max(&self) -> Result<(i32, i32), StorageError> {
        let tables = self.tables.read();
        let min = tables.by_id.first_key_value().map_or(0, |(id, _)| *id);
        let max = tables.by_id.last_key_value().map_or(0, |(id, _)| *id);
        Ok((min, max))
    }

    async fn insert(&self, entity: &E) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let key = entity.key();
        if let Some(id) = tables.by_key.get(&key) {
            return Err(StorageError::KeyExists {
                kind: E::KIND,
                id: *id,
            });
        }
        if tables.by_id.contains_key(&entity.id()) {
            return Err(StorageError::IdConflict {
                kind: E::KIND,
                id: entity.id(),
            });
        }
        tables.by_key.insert(key, entity.id());
        tables.by_id.insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn upsert(&self, entity: &E) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let key = entity.key();
        // The key moves to the new id; its old record goes.
        if let Some(old_id) = tables.by_key.get(&key).copied() {
            if old_id != entity.id() {
                tables.by_id.remove(&old_id);
            }
        }
        // So does whichever key held the new id before.
        if let Some(previous) = tables.by_id.insert(entity.id(), entity.clone()) {
            tables.by_key.remove(&previous.key());
        }
        tables.by_key.insert(key, entity.id());
        Ok(())
    }

    async fn get(&self, id: i32) -> Result<Option<E>, StorageError> {
        Ok(self.tables.read().by_id.get(&id).cloned())
    }
}

#[async_trait::async_trait]
impl InstanceDao for MemoryDao<Instance> {
    async fn heartbeat(&self, instance_id: i32, heartbeat_time: i64) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let instance = tables
            .by_id
            .get_mut(&instance_id)
            .ok_or(StorageError::NotFound {
                kind: Instance::KIND,
                id: instance_id,
            })?;
        instance.heartbeat_time = heartbeat_time;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceName;

    #[tokio::test]
    async fn insert_enforces_both_uniqueness_rules() {
        let dao = MemoryDao::<ServiceName>::new();
        let mut first = ServiceName::new(1, "/a", 0);
        first.service_id = -1;
        dao.insert(&first).await.unwrap();

        let mut same_id = ServiceName::new(1, "/b", 0);
        same_id.service_id = -1;
        assert_eq!(
            dao.insert(&same_id).await,
            Err(StorageError::IdConflict {
                kind: "service name",
                id: -1
            })
        );

        let mut same_key = ServiceName::new(1, "/a", 0);
        same_key.service_id = 2;
        assert_eq!(
            dao.insert(&same_key).await,
            Err(StorageError::KeyExists {
                kind: "service name",
                id: -1
            })
        );

        assert_eq!(dao.min_max().await.unwrap(), (-1, -1));
        assert_eq!(dao.find_id(&(1, "/a".to_string())).await.unwrap(), -1);
        assert_eq!(dao.find_id(&(1, "/b".to_string())).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_record_and_key() {
        let dao = MemoryDao::<Instance>::new();
        let mut instance = Instance::new(-1, "agent-a", 10, String::new());
        instance.instance_id = 7;
        dao.upsert(&instance).await.unwrap();

        let mut moved = Instance::new(-1, "agent-b", 20, String::new());
        moved.instance_id = 7;
        dao.upsert(&moved).await.unwrap();

        assert_eq!(dao.len(), 1);
        assert_eq!(dao.find_id(&(-1, "agent-a".to_string())).await.unwrap(), 0);
        assert_eq!(dao.find_id(&(-1, "agent-b".to_string())).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn upsert_moves_key_to_new_id() {
        let dao = MemoryDao::<Instance>::new();
        let mut instance = Instance::new(-1, "agent-a", 10, String::new());
        instance.instance_id = 1;
        dao.insert(&instance).await.unwrap();

        instance.instance_id = 7;
        dao.upsert(&instance).await.unwrap();

        assert_eq!(dao.len(), 1);
        assert_eq!(dao.find_id(&(-1, "agent-a".to_string())).await.unwrap(), 7);
        assert_eq!(dao.get(1).await.unwrap(), None);
        assert_eq!(dao.min_max().await.unwrap(), (7, 7));

        // Key uniqueness still holds for later inserts.
        let mut again = Instance::new(-1, "agent-a", 30, String::new());
        again.instance_id = 8;
        assert!(matches!(
            dao.insert(&again).await,
            Err(StorageError::KeyExists { id: 7, .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_updates_known_instances() {
        let dao = MemoryDao::<Instance>::new();
        let mut instance = Instance::new(-1, "agent-a", 10, String::new());
        instance.instance_id = 1;
        dao.insert(&instance).await.unwrap();

        dao.heartbeat(1, 99).await.unwrap();
        assert_eq!(dao.get(1).await.unwrap().unwrap().heartbeat_time, 99);
        assert!(matches!(
            dao.heartbeat(2, 99).await,
            Err(StorageError::NotFound { id: 2, .. })
        ));
    }
}
