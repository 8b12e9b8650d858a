use std::collections::HashMap;

use crate::error::StoreError;

use super::entity::{EntitySnapshot, EntityStore, EntityWorldId};

/// [`EntityStore`] keeping each entity as its raw snapshot.
#[derive(Debug)]
pub struct MemoryEntityStore {
    entities: HashMap<EntityWorldId, EntitySnapshot>,
    next_entity_id: u64,
    revision: u64,
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_entity_id: 1,
            revision: 0,
        }
    }

    pub fn spawn(&mut self, snapshot: EntitySnapshot) -> EntityWorldId {
        let id = self.allocate_id();
        self.entities.insert(id, snapshot);
        self.revision += 1;
        id
    }

    pub fn set(&mut self, id: EntityWorldId, snapshot: EntitySnapshot) -> Result<(), StoreError> {
        let entry = self.entities.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        *entry = snapshot;
        self.revision += 1;
        Ok(())
    }

    pub fn despawn(&mut self, id: EntityWorldId) -> Option<EntitySnapshot> {
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    pub fn get(&self, id: EntityWorldId) -> Option<&EntitySnapshot> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityWorldId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Ids in creation order.
    pub fn ids(&self) -> Vec<EntityWorldId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn allocate_id(&mut self) -> EntityWorldId {
        let id = EntityWorldId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }
}

impl EntityStore for MemoryEntityStore {
    fn snapshot(&self, id: EntityWorldId) -> Option<EntitySnapshot> {
        self.entities.get(&id).cloned()
    }

    fn create_from(&mut self, snapshot: &EntitySnapshot) -> Result<EntityWorldId, StoreError> {
        Ok(self.spawn(snapshot.clone()))
    }

    fn apply_snapshot(
        &mut self,
        id: EntityWorldId,
        snapshot: &EntitySnapshot,
    ) -> Result<(), StoreError> {
        self.set(id, snapshot.clone())
    }

    fn destroy(&mut self, id: EntityWorldId) -> Result<(), StoreError> {
        self.despawn(id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }
}
