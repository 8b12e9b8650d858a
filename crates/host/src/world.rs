use std::collections::HashMap;

use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

use tether::{EntitySnapshot, EntityStore, EntityWorldId, StoreError};

const ARENA_HALF_EXTENT: f32 = 20.0;
const GRAVITY: f32 = 9.8;

/// Wire form of a [`Body`].
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BodyRecord {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
    /// Simulated here rather than received from a peer.
    pub local: bool,
}

impl Body {
    fn to_record(&self) -> BodyRecord {
        BodyRecord {
            position: self.position.to_array(),
            velocity: self.velocity.to_array(),
            radius: self.radius,
        }
    }

    fn from_record(record: &BodyRecord) -> Self {
        Self {
            position: Vec3::from_array(record.position),
            velocity: Vec3::from_array(record.velocity),
            radius: record.radius,
            local: false,
        }
    }
}

/// Bouncing bodies in a walled arena.
#[derive(Debug)]
pub struct DemoWorld {
    bodies: HashMap<EntityWorldId, Body>,
    next_entity_id: u64,
}

impl Default for DemoWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoWorld {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            next_entity_id: 1,
        }
    }

    /// Spawns `count` local bodies on a spiral around the arena center.
    pub fn seed(&mut self, count: usize) {
        let golden_angle = std::f32::consts::PI * (3.0 - 5f32.sqrt());
        for i in 0..count {
            let angle = i as f32 * golden_angle;
            let distance = 2.0 + i as f32 * 0.75;
            let (sin, cos) = angle.sin_cos();
            let position = Vec3::new(cos * distance, 5.0 + (i % 4) as f32, sin * distance);
            let velocity = Vec3::new(-sin * 4.0, 0.0, cos * 4.0);
            self.spawn_local(position, velocity, 0.5);
        }
    }

    pub fn spawn_local(&mut self, position: Vec3, velocity: Vec3, radius: f32) -> EntityWorldId {
        let id = self.allocate_id();
        self.bodies.insert(
            id,
            Body {
                position,
                velocity,
                radius,
                local: true,
            },
        );
        id
    }

    pub fn get(&self, id: EntityWorldId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    /// All bodies, local and replicated, in creation order.
    pub fn ids(&self) -> Vec<EntityWorldId> {
        let mut ids: Vec<_> = self.bodies.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn entity_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn local_count(&self) -> usize {
        self.bodies.values().filter(|body| body.local).count()
    }

    /// Advances local bodies; replicated ones only move when their owner
    /// sends an update.
    pub fn simulate(&mut self, dt: f32) {
        for body in self.bodies.values_mut().filter(|body| body.local) {
            body.velocity.y -= GRAVITY * dt;
            body.position += body.velocity * dt;

            if body.position.y < body.radius {
                body.position.y = body.radius;
                body.velocity.y = body.velocity.y.abs();
            }
            for axis in [0, 2] {
                let limit = ARENA_HALF_EXTENT - body.radius;
                if body.position[axis].abs() > limit {
                    body.position[axis] = body.position[axis].clamp(-limit, limit);
                    body.velocity[axis] = -body.velocity[axis];
                }
            }
        }
    }

    fn allocate_id(&mut self) -> EntityWorldId {
        let id = EntityWorldId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }
}

impl EntityStore for DemoWorld {
    fn snapshot(&self, id: EntityWorldId) -> Option<EntitySnapshot> {
        let body = self.bodies.get(&id)?;
        match EntitySnapshot::encode(&body.to_record()) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::error!("Failed to encode body {}: {}", id, e);
                None
            }
        }
    }

    fn create_from(&mut self, snapshot: &EntitySnapshot) -> Result<EntityWorldId, StoreError> {
        let record: BodyRecord = snapshot
            .decode()
            .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
        let id = self.allocate_id();
        self.bodies.insert(id, Body::from_record(&record));
        Ok(id)
    }

    fn apply_snapshot(
        &mut self,
        id: EntityWorldId,
        snapshot: &EntitySnapshot,
    ) -> Result<(), StoreError> {
        let record: BodyRecord = snapshot
            .decode()
            .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
        let body = self.bodies.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        body.position = Vec3::from_array(record.position);
        body.velocity = Vec3::from_array(record.velocity);
        body.radius = record.radius;
        Ok(())
    }

    fn destroy(&mut self, id: EntityWorldId) -> Result<(), StoreError> {
        self.bodies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
