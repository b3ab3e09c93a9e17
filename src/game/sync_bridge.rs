//! Copies committed body transforms onto renderables after each step.
//!
//! The bridge is the only writer of a physics-driven entity's visual
//! transform. It keeps its own table from entity to body; the physics layer
//! never sees rendering types.

use std::collections::{BTreeMap, HashMap};

use rapier2d::prelude::RigidBodyHandle;
use serde::Serialize;
use tracing::{debug, warn};

use super::physics::{EntityId, PhysicsWorld};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisualTransform {
    pub position: [f32; 2],
    /// Radians, counter-clockwise
    pub rotation: f32,
}

/// Rendering-layer boundary: something with a settable position/rotation per entity.
pub trait VisualSink {
    fn write_transform(&mut self, entity: EntityId, transform: VisualTransform);
}

/// In-memory sink, counting writes per entity.
#[derive(Debug, Default)]
pub struct VisualStore {
    transforms: HashMap<EntityId, VisualTransform>,
    writes: HashMap<EntityId, u64>,
}

impl VisualStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityId) -> Option<VisualTransform> {
        self.transforms.get(&entity).copied()
    }

    pub fn write_count(&self, entity: EntityId) -> u64 {
        self.writes.get(&entity).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl VisualSink for VisualStore {
    fn write_transform(&mut self, entity: EntityId, transform: VisualTransform) {
        self.transforms.insert(entity, transform);
        *self.writes.entry(entity).or_insert(0) += 1;
    }
}

#[derive(Default)]
pub struct SyncBridge {
    tracked: BTreeMap<EntityId, RigidBodyHandle>,
    last_synced_step: Option<u64>,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `body` for `entity`. A second registration replaces the first.
    pub fn register(&mut self, entity: EntityId, body: RigidBodyHandle) {
        if let Some(previous) = self.tracked.insert(entity, body) {
            if previous != body {
                warn!(
                    "[SyncBridge] {} re-registered, replacing body {:?} with {:?}",
                    entity, previous, body
                );
            } else {
                warn!("[SyncBridge] {} registered twice", entity);
            }
        }
    }

    pub fn unregister(&mut self, entity: EntityId) -> Option<RigidBodyHandle> {
        self.tracked.remove(&entity)
    }

    pub fn is_tracked(&self, entity: EntityId) -> bool {
        self.tracked.contains_key(&entity)
    }

    pub fn body_of(&self, entity: EntityId) -> Option<RigidBodyHandle> {
        self.tracked.get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Writes every tracked body's transform to `sink`, once per completed step.
    ///
    /// Returns the number of transforms written; 0 if the world has not
    /// stepped since the previous sync.
    pub fn sync(&mut self, world: &PhysicsWorld, sink: &mut impl VisualSink) -> usize {
        let step = world.step_count();
        if step == 0 || self.last_synced_step == Some(step) {
            return 0;
        }
        self.last_synced_step = Some(step);

        let mut written = 0;
        let mut vanished = Vec::new();
        for (&entity, &body) in &self.tracked {
            let (Some(position), Some(rotation)) =
                (world.body_position(body), world.body_rotation(body))
            else {
                vanished.push(entity);
                continue;
            };
            sink.write_transform(
                entity,
                VisualTransform {
                    position: [position.x, position.y],
                    rotation,
                },
            );
            written += 1;
        }

        for entity in vanished {
            warn!("[SyncBridge] Body for {} no longer exists, untracking", entity);
            self.tracked.remove(&entity);
        }
        debug!("[SyncBridge] Synced {} transforms at step {}", written, step);
        written
    }
}
