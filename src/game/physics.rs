use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use crossbeam_channel::Receiver;
use rapier2d::parry::query::ShapeCastOptions;
use rapier2d::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::character_controller::{CharacterBody, ColliderSpec, ControllerHandle};
use super::collision_filter::{self, CollisionFilter};
use super::constants::physics as consts;

pub type Vec2 = nalgebra::Vector2<f32>;

/// Opaque identifier of a game entity, stored on colliders as a back-reference.
///
/// The physics layer never looks behind this id; the rendering and gameplay
/// layers resolve it through their own tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct EntityId(pub u64);

// Marks user_data as carrying an entity so the default 0 never aliases EntityId(0).
const USER_DATA_TAG: u128 = 1 << 64;

impl EntityId {
    pub fn to_user_data(self) -> u128 {
        USER_DATA_TAG | self.0 as u128
    }

    pub fn from_user_data(data: u128) -> Option<Self> {
        if data & USER_DATA_TAG == 0 {
            return None;
        }
        Some(Self(data as u64))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Fixed,
    Kinematic,
    Dynamic,
}

impl From<RigidBodyType> for BodyKind {
    fn from(kind: RigidBodyType) -> Self {
        match kind {
            RigidBodyType::Fixed => BodyKind::Fixed,
            RigidBodyType::Dynamic => BodyKind::Dynamic,
            RigidBodyType::KinematicPositionBased | RigidBodyType::KinematicVelocityBased => {
                BodyKind::Kinematic
            }
        }
    }
}

/// A start/stop contact between two colliders, resolved to entities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsEvent {
    pub started: bool,
    pub sensor: bool,
    pub entity_a: Option<EntityId>,
    pub entity_b: Option<EntityId>,
}

impl PhysicsEvent {
    /// True if the event involves `entity` on either side.
    pub fn involves(&self, entity: EntityId) -> bool {
        self.entity_a == Some(entity) || self.entity_b == Some(entity)
    }

    /// The entity on the other side of `entity`, if resolved.
    pub fn other(&self, entity: EntityId) -> Option<EntityId> {
        if self.entity_a == Some(entity) {
            self.entity_b
        } else if self.entity_b == Some(entity) {
            self.entity_a
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub collider: ColliderHandle,
    pub entity: Option<EntityId>,
    pub distance: f32,
    pub point: Vec2,
    pub normal: Vec2,
}

#[derive(Debug, Clone, Copy)]
pub struct ShapeHit {
    pub collider: ColliderHandle,
    pub entity: Option<EntityId>,
    /// Fraction of the cast translation travelled before impact.
    pub time_of_impact: f32,
    /// Outward normal of the obstacle at the contact.
    pub normal: Vec2,
}

#[derive(Debug, Error, PartialEq)]
pub enum PhysicsError {
    #[error("physics world has not been initialized")]
    WorldNotInitialized,
    #[error("controller offset must be positive, got {0}")]
    InvalidOffset(f32),
    #[error("controller up vector must be non-zero and finite")]
    InvalidUpVector,
    #[error("invalid collider: {0}")]
    InvalidCollider(String),
}

/// Integration and scheduling parameters, fixed at world creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Downward gravity magnitude for dynamic bodies (m/s²)
    pub gravity: f32,
    /// Length of one physics step (seconds)
    pub fixed_dt: f32,
    /// Substep cap per rendered frame
    pub max_substeps: u32,
    /// Longest real frame time accepted by the scheduler (seconds)
    pub max_frame_time: f32,
    pub solver_iterations: usize,
    pub contact_natural_frequency: f32,
    pub contact_damping_ratio: f32,
    /// Collision events buffered between two steps
    pub event_capacity: usize,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: consts::DEFAULT_GRAVITY,
            fixed_dt: consts::TIMESTEP,
            max_substeps: consts::MAX_SUBSTEPS,
            max_frame_time: consts::MAX_FRAME_TIME,
            solver_iterations: consts::SOLVER_ITERATIONS,
            contact_natural_frequency: consts::CONTACT_NATURAL_FREQUENCY,
            contact_damping_ratio: consts::CONTACT_DAMPING_RATIO,
            event_capacity: consts::EVENT_CAPACITY,
        }
    }
}

/// Wrapper around the Rapier2D pipeline: the sole owner and mutator of body transforms.
pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,

    event_collector: ChannelEventCollector,
    collision_recv: Receiver<CollisionEvent>,
    contact_force_recv: Receiver<ContactForceEvent>,
    pending_events: VecDeque<PhysicsEvent>,
    event_capacity: usize,

    /// Character controllers keyed by their handle
    pub(crate) characters: HashMap<ControllerHandle, CharacterBody>,
    pub(crate) next_controller_id: u64,

    fixed_dt: f32,
    initialized: bool,
    step_count: u64,
}

impl PhysicsWorld {
    /// Creates an empty world. Level geometry goes in before `initialize()`.
    pub fn new(settings: &WorldSettings) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = settings.fixed_dt;
        integration_parameters.num_solver_iterations =
            NonZeroUsize::new(settings.solver_iterations.max(1)).unwrap_or(NonZeroUsize::MIN);
        integration_parameters.contact_natural_frequency = settings.contact_natural_frequency;
        integration_parameters.contact_damping_ratio = settings.contact_damping_ratio;

        let (collision_send, collision_recv) = crossbeam_channel::unbounded();
        let (contact_force_send, contact_force_recv) = crossbeam_channel::unbounded();

        Self {
            gravity: vector![0.0, -settings.gravity],
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            event_collector: ChannelEventCollector::new(collision_send, contact_force_send),
            collision_recv,
            contact_force_recv,
            pending_events: VecDeque::new(),
            event_capacity: settings.event_capacity.max(1),
            characters: HashMap::new(),
            next_controller_id: 0,
            fixed_dt: settings.fixed_dt,
            initialized: false,
            step_count: 0,
        }
    }

    /// Marks level population as complete and builds the query structures.
    pub fn initialize(&mut self) {
        self.query_pipeline.update(&self.collider_set);
        self.initialized = true;
        debug!(
            "[PhysicsWorld] Initialized with {} bodies, {} colliders",
            self.rigid_body_set.len(),
            self.collider_set.len()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Sets the gravity for dynamic bodies
    pub fn set_gravity(&mut self, gravity_y: f32) {
        self.gravity = vector![0.0, -gravity_y];
    }

    pub fn fixed_dt(&self) -> f32 {
        self.fixed_dt
    }

    /// Number of completed `step()` calls.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Steps the simulation forward by exactly one fixed timestep.
    ///
    /// Kinematic positions staged by `commit` are applied here. Events left in
    /// the queue from the previous step are dropped.
    ///
    /// # Panics
    /// If the world has not been initialized.
    pub fn step(&mut self) {
        assert!(
            self.initialized,
            "[PhysicsWorld] step() called before initialize()"
        );

        if !self.pending_events.is_empty() {
            debug!(
                "[PhysicsWorld] Dropping {} undrained collision events",
                self.pending_events.len()
            );
            self.pending_events.clear();
        }

        self.integration_parameters.dt = self.fixed_dt;
        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.event_collector,
        );
        self.step_count += 1;

        self.collect_events();
        self.finish_character_step();
    }

    fn collect_events(&mut self) {
        let mut overwritten = 0usize;
        while let Ok(event) = self.collision_recv.try_recv() {
            let resolved = PhysicsEvent {
                started: event.started(),
                sensor: event.sensor(),
                entity_a: self.entity_of_collider(event.collider1()),
                entity_b: self.entity_of_collider(event.collider2()),
            };
            if self.pending_events.len() >= self.event_capacity {
                self.pending_events.pop_front();
                overwritten += 1;
            }
            self.pending_events.push_back(resolved);
        }
        // Contact forces are not consumed by this core.
        while self.contact_force_recv.try_recv().is_ok() {}

        if overwritten > 0 {
            warn!(
                "[PhysicsWorld] Event queue over capacity ({}), overwrote {} oldest events",
                self.event_capacity, overwritten
            );
        }
    }

    /// Takes every event produced by the last step.
    pub fn drain_events(&mut self) -> Vec<PhysicsEvent> {
        self.pending_events.drain(..).collect()
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    /// Adds a fixed box of level geometry, tagged STATIC.
    pub fn add_static_box(
        &mut self,
        entity: Option<EntityId>,
        center: Vec2,
        half_extents: Vec2,
        angle: f32,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::fixed()
            .translation(center)
            .rotation(angle)
            .build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y)
            .collision_groups(CollisionFilter::static_geometry().to_groups())
            .user_data(entity.map(EntityId::to_user_data).unwrap_or(0))
            .build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Adds a 1 m thick slab whose top surface starts at `foot` and rises at `angle` radians.
    pub fn add_static_ramp(
        &mut self,
        entity: Option<EntityId>,
        foot: Vec2,
        length: f32,
        angle: f32,
    ) -> RigidBodyHandle {
        let (sin, cos) = angle.sin_cos();
        let half_thickness = 0.5;
        let along = Vec2::new(cos, sin);
        let normal = Vec2::new(-sin, cos);
        let center = foot + along * (length * 0.5) - normal * half_thickness;
        self.add_static_box(
            entity,
            center,
            Vec2::new(length * 0.5, half_thickness),
            angle,
        )
    }

    /// Adds a trigger volume (HAZARD, PICKUP or SENSOR) that reports player overlaps.
    pub fn add_sensor(
        &mut self,
        entity: EntityId,
        center: Vec2,
        half_extents: Vec2,
        category: Group,
    ) -> RigidBodyHandle {
        debug_assert!(
            category.intersects(
                collision_filter::HAZARD | collision_filter::PICKUP | collision_filter::SENSOR
            ),
            "sensor category must be HAZARD, PICKUP or SENSOR"
        );
        let body = RigidBodyBuilder::fixed().translation(center).build();
        let handle = self.rigid_body_set.insert(body);

        // Characters are kinematic, so kinematic-fixed pairs must be enabled to see them.
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y)
            .sensor(true)
            .collision_groups(CollisionFilter::trigger(category).to_groups())
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .active_collision_types(
                ActiveCollisionTypes::default() | ActiveCollisionTypes::KINEMATIC_FIXED,
            )
            .user_data(entity.to_user_data())
            .build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Adds a simulated box (DYNAMIC_PROP).
    pub fn add_dynamic_box(
        &mut self,
        entity: EntityId,
        center: Vec2,
        half_extents: Vec2,
        angle: f32,
    ) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(center)
            .rotation(angle)
            .build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y)
            .collision_groups(CollisionFilter::dynamic_prop().to_groups())
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(entity.to_user_data())
            .build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        handle
    }

    /// Removes a body and its colliders.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }

    pub fn has_body(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set.contains(handle)
    }

    pub fn body_kind(&self, handle: RigidBodyHandle) -> Option<BodyKind> {
        self.rigid_body_set
            .get(handle)
            .map(|body| body.body_type().into())
    }

    /// Gets the position of a rigid body
    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        self.rigid_body_set
            .get(handle)
            .map(|body| *body.translation())
    }

    /// Gets the rotation of a rigid body in radians
    pub fn body_rotation(&self, handle: RigidBodyHandle) -> Option<f32> {
        self.rigid_body_set
            .get(handle)
            .map(|body| body.rotation().angle())
    }

    /// Gets the linear velocity of a rigid body
    pub fn body_velocity(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        self.rigid_body_set.get(handle).map(|body| *body.linvel())
    }

    /// Entity stored on the first collider of a body.
    pub fn entity_of_body(&self, handle: RigidBodyHandle) -> Option<EntityId> {
        let body = self.rigid_body_set.get(handle)?;
        let &collider = body.colliders().first()?;
        self.entity_of_collider(collider)
    }

    pub fn entity_of_collider(&self, handle: ColliderHandle) -> Option<EntityId> {
        self.collider_set
            .get(handle)
            .and_then(|collider| EntityId::from_user_data(collider.user_data))
    }

    /// Casts a ray and returns the closest hit accepted by `filter`.
    pub fn cast_ray(
        &self,
        origin: Vec2,
        direction: Vec2,
        max_distance: f32,
        filter: CollisionFilter,
        exclude_body: Option<RigidBodyHandle>,
    ) -> Option<RayHit> {
        let len = direction.norm();
        if len < consts::EPSILON {
            return None;
        }
        let ray = Ray::new(point![origin.x, origin.y], direction / len);
        let query_filter = Self::query_filter(filter, exclude_body);

        let (collider, hit) = self.query_pipeline.cast_ray_and_get_normal(
            &self.rigid_body_set,
            &self.collider_set,
            &ray,
            max_distance,
            true,
            query_filter,
        )?;
        let point = ray.point_at(hit.time_of_impact);
        Some(RayHit {
            collider,
            entity: self.entity_of_collider(collider),
            distance: hit.time_of_impact,
            point: point.coords,
            normal: hit.normal,
        })
    }

    /// Sweeps `shape` from `origin` along `translation` and returns the first obstacle.
    pub fn cast_shape(
        &self,
        shape: &ColliderSpec,
        origin: Vec2,
        translation: Vec2,
        filter: CollisionFilter,
        exclude_body: Option<RigidBodyHandle>,
    ) -> Option<ShapeHit> {
        let shared = shape.to_shape();
        let shape_pos = Isometry::translation(origin.x, origin.y);
        let query_filter = Self::query_filter(filter, exclude_body).exclude_sensors();

        let (collider, hit) = self.query_pipeline.cast_shape(
            &self.rigid_body_set,
            &self.collider_set,
            &shape_pos,
            &translation,
            &*shared,
            ShapeCastOptions::with_max_time_of_impact(1.0),
            query_filter,
        )?;
        Some(ShapeHit {
            collider,
            entity: self.entity_of_collider(collider),
            time_of_impact: hit.time_of_impact,
            normal: *hit.normal1,
        })
    }

    fn query_filter<'a>(
        filter: CollisionFilter,
        exclude_body: Option<RigidBodyHandle>,
    ) -> QueryFilter<'a> {
        let query_filter = QueryFilter::default().groups(filter.to_groups());
        match exclude_body {
            Some(body) => query_filter.exclude_rigid_body(body),
            None => query_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier2d::prelude::vector;

    fn world_with_floor() -> PhysicsWorld {
        let mut world = PhysicsWorld::new(&WorldSettings::default());
        // Floor top at y = 0
        world.add_static_box(
            Some(EntityId(1)),
            vector![0.0, -0.5],
            vector![50.0, 0.5],
            0.0,
        );
        world.initialize();
        world
    }

    #[test]
    fn test_entity_user_data_roundtrip_keeps_zero_distinct() {
        assert_eq!(EntityId::from_user_data(0), None);
        assert_eq!(
            EntityId::from_user_data(EntityId(0).to_user_data()),
            Some(EntityId(0))
        );
    }

    #[test]
    #[should_panic(expected = "before initialize")]
    fn test_step_before_initialize_panics() {
        let mut world = PhysicsWorld::new(&WorldSettings::default());
        world.step();
    }

    #[test]
    fn test_dynamic_box_falls_and_rests_on_floor() {
        let mut world = world_with_floor();
        let prop = world.add_dynamic_box(EntityId(7), vector![0.0, 3.0], vector![0.5, 0.5], 0.0);

        for _ in 0..240 {
            world.step();
        }

        let pos = world.body_position(prop).unwrap();
        assert!(
            (pos.y - 0.5).abs() < 0.05,
            "Prop should rest on the floor at y~0.5, got {}",
            pos.y
        );
        assert_eq!(world.entity_of_body(prop), Some(EntityId(7)));
        assert_eq!(world.body_kind(prop), Some(BodyKind::Dynamic));
    }

    #[test]
    fn test_raycast_respects_filter() {
        let mut world = world_with_floor();
        world.step();

        let hit = world
            .cast_ray(
                vector![0.0, 5.0],
                vector![0.0, -1.0],
                10.0,
                CollisionFilter::terrain_query(),
                None,
            )
            .expect("Should detect floor");
        assert!((hit.distance - 5.0).abs() < 1e-3, "distance {}", hit.distance);
        assert!((hit.normal.y - 1.0).abs() < 1e-3);
        assert_eq!(hit.entity, Some(EntityId(1)));

        let props_only = CollisionFilter::new(Group::ALL, collision_filter::DYNAMIC_PROP);
        assert!(world
            .cast_ray(vector![0.0, 5.0], vector![0.0, -1.0], 10.0, props_only, None)
            .is_none());
    }

    #[test]
    fn test_shape_cast_reports_floor_normal() {
        let mut world = world_with_floor();
        world.step();

        let hit = world
            .cast_shape(
                &ColliderSpec::Box {
                    half_width: 0.5,
                    half_height: 0.5,
                },
                vector![0.0, 3.0],
                vector![0.0, -5.0],
                CollisionFilter::terrain_query(),
                None,
            )
            .expect("Box cast should hit the floor");
        // Travels 2.5 of 5.0
        assert!((hit.time_of_impact - 0.5).abs() < 0.01, "toi {}", hit.time_of_impact);
        assert!(hit.normal.y > 0.99, "normal {:?}", hit.normal);
    }

    #[test]
    fn test_undrained_events_are_dropped_on_next_step() {
        let mut world = PhysicsWorld::new(&WorldSettings::default());
        world.add_static_box(None, vector![0.0, -0.5], vector![50.0, 0.5], 0.0);
        world.add_dynamic_box(EntityId(3), vector![0.0, 0.6], vector![0.5, 0.5], 0.0);
        world.initialize();

        let mut started = 0;
        for _ in 0..30 {
            world.step();
            started += world.drain_events().iter().filter(|e| e.started).count();
        }
        assert!(started >= 1, "Prop landing should produce a contact event");

        // Nothing left after draining, and stale events never survive a step.
        assert_eq!(world.pending_event_count(), 0);
    }

    #[test]
    fn test_event_overflow_keeps_newest() {
        let build = |event_capacity| {
            let settings = WorldSettings {
                event_capacity,
                ..Default::default()
            };
            let mut world = PhysicsWorld::new(&settings);
            world.add_static_box(None, vector![0.0, -0.5], vector![50.0, 0.5], 0.0);
            // Identical props land on the same step
            for (i, x) in [-4.0, 0.0, 4.0].into_iter().enumerate() {
                let entity = EntityId(10 + i as u64);
                world.add_dynamic_box(entity, vector![x, 0.6], vector![0.5, 0.5], 0.0);
            }
            world.initialize();
            world
        };
        let mut capped = build(1);
        let mut roomy = build(64);

        for step in 0..60 {
            capped.step();
            roomy.step();
            let all = roomy.drain_events();
            let kept = capped.drain_events();
            if all.len() < 2 {
                assert_eq!(kept.len(), all.len(), "step {}", step);
                continue;
            }
            println!("step {}: {} events, kept {:?}", step, all.len(), kept);
            assert_eq!(kept.len(), 1, "Capacity bounds the queue");
            assert_eq!(kept.last(), all.last(), "Oldest events are overwritten first");
            return;
        }
        panic!("Props never landed together");
    }

    #[test]
    fn test_remove_body() {
        let mut world = world_with_floor();
        let prop = world.add_dynamic_box(EntityId(9), vector![0.0, 3.0], vector![0.5, 0.5], 0.0);
        assert!(world.has_body(prop));
        assert!(world.remove_body(prop));
        assert!(!world.has_body(prop));
        assert!(!world.remove_body(prop));
    }
}
