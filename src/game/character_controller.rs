//! Kinematic character controller layered on `PhysicsWorld`.
//!
//! A character is a kinematic position-based body with one PLAYER collider.
//! Each tick the caller proposes a desired displacement, `compute_movement`
//! returns the corrected one, `commit` stages it, and the next world step
//! applies it. Grounded state is derived from the contacts of the last
//! computation, promoted when the world steps.

use nalgebra::Unit;
use rapier2d::control::{
    CharacterAutostep, CharacterCollision, CharacterLength, KinematicCharacterController,
};
use rapier2d::parry::query::ShapeCastOptions;
use rapier2d::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use super::collision_filter::CollisionFilter;
use super::constants::controller as consts;
use super::constants::physics::EPSILON;
use super::physics::{EntityId, PhysicsError, PhysicsWorld, Vec2};

/// Identifies one character. Ids increase monotonically and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerHandle(u64);

impl ControllerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColliderSpec {
    /// Vertical capsule; `half_height` is the straight segment only
    Capsule { half_height: f32, radius: f32 },
    Box { half_width: f32, half_height: f32 },
}

impl Default for ColliderSpec {
    fn default() -> Self {
        ColliderSpec::Capsule {
            half_height: consts::CHARACTER_HALF_HEIGHT,
            radius: consts::CHARACTER_RADIUS,
        }
    }
}

impl ColliderSpec {
    pub fn to_shape(&self) -> SharedShape {
        match *self {
            ColliderSpec::Capsule {
                half_height,
                radius,
            } => SharedShape::capsule_y(half_height, radius),
            ColliderSpec::Box {
                half_width,
                half_height,
            } => SharedShape::cuboid(half_width, half_height),
        }
    }

    /// Distance from the shape's center to its lowest point.
    pub fn half_extent_y(&self) -> f32 {
        match *self {
            ColliderSpec::Capsule {
                half_height,
                radius,
            } => half_height + radius,
            ColliderSpec::Box { half_height, .. } => half_height,
        }
    }

    fn validate(&self) -> Result<(), PhysicsError> {
        let ok = match *self {
            ColliderSpec::Capsule {
                half_height,
                radius,
            } => {
                half_height >= 0.0
                    && radius > 0.0
                    && half_height.is_finite()
                    && radius.is_finite()
            }
            ColliderSpec::Box {
                half_width,
                half_height,
            } => {
                half_width > 0.0
                    && half_height > 0.0
                    && half_width.is_finite()
                    && half_height.is_finite()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidCollider(format!("{:?}", self)))
        }
    }
}

/// Tuning for one character archetype. Angles are in degrees.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Skin width kept between the shape and obstacles
    pub offset: f32,
    pub up: [f32; 2],
    /// Tallest obstacle climbed without jumping; 0 disables autostep
    pub autostep_max_height: f32,
    pub autostep_min_width: f32,
    /// Whether dynamic props can be stepped onto
    pub autostep_include_dynamic: bool,
    /// Downward snap distance; 0 disables snapping
    pub snap_to_ground: f32,
    pub max_slope_climb_angle: f32,
    pub min_slope_slide_angle: f32,
    pub slide: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            offset: consts::OFFSET,
            up: [0.0, 1.0],
            autostep_max_height: consts::AUTOSTEP_MAX_HEIGHT,
            autostep_min_width: consts::AUTOSTEP_MIN_WIDTH,
            autostep_include_dynamic: true,
            snap_to_ground: consts::SNAP_TO_GROUND,
            max_slope_climb_angle: consts::MAX_SLOPE_CLIMB_DEG,
            min_slope_slide_angle: consts::MIN_SLOPE_SLIDE_DEG,
            slide: true,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), PhysicsError> {
        if !(self.offset > 0.0 && self.offset.is_finite()) {
            return Err(PhysicsError::InvalidOffset(self.offset));
        }
        let up = Vec2::new(self.up[0], self.up[1]);
        if !(up.x.is_finite() && up.y.is_finite()) || up.norm() < EPSILON {
            return Err(PhysicsError::InvalidUpVector);
        }
        Ok(())
    }

    pub fn up_vector(&self) -> Unit<Vec2> {
        Unit::new_normalize(Vec2::new(self.up[0], self.up[1]))
    }

    /// Builds the rapier controller for one `compute_movement` call.
    fn build(&self, was_grounded: bool, desired: &Vec2) -> KinematicCharacterController {
        let up = self.up_vector();
        let autostep = (was_grounded && self.autostep_max_height > 0.0).then(|| CharacterAutostep {
            max_height: CharacterLength::Absolute(self.autostep_max_height),
            min_width: CharacterLength::Absolute(self.autostep_min_width),
            include_dynamic_bodies: self.autostep_include_dynamic,
        });
        // Never snap while the caller is moving up, or jumps get eaten.
        let snap_to_ground = (was_grounded && desired.dot(&up) <= 0.0 && self.snap_to_ground > 0.0)
            .then(|| CharacterLength::Absolute(self.snap_to_ground));

        KinematicCharacterController {
            up,
            offset: CharacterLength::Absolute(self.offset),
            slide: self.slide,
            autostep,
            max_slope_climb_angle: self.max_slope_climb_angle.to_radians(),
            min_slope_slide_angle: self.min_slope_slide_angle.to_radians(),
            snap_to_ground,
            ..Default::default()
        }
    }
}

/// One obstacle touched during a movement computation.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub collider: ColliderHandle,
    pub entity: Option<EntityId>,
    /// Outward normal of the obstacle
    pub normal: Vec2,
    pub time_of_impact: f32,
}

impl Contact {
    pub fn is_ground(&self, up: &Vec2) -> bool {
        self.normal.dot(up) > consts::GROUND_NORMAL_THRESHOLD
    }
}

#[derive(Debug, Clone)]
pub struct CorrectedMovement {
    pub translation: Vec2,
    pub contacts: Vec<Contact>,
    /// Whether these contacts include ground; becomes `is_grounded` after the next step
    pub grounded: bool,
}

pub(crate) struct CharacterBody {
    pub entity: EntityId,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub shape: ColliderSpec,
    pub config: ControllerConfig,
    /// Contacts of the latest computation, waiting for the next step
    pub pending_contacts: Option<Vec<Contact>>,
    pub committed_contacts: Vec<Contact>,
    pub grounded: bool,
    /// Translation staged by `commit` for the next step
    pub staged: Option<Vec2>,
}

fn unknown_handle(handle: ControllerHandle) -> ! {
    panic!(
        "[CharacterController] unknown or destroyed controller handle {}",
        handle.0
    )
}

impl PhysicsWorld {
    /// Allocates a kinematic body and PLAYER collider for `entity` at `spawn`.
    pub fn create_character(
        &mut self,
        entity: EntityId,
        spawn: Vec2,
        shape: ColliderSpec,
        config: ControllerConfig,
    ) -> Result<ControllerHandle, PhysicsError> {
        if !self.is_initialized() {
            return Err(PhysicsError::WorldNotInitialized);
        }
        config.validate()?;
        shape.validate()?;

        let body = RigidBodyBuilder::kinematic_position_based()
            .translation(spawn)
            .build();
        let body_handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::new(shape.to_shape())
            .collision_groups(CollisionFilter::player().to_groups())
            .active_collision_types(
                ActiveCollisionTypes::default() | ActiveCollisionTypes::KINEMATIC_FIXED,
            )
            .user_data(entity.to_user_data())
            .build();
        let collider_handle =
            self.collider_set
                .insert_with_parent(collider, body_handle, &mut self.rigid_body_set);
        // Make the new collider visible to queries issued before the next step.
        self.query_pipeline.update(&self.collider_set);

        let handle = ControllerHandle(self.next_controller_id);
        self.next_controller_id += 1;
        self.characters.insert(
            handle,
            CharacterBody {
                entity,
                body: body_handle,
                collider: collider_handle,
                shape,
                config,
                pending_contacts: None,
                committed_contacts: Vec::new(),
                grounded: false,
                staged: None,
            },
        );
        debug!(
            "[CharacterController] Created controller {} for {} at ({:.2}, {:.2})",
            handle.0, entity, spawn.x, spawn.y
        );
        Ok(handle)
    }

    /// Removes the character's body and collider. The handle is dead afterwards.
    pub fn destroy_character(&mut self, handle: ControllerHandle) -> EntityId {
        let character = self
            .characters
            .remove(&handle)
            .unwrap_or_else(|| unknown_handle(handle));
        self.remove_body(character.body);
        debug!(
            "[CharacterController] Destroyed controller {} ({})",
            handle.0, character.entity
        );
        character.entity
    }

    pub fn has_character(&self, handle: ControllerHandle) -> bool {
        self.characters.contains_key(&handle)
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    /// Replaces the tuning of a live character. Takes effect on the next computation.
    pub fn set_controller_config(
        &mut self,
        handle: ControllerHandle,
        config: ControllerConfig,
    ) -> Result<(), PhysicsError> {
        config.validate()?;
        let character = self
            .characters
            .get_mut(&handle)
            .unwrap_or_else(|| unknown_handle(handle));
        character.config = config;
        Ok(())
    }

    pub fn controller_config(&self, handle: ControllerHandle) -> &ControllerConfig {
        &self.character(handle).config
    }

    pub fn character_body(&self, handle: ControllerHandle) -> RigidBodyHandle {
        self.character(handle).body
    }

    pub fn character_entity(&self, handle: ControllerHandle) -> EntityId {
        self.character(handle).entity
    }

    pub fn character_shape(&self, handle: ControllerHandle) -> ColliderSpec {
        self.character(handle).shape
    }

    /// Current committed position (what the last step applied).
    pub fn character_position(&self, handle: ControllerHandle) -> Vec2 {
        let body = self.character(handle).body;
        self.body_position(body)
            .unwrap_or_else(|| unknown_handle(handle))
    }

    /// Grounded state derived from the contacts the last step committed.
    pub fn is_grounded(&self, handle: ControllerHandle) -> bool {
        self.character(handle).grounded
    }

    pub fn committed_contacts(&self, handle: ControllerHandle) -> &[Contact] {
        &self.character(handle).committed_contacts
    }

    /// Computes the part of `desired` the character can travel this tick.
    ///
    /// `desired` is a displacement, already scaled by the tick length. Slides
    /// along obstacles, autosteps and snaps per the config. The body is not
    /// moved; see [`PhysicsWorld::commit`].
    ///
    /// # Panics
    /// If `handle` is unknown or destroyed.
    pub fn compute_movement(
        &mut self,
        handle: ControllerHandle,
        desired: Vec2,
    ) -> CorrectedMovement {
        let character = self
            .characters
            .get(&handle)
            .unwrap_or_else(|| unknown_handle(handle));
        let config = character.config.clone();
        let up = config.up_vector();
        let controller = config.build(character.grounded, &desired);

        let body = self
            .rigid_body_set
            .get(character.body)
            .unwrap_or_else(|| unknown_handle(handle));
        let position = *body.position();
        let collider = self
            .collider_set
            .get(character.collider)
            .unwrap_or_else(|| unknown_handle(handle));

        let filter = QueryFilter::default()
            .groups(CollisionFilter::character_motion().to_groups())
            .exclude_rigid_body(character.body)
            .exclude_sensors();

        let mut collisions: Vec<CharacterCollision> = Vec::new();
        let movement = controller.move_shape(
            self.fixed_dt(),
            &self.rigid_body_set,
            &self.collider_set,
            &self.query_pipeline,
            collider.shape(),
            &position,
            desired,
            filter,
            |collision| collisions.push(collision),
        );

        let mut contacts: Vec<Contact> = collisions
            .iter()
            .map(|collision| Contact {
                collider: collision.handle,
                entity: self.entity_of_collider(collision.handle),
                normal: *collision.hit.normal1,
                time_of_impact: collision.hit.time_of_impact,
            })
            .collect();
        let mut grounded = contacts.iter().any(|c| c.is_ground(&up));

        // Rapier never reports the snap-to-ground hit through the collision
        // callback, so recover the supporting surface with the same cast.
        if !grounded && movement.grounded && controller.snap_to_ground.is_some() {
            let mut snapped = position;
            snapped.translation.vector += movement.translation;
            let options = ShapeCastOptions {
                max_time_of_impact: config.snap_to_ground + config.offset,
                target_distance: config.offset,
                stop_at_penetration: false,
                compute_impact_geometry_on_penetration: true,
            };
            let support = self.query_pipeline.cast_shape(
                &self.rigid_body_set,
                &self.collider_set,
                &snapped,
                &-up.into_inner(),
                collider.shape(),
                options,
                filter,
            );
            if let Some((collider, hit)) = support {
                let contact = Contact {
                    collider,
                    entity: self.entity_of_collider(collider),
                    normal: *hit.normal1,
                    time_of_impact: hit.time_of_impact,
                };
                grounded = contact.is_ground(&up);
                contacts.push(contact);
            }
        }

        if let Some(character) = self.characters.get_mut(&handle) {
            character.pending_contacts = Some(contacts.clone());
        }

        CorrectedMovement {
            translation: movement.translation,
            contacts,
            grounded,
        }
    }

    /// Stages `current position + corrected` for the next step.
    pub fn commit(&mut self, handle: ControllerHandle, corrected: Vec2) {
        let character = self
            .characters
            .get_mut(&handle)
            .unwrap_or_else(|| unknown_handle(handle));
        if character.staged.is_some() {
            warn!(
                "[CharacterController] {} committed twice before a step, keeping the latest",
                character.entity
            );
        }
        let body = self
            .rigid_body_set
            .get_mut(character.body)
            .unwrap_or_else(|| unknown_handle(handle));
        let next = *body.translation() + corrected;
        body.set_next_kinematic_translation(next);
        character.staged = Some(next);
    }

    /// Promotes pending contacts to committed ones once the world has stepped.
    pub(crate) fn finish_character_step(&mut self) {
        for character in self.characters.values_mut() {
            character.staged = None;
            // Characters that skipped compute_movement keep their last grounded state.
            if let Some(contacts) = character.pending_contacts.take() {
                let up = character.config.up_vector();
                character.grounded = contacts.iter().any(|c| c.is_ground(&up));
                character.committed_contacts = contacts;
            }
        }
    }

    fn character(&self, handle: ControllerHandle) -> &CharacterBody {
        self.characters
            .get(&handle)
            .unwrap_or_else(|| unknown_handle(handle))
    }
}
