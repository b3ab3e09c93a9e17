//! Fixed-timestep scheduler driving movement, physics and sync each frame.
//!
//! Per substep, in entity order:
//! machine update -> compute movement -> commit -> physics step -> event drain.
//! Visual sync runs once, after the last substep of the frame.

use std::collections::{BTreeMap, HashMap};

use crossbeam_channel::{Receiver, Sender};
use rapier2d::prelude::{Group, RigidBodyHandle};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::character_controller::{ColliderSpec, ControllerConfig, ControllerHandle};
use super::movement::{
    InputSnapshot, MovementConfig, MovementEvent, MovementState, MovementStateMachine,
};
use super::physics::{EntityId, PhysicsError, PhysicsEvent, PhysicsWorld, Vec2, WorldSettings};
use super::sync_bridge::{SyncBridge, VisualSink};
use crate::config::{ConfigError, GameConfig};

/// Output of the core for the effects/animation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    Movement {
        entity: EntityId,
        event: MovementEvent,
    },
    Contact(PhysicsEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameReport {
    pub substeps: u32,
    /// Accumulated time discarded because of the substep cap
    pub dropped_time: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterSnapshot {
    pub entity: EntityId,
    pub position: [f32; 2],
    pub grounded: bool,
    pub movement: MovementState,
}

struct CharacterSlot {
    handle: ControllerHandle,
    machine: MovementStateMachine,
    /// Jump pulse waiting for the next substep
    pending_jump: bool,
}

pub struct Simulation {
    world: PhysicsWorld,
    settings: WorldSettings,
    controller_config: ControllerConfig,
    movement_config: MovementConfig,
    characters: BTreeMap<EntityId, CharacterSlot>,
    bridge: SyncBridge,
    accumulator: f32,
    event_tx: Sender<SimEvent>,
    event_rx: Receiver<SimEvent>,
}

impl Simulation {
    /// Creates an empty simulation. Populate level geometry through
    /// `world_mut()`, then call `initialize()`.
    ///
    /// The config is validated here; a zero or negative timestep would
    /// poison the frame accumulator.
    pub fn new(config: GameConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            world: PhysicsWorld::new(&config.world),
            settings: config.world,
            controller_config: config.controller,
            movement_config: config.movement,
            characters: BTreeMap::new(),
            bridge: SyncBridge::new(),
            accumulator: 0.0,
            event_tx,
            event_rx,
        })
    }

    pub fn initialize(&mut self) {
        self.world.initialize();
        info!(
            "[Simulation] Ready: dt={:.4}s, max {} substeps/frame",
            self.settings.fixed_dt, self.settings.max_substeps
        );
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.bridge
    }

    /// Event stream for the effects/animation layer.
    pub fn events(&self) -> &Receiver<SimEvent> {
        &self.event_rx
    }

    pub fn drain_events(&self) -> Vec<SimEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Creates a character with the configured controller and movement tuning.
    /// Spawning an entity that already has a character replaces it.
    pub fn spawn_character(
        &mut self,
        entity: EntityId,
        spawn: Vec2,
        shape: ColliderSpec,
    ) -> Result<ControllerHandle, PhysicsError> {
        let handle =
            self.world
                .create_character(entity, spawn, shape, self.controller_config.clone())?;
        if let Some(previous) = self.characters.remove(&entity) {
            warn!("[Simulation] {} spawned twice, replacing its character", entity);
            self.bridge.unregister(entity);
            self.world.destroy_character(previous.handle);
        }
        self.bridge
            .register(entity, self.world.character_body(handle));
        self.characters.insert(
            entity,
            CharacterSlot {
                handle,
                machine: MovementStateMachine::new(self.movement_config.clone()),
                pending_jump: false,
            },
        );
        Ok(handle)
    }

    pub fn despawn_character(&mut self, entity: EntityId) -> bool {
        let Some(slot) = self.characters.remove(&entity) else {
            return false;
        };
        self.bridge.unregister(entity);
        self.world.destroy_character(slot.handle);
        true
    }

    /// Adds a simulated box whose visual is kept in sync.
    pub fn add_dynamic_prop(
        &mut self,
        entity: EntityId,
        center: Vec2,
        half_extents: Vec2,
        angle: f32,
    ) -> RigidBodyHandle {
        let body = self
            .world
            .add_dynamic_box(entity, center, half_extents, angle);
        self.bridge.register(entity, body);
        body
    }

    pub fn add_trigger(
        &mut self,
        entity: EntityId,
        center: Vec2,
        half_extents: Vec2,
        category: Group,
    ) -> RigidBodyHandle {
        self.world.add_sensor(entity, center, half_extents, category)
    }

    pub fn remove_prop(&mut self, entity: EntityId) -> bool {
        match self.bridge.unregister(entity) {
            Some(body) => self.world.remove_body(body),
            None => false,
        }
    }

    pub fn character_handle(&self, entity: EntityId) -> Option<ControllerHandle> {
        self.characters.get(&entity).map(|slot| slot.handle)
    }

    pub fn machine(&self, entity: EntityId) -> Option<&MovementStateMachine> {
        self.characters.get(&entity).map(|slot| &slot.machine)
    }

    pub fn character_position(&self, entity: EntityId) -> Option<Vec2> {
        self.character_handle(entity)
            .map(|handle| self.world.character_position(handle))
    }

    pub fn is_grounded(&self, entity: EntityId) -> Option<bool> {
        self.character_handle(entity)
            .map(|handle| self.world.is_grounded(handle))
    }

    pub fn snapshots(&self) -> Vec<CharacterSnapshot> {
        self.characters
            .iter()
            .map(|(&entity, slot)| {
                let position = self.world.character_position(slot.handle);
                CharacterSnapshot {
                    entity,
                    position: [position.x, position.y],
                    grounded: self.world.is_grounded(slot.handle),
                    movement: slot.machine.snapshot(),
                }
            })
            .collect()
    }

    /// Runs as many fixed substeps as `real_dt` allows, capped, then syncs visuals once.
    pub fn advance(
        &mut self,
        real_dt: f32,
        inputs: &HashMap<EntityId, InputSnapshot>,
        sink: &mut impl VisualSink,
    ) -> FrameReport {
        let frame_dt = if real_dt.is_finite() {
            real_dt.clamp(0.0, self.settings.max_frame_time)
        } else {
            0.0
        };
        self.accumulator += frame_dt;

        for (entity, input) in inputs {
            if !input.jump_requested {
                continue;
            }
            match self.characters.get_mut(entity) {
                Some(slot) => slot.pending_jump = true,
                None => debug!("[Simulation] Input for unknown {}", entity),
            }
        }

        let dt = self.world.fixed_dt();
        let mut report = FrameReport::default();
        while self.accumulator >= dt && report.substeps < self.settings.max_substeps {
            self.run_substep(inputs, dt);
            self.accumulator -= dt;
            report.substeps += 1;
        }

        if self.accumulator >= dt {
            let excess = (self.accumulator / dt).floor() * dt;
            self.accumulator -= excess;
            report.dropped_time = excess;
            debug!(
                "[Simulation] Substep cap reached, dropped {:.4}s of accumulated time",
                excess
            );
        }

        if report.substeps > 0 {
            self.bridge.sync(&self.world, sink);
        }
        report
    }

    fn run_substep(&mut self, inputs: &HashMap<EntityId, InputSnapshot>, dt: f32) {
        for (&entity, slot) in self.characters.iter_mut() {
            let mut input = inputs.get(&entity).copied().unwrap_or_default();
            input.jump_requested = std::mem::take(&mut slot.pending_jump);

            let grounded = self.world.is_grounded(slot.handle);
            let plan = slot.machine.update(&input, grounded, dt);
            let corrected = self.world.compute_movement(slot.handle, plan.desired);
            self.world.commit(slot.handle, corrected.translation);
            slot.machine.resolve_after_move(&plan, &corrected.translation);

            for event in plan.events {
                // The receiver lives in self, so the channel cannot be disconnected.
                let _ = self.event_tx.send(SimEvent::Movement { entity, event });
            }
        }

        self.world.step();

        for event in self.world.drain_events() {
            let _ = self.event_tx.send(SimEvent::Contact(event));
        }
    }
}
