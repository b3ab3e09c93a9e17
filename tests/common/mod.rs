//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use platformer_core::config::GameConfig;
use platformer_core::game::constants::controller as consts;
use platformer_core::game::{
    ColliderSpec, ControllerConfig, ControllerHandle, CorrectedMovement, EntityId, PhysicsWorld,
    Simulation, Vec2, WorldSettings,
};

pub const DT: f32 = 1.0 / 60.0;
pub const PLAYER: EntityId = EntityId(1);

/// Capsule center height when resting on a floor whose top is y = 0.
pub const STAND_Y: f32 = consts::CHARACTER_HALF_HEIGHT + consts::CHARACTER_RADIUS + consts::OFFSET;

/// World with a 100 m floor, top at y = 0. Not yet initialized.
pub fn floor_world() -> PhysicsWorld {
    let mut world = PhysicsWorld::new(&WorldSettings::default());
    world.add_static_box(None, Vec2::new(0.0, -0.5), Vec2::new(50.0, 0.5), 0.0);
    world
}

pub fn spawn(
    world: &mut PhysicsWorld,
    position: Vec2,
    config: ControllerConfig,
) -> ControllerHandle {
    world
        .create_character(PLAYER, position, ColliderSpec::default(), config)
        .expect("create character")
}

/// compute -> commit -> step
pub fn tick(
    world: &mut PhysicsWorld,
    handle: ControllerHandle,
    desired: Vec2,
) -> CorrectedMovement {
    let movement = world.compute_movement(handle, desired);
    world.commit(handle, movement.translation);
    world.step();
    movement
}

/// Pushes down until the character reports ground.
pub fn settle(world: &mut PhysicsWorld, handle: ControllerHandle) {
    for _ in 0..120 {
        tick(world, handle, Vec2::new(0.0, -0.1));
        if world.is_grounded(handle) {
            return;
        }
    }
    panic!(
        "Character never grounded, position {:?}",
        world.character_position(handle)
    );
}

/// Simulation on a flat floor with the player spawned just above it.
pub fn flat_simulation() -> Simulation {
    let mut sim = Simulation::new(GameConfig::default()).expect("default config");
    sim.world_mut()
        .add_static_box(None, Vec2::new(0.0, -0.5), Vec2::new(50.0, 0.5), 0.0);
    sim.initialize();
    sim.spawn_character(PLAYER, Vec2::new(0.0, STAND_Y + 0.3), ColliderSpec::default())
        .expect("spawn player");
    sim
}
