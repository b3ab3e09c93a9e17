//! Movement core: collision filtering, physics stepping, the kinematic
//! character controller, the movement state machine and visual sync.

pub mod character_controller;
pub mod collision_filter;
pub mod constants;
pub mod movement;
pub mod physics;
pub mod sync_bridge;
pub mod tick_pipeline;

pub use character_controller::{
    ColliderSpec, Contact, ControllerConfig, ControllerHandle, CorrectedMovement,
};
pub use collision_filter::CollisionFilter;
pub use movement::{
    InputSnapshot, MotionPlan, MotionState, MovementConfig, MovementEvent, MovementStateMachine,
};
pub use physics::{EntityId, PhysicsError, PhysicsEvent, PhysicsWorld, Vec2, WorldSettings};
pub use sync_bridge::{SyncBridge, VisualSink, VisualStore, VisualTransform};
pub use tick_pipeline::{CharacterSnapshot, FrameReport, SimEvent, Simulation};
