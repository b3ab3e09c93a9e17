//! 2D platformer movement core
//!
//! A kinematic character controller over a Rapier2D world, the movement
//! state machine that feeds it, and the bridge that keeps visuals in sync.

pub mod config;
pub mod game;
