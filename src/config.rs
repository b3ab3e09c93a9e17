//! Game configuration parsing from TOML files

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::game::character_controller::ControllerConfig;
use crate::game::movement::MovementConfig;
use crate::game::physics::WorldSettings;

/// Tuning for the world, the character controller and the movement machine.
///
/// Every section and field is optional; missing values fall back to
/// `game::constants`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub world: WorldSettings,
    pub controller: ControllerConfig,
    pub movement: MovementConfig,
}

impl GameConfig {
    /// Load and validate game configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let world = &self.world;
        if !(world.fixed_dt > 0.0 && world.fixed_dt.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "world.fixed_dt must be positive, got {}",
                world.fixed_dt
            )));
        }
        if world.max_substeps == 0 {
            return Err(ConfigError::Invalid("world.max_substeps must be at least 1".into()));
        }
        if world.max_frame_time < world.fixed_dt {
            return Err(ConfigError::Invalid(format!(
                "world.max_frame_time ({}) is shorter than one step ({})",
                world.max_frame_time, world.fixed_dt
            )));
        }
        self.controller
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("controller: {}", e)))?;

        let movement = &self.movement;
        if movement.jump_impulses.is_empty() {
            return Err(ConfigError::Invalid(
                "movement.jump_impulses must list at least one jump".into(),
            ));
        }
        if movement.jump_impulses.iter().any(|j| *j <= 0.0) {
            return Err(ConfigError::Invalid(
                "movement.jump_impulses must all be positive".into(),
            ));
        }
        for (name, value) in [
            ("max_speed", movement.max_speed),
            ("acceleration", movement.acceleration),
            ("deceleration", movement.deceleration),
            ("terminal_fall_speed", movement.terminal_fall_speed),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "movement.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if movement.coyote_time < 0.0 || movement.jump_buffer_time < 0.0 {
            return Err(ConfigError::Invalid(
                "movement timers must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading game configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
