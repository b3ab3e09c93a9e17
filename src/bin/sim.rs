//! Headless platformer simulation - runs a built-in course with scripted input

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use platformer_core::config::GameConfig;
use platformer_core::game::collision_filter::{HAZARD, PICKUP};
use platformer_core::game::{
    ColliderSpec, EntityId, InputSnapshot, SimEvent, Simulation, Vec2, VisualStore,
};

const PLAYER: EntityId = EntityId(1);
const CRATE: EntityId = EntityId(100);
const SPIKES: EntityId = EntityId(200);
const COIN: EntityId = EntityId(201);

#[derive(Parser)]
#[command(name = "platformer-sim")]
#[command(about = "Run the movement core headless and print per-frame JSON", long_about = None)]
struct Cli {
    /// Game configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "PLATFORMER_CONFIG")]
    config: Option<PathBuf>,
    /// Number of rendered frames to simulate
    #[arg(short, long, default_value = "300")]
    frames: u32,
    /// Render rate; frames shorter or longer than the physics step exercise the accumulator
    #[arg(long, default_value = "60.0")]
    fps: f32,
    /// Hold the right direction for the whole run
    #[arg(long)]
    run_right: bool,
    /// Press jump every N frames (0 disables)
    #[arg(long, default_value = "0")]
    jump_every: u32,
}

fn build_course(sim: &mut Simulation) {
    let world = sim.world_mut();
    // Floor, top at y = 0
    world.add_static_box(None, Vec2::new(0.0, -0.5), Vec2::new(100.0, 0.5), 0.0);
    // Low step the controller walks up
    world.add_static_box(None, Vec2::new(6.0, 0.1), Vec2::new(1.0, 0.1), 0.0);
    // Climbable 20 degree ramp
    world.add_static_ramp(None, Vec2::new(12.0, 0.0), 6.0, 20f32.to_radians());
    // End wall
    world.add_static_box(None, Vec2::new(30.5, 5.0), Vec2::new(0.5, 5.0), 0.0);

    sim.add_trigger(SPIKES, Vec2::new(22.0, 0.25), Vec2::new(0.5, 0.25), HAZARD);
    sim.add_trigger(COIN, Vec2::new(9.0, 1.5), Vec2::new(0.3, 0.3), PICKUP);
    sim.add_dynamic_prop(CRATE, Vec2::new(3.0, 3.0), Vec2::new(0.4, 0.4), 0.2);
    sim.initialize();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GameConfig::from_file(path)?,
        None => GameConfig::default(),
    };
    if !(cli.fps > 0.0) {
        return Err(format!("--fps must be positive, got {}", cli.fps).into());
    }

    let mut sim = Simulation::new(config)?;
    build_course(&mut sim);
    sim.spawn_character(PLAYER, Vec2::new(0.0, 1.5), ColliderSpec::default())?;

    let frame_dt = 1.0 / cli.fps;
    let mut visuals = VisualStore::new();

    for frame in 0..cli.frames {
        let mut inputs = HashMap::new();
        inputs.insert(
            PLAYER,
            InputSnapshot {
                move_left: false,
                move_right: cli.run_right,
                jump_requested: cli.jump_every > 0 && frame % cli.jump_every == 0,
            },
        );

        let report = sim.advance(frame_dt, &inputs, &mut visuals);

        for event in sim.drain_events() {
            match event {
                SimEvent::Movement { entity, event } => {
                    info!("[Sim] frame {} {}: {:?}", frame, entity, event)
                }
                SimEvent::Contact(contact) if contact.sensor => info!(
                    "[Sim] frame {} trigger {} {:?} <-> {:?}",
                    frame,
                    if contact.started { "entered" } else { "left" },
                    contact.entity_a,
                    contact.entity_b
                ),
                SimEvent::Contact(_) => {}
            }
        }

        let line = json!({
            "frame": frame,
            "substeps": report.substeps,
            "dropped_time": report.dropped_time,
            "characters": sim.snapshots(),
            "crate": visuals.get(CRATE),
        });
        println!("{}", line);
    }

    Ok(())
}
