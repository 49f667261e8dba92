//! Setting up and running a session.

use crate::{
    control::{InputHandler, ScriptedInput},
    fph,
    game_loop::{ExitReason, GameLoop, GameLoopConfig},
    io,
    render::LogRenderer,
    scene::{Preset, Scene, SceneDescription, build_scene},
    world::{PhysicsConfig, World},
};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Everything needed to set up and run a session.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub scene: SceneSource,
    pub physics: PhysicsConfig,
    pub game_loop: GameLoopConfig,
    /// RON file with the input events to replay. No input if absent.
    pub script: Option<PathBuf>,
    /// Number of frames between each logged snapshot. Zero disables
    /// snapshot logging.
    pub report_interval: u64,
}

/// Where the scene to simulate is described.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneSource {
    Preset(Preset),
    File(PathBuf),
}

/// The state at the end of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub exit_reason: ExitReason,
    pub n_frames: u64,
    pub simulation_time: fph,
    pub kinetic_energy: fph,
}

/// Initializes the logging backend. The level is taken from the `RUST_LOG`
/// environment variable and defaults to `info`.
///
/// # Errors
/// Returns an error if a logger has already been initialized.
pub fn init_logging() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()?;
    Ok(())
}

/// Obtains the scene description from the given source.
///
/// # Errors
/// Returns an error if the description can not be read or is invalid.
pub fn load_scene_description(source: &SceneSource) -> Result<SceneDescription> {
    let description: SceneDescription = match source {
        SceneSource::Preset(preset) => preset.description()?,
        SceneSource::File(file_path) => io::parse_ron_file(file_path)?,
    };
    description
        .validate()
        .with_context(|| format!("Invalid scene from {:?}", source))?;
    Ok(description)
}

/// Creates a world with the given configuration and builds the described
/// scene in it.
///
/// # Errors
/// Returns an error if the configuration or the scene is invalid.
pub fn build_world(physics: PhysicsConfig, description: &SceneDescription) -> Result<(World, Scene)> {
    let mut world = World::new(physics)?;
    let scene = build_scene(&mut world, description)?;
    log::info!(
        "Built world with {} bodies, {} shapes and {} joints",
        world.rigid_body_manager().n_bodies(),
        world.collision_world().n_shapes(),
        world.joints().count()
    );
    Ok((world, scene))
}

/// Sets up and runs a session until it is ended by the input or by the frame
/// limit.
///
/// # Errors
/// Returns an error if setup fails or if presentation fails while running.
pub fn run(config: RunConfig) -> Result<RunSummary> {
    let description = load_scene_description(&config.scene)?;
    let (world, scene) = build_world(config.physics, &description)?;

    let input_handler = InputHandler::default();

    let input_source = match &config.script {
        Some(file_path) => ScriptedInput::from_ron_file(file_path)?,
        None => ScriptedInput::default(),
    };

    if config.game_loop.max_frames.is_none()
        && !input_source.ends_session(input_handler.key_map())
    {
        log::warn!("No frame limit and no scripted exit: the session will run until interrupted");
    }

    let mut game_loop = GameLoop::new(
        world,
        scene,
        input_handler,
        input_source,
        LogRenderer::new(config.report_interval),
        config.game_loop,
    );

    let exit_reason = game_loop.run()?;

    let world = game_loop.world();
    let summary = RunSummary {
        exit_reason,
        n_frames: game_loop.n_frames(),
        simulation_time: world.simulation_time(),
        kinetic_energy: world.compute_kinetic_energy(),
    };
    log::info!(
        "Session ended ({:?}) after {} frames at t = {:.2} with kinetic energy {:.3}",
        summary.exit_reason,
        summary.n_frames,
        summary.simulation_time,
        summary.kinetic_energy
    );
    Ok(summary)
}
