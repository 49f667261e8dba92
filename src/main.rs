use anyhow::Result;

#[cfg(feature = "cli")]
mod main {
    use super::*;
    use anyhow::bail;
    use clap::{Parser, Subcommand};
    use linkbox::{
        game_loop::GameLoopConfig,
        io::{parse_ron_file, write_ron_file},
        run::{self, RunConfig, SceneSource},
        scene::Preset,
        world::PhysicsConfig,
    };
    use std::{num::NonZeroU32, path::PathBuf};

    #[derive(Debug, Parser)]
    #[command(about = "A 2D sandbox for lockable rigid body linkages", long_about = None)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Debug, Subcommand)]
    enum Command {
        /// Simulate a scene
        Run {
            /// Path to RON file describing the scene
            #[arg(short, long, conflicts_with = "preset")]
            scene: Option<PathBuf>,
            /// Predefined scene to simulate when no scene file is given
            #[arg(short, long, value_enum, default_value_t = Preset::Finger)]
            preset: Preset,
            /// Path to RON physics configuration file to use
            #[arg(short, long)]
            config: Option<PathBuf>,
            /// Path to RON file with input events to replay
            #[arg(long)]
            script: Option<PathBuf>,
            /// Number of frames to run before stopping
            #[arg(short, long)]
            frames: Option<u64>,
            /// Maximum number of frames per second (0 for no limit)
            #[arg(long, default_value_t = 60)]
            fps: u32,
            /// Number of simulation substeps per frame, overriding the
            /// configuration
            #[arg(long)]
            substeps: Option<u32>,
            /// Number of frames between each logged snapshot (0 to disable)
            #[arg(long, default_value_t = 60)]
            report_interval: u64,
        },
        /// Generate the default physics configuration file
        GenerateConfig {
            /// Path where the file should be written
            #[arg(short, long)]
            output_path: PathBuf,
            /// Overwrite any existing file at the given path
            #[arg(short, long)]
            force_overwrite: bool,
        },
        /// Write the description of a predefined scene to a file
        DumpScene {
            /// Predefined scene to write
            #[arg(short, long, value_enum)]
            preset: Preset,
            /// Path where the file should be written
            #[arg(short, long)]
            output_path: PathBuf,
            /// Overwrite any existing file at the given path
            #[arg(short, long)]
            force_overwrite: bool,
        },
    }

    pub fn main() -> Result<()> {
        let cli = Cli::parse();
        run::init_logging()?;

        match cli.command {
            Command::Run {
                scene,
                preset,
                config,
                script,
                frames,
                fps,
                substeps,
                report_interval,
            } => {
                let mut physics = match config {
                    Some(file_path) => parse_ron_file(file_path)?,
                    None => PhysicsConfig::default(),
                };
                if let Some(n_substeps) = substeps {
                    if n_substeps == 0 {
                        bail!("The number of substeps must be at least one");
                    }
                    physics.simulator.n_substeps = n_substeps;
                }

                let scene = match scene {
                    Some(file_path) => SceneSource::File(file_path),
                    None => SceneSource::Preset(preset),
                };

                run::run(RunConfig {
                    scene,
                    physics,
                    game_loop: GameLoopConfig {
                        max_fps: NonZeroU32::new(fps),
                        max_frames: frames,
                    },
                    script,
                    report_interval,
                })?;
                Ok(())
            }
            Command::GenerateConfig {
                output_path,
                force_overwrite,
            } => write_ron_file(&PhysicsConfig::default(), output_path, force_overwrite),
            Command::DumpScene {
                preset,
                output_path,
                force_overwrite,
            } => write_ron_file(&preset.description()?, output_path, force_overwrite),
        }
    }
}

#[cfg(not(feature = "cli"))]
mod main {
    use super::*;

    pub fn main() -> Result<()> {
        anyhow::bail!("This binary requires the `cli` feature to be enabled.")
    }
}

fn main() -> Result<()> {
    main::main()
}
