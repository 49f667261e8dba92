//! Main loop driving input handling, simulation and presentation.

use crate::{
    control::{ControlFlow, InputHandler, InputSource},
    render::{RenderSnapshot, Renderer},
    scene::Scene,
    world::World,
};
use anyhow::Result;
use linkbox_utils::with_timing_debug_logging;
use serde::{Deserialize, Serialize};
use std::{
    num::NonZeroU32,
    thread,
    time::{Duration, Instant},
};

/// A loop driving simulation and presentation of a [`World`]. Each iteration
/// polls input, handles it, steps the world and presents the result.
#[derive(Debug)]
pub struct GameLoop<I, R> {
    world: World,
    scene: Scene,
    input_handler: InputHandler,
    input_source: I,
    renderer: R,
    frame_duration_tracker: FrameDurationTracker,
    previous_iter_end_time: Instant,
    n_frames: u64,
    config: GameLoopConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameLoopConfig {
    /// The maximum number of iterations per second. No limit if absent.
    pub max_fps: Option<NonZeroU32>,
    /// The number of iterations after which the loop stops. No limit if
    /// absent.
    pub max_frames: Option<u64>,
}

/// Why a [`GameLoop`] stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// A quit event or exit action was received.
    Requested,
    /// The configured maximum number of frames was reached.
    FrameLimitReached,
}

#[derive(Clone, Debug)]
struct GenericFrameDurationTracker<const N_FRAMES: usize> {
    last_frame_durations: [Duration; N_FRAMES],
    idx_of_oldest: usize,
}

type FrameDurationTracker = GenericFrameDurationTracker<5>;

impl<I: InputSource, R: Renderer> GameLoop<I, R> {
    pub fn new(
        world: World,
        scene: Scene,
        input_handler: InputHandler,
        input_source: I,
        renderer: R,
        config: GameLoopConfig,
    ) -> Self {
        Self {
            world,
            scene,
            input_handler,
            input_source,
            renderer,
            frame_duration_tracker: FrameDurationTracker::default(),
            previous_iter_end_time: Instant::now(),
            n_frames: 0,
            config,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// The number of completed iterations.
    pub fn n_frames(&self) -> u64 {
        self.n_frames
    }

    /// The average frame rate over the last few iterations.
    pub fn smoothed_fps(&self) -> u32 {
        frame_duration_to_fps(self.frame_duration_tracker.compute_smooth_frame_duration())
    }

    /// Runs iterations until exit is requested or the frame limit is reached.
    ///
    /// # Errors
    /// Returns an error if presentation fails.
    pub fn run(&mut self) -> Result<ExitReason> {
        loop {
            if self
                .config
                .max_frames
                .is_some_and(|max_frames| self.n_frames >= max_frames)
            {
                log::info!("Stopping after {} frames", self.n_frames);
                return Ok(ExitReason::FrameLimitReached);
            }
            if self.perform_iteration()? == ControlFlow::Exit {
                log::info!("Stopping on request after {} frames", self.n_frames);
                return Ok(ExitReason::Requested);
            }
        }
    }

    /// Performs a single iteration of the loop. The world is not stepped if
    /// exit was requested by the input for this iteration.
    ///
    /// # Errors
    /// Returns an error if presentation fails.
    pub fn perform_iteration(&mut self) -> Result<ControlFlow> {
        let mut control_flow = ControlFlow::Continue;

        for event in self.input_source.poll_events(self.n_frames) {
            self.input_handler.handle_event(
                &mut self.world,
                &self.scene,
                &mut control_flow,
                &event,
            );
            if control_flow == ControlFlow::Exit {
                return Ok(control_flow);
            }
        }

        with_timing_debug_logging!("Frame {}", self.n_frames; {
            self.world.advance_simulation();
        });

        self.renderer
            .present(&RenderSnapshot::capture(&self.world, self.n_frames))?;

        let iter_end_time = self.wait_for_target_frame_duration();
        self.frame_duration_tracker
            .add_frame_duration(iter_end_time - self.previous_iter_end_time);
        self.previous_iter_end_time = iter_end_time;
        self.n_frames += 1;

        Ok(control_flow)
    }

    fn wait_for_target_frame_duration(&self) -> Instant {
        let mut iter_end_time = Instant::now();
        if let Some(min_frame_duration) = self.config.min_frame_duration() {
            let target_end_time = self.previous_iter_end_time + min_frame_duration;

            let remaining_duration = target_end_time.saturating_duration_since(iter_end_time);
            if remaining_duration > Duration::ZERO {
                thread::sleep(remaining_duration);
                iter_end_time = Instant::now();
            }
        }
        iter_end_time
    }
}

impl<const N_FRAMES: usize> GenericFrameDurationTracker<N_FRAMES> {
    fn new(initial_frame_duration: Duration) -> Self {
        let last_frame_durations = [initial_frame_duration; N_FRAMES];
        Self {
            last_frame_durations,
            idx_of_oldest: 0,
        }
    }

    fn compute_smooth_frame_duration(&self) -> Duration {
        let total_duration: Duration = self.last_frame_durations.iter().sum();
        total_duration.div_f64(N_FRAMES as f64)
    }

    fn add_frame_duration(&mut self, frame_duration: Duration) {
        self.last_frame_durations[self.idx_of_oldest] = frame_duration;
        self.idx_of_oldest = (self.idx_of_oldest + 1) % N_FRAMES;
    }
}

impl<const N_FRAMES: usize> Default for GenericFrameDurationTracker<N_FRAMES> {
    fn default() -> Self {
        Self::new(fps_to_frame_duration(30))
    }
}

fn frame_duration_to_fps(duration: Duration) -> u32 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        (1.0 / seconds).round() as u32
    } else {
        u32::MAX
    }
}

fn fps_to_frame_duration(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps))
}

impl GameLoopConfig {
    fn min_frame_duration(&self) -> Option<Duration> {
        self.max_fps.map(|fps| fps_to_frame_duration(fps.get()))
    }
}

impl Default for GameLoopConfig {
    fn default() -> Self {
        Self {
            max_fps: NonZeroU32::new(60),
            max_frames: None,
        }
    }
}
