//! Handling of user input.

use crate::{
    fph,
    geometry::GEOMETRIC_EPSILON,
    hit_test::{self, CornerHit, DEFAULT_PICK_TOLERANCE},
    io,
    quantities::Position,
    rigid_body::RigidBodyID,
    scene::Scene,
    world::World,
};
use anyhow::{Result, bail};
use nalgebra::{point, vector};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

/// A discrete input event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    Quit,
    KeyDown(Key),
    /// A mouse button was released at the given world space position.
    MouseUp { x: fph, y: fph },
}

/// The keyboard keys the sandbox knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    Escape,
    Q,
    Space,
    Left,
    Right,
    A,
    D,
    P,
    Plus,
    Minus,
    /// A digit key from 0 to 9.
    Digit(u8),
}

/// Actions that can be performed with a keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    Exit,
    ToggleAllHinges,
    ToggleHinge(usize),
    PushLeft,
    PushRight,
    TwistClockwise,
    TwistCounterClockwise,
    TogglePause,
    IncrementSubstepCount,
    DecrementSubstepCount,
}

/// A map associating specific keyboard key inputs with the actions they
/// should perform.
#[derive(Clone, Debug)]
pub struct KeyActionMap(HashMap<Key, ControlAction>);

/// Configuration parameters for input handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// The maximum distance from a mouse click to a shape corner for the
    /// corner to be picked.
    pub pick_tolerance: fph,
    /// The acceleration given to the linkage tip by push actions.
    pub push_acceleration: fph,
    /// The angular acceleration given to the linkage tip by twist actions.
    pub twist_angular_acceleration: fph,
}

/// Handler for input events.
#[derive(Clone, Debug)]
pub struct InputHandler {
    key_map: KeyActionMap,
    config: ControlConfig,
}

/// Whether or not an event has been handled by the input handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlingResult {
    Handled,
    Unhandled,
}

/// Whether the game loop should keep running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlFlow {
    #[default]
    Continue,
    Exit,
}

/// A source of input events, polled once per frame.
pub trait InputSource {
    /// Returns the events that occurred since the previous frame.
    fn poll_events(&mut self, frame: u64) -> Vec<InputEvent>;
}

/// A sequence of input events to replay, each tagged with the frame it
/// occurs in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventScript {
    pub events: Vec<ScriptedEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptedEvent {
    pub frame: u64,
    pub event: InputEvent,
}

/// An [`InputSource`] replaying an [`EventScript`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedInput {
    events: BTreeMap<u64, Vec<InputEvent>>,
}

/// Macro for easing creation of keyboard action maps.
macro_rules! def_key_action_map {
    ($($action:expr => $key:expr),* $(,)?) => {
        [$(($key, $action),)*].into_iter().collect::<HashMap<_, _>>()
    };
}

impl KeyActionMap {
    pub fn new(map: HashMap<Key, ControlAction>) -> Self {
        Self(map)
    }

    /// Returns the action bound to the given key, if any.
    pub fn action_for_key(&self, key: Key) -> Option<ControlAction> {
        self.0.get(&key).copied()
    }
}

impl Default for KeyActionMap {
    fn default() -> Self {
        let mut map = def_key_action_map!(
            ControlAction::Exit => Key::Escape,
            ControlAction::Exit => Key::Q,
            ControlAction::ToggleAllHinges => Key::Space,
            ControlAction::PushLeft => Key::Left,
            ControlAction::PushRight => Key::Right,
            ControlAction::TwistCounterClockwise => Key::A,
            ControlAction::TwistClockwise => Key::D,
            ControlAction::TogglePause => Key::P,
            ControlAction::IncrementSubstepCount => Key::Plus,
            ControlAction::DecrementSubstepCount => Key::Minus,
        );
        for digit in 1..=9 {
            map.insert(
                Key::Digit(digit),
                ControlAction::ToggleHinge(usize::from(digit - 1)),
            );
        }
        Self(map)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pick_tolerance: DEFAULT_PICK_TOLERANCE,
            push_acceleration: 300.0,
            twist_angular_acceleration: 20.0,
        }
    }
}

impl InputHandler {
    /// Creates a new input handler that will use the given keyboard action
    /// map.
    pub fn new(key_map: KeyActionMap, config: ControlConfig) -> Self {
        Self { key_map, config }
    }

    pub fn key_map(&self) -> &KeyActionMap {
        &self.key_map
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Takes an input event and possibly performs an action in the world.
    /// Actions that fail are logged and otherwise ignored.
    pub fn handle_event(
        &self,
        world: &mut World,
        scene: &Scene,
        control_flow: &mut ControlFlow,
        event: &InputEvent,
    ) -> HandlingResult {
        match event {
            InputEvent::Quit => {
                log::info!("Received quit event");
                *control_flow = ControlFlow::Exit;
                HandlingResult::Handled
            }
            InputEvent::KeyDown(key) => {
                let Some(action) = self.key_map.action_for_key(*key) else {
                    log::trace!("Ignoring unbound key {:?}", key);
                    return HandlingResult::Unhandled;
                };
                if let Err(error) = self.perform_action(world, scene, control_flow, action) {
                    log::warn!("Could not perform {:?}: {:#}", action, error);
                }
                HandlingResult::Handled
            }
            &InputEvent::MouseUp { x, y } => {
                if !(x.is_finite() && y.is_finite()) {
                    log::trace!("Ignoring mouse event at invalid position ({}, {})", x, y);
                    return HandlingResult::Unhandled;
                }
                match hit_test::find_nearest_corner(world, &point![x, y], self.config.pick_tolerance)
                {
                    Some(hit) => {
                        toggle_slide_joints_at_corner(world, &hit);
                        HandlingResult::Handled
                    }
                    None => {
                        log::trace!("No corner near ({:.1}, {:.1})", x, y);
                        HandlingResult::Unhandled
                    }
                }
            }
        }
    }

    fn perform_action(
        &self,
        world: &mut World,
        scene: &Scene,
        control_flow: &mut ControlFlow,
        action: ControlAction,
    ) -> Result<()> {
        match action {
            ControlAction::Exit => {
                log::info!("Exit requested");
                *control_flow = ControlFlow::Exit;
            }
            ControlAction::ToggleAllHinges => {
                let engaged = !scene.all_hinges_engaged(world);
                scene.set_all_hinges_engaged(world, engaged)?;
                log::info!(
                    "All hinges {}",
                    if engaged { "engaged" } else { "disengaged" }
                );
            }
            ControlAction::ToggleHinge(idx) => {
                scene.toggle_hinge(world, idx)?;
            }
            ControlAction::PushLeft => self.push_tip(world, scene, -1.0)?,
            ControlAction::PushRight => self.push_tip(world, scene, 1.0)?,
            ControlAction::TwistClockwise => self.twist_tip(world, scene, 1.0)?,
            ControlAction::TwistCounterClockwise => self.twist_tip(world, scene, -1.0)?,
            ControlAction::TogglePause => {
                let enabled = !world.enabled();
                world.set_enabled(enabled);
                log::info!("Simulation {}", if enabled { "resumed" } else { "paused" });
            }
            ControlAction::IncrementSubstepCount => {
                world.set_n_substeps(world.n_substeps().saturating_add(1))?;
                log::info!("Using {} substeps", world.n_substeps());
            }
            ControlAction::DecrementSubstepCount => {
                world.set_n_substeps(world.n_substeps() - 1)?;
                log::info!("Using {} substeps", world.n_substeps());
            }
        }
        Ok(())
    }

    fn push_tip(&self, world: &mut World, scene: &Scene, sign: fph) -> Result<()> {
        let Some(tip) = scene.tip() else {
            bail!("The scene has no body to push");
        };
        let force = vector![sign * world.body(tip).mass() * self.config.push_acceleration, 0.0];
        if let Err(error) = world.apply_force(tip, &force) {
            log::debug!("Push rejected: {:#}", error);
        }
        Ok(())
    }

    fn twist_tip(&self, world: &mut World, scene: &Scene, sign: fph) -> Result<()> {
        let Some(tip) = scene.tip() else {
            bail!("The scene has no body to twist");
        };
        let torque =
            sign * world.body(tip).moment_of_inertia() * self.config.twist_angular_acceleration;
        if let Err(error) = world.apply_torque(tip, torque) {
            log::debug!("Twist rejected: {:#}", error);
        }
        Ok(())
    }
}

impl Default for InputHandler {
    fn default() -> Self {
        Self::new(KeyActionMap::default(), ControlConfig::default())
    }
}

/// Toggles every slide joint with an anchor at the picked corner.
///
/// # Returns
/// The number of toggled joints.
fn toggle_slide_joints_at_corner(world: &mut World, hit: &CornerHit) -> usize {
    let joints_at_corner: Vec<_> = world
        .joints()
        .filter(|(_, joint)| joint.as_slide().is_some())
        .filter(|(_, joint)| {
            let Some((anchor_a, anchor_b)) = joint.anchors() else {
                return false;
            };
            let is_at_corner = |body_id: RigidBodyID, anchor: Position| {
                body_id == hit.body_id
                    && nalgebra::distance(&anchor, &hit.local_position) <= GEOMETRIC_EPSILON.sqrt()
            };
            is_at_corner(joint.body_a, anchor_a) || is_at_corner(joint.body_b, anchor_b)
        })
        .map(|(id, _)| id)
        .collect();

    if joints_at_corner.is_empty() {
        log::debug!(
            "No slide joint at corner {} of shape {}",
            hit.corner_idx,
            hit.shape_id
        );
    }

    for &id in &joints_at_corner {
        if let Err(error) = world.toggle_slide_joint(id) {
            log::warn!("Could not toggle joint {}: {:#}", id, error);
        }
    }
    joints_at_corner.len()
}

impl ScriptedInput {
    pub fn new(script: EventScript) -> Self {
        let mut events: BTreeMap<u64, Vec<InputEvent>> = BTreeMap::new();
        for ScriptedEvent { frame, event } in script.events {
            events.entry(frame).or_default().push(event);
        }
        Self { events }
    }

    /// Reads an [`EventScript`] from the RON file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or parsed.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(io::parse_ron_file(file_path)?))
    }

    /// Whether the script contains a quit event or a key bound to exit in
    /// the given map.
    pub fn ends_session(&self, key_map: &KeyActionMap) -> bool {
        self.events.values().flatten().any(|event| match event {
            InputEvent::Quit => true,
            InputEvent::KeyDown(key) => key_map.action_for_key(*key) == Some(ControlAction::Exit),
            InputEvent::MouseUp { .. } => false,
        })
    }
}

impl InputSource for ScriptedInput {
    fn poll_events(&mut self, frame: u64) -> Vec<InputEvent> {
        self.events.remove(&frame).unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        scene::{SceneDescription, SegmentDescription, build_scene},
        world::PhysicsConfig,
    };

    fn finger_world() -> (World, Scene) {
        let mut world = World::new(PhysicsConfig::default()).unwrap();
        let description = SceneDescription {
            origin: point![0.0, 0.0],
            segments: vec![SegmentDescription::new(100.0, 50.0); 3],
            anchor_first: true,
            ..Default::default()
        };
        let scene = build_scene(&mut world, &description).unwrap();
        (world, scene)
    }

    fn handle(
        world: &mut World,
        scene: &Scene,
        event: InputEvent,
    ) -> (HandlingResult, ControlFlow) {
        let mut control_flow = ControlFlow::Continue;
        let result = InputHandler::default().handle_event(world, scene, &mut control_flow, &event);
        (result, control_flow)
    }

    fn engaged(world: &World, id: crate::constraint::JointID) -> bool {
        world.get_joint(id).unwrap().as_slide().unwrap().is_engaged()
    }

    #[test]
    fn quit_and_exit_keys_stop_the_loop() {
        let (mut world, scene) = finger_world();
        for event in [
            InputEvent::Quit,
            InputEvent::KeyDown(Key::Escape),
            InputEvent::KeyDown(Key::Q),
        ] {
            assert_eq!(handle(&mut world, &scene, event).1, ControlFlow::Exit);
        }
    }

    #[test]
    fn unbound_key_is_ignored() {
        let (mut world, scene) = finger_world();
        let (result, control_flow) = handle(&mut world, &scene, InputEvent::KeyDown(Key::Digit(0)));
        assert_eq!(result, HandlingResult::Unhandled);
        assert_eq!(control_flow, ControlFlow::Continue);
    }

    #[test]
    fn digit_key_toggles_corresponding_hinge() {
        let (mut world, scene) = finger_world();
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Digit(2)));
        let hinge = scene.hinges()[1];
        assert!(!engaged(&world, hinge.top));
        assert!(!engaged(&world, hinge.bottom));
        assert!(engaged(&world, scene.hinges()[0].top));
    }

    #[test]
    fn toggling_missing_hinge_is_not_fatal() {
        let (mut world, scene) = finger_world();
        let (result, control_flow) = handle(&mut world, &scene, InputEvent::KeyDown(Key::Digit(9)));
        assert_eq!(result, HandlingResult::Handled);
        assert_eq!(control_flow, ControlFlow::Continue);
    }

    #[test]
    fn space_toggles_all_hinges() {
        let (mut world, scene) = finger_world();
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Space));
        assert!(scene.hinges().iter().all(|hinge| !engaged(&world, hinge.top)));
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Space));
        assert!(scene.all_hinges_engaged(&world));
    }

    #[test]
    fn clicking_corner_toggles_only_joint_anchored_there() {
        let (mut world, scene) = finger_world();
        // Top corner shared by the first and second segment
        let (result, _) = handle(&mut world, &scene, InputEvent::MouseUp { x: 103.0, y: -27.0 });
        assert_eq!(result, HandlingResult::Handled);

        let hinge = scene.hinges()[1];
        assert!(!engaged(&world, hinge.top));
        assert!(engaged(&world, hinge.bottom));
    }

    #[test]
    fn clicking_far_from_corners_does_nothing() {
        let (mut world, scene) = finger_world();
        let (result, _) = handle(&mut world, &scene, InputEvent::MouseUp { x: 50.0, y: 0.0 });
        assert_eq!(result, HandlingResult::Unhandled);
        assert!(scene.all_hinges_engaged(&world));
    }

    #[test]
    fn push_accumulates_force_on_tip() {
        let (mut world, scene) = finger_world();
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Right));
        let tip = scene.tip().unwrap();
        let expected = world.body(tip).mass() * ControlConfig::default().push_acceleration;
        assert_eq!(world.body(tip).total_force().x, expected);
    }

    #[test]
    fn substep_count_never_drops_to_zero() {
        let (mut world, scene) = finger_world();
        world.set_n_substeps(1).unwrap();
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Minus));
        assert_eq!(world.n_substeps(), 1);
        handle(&mut world, &scene, InputEvent::KeyDown(Key::Plus));
        assert_eq!(world.n_substeps(), 2);
    }

    #[test]
    fn scripted_input_replays_events_by_frame() {
        let mut input = ScriptedInput::new(EventScript {
            events: vec![
                ScriptedEvent {
                    frame: 2,
                    event: InputEvent::KeyDown(Key::Space),
                },
                ScriptedEvent {
                    frame: 0,
                    event: InputEvent::Quit,
                },
                ScriptedEvent {
                    frame: 2,
                    event: InputEvent::KeyDown(Key::P),
                },
            ],
        });
        assert!(input.ends_session(&KeyActionMap::default()));
        assert_eq!(input.poll_events(0), vec![InputEvent::Quit]);
        assert!(input.poll_events(1).is_empty());
        assert_eq!(
            input.poll_events(2),
            vec![InputEvent::KeyDown(Key::Space), InputEvent::KeyDown(Key::P)]
        );
        assert!(input.poll_events(2).is_empty());
    }
}
