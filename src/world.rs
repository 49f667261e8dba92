//! The simulation world owning all bodies, shapes and joints.

use crate::{
    collision::{CollisionWorld, Shape, ShapeID},
    constraint::{
        ConstraintManager, Joint, JointID, slide::SlideJoint, solver::ConstraintSolverConfig,
    },
    fph,
    inertia::InertialProperties,
    quantities::{Acceleration, Force, Pose, Position, Torque, Velocity},
    rigid_body::{RigidBody, RigidBodyID, RigidBodyKind, RigidBodyManager},
};
use anyhow::{Context, Result, anyhow, bail};
use linkbox_utils::{with_timing_debug_logging, with_trace_logging};
use nalgebra::vector;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

const CENTER_OF_MASS_TOLERANCE: fph = 1e-6;

/// Configuration parameters for physics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Configuration parameters for the physics simulation.
    pub simulator: SimulatorConfig,
    /// Configuration parameters for the constraint solver.
    pub constraint_solver: ConstraintSolverConfig,
}

/// Configuration parameters for the physics simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Whether physics simulation is enabled. A disabled simulation leaves
    /// all bodies where they are when stepped.
    pub enabled: bool,
    /// The number of substeps to perform each simulation step. Increase to
    /// improve accuracy.
    pub n_substeps: u32,
    /// The uniform gravitational acceleration. The y-axis points down.
    pub gravity: Acceleration,
    /// The duration of each simulation step when advancing with
    /// [`World::advance_simulation`].
    pub time_step_duration: fph,
    /// The maximum separation of lockable slide joint anchors when the joint
    /// is disengaged.
    pub unlock_distance: fph,
}

/// Owns the bodies, shapes and joints of a simulation and advances them
/// together.
///
/// A static world body is always present, so that joints can attach bodies
/// to a fixed point in space.
#[derive(Clone, Debug)]
pub struct World {
    config: SimulatorConfig,
    rigid_body_manager: RigidBodyManager,
    collision_world: CollisionWorld,
    constraint_manager: ConstraintManager,
    static_body_id: RigidBodyID,
    simulation_time: fph,
    n_steps: u64,
}

impl World {
    /// Creates a new world containing only the static world body.
    ///
    /// # Errors
    /// Returns an error if any of the configuration parameters are invalid.
    pub fn new(
        PhysicsConfig {
            simulator: config,
            constraint_solver: constraint_solver_config,
        }: PhysicsConfig,
    ) -> Result<Self> {
        config.validate()?;
        constraint_solver_config.validate()?;

        let mut rigid_body_manager = RigidBodyManager::new();
        let static_body_id = rigid_body_manager.add_rigid_body(RigidBody::new_static(Pose::default()));

        log::info!(
            "Created world with {} substeps of {:.4} s per step",
            config.n_substeps,
            config.time_step_duration
        );

        Ok(Self {
            config,
            rigid_body_manager,
            collision_world: CollisionWorld::new(),
            constraint_manager: ConstraintManager::new(constraint_solver_config),
            static_body_id,
            simulation_time: 0.0,
            n_steps: 0,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Whether physics simulation is enabled.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enables or disables (pauses) the simulation.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// The number of substeps performed each simulation step.
    pub fn n_substeps(&self) -> u32 {
        self.config.n_substeps
    }

    /// Sets the number of substeps performed each simulation step.
    ///
    /// # Errors
    /// Returns an error if the number is zero.
    pub fn set_n_substeps(&mut self, n_substeps: u32) -> Result<()> {
        if n_substeps == 0 {
            bail!("Invalid number of substeps for physics simulation: 0");
        }
        self.config.n_substeps = n_substeps;
        Ok(())
    }

    pub fn time_step_duration(&self) -> fph {
        self.config.time_step_duration
    }

    /// The time that has elapsed within the simulation.
    pub fn simulation_time(&self) -> fph {
        self.simulation_time
    }

    /// The number of steps taken since the world was created.
    pub fn n_steps(&self) -> u64 {
        self.n_steps
    }

    /// The ID of the static world body.
    pub fn static_body_id(&self) -> RigidBodyID {
        self.static_body_id
    }

    pub fn rigid_body_manager(&self) -> &RigidBodyManager {
        &self.rigid_body_manager
    }

    pub fn collision_world(&self) -> &CollisionWorld {
        &self.collision_world
    }

    pub fn constraint_manager(&self) -> &ConstraintManager {
        &self.constraint_manager
    }

    /// Returns a reference to the body with the given ID, or [`None`] if it
    /// does not exist.
    pub fn get_body(&self, id: RigidBodyID) -> Option<&RigidBody> {
        self.rigid_body_manager.get_rigid_body(id)
    }

    /// Returns a reference to the body with the given ID.
    ///
    /// # Panics
    /// If no body with the given ID exists.
    pub fn body(&self, id: RigidBodyID) -> &RigidBody {
        self.rigid_body_manager.rigid_body(id)
    }

    /// Creates a new body of the given kind at rest with the given pose.
    pub fn create_body(&mut self, kind: RigidBodyKind, pose: Pose) -> RigidBodyID {
        let id = self
            .rigid_body_manager
            .add_rigid_body(RigidBody::new(kind, pose));
        log::debug!("Created {:?} body {} at {:?}", kind, id, pose.position);
        id
    }

    /// Attaches the given shape to its body and recomputes the mass and
    /// moment of inertia of the body from all its shapes.
    ///
    /// The body rotates about its origin and forces act there, so the shapes
    /// of a body should together have their center of mass at the body
    /// origin. A warning is logged when they do not.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or the shape is invalid.
    pub fn attach_shape(&mut self, shape: Shape) -> Result<ShapeID> {
        let body_id = shape.body_id;
        let shape_id = self
            .collision_world
            .add_shape(&self.rigid_body_manager, shape)
            .with_context(|| format!("Failed to attach shape to body {}", body_id))?;
        self.update_inertial_properties(body_id);
        Ok(shape_id)
    }

    /// Creates a joint between two existing bodies.
    ///
    /// # Errors
    /// Returns an error if the joint references a missing body or is invalid.
    pub fn create_joint(&mut self, joint: Joint) -> Result<JointID> {
        let kind = joint.kind.name();
        let (body_a, body_b) = (joint.body_a, joint.body_b);
        let id = self
            .constraint_manager
            .add_joint(&self.rigid_body_manager, joint)
            .with_context(|| {
                format!(
                    "Failed to create {} joint between bodies {} and {}",
                    kind, body_a, body_b
                )
            })?;
        log::debug!(
            "Created {} joint {} between bodies {} and {}",
            kind,
            id,
            body_a,
            body_b
        );
        Ok(id)
    }

    /// Returns a reference to the [`Joint`] with the given ID, or [`None`] if
    /// it does not exist.
    pub fn get_joint(&self, id: JointID) -> Option<&Joint> {
        self.constraint_manager.get_joint(id)
    }

    /// Returns an iterator over all joints and their IDs.
    pub fn joints(&self) -> impl Iterator<Item = (JointID, &Joint)> {
        self.constraint_manager.joints()
    }

    /// Returns a mutable reference to the slide joint with the given ID.
    ///
    /// # Errors
    /// Returns an error if the joint does not exist or is not a slide joint.
    pub fn slide_joint_mut(&mut self, id: JointID) -> Result<&mut SlideJoint> {
        self.constraint_manager.slide_joint_mut(id)
    }

    /// Engages or disengages the slide joint with the given ID.
    ///
    /// # Errors
    /// Returns an error if the joint does not exist or is not a slide joint.
    pub fn set_slide_joint_engaged(&mut self, id: JointID, engaged: bool) -> Result<()> {
        self.slide_joint_mut(id)?.set_engaged(engaged);
        log::info!(
            "Slide joint {} {}",
            id,
            if engaged { "engaged" } else { "disengaged" }
        );
        Ok(())
    }

    /// Flips the engagement state of the slide joint with the given ID.
    ///
    /// # Returns
    /// Whether the joint is engaged after toggling.
    ///
    /// # Errors
    /// Returns an error if the joint does not exist or is not a slide joint.
    pub fn toggle_slide_joint(&mut self, id: JointID) -> Result<bool> {
        let engaged = self.slide_joint_mut(id)?.toggle_engaged();
        log::info!(
            "Slide joint {} toggled to {}",
            id,
            if engaged { "engaged" } else { "disengaged" }
        );
        Ok(engaged)
    }

    /// Removes the joint with the given ID.
    pub fn remove_joint(&mut self, id: JointID) -> Option<Joint> {
        self.constraint_manager.remove_joint(id)
    }

    /// Removes the body with the given ID together with all its shapes and
    /// all joints involving it.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or is the static world
    /// body.
    pub fn remove_body(&mut self, id: RigidBodyID) -> Result<RigidBody> {
        if id == self.static_body_id {
            bail!("Cannot remove the static world body");
        }
        let body = self
            .rigid_body_manager
            .remove_rigid_body(id)
            .ok_or_else(|| anyhow!("No body with ID {}", id))?;

        let n_removed_shapes = self.collision_world.remove_shapes_of_body(id);
        let removed_joints = self.constraint_manager.remove_joints_involving_body(id);

        log::debug!(
            "Removed body {} with {} shapes and {} joints",
            id,
            n_removed_shapes,
            removed_joints.len()
        );
        Ok(body)
    }

    /// Adds the given force, applied at the body's center of mass, to the
    /// force accumulated on the body for the next step.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn apply_force(&mut self, id: RigidBodyID, force: &Force) -> Result<()> {
        self.existing_body_mut(id)?.apply_force_at_center_of_mass(force)
    }

    /// Adds the given force, applied at the given world space position, to the
    /// force and torque accumulated on the body for the next step.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn apply_force_at_point(
        &mut self,
        id: RigidBodyID,
        force: &Force,
        position: &Position,
    ) -> Result<()> {
        self.existing_body_mut(id)?.apply_force(force, position)
    }

    /// Adds the given torque to the torque accumulated on the body for the
    /// next step.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn apply_torque(&mut self, id: RigidBodyID, torque: Torque) -> Result<()> {
        self.existing_body_mut(id)?.apply_torque(torque)
    }

    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn set_velocity(&mut self, id: RigidBodyID, velocity: Velocity) -> Result<()> {
        self.existing_body_mut(id)?.set_velocity(velocity)
    }

    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn set_angular_velocity(&mut self, id: RigidBodyID, angular_velocity: fph) -> Result<()> {
        self.existing_body_mut(id)?.set_angular_velocity(angular_velocity)
    }

    /// Moves the body to the given pose.
    ///
    /// # Errors
    /// Returns an error if the body does not exist or is static.
    pub fn set_pose(&mut self, id: RigidBodyID, pose: Pose) -> Result<()> {
        self.existing_body_mut(id)?.set_pose(pose)?;
        self.collision_world
            .synchronize_shapes_with_rigid_bodies(&self.rigid_body_manager);
        Ok(())
    }

    /// Computes the total kinetic energy of all bodies.
    pub fn compute_kinetic_energy(&self) -> fph {
        self.rigid_body_manager
            .rigid_bodies()
            .map(|(_, body)| body.compute_kinetic_energy())
            .sum()
    }

    /// Advances the simulation by one step of the configured time step
    /// duration.
    pub fn advance_simulation(&mut self) {
        self.step(self.config.time_step_duration);
    }

    /// Advances the simulation by the given duration, split into the
    /// configured number of substeps. The forces and torques accumulated on
    /// the bodies act during every substep and are reset once the whole step
    /// is done rather than after each substep, so a push has the same effect
    /// for any number of substeps.
    pub fn step(&mut self, duration: fph) {
        if !self.config.enabled {
            return;
        }
        with_timing_debug_logging!(
            "Simulation step {} with duration {:.4} and {} substeps",
            self.n_steps,
            duration,
            self.config.n_substeps; {
            self.do_step(duration);
        });
    }

    /// Removes all bodies, shapes and joints except the static world body and
    /// resets the simulation time.
    pub fn reset(&mut self) {
        self.rigid_body_manager.clear();
        self.collision_world.clear();
        self.constraint_manager.clear();
        self.static_body_id = self
            .rigid_body_manager
            .add_rigid_body(RigidBody::new_static(Pose::default()));
        self.simulation_time = 0.0;
        self.n_steps = 0;
    }

    fn do_step(&mut self, duration: fph) {
        let substep_duration = duration / fph::from_u32(self.config.n_substeps).unwrap();

        for _ in 0..self.config.n_substeps {
            Self::perform_substep(
                &mut self.rigid_body_manager,
                &mut self.collision_world,
                &mut self.constraint_manager,
                &self.config.gravity,
                substep_duration,
            );
            self.simulation_time += substep_duration;
        }

        self.collision_world
            .synchronize_shapes_with_rigid_bodies(&self.rigid_body_manager);
        self.rigid_body_manager.reset_all_forces_and_torques();
        self.n_steps += 1;
    }

    fn perform_substep(
        rigid_body_manager: &mut RigidBodyManager,
        collision_world: &mut CollisionWorld,
        constraint_manager: &mut ConstraintManager,
        gravity: &Acceleration,
        step_duration: fph,
    ) {
        collision_world.synchronize_shapes_with_rigid_bodies(rigid_body_manager);

        with_trace_logging!("Preparing constraints"; {
            constraint_manager.prepare_constraints(rigid_body_manager, collision_world, step_duration);
        });

        constraint_manager.apply_spring_torques(rigid_body_manager, step_duration);
        rigid_body_manager.advance_dynamic_rigid_body_velocities(gravity, step_duration);

        constraint_manager.compute_and_apply_constrained_state(rigid_body_manager);

        rigid_body_manager.advance_dynamic_rigid_body_configurations(step_duration);
    }

    fn existing_body_mut(&mut self, id: RigidBodyID) -> Result<&mut RigidBody> {
        self.rigid_body_manager
            .get_rigid_body_mut(id)
            .ok_or_else(|| anyhow!("No body with ID {}", id))
    }

    fn update_inertial_properties(&mut self, body_id: RigidBodyID) {
        let inertial_properties = self
            .collision_world
            .shapes_of_body(body_id)
            .map(|(_, shape)| {
                InertialProperties::of_uniform_shape(&shape.geometry, shape.material.density)
            })
            .fold(InertialProperties::massless(), |total, properties| {
                total.combined(&properties)
            });

        let center_of_mass = inertial_properties.center_of_mass();
        if center_of_mass.coords.norm() > CENTER_OF_MASS_TOLERANCE {
            log::warn!(
                "Shapes of body {} have their center of mass at {:?} instead of the body origin",
                body_id,
                center_of_mass
            );
        }

        if let Some(body) = self.rigid_body_manager.get_rigid_body_mut(body_id) {
            body.set_inertial_properties(inertial_properties);
        }
    }
}

impl SimulatorConfig {
    /// # Errors
    /// Returns an error if any of the parameters are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.n_substeps == 0 {
            bail!(
                "Invalid number of substeps for physics simulation: {}",
                self.n_substeps
            );
        }
        if !(self.time_step_duration.is_finite() && self.time_step_duration > 0.0) {
            bail!(
                "Invalid time step duration for physics simulation: {}",
                self.time_step_duration
            );
        }
        if !(self.gravity.x.is_finite() && self.gravity.y.is_finite()) {
            bail!("Invalid gravity for physics simulation: {:?}", self.gravity);
        }
        if !(self.unlock_distance.is_finite() && self.unlock_distance >= 0.0) {
            bail!(
                "Invalid unlock distance for slide joints: {}",
                self.unlock_distance
            );
        }
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_substeps: 10,
            gravity: vector![0.0, 100.0],
            time_step_duration: 1.0 / 60.0,
            unlock_distance: 50.0,
        }
    }
}
