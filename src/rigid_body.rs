//! Rigid body simulation.

use crate::{
    fph,
    inertia::InertialProperties,
    quantities::{
        Acceleration, AngularVelocity, Force, Orientation, Pose, Position, Torque, Velocity,
        compute_point_velocity, cross,
    },
};
use anyhow::{Result, bail};
use approx::AbsDiffEq;
use linkbox_utils::{DenseMap, define_id_newtype};
use serde::{Deserialize, Serialize};

define_id_newtype! {
    /// Identifier for a [`RigidBody`] in a [`RigidBodyManager`].
    [pub] RigidBodyID
}

/// Whether a rigid body responds to forces and constraints.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RigidBodyKind {
    /// The body moves according to the forces, torques and constraint
    /// impulses it experiences.
    #[default]
    Dynamic,
    /// The body has infinite mass and moment of inertia and never moves.
    Static,
}

/// Manages and operates on rigid bodies. Bodies are stored contiguously and
/// always processed in insertion order.
#[derive(Clone, Debug)]
pub struct RigidBodyManager {
    bodies: DenseMap<RigidBodyID, RigidBody>,
    body_id_counter: u64,
}

/// A rigid body in 2D. The origin of the body's reference frame is taken to
/// be its center of mass.
///
/// The accumulated force and torque persist until
/// [`reset_force_and_torque`](Self::reset_force_and_torque) is called, so that
/// forces applied once per frame act on every substep of the frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RigidBody {
    kind: RigidBodyKind,
    inertial_properties: InertialProperties,
    position: Position,
    angle: Orientation,
    velocity: Velocity,
    angular_velocity: AngularVelocity,
    total_force: Force,
    total_torque: Torque,
}

impl RigidBodyManager {
    pub fn new() -> Self {
        Self {
            bodies: DenseMap::new(),
            body_id_counter: 0,
        }
    }

    /// The number of bodies in the manager.
    pub fn n_bodies(&self) -> usize {
        self.bodies.len()
    }

    /// Returns a reference to the [`RigidBody`] with the given ID, or [`None`]
    /// if it does not exist.
    pub fn get_rigid_body(&self, id: RigidBodyID) -> Option<&RigidBody> {
        self.bodies.get(id)
    }

    /// Returns a mutable reference to the [`RigidBody`] with the given ID, or
    /// [`None`] if it does not exist.
    pub fn get_rigid_body_mut(&mut self, id: RigidBodyID) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id)
    }

    /// Returns mutable references to the two rigid bodies with the given IDs,
    /// or [`None`] if either of them does not exist.
    ///
    /// # Panics
    /// If the two IDs are equal.
    pub fn get_two_rigid_bodies_mut(
        &mut self,
        id_1: RigidBodyID,
        id_2: RigidBodyID,
    ) -> Option<(&mut RigidBody, &mut RigidBody)> {
        self.bodies.get_two_mut(id_1, id_2)
    }

    /// Returns a reference to the [`RigidBody`] with the given ID.
    ///
    /// # Panics
    /// If no rigid body with the given ID exists.
    pub fn rigid_body(&self, id: RigidBodyID) -> &RigidBody {
        self.get_rigid_body(id)
            .expect("Requested missing rigid body")
    }

    /// Returns a mutable reference to the [`RigidBody`] with the given ID.
    ///
    /// # Panics
    /// If no rigid body with the given ID exists.
    pub fn rigid_body_mut(&mut self, id: RigidBodyID) -> &mut RigidBody {
        self.get_rigid_body_mut(id)
            .expect("Requested missing rigid body")
    }

    /// Whether a body with the given ID exists.
    pub fn has_rigid_body(&self, id: RigidBodyID) -> bool {
        self.bodies.contains_key(id)
    }

    /// Returns an iterator over all bodies and their IDs in storage order.
    pub fn rigid_bodies(&self) -> impl Iterator<Item = (RigidBodyID, &RigidBody)> {
        self.bodies.iter()
    }

    /// Adds the given [`RigidBody`] to the manager.
    ///
    /// # Returns
    /// A new [`RigidBodyID`] referring to the added body.
    pub fn add_rigid_body(&mut self, body: RigidBody) -> RigidBodyID {
        let id = self.create_new_rigid_body_id();
        self.bodies.push(id, body);
        id
    }

    /// Removes the [`RigidBody`] with the given ID from the manager if it
    /// exists.
    pub fn remove_rigid_body(&mut self, id: RigidBodyID) -> Option<RigidBody> {
        self.bodies.swap_remove(id)
    }

    /// Resets the total applied force and torque on all rigid bodies to zero.
    pub fn reset_all_forces_and_torques(&mut self) {
        for body in self.bodies.values_mut() {
            body.reset_force_and_torque();
        }
    }

    /// Advances the linear and angular velocity of all dynamic rigid bodies
    /// based on the given gravitational acceleration and the accumulated
    /// force and torque on each body.
    pub fn advance_dynamic_rigid_body_velocities(
        &mut self,
        gravity: &Acceleration,
        step_duration: fph,
    ) {
        for body in self.bodies.values_mut() {
            body.advance_velocities(gravity, step_duration);
        }
    }

    /// Advances the position and orientation of all dynamic rigid bodies.
    pub fn advance_dynamic_rigid_body_configurations(&mut self, step_duration: fph) {
        for body in self.bodies.values_mut() {
            body.advance_configuration(step_duration);
        }
    }

    /// Removes all stored rigid bodies.
    pub fn clear(&mut self) {
        self.bodies.clear();
    }

    fn create_new_rigid_body_id(&mut self) -> RigidBodyID {
        let id = RigidBodyID::from_u64(self.body_id_counter);
        self.body_id_counter = self.body_id_counter.checked_add(1).unwrap();
        id
    }
}

impl Default for RigidBodyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RigidBody {
    /// Creates a new body of the given kind at rest with the given pose. A
    /// dynamic body gets unit mass and moment of inertia until shapes are
    /// attached to it.
    pub fn new(kind: RigidBodyKind, pose: Pose) -> Self {
        Self {
            kind,
            inertial_properties: InertialProperties::new(1.0, 1.0),
            position: pose.position,
            angle: pose.angle,
            velocity: Velocity::zeros(),
            angular_velocity: 0.0,
            total_force: Force::zeros(),
            total_torque: 0.0,
        }
    }

    /// Creates a new dynamic body at rest with the given pose.
    pub fn new_dynamic(pose: Pose) -> Self {
        Self::new(RigidBodyKind::Dynamic, pose)
    }

    /// Creates a new static body with the given pose.
    pub fn new_static(pose: Pose) -> Self {
        Self::new(RigidBodyKind::Static, pose)
    }

    pub fn kind(&self) -> RigidBodyKind {
        self.kind
    }

    pub fn is_static(&self) -> bool {
        self.kind == RigidBodyKind::Static
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == RigidBodyKind::Dynamic
    }

    /// Returns the center of mass of the body's shapes in the body's
    /// reference frame.
    pub fn center_of_mass(&self) -> Position {
        self.inertial_properties.center_of_mass()
    }

    /// Returns the mass of the body. This is infinite for static bodies.
    pub fn mass(&self) -> fph {
        if self.is_static() {
            fph::INFINITY
        } else {
            self.inertial_properties.mass()
        }
    }

    /// Returns the moment of inertia of the body about its center of mass.
    /// This is infinite for static bodies.
    pub fn moment_of_inertia(&self) -> fph {
        if self.is_static() {
            fph::INFINITY
        } else {
            self.inertial_properties.moment_of_inertia()
        }
    }

    /// Returns the inverse of the body's mass, which is zero for static
    /// bodies and for massless dynamic bodies.
    pub fn inverse_mass(&self) -> fph {
        inverse_or_zero(self.mass())
    }

    /// Returns the inverse of the body's moment of inertia, which is zero for
    /// static bodies and for dynamic bodies without rotational inertia.
    pub fn inverse_moment_of_inertia(&self) -> fph {
        inverse_or_zero(self.moment_of_inertia())
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn angle(&self) -> Orientation {
        self.angle
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.angle)
    }

    pub fn velocity(&self) -> &Velocity {
        &self.velocity
    }

    pub fn angular_velocity(&self) -> AngularVelocity {
        self.angular_velocity
    }

    /// Returns the current total force on the body.
    pub fn total_force(&self) -> &Force {
        &self.total_force
    }

    /// Returns the current total torque on the body around the center of mass.
    pub fn total_torque(&self) -> Torque {
        self.total_torque
    }

    /// Computes the kinetic energy of the body's linear and rotational motion.
    pub fn compute_kinetic_energy(&self) -> fph {
        if self.is_static() {
            return 0.0;
        }
        0.5 * self.inertial_properties.mass() * self.velocity.norm_squared()
            + 0.5 * self.inertial_properties.moment_of_inertia() * self.angular_velocity.powi(2)
    }

    /// Transforms a point from the body-fixed frame to world space.
    pub fn transform_point_from_body_to_world_space(&self, point: &Position) -> Position {
        self.pose().transform_point(point)
    }

    /// Transforms a point from world space to the body-fixed frame.
    pub fn transform_point_from_world_to_body_space(&self, point: &Position) -> Position {
        self.pose().inverse_transform_point(point)
    }

    /// Computes the velocity of the given world space point on the body due to
    /// the body's linear and rotational motion.
    pub fn compute_velocity_of_attached_world_space_point(&self, point: &Position) -> Velocity {
        compute_point_velocity(
            &self.velocity,
            self.angular_velocity,
            &(point - self.position),
        )
    }

    /// Applies the given force at the body's center of mass.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn apply_force_at_center_of_mass(&mut self, force: &Force) -> Result<()> {
        self.ensure_mutable_motion("apply force to")?;
        self.total_force += force;
        Ok(())
    }

    /// Applies the given torque around the body's center of mass.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn apply_torque(&mut self, torque: Torque) -> Result<()> {
        self.ensure_mutable_motion("apply torque to")?;
        self.total_torque += torque;
        Ok(())
    }

    /// Applies the given force at the given world space position. This may
    /// result in a torque around the center of mass.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn apply_force(&mut self, force: &Force, force_position: &Position) -> Result<()> {
        self.ensure_mutable_motion("apply force to")?;
        self.total_force += force;
        self.total_torque += cross(&(force_position - self.position), force);
        Ok(())
    }

    /// Sets the given velocity for the body.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn set_velocity(&mut self, velocity: Velocity) -> Result<()> {
        self.ensure_mutable_motion("set velocity of")?;
        self.velocity = velocity;
        Ok(())
    }

    /// Sets the given angular velocity for the body.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn set_angular_velocity(&mut self, angular_velocity: AngularVelocity) -> Result<()> {
        self.ensure_mutable_motion("set angular velocity of")?;
        self.angular_velocity = angular_velocity;
        Ok(())
    }

    /// Moves the body to the given pose.
    ///
    /// # Errors
    /// Returns an error if the body is static.
    pub fn set_pose(&mut self, pose: Pose) -> Result<()> {
        self.ensure_mutable_motion("move")?;
        self.position = pose.position;
        self.angle = pose.angle;
        Ok(())
    }

    /// Resets the total applied force and torque to zero.
    pub fn reset_force_and_torque(&mut self) {
        self.total_force = Force::zeros();
        self.total_torque = 0.0;
    }

    pub(crate) fn set_inertial_properties(&mut self, inertial_properties: InertialProperties) {
        self.inertial_properties = inertial_properties;
    }

    /// Changes the angular velocity according to the given angular impulse.
    /// Static bodies are unaffected.
    pub(crate) fn apply_angular_impulse(&mut self, angular_impulse: fph) {
        self.angular_velocity += self.inverse_moment_of_inertia() * angular_impulse;
    }

    /// Overwrites the configuration and motion of a dynamic body with the
    /// result of constraint solving.
    pub(crate) fn synchronize_with_constrained_state(
        &mut self,
        position: Position,
        angle: Orientation,
        velocity: Velocity,
        angular_velocity: AngularVelocity,
    ) {
        if self.is_static() {
            return;
        }
        self.position = position;
        self.angle = angle;
        self.velocity = velocity;
        self.angular_velocity = angular_velocity;
    }

    fn advance_velocities(&mut self, gravity: &Acceleration, step_duration: fph) {
        if self.is_static() {
            return;
        }
        self.velocity += (gravity + self.total_force * self.inverse_mass()) * step_duration;
        self.angular_velocity += self.total_torque * self.inverse_moment_of_inertia() * step_duration;
    }

    fn advance_configuration(&mut self, step_duration: fph) {
        if self.is_static() {
            return;
        }
        self.position += self.velocity * step_duration;
        self.angle += self.angular_velocity * step_duration;
    }

    fn ensure_mutable_motion(&self, operation: &str) -> Result<()> {
        if self.is_static() {
            bail!("Cannot {} a static body", operation);
        }
        Ok(())
    }
}

impl AbsDiffEq for RigidBody {
    type Epsilon = <fph as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        fph::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.kind == other.kind
            && InertialProperties::abs_diff_eq(
                &self.inertial_properties,
                &other.inertial_properties,
                epsilon,
            )
            && Position::abs_diff_eq(&self.position, &other.position, epsilon)
            && fph::abs_diff_eq(&self.angle, &other.angle, epsilon)
            && Velocity::abs_diff_eq(&self.velocity, &other.velocity, epsilon)
            && fph::abs_diff_eq(&self.angular_velocity, &other.angular_velocity, epsilon)
            && Force::abs_diff_eq(&self.total_force, &other.total_force, epsilon)
            && fph::abs_diff_eq(&self.total_torque, &other.total_torque, epsilon)
    }
}

fn inverse_or_zero(value: fph) -> fph {
    if value.is_finite() && value > 0.0 {
        value.recip()
    } else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use proptest::prelude::*;

    prop_compose! {
        fn force_strategy(max_component: fph)(
            x in -max_component..max_component,
            y in -max_component..max_component,
        ) -> Force {
            vector![x, y]
        }
    }

    fn dynamic_body_with_mass(mass: fph, moment_of_inertia: fph) -> RigidBody {
        let mut body = RigidBody::new_dynamic(Pose::unrotated(point![1.0, 2.0]));
        body.set_inertial_properties(InertialProperties::new(mass, moment_of_inertia));
        body
    }

    #[test]
    fn creating_bodies_gives_distinct_ids() {
        let mut manager = RigidBodyManager::new();
        let id_1 = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let id_2 = manager.add_rigid_body(RigidBody::new_static(Pose::default()));
        assert_ne!(id_1, id_2);
        assert_eq!(manager.n_bodies(), 2);
        assert!(manager.rigid_body(id_2).is_static());
    }

    #[test]
    fn removed_body_is_gone_and_ids_are_not_reused() {
        let mut manager = RigidBodyManager::new();
        let id_1 = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        assert!(manager.remove_rigid_body(id_1).is_some());
        assert!(manager.get_rigid_body(id_1).is_none());
        let id_2 = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        assert_ne!(id_1, id_2);
    }

    #[test]
    fn static_bodies_have_zero_inverse_mass() {
        let body = RigidBody::new_static(Pose::default());
        assert_eq!(body.inverse_mass(), 0.0);
        assert_eq!(body.inverse_moment_of_inertia(), 0.0);
    }

    #[test]
    fn static_bodies_reject_motion_mutations() {
        let mut body = RigidBody::new_static(Pose::default());
        assert!(body.apply_force_at_center_of_mass(&vector![1.0, 0.0]).is_err());
        assert!(body.apply_torque(1.0).is_err());
        assert!(body.set_velocity(vector![1.0, 0.0]).is_err());
        assert!(body.set_angular_velocity(1.0).is_err());
        assert!(body.set_pose(Pose::unrotated(point![1.0, 1.0])).is_err());
        assert_abs_diff_eq!(body, RigidBody::new_static(Pose::default()));
    }

    #[test]
    fn advancing_static_body_does_nothing() {
        let mut manager = RigidBodyManager::new();
        let id = manager.add_rigid_body(RigidBody::new_static(Pose::unrotated(point![3.0, 4.0])));
        manager.advance_dynamic_rigid_body_velocities(&vector![0.0, 100.0], 0.1);
        manager.advance_dynamic_rigid_body_configurations(0.1);
        assert_eq!(manager.rigid_body(id).position(), &point![3.0, 4.0]);
        assert_eq!(manager.rigid_body(id).velocity(), &Velocity::zeros());
    }

    #[test]
    fn dynamic_body_falls_under_gravity() {
        let mut body = dynamic_body_with_mass(2.0, 1.0);
        body.advance_velocities(&vector![0.0, 100.0], 0.5);
        body.advance_configuration(0.5);
        assert_abs_diff_eq!(body.velocity(), &vector![0.0, 50.0]);
        assert_abs_diff_eq!(body.position(), &point![1.0, 27.0]);
    }

    #[test]
    fn off_center_force_gives_torque() {
        let mut body = dynamic_body_with_mass(1.0, 1.0);
        body.apply_force(&vector![0.0, 2.0], &point![2.0, 2.0]).unwrap();
        assert_abs_diff_eq!(body.total_torque(), 2.0);
        body.reset_force_and_torque();
        assert_abs_diff_eq!(body.total_force(), &Force::zeros());
        assert_abs_diff_eq!(body.total_torque(), 0.0);
    }

    #[test]
    fn velocity_of_attached_point_includes_rotation() {
        let mut body = dynamic_body_with_mass(1.0, 1.0);
        body.set_velocity(vector![1.0, 0.0]).unwrap();
        body.set_angular_velocity(1.0).unwrap();
        assert_abs_diff_eq!(
            body.compute_velocity_of_attached_world_space_point(&point![2.0, 2.0]),
            vector![1.0, 1.0]
        );
    }

    proptest! {
        #[test]
        fn applied_forces_accumulate(
            force_1 in force_strategy(1e3),
            force_2 in force_strategy(1e3),
        ) {
            let mut body = dynamic_body_with_mass(3.0, 1.0);
            body.apply_force_at_center_of_mass(&force_1).unwrap();
            body.apply_force_at_center_of_mass(&force_2).unwrap();
            prop_assert!(body.total_force().abs_diff_eq(&(force_1 + force_2), 1e-9));
        }

        #[test]
        fn velocity_change_is_force_over_mass(
            force in force_strategy(1e3),
            mass in 0.1..100.0,
        ) {
            let mut body = dynamic_body_with_mass(mass, 1.0);
            body.apply_force_at_center_of_mass(&force).unwrap();
            body.advance_velocities(&Acceleration::zeros(), 1.0);
            prop_assert!(body.velocity().abs_diff_eq(&(force / mass), 1e-9));
        }
    }
}
