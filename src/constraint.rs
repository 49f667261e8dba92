//! Constraints on rigid bodies.

pub mod contact;
pub mod damped_rotary_spring;
pub mod gear;
pub mod groove;
pub mod motor;
pub mod pin;
pub mod pivot;
pub mod rotary_limit;
pub mod slide;
pub mod solver;

use crate::{
    collision::CollisionWorld,
    fph,
    quantities::{
        AngularVelocity, Orientation, Pose, Position, Velocity, compute_point_velocity, cross,
    },
    rigid_body::{RigidBody, RigidBodyID, RigidBodyManager},
};
use anyhow::{Result, anyhow, bail};
use damped_rotary_spring::DampedRotarySpring;
use gear::{GearJoint, PreparedGearJoint};
use groove::{GrooveJoint, PreparedGrooveJoint};
use linkbox_utils::{DenseMap, define_id_newtype};
use motor::{PreparedSimpleMotor, SimpleMotor};
use nalgebra::{Matrix2, Vector2};
use num_traits::Zero;
use pin::{PinJoint, PreparedPinJoint};
use pivot::{PivotJoint, PreparedPivotJoint};
use rotary_limit::{PreparedRotaryLimitJoint, RotaryLimitJoint};
use serde::{Deserialize, Serialize};
use slide::{PreparedSlideJoint, SlideJoint};
use solver::{ConstraintSolver, ConstraintSolverConfig};
use std::{
    collections::HashSet,
    fmt,
    ops::{Add, Mul, Sub},
};

define_id_newtype! {
    /// Identifier for a [`Joint`] in a [`ConstraintManager`].
    [pub] JointID
}

/// Manages all joints in the simulation and the solver resolving them
/// together with contacts.
#[derive(Debug, Clone)]
pub struct ConstraintManager {
    solver: ConstraintSolver,
    joints: DenseMap<JointID, Joint>,
    joint_id_counter: u64,
}

/// A joint connecting two rigid bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    pub body_a: RigidBodyID,
    pub body_b: RigidBodyID,
    pub kind: JointKind,
    /// Whether the shapes of the two bodies may collide with each other.
    pub collide_bodies: bool,
}

/// The different kinds of joints along with their parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JointKind {
    Pin(PinJoint),
    Pivot(PivotJoint),
    Slide(SlideJoint),
    Groove(GrooveJoint),
    RotaryLimit(RotaryLimitJoint),
    DampedRotarySpring(DampedRotarySpring),
    SimpleMotor(SimpleMotor),
    Gear(GearJoint),
}

/// Represents a constraint involving two rigid bodies.
trait TwoBodyConstraint {
    type Prepared: PreparedTwoBodyConstraint;

    /// Creates an instantiation of the constraint that has been prepared for
    /// constraint solving in the current substep.
    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Self::Prepared;
}

/// Represents a [`TwoBodyConstraint`] that has been prepared for constraint
/// solving in the current substep.
trait PreparedTwoBodyConstraint {
    type Impulses: fmt::Debug
        + Copy
        + Zero
        + Add<Output = Self::Impulses>
        + Sub<Output = Self::Impulses>
        + Mul<fph, Output = Self::Impulses>;

    /// Whether the accumulated [`Self::Impulses`] from the other constraint can
    /// be used to kick start the solution of this constraint. It should be
    /// assumed that the given constraint involves the same entities as this
    /// constraint.
    fn can_use_warm_impulses_from(&self, other: &Self) -> bool;

    /// Computes the corrective impulses that should be applied to the bodies
    /// in order to satisfy the velocity constraint. This method should not
    /// perform clamping.
    fn compute_impulses(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
    ) -> Self::Impulses;

    /// Clamps the given impulses to satisfy the inequality velocity
    /// constraints.
    fn clamp_impulses(&self, impulses: Self::Impulses) -> Self::Impulses;

    /// Applies the given impulses to the velocities of the two bodies.
    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: Self::Impulses,
    );

    /// Computes and applies pseudo impulses to the position and orientation
    /// of the bodies to satisfy the position constraint.
    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    );
}

/// The relevant properties and state of a rigid body required for constraint
/// solving. The state is updated iteratively as constraints are being solved.
#[derive(Clone, Debug)]
struct ConstrainedBody {
    /// Inverse of the body's mass.
    pub inverse_mass: fph,
    /// Inverse of the body's moment of inertia.
    pub inverse_moment_of_inertia: fph,
    /// Position of the body's center of mass (in world space).
    pub position: Position,
    /// Orientation angle of the body's reference frame.
    pub angle: Orientation,
    /// Linear velocity of the body's center of mass (in world space).
    pub velocity: Velocity,
    /// Angular velocity of the body about its center of mass.
    pub angular_velocity: AngularVelocity,
}

/// A joint that has been prepared for constraint solving. All variants share
/// the [`JointImpulses`] representation of accumulated impulses.
#[derive(Clone, Debug)]
enum PreparedJoint {
    Pin(PreparedPinJoint),
    Pivot(PreparedPivotJoint),
    Slide(PreparedSlideJoint),
    Groove(PreparedGrooveJoint),
    RotaryLimit(PreparedRotaryLimitJoint),
    SimpleMotor(PreparedSimpleMotor),
    Gear(PreparedGearJoint),
}

/// Accumulated impulses for a joint. Joints with a single degree of freedom
/// only use the first component.
#[derive(Clone, Copy, Debug, PartialEq)]
struct JointImpulses(Vector2<fph>);

impl ConstraintManager {
    /// Creates a new constraint manager with the given configuration for the
    /// [`ConstraintSolver`].
    pub fn new(solver_config: ConstraintSolverConfig) -> Self {
        Self {
            solver: ConstraintSolver::new(solver_config),
            joints: DenseMap::new(),
            joint_id_counter: 0,
        }
    }

    pub fn solver(&self) -> &ConstraintSolver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut ConstraintSolver {
        &mut self.solver
    }

    /// The number of registered joints.
    pub fn n_joints(&self) -> usize {
        self.joints.len()
    }

    /// Registers the given joint and returns a new ID that can be used to
    /// refer to it. The joint is checked against the bodies in the given
    /// [`RigidBodyManager`].
    ///
    /// # Errors
    /// Returns an error if the joint references a missing body, connects a
    /// body to itself, connects two static bodies or has invalid parameters.
    pub fn add_joint(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        joint: Joint,
    ) -> Result<JointID> {
        joint.validate(rigid_body_manager)?;
        let id = self.create_new_joint_id();
        self.joints.push(id, joint);
        Ok(id)
    }

    /// Returns a reference to the [`Joint`] with the given ID, or [`None`] if
    /// it does not exist.
    pub fn get_joint(&self, id: JointID) -> Option<&Joint> {
        self.joints.get(id)
    }

    /// Returns a mutable reference to the [`Joint`] with the given ID, or
    /// [`None`] if it does not exist.
    pub fn get_joint_mut(&mut self, id: JointID) -> Option<&mut Joint> {
        self.joints.get_mut(id)
    }

    /// Returns a reference to the [`Joint`] with the given ID.
    ///
    /// # Panics
    /// If no joint with the given ID exists.
    pub fn joint(&self, id: JointID) -> &Joint {
        self.get_joint(id).expect("Requested missing joint")
    }

    /// Returns an iterator over all joints and their IDs in creation order
    /// (apart from reordering caused by removals).
    pub fn joints(&self) -> impl Iterator<Item = (JointID, &Joint)> {
        self.joints.iter()
    }

    /// Returns a mutable reference to the [`SlideJoint`] with the given ID.
    ///
    /// # Errors
    /// Returns an error if the joint does not exist or is not a slide joint.
    pub fn slide_joint_mut(&mut self, id: JointID) -> Result<&mut SlideJoint> {
        let joint = self
            .joints
            .get_mut(id)
            .ok_or_else(|| anyhow!("No joint with ID {}", id))?;
        match &mut joint.kind {
            JointKind::Slide(slide) => Ok(slide),
            other => bail!("Joint {} is a {} joint, not a slide joint", id, other.name()),
        }
    }

    /// Removes the joint with the given ID.
    ///
    /// # Returns
    /// The removed joint, or [`None`] if it did not exist.
    pub fn remove_joint(&mut self, id: JointID) -> Option<Joint> {
        self.joints.swap_remove(id)
    }

    /// Removes all joints involving the given body.
    ///
    /// # Returns
    /// The IDs of the removed joints.
    pub fn remove_joints_involving_body(&mut self, body_id: RigidBodyID) -> Vec<JointID> {
        let mut removed = Vec::new();
        self.joints.retain(|id, joint| {
            let involved = joint.involves_body(body_id);
            if involved {
                removed.push(id);
            }
            !involved
        });
        removed
    }

    /// Gathers the pairs of bodies whose shapes should not collide because a
    /// joint between them has `collide_bodies` disabled. Each pair is ordered
    /// with the smallest ID first.
    pub fn collision_exclusions(&self) -> HashSet<(RigidBodyID, RigidBodyID)> {
        self.joints
            .values()
            .iter()
            .filter(|joint| !joint.collide_bodies)
            .map(|joint| ordered_body_pair(joint.body_a, joint.body_b))
            .collect()
    }

    /// Applies the torques of all damped rotary springs to the angular
    /// velocities of their bodies over the given duration.
    pub fn apply_spring_torques(&self, rigid_body_manager: &mut RigidBodyManager, step_duration: fph) {
        for (id, joint) in self.joints.iter() {
            let JointKind::DampedRotarySpring(spring) = &joint.kind else {
                continue;
            };
            let Some((body_a, body_b)) =
                rigid_body_manager.get_two_rigid_bodies_mut(joint.body_a, joint.body_b)
            else {
                log::warn!("Skipping spring {} with missing body", id);
                continue;
            };
            spring.apply_to_body_pair(body_a, body_b, step_duration);
        }
    }

    /// Prepares for solving the constraints for the current substep by
    /// gathering all relevant rigid body state and precomputing relevant
    /// constraint quantities. Should be called before advancing rigid body
    /// velocities and configurations for the substep.
    pub fn prepare_constraints(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        collision_world: &CollisionWorld,
        step_duration: fph,
    ) {
        if !self.solver.config().enabled {
            self.solver.clear();
            return;
        }

        // The cached states of the bodies from the previous substep are stale
        // and must be removed
        self.solver.clear_prepared_bodies();

        let exclusions = self.collision_exclusions();

        collision_world.for_each_collision(
            |body_a, body_b| exclusions.contains(&ordered_body_pair(body_a, body_b)),
            &mut |collision| {
                for contact in collision.contact_manifold.contacts() {
                    self.solver.prepare_contact(
                        rigid_body_manager,
                        collision.body_a,
                        collision.body_b,
                        contact,
                        step_duration,
                    );
                }
            },
        );

        for (id, joint) in self.joints.iter() {
            self.solver
                .prepare_joint(rigid_body_manager, id, joint, step_duration);
        }

        // Any constraints left over from the previous substep that were not
        // prepared again must be removed
        self.solver.remove_unprepared_constraints();
    }

    /// Executes constraint solving. As opposed to
    /// [`Self::prepare_constraints`], this method should be called after
    /// advancing all rigid body velocities (but not configurations) based on
    /// the non-constraint forces. The prepared constrained bodies will be
    /// updated with the advanced velocities before constraint solving. After
    /// computing the resolved velocities and configurations, these will then be
    /// applied to the rigid bodies.
    pub fn compute_and_apply_constrained_state(
        &mut self,
        rigid_body_manager: &mut RigidBodyManager,
    ) {
        if !self.solver.config().enabled {
            return;
        }
        self.solver
            .synchronize_prepared_constrained_body_velocities(rigid_body_manager);
        self.solver.compute_constrained_velocities();
        self.solver.compute_corrected_configurations();
        self.solver
            .apply_constrained_velocities_and_corrected_configurations(rigid_body_manager);
    }

    /// Removes all joints and stored constraint state.
    pub fn clear(&mut self) {
        self.solver.clear();
        self.joints.clear();
    }

    fn create_new_joint_id(&mut self) -> JointID {
        let id = JointID::from_u64(self.joint_id_counter);
        self.joint_id_counter = self.joint_id_counter.checked_add(1).unwrap();
        id
    }
}

impl Joint {
    /// Creates a joint of the given kind between the two bodies. The shapes
    /// of the bodies may collide with each other.
    pub fn new(body_a: RigidBodyID, body_b: RigidBodyID, kind: impl Into<JointKind>) -> Self {
        Self {
            body_a,
            body_b,
            kind: kind.into(),
            collide_bodies: true,
        }
    }

    /// Sets whether the shapes of the two bodies may collide.
    pub fn with_collide_bodies(mut self, collide_bodies: bool) -> Self {
        self.collide_bodies = collide_bodies;
        self
    }

    /// Whether the given body is one of the two bodies of the joint.
    pub fn involves_body(&self, body_id: RigidBodyID) -> bool {
        self.body_a == body_id || self.body_b == body_id
    }

    /// Returns the slide joint parameters if this is a slide joint.
    pub fn as_slide(&self) -> Option<&SlideJoint> {
        match &self.kind {
            JointKind::Slide(slide) => Some(slide),
            _ => None,
        }
    }

    /// Returns the local anchor points on body A and B, for joint kinds that
    /// have them.
    pub fn anchors(&self) -> Option<(Position, Position)> {
        match &self.kind {
            JointKind::Pin(joint) => Some((joint.anchor_a, joint.anchor_b)),
            JointKind::Pivot(joint) => Some((joint.anchor_a, joint.anchor_b)),
            JointKind::Slide(joint) => Some((joint.anchor_a, joint.anchor_b)),
            JointKind::Groove(joint) => Some((joint.groove_a, joint.anchor_b)),
            JointKind::RotaryLimit(_)
            | JointKind::DampedRotarySpring(_)
            | JointKind::SimpleMotor(_)
            | JointKind::Gear(_) => None,
        }
    }

    fn validate(&self, rigid_body_manager: &RigidBodyManager) -> Result<()> {
        if self.body_a == self.body_b {
            bail!("Joint connects body {} to itself", self.body_a);
        }
        let body_a = rigid_body_manager
            .get_rigid_body(self.body_a)
            .ok_or_else(|| anyhow!("Joint references missing body {}", self.body_a))?;
        let body_b = rigid_body_manager
            .get_rigid_body(self.body_b)
            .ok_or_else(|| anyhow!("Joint references missing body {}", self.body_b))?;
        if body_a.is_static() && body_b.is_static() {
            bail!(
                "Joint connects two static bodies ({} and {})",
                self.body_a,
                self.body_b
            );
        }
        self.kind.validate()
    }
}

impl JointKind {
    /// A short lowercase name for the kind of joint.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pin(_) => "pin",
            Self::Pivot(_) => "pivot",
            Self::Slide(_) => "slide",
            Self::Groove(_) => "groove",
            Self::RotaryLimit(_) => "rotary limit",
            Self::DampedRotarySpring(_) => "damped rotary spring",
            Self::SimpleMotor(_) => "simple motor",
            Self::Gear(_) => "gear",
        }
    }

    /// # Errors
    /// Returns an error if any of the joint parameters are invalid.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Pin(joint) => joint.validate(),
            Self::Pivot(joint) => joint.validate(),
            Self::Slide(joint) => joint.validate(),
            Self::Groove(joint) => joint.validate(),
            Self::RotaryLimit(joint) => joint.validate(),
            Self::DampedRotarySpring(joint) => joint.validate(),
            Self::SimpleMotor(joint) => joint.validate(),
            Self::Gear(joint) => joint.validate(),
        }
    }

    /// Prepares the joint for solving. Springs act through torques rather
    /// than through the solver and give [`None`].
    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Option<PreparedJoint> {
        Some(match self {
            Self::Pin(joint) => PreparedJoint::Pin(joint.prepare(body_a, body_b, step_duration)),
            Self::Pivot(joint) => {
                PreparedJoint::Pivot(joint.prepare(body_a, body_b, step_duration))
            }
            Self::Slide(joint) => {
                PreparedJoint::Slide(joint.prepare(body_a, body_b, step_duration))
            }
            Self::Groove(joint) => {
                PreparedJoint::Groove(joint.prepare(body_a, body_b, step_duration))
            }
            Self::RotaryLimit(joint) => {
                PreparedJoint::RotaryLimit(joint.prepare(body_a, body_b, step_duration))
            }
            Self::SimpleMotor(joint) => {
                PreparedJoint::SimpleMotor(joint.prepare(body_a, body_b, step_duration))
            }
            Self::Gear(joint) => PreparedJoint::Gear(joint.prepare(body_a, body_b, step_duration)),
            Self::DampedRotarySpring(_) => return None,
        })
    }
}

macro_rules! impl_from_for_joint_kind {
    ($($variant:ident => $joint:ty),* $(,)?) => {
        $(
            impl From<$joint> for JointKind {
                fn from(joint: $joint) -> Self {
                    Self::$variant(joint)
                }
            }
        )*
    };
}

impl_from_for_joint_kind!(
    Pin => PinJoint,
    Pivot => PivotJoint,
    Slide => SlideJoint,
    Groove => GrooveJoint,
    RotaryLimit => RotaryLimitJoint,
    DampedRotarySpring => DampedRotarySpring,
    SimpleMotor => SimpleMotor,
    Gear => GearJoint,
);

/// Calls the given method on the prepared joint variant, converting between
/// the variant's impulse type and [`JointImpulses`] where needed.
macro_rules! dispatch_prepared_joint {
    ($prepared:expr, $joint:ident => $call:expr) => {
        match $prepared {
            PreparedJoint::Pin($joint) => $call,
            PreparedJoint::Pivot($joint) => $call,
            PreparedJoint::Slide($joint) => $call,
            PreparedJoint::Groove($joint) => $call,
            PreparedJoint::RotaryLimit($joint) => $call,
            PreparedJoint::SimpleMotor($joint) => $call,
            PreparedJoint::Gear($joint) => $call,
        }
    };
}

impl PreparedTwoBodyConstraint for PreparedJoint {
    type Impulses = JointImpulses;

    fn can_use_warm_impulses_from(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pin(joint), Self::Pin(other)) => joint.can_use_warm_impulses_from(other),
            (Self::Pivot(joint), Self::Pivot(other)) => joint.can_use_warm_impulses_from(other),
            (Self::Slide(joint), Self::Slide(other)) => joint.can_use_warm_impulses_from(other),
            (Self::Groove(joint), Self::Groove(other)) => joint.can_use_warm_impulses_from(other),
            (Self::RotaryLimit(joint), Self::RotaryLimit(other)) => {
                joint.can_use_warm_impulses_from(other)
            }
            (Self::SimpleMotor(joint), Self::SimpleMotor(other)) => {
                joint.can_use_warm_impulses_from(other)
            }
            (Self::Gear(joint), Self::Gear(other)) => joint.can_use_warm_impulses_from(other),
            _ => false,
        }
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> JointImpulses {
        dispatch_prepared_joint!(self, joint => joint.compute_impulses(body_a, body_b).into())
    }

    fn clamp_impulses(&self, impulses: JointImpulses) -> JointImpulses {
        dispatch_prepared_joint!(self, joint => joint.clamp_impulses(impulses.into()).into())
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: JointImpulses,
    ) {
        dispatch_prepared_joint!(
            self,
            joint => joint.apply_impulses_to_body_pair(body_a, body_b, impulses.into())
        );
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        dispatch_prepared_joint!(
            self,
            joint => joint.apply_positional_correction_to_body_pair(
                body_a,
                body_b,
                correction_factor,
            )
        );
    }
}

impl From<fph> for JointImpulses {
    fn from(impulse: fph) -> Self {
        Self(Vector2::new(impulse, 0.0))
    }
}

impl From<Vector2<fph>> for JointImpulses {
    fn from(impulses: Vector2<fph>) -> Self {
        Self(impulses)
    }
}

impl From<JointImpulses> for fph {
    fn from(impulses: JointImpulses) -> Self {
        impulses.0.x
    }
}

impl From<JointImpulses> for Vector2<fph> {
    fn from(impulses: JointImpulses) -> Self {
        impulses.0
    }
}

impl Zero for JointImpulses {
    fn zero() -> Self {
        Self(Vector2::zeros())
    }

    fn is_zero(&self) -> bool {
        self.0 == Vector2::zeros()
    }
}

impl Add for JointImpulses {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for JointImpulses {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<fph> for JointImpulses {
    type Output = Self;

    fn mul(self, rhs: fph) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl ConstrainedBody {
    fn from_rigid_body(body: &RigidBody) -> Self {
        Self {
            inverse_mass: body.inverse_mass(),
            inverse_moment_of_inertia: body.inverse_moment_of_inertia(),
            position: *body.position(),
            angle: body.angle(),
            velocity: *body.velocity(),
            angular_velocity: body.angular_velocity(),
        }
    }

    fn pose(&self) -> Pose {
        Pose::new(self.position, self.angle)
    }

    /// Returns the world space offset from the body's center of mass to the
    /// given point fixed in the body frame.
    fn world_offset_of_local_point(&self, point: &Position) -> Vector2<fph> {
        self.pose().transform_vector(&point.coords)
    }

    /// Transforms the given point from the body frame to world space.
    fn transform_point_from_body_to_world_frame(&self, point: &Position) -> Position {
        self.pose().transform_point(point)
    }

    /// Transforms the given point from world space to the body frame.
    fn transform_point_from_world_to_body_frame(&self, point: &Position) -> Position {
        self.pose().inverse_transform_point(point)
    }

    /// Computes the world space velocity of the point at the given world space
    /// offset from the center of mass.
    fn point_velocity(&self, offset: &Vector2<fph>) -> Velocity {
        compute_point_velocity(&self.velocity, self.angular_velocity, offset)
    }

    /// Applies the given impulse at the given offset from the center of mass.
    fn apply_impulse(&mut self, impulse: &Vector2<fph>, offset: &Vector2<fph>) {
        self.velocity += self.inverse_mass * impulse;
        self.angular_velocity += self.inverse_moment_of_inertia * cross(offset, impulse);
    }

    /// Applies the given pseudo impulse at the given offset from the center of
    /// mass directly to the position and orientation.
    fn apply_pseudo_impulse(&mut self, pseudo_impulse: &Vector2<fph>, offset: &Vector2<fph>) {
        self.position += self.inverse_mass * pseudo_impulse;
        self.angle += self.inverse_moment_of_inertia * cross(offset, pseudo_impulse);
    }

    fn apply_angular_impulse(&mut self, angular_impulse: fph) {
        self.angular_velocity += self.inverse_moment_of_inertia * angular_impulse;
    }

    fn apply_angular_pseudo_impulse(&mut self, angular_pseudo_impulse: fph) {
        self.angle += self.inverse_moment_of_inertia * angular_pseudo_impulse;
    }
}

/// Computes the effective mass for an impulse along the given direction
/// applied with opposite signs at the given offsets on body A and B.
fn compute_effective_mass(
    body_a: &ConstrainedBody,
    body_b: &ConstrainedBody,
    disp_a: &Vector2<fph>,
    disp_b: &Vector2<fph>,
    direction: &Vector2<fph>,
) -> fph {
    let disp_a_cross_dir = cross(disp_a, direction);
    let disp_b_cross_dir = cross(disp_b, direction);

    inverse_or_zero(
        body_a.inverse_mass
            + body_b.inverse_mass
            + body_a.inverse_moment_of_inertia * disp_a_cross_dir.powi(2)
            + body_b.inverse_moment_of_inertia * disp_b_cross_dir.powi(2),
    )
}

/// Computes the effective mass for an angular impulse applied with opposite
/// signs to body A and B, with the impulse on A scaled by `ratio_a`.
fn compute_angular_effective_mass(
    body_a: &ConstrainedBody,
    body_b: &ConstrainedBody,
    ratio_a: fph,
) -> fph {
    inverse_or_zero(
        ratio_a.powi(2) * body_a.inverse_moment_of_inertia + body_b.inverse_moment_of_inertia,
    )
}

/// Computes the 2x2 effective mass matrix for a point-to-point impulse
/// applied with opposite signs at the given offsets on body A and B. A
/// singular system gives the zero matrix.
fn compute_point_effective_mass_matrix(
    body_a: &ConstrainedBody,
    body_b: &ConstrainedBody,
    disp_a: &Vector2<fph>,
    disp_b: &Vector2<fph>,
) -> Matrix2<fph> {
    let inverse_masses = body_a.inverse_mass + body_b.inverse_mass;
    let ia = body_a.inverse_moment_of_inertia;
    let ib = body_b.inverse_moment_of_inertia;

    let k11 = inverse_masses + ia * disp_a.y.powi(2) + ib * disp_b.y.powi(2);
    let k12 = -ia * disp_a.x * disp_a.y - ib * disp_b.x * disp_b.y;
    let k22 = inverse_masses + ia * disp_a.x.powi(2) + ib * disp_b.x.powi(2);

    Matrix2::new(k11, k12, k12, k22)
        .try_inverse()
        .unwrap_or_else(Matrix2::zeros)
}

/// Applies the given impulse to body B and its negation to body A at the
/// given offsets.
fn apply_impulse_pair(
    body_a: &mut ConstrainedBody,
    body_b: &mut ConstrainedBody,
    disp_a: &Vector2<fph>,
    disp_b: &Vector2<fph>,
    impulse: &Vector2<fph>,
) {
    body_a.apply_impulse(&(-impulse), disp_a);
    body_b.apply_impulse(impulse, disp_b);
}

/// Applies the given pseudo impulse to body B and its negation to body A at
/// the given offsets.
fn apply_pseudo_impulse_pair(
    body_a: &mut ConstrainedBody,
    body_b: &mut ConstrainedBody,
    disp_a: &Vector2<fph>,
    disp_b: &Vector2<fph>,
    pseudo_impulse: &Vector2<fph>,
) {
    body_a.apply_pseudo_impulse(&(-pseudo_impulse), disp_a);
    body_b.apply_pseudo_impulse(pseudo_impulse, disp_b);
}

fn ordered_body_pair(body_a: RigidBodyID, body_b: RigidBodyID) -> (RigidBodyID, RigidBodyID) {
    if body_a <= body_b {
        (body_a, body_b)
    } else {
        (body_b, body_a)
    }
}

fn inverse_or_zero(value: fph) -> fph {
    if value > 0.0 { value.recip() } else { 0.0 }
}

/// Checks that the given values are all finite.
fn ensure_finite(joint_name: &str, values: &[(&str, fph)]) -> Result<()> {
    for (name, value) in values {
        if !value.is_finite() {
            bail!("Non-finite {} for {} joint: {}", name, joint_name, value);
        }
    }
    Ok(())
}

/// Checks that the given points are all finite.
fn ensure_finite_points(joint_name: &str, points: &[(&str, &Position)]) -> Result<()> {
    for (name, point) in points {
        if !point.coords.iter().all(|coord| coord.is_finite()) {
            bail!("Non-finite {} for {} joint: {:?}", name, joint_name, point);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{quantities::Pose, rigid_body::RigidBody};
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    fn constrained_body(position: Position, inverse_mass: fph) -> ConstrainedBody {
        ConstrainedBody {
            inverse_mass,
            inverse_moment_of_inertia: inverse_mass,
            position,
            angle: 0.0,
            velocity: Velocity::zeros(),
            angular_velocity: 0.0,
        }
    }

    #[test]
    fn point_effective_mass_matrix_inverts_response() {
        let body_a = constrained_body(point![0.0, 0.0], 1.0);
        let body_b = constrained_body(point![2.0, 1.0], 0.5);
        let disp_a = vector![1.0, 0.5];
        let disp_b = vector![-1.0, -0.5];

        let mass_matrix = compute_point_effective_mass_matrix(&body_a, &body_b, &disp_a, &disp_b);

        // Applying the impulse that cancels a relative velocity should give
        // zero relative velocity at the anchor
        let mut a = body_a.clone();
        let mut b = body_b.clone();
        b.velocity = vector![1.0, -2.0];
        let relative_velocity = b.point_velocity(&disp_b) - a.point_velocity(&disp_a);
        let impulse = -(mass_matrix * relative_velocity);
        apply_impulse_pair(&mut a, &mut b, &disp_a, &disp_b, &impulse);

        let new_relative_velocity = b.point_velocity(&disp_b) - a.point_velocity(&disp_a);
        assert_abs_diff_eq!(new_relative_velocity, Vector2::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn effective_mass_between_static_bodies_is_zero() {
        let body_a = constrained_body(point![0.0, 0.0], 0.0);
        let body_b = constrained_body(point![1.0, 0.0], 0.0);
        assert_eq!(
            compute_effective_mass(&body_a, &body_b, &Vector2::x(), &Vector2::y(), &Vector2::x()),
            0.0
        );
        assert_eq!(
            compute_point_effective_mass_matrix(&body_a, &body_b, &Vector2::x(), &Vector2::y()),
            Matrix2::zeros()
        );
    }

    #[test]
    fn joint_validation_rejects_bad_body_references() {
        let mut manager = RigidBodyManager::new();
        let dynamic = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let static_1 = manager.add_rigid_body(RigidBody::new_static(Pose::default()));
        let static_2 = manager.add_rigid_body(RigidBody::new_static(Pose::default()));
        let missing = RigidBodyID::from_u64(1000);

        let kind = JointKind::from(PivotJoint::new(Position::origin(), Position::origin()));
        let mut constraints = ConstraintManager::new(ConstraintSolverConfig::default());

        assert!(
            constraints
                .add_joint(&manager, Joint::new(dynamic, dynamic, kind.clone()))
                .is_err()
        );
        assert!(
            constraints
                .add_joint(&manager, Joint::new(static_1, static_2, kind.clone()))
                .is_err()
        );
        assert!(
            constraints
                .add_joint(&manager, Joint::new(dynamic, missing, kind.clone()))
                .is_err()
        );
        assert!(
            constraints
                .add_joint(&manager, Joint::new(static_1, dynamic, kind))
                .is_ok()
        );
        assert_eq!(constraints.n_joints(), 1);
    }

    #[test]
    fn removing_body_joints_leaves_others() {
        let mut manager = RigidBodyManager::new();
        let a = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let b = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let c = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let mut constraints = ConstraintManager::new(ConstraintSolverConfig::default());

        let kind = JointKind::from(GearJoint::new(0.0, 1.0));
        let ab = constraints
            .add_joint(&manager, Joint::new(a, b, kind.clone()))
            .unwrap();
        let bc = constraints
            .add_joint(&manager, Joint::new(b, c, kind.clone()))
            .unwrap();
        let ca = constraints
            .add_joint(&manager, Joint::new(c, a, kind))
            .unwrap();

        let removed = constraints.remove_joints_involving_body(a);
        assert_eq!(removed, vec![ab, ca]);
        assert!(constraints.get_joint(bc).is_some());
        assert_eq!(constraints.n_joints(), 1);
    }

    #[test]
    fn collision_exclusions_only_include_non_colliding_joints() {
        let mut manager = RigidBodyManager::new();
        let a = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let b = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let c = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let mut constraints = ConstraintManager::new(ConstraintSolverConfig::default());

        let kind = JointKind::from(GearJoint::new(0.0, 1.0));
        constraints
            .add_joint(
                &manager,
                Joint::new(b, a, kind.clone()).with_collide_bodies(false),
            )
            .unwrap();
        constraints
            .add_joint(&manager, Joint::new(b, c, kind))
            .unwrap();

        let exclusions = constraints.collision_exclusions();
        assert_eq!(exclusions.len(), 1);
        assert!(exclusions.contains(&(a, b)));
    }

    #[test]
    fn slide_joint_lookup_rejects_other_kinds() {
        let mut manager = RigidBodyManager::new();
        let a = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let b = manager.add_rigid_body(RigidBody::new_dynamic(Pose::default()));
        let mut constraints = ConstraintManager::new(ConstraintSolverConfig::default());

        let gear = constraints
            .add_joint(&manager, Joint::new(a, b, GearJoint::new(0.0, 1.0)))
            .unwrap();
        let slide = constraints
            .add_joint(
                &manager,
                Joint::new(
                    a,
                    b,
                    SlideJoint::new(Position::origin(), Position::origin(), 0.0, 10.0),
                ),
            )
            .unwrap();

        assert!(constraints.slide_joint_mut(gear).is_err());
        assert!(constraints.slide_joint_mut(slide).is_ok());
        assert!(constraints.slide_joint_mut(JointID::from_u64(99)).is_err());
    }
}
