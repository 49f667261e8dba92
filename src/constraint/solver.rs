//! Constraint solving based on the sequential impulse method.

use super::{
    ConstrainedBody, Joint, JointID, PreparedJoint, PreparedTwoBodyConstraint, TwoBodyConstraint,
    contact::{ContactID, ContactWithID, PreparedContact},
};
use crate::{
    fph,
    rigid_body::{RigidBodyID, RigidBodyManager},
};
use anyhow::{Result, bail};
use bitflags::bitflags;
use linkbox_utils::DenseMap;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::Hash,
    ops::{Deref, DerefMut},
};

/// A Sequential Impulse constraint solver.
#[derive(Clone, Debug)]
pub struct ConstraintSolver {
    bodies: DenseMap<RigidBodyID, ConstrainedBody>,
    contacts: ConstraintCache<ContactID, PreparedContact>,
    joints: ConstraintCache<JointID, PreparedJoint>,
    config: ConstraintSolverConfig,
}

/// Configuration parameters for the [`ConstraintSolver`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSolverConfig {
    /// Whether constraints will be solved.
    pub enabled: bool,
    /// The number of sequential impulse iterations to perform for solving the
    /// velocity constraints.
    pub n_iterations: u32,
    /// How to scale the still-valid accumulated impulses from the previous
    /// substep before using them as the initial impulses for the current
    /// substep. Set to zero to disable warm starting.
    pub old_impulse_weight: fph,
    /// The number of iterations to use for positional correction after the
    /// velocity constraints have been solved.
    pub n_positional_correction_iterations: u32,
    /// The fraction of the current positional error the solver should try to
    /// correct.
    pub positional_correction_factor: fph,
}

/// Container for constraints of a specific type that manages their lifetime
/// over multiple substeps.
#[derive(Clone, Debug)]
struct ConstraintCache<K, C: PreparedTwoBodyConstraint> {
    constraints: DenseMap<K, BodyPairConstraint<C>>,
}

/// Wrapper for an arbitrary two-body constraint that manages general
/// information like the indices of the involved [`ConstrainedBody`]s in the
/// [`ConstraintSolver`] and the current accumulated impulses.
#[derive(Clone, Debug)]
struct BodyPairConstraint<C: PreparedTwoBodyConstraint> {
    body_a_idx: usize,
    body_b_idx: usize,
    constraint: C,
    accumulated_impulses: C::Impulses,
    flags: ConstraintFlags,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
    struct ConstraintFlags: u8 {
        /// Whether this constraint was prepared for use in the current substep.
        const WAS_PREPARED = 1 << 0;
    }
}

impl ConstraintSolver {
    /// Creates a new constraint solver with the given configuration
    /// parameters.
    pub fn new(config: ConstraintSolverConfig) -> Self {
        Self {
            bodies: DenseMap::new(),
            contacts: ConstraintCache::new(),
            joints: ConstraintCache::new(),
            config,
        }
    }

    pub fn prepared_contact_count(&self) -> usize {
        self.contacts.constraints().len()
    }

    pub fn prepared_joint_count(&self) -> usize {
        self.joints.constraints().len()
    }

    pub fn prepared_body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn config(&self) -> &ConstraintSolverConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConstraintSolverConfig {
        &mut self.config
    }

    /// Prepares the given contact between the given bodies for solution. The
    /// states of the involved rigid bodies will be fetched and cached.
    pub fn prepare_contact(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        rigid_body_a_id: RigidBodyID,
        rigid_body_b_id: RigidBodyID,
        contact: &ContactWithID,
        step_duration: fph,
    ) {
        if let Some(prepared_contact) = self.prepare_constraint_for_body_pair(
            rigid_body_manager,
            rigid_body_a_id,
            rigid_body_b_id,
            &contact.contact,
            step_duration,
        ) {
            self.contacts.register_prepared_constraint(
                contact.id,
                prepared_contact,
                self.config.old_impulse_weight,
            );
        }
    }

    /// Prepares the given joint for solution. The states of the involved
    /// rigid bodies will be fetched and cached. Joints acting through forces
    /// rather than constraints are ignored.
    pub fn prepare_joint(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        id: JointID,
        joint: &Joint,
        step_duration: fph,
    ) {
        let Some((body_a_idx, body_b_idx)) =
            self.prepare_body_pair(rigid_body_manager, joint.body_a, joint.body_b)
        else {
            log::warn!("Skipping joint {} with missing or static bodies", id);
            return;
        };

        let bodies = self.bodies.values();
        let Some(prepared_joint) =
            joint
                .kind
                .prepare(&bodies[body_a_idx], &bodies[body_b_idx], step_duration)
        else {
            return;
        };

        self.joints.register_prepared_constraint(
            id,
            BodyPairConstraint::new(body_a_idx, body_b_idx, prepared_joint),
            self.config.old_impulse_weight,
        );
    }

    /// Removes any constraints cached from the previous solve that have not
    /// been re-prepared for the next solve. This should always be called
    /// before [`Self::compute_constrained_velocities`] after preparing all
    /// active constraints.
    pub fn remove_unprepared_constraints(&mut self) {
        self.contacts
            .remove_unprepared_constraints_and_reset_flags();
        self.joints.remove_unprepared_constraints_and_reset_flags();
    }

    /// Updates the velocities of all prepared constrained bodies to match those
    /// of their associated rigid body in the [`RigidBodyManager`]. This should
    /// be called after advancing the rigid body velocities (but not
    /// configurations) based on the non-constraint forces.
    pub fn synchronize_prepared_constrained_body_velocities(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
    ) {
        for (rigid_body_id, constrained_body) in self.bodies.iter_mut() {
            let Some(rigid_body) = rigid_body_manager.get_rigid_body(rigid_body_id) else {
                continue;
            };
            constrained_body.velocity = *rigid_body.velocity();
            constrained_body.angular_velocity = rigid_body.angular_velocity();
        }
    }

    /// Tries to solve all prepared velocity constraints as follows:
    /// - Go though each constraint.
    /// - Compute the impulses that must be applied to the involved bodies for
    ///   their velocities to satisfy that constraint in isolation.
    /// - Update the velocities of the involved bodies with these impulses.
    /// - After doing this for each constraint, go back and repeat for a fixed
    ///   number of iterations and hope that the final velocities of all bodies
    ///   satisfy all the constraints.
    ///
    /// To speed up convergence, the final impulses of surviving constraints
    /// from the previous solve are applied to the involved bodies before
    /// starting the above procedure.
    pub fn compute_constrained_velocities(&mut self) {
        let bodies = self.bodies.values_mut();

        apply_warm_impulses_for_body_pair_constraints(bodies, self.contacts.constraints());
        apply_warm_impulses_for_body_pair_constraints(bodies, self.joints.constraints());

        for _ in 0..self.config.n_iterations {
            apply_impulses_sequentially_for_body_pair_constraints(
                bodies,
                self.contacts.constraints_mut(),
            );
            apply_impulses_sequentially_for_body_pair_constraints(
                bodies,
                self.joints.constraints_mut(),
            );
        }
    }

    /// Tries to correct the configurations of the bodies for all prepared
    /// constraints by repeatedly applying pseudo impulses (changes in position
    /// and orientation) for each constraint in isolation.
    pub fn compute_corrected_configurations(&mut self) {
        let bodies = self.bodies.values_mut();

        for _ in 0..self.config.n_positional_correction_iterations {
            apply_positional_corrections_sequentially_for_body_pair_constraints(
                bodies,
                self.contacts.constraints(),
                self.config.positional_correction_factor,
            );
            apply_positional_corrections_sequentially_for_body_pair_constraints(
                bodies,
                self.joints.constraints(),
                self.config.positional_correction_factor,
            );
        }
    }

    /// Updates the velocities and configurations of the rigid bodies to match
    /// the solved velocities and configurations from
    /// [`Self::compute_constrained_velocities`] and
    /// [`Self::compute_corrected_configurations`].
    pub fn apply_constrained_velocities_and_corrected_configurations(
        &self,
        rigid_body_manager: &mut RigidBodyManager,
    ) {
        for (rigid_body_id, constrained_body) in self.bodies.iter() {
            let Some(rigid_body) = rigid_body_manager.get_rigid_body_mut(rigid_body_id) else {
                continue;
            };
            rigid_body.synchronize_with_constrained_state(
                constrained_body.position,
                constrained_body.angle,
                constrained_body.velocity,
                constrained_body.angular_velocity,
            );
        }
    }

    /// Clears all constrained bodies cached from the previous solve. This
    /// should always be done before starting to prepare constraints for the
    /// next solve.
    pub fn clear_prepared_bodies(&mut self) {
        self.bodies.clear();
    }

    /// Removes all stored constraint solver state.
    pub fn clear(&mut self) {
        self.clear_prepared_bodies();
        self.contacts.clear();
        self.joints.clear();
    }

    fn prepare_constraint_for_body_pair<C: TwoBodyConstraint>(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        rigid_body_a_id: RigidBodyID,
        rigid_body_b_id: RigidBodyID,
        constraint: &C,
        step_duration: fph,
    ) -> Option<BodyPairConstraint<C::Prepared>> {
        let (body_a_idx, body_b_idx) =
            self.prepare_body_pair(rigid_body_manager, rigid_body_a_id, rigid_body_b_id)?;

        let bodies = self.bodies.values();
        let prepared_constraint =
            constraint.prepare(&bodies[body_a_idx], &bodies[body_b_idx], step_duration);

        Some(BodyPairConstraint::new(
            body_a_idx,
            body_b_idx,
            prepared_constraint,
        ))
    }

    /// Caches the state of both bodies unless one of them is missing or both
    /// are static, in which case there is nothing to solve.
    fn prepare_body_pair(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        rigid_body_a_id: RigidBodyID,
        rigid_body_b_id: RigidBodyID,
    ) -> Option<(usize, usize)> {
        let body_a = rigid_body_manager.get_rigid_body(rigid_body_a_id)?;
        let body_b = rigid_body_manager.get_rigid_body(rigid_body_b_id)?;
        if rigid_body_a_id == rigid_body_b_id || (body_a.is_static() && body_b.is_static()) {
            return None;
        }
        let body_a_idx = self.prepare_body(rigid_body_manager, rigid_body_a_id)?;
        let body_b_idx = self.prepare_body(rigid_body_manager, rigid_body_b_id)?;
        Some((body_a_idx, body_b_idx))
    }

    fn prepare_body(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        rigid_body_id: RigidBodyID,
    ) -> Option<usize> {
        if let Some(body_idx) = self.bodies.idx(rigid_body_id) {
            return Some(body_idx);
        }

        let rigid_body = rigid_body_manager.get_rigid_body(rigid_body_id)?;

        let body_idx = self.bodies.len();
        self.bodies
            .push(rigid_body_id, ConstrainedBody::from_rigid_body(rigid_body));

        Some(body_idx)
    }
}

impl ConstraintSolverConfig {
    /// # Errors
    /// Returns an error if any of the parameters are out of range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.old_impulse_weight) {
            bail!(
                "Old impulse weight must be between 0 and 1, got {}",
                self.old_impulse_weight
            );
        }
        if !(0.0..=1.0).contains(&self.positional_correction_factor) {
            bail!(
                "Positional correction factor must be between 0 and 1, got {}",
                self.positional_correction_factor
            );
        }
        Ok(())
    }
}

impl Default for ConstraintSolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_iterations: 10,
            old_impulse_weight: 0.4,
            n_positional_correction_iterations: 3,
            positional_correction_factor: 0.2,
        }
    }
}

impl<K, C> ConstraintCache<K, C>
where
    K: fmt::Debug + Copy + Eq + Hash,
    C: PreparedTwoBodyConstraint,
{
    fn new() -> Self {
        Self {
            constraints: DenseMap::new(),
        }
    }

    fn constraints(&self) -> &[BodyPairConstraint<C>] {
        self.constraints.values()
    }

    fn constraints_mut(&mut self) -> &mut [BodyPairConstraint<C>] {
        self.constraints.values_mut()
    }

    fn register_prepared_constraint(
        &mut self,
        key: K,
        prepared_constraint: BodyPairConstraint<C>,
        old_impulse_weight: fph,
    ) {
        let Some(old_constraint) = self.constraints.get_mut(key) else {
            self.constraints.push(key, prepared_constraint);
            return;
        };

        // If the geometry has not changed significantly, the impulses
        // obtained from the previous solve are likely still close to the
        // solution, so we initialize the constraint with the old impulses as
        // an initial guess, but with a weight to mitigate overshoot
        let warm_impulses = if prepared_constraint
            .can_use_warm_impulses_from(&old_constraint.constraint)
        {
            old_constraint.accumulated_impulses * old_impulse_weight
        } else {
            Zero::zero()
        };

        *old_constraint = prepared_constraint.with_accumulated_impulses(warm_impulses);
    }

    fn remove_unprepared_constraints_and_reset_flags(&mut self) {
        self.constraints
            .retain(|_, constraint| constraint.flags.contains(ConstraintFlags::WAS_PREPARED));

        for constraint in self.constraints.values_mut() {
            constraint.flags.remove(ConstraintFlags::WAS_PREPARED);
        }
    }

    fn clear(&mut self) {
        self.constraints.clear();
    }
}

impl<C: PreparedTwoBodyConstraint> BodyPairConstraint<C> {
    fn new(body_a_idx: usize, body_b_idx: usize, constraint: C) -> Self {
        Self {
            body_a_idx,
            body_b_idx,
            constraint,
            accumulated_impulses: Zero::zero(),
            flags: ConstraintFlags::WAS_PREPARED,
        }
    }

    fn with_accumulated_impulses(mut self, accumulated_impulses: C::Impulses) -> Self {
        self.accumulated_impulses = accumulated_impulses;
        self
    }
}

impl<C: PreparedTwoBodyConstraint> Deref for BodyPairConstraint<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.constraint
    }
}

impl<C: PreparedTwoBodyConstraint> DerefMut for BodyPairConstraint<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.constraint
    }
}

fn apply_warm_impulses_for_body_pair_constraints<P: PreparedTwoBodyConstraint>(
    bodies: &mut [ConstrainedBody],
    constraints: &[BodyPairConstraint<P>],
) {
    for constraint in constraints {
        let (body_a, body_b) =
            two_mutable_elements(bodies, constraint.body_a_idx, constraint.body_b_idx);

        // The warm impulses from the previous solve are used as the initial
        // guess for this solve, so they must be pre-applied to the bodies
        // before we begin
        constraint.apply_impulses_to_body_pair(body_a, body_b, constraint.accumulated_impulses);
    }
}

fn apply_impulses_sequentially_for_body_pair_constraints<P: PreparedTwoBodyConstraint>(
    bodies: &mut [ConstrainedBody],
    constraints: &mut [BodyPairConstraint<P>],
) {
    for constraint in constraints {
        let (body_a, body_b) =
            two_mutable_elements(bodies, constraint.body_a_idx, constraint.body_b_idx);

        // Incremental impulses making the current velocities satisfy the
        // constraint as an equality constraint
        let corrective_impulses = constraint.compute_impulses(body_a, body_b);

        // The accumulated impulses are what gets clamped, so that impulses
        // from earlier iterations can be partially undone
        let old_accumulated_impulses = constraint.accumulated_impulses;
        constraint.accumulated_impulses =
            constraint.clamp_impulses(old_accumulated_impulses + corrective_impulses);

        let clamped_corrective_impulses =
            constraint.accumulated_impulses - old_accumulated_impulses;

        constraint.apply_impulses_to_body_pair(body_a, body_b, clamped_corrective_impulses);
    }
}

fn apply_positional_corrections_sequentially_for_body_pair_constraints<
    P: PreparedTwoBodyConstraint,
>(
    bodies: &mut [ConstrainedBody],
    constraints: &[BodyPairConstraint<P>],
    correction_factor: fph,
) {
    for constraint in constraints {
        let (body_a, body_b) =
            two_mutable_elements(bodies, constraint.body_a_idx, constraint.body_b_idx);

        constraint.apply_positional_correction_to_body_pair(body_a, body_b, correction_factor);
    }
}

fn two_mutable_elements<T>(values: &mut [T], idx_a: usize, idx_b: usize) -> (&mut T, &mut T) {
    assert_ne!(idx_a, idx_b);

    if idx_b > idx_a {
        let (left, right) = values.split_at_mut(idx_b);
        (&mut left[idx_a], &mut right[0])
    } else {
        let (left, right) = values.split_at_mut(idx_a);
        (&mut right[0], &mut left[idx_b])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn two_mutable_elements_returns_requested_order() {
        let mut values = [0, 1, 2, 3];
        let (a, b) = two_mutable_elements(&mut values, 3, 1);
        assert_eq!((*a, *b), (3, 1));
        let (a, b) = two_mutable_elements(&mut values, 0, 2);
        assert_eq!((*a, *b), (0, 2));
    }

    #[test]
    #[should_panic]
    fn two_mutable_elements_panics_for_same_index() {
        let mut values = [0, 1];
        two_mutable_elements(&mut values, 1, 1);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ConstraintSolverConfig::default().validate().is_ok());
        let config = ConstraintSolverConfig {
            positional_correction_factor: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
