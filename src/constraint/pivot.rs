//! Pivot joints.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint, apply_impulse_pair,
    apply_pseudo_impulse_pair, compute_point_effective_mass_matrix, ensure_finite_points,
};
use crate::{fph, quantities::Position};
use anyhow::Result;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// A joint that makes an anchor point on body A coincide with an anchor
/// point on body B while leaving the bodies free to rotate about it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PivotJoint {
    /// The anchor point on body A, in A's reference frame.
    pub anchor_a: Position,
    /// The anchor point on body B, in B's reference frame.
    pub anchor_b: Position,
}

#[derive(Clone, Debug)]
pub struct PreparedPivotJoint {
    pub(super) point: PreparedPointConstraint,
}

/// Shared state for constraints keeping two anchor points together.
#[derive(Clone, Debug)]
pub struct PreparedPointConstraint {
    anchor_a: Position,
    anchor_b: Position,
    disp_a: Vector2<fph>,
    disp_b: Vector2<fph>,
    effective_mass: Matrix2<fph>,
}

impl PivotJoint {
    pub fn new(anchor_a: Position, anchor_b: Position) -> Self {
        Self { anchor_a, anchor_b }
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite_points(
            "pivot",
            &[("anchor A", &self.anchor_a), ("anchor B", &self.anchor_b)],
        )
    }
}

impl TwoBodyConstraint for PivotJoint {
    type Prepared = PreparedPivotJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        _step_duration: fph,
    ) -> Self::Prepared {
        PreparedPivotJoint {
            point: PreparedPointConstraint::new(body_a, body_b, self.anchor_a, self.anchor_b),
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedPivotJoint {
    type Impulses = Vector2<fph>;

    fn can_use_warm_impulses_from(&self, _other: &Self) -> bool {
        true
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> Vector2<fph> {
        self.point.compute_impulse(body_a, body_b)
    }

    fn clamp_impulses(&self, impulses: Vector2<fph>) -> Vector2<fph> {
        impulses
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: Vector2<fph>,
    ) {
        self.point.apply_impulse(body_a, body_b, &impulses);
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        self.point
            .apply_positional_correction(body_a, body_b, correction_factor);
    }
}

impl PreparedPointConstraint {
    pub(super) fn new(
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        anchor_a: Position,
        anchor_b: Position,
    ) -> Self {
        let disp_a = body_a.world_offset_of_local_point(&anchor_a);
        let disp_b = body_b.world_offset_of_local_point(&anchor_b);
        let effective_mass = compute_point_effective_mass_matrix(body_a, body_b, &disp_a, &disp_b);
        Self {
            anchor_a,
            anchor_b,
            disp_a,
            disp_b,
            effective_mass,
        }
    }

    /// Computes the impulse on body B (with the negation going to A) that
    /// brings the relative velocity of the anchors to zero.
    pub(super) fn compute_impulse(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
    ) -> Vector2<fph> {
        let relative_velocity =
            body_b.point_velocity(&self.disp_b) - body_a.point_velocity(&self.disp_a);
        -(self.effective_mass * relative_velocity)
    }

    pub(super) fn apply_impulse(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulse: &Vector2<fph>,
    ) {
        apply_impulse_pair(body_a, body_b, &self.disp_a, &self.disp_b, impulse);
    }

    /// Moves the bodies so that anchor B approaches the given target point on
    /// body A (in A's frame) by the given fraction of the current separation.
    pub(super) fn apply_positional_correction_towards(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        target_on_a: &Position,
        correction_factor: fph,
    ) {
        let disp_a = body_a.world_offset_of_local_point(target_on_a);
        let disp_b = body_b.world_offset_of_local_point(&self.anchor_b);

        let separation = (body_b.position + disp_b) - (body_a.position + disp_a);

        let effective_mass = compute_point_effective_mass_matrix(body_a, body_b, &disp_a, &disp_b);
        let pseudo_impulse = -(effective_mass * (correction_factor * separation));

        apply_pseudo_impulse_pair(body_a, body_b, &disp_a, &disp_b, &pseudo_impulse);
    }

    pub(super) fn apply_positional_correction(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        self.apply_positional_correction_towards(
            body_a,
            body_b,
            &self.anchor_a,
            correction_factor,
        );
    }

    #[cfg(test)]
    fn disp_a(&self) -> &Vector2<fph> {
        &self.disp_a
    }

    #[cfg(test)]
    fn disp_b(&self) -> &Vector2<fph> {
        &self.disp_b
    }
}
