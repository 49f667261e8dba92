//! Groove joints.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint, apply_impulse_pair,
    compute_effective_mass, compute_point_effective_mass_matrix, ensure_finite_points,
    pivot::PreparedPointConstraint,
};
use crate::{
    fph,
    geometry::GEOMETRIC_EPSILON,
    quantities::{Position, perpendicular},
};
use anyhow::{Result, bail};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// A joint that lets an anchor point on body B slide along a line segment
/// (the groove) fixed on body A.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrooveJoint {
    /// Start of the groove, in A's reference frame.
    pub groove_a: Position,
    /// End of the groove, in A's reference frame.
    pub groove_b: Position,
    /// The anchor point on body B, in B's reference frame.
    pub anchor_b: Position,
}

#[derive(Clone, Debug)]
pub struct PreparedGrooveJoint {
    groove_a: Position,
    groove_b: Position,
    anchor_b: Position,
    location: GrooveLocation,
    normal: Vector2<fph>,
    tangent: Vector2<fph>,
    disp_a: Vector2<fph>,
    disp_b: Vector2<fph>,
    normal_effective_mass: fph,
    point_effective_mass: Matrix2<fph>,
}

/// Where the anchor is along the groove.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GrooveLocation {
    Start,
    Inside,
    End,
}

impl GrooveJoint {
    pub fn new(groove_a: Position, groove_b: Position, anchor_b: Position) -> Self {
        Self {
            groove_a,
            groove_b,
            anchor_b,
        }
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite_points(
            "groove",
            &[
                ("groove start", &self.groove_a),
                ("groove end", &self.groove_b),
                ("anchor B", &self.anchor_b),
            ],
        )?;
        if (self.groove_b - self.groove_a).norm() <= GEOMETRIC_EPSILON {
            bail!("Groove joint has a groove of zero length");
        }
        Ok(())
    }
}

impl TwoBodyConstraint for GrooveJoint {
    type Prepared = PreparedGrooveJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        _step_duration: fph,
    ) -> Self::Prepared {
        let (target, location, tangent) =
            find_target_on_groove(body_a, body_b, &self.groove_a, &self.groove_b, &self.anchor_b);
        let normal = perpendicular(&tangent);

        let disp_a = target - body_a.position;
        let disp_b = body_b.world_offset_of_local_point(&self.anchor_b);

        PreparedGrooveJoint {
            groove_a: self.groove_a,
            groove_b: self.groove_b,
            anchor_b: self.anchor_b,
            location,
            normal,
            tangent,
            disp_a,
            disp_b,
            normal_effective_mass: compute_effective_mass(
                body_a, body_b, &disp_a, &disp_b, &normal,
            ),
            point_effective_mass: compute_point_effective_mass_matrix(
                body_a, body_b, &disp_a, &disp_b,
            ),
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedGrooveJoint {
    type Impulses = Vector2<fph>;

    fn can_use_warm_impulses_from(&self, other: &Self) -> bool {
        self.location == other.location
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> Vector2<fph> {
        let relative_velocity =
            body_b.point_velocity(&self.disp_b) - body_a.point_velocity(&self.disp_a);

        match self.location {
            GrooveLocation::Inside => {
                (-self.normal_effective_mass * self.normal.dot(&relative_velocity)) * self.normal
            }
            GrooveLocation::Start | GrooveLocation::End => {
                -(self.point_effective_mass * relative_velocity)
            }
        }
    }

    fn clamp_impulses(&self, impulses: Vector2<fph>) -> Vector2<fph> {
        let normal_impulse = self.normal.dot(&impulses);
        let tangent_impulse = self.tangent.dot(&impulses);

        // The anchor may only be pushed back into the groove at its ends
        let tangent_impulse = match self.location {
            GrooveLocation::Inside => 0.0,
            GrooveLocation::Start => fph::max(tangent_impulse, 0.0),
            GrooveLocation::End => fph::min(tangent_impulse, 0.0),
        };

        normal_impulse * self.normal + tangent_impulse * self.tangent
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: Vector2<fph>,
    ) {
        apply_impulse_pair(body_a, body_b, &self.disp_a, &self.disp_b, &impulses);
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        let (target, _, _) =
            find_target_on_groove(body_a, body_b, &self.groove_a, &self.groove_b, &self.anchor_b);
        let target_on_a = body_a.transform_point_from_world_to_body_frame(&target);

        PreparedPointConstraint::new(body_a, body_b, target_on_a, self.anchor_b)
            .apply_positional_correction(body_a, body_b, correction_factor);
    }
}

/// Finds the point on the groove closest to the anchor on body B, in world
/// space, along with where on the groove it lies and the unit direction of
/// the groove.
fn find_target_on_groove(
    body_a: &ConstrainedBody,
    body_b: &ConstrainedBody,
    groove_a: &Position,
    groove_b: &Position,
    anchor_b: &Position,
) -> (Position, GrooveLocation, Vector2<fph>) {
    let start = body_a.transform_point_from_body_to_world_frame(groove_a);
    let end = body_a.transform_point_from_body_to_world_frame(groove_b);
    let anchor = body_b.transform_point_from_body_to_world_frame(anchor_b);

    let groove = end - start;
    let length = groove.norm();
    let tangent = groove / length;

    let projection = tangent.dot(&(anchor - start));

    let (location, clamped_projection) = if projection <= 0.0 {
        (GrooveLocation::Start, 0.0)
    } else if projection >= length {
        (GrooveLocation::End, length)
    } else {
        (GrooveLocation::Inside, projection)
    };

    (start + clamped_projection * tangent, location, tangent)
}
