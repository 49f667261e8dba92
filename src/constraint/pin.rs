//! Pin joints and the distance constraints shared with slide joints.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint, apply_impulse_pair,
    apply_pseudo_impulse_pair, compute_effective_mass, ensure_finite, ensure_finite_points,
    pivot::PreparedPointConstraint,
};
use crate::{
    fph,
    geometry::GEOMETRIC_EPSILON,
    quantities::{Pose, Position},
};
use anyhow::{Result, bail};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// A joint that keeps an anchor point on body A at a fixed distance from an
/// anchor point on body B, like a massless rod between them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinJoint {
    /// The anchor point on body A, in A's reference frame.
    pub anchor_a: Position,
    /// The anchor point on body B, in B's reference frame.
    pub anchor_b: Position,
    /// The distance to maintain between the anchors.
    pub distance: fph,
}

/// A pin or slide joint that has been prepared for constraint solving. A
/// joint whose anchors are held together acts as a point constraint, while
/// other joints act along the line between the anchors.
#[derive(Clone, Debug)]
pub enum PreparedDistanceJoint {
    Point(PreparedPointConstraint),
    Distance(PreparedDistanceConstraint),
}

/// Prepared constraint on the distance between two anchor points.
#[derive(Clone, Debug)]
pub struct PreparedDistanceConstraint {
    anchor_a: Position,
    anchor_b: Position,
    limit: DistanceLimit,
    direction: Vector2<fph>,
    disp_a: Vector2<fph>,
    disp_b: Vector2<fph>,
    effective_mass: fph,
    target_rate: fph,
}

/// How the distance between the anchors is constrained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum DistanceLimit {
    Exactly(fph),
    AtMost(fph),
    AtLeast(fph),
}

pub type PreparedPinJoint = PreparedDistanceJoint;

impl PinJoint {
    pub fn new(anchor_a: Position, anchor_b: Position, distance: fph) -> Self {
        Self {
            anchor_a,
            anchor_b,
            distance,
        }
    }

    /// Creates a pin joint that keeps the anchors at the distance they have
    /// when the bodies have the given poses.
    pub fn measured(anchor_a: Position, anchor_b: Position, pose_a: &Pose, pose_b: &Pose) -> Self {
        let distance = nalgebra::distance(
            &pose_a.transform_point(&anchor_a),
            &pose_b.transform_point(&anchor_b),
        );
        Self::new(anchor_a, anchor_b, distance)
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite_points(
            "pin",
            &[("anchor A", &self.anchor_a), ("anchor B", &self.anchor_b)],
        )?;
        ensure_finite("pin", &[("distance", self.distance)])?;
        if self.distance < 0.0 {
            bail!("Negative distance for pin joint: {}", self.distance);
        }
        Ok(())
    }
}

impl TwoBodyConstraint for PinJoint {
    type Prepared = PreparedPinJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Self::Prepared {
        if self.distance <= GEOMETRIC_EPSILON {
            PreparedDistanceJoint::Point(PreparedPointConstraint::new(
                body_a,
                body_b,
                self.anchor_a,
                self.anchor_b,
            ))
        } else {
            PreparedDistanceJoint::Distance(PreparedDistanceConstraint::new(
                body_a,
                body_b,
                self.anchor_a,
                self.anchor_b,
                DistanceLimit::Exactly(self.distance),
                step_duration,
            ))
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedDistanceJoint {
    type Impulses = Vector2<fph>;

    fn can_use_warm_impulses_from(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Point(_), Self::Point(_)) => true,
            (Self::Distance(constraint), Self::Distance(other)) => {
                constraint.can_use_warm_impulse_from(other)
            }
            _ => false,
        }
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> Vector2<fph> {
        match self {
            Self::Point(constraint) => constraint.compute_impulse(body_a, body_b),
            Self::Distance(constraint) => {
                Vector2::new(constraint.compute_impulse(body_a, body_b), 0.0)
            }
        }
    }

    fn clamp_impulses(&self, impulses: Vector2<fph>) -> Vector2<fph> {
        match self {
            Self::Point(_) => impulses,
            Self::Distance(constraint) => Vector2::new(constraint.clamp_impulse(impulses.x), 0.0),
        }
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: Vector2<fph>,
    ) {
        match self {
            Self::Point(constraint) => constraint.apply_impulse(body_a, body_b, &impulses),
            Self::Distance(constraint) => constraint.apply_impulse(body_a, body_b, impulses.x),
        }
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        match self {
            Self::Point(constraint) => {
                constraint.apply_positional_correction(body_a, body_b, correction_factor);
            }
            Self::Distance(constraint) => {
                constraint.apply_positional_correction(body_a, body_b, correction_factor);
            }
        }
    }
}

impl PreparedDistanceConstraint {
    pub(super) fn new(
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        anchor_a: Position,
        anchor_b: Position,
        limit: DistanceLimit,
        step_duration: fph,
    ) -> Self {
        let disp_a = body_a.world_offset_of_local_point(&anchor_a);
        let disp_b = body_b.world_offset_of_local_point(&anchor_b);

        let (direction, distance) =
            direction_and_distance(&(body_b.position + disp_b - (body_a.position + disp_a)));

        let effective_mass = compute_effective_mass(body_a, body_b, &disp_a, &disp_b, &direction);

        // Inequality limits only act once the anchors would cross the limit
        // within the step
        let target_rate = match limit {
            DistanceLimit::Exactly(_) => 0.0,
            DistanceLimit::AtMost(max) => fph::max(max - distance, 0.0) / step_duration,
            DistanceLimit::AtLeast(min) => -fph::max(distance - min, 0.0) / step_duration,
        };

        Self {
            anchor_a,
            anchor_b,
            limit,
            direction,
            disp_a,
            disp_b,
            effective_mass,
            target_rate,
        }
    }

    fn can_use_warm_impulse_from(&self, other: &Self) -> bool {
        std::mem::discriminant(&self.limit) == std::mem::discriminant(&other.limit)
    }

    fn compute_impulse(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> fph {
        let relative_velocity =
            body_b.point_velocity(&self.disp_b) - body_a.point_velocity(&self.disp_a);
        -self.effective_mass * (self.direction.dot(&relative_velocity) - self.target_rate)
    }

    fn clamp_impulse(&self, impulse: fph) -> fph {
        match self.limit {
            DistanceLimit::Exactly(_) => impulse,
            DistanceLimit::AtMost(_) => fph::min(impulse, 0.0),
            DistanceLimit::AtLeast(_) => fph::max(impulse, 0.0),
        }
    }

    fn apply_impulse(&self, body_a: &mut ConstrainedBody, body_b: &mut ConstrainedBody, impulse: fph) {
        apply_impulse_pair(
            body_a,
            body_b,
            &self.disp_a,
            &self.disp_b,
            &(impulse * self.direction),
        );
    }

    fn apply_positional_correction(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        let disp_a = body_a.world_offset_of_local_point(&self.anchor_a);
        let disp_b = body_b.world_offset_of_local_point(&self.anchor_b);

        let (direction, distance) =
            direction_and_distance(&(body_b.position + disp_b - (body_a.position + disp_a)));

        let violation = match self.limit {
            DistanceLimit::Exactly(target) => distance - target,
            DistanceLimit::AtMost(max) => fph::max(distance - max, 0.0),
            DistanceLimit::AtLeast(min) => fph::min(distance - min, 0.0),
        };
        if violation == 0.0 {
            return;
        }

        let effective_mass = compute_effective_mass(body_a, body_b, &disp_a, &disp_b, &direction);
        let pseudo_impulse = (-effective_mass * correction_factor * violation) * direction;

        apply_pseudo_impulse_pair(body_a, body_b, &disp_a, &disp_b, &pseudo_impulse);
    }
}

/// Splits the given separation into a unit direction and a length. A
/// vanishing separation gets the x-axis as direction.
fn direction_and_distance(separation: &Vector2<fph>) -> (Vector2<fph>, fph) {
    let distance = separation.norm();
    if distance > GEOMETRIC_EPSILON {
        (separation / distance, distance)
    } else {
        (Vector2::x(), 0.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::quantities::Velocity;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    fn body(position: Position, velocity: Velocity) -> ConstrainedBody {
        ConstrainedBody {
            inverse_mass: 1.0,
            inverse_moment_of_inertia: 0.5,
            position,
            angle: 0.0,
            velocity,
            angular_velocity: 0.0,
        }
    }

    fn anchor_distance(joint: &PinJoint, a: &ConstrainedBody, b: &ConstrainedBody) -> fph {
        (b.transform_point_from_body_to_world_frame(&joint.anchor_b)
            - a.transform_point_from_body_to_world_frame(&joint.anchor_a))
        .norm()
    }

    #[test]
    fn measured_pin_uses_current_anchor_distance() {
        let joint = PinJoint::measured(
            point![1.0, 0.0],
            point![0.0, 2.0],
            &Pose::unrotated(point![0.0, 0.0]),
            &Pose::unrotated(point![4.0, 2.0]),
        );
        assert_abs_diff_eq!(joint.distance, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn pin_removes_relative_velocity_along_rod() {
        let joint = PinJoint::new(Position::origin(), Position::origin(), 10.0);
        let mut body_a = body(point![0.0, 0.0], vector![-1.0, 0.0]);
        let mut body_b = body(point![10.0, 0.0], vector![2.0, 3.0]);

        let prepared = joint.prepare(&body_a, &body_b, 0.01);
        let impulses = prepared.clamp_impulses(prepared.compute_impulses(&body_a, &body_b));
        prepared.apply_impulses_to_body_pair(&mut body_a, &mut body_b, impulses);

        assert_abs_diff_eq!(body_b.velocity.x - body_a.velocity.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(body_b.velocity.y, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn pin_with_zero_distance_acts_as_pivot() {
        let joint = PinJoint::new(point![1.0, 0.0], point![-1.0, 0.0], 0.0);
        let body_a = body(point![0.0, 0.0], Velocity::zeros());
        let body_b = body(point![2.0, 0.0], Velocity::zeros());
        assert!(matches!(
            joint.prepare(&body_a, &body_b, 0.01),
            PreparedDistanceJoint::Point(_)
        ));
    }

    #[test]
    fn positional_correction_restores_pin_distance() {
        let joint = PinJoint::new(Position::origin(), Position::origin(), 10.0);
        let mut body_a = body(point![0.0, 0.0], Velocity::zeros());
        let mut body_b = body(point![12.0, 0.0], Velocity::zeros());

        let prepared = joint.prepare(&body_a, &body_b, 0.01);
        for _ in 0..20 {
            prepared.apply_positional_correction_to_body_pair(&mut body_a, &mut body_b, 0.5);
        }
        assert_abs_diff_eq!(anchor_distance(&joint, &body_a, &body_b), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn upper_limit_only_pulls() {
        let body_a = body(point![0.0, 0.0], Velocity::zeros());
        let body_b = body(point![5.0, 0.0], vector![-1.0, 0.0]);
        let constraint = PreparedDistanceConstraint::new(
            &body_a,
            &body_b,
            Position::origin(),
            Position::origin(),
            DistanceLimit::AtMost(10.0),
            0.01,
        );
        // Inside the limit and approaching, so nothing should happen
        let impulse = constraint.clamp_impulse(constraint.compute_impulse(&body_a, &body_b));
        assert_eq!(impulse, 0.0);

        // Separating fast enough to cross the limit within the step
        let body_b = body(point![5.0, 0.0], vector![1000.0, 0.0]);
        let impulse = constraint.clamp_impulse(constraint.compute_impulse(&body_a, &body_b));
        assert!(impulse < 0.0);
    }

    #[test]
    fn lower_limit_only_pushes() {
        let body_a = body(point![0.0, 0.0], Velocity::zeros());
        let body_b = body(point![5.0, 0.0], vector![-1000.0, 0.0]);
        let constraint = PreparedDistanceConstraint::new(
            &body_a,
            &body_b,
            Position::origin(),
            Position::origin(),
            DistanceLimit::AtLeast(4.0),
            0.01,
        );
        let impulse = constraint.clamp_impulse(constraint.compute_impulse(&body_a, &body_b));
        assert!(impulse > 0.0);
    }
}
