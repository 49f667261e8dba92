//! Slide joints, which can be engaged to hold their anchors together or
//! disengaged to let them separate up to a distance.

use super::{
    ConstrainedBody, TwoBodyConstraint, ensure_finite, ensure_finite_points,
    pin::{DistanceLimit, PreparedDistanceConstraint, PreparedDistanceJoint},
    pivot::PreparedPointConstraint,
};
use crate::{fph, geometry::GEOMETRIC_EPSILON, quantities::Position};
use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

/// A joint that keeps the distance between an anchor point on body A and an
/// anchor point on body B within `[min, max]`. With a maximum of zero the
/// anchors are held together and the joint acts as a hinge.
///
/// The joint can be engaged, which sets the maximum to zero, or disengaged,
/// which sets the maximum to the joint's unlock distance. When deserialized
/// without an unlock distance, the maximum is used, as in [`SlideJoint::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "SlideJointFields")]
pub struct SlideJoint {
    /// The anchor point on body A, in A's reference frame.
    pub anchor_a: Position,
    /// The anchor point on body B, in B's reference frame.
    pub anchor_b: Position,
    min: fph,
    max: fph,
    unlock_distance: fph,
}

pub type PreparedSlideJoint = PreparedDistanceJoint;

#[derive(Deserialize)]
struct SlideJointFields {
    anchor_a: Position,
    anchor_b: Position,
    #[serde(default)]
    min: fph,
    max: fph,
    #[serde(default, deserialize_with = "deserialize_some")]
    unlock_distance: Option<fph>,
}

fn deserialize_some<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<fph>, D::Error> {
    fph::deserialize(deserializer).map(Some)
}

impl From<SlideJointFields> for SlideJoint {
    fn from(fields: SlideJointFields) -> Self {
        Self {
            anchor_a: fields.anchor_a,
            anchor_b: fields.anchor_b,
            min: fields.min,
            max: fields.max,
            unlock_distance: fields.unlock_distance.unwrap_or(fields.max),
        }
    }
}

impl SlideJoint {
    /// Creates a slide joint with the given distance bounds. The joint is
    /// engaged if `max` is zero, and disengaging it restores `max`.
    pub fn new(anchor_a: Position, anchor_b: Position, min: fph, max: fph) -> Self {
        Self {
            anchor_a,
            anchor_b,
            min,
            max,
            unlock_distance: max,
        }
    }

    /// Creates a slide joint with a minimum distance of zero that can be
    /// toggled between holding its anchors together and letting them separate
    /// up to `unlock_distance`.
    pub fn lockable(
        anchor_a: Position,
        anchor_b: Position,
        unlock_distance: fph,
        engaged: bool,
    ) -> Self {
        let mut joint = Self {
            anchor_a,
            anchor_b,
            min: 0.0,
            max: unlock_distance,
            unlock_distance,
        };
        joint.set_engaged(engaged);
        joint
    }

    /// The lower distance bound. It only exceeds the upper bound while the
    /// joint is engaged, in which case the upper bound is returned.
    pub fn min(&self) -> fph {
        fph::min(self.min, self.max)
    }

    pub fn max(&self) -> fph {
        self.max
    }

    /// The upper distance bound used when the joint is disengaged.
    pub fn unlock_distance(&self) -> fph {
        self.unlock_distance
    }

    /// Whether the joint holds its anchors together.
    pub fn is_engaged(&self) -> bool {
        self.max <= GEOMETRIC_EPSILON
    }

    /// Engages or disengages the joint.
    pub fn set_engaged(&mut self, engaged: bool) {
        self.max = if engaged { 0.0 } else { self.unlock_distance };
    }

    /// Flips the engagement state of the joint. A joint with an unlock
    /// distance of zero stays engaged.
    ///
    /// # Returns
    /// Whether the joint is engaged after toggling.
    pub fn toggle_engaged(&mut self) -> bool {
        self.set_engaged(!self.is_engaged());
        self.is_engaged()
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite_points(
            "slide",
            &[("anchor A", &self.anchor_a), ("anchor B", &self.anchor_b)],
        )?;
        ensure_finite(
            "slide",
            &[
                ("minimum distance", self.min),
                ("maximum distance", self.max),
                ("unlock distance", self.unlock_distance),
            ],
        )?;
        if self.min < 0.0 || self.max < 0.0 || self.unlock_distance < 0.0 {
            bail!(
                "Negative distance for slide joint (min {}, max {}, unlock {})",
                self.min,
                self.max,
                self.unlock_distance
            );
        }
        if self.min > self.unlock_distance {
            bail!(
                "Minimum distance {} exceeds maximum distance {} for slide joint",
                self.min,
                self.unlock_distance
            );
        }
        Ok(())
    }
}

impl TwoBodyConstraint for SlideJoint {
    type Prepared = PreparedSlideJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Self::Prepared {
        if self.is_engaged() {
            return PreparedDistanceJoint::Point(PreparedPointConstraint::new(
                body_a,
                body_b,
                self.anchor_a,
                self.anchor_b,
            ));
        }

        let min = self.min();
        let max = self.max;

        let limit = if max - min <= GEOMETRIC_EPSILON {
            DistanceLimit::Exactly(max)
        } else if min <= GEOMETRIC_EPSILON {
            DistanceLimit::AtMost(max)
        } else {
            // Guard whichever bound the anchors are currently closest to
            let distance = (body_b.transform_point_from_body_to_world_frame(&self.anchor_b)
                - body_a.transform_point_from_body_to_world_frame(&self.anchor_a))
            .norm();
            if distance >= 0.5 * (min + max) {
                DistanceLimit::AtMost(max)
            } else {
                DistanceLimit::AtLeast(min)
            }
        };

        PreparedDistanceJoint::Distance(PreparedDistanceConstraint::new(
            body_a,
            body_b,
            self.anchor_a,
            self.anchor_b,
            limit,
            step_duration,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{constraint::PreparedTwoBodyConstraint, quantities::Velocity};
    use approx::assert_abs_diff_eq;
    use nalgebra::point;

    fn body(position: Position) -> ConstrainedBody {
        ConstrainedBody {
            inverse_mass: 1.0,
            inverse_moment_of_inertia: 1.0,
            position,
            angle: 0.0,
            velocity: Velocity::zeros(),
            angular_velocity: 0.0,
        }
    }

    #[test]
    fn toggling_switches_between_zero_and_unlock_distance() {
        let mut joint = SlideJoint::lockable(Position::origin(), Position::origin(), 50.0, true);
        assert!(joint.is_engaged());
        assert_eq!(joint.max(), 0.0);

        assert!(!joint.toggle_engaged());
        assert_abs_diff_eq!(joint.max(), 50.0);
        assert!(!joint.is_engaged());

        assert!(joint.toggle_engaged());
        assert_eq!(joint.max(), 0.0);
    }

    #[test]
    fn toggling_twice_restores_state() {
        let original = SlideJoint::lockable(Position::origin(), Position::origin(), 30.0, false);
        let mut joint = original.clone();
        joint.toggle_engaged();
        joint.toggle_engaged();
        assert_eq!(joint, original);
    }

    #[test]
    fn effective_min_never_exceeds_max() {
        let mut joint = SlideJoint::new(Position::origin(), Position::origin(), 20.0, 40.0);
        assert_abs_diff_eq!(joint.min(), 20.0);
        joint.set_engaged(true);
        assert_eq!(joint.min(), 0.0);
        joint.set_engaged(false);
        assert_abs_diff_eq!(joint.min(), 20.0);
    }

    #[test]
    fn engaged_joint_is_prepared_as_point_constraint() {
        let joint = SlideJoint::lockable(Position::origin(), Position::origin(), 50.0, true);
        let prepared = joint.prepare(&body(point![0.0, 0.0]), &body(point![1.0, 0.0]), 0.01);
        assert!(matches!(prepared, PreparedDistanceJoint::Point(_)));
    }

    #[test]
    fn disengaged_joint_lets_anchors_approach() {
        let joint = SlideJoint::lockable(Position::origin(), Position::origin(), 50.0, false);
        let body_a = body(point![0.0, 0.0]);
        let mut body_b = body(point![10.0, 0.0]);
        body_b.velocity.x = -5.0;

        let prepared = joint.prepare(&body_a, &body_b, 0.01);
        let impulses = prepared.clamp_impulses(prepared.compute_impulses(&body_a, &body_b));
        assert_abs_diff_eq!(impulses.norm(), 0.0);
    }

    #[test]
    fn negative_bounds_are_rejected() {
        assert!(
            SlideJoint::new(Position::origin(), Position::origin(), -1.0, 5.0)
                .validate()
                .is_err()
        );
        assert!(
            SlideJoint::lockable(Position::origin(), Position::origin(), 5.0, true)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn minimum_above_maximum_is_rejected() {
        assert!(
            SlideJoint::new(Position::origin(), point![-20.0, 0.0], 30.0, 10.0)
                .validate()
                .is_err()
        );
        let mut joint = SlideJoint::new(Position::origin(), Position::origin(), 20.0, 40.0);
        joint.set_engaged(true);
        assert!(joint.validate().is_ok());
    }

    #[test]
    fn joint_without_unlock_distance_reports_staying_engaged() {
        let mut joint = SlideJoint::new(Position::origin(), Position::origin(), 0.0, 0.0);
        assert!(joint.is_engaged());
        assert!(joint.toggle_engaged());
        assert!(joint.is_engaged());
        assert_eq!(joint.max(), 0.0);
    }

    #[test]
    fn unlock_distance_defaults_to_maximum_when_deserialized() {
        let anchor = ron::to_string(&point![1.0, 2.0]).unwrap();
        let origin = ron::to_string(&Position::origin()).unwrap();

        let joint: SlideJoint = ron::from_str(&format!(
            "(anchor_a: {anchor}, anchor_b: {origin}, min: 5.0, max: 40.0)"
        ))
        .unwrap();
        assert_eq!(
            joint,
            SlideJoint::new(point![1.0, 2.0], Position::origin(), 5.0, 40.0)
        );

        let engaged: SlideJoint = ron::from_str(&format!(
            "(anchor_a: {origin}, anchor_b: {origin}, max: 0.0, unlock_distance: 25.0)"
        ))
        .unwrap();
        assert!(engaged.is_engaged());
        assert_abs_diff_eq!(engaged.unlock_distance(), 25.0);
    }

    #[test]
    fn serialized_joint_reads_back_unchanged() {
        let joint = SlideJoint::lockable(point![3.0, 0.0], Position::origin(), 45.0, true);
        let text = ron::to_string(&joint).unwrap();
        assert_eq!(ron::from_str::<SlideJoint>(&text).unwrap(), joint);
    }
}
