//! Gear joints.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint,
    compute_angular_effective_mass, ensure_finite,
};
use crate::fph;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A joint that keeps the angle of body B equal to `phase + ratio` times the
/// angle of body A.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GearJoint {
    pub phase: fph,
    pub ratio: fph,
}

#[derive(Clone, Debug)]
pub struct PreparedGearJoint {
    phase: fph,
    ratio: fph,
    effective_mass: fph,
}

impl GearJoint {
    pub fn new(phase: fph, ratio: fph) -> Self {
        Self { phase, ratio }
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite("gear", &[("phase", self.phase), ("ratio", self.ratio)])
    }
}

impl TwoBodyConstraint for GearJoint {
    type Prepared = PreparedGearJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        _step_duration: fph,
    ) -> Self::Prepared {
        PreparedGearJoint {
            phase: self.phase,
            ratio: self.ratio,
            effective_mass: compute_angular_effective_mass(body_a, body_b, self.ratio),
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedGearJoint {
    type Impulses = fph;

    fn can_use_warm_impulses_from(&self, _other: &Self) -> bool {
        true
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> fph {
        let velocity_error = body_b.angular_velocity - self.ratio * body_a.angular_velocity;
        -self.effective_mass * velocity_error
    }

    fn clamp_impulses(&self, impulses: fph) -> fph {
        impulses
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: fph,
    ) {
        body_a.apply_angular_impulse(-self.ratio * impulses);
        body_b.apply_angular_impulse(impulses);
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        let angle_error = body_b.angle - self.ratio * body_a.angle - self.phase;
        let pseudo_impulse = -self.effective_mass * correction_factor * angle_error;
        body_a.apply_angular_pseudo_impulse(-self.ratio * pseudo_impulse);
        body_b.apply_angular_pseudo_impulse(pseudo_impulse);
    }
}
