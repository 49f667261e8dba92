//! Rotary limit joints.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint,
    compute_angular_effective_mass, ensure_finite,
};
use crate::fph;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A joint that keeps the angle of body B relative to body A within
/// `[min, max]` radians.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotaryLimitJoint {
    pub min: fph,
    pub max: fph,
}

#[derive(Clone, Debug)]
pub struct PreparedRotaryLimitJoint {
    limit: AngleLimit,
    effective_mass: fph,
    target_rate: fph,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum AngleLimit {
    Exactly(fph),
    AtMost(fph),
    AtLeast(fph),
}

impl RotaryLimitJoint {
    pub fn new(min: fph, max: fph) -> Self {
        Self { min, max }
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite(
            "rotary limit",
            &[("minimum angle", self.min), ("maximum angle", self.max)],
        )?;
        if self.min > self.max {
            bail!(
                "Minimum angle {} exceeds maximum angle {} for rotary limit joint",
                self.min,
                self.max
            );
        }
        Ok(())
    }
}

impl TwoBodyConstraint for RotaryLimitJoint {
    type Prepared = PreparedRotaryLimitJoint;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Self::Prepared {
        let angle = relative_angle(body_a, body_b);

        let limit = if self.max - self.min <= fph::EPSILON {
            AngleLimit::Exactly(self.max)
        } else if angle >= 0.5 * (self.min + self.max) {
            AngleLimit::AtMost(self.max)
        } else {
            AngleLimit::AtLeast(self.min)
        };

        let target_rate = match limit {
            AngleLimit::Exactly(_) => 0.0,
            AngleLimit::AtMost(max) => fph::max(max - angle, 0.0) / step_duration,
            AngleLimit::AtLeast(min) => -fph::max(angle - min, 0.0) / step_duration,
        };

        PreparedRotaryLimitJoint {
            limit,
            effective_mass: compute_angular_effective_mass(body_a, body_b, 1.0),
            target_rate,
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedRotaryLimitJoint {
    type Impulses = fph;

    fn can_use_warm_impulses_from(&self, other: &Self) -> bool {
        std::mem::discriminant(&self.limit) == std::mem::discriminant(&other.limit)
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> fph {
        let relative_angular_velocity = body_b.angular_velocity - body_a.angular_velocity;
        -self.effective_mass * (relative_angular_velocity - self.target_rate)
    }

    fn clamp_impulses(&self, impulses: fph) -> fph {
        match self.limit {
            AngleLimit::Exactly(_) => impulses,
            AngleLimit::AtMost(_) => fph::min(impulses, 0.0),
            AngleLimit::AtLeast(_) => fph::max(impulses, 0.0),
        }
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: fph,
    ) {
        body_a.apply_angular_impulse(-impulses);
        body_b.apply_angular_impulse(impulses);
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        let angle = relative_angle(body_a, body_b);
        let violation = match self.limit {
            AngleLimit::Exactly(target) => angle - target,
            AngleLimit::AtMost(max) => fph::max(angle - max, 0.0),
            AngleLimit::AtLeast(min) => fph::min(angle - min, 0.0),
        };
        if violation == 0.0 {
            return;
        }
        let pseudo_impulse = -self.effective_mass * correction_factor * violation;
        body_a.apply_angular_pseudo_impulse(-pseudo_impulse);
        body_b.apply_angular_pseudo_impulse(pseudo_impulse);
    }
}

fn relative_angle(body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> fph {
    body_b.angle - body_a.angle
}
