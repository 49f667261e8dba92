//! Simple motors.

use super::{
    ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint,
    compute_angular_effective_mass, ensure_finite,
};
use crate::fph;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A motor driving the angular velocity of body B relative to body A towards
/// a constant rate, using at most a given torque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimpleMotor {
    /// The target relative angular velocity, in radians per second.
    pub rate: fph,
    /// The maximum torque the motor can apply. May be infinite.
    pub max_torque: fph,
}

#[derive(Clone, Debug)]
pub struct PreparedSimpleMotor {
    rate: fph,
    max_impulse: fph,
    effective_mass: fph,
}

impl SimpleMotor {
    pub fn new(rate: fph, max_torque: fph) -> Self {
        Self { rate, max_torque }
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite("simple motor", &[("rate", self.rate)])?;
        if self.max_torque.is_nan() || self.max_torque < 0.0 {
            bail!("Invalid maximum torque for simple motor: {}", self.max_torque);
        }
        Ok(())
    }
}

impl TwoBodyConstraint for SimpleMotor {
    type Prepared = PreparedSimpleMotor;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        step_duration: fph,
    ) -> Self::Prepared {
        PreparedSimpleMotor {
            rate: self.rate,
            max_impulse: self.max_torque * step_duration,
            effective_mass: compute_angular_effective_mass(body_a, body_b, 1.0),
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedSimpleMotor {
    type Impulses = fph;

    fn can_use_warm_impulses_from(&self, _other: &Self) -> bool {
        true
    }

    fn compute_impulses(&self, body_a: &ConstrainedBody, body_b: &ConstrainedBody) -> fph {
        let relative_angular_velocity = body_b.angular_velocity - body_a.angular_velocity;
        -self.effective_mass * (relative_angular_velocity - self.rate)
    }

    fn clamp_impulses(&self, impulses: fph) -> fph {
        impulses.clamp(-self.max_impulse, self.max_impulse)
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
        _body_a: &mut ConstrainedBody,
        _body_b: &mut ConstrainedBody,
        _correction_factor: fph,
    ) {
    }
}
