//! Damped rotary springs.

use super::ensure_finite;
use crate::{fph, rigid_body::RigidBody};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A spring applying a torque that pulls the angle of body B relative to
/// body A towards a rest angle, damped by their relative angular velocity.
///
/// Unlike the other joints, the spring is not solved as a constraint but
/// applies its torque together with the other forces on the bodies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DampedRotarySpring {
    pub rest_angle: fph,
    pub stiffness: fph,
    pub damping: fph,
}

impl DampedRotarySpring {
    pub fn new(rest_angle: fph, stiffness: fph, damping: fph) -> Self {
        Self {
            rest_angle,
            stiffness,
            damping,
        }
    }

    /// Computes the torque on body B (with the opposite torque on A) for the
    /// given relative angle and angular velocity of B with respect to A.
    pub fn compute_torque(&self, relative_angle: fph, relative_angular_velocity: fph) -> fph {
        -self.stiffness * (relative_angle - self.rest_angle)
            - self.damping * relative_angular_velocity
    }

    /// Applies the spring torque to the two bodies over the given duration.
    pub(super) fn apply_to_body_pair(
        &self,
        body_a: &mut RigidBody,
        body_b: &mut RigidBody,
        step_duration: fph,
    ) {
        let torque = self.compute_torque(
            body_b.angle() - body_a.angle(),
            body_b.angular_velocity() - body_a.angular_velocity(),
        );
        let angular_impulse = torque * step_duration;
        body_a.apply_angular_impulse(-angular_impulse);
        body_b.apply_angular_impulse(angular_impulse);
    }

    pub(super) fn validate(&self) -> Result<()> {
        ensure_finite(
            "damped rotary spring",
            &[
                ("rest angle", self.rest_angle),
                ("stiffness", self.stiffness),
                ("damping", self.damping),
            ],
        )?;
        if self.stiffness < 0.0 || self.damping < 0.0 {
            bail!(
                "Negative stiffness {} or damping {} for damped rotary spring",
                self.stiffness,
                self.damping
            );
        }
        Ok(())
    }
}
