//! Contact (collision) constraints.

use super::{ConstrainedBody, PreparedTwoBodyConstraint, TwoBodyConstraint, compute_effective_mass};
use crate::{
    collision::ShapeID,
    fph,
    material::ContactResponseParameters,
    quantities::{Position, perpendicular},
};
use nalgebra::Vector2;
use num_traits::Zero;
use std::ops::{Add, Mul, Sub};
use tinyvec::TinyVec;

/// Separating speeds below this do not cause bouncing.
const RESTITUTION_SPEED_THRESHOLD: fph = 1.0;

/// Penetration depth that is tolerated without positional correction.
const PENETRATION_SLOP: fph = 0.1;

/// A set of contacts between two shapes.
#[derive(Clone, Debug)]
pub struct ContactManifold {
    contacts: TinyVec<[ContactWithID; 2]>,
}

/// A [`Contact`] with an associated [`ContactID`].
#[derive(Clone, Debug, Default)]
pub struct ContactWithID {
    pub id: ContactID,
    pub contact: Contact,
}

/// Identifier for a contact between two shapes, stable across substeps as
/// long as the same features stay in contact.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactID(u64);

/// A contact between two shapes.
#[derive(Clone, Debug, Default)]
pub struct Contact {
    pub geometry: ContactGeometry,
    pub response_params: ContactResponseParameters,
}

/// Geometrical information about a contact between shape A and shape B.
#[derive(Clone, Debug)]
pub struct ContactGeometry {
    /// The point on shape B that penetrates deepest into shape A (in world
    /// space).
    pub position: Position,
    /// The unit normal of shape B's surface at the contact, pointing from B
    /// towards A (in world space).
    pub surface_normal: Vector2<fph>,
    /// The depth of penetration. Never negative.
    pub penetration_depth: fph,
}

/// A [`Contact`] that has been prepared for constraint solving.
#[derive(Clone, Debug)]
pub struct PreparedContact {
    local_position_on_a: Position,
    local_position_on_b: Position,
    disp_a: Vector2<fph>,
    disp_b: Vector2<fph>,
    normal: Vector2<fph>,
    tangent: Vector2<fph>,
    normal_effective_mass: fph,
    tangent_effective_mass: fph,
    restitution_bias: fph,
    friction_coef: fph,
}

/// The normal and tangential (frictional) impulse magnitudes for a contact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactImpulses {
    pub normal: fph,
    pub tangent: fph,
}

impl ContactManifold {
    pub fn new() -> Self {
        Self {
            contacts: TinyVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn contacts(&self) -> &[ContactWithID] {
        self.contacts.as_slice()
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    pub fn add_contact(&mut self, contact: ContactWithID) {
        self.contacts.push(contact);
    }
}

impl Default for ContactManifold {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactID {
    /// Creates a contact ID from the IDs of the two shapes in contact and an
    /// index identifying the contacting features.
    pub fn from_shape_ids_and_feature(
        shape_a_id: ShapeID,
        shape_b_id: ShapeID,
        feature_idx: u32,
    ) -> Self {
        let mut id = shape_a_id.as_u64();
        id = id.wrapping_mul(31).wrapping_add(shape_b_id.as_u64());
        id = id.wrapping_mul(31).wrapping_add(u64::from(feature_idx));
        Self(id)
    }
}

impl ContactGeometry {
    /// The point on shape A that penetrates deepest into shape B.
    pub fn position_on_a(&self) -> Position {
        self.position - self.penetration_depth * self.surface_normal
    }

    /// The point on shape B that penetrates deepest into shape A.
    pub fn position_on_b(&self) -> Position {
        self.position
    }

    /// Returns the geometry of the same contact seen with the roles of the
    /// two shapes exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            position: self.position_on_a(),
            surface_normal: -self.surface_normal,
            penetration_depth: self.penetration_depth,
        }
    }
}

impl Default for ContactGeometry {
    fn default() -> Self {
        Self {
            position: Position::origin(),
            surface_normal: Vector2::y(),
            penetration_depth: 0.0,
        }
    }
}

impl TwoBodyConstraint for Contact {
    type Prepared = PreparedContact;

    fn prepare(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
        _step_duration: fph,
    ) -> Self::Prepared {
        let normal = self.geometry.surface_normal;
        let tangent = perpendicular(&normal);

        let position_on_a = self.geometry.position_on_a();
        let position_on_b = self.geometry.position_on_b();

        let disp_a = position_on_a - body_a.position;
        let disp_b = position_on_b - body_b.position;

        let normal_effective_mass = compute_effective_mass(body_a, body_b, &disp_a, &disp_b, &normal);
        let tangent_effective_mass =
            compute_effective_mass(body_a, body_b, &disp_a, &disp_b, &tangent);

        let separating_velocity =
            normal.dot(&(body_a.point_velocity(&disp_a) - body_b.point_velocity(&disp_b)));

        let restitution_bias = if separating_velocity < -RESTITUTION_SPEED_THRESHOLD {
            -self.response_params.restitution_coef * separating_velocity
        } else {
            0.0
        };

        PreparedContact {
            local_position_on_a: body_a.transform_point_from_world_to_body_frame(&position_on_a),
            local_position_on_b: body_b.transform_point_from_world_to_body_frame(&position_on_b),
            disp_a,
            disp_b,
            normal,
            tangent,
            normal_effective_mass,
            tangent_effective_mass,
            restitution_bias,
            friction_coef: self.response_params.friction_coef,
        }
    }
}

impl PreparedTwoBodyConstraint for PreparedContact {
    type Impulses = ContactImpulses;

    fn can_use_warm_impulses_from(&self, other: &Self) -> bool {
        self.normal.dot(&other.normal) > 0.99
    }

    fn compute_impulses(
        &self,
        body_a: &ConstrainedBody,
        body_b: &ConstrainedBody,
    ) -> ContactImpulses {
        let relative_velocity =
            body_a.point_velocity(&self.disp_a) - body_b.point_velocity(&self.disp_b);

        let separating_velocity = self.normal.dot(&relative_velocity);
        let slip_velocity = self.tangent.dot(&relative_velocity);

        ContactImpulses {
            normal: -self.normal_effective_mass * (separating_velocity - self.restitution_bias),
            tangent: -self.tangent_effective_mass * slip_velocity,
        }
    }

    fn clamp_impulses(&self, impulses: ContactImpulses) -> ContactImpulses {
        let normal = fph::max(0.0, impulses.normal);
        let max_tangent = self.friction_coef * normal;
        ContactImpulses {
            normal,
            tangent: impulses.tangent.clamp(-max_tangent, max_tangent),
        }
    }

    fn apply_impulses_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        impulses: ContactImpulses,
    ) {
        let impulse = impulses.normal * self.normal + impulses.tangent * self.tangent;
        body_a.apply_impulse(&impulse, &self.disp_a);
        body_b.apply_impulse(&(-impulse), &self.disp_b);
    }

    fn apply_positional_correction_to_body_pair(
        &self,
        body_a: &mut ConstrainedBody,
        body_b: &mut ConstrainedBody,
        correction_factor: fph,
    ) {
        let position_on_a = body_a.transform_point_from_body_to_world_frame(&self.local_position_on_a);
        let position_on_b = body_b.transform_point_from_body_to_world_frame(&self.local_position_on_b);

        let penetration_depth = -self.normal.dot(&(position_on_a - position_on_b));
        let excess_depth = penetration_depth - PENETRATION_SLOP;
        if excess_depth <= 0.0 {
            return;
        }

        let disp_a = position_on_a - body_a.position;
        let disp_b = position_on_b - body_b.position;
        let effective_mass = compute_effective_mass(body_a, body_b, &disp_a, &disp_b, &self.normal);

        let pseudo_impulse = (effective_mass * correction_factor * excess_depth) * self.normal;

        body_a.apply_pseudo_impulse(&pseudo_impulse, &disp_a);
        body_b.apply_pseudo_impulse(&(-pseudo_impulse), &disp_b);
    }
}

impl Zero for ContactImpulses {
    fn zero() -> Self {
        Self {
            normal: 0.0,
            tangent: 0.0,
        }
    }

    fn is_zero(&self) -> bool {
        self.normal == 0.0 && self.tangent == 0.0
    }
}

impl Add for ContactImpulses {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            normal: self.normal + rhs.normal,
            tangent: self.tangent + rhs.tangent,
        }
    }
}

impl Sub for ContactImpulses {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            normal: self.normal - rhs.normal,
            tangent: self.tangent - rhs.tangent,
        }
    }
}

impl Mul<fph> for ContactImpulses {
    type Output = Self;

    fn mul(self, rhs: fph) -> Self::Output {
        Self {
            normal: self.normal * rhs,
            tangent: self.tangent * rhs,
        }
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
            inverse_moment_of_inertia: 0.1,
            position,
            angle: 0.0,
            velocity,
            angular_velocity: 0.0,
        }
    }

    fn ground() -> ConstrainedBody {
        ConstrainedBody {
            inverse_mass: 0.0,
            inverse_moment_of_inertia: 0.0,
            position: point![0.0, 10.0],
            angle: 0.0,
            velocity: Velocity::zeros(),
            angular_velocity: 0.0,
        }
    }

    fn resting_contact(response_params: ContactResponseParameters) -> Contact {
        // Body A above ground B with y pointing down, so B's normal points up
        Contact {
            geometry: ContactGeometry {
                position: point![0.0, 9.0],
                surface_normal: vector![0.0, -1.0],
                penetration_depth: 0.5,
            },
            response_params,
        }
    }

    #[test]
    fn swapped_geometry_flips_normal_and_moves_position_to_other_shape() {
        let geometry = ContactGeometry {
            position: point![1.0, 2.0],
            surface_normal: vector![0.0, 1.0],
            penetration_depth: 0.5,
        };
        let swapped = geometry.swapped();
        assert_abs_diff_eq!(swapped.position, point![1.0, 1.5]);
        assert_abs_diff_eq!(swapped.surface_normal, vector![0.0, -1.0]);
        assert_abs_diff_eq!(swapped.position_on_a(), geometry.position_on_b());
    }

    #[test]
    fn approaching_bodies_get_separating_normal_impulse() {
        let body_a = body(point![0.0, 8.0], vector![0.0, 5.0]);
        let body_b = ground();
        let prepared = resting_contact(ContactResponseParameters::new(0.0, 0.0))
            .prepare(&body_a, &body_b, 0.01);

        let impulses = prepared.clamp_impulses(prepared.compute_impulses(&body_a, &body_b));
        assert!(impulses.normal > 0.0);

        let mut a = body_a.clone();
        let mut b = body_b.clone();
        prepared.apply_impulses_to_body_pair(&mut a, &mut b, impulses);
        assert_abs_diff_eq!(a.velocity.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.velocity, Velocity::zeros());
    }

    #[test]
    fn separating_bodies_get_no_impulse() {
        let body_a = body(point![0.0, 8.0], vector![0.0, -5.0]);
        let body_b = ground();
        let prepared = resting_contact(ContactResponseParameters::new(0.0, 0.5))
            .prepare(&body_a, &body_b, 0.01);
        let impulses = prepared.clamp_impulses(prepared.compute_impulses(&body_a, &body_b));
        assert_eq!(impulses.normal, 0.0);
        assert_eq!(impulses.tangent, 0.0);
    }

    #[test]
    fn friction_impulse_is_bounded_by_normal_impulse() {
        let prepared = resting_contact(ContactResponseParameters::new(0.0, 0.5))
            .prepare(&body(point![0.0, 8.0], Velocity::zeros()), &ground(), 0.01);
        let clamped = prepared.clamp_impulses(ContactImpulses {
            normal: 2.0,
            tangent: -10.0,
        });
        assert_abs_diff_eq!(clamped.tangent, -1.0);

        let clamped = prepared.clamp_impulses(ContactImpulses {
            normal: -2.0,
            tangent: 10.0,
        });
        assert_eq!(clamped, ContactImpulses::zero());
    }

    #[test]
    fn restitution_reverses_approach_velocity() {
        let body_a = body(point![0.0, 8.0], vector![0.0, 10.0]);
        let body_b = ground();
        let prepared = resting_contact(ContactResponseParameters::new(1.0, 0.0))
            .prepare(&body_a, &body_b, 0.01);

        let mut a = body_a.clone();
        let mut b = body_b.clone();
        let impulses = prepared.clamp_impulses(prepared.compute_impulses(&a, &b));
        prepared.apply_impulses_to_body_pair(&mut a, &mut b, impulses);
        assert_abs_diff_eq!(a.velocity.y, -10.0, epsilon = 1e-9);
    }

    #[test]
    fn positional_correction_reduces_penetration() {
        let mut body_a = body(point![0.0, 8.0], Velocity::zeros());
        let mut body_b = ground();
        let prepared = resting_contact(ContactResponseParameters::default())
            .prepare(&body_a, &body_b, 0.01);

        let initial_y = body_a.position.y;
        prepared.apply_positional_correction_to_body_pair(&mut body_a, &mut body_b, 0.5);
        assert!(body_a.position.y < initial_y);
        assert_abs_diff_eq!(body_b.position, point![0.0, 10.0]);
    }

    #[test]
    fn contact_ids_depend_on_shapes_and_feature() {
        let a = ShapeID::from_u64(1);
        let b = ShapeID::from_u64(2);
        assert_ne!(
            ContactID::from_shape_ids_and_feature(a, b, 0),
            ContactID::from_shape_ids_and_feature(b, a, 0)
        );
        assert_ne!(
            ContactID::from_shape_ids_and_feature(a, b, 0),
            ContactID::from_shape_ids_and_feature(a, b, 1)
        );
    }
}
