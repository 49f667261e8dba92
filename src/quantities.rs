//! Physical quantities.

use crate::fph;
use approx::AbsDiffEq;
use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// A position in 2D space.
pub type Position = Point2<fph>;

/// A velocity in 2D space.
pub type Velocity = Vector2<fph>;

/// An acceleration in 2D space.
pub type Acceleration = Vector2<fph>;

/// A 2D force.
pub type Force = Vector2<fph>;

/// A 2D impulse (momentum change).
pub type Impulse = Vector2<fph>;

/// An orientation in 2D space, as the angle in radians from the world x-axis
/// to the body x-axis, positive towards the world y-axis.
pub type Orientation = fph;

/// An angular velocity in 2D space (radians per unit time).
pub type AngularVelocity = fph;

/// A 2D torque.
pub type Torque = fph;

/// The position and orientation of a body's reference frame in world space.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub position: Position,
    pub angle: Orientation,
}

impl Pose {
    pub fn new(position: Position, angle: Orientation) -> Self {
        Self { position, angle }
    }

    /// A pose at the given position with no rotation.
    pub fn unrotated(position: Position) -> Self {
        Self::new(position, 0.0)
    }

    /// The rotation taking body-frame vectors to world space.
    pub fn rotation(&self) -> Rotation2<fph> {
        Rotation2::new(self.angle)
    }

    /// Transforms a vector from the body frame to world space.
    pub fn transform_vector(&self, vector: &Vector2<fph>) -> Vector2<fph> {
        rotate_vector(self.angle, vector)
    }

    /// Transforms a point from the body frame to world space.
    pub fn transform_point(&self, point: &Position) -> Position {
        self.position + self.transform_vector(&point.coords)
    }

    /// Transforms a point from world space to the body frame.
    pub fn inverse_transform_point(&self, point: &Position) -> Position {
        Position::from(rotate_vector(-self.angle, &(point - self.position)))
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::unrotated(Position::origin())
    }
}

impl AbsDiffEq for Pose {
    type Epsilon = <fph as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        fph::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        Position::abs_diff_eq(&self.position, &other.position, epsilon)
            && fph::abs_diff_eq(&self.angle, &other.angle, epsilon)
    }
}

/// Rotates the given vector counterclockwise by the given angle.
pub fn rotate_vector(angle: fph, vector: &Vector2<fph>) -> Vector2<fph> {
    let (sin, cos) = angle.sin_cos();
    Vector2::new(
        cos * vector.x - sin * vector.y,
        sin * vector.x + cos * vector.y,
    )
}

/// The scalar 2D cross product `a.x * b.y - a.y * b.x`.
pub fn cross(a: &Vector2<fph>, b: &Vector2<fph>) -> fph {
    a.x * b.y - a.y * b.x
}

/// The cross product of an angular quantity (along the out-of-plane axis) with
/// an in-plane vector.
pub fn cross_scalar_vector(scalar: fph, vector: &Vector2<fph>) -> Vector2<fph> {
    Vector2::new(-scalar * vector.y, scalar * vector.x)
}

/// Returns the given vector rotated 90 degrees counterclockwise.
pub fn perpendicular(vector: &Vector2<fph>) -> Vector2<fph> {
    Vector2::new(-vector.y, vector.x)
}

/// Computes the velocity of the point at the given offset from a body's center
/// of mass due to the body's linear and rotational motion.
pub fn compute_point_velocity(
    velocity: &Velocity,
    angular_velocity: AngularVelocity,
    offset: &Vector2<fph>,
) -> Velocity {
    velocity + cross_scalar_vector(angular_velocity, offset)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};
    use proptest::prelude::*;
    use std::f64::consts::FRAC_PI_2;

    prop_compose! {
        fn position_strategy(max_coord: fph)(
            x in -max_coord..max_coord,
            y in -max_coord..max_coord,
        ) -> Position {
            point![x, y]
        }
    }

    prop_compose! {
        fn pose_strategy(max_coord: fph)(
            position in position_strategy(max_coord),
            angle in -10.0..10.0,
        ) -> Pose {
            Pose::new(position, angle)
        }
    }

    #[test]
    fn rotating_by_quarter_turn_works() {
        assert_abs_diff_eq!(
            rotate_vector(FRAC_PI_2, &vector![1.0, 0.0]),
            vector![0.0, 1.0],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            rotate_vector(FRAC_PI_2, &vector![0.0, 1.0]),
            vector![-1.0, 0.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotation_agrees_with_nalgebra_rotation() {
        let pose = Pose::new(point![1.0, 2.0], 0.7);
        let vector = vector![3.0, -4.0];
        assert_abs_diff_eq!(
            pose.transform_vector(&vector),
            pose.rotation() * vector,
            epsilon = 1e-12
        );
    }

    #[test]
    fn cross_of_scalar_and_vector_is_consistent_with_perpendicular() {
        let vector = vector![2.0, 5.0];
        assert_abs_diff_eq!(
            cross_scalar_vector(3.0, &vector),
            3.0 * perpendicular(&vector)
        );
        assert_abs_diff_eq!(cross(&vector, &perpendicular(&vector)), vector.norm_squared());
    }

    #[test]
    fn point_velocity_of_rotating_body_is_tangential() {
        let velocity = compute_point_velocity(&Velocity::zeros(), 2.0, &vector![1.0, 0.0]);
        assert_abs_diff_eq!(velocity, vector![0.0, 2.0]);
    }

    proptest! {
        #[test]
        fn transforming_point_to_world_and_back_gives_original(
            pose in pose_strategy(1e3),
            point in position_strategy(1e3),
        ) {
            let world_point = pose.transform_point(&point);
            let body_point = pose.inverse_transform_point(&world_point);
            prop_assert!(body_point.coords.abs_diff_eq(&point.coords, 1e-9));
        }

        #[test]
        fn rotation_preserves_length(angle in -10.0..10.0, point in position_strategy(1e3)) {
            let rotated = rotate_vector(angle, &point.coords);
            prop_assert!((rotated.norm() - point.coords.norm()).abs() < 1e-9);
        }
    }
}
