//! Computation and representation of inertia-related properties.

use crate::{
    fph,
    geometry::{Circle, ConvexPolygon, Segment, ShapeGeometry},
    quantities::{Position, cross},
};
use nalgebra::Vector2;
use approx::AbsDiffEq;
use std::f64::consts::PI;

/// The inertia-related properties of a physical body, taken about the origin
/// of the body's reference frame.
///
/// Bodies rotate about their origin, so the origin is expected to coincide
/// with the center of mass. [`Self::center_of_mass`] reports where the center
/// of mass actually is.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InertialProperties {
    mass: fph,
    moment_of_inertia: fph,
    first_moment: Vector2<fph>,
}

impl InertialProperties {
    /// Creates a new set of inertial properties.
    ///
    /// # Panics
    /// If the mass or moment of inertia is negative.
    pub fn new(mass: fph, moment_of_inertia: fph) -> Self {
        assert!(mass >= 0.0, "Tried to create body with negative mass");
        assert!(
            moment_of_inertia >= 0.0,
            "Tried to create body with negative moment of inertia"
        );
        Self {
            mass,
            moment_of_inertia,
            first_moment: Vector2::zeros(),
        }
    }

    fn with_center_of_mass(mut self, center_of_mass: &Position) -> Self {
        self.first_moment = self.mass * center_of_mass.coords;
        self
    }

    /// The inertial properties of a body with no mass.
    pub fn massless() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Computes the inertial properties of the given shape geometry with
    /// uniform mass density, about the origin of the frame the geometry is
    /// expressed in.
    pub fn of_uniform_shape(geometry: &ShapeGeometry, mass_density: fph) -> Self {
        match geometry {
            ShapeGeometry::Circle(circle) => Self::of_uniform_circle(circle, mass_density),
            ShapeGeometry::Segment(segment) => Self::of_uniform_segment(segment, mass_density),
            ShapeGeometry::Polygon(polygon) => Self::of_uniform_polygon(polygon, mass_density),
        }
    }

    /// Computes the inertial properties of a uniformly dense disk.
    pub fn of_uniform_circle(circle: &Circle, mass_density: fph) -> Self {
        let mass = mass_density * circle.area();
        let central_moment = 0.5 * mass * circle.radius.powi(2);
        Self::new(
            mass,
            central_moment + mass * circle.center.coords.norm_squared(),
        )
        .with_center_of_mass(&circle.center)
    }

    /// Computes the inertial properties of a uniformly dense convex polygon.
    pub fn of_uniform_polygon(polygon: &ConvexPolygon, mass_density: fph) -> Self {
        let vertices = polygon.vertices();
        let n_vertices = vertices.len();

        let mut double_area = 0.0;
        let mut centroid_sum = Vector2::zeros();
        let mut moment_sum = 0.0;
        for idx in 0..n_vertices {
            let p = vertices[idx].coords;
            let q = vertices[(idx + 1) % n_vertices].coords;
            let weight = cross(&p, &q);
            double_area += weight;
            centroid_sum += weight * (p + q);
            moment_sum += weight * (p.dot(&p) + p.dot(&q) + q.dot(&q));
        }

        let mass = 0.5 * mass_density * double_area;
        let moment_of_inertia = mass_density * moment_sum / 12.0;
        let mut properties = Self::new(mass, moment_of_inertia);
        properties.first_moment = mass_density * centroid_sum / 6.0;
        properties
    }

    /// Computes the inertial properties of a uniformly dense segment with
    /// rounded caps. A segment with zero radius is treated as a thin rod with
    /// no mass.
    pub fn of_uniform_segment(segment: &Segment, mass_density: fph) -> Self {
        let length = segment.length();
        let radius = segment.radius;

        let midpoint = Position::from(0.5 * (segment.a.coords + segment.b.coords));

        // The rectangular body between the caps
        let body_mass = mass_density * 2.0 * radius * length;
        let body_moment =
            body_mass * (length.powi(2) + (2.0 * radius).powi(2)) / 12.0
                + body_mass * midpoint.coords.norm_squared();

        // Each cap is a half disk whose flat side is centered on an endpoint
        let cap_mass = 0.5 * mass_density * PI * radius.powi(2);
        let cap_moment_about_endpoint = 0.5 * cap_mass * radius.powi(2);
        let centroid_offset = 4.0 * radius / (3.0 * PI);

        let direction = if length > 0.0 {
            (segment.b - segment.a) / length
        } else {
            nalgebra::Vector2::x()
        };

        let mut cap_moment = 0.0;
        for (endpoint, outward) in [(segment.a, -direction), (segment.b, direction)] {
            let centroid = endpoint + outward * centroid_offset;
            cap_moment += cap_moment_about_endpoint - cap_mass * centroid_offset.powi(2)
                + cap_mass * centroid.coords.norm_squared();
        }

        Self::new(body_mass + 2.0 * cap_mass, body_moment + cap_moment)
            .with_center_of_mass(&midpoint)
    }

    pub fn mass(&self) -> fph {
        self.mass
    }

    pub fn moment_of_inertia(&self) -> fph {
        self.moment_of_inertia
    }

    /// The center of mass in the body's reference frame, or the origin for a
    /// massless body.
    pub fn center_of_mass(&self) -> Position {
        if self.mass > 0.0 {
            Position::from(self.first_moment / self.mass)
        } else {
            Position::origin()
        }
    }

    /// Returns the inertial properties of the union of this body and the
    /// given one, assuming both are expressed about the same origin.
    pub fn combined(&self, other: &Self) -> Self {
        Self {
            mass: self.mass + other.mass,
            moment_of_inertia: self.moment_of_inertia + other.moment_of_inertia,
            first_moment: self.first_moment + other.first_moment,
        }
    }
}

impl AbsDiffEq for InertialProperties {
    type Epsilon = <fph as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        fph::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        fph::abs_diff_eq(&self.mass, &other.mass, epsilon)
            && fph::abs_diff_eq(&self.moment_of_inertia, &other.moment_of_inertia, epsilon)
            && self.first_moment.abs_diff_eq(&other.first_moment, epsilon)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::point;
    use proptest::prelude::*;

    #[test]
    fn uniform_rectangle_has_correct_inertial_properties() {
        let width = 100.0;
        let height = 50.0;
        let density = 2.0;
        let rectangle = ConvexPolygon::rectangle(width, height).unwrap();

        let properties = InertialProperties::of_uniform_polygon(&rectangle, density);

        let mass = density * width * height;
        assert_abs_diff_eq!(properties.mass(), mass, epsilon = 1e-9);
        assert_abs_diff_eq!(
            properties.moment_of_inertia(),
            mass * (width.powi(2) + height.powi(2)) / 12.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn uniform_circle_has_correct_inertial_properties() {
        let circle = Circle::new(Position::origin(), 3.0);
        let properties = InertialProperties::of_uniform_circle(&circle, 1.0);
        let mass = PI * 9.0;
        assert_abs_diff_eq!(properties.mass(), mass);
        assert_abs_diff_eq!(properties.moment_of_inertia(), 0.5 * mass * 9.0);
    }

    #[test]
    fn offset_circle_obeys_parallel_axis_theorem() {
        let centered = InertialProperties::of_uniform_circle(&Circle::new(Position::origin(), 1.0), 1.0);
        let offset =
            InertialProperties::of_uniform_circle(&Circle::new(point![3.0, 4.0], 1.0), 1.0);
        assert_abs_diff_eq!(
            offset.moment_of_inertia(),
            centered.moment_of_inertia() + centered.mass() * 25.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn segment_without_length_is_a_disk() {
        let segment = Segment::new(Position::origin(), Position::origin(), 2.0);
        let as_segment = InertialProperties::of_uniform_segment(&segment, 1.5);
        let as_circle =
            InertialProperties::of_uniform_circle(&Circle::new(Position::origin(), 2.0), 1.5);
        assert_abs_diff_eq!(as_segment, as_circle, epsilon = 1e-9);
    }

    #[test]
    fn combining_properties_adds_them() {
        let a = InertialProperties::new(1.0, 2.0);
        let b = InertialProperties::new(3.0, 4.0);
        assert_abs_diff_eq!(a.combined(&b), InertialProperties::new(4.0, 6.0));
    }

    #[test]
    fn center_of_mass_weights_shapes_by_mass() {
        let small = InertialProperties::of_uniform_polygon(
            &ConvexPolygon::rectangle_centered_at(&point![10.0, 0.0], 2.0, 2.0).unwrap(),
            1.0,
        );
        let large = InertialProperties::of_uniform_circle(&Circle::new(point![0.0, 4.0], 2.0), 3.0);
        let combined = small.combined(&large);

        let expected = (small.mass() * point![10.0, 0.0].coords
            + large.mass() * point![0.0, 4.0].coords)
            / combined.mass();
        assert_abs_diff_eq!(small.center_of_mass(), point![10.0, 0.0], epsilon = 1e-9);
        assert_abs_diff_eq!(combined.center_of_mass().coords, expected, epsilon = 1e-9);
    }

    #[test]
    fn centered_shapes_have_center_of_mass_at_origin() {
        let rectangle = ConvexPolygon::rectangle(40.0, 20.0).unwrap();
        let segment = Segment::new(point![-5.0, 0.0], point![5.0, 0.0], 1.0);
        let combined = InertialProperties::of_uniform_polygon(&rectangle, 1.0)
            .combined(&InertialProperties::of_uniform_segment(&segment, 1.0));
        assert_abs_diff_eq!(combined.center_of_mass(), Position::origin(), epsilon = 1e-9);
        assert_eq!(InertialProperties::massless().center_of_mass(), Position::origin());
    }

    proptest! {
        #[test]
        fn polygon_moment_matches_rectangle_formula_for_offset_rectangles(
            width in 0.1..100.0,
            height in 0.1..100.0,
            center_x in -50.0..50.0,
            center_y in -50.0..50.0,
        ) {
            let center = point![center_x, center_y];
            let rectangle = ConvexPolygon::rectangle_centered_at(&center, width, height).unwrap();
            let properties = InertialProperties::of_uniform_polygon(&rectangle, 1.0);

            let mass = width * height;
            let expected = mass * (width.powi(2) + height.powi(2)) / 12.0
                + mass * center.coords.norm_squared();

            prop_assert!((properties.mass() - mass).abs() < 1e-6 * mass);
            prop_assert!((properties.moment_of_inertia() - expected).abs() < 1e-6 * expected);
        }
    }
}
