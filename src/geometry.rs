//! Geometric primitives for shapes attached to rigid bodies.

use crate::{
    fph,
    quantities::{Pose, Position, cross},
};
use anyhow::{Result, bail};
use nalgebra::{Vector2, point};
use serde::{Deserialize, Serialize};

/// Tolerance below which lengths and areas are considered degenerate.
pub const GEOMETRIC_EPSILON: fph = 1e-9;

/// The geometry of a shape, expressed either in the local frame of the body
/// it is attached to or in world space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShapeGeometry {
    Circle(Circle),
    Segment(Segment),
    Polygon(ConvexPolygon),
}

/// A circle (disk).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Position,
    pub radius: fph,
}

/// A line segment thickened by a radius.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub a: Position,
    pub b: Position,
    pub radius: fph,
}

/// A convex polygon whose vertices are ordered counterclockwise (positive
/// signed area).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvexPolygon {
    vertices: Vec<Position>,
}

/// An axis-aligned bounding box.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Position,
    pub max: Position,
}

impl ShapeGeometry {
    /// Checks that the geometry is non-degenerate and returns a normalized
    /// copy of it (polygons get counterclockwise winding).
    ///
    /// # Errors
    /// Returns an error if the geometry is degenerate or not finite.
    pub fn validated(&self) -> Result<Self> {
        match self {
            Self::Circle(circle) => {
                circle.validate()?;
                Ok(Self::Circle(*circle))
            }
            Self::Segment(segment) => {
                segment.validate()?;
                Ok(Self::Segment(*segment))
            }
            Self::Polygon(polygon) => Ok(Self::Polygon(ConvexPolygon::new(
                polygon.vertices.clone(),
            )?)),
        }
    }

    /// The area covered by the geometry.
    pub fn area(&self) -> fph {
        match self {
            Self::Circle(circle) => circle.area(),
            Self::Segment(segment) => segment.area(),
            Self::Polygon(polygon) => polygon.area(),
        }
    }

    /// Returns the geometry transformed from the body frame with the given
    /// pose to world space.
    pub fn transformed(&self, pose: &Pose) -> Self {
        match self {
            Self::Circle(circle) => Self::Circle(Circle {
                center: pose.transform_point(&circle.center),
                radius: circle.radius,
            }),
            Self::Segment(segment) => Self::Segment(Segment {
                a: pose.transform_point(&segment.a),
                b: pose.transform_point(&segment.b),
                radius: segment.radius,
            }),
            Self::Polygon(polygon) => Self::Polygon(ConvexPolygon {
                vertices: polygon
                    .vertices
                    .iter()
                    .map(|vertex| pose.transform_point(vertex))
                    .collect(),
            }),
        }
    }

    /// Computes the axis-aligned bounding box of the geometry.
    pub fn compute_aabb(&self) -> Aabb {
        match self {
            Self::Circle(circle) => Aabb::around_point(&circle.center, circle.radius),
            Self::Segment(segment) => {
                Aabb::enclosing_points(&[segment.a, segment.b]).expanded_by(segment.radius)
            }
            Self::Polygon(polygon) => Aabb::enclosing_points(&polygon.vertices),
        }
    }

    /// The corner points of the geometry, which are the polygon vertices and
    /// the segment endpoints. Circles have no corners.
    pub fn corners(&self) -> Vec<Position> {
        match self {
            Self::Circle(_) => Vec::new(),
            Self::Segment(segment) => vec![segment.a, segment.b],
            Self::Polygon(polygon) => polygon.vertices.clone(),
        }
    }
}

impl From<Circle> for ShapeGeometry {
    fn from(circle: Circle) -> Self {
        Self::Circle(circle)
    }
}

impl From<Segment> for ShapeGeometry {
    fn from(segment: Segment) -> Self {
        Self::Segment(segment)
    }
}

impl From<ConvexPolygon> for ShapeGeometry {
    fn from(polygon: ConvexPolygon) -> Self {
        Self::Polygon(polygon)
    }
}

impl Circle {
    pub fn new(center: Position, radius: fph) -> Self {
        Self { center, radius }
    }

    pub fn area(&self) -> fph {
        std::f64::consts::PI * self.radius.powi(2)
    }

    fn validate(&self) -> Result<()> {
        if !is_finite_point(&self.center) {
            bail!("Circle has non-finite center {:?}", self.center);
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            bail!("Circle has invalid radius {}", self.radius);
        }
        Ok(())
    }
}

impl Segment {
    pub fn new(a: Position, b: Position, radius: fph) -> Self {
        Self { a, b, radius }
    }

    pub fn length(&self) -> fph {
        (self.b - self.a).norm()
    }

    /// The area of the segment including its rounded caps.
    pub fn area(&self) -> fph {
        2.0 * self.radius * self.length() + std::f64::consts::PI * self.radius.powi(2)
    }

    /// Returns the point on the segment's core line closest to the given
    /// point.
    pub fn closest_point(&self, point: &Position) -> Position {
        closest_point_on_line_segment(&self.a, &self.b, point)
    }

    fn validate(&self) -> Result<()> {
        if !(is_finite_point(&self.a) && is_finite_point(&self.b)) {
            bail!(
                "Segment has non-finite endpoints {:?} and {:?}",
                self.a,
                self.b
            );
        }
        if !(self.radius.is_finite() && self.radius >= 0.0) {
            bail!("Segment has invalid radius {}", self.radius);
        }
        if self.length() <= GEOMETRIC_EPSILON && self.radius <= GEOMETRIC_EPSILON {
            bail!("Segment has zero length and zero radius");
        }
        Ok(())
    }
}

impl ConvexPolygon {
    /// Creates a convex polygon with the given vertices. Clockwise vertices
    /// are reordered to counterclockwise.
    ///
    /// # Errors
    /// Returns an error if there are fewer than three vertices, if any vertex
    /// is not finite, if the area is zero or if the polygon is not convex.
    pub fn new(mut vertices: Vec<Position>) -> Result<Self> {
        if vertices.len() < 3 {
            bail!(
                "Polygon needs at least three vertices, got {}",
                vertices.len()
            );
        }
        if !vertices.iter().all(is_finite_point) {
            bail!("Polygon has non-finite vertices: {:?}", vertices);
        }

        let signed_area = compute_signed_area(&vertices);
        if signed_area.abs() <= GEOMETRIC_EPSILON {
            bail!("Polygon has zero area: {:?}", vertices);
        }
        if signed_area < 0.0 {
            vertices.reverse();
        }

        let n_vertices = vertices.len();
        for idx in 0..n_vertices {
            let edge = vertices[(idx + 1) % n_vertices] - vertices[idx];
            let next_edge = vertices[(idx + 2) % n_vertices] - vertices[(idx + 1) % n_vertices];
            if cross(&edge, &next_edge) < -GEOMETRIC_EPSILON {
                bail!("Polygon is not convex: {:?}", vertices);
            }
        }

        Ok(Self { vertices })
    }

    /// Creates an axis-aligned rectangle with the given extents, centered at
    /// the origin.
    ///
    /// # Errors
    /// Returns an error if either extent is not positive.
    pub fn rectangle(width: fph, height: fph) -> Result<Self> {
        if !(width > 0.0 && height > 0.0) {
            bail!("Invalid rectangle extents {} x {}", width, height);
        }
        let half_width = 0.5 * width;
        let half_height = 0.5 * height;
        Self::new(vec![
            point![-half_width, -half_height],
            point![half_width, -half_height],
            point![half_width, half_height],
            point![-half_width, half_height],
        ])
    }

    /// Creates an axis-aligned rectangle with the given extents, centered at
    /// the given point.
    ///
    /// # Errors
    /// Returns an error if either extent is not positive.
    pub fn rectangle_centered_at(center: &Position, width: fph, height: fph) -> Result<Self> {
        let mut rectangle = Self::rectangle(width, height)?;
        for vertex in &mut rectangle.vertices {
            *vertex += center.coords;
        }
        Ok(rectangle)
    }

    pub fn vertices(&self) -> &[Position] {
        &self.vertices
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn area(&self) -> fph {
        compute_signed_area(&self.vertices)
    }

    /// Returns the outward unit normal of the edge from vertex `idx` to vertex
    /// `idx + 1`.
    pub fn edge_normal(&self, idx: usize) -> Vector2<fph> {
        let edge = self.vertices[(idx + 1) % self.vertices.len()] - self.vertices[idx];
        Vector2::new(edge.y, -edge.x).normalize()
    }

    /// Whether the given point lies inside or on the boundary of the polygon.
    pub fn contains_point(&self, point: &Position) -> bool {
        (0..self.vertices.len())
            .all(|idx| self.edge_normal(idx).dot(&(point - self.vertices[idx])) <= 0.0)
    }
}

impl Aabb {
    pub fn around_point(center: &Position, half_extent: fph) -> Self {
        let offset = Vector2::repeat(half_extent);
        Self {
            min: center - offset,
            max: center + offset,
        }
    }

    /// # Panics
    /// If `points` is empty.
    pub fn enclosing_points(points: &[Position]) -> Self {
        let mut min = points[0];
        let mut max = points[0];
        for point in &points[1..] {
            min = min.inf(point);
            max = max.sup(point);
        }
        Self { min, max }
    }

    pub fn expanded_by(&self, margin: fph) -> Self {
        let offset = Vector2::repeat(margin);
        Self {
            min: self.min - offset,
            max: self.max + offset,
        }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// Returns the point on the line segment between `a` and `b` closest to the
/// given point.
pub fn closest_point_on_line_segment(a: &Position, b: &Position, point: &Position) -> Position {
    let edge = b - a;
    let length_squared = edge.norm_squared();
    if length_squared <= GEOMETRIC_EPSILON * GEOMETRIC_EPSILON {
        return *a;
    }
    let t = (edge.dot(&(point - a)) / length_squared).clamp(0.0, 1.0);
    a + edge * t
}

fn compute_signed_area(vertices: &[Position]) -> fph {
    let n_vertices = vertices.len();
    0.5 * (0..n_vertices)
        .map(|idx| {
            cross(
                &vertices[idx].coords,
                &vertices[(idx + 1) % n_vertices].coords,
            )
        })
        .sum::<fph>()
}

fn is_finite_point(point: &Position) -> bool {
    point.coords.iter().all(|coord| coord.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn rectangle_has_expected_area_and_winding() {
        let rectangle = ConvexPolygon::rectangle(100.0, 50.0).unwrap();
        assert_abs_diff_eq!(rectangle.area(), 5000.0);
        assert_eq!(rectangle.n_vertices(), 4);
        assert_abs_diff_eq!(rectangle.edge_normal(0), Vector2::new(0.0, -1.0));
        assert_abs_diff_eq!(rectangle.edge_normal(1), Vector2::new(1.0, 0.0));
    }

    #[test]
    fn clockwise_polygon_is_reordered() {
        let polygon = ConvexPolygon::new(vec![
            point![0.0, 0.0],
            point![0.0, 1.0],
            point![1.0, 1.0],
            point![1.0, 0.0],
        ])
        .unwrap();
        assert!(polygon.area() > 0.0);
    }

    #[test]
    fn degenerate_polygons_are_rejected() {
        assert!(ConvexPolygon::new(vec![point![0.0, 0.0], point![1.0, 0.0]]).is_err());
        assert!(
            ConvexPolygon::new(vec![point![0.0, 0.0], point![1.0, 0.0], point![2.0, 0.0]])
                .is_err()
        );
        assert!(ConvexPolygon::rectangle(0.0, 1.0).is_err());
    }

    #[test]
    fn non_convex_polygon_is_rejected() {
        assert!(
            ConvexPolygon::new(vec![
                point![0.0, 0.0],
                point![2.0, 0.0],
                point![1.0, 0.5],
                point![2.0, 2.0],
                point![0.0, 2.0],
            ])
            .is_err()
        );
    }

    #[test]
    fn degenerate_circles_and_segments_are_rejected() {
        assert!(
            ShapeGeometry::Circle(Circle::new(Position::origin(), 0.0))
                .validated()
                .is_err()
        );
        assert!(
            ShapeGeometry::Segment(Segment::new(point![1.0, 1.0], point![1.0, 1.0], 0.0))
                .validated()
                .is_err()
        );
        assert!(
            ShapeGeometry::Segment(Segment::new(point![1.0, 1.0], point![1.0, 1.0], 2.0))
                .validated()
                .is_ok()
        );
    }

    #[test]
    fn transformed_rectangle_has_rotated_corners() {
        let rectangle = ShapeGeometry::Polygon(ConvexPolygon::rectangle(4.0, 2.0).unwrap());
        let transformed = rectangle.transformed(&Pose::new(point![10.0, 0.0], FRAC_PI_2));
        let corners = transformed.corners();
        assert_abs_diff_eq!(corners[0], point![11.0, -2.0], epsilon = 1e-12);
        assert_abs_diff_eq!(corners[2], point![9.0, 2.0], epsilon = 1e-12);
    }

    #[test]
    fn aabb_overlap_works() {
        let a = Aabb::around_point(&Position::origin(), 1.0);
        let b = Aabb::around_point(&point![1.5, 1.5], 1.0);
        let c = Aabb::around_point(&point![3.0, 0.0], 0.5);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn closest_point_on_segment_is_clamped_to_endpoints() {
        let a = point![0.0, 0.0];
        let b = point![2.0, 0.0];
        assert_abs_diff_eq!(
            closest_point_on_line_segment(&a, &b, &point![1.0, 3.0]),
            point![1.0, 0.0]
        );
        assert_abs_diff_eq!(
            closest_point_on_line_segment(&a, &b, &point![-1.0, 3.0]),
            a
        );
    }

    #[test]
    fn polygon_contains_interior_point() {
        let rectangle = ConvexPolygon::rectangle(2.0, 2.0).unwrap();
        assert!(rectangle.contains_point(&point![0.5, -0.5]));
        assert!(!rectangle.contains_point(&point![1.5, 0.0]));
    }
}
