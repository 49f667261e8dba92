//! Contact generation between pairs of shapes.

use super::ShapeID;
use crate::{
    constraint::contact::{Contact, ContactGeometry, ContactID, ContactManifold, ContactWithID},
    fph,
    geometry::{Circle, GEOMETRIC_EPSILON, ShapeGeometry, closest_point_on_line_segment},
    material::ContactResponseParameters,
    quantities::Position,
};
use nalgebra::Vector2;
use tinyvec::ArrayVec;

/// Tolerance for preferring the first shape's face as reference face when
/// the separations along the faces of both shapes are similar.
const REFERENCE_FACE_TOLERANCE: fph = 1e-3;

/// Marks feature indices where the reference face belongs to shape B.
const FLIPPED_FEATURE_FLAG: u32 = 1 << 16;

/// Marks feature indices for points created by clipping an incident edge.
const CLIPPED_FEATURE_FLAG: u32 = 1 << 15;

/// A shape geometry reduced to what contact generation needs to distinguish.
#[derive(Clone, Debug)]
enum Primitive {
    Round(Circle),
    Hull(Hull),
}

/// A convex hull (a polygon, or a line segment seen as a two-sided polygon)
/// thickened by a radius.
#[derive(Clone, Debug)]
struct Hull {
    vertices: Vec<Position>,
    normals: Vec<Vector2<fph>>,
    radius: fph,
}

#[derive(Clone, Copy, Debug)]
struct ClipVertex {
    point: Position,
    feature_idx: u32,
}

impl Default for ClipVertex {
    fn default() -> Self {
        Self {
            point: Position::origin(),
            feature_idx: 0,
        }
    }
}

/// Finds the contacts between the two given shapes, whose geometries must be
/// in world space, and adds them to the given manifold after clearing it.
/// The contacts follow the convention of [`ContactGeometry`], with shape A
/// as the first shape.
pub(super) fn generate_contact_manifold(
    shape_a_id: ShapeID,
    geometry_a: &ShapeGeometry,
    shape_b_id: ShapeID,
    geometry_b: &ShapeGeometry,
    response_params: &ContactResponseParameters,
    contact_manifold: &mut ContactManifold,
) {
    contact_manifold.clear();

    let mut add_contact = |feature_idx: u32, geometry: ContactGeometry| {
        contact_manifold.add_contact(ContactWithID {
            id: ContactID::from_shape_ids_and_feature(shape_a_id, shape_b_id, feature_idx),
            contact: Contact {
                geometry,
                response_params: *response_params,
            },
        });
    };

    match (Primitive::of(geometry_a), Primitive::of(geometry_b)) {
        (Primitive::Round(circle_a), Primitive::Round(circle_b)) => {
            if let Some(geometry) = generate_circle_circle_contact(&circle_a, &circle_b) {
                add_contact(0, geometry);
            }
        }
        (Primitive::Round(circle_a), Primitive::Hull(hull_b)) => {
            if let Some((feature_idx, geometry)) = generate_circle_hull_contact(&circle_a, &hull_b)
            {
                add_contact(feature_idx, geometry);
            }
        }
        (Primitive::Hull(hull_a), Primitive::Round(circle_b)) => {
            if let Some((feature_idx, geometry)) = generate_circle_hull_contact(&circle_b, &hull_a)
            {
                add_contact(feature_idx, geometry.swapped());
            }
        }
        (Primitive::Hull(hull_a), Primitive::Hull(hull_b)) => {
            generate_hull_hull_contacts(&hull_a, &hull_b, &mut add_contact);
        }
    }
}

impl Primitive {
    fn of(geometry: &ShapeGeometry) -> Self {
        match geometry {
            ShapeGeometry::Circle(circle) => Self::Round(*circle),
            ShapeGeometry::Segment(segment) => {
                let edge = segment.b - segment.a;
                let length = edge.norm();
                if length <= GEOMETRIC_EPSILON {
                    return Self::Round(Circle::new(segment.a, segment.radius));
                }
                let normal = Vector2::new(edge.y, -edge.x) / length;
                Self::Hull(Hull {
                    vertices: vec![segment.a, segment.b],
                    normals: vec![normal, -normal],
                    radius: segment.radius,
                })
            }
            ShapeGeometry::Polygon(polygon) => Self::Hull(Hull {
                vertices: polygon.vertices().to_vec(),
                normals: (0..polygon.n_vertices())
                    .map(|idx| polygon.edge_normal(idx))
                    .collect(),
                radius: 0.0,
            }),
        }
    }
}

impl Hull {
    fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn vertex(&self, idx: usize) -> &Position {
        &self.vertices[idx % self.vertices.len()]
    }
}

fn generate_circle_circle_contact(circle_a: &Circle, circle_b: &Circle) -> Option<ContactGeometry> {
    let displacement = circle_a.center - circle_b.center;
    let distance = displacement.norm();
    let total_radius = circle_a.radius + circle_b.radius;

    if distance > total_radius {
        return None;
    }

    let normal = if distance > GEOMETRIC_EPSILON {
        displacement / distance
    } else {
        Vector2::x()
    };

    Some(ContactGeometry {
        position: circle_b.center + normal * circle_b.radius,
        surface_normal: normal,
        penetration_depth: total_radius - distance,
    })
}

/// Generates the contact between a circle (shape A) and a hull (shape B),
/// along with the index of the hull face involved.
fn generate_circle_hull_contact(circle: &Circle, hull: &Hull) -> Option<(u32, ContactGeometry)> {
    let center = circle.center;
    let total_radius = circle.radius + hull.radius;

    let (face_idx, separation) = (0..hull.n_vertices())
        .map(|idx| (idx, hull.normals[idx].dot(&(center - hull.vertices[idx]))))
        .fold((0, fph::NEG_INFINITY), |max, current| {
            if current.1 > max.1 { current } else { max }
        });

    if separation > total_radius {
        return None;
    }

    if separation <= 0.0 {
        // The center is inside the core of the hull, so we push out through
        // the least penetrated face
        let normal = hull.normals[face_idx];
        return Some((
            face_idx as u32,
            ContactGeometry {
                position: center - (separation - hull.radius) * normal,
                surface_normal: normal,
                penetration_depth: total_radius - separation,
            },
        ));
    }

    let (edge_idx, closest_point) = (0..hull.n_vertices())
        .map(|idx| {
            (
                idx,
                closest_point_on_line_segment(hull.vertex(idx), hull.vertex(idx + 1), &center),
            )
        })
        .min_by(|(_, p), (_, q)| {
            (center - p)
                .norm_squared()
                .total_cmp(&(center - q).norm_squared())
        })?;

    let displacement = center - closest_point;
    let distance = displacement.norm();
    if distance > total_radius {
        return None;
    }

    let normal = if distance > GEOMETRIC_EPSILON {
        displacement / distance
    } else {
        hull.normals[face_idx]
    };

    Some((
        edge_idx as u32,
        ContactGeometry {
            position: closest_point + hull.radius * normal,
            surface_normal: normal,
            penetration_depth: total_radius - distance,
        },
    ))
}

/// Generates up to two contacts between hull A and hull B by clipping the
/// incident edge of one hull against the reference face of the other.
fn generate_hull_hull_contacts(
    hull_a: &Hull,
    hull_b: &Hull,
    add_contact: &mut impl FnMut(u32, ContactGeometry),
) {
    let total_radius = hull_a.radius + hull_b.radius;

    let (edge_a, separation_a) = find_max_separation(hull_a, hull_b);
    if separation_a > total_radius {
        return;
    }

    let (edge_b, separation_b) = find_max_separation(hull_b, hull_a);
    if separation_b > total_radius {
        return;
    }

    let (reference, incident, reference_edge, flipped) =
        if separation_b > separation_a + REFERENCE_FACE_TOLERANCE {
            (hull_b, hull_a, edge_b, true)
        } else {
            (hull_a, hull_b, edge_a, false)
        };

    let reference_normal = reference.normals[reference_edge];
    let incident_edge = find_incident_edge(incident, &reference_normal);

    let incident_vertices = [
        ClipVertex {
            point: *incident.vertex(incident_edge),
            feature_idx: incident_edge as u32,
        },
        ClipVertex {
            point: *incident.vertex(incident_edge + 1),
            feature_idx: ((incident_edge + 1) % incident.n_vertices()) as u32,
        },
    ];

    let reference_start = *reference.vertex(reference_edge);
    let reference_end = *reference.vertex(reference_edge + 1);
    let tangent = (reference_end - reference_start).normalize();

    let front_offset = reference_normal.dot(&reference_start.coords);
    let side_offset_start = -tangent.dot(&reference_start.coords) + total_radius;
    let side_offset_end = tangent.dot(&reference_end.coords) + total_radius;

    let clipped = clip_segment_to_line(&incident_vertices, &(-tangent), side_offset_start);
    if clipped.len() < 2 {
        return;
    }
    let clipped = clip_segment_to_line(&[clipped[0], clipped[1]], &tangent, side_offset_end);
    if clipped.len() < 2 {
        return;
    }

    for clip_vertex in clipped {
        let separation = reference_normal.dot(&clip_vertex.point.coords) - front_offset;
        if separation > total_radius {
            continue;
        }

        let mut feature_idx = ((reference_edge as u32) << 8) | clip_vertex.feature_idx;
        if flipped {
            feature_idx |= FLIPPED_FEATURE_FLAG;
        }

        let penetration_depth = total_radius - separation;

        let geometry = if flipped {
            // B holds the reference face, so its face normal already points
            // towards A, and the deepest point on B lies on that face
            ContactGeometry {
                position: clip_vertex.point - (separation - hull_b.radius) * reference_normal,
                surface_normal: reference_normal,
                penetration_depth,
            }
        } else {
            // A holds the reference face and the clipped points lie on B
            ContactGeometry {
                position: clip_vertex.point - hull_b.radius * reference_normal,
                surface_normal: -reference_normal,
                penetration_depth,
            }
        };

        add_contact(feature_idx, geometry);
    }
}

/// Finds the face of `hull` along whose normal `other` is most separated from
/// it, returning the face index and the separation (negative when
/// penetrating).
fn find_max_separation(hull: &Hull, other: &Hull) -> (usize, fph) {
    let mut best_idx = 0;
    let mut max_separation = fph::NEG_INFINITY;

    for (idx, (vertex, normal)) in hull.vertices.iter().zip(&hull.normals).enumerate() {
        let separation = other
            .vertices
            .iter()
            .map(|other_vertex| normal.dot(&(other_vertex - vertex)))
            .fold(fph::INFINITY, fph::min);

        if separation > max_separation {
            max_separation = separation;
            best_idx = idx;
        }
    }

    (best_idx, max_separation)
}

/// Finds the edge of the hull whose normal is most antiparallel to the given
/// reference normal.
fn find_incident_edge(hull: &Hull, reference_normal: &Vector2<fph>) -> usize {
    hull.normals
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| reference_normal.dot(a).total_cmp(&reference_normal.dot(b)))
        .map_or(0, |(idx, _)| idx)
}

/// Clips the segment between the two given vertices to the half-plane of
/// points `p` with `normal.dot(p) <= offset`.
fn clip_segment_to_line(
    vertices: &[ClipVertex; 2],
    normal: &Vector2<fph>,
    offset: fph,
) -> ArrayVec<[ClipVertex; 2]> {
    let mut clipped = ArrayVec::new();

    let distance_0 = normal.dot(&vertices[0].point.coords) - offset;
    let distance_1 = normal.dot(&vertices[1].point.coords) - offset;

    if distance_0 <= 0.0 {
        clipped.push(vertices[0]);
    }
    if distance_1 <= 0.0 {
        clipped.push(vertices[1]);
    }

    if distance_0 * distance_1 < 0.0 {
        let fraction = distance_0 / (distance_0 - distance_1);
        let (inside, outside) = if distance_0 < 0.0 {
            (vertices[0], vertices[1])
        } else {
            (vertices[1], vertices[0])
        };
        clipped.push(ClipVertex {
            point: vertices[0].point + fraction * (vertices[1].point - vertices[0].point),
            feature_idx: outside.feature_idx | CLIPPED_FEATURE_FLAG | (inside.feature_idx << 4),
        });
    }

    clipped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::{ConvexPolygon, Segment},
        quantities::Pose,
    };
    use approx::assert_abs_diff_eq;
    use nalgebra::{point, vector};

    fn contacts_between(
        geometry_a: &ShapeGeometry,
        geometry_b: &ShapeGeometry,
    ) -> Vec<ContactGeometry> {
        let mut manifold = ContactManifold::new();
        generate_contact_manifold(
            ShapeID::from_u64(0),
            geometry_a,
            ShapeID::from_u64(1),
            geometry_b,
            &ContactResponseParameters::default(),
            &mut manifold,
        );
        manifold
            .contacts()
            .iter()
            .map(|contact| contact.contact.geometry.clone())
            .collect()
    }

    fn rectangle_at(center: Position, width: fph, height: fph) -> ShapeGeometry {
        ShapeGeometry::Polygon(ConvexPolygon::rectangle_centered_at(&center, width, height).unwrap())
    }

    #[test]
    fn overlapping_circles_give_single_contact() {
        let a = ShapeGeometry::Circle(Circle::new(point![0.0, 0.0], 1.0));
        let b = ShapeGeometry::Circle(Circle::new(point![1.5, 0.0], 1.0));

        let contacts = contacts_between(&a, &b);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![-1.0, 0.0]);
        assert_abs_diff_eq!(contacts[0].penetration_depth, 0.5);
        assert_abs_diff_eq!(contacts[0].position, point![0.5, 0.0]);
        assert_abs_diff_eq!(contacts[0].position_on_a(), point![1.0, 0.0]);
    }

    #[test]
    fn separated_circles_give_no_contacts() {
        let a = ShapeGeometry::Circle(Circle::new(point![0.0, 0.0], 1.0));
        let b = ShapeGeometry::Circle(Circle::new(point![2.5, 0.0], 1.0));
        assert!(contacts_between(&a, &b).is_empty());
    }

    #[test]
    fn circle_resting_on_box_gets_upward_normal() {
        // y points down, so the box below the circle has larger y
        let circle = ShapeGeometry::Circle(Circle::new(point![0.0, -0.9], 1.0));
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&circle, &ground);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![0.0, -1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].penetration_depth, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].position, point![0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn box_against_circle_gives_swapped_contact() {
        let circle = ShapeGeometry::Circle(Circle::new(point![0.0, -0.9], 1.0));
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&ground, &circle);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![0.0, 1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].position_on_a(), point![0.0, 0.0], epsilon = 1e-12);
    }

    #[test]
    fn circle_with_center_inside_box_is_pushed_out_through_nearest_face() {
        let circle = ShapeGeometry::Circle(Circle::new(point![0.0, 0.5], 1.0));
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&circle, &ground);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![0.0, -1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].penetration_depth, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn box_resting_on_box_gives_two_contacts() {
        let upper = rectangle_at(point![0.0, -0.9], 2.0, 2.0);
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&upper, &ground);
        assert_eq!(contacts.len(), 2);
        for contact in &contacts {
            assert_abs_diff_eq!(contact.surface_normal, vector![0.0, -1.0], epsilon = 1e-12);
            assert_abs_diff_eq!(contact.penetration_depth, 0.1, epsilon = 1e-9);
            assert_abs_diff_eq!(contact.position.y, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(contact.position_on_a().y, 0.1, epsilon = 1e-9);
        }
        let mut xs: Vec<_> = contacts.iter().map(|contact| contact.position.x).collect();
        xs.sort_by(fph::total_cmp);
        assert_abs_diff_eq!(xs[0], -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(xs[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn contacts_have_same_geometry_regardless_of_order() {
        let upper = rectangle_at(point![0.3, -0.9], 2.0, 2.0);
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let forward = contacts_between(&upper, &ground);
        let backward = contacts_between(&ground, &upper);
        assert_eq!(forward.len(), backward.len());

        for contact in &forward {
            let swapped = contact.swapped();
            assert!(backward.iter().any(|other| {
                (other.surface_normal - swapped.surface_normal).norm() < 1e-9
                    && (other.penetration_depth - swapped.penetration_depth).abs() < 1e-9
                    && (other.position - swapped.position).norm() < 1e-9
            }));
        }
    }

    #[test]
    fn separated_boxes_give_no_contacts() {
        let a = rectangle_at(point![0.0, 0.0], 2.0, 2.0);
        let b = rectangle_at(point![2.5, 0.0], 2.0, 2.0);
        assert!(contacts_between(&a, &b).is_empty());
    }

    #[test]
    fn rotated_box_corner_touches_ground_with_one_contact() {
        let diamond = ShapeGeometry::Polygon(ConvexPolygon::rectangle(2.0, 2.0).unwrap())
            .transformed(&Pose::new(point![0.0, -1.3], std::f64::consts::FRAC_PI_4));
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&diamond, &ground);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![0.0, -1.0], epsilon = 1e-9);
        assert_abs_diff_eq!(
            contacts[0].penetration_depth,
            std::f64::consts::SQRT_2 - 1.3,
            epsilon = 1e-9
        );
    }

    #[test]
    fn thick_segment_on_box_accounts_for_radius() {
        let segment = ShapeGeometry::Segment(Segment::new(point![-1.0, -0.4], point![1.0, -0.4], 0.5));
        let ground = rectangle_at(point![0.0, 5.0], 20.0, 10.0);

        let contacts = contacts_between(&segment, &ground);
        assert_eq!(contacts.len(), 2);
        for contact in &contacts {
            assert_abs_diff_eq!(contact.surface_normal, vector![0.0, -1.0], epsilon = 1e-12);
            assert_abs_diff_eq!(contact.penetration_depth, 0.1, epsilon = 1e-9);
        }
    }

    #[test]
    fn circle_touching_segment_side_gets_segment_normal() {
        let circle = ShapeGeometry::Circle(Circle::new(point![0.0, -1.0], 0.6));
        let segment = ShapeGeometry::Segment(Segment::new(point![-2.0, 0.0], point![2.0, 0.0], 0.5));

        let contacts = contacts_between(&circle, &segment);
        assert_eq!(contacts.len(), 1);
        assert_abs_diff_eq!(contacts[0].surface_normal, vector![0.0, -1.0], epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].penetration_depth, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(contacts[0].position, point![0.0, -0.5], epsilon = 1e-12);
    }
}
