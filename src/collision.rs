//! Collision detection between shapes attached to rigid bodies.

mod narrow_phase;

use crate::{
    constraint::contact::ContactManifold,
    geometry::{Aabb, ShapeGeometry},
    material::Material,
    quantities::Pose,
    rigid_body::{RigidBodyID, RigidBodyManager},
};
use anyhow::{Result, anyhow};
use linkbox_utils::{DenseMap, define_id_newtype};

define_id_newtype! {
    /// Identifier for a [`Shape`] in a [`CollisionWorld`].
    [pub] ShapeID
}

/// A shape attached to a rigid body.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    /// The body the shape is attached to.
    pub body_id: RigidBodyID,
    /// The geometry of the shape in the reference frame of the body.
    pub geometry: ShapeGeometry,
    pub material: Material,
    /// Shapes sharing a nonzero group never collide with each other.
    pub group: u32,
}

/// Keeps track of all shapes and their world space geometry, and finds the
/// contacts between them.
#[derive(Clone, Debug)]
pub struct CollisionWorld {
    shapes: DenseMap<ShapeID, CollidableShape>,
    shape_id_counter: u64,
}

#[derive(Clone, Debug)]
struct CollidableShape {
    shape: Shape,
    world_geometry: ShapeGeometry,
    aabb: Aabb,
    body_is_static: bool,
}

/// A pair of colliding shapes along with their contacts.
#[derive(Clone, Debug)]
pub struct Collision<'a> {
    pub shape_a: ShapeID,
    pub shape_b: ShapeID,
    pub body_a: RigidBodyID,
    pub body_b: RigidBodyID,
    pub contact_manifold: &'a ContactManifold,
}

impl Shape {
    pub fn new(body_id: RigidBodyID, geometry: impl Into<ShapeGeometry>, material: Material) -> Self {
        Self {
            body_id,
            geometry: geometry.into(),
            material,
            group: 0,
        }
    }

    /// Sets the collision group of the shape.
    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }
}

impl CollisionWorld {
    pub fn new() -> Self {
        Self {
            shapes: DenseMap::new(),
            shape_id_counter: 0,
        }
    }

    /// The number of registered shapes.
    pub fn n_shapes(&self) -> usize {
        self.shapes.len()
    }

    /// Adds the given shape to the collision world and returns a new ID that
    /// can be used to refer to it.
    ///
    /// # Errors
    /// Returns an error if the body the shape is attached to does not exist or
    /// if the shape's geometry or material is invalid.
    pub fn add_shape(
        &mut self,
        rigid_body_manager: &RigidBodyManager,
        mut shape: Shape,
    ) -> Result<ShapeID> {
        let body = rigid_body_manager
            .get_rigid_body(shape.body_id)
            .ok_or_else(|| anyhow!("Shape references missing body {}", shape.body_id))?;

        shape.geometry = shape.geometry.validated()?;
        shape.material.validate()?;

        let collidable = CollidableShape::new(shape, &body.pose(), body.is_static());

        let id = self.create_new_shape_id();
        self.shapes.push(id, collidable);
        Ok(id)
    }

    /// Returns a reference to the [`Shape`] with the given ID, or [`None`] if
    /// it does not exist.
    pub fn get_shape(&self, id: ShapeID) -> Option<&Shape> {
        self.shapes.get(id).map(|collidable| &collidable.shape)
    }

    /// Returns the geometry of the shape with the given ID in world space as
    /// of the last synchronization, or [`None`] if the shape does not exist.
    pub fn get_world_geometry(&self, id: ShapeID) -> Option<&ShapeGeometry> {
        self.shapes
            .get(id)
            .map(|collidable| &collidable.world_geometry)
    }

    /// Returns an iterator over all shapes and their IDs in insertion order
    /// (apart from reordering caused by removals).
    pub fn shapes(&self) -> impl Iterator<Item = (ShapeID, &Shape)> {
        self.shapes
            .iter()
            .map(|(id, collidable)| (id, &collidable.shape))
    }

    /// Returns an iterator over the shapes attached to the given body.
    pub fn shapes_of_body(&self, body_id: RigidBodyID) -> impl Iterator<Item = (ShapeID, &Shape)> {
        self.shapes()
            .filter(move |(_, shape)| shape.body_id == body_id)
    }

    /// Removes all shapes attached to the given body.
    ///
    /// # Returns
    /// The number of removed shapes.
    pub fn remove_shapes_of_body(&mut self, body_id: RigidBodyID) -> usize {
        let n_shapes = self.shapes.len();
        self.shapes
            .retain(|_, collidable| collidable.shape.body_id != body_id);
        n_shapes - self.shapes.len()
    }

    /// Updates the world space geometry of every shape to match the current
    /// pose of its body.
    pub fn synchronize_shapes_with_rigid_bodies(&mut self, rigid_body_manager: &RigidBodyManager) {
        for collidable in self.shapes.values_mut() {
            let Some(body) = rigid_body_manager.get_rigid_body(collidable.shape.body_id) else {
                continue;
            };
            collidable.update_world_geometry(&body.pose(), body.is_static());
        }
    }

    /// Finds the contacts between all pairs of shapes that may collide and
    /// calls the given closure for every pair that has contacts. Shapes on the
    /// same body, shapes on two static bodies, shapes sharing a nonzero group
    /// and shapes on bodies for which `is_excluded` returns `true` are never
    /// tested. Pairs are visited in a deterministic order.
    pub fn for_each_collision(
        &self,
        is_excluded: impl Fn(RigidBodyID, RigidBodyID) -> bool,
        f: &mut impl FnMut(Collision<'_>),
    ) {
        let mut contact_manifold = ContactManifold::new();

        let ids: Vec<_> = self.shapes.keys().collect();
        let collidables = self.shapes.values();

        for (idx_a, (id_a, collidable_a)) in ids.iter().zip(collidables).enumerate() {
            for (id_b, collidable_b) in ids[idx_a + 1..].iter().zip(&collidables[idx_a + 1..]) {
                if !collidable_a.may_collide_with(collidable_b)
                    || is_excluded(collidable_a.shape.body_id, collidable_b.shape.body_id)
                    || !collidable_a.aabb.overlaps(&collidable_b.aabb)
                {
                    continue;
                }

                let response_params = collidable_a
                    .shape
                    .material
                    .contact_response
                    .combined(&collidable_b.shape.material.contact_response);

                narrow_phase::generate_contact_manifold(
                    *id_a,
                    &collidable_a.world_geometry,
                    *id_b,
                    &collidable_b.world_geometry,
                    &response_params,
                    &mut contact_manifold,
                );

                if !contact_manifold.is_empty() {
                    f(Collision {
                        shape_a: *id_a,
                        shape_b: *id_b,
                        body_a: collidable_a.shape.body_id,
                        body_b: collidable_b.shape.body_id,
                        contact_manifold: &contact_manifold,
                    });
                }
            }
        }
    }

    /// Removes all shapes.
    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    fn create_new_shape_id(&mut self) -> ShapeID {
        let id = ShapeID::from_u64(self.shape_id_counter);
        self.shape_id_counter = self.shape_id_counter.checked_add(1).unwrap();
        id
    }
}

impl Default for CollisionWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl CollidableShape {
    fn new(shape: Shape, body_pose: &Pose, body_is_static: bool) -> Self {
        let world_geometry = shape.geometry.transformed(body_pose);
        let aabb = world_geometry.compute_aabb();
        Self {
            shape,
            world_geometry,
            aabb,
            body_is_static,
        }
    }

    fn update_world_geometry(&mut self, body_pose: &Pose, body_is_static: bool) {
        self.world_geometry = self.shape.geometry.transformed(body_pose);
        self.aabb = self.world_geometry.compute_aabb();
        self.body_is_static = body_is_static;
    }

    fn may_collide_with(&self, other: &Self) -> bool {
        self.shape.body_id != other.shape.body_id
            && !(self.body_is_static && other.body_is_static)
            && (self.shape.group == 0 || self.shape.group != other.shape.group)
    }
}
