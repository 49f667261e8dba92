//! Snapshots of the world for presentation.

use crate::{
    collision::ShapeID,
    constraint::JointID,
    fph,
    geometry::ShapeGeometry,
    quantities::{Pose, Position},
    rigid_body::RigidBodyID,
    world::World,
};
use anyhow::Result;
use nalgebra::vector;

/// The world space geometry of every shape and joint at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSnapshot {
    pub frame: u64,
    pub simulation_time: fph,
    pub shapes: Vec<ShapeOutline>,
    pub joints: Vec<JointAnchors>,
}

/// The outline of a shape in world space.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeOutline {
    pub shape_id: ShapeID,
    pub body_id: RigidBodyID,
    pub body_pose: Pose,
    pub outline: Outline,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outline {
    /// A circle with a marker point on its rim showing the rotation of the
    /// body.
    Circle {
        center: Position,
        radius: fph,
        marker: Position,
    },
    Segment {
        a: Position,
        b: Position,
        radius: fph,
    },
    Polygon {
        vertices: Vec<Position>,
    },
}

/// The world space anchor points of a joint.
#[derive(Clone, Debug, PartialEq)]
pub struct JointAnchors {
    pub joint_id: JointID,
    pub kind: &'static str,
    pub anchor_a: Position,
    pub anchor_b: Position,
    /// For slide joints, whether the joint is engaged.
    pub engaged: Option<bool>,
}

/// Presents snapshots of the world.
pub trait Renderer {
    /// Presents the given snapshot.
    ///
    /// # Errors
    /// Returns an error if presentation fails.
    fn present(&mut self, snapshot: &RenderSnapshot) -> Result<()>;
}

/// A [`Renderer`] reporting snapshots through the log.
#[derive(Clone, Debug)]
pub struct LogRenderer {
    report_interval: u64,
    n_presented: u64,
}

impl RenderSnapshot {
    /// Captures the current state of the given world.
    pub fn capture(world: &World, frame: u64) -> Self {
        let shapes = world
            .collision_world()
            .shapes()
            .filter_map(|(shape_id, shape)| {
                let body_pose = world.get_body(shape.body_id)?.pose();
                let outline = Outline::new(&shape.geometry.transformed(&body_pose), &body_pose);
                Some(ShapeOutline {
                    shape_id,
                    body_id: shape.body_id,
                    body_pose,
                    outline,
                })
            })
            .collect();

        let joints = world
            .joints()
            .filter_map(|(joint_id, joint)| {
                let (anchor_a, anchor_b) = joint.anchors()?;
                let pose_a = world.get_body(joint.body_a)?.pose();
                let pose_b = world.get_body(joint.body_b)?.pose();
                Some(JointAnchors {
                    joint_id,
                    kind: joint.kind.name(),
                    anchor_a: pose_a.transform_point(&anchor_a),
                    anchor_b: pose_b.transform_point(&anchor_b),
                    engaged: joint.as_slide().map(|slide| slide.is_engaged()),
                })
            })
            .collect();

        Self {
            frame,
            simulation_time: world.simulation_time(),
            shapes,
            joints,
        }
    }
}

impl Outline {
    fn new(world_geometry: &ShapeGeometry, body_pose: &Pose) -> Self {
        match world_geometry {
            ShapeGeometry::Circle(circle) => Self::Circle {
                center: circle.center,
                radius: circle.radius,
                marker: circle.center + body_pose.transform_vector(&vector![circle.radius, 0.0]),
            },
            ShapeGeometry::Segment(segment) => Self::Segment {
                a: segment.a,
                b: segment.b,
                radius: segment.radius,
            },
            ShapeGeometry::Polygon(polygon) => Self::Polygon {
                vertices: polygon.vertices().to_vec(),
            },
        }
    }
}

impl LogRenderer {
    /// Creates a renderer that reports every `report_interval`th snapshot. An
    /// interval of zero disables reporting.
    pub fn new(report_interval: u64) -> Self {
        Self {
            report_interval,
            n_presented: 0,
        }
    }

    /// The number of snapshots presented so far.
    pub fn n_presented(&self) -> u64 {
        self.n_presented
    }
}

impl Renderer for LogRenderer {
    fn present(&mut self, snapshot: &RenderSnapshot) -> Result<()> {
        self.n_presented += 1;

        if self.report_interval == 0 || snapshot.frame % self.report_interval != 0 {
            return Ok(());
        }

        log::info!(
            "Frame {} at t = {:.2}: {} shapes, {} joints ({} engaged)",
            snapshot.frame,
            snapshot.simulation_time,
            snapshot.shapes.len(),
            snapshot.joints.len(),
            snapshot
                .joints
                .iter()
                .filter(|joint| joint.engaged == Some(true))
                .count()
        );
        for shape in &snapshot.shapes {
            log::debug!(
                "Body {} at ({:.1}, {:.1}) angle {:.3}",
                shape.body_id,
                shape.body_pose.position.x,
                shape.body_pose.position.y,
                shape.body_pose.angle
            );
        }
        Ok(())
    }
}
