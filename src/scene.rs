//! Construction of linkage scenes from descriptions.

use crate::{
    collision::Shape,
    constraint::{
        Joint, JointID, JointKind, damped_rotary_spring::DampedRotarySpring, gear::GearJoint,
        groove::GrooveJoint, motor::SimpleMotor, pin::PinJoint, pivot::PivotJoint,
        rotary_limit::RotaryLimitJoint, slide::SlideJoint,
    },
    fph,
    geometry::{Circle, ConvexPolygon, ShapeGeometry},
    hit_test::RectangleCorner,
    material::Material,
    quantities::{Pose, Position},
    rigid_body::{RigidBodyID, RigidBodyKind},
    world::World,
};
use anyhow::{Context, Result, bail};
use nalgebra::point;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_4;

/// A description of a scene: a linkage of rectangular segments laid out left
/// to right, where each neighboring pair is joined by a top and a bottom
/// lockable slide joint, along with optional ground, free bodies, lockable
/// links and extra joints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    /// The position of the midpoint of the left edge of the first segment.
    pub origin: Position,
    pub segments: Vec<SegmentDescription>,
    /// Whether to attach the left edge of the first segment to the static
    /// world body with a hinge.
    pub anchor_first: bool,
    /// Whether to attach the right edge of the last segment to the static
    /// world body with a hinge.
    pub anchor_last: bool,
    /// Whether the hinge joints start out engaged.
    pub engaged: bool,
    /// How far the anchors of a disengaged hinge or link joint may separate.
    /// Uses the simulator configuration when absent.
    pub unlock_distance: Option<fph>,
    /// Whether neighboring segments collide with each other.
    pub collide_linked_segments: bool,
    pub ground: Option<GroundDescription>,
    pub bodies: Vec<BodyDescription>,
    pub links: Vec<LinkDescription>,
    pub joints: Vec<JointDescription>,
}

/// A rectangular segment of a linkage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescription {
    pub width: fph,
    pub height: fph,
    pub density: fph,
}

/// A static rectangular ground.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundDescription {
    pub center: Position,
    pub width: fph,
    pub height: fph,
}

/// A body with a single shape that is not part of the linkage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyDescription {
    pub kind: RigidBodyKind,
    pub pose: Pose,
    pub geometry: ShapeGeometry,
    pub material: Material,
}

/// A joint between any two bodies of the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointDescription {
    pub body_a: BodyRef,
    pub body_b: BodyRef,
    pub kind: JointKind,
    pub collide_bodies: bool,
}

/// A lockable slide joint between any two bodies of the scene. Links share
/// the unlock distance, initial engagement and collision setting of the
/// hinges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkDescription {
    pub body_a: BodyRef,
    pub body_b: BodyRef,
    /// The anchor point on body A, in A's reference frame.
    pub anchor_a: Position,
    /// The anchor point on body B, in B's reference frame.
    pub anchor_b: Position,
}

/// Reference to a body in a [`SceneDescription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyRef {
    /// The static world body.
    World,
    /// The static ground.
    Ground,
    /// The linkage segment with the given index.
    Segment(usize),
    /// The free body with the given index.
    Body(usize),
}

/// The predefined scenes.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    /// A three-segment lockable finger anchored at its base.
    Finger,
    /// Two rectangles joined by a single slide joint, dropped onto the ground.
    Pair,
    /// A motor, gears, a damped spring with a rotary limit, a groove and a pin.
    Mechanisms,
}

/// The bodies and joints created for a [`SceneDescription`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    segments: Vec<RigidBodyID>,
    hinges: Vec<Hinge>,
    ground: Option<RigidBodyID>,
    bodies: Vec<RigidBodyID>,
    links: Vec<JointID>,
    joints: Vec<JointID>,
}

/// A pair of slide joints along the shared edge of two neighboring bodies,
/// one at the top corners and one at the bottom corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hinge {
    pub body_a: RigidBodyID,
    pub body_b: RigidBodyID,
    pub top: JointID,
    pub bottom: JointID,
}

/// Populates the world with the bodies, shapes and joints of the given scene
/// description.
///
/// # Errors
/// Returns an error if the description is invalid. The world may then be left
/// partially populated.
pub fn build_scene(world: &mut World, description: &SceneDescription) -> Result<Scene> {
    description.validate()?;

    let unlock_distance = description
        .unlock_distance
        .unwrap_or(world.config().unlock_distance);

    let mut scene = Scene::default();

    if let Some(ground) = &description.ground {
        scene.ground = Some(build_ground(world, ground)?);
    }

    let mut left_edge_x = description.origin.x;
    for (idx, segment) in description.segments.iter().enumerate() {
        let center = point![left_edge_x + 0.5 * segment.width, description.origin.y];
        let body = world.create_body(RigidBodyKind::Dynamic, Pose::unrotated(center));
        world
            .attach_shape(Shape::new(
                body,
                ConvexPolygon::rectangle(segment.width, segment.height)?,
                Material::with_density(segment.density),
            ))
            .with_context(|| format!("Invalid segment {}", idx))?;
        scene.segments.push(body);
        left_edge_x += segment.width;
    }

    let hinge_builder = HingeBuilder {
        unlock_distance,
        engaged: description.engaged,
        collide_bodies: description.collide_linked_segments,
    };

    if description.anchor_first {
        let first = &description.segments[0];
        scene.hinges.push(hinge_builder.attach_to_world(
            world,
            scene.segments[0],
            first,
            [RectangleCorner::TopLeft, RectangleCorner::BottomLeft],
        )?);
    }

    for (idx, pair) in description.segments.windows(2).enumerate() {
        scene.hinges.push(hinge_builder.link(
            world,
            (scene.segments[idx], &pair[0]),
            (scene.segments[idx + 1], &pair[1]),
        )?);
    }

    if description.anchor_last {
        let last_idx = description.segments.len() - 1;
        scene.hinges.push(hinge_builder.attach_to_world(
            world,
            scene.segments[last_idx],
            &description.segments[last_idx],
            [RectangleCorner::TopRight, RectangleCorner::BottomRight],
        )?);
    }

    for (idx, body) in description.bodies.iter().enumerate() {
        let id = world.create_body(body.kind, body.pose);
        world
            .attach_shape(Shape::new(id, body.geometry.clone(), body.material))
            .with_context(|| format!("Invalid body {}", idx))?;
        scene.bodies.push(id);
    }

    for (idx, link) in description.links.iter().enumerate() {
        let body_a = scene.resolve(world, link.body_a)?;
        let body_b = scene.resolve(world, link.body_b)?;
        let id = hinge_builder
            .create_joint(world, body_a, body_b, (link.anchor_a, link.anchor_b))
            .with_context(|| format!("Invalid link {}", idx))?;
        scene.links.push(id);
    }

    for (idx, joint) in description.joints.iter().enumerate() {
        let body_a = scene.resolve(world, joint.body_a)?;
        let body_b = scene.resolve(world, joint.body_b)?;
        let id = world
            .create_joint(
                Joint::new(body_a, body_b, joint.kind.clone())
                    .with_collide_bodies(joint.collide_bodies),
            )
            .with_context(|| format!("Invalid joint {}", idx))?;
        scene.joints.push(id);
    }

    log::info!(
        "Built scene with {} segments, {} hinges, {} free bodies, {} links and {} extra joints",
        scene.segments.len(),
        scene.hinges.len(),
        scene.bodies.len(),
        scene.links.len(),
        scene.joints.len()
    );

    Ok(scene)
}

impl SceneDescription {
    /// # Errors
    /// Returns an error if segment extents or densities are not positive, if
    /// the linkage is anchored without segments or if the unlock distance is
    /// negative.
    pub fn validate(&self) -> Result<()> {
        for (idx, segment) in self.segments.iter().enumerate() {
            if !(segment.width > 0.0 && segment.height > 0.0) {
                bail!(
                    "Segment {} has invalid extents {} x {}",
                    idx,
                    segment.width,
                    segment.height
                );
            }
            if !(segment.density.is_finite() && segment.density > 0.0) {
                bail!("Segment {} has invalid density {}", idx, segment.density);
            }
        }
        if (self.anchor_first || self.anchor_last) && self.segments.is_empty() {
            bail!("Cannot anchor a linkage without segments");
        }
        if let Some(unlock_distance) = self.unlock_distance {
            if !(unlock_distance.is_finite() && unlock_distance >= 0.0) {
                bail!("Invalid unlock distance {}", unlock_distance);
            }
        }
        Ok(())
    }
}

impl Default for SceneDescription {
    fn default() -> Self {
        Self {
            origin: Position::origin(),
            segments: Vec::new(),
            anchor_first: false,
            anchor_last: false,
            engaged: true,
            unlock_distance: None,
            collide_linked_segments: false,
            ground: None,
            bodies: Vec::new(),
            links: Vec::new(),
            joints: Vec::new(),
        }
    }
}

impl SegmentDescription {
    pub fn new(width: fph, height: fph) -> Self {
        Self {
            width,
            height,
            density: 1.0,
        }
    }
}

impl BodyDescription {
    pub fn dynamic(pose: Pose, geometry: impl Into<ShapeGeometry>) -> Self {
        Self {
            kind: RigidBodyKind::Dynamic,
            pose,
            geometry: geometry.into(),
            material: Material::default(),
        }
    }
}

impl JointDescription {
    /// Describes a joint of the given kind whose bodies may not collide.
    pub fn new(body_a: BodyRef, body_b: BodyRef, kind: impl Into<JointKind>) -> Self {
        Self {
            body_a,
            body_b,
            kind: kind.into(),
            collide_bodies: false,
        }
    }
}

impl Preset {
    /// Returns the description of the preset scene.
    ///
    /// # Errors
    /// Returns an error if any of the preset shapes is invalid.
    pub fn description(&self) -> Result<SceneDescription> {
        match self {
            Self::Finger => finger(),
            Self::Pair => pair(),
            Self::Mechanisms => mechanisms(),
        }
    }
}

impl Scene {
    /// The bodies of the linkage segments, in order from left to right.
    pub fn segments(&self) -> &[RigidBodyID] {
        &self.segments
    }

    /// The hinges of the linkage, in order from left to right.
    pub fn hinges(&self) -> &[Hinge] {
        &self.hinges
    }

    pub fn ground(&self) -> Option<RigidBodyID> {
        self.ground
    }

    /// The free bodies, in description order.
    pub fn bodies(&self) -> &[RigidBodyID] {
        &self.bodies
    }

    /// The slide joints of the links, in description order.
    pub fn links(&self) -> &[JointID] {
        &self.links
    }

    /// The extra joints, in description order.
    pub fn joints(&self) -> &[JointID] {
        &self.joints
    }

    /// The body that push and twist actions act on: the last segment, or the
    /// last free body if there are no segments.
    pub fn tip(&self) -> Option<RigidBodyID> {
        self.segments
            .last()
            .or_else(|| self.bodies.last())
            .copied()
    }

    /// Flips the engagement state of both joints of the hinge with the given
    /// index.
    ///
    /// # Returns
    /// Whether the hinge is engaged after toggling.
    ///
    /// # Errors
    /// Returns an error if there is no hinge with the given index or its
    /// joints no longer exist.
    pub fn toggle_hinge(&self, world: &mut World, idx: usize) -> Result<bool> {
        let Some(hinge) = self.hinges.get(idx) else {
            bail!("No hinge with index {}", idx);
        };
        let engaged = world.toggle_slide_joint(hinge.top)?;
        world.set_slide_joint_engaged(hinge.bottom, engaged)?;
        Ok(engaged)
    }

    /// Engages or disengages every hinge.
    ///
    /// # Errors
    /// Returns an error if any hinge joint no longer exists.
    pub fn set_all_hinges_engaged(&self, world: &mut World, engaged: bool) -> Result<()> {
        for hinge in &self.hinges {
            world.set_slide_joint_engaged(hinge.top, engaged)?;
            world.set_slide_joint_engaged(hinge.bottom, engaged)?;
        }
        Ok(())
    }

    /// Whether every hinge is engaged.
    pub fn all_hinges_engaged(&self, world: &World) -> bool {
        self.hinges.iter().all(|hinge| {
            [hinge.top, hinge.bottom].iter().all(|&id| {
                world
                    .get_joint(id)
                    .and_then(Joint::as_slide)
                    .is_some_and(SlideJoint::is_engaged)
            })
        })
    }

    fn resolve(&self, world: &World, body: BodyRef) -> Result<RigidBodyID> {
        match body {
            BodyRef::World => Ok(world.static_body_id()),
            BodyRef::Ground => self
                .ground
                .context("Joint references ground, but the scene has none"),
            BodyRef::Segment(idx) => self
                .segments
                .get(idx)
                .copied()
                .with_context(|| format!("Joint references missing segment {}", idx)),
            BodyRef::Body(idx) => self
                .bodies
                .get(idx)
                .copied()
                .with_context(|| format!("Joint references missing body {}", idx)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct HingeBuilder {
    unlock_distance: fph,
    engaged: bool,
    collide_bodies: bool,
}

impl HingeBuilder {
    /// Joins the right edge of segment A to the left edge of segment B. The
    /// anchors use the smaller of the two heights so that they coincide.
    fn link(
        &self,
        world: &mut World,
        (body_a, segment_a): (RigidBodyID, &SegmentDescription),
        (body_b, segment_b): (RigidBodyID, &SegmentDescription),
    ) -> Result<Hinge> {
        let height = fph::min(segment_a.height, segment_b.height);
        let corner_anchors = |corner_a: RectangleCorner, corner_b: RectangleCorner| {
            (
                corner_a.offset_from_center(segment_a.width, height),
                corner_b.offset_from_center(segment_b.width, height),
            )
        };
        let top = corner_anchors(RectangleCorner::TopRight, RectangleCorner::TopLeft);
        let bottom = corner_anchors(RectangleCorner::BottomRight, RectangleCorner::BottomLeft);

        Ok(Hinge {
            body_a,
            body_b,
            top: self.create_joint(world, body_a, body_b, top)?,
            bottom: self.create_joint(world, body_a, body_b, bottom)?,
        })
    }

    /// Joins the given corners of the segment to the static world body at
    /// their current positions.
    fn attach_to_world(
        &self,
        world: &mut World,
        body: RigidBodyID,
        segment: &SegmentDescription,
        [top_corner, bottom_corner]: [RectangleCorner; 2],
    ) -> Result<Hinge> {
        let static_body = world.static_body_id();
        let pose = world.body(body).pose();
        let anchors = |corner: RectangleCorner| {
            let anchor = corner.offset_from_center(segment.width, segment.height);
            (pose.transform_point(&anchor), anchor)
        };

        Ok(Hinge {
            body_a: static_body,
            body_b: body,
            top: self.create_joint(world, static_body, body, anchors(top_corner))?,
            bottom: self.create_joint(world, static_body, body, anchors(bottom_corner))?,
        })
    }

    fn create_joint(
        &self,
        world: &mut World,
        body_a: RigidBodyID,
        body_b: RigidBodyID,
        (anchor_a, anchor_b): (Position, Position),
    ) -> Result<JointID> {
        world.create_joint(
            Joint::new(
                body_a,
                body_b,
                SlideJoint::lockable(anchor_a, anchor_b, self.unlock_distance, self.engaged),
            )
            .with_collide_bodies(self.collide_bodies),
        )
    }
}

fn default_ground() -> GroundDescription {
    GroundDescription {
        center: point![400.0, 780.0],
        width: 800.0,
        height: 40.0,
    }
}

fn build_ground(world: &mut World, ground: &GroundDescription) -> Result<RigidBodyID> {
    let body = world.create_body(RigidBodyKind::Static, Pose::unrotated(ground.center));
    world
        .attach_shape(Shape::new(
            body,
            ConvexPolygon::rectangle(ground.width, ground.height)?,
            Material::default(),
        ))
        .context("Invalid ground")?;
    Ok(body)
}

fn finger() -> Result<SceneDescription> {
    Ok(SceneDescription {
        origin: point![150.0, 300.0],
        segments: vec![
            SegmentDescription::new(120.0, 40.0),
            SegmentDescription::new(90.0, 40.0),
            SegmentDescription::new(70.0, 40.0),
        ],
        anchor_first: true,
        ground: Some(default_ground()),
        ..Default::default()
    })
}

fn pair() -> Result<SceneDescription> {
    let (width, height) = (100.0, 50.0);
    let rectangle = ConvexPolygon::rectangle(width, height)?;
    Ok(SceneDescription {
        ground: Some(GroundDescription {
            center: point![400.0, 620.0],
            width: 800.0,
            height: 40.0,
        }),
        bodies: vec![
            BodyDescription::dynamic(Pose::unrotated(point![350.0, 400.0]), rectangle.clone()),
            BodyDescription::dynamic(Pose::unrotated(point![450.0, 400.0]), rectangle),
        ],
        links: vec![LinkDescription {
            body_a: BodyRef::Body(0),
            body_b: BodyRef::Body(1),
            anchor_a: RectangleCorner::BottomRight.offset_from_center(width, height),
            anchor_b: RectangleCorner::BottomLeft.offset_from_center(width, height),
        }],
        ..Default::default()
    })
}

fn mechanisms() -> Result<SceneDescription> {
    let motor_wheel = Pose::unrotated(point![150.0, 200.0]);
    let geared_wheel = Pose::unrotated(point![250.0, 200.0]);
    let pendulum_angle: fph = -0.6;
    let pendulum = Pose::new(
        point![
            450.0 - 60.0 * pendulum_angle.sin(),
            200.0 + 60.0 * pendulum_angle.cos()
        ],
        pendulum_angle,
    );
    let pendulum_top = point![0.0, -60.0];
    let slider = Pose::unrotated(point![600.0, 140.0]);
    let bob = Pose::unrotated(point![700.0, 300.0]);
    let bob_support = point![650.0, 250.0];

    let wheel = || Circle::new(Position::origin(), 40.0);

    Ok(SceneDescription {
        ground: Some(default_ground()),
        bodies: vec![
            BodyDescription::dynamic(motor_wheel, wheel()),
            BodyDescription::dynamic(geared_wheel, wheel()),
            BodyDescription::dynamic(pendulum, ConvexPolygon::rectangle(20.0, 120.0)?),
            BodyDescription::dynamic(slider, ConvexPolygon::rectangle(40.0, 40.0)?),
            BodyDescription::dynamic(bob, Circle::new(Position::origin(), 15.0)),
        ],
        joints: vec![
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(0),
                PivotJoint::new(motor_wheel.position, Position::origin()),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(0),
                SimpleMotor::new(2.0, fph::INFINITY),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(1),
                PivotJoint::new(geared_wheel.position, Position::origin()),
            ),
            JointDescription::new(BodyRef::Body(0), BodyRef::Body(1), GearJoint::new(0.0, -1.0)),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(2),
                PivotJoint::new(pendulum.transform_point(&pendulum_top), pendulum_top),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(2),
                DampedRotarySpring::new(0.0, 3.0e7, 2.0e6),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(2),
                RotaryLimitJoint::new(-FRAC_PI_4, FRAC_PI_4),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(3),
                GrooveJoint::new(point![550.0, 120.0], point![750.0, 200.0], Position::origin()),
            ),
            JointDescription::new(
                BodyRef::World,
                BodyRef::Body(4),
                PinJoint::measured(bob_support, Position::origin(), &Pose::default(), &bob),
            ),
        ],
        ..Default::default()
    })
}
