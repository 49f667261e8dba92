//! End-to-end simulation tests on complete scenes.

use approx::assert_abs_diff_eq;
use linkbox::{
    fph,
    quantities::Pose,
    rigid_body::RigidBodyID,
    scene::{Preset, Scene, build_scene},
    world::{PhysicsConfig, World},
};
use nalgebra::vector;
use proptest::prelude::*;

fn build_preset(preset: Preset) -> (World, Scene) {
    let mut world = World::new(PhysicsConfig::default()).unwrap();
    let scene = build_scene(&mut world, &preset.description().unwrap()).unwrap();
    (world, scene)
}

fn poses(world: &World) -> Vec<(RigidBodyID, Pose)> {
    world
        .rigid_body_manager()
        .rigid_bodies()
        .map(|(id, body)| (id, body.pose()))
        .collect()
}

fn max_speeds(world: &World) -> (fph, fph) {
    world
        .rigid_body_manager()
        .rigid_bodies()
        .fold((0.0, 0.0), |(speed, angular_speed), (_, body)| {
            (
                fph::max(speed, body.velocity().norm()),
                fph::max(angular_speed, body.angular_velocity().abs()),
            )
        })
}

#[test]
fn static_bodies_never_move() {
    let (mut world, scene) = build_preset(Preset::Mechanisms);
    let static_bodies: Vec<_> = world
        .rigid_body_manager()
        .rigid_bodies()
        .filter(|(_, body)| body.is_static())
        .map(|(id, body)| (id, body.pose()))
        .collect();
    assert!(static_bodies.len() >= 2);

    for _ in 0..300 {
        for &(id, _) in &static_bodies {
            assert!(world.apply_force(id, &vector![1e6, -1e6]).is_err());
            assert!(world.apply_torque(id, 1e6).is_err());
        }
        if let Some(&body) = scene.bodies().first() {
            world.apply_torque(body, 1e9).unwrap();
        }
        world.advance_simulation();
    }

    for (id, pose) in static_bodies {
        let body = world.body(id);
        assert_eq!(body.pose(), pose);
        assert_eq!(*body.velocity(), vector![0.0, 0.0]);
        assert_eq!(body.angular_velocity(), 0.0);
    }
}

#[test]
fn pair_settles_on_ground_and_stays_there() {
    let (mut world, scene) = build_preset(Preset::Pair);
    let ground_top = world.body(scene.ground().unwrap()).pose().position.y - 20.0;

    for _ in 0..600 {
        world.advance_simulation();
    }
    let (speed, angular_speed) = max_speeds(&world);
    assert!(speed < 2.0, "Pair still moving at speed {}", speed);
    assert!(angular_speed < 0.1);

    let settled = poses(&world);
    for (_, pose) in &settled {
        assert!(pose.position.y < ground_top);
    }

    for _ in 0..120 {
        world.advance_simulation();
    }
    for ((_, settled_pose), (_, pose)) in settled.iter().zip(poses(&world)) {
        assert_abs_diff_eq!(settled_pose.position, pose.position, epsilon = 1.0);
        assert_abs_diff_eq!(settled_pose.angle, pose.angle, epsilon = 0.02);
    }
}

#[test]
fn engaged_finger_sags_less_than_disengaged_finger() {
    let (mut engaged_world, engaged_scene) = build_preset(Preset::Finger);
    let (mut loose_world, loose_scene) = build_preset(Preset::Finger);
    loose_scene
        .set_all_hinges_engaged(&mut loose_world, false)
        .unwrap();
    assert!(engaged_scene.all_hinges_engaged(&engaged_world));
    assert!(!loose_scene.all_hinges_engaged(&loose_world));

    let tip = engaged_scene.tip().unwrap();
    let initial_tip_y = engaged_world.body(tip).pose().position.y;

    for _ in 0..180 {
        engaged_world.advance_simulation();
        loose_world.advance_simulation();
    }

    let engaged_drop = engaged_world.body(tip).pose().position.y - initial_tip_y;
    let loose_drop = loose_world.body(loose_scene.tip().unwrap()).pose().position.y - initial_tip_y;
    assert!(loose_drop > 40.0);
    assert!(engaged_drop < 0.5 * loose_drop);
}

#[test]
fn finger_can_be_locked_again_after_unlocking() {
    let (mut world, scene) = build_preset(Preset::Finger);
    scene.set_all_hinges_engaged(&mut world, false).unwrap();
    for _ in 0..20 {
        world.advance_simulation();
    }
    scene.set_all_hinges_engaged(&mut world, true).unwrap();
    for _ in 0..600 {
        world.advance_simulation();
    }

    for hinge in scene.hinges() {
        for joint_id in [hinge.top, hinge.bottom] {
            let joint = world.get_joint(joint_id).unwrap();
            let (anchor_a, anchor_b) = joint.anchors().unwrap();
            let anchor_a = world.body(joint.body_a).pose().transform_point(&anchor_a);
            let anchor_b = world.body(joint.body_b).pose().transform_point(&anchor_b);
            assert!(nalgebra::distance(&anchor_a, &anchor_b) < 2.0);
        }
    }
}

#[test]
fn mechanisms_stay_bounded() {
    let (mut world, _) = build_preset(Preset::Mechanisms);
    for _ in 0..600 {
        world.advance_simulation();
    }
    for (_, pose) in poses(&world) {
        assert!(pose.position.x.is_finite() && pose.position.y.is_finite());
        assert!(pose.position.coords.norm() < 2000.0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn stepping_is_deterministic(
        force_x in -1e5..1e5,
        torque in -1e6..1e6,
        n_substeps in 1_u32..12,
    ) {
        let run = || {
            let (mut world, scene) = build_preset(Preset::Finger);
            world.set_n_substeps(n_substeps).unwrap();
            let tip = scene.tip().unwrap();
            for frame in 0..60 {
                if frame % 10 == 0 {
                    world.apply_force(tip, &vector![force_x, 0.0]).unwrap();
                    world.apply_torque(tip, torque).unwrap();
                }
                world.advance_simulation();
            }
            poses(&world)
        };
        prop_assert_eq!(run(), run());
    }
}
