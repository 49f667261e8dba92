//! Rigid body and joint simulation for lockable 2D linkages.

pub mod collision;
pub mod constraint;
pub mod control;
pub mod game_loop;
pub mod geometry;
pub mod inertia;
pub mod io;
pub mod material;
pub mod quantities;
pub mod render;
pub mod rigid_body;
pub mod run;
pub mod scene;
pub mod world;

/// Floating point type used for physics simulation.
#[allow(non_camel_case_types)]
pub type fph = f64;
