//! Contact-driven fluid passes.
//!
//! Every pass reads a snapshot of the particle state, accumulates velocity
//! changes into scratch columns and applies them once, so the result does
//! not depend on the order contacts were found in.

pub mod color;
pub mod pressure;
pub mod solid;
pub mod tension;
pub mod viscosity;

pub(crate) use color::solve_color_mixing;
pub(crate) use pressure::{compute_weights, solve_damping, solve_pressure, solve_static_pressure};
pub(crate) use solid::{compute_depth, solve_solid};
pub(crate) use tension::solve_tensile;
pub(crate) use viscosity::{solve_powder, solve_repulsive, solve_viscous};
