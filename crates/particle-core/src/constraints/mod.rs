//! Bonded and geometric constraints.

pub mod barrier;
pub mod bonds;
pub mod collision;
pub mod elastic;
pub mod shape_matching;
pub mod spring;
pub mod triangulation;

pub use bonds::{Pair, Triad};
pub use shape_matching::fit_rigid_transform;
pub use triangulation::delaunay;
