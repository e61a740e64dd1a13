//! 2D particle fluids and soft bodies coupled to a rigid-body world.
//!
//! A [`ParticleSystem`] stores particles as parallel columns, finds contacts
//! with a spatial hash, and runs a fixed sequence of solver passes per
//! sub-iteration. Groups keep their particles contiguous so that rigid and
//! solid behavior can work on index ranges.

pub mod config;
pub mod constraints;
pub mod contact;
pub mod grid;
pub mod group;
pub mod handle;
pub mod listener;
pub mod math;
pub mod particle;
pub mod shapes;
pub mod world;

mod compaction;
mod fluids;
mod solver;
mod system;

pub use config::ParticleSystemDef;
pub use contact::{BodyContact, ParticleContact};
pub use group::{
    GroupFlags, GroupId, GroupState, GroupStatistics, ParticleGroup, ParticleGroupDef,
};
pub use handle::ParticleHandle;
pub use listener::{ContactFilter, DestructionListener, ParticleCommands, ParticleContactListener};
pub use particle::{ParticleBuffers, ParticleColor, ParticleDef, ParticleFlags};
pub use system::ParticleSystem;
pub use world::{FixtureId, RigidWorld};
