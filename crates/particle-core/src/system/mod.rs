//! The particle system and its step coordinator.

mod groups;
mod particles;

pub(crate) use groups::{bond_strength, can_connect};

use anyhow::{ensure, Result};
use glam::Vec2;
use tracing::{debug, debug_span, trace};

use crate::config::{calculate_particle_iterations, ParticleSystemDef};
use crate::constraints::bonds::{Pair, Triad};
use crate::contact::{BodyContact, ContactSet, ParticleContact};
use crate::grid::SpatialHashGrid;
use crate::group::{GroupArena, GroupFlags, GroupId, ParticleGroup};
use crate::handle::HandleTable;
use crate::listener::{
    ContactFilter, DestructionListener, Listeners, ParticleCommands, ParticleContactListener,
};
use crate::particle::{ParticleBuffers, ParticleColor, ParticleFlags};
use crate::solver::{Scratch, StepContext};
use crate::world::{FixtureId, RigidWorld};

/// Owns every particle, group and bond, and advances them in time against a
/// [`RigidWorld`].
///
/// Particle indices are only valid until the next compaction; hold a
/// [`ParticleHandle`](crate::handle::ParticleHandle) to track a particle
/// across steps.
pub struct ParticleSystem {
    pub(crate) def: ParticleSystemDef,
    pub(crate) buffers: ParticleBuffers,
    pub(crate) handles: HandleTable,
    pub(crate) groups: GroupArena,
    pub(crate) pairs: Vec<Pair>,
    pub(crate) triads: Vec<Triad>,
    pub(crate) contacts: ContactSet,
    pub(crate) grid: SpatialHashGrid,
    pub(crate) scratch: Scratch,
    pub(crate) listeners: Listeners,
    pub(crate) commands: ParticleCommands,
    /// Listener-visible contacts of the previous sub-iteration, sorted.
    pub(crate) previous_particle_contacts: Vec<(usize, usize)>,
    pub(crate) previous_body_contacts: Vec<(usize, FixtureId)>,
    pub(crate) all_flags: ParticleFlags,
    pub(crate) all_group_flags: GroupFlags,
    pub(crate) next_birth: u64,
    pub(crate) has_force: bool,
    pub(crate) paused: bool,
}

impl ParticleSystem {
    pub fn new(def: ParticleSystemDef) -> Result<Self> {
        def.validate()?;
        debug!(
            radius = def.radius,
            max_count = def.max_count,
            "particle system created"
        );
        Ok(Self {
            grid: SpatialHashGrid::new(def.diameter()),
            def,
            buffers: ParticleBuffers::default(),
            handles: HandleTable::default(),
            groups: GroupArena::default(),
            pairs: Vec::new(),
            triads: Vec::new(),
            contacts: ContactSet::default(),
            scratch: Scratch::default(),
            listeners: Listeners::default(),
            commands: ParticleCommands::default(),
            previous_particle_contacts: Vec::new(),
            previous_body_contacts: Vec::new(),
            all_flags: ParticleFlags::empty(),
            all_group_flags: GroupFlags::empty(),
            next_birth: 0,
            has_force: false,
            paused: false,
        })
    }

    // ------------------------------------------------------------------
    // Configuration

    pub fn def(&self) -> &ParticleSystemDef {
        &self.def
    }

    pub fn radius(&self) -> f32 {
        self.def.radius
    }

    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        ensure!(
            radius.is_finite() && radius > 0.0,
            "particle radius must be positive, got {radius}"
        );
        self.def.radius = radius;
        self.grid.set_cell_size(self.def.diameter());
        Ok(())
    }

    pub fn density(&self) -> f32 {
        self.def.density
    }

    pub fn set_density(&mut self, density: f32) -> Result<()> {
        ensure!(
            density.is_finite() && density > 0.0,
            "particle density must be positive, got {density}"
        );
        self.def.density = density;
        Ok(())
    }

    pub fn gravity_scale(&self) -> f32 {
        self.def.gravity_scale
    }

    pub fn set_gravity_scale(&mut self, gravity_scale: f32) {
        self.def.gravity_scale = gravity_scale;
    }

    pub fn damping(&self) -> f32 {
        self.def.damping_strength
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.def.damping_strength = damping;
    }

    pub fn max_particle_count(&self) -> usize {
        self.def.max_count
    }

    /// `0` removes the limit. Fails when smaller than the live count.
    pub fn set_max_particle_count(&mut self, max_count: usize) -> Result<()> {
        ensure!(
            max_count == 0 || max_count >= self.count(),
            "max particle count {max_count} is below the live count {}",
            self.count()
        );
        self.def.max_count = max_count;
        Ok(())
    }

    pub fn destruction_by_age(&self) -> bool {
        self.def.destroy_by_age
    }

    pub fn set_destruction_by_age(&mut self, enabled: bool) {
        self.def.destroy_by_age = enabled;
    }

    pub fn set_iterations(&mut self, iterations: Option<u32>) {
        self.def.iterations = iterations.filter(|&n| n > 0);
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// A paused system ignores [`step`](Self::step).
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn particle_mass(&self) -> f32 {
        self.def.particle_mass()
    }

    pub fn particle_inv_mass(&self) -> f32 {
        self.def.particle_inv_mass()
    }

    // ------------------------------------------------------------------
    // Buffers

    pub fn count(&self) -> usize {
        self.buffers.count()
    }

    pub fn particles(&self) -> &ParticleBuffers {
        &self.buffers
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.buffers.position
    }

    pub fn positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.buffers.position
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.buffers.velocity
    }

    pub fn velocities_mut(&mut self) -> &mut [Vec2] {
        &mut self.buffers.velocity
    }

    pub fn flags(&self) -> &[ParticleFlags] {
        &self.buffers.flags
    }

    pub fn colors(&self) -> Option<&[ParticleColor]> {
        self.buffers.colors()
    }

    /// Allocates the color column on first use.
    pub fn colors_mut(&mut self) -> &mut [ParticleColor] {
        let count = self.count();
        self.buffers
            .color
            .get_or_insert_with(|| vec![ParticleColor::ZERO; count])
    }

    pub fn user_data(&self) -> &[u64] {
        &self.buffers.user_data
    }

    pub fn user_data_mut(&mut self) -> &mut [u64] {
        &mut self.buffers.user_data
    }

    pub fn weights(&self) -> &[f32] {
        &self.buffers.weight
    }

    pub fn particle_group(&self, index: usize) -> Option<GroupId> {
        self.buffers.group.get(index).copied().flatten()
    }

    /// Particle contacts of the last sub-iteration.
    pub fn contacts(&self) -> &[ParticleContact] {
        &self.contacts.particle
    }

    /// Fixture contacts of the last sub-iteration.
    pub fn body_contacts(&self) -> &[BodyContact] {
        &self.contacts.body
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    pub fn triads(&self) -> &[Triad] {
        &self.triads
    }

    /// Union of all particle flags, refreshed at the end of each step.
    pub fn all_particle_flags(&self) -> ParticleFlags {
        self.all_flags
    }

    pub fn all_group_flags(&self) -> GroupFlags {
        self.all_group_flags
    }

    pub fn group(&self, id: GroupId) -> Option<&ParticleGroup> {
        self.groups.get(id)
    }

    /// Live groups in creation order.
    pub fn groups(&self) -> impl Iterator<Item = (GroupId, &ParticleGroup)> {
        self.groups.iter()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    // ------------------------------------------------------------------
    // Hooks

    pub fn set_contact_filter(&mut self, filter: Option<Box<dyn ContactFilter>>) {
        self.listeners.filter = filter;
    }

    pub fn set_contact_listener(&mut self, listener: Option<Box<dyn ParticleContactListener>>) {
        self.listeners.contact = listener;
        self.previous_particle_contacts.clear();
        self.previous_body_contacts.clear();
    }

    pub fn set_destruction_listener(&mut self, listener: Option<Box<dyn DestructionListener>>) {
        self.listeners.destruction = listener;
    }

    // ------------------------------------------------------------------
    // Step

    /// Advance the simulation by `dt` seconds.
    ///
    /// 1. Remove particles destroyed since the last step
    /// 2. Run the sub-iterations: grid, contacts, listeners, passes, integration
    /// 3. Age finite lifetimes; expired particles are destroyed
    /// 4. Compact, split rigid groups that came apart, drop empty groups
    /// 5. Apply commands queued by listeners
    pub fn step(&mut self, world: &mut dyn RigidWorld, dt: f32) {
        if self.paused || !(dt > 0.0) {
            return;
        }
        let _span = debug_span!("particle_step", count = self.count(), dt).entered();

        self.solve_zombie();
        self.update_all_flags();

        let iterations = self.def.iterations.unwrap_or_else(|| {
            calculate_particle_iterations(world.gravity().length(), self.def.radius, dt)
        });
        let ctx = StepContext::new(&self.def, dt / iterations as f32);
        for _ in 0..iterations {
            self.solve_iteration(world, &ctx);
        }

        self.solve_lifetimes(dt);
        self.solve_zombie();
        self.apply_commands();
        self.update_all_flags();

        trace!(
            count = self.count(),
            groups = self.groups.len(),
            contacts = self.contacts.particle.len(),
            body_contacts = self.contacts.body.len(),
            iterations,
            "particle step finished"
        );
    }

    /// Count finite lifetimes down; particles reaching zero become zombies.
    fn solve_lifetimes(&mut self, dt: f32) {
        let ParticleBuffers {
            lifetime, flags, ..
        } = &mut self.buffers;
        let mut expired = 0;
        for (life, f) in lifetime.iter_mut().zip(flags.iter_mut()) {
            if *life > 0.0 {
                *life -= dt;
                if *life <= 0.0 {
                    *life = 0.0;
                    f.insert(ParticleFlags::ZOMBIE);
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            self.all_flags |= ParticleFlags::ZOMBIE;
            trace!(expired, "particles expired");
        }
    }

    /// Apply requests queued by listeners during the step.
    fn apply_commands(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.commands);
        for (index, call_listener) in commands.destroy {
            self.destroy_particle(index, call_listener);
        }
        for (group, call_listener) in commands.destroy_groups {
            self.destroy_particles_in_group(group, call_listener);
        }
        for def in &commands.create {
            self.create_particle(def);
        }
    }

    /// Recompute the cached unions of particle and group flags.
    pub(crate) fn update_all_flags(&mut self) {
        self.all_flags = self.buffers.flags_in(0..self.count());
        self.all_group_flags = self
            .groups
            .iter()
            .fold(GroupFlags::empty(), |acc, (_, g)| acc | g.flags);
    }
}
