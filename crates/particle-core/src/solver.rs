//! One sub-iteration of the particle solver.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use glam::Vec2;

use crate::config::{ParticleSystemDef, BARRIER_COLLISION_TIME};
use crate::constraints::barrier::solve_barrier;
use crate::constraints::bonds::{create_bonds, dedup_bonds, BondRules};
use crate::constraints::collision::solve_collision;
use crate::constraints::elastic::solve_elastic;
use crate::constraints::shape_matching::solve_rigid;
use crate::constraints::spring::solve_spring;
use crate::contact::{find_barrier_candidates, find_body_contacts, find_particle_contacts};
use crate::fluids;
use crate::group::GroupFlags;
use crate::particle::ParticleFlags;
use crate::system::ParticleSystem;
use crate::world::{FixtureId, RigidWorld};

/// Per-sub-iteration constants.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StepContext {
    pub dt: f32,
    pub inv_dt: f32,
    pub diameter: f32,
    pub particle_mass: f32,
    pub particle_inv_mass: f32,
    /// Speed at which a particle crosses one diameter per sub-step.
    pub critical_velocity: f32,
    pub critical_velocity_squared: f32,
    /// `density * critical_velocity^2`.
    pub critical_pressure: f32,
}

impl StepContext {
    pub fn new(def: &ParticleSystemDef, dt: f32) -> Self {
        let inv_dt = 1.0 / dt;
        let diameter = def.diameter();
        let critical_velocity = diameter * inv_dt;
        let critical_velocity_squared = critical_velocity * critical_velocity;
        Self {
            dt,
            inv_dt,
            diameter,
            particle_mass: def.particle_mass(),
            particle_inv_mass: def.particle_inv_mass(),
            critical_velocity,
            critical_velocity_squared,
            critical_pressure: def.density * critical_velocity_squared,
        }
    }
}

/// Reusable per-particle accumulators.
///
/// `delta_v` is kept zeroed between passes by [`Scratch::apply_delta_v`].
#[derive(Default)]
pub(crate) struct Scratch {
    pub accumulation: Vec<f32>,
    pub accumulation2: Vec<Vec2>,
    pub delta_v: Vec<Vec2>,
    pub color_delta: Vec<[i32; 4]>,
    pub contact_count: Vec<u32>,
    /// Reaction impulses for bodies: fixture, impulse, world point.
    pub body_impulses: Vec<(FixtureId, Vec2, Vec2)>,
}

impl Scratch {
    pub fn resize(&mut self, count: usize) {
        self.accumulation.resize(count, 0.0);
        self.accumulation2.resize(count, Vec2::ZERO);
        self.delta_v.resize(count, Vec2::ZERO);
        self.color_delta.resize(count, [0; 4]);
        self.contact_count.resize(count, 0);
    }

    /// Add the accumulated velocity changes and clear them.
    pub fn apply_delta_v(&mut self, velocity: &mut [Vec2]) {
        for (v, dv) in velocity.iter_mut().zip(self.delta_v.iter_mut()) {
            *v += *dv;
            *dv = Vec2::ZERO;
        }
    }

    pub fn flush_impulses(&mut self, world: &mut dyn RigidWorld) {
        for (id, impulse, point) in self.body_impulses.drain(..) {
            world.apply_linear_impulse(id, impulse, point);
        }
    }
}

impl ParticleSystem {
    /// Find contacts and run every pass once, in order:
    /// forces, weights, pressure, damping, repulsion, powder, solid ejection,
    /// viscosity, springs, elasticity, surface tension, color mixing,
    /// velocity limit, barriers, fixture collision, rigid shape matching,
    /// walls, integration.
    pub(crate) fn solve_iteration(&mut self, world: &mut dyn RigidWorld, ctx: &StepContext) {
        let count = self.count();
        if count == 0 {
            self.contacts.clear();
            self.notify_contact_listener();
            return;
        }
        self.scratch.resize(count);

        // --- Neighbors and contacts ---
        self.grid.build(&self.buffers.position);
        let filter = self.listeners.filter.as_deref();
        find_particle_contacts(
            &self.buffers,
            &self.grid,
            ctx.diameter,
            filter,
            &mut self.contacts.particle,
        );
        find_body_contacts(
            &self.buffers,
            &self.grid,
            &*world,
            ctx.diameter,
            ctx.particle_inv_mass,
            filter,
            &mut self.contacts.body,
        );
        self.notify_contact_listener();
        if self.all_flags.contains(ParticleFlags::REACTIVE) {
            self.bond_reactive_particles();
        }
        if self.all_flags.contains(ParticleFlags::BARRIER) {
            find_barrier_candidates(
                &self.buffers,
                &self.grid,
                &self.pairs,
                BARRIER_COLLISION_TIME * ctx.dt,
                BARRIER_COLLISION_TIME * ctx.diameter,
                &mut self.contacts.barrier,
            );
        } else {
            self.contacts.barrier.clear();
        }

        // --- Density ---
        fluids::compute_weights(&mut self.buffers, &self.contacts);
        if self.groups.any(|g| g.needs_depth) {
            fluids::compute_depth(
                &mut self.buffers,
                &self.contacts.particle,
                &mut self.groups,
                ctx.diameter,
                &mut self.scratch.accumulation,
            );
        }

        // --- Forces ---
        if self.has_force {
            solve_force(&mut self.buffers.velocity, &mut self.buffers.force, ctx);
            self.has_force = false;
        }
        let gravity = ctx.dt * self.def.gravity_scale * world.gravity();
        for v in &mut self.buffers.velocity {
            *v += gravity;
        }

        // --- Fluid passes ---
        let all = self.all_flags;
        let def = &self.def;
        let buffers = &mut self.buffers;
        let contacts = &self.contacts;
        let scratch = &mut self.scratch;

        if all.contains(ParticleFlags::STATIC_PRESSURE) {
            fluids::solve_static_pressure(
                buffers,
                &contacts.particle,
                def,
                ctx,
                &mut scratch.accumulation,
            );
        }
        fluids::solve_pressure(buffers, contacts, def, ctx, all, scratch);
        scratch.flush_impulses(world);
        fluids::solve_damping(buffers, contacts, def, ctx, scratch, &*world);
        scratch.flush_impulses(world);
        if all.contains(ParticleFlags::REPULSIVE) {
            fluids::solve_repulsive(buffers, contacts, def, ctx, scratch);
        }
        if all.contains(ParticleFlags::POWDER) {
            fluids::solve_powder(buffers, contacts, def, ctx, scratch);
            scratch.flush_impulses(world);
        }
        if self.all_group_flags.contains(GroupFlags::SOLID) {
            fluids::solve_solid(buffers, &contacts.particle, def, ctx, scratch);
        }
        if all.contains(ParticleFlags::VISCOUS) {
            fluids::solve_viscous(buffers, contacts, def, ctx, scratch, &*world);
            scratch.flush_impulses(world);
        }

        // --- Bonds ---
        if all.contains(ParticleFlags::SPRING) {
            solve_spring(buffers, &self.pairs, def, ctx, scratch);
        }
        if all.contains(ParticleFlags::ELASTIC) {
            solve_elastic(buffers, &self.triads, def, ctx, scratch);
        }

        if all.contains(ParticleFlags::TENSILE) {
            fluids::solve_tensile(buffers, &contacts.particle, def, ctx, scratch);
        }
        if all.contains(ParticleFlags::COLOR_MIXING) {
            fluids::solve_color_mixing(buffers, &contacts.particle, def, scratch);
        }

        // --- Limits and collisions ---
        limit_velocity(&mut buffers.velocity, ctx.critical_velocity_squared);
        if all.contains(ParticleFlags::BARRIER)
            && solve_barrier(buffers, &contacts.barrier, ctx, scratch)
        {
            self.has_force = true;
        }
        solve_collision(buffers, &*world, ctx, self.listeners.filter.as_deref(), scratch);
        scratch.flush_impulses(world);
        if self.all_group_flags.contains(GroupFlags::RIGID) {
            solve_rigid(buffers, &mut self.groups, def, ctx);
        }
        if all.contains(ParticleFlags::WALL) {
            for (v, f) in buffers.velocity.iter_mut().zip(&buffers.flags) {
                if f.contains(ParticleFlags::WALL) {
                    *v = Vec2::ZERO;
                }
            }
        }

        integrate(
            &mut buffers.position,
            &mut buffers.velocity,
            ctx.dt,
            def.linear_damping,
        );
    }

    /// Report contacts that started or ended since the previous
    /// sub-iteration to the contact listener.
    fn notify_contact_listener(&mut self) {
        let Some(listener) = self.listeners.contact.as_mut() else {
            return;
        };

        let mut current: Vec<(usize, usize)> = self
            .contacts
            .particle
            .iter()
            .filter(|c| c.flags.contains(ParticleFlags::PARTICLE_CONTACT_LISTENER))
            .map(|c| c.key())
            .collect();
        current.sort_unstable();
        for c in &self.contacts.particle {
            if c.flags.contains(ParticleFlags::PARTICLE_CONTACT_LISTENER)
                && self.previous_particle_contacts.binary_search(&c.key()).is_err()
            {
                listener.begin_particle_contact(c, &mut self.commands);
            }
        }
        for &(a, b) in &self.previous_particle_contacts {
            if current.binary_search(&(a, b)).is_err() {
                listener.end_particle_contact(a, b, &mut self.commands);
            }
        }
        self.previous_particle_contacts = current;

        let flags = &self.buffers.flags;
        let mut current: Vec<(usize, FixtureId)> = self
            .contacts
            .body
            .iter()
            .filter(|c| flags[c.index].contains(ParticleFlags::FIXTURE_CONTACT_LISTENER))
            .map(|c| c.key())
            .collect();
        current.sort_unstable();
        for c in &self.contacts.body {
            if flags[c.index].contains(ParticleFlags::FIXTURE_CONTACT_LISTENER)
                && self.previous_body_contacts.binary_search(&c.key()).is_err()
            {
                listener.begin_fixture_contact(c, &mut self.commands);
            }
        }
        for &(index, fixture) in &self.previous_body_contacts {
            if current.binary_search(&(index, fixture)).is_err() {
                listener.end_fixture_contact(fixture, index, &mut self.commands);
            }
        }
        self.previous_body_contacts = current;
    }

    /// Bond reactive particles with whatever they touch, then clear the flag.
    fn bond_reactive_particles(&mut self) {
        let count = self.count();
        let buffers = &self.buffers;
        let groups = &self.groups;
        let reactive = |i: usize| buffers.flags[i].contains(ParticleFlags::REACTIVE);
        let can_connect = |i: usize| crate::system::can_connect(buffers, groups, i);
        let strength = |i: usize| crate::system::bond_strength(buffers, groups, i);
        let rules = BondRules {
            range: 0..count,
            can_connect: &can_connect,
            accept_pair: &|a: usize, b: usize| reactive(a) || reactive(b),
            accept_triad: &|a: usize, b: usize, c: usize| reactive(a) || reactive(b) || reactive(c),
            strength: &strength,
        };
        create_bonds(
            buffers,
            self.def.diameter(),
            &rules,
            &mut self.pairs,
            &mut self.triads,
        );
        dedup_bonds(&mut self.pairs, &mut self.triads);

        for f in &mut self.buffers.flags {
            f.remove(ParticleFlags::REACTIVE);
        }
        self.all_flags.remove(ParticleFlags::REACTIVE);
    }
}

/// Consume queued forces: `v += dt * force / mass`.
fn solve_force(velocity: &mut [Vec2], force: &mut [Vec2], ctx: &StepContext) {
    let velocity_per_force = ctx.dt * ctx.particle_inv_mass;
    for (v, f) in velocity.iter_mut().zip(force.iter_mut()) {
        *v += velocity_per_force * *f;
        *f = Vec2::ZERO;
    }
}

/// Clamp speeds to the critical velocity so no particle tunnels more than
/// one diameter per sub-step.
fn limit_velocity(velocity: &mut [Vec2], critical_velocity_squared: f32) {
    let limit = |v: &mut Vec2| {
        let v2 = v.length_squared();
        if v2 > critical_velocity_squared {
            *v *= (critical_velocity_squared / v2).sqrt();
        }
    };

    #[cfg(feature = "parallel")]
    velocity.par_iter_mut().for_each(limit);

    #[cfg(not(feature = "parallel"))]
    velocity.iter_mut().for_each(limit);
}

/// Symplectic Euler: `x += dt * v`, then global damping
/// `v /= 1 + dt * linear_damping`.
fn integrate(position: &mut [Vec2], velocity: &mut [Vec2], dt: f32, linear_damping: f32) {
    let damping = 1.0 / (1.0 + dt * linear_damping);
    let advance = |(x, v): (&mut Vec2, &mut Vec2)| {
        *x += dt * *v;
        *v *= damping;
    };

    #[cfg(feature = "parallel")]
    position
        .par_iter_mut()
        .zip(velocity.par_iter_mut())
        .for_each(advance);

    #[cfg(not(feature = "parallel"))]
    position.iter_mut().zip(velocity.iter_mut()).for_each(advance);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_velocity_clamps_to_critical() {
        let mut v = vec![Vec2::new(3.0, 4.0), Vec2::new(0.1, 0.0)];
        limit_velocity(&mut v, 1.0);
        assert!((v[0].length() - 1.0).abs() < 1e-6);
        assert_eq!(v[1], Vec2::new(0.1, 0.0));
    }

    #[test]
    fn test_integrate_applies_damping_after_advance() {
        let mut x = vec![Vec2::ZERO];
        let mut v = vec![Vec2::new(2.0, 0.0)];
        integrate(&mut x, &mut v, 0.5, 1.0);
        assert_eq!(x[0], Vec2::new(1.0, 0.0));
        assert!((v[0].x - 2.0 / 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_critical_values() {
        let def = ParticleSystemDef {
            radius: 0.5,
            density: 2.0,
            ..Default::default()
        };
        let ctx = StepContext::new(&def, 0.1);
        assert!((ctx.critical_velocity - 10.0).abs() < 1e-4);
        assert!((ctx.critical_pressure - 200.0).abs() < 1e-2);
    }
}
