use crate::config::{ParticleSystemDef, PARTICLE_STRIDE};
use crate::contact::ContactSet;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};
use crate::world::RigidWorld;

/// Pull the tangential relative velocity of viscous contacts toward zero.
///
/// Formula: `dv = viscous * w * (v_rel - n * dot(v_rel, n))`, equal and
/// opposite between the pair. Normal approach is left to damping.
pub(crate) fn solve_viscous(
    buffers: &mut ParticleBuffers,
    contacts: &ContactSet,
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
    world: &dyn RigidWorld,
) {
    let viscous = def.viscous_strength;
    let velocity = &buffers.velocity;
    let delta_v = &mut scratch.delta_v;

    for c in &contacts.body {
        let a = c.index;
        if !buffers.flags[a].contains(ParticleFlags::VISCOUS) {
            continue;
        }
        let p = buffers.position[a];
        let v = world.body_state(c.fixture).velocity_at(p) - velocity[a];
        let vt = v - c.normal * v.dot(c.normal);
        let f = viscous * c.mass * c.weight * vt;
        delta_v[a] += ctx.particle_inv_mass * f;
        scratch.body_impulses.push((c.fixture, -f, p));
    }

    for c in &contacts.particle {
        if !c.flags.contains(ParticleFlags::VISCOUS) {
            continue;
        }
        let v = velocity[c.b] - velocity[c.a];
        let vt = v - c.normal * v.dot(c.normal);
        let f = viscous * c.weight * vt;
        delta_v[c.a] += f;
        delta_v[c.b] -= f;
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}

/// Strong push apart of repulsive particles belonging to different groups.
pub(crate) fn solve_repulsive(
    buffers: &mut ParticleBuffers,
    contacts: &ContactSet,
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let repulsive = def.repulsive_strength * ctx.critical_velocity;
    let delta_v = &mut scratch.delta_v;

    for c in &contacts.particle {
        if c.flags.contains(ParticleFlags::REPULSIVE) && buffers.group[c.a] != buffers.group[c.b] {
            let f = repulsive * c.weight * c.normal;
            delta_v[c.a] -= f;
            delta_v[c.b] += f;
        }
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}

/// Powder has no pressure; instead contacts closer than the lattice stride
/// repel, which keeps grains from stacking into a fluid.
pub(crate) fn solve_powder(
    buffers: &mut ParticleBuffers,
    contacts: &ContactSet,
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let powder = def.powder_strength * ctx.critical_velocity;
    let min_weight = 1.0 - PARTICLE_STRIDE;
    let delta_v = &mut scratch.delta_v;

    for c in &contacts.body {
        let a = c.index;
        if buffers.flags[a].contains(ParticleFlags::POWDER) && c.weight > min_weight {
            let p = buffers.position[a];
            let f = powder * (c.weight - min_weight) * c.mass * c.normal;
            delta_v[a] -= ctx.particle_inv_mass * f;
            scratch.body_impulses.push((c.fixture, f, p));
        }
    }

    for c in &contacts.particle {
        if c.flags.contains(ParticleFlags::POWDER) && c.weight > min_weight {
            let f = powder * (c.weight - min_weight) * c.normal;
            delta_v[c.a] -= f;
            delta_v[c.b] += f;
        }
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
