use crate::config::{ParticleSystemDef, MAX_PARTICLE_PRESSURE, MIN_PARTICLE_WEIGHT};
use crate::contact::{ContactSet, ParticleContact};
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};
use crate::world::RigidWorld;

/// Sum contact weights per particle. A particle with weight above
/// [`MIN_PARTICLE_WEIGHT`] is compressed.
pub(crate) fn compute_weights(buffers: &mut ParticleBuffers, contacts: &ContactSet) {
    let weight = &mut buffers.weight;
    weight.fill(0.0);
    for c in &contacts.body {
        weight[c.index] += c.weight;
    }
    for c in &contacts.particle {
        weight[c.a] += c.weight;
        weight[c.b] += c.weight;
    }
}

/// Relax static pressure of `STATIC_PRESSURE` particles.
///
/// Each sweep solves, Jacobi style,
/// `h_i = (sum_j w_ij * h_j + k * (weight_i - 1)) / (weight_i + relaxation)`
/// and clamps to `[0, max_pressure]`, so a resting column carries the load
/// of the particles above it.
pub(crate) fn solve_static_pressure(
    buffers: &mut ParticleBuffers,
    contacts: &[ParticleContact],
    def: &ParticleSystemDef,
    ctx: &StepContext,
    accumulation: &mut [f32],
) {
    let count = buffers.count();
    buffers.ensure_static_pressure();
    let ParticleBuffers {
        flags,
        weight,
        static_pressure,
        ..
    } = buffers;
    let Some(static_pressure) = static_pressure.as_mut() else {
        return;
    };

    let pressure_per_weight = def.static_pressure_strength * ctx.critical_pressure;
    let max_pressure = MAX_PARTICLE_PRESSURE * ctx.critical_pressure;
    let relaxation = def.static_pressure_relaxation;

    for _ in 0..def.static_pressure_iterations {
        accumulation[..count].fill(0.0);
        for c in contacts {
            if c.flags.contains(ParticleFlags::STATIC_PRESSURE) {
                accumulation[c.a] += c.weight * static_pressure[c.b];
                accumulation[c.b] += c.weight * static_pressure[c.a];
            }
        }
        for i in 0..count {
            static_pressure[i] = if flags[i].contains(ParticleFlags::STATIC_PRESSURE) {
                let h = (accumulation[i] + pressure_per_weight * (weight[i] - MIN_PARTICLE_WEIGHT))
                    / (weight[i] + relaxation);
                h.clamp(0.0, max_pressure)
            } else {
                0.0
            };
        }
    }
}

/// Isotropic pressure from compression.
///
/// 1. Pressure per particle: `min(k * max(0, weight - 1), max_pressure)`,
///    zero for powder and tensile particles, plus static pressure.
/// 2. Pair impulses along the contact normal proportional to the summed
///    pressure, equal and opposite.
/// 3. Fixture contacts push the particle out and the body back.
pub(crate) fn solve_pressure(
    buffers: &mut ParticleBuffers,
    contacts: &ContactSet,
    def: &ParticleSystemDef,
    ctx: &StepContext,
    all_flags: ParticleFlags,
    scratch: &mut Scratch,
) {
    let count = buffers.count();
    let pressure_per_weight = def.pressure_strength * ctx.critical_pressure;
    let max_pressure = MAX_PARTICLE_PRESSURE * ctx.critical_pressure;

    let pressure = &mut scratch.accumulation[..count];
    for (h, &w) in pressure.iter_mut().zip(&buffers.weight) {
        *h = (pressure_per_weight * (w - MIN_PARTICLE_WEIGHT).max(0.0)).min(max_pressure);
    }
    if all_flags.intersects(ParticleFlags::NO_PRESSURE_FLAGS) {
        for (h, f) in pressure.iter_mut().zip(&buffers.flags) {
            if f.intersects(ParticleFlags::NO_PRESSURE_FLAGS) {
                *h = 0.0;
            }
        }
    }
    if all_flags.contains(ParticleFlags::STATIC_PRESSURE) {
        if let Some(static_pressure) = &buffers.static_pressure {
            for ((h, f), &sp) in pressure.iter_mut().zip(&buffers.flags).zip(static_pressure) {
                if f.contains(ParticleFlags::STATIC_PRESSURE) {
                    *h += sp;
                }
            }
        }
    }

    let velocity_per_pressure = ctx.dt / (def.density * ctx.diameter);
    let delta_v = &mut scratch.delta_v;

    for c in &contacts.body {
        let a = c.index;
        let p = buffers.position[a];
        let h = pressure[a] + pressure_per_weight * c.weight;
        let f = velocity_per_pressure * c.weight * c.mass * h * c.normal;
        delta_v[a] -= ctx.particle_inv_mass * f;
        scratch.body_impulses.push((c.fixture, f, p));
    }

    for c in &contacts.particle {
        let h = pressure[c.a] + pressure[c.b];
        let f = velocity_per_pressure * c.weight * h * c.normal;
        delta_v[c.a] -= f;
        delta_v[c.b] += f;
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}

/// Damp the approaching component of relative normal velocity.
///
/// The damping factor is `max(linear * w, min(-quadratic * vn, 0.5))` with
/// `quadratic = 1 / critical_velocity`: gentle for slow contacts, stronger
/// for fast ones, never more than half the approach speed per contact.
pub(crate) fn solve_damping(
    buffers: &mut ParticleBuffers,
    contacts: &ContactSet,
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
    world: &dyn RigidWorld,
) {
    let linear = def.damping_strength;
    let quadratic = 1.0 / ctx.critical_velocity;
    let velocity = &buffers.velocity;
    let delta_v = &mut scratch.delta_v;

    for c in &contacts.body {
        let a = c.index;
        let p = buffers.position[a];
        let v = world.body_state(c.fixture).velocity_at(p) - velocity[a];
        let vn = v.dot(c.normal);
        if vn < 0.0 {
            let damping = (linear * c.weight).max((-quadratic * vn).min(0.5));
            let f = damping * c.mass * vn * c.normal;
            delta_v[a] += ctx.particle_inv_mass * f;
            scratch.body_impulses.push((c.fixture, -f, p));
        }
    }

    for c in &contacts.particle {
        let v = velocity[c.b] - velocity[c.a];
        let vn = v.dot(c.normal);
        if vn < 0.0 {
            let damping = (linear * c.weight).max((-quadratic * vn).min(0.5));
            let f = damping * vn * c.normal;
            delta_v[c.a] += f;
            delta_v[c.b] -= f;
        }
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
