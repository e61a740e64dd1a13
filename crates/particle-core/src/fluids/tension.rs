use glam::Vec2;

use crate::config::{ParticleSystemDef, MAX_PARTICLE_FORCE};
use crate::contact::ParticleContact;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};

/// Surface tension between tensile particles.
///
/// Two terms along each contact normal:
/// - pressure term `(weight_a + weight_b - 2)` pulls sparse surface particles
///   together,
/// - normal term `dot(s_b - s_a, n)`, where `s` accumulates `(1 - w) * w * n`
///   per particle and points away from the fluid at the surface.
///
/// The combined velocity change is capped at `0.5 * critical_velocity`.
pub(crate) fn solve_tensile(
    buffers: &mut ParticleBuffers,
    contacts: &[ParticleContact],
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let count = buffers.count();
    let surface = &mut scratch.accumulation2[..count];
    surface.fill(Vec2::ZERO);
    for c in contacts {
        if c.flags.contains(ParticleFlags::TENSILE) {
            let wn = (1.0 - c.weight) * c.weight * c.normal;
            surface[c.a] -= wn;
            surface[c.b] += wn;
        }
    }

    let pressure_strength = def.surface_tension_pressure_strength * ctx.critical_velocity;
    let normal_strength = def.surface_tension_normal_strength * ctx.critical_velocity;
    let max_velocity_variation = MAX_PARTICLE_FORCE * ctx.critical_velocity;
    let weight = &buffers.weight;
    let delta_v = &mut scratch.delta_v;

    for c in contacts {
        if !c.flags.contains(ParticleFlags::TENSILE) {
            continue;
        }
        let h = weight[c.a] + weight[c.b];
        let s = surface[c.b] - surface[c.a];
        let fn_ = (pressure_strength * (h - 2.0) + normal_strength * s.dot(c.normal))
            .min(max_velocity_variation)
            * c.weight;
        let f = fn_ * c.normal;
        delta_v[c.a] -= f;
        delta_v[c.b] += f;
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
