use crate::config::ParticleSystemDef;
use crate::constraints::bonds::Pair;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};

/// Restore the rest length of spring pairs.
///
/// For each pair with the `SPRING` flag:
/// 1. Predict both positions one step ahead: `p + dt * v`
/// 2. Compare the predicted distance `r1` with the rest distance `r0`
/// 3. Push the pair apart or together by `inv_dt * k * strength * (r0 - r1) / r1 * d`
///
/// Velocity changes are accumulated and applied once.
pub(crate) fn solve_spring(
    buffers: &mut ParticleBuffers,
    pairs: &[Pair],
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let spring_strength = ctx.inv_dt * def.spring_strength;
    let position = &buffers.position;
    let velocity = &buffers.velocity;
    let delta_v = &mut scratch.delta_v;

    for pair in pairs {
        if !pair.flags.contains(ParticleFlags::SPRING) {
            continue;
        }
        let (a, b) = (pair.a, pair.b);
        let pa = position[a] + ctx.dt * velocity[a];
        let pb = position[b] + ctx.dt * velocity[b];
        let d = pb - pa;
        let r0 = pair.distance;
        let r1 = d.length();
        if r1 <= f32::EPSILON {
            continue;
        }
        let strength = spring_strength * pair.strength;
        let f = strength * (r0 - r1) / r1 * d;
        delta_v[a] -= f;
        delta_v[b] += f;
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
