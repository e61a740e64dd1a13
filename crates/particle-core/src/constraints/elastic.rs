use crate::config::ParticleSystemDef;
use crate::constraints::bonds::Triad;
use crate::math::{cross, Rot};
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};

/// Restore the rest shape of elastic triads.
///
/// Each triad's predicted triangle is centered and matched against its rest
/// offsets `o` with the 2D best-fit rotation
/// `R = normalize(sum dot(o, p), sum cross(o, p))`; every vertex is then
/// pulled toward `R * o`.
pub(crate) fn solve_elastic(
    buffers: &mut ParticleBuffers,
    triads: &[Triad],
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let elastic_strength = ctx.inv_dt * def.elastic_strength;
    let position = &buffers.position;
    let velocity = &buffers.velocity;
    let delta_v = &mut scratch.delta_v;

    for triad in triads {
        if !triad.flags.contains(ParticleFlags::ELASTIC) {
            continue;
        }
        let (a, b, c) = (triad.a, triad.b, triad.c);
        let (oa, ob, oc) = (triad.pa, triad.pb, triad.pc);
        let mut pa = position[a] + ctx.dt * velocity[a];
        let mut pb = position[b] + ctx.dt * velocity[b];
        let mut pc = position[c] + ctx.dt * velocity[c];
        let mid = (pa + pb + pc) / 3.0;
        pa -= mid;
        pb -= mid;
        pc -= mid;

        let s = cross(oa, pa) + cross(ob, pb) + cross(oc, pc);
        let co = oa.dot(pa) + ob.dot(pb) + oc.dot(pc);
        let r2 = s * s + co * co;
        if r2 <= f32::EPSILON {
            continue;
        }
        let inv_r = r2.sqrt().recip();
        let r = Rot {
            s: s * inv_r,
            c: co * inv_r,
        };

        let strength = elastic_strength * triad.strength;
        delta_v[a] += strength * (r.apply(oa) - pa);
        delta_v[b] += strength * (r.apply(ob) - pb);
        delta_v[c] += strength * (r.apply(oc) - pc);
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
