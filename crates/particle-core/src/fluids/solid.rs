use crate::config::ParticleSystemDef;
use crate::contact::ParticleContact;
use crate::group::GroupArena;
use crate::particle::ParticleBuffers;
use crate::solver::{Scratch, StepContext};

/// Weight below which a solid member counts as surface.
const SURFACE_WEIGHT: f32 = 0.8;

/// Distance of every member of a flagged solid group from the group surface,
/// in world units.
///
/// Surface particles (low contact weight) start at zero, everything else at
/// infinity; relaxing over intra-group contacts with edge cost `1 - w` then
/// converges to a shortest-path distance. Sweeps stop early once nothing
/// changes.
pub(crate) fn compute_depth(
    buffers: &mut ParticleBuffers,
    contacts: &[ParticleContact],
    groups: &mut GroupArena,
    diameter: f32,
    accumulation: &mut [f32],
) {
    let count = buffers.count();
    let mut marked = vec![false; count];
    let mut member_count = 0;
    for group in groups.values_mut().filter(|g| g.needs_depth) {
        group.needs_depth = false;
        marked[group.range()].fill(true);
        member_count += group.count();
    }
    if member_count == 0 {
        return;
    }

    buffers.ensure_depth();
    let ParticleBuffers { group, depth, .. } = buffers;
    let Some(depth) = depth.as_mut() else {
        return;
    };

    let links: Vec<(usize, usize, f32)> = contacts
        .iter()
        .filter(|c| marked[c.a] && group[c.a].is_some() && group[c.a] == group[c.b])
        .map(|c| (c.a, c.b, c.weight))
        .collect();

    for i in (0..count).filter(|&i| marked[i]) {
        accumulation[i] = 0.0;
    }
    for &(a, b, w) in &links {
        accumulation[a] += w;
        accumulation[b] += w;
    }
    for i in (0..count).filter(|&i| marked[i]) {
        depth[i] = if accumulation[i] < SURFACE_WEIGHT { 0.0 } else { f32::MAX };
    }

    let sweeps = (member_count as f32).sqrt() as usize;
    for _ in 0..sweeps {
        let mut updated = false;
        for &(a, b, w) in &links {
            let r = 1.0 - w;
            let (ap0, bp0) = (depth[a], depth[b]);
            let ap1 = bp0 + r;
            let bp1 = ap0 + r;
            if ap0 > ap1 {
                depth[a] = ap1;
                updated = true;
            }
            if bp0 > bp1 {
                depth[b] = bp1;
                updated = true;
            }
        }
        if !updated {
            break;
        }
    }

    for i in (0..count).filter(|&i| marked[i]) {
        depth[i] = if depth[i] < f32::MAX { depth[i] * diameter } else { 0.0 };
    }
}

/// Eject particles of different groups from each other, scaled by how deep
/// they sit inside a solid group.
pub(crate) fn solve_solid(
    buffers: &mut ParticleBuffers,
    contacts: &[ParticleContact],
    def: &ParticleSystemDef,
    ctx: &StepContext,
    scratch: &mut Scratch,
) {
    let Some(depth) = &buffers.depth else {
        return;
    };
    let ejection = ctx.inv_dt * def.ejection_strength;
    let delta_v = &mut scratch.delta_v;

    for c in contacts {
        if buffers.group[c.a] != buffers.group[c.b] {
            let h = depth[c.a] + depth[c.b];
            let f = ejection * h * c.weight * c.normal;
            delta_v[c.a] -= f;
            delta_v[c.b] += f;
        }
    }

    scratch.apply_delta_v(&mut buffers.velocity);
}
