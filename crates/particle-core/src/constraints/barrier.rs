use glam::Vec2;

use crate::config::BARRIER_COLLISION_TIME;
use crate::contact::BarrierCandidate;
use crate::math::cross;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::solver::{Scratch, StepContext};

/// Keep particles from slipping through barrier bonds.
///
/// Barrier particles that are also walls are stopped outright. For every
/// candidate `c` near a barrier bond `(a, b)`, solve
/// `(1 - s) * (pa + t * va) + s * (pb + t * vb) = pc + t * vc`
/// for the crossing time `t` in `[0, 2.5 * dt)` and segment parameter
/// `s` in `[0, 1]`. On a crossing, `c` takes the interpolated bond velocity
/// and the opposite force is queued so momentum is returned next step.
///
/// Returns `true` when a force was queued.
pub(crate) fn solve_barrier(
    buffers: &mut ParticleBuffers,
    candidates: &[BarrierCandidate],
    ctx: &StepContext,
    scratch: &mut Scratch,
) -> bool {
    let barrier_wall = ParticleFlags::BARRIER | ParticleFlags::WALL;
    for (v, f) in buffers.velocity.iter_mut().zip(&buffers.flags) {
        if f.contains(barrier_wall) {
            *v = Vec2::ZERO;
        }
    }

    let tmax = BARRIER_COLLISION_TIME * ctx.dt;
    let position = &buffers.position;
    let velocity = &buffers.velocity;
    let group = &buffers.group;
    let delta_v = &mut scratch.delta_v;
    let mut queued = false;

    for candidate in candidates {
        let (a, b, c) = (candidate.a, candidate.b, candidate.particle);
        if group[c] == group[a] || group[c] == group[b] {
            continue;
        }
        if buffers.flags[c].contains(ParticleFlags::WALL) {
            continue;
        }

        let (pa, pb, pc) = (position[a], position[b], position[c]);
        let (va, vb, vc) = (velocity[a], velocity[b], velocity[c]);
        let Some(s) = crossing(pb - pa, vb - va, pc - pa, vc - va, tmax) else {
            continue;
        };

        let dv = va + s * (vb - va) - vc;
        delta_v[c] += dv;
        buffers.force[c] -= ctx.inv_dt * ctx.particle_mass * dv;
        queued = true;
    }

    scratch.apply_delta_v(&mut buffers.velocity);
    queued
}

/// Segment parameter where a point moving with relative velocity `vca`
/// from `pca` meets the moving segment `pba, vba`, if it happens within
/// `[0, tmax)`.
fn crossing(pba: Vec2, vba: Vec2, pca: Vec2, vca: Vec2, tmax: f32) -> Option<f32> {
    let e2 = cross(vba, vca);
    let e1 = cross(pba, vca) - cross(pca, vba);
    let e0 = cross(pba, pca);

    let param = |t: f32| -> Option<f32> {
        if !(t >= 0.0 && t < tmax) {
            return None;
        }
        let qba = pba + t * vba;
        let qca = pca + t * vca;
        let len = qba.dot(qba);
        if len <= 0.0 {
            return None;
        }
        let s = qba.dot(qca) / len;
        (0.0..=1.0).contains(&s).then_some(s)
    };

    if e2 == 0.0 {
        if e1 == 0.0 {
            return None;
        }
        return param(-e0 / e1);
    }

    let det = e1 * e1 - 4.0 * e0 * e2;
    if det < 0.0 {
        return None;
    }
    let sqrt_det = det.sqrt();
    let mut t1 = (-e1 - sqrt_det) / (2.0 * e2);
    let mut t2 = (-e1 + sqrt_det) / (2.0 * e2);
    if t1 > t2 {
        std::mem::swap(&mut t1, &mut t2);
    }
    param(t1).or_else(|| param(t2))
}
