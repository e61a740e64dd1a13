use glam::Vec2;

use crate::config::ParticleSystemDef;
use crate::group::{GroupArena, GroupFlags, GroupStatistics};
use crate::math::{cross, Rot, Transform};
use crate::particle::ParticleBuffers;
use crate::solver::StepContext;

/// Best rigid transform mapping `rest` points onto `current` points.
///
/// With both point sets centered on their means (`q` and `p`), the optimal
/// 2D rotation has the closed form `theta = atan2(sum q x p, sum q . p)`;
/// the translation then maps the rest centroid onto the current one.
///
/// Returns `None` for empty or mismatched inputs, and when the rotation is
/// undetermined (a single point, or all points on the centroid).
///
/// Reference: "Meshless Deformations Based on Shape Matching", Mueller et al., 2005
pub fn fit_rigid_transform(rest: &[Vec2], current: &[Vec2]) -> Option<Transform> {
    let n = rest.len();
    if n == 0 || n != current.len() {
        return None;
    }
    let inv_n = 1.0 / n as f32;
    let rest_center = rest.iter().copied().sum::<Vec2>() * inv_n;
    let center = current.iter().copied().sum::<Vec2>() * inv_n;

    let mut s = 0.0;
    let mut c = 0.0;
    for (&q, &p) in rest.iter().zip(current) {
        let q = q - rest_center;
        let p = p - center;
        s += cross(q, p);
        c += q.dot(p);
    }
    let len = (s * s + c * c).sqrt();
    if len <= f32::EPSILON {
        return None;
    }

    let q = Rot {
        s: s / len,
        c: c / len,
    };
    Some(Transform {
        p: center - q.apply(rest_center),
        q,
    })
}

/// Shape matching for rigid groups.
///
/// For each rigid group:
/// 1. Predict member positions one step ahead
/// 2. Fit the rigid transform from rest offsets to predicted positions
/// 3. Pull each member toward its goal `T * rest` with `rigid_stiffness`
/// 4. Store the fitted transform and the resulting group velocities
pub(crate) fn solve_rigid(
    buffers: &mut ParticleBuffers,
    groups: &mut GroupArena,
    def: &ParticleSystemDef,
    ctx: &StepContext,
) {
    let ParticleBuffers {
        position,
        velocity,
        rest_offset,
        ..
    } = buffers;
    let Some(rest) = rest_offset.as_ref() else {
        return;
    };
    let mut predicted = Vec::new();

    for group in groups.values_mut() {
        if !group.flags.contains(GroupFlags::RIGID) || group.is_empty() {
            continue;
        }
        let range = group.range();
        predicted.clear();
        predicted.extend(range.clone().map(|i| position[i] + ctx.dt * velocity[i]));
        let rest = &rest[range.clone()];

        let transform = fit_rigid_transform(rest, &predicted).unwrap_or_else(|| {
            // Rotation undetermined; keep the previous one.
            let q = group.transform.q;
            let n = predicted.len() as f32;
            let center = predicted.iter().copied().sum::<Vec2>() / n;
            let rest_center = rest.iter().copied().sum::<Vec2>() / n;
            Transform {
                p: center - q.apply(rest_center),
                q,
            }
        });

        let gain = def.rigid_stiffness * ctx.inv_dt;
        for (k, i) in range.clone().enumerate() {
            let goal = transform.apply(rest[k]);
            velocity[i] += gain * (goal - predicted[k]);
        }

        let stats = GroupStatistics::compute(&position[range.clone()], &velocity[range], 1.0);
        group.transform = transform;
        group.linear_velocity = stats.linear_velocity;
        group.angular_velocity = stats.angular_velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
            Vec2::new(0.3, 0.2),
        ]
    }

    #[test]
    fn test_fit_recovers_rotation_and_translation() {
        let rest = square();
        let truth = Transform::new(Vec2::new(3.0, -2.0), 0.6);
        let current: Vec<Vec2> = rest.iter().map(|&q| truth.apply(q)).collect();

        let fit = fit_rigid_transform(&rest, &current).unwrap();
        assert!((fit.angle() - 0.6).abs() < 1e-5, "angle {}", fit.angle());
        assert!((fit.p - truth.p).length() < 1e-4, "translation {:?}", fit.p);
    }

    #[test]
    fn test_fit_handles_large_rotation() {
        let rest = square();
        let truth = Transform::new(Vec2::ZERO, -2.8);
        let current: Vec<Vec2> = rest.iter().map(|&q| truth.apply(q)).collect();

        let fit = fit_rigid_transform(&rest, &current).unwrap();
        assert!((fit.angle() + 2.8).abs() < 1e-5);
    }

    #[test]
    fn test_fit_single_point_is_undetermined() {
        assert!(fit_rigid_transform(&[Vec2::ONE], &[Vec2::ZERO]).is_none());
        assert!(fit_rigid_transform(&[], &[]).is_none());
    }
}
