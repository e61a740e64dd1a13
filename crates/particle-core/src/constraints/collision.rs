use crate::config::LINEAR_SLOP;
use crate::listener::ContactFilter;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::shapes::{Aabb, RayHit};
use crate::solver::{Scratch, StepContext};
use crate::world::{FixtureId, RigidWorld};

/// Continuous collision of particles against fixtures.
///
/// Each particle's motion this sub-step, `p -> p + dt * v`, is ray cast
/// against nearby fixtures. On a hit the particle is stopped at the surface
/// (plus [`LINEAR_SLOP`] along the normal) and the momentum it lost is handed
/// to the body.
pub(crate) fn solve_collision(
    buffers: &mut ParticleBuffers,
    world: &dyn RigidWorld,
    ctx: &StepContext,
    filter: Option<&dyn ContactFilter>,
    scratch: &mut Scratch,
) {
    let count = buffers.count();
    let mut fixtures: Vec<FixtureId> = Vec::new();

    for i in 0..count {
        let flags = buffers.flags[i];
        if flags.intersects(ParticleFlags::WALL | ParticleFlags::ZOMBIE) {
            continue;
        }
        let p1 = buffers.position[i];
        let v = buffers.velocity[i];
        let p2 = p1 + ctx.dt * v;
        if p1 == p2 {
            continue;
        }
        let aabb = Aabb::new(p1.min(p2), p1.max(p2));

        fixtures.clear();
        world.query_aabb(&aabb, &mut |id| {
            fixtures.push(id);
            true
        });

        let mut nearest: Option<(FixtureId, RayHit)> = None;
        for &id in &fixtures {
            let Some(fixture) = world.fixture(id) else {
                continue;
            };
            if fixture.is_sensor() || !fixture.collides_with_particles() {
                continue;
            }
            if flags.contains(ParticleFlags::FIXTURE_CONTACT_FILTER) {
                if let Some(filter) = filter {
                    if !filter.should_collide_fixture(fixture, buffers, i) {
                        continue;
                    }
                }
            }
            let Some(hit) = fixture.shape().ray_cast(&fixture.transform(), p1, p2) else {
                continue;
            };
            if nearest.map_or(true, |(_, best)| hit.fraction < best.fraction) {
                nearest = Some((id, hit));
            }
        }

        if let Some((id, hit)) = nearest {
            let point = p1.lerp(p2, hit.fraction) + LINEAR_SLOP * hit.normal;
            let stopped = ctx.inv_dt * (point - p1);
            buffers.velocity[i] = stopped;
            let impulse = ctx.particle_mass * (v - stopped);
            scratch.body_impulses.push((id, impulse, point));
        }
    }
}
