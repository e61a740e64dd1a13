//! Contact generation between particles, and between particles and fixtures.

use glam::Vec2;

use crate::constraints::bonds::Pair;
use crate::grid::SpatialHashGrid;
use crate::listener::ContactFilter;
use crate::math::cross;
use crate::particle::{ParticleBuffers, ParticleFlags};
use crate::shapes::Aabb;
use crate::world::{FixtureId, RigidWorld};

/// Two particles closer than one diameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleContact {
    /// Always the smaller index.
    pub a: usize,
    pub b: usize,
    /// `1 - distance / diameter`.
    pub weight: f32,
    /// Unit vector from `a` toward `b`.
    pub normal: Vec2,
    /// Union of both particles' flags.
    pub flags: ParticleFlags,
}

impl ParticleContact {
    pub fn key(&self) -> (usize, usize) {
        (self.a, self.b)
    }
}

/// A particle closer than one diameter to a fixture surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyContact {
    pub index: usize,
    pub fixture: FixtureId,
    /// `1 - distance / diameter`; above one when the particle is inside.
    pub weight: f32,
    /// Unit vector from the particle toward the fixture.
    pub normal: Vec2,
    /// Effective mass of the particle-body pair along `normal`.
    pub mass: f32,
    /// Closest surface point, in the fixture's local frame.
    pub point: Vec2,
}

impl BodyContact {
    pub fn key(&self) -> (usize, FixtureId) {
        (self.index, self.fixture)
    }
}

/// A particle that may cross the segment between barrier particles `a` and `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BarrierCandidate {
    pub a: usize,
    pub b: usize,
    pub particle: usize,
}

/// Contacts of the current sub-iteration.
#[derive(Default)]
pub(crate) struct ContactSet {
    pub particle: Vec<ParticleContact>,
    pub body: Vec<BodyContact>,
    pub barrier: Vec<BarrierCandidate>,
}

impl ContactSet {
    pub fn clear(&mut self) {
        self.particle.clear();
        self.body.clear();
        self.barrier.clear();
    }
}

/// Find every particle pair within one diameter. The grid must have been
/// built from `buffers.position` with a cell size of at least `diameter`.
pub(crate) fn find_particle_contacts(
    buffers: &ParticleBuffers,
    grid: &SpatialHashGrid,
    diameter: f32,
    filter: Option<&dyn ContactFilter>,
    out: &mut Vec<ParticleContact>,
) {
    out.clear();
    let squared_diameter = diameter * diameter;
    let inv_diameter = 1.0 / diameter;
    let positions = &buffers.position;
    let flags = &buffers.flags;

    grid.for_each_pair(|i, j| {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        let d = positions[b] - positions[a];
        let distance_squared = d.length_squared();
        if distance_squared >= squared_diameter {
            return;
        }
        let pair_flags = flags[a] | flags[b];
        if pair_flags.contains(ParticleFlags::ZOMBIE) {
            return;
        }
        if pair_flags.contains(ParticleFlags::PARTICLE_CONTACT_FILTER) {
            if let Some(filter) = filter {
                if !filter.should_collide_particles(buffers, a, b) {
                    return;
                }
            }
        }

        let distance = distance_squared.sqrt();
        // Coincident particles get an arbitrary but fixed separation axis.
        let normal = if distance > 0.0 { d / distance } else { Vec2::X };
        out.push(ParticleContact {
            a,
            b,
            weight: 1.0 - distance * inv_diameter,
            normal,
            flags: pair_flags,
        });
    });
}

/// Find particles within one diameter of a fixture surface.
pub(crate) fn find_body_contacts(
    buffers: &ParticleBuffers,
    grid: &SpatialHashGrid,
    world: &dyn RigidWorld,
    diameter: f32,
    particle_inv_mass: f32,
    filter: Option<&dyn ContactFilter>,
    out: &mut Vec<BodyContact>,
) {
    out.clear();
    let Some(bounds) = particle_bounds(&buffers.position) else {
        return;
    };
    let bounds = Aabb::new(
        bounds.lower - Vec2::splat(diameter),
        bounds.upper + Vec2::splat(diameter),
    );

    let mut fixtures = Vec::new();
    world.query_aabb(&bounds, &mut |id| {
        fixtures.push(id);
        true
    });

    let inv_diameter = 1.0 / diameter;
    for id in fixtures {
        let Some(fixture) = world.fixture(id) else {
            continue;
        };
        if fixture.is_sensor() || !fixture.collides_with_particles() {
            continue;
        }
        let xf = fixture.transform();
        let shape = fixture.shape();
        let aabb = shape.aabb(&xf);
        let aabb = Aabb::new(
            aabb.lower - Vec2::splat(diameter),
            aabb.upper + Vec2::splat(diameter),
        );
        let body = world.body_state(id);
        let body_inv_mass = body.inv_mass();
        let body_inv_inertia = body.inv_inertia();

        grid.query_aabb(&aabb, |i| {
            let a = i as usize;
            let p = buffers.position[a];
            let flags = buffers.flags[a];
            if !aabb.contains(p) || flags.contains(ParticleFlags::ZOMBIE) {
                return;
            }
            let (distance, n) = shape.distance(&xf, p);
            if distance >= diameter {
                return;
            }
            if flags.contains(ParticleFlags::FIXTURE_CONTACT_FILTER) {
                if let Some(filter) = filter {
                    if !filter.should_collide_fixture(fixture, buffers, a) {
                        return;
                    }
                }
            }

            let inv_am = if flags.contains(ParticleFlags::WALL) {
                0.0
            } else {
                particle_inv_mass
            };
            let rpn = cross(p - body.world_center, n);
            let inv_m = inv_am + body_inv_mass + body_inv_inertia * rpn * rpn;
            out.push(BodyContact {
                index: a,
                fixture: id,
                weight: 1.0 - distance * inv_diameter,
                normal: -n,
                mass: if inv_m > 0.0 { 1.0 / inv_m } else { 0.0 },
                point: xf.apply_inv(p - distance * n),
            });
        });
    }
}

/// Find particles that could cross a barrier pair within `horizon` seconds.
///
/// The swept box of the bond is inflated by `reach`, the farthest any
/// particle can travel in `horizon`, so particles approaching a static
/// barrier are found before they reach it.
pub(crate) fn find_barrier_candidates(
    buffers: &ParticleBuffers,
    grid: &SpatialHashGrid,
    pairs: &[Pair],
    horizon: f32,
    reach: f32,
    out: &mut Vec<BarrierCandidate>,
) {
    out.clear();
    let positions = &buffers.position;
    let velocities = &buffers.velocity;

    for pair in pairs {
        if !pair.flags.contains(ParticleFlags::BARRIER) {
            continue;
        }
        let (a, b) = (pair.a, pair.b);
        let pa = positions[a];
        let pb = positions[b];
        let Some(aabb) = particle_bounds(&[
            pa,
            pb,
            pa + horizon * velocities[a],
            pb + horizon * velocities[b],
        ]) else {
            continue;
        };
        let aabb = Aabb::new(aabb.lower - Vec2::splat(reach), aabb.upper + Vec2::splat(reach));
        grid.query_aabb(&aabb, |c| {
            let c = c as usize;
            if c != a && c != b && aabb.contains(positions[c]) {
                out.push(BarrierCandidate { a, b, particle: c });
            }
        });
    }
}

fn particle_bounds(points: &[Vec2]) -> Option<Aabb> {
    let (&first, rest) = points.split_first()?;
    Some(rest.iter().fold(Aabb::new(first, first), |acc, &p| {
        Aabb::new(acc.lower.min(p), acc.upper.max(p))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleDef;

    fn buffers(points: &[Vec2]) -> ParticleBuffers {
        let mut buffers = ParticleBuffers::default();
        for (i, &position) in points.iter().enumerate() {
            buffers.push(
                &ParticleDef {
                    position,
                    ..Default::default()
                },
                i as u64,
            );
        }
        buffers
    }

    #[test]
    fn test_contact_weight_and_normal() {
        let buffers = buffers(&[Vec2::ZERO, Vec2::new(0.5, 0.0), Vec2::new(5.0, 0.0)]);
        let mut grid = SpatialHashGrid::new(1.0);
        grid.build(&buffers.position);

        let mut contacts = Vec::new();
        find_particle_contacts(&buffers, &grid, 1.0, None, &mut contacts);

        assert_eq!(contacts.len(), 1);
        let c = contacts[0];
        assert_eq!(c.key(), (0, 1));
        assert!((c.weight - 0.5).abs() < 1e-6);
        assert_eq!(c.normal, Vec2::X);
    }

    #[test]
    fn test_barrier_candidate_found_before_reaching_static_barrier() {
        // A static barrier bond on x = 0 and a particle heading at it.
        let mut buffers = buffers(&[Vec2::ZERO, Vec2::new(0.0, 0.15), Vec2::new(-0.3, 0.075)]);
        buffers.velocity[2] = Vec2::new(8.0, 0.0);
        let mut grid = SpatialHashGrid::new(0.2);
        grid.build(&buffers.position);
        let pairs = [Pair {
            a: 0,
            b: 1,
            flags: ParticleFlags::BARRIER | ParticleFlags::WALL,
            strength: 1.0,
            distance: 0.15,
        }];

        let mut out = Vec::new();
        find_barrier_candidates(&buffers, &grid, &pairs, 2.5 / 60.0, 2.5 * 0.2, &mut out);
        assert_eq!(
            out,
            vec![BarrierCandidate {
                a: 0,
                b: 1,
                particle: 2
            }]
        );
    }

    #[test]
    fn test_bounds_of_points() {
        let aabb = particle_bounds(&[Vec2::new(1.0, -1.0), Vec2::new(-2.0, 3.0)]).unwrap();
        assert_eq!(aabb.lower, Vec2::new(-2.0, -1.0));
        assert_eq!(aabb.upper, Vec2::new(1.0, 3.0));
        assert!(particle_bounds(&[]).is_none());
    }
}
