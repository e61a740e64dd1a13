use std::ops::Range;

use glam::Vec2;

use super::triangulation::delaunay;
use crate::config::MAX_TRIAD_DISTANCE;
use crate::grid::SpatialHashGrid;
use crate::particle::{ParticleBuffers, ParticleFlags};

/// Two bonded particles remembering their rest distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pair {
    pub a: usize,
    pub b: usize,
    pub flags: ParticleFlags,
    pub strength: f32,
    pub distance: f32,
}

/// Three bonded particles remembering their rest offsets from the triad centroid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triad {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub flags: ParticleFlags,
    pub strength: f32,
    pub pa: Vec2,
    pub pb: Vec2,
    pub pc: Vec2,
}

/// Which particles may bond, and with what strength.
pub(crate) struct BondRules<'a> {
    /// Particles considered.
    pub range: Range<usize>,
    pub can_connect: &'a dyn Fn(usize) -> bool,
    /// Extra condition on the bonded particles, e.g. spanning a join seam.
    pub accept_pair: &'a dyn Fn(usize, usize) -> bool,
    pub accept_triad: &'a dyn Fn(usize, usize, usize) -> bool,
    pub strength: &'a dyn Fn(usize) -> f32,
}

/// Create pairs and triads among the particles of `rules.range`.
pub(crate) fn create_bonds(
    buffers: &ParticleBuffers,
    diameter: f32,
    rules: &BondRules,
    pairs: &mut Vec<Pair>,
    triads: &mut Vec<Triad>,
) {
    let range = rules.range.clone();
    if range.is_empty() {
        return;
    }
    let positions = &buffers.position[range.clone()];
    let flags = &buffers.flags;
    let any_flags = buffers.flags_in(range.clone());

    if any_flags.intersects(ParticleFlags::PAIR_FLAGS) {
        let mut grid = SpatialHashGrid::new(diameter);
        grid.build(positions);
        let squared_diameter = diameter * diameter;
        let added_from = pairs.len();

        grid.for_each_pair(|i, j| {
            let (a, b) = (range.start + i.min(j), range.start + i.max(j));
            let pair_flags = flags[a] | flags[b];
            if !pair_flags.intersects(ParticleFlags::PAIR_FLAGS)
                || pair_flags.contains(ParticleFlags::ZOMBIE)
            {
                return;
            }
            let distance_squared = buffers.position[a].distance_squared(buffers.position[b]);
            if distance_squared >= squared_diameter
                || !(rules.can_connect)(a)
                || !(rules.can_connect)(b)
                || !(rules.accept_pair)(a, b)
            {
                return;
            }
            pairs.push(Pair {
                a,
                b,
                flags: pair_flags,
                strength: (rules.strength)(a).min((rules.strength)(b)),
                distance: distance_squared.sqrt(),
            });
        });
        pairs[added_from..].sort_by_key(|p| (p.a, p.b));
    }

    if any_flags.intersects(ParticleFlags::TRIAD_FLAGS) {
        let members: Vec<usize> = range
            .clone()
            .filter(|&i| !flags[i].contains(ParticleFlags::ZOMBIE) && (rules.can_connect)(i))
            .collect();
        let points: Vec<Vec2> = members.iter().map(|&i| buffers.position[i]).collect();
        let max_distance = MAX_TRIAD_DISTANCE * diameter;
        let max_distance_squared = max_distance * max_distance;

        for [i, j, k] in delaunay(&points) {
            let (a, b, c) = (members[i], members[j], members[k]);
            let triad_flags = flags[a] | flags[b] | flags[c];
            if !triad_flags.intersects(ParticleFlags::TRIAD_FLAGS) {
                continue;
            }
            let (pa, pb, pc) = (buffers.position[a], buffers.position[b], buffers.position[c]);
            if pa.distance_squared(pb) >= max_distance_squared
                || pb.distance_squared(pc) >= max_distance_squared
                || pc.distance_squared(pa) >= max_distance_squared
                || !(rules.accept_triad)(a, b, c)
            {
                continue;
            }
            let mid = (pa + pb + pc) / 3.0;
            triads.push(Triad {
                a,
                b,
                c,
                flags: triad_flags,
                strength: (rules.strength)(a)
                    .min((rules.strength)(b))
                    .min((rules.strength)(c)),
                pa: pa - mid,
                pb: pb - mid,
                pc: pc - mid,
            });
        }
    }
}

/// Drop duplicate bonds, keeping the first occurrence.
pub(crate) fn dedup_bonds(pairs: &mut Vec<Pair>, triads: &mut Vec<Triad>) {
    pairs.sort_by_key(|p| (p.a, p.b));
    pairs.dedup_by_key(|p| (p.a, p.b));
    triads.sort_by_key(|t| sorted3(t.a, t.b, t.c));
    triads.dedup_by_key(|t| sorted3(t.a, t.b, t.c));
}

/// Rewrite bond indices after particles moved; bonds touching a removed
/// particle (`None`) are dropped.
pub(crate) fn remap_bonds(
    pairs: &mut Vec<Pair>,
    triads: &mut Vec<Triad>,
    new_index: impl Fn(usize) -> Option<usize>,
) {
    pairs.retain_mut(|p| match (new_index(p.a), new_index(p.b)) {
        (Some(a), Some(b)) => {
            p.a = a;
            p.b = b;
            true
        }
        _ => false,
    });
    triads.retain_mut(|t| match (new_index(t.a), new_index(t.b), new_index(t.c)) {
        (Some(a), Some(b), Some(c)) => {
            t.a = a;
            t.b = b;
            t.c = c;
            true
        }
        _ => false,
    });
}

fn sorted3(a: usize, b: usize, c: usize) -> [usize; 3] {
    let mut v = [a, b, c];
    v.sort_unstable();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleDef;

    fn lattice(flags: ParticleFlags, n: usize, spacing: f32) -> ParticleBuffers {
        let mut buffers = ParticleBuffers::default();
        for y in 0..n {
            for x in 0..n {
                let def = ParticleDef {
                    flags,
                    position: Vec2::new(x as f32, y as f32) * spacing,
                    ..Default::default()
                };
                buffers.push(&def, (y * n + x) as u64);
            }
        }
        buffers
    }

    fn any(_: usize) -> bool {
        true
    }

    fn any_pair(_: usize, _: usize) -> bool {
        true
    }

    fn any_triad(_: usize, _: usize, _: usize) -> bool {
        true
    }

    fn unit(_: usize) -> f32 {
        1.0
    }

    fn rules(range: Range<usize>) -> BondRules<'static> {
        BondRules {
            range,
            can_connect: &any,
            accept_pair: &any_pair,
            accept_triad: &any_triad,
            strength: &unit,
        }
    }

    #[test]
    fn test_spring_lattice_pairs_only_neighbors() {
        let buffers = lattice(ParticleFlags::SPRING, 3, 0.75);
        let mut pairs = Vec::new();
        let mut triads = Vec::new();
        create_bonds(&buffers, 1.0, &rules(0..9), &mut pairs, &mut triads);

        // 12 axis neighbors at 0.75; diagonals at 1.06 are out of range.
        assert_eq!(pairs.len(), 12);
        assert!(triads.is_empty());
        assert!(pairs.iter().all(|p| p.a < p.b && (p.distance - 0.75).abs() < 1e-5));
    }

    #[test]
    fn test_elastic_lattice_gets_triads() {
        let buffers = lattice(ParticleFlags::ELASTIC, 3, 0.75);
        let mut pairs = Vec::new();
        let mut triads = Vec::new();
        create_bonds(&buffers, 1.0, &rules(0..9), &mut pairs, &mut triads);

        assert!(pairs.is_empty());
        assert_eq!(triads.len(), 8);
        for t in &triads {
            let sum = t.pa + t.pb + t.pc;
            assert!(sum.length() < 1e-5, "rest offsets should be centered");
        }
    }

    #[test]
    fn test_remap_drops_removed() {
        let mut pairs = vec![
            Pair { a: 0, b: 1, flags: ParticleFlags::SPRING, strength: 1.0, distance: 1.0 },
            Pair { a: 1, b: 2, flags: ParticleFlags::SPRING, strength: 1.0, distance: 1.0 },
        ];
        let mut triads = Vec::new();
        remap_bonds(&mut pairs, &mut triads, |i| match i {
            0 => None,
            i => Some(i - 1),
        });
        assert_eq!(pairs.len(), 1);
        assert_eq!((pairs[0].a, pairs[0].b), (0, 1));
    }
}
