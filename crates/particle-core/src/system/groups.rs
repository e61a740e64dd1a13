//! Group creation, joining, splitting and group-wide operations.

use glam::Vec2;
use tracing::{debug, warn};

use super::ParticleSystem;
use crate::constraints::bonds::{create_bonds, BondRules};
use crate::group::{
    GroupArena, GroupFlags, GroupId, GroupState, GroupStatistics, ParticleGroup, ParticleGroupDef,
};
use crate::math::{cross_sv, Transform};
use crate::particle::{ParticleBuffers, ParticleDef, ParticleFlags};
use crate::shapes::{Edge, Shape};

/// Whether particle `i` may take part in new bonds.
pub(crate) fn can_connect(buffers: &ParticleBuffers, groups: &GroupArena, i: usize) -> bool {
    let flags = buffers.flags[i];
    if flags.intersects(ParticleFlags::WALL | ParticleFlags::SPRING | ParticleFlags::ELASTIC) {
        return true;
    }
    buffers.group[i]
        .and_then(|id| groups.get(id))
        .is_some_and(|g| g.flags.contains(GroupFlags::RIGID))
}

/// Bond strength contributed by particle `i`: its group's, or 1.
pub(crate) fn bond_strength(buffers: &ParticleBuffers, groups: &GroupArena, i: usize) -> f32 {
    buffers.group[i]
        .and_then(|id| groups.get(id))
        .map_or(1.0, |g| g.strength)
}

/// Lattice points of `shape` (local frame) spaced by `stride`.
///
/// Solid shapes are filled on the lattice aligned to multiples of `stride`;
/// edges are stroked from `v1` toward `v2`.
fn fill_shape(shape: &Shape, stride: f32, out: &mut Vec<Vec2>) {
    match shape {
        Shape::Edge(edge) => stroke_edge(edge, stride, out),
        _ => {
            let aabb = shape.aabb(&Transform::IDENTITY);
            let x0 = (aabb.lower.x / stride).floor() as i64;
            let y0 = (aabb.lower.y / stride).floor() as i64;
            let mut iy = y0;
            while (iy as f32) * stride < aabb.upper.y {
                let mut ix = x0;
                while (ix as f32) * stride < aabb.upper.x {
                    let p = Vec2::new(ix as f32, iy as f32) * stride;
                    if shape.test_point(&Transform::IDENTITY, p) {
                        out.push(p);
                    }
                    ix += 1;
                }
                iy += 1;
            }
        }
    }
}

fn stroke_edge(edge: &Edge, stride: f32, out: &mut Vec<Vec2>) {
    let d = edge.v2 - edge.v1;
    let length = d.length();
    if length <= f32::EPSILON {
        out.push(edge.v1);
        return;
    }
    let mut k = 0;
    while (k as f32) * stride < length {
        out.push(edge.v1 + d * ((k as f32) * stride / length));
        k += 1;
    }
}

impl ParticleSystem {
    /// Create a group of particles filling `def.shapes` plus `def.positions`.
    ///
    /// 1. Generate lattice points in the group frame, then map them to world
    /// 2. Create the particles with the group's velocity field applied
    /// 3. Register the group over the new contiguous range
    /// 4. Record rest offsets for rigid groups
    /// 5. Bond members (springs, elastic triads, walls)
    /// 6. Join `def.group` when its flags match
    ///
    /// Particles that do not fit under the capacity limit are skipped.
    pub fn create_particle_group(&mut self, def: &ParticleGroupDef) -> GroupId {
        let xf = Transform::new(def.position, def.angle);
        let stride = if def.stride > 0.0 {
            def.stride
        } else {
            self.def.stride()
        };

        let mut local = Vec::new();
        for shape in def.shapes {
            fill_shape(shape, stride, &mut local);
        }
        local.extend_from_slice(def.positions);

        let mut created = 0;
        for &p in &local {
            let position = xf.apply(p);
            let particle = ParticleDef {
                flags: def.flags,
                position,
                velocity: def.linear_velocity
                    + cross_sv(def.angular_velocity, position - def.position),
                color: def.color,
                lifetime: def.lifetime,
                user_data: def.user_data,
                group: None,
            };
            if self.create_particle_reserving(&particle, created).is_none() {
                break;
            }
            created += 1;
        }

        let last = self.count();
        let first = last - created;
        let mut group = ParticleGroup::new(first..last, def.group_flags, def.strength, def.user_data);
        group.transform = xf;
        let id = self.groups.insert(group);
        for slot in &mut self.buffers.group[first..last] {
            *slot = Some(id);
        }
        if created == 0 {
            debug!(?id, "empty particle group created");
        }

        if def.group_flags.contains(GroupFlags::RIGID) {
            let ParticleBuffers {
                position,
                rest_offset,
                ..
            } = &mut self.buffers;
            let rest = rest_offset.get_or_insert_with(|| vec![Vec2::ZERO; position.len()]);
            for i in first..last {
                rest[i] = xf.apply_inv(position[i]);
            }
        }

        self.bond_range(
            first..last,
            &|_: usize, _: usize| true,
            &|_: usize, _: usize, _: usize| true,
        );
        self.all_group_flags |= def.group_flags;
        debug!(
            ?id,
            count = created,
            flags = ?def.flags,
            group_flags = ?def.group_flags,
            "particle group created"
        );

        if let Some(target) = def.group {
            match self.groups.get(target).map(|g| g.flags) {
                Some(flags) if flags == def.group_flags => {
                    self.join_particle_groups(target, id);
                    return target;
                }
                Some(flags) => warn!(
                    ?target,
                    ?flags,
                    requested = ?def.group_flags,
                    "group flags differ; created a separate group"
                ),
                None => warn!(?target, "join target is not a live group"),
            }
        }
        id
    }

    /// Bond particles in `range` that satisfy the extra acceptance tests.
    fn bond_range(
        &mut self,
        range: std::ops::Range<usize>,
        accept_pair: &dyn Fn(usize, usize) -> bool,
        accept_triad: &dyn Fn(usize, usize, usize) -> bool,
    ) {
        let buffers = &self.buffers;
        let groups = &self.groups;
        let connectable = |i: usize| can_connect(buffers, groups, i);
        let strength = |i: usize| bond_strength(buffers, groups, i);
        let rules = BondRules {
            range,
            can_connect: &connectable,
            accept_pair,
            accept_triad,
            strength: &strength,
        };
        create_bonds(
            buffers,
            self.def.diameter(),
            &rules,
            &mut self.pairs,
            &mut self.triads,
        );
    }

    /// Merge group `b` into group `a`.
    ///
    /// Both groups are rotated to the end of the buffers so that `b` directly
    /// follows `a`, new bonds are created across the seam, and `b` is removed.
    pub fn join_particle_groups(&mut self, a: GroupId, b: GroupId) {
        if a == b || self.groups.get(a).is_none() || self.groups.get(b).is_none() {
            warn!(?a, ?b, "cannot join groups");
            return;
        }
        let count = self.count();
        let Some(range_b) = self.groups.get(b).map(|g| g.range()) else {
            return;
        };
        self.rotate_buffer(range_b.start, range_b.end, count);
        let (Some(range_a), Some(range_b)) = (
            self.groups.get(a).map(|g| g.range()),
            self.groups.get(b).map(|g| g.range()),
        ) else {
            return;
        };
        self.rotate_buffer(range_a.start, range_a.end, range_b.start);

        let (Some(range_a), Some(range_b)) = (
            self.groups.get(a).map(|g| g.range()),
            self.groups.get(b).map(|g| g.range()),
        ) else {
            return;
        };
        let seam = range_b.start;
        let side = move |i: usize| i < seam;
        self.bond_range(
            range_a.start..range_b.end,
            &|i: usize, j: usize| side(i) != side(j),
            &|i: usize, j: usize, k: usize| !(side(i) == side(j) && side(j) == side(k)),
        );

        let Some(removed) = self.groups.remove(b) else {
            return;
        };
        for slot in &mut self.buffers.group[range_b.clone()] {
            *slot = Some(a);
        }
        let Some(group) = self.groups.get_mut(a) else {
            return;
        };
        group.last = range_b.end;
        group.flags |= removed.flags;
        group.needs_depth |= group.flags.contains(GroupFlags::SOLID);

        if group.flags.contains(GroupFlags::RIGID) {
            let xf = group.transform;
            let ParticleBuffers {
                position,
                rest_offset,
                ..
            } = &mut self.buffers;
            let rest = rest_offset.get_or_insert_with(|| vec![Vec2::ZERO; position.len()]);
            for i in range_b.clone() {
                rest[i] = xf.apply_inv(position[i]);
            }
        }

        if let Some(listener) = self.listeners.destruction.as_mut() {
            listener.group_destroyed(b, &mut self.commands);
        }
        debug!(?a, ?b, count = range_b.end - range_a.start, "particle groups joined");
    }

    /// Split `id` into its connected components.
    ///
    /// Particles closer than one diameter are connected. The largest
    /// component keeps `id`; the ids of the new groups are returned.
    pub fn split_particle_group(&mut self, id: GroupId) -> Vec<GroupId> {
        self.solve_zombie();
        self.split_group(id)
    }

    /// Mark every particle of the group for destruction. The group itself
    /// goes away at the next compaction unless it may be empty.
    pub fn destroy_particles_in_group(&mut self, id: GroupId, call_listener: bool) {
        let Some(range) = self.groups.get(id).map(|g| g.range()) else {
            return;
        };
        for i in range {
            self.destroy_particle(i, call_listener);
        }
    }

    /// Spread `force` evenly over the group's particles.
    pub fn group_apply_force(&mut self, id: GroupId, force: Vec2) {
        if let Some(range) = self.groups.get(id).map(|g| g.range()) {
            self.apply_force(range, force);
        }
    }

    /// Change the group's momentum by `impulse`.
    pub fn group_apply_linear_impulse(&mut self, id: GroupId, impulse: Vec2) {
        if let Some(range) = self.groups.get(id).map(|g| g.range()) {
            self.apply_linear_impulse(range, impulse);
        }
    }

    pub fn group_statistics(&self, id: GroupId) -> Option<GroupStatistics> {
        let range = self.groups.get(id)?.range();
        Some(GroupStatistics::compute(
            &self.buffers.position[range.clone()],
            &self.buffers.velocity[range],
            self.particle_mass(),
        ))
    }

    /// OR of the flags of the group's particles.
    pub fn group_all_particle_flags(&self, id: GroupId) -> ParticleFlags {
        self.groups
            .get(id)
            .map_or(ParticleFlags::empty(), |g| self.buffers.flags_in(g.range()))
    }

    /// `None` once the group has been destroyed.
    pub fn group_state(&self, id: GroupId) -> Option<GroupState> {
        let group = self.groups.get(id)?;
        if self.buffers.flags_in(group.range()).contains(ParticleFlags::ZOMBIE) {
            Some(GroupState::PartiallyZombie)
        } else {
            Some(GroupState::Active)
        }
    }

    /// Replace the group's flags.
    ///
    /// Turning a group rigid records its current shape as the rest shape,
    /// centered on the group's centroid.
    pub fn set_group_flags(&mut self, id: GroupId, flags: GroupFlags) {
        let Some(group) = self.groups.get_mut(id) else {
            return;
        };
        let old = group.flags;
        let range = group.range();
        if flags.contains(GroupFlags::SOLID) && !old.contains(GroupFlags::SOLID) {
            group.needs_depth = true;
        }
        group.flags = flags;

        if flags.contains(GroupFlags::RIGID) && !old.contains(GroupFlags::RIGID) {
            let stats = GroupStatistics::compute(
                &self.buffers.position[range.clone()],
                &self.buffers.velocity[range.clone()],
                1.0,
            );
            let xf = Transform::new(stats.center, 0.0);
            group.transform = xf;
            group.linear_velocity = stats.linear_velocity;
            group.angular_velocity = stats.angular_velocity;
            let ParticleBuffers {
                position,
                rest_offset,
                ..
            } = &mut self.buffers;
            let rest = rest_offset.get_or_insert_with(|| vec![Vec2::ZERO; position.len()]);
            for i in range {
                rest[i] = xf.apply_inv(position[i]);
            }
        }
        self.all_group_flags |= flags;
    }

    /// Remove a group from the arena, notifying the destruction listener.
    pub(crate) fn destroy_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.remove(id) else {
            return;
        };
        for slot in &mut self.buffers.group[group.range()] {
            *slot = None;
        }
        if let Some(listener) = self.listeners.destruction.as_mut() {
            listener.group_destroyed(id, &mut self.commands);
        }
        debug!(?id, "particle group destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{Circle, Polygon};

    #[test]
    fn test_fill_box_on_stride_lattice() {
        let shape = Shape::Polygon(Polygon::new_box(1.0, 1.0));
        let mut points = Vec::new();
        fill_shape(&shape, 0.5, &mut points);
        // Lattice x, y in {-1, -0.5, 0, 0.5}; the upper boundary is exclusive.
        assert_eq!(points.len(), 16);
        for p in &points {
            assert_eq!((p.x / 0.5).fract(), 0.0, "x not on lattice: {p:?}");
            assert_eq!((p.y / 0.5).fract(), 0.0, "y not on lattice: {p:?}");
        }
    }

    #[test]
    fn test_fill_circle_stays_inside() {
        let shape = Shape::Circle(Circle::new(Vec2::ZERO, 1.0));
        let mut points = Vec::new();
        fill_shape(&shape, 0.25, &mut points);
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| p.length() <= 1.0));
    }

    #[test]
    fn test_stroke_edge() {
        let edge = Edge::new(Vec2::ZERO, Vec2::new(1.0, 0.0));
        let mut points = Vec::new();
        stroke_edge(&edge, 0.25, &mut points);
        assert_eq!(points.len(), 4);
        assert!((points[3].x - 0.75).abs() < 1e-6);
    }
}
