//! Buffer compaction and reordering.
//!
//! Particles never move on their own; they are only shifted here, and every
//! structure holding an index (handles, group ranges, bonds, listener state,
//! queued commands) is rewritten in the same pass.

use glam::Vec2;
use tracing::{debug, trace};

use crate::constraints::bonds::remap_bonds;
use crate::constraints::shape_matching::fit_rigid_transform;
use crate::grid::SpatialHashGrid;
use crate::group::{GroupFlags, GroupId, GroupStatistics, ParticleGroup};
use crate::particle::ParticleFlags;
use crate::system::ParticleSystem;

impl ParticleSystem {
    /// Remove zombie particles and drop groups left empty.
    ///
    /// 1. Notify the destruction listener for flagged zombies
    /// 2. Release their handles and drop their rows from every column
    /// 3. Rewrite group ranges, bonds and listener state to the new indices
    /// 4. Split rigid groups that lost members and came apart
    /// 5. Destroy empty groups unless they may stay empty
    pub(crate) fn solve_zombie(&mut self) {
        let count = self.count();
        let removed: Vec<bool> = self
            .buffers
            .flags
            .iter()
            .map(|f| f.contains(ParticleFlags::ZOMBIE))
            .collect();
        let removed_count = removed.iter().filter(|&&r| r).count();

        if removed_count > 0 {
            if let Some(listener) = self.listeners.destruction.as_mut() {
                for i in 0..count {
                    let flags = self.buffers.flags[i];
                    if flags.contains(ParticleFlags::ZOMBIE | ParticleFlags::DESTRUCTION_LISTENER) {
                        listener.particle_destroyed(&self.buffers, i, &mut self.commands);
                    }
                }
            }

            // survivors_before[i]: new index of the first survivor at or after i.
            let mut survivors_before = Vec::with_capacity(count + 1);
            let mut next = 0;
            for &gone in &removed {
                survivors_before.push(next);
                if !gone {
                    next += 1;
                }
            }
            survivors_before.push(next);

            for (i, handle) in self.buffers.handle.iter().enumerate() {
                if let (true, Some(handle)) = (removed[i], handle) {
                    self.handles.release(*handle);
                }
            }

            let mut damaged_rigid = Vec::new();
            for (id, group) in self.groups.iter() {
                if group.flags.contains(GroupFlags::RIGID)
                    && group.range().any(|i| removed[i])
                {
                    damaged_rigid.push(id);
                }
            }

            for column in self.buffers.columns() {
                column.remove_marked(&removed);
            }
            for (i, handle) in self.buffers.handle.iter().enumerate() {
                if let Some(handle) = handle {
                    self.handles.retarget(*handle, i);
                }
            }
            for group in self.groups.values_mut() {
                group.first = survivors_before[group.first];
                group.last = survivors_before[group.last];
                group.needs_depth |= group.flags.contains(GroupFlags::SOLID);
            }
            self.remap_indices(|i| (!removed[i]).then(|| survivors_before[i]));

            for id in damaged_rigid {
                self.split_group(id);
            }
            trace!(removed = removed_count, remaining = self.count(), "zombies removed");
        }

        let empty: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.is_empty() && !g.flags.contains(GroupFlags::CAN_BE_EMPTY))
            .map(|(id, _)| id)
            .collect();
        for id in empty {
            self.destroy_group(id);
        }
        debug_assert!(
            self.group_ranges_are_disjoint(),
            "particle group ranges overlap after compaction"
        );
    }

    /// Non-empty group ranges lie inside the buffer and never share a particle.
    pub(crate) fn group_ranges_are_disjoint(&self) -> bool {
        let mut ranges: Vec<_> = self
            .groups
            .iter()
            .map(|(_, g)| g.range())
            .filter(|r| !r.is_empty())
            .collect();
        ranges.sort_by_key(|r| r.start);
        ranges.last().map_or(true, |r| r.end <= self.count())
            && ranges.windows(2).all(|w| w[0].end <= w[1].start)
    }

    /// Rotate `[start, end)` so that `mid` becomes `start`, keeping every
    /// index holder consistent.
    ///
    /// Group ranges must not straddle `mid`.
    pub(crate) fn rotate_buffer(&mut self, start: usize, mid: usize, end: usize) {
        debug_assert!(start <= mid && mid <= end && end <= self.count());
        if start == mid || mid == end {
            return;
        }
        let new_index = |i: usize| {
            if i < start || i >= end {
                i
            } else if i < mid {
                i + end - mid
            } else {
                i + start - mid
            }
        };

        for column in self.buffers.columns() {
            column.rotate(start, mid, end);
        }
        for i in start..end {
            if let Some(handle) = self.buffers.handle[i] {
                self.handles.retarget(handle, i);
            }
        }
        for group in self.groups.values_mut() {
            if group.is_empty() {
                group.first = new_index(group.first);
                group.last = group.first;
            } else {
                group.first = new_index(group.first);
                group.last = new_index(group.last - 1) + 1;
            }
        }
        self.remap_indices(|i| Some(new_index(i)));
    }

    /// Permute `[start, start + order.len())` so that new slot `k` holds the
    /// particle previously at `start + order[k]`. Group ranges are left to
    /// the caller.
    pub(crate) fn reorder_range(&mut self, start: usize, order: &[usize]) {
        let end = start + order.len();
        let mut inverse = vec![0; order.len()];
        for (k, &old) in order.iter().enumerate() {
            inverse[old] = k;
        }
        for column in self.buffers.columns() {
            column.reorder(start, order);
        }
        for i in start..end {
            if let Some(handle) = self.buffers.handle[i] {
                self.handles.retarget(handle, i);
            }
        }
        self.remap_indices(|i| {
            Some(if (start..end).contains(&i) {
                start + inverse[i - start]
            } else {
                i
            })
        });
    }

    /// Rewrite bonds, listener state and queued commands; stale contacts are
    /// dropped and regenerated by the next sub-iteration.
    fn remap_indices(&mut self, new_index: impl Fn(usize) -> Option<usize>) {
        remap_bonds(&mut self.pairs, &mut self.triads, &new_index);
        self.commands.remap(&new_index);

        self.previous_particle_contacts.retain_mut(|(a, b)| {
            match (new_index(*a), new_index(*b)) {
                (Some(na), Some(nb)) => {
                    (*a, *b) = (na.min(nb), na.max(nb));
                    true
                }
                _ => false,
            }
        });
        self.previous_particle_contacts.sort_unstable();
        self.previous_body_contacts.retain_mut(|(i, _)| match new_index(*i) {
            Some(n) => {
                *i = n;
                true
            }
            None => false,
        });
        self.previous_body_contacts.sort_unstable();
        self.contacts.clear();
    }

    /// Split a group into its connected components.
    ///
    /// 1. Union particles closer than one diameter
    /// 2. Reorder the group's range so that each component is contiguous,
    ///    largest first
    /// 3. Shrink the group to the largest component; the rest become new
    ///    groups with the same flags, strength and user data
    /// 4. Refit the transform of every rigid piece
    pub(crate) fn split_group(&mut self, id: GroupId) -> Vec<GroupId> {
        let Some(group) = self.groups.get(id) else {
            return Vec::new();
        };
        let range = group.range();
        let (flags, strength, user_data, transform) =
            (group.flags, group.strength, group.user_data, group.transform);
        let n = range.len();
        if n < 2 {
            return Vec::new();
        }

        let positions = &self.buffers.position[range.clone()];
        let diameter = self.def.diameter();
        let squared_diameter = diameter * diameter;
        let mut grid = SpatialHashGrid::new(diameter);
        grid.build(positions);
        let mut parent: Vec<usize> = (0..n).collect();
        grid.for_each_pair(|i, j| {
            if positions[i].distance_squared(positions[j]) < squared_diameter {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        });

        let mut label = vec![usize::MAX; n];
        let mut components: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = find(&mut parent, i);
            if label[root] == usize::MAX {
                label[root] = components.len();
                components.push(Vec::new());
            }
            components[label[root]].push(i);
        }
        if components.len() < 2 {
            return Vec::new();
        }

        let mut largest = 0;
        for (k, c) in components.iter().enumerate() {
            if c.len() > components[largest].len() {
                largest = k;
            }
        }
        let kept = components.remove(largest);
        let order: Vec<usize> = kept
            .iter()
            .chain(components.iter().flatten())
            .copied()
            .collect();
        self.reorder_range(range.start, &order);

        let mut start = range.start + kept.len();
        if let Some(group) = self.groups.get_mut(id) {
            group.last = start;
            group.needs_depth |= flags.contains(GroupFlags::SOLID);
        }
        let mut created = Vec::with_capacity(components.len());
        for component in &components {
            let piece = start..start + component.len();
            let mut group = ParticleGroup::new(piece.clone(), flags, strength, user_data);
            group.transform = transform;
            let new_id = self.groups.insert(group);
            for slot in &mut self.buffers.group[piece] {
                *slot = Some(new_id);
            }
            created.push(new_id);
            start += component.len();
        }

        for &piece in std::iter::once(&id).chain(&created) {
            self.refit_group(piece);
        }
        debug!(?id, pieces = created.len() + 1, "particle group split");
        created
    }

    /// Recompute a rigid group's transform and velocities from its particles.
    fn refit_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get_mut(id) else {
            return;
        };
        if !group.flags.contains(GroupFlags::RIGID) || group.is_empty() {
            return;
        }
        let range = group.range();
        let positions = &self.buffers.position[range.clone()];
        if let Some(rest) = &self.buffers.rest_offset {
            if let Some(xf) = fit_rigid_transform(&rest[range.clone()], positions) {
                group.transform = xf;
            } else {
                let rest_center =
                    rest[range.clone()].iter().copied().sum::<Vec2>() / range.len() as f32;
                let center = positions.iter().copied().sum::<Vec2>() / range.len() as f32;
                group.transform.p = center - group.transform.q.apply(rest_center);
            }
        }
        let stats = GroupStatistics::compute(positions, &self.buffers.velocity[range], 1.0);
        group.linear_velocity = stats.linear_velocity;
        group.angular_velocity = stats.angular_velocity;
    }
}

/// Union-find root with path halving.
fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use crate::group::ParticleGroupDef;
    use crate::world::SimpleWorld;
    use crate::{ParticleSystem, ParticleSystemDef};

    #[test]
    fn test_group_ranges_stay_disjoint_through_compaction() {
        let mut system = ParticleSystem::new(ParticleSystemDef {
            radius: 0.1,
            ..Default::default()
        })
        .unwrap();
        let mut world = SimpleWorld::new(Vec2::ZERO);
        let left = [Vec2::new(-2.0, 0.0), Vec2::new(-1.85, 0.0)];
        let right = [Vec2::new(2.0, 0.0), Vec2::new(2.15, 0.0)];
        let a = system.create_particle_group(&ParticleGroupDef {
            positions: &left,
            ..Default::default()
        });
        let b = system.create_particle_group(&ParticleGroupDef {
            positions: &right,
            ..Default::default()
        });
        assert!(system.group_ranges_are_disjoint());

        system.destroy_particle(0, false);
        system.step(&mut world, 1.0 / 60.0);
        assert!(system.group_ranges_are_disjoint());
        assert_eq!(system.group(a).unwrap().range(), 0..1);
        assert_eq!(system.group(b).unwrap().range(), 1..3);

        system.groups.get_mut(b).unwrap().first = 0;
        assert!(!system.group_ranges_are_disjoint(), "overlap must be detected");
    }
}
