use std::ops::Range;

use bitflags::bitflags;
use glam::Vec2;

use crate::math::Transform;
use crate::particle::{ParticleColor, ParticleFlags};
use crate::shapes::Shape;

/// Stable reference to a particle group. Stale ids resolve to nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId {
    slot: u32,
    generation: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct GroupFlags: u32 {
        /// Resists penetration by other groups.
        const SOLID = 1 << 0;
        /// Keeps its shape; split automatically when members are destroyed.
        const RIGID = 1 << 1;
        /// Survives losing all of its particles.
        const CAN_BE_EMPTY = 1 << 2;
    }
}

/// Lifecycle of a live group. A group with no members after compaction is
/// destroyed unless it carries [`GroupFlags::CAN_BE_EMPTY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    Active,
    /// Some members are flagged for removal at the next compaction.
    PartiallyZombie,
}

/// A contiguous range of particles that share a group identity.
#[derive(Clone, Debug)]
pub struct ParticleGroup {
    pub(crate) first: usize,
    pub(crate) last: usize,
    pub(crate) flags: GroupFlags,
    pub(crate) strength: f32,
    pub(crate) user_data: u64,
    /// Maps rest offsets of members to world space. Fitted every
    /// sub-iteration for rigid groups.
    pub(crate) transform: Transform,
    pub(crate) linear_velocity: Vec2,
    pub(crate) angular_velocity: f32,
    pub(crate) needs_depth: bool,
}

impl ParticleGroup {
    pub(crate) fn new(range: Range<usize>, flags: GroupFlags, strength: f32, user_data: u64) -> Self {
        Self {
            first: range.start,
            last: range.end,
            flags,
            strength,
            user_data,
            transform: Transform::IDENTITY,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            needs_depth: flags.contains(GroupFlags::SOLID),
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.first..self.last
    }

    pub fn count(&self) -> usize {
        self.last - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    pub fn flags(&self) -> GroupFlags {
        self.flags
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }

    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn position(&self) -> Vec2 {
        self.transform.p
    }

    pub fn angle(&self) -> f32 {
        self.transform.angle()
    }

    /// Last fitted velocity of a rigid group; zero for other groups.
    pub fn linear_velocity(&self) -> Vec2 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> f32 {
        self.angular_velocity
    }
}

/// Everything needed to construct a group.
///
/// Particle positions come from filling `shapes` on a lattice and from the
/// explicit `positions` list; both are in the group frame given by
/// `position` and `angle`.
#[derive(Clone, Debug)]
pub struct ParticleGroupDef<'a> {
    pub flags: ParticleFlags,
    pub group_flags: GroupFlags,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub color: ParticleColor,
    /// Cohesion of pairs and triads created inside the group.
    pub strength: f32,
    pub shapes: &'a [Shape],
    /// Lattice spacing; `0` uses the system stride.
    pub stride: f32,
    pub positions: &'a [Vec2],
    /// Seconds; `<= 0` means infinite.
    pub lifetime: f32,
    pub user_data: u64,
    /// Merge the new particles into this group.
    pub group: Option<GroupId>,
}

impl Default for ParticleGroupDef<'_> {
    fn default() -> Self {
        Self {
            flags: ParticleFlags::WATER,
            group_flags: GroupFlags::empty(),
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            color: ParticleColor::ZERO,
            strength: 1.0,
            shapes: &[],
            stride: 0.0,
            positions: &[],
            lifetime: 0.0,
            user_data: 0,
            group: None,
        }
    }
}

/// Mass properties of a group, computed on demand.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct GroupStatistics {
    pub mass: f32,
    pub center: Vec2,
    pub linear_velocity: Vec2,
    /// About `center`.
    pub inertia: f32,
    pub angular_velocity: f32,
}

impl GroupStatistics {
    /// Uniform-mass statistics over `positions` and `velocities`.
    pub fn compute(positions: &[Vec2], velocities: &[Vec2], particle_mass: f32) -> Self {
        let n = positions.len();
        if n == 0 {
            return Self::default();
        }
        let inv_n = 1.0 / n as f32;
        let center = positions.iter().copied().sum::<Vec2>() * inv_n;
        let linear_velocity = velocities.iter().copied().sum::<Vec2>() * inv_n;

        let mut inertia = 0.0;
        let mut angular = 0.0;
        for (&p, &v) in positions.iter().zip(velocities) {
            let r = p - center;
            inertia += particle_mass * r.length_squared();
            angular += particle_mass * r.perp_dot(v - linear_velocity);
        }

        Self {
            mass: particle_mass * n as f32,
            center,
            linear_velocity,
            inertia,
            angular_velocity: if inertia > 0.0 { angular / inertia } else { 0.0 },
        }
    }
}

struct GroupSlot {
    generation: u32,
    group: Option<ParticleGroup>,
}

/// Generational storage for groups, iterated in creation order.
#[derive(Default)]
pub(crate) struct GroupArena {
    slots: Vec<GroupSlot>,
    free: Vec<u32>,
    order: Vec<GroupId>,
}

impl GroupArena {
    pub fn insert(&mut self, group: ParticleGroup) -> GroupId {
        let id = if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.group = Some(group);
            GroupId {
                slot,
                generation: entry.generation,
            }
        } else {
            self.slots.push(GroupSlot {
                generation: 0,
                group: Some(group),
            });
            GroupId {
                slot: self.slots.len() as u32 - 1,
                generation: 0,
            }
        };
        self.order.push(id);
        id
    }

    pub fn get(&self, id: GroupId) -> Option<&ParticleGroup> {
        let entry = self.slots.get(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.group.as_ref()
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut ParticleGroup> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.group.as_mut()
    }

    pub fn remove(&mut self, id: GroupId) -> Option<ParticleGroup> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let group = entry.group.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.order.retain(|&g| g != id);
        Some(group)
    }

    /// Live ids in creation order.
    pub fn ids(&self) -> &[GroupId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GroupId, &ParticleGroup)> {
        self.ids().iter().filter_map(|&id| self.get(id).map(|g| (id, g)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ParticleGroup> {
        self.slots.iter_mut().filter_map(|s| s.group.as_mut())
    }

    pub fn any(&self, f: impl Fn(&ParticleGroup) -> bool) -> bool {
        self.iter().any(|(_, g)| f(g))
    }
}
