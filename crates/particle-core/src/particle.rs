use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::group::GroupId;
use crate::handle::ParticleHandle;

bitflags! {
    /// Particle type tags. Several behaviors combine freely on one particle.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ParticleFlags: u32 {
        /// Plain fluid; the absence of every other tag.
        const WATER = 0;
        /// Removed at the next compaction.
        const ZOMBIE = 1 << 1;
        /// Zero velocity.
        const WALL = 1 << 2;
        /// Restitution from stretching.
        const SPRING = 1 << 3;
        /// Restitution from deformation.
        const ELASTIC = 1 << 4;
        const VISCOUS = 1 << 5;
        /// No isotropic pressure.
        const POWDER = 1 << 6;
        /// Surface tension.
        const TENSILE = 1 << 7;
        const COLOR_MIXING = 1 << 8;
        /// Notify the destruction listener when removed.
        const DESTRUCTION_LISTENER = 1 << 9;
        /// Keeps other particles from leaking through.
        const BARRIER = 1 << 10;
        /// Less compressible.
        const STATIC_PRESSURE = 1 << 11;
        /// Bonds with whatever it touches, once.
        const REACTIVE = 1 << 12;
        /// High repulsion against other groups.
        const REPULSIVE = 1 << 13;
        const FIXTURE_CONTACT_LISTENER = 1 << 14;
        const PARTICLE_CONTACT_LISTENER = 1 << 15;
        const FIXTURE_CONTACT_FILTER = 1 << 16;
        const PARTICLE_CONTACT_FILTER = 1 << 17;
    }
}

impl ParticleFlags {
    /// Tags that create pair bonds.
    pub const PAIR_FLAGS: Self = Self::SPRING.union(Self::BARRIER);
    /// Tags that create triad bonds.
    pub const TRIAD_FLAGS: Self = Self::ELASTIC;
    /// Tags excluded from isotropic pressure.
    pub const NO_PRESSURE_FLAGS: Self = Self::POWDER.union(Self::TENSILE);
}

/// RGBA color, 8 bits per channel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParticleColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ParticleColor {
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn channels(&self) -> [i32; 4] {
        [self.r as i32, self.g as i32, self.b as i32, self.a as i32]
    }

    /// Amount `self` moves toward `other` for a mixing `strength` in `0..=256`.
    /// `other` moves by the negated amount.
    ///
    /// Rounds toward zero, so neither color moves past the other.
    pub fn mix_delta(&self, other: &Self, strength: i32) -> [i32; 4] {
        let a = self.channels();
        let b = other.channels();
        std::array::from_fn(|k| strength * (b[k] - a[k]) / 256)
    }

    /// Add per-channel deltas. Deltas from [`mix_delta`](Self::mix_delta)
    /// keep every channel in range; anything else saturates.
    pub fn add_delta(&self, delta: [i32; 4]) -> Self {
        let c = self.channels();
        let channel = |k: usize| (c[k] + delta[k]).clamp(0, 255) as u8;
        Self {
            r: channel(0),
            g: channel(1),
            b: channel(2),
            a: channel(3),
        }
    }

    /// Blend two colors toward each other, conserving the channel sums.
    pub fn mix(&mut self, other: &mut Self, strength: i32) {
        let d = self.mix_delta(other, strength);
        *self = self.add_delta(d);
        *other = other.add_delta(d.map(|x| -x));
    }
}

/// Everything needed to construct one particle. Safe to reuse.
#[derive(Clone, Debug, Default)]
pub struct ParticleDef {
    pub flags: ParticleFlags,
    pub position: Vec2,
    pub velocity: Vec2,
    pub color: ParticleColor,
    /// Seconds; `<= 0` means infinite.
    pub lifetime: f32,
    pub user_data: u64,
    /// Existing group the particle joins.
    pub group: Option<GroupId>,
}

/// One column of per-particle data that follows particles when they move.
pub(crate) trait Column {
    /// Drop entries whose `removed` flag is set, preserving order.
    fn remove_marked(&mut self, removed: &[bool]);
    /// Rotate `[start, end)` so that `mid` becomes `start`.
    fn rotate(&mut self, start: usize, mid: usize, end: usize);
    /// `self[start + k] = old[start + order[k]]`.
    fn reorder(&mut self, start: usize, order: &[usize]);
}

impl<T: Clone> Column for Vec<T> {
    fn remove_marked(&mut self, removed: &[bool]) {
        let mut i = 0;
        self.retain(|_| {
            let keep = !removed[i];
            i += 1;
            keep
        });
    }

    fn rotate(&mut self, start: usize, mid: usize, end: usize) {
        self[start..end].rotate_left(mid - start);
    }

    fn reorder(&mut self, start: usize, order: &[usize]) {
        let moved: Vec<T> = order.iter().map(|&k| self[start + k].clone()).collect();
        self[start..start + order.len()].clone_from_slice(&moved);
    }
}

impl<T: Clone> Column for Option<Vec<T>> {
    fn remove_marked(&mut self, removed: &[bool]) {
        if let Some(v) = self {
            v.remove_marked(removed);
        }
    }

    fn rotate(&mut self, start: usize, mid: usize, end: usize) {
        if let Some(v) = self {
            Column::rotate(v, start, mid, end);
        }
    }

    fn reorder(&mut self, start: usize, order: &[usize]) {
        if let Some(v) = self {
            v.reorder(start, order);
        }
    }
}

/// Columnar particle storage. Rows `0..count()` are the active particles.
#[derive(Default)]
pub struct ParticleBuffers {
    pub(crate) position: Vec<Vec2>,
    pub(crate) velocity: Vec<Vec2>,
    /// Accumulated force, consumed by the next step.
    pub(crate) force: Vec<Vec2>,
    pub(crate) flags: Vec<ParticleFlags>,
    /// Allocated the first time a particle asks for a color.
    pub(crate) color: Option<Vec<ParticleColor>>,
    /// Remaining lifetime in seconds; `<= 0` is infinite.
    pub(crate) lifetime: Vec<f32>,
    /// Creation stamp, used to find the oldest particle.
    pub(crate) birth: Vec<u64>,
    pub(crate) user_data: Vec<u64>,
    pub(crate) group: Vec<Option<GroupId>>,
    pub(crate) handle: Vec<Option<ParticleHandle>>,
    /// Sum of contact weights, recomputed every sub-iteration.
    pub(crate) weight: Vec<f32>,
    pub(crate) static_pressure: Option<Vec<f32>>,
    /// Distance from the surface of a solid group.
    pub(crate) depth: Option<Vec<f32>>,
    /// Offset from the group centroid at creation, for rigid members.
    pub(crate) rest_offset: Option<Vec<Vec2>>,
}

impl ParticleBuffers {
    pub fn count(&self) -> usize {
        self.position.len()
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.position
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.velocity
    }

    pub fn flags(&self) -> &[ParticleFlags] {
        &self.flags
    }

    pub fn colors(&self) -> Option<&[ParticleColor]> {
        self.color.as_deref()
    }

    pub fn lifetimes(&self) -> &[f32] {
        &self.lifetime
    }

    pub fn user_data(&self) -> &[u64] {
        &self.user_data
    }

    pub fn groups(&self) -> &[Option<GroupId>] {
        &self.group
    }

    pub fn weights(&self) -> &[f32] {
        &self.weight
    }

    pub(crate) fn push(&mut self, def: &ParticleDef, birth: u64) -> usize {
        let index = self.count();
        self.position.push(def.position);
        self.velocity.push(def.velocity);
        self.force.push(Vec2::ZERO);
        self.flags.push(def.flags);
        self.lifetime.push(def.lifetime);
        self.birth.push(birth);
        self.user_data.push(def.user_data);
        self.group.push(None);
        self.handle.push(None);
        self.weight.push(0.0);

        if self.color.is_none() && !def.color.is_zero() {
            self.color = Some(vec![ParticleColor::ZERO; index]);
        }
        if let Some(color) = &mut self.color {
            color.push(def.color);
        }
        for column in [&mut self.static_pressure, &mut self.depth].into_iter().flatten() {
            column.push(0.0);
        }
        if let Some(rest) = &mut self.rest_offset {
            rest.push(Vec2::ZERO);
        }
        index
    }

    pub(crate) fn ensure_static_pressure(&mut self) -> &mut Vec<f32> {
        let count = self.count();
        self.static_pressure.get_or_insert_with(|| vec![0.0; count])
    }

    pub(crate) fn ensure_depth(&mut self) -> &mut Vec<f32> {
        let count = self.count();
        self.depth.get_or_insert_with(|| vec![0.0; count])
    }

    pub(crate) fn ensure_rest_offset(&mut self) -> &mut Vec<Vec2> {
        let count = self.count();
        self.rest_offset.get_or_insert_with(|| vec![Vec2::ZERO; count])
    }

    /// Every column that moves with its particle.
    pub(crate) fn columns(&mut self) -> [&mut dyn Column; 14] {
        [
            &mut self.position,
            &mut self.velocity,
            &mut self.force,
            &mut self.flags,
            &mut self.color,
            &mut self.lifetime,
            &mut self.birth,
            &mut self.user_data,
            &mut self.group,
            &mut self.handle,
            &mut self.weight,
            &mut self.static_pressure,
            &mut self.depth,
            &mut self.rest_offset,
        ]
    }

    /// OR of all particle flags in `range`.
    pub(crate) fn flags_in(&self, range: std::ops::Range<usize>) -> ParticleFlags {
        self.flags[range]
            .iter()
            .fold(ParticleFlags::empty(), |acc, &f| acc | f)
    }
}
