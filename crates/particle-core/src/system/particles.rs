//! Per-particle creation, destruction, handles, forces and queries.

use std::cmp::Ordering;
use std::ops::Range;

use glam::Vec2;
use tracing::{trace, warn};

use super::ParticleSystem;
use crate::group::{GroupFlags, GroupId};
use crate::handle::ParticleHandle;
use crate::math::Transform;
use crate::particle::{ParticleColor, ParticleDef, ParticleFlags};
use crate::shapes::{Aabb, Shape};

impl ParticleSystem {
    /// Create one particle and return its index.
    ///
    /// When the buffer is full the oldest particle is evicted if
    /// destruction by age is enabled; otherwise nothing is created.
    pub fn create_particle(&mut self, def: &ParticleDef) -> Option<usize> {
        self.create_particle_reserving(def, 0)
    }

    /// Like [`create_particle`](Self::create_particle), but never evicts any
    /// of the last `reserved` particles (a group under construction).
    pub(crate) fn create_particle_reserving(
        &mut self,
        def: &ParticleDef,
        reserved: usize,
    ) -> Option<usize> {
        let max_count = self.def.max_count;
        if max_count > 0 && self.count() >= max_count {
            if !self.def.destroy_by_age {
                warn!(max_count, "particle buffer full, particle not created");
                return None;
            }
            let Some(victim) = self.oldest_particle(0, self.count() - reserved) else {
                warn!(max_count, "no particle can be evicted, particle not created");
                return None;
            };
            self.destroy_particle(victim, false);
            self.solve_zombie();
            if self.count() >= max_count {
                return None;
            }
        }

        let index = self.buffers.push(def, self.next_birth);
        self.next_birth += 1;
        self.all_flags |= def.flags;
        if def.flags.contains(ParticleFlags::COLOR_MIXING) {
            self.colors_mut();
        }
        match def.group {
            Some(id) => Some(self.add_to_group(index, id)),
            None => Some(index),
        }
    }

    /// Move the particle at `index` (the last one) into group `id`.
    fn add_to_group(&mut self, index: usize, id: GroupId) -> usize {
        let Some((first, last)) = self.groups.get(id).map(|g| (g.first, g.last)) else {
            warn!(?id, "particle created with a stale group id");
            return index;
        };
        let first = if first < last {
            // Slide the group up against the new particle.
            self.rotate_buffer(first, last, index);
            index - (last - first)
        } else {
            index
        };
        self.buffers.group[index] = Some(id);

        let Some(group) = self.groups.get_mut(id) else {
            return index;
        };
        group.first = first;
        group.last = index + 1;
        group.needs_depth |= group.flags.contains(GroupFlags::SOLID);
        if group.flags.contains(GroupFlags::RIGID) {
            let xf = group.transform;
            let local = xf.apply_inv(self.buffers.position[index]);
            self.buffers.ensure_rest_offset()[index] = local;
        }
        index
    }

    /// Mark the particle for removal at the next compaction. Repeated calls
    /// are harmless.
    pub fn destroy_particle(&mut self, index: usize, call_listener: bool) {
        let Some(flags) = self.buffers.flags.get_mut(index) else {
            return;
        };
        flags.insert(ParticleFlags::ZOMBIE);
        if call_listener {
            flags.insert(ParticleFlags::DESTRUCTION_LISTENER);
        }
        self.all_flags |= ParticleFlags::ZOMBIE;
    }

    /// Destroy the `n`-th oldest particle. Particles with a finite lifetime
    /// count as older than immortal ones, shortest remaining lifetime first;
    /// ties go to the earliest created.
    pub fn destroy_oldest_particle(&mut self, n: usize, call_listener: bool) -> bool {
        match self.oldest_particle(n, self.count()) {
            Some(index) => {
                self.destroy_particle(index, call_listener);
                true
            }
            None => false,
        }
    }

    fn oldest_particle(&self, n: usize, limit: usize) -> Option<usize> {
        let flags = &self.buffers.flags;
        let lifetime = &self.buffers.lifetime;
        let birth = &self.buffers.birth;
        let mut candidates: Vec<usize> = (0..limit)
            .filter(|&i| !flags[i].contains(ParticleFlags::ZOMBIE))
            .collect();
        candidates.sort_by(|&a, &b| {
            let (la, lb) = (lifetime[a], lifetime[b]);
            match (la > 0.0, lb > 0.0) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (true, true) => la.total_cmp(&lb),
                (false, false) => Ordering::Equal,
            }
            .then(birth[a].cmp(&birth[b]))
        });
        candidates.get(n).copied()
    }

    /// Destroy every particle inside `shape` placed at `xf`; returns how many
    /// were marked.
    pub fn destroy_particles_in_shape(
        &mut self,
        shape: &Shape,
        xf: &Transform,
        call_listener: bool,
    ) -> usize {
        let aabb = shape.aabb(xf);
        let mut destroyed = 0;
        for i in 0..self.count() {
            let p = self.buffers.position[i];
            if self.buffers.flags[i].contains(ParticleFlags::ZOMBIE)
                || !aabb.contains(p)
                || !shape.test_point(xf, p)
            {
                continue;
            }
            self.destroy_particle(i, call_listener);
            destroyed += 1;
        }
        trace!(destroyed, "particles destroyed in shape");
        destroyed
    }

    // ------------------------------------------------------------------
    // Handles

    /// Stable handle for the particle at `index`, allocated on first request.
    pub fn particle_handle(&mut self, index: usize) -> Option<ParticleHandle> {
        let slot = self.buffers.handle.get_mut(index)?;
        if let Some(handle) = *slot {
            return Some(handle);
        }
        let handle = self.handles.allocate(index);
        *slot = Some(handle);
        Some(handle)
    }

    /// Current index of a handle, `None` once its particle is gone.
    pub fn handle_index(&self, handle: ParticleHandle) -> Option<usize> {
        self.handles.resolve(handle)
    }

    // ------------------------------------------------------------------
    // Per-particle state

    pub fn particle_flags(&self, index: usize) -> ParticleFlags {
        self.buffers.flags.get(index).copied().unwrap_or_default()
    }

    pub fn set_particle_flags(&mut self, index: usize, flags: ParticleFlags) {
        if index >= self.count() {
            return;
        }
        if flags.contains(ParticleFlags::COLOR_MIXING) {
            self.colors_mut();
        }
        self.buffers.flags[index] = flags;
        self.all_flags |= flags;
    }

    pub fn particle_color(&self, index: usize) -> ParticleColor {
        self.buffers
            .color
            .as_ref()
            .and_then(|c| c.get(index).copied())
            .unwrap_or(ParticleColor::ZERO)
    }

    /// Remaining lifetime in seconds; `0` means the particle lives forever.
    pub fn particle_lifetime(&self, index: usize) -> f32 {
        self.buffers.lifetime.get(index).copied().unwrap_or(0.0)
    }

    pub fn set_particle_lifetime(&mut self, index: usize, lifetime: f32) {
        if let Some(life) = self.buffers.lifetime.get_mut(index) {
            *life = lifetime.max(0.0);
        }
    }

    // ------------------------------------------------------------------
    // Forces

    /// Accumulate `force` on one particle. Walls are immovable and ignore it.
    pub fn particle_apply_force(&mut self, index: usize, force: Vec2) {
        if index >= self.count() || self.buffers.flags[index].contains(ParticleFlags::WALL) {
            return;
        }
        self.buffers.force[index] += force;
        self.has_force = true;
    }

    pub fn particle_apply_linear_impulse(&mut self, index: usize, impulse: Vec2) {
        if index >= self.count() || self.buffers.flags[index].contains(ParticleFlags::WALL) {
            return;
        }
        let inv_mass = self.particle_inv_mass();
        self.buffers.velocity[index] += impulse * inv_mass;
    }

    /// Spread `force` evenly over `range`.
    pub fn apply_force(&mut self, range: Range<usize>, force: Vec2) {
        let range = range.start..range.end.min(self.count());
        if range.is_empty() {
            return;
        }
        let share = force / range.len() as f32;
        for i in range {
            if !self.buffers.flags[i].contains(ParticleFlags::WALL) {
                self.buffers.force[i] += share;
            }
        }
        self.has_force = true;
    }

    /// Change the total momentum of `range` by `impulse`.
    pub fn apply_linear_impulse(&mut self, range: Range<usize>, impulse: Vec2) {
        let range = range.start..range.end.min(self.count());
        if range.is_empty() {
            return;
        }
        let dv = impulse / (range.len() as f32 * self.particle_mass());
        for i in range {
            if !self.buffers.flags[i].contains(ParticleFlags::WALL) {
                self.buffers.velocity[i] += dv;
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries

    /// Report particles inside `aabb` until `callback` returns `false`.
    pub fn query_aabb(&self, aabb: &Aabb, mut callback: impl FnMut(usize) -> bool) {
        for (i, &p) in self.buffers.position.iter().enumerate() {
            if aabb.contains(p) && !callback(i) {
                return;
            }
        }
    }

    /// Report particles inside `shape` placed at `xf`.
    pub fn query_shape(
        &self,
        shape: &Shape,
        xf: &Transform,
        mut callback: impl FnMut(usize) -> bool,
    ) {
        self.query_aabb(&shape.aabb(xf), |i| {
            !shape.test_point(xf, self.buffers.position[i]) || callback(i)
        });
    }

    /// Cast a ray from `p1` to `p2` against the particle disks.
    ///
    /// `callback(index, point, normal, fraction)` returns the new maximum
    /// fraction: `0` stops the cast, `1` keeps it unclipped.
    pub fn ray_cast(
        &self,
        p1: Vec2,
        p2: Vec2,
        mut callback: impl FnMut(usize, Vec2, Vec2, f32) -> f32,
    ) {
        let v = p2 - p1;
        let a = v.length_squared();
        if a <= 0.0 {
            return;
        }
        let r = self.radius();
        let bounds = Aabb::new(p1.min(p2) - Vec2::splat(r), p1.max(p2) + Vec2::splat(r));
        let mut fraction = 1.0;
        for (i, &x) in self.buffers.position.iter().enumerate() {
            if !bounds.contains(x) {
                continue;
            }
            // Solve |p1 + t v - x| = r for the entering root.
            let p = p1 - x;
            let b = p.dot(v);
            let c = p.length_squared() - r * r;
            let det = b * b - a * c;
            if det < 0.0 {
                continue;
            }
            let t = (-b - det.sqrt()) / a;
            if !(0.0..=fraction).contains(&t) {
                continue;
            }
            let point = p1 + t * v;
            let normal = (point - x).normalize_or_zero();
            fraction = callback(i, point, normal, t).min(fraction);
            if fraction <= 0.0 {
                return;
            }
        }
    }
}
