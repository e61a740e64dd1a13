use glam::{IVec2, Vec2};

use crate::shapes::Aabb;

/// Half of the 3x3 stencil. Visiting only these offsets from every cell
/// reaches each neighboring cell pair exactly once.
const HALF_STENCIL: [IVec2; 5] = [
    IVec2::new(0, 0),
    IVec2::new(1, -1),
    IVec2::new(1, 0),
    IVec2::new(1, 1),
    IVec2::new(0, 1),
];

/// Uniform spatial hash grid for O(1) neighbor queries.
///
/// Rebuilt from scratch every sub-step with a counting sort: count particles
/// per bucket -> prefix sum -> scatter. Buckets are hash slots, so two cells
/// may share one; every query filters on the exact cell to stay correct.
pub struct SpatialHashGrid {
    cell_size: f32,
    inv_cell_size: f32,
    table_mask: usize,
    /// Count array (reused): cell_count[hash] = number of particles in bucket
    cell_count: Vec<u32>,
    /// Prefix sum: cell_start[hash] = index where the bucket begins in sorted_indices
    cell_start: Vec<u32>,
    /// Particle indices sorted by bucket
    sorted_indices: Vec<u32>,
    /// Cell coordinates per particle
    particle_cells: Vec<IVec2>,
}

impl SpatialHashGrid {
    /// `cell_size` should be at least the interaction range (one particle diameter).
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            table_mask: 0,
            cell_count: Vec::new(),
            cell_start: Vec::new(),
            sorted_indices: Vec::new(),
            particle_cells: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn set_cell_size(&mut self, cell_size: f32) {
        self.cell_size = cell_size;
        self.inv_cell_size = 1.0 / cell_size;
    }

    /// Number of particles indexed by the last build.
    pub fn len(&self) -> usize {
        self.particle_cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particle_cells.is_empty()
    }

    /// Build the grid from current positions. O(N) using counting sort.
    pub fn build(&mut self, positions: &[Vec2]) {
        let count = positions.len();
        let table_size = (count * 2).next_power_of_two().max(64);
        if self.cell_count.len() != table_size {
            self.cell_count = vec![0; table_size];
            self.cell_start = vec![0; table_size];
            self.table_mask = table_size - 1;
        } else {
            self.cell_count.fill(0);
        }

        self.particle_cells.clear();
        self.sorted_indices.clear();
        self.sorted_indices.resize(count, 0);

        for &p in positions {
            let cell = self.cell_of(p);
            self.particle_cells.push(cell);
            let h = self.hash_cell(cell);
            self.cell_count[h] += 1;
        }

        let mut start = 0;
        for (s, c) in self.cell_start.iter_mut().zip(self.cell_count.iter_mut()) {
            *s = start;
            start += *c;
            // Reset for reuse as scatter offsets.
            *c = 0;
        }

        for i in 0..count {
            let h = self.hash_cell(self.particle_cells[i]);
            let idx = self.cell_start[h] + self.cell_count[h];
            self.sorted_indices[idx as usize] = i as u32;
            self.cell_count[h] += 1;
        }
    }

    /// Visit every particle in `cell`.
    fn for_each_in_cell<F: FnMut(u32)>(&self, cell: IVec2, callback: &mut F) {
        if self.cell_count.is_empty() {
            return;
        }
        let h = self.hash_cell(cell);
        let start = self.cell_start[h] as usize;
        let end = start + self.cell_count[h] as usize;
        for &j in &self.sorted_indices[start..end] {
            if self.particle_cells[j as usize] == cell {
                callback(j);
            }
        }
    }

    /// Query the 3x3 block of cells around `pos`.
    /// The caller is responsible for distance checks.
    pub fn query_neighbors<F: FnMut(u32)>(&self, pos: Vec2, mut callback: F) {
        let c = self.cell_of(pos);
        for dy in -1..=1 {
            for dx in -1..=1 {
                self.for_each_in_cell(c + IVec2::new(dx, dy), &mut callback);
            }
        }
    }

    /// Visit every unordered pair of particles in the same or adjacent cells
    /// once, in a deterministic order. The caller filters by distance.
    pub fn for_each_pair<F: FnMut(usize, usize)>(&self, mut callback: F) {
        for (i, &cell) in self.particle_cells.iter().enumerate() {
            for offset in HALF_STENCIL {
                let same_cell = offset == IVec2::ZERO;
                self.for_each_in_cell(cell + offset, &mut |j| {
                    let j = j as usize;
                    if !same_cell || j > i {
                        callback(i, j);
                    }
                });
            }
        }
    }

    /// Visit particles in every cell overlapping `aabb`. Candidates may lie
    /// slightly outside the box.
    pub fn query_aabb<F: FnMut(u32)>(&self, aabb: &Aabb, mut callback: F) {
        let lo = self.cell_of(aabb.lower);
        let hi = self.cell_of(aabb.upper);
        let cells = (hi.x as i64 - lo.x as i64 + 1) * (hi.y as i64 - lo.y as i64 + 1);

        if cells > self.particle_cells.len() as i64 {
            // Sparse population: a linear scan is cheaper than walking cells.
            for (i, c) in self.particle_cells.iter().enumerate() {
                if c.cmpge(lo).all() && c.cmple(hi).all() {
                    callback(i as u32);
                }
            }
            return;
        }

        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                self.for_each_in_cell(IVec2::new(x, y), &mut callback);
            }
        }
    }

    /// Hash function: cell coords -> table index
    #[inline]
    fn hash_cell(&self, cell: IVec2) -> usize {
        let h = (cell.x as u32).wrapping_mul(73856093) ^ (cell.y as u32).wrapping_mul(19349663);
        h as usize & self.table_mask
    }

    /// Convert world position to cell coordinates
    #[inline]
    pub fn cell_of(&self, pos: Vec2) -> IVec2 {
        IVec2::new(
            (pos.x * self.inv_cell_size).floor() as i32,
            (pos.y * self.inv_cell_size).floor() as i32,
        )
    }
}
