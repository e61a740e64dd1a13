/// Stable reference to a particle.
///
/// Particle indices change when other particles are removed or groups are
/// rearranged; a handle keeps pointing at the same particle until it is
/// destroyed. Slots are recycled with a bumped generation, so a stale handle
/// never resolves to a newer particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleHandle {
    slot: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    index: Option<u32>,
}

/// Indirection table from handles to current particle indices.
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandleTable {
    /// Allocate a handle for the particle at `index`.
    pub(crate) fn allocate(&mut self, index: usize) -> ParticleHandle {
        let index = Some(index as u32);
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.index = index;
            ParticleHandle {
                slot,
                generation: entry.generation,
            }
        } else {
            self.slots.push(Slot { generation: 0, index });
            ParticleHandle {
                slot: self.slots.len() as u32 - 1,
                generation: 0,
            }
        }
    }

    /// Current index of the particle, or `None` once it has been destroyed.
    pub fn resolve(&self, handle: ParticleHandle) -> Option<usize> {
        let entry = self.slots.get(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.index.map(|i| i as usize)
    }

    pub(crate) fn retarget(&mut self, handle: ParticleHandle, index: usize) {
        let entry = &mut self.slots[handle.slot as usize];
        debug_assert_eq!(entry.generation, handle.generation);
        entry.index = Some(index as u32);
    }

    /// Invalidate `handle` and recycle its slot.
    pub(crate) fn release(&mut self, handle: ParticleHandle) {
        let entry = &mut self.slots[handle.slot as usize];
        if entry.generation != handle.generation || entry.index.is_none() {
            return;
        }
        entry.index = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
