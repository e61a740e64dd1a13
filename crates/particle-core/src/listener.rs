//! Filter and listener hooks.
//!
//! Callbacks run synchronously inside [`ParticleSystem::step`](crate::system::ParticleSystem::step).
//! They cannot touch the system directly; requests go into
//! [`ParticleCommands`], which the step applies after compaction.

use crate::contact::{BodyContact, ParticleContact};
use crate::group::GroupId;
use crate::particle::{ParticleBuffers, ParticleDef};
use crate::world::{Fixture, FixtureId};

/// Consulted only for particles carrying the matching `*_CONTACT_FILTER` flag.
pub trait ContactFilter {
    fn should_collide_fixture(
        &self,
        _fixture: &dyn Fixture,
        _particles: &ParticleBuffers,
        _index: usize,
    ) -> bool {
        true
    }

    fn should_collide_particles(&self, _particles: &ParticleBuffers, _a: usize, _b: usize) -> bool {
        true
    }
}

/// Begin/end notifications for particles carrying the matching
/// `*_CONTACT_LISTENER` flag.
pub trait ParticleContactListener {
    fn begin_fixture_contact(&mut self, _contact: &BodyContact, _commands: &mut ParticleCommands) {}

    fn end_fixture_contact(
        &mut self,
        _fixture: FixtureId,
        _index: usize,
        _commands: &mut ParticleCommands,
    ) {
    }

    fn begin_particle_contact(
        &mut self,
        _contact: &ParticleContact,
        _commands: &mut ParticleCommands,
    ) {
    }

    fn end_particle_contact(&mut self, _a: usize, _b: usize, _commands: &mut ParticleCommands) {}
}

pub trait DestructionListener {
    /// Called for particles destroyed with the listener flag, just before
    /// they are removed; `index` is still valid in `particles`.
    fn particle_destroyed(
        &mut self,
        _particles: &ParticleBuffers,
        _index: usize,
        _commands: &mut ParticleCommands,
    ) {
    }

    fn group_destroyed(&mut self, _group: GroupId, _commands: &mut ParticleCommands) {}
}

/// Requests queued from callbacks during a step.
///
/// Indices refer to the particle layout seen by the callback; the system
/// remaps them through compaction before applying.
#[derive(Default, Debug)]
pub struct ParticleCommands {
    pub(crate) create: Vec<ParticleDef>,
    pub(crate) destroy: Vec<(usize, bool)>,
    pub(crate) destroy_groups: Vec<(GroupId, bool)>,
}

impl ParticleCommands {
    pub fn create_particle(&mut self, def: ParticleDef) {
        self.create.push(def);
    }

    pub fn destroy_particle(&mut self, index: usize, call_listener: bool) {
        self.destroy.push((index, call_listener));
    }

    pub fn destroy_particles_in_group(&mut self, group: GroupId, call_listener: bool) {
        self.destroy_groups.push((group, call_listener));
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.destroy.is_empty() && self.destroy_groups.is_empty()
    }

    /// Rewrite queued indices after particles moved. `None` means removed.
    pub(crate) fn remap(&mut self, new_index: impl Fn(usize) -> Option<usize>) {
        self.destroy
            .retain_mut(|(index, _)| match new_index(*index) {
                Some(i) => {
                    *index = i;
                    true
                }
                None => false,
            });
    }
}

/// Installed hooks.
#[derive(Default)]
pub(crate) struct Listeners {
    pub filter: Option<Box<dyn ContactFilter>>,
    pub contact: Option<Box<dyn ParticleContactListener>>,
    pub destruction: Option<Box<dyn DestructionListener>>,
}
