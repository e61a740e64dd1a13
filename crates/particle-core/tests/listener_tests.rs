use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;
use particle_core::math::Transform;
use particle_core::shapes::{Polygon, Shape};
use particle_core::world::{SimpleBody, SimpleWorld};
use particle_core::{
    BodyContact, ContactFilter, DestructionListener, FixtureId, GroupId, ParticleBuffers,
    ParticleCommands, ParticleContact, ParticleContactListener, ParticleDef, ParticleFlags,
    ParticleGroupDef, ParticleSystem, ParticleSystemDef,
};

const DT: f32 = 1.0 / 60.0;

#[derive(Clone, Debug, PartialEq)]
enum Event {
    BeginParticle(usize, usize),
    EndParticle(usize, usize),
    BeginFixture(usize, FixtureId),
    ParticleDestroyed(u64),
    GroupDestroyed(GroupId),
}

#[derive(Clone, Default)]
struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
    fixture_points: Rc<RefCell<Vec<Vec2>>>,
    respawn: bool,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl ParticleContactListener for Recorder {
    fn begin_fixture_contact(&mut self, contact: &BodyContact, _commands: &mut ParticleCommands) {
        self.events
            .borrow_mut()
            .push(Event::BeginFixture(contact.index, contact.fixture));
        self.fixture_points.borrow_mut().push(contact.point);
    }

    fn begin_particle_contact(&mut self, contact: &ParticleContact, _commands: &mut ParticleCommands) {
        self.events
            .borrow_mut()
            .push(Event::BeginParticle(contact.a, contact.b));
    }

    fn end_particle_contact(&mut self, a: usize, b: usize, _commands: &mut ParticleCommands) {
        self.events.borrow_mut().push(Event::EndParticle(a, b));
    }
}

impl DestructionListener for Recorder {
    fn particle_destroyed(
        &mut self,
        particles: &ParticleBuffers,
        index: usize,
        commands: &mut ParticleCommands,
    ) {
        let user_data = particles.user_data()[index];
        self.events
            .borrow_mut()
            .push(Event::ParticleDestroyed(user_data));
        if self.respawn {
            commands.create_particle(ParticleDef {
                position: particles.positions()[index],
                user_data: user_data + 100,
                ..Default::default()
            });
        }
    }

    fn group_destroyed(&mut self, group: GroupId, _commands: &mut ParticleCommands) {
        self.events.borrow_mut().push(Event::GroupDestroyed(group));
    }
}

struct VetoAll;

impl ContactFilter for VetoAll {
    fn should_collide_particles(&self, _particles: &ParticleBuffers, _a: usize, _b: usize) -> bool {
        false
    }

    fn should_collide_fixture(
        &self,
        _fixture: &dyn particle_core::world::Fixture,
        _particles: &ParticleBuffers,
        _index: usize,
    ) -> bool {
        false
    }
}

fn system() -> ParticleSystem {
    ParticleSystem::new(ParticleSystemDef {
        radius: 0.1,
        ..Default::default()
    })
    .unwrap()
}

fn touching_pair(system: &mut ParticleSystem, flags: ParticleFlags) {
    for x in [0.0, 0.1] {
        system.create_particle(&ParticleDef {
            flags,
            position: Vec2::new(x, 0.0),
            ..Default::default()
        });
    }
}

#[test]
fn test_particle_contact_begin_and_end() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let recorder = Recorder::default();
    system.set_contact_listener(Some(Box::new(recorder.clone())));
    touching_pair(&mut system, ParticleFlags::PARTICLE_CONTACT_LISTENER);

    system.step(&mut world, DT);
    assert_eq!(recorder.take(), vec![Event::BeginParticle(0, 1)]);

    // A persisting contact is not reported again.
    system.step(&mut world, DT);
    assert!(recorder.take().is_empty());

    system.positions_mut()[1] = Vec2::new(5.0, 0.0);
    system.step(&mut world, DT);
    assert_eq!(recorder.take(), vec![Event::EndParticle(0, 1)]);
}

#[test]
fn test_unflagged_contacts_are_not_reported() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let recorder = Recorder::default();
    system.set_contact_listener(Some(Box::new(recorder.clone())));
    touching_pair(&mut system, ParticleFlags::WATER);

    system.step(&mut world, DT);
    assert_eq!(system.contacts().len(), 1);
    assert!(recorder.take().is_empty());
}

#[test]
fn test_fixture_contact_begin() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    // Box body centered half a unit below the origin; its top face is y = 0.
    let body = world.add_body(SimpleBody::fixed(Transform::new(Vec2::new(0.0, -0.5), 0.0)));
    let ground = world.add_fixture(body, Shape::Polygon(Polygon::new_box(1.0, 0.5)));
    let recorder = Recorder::default();
    system.set_contact_listener(Some(Box::new(recorder.clone())));
    system.create_particle(&ParticleDef {
        flags: ParticleFlags::FIXTURE_CONTACT_LISTENER,
        position: Vec2::new(0.0, 0.05),
        ..Default::default()
    });

    system.step(&mut world, DT);
    assert_eq!(recorder.take(), vec![Event::BeginFixture(0, ground)]);

    // The contact point is reported in the fixture's frame.
    let points = recorder.fixture_points.borrow();
    assert_eq!(points.len(), 1);
    assert!(
        (points[0] - Vec2::new(0.0, 0.5)).length() < 1e-5,
        "local contact point: {:?}",
        points[0]
    );
}

#[test]
fn test_filter_vetoes_flagged_contacts() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    system.set_contact_filter(Some(Box::new(VetoAll)));
    touching_pair(&mut system, ParticleFlags::PARTICLE_CONTACT_FILTER);
    touching_pair(&mut system, ParticleFlags::WATER);
    system.positions_mut()[2] = Vec2::new(5.0, 0.0);
    system.positions_mut()[3] = Vec2::new(5.1, 0.0);

    system.step(&mut world, DT);
    let contacts = system.contacts();
    assert_eq!(contacts.len(), 1, "only the unfiltered pair touches");
    assert_eq!(contacts[0].key(), (2, 3));
}

#[test]
fn test_filter_vetoes_fixture_contacts() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    world.add_static(Shape::Polygon(Polygon::new_box(1.0, 0.5)));
    system.set_contact_filter(Some(Box::new(VetoAll)));
    for (x, flags) in [(0.0, ParticleFlags::FIXTURE_CONTACT_FILTER), (0.5, ParticleFlags::WATER)] {
        system.create_particle(&ParticleDef {
            flags,
            position: Vec2::new(x, 0.55),
            ..Default::default()
        });
    }

    system.step(&mut world, DT);
    let touching: Vec<usize> = system.body_contacts().iter().map(|c| c.index).collect();
    assert_eq!(touching, vec![1]);
}

#[test]
fn test_destruction_listener_only_when_requested() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let recorder = Recorder::default();
    system.set_destruction_listener(Some(Box::new(recorder.clone())));
    for i in 0..3u64 {
        system.create_particle(&ParticleDef {
            position: Vec2::new(i as f32 * 5.0, 0.0),
            user_data: i,
            ..Default::default()
        });
    }

    system.destroy_particle(0, false);
    system.destroy_particle(1, true);
    system.step(&mut world, DT);

    assert_eq!(recorder.take(), vec![Event::ParticleDestroyed(1)]);
    assert_eq!(system.user_data(), &[2]);
}

#[test]
fn test_destruction_listener_reports_group_removal() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let recorder = Recorder::default();
    system.set_destruction_listener(Some(Box::new(recorder.clone())));
    let positions = [Vec2::ZERO, Vec2::new(0.15, 0.0)];
    let id = system.create_particle_group(&ParticleGroupDef {
        positions: &positions,
        ..Default::default()
    });

    system.destroy_particles_in_group(id, false);
    system.step(&mut world, DT);
    assert_eq!(recorder.take(), vec![Event::GroupDestroyed(id)]);
}

#[test]
fn test_commands_from_listener_apply_after_step() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let recorder = Recorder {
        respawn: true,
        ..Default::default()
    };
    system.set_destruction_listener(Some(Box::new(recorder.clone())));
    for i in 0..2u64 {
        system.create_particle(&ParticleDef {
            position: Vec2::new(i as f32 * 5.0, 0.0),
            user_data: i,
            ..Default::default()
        });
    }

    system.destroy_particle(0, true);
    system.step(&mut world, DT);

    assert_eq!(system.count(), 2, "the listener replaced the destroyed particle");
    assert_eq!(system.user_data(), &[1, 100]);
    assert_eq!(recorder.take(), vec![Event::ParticleDestroyed(0)]);
}
