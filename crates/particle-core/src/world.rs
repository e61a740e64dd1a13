//! Rigid-body world collaborator.
//!
//! The particle system never owns bodies. It asks the world for fixtures near
//! particles, reads body mass and velocity, and hands back reaction impulses.
//! [`SimpleWorld`] is a small reference implementation with a linear
//! broad-phase; bodies in it are not integrated.

use glam::Vec2;

use crate::math::{cross, cross_sv, Transform};
use crate::shapes::{Aabb, Shape};

/// Opaque fixture reference handed out by the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixtureId(pub u32);

/// Mass and velocity of the body owning a fixture.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BodyState {
    /// Zero for static and kinematic bodies.
    pub mass: f32,
    /// Rotational inertia about the center of mass.
    pub inertia: f32,
    pub world_center: Vec2,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
}

impl BodyState {
    pub fn inv_mass(&self) -> f32 {
        if self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    pub fn inv_inertia(&self) -> f32 {
        if self.inertia > 0.0 {
            1.0 / self.inertia
        } else {
            0.0
        }
    }

    pub fn velocity_at(&self, point: Vec2) -> Vec2 {
        self.linear_velocity + cross_sv(self.angular_velocity, point - self.world_center)
    }
}

/// Read-only view of a fixture.
pub trait Fixture {
    fn shape(&self) -> &Shape;
    fn transform(&self) -> Transform;

    fn user_data(&self) -> u64 {
        0
    }

    fn is_sensor(&self) -> bool {
        false
    }

    /// Fixtures can opt out of particle collisions entirely.
    fn collides_with_particles(&self) -> bool {
        true
    }
}

pub trait RigidWorld {
    fn gravity(&self) -> Vec2;

    /// Report fixtures whose bounds overlap `aabb`. Return `false` from the
    /// callback to stop the query.
    fn query_aabb(&self, aabb: &Aabb, callback: &mut dyn FnMut(FixtureId) -> bool);

    fn fixture(&self, id: FixtureId) -> Option<&dyn Fixture>;

    fn body_state(&self, id: FixtureId) -> BodyState;

    /// Apply an impulse at a world point on the body owning `id`.
    fn apply_linear_impulse(&mut self, id: FixtureId, impulse: Vec2, point: Vec2);
}

#[derive(Clone, Debug)]
pub struct SimpleBody {
    pub transform: Transform,
    pub mass: f32,
    pub inertia: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
}

impl SimpleBody {
    pub fn fixed(transform: Transform) -> Self {
        Self {
            transform,
            mass: 0.0,
            inertia: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimpleFixture {
    pub body: usize,
    pub shape: Shape,
    pub transform: Transform,
    pub sensor: bool,
    pub accepts_particles: bool,
    pub user_data: u64,
}

impl Fixture for SimpleFixture {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn user_data(&self) -> u64 {
        self.user_data
    }

    fn is_sensor(&self) -> bool {
        self.sensor
    }

    fn collides_with_particles(&self) -> bool {
        self.accepts_particles
    }
}

/// Minimal world: bodies with fixtures, linear AABB queries, no integration.
#[derive(Clone, Debug, Default)]
pub struct SimpleWorld {
    pub gravity: Vec2,
    pub bodies: Vec<SimpleBody>,
    pub fixtures: Vec<SimpleFixture>,
}

impl SimpleWorld {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            bodies: Vec::new(),
            fixtures: Vec::new(),
        }
    }

    pub fn add_body(&mut self, body: SimpleBody) -> usize {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    /// Attach `shape` to `body`; the fixture follows the body transform.
    pub fn add_fixture(&mut self, body: usize, shape: Shape) -> FixtureId {
        let transform = self.bodies[body].transform;
        self.fixtures.push(SimpleFixture {
            body,
            shape,
            transform,
            sensor: false,
            accepts_particles: true,
            user_data: 0,
        });
        FixtureId(self.fixtures.len() as u32 - 1)
    }

    /// Convenience: a static body at the origin holding `shape`.
    pub fn add_static(&mut self, shape: Shape) -> FixtureId {
        let body = self.add_body(SimpleBody::fixed(Transform::IDENTITY));
        self.add_fixture(body, shape)
    }

    pub fn fixture_mut(&mut self, id: FixtureId) -> Option<&mut SimpleFixture> {
        self.fixtures.get_mut(id.0 as usize)
    }
}

impl RigidWorld for SimpleWorld {
    fn gravity(&self) -> Vec2 {
        self.gravity
    }

    fn query_aabb(&self, aabb: &Aabb, callback: &mut dyn FnMut(FixtureId) -> bool) {
        for (i, fixture) in self.fixtures.iter().enumerate() {
            if fixture.shape.aabb(&fixture.transform).overlaps(aabb) && !callback(FixtureId(i as u32)) {
                return;
            }
        }
    }

    fn fixture(&self, id: FixtureId) -> Option<&dyn Fixture> {
        self.fixtures.get(id.0 as usize).map(|f| f as &dyn Fixture)
    }

    fn body_state(&self, id: FixtureId) -> BodyState {
        let Some(fixture) = self.fixtures.get(id.0 as usize) else {
            return BodyState::default();
        };
        let body = &self.bodies[fixture.body];
        BodyState {
            mass: body.mass,
            inertia: body.inertia,
            world_center: body.transform.p,
            linear_velocity: body.linear_velocity,
            angular_velocity: body.angular_velocity,
        }
    }

    fn apply_linear_impulse(&mut self, id: FixtureId, impulse: Vec2, point: Vec2) {
        let Some(fixture) = self.fixtures.get(id.0 as usize) else {
            return;
        };
        let body = &mut self.bodies[fixture.body];
        if body.mass <= 0.0 {
            return;
        }
        body.linear_velocity += impulse / body.mass;
        if body.inertia > 0.0 {
            body.angular_velocity += cross(point - body.transform.p, impulse) / body.inertia;
        }
    }
}
