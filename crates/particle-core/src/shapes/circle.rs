use glam::Vec2;

use super::{Aabb, RayHit};
use crate::math::Transform;

#[derive(Clone, Debug, PartialEq)]
pub struct Circle {
    pub center: Vec2,
    pub radius: f32,
}

impl Circle {
    pub fn new(center: Vec2, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn aabb(&self, xf: &Transform) -> Aabb {
        Aabb::around(xf.apply(self.center), self.radius)
    }

    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let d = p - xf.apply(self.center);
        d.length_squared() <= self.radius * self.radius
    }

    pub fn distance(&self, xf: &Transform, p: Vec2) -> (f32, Vec2) {
        let d = p - xf.apply(self.center);
        let len = d.length();
        let normal = if len > f32::EPSILON { d / len } else { Vec2::Y };
        (len - self.radius, normal)
    }

    pub fn ray_cast(&self, xf: &Transform, p1: Vec2, p2: Vec2) -> Option<RayHit> {
        let s = p1 - xf.apply(self.center);
        let b = s.length_squared() - self.radius * self.radius;

        let r = p2 - p1;
        let c = s.dot(r);
        let rr = r.length_squared();
        let sigma = c * c - rr * b;
        if sigma < 0.0 || rr < f32::EPSILON {
            return None;
        }

        // Smallest root: where the ray enters the circle.
        let a = -(c + sigma.sqrt());
        if (0.0..=rr).contains(&a) {
            let fraction = a / rr;
            let normal = (s + r * fraction).normalize_or_zero();
            Some(RayHit { fraction, normal })
        } else {
            None
        }
    }
}
