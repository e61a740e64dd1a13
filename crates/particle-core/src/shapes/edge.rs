use glam::Vec2;

use super::{Aabb, RayHit};
use crate::math::Transform;

/// Two-sided line segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub v1: Vec2,
    pub v2: Vec2,
}

impl Edge {
    pub fn new(v1: Vec2, v2: Vec2) -> Self {
        Self { v1, v2 }
    }

    pub fn aabb(&self, xf: &Transform) -> Aabb {
        let a = xf.apply(self.v1);
        let b = xf.apply(self.v2);
        Aabb::new(a.min(b), a.max(b))
    }

    pub fn distance(&self, xf: &Transform, p: Vec2) -> (f32, Vec2) {
        let v1 = xf.apply(self.v1);
        let v2 = xf.apply(self.v2);

        let mut d = p - v1;
        let s = v2 - v1;
        let ds = d.dot(s);
        if ds > 0.0 {
            let s2 = s.length_squared();
            if ds > s2 {
                d = p - v2;
            } else {
                d -= s * (ds / s2);
            }
        }

        let len = d.length();
        let normal = if len > f32::EPSILON {
            d / len
        } else {
            s.perp().normalize_or_zero()
        };
        (len, normal)
    }

    pub fn ray_cast(&self, xf: &Transform, p1: Vec2, p2: Vec2) -> Option<RayHit> {
        let p1 = xf.apply_inv(p1);
        let p2 = xf.apply_inv(p2);
        let d = p2 - p1;

        let e = self.v2 - self.v1;
        let normal = Vec2::new(e.y, -e.x).normalize_or_zero();

        // q = p1 + t * d, dot(normal, q - v1) = 0
        let numerator = normal.dot(self.v1 - p1);
        let denominator = normal.dot(d);
        if denominator == 0.0 {
            return None;
        }

        let t = numerator / denominator;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }

        let q = p1 + d * t;
        let rr = e.length_squared();
        if rr == 0.0 {
            return None;
        }
        let s = (q - self.v1).dot(e) / rr;
        if !(0.0..=1.0).contains(&s) {
            return None;
        }

        let world_normal = xf.q.apply(normal);
        Some(RayHit {
            fraction: t,
            normal: if numerator > 0.0 { -world_normal } else { world_normal },
        })
    }
}
