use glam::Vec2;

use super::{Aabb, RayHit};
use crate::math::{cross, Transform};

/// Convex polygon with counter-clockwise winding.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<Vec2>,
    normals: Vec<Vec2>,
}

impl Polygon {
    /// Build from convex vertices. Clockwise input is reversed.
    pub fn new(points: &[Vec2]) -> Self {
        let mut vertices = points.to_vec();
        let mut area = 0.0;
        for i in 0..vertices.len() {
            let j = (i + 1) % vertices.len();
            area += cross(vertices[i], vertices[j]);
        }
        if area < 0.0 {
            vertices.reverse();
        }

        let normals = (0..vertices.len())
            .map(|i| {
                let edge = vertices[(i + 1) % vertices.len()] - vertices[i];
                Vec2::new(edge.y, -edge.x).normalize_or_zero()
            })
            .collect();

        Self { vertices, normals }
    }

    /// Axis-aligned box with half extents `hx`, `hy` centered at the origin.
    pub fn new_box(hx: f32, hy: f32) -> Self {
        Self::new(&[
            Vec2::new(-hx, -hy),
            Vec2::new(hx, -hy),
            Vec2::new(hx, hy),
            Vec2::new(-hx, hy),
        ])
    }

    /// Box with half extents `hx`, `hy`, placed at `center` and rotated by `angle`.
    pub fn new_oriented_box(hx: f32, hy: f32, center: Vec2, angle: f32) -> Self {
        let xf = Transform::new(center, angle);
        let corners = [
            Vec2::new(-hx, -hy),
            Vec2::new(hx, -hy),
            Vec2::new(hx, hy),
            Vec2::new(-hx, hy),
        ];
        Self::new(&corners.map(|v| xf.apply(v)))
    }

    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    pub fn aabb(&self, xf: &Transform) -> Aabb {
        let mut lower = Vec2::splat(f32::MAX);
        let mut upper = Vec2::splat(f32::MIN);
        for &v in &self.vertices {
            let w = xf.apply(v);
            lower = lower.min(w);
            upper = upper.max(w);
        }
        Aabb::new(lower, upper)
    }

    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        let local = xf.apply_inv(p);
        self.vertices
            .iter()
            .zip(&self.normals)
            .all(|(&v, &n)| n.dot(local - v) <= 0.0)
    }

    pub fn distance(&self, xf: &Transform, p: Vec2) -> (f32, Vec2) {
        let local = xf.apply_inv(p);
        let mut max_distance = f32::MIN;
        let mut normal_for_max = local;

        for (&v, &n) in self.vertices.iter().zip(&self.normals) {
            let dot = n.dot(local - v);
            if dot > max_distance {
                max_distance = dot;
                normal_for_max = n;
            }
        }

        if max_distance > 0.0 {
            // Outside: the closest feature may be a vertex.
            let mut min_distance = normal_for_max;
            let mut min_distance2 = max_distance * max_distance;
            for &v in &self.vertices {
                let d = local - v;
                let d2 = d.length_squared();
                if min_distance2 > d2 {
                    min_distance = d;
                    min_distance2 = d2;
                }
            }
            (
                min_distance2.sqrt(),
                xf.q.apply(min_distance).normalize_or_zero(),
            )
        } else {
            (max_distance, xf.q.apply(normal_for_max))
        }
    }

    pub fn ray_cast(&self, xf: &Transform, p1: Vec2, p2: Vec2) -> Option<RayHit> {
        let p1 = xf.apply_inv(p1);
        let p2 = xf.apply_inv(p2);
        let d = p2 - p1;

        let mut lower = 0.0_f32;
        let mut upper = 1.0_f32;
        let mut index = None;

        for (i, (&v, &n)) in self.vertices.iter().zip(&self.normals).enumerate() {
            // p = p1 + a * d, dot(n, p - v) = 0
            let numerator = n.dot(v - p1);
            let denominator = n.dot(d);

            if denominator == 0.0 {
                if numerator < 0.0 {
                    return None;
                }
            } else if denominator < 0.0 && numerator < lower * denominator {
                lower = numerator / denominator;
                index = Some(i);
            } else if denominator > 0.0 && numerator < upper * denominator {
                upper = numerator / denominator;
            }

            if upper < lower {
                return None;
            }
        }

        index.map(|i| RayHit {
            fraction: lower,
            normal: xf.q.apply(self.normals[i]),
        })
    }
}
