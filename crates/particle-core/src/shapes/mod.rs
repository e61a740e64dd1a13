//! Collision shapes consumed by the particle system.
//!
//! Shapes are used three ways: filling particle groups, selecting particles
//! to destroy, and describing rigid fixtures the particles collide with.
//! Every query takes the shape's world transform explicitly.

pub mod circle;
pub mod edge;
pub mod polygon;

use glam::Vec2;

use crate::math::Transform;

pub use circle::Circle;
pub use edge::Edge;
pub use polygon::Polygon;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: Vec2,
    pub upper: Vec2,
}

impl Aabb {
    pub fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Box of half-extent `r` around `p`.
    pub fn around(p: Vec2, r: f32) -> Self {
        Self {
            lower: p - Vec2::splat(r),
            upper: p + Vec2::splat(r),
        }
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.lower.x <= other.upper.x
            && other.lower.x <= self.upper.x
            && self.lower.y <= other.upper.y
            && other.lower.y <= self.upper.y
    }

    pub fn contains(&self, p: Vec2) -> bool {
        self.lower.x <= p.x && p.x <= self.upper.x && self.lower.y <= p.y && p.y <= self.upper.y
    }
}

/// Result of a successful ray cast against a shape.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Fraction along `p1 -> p2` where the ray enters the shape.
    pub fraction: f32,
    /// World-space surface normal at the hit point.
    pub normal: Vec2,
}

/// A shape in its local frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Polygon(Polygon),
    Edge(Edge),
}

impl Shape {
    pub fn aabb(&self, xf: &Transform) -> Aabb {
        match self {
            Shape::Circle(s) => s.aabb(xf),
            Shape::Polygon(s) => s.aabb(xf),
            Shape::Edge(s) => s.aabb(xf),
        }
    }

    /// Whether `p` (world space) is inside the shape. Edges have no interior.
    pub fn test_point(&self, xf: &Transform, p: Vec2) -> bool {
        match self {
            Shape::Circle(s) => s.test_point(xf, p),
            Shape::Polygon(s) => s.test_point(xf, p),
            Shape::Edge(_) => false,
        }
    }

    /// Signed distance from `p` to the surface and the outward normal there.
    pub fn distance(&self, xf: &Transform, p: Vec2) -> (f32, Vec2) {
        match self {
            Shape::Circle(s) => s.distance(xf, p),
            Shape::Polygon(s) => s.distance(xf, p),
            Shape::Edge(s) => s.distance(xf, p),
        }
    }

    pub fn ray_cast(&self, xf: &Transform, p1: Vec2, p2: Vec2) -> Option<RayHit> {
        match self {
            Shape::Circle(s) => s.ray_cast(xf, p1, p2),
            Shape::Polygon(s) => s.ray_cast(xf, p1, p2),
            Shape::Edge(s) => s.ray_cast(xf, p1, p2),
        }
    }
}

impl From<Circle> for Shape {
    fn from(s: Circle) -> Self {
        Shape::Circle(s)
    }
}

impl From<Polygon> for Shape {
    fn from(s: Polygon) -> Self {
        Shape::Polygon(s)
    }
}

impl From<Edge> for Shape {
    fn from(s: Edge) -> Self {
        Shape::Edge(s)
    }
}
