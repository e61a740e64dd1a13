use glam::{DVec2, Vec2};

/// Delaunay triangulation by Bowyer-Watson insertion.
///
/// Returns index triples into `points`. Triangles are enumerated in a fixed
/// order for a given input. Duplicate points are skipped.
pub fn delaunay(points: &[Vec2]) -> Vec<[usize; 3]> {
    if points.len() < 3 {
        return Vec::new();
    }

    let pts: Vec<DVec2> = points.iter().map(|p| p.as_dvec2()).collect();
    let (lo, hi) = pts
        .iter()
        .fold((pts[0], pts[0]), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let center = (lo + hi) * 0.5;
    let span = (hi - lo).max_element().max(1e-6) * 20.0;

    // Super triangle enclosing every point, appended after the inputs.
    let n = pts.len();
    let mut vertices = pts;
    vertices.push(center + DVec2::new(-span, -span));
    vertices.push(center + DVec2::new(span, -span));
    vertices.push(center + DVec2::new(0.0, span));

    let mut triangles = vec![Triangle::new(&vertices, [n, n + 1, n + 2])];
    let mut bad = Vec::new();
    let mut edges: Vec<(usize, usize)> = Vec::new();

    for i in 0..n {
        let p = vertices[i];

        bad.clear();
        for (k, t) in triangles.iter().enumerate() {
            if t.circumcircle_contains(p) {
                bad.push(k);
            }
        }
        if bad.is_empty() {
            // Coincides with an existing vertex.
            continue;
        }

        // Boundary of the cavity: edges belonging to exactly one bad triangle.
        edges.clear();
        for &k in &bad {
            let [a, b, c] = triangles[k].v;
            for (u, w) in [(a, b), (b, c), (c, a)] {
                edges.push((u.min(w), u.max(w)));
            }
        }
        edges.sort_unstable();

        for &k in bad.iter().rev() {
            triangles.swap_remove(k);
        }

        let mut e = 0;
        while e < edges.len() {
            if e + 1 < edges.len() && edges[e] == edges[e + 1] {
                let shared = edges[e];
                while e < edges.len() && edges[e] == shared {
                    e += 1;
                }
                continue;
            }
            let (u, w) = edges[e];
            let t = Triangle::new(&vertices, [u, w, i]);
            if t.is_valid() {
                triangles.push(t);
            }
            e += 1;
        }
    }

    let mut out: Vec<[usize; 3]> = triangles
        .into_iter()
        .filter(|t| t.v.iter().all(|&v| v < n))
        .map(|t| {
            let mut v = t.v;
            v.sort_unstable();
            v
        })
        .collect();
    out.sort_unstable();
    out
}

struct Triangle {
    v: [usize; 3],
    center: DVec2,
    radius_squared: f64,
}

impl Triangle {
    fn new(vertices: &[DVec2], v: [usize; 3]) -> Self {
        let (a, b, c) = (vertices[v[0]], vertices[v[1]], vertices[v[2]]);
        let ab = b - a;
        let ac = c - a;
        let d = 2.0 * ab.perp_dot(ac);
        if d.abs() < f64::EPSILON {
            return Self {
                v,
                center: a,
                radius_squared: f64::NAN,
            };
        }
        let ab2 = ab.length_squared();
        let ac2 = ac.length_squared();
        let offset = DVec2::new(ac.y * ab2 - ab.y * ac2, ab.x * ac2 - ac.x * ab2) / d;
        Self {
            v,
            center: a + offset,
            radius_squared: offset.length_squared(),
        }
    }

    fn is_valid(&self) -> bool {
        self.radius_squared.is_finite()
    }

    fn circumcircle_contains(&self, p: DVec2) -> bool {
        let d = (p - self.center).length_squared();
        d < self.radius_squared * (1.0 - 1e-12)
    }
}
