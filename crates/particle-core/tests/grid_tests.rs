use std::collections::BTreeSet;

use glam::Vec2;
use particle_core::grid::SpatialHashGrid;
use particle_core::shapes::Aabb;
use proptest::prelude::*;

/// All pairs closer than `range`, by brute force.
fn brute_force_pairs(positions: &[Vec2], range: f32) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for i in 0..positions.len() {
        for j in i + 1..positions.len() {
            if positions[i].distance(positions[j]) < range {
                pairs.insert((i, j));
            }
        }
    }
    pairs
}

fn grid_pairs(grid: &SpatialHashGrid, positions: &[Vec2], range: f32) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    grid.for_each_pair(|i, j| {
        if positions[i].distance(positions[j]) < range {
            let inserted = pairs.insert((i.min(j), i.max(j)));
            assert!(inserted, "pair ({i}, {j}) visited twice");
        }
    });
    pairs
}

#[test]
fn test_grid_build_and_query() {
    let mut grid = SpatialHashGrid::new(1.0);

    // Two particles close together, one far away
    let positions = vec![
        Vec2::new(0.1, 0.1),
        Vec2::new(0.2, 0.2),
        Vec2::new(10.0, 10.0),
    ];
    grid.build(&positions);
    assert_eq!(grid.len(), 3);

    let mut neighbors = Vec::new();
    grid.query_neighbors(positions[0], |idx| neighbors.push(idx));

    assert!(neighbors.contains(&0), "should find itself");
    assert!(neighbors.contains(&1), "should find nearby particle");
    assert!(!neighbors.contains(&2), "should not find distant particle");
}

#[test]
fn test_grid_empty() {
    let mut grid = SpatialHashGrid::new(1.0);
    grid.build(&[]);
    assert!(grid.is_empty());

    let mut visited = 0;
    grid.for_each_pair(|_, _| visited += 1);
    grid.query_neighbors(Vec2::ZERO, |_| visited += 1);
    assert_eq!(visited, 0);
}

#[test]
fn test_grid_negative_coordinates() {
    let mut grid = SpatialHashGrid::new(0.5);
    let positions = vec![Vec2::new(-0.1, -0.1), Vec2::new(0.1, 0.1)];
    grid.build(&positions);

    // Different cells on either side of the origin, still neighbors
    assert_ne!(grid.cell_of(positions[0]), grid.cell_of(positions[1]));
    assert_eq!(grid_pairs(&grid, &positions, 0.5).len(), 1);
}

#[test]
fn test_grid_lattice_matches_brute_force() {
    let mut positions = Vec::new();
    for y in 0..12 {
        for x in 0..12 {
            positions.push(Vec2::new(x as f32 * 0.37, y as f32 * 0.41));
        }
    }
    let mut grid = SpatialHashGrid::new(1.0);
    grid.build(&positions);

    assert_eq!(
        grid_pairs(&grid, &positions, 1.0),
        brute_force_pairs(&positions, 1.0)
    );
}

#[test]
fn test_grid_rebuild_reuses_storage() {
    let mut grid = SpatialHashGrid::new(1.0);
    let a = vec![Vec2::ZERO, Vec2::new(0.5, 0.0)];
    grid.build(&a);
    assert_eq!(grid_pairs(&grid, &a, 1.0).len(), 1);

    let b = vec![Vec2::ZERO, Vec2::new(5.0, 0.0)];
    grid.build(&b);
    assert!(grid_pairs(&grid, &b, 1.0).is_empty(), "stale cells after rebuild");
}

#[test]
fn test_query_aabb_returns_superset() {
    let positions: Vec<Vec2> = (0..50)
        .map(|i| Vec2::new((i % 10) as f32 * 0.3, (i / 10) as f32 * 0.3))
        .collect();
    let mut grid = SpatialHashGrid::new(0.5);
    grid.build(&positions);

    let aabb = Aabb::new(Vec2::new(0.5, 0.2), Vec2::new(1.6, 0.8));
    let mut found = BTreeSet::new();
    grid.query_aabb(&aabb, |i| {
        found.insert(i as usize);
    });
    for (i, &p) in positions.iter().enumerate() {
        if aabb.contains(p) {
            assert!(found.contains(&i), "particle {i} at {p:?} missed");
        }
    }
}

proptest! {
    #[test]
    fn prop_pairs_match_brute_force(
        coords in prop::collection::vec((-20.0f32..20.0, -20.0f32..20.0), 0..120),
        cell in 0.5f32..3.0,
    ) {
        let positions: Vec<Vec2> = coords.into_iter().map(|(x, y)| Vec2::new(x, y)).collect();
        let mut grid = SpatialHashGrid::new(cell);
        grid.build(&positions);
        prop_assert_eq!(
            grid_pairs(&grid, &positions, cell),
            brute_force_pairs(&positions, cell)
        );
    }
}
