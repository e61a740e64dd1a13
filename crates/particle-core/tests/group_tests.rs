use std::collections::BTreeSet;

use glam::Vec2;
use particle_core::shapes::{Circle, Polygon, Shape};
use particle_core::world::SimpleWorld;
use particle_core::{
    GroupFlags, GroupState, ParticleDef, ParticleFlags, ParticleGroupDef, ParticleSystem,
    ParticleSystemDef,
};

const DT: f32 = 1.0 / 60.0;

fn system_with(def: ParticleSystemDef) -> ParticleSystem {
    ParticleSystem::new(ParticleSystemDef {
        radius: 0.1,
        ..def
    })
    .unwrap()
}

fn system() -> ParticleSystem {
    system_with(ParticleSystemDef::default())
}

fn box_group(system: &mut ParticleSystem, center: Vec2, flags: ParticleFlags) -> particle_core::GroupId {
    let shapes = [Shape::Polygon(Polygon::new_box(0.3, 0.3))];
    system.create_particle_group(&ParticleGroupDef {
        flags,
        position: center,
        shapes: &shapes,
        ..Default::default()
    })
}

#[test]
fn test_group_range_is_contiguous() {
    let mut system = system();
    let a = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    let b = box_group(&mut system, Vec2::new(3.0, 0.0), ParticleFlags::WATER);

    let ra = system.group(a).unwrap().range();
    let rb = system.group(b).unwrap().range();
    assert_eq!(ra.start, 0);
    assert!(!ra.is_empty());
    assert_eq!(rb.start, ra.end, "groups should be laid out back to back");
    assert_eq!(rb.end, system.count());
    for i in ra {
        assert_eq!(system.particle_group(i), Some(a));
    }
    for i in rb {
        assert_eq!(system.particle_group(i), Some(b));
    }
    let order: Vec<_> = system.groups().map(|(id, _)| id).collect();
    assert_eq!(order, vec![a, b], "groups iterate in creation order");
}

#[test]
fn test_group_fill_uses_stride_lattice() {
    let mut system = system();
    let id = box_group(&mut system, Vec2::new(1.0, 2.0), ParticleFlags::WATER);
    // stride = 0.75 * 0.2 = 0.15; lattice -0.3, -0.15, 0, 0.15 on each axis
    assert_eq!(system.group(id).unwrap().count(), 16);
    let group = system.group(id).unwrap();
    assert_eq!(group.position(), Vec2::new(1.0, 2.0));
}

#[test]
fn test_group_velocity_field() {
    let mut system = system();
    let positions = [Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
    system.create_particle_group(&ParticleGroupDef {
        positions: &positions,
        linear_velocity: Vec2::new(0.5, 0.0),
        angular_velocity: 2.0,
        ..Default::default()
    });
    // v = lv + w x r
    assert!((system.velocities()[0] - Vec2::new(0.5, 2.0)).length() < 1e-6);
    assert!((system.velocities()[1] - Vec2::new(-1.5, 0.0)).length() < 1e-6);
}

#[test]
fn test_round_trip_restores_count() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    box_group(&mut system, Vec2::new(-5.0, 0.0), ParticleFlags::WATER);
    let before = system.count();

    let id = box_group(&mut system, Vec2::new(5.0, 0.0), ParticleFlags::WATER);
    assert!(system.count() > before);
    system.destroy_particles_in_group(id, false);
    system.step(&mut world, DT);

    assert_eq!(system.count(), before);
    assert!(system.group(id).is_none(), "emptied group should be removed");
    assert_eq!(system.group_count(), 1);
}

#[test]
fn test_destroy_is_idempotent() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let id = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    let before = system.count();

    system.destroy_particle(0, false);
    system.destroy_particle(0, true);
    system.destroy_particles_in_group(id, false);
    system.destroy_particles_in_group(id, false);
    system.step(&mut world, DT);
    assert_eq!(system.count(), 0);

    // Stale group id: no-op
    system.destroy_particles_in_group(id, false);
    system.step(&mut world, DT);
    assert_eq!(system.count(), 0);
    assert!(before > 0);
}

#[test]
fn test_group_state_follows_pending_destruction() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let id = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    assert_eq!(system.group_state(id), Some(GroupState::Active));

    let first = system.group(id).unwrap().range().start;
    system.destroy_particle(first, false);
    assert_eq!(system.group_state(id), Some(GroupState::PartiallyZombie));

    system.step(&mut world, DT);
    assert_eq!(system.group_state(id), Some(GroupState::Active));

    system.destroy_particles_in_group(id, false);
    system.step(&mut world, DT);
    assert_eq!(system.group_state(id), None, "emptied group is destroyed");
}

#[test]
fn test_empty_group_kept_only_when_allowed() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let transient = system.create_particle_group(&ParticleGroupDef::default());
    let kept = system.create_particle_group(&ParticleGroupDef {
        group_flags: GroupFlags::CAN_BE_EMPTY,
        ..Default::default()
    });
    assert!(system.group(transient).unwrap().is_empty());

    system.step(&mut world, DT);
    assert!(system.group(transient).is_none());
    assert!(system.group(kept).is_some());

    // An empty group still accepts particles.
    let index = system
        .create_particle(&ParticleDef {
            group: Some(kept),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(system.group(kept).unwrap().range(), index..index + 1);
}

#[test]
fn test_join_merges_membership() {
    let mut system = system();
    let a = box_group(&mut system, Vec2::ZERO, ParticleFlags::SPRING);
    let free = system
        .create_particle(&ParticleDef {
            position: Vec2::new(20.0, 0.0),
            user_data: 42,
            ..Default::default()
        })
        .unwrap();
    let free_handle = system.particle_handle(free).unwrap();
    let b = box_group(&mut system, Vec2::new(0.6, 0.0), ParticleFlags::SPRING);
    let count_a = system.group(a).unwrap().count();
    let count_b = system.group(b).unwrap().count();
    let pairs_before = system.pairs().len();

    system.join_particle_groups(a, b);

    assert!(system.group(b).is_none());
    let range = system.group(a).unwrap().range();
    assert_eq!(range.len(), count_a + count_b);
    for i in range.clone() {
        assert_eq!(system.particle_group(i), Some(a));
    }
    let free = system.handle_index(free_handle).unwrap();
    assert!(!range.contains(&free));
    assert_eq!(system.particle_group(free), None);
    assert_eq!(system.user_data()[free], 42);
    assert!(
        system.pairs().len() > pairs_before,
        "touching spring groups should bond across the seam"
    );
    for pair in system.pairs() {
        assert!(pair.a < pair.b && pair.b < system.count());
    }
}

#[test]
fn test_create_into_existing_group() {
    let mut system = system();
    let target = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    let count = system.group(target).unwrap().count();
    let positions = [Vec2::new(1.0, 0.0), Vec2::new(1.15, 0.0)];

    let id = system.create_particle_group(&ParticleGroupDef {
        positions: &positions,
        group: Some(target),
        ..Default::default()
    });
    assert_eq!(id, target);
    assert_eq!(system.group(target).unwrap().count(), count + 2);
    assert_eq!(system.group_count(), 1);

    // Mismatched flags create a separate group.
    let other = system.create_particle_group(&ParticleGroupDef {
        positions: &positions,
        group_flags: GroupFlags::SOLID,
        group: Some(target),
        ..Default::default()
    });
    assert_ne!(other, target);
    assert_eq!(system.group_count(), 2);
}

#[test]
fn test_split_disconnected_group() {
    let mut system = system();
    let shapes = [
        Shape::Circle(Circle::new(Vec2::new(-2.0, 0.0), 0.3)),
        Shape::Circle(Circle::new(Vec2::new(2.0, 0.0), 0.5)),
    ];
    let id = system.create_particle_group(&ParticleGroupDef {
        shapes: &shapes,
        ..Default::default()
    });
    let total = system.group(id).unwrap().count();

    let created = system.split_particle_group(id);
    assert_eq!(created.len(), 1);
    let kept = system.group(id).unwrap();
    let piece = system.group(created[0]).unwrap();
    assert_eq!(kept.count() + piece.count(), total);
    assert!(kept.count() > piece.count(), "largest component keeps the id");
    for i in kept.range() {
        assert!(system.positions()[i].x > 0.0);
    }
    for i in piece.range() {
        assert!(system.positions()[i].x < 0.0);
        assert_eq!(system.particle_group(i), Some(created[0]));
    }

    // A connected group does not split.
    assert!(system.split_particle_group(id).is_empty());
}

/// Removing the bridge of a rigid dumbbell leaves two rigid groups whose
/// members are exactly the surviving particles.
#[test]
fn test_rigid_group_splits_after_removal() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let mut positions = Vec::new();
    for cx in [-1.0, 1.0] {
        for y in -1..=1 {
            for x in -1..=1 {
                positions.push(Vec2::new(cx + x as f32 * 0.15, y as f32 * 0.15));
            }
        }
    }
    for k in 0..=10 {
        positions.push(Vec2::new(-0.7 + 0.14 * k as f32, 0.0));
    }
    let id = system.create_particle_group(&ParticleGroupDef {
        group_flags: GroupFlags::RIGID,
        positions: &positions,
        ..Default::default()
    });
    assert_eq!(system.group(id).unwrap().count(), positions.len());

    let mut survivors = Vec::new();
    for i in 0..system.count() {
        if system.positions()[i].x.abs() < 0.75 {
            system.destroy_particle(i, false);
        } else {
            survivors.push(system.particle_handle(i).unwrap());
        }
    }
    system.step(&mut world, DT);

    assert_eq!(system.count(), 18, "exactly the bridge is removed");
    assert_eq!(system.group_count(), 2);
    let members: BTreeSet<usize> = system
        .groups()
        .flat_map(|(_, g)| g.range())
        .collect();
    let expected: BTreeSet<usize> = survivors
        .iter()
        .map(|&h| system.handle_index(h).unwrap())
        .collect();
    assert_eq!(members, expected);
    for (_, group) in system.groups() {
        assert_eq!(group.count(), 9);
        assert!(group.flags().contains(GroupFlags::RIGID));
        let side = system.positions()[group.range().start].x.signum();
        for i in group.range() {
            assert_eq!(system.positions()[i].x.signum(), side, "cluster mixed across the gap");
        }
    }
    assert!(system.group(id).is_some(), "original id survives the split");
}

#[test]
fn test_capacity_without_eviction() {
    const K: usize = 10;
    let mut system = system_with(ParticleSystemDef {
        max_count: K,
        destroy_by_age: false,
        ..Default::default()
    });
    for i in 0..K {
        let created = system.create_particle(&ParticleDef {
            position: Vec2::new(i as f32, 0.0),
            ..Default::default()
        });
        assert_eq!(created, Some(i));
    }
    assert!(system.create_particle(&ParticleDef::default()).is_none());
    assert_eq!(system.count(), K);
}

#[test]
fn test_capacity_evicts_oldest() {
    let mut system = system_with(ParticleSystemDef {
        max_count: 3,
        ..Default::default()
    });
    for i in 0..4u64 {
        system
            .create_particle(&ParticleDef {
                position: Vec2::new(i as f32 * 5.0, 0.0),
                user_data: i,
                ..Default::default()
            })
            .unwrap();
    }
    assert_eq!(system.count(), 3);
    assert_eq!(system.user_data(), &[1, 2, 3]);

    // Finite lifetimes go first.
    system.set_particle_lifetime(2, 10.0);
    system
        .create_particle(&ParticleDef {
            user_data: 4,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(system.user_data(), &[1, 2, 4]);
}

#[test]
fn test_group_creation_respects_capacity() {
    let mut system = system_with(ParticleSystemDef {
        max_count: 5,
        destroy_by_age: false,
        ..Default::default()
    });
    let id = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    assert_eq!(system.count(), 5);
    assert_eq!(system.group(id).unwrap().range(), 0..5);
}

#[test]
fn test_lifetime_expires() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    system.create_particle(&ParticleDef {
        lifetime: 0.05,
        ..Default::default()
    });
    system.create_particle(&ParticleDef {
        position: Vec2::new(5.0, 0.0),
        ..Default::default()
    });
    for _ in 0..5 {
        system.step(&mut world, DT);
    }
    assert_eq!(system.count(), 1);
    assert_eq!(system.particle_lifetime(0), 0.0, "survivor is immortal");
}

#[test]
fn test_destroy_in_shape() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    let before = system.count();
    let shape = Shape::Circle(Circle::new(Vec2::ZERO, 0.1));
    let destroyed = system.destroy_particles_in_shape(
        &shape,
        &particle_core::math::Transform::IDENTITY,
        false,
    );
    // Only the lattice point at the origin is within 0.1.
    assert_eq!(destroyed, 1);
    system.step(&mut world, DT);
    assert_eq!(system.count(), before - 1);
}

#[test]
fn test_group_statistics_and_impulse() {
    let mut system = system();
    let id = box_group(&mut system, Vec2::new(1.0, 1.0), ParticleFlags::WATER);
    let stats = system.group_statistics(id).unwrap();
    let n = system.group(id).unwrap().count() as f32;
    assert!((stats.mass - n * system.particle_mass()).abs() < 1e-4);
    assert!(stats.linear_velocity.length() < 1e-6);

    system.group_apply_linear_impulse(id, Vec2::new(stats.mass, 0.0));
    let stats = system.group_statistics(id).unwrap();
    assert!((stats.linear_velocity - Vec2::X).length() < 1e-4);
    assert_eq!(system.group_all_particle_flags(id), ParticleFlags::WATER);
}

#[test]
fn test_set_group_flags_makes_rigid() {
    let mut system = system();
    let mut world = SimpleWorld::new(Vec2::ZERO);
    let id = box_group(&mut system, Vec2::ZERO, ParticleFlags::WATER);
    system.set_group_flags(id, GroupFlags::RIGID);
    assert!(system.all_group_flags().contains(GroupFlags::RIGID));

    system.group_apply_linear_impulse(id, Vec2::new(0.0, 1.0));
    system.step(&mut world, DT);
    let group = system.group(id).unwrap();
    assert!(group.linear_velocity().y > 0.0);
    assert!(group.angle().abs() < 1e-3);
}
