mod common;

use chunk_ecs::{ECSError, Entity};

use common::Position;

#[test]
fn thousand_entities_fill_583_then_417() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let entities = manager.create_entities(archetype, 1000).unwrap();
    assert_eq!(entities.len(), 1000);

    let layout = manager.archetype(archetype).unwrap();
    assert_eq!(layout.entity_count(), 1000);
    assert_eq!(layout.chunk_count(), 2);

    let mut counts: Vec<u32> = layout.chunks().iter().map(|&c| manager.chunks().get(c).unwrap().count()).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![417, 583]);
    assert_eq!(layout.chunks_with_space().len(), 1);

    for (i, &entity) in entities.iter().enumerate() {
        let location = manager.location(entity).unwrap();
        assert_eq!(manager.chunk_entities(location.chunk).unwrap()[location.slot as usize], entity, "entity {i}");
    }
}

#[test]
fn components_start_zeroed_and_keep_written_values() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 3).unwrap();

    assert_eq!(*manager.get_component::<Position>(entities[1]).unwrap(), Position::default());
    manager.set_component(entities[1], Position { x: 1.0, y: 2.0, z: 3.0 }).unwrap();
    assert_eq!(*manager.get_component::<Position>(entities[1]).unwrap(), Position { x: 1.0, y: 2.0, z: 3.0 });
    assert_eq!(*manager.get_component::<Position>(entities[0]).unwrap(), Position::default());
}

#[test]
fn destroy_compacts_from_the_tail() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 10).unwrap();
    for (i, &e) in entities.iter().enumerate() {
        manager.set_component(e, Position { x: i as f32, y: 0.0, z: 0.0 }).unwrap();
    }

    manager.destroy_entities(&entities[2..4]).unwrap();

    let chunk = manager.location(entities[0]).unwrap().chunk;
    assert_eq!(manager.chunks().get(chunk).unwrap().count(), 8);
    assert_eq!(manager.location(entities[8]).unwrap().slot, 2);
    assert_eq!(manager.location(entities[9]).unwrap().slot, 3);
    assert_eq!(manager.get_component::<Position>(entities[9]).unwrap().x, 9.0);
    assert!(!manager.exists(entities[2]));
    assert!(!manager.exists(entities[3]));

    let slots: Vec<Entity> = manager.chunk_entities(chunk).unwrap().to_vec();
    assert_eq!(slots, vec![
        entities[0], entities[1], entities[8], entities[9],
        entities[4], entities[5], entities[6], entities[7],
    ]);
}

#[test]
fn emptied_chunk_page_is_reused() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let first = manager.create_entities(archetype, 5).unwrap();
    let chunk = manager.location(first[0]).unwrap().chunk;
    let address = manager.chunks().page_address(chunk);

    manager.destroy_entities(&first).unwrap();
    assert_eq!(manager.archetype(archetype).unwrap().chunk_count(), 0);
    assert_eq!(manager.chunks().live_chunks(), 0);
    assert_eq!(manager.chunks().pooled_pages(), 1);

    let other = manager.archetype_of_types(&[types.velocity]).unwrap();
    let second = manager.create_entities(other, 1).unwrap();
    let reused = manager.location(second[0]).unwrap().chunk;
    assert_eq!(manager.chunks().page_address(reused), address);
    assert_eq!(manager.chunks().pooled_pages(), 0);
    assert_eq!(*manager.get_component::<common::Velocity>(second[0]).unwrap(), common::Velocity::default());
}

#[test]
fn full_chunk_leaves_and_rejoins_the_free_list() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let entities = manager.create_entities(archetype, 583).unwrap();
    assert!(manager.archetype(archetype).unwrap().chunks_with_space().is_empty());

    manager.destroy_entities(&entities[..1]).unwrap();
    assert_eq!(manager.archetype(archetype).unwrap().chunks_with_space().len(), 1);

    let again = manager.create_entities(archetype, 1).unwrap();
    let layout = manager.archetype(archetype).unwrap();
    assert_eq!(layout.chunk_count(), 1);
    assert!(layout.chunks_with_space().is_empty());
    assert_eq!(manager.location(again[0]).unwrap().slot, 582);
}

#[test]
fn change_versions_stamp_on_write() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    let chunk = manager.location(entity).unwrap().chunk;
    assert_eq!(manager.chunk_change_version(chunk, types.position), Some(1));

    let version = manager.advance_version();
    manager.set_component(entity, Position { x: 4.0, y: 0.0, z: 0.0 }).unwrap();
    assert_eq!(manager.chunk_change_version(chunk, types.position), Some(version));
    assert_eq!(manager.chunk_change_version(chunk, types.velocity), Some(1));
    assert_eq!(manager.chunk_change_version(chunk, types.team), None);
}

#[test]
fn chunk_column_exposes_dense_values() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 4).unwrap();
    let chunk = manager.location(entities[0]).unwrap().chunk;

    let mut column = manager.chunk_column_mut::<Position>(chunk).unwrap();
    assert_eq!(column.len(), 4);
    // SAFETY: no job is registered and no structural change runs here.
    for (i, p) in unsafe { column.as_mut_slice() }.iter_mut().enumerate() {
        p.y = i as f32;
    }
    assert_eq!(manager.get_component::<Position>(entities[3]).unwrap().y, 3.0);
}

#[test]
fn unknown_ids_are_errors() {
    let (mut manager, types) = common::manager();
    assert_eq!(manager.create_entities(999, 1).unwrap_err(), ECSError::UnknownArchetype(999));
    assert_eq!(manager.create_entities_with_shared(999, &[], 1).unwrap_err(), ECSError::UnknownArchetype(999));
    assert_eq!(manager.entity_count(), 0);

    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 2).unwrap();
    let chunk = manager.location(entities[0]).unwrap().chunk;
    manager.destroy_entities(&entities).unwrap();

    assert_eq!(manager.chunk_entities(chunk).unwrap_err(), ECSError::UnknownChunk(chunk));
    assert!(matches!(manager.chunk_column::<Position>(chunk), Err(ECSError::UnknownChunk(_))));
    assert!(manager.chunks().get(chunk).is_none());
}
