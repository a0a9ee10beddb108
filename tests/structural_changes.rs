mod common;

use chunk_ecs::engine::component::{LinkedEntityGroup, CLEANUP_ENTITY_TYPE};
use chunk_ecs::engine::error::ECSError;
use chunk_ecs::{ComponentType, Entity, TypeSignature};

use common::{Position, Registered, Velocity};

#[test]
fn adding_and_removing_components_keeps_shared_values() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    manager.set_component(entity, Position { x: 7.0, y: 8.0, z: 9.0 }).unwrap();

    manager.add_component(entity, Velocity { x: 1.0, y: -1.0 }).unwrap();
    assert!(manager.has_component(entity, types.velocity).unwrap());
    assert_eq!(*manager.get_component::<Position>(entity).unwrap(), Position { x: 7.0, y: 8.0, z: 9.0 });
    assert_eq!(*manager.get_component::<Velocity>(entity).unwrap(), Velocity { x: 1.0, y: -1.0 });
    assert_eq!(manager.archetype(archetype).unwrap().entity_count(), 0);

    manager.remove_component::<Position>(entity).unwrap();
    assert!(!manager.has_component(entity, types.position).unwrap());
    assert_eq!(*manager.get_component::<Velocity>(entity).unwrap(), Velocity { x: 1.0, y: -1.0 });
    assert!(matches!(
        manager.get_component::<Position>(entity),
        Err(ECSError::MissingComponent(e)) if e.entity == entity
    ));
}

#[test]
fn adding_an_existing_type_is_a_no_op() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    let before = manager.location(entity).unwrap();

    manager.add_component_type(entity, types.position).unwrap();
    manager.remove_component_type(entity, types.velocity).unwrap();
    assert_eq!(manager.location(entity), Some(before));
}

#[test]
fn tags_move_entities_without_payload() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 4).unwrap();
    manager.set_component(entities[3], Position { x: 3.0, y: 0.0, z: 0.0 }).unwrap();

    manager.add_component_type(entities[3], types.frozen).unwrap();
    let frozen = manager.archetype_of(entities[3]).unwrap();
    assert_ne!(frozen, archetype);
    assert_eq!(manager.archetype(frozen).unwrap().bytes_per_entity(), 8 + 12);
    assert_eq!(manager.get_component::<Position>(entities[3]).unwrap().x, 3.0);
}

#[test]
fn batch_move_to_archetype() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 700).unwrap();
    for (i, &e) in entities.iter().enumerate() {
        manager.set_component(e, Position { x: i as f32, y: 0.0, z: 0.0 }).unwrap();
    }

    let target = TypeSignature::new(&[ComponentType::of(types.position), ComponentType::of(types.velocity)]);
    manager.move_to_archetype(&entities, &target).unwrap();

    let destination = manager.archetypes().find(&target).unwrap();
    assert_eq!(manager.archetype(destination).unwrap().entity_count(), 700);
    assert_eq!(manager.archetype(archetype).unwrap().entity_count(), 0);
    for (i, &e) in entities.iter().enumerate() {
        assert_eq!(manager.archetype_of(e).unwrap(), destination);
        assert_eq!(manager.get_component::<Position>(e).unwrap().x, i as f32);
        assert_eq!(*manager.get_component::<Velocity>(e).unwrap(), Velocity::default());
    }
}

#[test]
fn move_with_stale_entity_changes_nothing() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 3).unwrap();
    manager.destroy_entities(&entities[1..2]).unwrap();

    let target = TypeSignature::from_indices(&[types.velocity]);
    let err = manager.move_to_archetype(&entities, &target).unwrap_err();
    assert!(matches!(err, ECSError::StaleEntity(e) if e.entity == entities[1]));
    assert_eq!(manager.archetype_of(entities[0]).unwrap(), archetype);
    assert_eq!(manager.archetype_of(entities[2]).unwrap(), archetype);
}

#[test]
fn stale_handles_are_rejected_by_accessors() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    manager.destroy_entities(&[entity]).unwrap();
    manager.destroy_entities(&[entity]).unwrap();

    assert!(matches!(manager.get_component::<Position>(entity), Err(ECSError::StaleEntity(_))));
    assert!(matches!(manager.add_component_type(entity, types.velocity), Err(ECSError::StaleEntity(_))));
    assert!(matches!(manager.instantiate(entity, 1), Err(ECSError::StaleEntity(_))));
    assert_eq!(manager.entity_count(), 0);
}

#[test]
fn system_state_entities_leave_a_residue() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position, types.registered]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    manager.set_component(entity, Registered { slot: 42 }).unwrap();

    manager.destroy_entities(&[entity]).unwrap();
    assert!(manager.exists(entity));
    let residue = manager.archetype_of(entity).unwrap();
    let layout = manager.archetype(residue).unwrap();
    assert!(layout.is_cleanup_residue());
    assert!(layout.has(CLEANUP_ENTITY_TYPE));
    assert!(!layout.has(types.position));
    assert_eq!(manager.get_component::<Registered>(entity).unwrap().slot, 42);

    // Destroying again leaves the residue alone.
    manager.destroy_entities(&[entity]).unwrap();
    assert_eq!(manager.archetype_of(entity).unwrap(), residue);

    manager.remove_component::<Registered>(entity).unwrap();
    assert!(!manager.exists(entity));
    assert_eq!(manager.entity_count(), 0);
}

#[test]
fn partial_linked_group_destroy_is_rejected() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let root_archetype = manager.archetype_of_types(&[types.position, chunk_ecs::engine::component::LINKED_ENTITY_GROUP_TYPE]).unwrap();
    let root = manager.create_entities(root_archetype, 1).unwrap()[0];
    let children = manager.create_entities(archetype, 2).unwrap();

    let group: Vec<LinkedEntityGroup> = [root, children[0], children[1]]
        .iter()
        .map(|&value| LinkedEntityGroup { value })
        .collect();
    manager.set_buffer(root, &group).unwrap();

    let err = manager.destroy_entities(&[root, children[0]]).unwrap_err();
    assert!(matches!(
        err,
        ECSError::IncompleteLinkedGroupDestroy(e) if e.root == root && e.missing == children[1]
    ));
    assert!(manager.exists(root) && manager.exists(children[0]));

    // Destroying a member alone is allowed.
    manager.destroy_entities(&[children[1]]).unwrap();
    manager.destroy_entities(&[root, children[0]]).unwrap();
    assert_eq!(manager.entity_count(), 0);
}

#[test]
fn destroy_linked_group_takes_every_member() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let root_archetype = manager.archetype_of_types(&[types.position, chunk_ecs::engine::component::LINKED_ENTITY_GROUP_TYPE]).unwrap();
    let root = manager.create_entities(root_archetype, 1).unwrap()[0];
    let children = manager.create_entities(archetype, 3).unwrap();
    let bystander = manager.create_entities(archetype, 1).unwrap()[0];

    let mut group = vec![LinkedEntityGroup { value: root }];
    group.extend(children.iter().map(|&value| LinkedEntityGroup { value }));
    manager.set_buffer(root, &group).unwrap();
    assert_eq!(manager.linked_group(root).unwrap().unwrap().len(), 4);

    manager.destroy_linked_group(root).unwrap();
    assert!(!manager.exists(root));
    assert!(children.iter().all(|&c| !manager.exists(c)));
    assert!(manager.exists(bystander));
    assert_eq!(manager.buffer_heap().live(), 0);
}

#[test]
fn destroy_matching_clears_archetypes() {
    let (mut manager, types) = common::manager();
    let a = manager.archetype_of_types(&[types.position]).unwrap();
    let b = manager.archetype_of_types(&[types.velocity]).unwrap();
    manager.create_entities(a, 1200).unwrap();
    let survivors = manager.create_entities(b, 10).unwrap();

    let matching = manager.matching_archetypes(&[types.position], &[]);
    manager.destroy_matching(&matching).unwrap();
    assert_eq!(manager.archetype(a).unwrap().entity_count(), 0);
    assert_eq!(manager.archetype(a).unwrap().chunk_count(), 0);
    assert!(survivors.iter().all(|&e| manager.exists(e)));
}

#[test]
fn repeated_entities_in_a_destroy_batch_are_skipped() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 5).unwrap();
    let batch: Vec<Entity> = vec![entities[4], entities[0], entities[4], entities[0]];

    manager.destroy_entities(&batch).unwrap();
    assert_eq!(manager.entity_count(), 3);
    for &e in &entities[1..4] {
        let location = manager.location(e).unwrap();
        assert_eq!(manager.chunk_entities(location.chunk).unwrap()[location.slot as usize], e);
    }
}
