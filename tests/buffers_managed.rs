mod common;

use common::{Label, Waypoint};

fn wp(v: f32) -> Waypoint {
    Waypoint { x: v, y: -v }
}

#[test]
fn buffers_spill_from_inline_storage_to_the_heap() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.waypoints]).unwrap();
    let entity = manager.create_entities(archetype, 1).unwrap()[0];
    assert!(manager.get_buffer::<Waypoint>(entity).unwrap().is_empty());

    manager.push_buffer(entity, wp(1.0)).unwrap();
    manager.push_buffer(entity, wp(2.0)).unwrap();
    assert_eq!(manager.buffer_heap().live(), 0, "two elements fit inline");

    manager.push_buffer(entity, wp(3.0)).unwrap();
    assert_eq!(manager.buffer_heap().live(), 1);
    assert_eq!(manager.get_buffer::<Waypoint>(entity).unwrap(), &[wp(1.0), wp(2.0), wp(3.0)]);

    manager.clear_buffer::<Waypoint>(entity).unwrap();
    assert!(manager.get_buffer::<Waypoint>(entity).unwrap().is_empty());
    assert_eq!(manager.buffer_heap().live(), 0);
}

#[test]
fn buffers_survive_moves_and_are_freed_with_the_entity() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.waypoints]).unwrap();
    let entities = manager.create_entities(archetype, 3).unwrap();
    let values: Vec<Waypoint> = (0..10).map(|i| wp(i as f32)).collect();
    manager.set_buffer(entities[0], &values).unwrap();
    manager.set_buffer(entities[2], &values[..1]).unwrap();

    manager.add_component_type(entities[0], types.position).unwrap();
    assert_eq!(manager.get_buffer::<Waypoint>(entities[0]).unwrap(), values.as_slice());
    assert_eq!(manager.get_buffer::<Waypoint>(entities[2]).unwrap(), &values[..1]);

    manager.remove_component_type(entities[0], types.waypoints).unwrap();
    assert_eq!(manager.buffer_heap().live(), 0);

    manager.set_buffer(entities[1], &values).unwrap();
    manager.destroy_entities(&entities[1..2]).unwrap();
    assert_eq!(manager.buffer_heap().live(), 0);
}

#[test]
fn managed_values_start_empty_and_follow_the_entity() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.label]).unwrap();
    let entities = manager.create_entities(archetype, 2).unwrap();
    assert_eq!(manager.get_managed::<Label>(entities[0]).unwrap(), None);

    manager.set_managed(entities[0], Label("first".into())).unwrap();
    manager.set_managed(entities[1], Label("second".into())).unwrap();
    manager.set_managed(entities[1], Label("again".into())).unwrap();
    assert_eq!(manager.managed_store().live(), 2);

    manager.destroy_entities(&entities[..1]).unwrap();
    assert_eq!(manager.managed_store().live(), 1);
    assert_eq!(manager.get_managed::<Label>(entities[1]).unwrap(), Some(&Label("again".into())));

    manager.add_component_type(entities[1], types.position).unwrap();
    assert_eq!(manager.get_managed::<Label>(entities[1]).unwrap(), Some(&Label("again".into())));
    manager.remove_component_type(entities[1], types.label).unwrap();
    assert_eq!(manager.managed_store().live(), 0);
}
