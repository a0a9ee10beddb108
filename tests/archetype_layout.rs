mod common;

use chunk_ecs::engine::component::ComponentOptions;
use chunk_ecs::engine::error::{ECSError, InvalidSignatureReason};
use chunk_ecs::engine::types::IDENTITY_TYPE;
use chunk_ecs::{ComponentType, EngineConfig, EntityManager, TypeCatalog, TypeSignature};

use common::{Position, Velocity, Waypoint};

#[test]
fn position_velocity_layout_fits_583_per_chunk() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let archetype = manager.archetype(archetype).unwrap();

    assert_eq!(archetype.bytes_per_entity(), 8 + 12 + 8);
    assert_eq!(archetype.chunk_capacity(), 583);
    assert_eq!(archetype.signature().types()[0].type_index, IDENTITY_TYPE);
    assert_eq!(archetype.memory_order()[0], 0, "identity column is laid out first");

    let end = archetype.columns().iter().map(|c| c.offset + c.stride * 583).max().unwrap();
    assert!(end <= 16384 - 12);
}

#[test]
fn layout_is_independent_of_registration_order() {
    common::init_logging();

    let mut first = TypeCatalog::new();
    let p1 = first.register::<Position>().unwrap();
    let v1 = first.register::<Velocity>().unwrap();

    let mut second = TypeCatalog::new();
    let v2 = second.register::<Velocity>().unwrap();
    let p2 = second.register::<Position>().unwrap();
    assert_ne!(p1, p2);

    let mut a = EntityManager::new(first);
    let mut b = EntityManager::new(second);
    let ia = a.archetype_of_types(&[p1, v1]).unwrap();
    let ib = b.archetype_of_types(&[v2, p2]).unwrap();
    let la = a.archetype(ia).unwrap();
    let lb = b.archetype(ib).unwrap();

    assert_eq!(la.chunk_capacity(), lb.chunk_capacity());
    assert_eq!(la.column_of(p1).unwrap().offset, lb.column_of(p2).unwrap().offset);
    assert_eq!(la.column_of(v1).unwrap().offset, lb.column_of(v2).unwrap().offset);
    assert_eq!(la.column_of(IDENTITY_TYPE).unwrap().offset, lb.column_of(IDENTITY_TYPE).unwrap().offset);
}

#[test]
fn explicit_memory_ordering_moves_columns() {
    common::init_logging();
    let mut catalog = TypeCatalog::new();
    let p = catalog.register_with::<Position>(ComponentOptions::default().with_memory_ordering(u64::MAX)).unwrap();
    let v = catalog.register_with::<Velocity>(ComponentOptions::default().with_memory_ordering(1)).unwrap();
    let mut manager = EntityManager::new(catalog);

    let id = manager.archetype_of_types(&[p, v]).unwrap();
    let archetype = manager.archetype(id).unwrap();
    assert!(archetype.column_of(v).unwrap().offset < archetype.column_of(p).unwrap().offset);
}

#[test]
fn same_signature_interns_to_one_archetype() {
    let (mut manager, types) = common::manager();
    let a = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let b = manager.archetype_of_types(&[types.velocity, types.position, types.position]).unwrap();
    assert_eq!(a, b);

    let c = manager.archetype_of_types(&[types.position]).unwrap();
    assert_ne!(a, c);
    assert_eq!(manager.archetype(c).unwrap().previous(), Some(a));
}

#[test]
fn history_chain_visits_every_archetype_once() {
    let (mut manager, types) = common::manager();
    manager.archetype_of_types(&[types.position]).unwrap();
    manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    manager.archetype_of_types(&[types.velocity]).unwrap();
    manager.archetype_of_types(&[types.position]).unwrap();
    let registered = manager.archetype_of_types(&[types.position, types.registered]).unwrap();
    let entity = manager.create_entities(registered, 1).unwrap()[0];
    manager.destroy_entities(&[entity]).unwrap();

    let registry = manager.archetypes();
    let mut visited = Vec::new();
    let mut cursor = registry.last();
    while let Some(id) = cursor {
        assert!(!visited.contains(&id), "archetype {id} visited twice");
        visited.push(id);
        cursor = registry.get(id).unwrap().previous();
    }

    assert_eq!(visited.len(), registry.len());
    let mut expected: Vec<_> = registry.iter().map(|a| a.id()).collect();
    expected.reverse();
    assert_eq!(visited, expected);
}

#[test]
fn malformed_signatures_are_rejected() {
    let (mut manager, types) = common::manager();

    let unsorted = TypeSignature::from_raw(&[
        ComponentType::of(IDENTITY_TYPE),
        ComponentType::of(types.velocity),
        ComponentType::of(types.position),
    ]);
    let err = manager.get_or_create_archetype(&unsorted).unwrap_err();
    assert!(matches!(err, ECSError::InvalidSignature(e) if e.reason == InvalidSignatureReason::Unsorted));

    let no_identity = TypeSignature::from_raw(&[ComponentType::of(types.position)]);
    let err = manager.get_or_create_archetype(&no_identity).unwrap_err();
    assert!(matches!(err, ECSError::InvalidSignature(e) if e.reason == InvalidSignatureReason::IdentityNotFirst));

    let unknown = TypeSignature::from_raw(&[ComponentType::of(IDENTITY_TYPE), ComponentType::of(900)]);
    let err = manager.get_or_create_archetype(&unknown).unwrap_err();
    assert!(matches!(err, ECSError::InvalidSignature(e) if e.reason == InvalidSignatureReason::UnregisteredType(900)));

    let empty = TypeSignature::from_raw(&[]);
    assert!(matches!(manager.get_or_create_archetype(&empty), Err(ECSError::InvalidSignature(_))));
    assert_eq!(manager.archetypes().len(), 0);
}

#[test]
fn oversized_signature_is_rejected() {
    common::init_logging();
    let (catalog, types) = common::catalog();
    let mut manager = EntityManager::with_config(catalog, EngineConfig::default().with_chunk_size(128));

    let signature = TypeSignature::new(&[ComponentType::array(types.position, 8)]);
    let err = manager.get_or_create_archetype(&signature).unwrap_err();
    assert!(matches!(err, ECSError::SignatureTooLarge(_)));
}

#[test]
fn fixed_arrays_multiply_the_stride() {
    let (mut manager, types) = common::manager();
    let signature = TypeSignature::new(&[ComponentType::array(types.position, 4)]);
    let id = manager.get_or_create_archetype(&signature).unwrap();
    let column = *manager.archetype(id).unwrap().column_of(types.position).unwrap();
    assert_eq!(column.stride, 4 * 12);

    let entity = manager.create_entities(id, 1).unwrap()[0];
    let values = manager.get_component_slice::<Position>(entity).unwrap();
    assert_eq!(values.len(), 4);
    assert!(values.iter().all(|p| *p == Position::default()));
}

#[test]
fn buffer_stride_includes_header_and_inline_elements() {
    let (mut manager, types) = common::manager();
    let id = manager.archetype_of_types(&[types.waypoints]).unwrap();
    let column = *manager.archetype(id).unwrap().column_of(types.waypoints).unwrap();
    assert_eq!(column.stride, 16 + 2 * std::mem::size_of::<Waypoint>());
}

#[test]
fn matching_archetypes_filters_by_required_and_excluded() {
    let (mut manager, types) = common::manager();
    let pv = manager.archetype_of_types(&[types.position, types.velocity]).unwrap();
    let p = manager.archetype_of_types(&[types.position]).unwrap();
    let pf = manager.archetype_of_types(&[types.position, types.frozen]).unwrap();

    assert_eq!(manager.matching_archetypes(&[types.position], &[]), vec![pv, p, pf]);
    assert_eq!(manager.matching_archetypes(&[types.position], &[types.frozen]), vec![pv, p]);
    assert_eq!(manager.matching_archetypes(&[types.velocity], &[]), vec![pv]);
}

#[test]
fn observers_see_existing_and_new_archetypes() {
    use std::sync::{Arc, Mutex};
    use chunk_ecs::{Archetype, ArchetypeObserver, ArchetypeID};

    struct Recorder(Arc<Mutex<Vec<ArchetypeID>>>);
    impl ArchetypeObserver for Recorder {
        fn on_archetype_created(&mut self, archetype: &Archetype) {
            self.0.lock().unwrap().push(archetype.id());
        }
    }

    let (mut manager, types) = common::manager();
    let first = manager.archetype_of_types(&[types.position]).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    manager.add_archetype_observer(Box::new(Recorder(Arc::clone(&seen))));
    let second = manager.archetype_of_types(&[types.velocity]).unwrap();
    manager.archetype_of_types(&[types.position]).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![first, second]);
}
