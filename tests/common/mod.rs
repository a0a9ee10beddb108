#![allow(dead_code)]

use std::sync::Once;

use bytemuck::{Pod, Zeroable};

use chunk_ecs::engine::component::ComponentOptions;
use chunk_ecs::engine::types::TypeIndex;
use chunk_ecs::{Entity, EntityManager, TypeCatalog};

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

/// Data component pointing at another entity.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Target {
    pub entity: Entity,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Team {
    pub id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Waypoint {
    pub x: f32,
    pub y: f32,
}

pub struct Frozen;

/// System-state component kept alive past destruction.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Registered {
    pub slot: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Label(pub String);

pub struct Types {
    pub position: TypeIndex,
    pub velocity: TypeIndex,
    pub target: TypeIndex,
    pub team: TypeIndex,
    pub waypoints: TypeIndex,
    pub frozen: TypeIndex,
    pub registered: TypeIndex,
    pub label: TypeIndex,
}

pub fn catalog() -> (TypeCatalog, Types) {
    let mut catalog = TypeCatalog::new();
    let types = Types {
        position: catalog.register::<Position>().unwrap(),
        velocity: catalog.register::<Velocity>().unwrap(),
        target: catalog
            .register_with::<Target>(ComponentOptions::default().with_entity_offsets(&[0]))
            .unwrap(),
        team: catalog.register_shared::<Team>().unwrap(),
        waypoints: catalog.register_buffer::<Waypoint>(2).unwrap(),
        frozen: catalog.register_tag::<Frozen>().unwrap(),
        registered: catalog
            .register_with::<Registered>(ComponentOptions::default().system_state())
            .unwrap(),
        label: catalog.register_managed::<Label>().unwrap(),
    };
    (catalog, types)
}

pub fn manager() -> (EntityManager, Types) {
    init_logging();
    let (catalog, types) = catalog();
    (EntityManager::new(catalog), types)
}
