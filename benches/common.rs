#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};

use chunk_ecs::engine::types::{ArchetypeID, TypeIndex};
use chunk_ecs::{EntityManager, TypeCatalog};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

pub struct World {
    pub manager: EntityManager,
    pub position: TypeIndex,
    pub velocity: TypeIndex,
    pub archetype: ArchetypeID,
}

pub fn setup_world() -> World {
    let mut catalog = TypeCatalog::new();
    let position = catalog.register::<Position>().expect("register Position");
    let velocity = catalog.register::<Velocity>().expect("register Velocity");

    let mut manager = EntityManager::new(catalog);
    let archetype = manager
        .archetype_of_types(&[position, velocity])
        .expect("archetype creation failed");
    World { manager, position, velocity, archetype }
}
