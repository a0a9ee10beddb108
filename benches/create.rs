use std::hint::black_box;

use criterion::*;
use chunk_ecs::{ComponentType, TypeSignature};

mod common;
use common::setup_world;


fn create_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("structural");

    group.bench_function("create_100k", |b| {
        b.iter_batched(
            setup_world,
            |mut world| {
                let entities = world
                    .manager
                    .create_entities(world.archetype, common::AGENTS_MED)
                    .expect("create failed in benchmark");
                black_box(entities);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("create_destroy_10k", |b| {
        let mut world = setup_world();
        b.iter(|| {
            let entities = world
                .manager
                .create_entities(world.archetype, common::AGENTS_SMALL)
                .expect("create failed in benchmark");
            world.manager.destroy_entities(&entities).expect("destroy failed in benchmark");
        });
    });

    group.bench_function("move_10k", |b| {
        b.iter_batched(
            || {
                let mut world = setup_world();
                let entities = world
                    .manager
                    .create_entities(world.archetype, common::AGENTS_SMALL)
                    .expect("create failed in benchmark");
                (world, entities)
            },
            |(mut world, entities)| {
                let target = TypeSignature::new(&[ComponentType::of(world.position)]);
                world.manager.move_to_archetype(&entities, &target).expect("move failed in benchmark");
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn allocator_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("identities");

    group.bench_function("parallel_allocate_free", |b| {
        use rayon::prelude::*;
        let allocator = chunk_ecs::EntityIdAllocator::new(64);
        b.iter(|| {
            (0..16).into_par_iter().for_each(|_| {
                let batch = allocator.allocate(1024).expect("allocate failed in benchmark");
                allocator.deallocate(&batch);
            });
        });
    });

    group.finish();
}

criterion_group!(benches, create_benchmark, allocator_benchmark);
criterion_main!(benches);
