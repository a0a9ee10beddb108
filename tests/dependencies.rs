mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunk_ecs::engine::error::ECSError;
use chunk_ecs::engine::types::IDENTITY_TYPE;
use chunk_ecs::{DependencyTracker, JobHandle};

use common::Position;

const A: u16 = 10;
const B: u16 = 11;

#[test]
fn reader_waits_for_writer_and_writer_waits_for_readers() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();

    let writer = JobHandle::manual();
    tracker.register_completion(&[], &[A], &writer);

    let read_dep = tracker.request_dependency(&[A], &[]);
    assert!(read_dep.depends_on(&writer));

    let reader = JobHandle::manual();
    tracker.register_completion(&[A], &[], &reader);
    assert_eq!(tracker.read_handle_count(A), 1);

    let write_dep = tracker.request_dependency(&[], &[A]);
    assert!(write_dep.depends_on(&writer));
    assert!(write_dep.depends_on(&reader));

    let unrelated = tracker.request_dependency(&[B], &[]);
    assert!(unrelated.is_completed());

    writer.signal();
    reader.signal();
    assert!(write_dep.is_completed());
}

#[test]
fn new_writer_clears_the_read_ring() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();
    let readers: Vec<JobHandle> = (0..3).map(|_| JobHandle::manual()).collect();
    for reader in &readers {
        tracker.register_completion(&[A], &[], reader);
    }
    assert_eq!(tracker.read_handle_count(A), 3);

    let dependency = tracker.request_dependency(&[], &[A]);
    let writer = JobHandle::schedule(|| {}, &dependency);
    tracker.register_completion(&[], &[A], &writer);
    assert_eq!(tracker.read_handle_count(A), 0);
    assert!(tracker.has_writer(A));

    for reader in &readers {
        reader.signal();
    }
    writer.complete();
}

#[test]
fn independent_writer_keeps_pending_readers() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();

    let reader = JobHandle::manual();
    tracker.register_completion(&[A], &[], &reader);
    let writer = JobHandle::manual();
    tracker.register_completion(&[], &[A], &writer);

    assert_eq!(tracker.read_handle_count(A), 1);
    let next = tracker.request_dependency(&[], &[A]);
    assert!(next.depends_on(&reader));
    assert!(next.depends_on(&writer));

    writer.signal();
    let released = Arc::new(AtomicUsize::new(0));
    let signaller = {
        let reader = reader.clone();
        let released = Arc::clone(&released);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            released.store(1, Ordering::SeqCst);
            reader.signal();
        })
    };

    tracker.complete_all();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(reader.is_completed());
    signaller.join().unwrap();
}

#[test]
fn independent_writer_keeps_the_previous_writer() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();

    let first = JobHandle::manual();
    let second = JobHandle::manual();
    tracker.register_completion(&[], &[A], &first);
    tracker.register_completion(&[], &[A], &second);

    let next = tracker.request_dependency(&[A], &[]);
    assert!(next.depends_on(&first));
    assert!(next.depends_on(&second));

    second.signal();
    assert!(!next.is_completed());
    first.signal();
    assert!(next.is_completed());
}

#[test]
fn completing_a_type_forgets_its_handles() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();

    let writer = JobHandle::manual();
    let reader = JobHandle::manual();
    tracker.register_completion(&[], &[A], &writer);
    tracker.register_completion(&[A], &[], &reader);

    writer.signal();
    tracker.complete_write_type(A);
    assert!(!tracker.has_writer(A));
    assert_eq!(tracker.read_handle_count(A), 1);

    reader.signal();
    tracker.complete_type(A);
    assert_eq!(tracker.read_handle_count(A), 0);
    assert!(tracker.request_dependency(&[], &[A]).is_completed());
}

#[test]
fn read_ring_collapses_at_capacity() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();
    let capacity = tracker.read_capacity();
    assert_eq!(capacity, 17);

    let readers: Vec<JobHandle> = (0..capacity + 1).map(|_| JobHandle::manual()).collect();
    for reader in &readers {
        tracker.register_completion(&[A], &[], reader);
        assert!(tracker.read_handle_count(A) <= capacity);
    }
    assert_eq!(tracker.read_handle_count(A), 2);

    let write_dep = tracker.request_dependency(&[], &[A]);
    assert!(readers.iter().all(|r| write_dep.depends_on(r)));

    for reader in &readers {
        reader.signal();
    }
    write_dep.complete();
}

#[test]
fn undeclared_work_is_tracked_under_the_identity_type() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();
    let job = JobHandle::manual();
    tracker.register_completion(&[], &[], &job);
    assert_eq!(tracker.read_handle_count(IDENTITY_TYPE), 1);

    job.signal();
    tracker.complete_all();
    assert_eq!(tracker.read_handle_count(IDENTITY_TYPE), 0);
}

#[test]
fn scheduled_jobs_run_in_dependency_order() {
    common::init_logging();
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = JobHandle::manual();

    let first = {
        let log = Arc::clone(&log);
        JobHandle::schedule(move || log.lock().unwrap().push(1), &gate)
    };
    let second = {
        let log = Arc::clone(&log);
        JobHandle::schedule(move || log.lock().unwrap().push(2), &first)
    };

    std::thread::sleep(Duration::from_millis(10));
    assert!(log.lock().unwrap().is_empty());
    assert!(second.depends_on(&first));
    assert!(second.depends_on(&gate));

    gate.signal();
    second.complete();
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

#[test]
fn panicking_job_still_completes() {
    common::init_logging();
    let job = JobHandle::schedule(|| panic!("job failure"), &JobHandle::completed());
    job.complete();
    assert!(job.is_completed());
}

#[test]
fn combined_handle_waits_for_all() {
    common::init_logging();
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<JobHandle> = (0..8)
        .map(|_| {
            let counter = Arc::clone(&counter);
            JobHandle::schedule(move || { counter.fetch_add(1, Ordering::SeqCst); }, &JobHandle::completed())
        })
        .collect();

    JobHandle::combine(&handles).complete();
    assert_eq!(counter.load(Ordering::SeqCst), 8);
    assert!(JobHandle::combine(&[]).is_completed());
}

#[test]
fn exclusive_transaction_latch() {
    common::init_logging();
    let mut tracker = DependencyTracker::default();
    assert!(matches!(tracker.end_exclusive_transaction(), Err(ECSError::ExclusiveTransaction(_))));

    tracker.begin_exclusive_transaction().unwrap();
    assert!(tracker.is_exclusive());
    assert!(matches!(tracker.begin_exclusive_transaction(), Err(ECSError::ExclusiveTransaction(_))));

    let job = JobHandle::manual();
    tracker.register_completion(&[A], &[], &job);
    assert_eq!(tracker.read_handle_count(A), 0);
    assert!(tracker.request_dependency(&[B], &[]).depends_on(&job));

    job.signal();
    tracker.end_exclusive_transaction().unwrap();
    assert!(!tracker.is_exclusive());
}

#[test]
fn long_exclusive_transaction_completes_on_a_small_stack() {
    common::init_logging();
    let worker = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(|| {
            let mut tracker = DependencyTracker::default();
            tracker.begin_exclusive_transaction().unwrap();

            let jobs: Vec<JobHandle> = (0..200_001).map(|_| JobHandle::manual()).collect();
            for job in &jobs {
                tracker.register_completion(&[A], &[], job);
            }
            let dependency = tracker.request_dependency(&[B], &[]);

            for job in &jobs[1..] {
                job.signal();
            }
            assert!(!dependency.is_completed());
            jobs[0].signal();
            assert!(dependency.is_completed());

            tracker.end_exclusive_transaction().unwrap();
        })
        .unwrap();
    worker.join().unwrap();
}

#[test]
fn deep_combined_chain_completes_on_a_small_stack() {
    let worker = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(|| {
            let roots: Vec<JobHandle> = (0..100_000).map(|_| JobHandle::manual()).collect();
            let mut chain = roots[0].clone();
            for root in &roots[1..] {
                chain = JobHandle::combine(&[chain, root.clone()]);
            }

            for root in roots.iter().rev() {
                root.signal();
            }
            assert!(chain.is_completed());
        })
        .unwrap();
    worker.join().unwrap();
}

#[test]
fn manager_accessors_wait_for_writers() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let entities = manager.create_entities(archetype, 64).unwrap();
    let chunk = manager.location(entities[0]).unwrap().chunk;

    let dependency = manager.request_dependency(&[], &[types.position]);
    let mut column = manager.chunk_column_mut::<Position>(chunk).unwrap();
    let job = JobHandle::schedule(
        move || {
            std::thread::sleep(Duration::from_millis(20));
            // SAFETY: the job is registered as the writer of Position below.
            for p in unsafe { column.as_mut_slice() } {
                p.x = 2.5;
            }
        },
        &dependency,
    );
    manager.register_completion(&[], &[types.position], &job);

    assert_eq!(manager.get_component::<Position>(entities[63]).unwrap().x, 2.5);
    assert!(job.is_completed());
}

#[test]
fn structural_changes_complete_outstanding_jobs() {
    let (mut manager, types) = common::manager();
    let archetype = manager.archetype_of_types(&[types.position]).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let job = {
        let finished = Arc::clone(&finished);
        JobHandle::schedule(
            move || {
                std::thread::sleep(Duration::from_millis(20));
                finished.store(1, Ordering::SeqCst);
            },
            &JobHandle::completed(),
        )
    };
    manager.register_completion(&[types.velocity], &[], &job);

    manager.create_entities(archetype, 1).unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(manager.dependencies().read_handle_count(types.velocity), 0);
}
