//! Basic benchmarks for the `tiered_memory` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::rc::Rc;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use tiered_memory::{
    Bytes, LinearResource, LinearVirtualResource, MemoryResource, Polymorphic, PoolResource,
    ResourceAllocator, ResourceGuard, RewindableResource, SystemResource, align,
};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const SMALL: Bytes = Bytes::new(48);

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("tiered_memory_basic");

    let allocs_op = allocs.operation("system_allocate_deallocate");
    group.bench_function("system_allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let mut system = SystemResource;

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(system.allocate(SMALL, align!(16)));

                // SAFETY: The block came from this resource and is not used afterwards.
                unsafe {
                    system.deallocate(block, align!(16));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("linear_allocate");
    group.bench_function("linear_allocate", |b| {
        b.iter_custom(|iters| {
            let mut frame = LinearResource::new(SystemResource);
            let empty = frame.savepoint();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(frame.allocate(SMALL, align!(16)));
            }

            let elapsed = start.elapsed();

            // SAFETY: None of the blocks are used afterwards.
            unsafe {
                frame.restore(empty);
            }

            elapsed
        });
    });

    let allocs_op = allocs.operation("linear_virtual_allocate");
    group.bench_function("linear_virtual_allocate", |b| {
        b.iter_custom(|iters| {
            let mut arena = LinearVirtualResource::new(Bytes::gib(1), Bytes::kib(64))
                .expect("reserving 1 GiB of address space must succeed in benchmarks");
            let empty = arena.savepoint();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = arena.allocate(SMALL, align!(16));

                if block.is_empty() {
                    // SAFETY: None of the blocks are used afterwards.
                    unsafe {
                        arena.restore(empty);
                    }
                }

                _ = black_box(block);
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("pool_allocate_deallocate");
    group.bench_function("pool_allocate_deallocate", |b| {
        b.iter_custom(|iters| {
            let mut pool = PoolResource::new(SystemResource, SMALL, align!(16));

            // Warm up so the slab is already in place.
            let warm = pool.allocate(SMALL, align!(16));
            // SAFETY: The block came from this resource and is not used afterwards.
            unsafe {
                pool.deallocate(warm, align!(16));
            }

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(pool.allocate(SMALL, align!(16)));

                // SAFETY: The block came from this resource and is not used afterwards.
                unsafe {
                    pool.deallocate(block, align!(16));
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("vec_in_active_frame");
    group.bench_function("vec_in_active_frame", |b| {
        b.iter_custom(|iters| {
            let frame = Rc::new(Polymorphic::new(LinearResource::new(SystemResource)));
            let _guard = ResourceGuard::new(Rc::clone(&frame));

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut values = allocator_api2::vec::Vec::new_in(ResourceAllocator::ambient());
                values.extend(0..16_u64);
                drop(black_box(values));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
