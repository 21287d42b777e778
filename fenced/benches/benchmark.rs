use std::collections::VecDeque;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use fenced::{Allocation, HeapTransport, MaxFreeBytes, PoolSettings, Timeline, TokenSource, TransferMemory};

//  Allocate-Free
//
//  This benchmark repeatedly allocates then immediately frees a small block from a warm pool.
//
//  This is the best-case scenario, with a single Free block, and measures the lower-bound of allocator latency.
fn allocate_free(c: &mut Criterion) {
    let mut pool = pool(MaxFreeBytes::Unlimited);

    warm_up(&mut pool);

    c.bench_function("Allocate-Free - 256", |b| b.iter(|| {
        let allocation = pool.alloc(black_box(256)).expect("Allocated");
        pool.free(allocation.pointer());
    }));
}

//  Streaming
//
//  This benchmark emulates per-frame uploads: each allocation is released pending a token, and a flush retires the
//  tokens every few allocations.
//
//  The free list is thus a mix of Free and FreePendingToken blocks, and reclamation runs on most allocations.
fn streaming(c: &mut Criterion) {
    fn bencher(name: &'static str, max_free_bytes: MaxFreeBytes, c: &mut Criterion) {
        let mut pool = pool(max_free_bytes);
        let mut count = 0usize;

        warm_up(&mut pool);

        c.bench_function(name, |b| b.iter(|| {
            let allocation = pool.alloc(black_box(4096)).expect("Allocated");

            let token = pool.tokens().insert_token();
            pool.free_pending_token(allocation.pointer(), token);

            count += 1;

            if count % 16 == 0 {
                pool.tokens().flush();
            }
        }));

        pool.tokens().flush();
    }

    bencher("Streaming - unlimited", MaxFreeBytes::Unlimited, c);
    bencher("Streaming - ceiling", MaxFreeBytes::Limit(1 << 20), c);
}

//  Fragmentation
//
//  This benchmark keeps a window of live allocations of varying sizes, freeing the oldest as new ones are allocated.
//
//  It measures the cost of the first-fit search over a fragmented block sequence.
fn fragmentation(c: &mut Criterion) {
    const WINDOW: usize = 64;
    const SIZES: [usize; 5] = [48, 1024, 160, 4000, 512];

    let mut pool = pool(MaxFreeBytes::Unlimited);
    let mut window: VecDeque<Allocation> = VecDeque::with_capacity(WINDOW);
    let mut index = 0usize;

    warm_up(&mut pool);

    c.bench_function("Fragmentation - window", |b| b.iter_batched(
        || {
            index += 1;
            SIZES[index % SIZES.len()]
        },
        |size| {
            if window.len() == WINDOW {
                if let Some(oldest) = window.pop_front() {
                    pool.free(oldest.pointer());
                }
            }

            window.push_back(pool.alloc(size).expect("Allocated"));
        },
        BatchSize::SmallInput,
    ));

    for allocation in window.drain(..) {
        pool.free(allocation.pointer());
    }
}

criterion_group!(benches, allocate_free, streaming, fragmentation);

criterion_main!(benches);

//
//  Implementation Details
//

fn pool(max_free_bytes: MaxFreeBytes) -> TransferMemory {
    let settings = PoolSettings::new().with_max_free_bytes(max_free_bytes);

    TransferMemory::new(Timeline::synchronous(), HeapTransport::new(), settings)
}

//  Creates the first chunk, so that its creation is not measured.
fn warm_up(pool: &mut TransferMemory) {
    let allocation = pool.alloc(1).expect("Warmed up");
    pool.free(allocation.pointer());
}
