//! Allocation throughput: tiermalloc vs the system allocator.

use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};

fn bench_small_alloc_free(c: &mut Criterion) {
    c.bench_function("tiermalloc_64b_pair", |b| {
        b.iter(|| {
            let ptr = tiermalloc::allocate(black_box(64)).unwrap();
            black_box(ptr.as_ptr());
            tiermalloc::deallocate(ptr.as_ptr(), 64);
        });
    });

    let layout = Layout::from_size_align(64, 8).unwrap();
    c.bench_function("system_64b_pair", |b| {
        b.iter(|| unsafe {
            let ptr = System.alloc(layout);
            black_box(ptr);
            System.dealloc(ptr, layout);
        });
    });
}

fn bench_batch_then_free(c: &mut Criterion) {
    c.bench_function("tiermalloc_1000x256_batch", |b| {
        b.iter(|| {
            let ptrs: Vec<_> = (0..1000)
                .map(|_| tiermalloc::allocate(256).unwrap())
                .collect();
            for ptr in &ptrs {
                tiermalloc::deallocate(ptr.as_ptr(), 256);
            }
        });
    });

    let layout = Layout::from_size_align(256, 8).unwrap();
    c.bench_function("system_1000x256_batch", |b| {
        b.iter(|| {
            let ptrs: Vec<_> = (0..1000).map(|_| unsafe { System.alloc(layout) }).collect();
            for &ptr in &ptrs {
                unsafe { System.dealloc(ptr, layout) };
            }
        });
    });
}

fn bench_mixed_sizes(c: &mut Criterion) {
    let sizes = [8usize, 24, 64, 200, 512, 1500, 4096, 10_000];
    c.bench_function("tiermalloc_mixed_sizes", |b| {
        b.iter(|| {
            for &size in &sizes {
                let ptr = tiermalloc::allocate(size).unwrap();
                black_box(ptr.as_ptr());
                tiermalloc::deallocate(ptr.as_ptr(), size);
            }
        });
    });
}

fn bench_four_threads(c: &mut Criterion) {
    c.bench_function("tiermalloc_4t_128b", |b| {
        b.iter(|| {
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    thread::spawn(|| {
                        for _ in 0..250 {
                            let ptr = tiermalloc::allocate(128).unwrap();
                            black_box(ptr.as_ptr());
                            tiermalloc::deallocate(ptr.as_ptr(), 128);
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_small_alloc_free,
    bench_batch_then_free,
    bench_mixed_sizes,
    bench_four_threads
);
criterion_main!(benches);
