//! Benchmarks for the per draw allocation paths
//!
//! - `buffer_pool_alloc`: uniform scratch allocation, including node growth within a frame
//! - `descriptor_reuse`: a draw loop where most sets are already cached
//! - `descriptor_claim`: a draw loop where every set must be rewritten
//!
//! Everything runs on the test backend, so the numbers measure bookkeeping only.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scratch_bind::prelude::*;
use scratch_bind::vkgal::ash::vk;
use scratch_bind::vkgal::ash::vk::Handle;
use std::hint::black_box;

fn material_layout() -> anyhow::Result<SetLayoutDescription> {
    Ok(SetLayoutBuilder::default()
        .add_binding(0, BindingType::UniformBuffer)
        .add_binding(1, BindingType::CombinedImageSampler)
        .build()?)
}

fn material_refs(buffer: u64, texture: u64) -> [ResourceRef; 2] {
    [
        ResourceRef::buffer(vk::Buffer::from_raw(buffer), 0, 256),
        ResourceRef::combined(
            vk::Sampler::from_raw(1),
            vk::ImageView::from_raw(texture),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
    ]
}

fn benchmark_buffer_pool_alloc(c: &mut Criterion) -> anyhow::Result<()> {
    let mut group = c.benchmark_group("buffer_pool_alloc");
    for draws in [100u64, 1000, 10000].iter() {
        let mut pool = BufferPool::new(TestBackend::new(), BufferPoolCreateInfo::default())?;
        group.bench_with_input(BenchmarkId::new("BufferPool", draws), draws, |b, &draws| {
            b.iter(|| {
                for i in 0..draws {
                    black_box(pool.alloc(black_box(64 + (i % 4) * 64)).unwrap());
                }
                pool.begin_frame();
            });
        });
    }
    group.finish();
    Ok(())
}

fn benchmark_descriptor_allocator(c: &mut Criterion) -> anyhow::Result<()> {
    let mut group = c.benchmark_group("descriptor_allocator");
    for draws in [64u64, 512].iter() {
        let mut allocator = DescriptorSetAllocator::new(
            TestBackend::new(),
            material_layout()?,
            &DescriptorAllocatorCreateInfo::default(),
        )?;
        // 8 materials shared by every draw
        group.bench_with_input(BenchmarkId::new("reuse", draws), draws, |b, &draws| {
            b.iter(|| {
                for i in 0..draws {
                    black_box(allocator.alloc(&material_refs(1, i % 8)).unwrap());
                }
                allocator.begin_frame();
            });
        });

        let mut allocator = DescriptorSetAllocator::new(
            TestBackend::new(),
            material_layout()?,
            &DescriptorAllocatorCreateInfo::default(),
        )?;
        let mut generation = 0u64;
        group.bench_with_input(BenchmarkId::new("claim", draws), draws, |b, &draws| {
            b.iter(|| {
                generation += 1;
                for i in 0..draws {
                    black_box(allocator.alloc(&material_refs(generation, i)).unwrap());
                }
                allocator.begin_frame();
            });
        });
    }
    group.finish();
    Ok(())
}

fn benchmarks(c: &mut Criterion) {
    if let Err(e) = benchmark_buffer_pool_alloc(c) {
        eprintln!("buffer pool benchmark setup failed: {e:?}");
    }
    if let Err(e) = benchmark_descriptor_allocator(c) {
        eprintln!("descriptor allocator benchmark setup failed: {e:?}");
    }
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
