use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BatchSize;
use criterion::Criterion;

use metaspace::metaspace::block_tree::BlockTree;
use metaspace::metaspace::chunk_header_pool::ChunkHeaderPool;
use metaspace::metaspace::chunklevel::CHUNK_LEVEL_4K;
use metaspace::metaspace::metablock::MetaBlock;
use metaspace::metaspace::metachunk::Metachunk;
use metaspace::util::Address;
use metaspace::{MetaspaceContext, Options};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const NUM_BLOCKS: usize = 1000;

// Sizes from a small range, so that many blocks share a size.
fn block_sizes() -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    (0..NUM_BLOCKS)
        .map(|_| rng.random_range(BlockTree::MIN_WORD_SIZE..64))
        .collect()
}

fn bench_block_tree(c: &mut Criterion) {
    let sizes = block_sizes();
    let total: usize = sizes.iter().sum();
    let mut memory = vec![0usize; total];
    let base = Address::from_mut_ptr(memory.as_mut_ptr());
    let blocks: Vec<MetaBlock> = sizes
        .iter()
        .scan(base, |top, size| {
            let block = MetaBlock::new(*top, *size);
            *top = block.end();
            Some(block)
        })
        .collect();

    c.bench_function("block_tree_add_remove", |b| {
        b.iter(|| {
            let mut tree = BlockTree::new();
            for block in &blocks {
                unsafe { tree.add_block(*block) };
            }
            for size in &sizes {
                criterion::black_box(tree.remove_block(*size));
            }
        })
    });
}

fn bench_chunk_header_pool(c: &mut Criterion) {
    c.bench_function("chunk_header_pool_churn", |b| {
        b.iter_batched(
            ChunkHeaderPool::new,
            |mut pool| {
                for _ in 0..NUM_BLOCKS {
                    let header = pool.allocate_chunk_header().unwrap();
                    unsafe {
                        Metachunk::initialize(header, None, Address::ZERO, CHUNK_LEVEL_4K);
                        pool.return_chunk_header(header);
                    }
                }
                pool
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_split_merge(c: &mut Criterion) {
    let mut context = MetaspaceContext::new(Options::from_defaults());
    c.bench_function("context_allocate_return_4k", |b| {
        b.iter(|| {
            let chunk = context.allocate_chunk(CHUNK_LEVEL_4K).unwrap();
            unsafe { context.return_chunk(chunk) };
        })
    });
}

pub fn bench_main(c: &mut Criterion) {
    bench_block_tree(c);
    bench_chunk_header_pool(c);
    bench_split_merge(c);
}

criterion_group!(benches, bench_main);
criterion_main!(benches);
