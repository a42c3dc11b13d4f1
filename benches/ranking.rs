//! Candidate-ranking benchmarks.
//!
//! Dispatch ranks every active trace on each goal, so scoring cost is on
//! the hot path. Run with `cargo bench`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use engram::domain::models::{rank_candidates, text_similarity, ExecutionTrace, Step};

const GOALS: &[&str] = &[
    "resize all images in the assets folder to 512px",
    "send the weekly engagement digest to the mailing list",
    "rotate the production api keys and restart the workers",
    "summarize the quarterly report into a one page brief",
    "backfill the analytics table for the last thirty days",
    "deploy the billing service to the staging cluster",
    "clean up stale feature branches older than ninety days",
    "export customer invoices for march as a zip archive",
];

fn candidate_pool(size: usize) -> Vec<ExecutionTrace> {
    (0..size)
        .map(|i| {
            let goal = format!("{} variant {}", GOALS[i % GOALS.len()], i);
            let step = Step::new("tool").with_literal("index", i as i64);
            let mut trace = ExecutionTrace::new(goal, vec![step], 0.6, 5.0);
            trace.confidence = 0.5 + 0.4 * ((i % 10) as f64 / 10.0);
            trace.usage_count = (i * 3) as u64;
            trace
        })
        .collect()
}

fn bench_text_similarity(c: &mut Criterion) {
    c.bench_function("text_similarity", |b| {
        b.iter(|| {
            text_similarity(
                black_box("resize all the images in the folder"),
                black_box("resize all images in the assets folder to 512px"),
            )
        })
    });
}

fn bench_rank_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_candidates");
    for size in [16usize, 128, 1024] {
        let pool = candidate_pool(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &pool, |b, pool| {
            b.iter(|| {
                rank_candidates(
                    black_box("resize all the images in the folder"),
                    black_box(pool.clone()),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_text_similarity, bench_rank_candidates);
criterion_main!(benches);
