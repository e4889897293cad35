//! Game Core Benchmarks
//!
//! Covers the three paths a round exercises: generating a target, realizing
//! and rendering a patch in the audio context, and scoring an attempt.
//!
//! Rendering must keep up with the browser's audio callback. The time budget
//! for one block is:
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```
//!
//! At 44.1 kHz a 128-frame block leaves 2.90 ms.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use patchmatch::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

// ============================================================================
// Constants
// ============================================================================

const SAMPLE_RATES: [f64; 2] = [44100.0, 48000.0];
const BUFFER_SIZES: [usize; 4] = [64, 128, 256, 512];
const SCENARIOS: [&str; 4] = ["siren", "horn", "alarm", "microwave"];

// ============================================================================
// Generation
// ============================================================================

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator");
    let generator = PatchGenerator::default();
    let mut rng = StdRng::seed_from_u64(7);

    group.bench_function("random", |b| {
        b.iter(|| black_box(generator.generate_random(&mut rng)))
    });

    for key in SCENARIOS {
        group.bench_with_input(BenchmarkId::new("preset", key), &key, |b, &key| {
            let mode = GenerateMode::preset(key);
            b.iter(|| black_box(generator.generate(&mode, &mut rng)))
        });
    }

    group.finish();
}

// ============================================================================
// Signal graph
// ============================================================================

fn bench_build_and_teardown(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/build");

    for key in SCENARIOS {
        let patch = ChallengeScenarios::load(key).unwrap_or_default();
        group.bench_with_input(BenchmarkId::new("scenario", key), &patch, |b, patch| {
            let mut ctx = AudioContext::new(44100.0);
            b.iter(|| {
                let mut graph = build_graph(&mut ctx, black_box(patch));
                graph.teardown(&mut ctx);
            })
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/render");
    let patch = ChallengeScenarios::load("siren").unwrap_or_default();

    for sample_rate in SAMPLE_RATES {
        for buffer_size in BUFFER_SIZES {
            let name = format!("{}kHz/{}", sample_rate as u32 / 1000, buffer_size);
            group.throughput(Throughput::Elements(buffer_size as u64));
            group.bench_with_input(
                BenchmarkId::new("siren", &name),
                &(sample_rate, buffer_size),
                |b, &(sr, size)| {
                    let mut ctx = AudioContext::new(sr);
                    let mut graph = build_graph(&mut ctx, &patch);
                    graph.start(&mut ctx);
                    let mut out = Vec::with_capacity(size);
                    b.iter(|| {
                        out.clear();
                        ctx.render_into(size, &mut out);
                        black_box(out.last().copied())
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_impulse(c: &mut Criterion) {
    let mut group = c.benchmark_group("impulse");

    for duration in [0.5, 2.0, 5.0] {
        group.bench_with_input(
            BenchmarkId::new("synthesize", format!("{}s", duration)),
            &duration,
            |b, &d| b.iter(|| black_box(synthesize_impulse(44100.0, d, 2.0))),
        );
    }

    group.finish();
}

// ============================================================================
// Scoring
// ============================================================================

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    let generator = PatchGenerator::default();
    let mut rng = StdRng::seed_from_u64(11);
    let pairs: Vec<(Patch, Patch)> = (0..32)
        .map(|_| {
            (
                generator.generate_random(&mut rng),
                generator.generate_random(&mut rng),
            )
        })
        .collect();

    group.throughput(Throughput::Elements(pairs.len() as u64));
    group.bench_function("random_pairs", |b| {
        b.iter(|| {
            for (user, target) in &pairs {
                black_box(score(user, target));
            }
        })
    });

    let horn = ChallengeScenarios::horn();
    group.bench_function("identical_horn", |b| {
        b.iter(|| black_box(score(&horn, &horn)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_generate,
    bench_build_and_teardown,
    bench_render,
    bench_impulse,
    bench_score,
);
criterion_main!(benches);
