use std::collections::{HashMap, HashSet};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use cortex_core::gm::activation::rationalize;
use cortex_core::gm::coa::{decode_candidate, Intention};
use cortex_core::gm::precision::relative_confidences;
use cortex_core::ConjectureActivation;

fn bench_decode_candidate(c: &mut Criterion) {
    let domain: Vec<String> = ["turn", "forward", "reverse", "stop"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let intentions: HashMap<String, Intention> = domain
        .iter()
        .map(|name| (name.clone(), Intention::new(name.clone(), name.clone())))
        .collect();

    c.bench_function("decode_candidate", |b| {
        b.iter(|| {
            for index in 0..256u64 {
                black_box(decode_candidate(black_box(index), &domain, &intentions));
            }
        })
    });
}

fn bench_relative_confidences(c: &mut Criterion) {
    let sizes: Vec<f64> = (0..16).map(|i| i as f64 / 16.0).collect();
    c.bench_function("relative_confidences", |b| {
        b.iter(|| black_box(relative_confidences(black_box(&sizes))))
    });
}

fn bench_rationalize(c: &mut Criterion) {
    let contradictions: Vec<HashSet<String>> = vec![
        ["happy", "sad"].iter().map(|s| s.to_string()).collect(),
        ["moving", "stopped"].iter().map(|s| s.to_string()).collect(),
    ];
    let candidates: Vec<ConjectureActivation> = ["happy", "sad", "moving", "stopped", "curious"]
        .iter()
        .flat_map(|name| {
            (0..8).map(move |i| ConjectureActivation::new(*name, format!("subject_{i}")))
        })
        .collect();

    c.bench_function("rationalize", |b| {
        let mut rng = SmallRng::seed_from_u64(7);
        b.iter(|| {
            black_box(rationalize(
                black_box(candidates.clone()),
                &contradictions,
                &mut rng,
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_decode_candidate,
    bench_relative_confidences,
    bench_rationalize
);
criterion_main!(benches);
