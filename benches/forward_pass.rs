use std::hint::black_box;

use coachnet::dataset::{Features, default_seed};
use coachnet::ml::classifier::{ClassifierModel, FitOptions, FitProgress, FitRun};
use coachnet::tensor::{encode, encode_input};
use coachnet::variant::{VariantConfig, VariantKind};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn bench_predict(c: &mut Criterion) {
    for kind in VariantKind::ALL {
        let config = VariantConfig::for_kind(kind);
        let model = ClassifierModel::new(&config, &mut StdRng::seed_from_u64(1));
        let features = default_seed(kind)
            .into_iter()
            .next()
            .map(|sample| sample.features)
            .unwrap_or_else(|| Features::rgb(0.0, 0.0, 0.0));
        let input = encode_input(&features, &config).expect("encode input");
        c.bench_with_input(BenchmarkId::new("predict", kind), &input, |b, input| {
            b.iter(|| model.predict(black_box(input)).expect("predict"));
        });
    }
}

fn bench_train_step(c: &mut Criterion) {
    for kind in [VariantKind::Color, VariantKind::Digit] {
        let config = VariantConfig::for_kind(kind);
        let (features, labels) = encode(&default_seed(kind), &config).expect("encode seed");
        c.bench_function(&format!("train_step/{kind}"), |b| {
            b.iter_batched(
                || {
                    let mut model = ClassifierModel::new(&config, &mut StdRng::seed_from_u64(2));
                    model.compile(config.optimizer);
                    let run = FitRun::new(
                        &mut model,
                        features.clone(),
                        labels.clone(),
                        FitOptions {
                            epochs: 1,
                            ..FitOptions::default()
                        },
                    )
                    .expect("fit run");
                    (model, run)
                },
                |(mut model, mut run)| {
                    let progress = run.step(&mut model);
                    assert!(matches!(progress, FitProgress::Epoch(_)));
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
}

criterion_group!(benches, bench_predict, bench_train_step);
criterion_main!(benches);
