use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drytime::config::{ModelVariant, SearchConfig};
use drytime::export::{ONNXExporter, OnnxModel};
use drytime::training::{GridSearch, Hyperparameters};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_sensor_features(n_rows: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let x = Array2::from_shape_fn((n_rows, 8), |(i, j)| match j {
        0 => 20.0 + (i % 40) as f64 + rng.gen::<f64>(),
        1 => -1.0 + rng.gen::<f64>() * 0.2,
        2 => 40.0 + rng.gen::<f64>() * 20.0,
        3 => 15.0 + rng.gen::<f64>() * 10.0,
        4 => rng.gen::<f64>() * 1023.0,
        5 => ((i / 6 % 24) as f64 / 24.0 * std::f64::consts::TAU).sin(),
        6 => ((i / 6 % 24) as f64 / 24.0 * std::f64::consts::TAU).cos(),
        _ => 30.0,
    });
    let y = x.column(0).mapv(|soil| ((soil - 30.0) * 10.0).max(0.0));
    (x, y)
}

fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    group.sample_size(10);

    for n_rows in [500, 2000].iter() {
        let (x, y) = create_sensor_features(*n_rows);

        group.bench_with_input(BenchmarkId::new("ridge", n_rows), &(&x, &y), |b, (x, y)| {
            let search = GridSearch::from_config(ModelVariant::Ridge, &SearchConfig::default());
            b.iter(|| search.fit(black_box(x), black_box(y)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("forest", n_rows), &(&x, &y), |b, (x, y)| {
            let config = SearchConfig::default().with_forest_grid(vec![50], vec![Some(10)]);
            let search = GridSearch::from_config(ModelVariant::RandomForest, &config);
            b.iter(|| search.fit(black_box(x), black_box(y)).unwrap())
        });
    }

    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    let (x, y) = create_sensor_features(2000);
    let search = GridSearch::new(
        vec![Hyperparameters::Forest {
            n_estimators: 100,
            max_depth: None,
        }],
        drytime::training::TimeSeriesSplit::new(2),
    );
    let report = search.fit(&x, &y).unwrap();
    let exporter = ONNXExporter::new();
    let bytes = exporter.export_bytes(&report.pipeline, &[]).unwrap();

    group.bench_function("encode_forest", |b| {
        b.iter(|| exporter.export_bytes(black_box(&report.pipeline), &[]).unwrap())
    });

    let model = OnnxModel::from_bytes(&bytes).unwrap();
    group.bench_function("evaluate_forest", |b| {
        b.iter(|| model.predict(black_box(&x)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_grid_search, bench_export);
criterion_main!(benches);
