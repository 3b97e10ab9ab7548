use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use echostore::record::{default_dims, DatagramRecord};
use echostore::store::{Store, StoreConfig};
use echostore::writer::{write_field, PaddedView, WriterConfig};
use tempfile::TempDir;

/// Generate ragged pings on `channels` channels, each 900-1000 samples long
fn generate_records(pings: usize, channels: usize) -> Vec<DatagramRecord> {
    let mut records = Vec::with_capacity(pings * channels);
    for t in 0..pings {
        for c in 0..channels {
            let len = 900 + (t * 31 + c * 17) % 100;
            let samples = (0..len).map(|i| -60.0 - (i as f64) * 0.05).collect();
            records.push(DatagramRecord::new(t as i64 * 1_000, format!("ch{c}"), samples));
        }
    }
    records
}

/// Benchmark building the padded (timestamp × channel) view
fn bench_padded_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("padded_view");

    for pings in [100, 1_000, 10_000] {
        let records = generate_records(pings, 3);
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pings), &records, |b, records| {
            b.iter(|| PaddedView::build("backscatter_r", records, &default_dims()).unwrap());
        });
    }

    group.finish();
}

/// Benchmark chunked field writes at several memory budgets
fn bench_field_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_write");
    group.sample_size(10);

    let records = generate_records(500, 3);
    let samples: usize = records.iter().map(|r| r.sample_len()).sum();
    group.throughput(Throughput::Elements(samples as u64));

    for budget_mb in [1, 5, 20] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{budget_mb}MB")),
            &budget_mb,
            |b, &budget_mb| {
                b.iter_batched(
                    || {
                        let temp_dir = TempDir::new().unwrap();
                        let store = Store::create_with_config(
                            temp_dir.path().join("bench.zarr"),
                            StoreConfig::fast_write(),
                        )
                        .unwrap();
                        (temp_dir, store)
                    },
                    |(temp_dir, store)| {
                        let config = WriterConfig::with_budget_mb(budget_mb);
                        write_field(&store, "Beam", "backscatter_r", &records, &default_dims(), &config)
                            .unwrap();
                        drop(temp_dir);
                    },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_padded_view, bench_field_write);
criterion_main!(benches);
