use criterion::{black_box, criterion_group, criterion_main, Criterion};
use infra_reporter::{normalize_cpu_cores, normalize_memory_bytes};

fn cpu_normalization_benchmark(c: &mut Criterion) {
    let test_values = vec![
        "100m",
        "1",
        "0.5",
        "2.5",
        "1000000000n",
        "1000000u",
        "500m",
        "1500m",
    ];

    c.bench_function("normalize_cpu_cores", |b| {
        b.iter(|| {
            for value in &test_values {
                black_box(normalize_cpu_cores(black_box(value)));
            }
        })
    });
}

fn memory_normalization_benchmark(c: &mut Criterion) {
    let test_values = vec![
        "1Ki", "1Mi", "1Gi", "1Ti", "1K", "1M", "1G", "1T", "512Mi", "2.5Gi",
    ];

    c.bench_function("normalize_memory_bytes", |b| {
        b.iter(|| {
            for value in &test_values {
                black_box(normalize_memory_bytes(black_box(value)));
            }
        })
    });
}

criterion_group!(benches, cpu_normalization_benchmark, memory_normalization_benchmark);
criterion_main!(benches);
