use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use priority_quota::{
    AgencyName, LimitRegistry, MemoryEventStore, QuotaService, SubmitRequest, Window,
};
use tokio::runtime::Runtime;

fn service(limit: u32) -> QuotaService<MemoryEventStore> {
    QuotaService::builder()
        .with_default_limit(limit)
        .without_background_reaper()
        .build_in_memory()
        .unwrap()
}

/// Benchmark the pure parts of a decision
fn bench_domain(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain");

    group.bench_function("window_current", |b| {
        let now = chrono::Utc::now();
        b.iter(|| Window::current(black_box(now)))
    });

    group.bench_function("agency_parse", |b| {
        b.iter(|| AgencyName::parse(black_box("  Cresol Coronel Vivida ")))
    });

    let registry = LimitRegistry::builder()
        .with_limits((0..500).map(|i| (format!("CRESOL {}", i), 3)))
        .build()
        .unwrap();
    let agency = AgencyName::parse("CRESOL 250").unwrap();
    group.bench_function("limit_lookup_500", |b| {
        b.iter(|| registry.limit_for(black_box(&agency)))
    });

    group.finish();
}

/// Benchmark single-task admission throughput
fn bench_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(1000));

    // Limit reached immediately; measures the count + deny path.
    group.bench_function("denied", |b| {
        let service = service(1);
        rt.block_on(service.submit(SubmitRequest::priority("X")))
            .unwrap();
        b.iter(|| {
            rt.block_on(async {
                for _ in 0..1000 {
                    black_box(service.submit(SubmitRequest::priority("X")).await.unwrap());
                }
            })
        })
    });

    group.bench_function("skipped", |b| {
        let service = service(2);
        b.iter(|| {
            rt.block_on(async {
                for _ in 0..1000 {
                    black_box(service.submit(SubmitRequest::skip("X")).await.unwrap());
                }
            })
        })
    });

    group.bench_function("granted_distinct_agencies", |b| {
        b.iter_batched(
            || service(1),
            |service| {
                rt.block_on(async {
                    for i in 0..1000 {
                        let request = SubmitRequest::priority(format!("agency {}", i));
                        black_box(service.submit(request).await.unwrap());
                    }
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

/// Benchmark concurrent admissions across agencies
fn bench_concurrent(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .unwrap();
    let mut group = c.benchmark_group("concurrent");

    for agencies in [1, 8, 64].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::new("agencies", agencies),
            agencies,
            |b, &agencies| {
                let service = service(1);
                b.iter(|| {
                    rt.block_on(async {
                        let tasks: Vec<_> = (0..1000)
                            .map(|i| {
                                let service = service.clone();
                                tokio::spawn(async move {
                                    let request =
                                        SubmitRequest::priority(format!("agency {}", i % agencies));
                                    service.submit(request).await
                                })
                            })
                            .collect();
                        for task in tasks {
                            black_box(task.await.unwrap().unwrap());
                        }
                    })
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_domain, bench_submit, bench_concurrent);
criterion_main!(benches);
