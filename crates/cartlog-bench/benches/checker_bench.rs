//! Checker throughput benchmarks.
//!
//! Measures lines checked per second for balanced logs, with and without
//! strict mode.

use std::time::Duration;

use cartlog_bench::balanced_log;
use cartlog_core::{CheckerConfig, DiagnosticSink, LineSource, LogTest};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_checker(c: &mut Criterion) {
    let mut group = c.benchmark_group("checker");

    for (contexts, rpcs) in [(4, 64), (16, 256)] {
        let source = balanced_log(4, contexts, rpcs);
        let lines: usize = source.pids().into_iter().map(|pid| source.lines(pid).count()).sum();
        group.throughput(Throughput::Elements(lines as u64));

        for strict in [false, true] {
            let label = if strict { "strict" } else { "normal" };
            group.bench_function(BenchmarkId::new(label, lines), |b| {
                let sink = DiagnosticSink::to_buffer();
                b.iter(|| {
                    let mut checker =
                        LogTest::with_config(&sink, CheckerConfig::default().quiet(true));
                    black_box(checker.check_all_pids(&source, strict));
                });
            });
        }
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(2))
        .sample_size(50);
    targets = bench_checker
);
criterion_main!(benches);
