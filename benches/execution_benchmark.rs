use codetutor::classification::{classify, OutcomeSignals};
use codetutor::config::ScriptConfig;
use codetutor::language::{LanguageCatalog, ScriptRunner};
use codetutor::validation::outputs_match;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn benchmark_classification(c: &mut Criterion) {
    let cases = [
        ("success", OutcomeSignals::exited(Some(0), "")),
        ("stderr", OutcomeSignals::exited(Some(0), "warning")),
        ("nonzero", OutcomeSignals::exited(Some(1), "")),
        ("timeout", OutcomeSignals::timed_out()),
        ("compile", OutcomeSignals::compile_failed()),
    ];

    let mut group = c.benchmark_group("classify");
    for (name, signals) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &signals, |b, signals| {
            b.iter(|| classify(black_box(*signals)))
        });
    }
    group.finish();
}

fn benchmark_catalog_lookup(c: &mut Criterion) {
    let catalog = LanguageCatalog::builtin();

    c.bench_function("catalog_lookup_alias", |b| {
        b.iter(|| catalog.get(black_box("  NodeJS ")))
    });
    c.bench_function("catalog_lookup_unknown", |b| {
        b.iter(|| catalog.get(black_box("cobol")))
    });
}

fn benchmark_output_comparison(c: &mut Criterion) {
    let expected = (0..500).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
    let actual = expected.replace('\n', "\r\n") + "\r\n";

    c.bench_function("outputs_match_crlf", |b| {
        b.iter(|| outputs_match(black_box(&actual), black_box(&expected)))
    });
}

fn benchmark_script_evaluation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let runner = ScriptRunner::new(&ScriptConfig::default(), 100_000);
    let timeout = Duration::from_secs(5);

    let programs = [
        ("expression", "1 + 1".to_string()),
        ("print_loop", "for i in 0..100 { print(i); }".to_string()),
        (
            "fibonacci",
            "fn fib(n) { if n < 2 { n } else { fib(n - 1) + fib(n - 2) } } fib(15)".to_string(),
        ),
    ];

    let mut group = c.benchmark_group("script_evaluation");
    for (name, code) in &programs {
        group.bench_with_input(BenchmarkId::from_parameter(name), code, |b, code| {
            b.iter(|| runtime.block_on(runner.evaluate(black_box(code), None, timeout)))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_classification,
    benchmark_catalog_lookup,
    benchmark_output_comparison,
    benchmark_script_evaluation
);
criterion_main!(benches);
