use bunny_rail::ternary::{self, FunctionWeights};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn benchmark_rule_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Rule generation");

    for precision in [2u32, 4, 8] {
        let rules = ternary::rule_count(precision).unwrap();
        group.throughput(Throughput::Elements(rules));
        group.bench_with_input(BenchmarkId::new("multiplicator", precision), &precision, |b, &p| {
            b.iter(|| {
                let rules = ternary::encode(ternary::multiplicator(black_box(1.5)), p).unwrap();
                black_box(rules)
            })
        });
    }

    let weights = FunctionWeights {
        actual: 1.0,
        target: 0.5,
        difference: 2.0,
    };
    group.bench_function("weighting_commands_p4", |b| {
        b.iter(|| black_box(ternary::weighting_commands(black_box(&weights), 4).unwrap()))
    });

    group.finish();
}

fn benchmark_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("Rule lookup");
    let rules = ternary::encode(ternary::multiplicator(1.5), 4).unwrap();
    let inputs: Vec<i64> = (0..1024).map(|i| (i - 512) * 7_919_393).collect();

    group.throughput(Throughput::Elements(inputs.len() as u64));
    group.bench_function("linear_scan_p4", |b| {
        b.iter(|| {
            for &input in &inputs {
                black_box(ternary::lookup(&rules, black_box(input)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_rule_generation, benchmark_lookup);
criterion_main!(benches);
