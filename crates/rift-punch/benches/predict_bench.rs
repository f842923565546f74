use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rift_core::{Delta, DeltaType, Mapping, NatDescriptor, NatType};
use rift_punch::{PunchMessage, PunchMode, Predictor, tie_break_key};

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_all");
    let last = [Mapping::new(44333, 0, 30000)];

    for (name, nat) in [
        ("open", NatDescriptor::open()),
        (
            "preserving",
            NatDescriptor::new(NatType::RestrictPort, Delta::new(DeltaType::Preserving, 0)),
        ),
        (
            "dependent",
            NatDescriptor::new(NatType::Symmetric, Delta::new(DeltaType::Dependent, 4)),
        ),
    ] {
        for count in [2usize, 16, 100] {
            let predictor = Predictor::new(
                PunchMode::Remote,
                nat,
                NatDescriptor::new(NatType::FullCone, Delta::na()),
                count,
            )
            .unwrap();
            let targets: Vec<Mapping> = (0..count as u16)
                .map(|i| Mapping::target(20000 + i * 7))
                .collect();
            let mut rng = StdRng::seed_from_u64(1);

            group.bench_with_input(BenchmarkId::new(name, count), &targets, |b, targets| {
                b.iter(|| predictor.predict_all(black_box(targets), &last, &mut rng))
            });
        }
    }

    group.finish();
}

fn bench_message_parse(c: &mut Criterion) {
    let line = "INITIAL_MAPPINGS pipe 00ff10aa20bb30cc 1700000003.25 \
                41000,0,41000|43000,3478,42000 -[0,127.0.0.1,127.0.0.1,40000,1,1,0]-0-alice 4 0 0";

    c.bench_function("punch_message_parse", |b| {
        b.iter(|| PunchMessage::parse(black_box(line), 5))
    });
}

fn bench_tie_break(c: &mut Criterion) {
    let ours = "203.0.113.5:40000".parse().unwrap();
    let theirs = "198.51.100.9:50000".parse().unwrap();

    c.bench_function("tie_break_key", |b| {
        b.iter(|| tie_break_key(black_box(ours), black_box(theirs)))
    });
}

criterion_group!(benches, bench_predict, bench_message_parse, bench_tie_break);
criterion_main!(benches);
