use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kinfit::DecayTopology;

/// Topology parsing alone, cheap but on the per-run setup path.
fn bench_parse(c: &mut Criterion) {
    c.bench_function("decay_topology/parse/3pi0", |b| {
        b.iter(|| DecayTopology::parse(black_box("eta'(pi0(g g) pi0(g g) pi0(g g))")).unwrap())
    });
}

/// Assignment enumeration cost per photon multiplicity: K! candidate
/// permutations are generated and deduplicated by canonical signature.
fn bench_unique_assignments(c: &mut Criterion) {
    let cases = [
        ("2g", "pi0(g g)"),
        ("4g", "pi0(g g) pi0(g g)"),
        ("6g_3pi0", "eta'(pi0(g g) pi0(g g) pi0(g g))"),
        ("6g_hyperon", "sigma+(p pi0(g g)) k0s(pi0(g g) pi0(g g))"),
    ];
    for (label, input) in cases {
        let topology = DecayTopology::parse(input).unwrap();
        c.bench_function(&format!("decay_topology/unique_assignments/{label}"), |b| {
            b.iter_batched(
                || topology.clone(),
                |topo| {
                    let fitter = kinfit::TreeFitter::new(topo, None, false);
                    black_box(fitter.permutation_count())
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_parse, bench_unique_assignments
);
criterion_main!(benches);
