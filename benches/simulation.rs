use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use illness_death::table::{CurveTable, TransitionModel};
use illness_death::{
    CovariateProfile, IllnessDeathModel, ProfileHazards, SimulationConfig, TrajectorySimulator,
    Transition,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random-walk cumulative coefficients on a grid of `steps + 1` points.
fn table(transition: Transition, steps: usize, rng: &mut StdRng) -> TransitionModel {
    let times: Vec<f64> = (0..=steps).map(|i| i as f64 * 0.05).collect();
    let labels = vec!["(Intercept)".to_string(), "Stage2".to_string()];
    let mut coefficients = Array2::<f64>::zeros((steps + 1, 2));
    for row in 1..=steps {
        for column in 0..2 {
            let increment = rng.gen_range(-0.001..0.02);
            coefficients[[row, column]] = coefficients[[row - 1, column]] + increment;
        }
    }
    let variances = coefficients.mapv(|c| (0.1 * c).powi(2));
    TransitionModel::new(
        transition,
        "bench",
        &["Stage".to_string()],
        CurveTable {
            times: times.clone(),
            labels: labels.clone(),
            values: coefficients,
        },
        CurveTable {
            times,
            labels,
            values: variances,
        },
    )
    .expect("bench table")
}

fn hazards(steps: usize) -> ProfileHazards {
    let mut rng = StdRng::seed_from_u64(0x5EED + steps as u64);
    let model = IllnessDeathModel::new(
        "bench",
        Transition::ALL.map(|transition| table(transition, steps, &mut rng)),
    )
    .expect("bench model");
    model
        .resolve(&CovariateProfile::new().with("Stage", "2"))
        .expect("bench profile")
}

fn benchmark_simulation(c: &mut Criterion) {
    let times: Vec<f64> = (0..=40).map(|i| i as f64 * 0.5).collect();
    let mut group = c.benchmark_group("simulate");
    for steps in [100_usize, 1_000, 10_000] {
        let hazards = hazards(steps);
        let config = SimulationConfig {
            replicates: 20_000,
            ..SimulationConfig::default()
        };
        let simulator = TrajectorySimulator::new(&hazards, config).expect("bench config");
        group.throughput(Throughput::Elements(20_000));

        group.bench_with_input(BenchmarkId::new("parallel", steps), &times, |b, times| {
            b.iter(|| {
                let summary = simulator.simulate(black_box(times)).expect("simulate");
                black_box(summary);
            });
        });

        group.bench_with_input(BenchmarkId::new("sequential", steps), &times, |b, times| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(42);
                let summary = simulator
                    .simulate_with_rng(&mut rng, black_box(times))
                    .expect("simulate");
                black_box(summary);
            });
        });
    }
    group.finish();
}

criterion_group!(simulation, benchmark_simulation);
criterion_main!(simulation);
