use criterion::{criterion_group, criterion_main, Criterion};
use hetgp::{CovarianceFunction, GaussianProcess, NoiseParams, Observation, QueryPoint};
use ndarray::array;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256Plus;

fn noisy_sin(nt: usize) -> Vec<Observation> {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    (0..nt)
        .map(|i| {
            let x = 10. * i as f64 / nt as f64;
            let noise = Normal::new(0., 0.05 + 0.05 * x).unwrap().sample(&mut rng);
            Observation::new(array![x], x.sin() + noise)
        })
        .collect()
}

fn criterion_gp(c: &mut Criterion) {
    let nts = [50, 100, 200];
    let query_points: Vec<QueryPoint> = (0..100)
        .map(|i| QueryPoint::new(i, array![0.1 * i as f64]))
        .collect();

    let mut group = c.benchmark_group("gp");
    group.sample_size(20);
    for nt in nts {
        let observations = noisy_sin(nt);

        group.bench_function(format!("gp optim {nt}"), |b| {
            b.iter(|| {
                let cov_fn = CovarianceFunction::squared_exponential(1., 1.)
                    + CovarianceFunction::white_noise(0.1);
                std::hint::black_box(
                    GaussianProcess::params(cov_fn)
                        .estimate_hyperparameters(true)
                        .seed(Some(42))
                        .fit_observations(observations.clone(), query_points.clone())
                        .expect("GP fit error")
                        .predict()
                        .expect("GP prediction error")
                        .len(),
                )
            });
        });

        group.bench_function(format!("gp hetero {nt}"), |b| {
            b.iter(|| {
                let cov_fn = CovarianceFunction::squared_exponential(1., 1.)
                    + CovarianceFunction::white_noise(0.1);
                std::hint::black_box(
                    GaussianProcess::params(cov_fn)
                        .heteroscedastic(true)
                        .noise(NoiseParams::default().max_iters(10))
                        .seed(Some(42))
                        .fit_observations(observations.clone(), query_points.clone())
                        .expect("GP fit error")
                        .predict()
                        .expect("GP prediction error")
                        .len(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_gp);
criterion_main!(benches);
