use env_logger::{Builder, Env};
use hetgp::{io, CovarianceFunction, GaussianProcess, Observation, QueryPoint};
use ndarray::array;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256Plus;

fn main() {
    let env = Env::new().filter_or("HETGP_LOG", "info");
    Builder::from_env(env)
        .target(env_logger::Target::Stdout)
        .init();

    // noise standard deviation grows linearly with x
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let observations: Vec<Observation> = (0..60)
        .map(|i| {
            let x = i as f64 / 6.;
            let noise = Normal::new(0., 0.05 + 0.1 * x)
                .expect("valid noise")
                .sample(&mut rng);
            Observation::new(array![x], 2. * x.sin() + noise)
        })
        .collect();
    let query_points = (0..=100)
        .map(|i| QueryPoint::new(i, array![i as f64 / 10.]))
        .collect();

    let cov_fn =
        CovarianceFunction::squared_exponential(1., 1.) + CovarianceFunction::white_noise(0.1);
    let mut gp = GaussianProcess::params(cov_fn)
        .estimate_hyperparameters(true)
        .heteroscedastic(true)
        .seed(Some(42))
        .fit_observations(observations, query_points)
        .expect("GP fitting");
    println!("{gp}");

    let observations = gp.observations().to_vec();
    let predictions = gp.predict().expect("GP prediction");
    io::write_predictions(std::io::stdout(), predictions, &observations)
        .expect("write predictions");
}
