use crate::errors::{GpError, Result};
use crate::types::Observation;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1};
use ndarray_rand::rand::Rng;

/// Exact componentwise equality of two points
pub fn same_point(
    a: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(u, v)| u == v)
}

/// Returns a copy of `x` where each component is shifted by `delta`
/// with a random sign
pub(crate) fn perturb<R: Rng>(
    x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    delta: f64,
    rng: &mut R,
) -> Array1<f64> {
    x.mapv(|v| if rng.gen_bool(0.5) { v + delta } else { v - delta })
}

/// Check that `batch` is not empty, consistent with the dimension `dim` of the points already
/// in `existing` (if any) and that it does not hold an input already present in `existing`
/// or twice in itself.
/// Returns the dimension of the points
pub(crate) fn check_new_observations(
    existing: &[Observation],
    batch: &[Observation],
) -> Result<usize> {
    let first = batch.first().ok_or_else(|| {
        GpError::InvalidInput("cannot add an empty batch of observations".to_string())
    })?;
    let dim = existing.first().map_or(first.dim(), |o| o.dim());
    if dim == 0 {
        return Err(GpError::InvalidInput(
            "observation input should have at least one component".to_string(),
        ));
    }
    for (i, obs) in batch.iter().enumerate() {
        if obs.dim() != dim {
            return Err(GpError::InvalidInput(format!(
                "observation input dimension {} does not match expected dimension {}",
                obs.dim(),
                dim
            )));
        }
        if existing.iter().any(|o| same_point(&o.x(), &obs.x())) {
            return Err(GpError::InvalidInput(format!(
                "input {} is already part of the training set",
                obs.x()
            )));
        }
        if batch[..i].iter().any(|o| same_point(&o.x(), &obs.x())) {
            return Err(GpError::InvalidInput(format!(
                "input {} is duplicated in the added batch",
                obs.x()
            )));
        }
    }
    Ok(dim)
}

/// Stack observation inputs as a (n, dim) matrix
pub(crate) fn inputs_matrix(observations: &[Observation], dim: usize) -> Array2<f64> {
    Array2::from_shape_fn((observations.len(), dim), |(i, j)| observations[i].x()[j])
}

/// Observation targets as a (n,) vector
pub(crate) fn targets_vector(observations: &[Observation]) -> Array1<f64> {
    observations.iter().map(|o| o.y()).collect()
}

/// Sign of `v` as -1, 0 or 1
pub(crate) fn sign(v: f64) -> i8 {
    if v > 0. {
        1
    } else if v < 0. {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_same_point() {
        assert!(same_point(&array![1., 2.], &array![1., 2.]));
        assert!(!same_point(&array![1., 2.], &array![1., 2.000001]));
        assert!(!same_point(&array![1., 2.], &array![1.]));
    }

    #[test]
    fn test_perturb() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = array![1., -2., 3.];
        let xp = perturb(&x, 5e-4, &mut rng);
        (&xp - &x)
            .iter()
            .for_each(|d| assert_abs_diff_eq!(d.abs(), 5e-4, epsilon = 1e-12));
    }

    #[test]
    fn test_check_new_observations() {
        let existing = vec![Observation::new(array![0.], 0.)];
        assert!(check_new_observations(&existing, &[]).is_err());
        let dup = vec![Observation::new(array![0.], 1.)];
        assert!(check_new_observations(&existing, &dup).is_err());
        let dup_in_batch = vec![
            Observation::new(array![1.], 1.),
            Observation::new(array![1.], 2.),
        ];
        assert!(check_new_observations(&existing, &dup_in_batch).is_err());
        let bad_dim = vec![Observation::new(array![1., 2.], 1.)];
        assert!(check_new_observations(&existing, &bad_dim).is_err());
        let ok = vec![
            Observation::new(array![1.], 1.),
            Observation::new(array![2.], 4.),
        ];
        assert_eq!(1, check_new_observations(&existing, &ok).unwrap());
    }

    #[test]
    fn test_inputs_matrix() {
        let obs = vec![
            Observation::new(array![1., 2.], 1.),
            Observation::new(array![3., 4.], 2.),
        ];
        assert_eq!(array![[1., 2.], [3., 4.]], inputs_matrix(&obs, 2));
        assert_eq!(array![1., 2.], targets_vector(&obs));
    }
}
