//! Principal component basis for LSH projections
//!
//! Components come from the thin SVD of the mean-centred data matrix: the rows
//! of `Vᵀ`, ordered by decreasing singular value. At most `min(n, D)`
//! components exist for `n` samples of dimension `D`.

use nalgebra::DMatrix;
use thiserror::Error;

use crate::collection::Vector;
use crate::distance::mean;

/// Iteration cap handed to the SVD solver
const MAX_SVD_ITERATIONS: usize = 10_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcaError {
    #[error("Need at least 2 samples, got {0}")]
    TooFewSamples(usize),

    #[error("Samples have inconsistent dimensions")]
    InconsistentDimensions,

    #[error("SVD did not converge")]
    NoConvergence,
}

/// Fit principal components, returning up to `max_components` unit vectors.
pub fn principal_components(
    samples: &[Vector],
    max_components: usize,
) -> Result<Vec<Vec<f64>>, PcaError> {
    if samples.len() < 2 {
        return Err(PcaError::TooFewSamples(samples.len()));
    }
    let dim = samples[0].len();
    if dim == 0 || samples.iter().any(|s| s.len() != dim) {
        return Err(PcaError::InconsistentDimensions);
    }

    let centre = mean(samples.iter().map(|s| s.as_slice())).ok_or(PcaError::TooFewSamples(0))?;
    let centred = DMatrix::from_fn(samples.len(), dim, |i, j| samples[i][j] - centre[j]);

    let svd = centred
        .try_svd(false, true, f64::EPSILON, MAX_SVD_ITERATIONS)
        .ok_or(PcaError::NoConvergence)?;
    let v_t = svd.v_t.ok_or(PcaError::NoConvergence)?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    Ok(order
        .into_iter()
        .take(max_components)
        .map(|r| v_t.row(r).iter().copied().collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::dot_product;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_dominant_direction() {
        // Points spread along (1, 1) with a little noise across it.
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<Vector> = (0..50)
            .map(|_| {
                let t: f64 = rng.gen_range(-10.0..10.0);
                let n: f64 = rng.gen_range(-0.1..0.1);
                Vector::from(vec![t + n, t - n])
            })
            .collect();

        let pcs = principal_components(&samples, 2).unwrap();
        assert_eq!(pcs.len(), 2);

        let diagonal = [std::f64::consts::FRAC_1_SQRT_2; 2];
        assert!(dot_product(&pcs[0], &diagonal).abs() > 0.99);
        assert!(dot_product(&pcs[0], &pcs[1]).abs() < 1e-9);
    }

    #[test]
    fn test_component_count_is_bounded() {
        let samples = vec![
            Vector::from(vec![1.0, 0.0, 0.0, 2.0]),
            Vector::from(vec![0.0, 1.0, 3.0, 0.0]),
            Vector::from(vec![4.0, 0.0, 1.0, 1.0]),
        ];
        assert_eq!(principal_components(&samples, 20).unwrap().len(), 3);
        assert_eq!(principal_components(&samples, 2).unwrap().len(), 2);

        let components = principal_components(&samples, 20).unwrap();
        for c in &components {
            assert_eq!(c.len(), 4);
            assert!((dot_product(c, c) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_too_few_samples() {
        let one = vec![Vector::from(vec![1.0, 2.0])];
        assert_eq!(principal_components(&one, 4), Err(PcaError::TooFewSamples(1)));
    }
}
