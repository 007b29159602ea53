use anyhow::anyhow;
use log::debug;
use nalgebra_sparse::CsrMatrix;
use nshare::IntoNalgebra;
use single_svdlib::randomized::{randomized_svd, PowerIterationNormalizer};

use super::{assemble, SvdResult, TruncatedSvd};

/// Randomized range-finder SVD (Halko, Martinsson & Tropp) from `single_svdlib`.
///
/// The matrix is not centered. Oversampling is capped so the sketch never exceeds
/// the smaller matrix dimension.
#[derive(Debug, Clone, Copy)]
pub struct RandomizedSvd {
    pub n_oversamples: usize,
    pub n_power_iterations: usize,
    pub normalizer: PowerIterationNormalizer,
    pub random_seed: u32,
}

impl Default for RandomizedSvd {
    fn default() -> Self {
        Self {
            n_oversamples: 10,
            n_power_iterations: 5,
            normalizer: PowerIterationNormalizer::QR,
            random_seed: 2021,
        }
    }
}

impl RandomizedSvd {
    pub fn new(n_power_iterations: usize, random_seed: u32) -> Self {
        Self {
            n_power_iterations,
            random_seed,
            ..Self::default()
        }
    }
}

impl TruncatedSvd for RandomizedSvd {
    fn compute(&self, x: &CsrMatrix<f64>, n_components: usize) -> anyhow::Result<SvdResult> {
        let (n_samples, n_features) = (x.nrows(), x.ncols());
        let n_oversamples = self
            .n_oversamples
            .min(n_samples.min(n_features).saturating_sub(n_components));

        let res = randomized_svd(
            x,
            n_components,
            n_oversamples,
            self.n_power_iterations,
            self.normalizer,
            false,
            Some(self.random_seed as u64),
            false,
        )
        .map_err(|e| anyhow!("Randomized SVD computation failed: {}", e))?;

        debug!(
            "Randomized SVD: {} samples x {} features -> {} components ({} oversamples, {} power iterations)",
            n_samples, n_features, n_components, n_oversamples, self.n_power_iterations
        );

        let s = res.s.to_vec();
        assemble(x, &s, res.vt.into_nalgebra(), n_components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svd::DenseSvd;
    use crate::svd::tests::low_rank;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_matches_dense_singular_values() {
        let x = low_rank(30, 12);
        let exact = DenseSvd.compute(&x, 3).unwrap();
        let approx = RandomizedSvd::default().compute(&x, 3).unwrap();

        assert_eq!(approx.projection.shape(), &[30, 3]);
        assert_eq!(approx.vt.shape(), &[3, 12]);
        for k in 0..3 {
            assert_abs_diff_eq!(approx.s[k], exact.s[k], epsilon = 1e-6);
        }
        // after sign fixing the leading component agrees with the exact one
        for j in 0..12 {
            assert_abs_diff_eq!(approx.vt[[0, j]], exact.vt[[0, j]], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let x = low_rank(20, 8);
        let svd = RandomizedSvd::new(2, 7);
        let a = svd.compute(&x, 2).unwrap();
        let b = svd.compute(&x, 2).unwrap();
        assert_eq!(a.s, b.s);
        assert_eq!(a.vt, b.vt);
    }
}
