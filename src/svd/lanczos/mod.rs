use anyhow::anyhow;
use log::debug;
use nalgebra_sparse::CsrMatrix;
use nshare::IntoNalgebra;
use single_svdlib::lanczos::svd_las2;

use crate::error::PreprocessError;

use super::{assemble, SvdResult, TruncatedSvd};

/// Accuracy used when no positive tolerance is given.
const DEFAULT_KAPPA: f64 = 1e-6;

/// Lanczos SVD (`las2`) from `single_svdlib`.
///
/// `tolerance` is the relative accuracy a Ritz value must reach to be accepted;
/// `0.0` selects the solver default.
#[derive(Debug, Clone, Copy)]
pub struct LanczosSvd {
    pub tolerance: f64,
    pub random_seed: u32,
}

impl Default for LanczosSvd {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            random_seed: 2021,
        }
    }
}

impl LanczosSvd {
    pub fn new(tolerance: f64, random_seed: u32) -> Self {
        Self {
            tolerance,
            random_seed,
        }
    }

    fn kappa(&self) -> anyhow::Result<f64> {
        if !(self.tolerance >= 0.0) || !self.tolerance.is_finite() {
            return Err(PreprocessError::invalid(format!(
                "tolerance must be a finite number >= 0, got {}",
                self.tolerance
            ))
            .into());
        }
        Ok(if self.tolerance > 0.0 {
            self.tolerance
        } else {
            DEFAULT_KAPPA
        })
    }
}

impl TruncatedSvd for LanczosSvd {
    fn compute(&self, x: &CsrMatrix<f64>, n_components: usize) -> anyhow::Result<SvdResult> {
        let kappa = self.kappa()?;
        let (n_samples, n_features) = (x.nrows(), x.ncols());
        let iterations = n_samples.max(n_features);

        let res = svd_las2(
            x,
            n_components,
            iterations,
            &[-1.0e-30, 1.0e30],
            kappa,
            self.random_seed,
        )
        .map_err(|e| anyhow!("Lanczos SVD computation failed: {}", e))?;

        debug!(
            "Lanczos SVD: {} samples x {} features -> {} of {} components (kappa {:e})",
            n_samples,
            n_features,
            res.s.len(),
            n_components,
            kappa
        );

        let s = res.s.to_vec();
        assemble(x, &s, res.vt.into_nalgebra(), n_components)
    }
}
