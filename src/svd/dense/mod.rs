use anyhow::anyhow;
use nalgebra::linalg::SVD;
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;

use super::{assemble, SvdResult, TruncatedSvd};

/// Full SVD of the densified matrix, truncated afterwards. Exact and
/// deterministic, but only practical for small inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseSvd;

impl TruncatedSvd for DenseSvd {
    fn compute(&self, x: &CsrMatrix<f64>, n_components: usize) -> anyhow::Result<SvdResult> {
        let dense = DMatrix::from(x);
        // try_new orders singular values decreasingly
        let svd = SVD::try_new(dense, false, true, f64::EPSILON, 0)
            .ok_or_else(|| anyhow!("SVD computation failed to converge"))?;
        let vt = svd.v_t.ok_or_else(|| anyhow!("SVD did not produce V^T"))?;
        assemble(x, svd.singular_values.as_slice(), vt, n_components)
    }
}
