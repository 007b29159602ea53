//! # Truncated SVD
//!
//! Backends that reduce a samples × features CSR matrix to its leading `k`
//! singular values and right singular vectors. The PCA step only depends on the
//! [`TruncatedSvd`] trait.
//!
//! - [`RandomizedSvd`]: `single_svdlib` randomized range finder
//! - [`LanczosSvd`]: `single_svdlib` Lanczos (`las2`) solver
//! - [`DenseSvd`]: nalgebra SVD of the densified matrix

use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array1, Array2};
use nshare::IntoNdarray2;

pub mod dense;
pub mod lanczos;
pub mod randomized;

pub use dense::DenseSvd;
pub use lanczos::LanczosSvd;
pub use randomized::RandomizedSvd;
pub use single_svdlib::randomized::PowerIterationNormalizer;

/// Leading singular values and vectors, ordered by decreasing singular value.
#[derive(Debug, Clone)]
pub struct SvdResult {
    /// samples × k, `X V` (equal to `U Σ`)
    pub projection: Array2<f64>,
    /// k
    pub s: Array1<f64>,
    /// k × features
    pub vt: Array2<f64>,
}

impl SvdResult {
    pub fn n_components(&self) -> usize {
        self.s.len()
    }
}

pub trait TruncatedSvd: Send + Sync {
    fn compute(&self, x: &CsrMatrix<f64>, n_components: usize) -> anyhow::Result<SvdResult>;
}

/// Keeps the first `k` components, flips signs so each component's largest
/// loading is positive, and projects `x` onto the kept right singular vectors.
pub(crate) fn assemble(
    x: &CsrMatrix<f64>,
    s: &[f64],
    mut vt: DMatrix<f64>,
    k: usize,
) -> anyhow::Result<SvdResult> {
    let k = k.min(s.len()).min(vt.nrows());
    if k < vt.nrows() {
        vt = vt.rows(0, k).into_owned();
    }
    let v = vt.transpose();
    let mut projection: DMatrix<f64> = x * &v;
    single_svdlib::randomized::svd_flip(Some(&mut projection), Some(&mut vt), false)?;

    Ok(SvdResult {
        projection: projection.into_ndarray2().into_owned(),
        s: Array1::from(s[..k].to_vec()),
        vt: vt.into_ndarray2().into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;

    pub(crate) fn low_rank(rows: usize, cols: usize) -> CsrMatrix<f64> {
        // rank 2: outer products of two fixed patterns
        let mut coo = CooMatrix::new(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                let a = ((i % 3) as f64 + 1.0) * ((j % 2) as f64 + 1.0);
                let b = if (i + j) % 4 == 0 { 2.0 } else { 0.0 };
                let value = a + b * (i as f64 / rows as f64);
                if value != 0.0 {
                    coo.push(i, j, value);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_assemble_truncates_and_flips() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 1.0);
        coo.push(1, 1, 2.0);
        let x = CsrMatrix::from(&coo);
        let vt = DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);

        let result = assemble(&x, &[2.0, 1.0], vt, 1).unwrap();
        assert_eq!(result.n_components(), 1);
        assert_eq!(result.s.to_vec(), vec![2.0]);
        // the only loading was negative and is flipped
        assert_abs_diff_eq!(result.vt[[0, 1]], 1.0);
        assert_abs_diff_eq!(result.projection[[0, 0]], 0.0);
        assert_abs_diff_eq!(result.projection[[1, 0]], 2.0);
    }
}
