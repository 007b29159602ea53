//! # Principal Component Analysis (truncated SVD)
//!
//! Fits the leading components of the count matrix and writes:
//! - `obsm["X_pca"]`: samples × k projection `X V` (= `U Σ`)
//! - `varm["PCs"]`: features × k loadings `V`
//! - `uns["pca"]["variance"]` / `uns["pca"]["variance_ratio"]`
//!
//! The matrix is not centered, matching truncated-SVD semantics on sparse data.

use std::fmt;
use std::str::FromStr;

use log::info;
use ndarray::{Array1, Array2, Axis};

use crate::data::{AnnotatedMatrix, UnsValue};
use crate::error::PreprocessError;
use crate::sparse::MatrixSum;
use crate::svd::{DenseSvd, LanczosSvd, RandomizedSvd, TruncatedSvd};

pub const X_PCA: &str = "X_pca";
pub const PCS: &str = "PCs";
pub const PCA_UNS: &str = "pca";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SVDMethod {
    /// Randomized range finder with power iterations.
    #[default]
    Randomized,
    /// Lanczos iterations (`arpack` in scikit-learn terms); honours `tolerance`.
    Lanczos,
    /// Dense full decomposition; small matrices only.
    Exact,
}

impl FromStr for SVDMethod {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "randomized" => Ok(SVDMethod::Randomized),
            "arpack" | "lanczos" => Ok(SVDMethod::Lanczos),
            "exact" => Ok(SVDMethod::Exact),
            other => Err(PreprocessError::invalid(format!(
                "unrecognized SVD algorithm '{}', expected 'randomized', 'arpack' or 'exact'",
                other
            ))),
        }
    }
}

impl fmt::Display for SVDMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SVDMethod::Randomized => write!(f, "randomized"),
            SVDMethod::Lanczos => write!(f, "arpack"),
            SVDMethod::Exact => write!(f, "exact"),
        }
    }
}

/// Configured PCA step. Build with [`PcaBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct Pca {
    n_components: usize,
    svd_method: SVDMethod,
    n_iter: usize,
    random_seed: u32,
    tolerance: f64,
}

impl Pca {
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn svd_method(&self) -> SVDMethod {
        self.svd_method
    }

    /// Runs the decomposition and stores the results in `adata`.
    ///
    /// Nothing is written when the configuration is invalid or the SVD fails.
    pub fn run(&self, adata: &mut AnnotatedMatrix) -> anyhow::Result<()> {
        let (n_samples, n_features) = adata.shape();
        let max_components = n_samples.min(n_features);
        if self.n_components == 0 || self.n_components > max_components {
            return Err(PreprocessError::invalid(format!(
                "n_components must be in 1..={} for a {} x {} matrix, got {}",
                max_components, n_samples, n_features, self.n_components
            ))
            .into());
        }

        let svd = match self.svd_method {
            SVDMethod::Randomized => RandomizedSvd::new(self.n_iter, self.random_seed)
                .compute(adata.x(), self.n_components)?,
            SVDMethod::Lanczos => LanczosSvd::new(self.tolerance, self.random_seed)
                .compute(adata.x(), self.n_components)?,
            SVDMethod::Exact => DenseSvd.compute(adata.x(), self.n_components)?,
        };

        let total_variance = total_feature_variance(adata)?;
        let (variance, variance_ratio) = summarize(&svd.projection, total_variance);

        info!(
            "PCA ({}): {} samples x {} features -> {} components, {:.2}% of variance",
            self.svd_method,
            n_samples,
            n_features,
            svd.n_components(),
            variance_ratio.sum() * 100.0
        );

        let loadings = svd.vt.t().to_owned();
        adata.obsm.insert(X_PCA.to_string(), svd.projection);
        adata.varm.insert(PCS.to_string(), loadings);
        let pca = adata.uns_map_mut(PCA_UNS);
        pca.clear();
        pca.insert("variance".into(), UnsValue::Array(variance));
        pca.insert("variance_ratio".into(), UnsValue::Array(variance_ratio));
        Ok(())
    }
}

/// Runs PCA with default settings apart from `n_components`.
pub fn pca(adata: &mut AnnotatedMatrix, n_components: usize) -> anyhow::Result<()> {
    PcaBuilder::new().n_components(n_components).build().run(adata)
}

/// Sum over features of the per-feature (population) variance of the matrix.
fn total_feature_variance(adata: &AnnotatedMatrix) -> anyhow::Result<f64> {
    let n = adata.n_obs() as f64;
    let sums: Vec<f64> = adata.x().sum_col()?;
    let squares: Vec<f64> = adata.x().sum_col_squared()?;
    Ok(sums
        .iter()
        .zip(squares.iter())
        .map(|(&s, &sq)| {
            let mean = s / n;
            (sq / n - mean * mean).max(0.0)
        })
        .sum())
}

/// Per-component variance of the projection and its share of the total feature
/// variance.
fn summarize(projection: &Array2<f64>, total_variance: f64) -> (Array1<f64>, Array1<f64>) {
    let variance = projection.var_axis(Axis(0), 0.0);
    let variance_ratio = if total_variance > 0.0 {
        variance.mapv(|v| v / total_variance)
    } else {
        Array1::zeros(variance.len())
    };
    (variance, variance_ratio)
}

/// Builder for [`Pca`].
///
/// Default values:
/// - `n_components`: 50
/// - `svd_method`: randomized
/// - `n_iter`: 5
/// - `random_seed`: 2021
/// - `tolerance`: 0.0
#[derive(Debug, Clone, Copy)]
pub struct PcaBuilder {
    n_components: usize,
    svd_method: SVDMethod,
    n_iter: usize,
    random_seed: u32,
    tolerance: f64,
}

impl Default for PcaBuilder {
    fn default() -> Self {
        Self {
            n_components: 50,
            svd_method: SVDMethod::default(),
            n_iter: 5,
            random_seed: 2021,
            tolerance: 0.0,
        }
    }
}

impl PcaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn svd_method(mut self, svd_method: SVDMethod) -> Self {
        self.svd_method = svd_method;
        self
    }

    /// Power iterations of the randomized solver.
    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn random_seed(mut self, seed: u32) -> Self {
        self.random_seed = seed;
        self
    }

    /// Accuracy of the Lanczos solver; `0.0` keeps its default.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn build(self) -> Pca {
        Pca {
            n_components: self.n_components,
            svd_method: self.svd_method,
            n_iter: self.n_iter,
            random_seed: self.random_seed,
            tolerance: self.tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn counts() -> AnnotatedMatrix {
        AnnotatedMatrix::from_dense(
            array![
                [5.0, 0.0, 1.0, 0.0, 2.0],
                [4.0, 1.0, 0.0, 0.0, 3.0],
                [0.0, 6.0, 0.0, 2.0, 0.0],
                [0.0, 5.0, 1.0, 3.0, 0.0],
                [1.0, 0.0, 7.0, 0.0, 1.0],
                [0.0, 1.0, 6.0, 1.0, 0.0],
            ]
            .view(),
        )
    }

    #[test]
    fn test_pca_writes_all_outputs() {
        let mut adata = counts();
        PcaBuilder::new()
            .n_components(3)
            .svd_method(SVDMethod::Exact)
            .build()
            .run(&mut adata)
            .unwrap();

        assert_eq!(adata.obsm[X_PCA].shape(), &[6, 3]);
        assert_eq!(adata.varm[PCS].shape(), &[5, 3]);
        let ratio = adata
            .uns_get(&["pca", "variance_ratio"])
            .and_then(UnsValue::as_array)
            .unwrap();
        let variance = adata
            .uns_get(&["pca", "variance"])
            .and_then(UnsValue::as_array)
            .unwrap();
        assert_eq!(ratio.len(), 3);
        assert_eq!(variance.len(), 3);
        assert!(ratio.iter().all(|&r| r >= 0.0));
        assert!(ratio.sum() <= 1.0 + 1e-9);
    }

    #[test]
    fn test_full_rank_projection_reconstructs_matrix() {
        let mut adata = counts();
        PcaBuilder::new()
            .n_components(5)
            .svd_method(SVDMethod::Exact)
            .build()
            .run(&mut adata)
            .unwrap();

        let reconstructed = adata.obsm[X_PCA].dot(&adata.varm[PCS].t());
        for (i, j, &value) in adata.x().triplet_iter() {
            assert_abs_diff_eq!(reconstructed[[i, j]], value, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_randomized_and_exact_agree() {
        let mut exact = counts();
        let mut randomized = counts();
        PcaBuilder::new()
            .n_components(2)
            .svd_method(SVDMethod::Exact)
            .build()
            .run(&mut exact)
            .unwrap();
        PcaBuilder::new()
            .n_components(2)
            .build()
            .run(&mut randomized)
            .unwrap();

        let a = exact.uns_get(&["pca", "variance"]).and_then(UnsValue::as_array).unwrap();
        let b = randomized.uns_get(&["pca", "variance"]).and_then(UnsValue::as_array).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_lanczos_with_tolerance_agrees_with_exact() {
        let mut exact = counts();
        let mut lanczos = counts();
        PcaBuilder::new()
            .n_components(2)
            .svd_method(SVDMethod::Exact)
            .build()
            .run(&mut exact)
            .unwrap();
        PcaBuilder::new()
            .n_components(2)
            .svd_method("arpack".parse().unwrap())
            .tolerance(1e-8)
            .build()
            .run(&mut lanczos)
            .unwrap();

        let a = exact.uns_get(&["pca", "variance"]).and_then(UnsValue::as_array).unwrap();
        let b = lanczos.uns_get(&["pca", "variance"]).and_then(UnsValue::as_array).unwrap();
        assert_eq!(b.len(), 2);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_negative_tolerance_is_rejected() {
        let mut adata = counts();
        let err = PcaBuilder::new()
            .n_components(2)
            .svd_method(SVDMethod::Lanczos)
            .tolerance(-1.0)
            .build()
            .run(&mut adata)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::InvalidConfig(_))
        ));
        assert!(adata.obsm.is_empty());
    }

    #[test]
    fn test_rejects_too_many_components() {
        let mut adata = counts();
        let err = PcaBuilder::new().n_components(6).build().run(&mut adata).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::InvalidConfig(_))
        ));
        assert!(adata.obsm.is_empty());
        assert!(adata.uns.is_empty());

        assert!(PcaBuilder::new().n_components(0).build().run(&mut adata).is_err());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("Randomized".parse::<SVDMethod>().unwrap(), SVDMethod::Randomized);
        assert_eq!("exact".parse::<SVDMethod>().unwrap(), SVDMethod::Exact);
        assert_eq!("ARPACK".parse::<SVDMethod>().unwrap(), SVDMethod::Lanczos);
        assert!("arpack".parse::<SVDMethod>().is_err());
    }
}
