use std::fmt;
use std::str::FromStr;

use log::info;

use crate::data::AnnotatedMatrix;
use crate::error::PreprocessError;
use crate::sparse::MatrixSum;
use crate::utils::{Direction, Log1P, Normalize};

pub const RAW_LAYER: &str = "raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMethod {
    /// Total-count (library size) scaling of each sample to `scale_factor`.
    #[default]
    LibSize,
    /// Term frequency per feature times inverse document frequency per sample.
    TfIdf,
}

impl FromStr for NormalizationMethod {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lib_size" => Ok(NormalizationMethod::LibSize),
            "tf_idf" => Ok(NormalizationMethod::TfIdf),
            other => Err(PreprocessError::invalid(format!(
                "unrecognized method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationMethod::LibSize => write!(f, "lib_size"),
            NormalizationMethod::TfIdf => write!(f, "tf_idf"),
        }
    }
}

/// Normalizes the count matrix in place.
///
/// With `save_raw` the untouched matrix is kept in `layers["raw"]`. `scale_factor`
/// only affects `LibSize`.
pub fn normalize(
    adata: &mut AnnotatedMatrix,
    method: NormalizationMethod,
    scale_factor: f64,
    save_raw: bool,
) -> anyhow::Result<()> {
    if !(scale_factor.is_finite() && scale_factor > 0.0) {
        return Err(PreprocessError::invalid(format!(
            "scale_factor must be positive and finite, got {}",
            scale_factor
        ))
        .into());
    }

    if save_raw {
        let raw = adata.x().clone();
        adata.layers.insert(RAW_LAYER.to_string(), raw);
    }

    match method {
        NormalizationMethod::LibSize => {
            let row_sums: Vec<f64> = adata.x().sum_row()?;
            adata
                .x_mut()
                .normalize(&row_sums, scale_factor, &Direction::ROW)?;
        }
        NormalizationMethod::TfIdf => {
            let col_sums: Vec<f64> = adata.x().sum_col()?;
            let row_sums: Vec<f64> = adata.x().sum_row()?;
            let n_vars = adata.n_vars() as f64;
            let x = adata.x_mut();
            x.normalize(&col_sums, 1.0, &Direction::COLUMN)?;
            for (row, _, value) in x.triplet_iter_mut() {
                if row_sums[row] > 0.0 {
                    *value *= (1.0 + n_vars / row_sums[row]).ln();
                }
            }
        }
    }

    info!(
        "Normalized {} samples x {} features with {}",
        adata.n_obs(),
        adata.n_vars(),
        method
    );
    Ok(())
}

/// Parses `method` before touching `adata`; unknown names fail with no mutation.
pub fn normalize_by_name(
    adata: &mut AnnotatedMatrix,
    method: &str,
    scale_factor: f64,
    save_raw: bool,
) -> anyhow::Result<()> {
    let method: NormalizationMethod = method.parse()?;
    normalize(adata, method, scale_factor, save_raw)
}

/// Replaces every stored entry `x` by `ln(1 + x)`.
pub fn log_transform(adata: &mut AnnotatedMatrix) -> anyhow::Result<()> {
    adata.x_mut().log1p_normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn small() -> AnnotatedMatrix {
        AnnotatedMatrix::from_dense(
            array![[1.0, 3.0, 0.0], [0.0, 0.0, 0.0], [2.0, 2.0, 4.0]].view(),
        )
    }

    #[test]
    fn test_lib_size_scales_rows() {
        let mut adata = small();
        normalize(&mut adata, NormalizationMethod::LibSize, 1e4, true).unwrap();

        let rows: Vec<f64> = adata.x().sum_row().unwrap();
        assert_relative_eq!(rows[0], 1e4, epsilon = 1e-8);
        assert_relative_eq!(rows[1], 0.0);
        assert_relative_eq!(rows[2], 1e4, epsilon = 1e-8);
        assert_relative_eq!(adata.x().values()[0], 2500.0, epsilon = 1e-8);

        let raw: Vec<f64> = adata.layers[RAW_LAYER].sum_row().unwrap();
        assert_eq!(raw, vec![4.0, 0.0, 8.0]);
    }

    #[test]
    fn test_tf_idf() {
        let mut adata = small();
        normalize(&mut adata, NormalizationMethod::TfIdf, 1e4, false).unwrap();
        assert!(adata.layers.is_empty());

        // column sums [3, 5, 4], row sums [4, 0, 8], 3 features
        let idf0 = (1.0f64 + 3.0 / 4.0).ln();
        let idf2 = (1.0f64 + 3.0 / 8.0).ln();
        let expected = [
            idf0 * 1.0 / 3.0,
            idf0 * 3.0 / 5.0,
            idf2 * 2.0 / 3.0,
            idf2 * 2.0 / 5.0,
            idf2 * 4.0 / 4.0,
        ];
        for (&value, &expected) in adata.x().values().iter().zip(expected.iter()) {
            assert_relative_eq!(value, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_unknown_method_does_not_mutate() {
        let mut adata = small();
        let before = adata.x().clone();
        let err = normalize_by_name(&mut adata, "cpm", 1e4, true).unwrap_err();
        assert!(err.to_string().contains("unrecognized method 'cpm'"));
        assert_eq!(adata.x(), &before);
        assert!(adata.layers.is_empty());
    }

    #[test]
    fn test_bad_scale_factor() {
        let mut adata = small();
        assert!(normalize(&mut adata, NormalizationMethod::LibSize, 0.0, true).is_err());
        assert!(adata.layers.is_empty());
    }

    #[test]
    fn test_log_transform() {
        let mut adata = small();
        log_transform(&mut adata).unwrap();
        assert_relative_eq!(adata.x().values()[1], 4.0f64.ln());
        assert_eq!(adata.x().nnz(), 5);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(
            "tf_idf".parse::<NormalizationMethod>().unwrap(),
            NormalizationMethod::TfIdf
        );
        assert!("TF_IDF".parse::<NormalizationMethod>().is_err());
    }
}
