//! # Threshold filtering
//!
//! Removes low-quality samples or rarely expressed features. The QC metrics are
//! recomputed from the current matrix on every call and written to `obs` / `var`
//! first, then the full keep-mask is built and applied to the matrix and every
//! aligned table at once.
//!
//! Bounds are inclusive: a sample passes `min_n_counts = 10` with exactly 10 counts.

use log::info;

use crate::data::AnnotatedMatrix;
use crate::error::PreprocessError;
use crate::qc::{write_feature_metrics, write_sample_metrics, Assay, AxisMetrics};

/// Min/max bounds on the three per-axis metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bounds {
    min_n: Option<u64>,
    max_n: Option<u64>,
    min_pct: Option<f64>,
    max_pct: Option<f64>,
    min_counts: Option<f64>,
    max_counts: Option<f64>,
}

impl Bounds {
    fn is_unset(&self) -> bool {
        *self == Bounds::default()
    }

    fn validate(&self, count_key: &str, pct_key: &str) -> anyhow::Result<()> {
        for (name, value) in [
            (format!("min_{}", pct_key), self.min_pct),
            (format!("max_{}", pct_key), self.max_pct),
            ("min_n_counts".to_string(), self.min_counts),
            ("max_n_counts".to_string(), self.max_counts),
        ] {
            if let Some(v) = value {
                if v.is_nan() || v < 0.0 {
                    return Err(PreprocessError::invalid(format!(
                        "{} must be a non-negative number, got {}",
                        name, v
                    ))
                    .into());
                }
            }
        }
        check_order(count_key, self.min_n, self.max_n)?;
        check_order(pct_key, self.min_pct, self.max_pct)?;
        check_order("n_counts", self.min_counts, self.max_counts)?;
        Ok(())
    }

    /// Logs each active bound and returns the keep-mask.
    fn mask(&self, metrics: &AxisMetrics, axis: &str, count_key: &str, pct_key: &str) -> Vec<bool> {
        let log_bound = |bound: &str, key: &str| info!("Filter {} based on {}_{}", axis, bound, key);
        if self.min_n.is_some() {
            log_bound("min", count_key);
        }
        if self.max_n.is_some() {
            log_bound("max", count_key);
        }
        if self.min_pct.is_some() {
            log_bound("min", pct_key);
        }
        if self.max_pct.is_some() {
            log_bound("max", pct_key);
        }
        if self.min_counts.is_some() {
            log_bound("min", "n_counts");
        }
        if self.max_counts.is_some() {
            log_bound("max", "n_counts");
        }

        (0..metrics.n_counts.len())
            .map(|i| {
                within(metrics.n_expressed[i], self.min_n, self.max_n)
                    && within(metrics.pct_expressed[i], self.min_pct, self.max_pct)
                    && within(metrics.n_counts[i], self.min_counts, self.max_counts)
            })
            .collect()
    }
}

fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

fn check_order<T: PartialOrd + std::fmt::Display>(
    key: &str,
    min: Option<T>,
    max: Option<T>,
) -> anyhow::Result<()> {
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(PreprocessError::invalid(format!(
                "min_{} ({}) is greater than max_{} ({})",
                key, lo, key, hi
            ))
            .into());
        }
    }
    Ok(())
}

macro_rules! bound_setters {
    ($($(#[$doc:meta])* $name:ident : $field:ident : $ty:ty;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(mut self, value: impl Into<Option<$ty>>) -> Self {
                self.bounds.$field = value.into();
                self
            }
        )*
    };
}

/// Sample (row) filter.
///
/// Presets:
/// - [`SampleFilter::new`]: generic names, `min_n_features = 1`
/// - [`SampleFilter::rna`]: `n_genes` / `pct_genes`, no bounds set
/// - [`SampleFilter::atac`]: `n_peaks` / `pct_peaks`, no bounds set
#[derive(Debug, Clone, Copy)]
pub struct SampleFilter {
    assay: Assay,
    bounds: Bounds,
    expr_cutoff: f64,
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self {
            assay: Assay::Generic,
            bounds: Bounds {
                min_n: Some(1),
                ..Bounds::default()
            },
            expr_cutoff: 1.0,
        }
    }
}

impl SampleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rna() -> Self {
        Self::for_assay(Assay::Rna)
    }

    pub fn atac() -> Self {
        Self::for_assay(Assay::Atac)
    }

    fn for_assay(assay: Assay) -> Self {
        Self {
            assay,
            bounds: Bounds::default(),
            expr_cutoff: 1.0,
        }
    }

    bound_setters! {
        /// Minimum number of expressed features (`n_features` / `n_genes` / `n_peaks`).
        min_n_features: min_n: u64;
        max_n_features: max_n: u64;
        min_pct_features: min_pct: f64;
        max_pct_features: max_pct: f64;
        min_n_counts: min_counts: f64;
        max_n_counts: max_counts: f64;
    }

    pub fn expr_cutoff(mut self, expr_cutoff: f64) -> Self {
        self.expr_cutoff = expr_cutoff;
        self
    }

    pub fn assay(&self) -> Assay {
        self.assay
    }

    pub fn apply(&self, adata: &mut AnnotatedMatrix) -> anyhow::Result<()> {
        filter_samples(adata, self)
    }
}

/// Feature (column) filter.
///
/// Presets all default to `min_n_samples = 5`:
/// - [`FeatureFilter::new`]: `n_samples` / `pct_samples`
/// - [`FeatureFilter::genes`]: `n_cells` / `pct_cells`
/// - [`FeatureFilter::peaks`]: `n_cells` / `pct_cells`
#[derive(Debug, Clone, Copy)]
pub struct FeatureFilter {
    assay: Assay,
    bounds: Bounds,
    expr_cutoff: f64,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        Self::for_assay(Assay::Generic)
    }
}

impl FeatureFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn genes() -> Self {
        Self::for_assay(Assay::Rna)
    }

    pub fn peaks() -> Self {
        Self::for_assay(Assay::Atac)
    }

    fn for_assay(assay: Assay) -> Self {
        Self {
            assay,
            bounds: Bounds {
                min_n: Some(5),
                ..Bounds::default()
            },
            expr_cutoff: 1.0,
        }
    }

    bound_setters! {
        /// Minimum number of samples expressing the feature (`n_samples` / `n_cells`).
        min_n_samples: min_n: u64;
        max_n_samples: max_n: u64;
        min_pct_samples: min_pct: f64;
        max_pct_samples: max_pct: f64;
        min_n_counts: min_counts: f64;
        max_n_counts: max_counts: f64;
    }

    pub fn expr_cutoff(mut self, expr_cutoff: f64) -> Self {
        self.expr_cutoff = expr_cutoff;
        self
    }

    pub fn assay(&self) -> Assay {
        self.assay
    }

    pub fn apply(&self, adata: &mut AnnotatedMatrix) -> anyhow::Result<()> {
        filter_features(adata, self)
    }
}

pub fn filter_samples(adata: &mut AnnotatedMatrix, filter: &SampleFilter) -> anyhow::Result<()> {
    let assay = filter.assay;
    let (count_key, pct_key) = (assay.sample_count_key(), assay.sample_pct_key());
    filter.bounds.validate(count_key, pct_key)?;

    let metrics = AxisMetrics::samples(adata.x(), filter.expr_cutoff)?;
    let mask = if filter.bounds.is_unset() {
        None
    } else {
        Some(filter.bounds.mask(&metrics, assay.sample_noun(), count_key, pct_key))
    };
    write_sample_metrics(adata, assay, metrics)?;

    let Some(mask) = mask else {
        info!("No filtering");
        return Ok(());
    };
    adata.subset_obs(&mask)?;
    info!(
        "After filtering out low-quality {}: {} {}, {} {}",
        assay.sample_noun(),
        adata.n_obs(),
        assay.sample_noun(),
        adata.n_vars(),
        assay.feature_noun()
    );
    Ok(())
}

pub fn filter_features(adata: &mut AnnotatedMatrix, filter: &FeatureFilter) -> anyhow::Result<()> {
    let assay = filter.assay;
    let (count_key, pct_key) = (assay.feature_count_key(), assay.feature_pct_key());
    filter.bounds.validate(count_key, pct_key)?;

    let metrics = AxisMetrics::features(adata.x(), filter.expr_cutoff)?;
    let mask = if filter.bounds.is_unset() {
        None
    } else {
        Some(filter.bounds.mask(&metrics, assay.feature_noun(), count_key, pct_key))
    };
    write_feature_metrics(adata, assay, metrics)?;

    let Some(mask) = mask else {
        info!("No filtering");
        return Ok(());
    };
    adata.subset_var(&mask)?;
    info!(
        "After filtering out low-expressed {}: {} {}, {} {}",
        assay.feature_noun(),
        adata.n_obs(),
        assay.sample_noun(),
        adata.n_vars(),
        assay.feature_noun()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use ndarray::Array2;

    /// 10 samples x 5 features; samples 2, 5 and 8 carry a single count each.
    fn counts() -> AnnotatedMatrix {
        let mut dense = Array2::zeros((10, 5));
        for i in 0..10 {
            if [2, 5, 8].contains(&i) {
                dense[[i, i % 5]] = 1.0;
            } else {
                for j in 0..5 {
                    dense[[i, j]] = (1 + (i + j) % 3) as f64;
                }
            }
        }
        AnnotatedMatrix::from_dense(dense.view())
    }

    #[test]
    fn test_min_n_counts_is_idempotent() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut adata = counts();
        let filter = SampleFilter::new().min_n_counts(5.0);

        filter.apply(&mut adata).unwrap();
        assert_eq!(adata.shape(), (7, 5));
        assert_eq!(
            adata.obs.names(),
            &["0", "1", "3", "4", "6", "7", "9"]
        );

        filter.apply(&mut adata).unwrap();
        assert_eq!(adata.shape(), (7, 5));
    }

    #[test]
    fn test_metrics_are_refreshed_before_filtering() {
        let mut adata = counts();
        adata
            .obs
            .insert("n_counts", Column::Float(vec![100.0; 10]))
            .unwrap();
        filter_samples(&mut adata, &SampleFilter::new().min_n_counts(5.0)).unwrap();
        assert_eq!(adata.n_obs(), 7);
        assert!(adata
            .obs
            .get_f64("n_counts")
            .unwrap()
            .iter()
            .all(|&c| c >= 5.0));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut adata = counts();
        SampleFilter::new()
            .min_n_counts(1.0)
            .max_n_counts(1.0)
            .apply(&mut adata)
            .unwrap();
        assert_eq!(adata.obs.names(), &["2", "5", "8"]);
    }

    #[test]
    fn test_no_filtering_when_unset() {
        let mut adata = counts();
        SampleFilter::rna().apply(&mut adata).unwrap();
        assert_eq!(adata.shape(), (10, 5));
        assert!(adata.obs.contains("n_genes"));

        FeatureFilter::new().min_n_samples(None).apply(&mut adata).unwrap();
        assert_eq!(adata.shape(), (10, 5));
    }

    #[test]
    fn test_feature_defaults_drop_rare_features() {
        // every dense sample expresses all 5 features, so each feature has >= 7 samples
        let mut adata = counts();
        FeatureFilter::genes().apply(&mut adata).unwrap();
        assert_eq!(adata.n_vars(), 5);
        assert!(adata.var.contains("n_cells"));

        FeatureFilter::peaks()
            .min_n_samples(8)
            .apply(&mut adata)
            .unwrap();
        // features 0, 2 and 3 gain a sparse sample each (5 % 5, 2 % 5, 8 % 5)
        assert_eq!(adata.var.names(), &["0", "2", "3"]);
    }

    #[test]
    fn test_pct_bounds() {
        let mut adata = counts();
        SampleFilter::atac()
            .max_pct_features(0.5)
            .apply(&mut adata)
            .unwrap();
        assert_eq!(adata.n_obs(), 3);
        assert!(adata.obs.contains("pct_peaks"));
    }

    #[test]
    fn test_invalid_bounds_leave_matrix_untouched() {
        let mut adata = counts();
        let err = SampleFilter::new()
            .min_n_counts(10.0)
            .max_n_counts(2.0)
            .apply(&mut adata)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::InvalidConfig(_))
        ));
        assert_eq!(adata.shape(), (10, 5));
        assert!(!adata.obs.contains("n_counts"));

        assert!(FeatureFilter::new()
            .min_pct_samples(f64::NAN)
            .apply(&mut adata)
            .is_err());
        assert!(SampleFilter::new()
            .min_n_counts(-1.0)
            .apply(&mut adata)
            .is_err());
        assert!(FeatureFilter::new()
            .min_n_samples(4)
            .max_n_samples(3)
            .apply(&mut adata)
            .is_err());
    }
}
