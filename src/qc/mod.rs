//! # Quality-control metrics
//!
//! Per-sample and per-feature tallies written into `obs` / `var`:
//!
//! | assay   | var columns                          | obs columns                                          |
//! |---------|--------------------------------------|------------------------------------------------------|
//! | generic | `n_counts`, `n_samples`, `pct_samples` | `n_counts`, `n_features`, `pct_features`           |
//! | RNA     | `n_counts`, `n_cells`, `pct_cells`     | `n_counts`, `n_genes`, `pct_genes`, `pct_mt`       |
//! | ATAC    | `n_counts`, `n_cells`, `pct_cells`     | `n_counts`, `n_peaks`, `pct_peaks`                 |
//!
//! An entry counts as expressed when it is `>= expr_cutoff`. A non-positive cutoff
//! also counts the implicit zeros of the sparse matrix.

use std::fmt;
use std::str::FromStr;

use log::debug;
use nalgebra_sparse::CsrMatrix;

use crate::data::{AnnotatedMatrix, Column};
use crate::error::PreprocessError;
use crate::sparse::{MatrixExpressed, MatrixSum};

pub const N_COUNTS: &str = "n_counts";
pub const PCT_MT: &str = "pct_mt";
const MT_PREFIX: &str = "MT-";

/// Which naming scheme the metric columns follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Assay {
    #[default]
    Generic,
    Rna,
    Atac,
}

impl Assay {
    /// obs column holding the number of expressed features per sample.
    pub fn sample_count_key(&self) -> &'static str {
        match self {
            Assay::Generic => "n_features",
            Assay::Rna => "n_genes",
            Assay::Atac => "n_peaks",
        }
    }

    pub fn sample_pct_key(&self) -> &'static str {
        match self {
            Assay::Generic => "pct_features",
            Assay::Rna => "pct_genes",
            Assay::Atac => "pct_peaks",
        }
    }

    /// var column holding the number of samples expressing each feature.
    pub fn feature_count_key(&self) -> &'static str {
        match self {
            Assay::Generic => "n_samples",
            Assay::Rna | Assay::Atac => "n_cells",
        }
    }

    pub fn feature_pct_key(&self) -> &'static str {
        match self {
            Assay::Generic => "pct_samples",
            Assay::Rna | Assay::Atac => "pct_cells",
        }
    }

    /// Plural noun for the features, used in log messages.
    pub fn feature_noun(&self) -> &'static str {
        match self {
            Assay::Generic => "features",
            Assay::Rna => "genes",
            Assay::Atac => "peaks",
        }
    }

    pub fn sample_noun(&self) -> &'static str {
        match self {
            Assay::Generic => "samples",
            Assay::Rna | Assay::Atac => "cells",
        }
    }
}

impl FromStr for Assay {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Assay::Generic),
            "rna" => Ok(Assay::Rna),
            "atac" => Ok(Assay::Atac),
            other => Err(PreprocessError::invalid(format!(
                "unrecognized assay '{}', expected 'generic', 'rna' or 'atac'",
                other
            ))),
        }
    }
}

impl fmt::Display for Assay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assay::Generic => write!(f, "generic"),
            Assay::Rna => write!(f, "rna"),
            Assay::Atac => write!(f, "atac"),
        }
    }
}

/// Totals and expressed counts along one axis of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMetrics {
    pub n_counts: Vec<f64>,
    pub n_expressed: Vec<u64>,
    pub pct_expressed: Vec<f64>,
}

impl AxisMetrics {
    /// One entry per row (sample).
    pub fn samples(x: &CsrMatrix<f64>, expr_cutoff: f64) -> anyhow::Result<Self> {
        check_cutoff(expr_cutoff)?;
        let n_counts = x.sum_row()?;
        let n_expressed = x.expressed_row(expr_cutoff)?;
        Ok(Self::assemble(n_counts, n_expressed, x.ncols()))
    }

    /// One entry per column (feature).
    pub fn features(x: &CsrMatrix<f64>, expr_cutoff: f64) -> anyhow::Result<Self> {
        check_cutoff(expr_cutoff)?;
        let n_counts = x.sum_col()?;
        let n_expressed = x.expressed_col(expr_cutoff)?;
        Ok(Self::assemble(n_counts, n_expressed, x.nrows()))
    }

    fn assemble(n_counts: Vec<f64>, n_expressed: Vec<u64>, other_axis: usize) -> Self {
        let pct_expressed = n_expressed
            .iter()
            .map(|&n| if other_axis > 0 { n as f64 / other_axis as f64 } else { 0.0 })
            .collect();
        Self {
            n_counts,
            n_expressed,
            pct_expressed,
        }
    }
}

fn check_cutoff(expr_cutoff: f64) -> anyhow::Result<()> {
    if expr_cutoff.is_nan() {
        return Err(PreprocessError::invalid("expr_cutoff must be a number").into());
    }
    Ok(())
}

/// Writes the sample-axis metrics into `obs` under the assay's column names.
pub(crate) fn write_sample_metrics(
    adata: &mut AnnotatedMatrix,
    assay: Assay,
    metrics: AxisMetrics,
) -> anyhow::Result<()> {
    adata.obs.insert(N_COUNTS, Column::Float(metrics.n_counts))?;
    adata
        .obs
        .insert(assay.sample_count_key(), Column::Count(metrics.n_expressed))?;
    adata
        .obs
        .insert(assay.sample_pct_key(), Column::Float(metrics.pct_expressed))?;
    Ok(())
}

/// Writes the feature-axis metrics into `var` under the assay's column names.
pub(crate) fn write_feature_metrics(
    adata: &mut AnnotatedMatrix,
    assay: Assay,
    metrics: AxisMetrics,
) -> anyhow::Result<()> {
    adata.var.insert(N_COUNTS, Column::Float(metrics.n_counts))?;
    adata
        .var
        .insert(assay.feature_count_key(), Column::Count(metrics.n_expressed))?;
    adata
        .var
        .insert(assay.feature_pct_key(), Column::Float(metrics.pct_expressed))?;
    Ok(())
}

/// Computes both axes for `assay` and stores them. RNA additionally gets `pct_mt`.
pub fn calculate_qc(adata: &mut AnnotatedMatrix, assay: Assay, expr_cutoff: f64) -> anyhow::Result<()> {
    let features = AxisMetrics::features(adata.x(), expr_cutoff)?;
    let samples = AxisMetrics::samples(adata.x(), expr_cutoff)?;
    let pct_mt = match assay {
        Assay::Rna => Some(mitochondrial_fraction(adata, &samples.n_counts)?),
        _ => None,
    };

    write_feature_metrics(adata, assay, features)?;
    write_sample_metrics(adata, assay, samples)?;
    if let Some(pct_mt) = pct_mt {
        adata.obs.insert(PCT_MT, Column::Float(pct_mt))?;
    }
    debug!(
        "QC ({}) on {} samples x {} features with expr_cutoff = {}",
        assay,
        adata.n_obs(),
        adata.n_vars(),
        expr_cutoff
    );
    Ok(())
}

pub fn cal_qc(adata: &mut AnnotatedMatrix, expr_cutoff: f64) -> anyhow::Result<()> {
    calculate_qc(adata, Assay::Generic, expr_cutoff)
}

pub fn cal_qc_rna(adata: &mut AnnotatedMatrix, expr_cutoff: f64) -> anyhow::Result<()> {
    calculate_qc(adata, Assay::Rna, expr_cutoff)
}

pub fn cal_qc_atac(adata: &mut AnnotatedMatrix, expr_cutoff: f64) -> anyhow::Result<()> {
    calculate_qc(adata, Assay::Atac, expr_cutoff)
}

fn is_mitochondrial(name: &str) -> bool {
    name.get(..MT_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(MT_PREFIX))
}

/// Fraction of each sample's counts that fall on `MT-` features.
fn mitochondrial_fraction(adata: &AnnotatedMatrix, n_counts: &[f64]) -> anyhow::Result<Vec<f64>> {
    let mask: Vec<bool> = adata.var.names().iter().map(|n| is_mitochondrial(n)).collect();
    if !mask.iter().any(|&m| m) {
        return Ok(vec![0.0; adata.n_obs()]);
    }
    let mt_counts: Vec<f64> = adata.x().sum_row_masked(&mask)?;
    Ok(mt_counts
        .iter()
        .zip(n_counts)
        .map(|(&mt, &total)| if total > 0.0 { mt / total } else { 0.0 })
        .collect())
}
