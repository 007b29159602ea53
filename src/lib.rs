pub mod data;
pub mod dimred;
pub mod elbow;
pub mod error;
pub mod filter;
pub mod normalization;
pub mod qc;
pub mod selection;
pub mod sparse;
pub mod svd;
mod utils;

pub use data::{AnnotatedMatrix, Column, Frame, UnsValue};
pub use dimred::pca::{pca, Pca, PcaBuilder, SVDMethod};
pub use elbow::{locate_elbow, Curve, CurveDirection, ElbowFallback, ElbowLocator, ElbowLocatorBuilder};
pub use error::PreprocessError;
pub use filter::{filter_features, filter_samples, FeatureFilter, SampleFilter};
pub use normalization::{log_transform, normalize, normalize_by_name, NormalizationMethod};
pub use qc::{cal_qc, cal_qc_atac, cal_qc_rna, Assay};
pub use selection::{select_pcs, select_pcs_features, ElbowSettings, FeatureSelection, PcSelection};
pub use utils::{argsort_abs_desc, Direction, Log1P, Normalize};
