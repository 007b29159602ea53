//! # Component and feature selection
//!
//! The two elbow call sites:
//! - [`select_pcs`] picks how many components to keep from `uns["pca"]["variance_ratio"]`
//!   and records the count under `uns["pca"]["n_pcs"]`.
//! - [`select_pcs_features`] walks the kept components, ranks features by absolute
//!   loading in `varm["PCs"]`, keeps the features before each component's elbow, and
//!   flags their union in `var["top_pcs"]`.
//!
//! Both steps default `min_elbow` to a tenth of the curve length, rounded down.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use log::{debug, info};

use crate::data::{AnnotatedMatrix, Column, UnsValue};
use crate::dimred::pca::{PCA_UNS, PCS};
use crate::elbow::{Curve, CurveDirection, ElbowFallback, ElbowLocator, ElbowLocatorBuilder};
use crate::error::PreprocessError;
use crate::utils::argsort_abs_desc;

pub const N_PCS: &str = "n_pcs";
pub const FEATURES: &str = "features";
pub const TOP_PCS: &str = "top_pcs";

/// Elbow options shared by both selection steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElbowSettings {
    sensitivity: f64,
    min_elbow: Option<usize>,
    curve: Curve,
    direction: CurveDirection,
    online: bool,
    fallback: ElbowFallback,
}

impl Default for ElbowSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            min_elbow: None,
            curve: Curve::Convex,
            direction: CurveDirection::Decreasing,
            online: false,
            fallback: ElbowFallback::KeepAll,
        }
    }
}

impl ElbowSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Overrides the default floor of one tenth of the curve length.
    pub fn min_elbow(mut self, min_elbow: impl Into<Option<usize>>) -> Self {
        self.min_elbow = min_elbow.into();
        self
    }

    pub fn curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    pub fn direction(mut self, direction: CurveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn fallback(mut self, fallback: ElbowFallback) -> Self {
        self.fallback = fallback;
        self
    }

    fn locator(&self, curve_len: usize) -> ElbowLocator<f64> {
        ElbowLocatorBuilder::new()
            .sensitivity(self.sensitivity)
            .min_elbow(self.min_elbow.unwrap_or(curve_len / 10))
            .curve(self.curve)
            .direction(self.direction)
            .online(self.online)
            .build()
    }
}

/// Configuration of [`select_pcs`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PcSelection {
    n_pcs: Option<usize>,
    elbow: ElbowSettings,
}

impl PcSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed component count; the elbow search is skipped.
    pub fn n_pcs(mut self, n_pcs: impl Into<Option<usize>>) -> Self {
        self.n_pcs = n_pcs.into();
        self
    }

    pub fn elbow(mut self, elbow: ElbowSettings) -> Self {
        self.elbow = elbow;
        self
    }

    pub fn apply(&self, adata: &mut AnnotatedMatrix) -> anyhow::Result<usize> {
        select_pcs(adata, self)
    }
}

/// Configuration of [`select_pcs_features`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureSelection {
    elbow: ElbowSettings,
}

impl FeatureSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elbow(mut self, elbow: ElbowSettings) -> Self {
        self.elbow = elbow;
        self
    }

    pub fn apply(&self, adata: &mut AnnotatedMatrix) -> anyhow::Result<BTreeSet<usize>> {
        select_pcs_features(adata, self)
    }
}

fn pca_field(what: &str) -> anyhow::Error {
    anyhow!(PreprocessError::MissingField(format!("uns['{}']['{}']", PCA_UNS, what)))
}

/// Chooses the number of components to keep and stores it in `uns["pca"]["n_pcs"]`.
pub fn select_pcs(adata: &mut AnnotatedMatrix, selection: &PcSelection) -> anyhow::Result<usize> {
    let variance_ratio = adata
        .uns_get(&[PCA_UNS, "variance_ratio"])
        .and_then(UnsValue::as_array)
        .ok_or_else(|| pca_field("variance_ratio"))?;
    let n_components = variance_ratio.len();

    let n_pcs = match selection.n_pcs {
        Some(n_pcs) if n_pcs > n_components => {
            return Err(PreprocessError::invalid(format!(
                "n_pcs = {} exceeds the {} computed components",
                n_pcs, n_components
            ))
            .into());
        }
        Some(n_pcs) => n_pcs,
        None => {
            let curve = variance_ratio.to_vec();
            let elbow = selection.elbow.locator(n_components).locate_ranked(&curve)?;
            selection.elbow.fallback.resolve(elbow, n_components)
        }
    };

    info!("Selected {} of {} components", n_pcs, n_components);
    adata
        .uns_map_mut(PCA_UNS)
        .insert(N_PCS.to_string(), UnsValue::Count(n_pcs));
    Ok(n_pcs)
}

/// Selects the features that load heavily on the kept components.
///
/// For each component `i < n_pcs` the features are ranked by `|loading|` and the
/// ones before the elbow of that ranked curve are kept as `uns["pca"]["features"]["pc_{i}"]`.
/// The union over components is written once as the boolean `var["top_pcs"]` and
/// returned.
pub fn select_pcs_features(
    adata: &mut AnnotatedMatrix,
    selection: &FeatureSelection,
) -> anyhow::Result<BTreeSet<usize>> {
    let n_pcs = adata
        .uns_get(&[PCA_UNS, N_PCS])
        .and_then(UnsValue::as_count)
        .ok_or_else(|| pca_field(N_PCS))?;
    let loadings = adata.varm_or_missing(PCS)?;
    let (n_features, n_components) = loadings.dim();
    if n_features != adata.n_vars() {
        return Err(PreprocessError::mismatch("PCs rows", adata.n_vars(), n_features).into());
    }
    if n_pcs > n_components {
        return Err(PreprocessError::invalid(format!(
            "n_pcs = {} exceeds the {} stored components",
            n_pcs, n_components
        ))
        .into());
    }

    let locator = selection.elbow.locator(n_features);
    let mut per_component = BTreeMap::new();
    for i in 0..n_pcs {
        let column = loadings.column(i).to_vec();
        let order = argsort_abs_desc(&column);
        let ranked: Vec<f64> = order.iter().map(|&j| column[j].abs()).collect();
        let elbow = locator.locate_ranked(&ranked)?;
        let keep = selection.elbow.fallback.resolve(elbow, n_features);
        debug!("pc_{}: keeping {} of {} features", i, keep, n_features);
        per_component.insert(format!("pc_{}", i), order[..keep].to_vec());
    }

    let selected: BTreeSet<usize> = per_component
        .values()
        .fold(BTreeSet::new(), |mut acc, ids: &Vec<usize>| {
            acc.extend(ids.iter().copied());
            acc
        });
    let mut flags = vec![false; n_features];
    for &j in &selected {
        flags[j] = true;
    }

    adata.var.insert(TOP_PCS, Column::Bool(flags))?;
    adata
        .uns_map_mut(PCA_UNS)
        .insert(FEATURES.to_string(), UnsValue::Indices(per_component));
    info!(
        "Selected {} features from the top {} components",
        selected.len(),
        n_pcs
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    const CLEAN_DROP: [f64; 7] = [10.0, 9.0, 8.0, 1.0, 0.9, 0.8, 0.7];

    fn with_variance_ratio(ratio: Array1<f64>) -> AnnotatedMatrix {
        let mut adata = AnnotatedMatrix::from_dense(Array2::<f64>::eye(7).view());
        adata
            .uns_map_mut(PCA_UNS)
            .insert("variance_ratio".into(), UnsValue::Array(ratio));
        adata
    }

    /// Two components over 7 features: pc_0 ranks 0, 1, 2 first and pc_1 ranks 2, 3, 4
    /// first, both with the same sharp drop after the third feature.
    fn with_loadings() -> AnnotatedMatrix {
        let mut adata = AnnotatedMatrix::from_dense(Array2::<f64>::eye(7).view());
        let loadings = array![
            [10.0, 1.0],
            [9.0, 0.9],
            [8.0, 10.0],
            [1.0, -9.0],
            [0.9, 8.0],
            [0.8, 0.8],
            [-0.7, 0.7],
        ];
        adata.varm.insert(PCS.into(), loadings);
        adata
    }

    fn set_n_pcs(adata: &mut AnnotatedMatrix, n_pcs: usize) {
        adata
            .uns_map_mut(PCA_UNS)
            .insert(N_PCS.into(), UnsValue::Count(n_pcs));
    }

    #[test]
    fn test_select_pcs_at_elbow() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ratio = Array1::from(CLEAN_DROP.to_vec()) / 100.0;
        let mut adata = with_variance_ratio(ratio);
        let n_pcs = select_pcs(&mut adata, &PcSelection::new()).unwrap();
        assert_eq!(n_pcs, 3);
        assert_eq!(
            adata.uns_get(&["pca", "n_pcs"]).and_then(UnsValue::as_count),
            Some(3)
        );
    }

    #[test]
    fn test_select_pcs_online_matches_batch_on_clean_drop() {
        let ratio = Array1::from(CLEAN_DROP.to_vec());
        let mut adata = with_variance_ratio(ratio);
        let selection = PcSelection::new().elbow(ElbowSettings::new().online(true));
        assert_eq!(selection.apply(&mut adata).unwrap(), 3);
    }

    #[test]
    fn test_select_pcs_explicit_count() {
        let mut adata = with_variance_ratio(Array1::from(CLEAN_DROP.to_vec()));
        assert_eq!(PcSelection::new().n_pcs(5).apply(&mut adata).unwrap(), 5);
        assert!(PcSelection::new().n_pcs(8).apply(&mut adata).is_err());
        assert_eq!(
            adata.uns_get(&["pca", "n_pcs"]).and_then(UnsValue::as_count),
            Some(5)
        );
    }

    #[test]
    fn test_select_pcs_flat_curve_falls_back() {
        let mut adata = with_variance_ratio(Array1::from_elem(7, 0.1));
        assert_eq!(PcSelection::new().apply(&mut adata).unwrap(), 7);

        let keep_none = ElbowSettings::new().fallback(ElbowFallback::KeepNone);
        let n_pcs = PcSelection::new().elbow(keep_none).apply(&mut adata).unwrap();
        assert_eq!(n_pcs, 0);
    }

    #[test]
    fn test_select_pcs_min_elbow_floor() {
        let mut adata = with_variance_ratio(Array1::from(CLEAN_DROP.to_vec()));
        let strict = ElbowSettings::new()
            .min_elbow(5)
            .fallback(ElbowFallback::KeepNone);
        assert_eq!(PcSelection::new().elbow(strict).apply(&mut adata).unwrap(), 0);
    }

    #[test]
    fn test_select_pcs_requires_pca() {
        let mut adata = AnnotatedMatrix::from_dense(Array2::<f64>::eye(3).view());
        let err = select_pcs(&mut adata, &PcSelection::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::MissingField(_))
        ));
    }

    #[test]
    fn test_feature_union() {
        let mut adata = with_loadings();
        set_n_pcs(&mut adata, 2);
        let selected = select_pcs_features(&mut adata, &FeatureSelection::new()).unwrap();

        assert_eq!(selected.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        let flags = adata.var.get_bool(TOP_PCS).unwrap();
        assert_eq!(flags.iter().filter(|&&f| f).count(), 5);
        assert_eq!(flags, &[true, true, true, true, true, false, false]);

        let features = adata
            .uns_get(&["pca", "features"])
            .and_then(UnsValue::as_indices)
            .unwrap();
        assert_eq!(features["pc_0"], vec![0, 1, 2]);
        assert_eq!(features["pc_1"], vec![2, 3, 4]);
    }

    #[test]
    fn test_feature_selection_respects_n_pcs() {
        let mut adata = with_loadings();
        set_n_pcs(&mut adata, 1);
        let selected = FeatureSelection::new().apply(&mut adata).unwrap();
        assert_eq!(selected.len(), 3);
        let features = adata
            .uns_get(&["pca", "features"])
            .and_then(UnsValue::as_indices)
            .unwrap();
        assert_eq!(features.len(), 1);
    }

    #[test]
    fn test_feature_selection_rejects_too_many_pcs() {
        let mut adata = with_loadings();
        set_n_pcs(&mut adata, 3);
        assert!(select_pcs_features(&mut adata, &FeatureSelection::new()).is_err());
        assert!(!adata.var.contains(TOP_PCS));
        assert!(adata.uns_get(&["pca", "features"]).is_none());
    }

    #[test]
    fn test_feature_selection_requires_n_pcs() {
        let mut adata = with_loadings();
        let err = FeatureSelection::new().apply(&mut adata).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreprocessError>(),
            Some(PreprocessError::MissingField(_))
        ));
    }
}
