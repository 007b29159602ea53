//! # Annotated matrix container
//!
//! A samples × features count matrix stored as CSR together with the tables the
//! preprocessing steps read from and write into:
//!
//! - `obs` / `var`: per-sample and per-feature metadata columns
//! - `obsm` / `varm`: dense arrays aligned to the sample or feature axis
//! - `layers`: alternative matrices of the same shape (e.g. the raw counts)
//! - `uns`: a free-form store of named values (e.g. PCA summaries)

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array1, Array2, ArrayView2};

use crate::dimred::pca::PCA_UNS;
use crate::error::PreprocessError;
use crate::selection::{FEATURES, N_PCS};
use crate::sparse::MatrixSubset;

/// A single metadata column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Count(Vec<u64>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Count(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the column; booleans map to 0/1.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Column::Float(v) => v.clone(),
            Column::Count(v) => v.iter().map(|&c| c as f64).collect(),
            Column::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
        }
    }

    fn select(&self, mask: &[bool]) -> Column {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Column::Float(v) => Column::Float(keep(v, mask)),
            Column::Count(v) => Column::Count(keep(v, mask)),
            Column::Bool(v) => Column::Bool(keep(v, mask)),
        }
    }
}

/// Named columns sharing one row axis.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    names: Vec<String>,
    columns: BTreeMap<String, Column>,
}

impl Frame {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            columns: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Column> {
        self.columns.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<Vec<f64>> {
        self.columns.get(key).map(Column::to_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<&[bool]> {
        match self.columns.get(key) {
            Some(Column::Bool(v)) => Some(v),
            _ => None,
        }
    }

    /// Inserts or replaces a column. Fails if its length differs from the axis.
    pub fn insert(&mut self, key: impl Into<String>, column: Column) -> anyhow::Result<()> {
        let key = key.into();
        if column.len() != self.len() {
            return Err(PreprocessError::mismatch(format!("column '{}'", key), self.len(), column.len()).into());
        }
        self.columns.insert(key, column);
        Ok(())
    }

    fn select(&self, mask: &[bool]) -> Frame {
        Frame {
            names: self
                .names
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .map(|(n, _)| n.clone())
                .collect(),
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.select(mask)))
                .collect(),
        }
    }
}

/// A value in the unstructured store.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsValue {
    Count(usize),
    Float(f64),
    Array(Array1<f64>),
    Indices(BTreeMap<String, Vec<usize>>),
    Map(HashMap<String, UnsValue>),
}

impl UnsValue {
    pub fn as_count(&self) -> Option<usize> {
        match self {
            UnsValue::Count(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array1<f64>> {
        match self {
            UnsValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_indices(&self) -> Option<&BTreeMap<String, Vec<usize>>> {
        match self {
            UnsValue::Indices(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, UnsValue>> {
        match self {
            UnsValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotatedMatrix {
    x: CsrMatrix<f64>,
    pub obs: Frame,
    pub var: Frame,
    pub obsm: HashMap<String, Array2<f64>>,
    pub varm: HashMap<String, Array2<f64>>,
    pub layers: HashMap<String, CsrMatrix<f64>>,
    pub uns: HashMap<String, UnsValue>,
}

impl AnnotatedMatrix {
    /// Wraps a CSR matrix, naming samples and features by their position.
    pub fn new(x: CsrMatrix<f64>) -> Self {
        let obs_names = (0..x.nrows()).map(|i| i.to_string()).collect();
        let var_names = (0..x.ncols()).map(|j| j.to_string()).collect();
        Self::assemble(x, obs_names, var_names)
    }

    pub fn with_names(
        x: CsrMatrix<f64>,
        obs_names: Vec<String>,
        var_names: Vec<String>,
    ) -> anyhow::Result<Self> {
        if obs_names.len() != x.nrows() {
            return Err(PreprocessError::mismatch("obs names", x.nrows(), obs_names.len()).into());
        }
        if var_names.len() != x.ncols() {
            return Err(PreprocessError::mismatch("var names", x.ncols(), var_names.len()).into());
        }
        Ok(Self::assemble(x, obs_names, var_names))
    }

    fn assemble(x: CsrMatrix<f64>, obs_names: Vec<String>, var_names: Vec<String>) -> Self {
        Self {
            x,
            obs: Frame::new(obs_names),
            var: Frame::new(var_names),
            obsm: HashMap::new(),
            varm: HashMap::new(),
            layers: HashMap::new(),
            uns: HashMap::new(),
        }
    }

    /// Builds the container from a dense matrix, keeping only non-zero entries.
    pub fn from_dense(dense: ArrayView2<f64>) -> Self {
        let (nrows, ncols) = dense.dim();
        let mut coo = CooMatrix::new(nrows, ncols);
        for ((i, j), &value) in dense.indexed_iter() {
            if value != 0.0 {
                coo.push(i, j, value);
            }
        }
        Self::new(CsrMatrix::from(&coo))
    }

    pub fn x(&self) -> &CsrMatrix<f64> {
        &self.x
    }

    /// In-place access for transforms that keep the sparsity pattern.
    pub(crate) fn x_mut(&mut self) -> &mut CsrMatrix<f64> {
        &mut self.x
    }

    /// Replaces the matrix; the shape must not change.
    pub fn set_x(&mut self, x: CsrMatrix<f64>) -> anyhow::Result<()> {
        if x.nrows() != self.n_obs() {
            return Err(PreprocessError::mismatch("matrix rows", self.n_obs(), x.nrows()).into());
        }
        if x.ncols() != self.n_vars() {
            return Err(PreprocessError::mismatch("matrix columns", self.n_vars(), x.ncols()).into());
        }
        self.x = x;
        Ok(())
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_obs(), self.n_vars())
    }

    /// Looks up a nested `uns` entry, e.g. `uns_get(&["pca", "n_pcs"])`.
    pub fn uns_get(&self, path: &[&str]) -> Option<&UnsValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.uns.get(*first)?;
        for key in rest {
            current = current.as_map()?.get(*key)?;
        }
        Some(current)
    }

    /// Mutable access to the map stored under `uns[key]`, creating it when absent
    /// or when a non-map value occupies the slot.
    pub fn uns_map_mut(&mut self, key: &str) -> &mut HashMap<String, UnsValue> {
        let slot = self
            .uns
            .entry(key.to_string())
            .or_insert_with(|| UnsValue::Map(HashMap::new()));
        if !matches!(slot, UnsValue::Map(_)) {
            *slot = UnsValue::Map(HashMap::new());
        }
        match slot {
            UnsValue::Map(map) => map,
            _ => unreachable!(),
        }
    }

    /// Keeps the samples where `mask` is true, subsetting every row-aligned table.
    ///
    /// Nothing changes when the mask or any `obsm` array disagrees with the
    /// number of samples.
    pub fn subset_obs(&mut self, mask: &[bool]) -> anyhow::Result<()> {
        let x = self.x.select_rows(mask)?;
        let mut layers = HashMap::with_capacity(self.layers.len());
        for (key, layer) in &self.layers {
            layers.insert(key.clone(), layer.select_rows(mask)?);
        }
        let obsm = select_aligned(&self.obsm, "obsm", mask)?;

        self.x = x;
        self.layers = layers;
        self.obsm = obsm;
        self.obs = self.obs.select(mask);
        Ok(())
    }

    /// Keeps the features where `mask` is true, subsetting every column-aligned table.
    ///
    /// Selected feature indices and the component count in `uns["pca"]` refer to
    /// the old feature axis and are removed, so selection has to be rerun.
    pub fn subset_var(&mut self, mask: &[bool]) -> anyhow::Result<()> {
        let x = self.x.select_cols(mask)?;
        let mut layers = HashMap::with_capacity(self.layers.len());
        for (key, layer) in &self.layers {
            layers.insert(key.clone(), layer.select_cols(mask)?);
        }
        let varm = select_aligned(&self.varm, "varm", mask)?;

        self.x = x;
        self.layers = layers;
        self.varm = varm;
        self.var = self.var.select(mask);
        if let Some(UnsValue::Map(pca)) = self.uns.get_mut(PCA_UNS) {
            pca.remove(FEATURES);
            pca.remove(N_PCS);
        }
        Ok(())
    }

    pub(crate) fn varm_or_missing(&self, key: &str) -> anyhow::Result<&Array2<f64>> {
        self.varm
            .get(key)
            .ok_or_else(|| anyhow!(PreprocessError::MissingField(format!("varm['{}']", key))))
    }
}

/// Subsets the rows of every array in `arrays`, failing before any copy if one of
/// them is not aligned to `mask`.
fn select_aligned(
    arrays: &HashMap<String, Array2<f64>>,
    table: &str,
    mask: &[bool],
) -> anyhow::Result<HashMap<String, Array2<f64>>> {
    for (key, arr) in arrays {
        if arr.nrows() != mask.len() {
            return Err(PreprocessError::mismatch(
                format!("{}['{}'] rows", table, key),
                mask.len(),
                arr.nrows(),
            )
            .into());
        }
    }
    let keep: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, &m)| m)
        .map(|(i, _)| i)
        .collect();
    Ok(arrays
        .iter()
        .map(|(key, arr)| (key.clone(), arr.select(ndarray::Axis(0), &keep)))
        .collect())
}
