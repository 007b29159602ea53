use num_traits::Float;

pub mod csr;

/// Per-axis sums over the stored entries of a sparse matrix.
pub trait MatrixSum {
    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + std::ops::AddAssign;

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + std::ops::AddAssign;

    fn sum_col_squared<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + std::ops::AddAssign;

    /// Row sums restricted to the columns where `mask` is true.
    fn sum_row_masked<T>(&self, mask: &[bool]) -> anyhow::Result<Vec<T>>
    where
        T: Float + std::ops::AddAssign;
}

/// Per-axis counts of entries at or above an expression cutoff.
///
/// Implicit zeros only count when `cutoff <= 0`.
pub trait MatrixExpressed {
    fn expressed_col(&self, cutoff: f64) -> anyhow::Result<Vec<u64>>;

    fn expressed_row(&self, cutoff: f64) -> anyhow::Result<Vec<u64>>;
}

/// Boolean-mask subsetting along one axis.
pub trait MatrixSubset: Sized {
    fn select_rows(&self, mask: &[bool]) -> anyhow::Result<Self>;

    fn select_cols(&self, mask: &[bool]) -> anyhow::Result<Self>;
}
