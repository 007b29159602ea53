use std::ops::AddAssign;

use anyhow::{anyhow, bail};
use nalgebra_sparse::CsrMatrix;
use num_traits::Float;

use crate::error::PreprocessError;
use crate::utils::{Direction, Log1P, Normalize};

use super::{MatrixExpressed, MatrixSubset, MatrixSum};

fn cast<M: Float, T: Float>(value: M) -> anyhow::Result<T> {
    T::from(value).ok_or_else(|| anyhow!("Failed to convert to target type"))
}

fn check_mask(mask: &[bool], expected: usize, what: &str) -> anyhow::Result<()> {
    if mask.len() != expected {
        return Err(PreprocessError::mismatch(what, expected, mask.len()).into());
    }
    Ok(())
}

impl<M: Float> MatrixSum for CsrMatrix<M> {
    fn sum_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + AddAssign,
    {
        let mut result = vec![T::zero(); self.ncols()];
        for (&col_index, &value) in self.col_indices().iter().zip(self.values().iter()) {
            result[col_index] += cast(value)?;
        }
        Ok(result)
    }

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + AddAssign,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for (row, row_vec) in self.row_iter().enumerate() {
            for &value in row_vec.values() {
                result[row] += cast(value)?;
            }
        }
        Ok(result)
    }

    fn sum_col_squared<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + AddAssign,
    {
        let mut result = vec![T::zero(); self.ncols()];
        for (&col_index, &value) in self.col_indices().iter().zip(self.values().iter()) {
            let v: T = cast(value)?;
            result[col_index] += v * v;
        }
        Ok(result)
    }

    fn sum_row_masked<T>(&self, mask: &[bool]) -> anyhow::Result<Vec<T>>
    where
        T: Float + AddAssign,
    {
        check_mask(mask, self.ncols(), "column mask")?;
        let mut result = vec![T::zero(); self.nrows()];
        for (row, row_vec) in self.row_iter().enumerate() {
            for (&col, &value) in row_vec.col_indices().iter().zip(row_vec.values()) {
                if mask[col] {
                    result[row] += cast(value)?;
                }
            }
        }
        Ok(result)
    }
}

impl<M: Float> MatrixExpressed for CsrMatrix<M> {
    fn expressed_col(&self, cutoff: f64) -> anyhow::Result<Vec<u64>> {
        let mut expressed = vec![0u64; self.ncols()];
        let mut stored = vec![0u64; self.ncols()];
        for (&col_index, &value) in self.col_indices().iter().zip(self.values().iter()) {
            stored[col_index] += 1;
            if cast::<M, f64>(value)? >= cutoff {
                expressed[col_index] += 1;
            }
        }
        if cutoff <= 0.0 {
            let nrows = self.nrows() as u64;
            for (count, nnz) in expressed.iter_mut().zip(stored) {
                *count += nrows - nnz;
            }
        }
        Ok(expressed)
    }

    fn expressed_row(&self, cutoff: f64) -> anyhow::Result<Vec<u64>> {
        let ncols = self.ncols() as u64;
        let mut result = Vec::with_capacity(self.nrows());
        for row_vec in self.row_iter() {
            let mut count = 0u64;
            for &value in row_vec.values() {
                if cast::<M, f64>(value)? >= cutoff {
                    count += 1;
                }
            }
            if cutoff <= 0.0 {
                count += ncols - row_vec.nnz() as u64;
            }
            result.push(count);
        }
        Ok(result)
    }
}

impl<M: Float + nalgebra::Scalar> MatrixSubset for CsrMatrix<M> {
    fn select_rows(&self, mask: &[bool]) -> anyhow::Result<Self> {
        check_mask(mask, self.nrows(), "row mask")?;

        let mut offsets = Vec::with_capacity(mask.iter().filter(|&&keep| keep).count() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        offsets.push(0);

        for (row_vec, _) in self.row_iter().zip(mask).filter(|(_, &keep)| keep) {
            indices.extend_from_slice(row_vec.col_indices());
            values.extend_from_slice(row_vec.values());
            offsets.push(indices.len());
        }

        let nrows = offsets.len() - 1;
        CsrMatrix::try_from_csr_data(nrows, self.ncols(), offsets, indices, values)
            .map_err(|e| anyhow!("Failed to build row subset: {}", e))
    }

    fn select_cols(&self, mask: &[bool]) -> anyhow::Result<Self> {
        check_mask(mask, self.ncols(), "column mask")?;

        // old column index -> new column index
        let mut remap = vec![None; mask.len()];
        let mut next = 0usize;
        for (slot, &keep) in remap.iter_mut().zip(mask) {
            if keep {
                *slot = Some(next);
                next += 1;
            }
        }

        let mut offsets = Vec::with_capacity(self.nrows() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        offsets.push(0);

        for row_vec in self.row_iter() {
            for (&col, &value) in row_vec.col_indices().iter().zip(row_vec.values()) {
                if let Some(new_col) = remap[col] {
                    indices.push(new_col);
                    values.push(value);
                }
            }
            offsets.push(indices.len());
        }

        CsrMatrix::try_from_csr_data(self.nrows(), next, offsets, indices, values)
            .map_err(|e| anyhow!("Failed to build column subset: {}", e))
    }
}

impl<T: Float> Normalize<T> for CsrMatrix<T> {
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()> {
        match direction {
            Direction::COLUMN => {
                if sums.len() != self.ncols() {
                    bail!(PreprocessError::mismatch("column sums", self.ncols(), sums.len()));
                }
                for (_, col, val) in self.triplet_iter_mut() {
                    if sums[col] > T::zero() {
                        *val = *val * (target / sums[col]);
                    }
                }
            }
            Direction::ROW => {
                if sums.len() != self.nrows() {
                    bail!(PreprocessError::mismatch("row sums", self.nrows(), sums.len()));
                }
                for (row, _, val) in self.triplet_iter_mut() {
                    if sums[row] > T::zero() {
                        *val = *val * (target / sums[row]);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T: Float> Log1P<T> for CsrMatrix<T> {
    fn log1p_normalize(&mut self) -> anyhow::Result<()> {
        for val in self.values_mut() {
            *val = val.ln_1p();
        }
        Ok(())
    }
}
