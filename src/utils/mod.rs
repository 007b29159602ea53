use num_traits::Float;

/// Axis along which a per-axis reduction or scaling is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// One value per row (sample).
    ROW,
    /// One value per column (feature).
    COLUMN,
}

pub trait Normalize<T: Float> {
    /// Scales every stored entry of a row (or column) by `target / sums[i]`.
    /// Rows with a non-positive sum are left untouched.
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()>;
}

pub trait Log1P<T: Float> {
    fn log1p_normalize(&mut self) -> anyhow::Result<()>;
}

/// Returns the positions of `values` ordered by descending absolute value.
/// Ties keep their original relative order.
pub fn argsort_abs_desc<T: Float>(values: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .abs()
            .partial_cmp(&values[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argsort_abs_desc() {
        let values = [0.1, -0.9, 0.5, -0.5, 0.0];
        assert_eq!(argsort_abs_desc(&values), vec![1, 2, 3, 0, 4]);
    }

    #[test]
    fn test_argsort_empty() {
        let values: [f64; 0] = [];
        assert!(argsort_abs_desc(&values).is_empty());
    }
}
