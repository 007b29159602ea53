use thiserror::Error;

/// Failure classes raised by the preprocessing steps.
///
/// Every public step returns `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<PreprocessError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreprocessError {
    /// An option name or threshold combination that cannot be applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two arrays that must share an axis have different lengths.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// A prerequisite result is not present in the container.
    #[error("missing {0}; run the producing step first")]
    MissingField(String),
}

impl PreprocessError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}
