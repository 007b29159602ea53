//! # Dimensionality Reduction
//!
//! Linear reduction of the samples × features matrix through a truncated SVD.
//! The resulting components feed the elbow-based selection in [`crate::selection`].
//!
//! ## Currently Available
//! - **PCA** ([`pca`]): truncated SVD without centering, so sparse inputs stay sparse

pub mod pca;
