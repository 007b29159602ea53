//! # Elbow Detection
//!
//! Locates the point on a ranked curve (variance explained per component, sorted
//! absolute loadings, ...) after which further points add diminishing value.
//!
//! The method is the normalized-difference ("kneedle") approach:
//! 1. both axes are min-max scaled to `[0, 1]`; a constant `x` scales to all zeros,
//!    a constant `y` has no elbow
//! 2. the scaled `y` is reoriented according to [`Curve`] and [`CurveDirection`] so that
//!    every supported shape maps onto the same canonical form
//! 3. the difference `y - x` is taken at every point
//! 4. a threshold `T = S * mean(|Δ difference|)` is derived from the sensitivity `S`
//! 5. a left-to-right scan reports a running maximum of the difference as an elbow
//!    once the difference has fallen more than `T` below it
//!
//! In batch mode the last qualifying maximum is returned; in online mode the first.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use log::{debug, warn};
use num_traits::Float;

use crate::error::PreprocessError;

/// Expected bend of the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    Convex,
    Concave,
}

impl FromStr for Curve {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "convex" => Ok(Curve::Convex),
            "concave" => Ok(Curve::Concave),
            other => Err(PreprocessError::invalid(format!(
                "unrecognized curve '{}', expected 'convex' or 'concave'",
                other
            ))),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Convex => write!(f, "convex"),
            Curve::Concave => write!(f, "concave"),
        }
    }
}

/// Whether `y` grows or shrinks along the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveDirection {
    #[default]
    Decreasing,
    Increasing,
}

impl FromStr for CurveDirection {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decreasing" => Ok(CurveDirection::Decreasing),
            "increasing" => Ok(CurveDirection::Increasing),
            other => Err(PreprocessError::invalid(format!(
                "unrecognized direction '{}', expected 'decreasing' or 'increasing'",
                other
            ))),
        }
    }
}

impl fmt::Display for CurveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurveDirection::Decreasing => write!(f, "decreasing"),
            CurveDirection::Increasing => write!(f, "increasing"),
        }
    }
}

/// What a caller keeps when no elbow is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElbowFallback {
    /// Keep the whole curve.
    #[default]
    KeepAll,
    /// Keep nothing.
    KeepNone,
}

impl ElbowFallback {
    /// Turns a locator result into a count of points to keep.
    pub fn resolve(self, elbow: Option<usize>, len: usize) -> usize {
        match (elbow, self) {
            (Some(index), _) => index,
            (None, ElbowFallback::KeepAll) => {
                warn!("No elbow found on a curve of {} points, keeping all", len);
                len
            }
            (None, ElbowFallback::KeepNone) => {
                warn!("No elbow found on a curve of {} points, keeping none", len);
                0
            }
        }
    }
}

/// Elbow locator over ranked curves.
///
/// Stateless between calls; one instance can be reused for any number of curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElbowLocator<T: Float> {
    sensitivity: T,
    min_elbow: Option<usize>,
    curve: Curve,
    direction: CurveDirection,
    online: bool,
}

impl<T: Float + fmt::Debug> ElbowLocator<T> {
    pub fn new(
        sensitivity: T,
        min_elbow: Option<usize>,
        curve: Curve,
        direction: CurveDirection,
        online: bool,
    ) -> Self {
        Self {
            sensitivity,
            min_elbow,
            curve,
            direction,
            online,
        }
    }

    pub fn sensitivity(&self) -> T {
        self.sensitivity
    }

    pub fn min_elbow(&self) -> Option<usize> {
        self.min_elbow
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn direction(&self) -> CurveDirection {
        self.direction
    }

    pub fn online(&self) -> bool {
        self.online
    }

    /// Locates the elbow of a curve whose `x` values are its ranks `0..y.len()`.
    pub fn locate_ranked(&self, y: &[T]) -> anyhow::Result<Option<usize>> {
        let x = (0..y.len())
            .map(|i| T::from(i).ok_or_else(|| anyhow!("Failed to convert rank {} to float", i)))
            .collect::<anyhow::Result<Vec<T>>>()?;
        self.locate(&x, y)
    }

    /// Locates the elbow of the curve `(x[i], y[i])`.
    ///
    /// Returns the position (into `y`) of the elbow, or `None` when no point
    /// satisfies the drop test. Fails on mismatched or empty inputs, non-finite
    /// values, or a negative sensitivity.
    pub fn locate(&self, x: &[T], y: &[T]) -> anyhow::Result<Option<usize>> {
        self.validate(x, y)?;

        let n = y.len();
        let Some(y_scaled) = min_max_scale(y) else {
            debug!("Degenerate curve of {} points, no elbow", n);
            return Ok(None);
        };
        let x_scaled = min_max_scale(x).unwrap_or_else(|| vec![T::zero(); n]);

        let reversed = matches!(
            (self.curve, self.direction),
            (Curve::Concave, CurveDirection::Decreasing) | (Curve::Convex, CurveDirection::Increasing)
        );
        let canonical = self.canonical_y(y_scaled);
        let difference: Vec<T> = canonical
            .iter()
            .zip(x_scaled.iter())
            .map(|(&yc, &xc)| yc - xc)
            .collect();

        let threshold = self.sensitivity * mean_abs_step(&difference)?;

        // Candidates are restricted to original positions >= min_elbow.
        let floor = self.min_elbow.unwrap_or(0);
        let window = if reversed {
            0..n.saturating_sub(floor)
        } else {
            floor.min(n)..n
        };

        let found = scan(&difference, window, threshold, self.online);
        let elbow = found.map(|index| if reversed { n - 1 - index } else { index });
        debug!(
            "Elbow scan: n={}, curve={}, direction={}, online={}, threshold={:?}, elbow={:?}",
            n, self.curve, self.direction, self.online, threshold, elbow
        );
        Ok(elbow)
    }

    fn validate(&self, x: &[T], y: &[T]) -> anyhow::Result<()> {
        if x.len() != y.len() {
            return Err(PreprocessError::mismatch("curve x/y", x.len(), y.len()).into());
        }
        if y.is_empty() {
            return Err(PreprocessError::invalid("curve must contain at least one point").into());
        }
        if !(self.sensitivity >= T::zero()) {
            return Err(PreprocessError::invalid(format!(
                "sensitivity must be >= 0, got {:?}",
                self.sensitivity
            ))
            .into());
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(PreprocessError::invalid("curve contains non-finite values").into());
        }
        Ok(())
    }

    /// Reorients scaled `y` so that the elbow is a maximum of `y - x` for every
    /// curve/direction combination. Reversed orientations read the curve back to front.
    fn canonical_y(&self, y_scaled: Vec<T>) -> Vec<T> {
        let top = y_scaled.iter().copied().fold(T::zero(), T::max);
        match (self.curve, self.direction) {
            (Curve::Convex, CurveDirection::Decreasing) => {
                y_scaled.into_iter().map(|v| top - v).collect()
            }
            (Curve::Concave, CurveDirection::Increasing) => y_scaled,
            (Curve::Concave, CurveDirection::Decreasing) => y_scaled.into_iter().rev().collect(),
            (Curve::Convex, CurveDirection::Increasing) => {
                y_scaled.into_iter().rev().map(|v| top - v).collect()
            }
        }
    }
}

impl<T: Float + fmt::Debug> Default for ElbowLocator<T> {
    fn default() -> Self {
        ElbowLocatorBuilder::new().build()
    }
}

/// Scan state: the best difference seen so far, where it was, and whether the
/// curve has already dropped far enough below it.
#[derive(Debug, Clone, Copy)]
struct RunningMax<T> {
    value: T,
    index: usize,
    crossed: bool,
}

/// Walks `difference[window]` left to right.
///
/// | observation                    | transition                                   |
/// |--------------------------------|----------------------------------------------|
/// | `d >= max`                     | new maximum at this index, crossing reset    |
/// | `max - d > threshold`, not yet crossed | maximum index becomes a candidate    |
/// | otherwise                      | no change                                    |
///
/// Online mode returns the first candidate; batch mode the last.
fn scan<T: Float>(
    difference: &[T],
    window: std::ops::Range<usize>,
    threshold: T,
    online: bool,
) -> Option<usize> {
    let mut state: Option<RunningMax<T>> = None;
    let mut last = None;

    for i in window {
        let d = difference[i];
        let current = match state {
            None => {
                state = Some(RunningMax {
                    value: d,
                    index: i,
                    crossed: false,
                });
                continue;
            }
            Some(current) => current,
        };

        if d >= current.value {
            state = Some(RunningMax {
                value: d,
                index: i,
                crossed: false,
            });
        } else if !current.crossed && current.value - d > threshold {
            state = Some(RunningMax {
                crossed: true,
                ..current
            });
            if online {
                return Some(current.index);
            }
            last = Some(current.index);
        }
    }

    last
}

/// Min-max scales to `[0, 1]`; `None` when all values are equal.
fn min_max_scale<T: Float>(values: &[T]) -> Option<Vec<T>> {
    let (lo, hi) = values
        .iter()
        .fold((T::infinity(), T::neg_infinity()), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    if !(range > T::zero()) {
        return None;
    }
    Some(values.iter().map(|&v| (v - lo) / range).collect())
}

fn mean_abs_step<T: Float>(values: &[T]) -> anyhow::Result<T> {
    if values.len() < 2 {
        return Ok(T::zero());
    }
    let total = values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(T::zero(), |acc, v| acc + v);
    let steps = T::from(values.len() - 1).ok_or_else(|| anyhow!("Failed to convert step count"))?;
    Ok(total / steps)
}

/// Builder for [`ElbowLocator`].
///
/// Defaults: sensitivity 1, no `min_elbow`, convex, decreasing, batch mode.
#[derive(Debug, Clone, Copy)]
pub struct ElbowLocatorBuilder<T: Float> {
    sensitivity: T,
    min_elbow: Option<usize>,
    curve: Curve,
    direction: CurveDirection,
    online: bool,
}

impl<T: Float + fmt::Debug> Default for ElbowLocatorBuilder<T> {
    fn default() -> Self {
        Self {
            sensitivity: T::one(),
            min_elbow: None,
            curve: Curve::default(),
            direction: CurveDirection::default(),
            online: false,
        }
    }
}

impl<T: Float + fmt::Debug> ElbowLocatorBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Larger values require a sharper drop, which moves the elbow earlier or removes it.
    pub fn sensitivity(mut self, sensitivity: T) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Positions below `min_elbow` are never reported.
    pub fn min_elbow(mut self, min_elbow: usize) -> Self {
        self.min_elbow = Some(min_elbow);
        self
    }

    pub fn maybe_min_elbow(mut self, min_elbow: Option<usize>) -> Self {
        self.min_elbow = min_elbow;
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

    pub fn build(self) -> ElbowLocator<T> {
        ElbowLocator::new(
            self.sensitivity,
            self.min_elbow,
            self.curve,
            self.direction,
            self.online,
        )
    }
}

/// One-shot form of [`ElbowLocator::locate`].
pub fn locate_elbow<T: Float + fmt::Debug>(
    x: &[T],
    y: &[T],
    sensitivity: T,
    min_elbow: Option<usize>,
    curve: Curve,
    direction: CurveDirection,
    online: bool,
) -> anyhow::Result<Option<usize>> {
    ElbowLocator::new(sensitivity, min_elbow, curve, direction, online).locate(x, y)
}
