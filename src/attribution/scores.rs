// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-document attribution scores and their normalization policies.

use std::ops::Deref;

/// One score per retrieved document, in the documents' input order.
///
/// After successful normalization every score lies in `[0, 1]`. When the
/// normalizing denominator is not positive the attributors fall back to
/// raw (or all-zero) values instead of failing.
///
/// ```
/// use candle_attrib::AttributionScores;
///
/// let scores = AttributionScores::normalized_by_sum(vec![0.8, 0.2, 0.5]);
/// assert_eq!(scores.len(), 3);
/// assert!((scores.total() - 1.0).abs() < 1e-9);
/// assert_eq!(scores.argmax(), Some(0));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributionScores(Vec<f64>);

impl AttributionScores {
    /// Wrap already-computed scores.
    #[must_use]
    pub const fn new(scores: Vec<f64>) -> Self {
        Self(scores)
    }

    /// Divide every raw value by their sum.
    ///
    /// If the sum is not positive the raw values are returned unchanged.
    #[must_use]
    pub fn normalized_by_sum(raw: Vec<f64>) -> Self {
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            Self(raw.into_iter().map(|score| score / total).collect())
        } else {
            tracing::warn!(total, "non-positive score sum; returning raw scores");
            Self(raw)
        }
    }

    /// Divide every raw value by the same external `total`, without
    /// re-normalizing the results to sum to one.
    ///
    /// If `total` is not positive every score is `0`.
    #[must_use]
    pub fn divided_by(raw: &[f64], total: f64) -> Self {
        if total > 0.0 {
            Self(raw.iter().map(|score| score / total).collect())
        } else {
            tracing::warn!(total, "non-positive total weight; returning zero scores");
            Self(vec![0.0; raw.len()])
        }
    }

    /// Sum of all scores.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Index of the highest-scoring document, if any.
    #[must_use]
    pub fn argmax(&self) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
    }

    /// Consume and return the plain score vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for AttributionScores {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

impl From<AttributionScores> for Vec<f64> {
    fn from(scores: AttributionScores) -> Self {
        scores.0
    }
}

impl IntoIterator for AttributionScores {
    type Item = f64;
    type IntoIter = std::vec::IntoIter<f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributionScores {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
