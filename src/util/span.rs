// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-span localization inside a tokenized thread.
//!
//! [`locate`] finds where a token sub-sequence (query, answer, document)
//! occurs inside the full thread's token sequence.
//!
//! ## Known limitation
//!
//! The search is exact and first-match-only. If a document's text recurs
//! verbatim elsewhere in the thread (for example quoted in the query), the
//! earliest occurrence is the one attributed.

use std::ops::RangeInclusive;

use crate::error::{AttribError, Result};

/// Inclusive token-offset range of a sub-sequence within a larger sequence.
///
/// Invariant: `start <= end`, and `haystack[start..=end]` equals the
/// located sub-sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// First token offset (inclusive).
    pub start: usize,
    /// Last token offset (inclusive).
    pub end: usize,
}

impl Span {
    /// Create a span from inclusive bounds.
    ///
    /// Returns `None` if `start > end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Option<Self> {
        if start > end {
            None
        } else {
            Some(Self { start, end })
        }
    }

    /// Number of tokens covered (always at least 1).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always `false`: a span covers at least one token.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Token offsets as an inclusive range.
    #[must_use]
    pub const fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// Locate `needle` inside `haystack`, returning the first match.
///
/// Scans start offsets `0..=haystack.len() - needle.len()` and returns the
/// lowest `i` with `haystack[i..i + needle.len()] == needle`.
///
/// # Errors
///
/// Returns [`AttribError::SpanNotFound`] if `needle` does not occur as a
/// contiguous sub-sequence of `haystack`, is longer than it, or is empty
/// (an empty needle has no inclusive span).
///
/// # Example
///
/// ```
/// use candle_attrib::util::span::{locate, Span};
///
/// let span = locate(&[5, 1, 2, 3, 1, 2], &[1, 2]).unwrap();
/// assert_eq!(span, Span { start: 1, end: 2 });
/// ```
pub fn locate(haystack: &[u32], needle: &[u32]) -> Result<Span> {
    locate_named(haystack, needle, "sub-sequence")
}

/// [`locate`], labelling the error with what was being searched for.
pub(crate) fn locate_named(haystack: &[u32], needle: &[u32], what: &str) -> Result<Span> {
    let not_found = || AttribError::span_not_found(what, needle.len(), haystack.len());

    if needle.is_empty() {
        return Err(not_found());
    }

    let start = haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .ok_or_else(not_found)?;

    Ok(Span {
        start,
        end: start + needle.len() - 1,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
