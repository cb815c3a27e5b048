// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared utilities: token-span localization.

pub mod span;
