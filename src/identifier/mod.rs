//! Identifier values.
//!
//! Every managed value uses the standard 36-character hyphenated layout.
//! Random values are UUIDv4; time-ordered values are UUIDv7, which carry a
//! millisecond Unix timestamp in the high bits and random bits below it.
//! A monitored field may also declare a literal prefix written ahead of the
//! layout (`art_0190b4c2-...`).

mod generator;
mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use generator::{generate, IdentifierSource, RandomSource, SeededSource};
pub use validator::{is_valid, is_valid_with_prefix, LAYOUT_LEN};

/// Layout version used when generating values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UuidVersion {
    /// Purely random.
    #[default]
    V4,

    /// Millisecond timestamp followed by random bits.
    V7,
}

impl fmt::Display for UuidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("v4"),
            Self::V7 => f.write_str("v7"),
        }
    }
}
