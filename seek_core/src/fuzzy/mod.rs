//! Fuzzy string matching for file names and tag values.
//!
//! Scores are integers in `0..=100`. The token based scorers normalise their input
//! (lowercase, punctuation to spaces) before comparing; the plain scorers do not.

pub mod guards;
pub mod ratio;
pub mod token;

pub use guards::{exact_number_match, version_qualifiers_match};
pub use ratio::{partial_ratio, ratio};
pub use token::{full_process, partial_token_set_ratio, token_set_ratio};
