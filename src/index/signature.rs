use std::fmt;
use crate::core::utils::strhash;

/// Length of every posting key.
pub const SIGNATURE_LEN: usize = 24;

/// Fixed-length key a term is stored under.
///
/// Different terms may share a signature; their postings are simply merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermSignature(String);

impl TermSignature {
    pub fn of(term: &str) -> Self {
        TermSignature(strhash(term, SIGNATURE_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` characters (signatures are always ASCII).
    pub fn prefix(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for TermSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
