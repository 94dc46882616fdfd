//! Candidate pair identifiers exchanged with the verifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Two input positions suspected of describing the same feature.
///
/// Always normalized so that `first < second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidatePair {
    pub first: usize,
    pub second: usize,
}

impl CandidatePair {
    /// Build a pair from two distinct indices in either order.
    pub fn new(a: usize, b: usize) -> Result<Self, DomainError> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(Self { first: a, second: b }),
            std::cmp::Ordering::Greater => Ok(Self { first: b, second: a }),
            std::cmp::Ordering::Equal => Err(DomainError::InvalidPairId(format!("{a}-{b}"))),
        }
    }

    /// The textual id used in verification prompts, e.g. `"3-17"`.
    pub fn pair_id(&self) -> String {
        format!("{}-{}", self.first, self.second)
    }

    /// Check both indices address a story in a list of `len`.
    pub fn check_bounds(&self, len: usize) -> Result<(), DomainError> {
        if self.second >= len {
            return Err(DomainError::IndexOutOfRange {
                index: self.second,
                len,
            });
        }
        Ok(())
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl FromStr for CandidatePair {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::InvalidPairId(s.to_string());
        let (left, right) = s.trim().split_once('-').ok_or_else(invalid)?;
        let first: usize = left.trim().parse().map_err(|_| invalid())?;
        let second: usize = right.trim().parse().map_err(|_| invalid())?;
        if first >= second {
            return Err(invalid());
        }
        Ok(Self { first, second })
    }
}
