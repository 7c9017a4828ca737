//! Bridge domain identifiers
//!
//! A domain is a small integer naming one chain in the bridge topology. It is
//! the namespace for source nonces, so a value must never be reassigned to a
//! different chain once in use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bridge domain identifier
///
/// Opaque on purpose: the bridge only compares and hashes domains. Chain
/// specific parameters live in the [`DomainRegistry`](crate::DomainRegistry).
///
/// # Example
///
/// ```rust
/// use attestation_bridge::Domain;
///
/// let domain = Domain::new(3);
/// assert_eq!(domain.as_u32(), 3);
/// assert_eq!(domain, Domain::ARBITRUM);
/// assert_eq!(domain.to_string(), "3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(u32);

impl Domain {
    pub const ETHEREUM: Self = Self(0);
    pub const AVALANCHE: Self = Self(1);
    pub const OPTIMISM: Self = Self(2);
    pub const ARBITRUM: Self = Self(3);
    pub const BASE: Self = Self(6);
    pub const POLYGON: Self = Self(7);

    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns a display name for the well-known domains.
    pub const fn well_known_name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("Ethereum"),
            1 => Some("Avalanche"),
            2 => Some("Optimism"),
            3 => Some("Arbitrum"),
            6 => Some("Base"),
            7 => Some("Polygon"),
            _ => None,
        }
    }
}

impl From<u32> for Domain {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Domain> for u32 {
    #[inline]
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Domain {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}
