//! Cache Tier Definitions
//!
//! Defines the three-tier hierarchy. Tiers are ordered by ascending latency
//! and descending volatility: Memory < Local < Durable.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier representing the storage hierarchy
///
/// When passed to `get`/`save` a tier acts as a *ceiling*: the operation
/// covers that tier and every faster one. [`CacheTier::ALL`] covers all three.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process map (fastest, volatile)
    Memory,
    /// Lightweight persistent key/value files
    Local,
    /// Structured SQLite store (slowest, largest)
    #[default]
    Durable,
}

impl CacheTier {
    /// Ceiling that covers every tier
    pub const ALL: CacheTier = CacheTier::Durable;

    /// Get all tiers in lookup order (Memory -> Local -> Durable)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Memory, CacheTier::Local, CacheTier::Durable]
    }

    /// Tiers probed or written for this ceiling, fastest first
    pub fn up_to(self) -> &'static [CacheTier] {
        let order = Self::lookup_order();
        &order[..=self.priority() as usize]
    }

    /// Tiers faster than this one, fastest first
    pub fn faster_tiers(self) -> &'static [CacheTier] {
        let order = Self::lookup_order();
        &order[..self.priority() as usize]
    }

    /// Get tier priority (lower is faster)
    pub fn priority(&self) -> u8 {
        match self {
            CacheTier::Memory => 0,
            CacheTier::Local => 1,
            CacheTier::Durable => 2,
        }
    }

    /// Whether the tier survives a process restart
    pub fn is_persistent(&self) -> bool {
        !matches!(self, CacheTier::Memory)
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Local => write!(f, "local"),
            CacheTier::Durable => write!(f, "durable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(CacheTier::Memory < CacheTier::Local);
        assert!(CacheTier::Local < CacheTier::Durable);
        assert_eq!(CacheTier::ALL, CacheTier::Durable);
    }

    #[test]
    fn test_up_to() {
        assert_eq!(CacheTier::Memory.up_to(), &[CacheTier::Memory]);
        assert_eq!(
            CacheTier::Local.up_to(),
            &[CacheTier::Memory, CacheTier::Local]
        );
        assert_eq!(CacheTier::ALL.up_to(), CacheTier::lookup_order());
    }

    #[test]
    fn test_faster_tiers() {
        assert!(CacheTier::Memory.faster_tiers().is_empty());
        assert_eq!(CacheTier::Local.faster_tiers(), &[CacheTier::Memory]);
        assert_eq!(
            CacheTier::Durable.faster_tiers(),
            &[CacheTier::Memory, CacheTier::Local]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheTier::Memory.to_string(), "memory");
        assert!(!CacheTier::Memory.is_persistent());
        assert!(CacheTier::Durable.is_persistent());
    }
}
