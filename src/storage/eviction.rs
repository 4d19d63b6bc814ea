//! Eviction Policies
//!
//! When the key space is at `keysLimit` and a net-new key arrives, exactly
//! one resident key is removed first. The policy is fixed at startup;
//! unknown strategy names are rejected during configuration validation,
//! never at runtime.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How `Store::evict_one` picks its victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Remove whichever key the map yields first. O(1), no bookkeeping.
    #[default]
    SimpleFirst,

    /// Remove the key with the oldest access stamp. Requires the store to
    /// touch a monotonic counter on every get and put.
    Lru,

    /// Remove a uniformly random key.
    Random,
}

/// Strategy name did not match any known policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid eviction strategy: {0} (expected simple-first, lru or random)")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple-first" => Ok(EvictionPolicy::SimpleFirst),
            "lru" => Ok(EvictionPolicy::Lru),
            "random" => Ok(EvictionPolicy::Random),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::SimpleFirst => "simple-first",
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Random => "random",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_strategies_parse() {
        assert_eq!(
            "simple-first".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::SimpleFirst
        );
        assert_eq!("lru".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!(
            "random".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::Random
        );
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = "lfu".parse::<EvictionPolicy>().unwrap_err();
        assert_eq!(err, UnknownPolicy("lfu".to_string()));
    }

    #[test]
    fn strategy_names_roundtrip() {
        for policy in [
            EvictionPolicy::SimpleFirst,
            EvictionPolicy::Lru,
            EvictionPolicy::Random,
        ] {
            assert_eq!(policy.as_str().parse::<EvictionPolicy>().unwrap(), policy);
        }
    }
}
