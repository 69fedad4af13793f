//! Deployment configuration.
//!
//! Every value here is a network-wide constant: all honest nodes must run
//! with identical share sizing and threshold policy, since the participant
//! directory and the reconstruction threshold are computed independently on
//! every node and must agree bit-for-bit.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{HintsError, Result};

/// The fault-tolerance policy that fixes the reconstruction threshold for
/// a directory of `total` shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// More than half of all shares: `floor(total / 2) + 1`.
    Majority,
    /// More than two thirds of all shares: `floor(2 * total / 3) + 1`.
    SuperMajority,
}

impl ThresholdPolicy {
    /// The reconstruction threshold for `total` shares.
    pub fn threshold(&self, total: u32) -> u32 {
        match self {
            ThresholdPolicy::Majority => total / 2 + 1,
            ThresholdPolicy::SuperMajority => (2 * total) / 3 + 1,
        }
    }
}

/// Configuration for the construction and signing subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HintsConfig {
    /// Desired total share count per directory. The effective total is
    /// capped at `roster size * max_shares_per_node`.
    #[serde(default = "default_target_shares")]
    pub target_shares: u32,
    /// Maximum shares a single node may be assigned regardless of weight.
    #[serde(default = "default_max_shares_per_node")]
    pub max_shares_per_node: u32,
    /// Network-wide threshold policy.
    #[serde(default = "default_threshold_policy")]
    pub threshold_policy: ThresholdPolicy,
    /// Bound on concurrently running crypto jobs (dealing generation,
    /// verification, partial-signature computation).
    #[serde(default = "default_crypto_workers")]
    pub crypto_workers: usize,
}

fn default_target_shares() -> u32 {
    256
}

fn default_max_shares_per_node() -> u32 {
    8
}

fn default_threshold_policy() -> ThresholdPolicy {
    ThresholdPolicy::Majority
}

fn default_crypto_workers() -> usize {
    4
}

impl Default for HintsConfig {
    fn default() -> Self {
        Self {
            target_shares: default_target_shares(),
            max_shares_per_node: default_max_shares_per_node(),
            threshold_policy: default_threshold_policy(),
            crypto_workers: default_crypto_workers(),
        }
    }
}

impl HintsConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HintsError::InvalidConfig(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| HintsError::InvalidConfig(format!("parse {}: {e}", path.display())))
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.target_shares == 0 {
            return Err(HintsError::InvalidConfig(
                "target_shares must be >= 1".to_string(),
            ));
        }
        if self.max_shares_per_node == 0 {
            return Err(HintsError::InvalidConfig(
                "max_shares_per_node must be >= 1".to_string(),
            ));
        }
        if self.crypto_workers == 0 {
            return Err(HintsError::InvalidConfig(
                "crypto_workers must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = HintsConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.target_shares, 256);
        assert_eq!(config.threshold_policy, ThresholdPolicy::Majority);
    }

    #[test]
    fn test_majority_threshold() {
        let policy = ThresholdPolicy::Majority;
        assert_eq!(policy.threshold(4), 3);
        assert_eq!(policy.threshold(5), 3);
        assert_eq!(policy.threshold(1), 1);
        assert_eq!(policy.threshold(256), 129);
    }

    #[test]
    fn test_super_majority_threshold() {
        let policy = ThresholdPolicy::SuperMajority;
        assert_eq!(policy.threshold(3), 3);
        assert_eq!(policy.threshold(4), 3);
        assert_eq!(policy.threshold(9), 7);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = HintsConfig::default();
        let text = toml::to_string(&config).expect("serialize");
        let parsed: HintsConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.target_shares, config.target_shares);
        assert_eq!(parsed.threshold_policy, config.threshold_policy);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: HintsConfig = toml::from_str("target_shares = 32").expect("parse");
        assert_eq!(parsed.target_shares, 32);
        assert_eq!(parsed.max_shares_per_node, 8);
    }

    #[test]
    fn test_zero_fields_rejected() {
        let config = HintsConfig {
            target_shares: 0,
            ..HintsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
