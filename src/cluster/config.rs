use crate::core::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How much of each phase is journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Nothing is journaled; a crash mid-commit needs a full resync.
    None,
    /// One journal entry per strategy call.
    Coarse,
    /// Strategy calls plus the outcome of every replica call.
    #[default]
    Fine,
}

/// Source of transaction identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionIdMode {
    #[default]
    Uuid,
    Sequence,
}

/// Cluster configuration
///
/// # Examples
///
/// ```
/// use hacluster::{ClusterConfig, DurabilityMode};
/// use std::time::Duration;
///
/// let config = ClusterConfig::new("orders")
///     .durability(DurabilityMode::Coarse)
///     .lock_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name, used in log output
    pub cluster_id: String,

    /// Durability journaling level
    pub durability: DurabilityMode,

    /// Transaction identifier factory
    pub transaction_ids: TransactionIdMode,

    /// Upper bound on waiting for the cluster write lock during structural
    /// changes; `None` waits indefinitely
    pub lock_timeout_ms: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new("cluster")
    }
}

impl ClusterConfig {
    pub fn new(cluster_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            durability: DurabilityMode::default(),
            transaction_ids: TransactionIdMode::default(),
            lock_timeout_ms: None,
        }
    }

    /// Set durability mode
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set transaction identifier mode
    pub fn transaction_ids(mut self, mode: TransactionIdMode) -> Self {
        self.transaction_ids = mode;
        self
    }

    /// Set structural lock timeout
    ///
    /// Stored in whole milliseconds, rounded up.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.lock_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    pub fn lock_timeout_duration(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Parse from a JSON document
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(ClusterError::ConfigError(
                "cluster_id must not be empty".to_string(),
            ));
        }

        if self.lock_timeout_ms == Some(0) {
            return Err(ClusterError::ConfigError(
                "lock_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ClusterConfig::new("inventory")
            .durability(DurabilityMode::None)
            .transaction_ids(TransactionIdMode::Sequence)
            .lock_timeout(Duration::from_millis(250));

        assert_eq!(config.cluster_id, "inventory");
        assert_eq!(config.durability, DurabilityMode::None);
        assert_eq!(config.transaction_ids, TransactionIdMode::Sequence);
        assert_eq!(config.lock_timeout_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_lock_timeout_rounds_up_to_whole_millis() {
        let config = ClusterConfig::new("inventory").lock_timeout(Duration::from_micros(500));
        assert_eq!(config.lock_timeout_ms, Some(1));
        assert!(config.validate().is_ok());

        let config = ClusterConfig::new("inventory").lock_timeout(Duration::from_micros(1500));
        assert_eq!(config.lock_timeout_duration(), Some(Duration::from_millis(2)));

        let config = ClusterConfig::new("inventory").lock_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json_applies_defaults() {
        let config = ClusterConfig::from_json(r#"{"cluster_id": "billing", "durability": "coarse"}"#)
            .unwrap();

        assert_eq!(config.cluster_id, "billing");
        assert_eq!(config.durability, DurabilityMode::Coarse);
        assert_eq!(config.transaction_ids, TransactionIdMode::Uuid);
        assert_eq!(config.lock_timeout_ms, None);
    }

    #[test]
    fn test_config_validation() {
        assert!(ClusterConfig::new("  ").validate().is_err());

        let mut config = ClusterConfig::new("billing");
        config.lock_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        assert!(ClusterConfig::from_json(r#"{"durability": "paranoid"}"#).is_err());
    }
}
