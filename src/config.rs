//! Merge and merge-policy configuration.
//!
//! Configurations are plain serde structs so they can be loaded from JSON:
//!
//! ```json
//! {
//!   "throttle": { "delay_seconds": 0.05, "batch_factor": 500 },
//!   "skip_interval": 32
//! }
//! ```
//!
//! Missing fields take their defaults. Every loaded configuration is
//! validated before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};

/// How often a merge pauses, and for how long.
///
/// After every `batch_factor` units of work (terms, or documents scaled by
/// [`MergeConfig::doc_batch_scale`]) the merge sleeps for `delay_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlePolicy {
    /// Pause length between throttled batches.
    pub delay_seconds: f64,

    /// Units of work per batch. Must be at least 1.
    pub batch_factor: usize,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        ThrottlePolicy {
            delay_seconds: 0.01,
            batch_factor: 1000,
        }
    }
}

impl ThrottlePolicy {
    pub fn new(delay_seconds: f64, batch_factor: usize) -> Result<Self> {
        let policy = ThrottlePolicy {
            delay_seconds,
            batch_factor,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that never sleeps.
    pub fn unthrottled() -> Self {
        ThrottlePolicy {
            delay_seconds: 0.0,
            batch_factor: usize::MAX,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_factor == 0 {
            return Err(SegmergeError::invalid_config(
                "throttle.batch_factor must be at least 1",
            ));
        }
        validate_seconds("throttle.delay_seconds", self.delay_seconds)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds)
    }
}

/// Configuration of one merge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Throttle schedule for the term and document phases.
    pub throttle: ThrottlePolicy,

    /// Document batches are `batch_factor * doc_batch_scale` documents.
    pub doc_batch_scale: usize,

    /// Pause between sort-map fields.
    pub sortmap_pause_seconds: f64,

    /// Postings per skip-table block in the merged segment.
    pub skip_interval: usize,

    /// Re-read the new segment before committing it.
    pub verify_after_merge: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            throttle: ThrottlePolicy::default(),
            doc_batch_scale: 10,
            sortmap_pause_seconds: 0.001,
            skip_interval: 16,
            verify_after_merge: true,
        }
    }
}

impl MergeConfig {
    /// A configuration without any pauses, for tests and offline tooling.
    pub fn unthrottled() -> Self {
        MergeConfig {
            throttle: ThrottlePolicy::unthrottled(),
            sortmap_pause_seconds: 0.0,
            ..Default::default()
        }
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SegmergeError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: MergeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.throttle.validate()?;
        if self.doc_batch_scale == 0 {
            return Err(SegmergeError::invalid_config(
                "doc_batch_scale must be at least 1",
            ));
        }
        if self.skip_interval == 0 {
            return Err(SegmergeError::invalid_config(
                "skip_interval must be at least 1",
            ));
        }
        validate_seconds("sortmap_pause_seconds", self.sortmap_pause_seconds)
    }

    /// Documents copied between two throttle pauses.
    pub fn doc_batch_size(&self) -> usize {
        self.throttle.batch_factor.saturating_mul(self.doc_batch_scale)
    }

    pub fn sortmap_pause(&self) -> Duration {
        Duration::from_secs_f64(self.sortmap_pause_seconds)
    }
}

/// Settings of the tiered merge policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicyConfig {
    /// Segments allowed per tier before the tier is merged.
    pub segments_per_tier: usize,

    /// Largest number of segments merged in one operation.
    pub max_merge_at_once: usize,

    /// Live-document count of the smallest tier.
    pub floor_segment_docs: u64,

    /// Size ratio between consecutive tiers.
    pub tier_factor: u64,

    /// Deletion ratio above which a segment is rewritten on its own.
    pub max_deletion_ratio: f64,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        MergePolicyConfig {
            segments_per_tier: 4,
            max_merge_at_once: 10,
            floor_segment_docs: 1000,
            tier_factor: 10,
            max_deletion_ratio: 0.3,
        }
    }
}

impl MergePolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.segments_per_tier < 2 {
            return Err(SegmergeError::invalid_config(
                "segments_per_tier must be at least 2",
            ));
        }
        if self.max_merge_at_once < 2 {
            return Err(SegmergeError::invalid_config(
                "max_merge_at_once must be at least 2",
            ));
        }
        if self.floor_segment_docs == 0 {
            return Err(SegmergeError::invalid_config(
                "floor_segment_docs must be at least 1",
            ));
        }
        if self.tier_factor < 2 {
            return Err(SegmergeError::invalid_config(
                "tier_factor must be at least 2",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_deletion_ratio) {
            return Err(SegmergeError::invalid_config(
                "max_deletion_ratio must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

fn validate_seconds(name: &str, value: f64) -> Result<()> {
    // Duration::from_secs_f64 panics on negative, NaN or huge values.
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(SegmergeError::invalid_config(format!(
            "{name} must be a non-negative number of seconds, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        MergeConfig::default().validate().unwrap();
        MergeConfig::unthrottled().validate().unwrap();
        MergePolicyConfig::default().validate().unwrap();

        let config = MergeConfig::default();
        assert_eq!(config.throttle.batch_factor, 1000);
        assert_eq!(config.doc_batch_size(), 10_000);
        assert_eq!(config.throttle.delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_throttle_validation() {
        assert!(ThrottlePolicy::new(0.0, 1).is_ok());
        assert!(ThrottlePolicy::new(0.5, 0).is_err());
        assert!(ThrottlePolicy::new(-1.0, 10).is_err());
        assert!(ThrottlePolicy::new(f64::NAN, 10).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            MergeConfig::from_json_str(r#"{"throttle": {"batch_factor": 7}, "skip_interval": 4}"#)
                .unwrap();
        assert_eq!(config.throttle.batch_factor, 7);
        assert_eq!(config.throttle.delay_seconds, 0.01);
        assert_eq!(config.skip_interval, 4);
        assert!(config.verify_after_merge);
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        let err = MergeConfig::from_json_str(r#"{"skip_interval": 0}"#).unwrap_err();
        assert!(matches!(err, SegmergeError::InvalidConfig(_)));

        let err = MergeConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, SegmergeError::Json(_)));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"doc_batch_scale": 3}}"#).unwrap();

        let config = MergeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.doc_batch_scale, 3);

        assert!(MergeConfig::from_json_file("/nonexistent/merge.json").is_err());
    }

    #[test]
    fn test_policy_validation() {
        let config = MergePolicyConfig {
            segments_per_tier: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MergePolicyConfig {
            max_deletion_ratio: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
