//! Engine configuration
//!
//! Every tunable the core recognizes, grouped by the component it feeds.
//! Construction validates ranges up front so a bad option is rejected before
//! it can mutate anything.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fsrs::{FSRSParameters, FSRS6_WEIGHTS, MAX_STABILITY};
use crate::reconsolidation::DEFAULT_LABILE_WINDOW_MS;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Target retrievability used by interval scheduling, in [0.7, 0.99]
    pub desired_retention: f64,
    /// Upper clamp on scheduled days
    pub maximum_interval: i64,
    /// FSRS-6 weight overrides
    pub weights: [f64; 21],
    /// Let emotional salience boost stability
    pub enable_sentiment_boost: bool,
    /// Maximum sentiment multiplier, in [1, 3]
    pub max_sentiment_boost: f64,
    /// Deterministic per-review interval fuzzing
    pub enable_fuzz: bool,
    /// Seed for the fuzz generator
    pub fuzz_seed: u32,
    /// Reconsolidation labile window in milliseconds
    pub labile_window_ms: i64,
    /// Prediction-error gate thresholds
    pub gate: GateConfig,
    /// Consolidation cycle knobs
    pub consolidation: ConsolidationConfig,
    /// Compression knobs
    pub compression: CompressionConfig,
}

/// Prediction-error gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateConfig {
    /// Similarity at or above which the incoming item is a duplicate
    pub duplicate_threshold: f64,
    /// Similarity at or above which the most-similar item is updated
    pub update_threshold: f64,
    /// Similarity at or above which items join a merge set
    pub merge_threshold: f64,
    /// Minimum items above the merge threshold before merging
    pub min_merge_count: usize,
    /// Prefer updating over creating when similarity lands between the
    /// merge and update thresholds
    pub prefer_update: bool,
    /// Run the contradiction detector
    pub detect_contradictions: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.95,
            update_threshold: 0.70,
            merge_threshold: 0.60,
            min_merge_count: 2,
            prefer_update: false,
            detect_contradictions: true,
        }
    }
}

/// Consolidation cycle knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsolidationConfig {
    /// Fewest items a cycle will select
    pub min_memories_per_cycle: usize,
    /// Most items a cycle will select
    pub max_memories_per_cycle: usize,
    /// Strength added per replay event
    pub replay_strength_boost: f64,
    /// Minimum pairwise similarity for a discovered connection
    pub connection_threshold: f64,
    /// Minimum confidence to keep an insight
    pub insight_confidence_threshold: f64,
    /// Retention below which the tick prunes an item
    pub pruning_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_memories_per_cycle: 5,
            max_memories_per_cycle: 50,
            replay_strength_boost: 0.1,
            connection_threshold: 0.6,
            insight_confidence_threshold: 0.3,
            pruning_threshold: 0.05,
        }
    }
}

/// Compression knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionConfig {
    /// Minimum word count before a memory is worth compressing
    pub min_content_length: usize,
    /// Hard cap on compressed output length (characters)
    pub max_compressed_length: usize,
    /// Fraction of extracted keywords preserved verbatim
    pub keyword_preservation_ratio: f64,
    /// Importance at or above which a memory is never compressed
    pub min_importance_for_preservation: f64,
    /// Minimum age in days before compression
    pub age_days_for_compression: i64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_content_length: 50,
            max_compressed_length: 2000,
            keyword_preservation_ratio: 0.3,
            min_importance_for_preservation: 0.8,
            age_days_for_compression: 30,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            desired_retention: 0.9,
            maximum_interval: MAX_STABILITY as i64,
            weights: FSRS6_WEIGHTS,
            enable_sentiment_boost: true,
            max_sentiment_boost: 1.5,
            enable_fuzz: false,
            fuzz_seed: 0x5eed_cafe,
            labile_window_ms: DEFAULT_LABILE_WINDOW_MS,
            gate: GateConfig::default(),
            consolidation: ConsolidationConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate ranges. Called by the engine constructor; a failed option
    /// rejects the whole config without side effects.
    pub fn validate(&self) -> Result<()> {
        if !(0.7..=0.99).contains(&self.desired_retention) {
            return Err(EngineError::validation(
                "desired_retention",
                format!("{} outside [0.7, 0.99]", self.desired_retention),
            ));
        }
        if !(1.0..=3.0).contains(&self.max_sentiment_boost) {
            return Err(EngineError::validation(
                "max_sentiment_boost",
                format!("{} outside [1, 3]", self.max_sentiment_boost),
            ));
        }
        if self.maximum_interval < 1 {
            return Err(EngineError::validation(
                "maximum_interval",
                "must be at least 1 day".to_string(),
            ));
        }
        if self.labile_window_ms <= 0 {
            return Err(EngineError::validation(
                "labile_window_ms",
                "must be positive".to_string(),
            ));
        }
        let g = &self.gate;
        if !(g.merge_threshold <= g.update_threshold && g.update_threshold <= g.duplicate_threshold)
        {
            return Err(EngineError::validation(
                "gate",
                "thresholds must satisfy merge <= update <= duplicate".to_string(),
            ));
        }
        if self.consolidation.min_memories_per_cycle > self.consolidation.max_memories_per_cycle {
            return Err(EngineError::validation(
                "consolidation",
                "min_memories_per_cycle exceeds max_memories_per_cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// Scheduler parameters derived from this configuration.
    pub fn scheduler_params(&self) -> FSRSParameters {
        FSRSParameters {
            weights: self.weights,
            desired_retention: self.desired_retention,
            maximum_interval: self.maximum_interval,
            enable_fuzz: self.enable_fuzz,
            fuzz_seed: self.fuzz_seed,
            enable_sentiment_boost: self.enable_sentiment_boost,
            max_sentiment_boost: self.max_sentiment_boost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_retention_out_of_range_rejected() {
        let config = EngineConfig {
            desired_retention: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_threshold_ordering_enforced() {
        let mut config = EngineConfig::default();
        config.gate.merge_threshold = 0.99;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_params_inherit_options() {
        let config = EngineConfig {
            desired_retention: 0.85,
            enable_fuzz: true,
            ..Default::default()
        };
        let params = config.scheduler_params();
        assert!((params.desired_retention - 0.85).abs() < 1e-9);
        assert!(params.enable_fuzz);
    }
}
