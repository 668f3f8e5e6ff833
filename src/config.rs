//! Engine configuration
//!
//! Every field has a reference default, so a config file only needs to name what it
//! overrides. Load with [`GuideConfig::from_json`] or [`GuideConfig::from_file`] and call
//! [`GuideConfig::validate`] before handing it to an engine.

use crate::bus::ActiveInsightPolicy;
use crate::error::GuideError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default aggregation cadence (2 seconds)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 2_000;

/// Analysis queue length that triggers an eager aggregation cycle
pub const DEFAULT_EAGER_FLUSH_THRESHOLD: usize = 50;

/// Number of recent clicks considered by the intent predictor
pub const DEFAULT_INTENT_WINDOW: usize = 10;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideConfig {
    /// Fixed aggregation cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Queue length above which a cycle runs without waiting for the tick
    pub eager_flush_threshold: usize,
    /// Rolling buffer capacities
    pub buffers: BufferConfig,
    /// Scoring and anomaly thresholds
    pub scoring: ScoringConfig,
    /// Number of recent clicks used for intent classification
    pub intent_window: usize,
    /// Throttle/dedup policy parameters
    pub throttle: ThrottleConfig,
    /// Remote inference endpoint; `None` means fallback rules only
    pub remote: Option<RemoteConfig>,
    /// Behavior-logging endpoint; `None` disables the call
    pub behavior_log: Option<BehaviorLogConfig>,
    /// What happens to an unacknowledged insight when a new one is surfaced
    pub active_policy: ActiveInsightPolicy,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            eager_flush_threshold: DEFAULT_EAGER_FLUSH_THRESHOLD,
            buffers: BufferConfig::default(),
            scoring: ScoringConfig::default(),
            intent_window: DEFAULT_INTENT_WINDOW,
            throttle: ThrottleConfig::default(),
            remote: None,
            behavior_log: None,
            active_policy: ActiveInsightPolicy::default(),
        }
    }
}

/// Capacities of the rolling buffers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub pointer: usize,
    pub scroll: usize,
    pub keyboard: usize,
    pub focus: usize,
    pub click: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pointer: 1_000,
            scroll: 500,
            keyboard: 500,
            focus: 200,
            click: 200,
        }
    }
}

/// Thresholds used by the aggregator and the anomaly detector.
///
/// Velocities are in pixels per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Pointer velocity counted as a frustration signal
    pub high_velocity_px_s: f64,
    /// Pointer velocity counted towards the erratic-mouse anomaly
    pub erratic_velocity_px_s: f64,
    /// Erratic samples needed before the anomaly is raised
    pub erratic_min_count: usize,
    /// Pointer velocity below which a sample counts as hesitation
    pub hesitation_velocity_px_s: f64,
    /// Scroll sample count that adds the flat excessive-scrolling penalty
    pub excessive_scroll_count: usize,
    /// Maximum gap between two clicks of a rapid pair
    pub rapid_click_interval_ms: f64,
    /// Maximum distance between two clicks of a rapid pair
    pub rapid_click_radius_px: f64,
    /// Same-target clicks closer than this (but not rapid) count as retries
    pub retry_window_ms: f64,
    /// Upper bound of a "reading" scroll velocity
    pub reading_velocity_px_s: f64,
    /// Vertical scroll step below which the page is considered not to move
    pub stuck_scroll_delta_px: f64,
    /// Consecutive stuck steps needed before the anomaly is raised
    pub stuck_scroll_min_run: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_velocity_px_s: 2_000.0,
            erratic_velocity_px_s: 4_000.0,
            erratic_min_count: 5,
            hesitation_velocity_px_s: 10.0,
            excessive_scroll_count: 100,
            rapid_click_interval_ms: 500.0,
            rapid_click_radius_px: 30.0,
            retry_window_ms: 3_000.0,
            reading_velocity_px_s: 600.0,
            stuck_scroll_delta_px: 5.0,
            stuck_scroll_min_run: 10,
        }
    }
}

/// Throttle/dedup parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Once history holds more than this many entries, low-priority insights are dropped
    pub low_priority_history_limit: usize,
    /// Number of most recent surfaced insights checked for {type, title} duplicates
    pub dedup_window: usize,
    /// Minimum metadata confidence
    pub min_confidence: f64,
    /// Cooldown after the last surfaced insight for `high` candidates
    pub high_cooldown_ms: f64,
    /// Cooldown for every other non-urgent candidate
    pub default_cooldown_ms: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            low_priority_history_limit: 5,
            dedup_window: 3,
            min_confidence: 0.5,
            high_cooldown_ms: 5_000.0,
            default_cooldown_ms: 15_000.0,
        }
    }
}

/// Chat-completion style inference endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; `/chat/completions` and `/models` are appended
    pub base_url: String,
    pub model: String,
    /// Bearer token. Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 1_000,
            timeout_ms: 8_000,
        }
    }
}

/// Behavior-logging endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorLogConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for BehaviorLogConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5000/api/ai/analyze-behavior".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl GuideConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, GuideError> {
        let config: GuideConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GuideError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to JSON (API keys are omitted)
    pub fn to_json(&self) -> Result<String, GuideError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), GuideError> {
        if self.tick_interval_ms == 0 {
            return Err(GuideError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.eager_flush_threshold == 0 {
            return Err(GuideError::Config("eager_flush_threshold must be > 0".into()));
        }
        if self.intent_window == 0 {
            return Err(GuideError::Config("intent_window must be > 0".into()));
        }

        let s = &self.scoring;
        if s.hesitation_velocity_px_s >= s.high_velocity_px_s {
            return Err(GuideError::Config(
                "hesitation_velocity_px_s must be below high_velocity_px_s".into(),
            ));
        }
        if s.erratic_velocity_px_s < s.high_velocity_px_s {
            return Err(GuideError::Config(
                "erratic_velocity_px_s must not be below high_velocity_px_s".into(),
            ));
        }

        let t = &self.throttle;
        if !(0.0..=1.0).contains(&t.min_confidence) {
            return Err(GuideError::Config("min_confidence must be within [0, 1]".into()));
        }
        if t.high_cooldown_ms < 0.0 || t.default_cooldown_ms < 0.0 {
            return Err(GuideError::Config("cooldowns must be non-negative".into()));
        }

        if let Some(remote) = &self.remote {
            if remote.base_url.trim().is_empty() || remote.model.trim().is_empty() {
                return Err(GuideError::Config("remote base_url and model are required".into()));
            }
            if remote.timeout_ms == 0 {
                return Err(GuideError::Config("remote timeout_ms must be > 0".into()));
            }
        }

        if let Some(log) = &self.behavior_log {
            if log.endpoint.trim().is_empty() {
                return Err(GuideError::Config("behavior_log endpoint is required".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GuideConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_ms, 2_000);
        assert_eq!(config.eager_flush_threshold, 50);
        assert_eq!(config.throttle.high_cooldown_ms, 5_000.0);
        assert_eq!(config.throttle.default_cooldown_ms, 15_000.0);
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "tick_interval_ms": 500,
            "buffers": { "pointer": 64 },
            "remote": { "api_key": "sk-test" }
        }"#;

        let config = GuideConfig::from_json(json).unwrap();
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.buffers.pointer, 64);
        assert_eq!(config.buffers.scroll, 500);

        let remote = config.remote.unwrap();
        assert_eq!(remote.model, "deepseek-chat");
        assert_eq!(remote.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = GuideConfig {
            remote: Some(RemoteConfig {
                api_key: Some("sk-secret".to_string()),
                ..RemoteConfig::default()
            }),
            ..GuideConfig::default()
        };

        let json = config.to_json().unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("deepseek-chat"));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(GuideConfig::from_json(r#"{ "tick_interval_ms": 0 }"#).is_err());
        assert!(GuideConfig::from_json(r#"{ "throttle": { "min_confidence": 1.5 } }"#).is_err());
        assert!(GuideConfig::from_json(
            r#"{ "scoring": { "high_velocity_px_s": 5000, "erratic_velocity_px_s": 100 } }"#
        )
        .is_err());
        assert!(GuideConfig::from_json(r#"{ "remote": { "model": "" } }"#).is_err());
        assert!(GuideConfig::from_json("not json").is_err());
    }
}
