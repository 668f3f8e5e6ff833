//! Pattern and anomaly detection
//!
//! A stateless pass over the buffers on every cycle. Anomalies and pattern summaries are
//! informational: they travel with the analysis payload but never gate an insight on their
//! own.

use crate::capture::{CaptureBuffers, ScrollDirection};
use crate::config::ScoringConfig;
use crate::types::{
    Anomaly, AnomalyKind, BehaviorMetrics, PatternSummary, ScrollBehavior, ScrollPattern,
    StruggleTag, UserIntent,
};

/// Scroll samples considered by the scroll pattern and behavior classifiers
const SCROLL_PATTERN_WINDOW: usize = 10;

/// Pointer samples considered for the pausing flag
const POINTER_PAUSE_WINDOW: usize = 20;

/// Mean pointer velocity below which the user is considered paused (px/s)
const POINTER_PAUSE_VELOCITY: f64 = 50.0;

/// Scroll behavior bands (px/s)
const READING_SCROLL_VELOCITY: f64 = 300.0;
const BROWSING_SCROLL_VELOCITY: f64 = 1_200.0;

#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: ScoringConfig,
}

impl PatternDetector {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Flag erratic pointer movement and stuck scrolling
    pub fn anomalies(&self, buffers: &CaptureBuffers) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let erratic = buffers
            .pointer
            .iter()
            .filter(|s| s.velocity > self.config.erratic_velocity_px_s)
            .count();
        if erratic > self.config.erratic_min_count {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ErraticMouse,
                count: erratic as u32,
            });
        }

        let stuck_run = self.longest_stuck_scroll_run(buffers);
        if stuck_run > self.config.stuck_scroll_min_run {
            anomalies.push(Anomaly {
                kind: AnomalyKind::StuckScrolling,
                count: stuck_run as u32,
            });
        }

        anomalies
    }

    /// Longest run of consecutive scroll steps whose vertical delta stays under the stuck threshold
    fn longest_stuck_scroll_run(&self, buffers: &CaptureBuffers) -> usize {
        let mut longest = 0;
        let mut current = 0;
        for (prev, next) in buffers.scroll.iter().zip(buffers.scroll.iter().skip(1)) {
            if (next.scroll_y - prev.scroll_y).abs() < self.config.stuck_scroll_delta_px {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest
    }

    pub fn summarize(&self, buffers: &CaptureBuffers) -> PatternSummary {
        PatternSummary {
            scroll_pattern: scroll_pattern(buffers),
            scroll_behavior: scroll_behavior(buffers),
            pointer_pausing: pointer_pausing(buffers),
            click_depth: buffers.clicks.last().map(|c| c.sequence_number as u32).unwrap_or(0),
            mean_key_hold_ms: mean_key_hold_ms(buffers),
        }
    }
}

/// Direction mix of the recent scroll window
fn scroll_pattern(buffers: &CaptureBuffers) -> ScrollPattern {
    let recent: Vec<ScrollDirection> = buffers
        .scroll
        .recent(SCROLL_PATTERN_WINDOW)
        .map(|s| s.direction)
        .collect();
    if recent.len() < 3 {
        return ScrollPattern::Minimal;
    }

    let up = recent.iter().filter(|d| **d == ScrollDirection::Up).count();
    let down = recent.iter().filter(|d| **d == ScrollDirection::Down).count();

    if up * 2 > down {
        ScrollPattern::Reviewing
    } else if up == 0 && down == recent.len() {
        ScrollPattern::Linear
    } else {
        ScrollPattern::Mixed
    }
}

/// Speed band of the recent scroll window
fn scroll_behavior(buffers: &CaptureBuffers) -> ScrollBehavior {
    let velocities: Vec<f64> = buffers
        .scroll
        .recent(SCROLL_PATTERN_WINDOW)
        .map(|s| s.velocity)
        .collect();
    if velocities.is_empty() {
        return ScrollBehavior::Reading;
    }

    let mean = velocities.iter().sum::<f64>() / velocities.len() as f64;
    if mean < READING_SCROLL_VELOCITY {
        ScrollBehavior::Reading
    } else if mean < BROWSING_SCROLL_VELOCITY {
        ScrollBehavior::Browsing
    } else {
        ScrollBehavior::Scanning
    }
}

fn pointer_pausing(buffers: &CaptureBuffers) -> bool {
    let velocities: Vec<f64> = buffers
        .pointer
        .recent(POINTER_PAUSE_WINDOW)
        .map(|s| s.velocity)
        .collect();
    if velocities.is_empty() {
        return false;
    }
    velocities.iter().sum::<f64>() / (velocities.len() as f64) < POINTER_PAUSE_VELOCITY
}

fn mean_key_hold_ms(buffers: &CaptureBuffers) -> f64 {
    let holds: Vec<f64> = buffers.keyboard.iter().filter_map(|k| k.hold_ms).collect();
    if holds.is_empty() {
        0.0
    } else {
        holds.iter().sum::<f64>() / holds.len() as f64
    }
}

/// Recommendation tags for the analysis payload, in a fixed order
pub fn recommendations(metrics: &BehaviorMetrics, intent: &UserIntent) -> Vec<String> {
    let mut out = Vec::new();
    if metrics.frustration_score > 0.5 {
        out.push("offer_help".to_string());
    }
    if intent.struggling_with.contains(&StruggleTag::Navigation) {
        out.push("show_navigation_tour".to_string());
    }
    if intent.struggling_with.contains(&StruggleTag::FindingContent) {
        out.push("suggest_search_terms".to_string());
    }
    if metrics.engagement_score < 0.3 {
        out.push("show_engaging_content".to_string());
    }
    out
}
