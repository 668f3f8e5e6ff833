//! Throttle and dedup policy
//!
//! Decides whether a candidate insight reaches the user. The decision is a pure function of
//! the candidate, the surfaced history and the current time.

use crate::config::ThrottleConfig;
use crate::types::{Insight, Priority};
use serde::{Deserialize, Serialize};

/// Why a candidate was not surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Low priority after the history already holds several insights
    LowPriorityFatigue,
    /// Same type and title as one of the most recent insights
    Duplicate,
    /// Generator confidence below the floor
    LowConfidence,
    /// Too soon after the previous insight
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Surface,
    Suppress(SuppressReason),
}

impl ThrottleDecision {
    pub fn is_surface(&self) -> bool {
        matches!(self, ThrottleDecision::Surface)
    }
}

/// A surfaced insight and when it was surfaced
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub insight: Insight,
    pub surfaced_at_ms: f64,
}

/// Append-only list of surfaced insights
#[derive(Debug, Clone, Default)]
pub struct InsightHistory {
    entries: Vec<HistoryEntry>,
}

impl InsightHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, insight: Insight, surfaced_at_ms: f64) {
        self.entries.push(HistoryEntry {
            insight,
            surfaced_at_ms,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// The `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    pub fn last_surfaced_ms(&self) -> Option<f64> {
        self.entries.last().map(|e| e.surfaced_at_ms)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThrottlePolicy {
    config: ThrottleConfig,
}

impl ThrottlePolicy {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    /// Minimum time since the last surfaced insight for a candidate of this priority
    pub fn cooldown_ms(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Urgent => 0.0,
            Priority::High => self.config.high_cooldown_ms,
            Priority::Medium | Priority::Low => self.config.default_cooldown_ms,
        }
    }

    /// Checks run in order; the first failing check names the reason
    pub fn evaluate(
        &self,
        candidate: &Insight,
        history: &InsightHistory,
        last_surfaced_ms: Option<f64>,
        now_ms: f64,
    ) -> ThrottleDecision {
        if candidate.priority == Priority::Low
            && history.len() > self.config.low_priority_history_limit
        {
            return ThrottleDecision::Suppress(SuppressReason::LowPriorityFatigue);
        }

        let duplicate = history.recent(self.config.dedup_window).iter().any(|entry| {
            entry.insight.insight_type == candidate.insight_type
                && entry.insight.title == candidate.title
        });
        if duplicate {
            return ThrottleDecision::Suppress(SuppressReason::Duplicate);
        }

        if candidate.metadata.confidence < self.config.min_confidence {
            return ThrottleDecision::Suppress(SuppressReason::LowConfidence);
        }

        if candidate.priority == Priority::Urgent {
            return ThrottleDecision::Surface;
        }

        match last_surfaced_ms {
            Some(last) if now_ms - last <= self.cooldown_ms(candidate.priority) => {
                ThrottleDecision::Suppress(SuppressReason::Cooldown)
            }
            _ => ThrottleDecision::Surface,
        }
    }
}
