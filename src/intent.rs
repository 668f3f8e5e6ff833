//! Intent prediction
//!
//! Classifies recent click targets by UI-role keywords and derives urgency, struggle tags
//! and the most likely next action.

use crate::capture::CaptureBuffers;
use crate::config::{ScoringConfig, DEFAULT_INTENT_WINDOW};
use crate::metrics::{backtrack_count, rapid_click_count};
use crate::types::{BehaviorMetrics, IntentCategory, StruggleTag, Urgency, UserIntent};
use std::collections::BTreeSet;

/// Keyword table, checked in order; the first keyword found in a target path decides
const CATEGORY_KEYWORDS: &[(&str, IntentCategory)] = &[
    ("search", IntentCategory::Searching),
    ("filter", IntentCategory::Filtering),
    ("button", IntentCategory::Acting),
    ("link", IntentCategory::Navigating),
    ("nav", IntentCategory::Navigating),
    ("opportunity-card", IntentCategory::Exploring),
    ("card", IntentCategory::Exploring),
];

/// Number of trailing clicks reported as secondary categories
const SECONDARY_WINDOW: usize = 3;

/// Estimated time to goal when no click cadence is known
const DEFAULT_TIME_TO_GOAL_MS: f64 = 30_000.0;

/// Struggle thresholds
const BACKTRACK_STRUGGLE: u32 = 3;
const RAPID_CLICK_STRUGGLE: u32 = 2;
const FINDING_CONTENT_SCROLLS: usize = 50;
const FINDING_CONTENT_MAX_CLICKS: usize = 5;
const FORM_COMPLETION_KEYS: usize = 20;
const FORM_COMPLETION_MAX_CLICKS: usize = 3;

/// Classify one target path
pub fn classify_target(target_path: &str) -> IntentCategory {
    let path = target_path.to_ascii_lowercase();
    if let Some((_, category)) = CATEGORY_KEYWORDS
        .iter()
        .find(|(keyword, _)| path.contains(keyword))
    {
        return *category;
    }
    // Anchors render as `a#id`, `a.class` or a bare `a` segment.
    let is_anchor = path
        .split(" > ")
        .any(|segment| segment == "a" || segment.starts_with("a#") || segment.starts_with("a."));
    if is_anchor {
        IntentCategory::Navigating
    } else {
        IntentCategory::Exploring
    }
}

/// Fixed map from intent category to predicted next action
pub fn next_action(category: IntentCategory) -> &'static str {
    match category {
        IntentCategory::Searching => "refine_search",
        IntentCategory::Filtering => "apply_filters",
        IntentCategory::Acting => "complete_task",
        IntentCategory::Navigating => "explore_section",
        IntentCategory::Exploring => "focus_content",
    }
}

#[derive(Debug, Clone)]
pub struct IntentPredictor {
    window: usize,
    scoring: ScoringConfig,
}

impl Default for IntentPredictor {
    fn default() -> Self {
        Self::new(DEFAULT_INTENT_WINDOW, ScoringConfig::default())
    }
}

impl IntentPredictor {
    pub fn new(window: usize, scoring: ScoringConfig) -> Self {
        Self {
            window: window.max(1),
            scoring,
        }
    }

    pub fn predict(&self, buffers: &CaptureBuffers, metrics: &BehaviorMetrics) -> UserIntent {
        let categories: Vec<IntentCategory> = buffers
            .clicks
            .recent(self.window)
            .map(|click| classify_target(&click.target_path))
            .collect();

        let (primary_category, confidence) = modal_category(&categories);
        let secondary_categories =
            categories[categories.len().saturating_sub(SECONDARY_WINDOW)..].to_vec();

        let estimated_time_to_goal_ms = if metrics.average_task_time_ms > 0.0 {
            metrics.average_task_time_ms * 1.5
        } else {
            DEFAULT_TIME_TO_GOAL_MS
        };

        UserIntent {
            primary_category,
            secondary_categories,
            confidence,
            urgency: Urgency::from_frustration(metrics.frustration_score),
            struggling_with: self.struggles(buffers),
            predicted_next_action: next_action(primary_category).to_string(),
            estimated_time_to_goal_ms,
        }
    }

    /// Independent rule checks; each adds at most one tag
    fn struggles(&self, buffers: &CaptureBuffers) -> BTreeSet<StruggleTag> {
        let mut tags = BTreeSet::new();
        let clicks = buffers.clicks.len();

        if backtrack_count(buffers.clicks.iter()) > BACKTRACK_STRUGGLE {
            tags.insert(StruggleTag::Navigation);
        }
        if rapid_click_count(buffers.clicks.iter(), &self.scoring) > RAPID_CLICK_STRUGGLE {
            tags.insert(StruggleTag::InterfaceConfusion);
        }
        if buffers.scroll.len() > FINDING_CONTENT_SCROLLS && clicks < FINDING_CONTENT_MAX_CLICKS {
            tags.insert(StruggleTag::FindingContent);
        }
        if buffers.keyboard.len() > FORM_COMPLETION_KEYS && clicks < FORM_COMPLETION_MAX_CLICKS {
            tags.insert(StruggleTag::FormCompletion);
        }
        tags
    }
}

/// Most frequent category and its share of the window. Ties go to the category clicked
/// most recently. An empty window is `exploring` with zero confidence.
fn modal_category(categories: &[IntentCategory]) -> (IntentCategory, f64) {
    if categories.is_empty() {
        return (IntentCategory::Exploring, 0.0);
    }

    let mut best = (IntentCategory::Exploring, 0usize, 0usize);
    for (position, category) in categories.iter().enumerate() {
        let count = categories.iter().filter(|c| *c == category).count();
        let last_seen = categories.iter().rposition(|c| c == category).unwrap_or(position);
        if count > best.1 || (count == best.1 && last_seen > best.2) {
            best = (*category, count, last_seen);
        }
    }

    (best.0, best.1 as f64 / categories.len() as f64)
}
