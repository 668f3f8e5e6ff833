//! Core data types
//!
//! Snapshots that flow from the aggregator to the insight generator, and the insight
//! payload delivered to UI consumers. Capture-side records live in [`crate::capture`].

use crate::capture::QueuedEvent;
use crate::error::GuideError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// Behavior snapshots
// ============================================================================

/// Aggregated behavioral metrics, recomputed from the buffers on every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorMetrics {
    /// Time since the capture session started
    pub session_duration_ms: f64,
    /// Sum of Euclidean pointer steps across the pointer buffer
    pub pointer_distance_px: f64,
    /// Sum of vertical scroll steps across the scroll buffer
    pub scroll_distance_px: f64,
    pub click_count: u32,
    pub keystroke_count: u32,
    /// Estimated time spent with the pointer nearly still
    pub hesitation_ms: f64,
    pub backtrack_count: u32,
    /// Mean interval between consecutive clicks
    pub average_task_time_ms: f64,
    /// Frustration estimate (0-1)
    pub frustration_score: f64,
    /// Engagement estimate (0-1)
    pub engagement_score: f64,
    /// Decisiveness estimate (0-1)
    pub confidence_score: f64,
}

/// Dominant interaction category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Searching,
    Filtering,
    Navigating,
    Acting,
    Exploring,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Searching => "searching",
            IntentCategory::Filtering => "filtering",
            IntentCategory::Navigating => "navigating",
            IntentCategory::Acting => "acting",
            IntentCategory::Exploring => "exploring",
        }
    }
}

/// How urgently the user seems to need help
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Derive urgency from the frustration score alone
    pub fn from_frustration(frustration_score: f64) -> Self {
        if frustration_score > 0.7 {
            Urgency::Critical
        } else if frustration_score > 0.5 {
            Urgency::High
        } else if frustration_score > 0.3 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

/// Things the user appears to be struggling with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StruggleTag {
    Navigation,
    InterfaceConfusion,
    FindingContent,
    FormCompletion,
}

impl StruggleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StruggleTag::Navigation => "navigation",
            StruggleTag::InterfaceConfusion => "interface_confusion",
            StruggleTag::FindingContent => "finding_content",
            StruggleTag::FormCompletion => "form_completion",
        }
    }
}

/// Predicted user intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIntent {
    pub primary_category: IntentCategory,
    /// Categories of the most recent clicks, oldest first
    pub secondary_categories: Vec<IntentCategory>,
    /// Share of the recent window taken by the primary category (0-1)
    pub confidence: f64,
    pub urgency: Urgency,
    pub struggling_with: BTreeSet<StruggleTag>,
    pub predicted_next_action: String,
    pub estimated_time_to_goal_ms: f64,
}

impl Default for UserIntent {
    fn default() -> Self {
        Self {
            primary_category: IntentCategory::Exploring,
            secondary_categories: Vec::new(),
            confidence: 0.0,
            urgency: Urgency::Low,
            struggling_with: BTreeSet::new(),
            predicted_next_action: "focus_content".to_string(),
            estimated_time_to_goal_ms: 30_000.0,
        }
    }
}

/// Kinds of statistically unusual sub-sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ErraticMouse,
    StuckScrolling,
}

/// An informational anomaly tag attached to an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// Number of samples (or run length) that triggered the tag
    pub count: u32,
}

/// Shape of recent scrolling direction changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPattern {
    Minimal,
    Reviewing,
    Linear,
    Mixed,
}

/// Speed class of recent scrolling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollBehavior {
    Reading,
    Browsing,
    Scanning,
}

/// Descriptive interaction patterns included in the analysis payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub scroll_pattern: ScrollPattern,
    pub scroll_behavior: ScrollBehavior,
    /// Recent pointer motion is slow enough to suggest the user stopped to read
    pub pointer_pausing: bool,
    pub click_depth: u32,
    pub mean_key_hold_ms: f64,
}

/// Everything one aggregation cycle knows, handed to the insight generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorAnalysis {
    /// Strictly increasing per engine; used to discard stale remote responses
    pub sequence: u64,
    pub analysis_id: String,
    pub created_at: DateTime<Utc>,
    pub session_duration_ms: f64,
    /// Queue entries drained by this cycle
    pub events: Vec<QueuedEvent>,
    pub metrics: BehaviorMetrics,
    pub intent: UserIntent,
    pub patterns: PatternSummary,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<String>,
    /// Host description of what is on screen (viewport, content type, reading cues)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_context: Option<serde_json::Value>,
}

// ============================================================================
// Insights
// ============================================================================

/// Insight category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Guidance,
    Warning,
    Suggestion,
    HelpOffer,
}

/// Insight priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// What an insight action does when the user picks it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Highlight,
    Tutorial,
    External,
    Dismiss,
}

/// A user-selectable action attached to an insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightAction {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// CSS selector or URL, depending on the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl InsightAction {
    pub fn new(id: &str, label: &str, kind: ActionKind, target: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            target: target.map(str::to_string),
            data: None,
        }
    }
}

/// Provenance of an insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightMetadata {
    /// Generator confidence (0-1)
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default, alias = "triggerConditions")]
    pub trigger_conditions: Vec<String>,
    /// Expected usefulness (0-1)
    #[serde(default, alias = "estimatedImpact")]
    pub estimated_impact: f64,
}

/// A structured guidance message for the end user. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub actions: Vec<InsightAction>,
    pub metadata: InsightMetadata,
}

impl Insight {
    /// Check the fields a remote generator is most likely to get wrong
    pub fn validate(&self) -> Result<(), GuideError> {
        if self.title.trim().is_empty() {
            return Err(GuideError::MalformedResponse("insight title is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.metadata.confidence) {
            return Err(GuideError::MalformedResponse(format!(
                "confidence {} outside [0, 1]",
                self.metadata.confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.metadata.estimated_impact) {
            return Err(GuideError::MalformedResponse(format!(
                "estimated_impact {} outside [0, 1]",
                self.metadata.estimated_impact
            )));
        }
        Ok(())
    }

    /// Parse and validate an insight from JSON
    pub fn from_json(json: &str) -> Result<Self, GuideError> {
        let insight: Insight = serde_json::from_str(json)
            .map_err(|e| GuideError::MalformedResponse(e.to_string()))?;
        insight.validate()?;
        Ok(insight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_insight() -> Insight {
        Insight {
            insight_type: InsightType::HelpOffer,
            priority: Priority::High,
            title: "Need Expert Assistance?".to_string(),
            message: "Having trouble finding the right opportunities?".to_string(),
            actions: vec![
                InsightAction::new(
                    "get_expert_help",
                    "Get Expert Help",
                    ActionKind::Tutorial,
                    Some("#search-input"),
                ),
                InsightAction::new("dismiss_help", "Continue Searching", ActionKind::Dismiss, None),
            ],
            metadata: InsightMetadata {
                confidence: 0.8,
                reasoning: "High frustration score detected".to_string(),
                trigger_conditions: vec!["frustration_score > 0.7".to_string()],
                estimated_impact: 0.9,
            },
        }
    }

    #[test]
    fn test_insight_delivery_round_trip() {
        let insight = sample_insight();
        let json = serde_json::to_string(&insight).unwrap();
        let parsed: Insight = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, insight);
        assert_eq!(parsed.actions[0].id, "get_expert_help");
        assert_eq!(parsed.actions[1].id, "dismiss_help");
    }

    #[test]
    fn test_insight_wire_names() {
        let value = serde_json::to_value(sample_insight()).unwrap();
        assert_eq!(value["type"], "help_offer");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["actions"][0]["type"], "tutorial");
        assert!(value["actions"][1].get("target").is_none());
    }

    #[test]
    fn test_insight_accepts_camel_case_metadata() {
        let json = r##"{
            "type": "guidance",
            "priority": "medium",
            "title": "Try filters",
            "message": "Narrow the list down.",
            "actions": [{ "id": "show_filters", "label": "Show", "type": "highlight", "target": "#filter-panel" }],
            "metadata": {
                "confidence": 0.7,
                "reasoning": "browsing",
                "triggerConditions": ["scroll_distance > 1000px"],
                "estimatedImpact": 0.6
            }
        }"##;

        let insight = Insight::from_json(json).unwrap();
        assert_eq!(insight.metadata.trigger_conditions, vec!["scroll_distance > 1000px"]);
        assert_eq!(insight.metadata.estimated_impact, 0.6);
    }

    #[test]
    fn test_insight_validation() {
        let mut insight = sample_insight();
        insight.metadata.confidence = 1.4;
        assert!(insight.validate().is_err());

        let mut insight = sample_insight();
        insight.title = "  ".to_string();
        assert!(insight.validate().is_err());

        assert!(Insight::from_json(r#"{"type": "nonsense"}"#).is_err());
    }

    #[test]
    fn test_urgency_thresholds() {
        assert_eq!(Urgency::from_frustration(0.0), Urgency::Low);
        assert_eq!(Urgency::from_frustration(0.3), Urgency::Low);
        assert_eq!(Urgency::from_frustration(0.31), Urgency::Medium);
        assert_eq!(Urgency::from_frustration(0.6), Urgency::High);
        assert_eq!(Urgency::from_frustration(0.71), Urgency::Critical);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }
}
