//! Local fallback rules
//!
//! An ordered table of `(predicate, factory)` pairs evaluated top to bottom. The first rule
//! whose predicate holds produces the cycle's insight; when none does, the cycle is silent.

use crate::types::{
    ActionKind, BehaviorAnalysis, Insight, InsightAction, InsightMetadata, InsightType, Priority,
    StruggleTag,
};

/// One entry of the fallback table
pub struct FallbackRule {
    pub name: &'static str,
    pub applies: fn(&BehaviorAnalysis) -> bool,
    pub build: fn(&BehaviorAnalysis) -> Insight,
}

impl std::fmt::Debug for FallbackRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRule").field("name", &self.name).finish()
    }
}

/// Rule precedence, highest first
pub static FALLBACK_RULES: &[FallbackRule] = &[
    FallbackRule {
        name: "deep_engagement",
        applies: is_deeply_engaged,
        build: deep_engagement,
    },
    FallbackRule {
        name: "browsing_many",
        applies: is_browsing_many,
        build: browsing_many,
    },
    FallbackRule {
        name: "frustration_help",
        applies: is_frustrated,
        build: frustration_help,
    },
    FallbackRule {
        name: "finding_content",
        applies: is_struggling_to_find,
        build: finding_content,
    },
    FallbackRule {
        name: "keep_alive",
        applies: is_minimally_active,
        build: keep_alive,
    },
];

fn is_deeply_engaged(a: &BehaviorAnalysis) -> bool {
    a.metrics.engagement_score > 0.6 && a.session_duration_ms > 30_000.0
}

fn is_browsing_many(a: &BehaviorAnalysis) -> bool {
    a.metrics.scroll_distance_px > 1_000.0 && a.metrics.click_count > 5
}

fn is_frustrated(a: &BehaviorAnalysis) -> bool {
    a.metrics.frustration_score > 0.7
}

fn is_struggling_to_find(a: &BehaviorAnalysis) -> bool {
    a.metrics.engagement_score < 0.3
        && a.intent.struggling_with.contains(&StruggleTag::FindingContent)
}

/// At least one click and a few seconds of session
fn is_minimally_active(a: &BehaviorAnalysis) -> bool {
    a.metrics.click_count >= 1 && a.session_duration_ms > 5_000.0
}

/// First matching rule, if any
pub fn matching_rule(analysis: &BehaviorAnalysis) -> Option<&'static FallbackRule> {
    FALLBACK_RULES.iter().find(|rule| (rule.applies)(analysis))
}

/// Produce at most one insight from the local rule table
pub fn fallback_insight(analysis: &BehaviorAnalysis) -> Option<Insight> {
    matching_rule(analysis).map(|rule| (rule.build)(analysis))
}

fn metadata(
    confidence: f64,
    reasoning: &str,
    triggers: &[&str],
    estimated_impact: f64,
) -> InsightMetadata {
    InsightMetadata {
        confidence,
        reasoning: reasoning.to_string(),
        trigger_conditions: triggers.iter().map(|t| t.to_string()).collect(),
        estimated_impact,
    }
}

fn deep_engagement(_analysis: &BehaviorAnalysis) -> Insight {
    Insight {
        insight_type: InsightType::Suggestion,
        priority: Priority::Medium,
        title: "Expert Insight Available".to_string(),
        message: "Based on your reading patterns, targeted recommendations for your sector are \
                  ready. Would you like personalized suggestions?"
            .to_string(),
        actions: vec![
            InsightAction::new(
                "get_recommendations",
                "Get Recommendations",
                ActionKind::Tutorial,
                Some("#opportunity-grid"),
            ),
            InsightAction::new("dismiss", "Maybe Later", ActionKind::Dismiss, None),
        ],
        metadata: metadata(
            0.9,
            "High engagement with content reading detected",
            &["engagement_score > 0.6", "session_duration > 30s"],
            0.8,
        ),
    }
}

fn browsing_many(_analysis: &BehaviorAnalysis) -> Insight {
    Insight {
        insight_type: InsightType::Guidance,
        priority: Priority::Medium,
        title: "Browsing Multiple Opportunities?".to_string(),
        message: "You're exploring several options. Try using filters to narrow down the ones \
                  that match your focus."
            .to_string(),
        actions: vec![
            InsightAction::new(
                "show_filters",
                "Show Filter Options",
                ActionKind::Highlight,
                Some("#filter-panel"),
            ),
            InsightAction::new("dismiss", "Continue Browsing", ActionKind::Dismiss, None),
        ],
        metadata: metadata(
            0.7,
            "Active browsing behavior with multiple interactions",
            &["scroll_distance > 1000px", "click_count > 5"],
            0.6,
        ),
    }
}

fn frustration_help(_analysis: &BehaviorAnalysis) -> Insight {
    Insight {
        insight_type: InsightType::HelpOffer,
        priority: Priority::High,
        title: "Need Expert Assistance?".to_string(),
        message: "Having trouble finding the right opportunities? Guided search can help you \
                  discover what matches your needs."
            .to_string(),
        actions: vec![
            InsightAction::new(
                "get_expert_help",
                "Get Expert Help",
                ActionKind::Tutorial,
                Some("#search-input"),
            ),
            InsightAction::new("dismiss_help", "Continue Searching", ActionKind::Dismiss, None),
        ],
        metadata: metadata(
            0.8,
            "High frustration score detected",
            &["frustration_score > 0.7"],
            0.9,
        ),
    }
}

fn finding_content(_analysis: &BehaviorAnalysis) -> Insight {
    Insight {
        insight_type: InsightType::Suggestion,
        priority: Priority::Medium,
        title: "Try our smart search features".to_string(),
        message: "Use filters like sector, amount and deadline to find exactly what you need."
            .to_string(),
        actions: vec![
            InsightAction::new(
                "show_filters",
                "Show Filters",
                ActionKind::Highlight,
                Some(".filter-panel"),
            ),
            InsightAction::new("dismiss", "Got it", ActionKind::Dismiss, None),
        ],
        metadata: metadata(
            0.7,
            "Low engagement with content finding struggle",
            &["low_engagement", "finding_content_struggle"],
            0.6,
        ),
    }
}

fn keep_alive(_analysis: &BehaviorAnalysis) -> Insight {
    Insight {
        insight_type: InsightType::Guidance,
        priority: Priority::Low,
        title: "Guidance Active".to_string(),
        message: "Your activity is being analyzed to tailor recommendations. Keep exploring to \
                  receive targeted suggestions."
            .to_string(),
        actions: vec![
            InsightAction::new(
                "continue_exploring",
                "Continue Exploring",
                ActionKind::Dismiss,
                None,
            ),
            InsightAction::new(
                "get_help",
                "Get Expert Help",
                ActionKind::Tutorial,
                Some("#opportunity-grid"),
            ),
        ],
        metadata: metadata(
            0.5,
            "Active user engagement detected",
            &["click_count >= 1", "session_duration > 5s"],
            0.4,
        ),
    }
}
