//! Insight generation
//!
//! Two strategies tried in order: an optional remote [`InferenceClient`] and the local
//! [`FALLBACK_RULES`] table. Remote failures of any kind degrade silently to the rules.

mod behavior_log;
mod remote;
mod rules;
mod slot;

pub use behavior_log::{parse_log_response, BehaviorLogClient};
pub use remote::{build_analysis_prompt, parse_completion, ChatCompletionClient, SYSTEM_PROMPT};
pub use rules::{fallback_insight, matching_rule, FallbackRule, FALLBACK_RULES};
pub use slot::{RequestSlot, SlotAction};

use crate::error::GuideError;
use crate::types::{BehaviorAnalysis, Insight};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A remote text-generation backend that turns an analysis into an insight
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, analysis: &BehaviorAnalysis) -> Result<Insight, GuideError>;

    /// Short label used in logs
    fn name(&self) -> &str {
        "inference"
    }
}

/// Which strategy produced an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Remote,
    Fallback,
    BehaviorLog,
}

/// Result of one generation attempt
#[derive(Debug, Clone)]
pub struct Generated {
    pub sequence: u64,
    pub insight: Option<Insight>,
    pub source: InsightSource,
}

/// Remote-first insight generator with a local fallback
#[derive(Clone)]
pub struct InsightGenerator {
    remote: Option<Arc<dyn InferenceClient>>,
    timeout: Duration,
}

impl InsightGenerator {
    /// Fallback rules only
    pub fn local() -> Self {
        Self {
            remote: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_remote(client: Arc<dyn InferenceClient>, timeout: Duration) -> Self {
        Self {
            remote: Some(client),
            timeout,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Produce at most one insight for the analysis. Never fails.
    pub async fn generate(&self, analysis: &BehaviorAnalysis) -> Generated {
        if let Some(client) = &self.remote {
            match self.try_remote(client.as_ref(), analysis).await {
                Ok(insight) => {
                    return Generated {
                        sequence: analysis.sequence,
                        insight: Some(insight),
                        source: InsightSource::Remote,
                    }
                }
                Err(e) => {
                    warn!(
                        client = client.name(),
                        sequence = analysis.sequence,
                        error = %e,
                        "remote inference failed, using fallback rules"
                    );
                }
            }
        }

        Generated {
            sequence: analysis.sequence,
            insight: fallback_insight(analysis),
            source: InsightSource::Fallback,
        }
    }

    async fn try_remote(
        &self,
        client: &dyn InferenceClient,
        analysis: &BehaviorAnalysis,
    ) -> Result<Insight, GuideError> {
        let insight = tokio::time::timeout(self.timeout, client.infer(analysis))
            .await
            .map_err(|_| GuideError::Timeout(self.timeout.as_millis() as u64))??;
        insight.validate()?;
        Ok(insight)
    }
}

impl std::fmt::Debug for InsightGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightGenerator")
            .field("remote", &self.remote.as_ref().map(|c| c.name().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted inference backend
    pub enum MockBehavior {
        Respond(Insight),
        Fail,
        Hang,
        Delay(Duration, Insight),
    }

    pub struct MockInference {
        pub behavior: MockBehavior,
        pub calls: AtomicUsize,
        /// Content context of every analysis received
        pub contexts: Mutex<Vec<Option<serde_json::Value>>>,
    }

    impl MockInference {
        pub fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                contexts: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn contexts(&self) -> Vec<Option<serde_json::Value>> {
            self.contexts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InferenceClient for MockInference {
        async fn infer(&self, analysis: &BehaviorAnalysis) -> Result<Insight, GuideError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(analysis.content_context.clone());
            match &self.behavior {
                MockBehavior::Respond(insight) => Ok(insight.clone()),
                MockBehavior::Fail => Err(GuideError::RemoteStatus(503)),
                MockBehavior::Hang => std::future::pending().await,
                MockBehavior::Delay(delay, insight) => {
                    tokio::time::sleep(*delay).await;
                    Ok(insight.clone())
                }
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MockBehavior, MockInference};
    use super::*;
    use crate::types::{
        ActionKind, BehaviorMetrics, InsightAction, InsightMetadata, InsightType, PatternSummary,
        Priority, ScrollBehavior, ScrollPattern, UserIntent,
    };
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn frustrated_analysis() -> BehaviorAnalysis {
        BehaviorAnalysis {
            sequence: 3,
            analysis_id: "a-3".to_string(),
            created_at: Utc::now(),
            session_duration_ms: 400_000.0,
            events: Vec::new(),
            metrics: BehaviorMetrics {
                frustration_score: 0.8,
                click_count: 2,
                session_duration_ms: 400_000.0,
                ..BehaviorMetrics::default()
            },
            intent: UserIntent::default(),
            patterns: PatternSummary {
                scroll_pattern: ScrollPattern::Minimal,
                scroll_behavior: ScrollBehavior::Reading,
                pointer_pausing: false,
                click_depth: 2,
                mean_key_hold_ms: 0.0,
            },
            anomalies: Vec::new(),
            recommendations: Vec::new(),
            content_context: None,
        }
    }

    fn remote_insight() -> Insight {
        Insight {
            insight_type: InsightType::Warning,
            priority: Priority::Urgent,
            title: "Unsaved changes".to_string(),
            message: "Save before leaving.".to_string(),
            actions: vec![InsightAction::new("save", "Save", ActionKind::Highlight, Some("#save"))],
            metadata: InsightMetadata {
                confidence: 0.9,
                reasoning: "remote".to_string(),
                trigger_conditions: Vec::new(),
                estimated_impact: 0.7,
            },
        }
    }

    #[tokio::test]
    async fn test_local_generator_uses_rules() {
        let generated = InsightGenerator::local().generate(&frustrated_analysis()).await;
        assert_eq!(generated.source, InsightSource::Fallback);
        assert_eq!(generated.sequence, 3);
        assert_eq!(generated.insight.map(|i| i.priority), Some(Priority::High));
    }

    #[tokio::test]
    async fn test_remote_success() {
        let mock = MockInference::new(MockBehavior::Respond(remote_insight()));
        let generator = InsightGenerator::with_remote(mock.clone(), Duration::from_secs(8));

        let generated = generator.generate(&frustrated_analysis()).await;
        assert_eq!(generated.source, InsightSource::Remote);
        assert_eq!(generated.insight, Some(remote_insight()));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_degrades() {
        let mock = MockInference::new(MockBehavior::Fail);
        let generator = InsightGenerator::with_remote(mock, Duration::from_secs(8));

        let generated = generator.generate(&frustrated_analysis()).await;
        assert_eq!(generated.source, InsightSource::Fallback);
        assert_eq!(generated.insight.map(|i| i.title), Some("Need Expert Assistance?".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_remote_insight_degrades() {
        let mut bad = remote_insight();
        bad.metadata.confidence = 7.0;
        let generator = InsightGenerator::with_remote(
            MockInference::new(MockBehavior::Respond(bad)),
            Duration::from_secs(8),
        );

        let generated = generator.generate(&frustrated_analysis()).await;
        assert_eq!(generated.source, InsightSource::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_is_bounded() {
        let generator = InsightGenerator::with_remote(
            MockInference::new(MockBehavior::Hang),
            Duration::from_millis(8_000),
        );

        let started = tokio::time::Instant::now();
        let generated = generator.generate(&frustrated_analysis()).await;

        assert_eq!(generated.source, InsightSource::Fallback);
        assert!(generated.insight.is_some());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(8_000));
        assert!(elapsed < Duration::from_millis(8_100));
    }
}
