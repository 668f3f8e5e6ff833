//! Pipeline orchestration
//!
//! [`GuidancePipeline`] is the synchronous core of the engine: capture, aggregation, local
//! insight generation and throttling, with the clock passed in explicitly. It performs no
//! I/O and never blocks, so hosts without an async runtime (the CLI replay, the C ABI) can
//! drive it directly.

use crate::bus::{ActiveEntry, ActiveInsight, InsightEvent};
use crate::capture::{CaptureBuffers, CaptureOutcome, EventCapture, HostEvent};
use crate::config::GuideConfig;
use crate::insight::fallback_insight;
use crate::intent::IntentPredictor;
use crate::metrics::MetricsAggregator;
use crate::patterns::{recommendations, PatternDetector};
use crate::throttle::{InsightHistory, ThrottleDecision, ThrottlePolicy};
use crate::types::{Anomaly, BehaviorAnalysis, BehaviorMetrics, Insight, UserIntent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Latest scores and intent, kept after every aggregation cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub sequence: u64,
    pub session_duration_ms: f64,
    pub metrics: BehaviorMetrics,
    pub intent: UserIntent,
    pub anomalies: Vec<Anomaly>,
}

/// Running counters for one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub events: u64,
    pub analyses: u64,
    pub surfaced: u64,
    pub suppressed: u64,
}

/// Synchronous guidance pipeline for one session
#[derive(Debug, Clone)]
pub struct GuidancePipeline {
    capture: EventCapture,
    aggregator: MetricsAggregator,
    predictor: IntentPredictor,
    detector: PatternDetector,
    throttle: ThrottlePolicy,
    history: InsightHistory,
    active: ActiveInsight,
    sequence: u64,
    latest: Option<AnalysisSnapshot>,
    content_context: Option<serde_json::Value>,
    stats: PipelineStats,
}

impl Default for GuidancePipeline {
    fn default() -> Self {
        Self::new(&GuideConfig::default())
    }
}

impl GuidancePipeline {
    /// Create a pipeline whose session starts with the first recorded event
    pub fn new(config: &GuideConfig) -> Self {
        Self {
            capture: EventCapture::new(&config.buffers, config.eager_flush_threshold),
            aggregator: MetricsAggregator::new(config.scoring.clone()),
            predictor: IntentPredictor::new(config.intent_window, config.scoring.clone()),
            detector: PatternDetector::new(config.scoring.clone()),
            throttle: ThrottlePolicy::new(config.throttle.clone()),
            history: InsightHistory::new(),
            active: ActiveInsight::new(config.active_policy),
            sequence: 0,
            latest: None,
            content_context: None,
            stats: PipelineStats::default(),
        }
    }

    /// Pin the session start
    pub fn with_session_start(mut self, session_start_ms: f64) -> Self {
        self.capture = self.capture.with_session_start(session_start_ms);
        self
    }

    /// Capture one host event
    pub fn record(&mut self, event: &HostEvent, now_ms: f64) -> CaptureOutcome {
        self.stats.events += 1;
        self.capture.record(event, now_ms)
    }

    /// Run one aggregation cycle over the current buffers.
    ///
    /// Returns `None` when nothing was queued since the previous cycle.
    pub fn analyze(&mut self, now_ms: f64) -> Option<BehaviorAnalysis> {
        if self.capture.queue_len() == 0 {
            return None;
        }

        let events = self.capture.drain_queue();
        let session_duration_ms = self.capture.session_ms(now_ms);
        let buffers = self.capture.snapshot();

        // Stage 1: Scalar metrics and scores
        let metrics = self.aggregator.compute(buffers, session_duration_ms);

        // Stage 2: Intent
        let intent = self.predictor.predict(buffers, &metrics);

        // Stage 3: Patterns, anomalies and recommendation tags
        let patterns = self.detector.summarize(buffers);
        let anomalies = self.detector.anomalies(buffers);
        let recommendations = recommendations(&metrics, &intent);

        self.sequence += 1;
        self.stats.analyses += 1;
        self.latest = Some(AnalysisSnapshot {
            sequence: self.sequence,
            session_duration_ms,
            metrics: metrics.clone(),
            intent: intent.clone(),
            anomalies: anomalies.clone(),
        });

        debug!(
            sequence = self.sequence,
            events = events.len(),
            frustration = metrics.frustration_score,
            engagement = metrics.engagement_score,
            confidence = metrics.confidence_score,
            "analysis cycle complete"
        );

        Some(BehaviorAnalysis {
            sequence: self.sequence,
            analysis_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            session_duration_ms,
            events,
            metrics,
            intent,
            patterns,
            anomalies,
            recommendations,
            content_context: self.content_context.clone(),
        })
    }

    /// Pass a candidate through the throttle. A surfaced insight is recorded in the history,
    /// offered to the active slot and returned wrapped in its delivery event.
    pub fn surface(&mut self, candidate: Insight, now_ms: f64) -> Option<InsightEvent> {
        let decision = self
            .throttle
            .evaluate(&candidate, &self.history, self.history.last_surfaced_ms(), now_ms);

        if let ThrottleDecision::Suppress(reason) = decision {
            self.stats.suppressed += 1;
            debug!(title = %candidate.title, ?reason, "insight suppressed");
            return None;
        }

        self.stats.surfaced += 1;
        self.history.push(candidate.clone(), now_ms);
        let event = InsightEvent::new(candidate);
        let became_active = self.active.offer(&event.event_id, &event.insight);
        debug!(title = %event.insight.title, became_active, "insight surfaced");
        Some(event)
    }

    /// Analyze, apply the local rules and throttle, all in one step
    pub fn process_local(&mut self, now_ms: f64) -> Option<InsightEvent> {
        let analysis = self.analyze(now_ms)?;
        let candidate = fallback_insight(&analysis)?;
        self.surface(candidate, now_ms)
    }

    /// Whether a result computed for `sequence` is older than the latest analysis
    pub fn is_stale(&self, sequence: u64) -> bool {
        sequence < self.sequence
    }

    /// Sequence of the latest analysis (0 before the first cycle)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Attach a host description of the visible content to every following analysis.
    /// `None` clears it.
    pub fn set_content_context(&mut self, context: Option<serde_json::Value>) {
        self.content_context = context;
    }

    pub fn content_context(&self) -> Option<&serde_json::Value> {
        self.content_context.as_ref()
    }

    pub fn latest(&self) -> Option<&AnalysisSnapshot> {
        self.latest.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn buffers(&self) -> &CaptureBuffers {
        self.capture.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.capture.queue_len()
    }

    pub fn session_ms(&self, now_ms: f64) -> f64 {
        self.capture.session_ms(now_ms)
    }

    pub fn history(&self) -> &InsightHistory {
        &self.history
    }

    /// Forget surfaced insights and the active one
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.active.clear();
    }

    pub fn active(&self) -> Option<&ActiveEntry> {
        self.active.current()
    }

    /// The UI consumed or dismissed an insight
    pub fn acknowledge(&mut self, event_id: &str) -> bool {
        self.active.acknowledge(event_id)
    }
}
