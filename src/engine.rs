//! Async guidance engine
//!
//! [`GuidanceEngine`] wraps a [`GuidancePipeline`] in a single run loop: captured events,
//! the aggregation tick and remote completions are all handled by one task, so the
//! pipeline is only ever touched from one place. Remote work runs in spawned tasks and
//! reports back over a channel; capture continues while it is in flight.

use crate::bus::{DeliveryBus, InsightEvent};
use crate::capture::{EventKind, EventSink, HostEvent, InputSource, Subscription};
use crate::config::GuideConfig;
use crate::error::GuideError;
use crate::insight::{
    fallback_insight, BehaviorLogClient, ChatCompletionClient, Generated, InferenceClient,
    InsightGenerator, InsightSource, RequestSlot, SlotAction,
};
use crate::pipeline::{AnalysisSnapshot, GuidancePipeline, PipelineStats};
use crate::types::{BehaviorAnalysis, Insight};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Captured events waiting for the run loop. Events arriving while it is full are dropped.
const EVENT_CHANNEL_CAP: usize = 1_024;

const COMPLETION_CHANNEL_CAP: usize = 16;

const ACK_CHANNEL_CAP: usize = 32;

/// Remote timeout used when an inference client is injected without a remote config
const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Latest state published by the run loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub analysis: Option<AnalysisSnapshot>,
    pub stats: PipelineStats,
    /// Event id of the insight currently presented, if any
    pub active_event_id: Option<String>,
    /// Sequence of the remote request in flight, if any
    pub in_flight: Option<u64>,
}

/// Explicit engine object owning the capture subscriptions and the run loop
pub struct GuidanceEngine {
    config: GuideConfig,
    generator: InsightGenerator,
    behavior_log: Option<Arc<BehaviorLogClient>>,
    bus: DeliveryBus,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    context_tx: watch::Sender<Option<serde_json::Value>>,
    subscriptions: Vec<Subscription>,
    ack_tx: Option<mpsc::Sender<String>>,
    cancel_token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl GuidanceEngine {
    /// Build an engine from a validated configuration.
    ///
    /// A `remote` section installs a [`ChatCompletionClient`]; a `behavior_log` section
    /// installs a [`BehaviorLogClient`].
    pub fn new(config: GuideConfig) -> Result<Self, GuideError> {
        config.validate()?;

        let generator = match &config.remote {
            Some(remote) => InsightGenerator::with_remote(
                Arc::new(ChatCompletionClient::new(remote.clone())?),
                Duration::from_millis(remote.timeout_ms),
            ),
            None => InsightGenerator::local(),
        };
        let behavior_log = match &config.behavior_log {
            Some(log) => Some(Arc::new(BehaviorLogClient::new(log.clone())?)),
            None => None,
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        let (context_tx, _) = watch::channel(None);
        Ok(Self {
            config,
            generator,
            behavior_log,
            bus: DeliveryBus::default(),
            snapshot_tx,
            snapshot_rx,
            context_tx,
            subscriptions: Vec::new(),
            ack_tx: None,
            cancel_token: None,
            handle: None,
        })
    }

    /// Replace the remote backend
    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        let timeout = self
            .config
            .remote
            .as_ref()
            .map(|r| Duration::from_millis(r.timeout_ms))
            .unwrap_or(DEFAULT_INFERENCE_TIMEOUT);
        self.generator = InsightGenerator::with_remote(client, timeout);
        self
    }

    pub fn with_behavior_log(mut self, client: BehaviorLogClient) -> Self {
        self.behavior_log = Some(Arc::new(client));
        self
    }

    pub fn config(&self) -> &GuideConfig {
        &self.config
    }

    /// Delivery bus; subscribe before `start` to see every insight
    pub fn bus(&self) -> &DeliveryBus {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Latest metrics, intent and counters
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified after every aggregation cycle and surfaced insight
    pub fn watch_snapshot(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to every event kind of `source` and spawn the run loop.
    ///
    /// Must be called from within a tokio runtime. The engine clock starts here; host
    /// timestamps are replaced by arrival times on that clock.
    pub fn start(&mut self, source: &dyn InputSource) -> Result<(), GuideError> {
        if self.handle.is_some() {
            return Err(GuideError::AlreadyRunning);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAP);
        let (ack_tx, ack_rx) = mpsc::channel(ACK_CHANNEL_CAP);
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAP);

        self.subscriptions = EventKind::ALL
            .iter()
            .map(|&kind| {
                let tx = event_tx.clone();
                let sink: EventSink = Arc::new(move |event: HostEvent| {
                    if tx.try_send(event).is_err() {
                        debug!(kind = kind.as_str(), "event channel full, dropping event");
                    }
                });
                source.subscribe(kind, sink)
            })
            .collect();
        drop(event_tx);

        let cancel_token = CancellationToken::new();
        let run_loop = RunLoop {
            pipeline: GuidancePipeline::new(&self.config).with_session_start(0.0),
            generator: self.generator.clone(),
            behavior_log: self.behavior_log.clone(),
            bus: self.bus.clone(),
            snapshot: self.snapshot_tx.clone(),
            slot: RequestSlot::new(),
            latest_analysis: None,
            content_context: self.context_tx.subscribe(),
            completion_tx,
            origin: Instant::now(),
        };
        let tick = Duration::from_millis(self.config.tick_interval_ms);

        self.handle = Some(tokio::spawn(run_loop.run(
            tick,
            cancel_token.clone(),
            event_rx,
            ack_rx,
            completion_rx,
        )));
        self.cancel_token = Some(cancel_token);
        self.ack_tx = Some(ack_tx);

        info!(
            kinds = EventKind::ALL.len(),
            tick_ms = self.config.tick_interval_ms,
            remote = self.generator.has_remote(),
            "guidance engine started"
        );
        Ok(())
    }

    /// Describe the content currently on screen. Every following analysis carries it;
    /// `None` clears it. May be called before `start`.
    pub fn set_content_context(&self, context: Option<serde_json::Value>) {
        self.context_tx.send_replace(context);
    }

    /// Report that the UI consumed or dismissed an insight. Returns whether the running
    /// loop accepted the notice.
    pub fn acknowledge(&self, event_id: &str) -> bool {
        self.ack_tx
            .as_ref()
            .is_some_and(|tx| tx.try_send(event_id.to_string()).is_ok())
    }

    /// Stop the tick, remove every input subscription and wait for the loop to exit.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.subscriptions.clear();
        self.ack_tx = None;

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "guidance loop failed to join");
            }
            info!("guidance engine stopped");
        }
    }

    /// Teardown; same as [`stop`](Self::stop)
    pub async fn destroy(&mut self) {
        self.stop().await;
    }
}

impl Drop for GuidanceEngine {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for GuidanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuidanceEngine")
            .field("generator", &self.generator)
            .field("behavior_log", &self.behavior_log.as_ref().map(|c| c.endpoint().to_string()))
            .field("subscriptions", &self.subscriptions.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Result of a spawned remote task
enum Completion {
    Inference(Generated),
    BehaviorLog {
        sequence: u64,
        result: Result<Option<Insight>, GuideError>,
    },
}

/// State owned by the spawned loop
struct RunLoop {
    pipeline: GuidancePipeline,
    generator: InsightGenerator,
    behavior_log: Option<Arc<BehaviorLogClient>>,
    bus: DeliveryBus,
    snapshot: watch::Sender<EngineSnapshot>,
    slot: RequestSlot,
    /// Newest analysis, kept for the local rules when a remote attempt fails
    latest_analysis: Option<BehaviorAnalysis>,
    content_context: watch::Receiver<Option<serde_json::Value>>,
    completion_tx: mpsc::Sender<Completion>,
    origin: Instant,
}

impl RunLoop {
    async fn run(
        mut self,
        tick: Duration,
        cancel_token: CancellationToken,
        mut events: mpsc::Receiver<HostEvent>,
        mut acks: mpsc::Receiver<String>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        let mut ticker = tokio::time::interval_at(self.origin + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.publish_snapshot(true);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!("guidance loop shutting down");
                    break;
                }
                Some(mut event) = events.recv() => {
                    event.timestamp_ms = None;
                    let outcome = self.pipeline.record(&event, self.now_ms());
                    if outcome.flush_due {
                        self.run_cycle();
                    }
                }
                Some(done) = completions.recv() => self.on_completion(done),
                Some(event_id) = acks.recv() => {
                    if self.pipeline.acknowledge(&event_id) {
                        self.publish_snapshot(true);
                    }
                }
                _ = ticker.tick() => self.run_cycle(),
            }
        }

        self.publish_snapshot(false);
    }

    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    /// One aggregation cycle. Silent when nothing was captured since the last one.
    fn run_cycle(&mut self) {
        let context = self.content_context.borrow_and_update().clone();
        self.pipeline.set_content_context(context);
        let Some(analysis) = self.pipeline.analyze(self.now_ms()) else {
            return;
        };

        if let Some(client) = &self.behavior_log {
            self.spawn_behavior_log(Arc::clone(client), analysis.clone());
        }

        if self.generator.has_remote() {
            self.latest_analysis = Some(analysis.clone());
            match self.slot.submit(analysis) {
                SlotAction::Dispatch(analysis) => self.dispatch(analysis),
                SlotAction::Queued { replaced } => {
                    debug!(
                        in_flight = ?self.slot.in_flight(),
                        ?replaced,
                        "inference in flight, analysis queued"
                    );
                }
            }
        } else if let Some(candidate) = fallback_insight(&analysis) {
            self.deliver(candidate);
        }

        self.publish_snapshot(true);
    }

    fn dispatch(&self, analysis: BehaviorAnalysis) {
        let generator = self.generator.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let generated = generator.generate(&analysis).await;
            let _ = tx.send(Completion::Inference(generated)).await;
        });
    }

    fn spawn_behavior_log(&self, client: Arc<BehaviorLogClient>, analysis: BehaviorAnalysis) {
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = client.submit(&analysis).await;
            let _ = tx
                .send(Completion::BehaviorLog {
                    sequence: analysis.sequence,
                    result,
                })
                .await;
        });
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Inference(generated) => {
                if let Some(next) = self.slot.complete() {
                    self.dispatch(next);
                }
                let stale = self.pipeline.is_stale(generated.sequence);
                let candidate = match generated.source {
                    InsightSource::Remote if stale => {
                        debug!(
                            sequence = generated.sequence,
                            latest = self.pipeline.sequence(),
                            "discarding stale inference result"
                        );
                        None
                    }
                    // remote failed on an older analysis: rules over the newest one
                    InsightSource::Fallback if stale => {
                        self.latest_analysis.as_ref().and_then(fallback_insight)
                    }
                    _ => generated.insight,
                };
                if let Some(insight) = candidate {
                    debug!(
                        source = ?generated.source,
                        sequence = generated.sequence,
                        "candidate insight"
                    );
                    self.deliver(insight);
                }
            }
            Completion::BehaviorLog { sequence, result } => match result {
                Ok(Some(insight)) if !self.pipeline.is_stale(sequence) => self.deliver(insight),
                Ok(_) => {}
                Err(e) => warn!(sequence, error = %e, "behavior log submission failed"),
            },
        }
        self.publish_snapshot(true);
    }

    fn deliver(&mut self, candidate: Insight) {
        if let Some(event) = self.pipeline.surface(candidate, self.now_ms()) {
            self.publish(event);
        }
    }

    fn publish(&self, event: InsightEvent) {
        let receivers = self.bus.publish_event(event);
        debug!(receivers, "insight published");
    }

    fn publish_snapshot(&self, running: bool) {
        let snapshot = EngineSnapshot {
            running,
            analysis: self.pipeline.latest().cloned(),
            stats: self.pipeline.stats(),
            active_event_id: self.pipeline.active().map(|a| a.event_id.clone()),
            in_flight: self.slot.in_flight(),
        };
        self.snapshot.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ElementNode, ElementTarget, LocalInputSource};
    use crate::insight::testing::{MockBehavior, MockInference};
    use crate::types::{ActionKind, InsightAction, InsightMetadata, InsightType, Priority};
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    fn click(id: &str) -> HostEvent {
        HostEvent::new(EventKind::Click).at(50.0, 50.0).with_target(ElementTarget::Element {
            chain: vec![ElementNode::new("button").with_id(id)],
        })
    }

    fn remote_insight() -> Insight {
        Insight {
            insight_type: InsightType::Suggestion,
            priority: Priority::Urgent,
            title: "Try saved searches".to_string(),
            message: "Save this search to come back later.".to_string(),
            actions: vec![InsightAction::new(
                "save",
                "Save search",
                ActionKind::Highlight,
                Some("#save"),
            )],
            metadata: InsightMetadata {
                confidence: 0.9,
                reasoning: "remote".to_string(),
                trigger_conditions: Vec::new(),
                estimated_impact: 0.6,
            },
        }
    }

    /// Click at 0 s and 5.5 s, then wait past the 6 s tick
    async fn two_clicks(source: &LocalInputSource) {
        source.emit(click("a"));
        sleep(Duration::from_millis(5_500)).await;
        source.emit(click("b"));
        sleep(Duration::from_millis(1_000)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_idempotent_stop() {
        let source = LocalInputSource::new();
        let mut engine = GuidanceEngine::new(GuideConfig::default()).unwrap();

        engine.start(&source).unwrap();
        assert_eq!(source.listener_count(), EventKind::ALL.len());
        assert!(matches!(engine.start(&source), Err(GuideError::AlreadyRunning)));

        engine.stop().await;
        assert_eq!(source.listener_count(), 0);
        assert!(!engine.is_running());
        assert!(!engine.snapshot().running);

        engine.destroy().await;
        assert_eq!(source.emit(click("late")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let source = LocalInputSource::new();
        let mut engine = GuidanceEngine::new(GuideConfig::default()).unwrap();
        engine.start(&source).unwrap();
        engine.stop().await;
        engine.start(&source).unwrap();
        assert_eq!(source.listener_count(), EventKind::ALL.len());
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_cycle_publishes_keep_alive() {
        let source = LocalInputSource::new();
        let mut engine = GuidanceEngine::new(GuideConfig::default()).unwrap();
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        two_clicks(&source).await;

        let event = insights.try_recv().expect("keep-alive insight");
        assert_eq!(event.insight.title, "Guidance Active");
        assert!(insights.try_recv().is_none());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.stats.surfaced, 1);
        assert_eq!(snapshot.active_event_id, Some(event.event_id.clone()));
        assert_eq!(snapshot.analysis.map(|a| a.metrics.click_count), Some(2));

        assert!(engine.acknowledge(&event.event_id));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.snapshot().active_event_id, None);

        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_insight_published() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Respond(remote_insight()));
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock.clone());
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        source.emit(click("a"));
        sleep(Duration::from_millis(2_500)).await;

        let event = insights.try_recv().expect("remote insight");
        assert_eq!(event.insight, remote_insight());
        assert_eq!(mock.calls(), 1);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_context_reaches_remote() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Respond(remote_insight()));
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock.clone());
        let context = serde_json::json!({ "content": { "type": "opportunity_list" } });
        engine.set_content_context(Some(context.clone()));
        engine.start(&source).unwrap();

        source.emit(click("a"));
        sleep(Duration::from_millis(2_500)).await;
        engine.set_content_context(None);
        source.emit(click("b"));
        sleep(Duration::from_millis(2_000)).await;

        assert_eq!(mock.contexts(), vec![Some(context), None]);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_degrades_to_rules() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Fail);
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock.clone());
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        two_clicks(&source).await;

        let event = insights.try_recv().expect("fallback insight");
        assert_eq!(event.insight.title, "Guidance Active");
        assert_eq!(mock.calls(), 2);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_discarded() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Delay(
            Duration::from_millis(3_000),
            remote_insight(),
        ));
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock.clone());
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        // cycle 1 at 2 s (answer due at 5 s), cycle 2 at 4 s waits in the pending slot
        source.emit(click("a"));
        sleep(Duration::from_millis(3_000)).await;
        source.emit(click("b"));
        sleep(Duration::from_millis(2_500)).await;

        // cycle 1 answered after cycle 2 ran: discarded
        assert!(insights.try_recv().is_none());
        assert_eq!(engine.snapshot().in_flight, Some(2));

        sleep(Duration::from_millis(3_000)).await;
        let event = insights.try_recv().expect("insight for latest analysis");
        assert_eq!(event.insight.title, "Try saved searches");
        assert!(insights.try_recv().is_none());
        assert_eq!(mock.calls(), 2);
        assert_eq!(engine.snapshot().in_flight, None);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_remote_is_bounded() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Hang);
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock);
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        // cycle 1 at 2 s times out at 10 s, after cycle 2 at 6 s; the rules run over cycle 2
        two_clicks(&source).await;
        sleep(Duration::from_millis(4_000)).await;

        let event = insights.try_recv().expect("fallback after timeout");
        assert_eq!(event.insight.title, "Guidance Active");
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_remote_with_active_user_falls_back() {
        let source = LocalInputSource::new();
        let mock = MockInference::new(MockBehavior::Hang);
        let mut engine = GuidanceEngine::new(GuideConfig::default())
            .unwrap()
            .with_inference(mock.clone());
        let mut insights = engine.bus().subscribe();
        engine.start(&source).unwrap();

        // a click and a shake every second keep every timed-out analysis superseded
        for i in 0..13 {
            source.emit(click(&format!("b{}", i)));
            for step in 0..10 {
                let x = if step % 2 == 0 { 0.0 } else { 1_000.0 };
                source.emit(HostEvent::new(EventKind::PointerMove).at(x, 0.0));
                sleep(Duration::from_millis(100)).await;
            }
        }

        let event = insights.try_recv().expect("fallback while the user stays active");
        assert_eq!(event.insight.insight_type, InsightType::HelpOffer);
        assert_eq!(engine.snapshot().stats.surfaced, 1);
        assert!(mock.calls() >= 2);
        engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_flush() {
        let source = LocalInputSource::new();
        let config = GuideConfig {
            eager_flush_threshold: 3,
            ..GuideConfig::default()
        };
        let mut engine = GuidanceEngine::new(config).unwrap();
        engine.start(&source).unwrap();

        for i in 0..4 {
            source.emit(HostEvent::new(EventKind::KeyDown).with_key(&format!("k{}", i)));
        }
        sleep(Duration::from_millis(10)).await;

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.stats.analyses, 1);
        assert_eq!(snapshot.analysis.map(|a| a.metrics.keystroke_count), Some(4));
        engine.stop().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GuideConfig {
            tick_interval_ms: 0,
            ..GuideConfig::default()
        };
        assert!(matches!(GuidanceEngine::new(config), Err(GuideError::Config(_))));
    }
}
