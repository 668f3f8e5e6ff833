//! Behavioral metric aggregation
//!
//! Computes the [`BehaviorMetrics`] snapshot from the rolling buffers. Every score is a
//! clamped weighted sum of simple counters; the weights below are the reference heuristic.

use crate::capture::{CaptureBuffers, ClickRecord, FocusPhase};
use crate::config::ScoringConfig;
use crate::types::BehaviorMetrics;

/// Frame time used to convert a count of slow pointer samples into hesitation time (~60 fps)
const FRAME_MS: f64 = 16.67;

/// Scalar building blocks shared by the scores, the intent predictor and the pattern detector
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClickSignals {
    pub backtrack_count: u32,
    pub rapid_click_count: u32,
    pub retry_attempts: u32,
}

impl ClickSignals {
    pub fn from_clicks<'a>(
        clicks: impl Iterator<Item = &'a ClickRecord> + Clone,
        config: &ScoringConfig,
    ) -> Self {
        Self {
            backtrack_count: backtrack_count(clicks.clone()),
            rapid_click_count: rapid_click_count(clicks.clone(), config),
            retry_attempts: retry_attempts(clicks, config),
        }
    }
}

/// Stateless aggregator over capture buffers
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    config: ScoringConfig,
}

impl MetricsAggregator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Compute the metrics snapshot for the current buffers
    pub fn compute(&self, buffers: &CaptureBuffers, session_ms: f64) -> BehaviorMetrics {
        let session_ms = if session_ms.is_finite() { session_ms.max(0.0) } else { 0.0 };
        let signals = ClickSignals::from_clicks(buffers.clicks.iter(), &self.config);

        BehaviorMetrics {
            session_duration_ms: session_ms,
            pointer_distance_px: pointer_distance(buffers),
            scroll_distance_px: scroll_distance(buffers),
            click_count: buffers.clicks.len() as u32,
            keystroke_count: buffers.keyboard.len() as u32,
            hesitation_ms: self.hesitation_ms(buffers),
            backtrack_count: signals.backtrack_count,
            average_task_time_ms: average_task_time_ms(buffers),
            frustration_score: self.frustration_score(buffers, &signals),
            engagement_score: self.engagement_score(buffers, session_ms),
            confidence_score: self.confidence_score(buffers, &signals),
        }
    }

    fn hesitation_ms(&self, buffers: &CaptureBuffers) -> f64 {
        self.hesitating_samples(buffers) as f64 * FRAME_MS
    }

    fn hesitating_samples(&self, buffers: &CaptureBuffers) -> usize {
        buffers
            .pointer
            .iter()
            .filter(|s| s.velocity < self.config.hesitation_velocity_px_s)
            .count()
    }

    /// Frustration score
    ///
    /// Formula: `0.1 × high_velocity_samples + 0.2 × rapid_clicks`
    /// `+ 0.3 × [scroll_count > limit]`,
    /// clamped to [0, 1]
    fn frustration_score(&self, buffers: &CaptureBuffers, signals: &ClickSignals) -> f64 {
        let high_velocity = buffers
            .pointer
            .iter()
            .filter(|s| s.velocity > self.config.high_velocity_px_s)
            .count() as f64;
        let excessive_scrolling = if buffers.scroll.len() > self.config.excessive_scroll_count {
            1.0
        } else {
            0.0
        };

        let score = high_velocity * 0.1
            + signals.rapid_click_count as f64 * 0.2
            + excessive_scrolling * 0.3;
        score.clamp(0.0, 1.0)
    }

    /// Engagement score
    ///
    /// Formula: `min(0.1 × interactions_per_s, 0.4) + min(focus_ms / 10000, 0.3)`
    /// `+ 0.3 × reading`,
    /// clamped to [0, 1]
    fn engagement_score(&self, buffers: &CaptureBuffers, session_ms: f64) -> f64 {
        let interactions = (buffers.clicks.len() + buffers.keyboard.len()) as f64;
        let frequency = if session_ms > 0.0 {
            interactions / (session_ms / 1000.0)
        } else {
            0.0
        };

        let focus_ms: f64 = buffers
            .focus
            .iter()
            .filter(|s| s.phase == FocusPhase::Focus)
            .filter_map(|s| s.duration_ms)
            .sum();

        let score = (frequency * 0.1).min(0.4)
            + (focus_ms / 10_000.0).min(0.3)
            + reading_score(buffers, &self.config) * 0.3;
        score.clamp(0.0, 1.0)
    }

    /// Confidence score
    ///
    /// Formula: `1 − 0.3 × hesitation_ratio − 0.4 × backtrack_ratio − 0.1 × retries`,
    /// floored at 0
    fn confidence_score(&self, buffers: &CaptureBuffers, signals: &ClickSignals) -> f64 {
        let hesitation_ratio = if buffers.pointer.is_empty() {
            0.0
        } else {
            self.hesitating_samples(buffers) as f64 / buffers.pointer.len() as f64
        };
        let backtrack_ratio = signals.backtrack_count as f64 / buffers.clicks.len().max(1) as f64;

        let score = 1.0
            - hesitation_ratio * 0.3
            - backtrack_ratio * 0.4
            - signals.retry_attempts as f64 * 0.1;
        score.clamp(0.0, 1.0)
    }
}

/// Sum of Euclidean steps between consecutive pointer samples
fn pointer_distance(buffers: &CaptureBuffers) -> f64 {
    buffers
        .pointer
        .iter()
        .zip(buffers.pointer.iter().skip(1))
        .map(|(a, b)| ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt())
        .sum()
}

/// Sum of vertical steps between consecutive scroll samples
fn scroll_distance(buffers: &CaptureBuffers) -> f64 {
    buffers
        .scroll
        .iter()
        .zip(buffers.scroll.iter().skip(1))
        .map(|(a, b)| (b.scroll_y - a.scroll_y).abs())
        .sum()
}

/// Mean interval between consecutive clicks, 0 with fewer than two clicks
pub fn average_task_time_ms(buffers: &CaptureBuffers) -> f64 {
    let clicks = &buffers.clicks;
    if clicks.len() < 2 {
        return 0.0;
    }
    let intervals: f64 = clicks
        .iter()
        .zip(clicks.iter().skip(1))
        .map(|(a, b)| (b.timestamp_ms - a.timestamp_ms).max(0.0))
        .sum();
    intervals / (clicks.len() - 1) as f64
}

/// Number of A → B → A returns in the click path
pub fn backtrack_count<'a>(clicks: impl Iterator<Item = &'a ClickRecord>) -> u32 {
    let paths: Vec<&str> = clicks.map(|c| c.target_path.as_str()).collect();
    paths
        .windows(3)
        .filter(|w| w[0] == w[2] && w[0] != w[1])
        .count() as u32
}

/// Consecutive click pairs close together in both time and space
pub fn rapid_click_count<'a>(
    clicks: impl Iterator<Item = &'a ClickRecord>,
    config: &ScoringConfig,
) -> u32 {
    let clicks: Vec<&ClickRecord> = clicks.collect();
    clicks
        .windows(2)
        .filter(|w| is_rapid_pair(w[0], w[1], config))
        .count() as u32
}

/// Consecutive same-target clicks that are too slow to be rapid but still a quick repeat
pub fn retry_attempts<'a>(
    clicks: impl Iterator<Item = &'a ClickRecord>,
    config: &ScoringConfig,
) -> u32 {
    let clicks: Vec<&ClickRecord> = clicks.collect();
    clicks
        .windows(2)
        .filter(|w| {
            let gap = w[1].timestamp_ms - w[0].timestamp_ms;
            w[0].target_path == w[1].target_path
                && gap > config.rapid_click_interval_ms
                && gap < config.retry_window_ms
        })
        .count() as u32
}

fn is_rapid_pair(a: &ClickRecord, b: &ClickRecord, config: &ScoringConfig) -> bool {
    let gap = b.timestamp_ms - a.timestamp_ms;
    let distance = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    gap <= config.rapid_click_interval_ms && distance <= config.rapid_click_radius_px
}

/// Reading-pattern heuristic
///
/// Formula: `share_of_reading_velocities × (1 − min(cv, 1))` where reading velocities lie in
/// `(0, reading_velocity]` and `cv` is their coefficient of variation. Slow, steady scrolling
/// scores close to 1.
pub fn reading_score(buffers: &CaptureBuffers, config: &ScoringConfig) -> f64 {
    let moving: Vec<f64> = buffers
        .scroll
        .iter()
        .map(|s| s.velocity)
        .filter(|v| *v > 0.0)
        .collect();
    if moving.is_empty() {
        return 0.0;
    }

    let reading: Vec<f64> = moving
        .iter()
        .copied()
        .filter(|v| *v <= config.reading_velocity_px_s)
        .collect();
    if reading.is_empty() {
        return 0.0;
    }

    let share = reading.len() as f64 / moving.len() as f64;
    let mean = reading.iter().sum::<f64>() / reading.len() as f64;
    let variance = reading.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / reading.len() as f64;
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    (share * (1.0 - cv.min(1.0))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ElementNode, ElementTarget, EventCapture, EventKind, HostEvent};
    use crate::config::BufferConfig;

    fn capture() -> EventCapture {
        EventCapture::new(&BufferConfig::default(), 1_000)
    }

    fn click_on(id: &str, x: f64, y: f64) -> HostEvent {
        HostEvent::new(EventKind::Click).at(x, y).with_target(ElementTarget::Element {
            chain: vec![ElementNode::new("button").with_id(id)],
        })
    }

    fn assert_scores_in_range(m: &BehaviorMetrics) {
        for score in [m.frustration_score, m.engagement_score, m.confidence_score] {
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_empty_history_defaults() {
        let capture = capture();
        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 0.0);

        assert_eq!(metrics.frustration_score, 0.0);
        assert_eq!(metrics.engagement_score, 0.0);
        assert_eq!(metrics.confidence_score, 1.0);
        assert_eq!(metrics.click_count, 0);
        assert_eq!(metrics.average_task_time_ms, 0.0);
    }

    #[test]
    fn test_distances() {
        let mut capture = capture();
        capture.record(&HostEvent::new(EventKind::PointerMove).at(0.0, 0.0), 0.0);
        capture.record(&HostEvent::new(EventKind::PointerMove).at(3.0, 4.0), 100.0);
        capture.record(&HostEvent::new(EventKind::PointerMove).at(3.0, 14.0), 200.0);
        capture.record(&HostEvent::new(EventKind::Scroll).scrolled_to(0.0, 100.0), 300.0);
        capture.record(&HostEvent::new(EventKind::Scroll).scrolled_to(0.0, 40.0), 400.0);

        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 400.0);
        assert!((metrics.pointer_distance_px - 15.0).abs() < 1e-9);
        assert!((metrics.scroll_distance_px - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_erratic_pointer_raises_frustration() {
        let mut capture = capture();
        // 1000 px every 100 ms = 10 000 px/s
        for i in 0..12 {
            let x = if i % 2 == 0 { 0.0 } else { 1_000.0 };
            capture.record(&HostEvent::new(EventKind::PointerMove).at(x, 0.0), i as f64 * 100.0);
        }
        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 1_200.0);
        assert_eq!(metrics.frustration_score, 1.0);
        assert_scores_in_range(&metrics);
    }

    #[test]
    fn test_rapid_clicks_and_backtracking() {
        let mut capture = capture();
        capture.record(&click_on("a", 10.0, 10.0), 0.0);
        capture.record(&click_on("a", 12.0, 11.0), 200.0);
        capture.record(&click_on("b", 400.0, 300.0), 2_000.0);
        capture.record(&click_on("a", 10.0, 10.0), 4_000.0);

        let config = ScoringConfig::default();
        let signals = ClickSignals::from_clicks(capture.snapshot().clicks.iter(), &config);
        assert_eq!(signals.rapid_click_count, 1);
        assert_eq!(signals.backtrack_count, 1);
        assert_eq!(signals.retry_attempts, 0);

        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 4_000.0);
        assert!((metrics.frustration_score - 0.2).abs() < 1e-9);
        // 1 - 0.4 × (1 / 4)
        assert!((metrics.confidence_score - 0.9).abs() < 1e-9);
        assert!((metrics.average_task_time_ms - 4_000.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_retry_attempts_lower_confidence() {
        let mut capture = capture();
        capture.record(&click_on("submit", 0.0, 0.0), 0.0);
        capture.record(&click_on("submit", 0.0, 0.0), 1_000.0);
        capture.record(&click_on("submit", 0.0, 0.0), 2_000.0);

        let config = ScoringConfig::default();
        assert_eq!(retry_attempts(capture.snapshot().clicks.iter(), &config), 2);

        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 2_000.0);
        assert!((metrics.confidence_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_steady_reading_scroll_scores_high() {
        let mut capture = capture();
        for i in 0..10 {
            capture.record(
                &HostEvent::new(EventKind::Scroll).scrolled_to(0.0, i as f64 * 100.0),
                i as f64 * 500.0,
            );
        }
        let config = ScoringConfig::default();
        let score = reading_score(capture.snapshot(), &config);
        assert!(
            (score - 1.0).abs() < 1e-9,
            "steady 200 px/s scroll should read as 1.0, got {}",
            score
        );
    }

    #[test]
    fn test_fast_scroll_is_not_reading() {
        let mut capture = capture();
        for i in 0..10 {
            capture.record(
                &HostEvent::new(EventKind::Scroll).scrolled_to(0.0, i as f64 * 1_000.0),
                i as f64 * 100.0,
            );
        }
        assert_eq!(reading_score(capture.snapshot(), &ScoringConfig::default()), 0.0);
    }

    #[test]
    fn test_engagement_components() {
        let mut capture = capture();
        let input = ElementTarget::Element {
            chain: vec![ElementNode::new("input").with_id("q")],
        };
        capture.record(&HostEvent::new(EventKind::Focus).with_target(input.clone()), 0.0);
        capture.record(&HostEvent::new(EventKind::Blur).with_target(input), 20_000.0);
        for i in 0..10 {
            capture.record(&HostEvent::new(EventKind::KeyDown).with_key("k"), 20_000.0 + i as f64);
        }

        // 10 interactions over 10 s = 1/s → 0.1; focus 20 s → capped 0.3
        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 10_000.0);
        assert!((metrics.engagement_score - 0.4).abs() < 1e-9);
        assert_eq!(metrics.keystroke_count, 10);
    }

    #[test]
    fn test_hesitation_time() {
        let mut capture = capture();
        for i in 0..4 {
            capture.record(
                &HostEvent::new(EventKind::PointerMove).at(100.0, 100.0),
                i as f64 * 100.0,
            );
        }
        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 400.0);
        assert!((metrics.hesitation_ms - 4.0 * FRAME_MS).abs() < 1e-9);
        // every sample hesitating: 1 - 0.3
        assert!((metrics.confidence_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_scores_bounded_for_mixed_input() {
        let mut capture = capture();
        for i in 0..300 {
            let t = i as f64 * 7.0;
            match i % 5 {
                0 => capture.record(
                    &HostEvent::new(EventKind::PointerMove)
                        .at((i * 37 % 900) as f64, (i * 13 % 700) as f64),
                    t,
                ),
                1 => capture.record(&click_on(if i % 2 == 0 { "x" } else { "y" }, 5.0, 5.0), t),
                2 => capture.record(
                    &HostEvent::new(EventKind::Scroll).scrolled_to(0.0, (i % 3) as f64),
                    t,
                ),
                3 => capture.record(&HostEvent::new(EventKind::KeyDown).with_key("z"), t),
                _ => capture.record(&HostEvent::new(EventKind::KeyUp).with_key("z"), t),
            };
        }
        let metrics = MetricsAggregator::default().compute(capture.snapshot(), 2_100.0);
        assert_scores_in_range(&metrics);
    }
}
