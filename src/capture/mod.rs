//! Event capture layer
//!
//! Turns raw host events into normalized records, appends them to bounded rolling buffers
//! and queues a compact entry for the next aggregation cycle. Capture never fails:
//! unresolvable targets degrade to placeholder paths and full buffers evict their oldest
//! entries.

mod buffer;
mod event;
mod source;

pub use buffer::RollingBuffer;
pub use event::{
    resolve_target_path, ClickRecord, ElementNode, ElementTarget, EventKind, FocusPhase,
    FocusSample, HostEvent, KeySample, PointerPhase, PointerSample, QueuedEvent,
    ScrollDirection, ScrollSample, MAX_PATH_DEPTH,
};
pub use source::{EventSink, InputSource, LocalInputSource, Subscription};

use crate::config::BufferConfig;
use serde_json::json;

/// How far back key up and blur look for the record they close
const CLOSE_SEARCH_DEPTH: usize = 32;

/// Upper bound on undrained analysis queue entries
const QUEUE_CAP: usize = 1_000;

/// Per-kind handler: builds the record, updates buffers and counters, returns the queue detail
type Handler = fn(&mut EventCapture, &HostEvent, f64, &str) -> serde_json::Value;

/// Dispatch table indexed by `EventKind as usize`
static DISPATCH: [(EventKind, Handler); 13] = [
    (EventKind::PointerMove, EventCapture::on_pointer_move),
    (EventKind::Click, EventCapture::on_click),
    (EventKind::PointerEnter, EventCapture::on_pointer_enter),
    (EventKind::PointerLeave, EventCapture::on_pointer_leave),
    (EventKind::Scroll, EventCapture::on_scroll),
    (EventKind::KeyDown, EventCapture::on_key_down),
    (EventKind::KeyUp, EventCapture::on_key_up),
    (EventKind::Focus, EventCapture::on_focus),
    (EventKind::Blur, EventCapture::on_blur),
    (EventKind::TouchStart, EventCapture::on_touch_start),
    (EventKind::TouchMove, EventCapture::on_touch_move),
    (EventKind::TouchEnd, EventCapture::on_touch_end),
    (EventKind::VisibilityChange, EventCapture::on_visibility_change),
];

/// Rolling buffers read by the aggregator, intent predictor and pattern detector
#[derive(Debug, Clone)]
pub struct CaptureBuffers {
    pub pointer: RollingBuffer<PointerSample>,
    pub scroll: RollingBuffer<ScrollSample>,
    pub keyboard: RollingBuffer<KeySample>,
    pub focus: RollingBuffer<FocusSample>,
    pub clicks: RollingBuffer<ClickRecord>,
}

impl CaptureBuffers {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            pointer: RollingBuffer::new(config.pointer),
            scroll: RollingBuffer::new(config.scroll),
            keyboard: RollingBuffer::new(config.keyboard),
            focus: RollingBuffer::new(config.focus),
            clicks: RollingBuffer::new(config.click),
        }
    }

    /// Total number of buffered records
    pub fn total(&self) -> usize {
        self.pointer.len()
            + self.scroll.len()
            + self.keyboard.len()
            + self.focus.len()
            + self.clicks.len()
    }
}

/// Result of recording one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// The analysis queue passed the eager-flush threshold
    pub flush_due: bool,
}

/// Stateful capture of one session
#[derive(Debug, Clone)]
pub struct EventCapture {
    buffers: CaptureBuffers,
    queue: RollingBuffer<QueuedEvent>,
    eager_flush_threshold: usize,
    session_start_ms: Option<f64>,
    last_timestamp_ms: f64,
    click_sequence: u64,
    hover_start_ms: Option<f64>,
}

impl EventCapture {
    /// Create a capture whose session starts with the first recorded event
    pub fn new(config: &BufferConfig, eager_flush_threshold: usize) -> Self {
        Self {
            buffers: CaptureBuffers::new(config),
            queue: RollingBuffer::new(QUEUE_CAP.max(eager_flush_threshold + 1)),
            eager_flush_threshold,
            session_start_ms: None,
            last_timestamp_ms: f64::NEG_INFINITY,
            click_sequence: 0,
            hover_start_ms: None,
        }
    }

    /// Pin the session start instead of waiting for the first event
    pub fn with_session_start(mut self, session_start_ms: f64) -> Self {
        if session_start_ms.is_finite() {
            self.session_start_ms = Some(session_start_ms);
        }
        self
    }

    /// Record one host event.
    ///
    /// Uses the event's own timestamp when present, `now_ms` otherwise. Timestamps never go
    /// backwards within a capture: an older one is raised to the last seen value.
    pub fn record(&mut self, event: &HostEvent, now_ms: f64) -> CaptureOutcome {
        let timestamp_ms = self.stamp(event.timestamp_ms.unwrap_or(now_ms));
        let session_start = *self.session_start_ms.get_or_insert(timestamp_ms);
        let target_path = resolve_target_path(event.target.as_ref());

        let handler = DISPATCH[event.kind as usize].1;
        let detail = handler(self, event, timestamp_ms, &target_path);

        self.queue.push(QueuedEvent {
            kind: event.kind,
            timestamp_ms,
            session_ms: (timestamp_ms - session_start).max(0.0),
            target_path,
            detail,
        });

        CaptureOutcome {
            flush_due: self.queue.len() > self.eager_flush_threshold,
        }
    }

    /// Remove and return the queued analysis entries, oldest first
    pub fn drain_queue(&mut self) -> Vec<QueuedEvent> {
        self.queue.drain()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Read-only view of the rolling buffers
    pub fn snapshot(&self) -> &CaptureBuffers {
        &self.buffers
    }

    /// Milliseconds since the session started (0 before the first event)
    pub fn session_ms(&self, now_ms: f64) -> f64 {
        match self.session_start_ms {
            Some(start) if now_ms.is_finite() => (now_ms - start).max(0.0),
            _ => 0.0,
        }
    }

    /// Latest timestamp seen, if any event was recorded
    pub fn last_timestamp_ms(&self) -> Option<f64> {
        self.last_timestamp_ms.is_finite().then_some(self.last_timestamp_ms)
    }

    fn stamp(&mut self, candidate: f64) -> f64 {
        let timestamp = if candidate.is_finite() {
            candidate.max(self.last_timestamp_ms)
        } else if self.last_timestamp_ms.is_finite() {
            self.last_timestamp_ms
        } else {
            0.0
        };
        self.last_timestamp_ms = timestamp;
        timestamp
    }

    fn push_pointer(
        &mut self,
        x: f64,
        y: f64,
        timestamp_ms: f64,
        target_path: &str,
        phase: PointerPhase,
    ) -> (f64, f64) {
        let (velocity, acceleration) = match self.buffers.pointer.last() {
            Some(prev) => {
                let elapsed_s = (timestamp_ms - prev.timestamp_ms) / 1000.0;
                if elapsed_s > 0.0 {
                    let distance = ((x - prev.x).powi(2) + (y - prev.y).powi(2)).sqrt();
                    let velocity = distance / elapsed_s;
                    (velocity, (velocity - prev.velocity) / elapsed_s)
                } else {
                    (prev.velocity, 0.0)
                }
            }
            None => (0.0, 0.0),
        };

        self.buffers.pointer.push(PointerSample {
            x,
            y,
            timestamp_ms,
            velocity,
            acceleration,
            target_path: target_path.to_string(),
            phase,
        });
        (velocity, acceleration)
    }

    fn on_pointer_move(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        match event.position() {
            Some((x, y)) => {
                let (velocity, acceleration) =
                    self.push_pointer(x, y, timestamp_ms, target_path, PointerPhase::Move);
                json!({ "x": x, "y": y, "velocity": velocity, "acceleration": acceleration })
            }
            None => serde_json::Value::Null,
        }
    }

    fn on_click(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        let (x, y) = event.position().unwrap_or((0.0, 0.0));
        self.click_sequence += 1;
        let preceding_hover_ms = self
            .hover_start_ms
            .map(|start| (timestamp_ms - start).max(0.0))
            .unwrap_or(0.0);

        self.buffers.clicks.push(ClickRecord {
            target_path: target_path.to_string(),
            x,
            y,
            timestamp_ms,
            sequence_number: self.click_sequence,
            preceding_hover_ms,
        });
        json!({
            "x": x,
            "y": y,
            "sequence_number": self.click_sequence,
            "preceding_hover_ms": preceding_hover_ms,
        })
    }

    fn on_pointer_enter(
        &mut self,
        _event: &HostEvent,
        timestamp_ms: f64,
        _target_path: &str,
    ) -> serde_json::Value {
        self.hover_start_ms = Some(timestamp_ms);
        serde_json::Value::Null
    }

    fn on_pointer_leave(
        &mut self,
        _event: &HostEvent,
        timestamp_ms: f64,
        _target_path: &str,
    ) -> serde_json::Value {
        let hover_ms = self
            .hover_start_ms
            .take()
            .map(|start| (timestamp_ms - start).max(0.0))
            .unwrap_or(0.0);
        json!({ "hover_ms": hover_ms })
    }

    fn on_scroll(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        let (scroll_x, scroll_y) = event.scroll_offset();
        let (velocity, direction) = match self.buffers.scroll.last() {
            Some(prev) => {
                let dx = scroll_x - prev.scroll_x;
                let dy = scroll_y - prev.scroll_y;
                let elapsed_s = (timestamp_ms - prev.timestamp_ms) / 1000.0;
                let velocity = if elapsed_s > 0.0 {
                    (dx.abs() + dy.abs()) / elapsed_s
                } else {
                    0.0
                };
                (velocity, scroll_direction(dx, dy))
            }
            None => (0.0, scroll_direction(scroll_x, scroll_y)),
        };

        self.buffers.scroll.push(ScrollSample {
            scroll_x,
            scroll_y,
            timestamp_ms,
            velocity,
            direction,
            target_path: target_path.to_string(),
        });
        json!({
            "scroll_x": scroll_x,
            "scroll_y": scroll_y,
            "velocity": velocity,
            "direction": direction
        })
    }

    fn on_key_down(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        let key = event.key.clone().unwrap_or_default();
        self.buffers.keyboard.push(KeySample {
            key: key.clone(),
            timestamp_ms,
            hold_ms: None,
            target_path: target_path.to_string(),
        });
        json!({ "key": key })
    }

    fn on_key_up(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        _target_path: &str,
    ) -> serde_json::Value {
        let key = event.key.as_deref().unwrap_or_default();
        let open = self
            .buffers
            .keyboard
            .iter_mut()
            .rev()
            .take(CLOSE_SEARCH_DEPTH)
            .find(|sample| sample.hold_ms.is_none() && sample.key == key);

        let hold_ms = open.map(|sample| {
            let hold = (timestamp_ms - sample.timestamp_ms).max(0.0);
            sample.hold_ms = Some(hold);
            hold
        });
        json!({ "key": key, "hold_ms": hold_ms })
    }

    fn on_focus(
        &mut self,
        _event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        self.buffers.focus.push(FocusSample {
            target_path: target_path.to_string(),
            timestamp_ms,
            duration_ms: None,
            phase: FocusPhase::Focus,
        });
        serde_json::Value::Null
    }

    fn on_blur(
        &mut self,
        _event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        let open = self
            .buffers
            .focus
            .iter_mut()
            .rev()
            .take(CLOSE_SEARCH_DEPTH)
            .find(|sample| {
                sample.phase == FocusPhase::Focus
                    && sample.duration_ms.is_none()
                    && sample.target_path == target_path
            });

        let duration_ms = open.map(|sample| {
            let duration = (timestamp_ms - sample.timestamp_ms).max(0.0);
            sample.duration_ms = Some(duration);
            duration
        });

        self.buffers.focus.push(FocusSample {
            target_path: target_path.to_string(),
            timestamp_ms,
            duration_ms,
            phase: FocusPhase::Blur,
        });
        json!({ "duration_ms": duration_ms })
    }

    fn on_touch_start(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        self.on_touch(event, timestamp_ms, target_path, PointerPhase::TouchStart)
    }

    fn on_touch_move(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
    ) -> serde_json::Value {
        self.on_touch(event, timestamp_ms, target_path, PointerPhase::TouchMove)
    }

    fn on_touch(
        &mut self,
        event: &HostEvent,
        timestamp_ms: f64,
        target_path: &str,
        phase: PointerPhase,
    ) -> serde_json::Value {
        match event.position() {
            Some((x, y)) => {
                let (velocity, _) = self.push_pointer(x, y, timestamp_ms, target_path, phase);
                json!({ "x": x, "y": y, "velocity": velocity })
            }
            None => serde_json::Value::Null,
        }
    }

    fn on_touch_end(
        &mut self,
        _event: &HostEvent,
        _timestamp_ms: f64,
        _target_path: &str,
    ) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn on_visibility_change(
        &mut self,
        event: &HostEvent,
        _timestamp_ms: f64,
        _target_path: &str,
    ) -> serde_json::Value {
        json!({ "visible": event.visible.unwrap_or(true) })
    }
}

/// Direction of the dominant scroll delta; `Down` when there is no movement
fn scroll_direction(dx: f64, dy: f64) -> ScrollDirection {
    if dx.abs() > dy.abs() {
        if dx > 0.0 {
            ScrollDirection::Right
        } else {
            ScrollDirection::Left
        }
    } else if dy < 0.0 {
        ScrollDirection::Up
    } else {
        ScrollDirection::Down
    }
}
