//! Host input events and the normalized records built from them.

use serde::{Deserialize, Serialize};

/// Maximum number of ancestors rendered into a target path
pub const MAX_PATH_DEPTH: usize = 10;

/// Kinds of raw input the capture layer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PointerMove,
    Click,
    PointerEnter,
    PointerLeave,
    Scroll,
    KeyDown,
    KeyUp,
    Focus,
    Blur,
    TouchStart,
    TouchMove,
    TouchEnd,
    VisibilityChange,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 13] = [
        EventKind::PointerMove,
        EventKind::Click,
        EventKind::PointerEnter,
        EventKind::PointerLeave,
        EventKind::Scroll,
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::Focus,
        EventKind::Blur,
        EventKind::TouchStart,
        EventKind::TouchMove,
        EventKind::TouchEnd,
        EventKind::VisibilityChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PointerMove => "pointer_move",
            EventKind::Click => "click",
            EventKind::PointerEnter => "pointer_enter",
            EventKind::PointerLeave => "pointer_leave",
            EventKind::Scroll => "scroll",
            EventKind::KeyDown => "key_down",
            EventKind::KeyUp => "key_up",
            EventKind::Focus => "focus",
            EventKind::Blur => "blur",
            EventKind::TouchStart => "touch_start",
            EventKind::TouchMove => "touch_move",
            EventKind::TouchEnd => "touch_end",
            EventKind::VisibilityChange => "visibility_change",
        }
    }
}

/// One element in a target's ancestor chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
}

impl ElementNode {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            id: None,
            classes: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }

    fn is_body(&self) -> bool {
        self.tag.eq_ignore_ascii_case("body")
    }

    fn render(&self) -> String {
        let tag = self.tag.to_ascii_lowercase();
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return format!("{}#{}", tag, id);
        }
        let classes: Vec<&str> = self
            .classes
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if classes.is_empty() {
            tag
        } else {
            format!("{}.{}", tag, classes.join("."))
        }
    }
}

/// Where an event originated, as described by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementTarget {
    /// Ancestor chain, innermost element first
    Element { chain: Vec<ElementNode> },
    /// The event target is not an element (window, document, text node)
    NonElement,
}

/// Resolve an event target into a stable, human-readable path.
///
/// Walks at most [`MAX_PATH_DEPTH`] ancestors innermost to outermost, stopping at `body`,
/// and joins them outermost first with `" > "`. Never fails: an absent target resolves to
/// `"unknown"`, a non-element to `"event-target"`, and an empty chain to `"element"`.
pub fn resolve_target_path(target: Option<&ElementTarget>) -> String {
    let chain = match target {
        None => return "unknown".to_string(),
        Some(ElementTarget::NonElement) => return "event-target".to_string(),
        Some(ElementTarget::Element { chain }) => chain,
    };

    let mut parts: Vec<String> = chain
        .iter()
        .take_while(|node| !node.is_body())
        .take(MAX_PATH_DEPTH)
        .map(ElementNode::render)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return "element".to_string();
    }
    parts.reverse();
    parts.join(" > ")
}

/// A raw event handed to the engine by the host runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Page visibility after a visibility change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementTarget>,
    /// Host timestamp; stamped by the capture layer when missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<f64>,
}

impl HostEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            x: None,
            y: None,
            scroll_x: None,
            scroll_y: None,
            key: None,
            visible: None,
            target: None,
            timestamp_ms: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    pub fn scrolled_to(mut self, scroll_x: f64, scroll_y: f64) -> Self {
        self.scroll_x = Some(scroll_x);
        self.scroll_y = Some(scroll_y);
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_target(mut self, target: ElementTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: f64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Pointer coordinates, if both are present and finite
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        }
    }

    /// Scroll offsets, missing or non-finite axes read as 0
    pub fn scroll_offset(&self) -> (f64, f64) {
        let finite = |v: Option<f64>| v.filter(|v| v.is_finite()).unwrap_or(0.0);
        (finite(self.scroll_x), finite(self.scroll_y))
    }
}

/// Whether a pointer sample came from a mouse-like device or touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerPhase {
    Move,
    TouchStart,
    TouchMove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
    /// px/s
    pub velocity: f64,
    /// px/s²
    pub acceleration: f64,
    pub target_path: String,
    pub phase: PointerPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollSample {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub timestamp_ms: f64,
    /// px/s
    pub velocity: f64,
    pub direction: ScrollDirection,
    pub target_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySample {
    pub key: String,
    pub timestamp_ms: f64,
    /// Set when the matching key up arrives
    pub hold_ms: Option<f64>,
    pub target_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusPhase {
    Focus,
    Blur,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusSample {
    pub target_path: String,
    pub timestamp_ms: f64,
    /// On a focus sample, set once the matching blur arrives. On a blur sample, the
    /// duration of the focus it closed.
    pub duration_ms: Option<f64>,
    pub phase: FocusPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickRecord {
    pub target_path: String,
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
    /// 1-based, strictly increasing within a capture session
    pub sequence_number: u64,
    /// Time the pointer spent over the clicked region before the click
    pub preceding_hover_ms: f64,
}

/// Entry of the analysis queue, drained by each aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub kind: EventKind,
    pub timestamp_ms: f64,
    /// Milliseconds since the capture session started
    pub session_ms: f64,
    pub target_path: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}
