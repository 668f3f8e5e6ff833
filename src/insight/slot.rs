//! Single-slot request queue for remote inference.
//!
//! At most one request is in flight. Analyses submitted meanwhile park in a single pending
//! slot where the newest one wins; completing the in-flight request promotes it.

use crate::types::BehaviorAnalysis;

#[derive(Debug, Clone, Default)]
pub enum RequestSlot {
    #[default]
    Idle,
    InFlight {
        sequence: u64,
    },
    InFlightWithPending {
        sequence: u64,
        pending: Box<BehaviorAnalysis>,
    },
}

/// What the caller must do after a submit
#[derive(Debug)]
pub enum SlotAction {
    /// Start a request for this analysis now
    Dispatch(BehaviorAnalysis),
    /// A request is already running; the analysis waits in the pending slot
    Queued {
        /// Sequence of an older pending analysis that was dropped, if any
        replaced: Option<u64>,
    },
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::Idle
    }

    pub fn submit(&mut self, analysis: BehaviorAnalysis) -> SlotAction {
        match std::mem::take(self) {
            RequestSlot::Idle => {
                *self = RequestSlot::InFlight {
                    sequence: analysis.sequence,
                };
                SlotAction::Dispatch(analysis)
            }
            RequestSlot::InFlight { sequence } => {
                *self = RequestSlot::InFlightWithPending {
                    sequence,
                    pending: Box::new(analysis),
                };
                SlotAction::Queued { replaced: None }
            }
            RequestSlot::InFlightWithPending { sequence, pending } => {
                let replaced = Some(pending.sequence);
                *self = RequestSlot::InFlightWithPending {
                    sequence,
                    pending: Box::new(analysis),
                };
                SlotAction::Queued { replaced }
            }
        }
    }

    /// Mark the in-flight request finished. Returns the pending analysis, which is now
    /// in flight and must be dispatched by the caller.
    pub fn complete(&mut self) -> Option<BehaviorAnalysis> {
        match std::mem::take(self) {
            RequestSlot::Idle | RequestSlot::InFlight { .. } => None,
            RequestSlot::InFlightWithPending { pending, .. } => {
                *self = RequestSlot::InFlight {
                    sequence: pending.sequence,
                };
                Some(*pending)
            }
        }
    }

    /// Sequence of the request currently in flight
    pub fn in_flight(&self) -> Option<u64> {
        match self {
            RequestSlot::Idle => None,
            RequestSlot::InFlight { sequence }
            | RequestSlot::InFlightWithPending { sequence, .. } => Some(*sequence),
        }
    }

    pub fn has_pending(&self) -> bool {
        matches!(self, RequestSlot::InFlightWithPending { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, RequestSlot::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BehaviorMetrics, PatternSummary, ScrollBehavior, ScrollPattern, UserIntent};
    use chrono::Utc;

    fn analysis(sequence: u64) -> BehaviorAnalysis {
        BehaviorAnalysis {
            sequence,
            analysis_id: format!("a-{}", sequence),
            created_at: Utc::now(),
            session_duration_ms: 0.0,
            events: Vec::new(),
            metrics: BehaviorMetrics::default(),
            intent: UserIntent::default(),
            patterns: PatternSummary {
                scroll_pattern: ScrollPattern::Minimal,
                scroll_behavior: ScrollBehavior::Reading,
                pointer_pausing: false,
                click_depth: 0,
                mean_key_hold_ms: 0.0,
            },
            anomalies: Vec::new(),
            recommendations: Vec::new(),
            content_context: None,
        }
    }

    #[test]
    fn test_idle_dispatches() {
        let mut slot = RequestSlot::new();
        assert!(matches!(slot.submit(analysis(1)), SlotAction::Dispatch(a) if a.sequence == 1));
        assert_eq!(slot.in_flight(), Some(1));
        assert!(!slot.has_pending());
    }

    #[test]
    fn test_newest_pending_wins() {
        let mut slot = RequestSlot::new();
        slot.submit(analysis(1));
        assert!(matches!(slot.submit(analysis(2)), SlotAction::Queued { replaced: None }));
        assert!(matches!(slot.submit(analysis(3)), SlotAction::Queued { replaced: Some(2) }));
        assert_eq!(slot.in_flight(), Some(1));

        let next = slot.complete().unwrap();
        assert_eq!(next.sequence, 3);
        assert_eq!(slot.in_flight(), Some(3));

        assert!(slot.complete().is_none());
        assert!(slot.is_idle());
    }

    #[test]
    fn test_complete_when_idle() {
        let mut slot = RequestSlot::new();
        assert!(slot.complete().is_none());
        assert!(slot.is_idle());
    }
}
