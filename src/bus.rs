//! Insight delivery
//!
//! A broadcast channel decoupling the engine from whatever renders insights. Every
//! surfaced insight is published exactly once; delivery is fire-and-forget and a slow
//! subscriber only loses its own backlog.

use crate::types::{Insight, Priority};
use crate::INSIGHT_EVENT_NAME;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Default number of undelivered events a subscriber may fall behind by
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// One published insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightEvent {
    /// Event name UI consumers listen for
    pub name: String,
    pub event_id: String,
    pub emitted_at: DateTime<Utc>,
    pub insight: Insight,
}

impl InsightEvent {
    pub fn new(insight: Insight) -> Self {
        Self {
            name: INSIGHT_EVENT_NAME.to_string(),
            event_id: Uuid::new_v4().to_string(),
            emitted_at: Utc::now(),
            insight,
        }
    }
}

/// Publish side of the delivery channel
#[derive(Debug, Clone)]
pub struct DeliveryBus {
    sender: broadcast::Sender<InsightEvent>,
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl DeliveryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an already-built event. Returns the number of subscribers that will see it.
    pub fn publish_event(&self, event: InsightEvent) -> usize {
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }

    /// Wrap and publish an insight
    pub fn publish(&self, insight: Insight) -> usize {
        self.publish_event(InsightEvent::new(insight))
    }

    pub fn subscribe(&self) -> InsightSubscription {
        InsightSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receive side. Dropping it unsubscribes.
#[derive(Debug)]
pub struct InsightSubscription {
    receiver: broadcast::Receiver<InsightEvent>,
}

impl InsightSubscription {
    /// Wait for the next event. `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<InsightEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "insight subscriber lagged, dropping oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is ready
    pub fn try_recv(&mut self) -> Option<InsightEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "insight subscriber lagged, dropping oldest events");
                }
                Err(_) => return None,
            }
        }
    }
}

/// What happens to an unacknowledged insight when a new one is surfaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveInsightPolicy {
    /// The newest surfaced insight always becomes active
    #[default]
    Replace,
    /// An unacknowledged high or urgent insight stays active while newer ones rank lower
    KeepHigherPriority,
}

/// The single insight currently presented to the user
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEntry {
    pub event_id: String,
    pub insight: Insight,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveInsight {
    policy: ActiveInsightPolicy,
    current: Option<ActiveEntry>,
}

impl ActiveInsight {
    pub fn new(policy: ActiveInsightPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    pub fn policy(&self) -> ActiveInsightPolicy {
        self.policy
    }

    pub fn current(&self) -> Option<&ActiveEntry> {
        self.current.as_ref()
    }

    /// Offer a newly surfaced insight. Returns whether it became the active one.
    pub fn offer(&mut self, event_id: &str, insight: &Insight) -> bool {
        let keep_current = match (&self.current, self.policy) {
            (Some(current), ActiveInsightPolicy::KeepHigherPriority) => {
                current.insight.priority >= Priority::High
                    && insight.priority < current.insight.priority
            }
            _ => false,
        };
        if keep_current {
            return false;
        }

        self.current = Some(ActiveEntry {
            event_id: event_id.to_string(),
            insight: insight.clone(),
        });
        true
    }

    /// The UI consumed or dismissed the insight. Unknown ids are ignored.
    pub fn acknowledge(&mut self, event_id: &str) -> bool {
        if self.current.as_ref().is_some_and(|c| c.event_id == event_id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InsightMetadata, InsightType};
    use pretty_assertions::assert_eq;

    fn insight(priority: Priority, title: &str) -> Insight {
        Insight {
            insight_type: InsightType::Guidance,
            priority,
            title: title.to_string(),
            message: "m".to_string(),
            actions: Vec::new(),
            metadata: InsightMetadata {
                confidence: 0.9,
                reasoning: "r".to_string(),
                trigger_conditions: Vec::new(),
                estimated_impact: 0.5,
            },
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = DeliveryBus::default();
        assert_eq!(bus.publish(insight(Priority::Low, "nobody")), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_one_event() {
        let bus = DeliveryBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(insight(Priority::High, "hello")), 2);

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "intelligentAdvice");
        assert_eq!(a.insight.title, "hello");
        assert!(first.try_recv().is_none());
    }

    #[test]
    fn test_dropped_subscription_unsubscribes() {
        let bus = DeliveryBus::default();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_bus_ends_subscription() {
        let bus = DeliveryBus::default();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_lagging_subscriber_skips_oldest() {
        let bus = DeliveryBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..4 {
            bus.publish(insight(Priority::Low, &format!("n{}", i)));
        }
        assert_eq!(sub.try_recv().map(|e| e.insight.title), Some("n2".to_string()));
        assert_eq!(sub.try_recv().map(|e| e.insight.title), Some("n3".to_string()));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_event_serializes_for_consumers() {
        let event = InsightEvent::new(insight(Priority::Medium, "wire"));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: InsightEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_replace_policy() {
        let mut active = ActiveInsight::default();
        assert!(active.offer("e1", &insight(Priority::Urgent, "first")));
        assert!(active.offer("e2", &insight(Priority::Low, "second")));
        assert_eq!(active.current().map(|c| c.event_id.as_str()), Some("e2"));
    }

    #[test]
    fn test_keep_higher_priority_policy() {
        let mut active = ActiveInsight::new(ActiveInsightPolicy::KeepHigherPriority);
        assert!(active.offer("e1", &insight(Priority::High, "important")));
        assert!(!active.offer("e2", &insight(Priority::Medium, "minor")));
        assert_eq!(active.current().map(|c| c.event_id.as_str()), Some("e1"));

        assert!(active.offer("e3", &insight(Priority::Urgent, "critical")));

        assert!(!active.acknowledge("e1"));
        assert!(active.acknowledge("e3"));
        assert!(active.current().is_none());
        assert!(active.offer("e4", &insight(Priority::Low, "after ack")));
    }

    #[test]
    fn test_keep_policy_replaces_medium() {
        let mut active = ActiveInsight::new(ActiveInsightPolicy::KeepHigherPriority);
        active.offer("e1", &insight(Priority::Medium, "m"));
        assert!(active.offer("e2", &insight(Priority::Low, "l")));
    }
}
