//! Subscription registry: event type → consumer groups.
//!
//! Built once at startup from the registered handler list and frozen. An
//! event appended with no matching subscribers is persisted to the log with
//! zero delivery rows (audit-only).

use std::collections::BTreeMap;

/// One handler's subscription: its consumer group plus an optional routing
/// filter. A filtered subscriber only receives deliveries for events whose
/// routing key equals the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub consumer_group: String,
    pub routing_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    by_type: BTreeMap<String, Vec<Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Called only during wiring, before the registry is
    /// shared with the outbox.
    pub fn subscribe(&mut self, event_type: &str, consumer_group: &str, routing_key: Option<&str>) {
        self.by_type
            .entry(event_type.to_string())
            .or_default()
            .push(Subscriber {
                consumer_group: consumer_group.to_string(),
                routing_key: routing_key.map(str::to_string),
            });
    }

    /// Consumer groups that should receive an event of `event_type` appended
    /// with `routing_key`.
    pub fn subscribers_for(&self, event_type: &str, routing_key: Option<&str>) -> Vec<String> {
        self.by_type
            .get(event_type)
            .map(|subs| {
                subs.iter()
                    .filter(|s| match &s.routing_key {
                        None => true,
                        Some(filter) => routing_key == Some(filter.as_str()),
                    })
                    .map(|s| s.consumer_group.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All subscribed event type names (for startup validation).
    pub fn event_types(&self) -> Vec<&str> {
        self.by_type.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_has_no_subscribers() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.subscribers_for("Nope", None).is_empty());
    }

    #[test]
    fn unfiltered_subscribers_receive_any_routing_key() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe("RecordPublished", "FanOutToIndexBackends", None);

        assert_eq!(
            reg.subscribers_for("RecordPublished", None),
            vec!["FanOutToIndexBackends"]
        );
        assert_eq!(
            reg.subscribers_for("RecordPublished", Some("vector")),
            vec!["FanOutToIndexBackends"]
        );
    }

    #[test]
    fn routing_filter_partitions_shared_event_type() {
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe("IndexRecord", "VectorIndexHandler", Some("vector"));
        reg.subscribe("IndexRecord", "KeywordIndexHandler", Some("keyword"));

        assert_eq!(
            reg.subscribers_for("IndexRecord", Some("vector")),
            vec!["VectorIndexHandler"]
        );
        assert_eq!(
            reg.subscribers_for("IndexRecord", Some("keyword")),
            vec!["KeywordIndexHandler"]
        );
        // An unrouted event matches no filtered subscriber.
        assert!(reg.subscribers_for("IndexRecord", None).is_empty());
    }
}
