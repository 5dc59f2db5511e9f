//! Subscription registry and dispatch filters
//!
//! Inbound dispatch events are routed by event kind plus a content filter
//! for the events the peer fans out unfiltered (message events arrive for
//! every subscribed channel; the channel id in the payload decides which
//! registration they belong to). Each registration delivers through its own
//! unbounded channel, in arrival order.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::EventKind;

struct Entry {
    id: u64,
    event: EventKind,
    args: Value,
    /// Whether a SUBSCRIBE was sent for this entry (and must be re-sent
    /// after a reconnect). Shortcut-capture registrations are local only.
    via_subscribe: bool,
    tx: mpsc::UnboundedSender<Value>,
}

/// Registry of active event registrations for one session
///
/// Retained across connection loss so the session can resubscribe after a
/// reconnect.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delivery channel for `(event, args)`
    pub fn register(
        &mut self,
        event: EventKind,
        args: Value,
        via_subscribe: bool,
    ) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(Entry {
            id,
            event,
            args,
            via_subscribe,
            tx,
        });
        (id, rx)
    }

    /// Remove a registration; removing an unknown id is a no-op
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Route a dispatch payload to every matching registration
    ///
    /// Registrations whose receiver has been dropped are pruned as a side
    /// effect. Returns the number of deliveries made.
    pub fn dispatch(&mut self, event: EventKind, data: &Value) -> usize {
        let mut delivered = 0;
        self.entries.retain(|entry| {
            if entry.event != event || !payload_matches(event, &entry.args, data) {
                return !entry.tx.is_closed();
            }
            match entry.tx.send(data.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// `(event, args)` of every registration created through SUBSCRIBE
    pub fn active(&self) -> Vec<(EventKind, Value)> {
        self.entries
            .iter()
            .filter(|entry| entry.via_subscribe)
            .map(|entry| (entry.event, entry.args.clone()))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Content filter for events the peer does not pre-filter per subscriber
///
/// Voice-state and speaking events carry no channel id in their payload, so
/// they (and everything else) pass through on event kind alone.
fn payload_matches(event: EventKind, args: &Value, data: &Value) -> bool {
    match event {
        EventKind::MessageCreate | EventKind::MessageUpdate | EventKind::MessageDelete => {
            key_matches(args, "channel_id", data, "/channel_id")
        }
        EventKind::GuildStatus => key_matches(args, "guild_id", data, "/guild/id"),
        _ => true,
    }
}

fn key_matches(args: &Value, args_key: &str, data: &Value, data_pointer: &str) -> bool {
    match args.get(args_key) {
        Some(expected) => data.pointer(data_pointer) == Some(expected),
        // no filter basis registered
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_events_filter_on_channel_id() {
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) =
            registry.register(EventKind::MessageCreate, json!({"channel_id": "A"}), true);

        registry.dispatch(EventKind::MessageCreate, &json!({"channel_id": "A", "n": 1}));
        registry.dispatch(EventKind::MessageCreate, &json!({"channel_id": "B", "n": 2}));
        registry.dispatch(EventKind::MessageCreate, &json!({"channel_id": "A", "n": 3}));

        assert_eq!(rx.try_recv().unwrap()["n"], 1);
        assert_eq!(rx.try_recv().unwrap()["n"], 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn guild_status_filters_on_nested_guild_id() {
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) =
            registry.register(EventKind::GuildStatus, json!({"guild_id": "42"}), true);

        registry.dispatch(EventKind::GuildStatus, &json!({"guild": {"id": "42"}}));
        registry.dispatch(EventKind::GuildStatus, &json!({"guild": {"id": "7"}}));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unfilterable_events_deliver_to_all_registrations() {
        let mut registry = SubscriptionRegistry::new();
        let (_a, mut rx_a) =
            registry.register(EventKind::SpeakingStart, json!({"channel_id": "A"}), true);
        let (_b, mut rx_b) =
            registry.register(EventKind::SpeakingStart, json!({"channel_id": "B"}), true);

        // speaking payloads carry no channel id
        let delivered = registry.dispatch(EventKind::SpeakingStart, &json!({"user_id": "1"}));
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn other_events_do_not_cross_over() {
        let mut registry = SubscriptionRegistry::new();
        let (_id, mut rx) = registry.register(EventKind::MessageCreate, json!({}), true);
        let delivered = registry.dispatch(EventKind::MessageDelete, &json!({"n": 1}));
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let (id, _rx) = registry.register(EventKind::GuildCreate, Value::Null, true);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_dispatch() {
        let mut registry = SubscriptionRegistry::new();
        let (_id, rx) = registry.register(EventKind::GuildCreate, Value::Null, true);
        drop(rx);
        registry.dispatch(EventKind::GuildCreate, &json!({}));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn local_only_registrations_are_not_resubscribed() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(EventKind::CaptureShortcutChange, Value::Null, false);
        registry.register(EventKind::MessageCreate, json!({"channel_id": "A"}), true);
        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, EventKind::MessageCreate);
    }
}
