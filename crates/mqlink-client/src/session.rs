//! Client session state.
//!
//! Holds every QoS 1 and QoS 2 exchange (and every SUBSCRIBE / UNSUBSCRIBE)
//! that has not completed, in both directions. With a persistent session the
//! contexts survive a reconnect and are resent in the order originally sent.

use std::collections::HashMap;

use crate::inflight::{Flow, InflightContext, InflightKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Client identifier the session belongs to
    pub client_id: String,
    pub contexts: HashMap<InflightKey, InflightContext>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            contexts: HashMap::new(),
        }
    }

    /// Record the current state of a context, replacing any previous copy.
    pub fn track(&mut self, ctx: &InflightContext) {
        self.contexts.insert(ctx.key(), ctx.clone());
    }

    pub fn remove(&mut self, key: &InflightKey) -> Option<InflightContext> {
        self.contexts.remove(key)
    }

    pub fn contains(&self, key: &InflightKey) -> bool {
        self.contexts.contains_key(key)
    }

    pub fn get(&self, key: &InflightKey) -> Option<&InflightContext> {
        self.contexts.get(key)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop all state and rebind the session to `client_id`.
    pub fn reset(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
        self.contexts.clear();
    }

    /// Contexts rewound for a new connection, in original send order.
    pub fn restored_contexts(&self) -> Vec<InflightContext> {
        let mut contexts: Vec<InflightContext> = self
            .contexts
            .values()
            .cloned()
            .map(InflightContext::restore)
            .collect();
        contexts.sort_by_key(|ctx| ctx.sequence);
        contexts
    }

    /// Packet ids of our own exchanges, so the allocator can skip them.
    pub fn outbound_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.contexts
            .keys()
            .filter(|key| key.flow == Flow::ToPublish)
            .map(|key| key.packet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflight::State;
    use mqlink_core::{Packet, Publish, QoS};
    use std::time::Instant;

    fn outbound(id: u16, qos: QoS, sequence: u64) -> InflightContext {
        let mut publish = Publish::new("t", "x", qos, false);
        publish.packet_id = Some(id);
        InflightContext::outbound(Packet::Publish(publish), id, Instant::now(), sequence).unwrap()
    }

    #[test]
    fn test_track_and_remove() {
        let mut session = Session::new("c1");
        let mut ctx = outbound(7, QoS::AtLeastOnce, 0);
        session.track(&ctx);
        ctx.state = State::WaitForPuback;
        session.track(&ctx);

        let key = InflightKey::new(7, Flow::ToPublish);
        assert_eq!(session.len(), 1);
        assert_eq!(session.get(&key).unwrap().state, State::WaitForPuback);
        assert!(!session.contains(&InflightKey::new(7, Flow::ToAcknowledge)));

        session.remove(&key);
        assert!(session.is_empty());
    }

    #[test]
    fn test_restore_order() {
        let mut session = Session::new("c1");
        for (id, sequence) in [(30u16, 2u64), (10, 0), (20, 1)] {
            let mut ctx = outbound(id, QoS::ExactlyOnce, sequence);
            ctx.state = State::WaitForPubrec;
            session.track(&ctx);
        }

        let ids: Vec<u16> = session
            .restored_contexts()
            .iter()
            .map(|ctx| ctx.packet_id)
            .collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert!(session
            .restored_contexts()
            .iter()
            .all(|ctx| ctx.state == State::QueuedQos2 && ctx.packet.dup()));
    }

    #[test]
    fn test_reset() {
        let mut session = Session::new("old");
        session.track(&outbound(1, QoS::AtLeastOnce, 0));
        session.reset("new");
        assert_eq!(session.client_id, "new");
        assert!(session.is_empty());
        assert_eq!(session.outbound_ids().count(), 0);
    }
}
