//! In-flight message contexts.

use std::time::Instant;

use mqlink_core::{Packet, QoS};

/// Where a context sits in its acknowledgment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    QueuedQos0,
    QueuedQos1,
    QueuedQos2,
    WaitForPuback,
    WaitForPubrec,
    WaitForPubrel,
    WaitForPubcomp,
    SendPubrel,
    SendSubscribe,
    WaitForSuback,
    SendUnsubscribe,
    WaitForUnsuback,
}

impl State {
    /// States that expire after the retry delay.
    pub fn is_timed(self) -> bool {
        matches!(
            self,
            State::WaitForPuback
                | State::WaitForPubrec
                | State::WaitForPubcomp
                | State::WaitForSuback
                | State::WaitForUnsuback
        )
    }

    /// State a surviving context resumes from after a reconnect.
    pub fn restored(self) -> State {
        match self {
            State::WaitForPuback => State::QueuedQos1,
            State::WaitForPubrec => State::QueuedQos2,
            State::WaitForPubcomp => State::SendPubrel,
            State::WaitForSuback => State::SendSubscribe,
            State::WaitForUnsuback => State::SendUnsubscribe,
            other => other,
        }
    }
}

/// Direction of an exchange. The two directions have independent
/// packet id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// We sent the message and wait for the broker.
    ToPublish,
    /// The broker sent the message and we acknowledge it.
    ToAcknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InflightKey {
    pub packet_id: u16,
    pub flow: Flow,
}

impl InflightKey {
    pub fn new(packet_id: u16, flow: Flow) -> Self {
        Self { packet_id, flow }
    }
}

/// One message or subscription request moving through the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightContext {
    /// The PUBLISH, SUBSCRIBE or UNSUBSCRIBE this exchange is about.
    pub packet: Packet,
    /// Outbound QoS 0 publishes carry an id here but not on the wire.
    /// Inbound QoS 0 messages use 0.
    pub packet_id: u16,
    pub state: State,
    pub flow: Flow,
    /// Sends so far in the current state sequence.
    pub attempt: u32,
    /// Time of the last send.
    pub timestamp: Instant,
    /// Enqueue order, used to restore a session in its original order.
    pub sequence: u64,
}

impl InflightContext {
    /// Context for a packet we originate. Returns `None` for packets
    /// that do not start an exchange.
    pub fn outbound(packet: Packet, packet_id: u16, now: Instant, sequence: u64) -> Option<Self> {
        let state = match &packet {
            Packet::Publish(p) => match p.qos {
                QoS::AtMostOnce => State::QueuedQos0,
                QoS::AtLeastOnce => State::QueuedQos1,
                QoS::ExactlyOnce => State::QueuedQos2,
            },
            Packet::Subscribe(_) => State::SendSubscribe,
            Packet::Unsubscribe(_) => State::SendUnsubscribe,
            _ => return None,
        };
        Some(Self {
            packet,
            packet_id,
            state,
            flow: Flow::ToPublish,
            attempt: 0,
            timestamp: now,
            sequence,
        })
    }

    /// Context for a PUBLISH received from the broker.
    pub fn inbound(packet: Packet, now: Instant, sequence: u64) -> Self {
        let state = match packet.qos() {
            QoS::AtMostOnce => State::QueuedQos0,
            QoS::AtLeastOnce => State::QueuedQos1,
            QoS::ExactlyOnce => State::QueuedQos2,
        };
        Self {
            packet_id: packet.packet_id().unwrap_or(0),
            packet,
            state,
            flow: Flow::ToAcknowledge,
            attempt: 0,
            timestamp: now,
            sequence,
        }
    }

    pub fn key(&self) -> InflightKey {
        InflightKey::new(self.packet_id, self.flow)
    }

    /// QoS 0 exchanges are never tracked in the session.
    pub fn is_persistent(&self) -> bool {
        self.state != State::QueuedQos0
    }

    /// Rewind the context for resending on a new connection.
    pub fn restore(mut self) -> Self {
        let already_sent = matches!(
            self.state,
            State::WaitForPuback
                | State::WaitForPubrec
                | State::WaitForSuback
                | State::WaitForUnsuback
        );
        if already_sent {
            self.packet = self.packet.with_dup();
        }
        self.state = self.state.restored();
        self.attempt = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqlink_core::{Publish, Subscribe};

    fn publish(qos: QoS, id: u16) -> Packet {
        let mut publish = Publish::new("a/b", "x", qos, false);
        publish.packet_id = Some(id);
        Packet::Publish(publish)
    }

    #[test]
    fn test_outbound_states() {
        let now = Instant::now();
        let ctx = InflightContext::outbound(publish(QoS::ExactlyOnce, 3), 3, now, 0).unwrap();
        assert_eq!(ctx.state, State::QueuedQos2);
        assert_eq!(ctx.key(), InflightKey::new(3, Flow::ToPublish));

        let sub = Packet::Subscribe(Subscribe::new(9, vec!["a/#".into()], &[QoS::AtLeastOnce]));
        let ctx = InflightContext::outbound(sub, 9, now, 1).unwrap();
        assert_eq!(ctx.state, State::SendSubscribe);

        assert!(InflightContext::outbound(Packet::Pingreq, 1, now, 2).is_none());
    }

    #[test]
    fn test_inbound_qos0_uses_id_zero() {
        let ctx = InflightContext::inbound(
            Packet::Publish(Publish::new("t", "x", QoS::AtMostOnce, false)),
            Instant::now(),
            0,
        );
        assert_eq!(ctx.key(), InflightKey::new(0, Flow::ToAcknowledge));
        assert!(!ctx.is_persistent());
    }

    #[test]
    fn test_restore_rewinds_and_marks_dup() {
        let now = Instant::now();
        let mut ctx = InflightContext::outbound(publish(QoS::AtLeastOnce, 5), 5, now, 0).unwrap();
        ctx.state = State::WaitForPuback;
        ctx.attempt = 2;

        let restored = ctx.restore();
        assert_eq!(restored.state, State::QueuedQos1);
        assert_eq!(restored.attempt, 0);
        assert!(restored.packet.dup());

        let mut ctx = InflightContext::outbound(publish(QoS::ExactlyOnce, 6), 6, now, 1).unwrap();
        ctx.state = State::WaitForPubcomp;
        let restored = ctx.restore();
        assert_eq!(restored.state, State::SendPubrel);
        assert!(!restored.packet.dup());
    }

    #[test]
    fn test_restored_state_mapping() {
        assert_eq!(State::WaitForPubrec.restored(), State::QueuedQos2);
        assert_eq!(State::WaitForSuback.restored(), State::SendSubscribe);
        assert_eq!(State::WaitForUnsuback.restored(), State::SendUnsubscribe);
        assert_eq!(State::WaitForPubrel.restored(), State::WaitForPubrel);
        assert_eq!(State::QueuedQos1.restored(), State::QueuedQos1);
    }
}
