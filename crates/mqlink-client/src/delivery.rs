//! QoS delivery state machine.
//!
//! The engine owns the in-flight queue, the session and the packet id
//! allocator behind one lock, and the queue of received acknowledgments
//! behind another. Neither lock is held while a packet is sent.
//!
//! Time is passed in by the caller, so `process` can be driven with a
//! synthetic clock.

use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use log::{debug, warn};
use mqlink_core::{reason_code, Ack, Packet, PacketType, Publish, QoS};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::inflight::{Flow, InflightContext, InflightKey, State};
use crate::packet_id::PacketIdAllocator;
use crate::session::Session;

/// Destination for packets produced by the engine.
pub trait PacketSink {
    fn send_packet(&self, packet: &Packet) -> Result<()>;
}

/// Destination for events produced by the engine.
pub trait EventSink {
    fn emit(&self, event: ClientEvent);
}

/// Retry policy and queue bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub retry_delay: Duration,
    /// Sends per message before it is reported as failed.
    pub max_attempts: u32,
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for DeliveryConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            max_attempts: config.max_retry_attempts,
            queue_capacity: config.inflight_queue_capacity,
        }
    }
}

/// What the receive path should do with a packet handed to `receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Queued for the next processing pass.
    Queued,
    /// Answer right away with this packet. Nothing was queued.
    Reply(Packet),
    /// Stale or unexpected, ignored.
    Discarded,
}

#[derive(Debug, Default)]
struct Inflight {
    queue: VecDeque<InflightContext>,
    /// Contexts taken out of the queue by the running pass
    in_pass: usize,
    session: Session,
    ids: PacketIdAllocator,
    next_sequence: u64,
}

impl Inflight {
    fn len(&self) -> usize {
        self.queue.len() + self.in_pass
    }

    fn sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

enum Expiry {
    Pending,
    Retry,
    Exhausted,
}

/// Drives every in-flight exchange through its acknowledgment sequence.
#[derive(Debug)]
pub struct DeliveryEngine {
    config: DeliveryConfig,
    inflight: Mutex<Inflight>,
    /// Acknowledgments received but not yet matched
    acks: Mutex<VecDeque<Packet>>,
}

impl DeliveryEngine {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            inflight: Mutex::new(Inflight::default()),
            acks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Queue an outbound PUBLISH, SUBSCRIBE or UNSUBSCRIBE and return the
    /// packet id assigned to it.
    ///
    /// Every publish gets an id, QoS 0 included so its `Published` event can
    /// be correlated. QoS 0 packets still go out without one.
    pub fn enqueue(&self, packet: Packet, now: Instant) -> Result<u16> {
        let mut inflight = self.inflight.lock();
        if inflight.len() >= self.config.queue_capacity {
            return Err(ClientError::QueueFull);
        }

        let id = inflight.ids.allocate().ok_or(ClientError::QueueFull)?;
        let packet = with_packet_id(packet, id);
        let sequence = inflight.sequence();
        let Some(ctx) = InflightContext::outbound(packet, id, now, sequence) else {
            inflight.ids.release(id);
            return Err(ClientError::InvalidState(
                "only PUBLISH, SUBSCRIBE and UNSUBSCRIBE can be queued".into(),
            ));
        };

        if ctx.is_persistent() {
            inflight.session.track(&ctx);
        }
        inflight.queue.push_back(ctx);
        Ok(id)
    }

    /// Route a packet read off the wire.
    pub fn receive(&self, packet: Packet, now: Instant) -> Inbound {
        match packet {
            Packet::Publish(publish) => self.receive_publish(publish, now),
            Packet::Pubrel(ack) => {
                let key = InflightKey::new(ack.packet_id, Flow::ToAcknowledge);
                if !self.inflight.lock().session.contains(&key) {
                    debug!("PUBREL {} for a finished exchange, resending PUBCOMP", ack.packet_id);
                    return Inbound::Reply(Packet::Pubcomp(Ack::new(ack.packet_id)));
                }
                self.acks.lock().push_back(Packet::Pubrel(ack));
                Inbound::Queued
            }
            Packet::Puback(_)
            | Packet::Pubrec(_)
            | Packet::Pubcomp(_)
            | Packet::Suback(_)
            | Packet::Unsuback(_) => {
                let id = packet.packet_id().unwrap_or(0);
                let key = InflightKey::new(id, Flow::ToPublish);
                if !self.inflight.lock().session.contains(&key) {
                    debug!("Discarding stale {:?} for packet {}", packet.packet_type(), id);
                    return Inbound::Discarded;
                }
                self.acks.lock().push_back(packet);
                Inbound::Queued
            }
            other => {
                debug!("Delivery engine ignores {:?}", other.packet_type());
                Inbound::Discarded
            }
        }
    }

    fn receive_publish(&self, publish: Publish, now: Instant) -> Inbound {
        let mut inflight = self.inflight.lock();

        if publish.qos == QoS::ExactlyOnce {
            let id = publish.packet_id.unwrap_or(0);
            if inflight.session.contains(&InflightKey::new(id, Flow::ToAcknowledge)) {
                debug!("Duplicate QoS 2 PUBLISH {}, resending PUBREC", id);
                return Inbound::Reply(Packet::Pubrec(Ack::new(id)));
            }
        }

        let sequence = inflight.sequence();
        let ctx = InflightContext::inbound(Packet::Publish(publish), now, sequence);
        if ctx.is_persistent() {
            inflight.session.track(&ctx);
        }
        inflight.queue.push_back(ctx);
        Inbound::Queued
    }

    /// Run one pass over the in-flight queue.
    ///
    /// Returns how long the caller may sleep before the next timer fires,
    /// or `None` when nothing is waiting on a timer.
    pub fn process(
        &self,
        now: Instant,
        packets: &dyn PacketSink,
        events: &dyn EventSink,
    ) -> Option<Duration> {
        let pending = {
            let mut inflight = self.inflight.lock();
            let pending = mem::take(&mut inflight.queue);
            inflight.in_pass = pending.len();
            pending
        };
        let mut acks: Vec<Packet> = self.acks.lock().drain(..).collect();

        let mut kept = VecDeque::with_capacity(pending.len());
        let mut next_wait: Option<Duration> = None;
        for ctx in pending {
            if let Some(ctx) = self.step(ctx, now, &mut acks, packets, events) {
                if ctx.state.is_timed() {
                    let wait = self.remaining(&ctx, now);
                    next_wait = Some(next_wait.map_or(wait, |w| w.min(wait)));
                }
                kept.push_back(ctx);
            }
        }

        for orphan in acks {
            debug!(
                "Dropping orphaned {:?} for packet {}",
                orphan.packet_type(),
                orphan.packet_id().unwrap_or(0)
            );
        }

        let mut inflight = self.inflight.lock();
        let arrived = mem::take(&mut inflight.queue);
        if !arrived.is_empty() {
            next_wait = Some(Duration::ZERO);
        }
        kept.extend(arrived);
        inflight.queue = kept;
        inflight.in_pass = 0;
        next_wait
    }

    /// Advance one context as far as it can go in this pass. Returns it
    /// when it is still pending.
    fn step(
        &self,
        mut ctx: InflightContext,
        now: Instant,
        acks: &mut Vec<Packet>,
        packets: &dyn PacketSink,
        events: &dyn EventSink,
    ) -> Option<InflightContext> {
        let id = ctx.packet_id;
        loop {
            match (ctx.state, ctx.flow) {
                (State::QueuedQos0, Flow::ToPublish) => {
                    let sent = self.transmit(&ctx.packet, packets).is_ok();
                    self.finish(&ctx);
                    events.emit(ClientEvent::Published {
                        packet_id: id,
                        success: sent,
                    });
                    return None;
                }
                (State::QueuedQos0, Flow::ToAcknowledge) => {
                    self.deliver(ctx, events);
                    return None;
                }
                (State::QueuedQos1, Flow::ToPublish) => {
                    return self.send_tracked(ctx, State::WaitForPuback, now, packets, events);
                }
                (State::QueuedQos1, Flow::ToAcknowledge) => {
                    self.acknowledge(Packet::Puback(Ack::new(id)), packets);
                    self.finish(&ctx);
                    self.deliver(ctx, events);
                    return None;
                }
                (State::QueuedQos2, Flow::ToPublish) => {
                    return self.send_tracked(ctx, State::WaitForPubrec, now, packets, events);
                }
                (State::QueuedQos2, Flow::ToAcknowledge) => {
                    self.acknowledge(Packet::Pubrec(Ack::new(id)), packets);
                    ctx.state = State::WaitForPubrel;
                    ctx.timestamp = now;
                    self.track(&ctx);
                    return Some(ctx);
                }
                (State::WaitForPubrel, _) => {
                    if take_ack(acks, PacketType::Pubrel, id).is_none() {
                        return Some(ctx);
                    }
                    self.acknowledge(Packet::Pubcomp(Ack::new(id)), packets);
                    self.finish(&ctx);
                    self.deliver(ctx, events);
                    return None;
                }
                (State::WaitForPuback, _) => {
                    if let Some(ack) = take_ack(acks, PacketType::Puback, id) {
                        self.complete_publish(&ctx, ack_reason(&ack), events);
                        return None;
                    }
                    match self.expiry(&ctx, now) {
                        Expiry::Pending => return Some(ctx),
                        Expiry::Retry => ctx.state = State::QueuedQos1,
                        Expiry::Exhausted => return self.exhausted(ctx, events),
                    }
                }
                (State::WaitForPubrec, _) => {
                    if let Some(ack) = take_ack(acks, PacketType::Pubrec, id) {
                        let code = ack_reason(&ack);
                        if reason_code::is_failure(code) {
                            debug!("PUBREC {} refused with {:#04x}", id, code);
                            self.complete_publish(&ctx, code, events);
                            return None;
                        }
                        ctx.state = State::SendPubrel;
                        ctx.attempt = 0;
                        continue;
                    }
                    match self.expiry(&ctx, now) {
                        Expiry::Pending => return Some(ctx),
                        Expiry::Retry => ctx.state = State::QueuedQos2,
                        Expiry::Exhausted => return self.exhausted(ctx, events),
                    }
                }
                (State::SendPubrel, _) => {
                    return self.send_tracked(ctx, State::WaitForPubcomp, now, packets, events);
                }
                (State::WaitForPubcomp, _) => {
                    if let Some(ack) = take_ack(acks, PacketType::Pubcomp, id) {
                        self.complete_publish(&ctx, ack_reason(&ack), events);
                        return None;
                    }
                    match self.expiry(&ctx, now) {
                        Expiry::Pending => return Some(ctx),
                        Expiry::Retry => ctx.state = State::SendPubrel,
                        Expiry::Exhausted => return self.exhausted(ctx, events),
                    }
                }
                (State::SendSubscribe, _) => {
                    return self.send_tracked(ctx, State::WaitForSuback, now, packets, events);
                }
                (State::WaitForSuback, _) => {
                    if let Some(Packet::Suback(suback)) = take_ack(acks, PacketType::Suback, id) {
                        self.finish(&ctx);
                        events.emit(ClientEvent::Subscribed {
                            packet_id: id,
                            return_codes: suback.return_codes,
                        });
                        return None;
                    }
                    match self.expiry(&ctx, now) {
                        Expiry::Pending => return Some(ctx),
                        Expiry::Retry => ctx.state = State::SendSubscribe,
                        Expiry::Exhausted => return self.exhausted(ctx, events),
                    }
                }
                (State::SendUnsubscribe, _) => {
                    return self.send_tracked(ctx, State::WaitForUnsuback, now, packets, events);
                }
                (State::WaitForUnsuback, _) => {
                    if let Some(Packet::Unsuback(unsuback)) =
                        take_ack(acks, PacketType::Unsuback, id)
                    {
                        self.finish(&ctx);
                        events.emit(ClientEvent::Unsubscribed {
                            packet_id: id,
                            reason_codes: unsuback.reason_codes,
                        });
                        return None;
                    }
                    match self.expiry(&ctx, now) {
                        Expiry::Pending => return Some(ctx),
                        Expiry::Retry => ctx.state = State::SendUnsubscribe,
                        Expiry::Exhausted => return self.exhausted(ctx, events),
                    }
                }
            }
        }
    }

    /// Send the packet for a queued state and move to the matching wait state.
    fn send_tracked(
        &self,
        mut ctx: InflightContext,
        next: State,
        now: Instant,
        packets: &dyn PacketSink,
        events: &dyn EventSink,
    ) -> Option<InflightContext> {
        ctx.attempt += 1;
        let packet = match ctx.state {
            State::SendPubrel => Packet::Pubrel(Ack::new(ctx.packet_id)),
            _ => ctx.packet.clone(),
        };
        let packet = if ctx.attempt > 1 { packet.with_dup() } else { packet };

        // Encode failures never succeed on retry. Transport failures are
        // left to the retry timer and the connection teardown.
        if let Err(ClientError::Codec(e)) = self.transmit(&packet, packets) {
            warn!("Dropping packet {}: {}", ctx.packet_id, e);
            self.finish(&ctx);
            events.emit(failure_event(&ctx));
            return None;
        }

        ctx.state = next;
        ctx.timestamp = now;
        self.track(&ctx);
        Some(ctx)
    }

    fn transmit(&self, packet: &Packet, packets: &dyn PacketSink) -> Result<()> {
        packets.send_packet(packet).map_err(|e| {
            debug!("Send of {:?} failed: {}", packet.packet_type(), e);
            e
        })
    }

    /// Send an acknowledgment for an inbound exchange. The exchange moves on
    /// even when the send fails: the broker resends on the next session and
    /// the duplicate is answered again.
    fn acknowledge(&self, ack: Packet, packets: &dyn PacketSink) {
        if let Err(e) = packets.send_packet(&ack) {
            warn!(
                "Could not send {:?} for packet {}: {}",
                ack.packet_type(),
                ack.packet_id().unwrap_or_default(),
                e
            );
        }
    }

    fn expiry(&self, ctx: &InflightContext, now: Instant) -> Expiry {
        if now.saturating_duration_since(ctx.timestamp) < self.config.retry_delay {
            Expiry::Pending
        } else if ctx.attempt < self.config.max_attempts {
            debug!(
                "Packet {} timed out in {:?}, attempt {} of {}",
                ctx.packet_id, ctx.state, ctx.attempt, self.config.max_attempts
            );
            Expiry::Retry
        } else {
            Expiry::Exhausted
        }
    }

    fn remaining(&self, ctx: &InflightContext, now: Instant) -> Duration {
        self.config
            .retry_delay
            .saturating_sub(now.saturating_duration_since(ctx.timestamp))
    }

    fn exhausted(&self, ctx: InflightContext, events: &dyn EventSink) -> Option<InflightContext> {
        warn!(
            "Giving up on packet {} after {} attempts in {:?}",
            ctx.packet_id, ctx.attempt, ctx.state
        );
        self.finish(&ctx);
        events.emit(failure_event(&ctx));
        None
    }

    fn complete_publish(&self, ctx: &InflightContext, code: u8, events: &dyn EventSink) {
        self.finish(ctx);
        events.emit(ClientEvent::Published {
            packet_id: ctx.packet_id,
            success: !reason_code::is_failure(code),
        });
    }

    fn deliver(&self, ctx: InflightContext, events: &dyn EventSink) {
        if let Packet::Publish(message) = ctx.packet {
            events.emit(ClientEvent::PublishReceived { message });
        }
    }

    fn track(&self, ctx: &InflightContext) {
        if ctx.is_persistent() {
            self.inflight.lock().session.track(ctx);
        }
    }

    fn finish(&self, ctx: &InflightContext) {
        let mut inflight = self.inflight.lock();
        inflight.session.remove(&ctx.key());
        if ctx.flow == Flow::ToPublish {
            inflight.ids.release(ctx.packet_id);
        }
    }

    /// Prepare for a freshly accepted connection.
    ///
    /// A clean session, or a session that belonged to another client id, is
    /// discarded. Otherwise every surviving context is queued again in its
    /// original order. Returns the number of restored contexts.
    pub fn start_session(&self, client_id: &str, clean_session: bool) -> usize {
        let mut inflight = self.inflight.lock();
        inflight.queue.clear();
        inflight.in_pass = 0;
        self.acks.lock().clear();

        if clean_session || inflight.session.client_id != client_id {
            inflight.session.reset(client_id);
            inflight.ids.clear();
            return 0;
        }

        let restored = inflight.session.restored_contexts();
        let ids: Vec<u16> = inflight.session.outbound_ids().collect();
        inflight.ids.clear();
        for id in ids {
            inflight.ids.reserve(id);
        }
        for ctx in &restored {
            inflight.session.track(ctx);
        }
        let count = restored.len();
        inflight.queue.extend(restored);
        count
    }

    /// Drop queued work on disconnect. The session is kept for the next
    /// connection.
    pub fn clear_queue(&self) {
        self.inflight.lock().queue.clear();
        self.acks.lock().clear();
    }

    pub fn session_snapshot(&self) -> Session {
        self.inflight.lock().session.clone()
    }

    /// Number of queued and in-flight contexts.
    pub fn queued_len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Received acknowledgments waiting for the next pass.
    pub fn pending_acks(&self) -> usize {
        self.acks.lock().len()
    }
}

pub(crate) fn with_packet_id(mut packet: Packet, id: u16) -> Packet {
    match &mut packet {
        Packet::Publish(p) => {
            p.packet_id = (p.qos != QoS::AtMostOnce).then_some(id);
        }
        Packet::Subscribe(s) => s.packet_id = id,
        Packet::Unsubscribe(u) => u.packet_id = id,
        _ => {}
    }
    packet
}

fn take_ack(acks: &mut Vec<Packet>, packet_type: PacketType, id: u16) -> Option<Packet> {
    let index = acks
        .iter()
        .position(|ack| ack.packet_type() == packet_type && ack.packet_id() == Some(id))?;
    Some(acks.remove(index))
}

fn ack_reason(packet: &Packet) -> u8 {
    match packet {
        Packet::Puback(a) | Packet::Pubrec(a) | Packet::Pubcomp(a) => a.reason_code,
        _ => reason_code::SUCCESS,
    }
}

fn failure_event(ctx: &InflightContext) -> ClientEvent {
    match ctx.packet {
        Packet::Subscribe(_) => ClientEvent::SubscribeFailed {
            packet_id: ctx.packet_id,
        },
        Packet::Unsubscribe(_) => ClientEvent::UnsubscribeFailed {
            packet_id: ctx.packet_id,
        },
        _ => ClientEvent::Published {
            packet_id: ctx.packet_id,
            success: false,
        },
    }
}
