//! End-to-end client tests against a scripted in-memory broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use mqlink_client::{Client, ClientConfig, ClientError, ClientEvent, ConnectOptions, Transport};
use mqlink_core::properties::{ConnackProperties, ConnectProperties};
use mqlink_core::{
    Ack, Codec, Connack, Disconnect, Packet, PacketType, ProtocolVersion, Publish, QoS, Suback,
    Subscribe, Unsuback,
};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Mode {
    /// Acknowledge everything
    #[default]
    Normal,
    /// Never answer, not even CONNECT
    Silent,
    /// Answer CONNECT and PINGREQ only
    NoAcks,
    /// Answer CONNECT only
    ConnackOnly,
}

#[derive(Default)]
struct BrokerState {
    to_client: VecDeque<u8>,
    received: Vec<Packet>,
    closed: bool,
    connack: Connack,
    mode: Mode,
}

struct Broker {
    codec: Codec,
    state: Mutex<BrokerState>,
    readable: Condvar,
}

impl Broker {
    fn new(version: ProtocolVersion) -> Arc<Self> {
        Arc::new(Self {
            codec: Codec::new(version),
            state: Mutex::new(BrokerState::default()),
            readable: Condvar::new(),
        })
    }

    fn set_connack(&self, connack: Connack) {
        self.state.lock().connack = connack;
    }

    fn set_mode(&self, mode: Mode) {
        self.state.lock().mode = mode;
    }

    fn inject(&self, packet: &Packet) {
        let mut buf = Vec::new();
        self.codec.encode(packet, &mut buf).unwrap();
        self.inject_raw(&buf);
    }

    /// Queue bytes for the client exactly as given.
    fn inject_raw(&self, bytes: &[u8]) {
        self.state.lock().to_client.extend(bytes);
        self.readable.notify_all();
    }

    fn received(&self) -> Vec<Packet> {
        self.state.lock().received.clone()
    }

    fn received_of(&self, packet_type: PacketType) -> Vec<Packet> {
        self.received()
            .into_iter()
            .filter(|p| p.packet_type() == packet_type)
            .collect()
    }

    fn reply(&self, state: &BrokerState, packet: &Packet) -> Option<Packet> {
        match (state.mode, packet) {
            (Mode::Silent, _) => None,
            (_, Packet::Connect(_)) => Some(Packet::Connack(state.connack.clone())),
            (Mode::ConnackOnly, _) => None,
            (_, Packet::Pingreq) => Some(Packet::Pingresp),
            (Mode::NoAcks, _) => None,
            (_, Packet::Publish(p)) => match (p.qos, p.packet_id) {
                (QoS::AtLeastOnce, Some(id)) => Some(Packet::Puback(Ack::new(id))),
                (QoS::ExactlyOnce, Some(id)) => Some(Packet::Pubrec(Ack::new(id))),
                _ => None,
            },
            (_, Packet::Pubrel(ack)) => Some(Packet::Pubcomp(Ack::new(ack.packet_id))),
            (_, Packet::Subscribe(s)) => Some(Packet::Suback(Suback {
                packet_id: s.packet_id,
                return_codes: s.options.iter().map(|o| o.qos as u8).collect(),
                ..Default::default()
            })),
            (_, Packet::Unsubscribe(u)) => Some(Packet::Unsuback(Unsuback {
                packet_id: u.packet_id,
                reason_codes: if self.codec.version.is_v5() {
                    vec![0; u.filters.len()]
                } else {
                    Vec::new()
                },
                ..Default::default()
            })),
            _ => None,
        }
    }

    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> mqlink_client::Result<usize> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if !state.to_client.is_empty() {
                let n = buf.len().min(state.to_client.len());
                for (slot, byte) in buf.iter_mut().zip(state.to_client.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(0);
                    }
                    self.readable.wait_until(&mut state, deadline);
                }
                None => self.readable.wait(&mut state),
            }
        }
    }
}

impl Transport for Broker {
    fn connect(&self) -> mqlink_client::Result<()> {
        let mut state = self.state.lock();
        state.closed = false;
        state.to_client.clear();
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> mqlink_client::Result<usize> {
        let (packet, _) = self
            .codec
            .decode(buf)?
            .ok_or_else(|| ClientError::Communication("partial packet".into()))?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if let Some(reply) = self.reply(&state, &packet) {
            let mut out = Vec::new();
            self.codec.encode(&reply, &mut out)?;
            state.to_client.extend(out);
        }
        state.received.push(packet);
        drop(state);
        self.readable.notify_all();
        Ok(buf.len())
    }

    fn receive(&self, buf: &mut [u8]) -> mqlink_client::Result<usize> {
        self.read(buf, None)
    }

    fn receive_timeout(&self, buf: &mut [u8], timeout: Duration) -> mqlink_client::Result<usize> {
        self.read(buf, Some(timeout))
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> ClientConfig {
    ClientConfig::new("broker.test", 1883)
        .client_id("test-client")
        .connect_timeout(Duration::from_millis(500))
}

fn record(client: &Client) -> Arc<Mutex<Vec<ClientEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    client.add_handler(move |event: &ClientEvent| sink.lock().push(event.clone()));
    events
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn has_event(events: &Arc<Mutex<Vec<ClientEvent>>>, event: &ClientEvent) -> bool {
    eventually(|| events.lock().contains(event))
}

/// Wait for `ConnectionClosed` with a reason and return the reason.
fn closed_reason(events: &Arc<Mutex<Vec<ClientEvent>>>) -> Option<String> {
    let mut reason = None;
    eventually(|| {
        reason = events.lock().iter().find_map(|e| match e {
            ClientEvent::ConnectionClosed { reason } => reason.clone(),
            _ => None,
        });
        reason.is_some()
    });
    reason
}

fn count_opened(events: &Arc<Mutex<Vec<ClientEvent>>>) -> usize {
    events
        .lock()
        .iter()
        .filter(|e| matches!(e, ClientEvent::ConnectionOpened { .. }))
        .count()
}

#[test]
fn test_connect_and_publish_qos1() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);

    let code = client.connect(ConnectOptions::default()).unwrap();
    assert!(code.is_accepted());
    assert!(client.is_connected());
    assert!(has_event(
        &events,
        &ClientEvent::ConnectionOpened {
            session_present: false
        }
    ));

    let id = client
        .publish("sensors/temp", "25.5", QoS::AtLeastOnce, false)
        .unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Published {
            packet_id: id,
            success: true
        }
    ));

    let connects = broker.received_of(PacketType::Connect);
    match &connects[0] {
        Packet::Connect(connect) => assert_eq!(connect.client_id, "test-client"),
        other => panic!("unexpected {:?}", other),
    }
    let publishes = broker.received_of(PacketType::Publish);
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].packet_id(), Some(id));
    assert!(client.session_snapshot().is_empty());
}

#[test]
fn test_connect_refused() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    broker.set_connack(Connack {
        reason_code: 5,
        ..Default::default()
    });
    let client = Client::new(config(), broker.clone()).unwrap();

    let err = client.connect(ConnectOptions::default()).unwrap_err();
    assert!(matches!(err, ClientError::ConnectionRefused(5)));
    assert!(!client.is_connected());
    assert!(broker.state.lock().closed);
}

#[test]
fn test_connect_timeout() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    broker.set_mode(Mode::Silent);
    let client = Client::new(config(), broker).unwrap();

    let start = Instant::now();
    let err = client.connect(ConnectOptions::default()).unwrap_err();
    assert!(matches!(err, ClientError::ConnectionTimeout));
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[test]
fn test_requests_rejected_while_disconnected() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();

    assert!(matches!(
        client.publish("a/b", "x", QoS::AtLeastOnce, false),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.subscribe(&["a/#"], &[QoS::AtMostOnce]),
        Err(ClientError::NotConnected)
    ));
    // Malformed requests fail before the connection check
    assert!(matches!(
        client.publish("a/+/b", "x", QoS::AtMostOnce, false),
        Err(ClientError::Codec(_))
    ));
    assert!(broker.received().is_empty());
}

#[test]
fn test_publish_qos2() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    let id = client
        .publish("a/b", vec![1u8, 2, 3], QoS::ExactlyOnce, true)
        .unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Published {
            packet_id: id,
            success: true
        }
    ));

    let pubrels = broker.received_of(PacketType::Pubrel);
    assert_eq!(pubrels.len(), 1);
    assert_eq!(pubrels[0].packet_id(), Some(id));
    assert!(client.session_snapshot().is_empty());
}

#[test]
fn test_subscribe_and_receive() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    let id = client.subscribe(&["sensors/#"], &[QoS::AtLeastOnce]).unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Subscribed {
            packet_id: id,
            return_codes: vec![1]
        }
    ));

    let mut message = Publish::new("sensors/temp", "21", QoS::AtLeastOnce, false);
    message.packet_id = Some(9);
    broker.inject(&Packet::Publish(message.clone()));

    assert!(has_event(&events, &ClientEvent::PublishReceived { message }));
    assert!(eventually(|| broker
        .received_of(PacketType::Puback)
        .iter()
        .any(|p| p.packet_id() == Some(9))));

    let id = client.unsubscribe(&["sensors/#"]).unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Unsubscribed {
            packet_id: id,
            reason_codes: Vec::new()
        }
    ));
}

#[test]
fn test_inbound_qos2_delivered_once() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    let mut message = Publish::new("a/b", "once", QoS::ExactlyOnce, false);
    message.packet_id = Some(4);
    broker.inject(&Packet::Publish(message.clone()));
    assert!(eventually(|| !broker.received_of(PacketType::Pubrec).is_empty()));

    // Redelivery before PUBREL must not reach the handlers again
    let mut redelivery = message.clone();
    redelivery.dup = true;
    broker.inject(&Packet::Publish(redelivery));
    assert!(eventually(|| broker.received_of(PacketType::Pubrec).len() == 2));

    broker.inject(&Packet::Pubrel(Ack::new(4)));
    assert!(eventually(|| broker
        .received_of(PacketType::Pubcomp)
        .iter()
        .any(|p| p.packet_id() == Some(4))));

    let received = events
        .lock()
        .iter()
        .filter(|e| matches!(e, ClientEvent::PublishReceived { .. }))
        .count();
    assert_eq!(received, 1);
}

#[test]
fn test_server_disconnect() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V5);
    let client = Client::new(config().mqtt5(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    broker.inject(&Packet::Disconnect(Disconnect::with_reason_code(0x8B)));

    assert!(eventually(|| !client.is_connected()));
    assert!(eventually(|| matches!(
        events.lock().last(),
        Some(ClientEvent::ConnectionClosed { reason: Some(_) })
    )));
    assert!(events.lock().iter().any(|e| matches!(
        e,
        ClientEvent::ConnectionClosedByServer {
            reason_code: 0x8B,
            ..
        }
    )));
}

#[test]
fn test_disconnect() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    client.disconnect().unwrap();
    assert!(!client.is_connected());
    assert_eq!(broker.received_of(PacketType::Disconnect).len(), 1);
    assert_eq!(
        events.lock().last(),
        Some(&ClientEvent::ConnectionClosed { reason: None })
    );
    assert!(matches!(
        client.publish("a/b", "x", QoS::AtMostOnce, false),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.disconnect(), Err(ClientError::NotConnected)));
}

#[test]
fn test_connack_properties_applied() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V5);
    broker.set_connack(Connack {
        properties: ConnackProperties {
            assigned_client_identifier: Some("auto-7".into()),
            maximum_packet_size: Some(64),
            ..Default::default()
        },
        ..Default::default()
    });
    let config = config().mqtt5().client_id("");
    let client = Client::new(config, broker).unwrap();
    client.connect(ConnectOptions::default()).unwrap();

    assert_eq!(client.client_id(), "auto-7");
    let large = vec![0u8; 128];
    assert!(matches!(
        client.publish("a/b", large, QoS::AtLeastOnce, false),
        Err(ClientError::Codec(_))
    ));
}

#[test]
fn test_persistent_session_resent_after_reconnect() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    broker.set_mode(Mode::NoAcks);
    let client = Client::new(config().clean_session(false), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    let id = client
        .publish("a/b", "kept", QoS::AtLeastOnce, false)
        .unwrap();
    assert!(eventually(|| broker.received_of(PacketType::Publish).len() == 1));
    client.disconnect().unwrap();
    assert_eq!(client.session_snapshot().len(), 1);

    broker.set_mode(Mode::Normal);
    client.connect(ConnectOptions::default()).unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Published {
            packet_id: id,
            success: true
        }
    ));

    let publishes = broker.received_of(PacketType::Publish);
    assert_eq!(publishes.len(), 2);
    assert!(publishes[1].dup());
    assert_eq!(publishes[1].packet_id(), Some(id));
}

#[test]
fn test_keepalive_pings_idle_link() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config().keep_alive(1), broker.clone()).unwrap();
    client.connect(ConnectOptions::default()).unwrap();

    assert!(eventually(|| !broker.received_of(PacketType::Pingreq).is_empty()));
    thread::sleep(Duration::from_millis(200));
    assert!(client.is_connected());
}

#[test]
fn test_handler_disconnect_after_server_disconnect() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V5);
    let client = Arc::new(Client::new(config().mqtt5(), broker.clone()).unwrap());
    let events = record(&client);

    let handle: Weak<Client> = Arc::downgrade(&client);
    let finished = Arc::new(AtomicBool::new(false));
    let done = finished.clone();
    client.add_handler(move |event: &ClientEvent| {
        if let ClientEvent::ConnectionClosedByServer { .. } = event {
            thread::sleep(Duration::from_millis(200));
            if let Some(client) = handle.upgrade() {
                let _ = client.disconnect();
            }
            done.store(true, Ordering::SeqCst);
        }
    });
    client.connect(ConnectOptions::default()).unwrap();

    broker.inject(&Packet::Disconnect(Disconnect::with_reason_code(0x8B)));

    assert!(eventually(|| finished.load(Ordering::SeqCst)));
    assert!(closed_reason(&events).is_some());
    assert!(!client.is_connected());

    // Nothing is left holding the teardown
    client.connect(ConnectOptions::default()).unwrap();
    assert!(client.is_connected());
    client.disconnect().unwrap();
    assert_eq!(
        events.lock().last(),
        Some(&ClientEvent::ConnectionClosed { reason: None })
    );
}

#[test]
fn test_handler_reconnects_after_connection_closed() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V5);
    let client = Arc::new(Client::new(config().mqtt5(), broker.clone()).unwrap());
    let events = record(&client);

    let handle: Weak<Client> = Arc::downgrade(&client);
    let reconnected = Arc::new(AtomicBool::new(false));
    let flag = reconnected.clone();
    client.add_handler(move |event: &ClientEvent| {
        if let ClientEvent::ConnectionClosed { reason: Some(_) } = event {
            if flag.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(client) = handle.upgrade() {
                client.connect(ConnectOptions::default()).unwrap();
            }
        }
    });
    client.connect(ConnectOptions::default()).unwrap();

    broker.inject(&Packet::Disconnect(Disconnect::with_reason_code(0x8B)));

    assert!(eventually(|| count_opened(&events) == 2));
    assert!(client.is_connected());
    assert_eq!(broker.received_of(PacketType::Connect).len(), 2);

    // The new connection delivers events too
    let id = client.publish("a/b", "again", QoS::AtLeastOnce, false).unwrap();
    assert!(has_event(
        &events,
        &ClientEvent::Published {
            packet_id: id,
            success: true
        }
    ));

    client.disconnect().unwrap();
    assert_eq!(
        events.lock().last(),
        Some(&ClientEvent::ConnectionClosed { reason: None })
    );
}

#[test]
fn test_missing_pingresp_closes_connection() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    broker.set_mode(Mode::ConnackOnly);
    let client = Client::new(config().keep_alive(1), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    let reason = closed_reason(&events).expect("connection should close");
    assert!(reason.contains("PINGRESP"), "reason: {}", reason);
    assert!(!client.is_connected());
    assert!(!broker.received_of(PacketType::Pingreq).is_empty());
    assert!(broker.state.lock().closed);

    assert!(matches!(
        client.publish("a/b", "x", QoS::AtLeastOnce, false),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.disconnect(), Err(ClientError::NotConnected)));
}

#[test]
fn test_invalid_publish_flags_close_connection() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    // PUBLISH with both QoS bits set
    broker.inject_raw(&[0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01]);

    assert!(closed_reason(&events).is_some());
    assert!(!client.is_connected());
    assert!(broker.state.lock().closed);
    assert!(!events
        .lock()
        .iter()
        .any(|e| matches!(e, ClientEvent::PublishReceived { .. })));
    assert!(broker.received_of(PacketType::Puback).is_empty());
}

#[test]
fn test_invalid_pubrel_flags_close_connection() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    // PUBREL flags must be 0010
    broker.inject_raw(&[0x60, 0x02, 0x00, 0x01]);

    assert!(closed_reason(&events).is_some());
    assert!(!client.is_connected());
    assert!(broker.received_of(PacketType::Pubcomp).is_empty());
}

#[test]
fn test_subscribe_from_broker_closes_connection() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V3_1_1);
    let client = Client::new(config(), broker.clone()).unwrap();
    let events = record(&client);
    client.connect(ConnectOptions::default()).unwrap();

    broker.inject(&Packet::Subscribe(Subscribe::new(
        3,
        vec!["a/#".into()],
        &[QoS::AtMostOnce],
    )));

    let reason = closed_reason(&events).expect("connection should close");
    assert!(reason.contains("Subscribe"), "reason: {}", reason);
    assert!(!client.is_connected());
    assert!(broker.state.lock().closed);
}

#[test]
fn test_oversized_inbound_packet_closes_connection() {
    init_logger();
    let broker = Broker::new(ProtocolVersion::V5);
    let client = Client::new(config().mqtt5(), broker.clone()).unwrap();
    let events = record(&client);
    let properties = ConnectProperties {
        maximum_packet_size: Some(64),
        ..Default::default()
    };
    client
        .connect(ConnectOptions::default().properties(properties))
        .unwrap();

    let small = Publish::new("a/b", "fits", QoS::AtMostOnce, false);
    broker.inject(&Packet::Publish(small.clone()));
    assert!(has_event(
        &events,
        &ClientEvent::PublishReceived { message: small }
    ));

    // Announces 200 MB, sends almost nothing
    broker.inject_raw(&[0x30, 0x80, 0x80, 0x80, 0x60, 0x00]);

    let reason = closed_reason(&events).expect("connection should close");
    assert!(reason.contains("too large"), "reason: {}", reason);
    assert!(!client.is_connected());
}
