//! Threaded MQTT client.
//!
//! `connect` performs the CONNECT / CONNACK exchange on the calling thread,
//! then starts four background threads:
//!
//! - `mqlink-recv` reads and routes packets,
//! - `mqlink-keepalive` sends PINGREQ when the link has been idle,
//! - `mqlink-inflight` runs delivery passes,
//! - `mqlink-dispatch` hands events to the registered handlers.
//!
//! `publish`, `subscribe` and `unsubscribe` only queue work and return the
//! packet id. Completion is reported through `ClientEvent`s.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, error, info, warn};
use mqlink_core::properties::{AuthProperties, PublishProperties, SubscribeProperties};
use mqlink_core::{
    Auth, Codec, Connack, Connect, ConnectReturnCode, Disconnect, Packet, ProtocolError,
    ProtocolVersion, Publish, QoS, Subscribe, SubscriptionOptions, Unsubscribe,
};
use parking_lot::{Condvar, Mutex};

use crate::config::{ClientConfig, ConnectOptions};
use crate::delivery::{self, DeliveryConfig, DeliveryEngine, EventSink, Inbound, PacketSink};
use crate::dispatcher::{Dispatcher, EventHandler, Signal};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::session::Session;
use crate::transport::{TcpTransport, TlsTransport, Transport, TransportReader};

/// State shared between the client handle and its background threads.
struct Shared {
    config: ClientConfig,
    version: ProtocolVersion,
    transport: Box<dyn Transport>,
    codec: Mutex<Codec>,
    engine: DeliveryEngine,
    dispatcher: Dispatcher,
    running: AtomicBool,
    /// Serializes connect and disconnect
    lifecycle: Mutex<()>,
    inflight_signal: Signal,
    keepalive_signal: Signal,
    pingresp: Signal,
    last_send: Mutex<Instant>,
    keep_alive: Mutex<Duration>,
    client_id: Mutex<String>,
    /// Set while `shutdown` runs
    tearing_down: Mutex<bool>,
    teardown_done: Condvar,
    workers: ThreadList,
    dispatch_threads: ThreadList,
}

/// Thread handles tagged with the dispatcher epoch they were started for.
type ThreadList = Mutex<Vec<(u64, JoinHandle<()>)>>;

/// MQTT client.
///
/// Dropping the client disconnects it.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Create a client over the given transport.
    pub fn new<T: Transport + 'static>(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let version = config.version()?;

        let mut codec = Codec::new(version);
        if let Some(max) = config.maximum_packet_size {
            codec = codec.with_maximum_packet_size(max);
        }

        let shared = Shared {
            version,
            transport: Box::new(transport),
            codec: Mutex::new(codec),
            engine: DeliveryEngine::new(DeliveryConfig::from(&config)),
            dispatcher: Dispatcher::new(),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            inflight_signal: Signal::new(),
            keepalive_signal: Signal::new(),
            pingresp: Signal::new(),
            last_send: Mutex::new(Instant::now()),
            keep_alive: Mutex::new(Duration::from_secs(config.keep_alive as u64)),
            client_id: Mutex::new(config.client_id.clone()),
            tearing_down: Mutex::new(false),
            teardown_done: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            dispatch_threads: Mutex::new(Vec::new()),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Create a client that connects over TCP, or TLS when `tls.enabled` is set.
    pub fn with_tcp(config: ClientConfig) -> Result<Self> {
        if config.tls.enabled {
            let transport = TlsTransport::new(&config)?;
            Self::new(config, transport)
        } else {
            let transport = TcpTransport::from_config(&config);
            Self::new(config, transport)
        }
    }

    /// Connect to the broker.
    ///
    /// Blocks until CONNACK arrives or the connect timeout passes. A refusal
    /// closes the transport and returns `ClientError::ConnectionRefused`
    /// with the broker's return code.
    ///
    /// May be called from an event handler, for example to reconnect after
    /// `ConnectionClosed`.
    pub fn connect(&self, options: ConnectOptions) -> Result<ConnectReturnCode> {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock();
        if shared.running.load(Ordering::SeqCst) {
            return Err(ClientError::InvalidState("already connected".into()));
        }
        shared.reap_workers();
        join_matching(&shared.dispatch_threads, |_, handle| handle.is_finished());

        let connect = shared.connect_packet(options);
        let clean_session = connect.clean_session;

        let mut codec = Codec::new(shared.version);
        if let Some(max) = shared.config.maximum_packet_size {
            codec = codec.with_maximum_packet_size(max);
        }
        if let Some(max) = connect.properties.maximum_packet_size {
            codec = codec.with_maximum_incoming_size(max);
        }
        *shared.codec.lock() = codec;

        // A CONNECT that fails to encode never opens the transport
        let mut buf = Vec::new();
        codec.encode(&Packet::Connect(connect.clone()), &mut buf)?;

        info!(
            "Connecting to {}:{} as '{}' (MQTT {})",
            shared.config.host, shared.config.port, connect.client_id, shared.version
        );
        shared.transport.connect()?;
        let connack = match shared
            .transport
            .send(&buf)
            .and_then(|_| shared.await_connack())
        {
            Ok(connack) => connack,
            Err(e) => {
                shared.transport.close();
                return Err(e);
            }
        };

        let code = connack.return_code();
        if !code.is_accepted() {
            warn!("Connection refused: {}", code);
            shared.transport.close();
            return Err(ClientError::ConnectionRefused(code.0));
        }

        let client_id = shared.apply_connack(&connack, &connect);
        let restored = shared.engine.start_session(&client_id, clean_session);
        if restored > 0 {
            info!("Resending {} in-flight messages from the previous session", restored);
        }

        *shared.last_send.lock() = Instant::now();
        shared.pingresp.reset();
        shared.keepalive_signal.reset();
        let epoch = shared.dispatcher.restart();
        shared.running.store(true, Ordering::SeqCst);

        if let Err(e) = Self::spawn_threads(shared, epoch) {
            error!("Failed to start client threads: {}", e);
            shared.shutdown(Some(format!("thread spawn failed: {}", e)));
            return Err(e.into());
        }

        info!(
            "Connected as '{}' (session present: {})",
            client_id, connack.session_present
        );
        shared.dispatcher.push(ClientEvent::ConnectionOpened {
            session_present: connack.session_present,
        });
        shared.inflight_signal.notify();
        Ok(code)
    }

    fn spawn_threads(shared: &Arc<Shared>, epoch: u64) -> std::io::Result<()> {
        let loops: [(&str, fn(&Shared)); 3] = [
            ("mqlink-recv", Shared::receive_loop),
            ("mqlink-keepalive", Shared::keepalive_loop),
            ("mqlink-inflight", Shared::inflight_loop),
        ];
        for (name, body) in loops {
            let worker = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || body(&worker))?;
            shared.workers.lock().push((epoch, handle));
        }

        let worker = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("mqlink-dispatch".to_string())
            .spawn(move || worker.dispatcher.run(epoch))?;
        shared.dispatch_threads.lock().push((epoch, handle));
        Ok(())
    }

    /// Send DISCONNECT and stop the background threads.
    pub fn disconnect(&self) -> Result<()> {
        self.disconnect_with(Disconnect::default())
    }

    /// Disconnect with a 5.0 reason code and properties.
    ///
    /// Returns once every event of the closed connection has been handed to
    /// the handlers, unless called from a handler.
    pub fn disconnect_with(&self, disconnect: Disconnect) -> Result<()> {
        let shared = &self.shared;
        let (sent, ended) = {
            let _lifecycle = shared.lifecycle.lock();
            let sent = if shared.running.load(Ordering::SeqCst) {
                let sent = shared.send_packet(&Packet::Disconnect(disconnect));
                shared.shutdown(None);
                sent
            } else {
                Err(ClientError::NotConnected)
            };
            shared.reap_workers();
            (sent, shared.dispatcher.epoch())
        };

        // Outside the lifecycle lock: a handler may be waiting on it
        join_matching(&shared.dispatch_threads, |epoch, _| epoch <= ended);
        sent
    }

    /// Queue a message for publishing and return its packet id.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<u16> {
        self.publish_with_properties(topic, payload, qos, retain, PublishProperties::default())
    }

    /// Publish with 5.0 properties.
    pub fn publish_with_properties(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
        properties: PublishProperties,
    ) -> Result<u16> {
        let mut publish = Publish::new(topic, payload, qos, retain);
        publish.properties = properties;
        self.enqueue(Packet::Publish(publish))
    }

    /// Subscribe to topic filters, one QoS per filter.
    pub fn subscribe(&self, filters: &[&str], qos_levels: &[QoS]) -> Result<u16> {
        self.enqueue(Packet::Subscribe(Subscribe::new(0, owned(filters), qos_levels)))
    }

    /// Subscribe with full 5.0 subscription options.
    pub fn subscribe_with_options(
        &self,
        filters: &[&str],
        options: &[SubscriptionOptions],
        properties: SubscribeProperties,
    ) -> Result<u16> {
        let subscribe = Subscribe {
            filters: owned(filters),
            options: options.to_vec(),
            properties,
            ..Default::default()
        };
        self.enqueue(Packet::Subscribe(subscribe))
    }

    /// Unsubscribe from topic filters.
    pub fn unsubscribe(&self, filters: &[&str]) -> Result<u16> {
        self.enqueue(Packet::Unsubscribe(Unsubscribe::new(0, owned(filters))))
    }

    /// Send AUTH (5.0 enhanced authentication). The reply arrives as
    /// `ClientEvent::AuthReceived`.
    pub fn authenticate(&self, reason_code: u8, properties: AuthProperties) -> Result<()> {
        let packet = Packet::Auth(Auth {
            reason_code,
            properties,
        });
        self.validate(&packet)?;
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.shared.send_packet(&packet)
    }

    /// Register an event handler. Handlers run in registration order.
    pub fn add_handler<H: EventHandler + 'static>(&self, handler: H) {
        self.shared.dispatcher.add_handler(Box::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Client identifier of the current session, as assigned by the broker
    /// when it picked one.
    pub fn client_id(&self) -> String {
        self.shared.client_id.lock().clone()
    }

    /// Copy of the in-flight session state.
    pub fn session_snapshot(&self) -> Session {
        self.shared.engine.session_snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn enqueue(&self, packet: Packet) -> Result<u16> {
        self.validate(&packet)?;
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let id = self.shared.engine.enqueue(packet, Instant::now())?;
        self.shared.inflight_signal.notify();
        Ok(id)
    }

    /// Encode the packet with a stand-in id so malformed requests fail
    /// on the caller's thread.
    fn validate(&self, packet: &Packet) -> Result<()> {
        let stand_in = delivery::with_packet_id(packet.clone(), 1);
        let codec = *self.shared.codec.lock();
        codec.encode(&stand_in, &mut Vec::new())?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn owned(filters: &[&str]) -> Vec<String> {
    filters.iter().map(|f| f.to_string()).collect()
}

impl Shared {
    fn connect_packet(&self, options: ConnectOptions) -> Connect {
        let config = &self.config;
        Connect {
            clean_session: options.clean_session.unwrap_or(config.clean_session),
            keep_alive: options.keep_alive.unwrap_or(config.keep_alive),
            client_id: options.client_id.unwrap_or_else(|| config.client_id.clone()),
            will: options.will,
            username: options.username.or_else(|| config.username.clone()),
            password: options
                .password
                .or_else(|| config.password.clone().map(String::into_bytes)),
            properties: options.properties,
        }
    }

    fn await_connack(&self) -> Result<Connack> {
        let deadline = Instant::now() + self.config.connect_timeout_duration();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::ConnectionTimeout);
            }

            let mut first = [0u8; 1];
            if self.transport.receive_timeout(&mut first, remaining)? == 0 {
                return Err(if Instant::now() >= deadline {
                    ClientError::ConnectionTimeout
                } else {
                    ClientError::ConnectionClosed
                });
            }

            let codec = *self.codec.lock();
            let packet = codec.read_packet(first[0], &mut TransportReader::new(&*self.transport))?;
            match packet {
                Packet::Connack(connack) => return Ok(connack),
                Packet::Auth(auth) => {
                    debug!("AUTH {:#04x} during connect", auth.reason_code);
                    self.dispatcher.push(ClientEvent::AuthReceived {
                        reason_code: auth.reason_code,
                        properties: auth.properties,
                    });
                }
                other => {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "expected CONNACK, got {:?}",
                        other.packet_type()
                    ))
                    .into())
                }
            }
        }
    }

    /// Apply 5.0 CONNACK properties. Returns the effective client id.
    fn apply_connack(&self, connack: &Connack, connect: &Connect) -> String {
        let properties = &connack.properties;

        if let Some(max) = properties.maximum_packet_size {
            let mut codec = self.codec.lock();
            let cap = codec.maximum_packet_size.map_or(max, |own| own.min(max));
            codec.maximum_packet_size = Some(cap);
            debug!("Outbound packets capped at {} bytes", cap);
        }

        let keep_alive = properties.server_keep_alive.unwrap_or(connect.keep_alive);
        if keep_alive != connect.keep_alive {
            debug!("Broker set keep-alive to {}s", keep_alive);
        }
        *self.keep_alive.lock() = Duration::from_secs(keep_alive as u64);

        let client_id = properties
            .assigned_client_identifier
            .clone()
            .unwrap_or_else(|| connect.client_id.clone());
        *self.client_id.lock() = client_id.clone();
        client_id
    }

    fn receive_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let result = self.read_packet().and_then(|packet| self.route(packet));
            if let Err(e) = result {
                if self.running.load(Ordering::SeqCst) {
                    error!("Receive loop failed: {}", e);
                    self.shutdown(Some(e.to_string()));
                }
                break;
            }
        }
        debug!("Receive loop stopped");
    }

    fn read_packet(&self) -> Result<Packet> {
        let mut first = [0u8; 1];
        if self.transport.receive(&mut first)? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        let codec = *self.codec.lock();
        Ok(codec.read_packet(first[0], &mut TransportReader::new(&*self.transport))?)
    }

    fn route(&self, packet: Packet) -> Result<()> {
        debug!("Received {:?}", packet.packet_type());
        match packet {
            Packet::Pingresp => self.pingresp.notify(),
            Packet::Disconnect(disconnect) => {
                info!("Broker sent DISCONNECT ({:#04x})", disconnect.reason_code);
                self.dispatcher.push(ClientEvent::ConnectionClosedByServer {
                    reason_code: disconnect.reason_code,
                    properties: disconnect.properties,
                });
                self.shutdown(Some(format!(
                    "disconnected by broker ({:#04x})",
                    disconnect.reason_code
                )));
            }
            Packet::Auth(auth) => self.dispatcher.push(ClientEvent::AuthReceived {
                reason_code: auth.reason_code,
                properties: auth.properties,
            }),
            Packet::Connect(_)
            | Packet::Connack(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::Pingreq => {
                warn!("Broker sent {:?}, closing", packet.packet_type());
                return Err(ProtocolError::MalformedPacket(format!(
                    "unexpected {:?} from broker",
                    packet.packet_type()
                ))
                .into());
            }
            other => match self.engine.receive(other, Instant::now()) {
                Inbound::Queued => self.inflight_signal.notify(),
                Inbound::Reply(reply) => self.send_packet(&reply)?,
                Inbound::Discarded => {}
            },
        }
        Ok(())
    }

    fn keepalive_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let interval = *self.keep_alive.lock();
            if interval.is_zero() {
                self.keepalive_signal.wait(None);
                continue;
            }

            let idle = self.last_send.lock().elapsed();
            if idle < interval {
                self.keepalive_signal.wait(Some(interval - idle));
                continue;
            }

            self.pingresp.reset();
            if let Err(e) = self.send_packet(&Packet::Pingreq) {
                error!("PINGREQ failed: {}", e);
                self.shutdown(Some(e.to_string()));
                break;
            }
            if !self.pingresp.wait(Some(interval)) && self.running.load(Ordering::SeqCst) {
                warn!("No PINGRESP within {:?}", interval);
                self.shutdown(Some("no PINGRESP from broker".into()));
                break;
            }
        }
        debug!("Keep-alive loop stopped");
    }

    fn inflight_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            let wait = self.engine.process(Instant::now(), self, self);
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.inflight_signal.wait(wait);
        }
        debug!("In-flight loop stopped");
    }

    /// Tear the connection down once. Joins the receive, keep-alive and
    /// in-flight threads except the caller's own, and emits
    /// `ConnectionClosed` last. Never joins a dispatch thread, whose
    /// handlers may be blocked on this client.
    fn shutdown(&self, reason: Option<String>) {
        {
            let mut tearing_down = self.tearing_down.lock();
            if !self.running.swap(false, Ordering::SeqCst) {
                return;
            }
            *tearing_down = true;
        }
        match &reason {
            Some(reason) => warn!("Connection lost: {}", reason),
            None => info!("Disconnected"),
        }

        self.transport.close();
        self.inflight_signal.notify();
        self.keepalive_signal.notify();
        self.pingresp.notify();

        join_matching(&self.workers, |_, _| true);
        self.engine.clear_queue();

        self.dispatcher.close_with(ClientEvent::ConnectionClosed { reason });

        *self.tearing_down.lock() = false;
        self.teardown_done.notify_all();
    }

    /// Wait out a teardown running on another thread, then join the worker
    /// threads it left behind.
    fn reap_workers(&self) {
        let mut tearing_down = self.tearing_down.lock();
        self.teardown_done.wait_while(&mut tearing_down, |busy| *busy);
        drop(tearing_down);
        join_matching(&self.workers, |_, _| true);
    }
}

/// Join the handles `pick` selects. The current thread's own handle is
/// never joined and stays in the list.
fn join_matching<F>(handles: &ThreadList, pick: F)
where
    F: Fn(u64, &JoinHandle<()>) -> bool,
{
    let current = thread::current().id();
    let picked = {
        let mut list = handles.lock();
        let (picked, kept): (Vec<_>, Vec<_>) = mem::take(&mut *list)
            .into_iter()
            .partition(|(epoch, handle)| handle.thread().id() != current && pick(*epoch, handle));
        *list = kept;
        picked
    };
    for (_, handle) in picked {
        let name = handle.thread().name().unwrap_or("mqlink").to_string();
        if handle.join().is_err() {
            error!("Thread {} panicked", name);
        }
    }
}

impl PacketSink for Shared {
    fn send_packet(&self, packet: &Packet) -> Result<()> {
        let codec = *self.codec.lock();
        let mut buf = Vec::new();
        codec.encode(packet, &mut buf)?;
        self.transport.send(&buf)?;
        *self.last_send.lock() = Instant::now();
        debug!("Sent {:?} ({} bytes)", packet.packet_type(), buf.len());
        Ok(())
    }
}

impl EventSink for Shared {
    fn emit(&self, event: ClientEvent) {
        self.dispatcher.push(event);
    }
}
