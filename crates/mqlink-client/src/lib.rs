//! mqlink-client - Threaded MQTT client with QoS 0/1/2 delivery tracking.
//!
//! The client speaks MQTT 3.1, 3.1.1 and 5.0 over TCP or TLS. Outgoing
//! requests are queued and driven by a background delivery engine that
//! retries unacknowledged packets and keeps session state across
//! reconnects. Results come back as [`ClientEvent`]s on a dispatch thread.
//!
//! # Example
//!
//! ```ignore
//! use mqlink_client::{Client, ClientConfig, ClientEvent, ConnectOptions};
//! use mqlink_core::QoS;
//!
//! let config = ClientConfig::new("localhost", 1883)
//!     .client_id("my-client")
//!     .mqtt5();
//!
//! let client = Client::with_tcp(config)?;
//! client.add_handler(|event: &ClientEvent| println!("{:?}", event));
//! client.connect(ConnectOptions::default())?;
//!
//! client.subscribe(&["sensors/#"], &[QoS::AtLeastOnce])?;
//! client.publish("sensors/temp", "25.5", QoS::ExactlyOnce, false)?;
//! ```

mod client;
mod config;
mod delivery;
mod dispatcher;
mod error;
mod events;
mod inflight;
mod packet_id;
mod session;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, ConnectOptions, TlsConfig};
pub use delivery::{DeliveryConfig, DeliveryEngine, EventSink, Inbound, PacketSink};
pub use dispatcher::{Dispatcher, EventHandler, Signal};
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use inflight::{Flow, InflightContext, InflightKey, State};
pub use packet_id::PacketIdAllocator;
pub use session::Session;
pub use transport::{TcpTransport, TlsTransport, Transport, TransportReader};
