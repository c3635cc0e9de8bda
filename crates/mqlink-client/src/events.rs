//! Client events.

use mqlink_core::properties::{AuthProperties, DisconnectProperties};
use mqlink_core::Publish;

/// Events delivered to registered handlers, in the order they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A message arrived from the broker. For QoS 2 this fires once PUBREL
    /// has been received and PUBCOMP sent.
    PublishReceived {
        message: Publish,
    },
    /// An outbound publish finished.
    Published {
        /// Packet ID returned by `publish`.
        packet_id: u16,
        /// False when retries ran out, the broker returned a failure reason
        /// code, or the packet could not be encoded.
        success: bool,
    },
    /// Subscribe acknowledgment.
    Subscribed {
        /// Packet ID of the SUBSCRIBE.
        packet_id: u16,
        /// Return codes for each topic (0x00-0x02 = granted QoS, 0x80 and above = failure).
        return_codes: Vec<u8>,
    },
    /// A SUBSCRIBE was never acknowledged.
    SubscribeFailed {
        packet_id: u16,
    },
    /// Unsubscribe acknowledgment.
    Unsubscribed {
        /// Packet ID of the UNSUBSCRIBE.
        packet_id: u16,
        /// Per-filter reason codes, empty before 5.0.
        reason_codes: Vec<u8>,
    },
    /// An UNSUBSCRIBE was never acknowledged.
    UnsubscribeFailed {
        packet_id: u16,
    },
    /// Connected to broker.
    ConnectionOpened {
        /// Whether the broker kept a previous session.
        session_present: bool,
    },
    /// Disconnected from broker.
    ConnectionClosed {
        /// Reason for disconnection. None after a local `disconnect()`.
        reason: Option<String>,
    },
    /// The broker sent DISCONNECT (5.0). Followed by `ConnectionClosed`.
    ConnectionClosedByServer {
        reason_code: u8,
        properties: DisconnectProperties,
    },
    /// AUTH from the broker during an enhanced authentication exchange (5.0).
    AuthReceived {
        reason_code: u8,
        properties: AuthProperties,
    },
}
