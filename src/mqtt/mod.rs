//! # MQTT plumbing
//!
//! Everything that touches the broker lives here:
//!
//! ```text
//! mqtt/
//! ├── endpoint.rs    - broker URL → rumqttc options
//! ├── connection.rs  - session ownership and connection phase
//! └── router.rs      - topic contract and inbound dispatch
//! ```
//!
//! [`translate`] maps raw rumqttc event-loop output onto the transport-neutral
//! [`Inbound`] events the core understands, so nothing outside this module needs
//! to know rumqttc's packet types.

pub mod connection;
pub mod endpoint;
pub mod router;

use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet};

use connection::TransportEvent;

/// Something the broker session produced that the core cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Transport(TransportEvent),
    Message { topic: String, payload: String },
}

/// Classifies one poll result. Returns `None` for protocol chatter (pings, acks).
pub fn translate(polled: Result<Event, ConnectionError>) -> Option<Inbound> {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                Some(Inbound::Transport(TransportEvent::Established))
            } else {
                Some(Inbound::Transport(TransportEvent::Fault(format!(
                    "broker refused session: {:?}",
                    ack.code
                ))))
            }
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => Some(Inbound::Message {
            topic: publish.topic,
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        }),
        Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
            Some(Inbound::Transport(TransportEvent::Closed))
        }
        Ok(_) => None,
        Err(e) => Some(Inbound::Transport(classify_error(e))),
    }
}

fn classify_error(e: ConnectionError) -> TransportEvent {
    match e {
        ConnectionError::ConnectionRefused(code) => {
            TransportEvent::Fault(format!("broker refused session: {:?}", code))
        }
        ConnectionError::Tls(e) => TransportEvent::Fault(format!("tls: {}", e)),
        ConnectionError::NotConnAck(packet) => {
            TransportEvent::Fault(format!("expected ConnAck, got {:?}", packet))
        }
        // Every client handle is gone; nothing can be sent anymore.
        ConnectionError::RequestsDone => TransportEvent::Closed,
        other => TransportEvent::LinkLost(other.to_string()),
    }
}
