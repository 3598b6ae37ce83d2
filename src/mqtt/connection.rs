//! Broker Connection Manager
//!
//! Owns the broker session through a [`BrokerLink`] and tracks its
//! [`ConnectionPhase`]. The manager only reports what the transport does; retrying
//! a lost link is the transport's job.

use rumqttc::{AsyncClient, ClientError, QoS};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ConnectionPhase::Disconnected => "Disconnected",
            ConnectionPhase::Connecting => "Connecting",
            ConnectionPhase::Connected => "Connected",
            ConnectionPhase::Reconnecting => "Reconnecting",
            ConnectionPhase::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Lifecycle events reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker accepted the session.
    Established,
    /// Transient link loss; the transport will dial again.
    LinkLost(String),
    /// The transport is about to dial again after a loss or fault.
    RetryStarted,
    /// Unrecoverable fault such as a refused session or broken TLS setup.
    Fault(String),
    /// Session closed gracefully by either side.
    Closed,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("broker link is not usable (phase {0})")]
    NotConnected(ConnectionPhase),

    #[error("broker session has been torn down")]
    TornDown,

    #[error("transport rejected request: {0}")]
    Transport(String),
}

impl From<ClientError> for LinkError {
    fn from(e: ClientError) -> Self {
        LinkError::Transport(e.to_string())
    }
}

/// Primitive operations of a broker session.
///
/// All calls are non-blocking: they queue the request with the transport and
/// return without waiting for broker acknowledgement.
pub trait BrokerLink {
    fn subscribe(&self, topic: &str) -> Result<(), LinkError>;
    fn publish(&self, topic: &str, payload: &str) -> Result<(), LinkError>;
    fn close(&self) -> Result<(), LinkError>;
}

impl BrokerLink for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.try_subscribe(topic, QoS::AtMostOnce)?;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), LinkError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn close(&self) -> Result<(), LinkError> {
        self.try_disconnect()?;
        Ok(())
    }
}

pub struct ConnectionManager<L: BrokerLink> {
    link: L,
    phase: ConnectionPhase,
    torn_down: bool,
}

impl<L: BrokerLink> ConnectionManager<L> {
    /// Wraps a link whose connection attempt has just been started.
    pub fn new(link: L) -> Self {
        info!("Connecting to broker");
        Self {
            link,
            phase: ConnectionPhase::Connecting,
            torn_down: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Applies a transport event and returns the new phase if it changed.
    pub fn handle(&mut self, event: TransportEvent) -> Option<ConnectionPhase> {
        if self.torn_down {
            debug!("Ignoring transport event after teardown: {:?}", event);
            return None;
        }

        use ConnectionPhase::*;
        let next = match (&event, self.phase) {
            (TransportEvent::Established, _) => Connected,
            (TransportEvent::LinkLost(_), Connected | Connecting) => Reconnecting,
            (TransportEvent::LinkLost(_), _) => self.phase,
            (TransportEvent::RetryStarted, Reconnecting | Error) => Reconnecting,
            (TransportEvent::RetryStarted, _) => self.phase,
            (TransportEvent::Fault(_), _) => Error,
            (TransportEvent::Closed, _) => Disconnected,
        };

        match &event {
            TransportEvent::LinkLost(reason) => warn!("Broker link lost: {}", reason),
            TransportEvent::Fault(reason) => error!("Broker transport fault: {}", reason),
            _ => {}
        }

        if next == self.phase {
            return None;
        }
        info!("Connection phase {} -> {}", self.phase, next);
        self.phase = next;
        Some(next)
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.ensure_usable()?;
        self.link.subscribe(topic)?;
        info!("Subscribed to {}", topic);
        Ok(())
    }

    /// Fire-and-forget publish. Refused unless the phase is `Connected`.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), LinkError> {
        self.ensure_usable()?;
        self.link.publish(topic, payload)?;
        debug!("Published {:?} to {}", payload, topic);
        Ok(())
    }

    fn ensure_usable(&self) -> Result<(), LinkError> {
        if self.torn_down {
            warn!("Broker request after teardown");
            return Err(LinkError::TornDown);
        }
        if self.phase != ConnectionPhase::Connected {
            warn!("Broker request while {}", self.phase);
            return Err(LinkError::NotConnected(self.phase));
        }
        Ok(())
    }

    /// Closes the session. Only the first call reaches the transport.
    pub fn teardown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        if let Err(e) = self.link.close() {
            // The event loop may already be gone; the session is dead either way.
            warn!("Closing broker session failed: {}", e);
        }
        self.phase = ConnectionPhase::Disconnected;
        info!("Broker session closed");
        true
    }
}
