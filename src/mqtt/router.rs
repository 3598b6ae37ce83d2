//! Topic Router
//!
//! Knows the three topics of the device contract and decides which consumer an
//! inbound message belongs to.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::connection::{BrokerLink, ConnectionManager, LinkError};

pub const STATUS_TOPIC: &str = "trafficlight/status";
pub const HEARTBEAT_TOPIC: &str = "trafficlight/heartbeat";
pub const CONTROL_TOPIC: &str = "trafficlight/control";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Topics {
    /// device → client, lamp state text
    pub status: String,
    /// device → client, proof-of-life
    pub heartbeat: String,
    /// client → device, `ON` / `OFF`
    pub control: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            status: STATUS_TOPIC.to_string(),
            heartbeat: HEARTBEAT_TOPIC.to_string(),
            control: CONTROL_TOPIC.to_string(),
        }
    }
}

/// Destination of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Status,
    Heartbeat,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct TopicRouter {
    topics: Topics,
}

impl TopicRouter {
    pub fn new(topics: Topics) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Registers both inbound channels. Must run on every fresh session since
    /// subscriptions do not survive a reconnect.
    ///
    /// Both subscriptions are attempted even if the first fails; the first error
    /// is returned.
    pub fn subscribe_all<L: BrokerLink>(
        &self,
        manager: &ConnectionManager<L>,
    ) -> Result<(), LinkError> {
        let mut first_error = None;
        for topic in [&self.topics.status, &self.topics.heartbeat] {
            if let Err(e) = manager.subscribe(topic) {
                error!("Subscribing to {} failed: {}", topic, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn route(&self, topic: &str) -> Route {
        if topic == self.topics.status {
            Route::Status
        } else if topic == self.topics.heartbeat {
            Route::Heartbeat
        } else {
            debug!("Ignoring message on unknown topic {}", topic);
            Route::Ignored
        }
    }
}
