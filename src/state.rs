//! State Aggregator
//!
//! Read-only projection of connection phase, device liveness and lamp state
//! for whatever presents them.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::gateway;
use crate::lamp::LampState;
use crate::liveness::LivenessState;
use crate::mqtt::connection::ConnectionPhase;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub phase: ConnectionPhase,
    pub liveness: LivenessState,
    pub lamp: LampState,
    /// Last status payload as sent by the device, cleared when lamps are forced off.
    pub raw_status: Option<String>,
    /// Wall-clock arrival of the latest heartbeat, for display only.
    pub last_heartbeat_at: Option<DateTime<Local>>,
    pub commands_allowed: bool,
    pub messages_received: usize,
    pub commands_sent: usize,
}

impl Snapshot {
    pub fn new(
        phase: ConnectionPhase,
        liveness: LivenessState,
        lamp: LampState,
    ) -> Self {
        Self {
            phase,
            liveness,
            lamp,
            commands_allowed: gateway::commands_allowed(phase, liveness),
            ..Default::default()
        }
    }

    /// The triple the presentation layer renders.
    pub fn triple(&self) -> (ConnectionPhase, LivenessState, LampState) {
        (self.phase, self.liveness, self.lamp)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<12} device {:<7} {} {}",
            self.phase.to_string(),
            self.liveness.to_string(),
            self.lamp,
            self.raw_status.as_deref().unwrap_or("-")
        )?;
        if !self.commands_allowed {
            write!(f, " (controls disabled)")?;
        }
        Ok(())
    }
}
