//! Command Gateway
//!
//! The only path through which control messages reach the device. A command is
//! published only when both the broker link and the device are healthy; otherwise
//! the caller gets a typed denial it can show as a disabled control.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::liveness::LivenessState;
use crate::mqtt::connection::{BrokerLink, ConnectionManager, ConnectionPhase, LinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    On,
    Off,
}

impl Command {
    /// Wire payload understood by the device.
    pub fn payload(self) -> &'static str {
        match self {
            Command::On => "ON",
            Command::Off => "OFF",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.payload())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command {0:?}, expected ON or OFF")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(Command::On),
            "OFF" => Ok(Command::Off),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

/// Why a command was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum CommandDenied {
    #[error("broker not connected ({0})")]
    BrokerNotConnected(ConnectionPhase),

    #[error("device offline")]
    DeviceOffline,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command denied: {0}")]
    Denied(#[from] CommandDenied),

    #[error("command not sent: {0}")]
    Link(#[from] LinkError),

    #[error("client runtime has stopped")]
    RuntimeStopped,
}

impl CommandError {
    pub fn denial(&self) -> Option<CommandDenied> {
        match self {
            CommandError::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Gate decision. The broker reason wins when both are unhealthy since a dead
/// link also hides any heartbeat.
pub fn check(phase: ConnectionPhase, liveness: LivenessState) -> Result<(), CommandDenied> {
    if phase != ConnectionPhase::Connected {
        return Err(CommandDenied::BrokerNotConnected(phase));
    }
    if liveness != LivenessState::Online {
        return Err(CommandDenied::DeviceOffline);
    }
    Ok(())
}

pub fn commands_allowed(phase: ConnectionPhase, liveness: LivenessState) -> bool {
    check(phase, liveness).is_ok()
}

/// Checks the gate and publishes `command` on `topic`.
pub fn send<L: BrokerLink>(
    manager: &ConnectionManager<L>,
    liveness: LivenessState,
    topic: &str,
    command: Command,
) -> Result<(), CommandError> {
    check(manager.phase(), liveness)?;
    manager.publish(topic, command.payload())?;
    Ok(())
}
