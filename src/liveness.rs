//! Liveness Monitor
//!
//! Infers whether the physical device is alive from the arrival of heartbeat
//! messages. The broker link being up says nothing about the device: it can lose
//! power while the broker keeps serving us, so only the device's own proof-of-life
//! counts.
//!
//! ```text
//!            heartbeat                         tick, elapsed > timeout
//! Offline ─────────────────► Online ─────────────────────────────────► Offline
//!  (initial)                  │  ▲                                      (lamps forced off)
//!                             └──┘ heartbeat (timestamp refreshed)
//! ```
//!
//! All methods take the current instant as an argument so the caller decides the
//! clock; the runtime passes `Instant::now()`, tests pass synthetic instants.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Silence after which the device is presumed dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Period of the liveness check.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LivenessState {
    Online,
    #[default]
    Offline,
}

impl fmt::Display for LivenessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LivenessState::Online => write!(f, "Online"),
            LivenessState::Offline => write!(f, "Offline"),
        }
    }
}

/// Result of feeding an event into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessTransition {
    /// State did not change.
    Unchanged,
    /// First heartbeat after silence.
    CameOnline,
    /// Heartbeat timeout expired; stale lamp data must be discarded.
    WentOffline,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    state: LivenessState,
    last_heartbeat: Option<Instant>,
    timeout: Duration,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT)
    }
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: LivenessState::Offline,
            last_heartbeat: None,
            timeout,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records a heartbeat arrival. Payload content is irrelevant to liveness.
    pub fn heartbeat(&mut self, now: Instant) -> LivenessTransition {
        // Queue order can hand us an older instant than one already stored.
        self.last_heartbeat = Some(match self.last_heartbeat {
            Some(previous) if previous > now => previous,
            _ => now,
        });

        match self.state {
            LivenessState::Offline => {
                info!("Heartbeat received, device is online");
                self.state = LivenessState::Online;
                LivenessTransition::CameOnline
            }
            LivenessState::Online => {
                debug!("Heartbeat received");
                LivenessTransition::Unchanged
            }
        }
    }

    /// Periodic check. Goes offline when the last heartbeat is older than the timeout.
    pub fn tick(&mut self, now: Instant) -> LivenessTransition {
        if self.state == LivenessState::Offline {
            return LivenessTransition::Unchanged;
        }

        let elapsed = self
            .last_heartbeat
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if elapsed > self.timeout {
            warn!(
                "No heartbeat for {} ms (timeout {} ms), device is offline",
                elapsed.as_millis(),
                self.timeout.as_millis()
            );
            self.state = LivenessState::Offline;
            LivenessTransition::WentOffline
        } else {
            LivenessTransition::Unchanged
        }
    }

    /// Back to the initial state; used when a new broker session starts.
    pub fn reset(&mut self) {
        self.state = LivenessState::Offline;
    }
}
