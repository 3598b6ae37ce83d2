//! Single-owner core of the remote.
//!
//! [`TrafficLightClient`] owns every stateful piece (connection manager, router,
//! liveness monitor, lamp state) and is driven by plain method calls, one event at
//! a time. Whoever owns it (the runtime's control loop, or a test) is the event
//! loop, so no locking is involved.
//!
//! The broker session and the periodic liveness timer are acquired together in
//! [`TrafficLightClient::new`] and released together by
//! [`TrafficLightClient::teardown`], which also runs on drop.

use chrono::Local;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gateway::{self, Command, CommandError};
use crate::lamp::{self, LampState};
use crate::liveness::{LivenessMonitor, LivenessState, LivenessTransition};
use crate::mqtt::connection::{BrokerLink, ConnectionManager, ConnectionPhase, TransportEvent};
use crate::mqtt::router::{Route, TopicRouter, Topics};
use crate::state::Snapshot;

/// A repeating timer that can be stopped.
pub trait TimerHandle {
    fn cancel(&mut self);
}

impl TimerHandle for AbortHandle {
    fn cancel(&mut self) {
        self.abort();
    }
}

/// Whether an event changed what the presentation layer would show.
pub type Changed = bool;

pub struct TrafficLightClient<L: BrokerLink, T: TimerHandle> {
    manager: ConnectionManager<L>,
    router: TopicRouter,
    liveness: LivenessMonitor,
    lamp: LampState,
    raw_status: Option<String>,
    last_heartbeat_at: Option<chrono::DateTime<Local>>,
    messages_received: usize,
    commands_sent: usize,
    timer: Option<T>,
}

impl<L: BrokerLink, T: TimerHandle> TrafficLightClient<L, T> {
    /// Takes ownership of a freshly dialed session and its liveness timer.
    pub fn new(link: L, timer: T, topics: Topics, heartbeat_timeout: Duration) -> Self {
        Self {
            manager: ConnectionManager::new(link),
            router: TopicRouter::new(topics),
            liveness: LivenessMonitor::new(heartbeat_timeout),
            lamp: LampState::Off,
            raw_status: None,
            last_heartbeat_at: None,
            messages_received: 0,
            commands_sent: 0,
            timer: Some(timer),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.manager.phase()
    }

    pub fn liveness(&self) -> LivenessState {
        self.liveness.state()
    }

    pub fn lamp(&self) -> LampState {
        self.lamp
    }

    pub fn link(&self) -> &L {
        self.manager.link()
    }

    pub fn is_torn_down(&self) -> bool {
        self.manager.is_torn_down()
    }

    pub fn commands_allowed(&self) -> bool {
        gateway::commands_allowed(self.phase(), self.liveness())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            raw_status: self.raw_status.clone(),
            last_heartbeat_at: self.last_heartbeat_at,
            messages_received: self.messages_received,
            commands_sent: self.commands_sent,
            ..Snapshot::new(self.phase(), self.liveness(), self.lamp)
        }
    }

    /// Applies a broker lifecycle event.
    ///
    /// Every new session starts from a clean slate: device data from the previous
    /// session is discarded and both topics are subscribed again.
    pub fn on_transport(&mut self, event: TransportEvent) -> Changed {
        let Some(phase) = self.manager.handle(event) else {
            return false;
        };

        if phase == ConnectionPhase::Connected {
            self.liveness.reset();
            self.force_lamps_off();
            if let Err(e) = self.router.subscribe_all(&self.manager) {
                warn!("Session established without full subscriptions: {}", e);
            }
        }
        true
    }

    /// Dispatches an inbound message by topic.
    pub fn on_message(&mut self, topic: &str, payload: &str, now: Instant) -> Changed {
        if self.is_torn_down() {
            return false;
        }

        match self.router.route(topic) {
            Route::Status => {
                self.messages_received += 1;
                let parsed = lamp::parse(payload);
                debug!("Status {:?} -> {}", payload, parsed);
                self.lamp = parsed;
                self.raw_status = Some(payload.to_string());
                true
            }
            Route::Heartbeat => {
                self.messages_received += 1;
                self.last_heartbeat_at = Some(Local::now());
                self.liveness.heartbeat(now);
                true
            }
            Route::Ignored => false,
        }
    }

    /// Periodic liveness check.
    pub fn on_tick(&mut self, now: Instant) -> Changed {
        if self.is_torn_down() {
            return false;
        }
        match self.liveness.tick(now) {
            LivenessTransition::WentOffline => {
                self.force_lamps_off();
                true
            }
            _ => false,
        }
    }

    /// Sends a control command if the whole path is healthy.
    pub fn send_command(&mut self, command: Command) -> Result<(), CommandError> {
        let topic = &self.router.topics().control;
        match gateway::send(&self.manager, self.liveness.state(), topic, command) {
            Ok(()) => {
                self.commands_sent += 1;
                info!("Command {} sent", command);
                Ok(())
            }
            Err(e) => {
                warn!("Command {} not sent: {}", command, e);
                Err(e)
            }
        }
    }

    /// Cancels the liveness timer and closes the session. Returns `false` when
    /// both were already released.
    pub fn teardown(&mut self) -> bool {
        let timer_released = match self.timer.take() {
            Some(mut timer) => {
                timer.cancel();
                debug!("Liveness timer cancelled");
                true
            }
            None => false,
        };
        let session_released = self.manager.teardown();
        timer_released || session_released
    }

    fn force_lamps_off(&mut self) {
        self.lamp = LampState::Off;
        self.raw_status = None;
    }
}

impl<L: BrokerLink, T: TimerHandle> Drop for TrafficLightClient<L, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
