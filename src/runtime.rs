//! # Runtime
//!
//! Wires the core to a real broker on tokio.
//!
//! ```text
//! rumqttc EventLoop ─► pump task ──┐
//!                                  │
//! interval ─────────► tick task ───┼─► mpsc<ClientEvent> ─► control loop ─► watch<Snapshot>
//!                                  │                        (owns TrafficLightClient)
//! ClientHandle::send_command ──────┘
//! ```
//!
//! Every state change happens inside the control loop, one event at a time, in
//! channel order. The pump and tick tasks only forward.
//!
//! The runtime lifecycle is a statum typestate:
//! `ClientRuntime<Configured>` → `start()` → `ClientRuntime<Running>` → `shutdown()` →
//! `ClientRuntime<Stopped>`.

use rumqttc::{AsyncClient, EventLoop};
use statum::{machine, state};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{TimerHandle, TrafficLightClient};
use crate::config::ClientConfig;
use crate::gateway::{Command, CommandError};
use crate::mqtt::connection::{BrokerLink, TransportEvent};
use crate::mqtt::endpoint::{BrokerEndpoint, EndpointError};
use crate::mqtt::{self, Inbound};
use crate::state::Snapshot;

const EVENT_QUEUE: usize = 64;
const REQUEST_QUEUE: usize = 32;
/// Time the pump gets to flush the DISCONNECT packet on shutdown.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Everything the control loop reacts to.
#[derive(Debug)]
pub enum ClientEvent {
    Inbound(Inbound),
    Tick,
    Command(Command, oneshot::Sender<Result<(), CommandError>>),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid broker endpoint: {0}")]
    Endpoint(#[from] EndpointError),
}

/// Runs the core until shutdown is requested or every event source is gone, then
/// tears it down. Publishes a fresh snapshot after every visible change.
pub async fn run_control_loop<L, T>(
    mut client: TrafficLightClient<L, T>,
    mut events: mpsc::Receiver<ClientEvent>,
    snapshots: watch::Sender<Snapshot>,
    shutdown: CancellationToken,
) where
    L: BrokerLink,
    T: TimerHandle,
{
    info!("Control loop started");
    loop {
        let changed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::Inbound(Inbound::Transport(event))) => client.on_transport(event),
                Some(ClientEvent::Inbound(Inbound::Message { topic, payload })) => {
                    client.on_message(&topic, &payload, Instant::now())
                }
                Some(ClientEvent::Tick) => client.on_tick(Instant::now()),
                Some(ClientEvent::Command(command, reply)) => {
                    let result = client.send_command(command);
                    let sent = result.is_ok();
                    if reply.send(result).is_err() {
                        debug!("Command caller went away before the reply");
                    }
                    sent
                }
                None => {
                    warn!("All event sources closed");
                    break;
                }
            },
        };

        if changed {
            publish(&snapshots, client.snapshot());
        }
    }

    client.teardown();
    publish(&snapshots, client.snapshot());
    info!("Control loop stopped");
}

fn publish(snapshots: &watch::Sender<Snapshot>, next: Snapshot) {
    snapshots.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        debug!("Snapshot: {}", next);
        *current = next;
        true
    });
}

/// Forwards broker output to the control loop. After a failed poll it waits the
/// reconnect period and announces the retry; the next poll dials again.
async fn pump(
    mut eventloop: EventLoop,
    events: mpsc::Sender<ClientEvent>,
    reconnect_period: Duration,
) {
    loop {
        let polled = eventloop.poll().await;
        let failed = polled.is_err();

        if let Some(inbound) = mqtt::translate(polled) {
            let closed = inbound == Inbound::Transport(TransportEvent::Closed);
            if events.send(ClientEvent::Inbound(inbound)).await.is_err() || closed {
                break;
            }
        }

        if failed {
            tokio::time::sleep(reconnect_period).await;
            let retry = ClientEvent::Inbound(Inbound::Transport(TransportEvent::RetryStarted));
            if events.send(retry).await.is_err() {
                break;
            }
        }
    }
    debug!("Transport pump stopped");
}

/// Emits a tick every `period`, skipping the immediate first tick.
fn spawn_ticker(period: Duration, events: mpsc::Sender<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if events.send(ClientEvent::Tick).await.is_err() {
                break;
            }
        }
    })
}

/// Caller-side access to a running client.
pub struct ClientHandle {
    events: mpsc::Sender<ClientEvent>,
    snapshots: watch::Receiver<Snapshot>,
    shutdown: CancellationToken,
    control_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Handle with nothing behind it; every command reports `RuntimeStopped`.
    pub fn detached() -> Self {
        let (events, _) = mpsc::channel(1);
        let (_, snapshots) = watch::channel(Snapshot::default());
        Self {
            events,
            snapshots,
            shutdown: CancellationToken::new(),
            control_task: None,
            pump_task: None,
        }
    }

    /// Assembles a handle around an already spawned control loop.
    pub fn new(
        events: mpsc::Sender<ClientEvent>,
        snapshots: watch::Receiver<Snapshot>,
        shutdown: CancellationToken,
        control_task: JoinHandle<()>,
        pump_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            events,
            snapshots,
            shutdown,
            control_task: Some(control_task),
            pump_task,
        }
    }

    /// Sends a command through the gateway and waits for its verdict (not for the
    /// broker).
    pub async fn send_command(&self, command: Command) -> Result<(), CommandError> {
        let (reply, verdict) = oneshot::channel();
        self.events
            .send(ClientEvent::Command(command, reply))
            .await
            .map_err(|_| CommandError::RuntimeStopped)?;
        verdict.await.map_err(|_| CommandError::RuntimeStopped)?
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn is_running(&self) -> bool {
        self.control_task.is_some()
    }

    /// Stops the control loop (timer cancelled, session closed) and the pump.
    /// Returns `false` if already shut down.
    pub async fn shutdown(&mut self) -> bool {
        self.shutdown.cancel();
        let Some(control) = self.control_task.take() else {
            return false;
        };

        if let Err(e) = control.await {
            error!("Control loop ended abnormally: {}", e);
        }

        if let Some(mut pump) = self.pump_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut pump).await.is_err() {
                debug!("Pump still busy after close, aborting");
                pump.abort();
            }
        }
        true
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(pump) = self.pump_task.take() {
            pump.abort();
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum RuntimeState {
    Configured,
    Running,
    Stopped,
}

#[machine]
pub struct ClientRuntime<S: RuntimeState> {
    config: ClientConfig,
    handle: ClientHandle,
}

impl<S: RuntimeState> ClientRuntime<S> {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        self.handle.snapshot()
    }
}

impl ClientRuntime<Configured> {
    pub fn create(config: ClientConfig) -> Self {
        Self::new(config, ClientHandle::detached())
    }

    /// Dials the broker and spawns pump, ticker and control loop. Must be called
    /// inside a tokio runtime.
    pub fn start(mut self) -> Result<ClientRuntime<Running>, RuntimeError> {
        let broker = &self.config.broker;
        let endpoint: BrokerEndpoint = broker.url.parse()?;
        let client_id = broker.client_id();

        let mut options = endpoint.mqtt_options(&client_id);
        options.set_keep_alive(broker.keep_alive());
        if let Some(username) = &broker.username {
            options.set_credentials(username.clone(), broker.password.clone().unwrap_or_default());
        }

        info!("Starting client {} against {}", client_id, endpoint);
        let (link, eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let ticker = spawn_ticker(self.config.liveness.tick_period(), events_tx.clone());
        let pump_task = tokio::spawn(pump(
            eventloop,
            events_tx.clone(),
            broker.reconnect_period(),
        ));

        let core = TrafficLightClient::new(
            link,
            ticker.abort_handle(),
            self.config.topics.clone(),
            self.config.liveness.heartbeat_timeout(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());
        let shutdown = CancellationToken::new();
        let control_task = tokio::spawn(run_control_loop(
            core,
            events_rx,
            snapshot_tx,
            shutdown.clone(),
        ));

        self.handle = ClientHandle::new(
            events_tx,
            snapshot_rx,
            shutdown,
            control_task,
            Some(pump_task),
        );
        Ok(self.transition())
    }
}

impl ClientRuntime<Running> {
    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub async fn send_command(&self, command: Command) -> Result<(), CommandError> {
        self.handle.send_command(command).await
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.handle.watch()
    }

    pub async fn shutdown(mut self) -> ClientRuntime<Stopped> {
        info!("Shutting down");
        self.handle.shutdown().await;
        self.transition()
    }
}
