//! End-to-end behaviour of the core against an in-memory broker link.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;
use trafficlight_remote::mqtt::router::Topics;
use trafficlight_remote::{
    BrokerLink, Command, CommandDenied, CommandError, ConnectionPhase, LampColor, LampState,
    LinkError, LivenessState, TimerHandle, TrafficLightClient, TransportEvent,
};

#[derive(Default)]
struct Broker {
    subscriptions: RefCell<Vec<String>>,
    published: RefCell<Vec<(String, String)>>,
    closes: Cell<u32>,
}

#[derive(Clone, Default)]
struct Link(Rc<Broker>);

impl BrokerLink for Link {
    fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.0.subscriptions.borrow_mut().push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), LinkError> {
        self.0
            .published
            .borrow_mut()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn close(&self) -> Result<(), LinkError> {
        self.0.closes.set(self.0.closes.get() + 1);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Timer(Rc<Cell<u32>>);

impl TimerHandle for Timer {
    fn cancel(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

struct Rig {
    client: TrafficLightClient<Link, Timer>,
    broker: Rc<Broker>,
    timer_cancels: Rc<Cell<u32>>,
    start: Instant,
}

impl Rig {
    fn new() -> Self {
        let link = Link::default();
        let timer = Timer::default();
        let broker = link.0.clone();
        let timer_cancels = timer.0.clone();
        Self {
            client: TrafficLightClient::new(
                link,
                timer,
                Topics::default(),
                Duration::from_millis(5000),
            ),
            broker,
            timer_cancels,
            start: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }

    fn connect(&mut self) {
        self.client.on_transport(TransportEvent::Established);
    }

    fn heartbeat(&mut self, ms: u64) {
        let now = self.at(ms);
        self.client.on_message("trafficlight/heartbeat", "alive", now);
    }

    fn status(&mut self, payload: &str, ms: u64) {
        let now = self.at(ms);
        self.client.on_message("trafficlight/status", payload, now);
    }

    /// Ticks once per second from `from` to `to` inclusive.
    fn tick_through(&mut self, from: u64, to: u64) {
        let mut ms = from;
        while ms <= to {
            let now = self.at(ms);
            self.client.on_tick(now);
            ms += 1000;
        }
    }

    fn published(&self) -> Vec<(String, String)> {
        self.broker.published.borrow().clone()
    }
}

fn denial(result: Result<(), CommandError>) -> Option<CommandDenied> {
    result.err().and_then(|e| e.denial())
}

#[test]
fn healthy_path_allows_commands() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    rig.status("Hijau", 10);

    assert_eq!(
        rig.client.snapshot().triple(),
        (
            ConnectionPhase::Connected,
            LivenessState::Online,
            LampState::lit([LampColor::Green])
        )
    );
    assert!(rig.client.snapshot().commands_allowed);
    rig.client.send_command(Command::Off).unwrap();
    assert_eq!(
        rig.published(),
        vec![("trafficlight/control".to_string(), "OFF".to_string())]
    );
    assert_eq!(rig.client.snapshot().commands_sent, 1);
}

#[test]
fn six_seconds_of_silence_takes_device_offline() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    rig.status("MerahKuning", 100);
    rig.tick_through(1000, 6000);

    let snapshot = rig.client.snapshot();
    assert_eq!(
        snapshot.triple(),
        (ConnectionPhase::Connected, LivenessState::Offline, LampState::Off)
    );
    assert_eq!(snapshot.raw_status, None);
    assert!(!snapshot.commands_allowed);
    assert_eq!(
        denial(rig.client.send_command(Command::On)),
        Some(CommandDenied::DeviceOffline)
    );
    assert!(rig.published().is_empty());
}

#[test]
fn exactly_five_seconds_is_still_alive() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    rig.tick_through(1000, 5000);
    assert_eq!(rig.client.liveness(), LivenessState::Online);
}

#[test]
fn status_arriving_while_offline_is_shown_but_commands_stay_gated() {
    let mut rig = Rig::new();
    rig.connect();
    rig.status("Merah", 0);
    assert_eq!(rig.client.lamp(), LampState::lit([LampColor::Red]));
    assert_eq!(
        denial(rig.client.send_command(Command::On)),
        Some(CommandDenied::DeviceOffline)
    );
}

#[test]
fn repeated_heartbeats_are_idempotent() {
    let mut rig = Rig::new();
    rig.connect();
    for ms in [0, 100, 200, 300] {
        rig.heartbeat(ms);
        assert_eq!(rig.client.liveness(), LivenessState::Online);
    }
    assert_eq!(rig.client.snapshot().messages_received, 4);
}

#[test]
fn heartbeat_after_timeout_brings_device_back() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    rig.tick_through(1000, 7000);
    assert_eq!(rig.client.liveness(), LivenessState::Offline);

    rig.heartbeat(7500);
    assert_eq!(rig.client.liveness(), LivenessState::Online);
    // Lamps stay dark until the device reports again.
    assert_eq!(rig.client.lamp(), LampState::Off);
    rig.client.send_command(Command::On).unwrap();
}

#[test]
fn broker_reason_is_reported_for_every_unhealthy_phase() {
    let mut rig = Rig::new();
    assert_eq!(
        denial(rig.client.send_command(Command::On)),
        Some(CommandDenied::BrokerNotConnected(ConnectionPhase::Connecting))
    );

    rig.connect();
    rig.heartbeat(0);
    rig.client
        .on_transport(TransportEvent::LinkLost("keep-alive timeout".into()));
    assert_eq!(
        denial(rig.client.send_command(Command::On)),
        Some(CommandDenied::BrokerNotConnected(ConnectionPhase::Reconnecting))
    );

    rig.client
        .on_transport(TransportEvent::Fault("not authorized".into()));
    assert_eq!(
        denial(rig.client.send_command(Command::Off)),
        Some(CommandDenied::BrokerNotConnected(ConnectionPhase::Error))
    );

    rig.client.on_transport(TransportEvent::Closed);
    assert_eq!(
        denial(rig.client.send_command(Command::Off)),
        Some(CommandDenied::BrokerNotConnected(ConnectionPhase::Disconnected))
    );
    assert!(rig.published().is_empty());
}

#[test]
fn reconnection_starts_from_a_clean_slate() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    rig.status("Hijau", 0);

    rig.client
        .on_transport(TransportEvent::LinkLost("connection reset".into()));
    rig.client.on_transport(TransportEvent::RetryStarted);
    rig.connect();

    assert_eq!(
        rig.client.snapshot().triple(),
        (ConnectionPhase::Connected, LivenessState::Offline, LampState::Off)
    );
    assert_eq!(rig.broker.subscriptions.borrow().len(), 4);
}

#[test]
fn unknown_topics_are_ignored() {
    let mut rig = Rig::new();
    rig.connect();
    let now = rig.at(0);
    rig.client.on_message("trafficlight/control", "ON", now);
    rig.client.on_message("other/heartbeat", "", now);
    assert_eq!(rig.client.liveness(), LivenessState::Offline);
    assert_eq!(rig.client.lamp(), LampState::Off);
}

#[test]
fn double_teardown_releases_each_resource_once() {
    let mut rig = Rig::new();
    rig.connect();
    assert!(rig.client.teardown());
    assert!(!rig.client.teardown());
    assert_eq!(rig.timer_cancels.get(), 1);
    assert_eq!(rig.broker.closes.get(), 1);
    assert_eq!(rig.client.phase(), ConnectionPhase::Disconnected);

    // Late events from the dead session change nothing.
    rig.heartbeat(100);
    rig.client.on_transport(TransportEvent::Established);
    assert_eq!(rig.client.liveness(), LivenessState::Offline);
    assert!(matches!(
        rig.client.send_command(Command::On),
        Err(CommandError::Denied(CommandDenied::BrokerNotConnected(
            ConnectionPhase::Disconnected
        )))
    ));

    drop(rig.client);
    assert_eq!(rig.timer_cancels.get(), 1);
    assert_eq!(rig.broker.closes.get(), 1);
}

#[test]
fn teardown_on_error_path_still_releases_everything() {
    let mut rig = Rig::new();
    rig.client
        .on_transport(TransportEvent::Fault("tls handshake failed".into()));
    assert_eq!(rig.client.phase(), ConnectionPhase::Error);
    drop(rig.client);
    assert_eq!(rig.timer_cancels.get(), 1);
    assert_eq!(rig.broker.closes.get(), 1);
}

#[test]
fn arbitrary_payloads_never_break_parsing() {
    let mut rig = Rig::new();
    rig.connect();
    rig.heartbeat(0);
    let long = "x".repeat(4096);
    let payloads = ["", "Mati", "\u{fffd}\u{fffd}", "Hijau\0", "🚦", long.as_str()];
    for payload in payloads {
        rig.status(payload, 10);
        let lamp = rig.client.lamp();
        assert!(matches!(lamp, LampState::Off | LampState::Lit(_)));
    }
}
