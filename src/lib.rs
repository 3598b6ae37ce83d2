//! # trafficlight-remote
//!
//! Remote control client for a traffic-light controller that is only reachable
//! through an MQTT broker. The client keeps the broker session alive, infers from
//! heartbeats whether the device itself is alive, interprets the lamp status the
//! device reports, and only lets control commands through when the whole path
//! client → broker → device is healthy.
//!
//! ```text
//! Connection Manager ──phase──────────────┐
//!        │                                ▼
//!        └─ inbound ─► Topic Router ─► Lamp Status ──► Snapshot ◄── presentation
//!                             └──────► Liveness ─────►    ▲
//!                                                         │
//!                      presentation ─► Command Gateway ───┘ (reads, then publishes)
//! ```

pub mod client;
pub mod config;
pub mod gateway;
pub mod lamp;
pub mod liveness;
pub mod mqtt;
pub mod runtime;
pub mod state;

pub use client::{TimerHandle, TrafficLightClient};
pub use config::ClientConfig;
pub use gateway::{Command, CommandDenied, CommandError};
pub use lamp::{LampColor, LampState};
pub use liveness::LivenessState;
pub use mqtt::connection::{BrokerLink, ConnectionPhase, LinkError, TransportEvent};
pub use runtime::{ClientHandle, ClientRuntime};
pub use state::Snapshot;
