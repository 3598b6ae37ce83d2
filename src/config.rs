//! # Configuration
//!
//! One TOML file describes the broker, the topic contract and liveness timing.
//! A missing file is created with defaults on first start so it can be edited
//! afterwards; a present but invalid file aborts startup with context.
//!
//! Lookup order for the file:
//! 1. first command line argument
//! 2. `TRAFFICLIGHT_CONFIG` environment variable
//! 3. `<config dir>/trafficlight-remote/config.toml`

use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::liveness::{DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_TICK_PERIOD};
use crate::mqtt::endpoint::BrokerEndpoint;
use crate::mqtt::router::Topics;

pub const CONFIG_ENV: &str = "TRAFFICLIGHT_CONFIG";
const APP_DIR: &str = "trafficlight-remote";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// `mqtt://`, `mqtts://`, `ws://` or `wss://` address
    pub url: String,
    /// Empty means `trafficlight-remote-<pid>`
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Pause before the transport dials again after losing the link
    pub reconnect_period_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://test.mosquitto.org:1883".to_string(),
            client_id: String::new(),
            keep_alive_secs: 5,
            reconnect_period_ms: 1000,
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        self.url
            .parse::<BrokerEndpoint>()
            .wrap_err_with(|| format!("Invalid broker url {:?}", self.url))
    }

    pub fn client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("{}-{}", APP_DIR, std::process::id())
        } else {
            self.client_id.clone()
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LivenessConfig {
    pub heartbeat_timeout_ms: u64,
    pub tick_period_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64,
            tick_period_ms: DEFAULT_TICK_PERIOD.as_millis() as u64,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub broker: BrokerConfig,
    pub topics: Topics,
    pub liveness: LivenessConfig,
}

impl ClientConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).wrap_err("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).wrap_err("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.endpoint()?;

        // Zero disables keep-alive pings.
        if self.broker.keep_alive_secs == 0 {
            return Err(eyre!(
                "broker.keep_alive_secs must be at least 1, got {}",
                self.broker.keep_alive_secs
            ));
        }

        let liveness = &self.liveness;
        if liveness.heartbeat_timeout_ms == 0 || liveness.tick_period_ms == 0 {
            return Err(eyre!("liveness timings must be greater than zero"));
        }
        if liveness.tick_period_ms >= liveness.heartbeat_timeout_ms {
            return Err(eyre!(
                "liveness.tick_period_ms ({}) must be shorter than heartbeat_timeout_ms ({})",
                liveness.tick_period_ms,
                liveness.heartbeat_timeout_ms
            ));
        }

        let topics = [
            ("status", &self.topics.status),
            ("heartbeat", &self.topics.heartbeat),
            ("control", &self.topics.control),
        ];
        for (name, topic) in topics {
            if topic.is_empty() {
                return Err(eyre!("topics.{} must not be empty", name));
            }
            if topic.contains(['+', '#']) {
                return Err(eyre!("topics.{} must not contain wildcards: {}", name, topic));
            }
        }
        if self.topics.status == self.topics.heartbeat
            || self.topics.status == self.topics.control
            || self.topics.heartbeat == self.topics.control
        {
            return Err(eyre!("status, heartbeat and control topics must differ"));
        }
        Ok(())
    }

    /// Default file location in the user's config directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| eyre!("No configuration directory available on this system"))
    }

    /// Resolves the file location from an explicit argument, the environment or
    /// the default.
    pub fn resolve_path(arg: Option<String>) -> Result<PathBuf> {
        match arg.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Ok(PathBuf::from(path)),
            None => Self::default_path(),
        }
    }

    /// Loads the file, writing defaults there first when it does not exist.
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!("No configuration at {}, writing defaults", path.display());
            let config = ClientConfig::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
            }
            tokio::fs::write(path, config.to_toml()?)
                .await
                .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
            return Ok(config);
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&text)
            .wrap_err_with(|| format!("Invalid configuration in {}", path.display()))?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}
