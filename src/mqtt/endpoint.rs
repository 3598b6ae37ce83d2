//! Broker address parsing.
//!
//! Accepts `scheme://host[:port][/path]` with the schemes understood by the
//! usual MQTT clients and turns it into rumqttc options.

use rumqttc::{MqttOptions, Transport};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    fn is_websocket(self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("missing scheme in {0:?}, expected e.g. mqtt://host:1883")]
    MissingScheme(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl FromStr for BrokerEndpoint {
    type Err = EndpointError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(url.to_string()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Scheme::Tcp,
            "mqtts" | "ssl" | "tls" => Scheme::Tls,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| EndpointError::InvalidPort(url.to_string()))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost(url.to_string()));
        }

        // Brokers serve MQTT-over-websocket under /mqtt unless told otherwise.
        let path = if path.is_empty() && scheme.is_websocket() {
            "/mqtt".to_string()
        } else {
            path.to_string()
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "mqtt",
            Scheme::Tls => "mqtts",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl BrokerEndpoint {
    /// Options for a clean session against this endpoint.
    pub fn mqtt_options(&self, client_id: &str) -> MqttOptions {
        // rumqttc expects the full URL as host for websocket transports.
        let host = if self.scheme.is_websocket() {
            self.to_string()
        } else {
            self.host.clone()
        };

        let mut options = MqttOptions::new(client_id, host, self.port);
        options.set_clean_session(true);
        match self.scheme {
            Scheme::Tcp => {}
            Scheme::Tls => {
                options.set_transport(Transport::tls_with_default_config());
            }
            Scheme::Ws => {
                options.set_transport(Transport::Ws);
            }
            Scheme::Wss => {
                options.set_transport(Transport::wss_with_default_config());
            }
        }
        options
    }
}
