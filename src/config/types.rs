//! Configuration Types

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default, rename = "relay")]
    pub relays: Vec<RelayConfig>,
}

/// Process-wide settings shared by every relay session
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            buffer_size: 8192,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Description of one relay instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_name")]
    pub name: String,
    pub upstream: Endpoint,
    pub downstream: Endpoint,
    #[serde(default)]
    pub mode: RelayMode,
    #[serde(default)]
    pub dump: bool,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

fn default_relay_name() -> String {
    "relay".to_string()
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

impl RelayConfig {
    /// Role the upstream side runs under the configured mode
    pub fn upstream_role(&self) -> EndpointRole {
        if self.mode.upstream_is_listen() {
            EndpointRole::Listen(self.upstream.clone())
        } else {
            EndpointRole::Connect(self.upstream.clone())
        }
    }

    /// Role the downstream side runs under the configured mode
    pub fn downstream_role(&self) -> EndpointRole {
        if self.mode.downstream_is_listen() {
            EndpointRole::Listen(self.downstream.clone())
        } else {
            EndpointRole::Connect(self.downstream.clone())
        }
    }
}

/// A host/port pair naming one side of a relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("invalid endpoint '{}': expected host:port", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            bail!("invalid endpoint '{}': host must not be empty", s);
        }
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid endpoint '{}': bad port", s))?;
        if port == 0 {
            bail!("invalid endpoint '{}': port must not be 0", s);
        }
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// The four listen/connect combinations for the two sides of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayMode {
    /// Dial the upstream, accept downstream clients
    #[default]
    ConnectListen,
    /// Accept the upstream, dial the downstream
    ListenConnect,
    /// Dial both sides
    ConnectConnect,
    /// Accept on both sides
    ListenListen,
}

impl RelayMode {
    pub fn upstream_is_listen(&self) -> bool {
        matches!(self, RelayMode::ListenConnect | RelayMode::ListenListen)
    }

    pub fn downstream_is_listen(&self) -> bool {
        matches!(self, RelayMode::ConnectListen | RelayMode::ListenListen)
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayMode::ConnectListen => "connect-listen",
            RelayMode::ListenConnect => "listen-connect",
            RelayMode::ConnectConnect => "connect-connect",
            RelayMode::ListenListen => "listen-listen",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect-listen" => Ok(RelayMode::ConnectListen),
            "listen-connect" => Ok(RelayMode::ListenConnect),
            "connect-connect" => Ok(RelayMode::ConnectConnect),
            "listen-listen" => Ok(RelayMode::ListenListen),
            other => Err(anyhow!(
                "invalid mode '{}': expected connect-listen, listen-connect, connect-connect or listen-listen",
                other
            )),
        }
    }
}

/// How one side of a relay obtains a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRole {
    /// Bind the endpoint and accept inbound connections
    Listen(Endpoint),
    /// Dial out to the endpoint
    Connect(Endpoint),
}

impl EndpointRole {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            EndpointRole::Listen(endpoint) | EndpointRole::Connect(endpoint) => endpoint,
        }
    }

    pub fn is_listen(&self) -> bool {
        matches!(self, EndpointRole::Listen(_))
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Listen(endpoint) => write!(f, "listen on {}", endpoint),
            EndpointRole::Connect(endpoint) => write!(f, "connect to {}", endpoint),
        }
    }
}
