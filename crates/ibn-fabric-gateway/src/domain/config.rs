//! Gateway configuration with validation.
//!
//! Loaded from TOML, then overridden by `IBN_*` environment variables.
//!
//! ```toml
//! [peer]
//! endpoint = "peer0.org1.ibn.vn:7051"
//! host_override = "peer0.org1.ibn.vn"
//! channel = "ibnchannel"
//! chaincode = "teaTraceCC"
//! msp_id = "Org1MSP"
//!
//! [retry]
//! max_attempts = 5
//! base_delay = "5s"
//!
//! [timeouts]
//! commit = "1m"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryPolicy;
use crate::middleware::circuit_breaker::CircuitBreakerConfig;

const DEFAULT_CRYPTO_ROOT: &str = "/etc/hyperledger/fabric/crypto-config/peerOrganizations/org1.ibn.vn";

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Peer endpoint and default contract
    pub peer: PeerConfig,
    /// Candidate paths for trust material and identities
    pub credentials: CredentialsConfig,
    /// Reconnection policy
    pub retry: RetryPolicy,
    /// Background probe tuning
    pub health: HealthConfig,
    /// Per-call timeouts
    pub timeouts: TimeoutConfig,
    /// Protection for submit and evaluate calls
    pub circuit_breaker: CircuitBreakerConfig,
    /// Transport tuning handed to the RPC binding
    pub channel: ChannelOptions,
}

impl GatewayConfig {
    /// Parse configuration from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Path variables are prepended to the matching candidate list so they are
    /// tried first.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("IBN_PEER_ENDPOINT") {
            self.peer.endpoint = endpoint;
        }
        if let Some(host) = lookup("IBN_PEER_HOST_OVERRIDE") {
            self.peer.host_override = Some(host).filter(|h| !h.is_empty());
        }
        if let Some(channel) = lookup("IBN_CHANNEL_NAME") {
            self.peer.channel = channel;
        }
        if let Some(chaincode) = lookup("IBN_CHAINCODE_NAME") {
            self.peer.chaincode = chaincode;
        }
        if let Some(msp_id) = lookup("IBN_MSP_ID") {
            self.peer.msp_id = msp_id;
        }
        if let Some(path) = lookup("IBN_TLS_CA_PATH") {
            self.credentials.ca_paths.insert(0, PathBuf::from(path));
        }
        if let Some(path) = lookup("IBN_TLS_CLIENT_CERT_PATH") {
            self.credentials.client_cert_paths.insert(0, PathBuf::from(path));
        }
        if let Some(path) = lookup("IBN_TLS_CLIENT_KEY_PATH") {
            self.credentials.client_key_paths.insert(0, PathBuf::from(path));
        }
        if let Some(path) = lookup("IBN_USER_CERT_PATH") {
            self.credentials.operator_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("IBN_USER_KEY_PATH") {
            self.credentials.operator_key_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("IBN_MSP_DIR") {
            self.credentials.msp_dir = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("IBN_COMMIT_TIMEOUT") {
            self.timeouts.commit = humantime_serde::parse_duration(&raw).map_err(|_| {
                ConfigError::InvalidEnv {
                    var: "IBN_COMMIT_TIMEOUT".into(),
                    value: raw.clone(),
                }
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer.endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidPeer("endpoint cannot be empty".into()));
        }
        if self.peer.channel.trim().is_empty() {
            return Err(ConfigError::InvalidPeer("channel cannot be empty".into()));
        }
        if self.peer.msp_id.trim().is_empty() {
            return Err(ConfigError::InvalidPeer("msp_id cannot be empty".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry("max_attempts cannot be 0".into()));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(
                "backoff_multiplier must be >= 1.0".into(),
            ));
        }

        let cb = &self.circuit_breaker;
        if !(cb.failure_ratio > 0.0 && cb.failure_ratio <= 1.0) {
            return Err(ConfigError::InvalidCircuitBreaker(
                "failure_ratio must be in (0, 1]".into(),
            ));
        }
        if cb.max_probe_requests == 0 {
            return Err(ConfigError::InvalidCircuitBreaker(
                "max_probe_requests cannot be 0".into(),
            ));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("dial", t.dial),
            ("evaluate", t.evaluate),
            ("endorse", t.endorse),
            ("submit", t.submit),
            ("commit", t.commit),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!("{name} timeout cannot be 0")));
            }
        }
        if self.health.interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "health interval cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// Peer endpoint and default contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// `host:port` of the gateway peer
    pub endpoint: String,
    /// TLS server name when it differs from the endpoint host
    pub host_override: Option<String>,
    pub channel: String,
    pub chaincode: String,
    /// MSP of the operator identity
    pub msp_id: String,
    /// MSPs accepted for forwarded identities; empty accepts any
    pub allowed_msps: Vec<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:7051".to_string(),
            host_override: Some("peer0.org1.ibn.vn".to_string()),
            channel: "ibnchannel".to_string(),
            chaincode: "teaTraceCC".to_string(),
            msp_id: "Org1MSP".to_string(),
            allowed_msps: Vec::new(),
        }
    }
}

impl PeerConfig {
    /// Host portion of the endpoint, used as the default TLS server name.
    pub fn endpoint_host(&self) -> &str {
        match self.endpoint.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => &self.endpoint,
        }
    }

    pub fn server_name(&self) -> &str {
        self.host_override
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| self.endpoint_host())
    }
}

/// Candidate paths for trust material and identities.
///
/// Each list is tried in order; the first file that parses wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub ca_paths: Vec<PathBuf>,
    pub client_cert_paths: Vec<PathBuf>,
    pub client_key_paths: Vec<PathBuf>,
    /// Operator signing certificate
    pub operator_cert_path: Option<PathBuf>,
    /// Operator key file, or a keystore directory holding a `*_sk` file
    pub operator_key_path: Option<PathBuf>,
    /// MSP directory with `signcerts/` and `keystore/`, used when the explicit
    /// operator paths are absent
    pub msp_dir: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let root = PathBuf::from(DEFAULT_CRYPTO_ROOT);
        Self {
            ca_paths: vec![
                root.join("peers/peer0.org1.ibn.vn/tls/ca.crt"),
                root.join("msp/tlscacerts/tlsca.org1.ibn.vn-cert.pem"),
            ],
            client_cert_paths: vec![
                root.join("users/Admin@org1.ibn.vn/tls/client.crt"),
                root.join("users/User1@org1.ibn.vn/tls/client.crt"),
            ],
            client_key_paths: vec![
                root.join("users/Admin@org1.ibn.vn/tls/client.key"),
                root.join("users/User1@org1.ibn.vn/tls/client.key"),
            ],
            operator_cert_path: None,
            operator_key_path: None,
            msp_dir: Some(root.join("users/Admin@org1.ibn.vn/msp")),
        }
    }
}

/// Background probe tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Probe period while connected
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Bound on waiting for a fresh channel to leave CONNECTING
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    /// Poll period of `wait_for_healthy`
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long startup waits for the peer to report healthy
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-call timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on a single dial attempt
    #[serde(with = "humantime_serde")]
    pub dial: Duration,
    #[serde(with = "humantime_serde")]
    pub evaluate: Duration,
    #[serde(with = "humantime_serde")]
    pub endorse: Duration,
    #[serde(with = "humantime_serde")]
    pub submit: Duration,
    /// Bound on waiting for commit status after submission
    #[serde(with = "humantime_serde")]
    pub commit: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial: Duration::from_secs(10),
            evaluate: Duration::from_secs(5 * 60),
            endorse: Duration::from_secs(5 * 60),
            submit: Duration::from_secs(5 * 60),
            commit: Duration::from_secs(60),
        }
    }
}

/// Transport tuning handed to the RPC binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    #[serde(with = "humantime_serde")]
    pub keepalive_time: Duration,
    #[serde(with = "humantime_serde")]
    pub keepalive_timeout: Duration,
    pub keepalive_permit_without_calls: bool,
    pub max_send_message_size: usize,
    pub max_recv_message_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            keepalive_time: Duration::from_secs(120),
            keepalive_timeout: Duration::from_secs(20),
            keepalive_permit_without_calls: true,
            max_send_message_size: 100 * 1024 * 1024,
            max_recv_message_size: 100 * 1024 * 1024,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid peer config: {0}")]
    InvalidPeer(String),

    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),

    #[error("invalid circuit breaker config: {0}")]
    InvalidCircuitBreaker(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },

    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Duration (de)serialization as `"5s"`, `"100ms"` or `"5m"`.
///
/// Serialization picks the coarsest unit that represents the value exactly,
/// down to `"ns"`.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(duration))
    }

    pub fn format_duration(duration: &Duration) -> String {
        let nanos = duration.subsec_nanos();
        if nanos == 0 {
            format!("{}s", duration.as_secs())
        } else if nanos % 1_000_000 == 0 {
            format!("{}ms", duration.as_millis())
        } else if nanos % 1_000 == 0 {
            format!("{}us", duration.as_micros())
        } else {
            format!("{}ns", duration.as_nanos())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // Two-letter units must be checked before "s" and "m"
        if let Some(ns) = s.strip_suffix("ns") {
            ns.trim()
                .parse::<u64>()
                .map(Duration::from_nanos)
                .map_err(|_| "invalid nanoseconds")
        } else if let Some(us) = s.strip_suffix("us") {
            us.trim()
                .parse::<u64>()
                .map(Duration::from_micros)
                .map_err(|_| "invalid microseconds")
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
