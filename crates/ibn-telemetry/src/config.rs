//! Telemetry configuration read from the process environment.

use std::env;

/// Subscriber settings for one service process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Reported as `service.name` on exported spans.
    pub service_name: String,

    pub service_version: String,

    /// `dev`, `staging`, `production`.
    pub environment: String,

    /// `EnvFilter` directives, e.g. `info,ibn_fabric_gateway=debug`.
    pub log_level: String,

    /// One JSON object per line instead of human readable output.
    pub json_logs: bool,

    /// Emit to stdout at all.
    pub console_output: bool,

    /// OTLP gRPC collector, e.g. `http://tempo:4317`. Export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ibn-fabric-gateway".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "dev".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            console_output: true,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Read settings from the environment.
    ///
    /// | Variable                       | Effect                                  |
    /// |--------------------------------|-----------------------------------------|
    /// | `OTEL_SERVICE_NAME`            | service name                            |
    /// | `IBN_ENVIRONMENT`              | environment label                       |
    /// | `IBN_LOG_LEVEL`, `RUST_LOG`    | filter directives, first one set wins   |
    /// | `IBN_JSON_LOGS`                | `true`/`1` for JSON output              |
    /// | `IBN_CONSOLE_OUTPUT`           | `false`/`0` to silence stdout           |
    /// | `OTEL_EXPORTER_OTLP_ENDPOINT`  | enables OTLP span export                |
    ///
    /// Inside a container (`KUBERNETES_SERVICE_HOST` or `DOCKER_CONTAINER`
    /// set) JSON output is the default.
    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self::from_lookup(service_name, |key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(service_name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(service_name);
        let in_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        if let Some(name) = lookup("OTEL_SERVICE_NAME").filter(|v| !v.is_empty()) {
            config.service_name = name;
        }
        if let Some(environment) = lookup("IBN_ENVIRONMENT").filter(|v| !v.is_empty()) {
            config.environment = environment;
        }
        if let Some(level) = lookup("IBN_LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .or_else(|| lookup("RUST_LOG").filter(|v| !v.is_empty()))
        {
            config.log_level = level;
        }
        config.json_logs = lookup("IBN_JSON_LOGS")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(in_container);
        config.console_output = lookup("IBN_CONSOLE_OUTPUT")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);
        config.otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty());

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
