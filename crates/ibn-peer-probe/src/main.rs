//! # IBN Peer Probe
//!
//! Dials the configured gateway peer with the same credentials and retry
//! policy the gateway uses, then prints one health snapshot as JSON.
//!
//! ```text
//! ibn-peer-probe [gateway.toml]
//! ```
//!
//! Exit status is 0 when the channel is live, 1 otherwise. `IBN_*`
//! environment variables override the file, as they do for the gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use ibn_fabric_gateway::{
    ConnectionManager, ConnectionSettings, CredentialProvider, DialTarget, GatewayConfig,
    HealthChecker, TlsDialer,
};
use ibn_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = init_telemetry(&TelemetryConfig::from_env("ibn-peer-probe"))
        .context("failed to initialize telemetry")?;

    let config = load_config(std::env::args().nth(1))?;
    let healthy = probe(&config).await?;
    drop(telemetry);
    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<String>) -> Result<GatewayConfig> {
    let mut config = match &path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => GatewayConfig::default(),
    };
    config.apply_env().context("invalid IBN_* override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn probe(config: &GatewayConfig) -> Result<bool> {
    let provider = CredentialProvider::from_config(config);
    let transport = provider
        .load_transport_credentials()
        .context("failed to load transport credentials")?;

    let target = DialTarget::new(
        config.peer.endpoint.clone(),
        transport,
        config.channel.clone(),
    );
    let manager = ConnectionManager::new(
        target,
        Arc::new(TlsDialer::new()),
        ConnectionSettings::from_config(config),
    );
    let checker = HealthChecker::new(
        manager.clone(),
        config.peer.msp_id.clone(),
        config.health.poll_interval,
    );

    info!(endpoint = %config.peer.endpoint, "Probing peer");
    if let Err(e) = manager.connect().await {
        error!(endpoint = %config.peer.endpoint, error = %e, "Peer unreachable");
    }

    let status = checker.check_health();
    println!("{}", serde_json::to_string_pretty(&status)?);
    manager.close();
    Ok(status.healthy)
}
