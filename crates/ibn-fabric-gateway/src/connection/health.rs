//! On-demand and continuous health checks over a [`ConnectionManager`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConnectionManager;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{ChannelState, ConnectionState};

/// Snapshot reported to `/health` style endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub peer_endpoint: String,
    pub state: ConnectionState,
    pub channel_state: Option<ChannelState>,
    pub msp_id: String,
    pub last_check_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    manager: ConnectionManager,
    msp_id: String,
    poll_interval: Duration,
}

impl HealthChecker {
    pub fn new(manager: ConnectionManager, msp_id: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            manager,
            msp_id: msp_id.into(),
            poll_interval,
        }
    }

    /// Inspect the managed channel without touching chaincode.
    pub fn check_health(&self) -> HealthStatus {
        let started = Instant::now();
        let (channel_state, error) = match self.manager.get_connection() {
            Ok(channel) => {
                let state = channel.state();
                let error = (!state.is_live()).then(|| format!("channel state is {state}"));
                (Some(state), error)
            }
            Err(e) => (None, Some(e.to_string())),
        };

        HealthStatus {
            healthy: error.is_none(),
            peer_endpoint: self.manager.endpoint().to_string(),
            state: self.manager.state(),
            channel_state,
            msp_id: self.msp_id.clone(),
            last_check_time: Utc::now(),
            error,
            response_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Poll until the connection reports healthy or `timeout` elapses.
    pub async fn wait_for_healthy(&self, timeout: Duration) -> GatewayResult<HealthStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.check_health();
            if status.healthy {
                return Ok(status);
            }
            if self.manager.state() == ConnectionState::ShuttingDown {
                return Err(GatewayError::Closed);
            }
            if Instant::now() + self.poll_interval > deadline {
                warn!(
                    endpoint = %status.peer_endpoint,
                    timeout_ms = timeout.as_millis() as u64,
                    error = ?status.error,
                    "Peer did not become healthy in time"
                );
                return Err(GatewayError::NotConnected { state: status.state });
            }
            debug!(state = %status.state, "Waiting for peer to become healthy");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run `check_health` every `interval` and pass each result to `callback`.
    pub fn start_continuous<F>(&self, interval: Duration, callback: F) -> MonitorHandle
    where
        F: Fn(HealthStatus) + Send + Sync + 'static,
    {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let checker = self.clone();
        let callback = Arc::new(callback);

        info!(interval_ms = interval.as_millis() as u64, "Starting continuous health monitoring");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => callback(checker.check_health()),
                }
            }
            debug!("Continuous health monitoring stopped");
        });

        MonitorHandle {
            stop,
            task: Some(task),
        }
    }
}

/// Stops continuous monitoring when [`stop`](MonitorHandle::stop)ped or dropped.
pub struct MonitorHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop monitoring and wait for the task to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSettings;
    use crate::domain::config::{ChannelOptions, HealthConfig, TimeoutConfig};
    use crate::domain::retry::RetryPolicy;
    use crate::ports::outbound::DialTarget;
    use crate::testing::{test_transport_credentials, MockPeer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn checker(peer: &MockPeer) -> (ConnectionManager, HealthChecker) {
        let target = DialTarget::new(
            "peer0.org1.ibn.vn:7051",
            test_transport_credentials(),
            ChannelOptions::default(),
        );
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        let settings =
            ConnectionSettings::new(retry, &TimeoutConfig::default(), &HealthConfig::default());
        let manager = ConnectionManager::new(target, Arc::new(peer.clone()), settings);
        let checker = HealthChecker::new(manager.clone(), "Org1MSP", Duration::from_secs(1));
        (manager, checker)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_before_connect() {
        let peer = MockPeer::healthy();
        let (_, checker) = checker(&peer);

        let status = checker.check_health();
        assert!(!status.healthy);
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.error.is_some());
        assert_eq!(status.msp_id, "Org1MSP");
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_after_connect() {
        let peer = MockPeer::healthy();
        let (manager, checker) = checker(&peer);
        manager.connect().await.unwrap();

        let status = checker.check_health();
        assert!(status.healthy);
        assert_eq!(status.channel_state, Some(ChannelState::Ready));
        assert_eq!(status.peer_endpoint, "peer0.org1.ibn.vn:7051");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "ready");
        assert!(json.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_times_out() {
        let peer = MockPeer::healthy();
        let (_, checker) = checker(&peer);

        let started = Instant::now();
        let result = checker.wait_for_healthy(Duration::from_secs(3)).await;
        assert!(matches!(result, Err(GatewayError::NotConnected { .. })));
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_sees_late_connect() {
        let peer = MockPeer::healthy();
        let (manager, checker) = checker(&peer);

        let connector = {
            let manager = manager.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                manager.connect().await
            })
        };

        let status = checker.wait_for_healthy(Duration::from_secs(10)).await.unwrap();
        assert!(status.healthy);
        connector.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_monitoring_invokes_callback() {
        let peer = MockPeer::healthy();
        let (manager, checker) = checker(&peer);
        manager.connect().await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = checker.start_continuous(Duration::from_secs(5), move |status| {
            assert!(status.healthy);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.stop().await;
        // Ticks at 0s, 5s and 10s
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
