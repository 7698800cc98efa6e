//! Connection manager: owns the RPC channel to the gateway peer.
//!
//! # Locking
//!
//! - `shared` (parking_lot `RwLock`) guards the state and the channel pointer.
//!   It is held only to read or swap them, never across an await.
//! - `dial_lock` (tokio `Mutex`) serialises physical dial sequences. A caller
//!   snapshots `generation` before queueing on the lock; if the generation moved
//!   while it waited, another caller already ran a sequence on its behalf and
//!   the stored outcome is returned instead of dialing again.
//!
//! # Health probe
//!
//! Started after every successful connect and stopped by `reconnect` and
//! `close`. It holds only a `Weak` reference to the manager, reads the channel
//! state without blocking, and hands reconnection to a separate task so it
//! never cancels itself.

pub mod health;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::{GatewayConfig, HealthConfig, TimeoutConfig};
use crate::domain::error::{GatewayError, GatewayResult, RpcError};
use crate::domain::retry::RetryPolicy;
use crate::domain::types::{ChannelState, ConnectionState, HealthCheckResult};
use crate::metrics;
use crate::ports::outbound::{DialTarget, Dialer, PeerChannel};

pub use health::{HealthChecker, HealthStatus, MonitorHandle};

/// Timing knobs of the manager
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub retry: RetryPolicy,
    /// Bound on one dial attempt
    pub dial_timeout: Duration,
    /// Bound on waiting for a new channel to leave CONNECTING
    pub ready_timeout: Duration,
    pub health_interval: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.retry.clone(), &config.timeouts, &config.health)
    }

    pub fn new(retry: RetryPolicy, timeouts: &TimeoutConfig, health: &HealthConfig) -> Self {
        Self {
            retry,
            dial_timeout: timeouts.dial,
            ready_timeout: health.ready_timeout,
            health_interval: health.interval,
        }
    }
}

/// Dial once and wait for the channel to settle.
///
/// Shared with the forwarded-identity path, which dials dedicated channels.
pub(crate) async fn establish_channel(
    dialer: &dyn Dialer,
    target: &DialTarget,
    dial_timeout: Duration,
    ready_timeout: Duration,
) -> Result<Arc<dyn PeerChannel>, RpcError> {
    let channel = tokio::time::timeout(dial_timeout, dialer.dial(target))
        .await
        .map_err(|_| RpcError::deadline_exceeded(format!("dial timed out after {dial_timeout:?}")))??;

    if channel.state() == ChannelState::Connecting {
        // Bounded separately from the dial itself
        let _ = tokio::time::timeout(
            ready_timeout,
            channel.wait_for_state_change(ChannelState::Connecting),
        )
        .await;
    }

    match channel.state() {
        state if state.is_live() => Ok(channel),
        state => {
            channel.close();
            Err(RpcError::unavailable(format!(
                "channel to {} not ready: {state}",
                target.endpoint
            )))
        }
    }
}

struct Shared {
    state: ConnectionState,
    channel: Option<Arc<dyn PeerChannel>>,
    /// Incremented every time a channel is installed
    epoch: u64,
}

struct ProbeHandle {
    stop: CancellationToken,
}

struct Inner {
    target: DialTarget,
    dialer: Arc<dyn Dialer>,
    settings: ConnectionSettings,
    shared: RwLock<Shared>,
    dial_lock: tokio::sync::Mutex<()>,
    /// Incremented after every completed dial sequence
    generation: AtomicU64,
    last_outcome: Mutex<Option<GatewayResult<()>>>,
    retry_count: AtomicU32,
    reconnect_pending: AtomicBool,
    probe: Mutex<Option<ProbeHandle>>,
    health_tx: watch::Sender<Option<HealthCheckResult>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

/// Owns a single RPC channel to one peer.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.target.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(target: DialTarget, dialer: Arc<dyn Dialer>, settings: ConnectionSettings) -> Self {
        let (health_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                target,
                dialer,
                settings,
                shared: RwLock::new(Shared {
                    state: ConnectionState::Disconnected,
                    channel: None,
                    epoch: 0,
                }),
                dial_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                last_outcome: Mutex::new(None),
                retry_count: AtomicU32::new(0),
                reconnect_pending: AtomicBool::new(false),
                probe: Mutex::new(None),
                health_tx,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.target.endpoint
    }

    pub fn target(&self) -> &DialTarget {
        &self.inner.target
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    pub(crate) fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.inner.dialer
    }

    /// Establish the connection if it is not already live.
    pub async fn connect(&self) -> GatewayResult<()> {
        self.ensure_open()?;
        if self.inner.is_live() {
            return Ok(());
        }

        let observed = self.inner.generation.load(Ordering::Acquire);
        let _guard = self.inner.dial_lock.lock().await;
        self.ensure_open()?;
        if let Some(outcome) = self.inner.joined_outcome(observed) {
            return outcome;
        }
        if self.inner.is_live() {
            return Ok(());
        }

        let outcome = Inner::dial_with_retry(&self.inner).await;
        self.inner.finish_sequence(&outcome);
        outcome
    }

    /// Tear down the current channel and connect again.
    ///
    /// Concurrent callers share a single dial sequence and all observe its
    /// outcome.
    pub async fn reconnect(&self) -> GatewayResult<()> {
        self.ensure_open()?;

        let observed = self.inner.generation.load(Ordering::Acquire);
        let _guard = self.inner.dial_lock.lock().await;
        self.ensure_open()?;
        if let Some(outcome) = self.inner.joined_outcome(observed) {
            return outcome;
        }

        info!(endpoint = %self.inner.target.endpoint, "Reconnecting to peer");
        metrics::record_reconnect();

        let stale = {
            let mut shared = self.inner.shared.write();
            let stale = shared.channel.take();
            self.inner.transition(&mut shared, ConnectionState::Disconnected);
            stale
        };
        self.inner.stop_probe();
        if let Some(channel) = stale {
            channel.close();
        }

        let outcome = Inner::dial_with_retry(&self.inner).await;
        self.inner.finish_sequence(&outcome);
        outcome
    }

    /// Current channel, without blocking.
    pub fn get_connection(&self) -> GatewayResult<Arc<dyn PeerChannel>> {
        self.current_channel().map(|(_, channel)| channel)
    }

    /// Current channel together with its installation epoch.
    pub(crate) fn current_channel(&self) -> GatewayResult<(u64, Arc<dyn PeerChannel>)> {
        self.ensure_open()?;
        let shared = self.inner.shared.read();
        match (shared.state, shared.channel.as_ref()) {
            (ConnectionState::Ready, Some(channel)) => Ok((shared.epoch, Arc::clone(channel))),
            (ConnectionState::Degraded, Some(channel)) if channel.state().is_usable() => {
                Ok((shared.epoch, Arc::clone(channel)))
            }
            (ConnectionState::ShuttingDown, _) => Err(GatewayError::Closed),
            (state, _) => Err(GatewayError::NotConnected { state }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.read().state
    }

    /// Ready with a live channel.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.is_live()
    }

    /// Failed attempts in the current (or last) dial sequence; zero after a
    /// successful connect.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Acquire)
    }

    /// Latest observation of the background probe.
    pub fn health_results(&self) -> watch::Receiver<Option<HealthCheckResult>> {
        self.inner.health_tx.subscribe()
    }

    /// Stop the probe, close the channel and refuse further calls.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.stop_probe();

        let channel = {
            let mut shared = self.inner.shared.write();
            let channel = shared.channel.take();
            self.inner.transition(&mut shared, ConnectionState::ShuttingDown);
            channel
        };
        if let Some(channel) = channel {
            channel.close();
        }
        info!(endpoint = %self.inner.target.endpoint, "Connection manager closed");
    }

    pub(crate) fn ensure_open(&self) -> GatewayResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(GatewayError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Inner {
    fn is_live(&self) -> bool {
        let shared = self.shared.read();
        shared.state == ConnectionState::Ready
            && shared
                .channel
                .as_ref()
                .is_some_and(|channel| channel.state().is_live())
    }

    /// Outcome of a sequence that completed after `observed` was read.
    fn joined_outcome(&self, observed: u64) -> Option<GatewayResult<()>> {
        if self.generation.load(Ordering::Acquire) == observed {
            return None;
        }
        debug!(endpoint = %self.target.endpoint, "Joined in-flight dial sequence");
        self.last_outcome.lock().clone()
    }

    fn finish_sequence(&self, outcome: &GatewayResult<()>) {
        *self.last_outcome.lock() = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn transition(&self, shared: &mut Shared, to: ConnectionState) {
        let from = shared.state;
        if from == to {
            return;
        }
        shared.state = to;
        metrics::set_connection_state(to);
        info!(
            endpoint = %self.target.endpoint,
            from = %from,
            to = %to,
            "Connection state changed"
        );
    }

    /// Must be called with `dial_lock` held.
    async fn dial_with_retry(inner: &Arc<Inner>) -> GatewayResult<()> {
        let retry = &inner.settings.retry;
        {
            let mut shared = inner.shared.write();
            inner.transition(&mut shared, ConnectionState::Connecting);
        }
        inner.retry_count.store(0, Ordering::Release);

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=retry.max_attempts {
            if inner.closed.load(Ordering::Acquire) {
                return Err(GatewayError::Closed);
            }

            match establish_channel(
                inner.dialer.as_ref(),
                &inner.target,
                inner.settings.dial_timeout,
                inner.settings.ready_timeout,
            )
            .await
            {
                Ok(channel) => return Inner::install(inner, channel, attempt),
                Err(e) => {
                    inner.retry_count.fetch_add(1, Ordering::AcqRel);
                    warn!(
                        endpoint = %inner.target.endpoint,
                        attempt,
                        max_attempts = retry.max_attempts,
                        error = %e,
                        "Dial attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < retry.max_attempts {
                let delay = retry.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before next dial");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = inner.shutdown.cancelled() => return Err(GatewayError::Closed),
                }
            }
        }

        {
            let mut shared = inner.shared.write();
            if shared.state != ConnectionState::ShuttingDown {
                inner.transition(&mut shared, ConnectionState::Disconnected);
            }
        }
        Err(GatewayError::ConnectionExhausted {
            endpoint: inner.target.endpoint.clone(),
            attempts: retry.max_attempts,
            last_error,
        })
    }

    fn install(inner: &Arc<Inner>, channel: Arc<dyn PeerChannel>, attempt: u32) -> GatewayResult<()> {
        let replaced = {
            let mut shared = inner.shared.write();
            if inner.closed.load(Ordering::Acquire) {
                drop(shared);
                channel.close();
                return Err(GatewayError::Closed);
            }
            let replaced = shared.channel.replace(channel);
            shared.epoch += 1;
            inner.transition(&mut shared, ConnectionState::Ready);
            replaced
        };
        if let Some(stale) = replaced {
            debug!(endpoint = %inner.target.endpoint, "Closing replaced channel");
            stale.close();
        }
        inner.retry_count.store(0, Ordering::Release);
        info!(endpoint = %inner.target.endpoint, attempt, "Connected to peer");
        Inner::start_probe(inner);
        Ok(())
    }

    fn start_probe(inner: &Arc<Inner>) {
        let stop = inner.shutdown.child_token();
        let weak = Arc::downgrade(inner);
        let period = inner.settings.health_interval;
        let token = stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match weak.upgrade() {
                    Some(inner) => Inner::probe_once(&inner),
                    None => break,
                }
            }
        });

        if let Some(previous) = inner.probe.lock().replace(ProbeHandle { stop }) {
            previous.stop.cancel();
        }
    }

    fn stop_probe(&self) {
        if let Some(probe) = self.probe.lock().take() {
            probe.stop.cancel();
        }
    }

    fn probe_once(inner: &Arc<Inner>) {
        let (connection_state, channel) = {
            let shared = inner.shared.read();
            (shared.state, shared.channel.clone())
        };
        let observed = channel.as_ref().map(|c| c.state());
        inner.health_tx.send_replace(Some(HealthCheckResult {
            observed_state: observed,
            connection_state,
            timestamp: Utc::now(),
        }));

        let unhealthy = match observed {
            Some(ChannelState::TransientFailure | ChannelState::Shutdown) => true,
            Some(_) => false,
            None => matches!(
                connection_state,
                ConnectionState::Ready | ConnectionState::Degraded
            ),
        };
        if !unhealthy {
            return;
        }

        if inner
            .reconnect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(endpoint = %inner.target.endpoint, "Reconnect already pending, skipping probe");
            return;
        }

        {
            let mut shared = inner.shared.write();
            if shared.state == ConnectionState::Ready {
                inner.transition(&mut shared, ConnectionState::Degraded);
            }
        }
        warn!(
            endpoint = %inner.target.endpoint,
            observed = ?observed,
            "Health probe detected degraded channel, reconnecting"
        );

        let manager = ConnectionManager {
            inner: Arc::clone(inner),
        };
        tokio::spawn(async move {
            if let Err(e) = manager.reconnect().await {
                warn!(endpoint = %manager.endpoint(), error = %e, "Background reconnect failed");
            }
            manager.inner.reconnect_pending.store(false, Ordering::Release);
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(channel) = self.shared.get_mut().channel.take() {
            channel.close();
        }
    }
}
