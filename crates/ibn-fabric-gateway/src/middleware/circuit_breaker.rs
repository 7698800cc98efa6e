//! Circuit breaker around submit and evaluate calls.
//!
//! Protects the peer from being hammered while it returns failures, even when
//! the transport itself is healthy. Peer liveness is the connection manager's
//! concern; this breaker only tracks call outcomes.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │                     any probe fails                                 │
//! │            ┌─────────────────────────────────────┐                  │
//! │            │                                     │                  │
//! │            ▼                                     │                  │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │  ratio   │ (reject) │ cooldown │  (probe) │       │
//! │      └──────────┘          └──────────┘          └──────────┘       │
//! │            ▲                                           │            │
//! │            │                                           │            │
//! │            └───────────────────────────────────────────┘            │
//! │                      all probes succeed                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! - `min_sample_size`: Results needed in the window before tripping (default: 3)
//! - `failure_ratio`: Failure share that trips the breaker (default: 0.6)
//! - `window_interval`: Period after which closed-state counts reset (default: 10s)
//! - `cooldown`: Time spent open before probing (default: 60s)
//! - `max_probe_requests`: Concurrent probes admitted while half-open (default: 3)
//!
//! Every transition bumps a generation counter and resets the window. Results
//! of calls admitted under an older generation are discarded.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::config::humantime_serde;
use crate::domain::error::GatewayError;
use crate::metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Testing if the peer recovered - allows limited requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Name used in logs and errors
    pub name: String,
    /// Concurrent calls admitted while half-open
    pub max_probe_requests: u32,
    /// Closed-state counts reset after this period; zero never resets
    #[serde(with = "humantime_serde")]
    pub window_interval: Duration,
    /// Time spent open before probing
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Failure share that trips the breaker
    pub failure_ratio: f64,
    /// Results needed in the window before the ratio is considered
    pub min_sample_size: u32,
    /// Enable circuit breaker
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "fabric-gateway".to_string(),
            max_probe_requests: 3,
            window_interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            failure_ratio: 0.6,
            min_sample_size: 3,
            enabled: true,
        }
    }
}

/// Rejection returned without invoking the wrapped call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is {state}")]
pub struct CircuitOpen {
    pub name: String,
    pub state: CircuitState,
    /// Time left in the cooldown, when open
    pub retry_after: Option<Duration>,
}

impl From<CircuitOpen> for GatewayError {
    fn from(open: CircuitOpen) -> Self {
        GatewayError::CircuitOpen {
            name: open.name,
            retry_after: open.retry_after,
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Rejected(CircuitOpen),
    #[error(transparent)]
    Inner(E),
}

/// Counts within the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    requests: u32,
    failures: u32,
    consecutive_successes: u32,
    /// Probes admitted in the current half-open window
    admitted: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    opened_at: Option<Instant>,
    window_started: Instant,
    last_transition: Instant,
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub requests: u32,
    pub failures: u32,
    pub consecutive_successes: u32,
    pub total_rejections: u64,
    pub last_transition_ms: u64,
}

impl serde::Serialize for CircuitStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("CircuitStats", 7)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("state", &self.state.to_string())?;
        state.serialize_field("requests", &self.requests)?;
        state.serialize_field("failures", &self.failures)?;
        state.serialize_field("consecutive_successes", &self.consecutive_successes)?;
        state.serialize_field("total_rejections", &self.total_rejections)?;
        state.serialize_field("last_transition_ms", &self.last_transition_ms)?;
        state.end()
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_rejections: AtomicU64,
    state_tx: watch::Sender<CircuitState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        let (state_tx, _) = watch::channel(CircuitState::Closed);
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                opened_at: None,
                window_started: now,
                last_transition: now,
            }),
            total_rejections: AtomicU64::new(0),
            state_tx,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `call` if the breaker admits it and record its outcome.
    ///
    /// A call whose future is dropped before completing releases its probe
    /// slot without counting as a success or failure.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return call().await.map_err(BreakerError::Inner);
        }

        let mut admission = Admission {
            breaker: self,
            generation: self.before_call().map_err(BreakerError::Rejected)?,
            settled: false,
        };
        let outcome = call().await;
        admission.settle(outcome.is_ok());
        outcome.map_err(BreakerError::Inner)
    }

    /// Fail fast when the breaker is open, without taking a probe slot.
    pub fn reject_if_open(&self) -> Result<(), CircuitOpen> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.state == CircuitState::Open {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::record_breaker_rejection();
            return Err(self.rejection(&inner, now));
        }
        Ok(())
    }

    /// Current state, advancing Open to HalfOpen when the cooldown elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        CircuitStats {
            name: self.config.name.clone(),
            state: inner.state,
            requests: inner.counts.requests,
            failures: inner.counts.failures,
            consecutive_successes: inner.counts.consecutive_successes,
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            last_transition_ms: now.duration_since(inner.last_transition).as_millis() as u64,
        }
    }

    /// Force the breaker closed (for admin purposes)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(breaker = %self.config.name, "Circuit breaker manually reset");
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
    }

    fn before_call(&self) -> Result<u64, CircuitOpen> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(inner.generation),
            CircuitState::Open => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                metrics::record_breaker_rejection();
                debug!(breaker = %self.config.name, "Circuit breaker is open, rejecting call");
                Err(self.rejection(&inner, now))
            }
            CircuitState::HalfOpen => {
                if inner.counts.admitted >= self.config.max_probe_requests {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    metrics::record_breaker_rejection();
                    debug!(
                        breaker = %self.config.name,
                        admitted = inner.counts.admitted,
                        "Half-open probe slots exhausted, rejecting call"
                    );
                    return Err(self.rejection(&inner, now));
                }
                inner.counts.admitted += 1;
                Ok(inner.generation)
            }
        }
    }

    fn after_call(&self, generation: u64, success: Option<bool>) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match (inner.state, success) {
            (CircuitState::HalfOpen, None) => {
                inner.counts.admitted = inner.counts.admitted.saturating_sub(1);
            }
            (_, None) => {}
            (CircuitState::Closed, Some(ok)) => {
                inner.counts.requests += 1;
                if ok {
                    inner.counts.consecutive_successes += 1;
                } else {
                    inner.counts.failures += 1;
                    inner.counts.consecutive_successes = 0;
                }
                if self.should_trip(&inner.counts) {
                    warn!(
                        breaker = %self.config.name,
                        requests = inner.counts.requests,
                        failures = inner.counts.failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit breaker opening due to failure ratio"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, Some(true)) => {
                inner.counts.requests += 1;
                inner.counts.consecutive_successes += 1;
                if inner.counts.consecutive_successes >= self.config.max_probe_requests {
                    info!(
                        breaker = %self.config.name,
                        successes = inner.counts.consecutive_successes,
                        "Circuit breaker closing after successful probes"
                    );
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            (CircuitState::HalfOpen, Some(false)) => {
                warn!(breaker = %self.config.name, "Circuit breaker reopening after probe failure");
                self.transition(&mut inner, CircuitState::Open, now);
            }
            // Calls are never admitted while open
            (CircuitState::Open, Some(_)) => {}
        }
    }

    fn should_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.min_sample_size
            && f64::from(counts.failures) / f64::from(counts.requests) >= self.config.failure_ratio
    }

    /// Apply time-driven transitions.
    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        match inner.state {
            CircuitState::Closed => {
                let window = self.config.window_interval;
                if !window.is_zero() && now.duration_since(inner.window_started) >= window {
                    inner.generation += 1;
                    inner.counts = Counts::default();
                    inner.window_started = now;
                }
            }
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |opened| now.duration_since(opened) >= self.config.cooldown);
                if cooled {
                    self.transition(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.window_started = now;
        inner.last_transition = now;
        inner.opened_at = (to == CircuitState::Open).then_some(now);

        if from != to {
            info!(breaker = %self.config.name, from = %from, to = %to, "Circuit breaker state changed");
            metrics::set_breaker_state(to);
            self.state_tx.send_replace(to);
        }
    }

    fn rejection(&self, inner: &BreakerState, now: Instant) -> CircuitOpen {
        CircuitOpen {
            name: self.config.name.clone(),
            state: inner.state,
            retry_after: inner
                .opened_at
                .map(|opened| self.config.cooldown.saturating_sub(now.duration_since(opened))),
        }
    }
}

/// Records the outcome of an admitted call exactly once.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Admission<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, Some(success));
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_call(self.generation, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: "test".into(),
            max_probe_requests: 3,
            window_interval: Duration::ZERO,
            cooldown: Duration::from_secs(60),
            failure_ratio: 0.6,
            min_sample_size: 3,
            enabled: true,
        }
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(1) }).await
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<u32, _>("peer error") }).await
    }

    async fn open_breaker(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            let _ = fail(breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_starts_closed() {
        let breaker = CircuitBreaker::new(test_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_of_three_trip() {
        for order in [[false, false, true], [true, false, false], [false, true, false]] {
            let breaker = CircuitBreaker::new(test_config());
            for ok in order {
                let _ = if ok { succeed(&breaker).await } else { fail(&breaker).await };
            }
            assert_eq!(breaker.state(), CircuitState::Open, "order {order:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_min_sample_does_not_trip() {
        let breaker = CircuitBreaker::new(test_config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_below_threshold_does_not_trip() {
        let breaker = CircuitBreaker::new(test_config());
        // 1 of 3, then 2 of 4
        for ok in [true, false, true, false] {
            let _ = if ok { succeed(&breaker).await } else { fail(&breaker).await };
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert_eq!(breaker.stats().requests, 4);
        assert_eq!(breaker.stats().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_calling() {
        let breaker = CircuitBreaker::new(test_config());
        open_breaker(&breaker).await;

        let calls = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;

        match result {
            Err(BreakerError::Rejected(open)) => {
                assert_eq!(open.state, CircuitState::Open);
                assert_eq!(open.retry_after, Some(Duration::from_secs(60)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(breaker.reject_if_open().is_err());
        assert_eq!(breaker.stats().total_rejections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(test_config());
        open_breaker(&breaker).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.reject_if_open().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_probes() {
        let breaker = CircuitBreaker::new(test_config());
        open_breaker(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        for _ in 0..2 {
            succeed(&breaker).await.unwrap();
            assert_eq!(breaker.state(), CircuitState::HalfOpen);
        }
        succeed(&breaker).await.unwrap();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_exactly_max_probes() {
        let breaker = Arc::new(CircuitBreaker::new(test_config()));
        open_breaker(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let mut releases = Vec::new();
        let mut probes = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel::<()>();
            releases.push(tx);
            let breaker = Arc::clone(&breaker);
            probes.push(tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = rx.await;
                        Ok::<_, &'static str>(())
                    })
                    .await
            }));
        }
        tokio::task::yield_now().await;

        // Fourth concurrent call is turned away
        let extra = succeed(&breaker).await;
        assert!(matches!(extra, Err(BreakerError::Rejected(_))));

        for tx in releases {
            let _ = tx.send(());
        }
        for probe in probes {
            probe.await.unwrap().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_resets_cooldown() {
        let breaker = CircuitBreaker::new(test_config());
        open_breaker(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_results_are_ignored() {
        let breaker = Arc::new(CircuitBreaker::new(test_config()));
        let (tx, rx) = oneshot::channel::<()>();

        // Admitted while closed, completes after the breaker opened
        let slow = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        let _ = rx.await;
                        Err::<(), _>("late failure")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        open_breaker(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = tx.send(());
        let _ = slow.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            max_probe_requests: 1,
            ..test_config()
        });
        open_breaker(&breaker).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let hung = breaker.execute(|| futures::future::pending::<Result<(), &'static str>>());
        let timed_out = tokio::time::timeout(Duration::from_secs(1), hung).await;
        assert!(timed_out.is_err());

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_interval_resets_counts() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            window_interval: Duration::from_secs(10),
            ..test_config()
        });
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_observable() {
        let breaker = CircuitBreaker::new(test_config());
        let mut changes = breaker.subscribe();

        open_breaker(&breaker).await;
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_circuit_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            enabled: false,
            ..test_config()
        });
        for _ in 0..10 {
            let _ = fail(&breaker).await;
        }
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_stats_serialization() {
        let breaker = CircuitBreaker::new(test_config());
        open_breaker(&breaker).await;
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let json = serde_json::to_value(breaker.stats()).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["name"], "test");
    }

    #[test]
    fn test_concurrent_results_are_not_lost() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                min_sample_size: 10_000,
                ..test_config()
            }));
            let tasks: Vec<_> = (0..400)
                .map(|_| {
                    let breaker = Arc::clone(&breaker);
                    tokio::spawn(async move { succeed(&breaker).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }
            assert_eq!(breaker.stats().requests, 400);
        });
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_trips_iff_ratio_reached(outcomes in proptest::collection::vec(any::<bool>(), 3..12)) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .start_paused(true)
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let breaker = CircuitBreaker::new(test_config());
                    let mut requests = 0u32;
                    let mut failures = 0u32;
                    let mut tripped = false;
                    for ok in &outcomes {
                        let _ = if *ok { succeed(&breaker).await } else { fail(&breaker).await };
                        requests += 1;
                        if !ok {
                            failures += 1;
                        }
                        if requests >= 3 && f64::from(failures) / f64::from(requests) >= 0.6 {
                            tripped = true;
                            break;
                        }
                    }
                    let expected = if tripped { CircuitState::Open } else { CircuitState::Closed };
                    prop_assert_eq!(breaker.state(), expected);
                    Ok(())
                })?;
            }
        }
    }
}
