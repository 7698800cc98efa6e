//! # Gateway Metrics
//!
//! Prometheus metrics for connection health, circuit breaking and
//! transaction outcomes.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! ibn-fabric-gateway = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `ibn_gateway_connection_state` - Gauge of connection state (0=Disconnected, 1=Connecting, 2=Ready, 3=Degraded, 4=ShuttingDown)
//! - `ibn_gateway_reconnects_total` - Counter of reconnect sequences
//! - `ibn_gateway_circuit_breaker_state` - Gauge of breaker state (0=Closed, 1=Open, 2=HalfOpen)
//! - `ibn_gateway_circuit_breaker_rejections_total` - Counter of calls rejected by the breaker
//! - `ibn_gateway_transactions_total` - Counter of invoke outcomes (by outcome)
//! - `ibn_gateway_forwarded_gateways_open` - Gauge of live forwarded-identity gateways

use crate::domain::types::ConnectionState;
use crate::middleware::circuit_breaker::CircuitState;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Connection manager state
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        "ibn_gateway_connection_state",
        "Current connection state (0=Disconnected, 1=Connecting, 2=Ready, 3=Degraded, 4=ShuttingDown)"
    )
    .expect("Failed to create CONNECTION_STATE metric");

    /// Reconnect sequences started
    pub static ref RECONNECTS: IntCounter = register_int_counter!(
        "ibn_gateway_reconnects_total",
        "Total number of reconnect sequences"
    )
    .expect("Failed to create RECONNECTS metric");

    /// Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)
    pub static ref CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        "ibn_gateway_circuit_breaker_state",
        "Current circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"
    )
    .expect("Failed to create CIRCUIT_BREAKER_STATE metric");

    /// Calls rejected without reaching the peer
    pub static ref CIRCUIT_BREAKER_REJECTIONS: IntCounter = register_int_counter!(
        "ibn_gateway_circuit_breaker_rejections_total",
        "Total number of calls rejected by the circuit breaker"
    )
    .expect("Failed to create CIRCUIT_BREAKER_REJECTIONS metric");

    /// Invoke outcomes, labeled by outcome
    pub static ref TRANSACTIONS: IntCounterVec = register_int_counter_vec!(
        "ibn_gateway_transactions_total",
        "Total number of invoked transactions",
        &["outcome"]
    )
    .expect("Failed to create TRANSACTIONS metric");

    /// Forwarded-identity gateways currently open
    pub static ref FORWARDED_GATEWAYS_OPEN: IntGauge = register_int_gauge!(
        "ibn_gateway_forwarded_gateways_open",
        "Number of forwarded-identity gateways currently open"
    )
    .expect("Failed to create FORWARDED_GATEWAYS_OPEN metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Update connection state gauge
#[cfg(feature = "metrics")]
pub fn set_connection_state(state: ConnectionState) {
    CONNECTION_STATE.set(state.as_gauge());
}

/// Record a reconnect sequence
#[cfg(feature = "metrics")]
pub fn record_reconnect() {
    RECONNECTS.inc();
}

/// Update circuit breaker state gauge
#[cfg(feature = "metrics")]
pub fn set_breaker_state(state: CircuitState) {
    CIRCUIT_BREAKER_STATE.set(state.as_gauge());
}

/// Record a call rejected by the breaker
#[cfg(feature = "metrics")]
pub fn record_breaker_rejection() {
    CIRCUIT_BREAKER_REJECTIONS.inc();
}

/// Record an invoke outcome
#[cfg(feature = "metrics")]
pub fn record_transaction(outcome: &str) {
    TRANSACTIONS.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn forwarded_gateway_opened() {
    FORWARDED_GATEWAYS_OPEN.inc();
}

#[cfg(feature = "metrics")]
pub fn forwarded_gateway_closed() {
    FORWARDED_GATEWAYS_OPEN.dec();
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature is disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn set_connection_state(_state: ConnectionState) {}

#[cfg(not(feature = "metrics"))]
pub fn record_reconnect() {}

#[cfg(not(feature = "metrics"))]
pub fn set_breaker_state(_state: CircuitState) {}

#[cfg(not(feature = "metrics"))]
pub fn record_breaker_rejection() {}

#[cfg(not(feature = "metrics"))]
pub fn record_transaction(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn forwarded_gateway_opened() {}

#[cfg(not(feature = "metrics"))]
pub fn forwarded_gateway_closed() {}
