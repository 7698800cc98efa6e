//! Call-level protection wrapped around remote peer calls.

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState, CircuitStats,
};
