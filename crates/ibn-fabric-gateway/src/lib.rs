//! IBN Fabric Gateway - resilient transaction submission to Hyperledger Fabric.
//!
//! Keeps one long-lived TLS channel to a gateway peer, guards submit and
//! evaluate calls with a circuit breaker, and can sign transactions either as
//! the service operator or as a caller-forwarded identity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           FABRIC GATEWAY                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  HTTP handlers ──► TransactionApi (FabricGateway)                    │
//! │                          │                                           │
//! │             ┌────────────┴────────────┐                              │
//! │             │ TransactionOrchestrator │  decode transient, preflight │
//! │             └────────────┬────────────┘                              │
//! │                          │  endorse ─► submit (breaker) ─► commit    │
//! │             ┌────────────┴────────────┐                              │
//! │             │     IdentityGateway     │  operator | forwarded lease  │
//! │             └────────────┬────────────┘                              │
//! │                          │                                           │
//! │  CredentialProvider ─► ConnectionManager  probe, single-flight dial  │
//! └──────────────────────────┼───────────────────────────────────────────┘
//!                            │  Dialer (TLS, ALPN h2) + GatewayConnector
//!                            ▼
//!                      Fabric gateway peer
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ibn_fabric_gateway::{FabricGateway, GatewayConfig, RequestContext};
//!
//! let mut config = GatewayConfig::from_file("gateway.toml")?;
//! config.apply_env()?;
//!
//! let gateway = FabricGateway::builder(config).connector(binding).build()?;
//! gateway.start().await?;
//!
//! let request = gateway.request("createBatch").with_args(["BATCH-001", "Farm A"]);
//! let outcome = gateway.invoke(&RequestContext::new(), &request).await?;
//! println!("{}", outcome.transaction_id());
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod connection;
pub mod context;
pub mod credentials;
pub mod domain;
pub mod gateway;
pub mod metrics;
pub mod middleware;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapters::{TlsChannel, TlsDialer};
pub use connection::{ConnectionManager, ConnectionSettings, HealthChecker, HealthStatus, MonitorHandle};
pub use context::RequestContext;
pub use credentials::{CredentialProvider, TlsMode, TransportCredentials};
pub use domain::*;
pub use gateway::{ContractLease, IdentityGateway};
pub use middleware::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState, CircuitStats,
};
pub use ports::*;
pub use service::{FabricGateway, FabricGatewayBuilder, LedgerQueries, TransactionOrchestrator};
