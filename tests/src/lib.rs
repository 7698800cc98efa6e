//! # IBN Test Suite
//!
//! End-to-end scenarios for the Fabric gateway, run against the in-memory
//! peer from `ibn_fabric_gateway::testing`.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── submission.rs       # endorse, submit, commit, transient data
//!     ├── circuit_breaker.rs  # tripping, preflight rejection, recovery
//!     ├── identity.rs         # forwarded identity lifecycle
//!     └── connection.rs       # reconnect, retry exhaustion, health
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ibn-tests
//! cargo test -p ibn-tests integration::identity::
//! ```

#![allow(dead_code)]

pub mod integration;
