//! Outbound adapters.
//!
//! The TLS dialer is the production [`Dialer`](crate::ports::Dialer). The
//! protobuf gateway binding is supplied by the embedding service through
//! [`GatewayConnector`](crate::ports::GatewayConnector).

pub mod tls;

pub use tls::{TlsChannel, TlsDialer};
