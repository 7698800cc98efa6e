//! Hexagonal ports.

pub mod inbound;
pub mod outbound;

pub use inbound::TransactionApi;
pub use outbound::{ContractHandle, DialTarget, Dialer, GatewayConnector, GatewaySession, PeerChannel};
