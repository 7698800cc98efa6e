//! Outbound ports (driven side).
//!
//! The gateway reaches the Fabric network only through these traits. The TLS
//! dialer in `adapters::tls` implements [`Dialer`]; the protobuf gateway binding
//! that signs and serializes proposals implements [`GatewayConnector`].
//!
//! ```text
//! Dialer ──dial──► PeerChannel ──GatewayConnector::connect(identity)──► GatewaySession
//!                                                                          │
//!                                                           contract(channel, chaincode)
//!                                                                          ▼
//!                                                                   ContractHandle
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::TransportCredentials;
use crate::domain::config::{ChannelOptions, TimeoutConfig};
use crate::domain::error::RpcError;
use crate::domain::identity::Identity;
use crate::domain::types::{ChannelState, CommitStatus, EndorsedTransaction, Proposal};

/// Everything needed to open a channel to one peer.
#[derive(Debug, Clone)]
pub struct DialTarget {
    /// `host:port`
    pub endpoint: String,
    pub credentials: TransportCredentials,
    pub options: ChannelOptions,
}

impl DialTarget {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: TransportCredentials,
        options: ChannelOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials,
            options,
        }
    }
}

/// Opens RPC channels.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn PeerChannel>, RpcError>;
}

/// A live RPC channel to a peer.
#[async_trait]
pub trait PeerChannel: Send + Sync + fmt::Debug {
    /// Current transport state. Must not block.
    fn state(&self) -> ChannelState;

    /// Resolves once the state differs from `from`.
    async fn wait_for_state_change(&self, from: ChannelState);

    /// Release the underlying connection. Idempotent.
    fn close(&self);
}

/// Binds a channel and a signing identity into a gateway session.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(
        &self,
        channel: Arc<dyn PeerChannel>,
        identity: Arc<Identity>,
        timeouts: &TimeoutConfig,
    ) -> Result<Arc<dyn GatewaySession>, RpcError>;
}

/// A gateway bound to one identity over one channel.
pub trait GatewaySession: Send + Sync {
    fn contract(&self, channel: &str, chaincode: &str) -> Arc<dyn ContractHandle>;

    /// Release session resources. Idempotent; does not close the channel.
    fn close(&self);
}

/// Capability interface over one chaincode on one channel.
///
/// Implemented by both the shared operator binding and per-call forwarded
/// bindings.
#[async_trait]
pub trait ContractHandle: Send + Sync {
    /// Channel the contract is deployed on. Local property, no network call.
    fn channel_name(&self) -> &str;

    fn chaincode_name(&self) -> &str;

    /// Read-only query against one peer.
    async fn evaluate(&self, proposal: &Proposal) -> Result<Vec<u8>, RpcError>;

    /// Collect endorsements from the peers required by policy.
    async fn endorse(&self, proposal: &Proposal) -> Result<EndorsedTransaction, RpcError>;

    /// Send an endorsed transaction to the ordering service.
    async fn submit(&self, transaction: &EndorsedTransaction) -> Result<(), RpcError>;

    /// Wait for the transaction to be validated and committed.
    async fn commit_status(&self, transaction_id: &str) -> Result<CommitStatus, RpcError>;
}
