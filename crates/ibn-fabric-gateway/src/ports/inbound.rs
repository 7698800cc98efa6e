//! Inbound ports (driving side), called by the HTTP handler layer.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::domain::error::GatewayResult;
use crate::domain::types::{InvokeRequest, TransactionOutcome};

/// Transaction API exposed to request handlers.
#[async_trait]
pub trait TransactionApi: Send + Sync {
    /// Propose, endorse, submit and wait for commit.
    async fn invoke(
        &self,
        ctx: &RequestContext,
        request: &InvokeRequest,
    ) -> GatewayResult<TransactionOutcome>;

    /// Read-only evaluation; returns the raw chaincode response.
    async fn evaluate(&self, ctx: &RequestContext, request: &InvokeRequest)
        -> GatewayResult<Vec<u8>>;

    /// Liveness of the peer connection, without invoking chaincode.
    async fn health(&self) -> GatewayResult<()>;
}
