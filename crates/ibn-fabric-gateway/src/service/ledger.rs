//! Ledger queries against the query system chaincode (`qscc`).

use std::sync::Arc;

use tracing::warn;

use super::orchestrator::TransactionOrchestrator;
use crate::context::RequestContext;
use crate::domain::error::{GatewayError, GatewayResult, StatusCode};
use crate::domain::types::{ChannelInfo, InvokeRequest};

pub const QSCC: &str = "qscc";

/// Read-only ledger lookups, evaluated with the caller's identity.
#[derive(Debug, Clone)]
pub struct LedgerQueries {
    orchestrator: Arc<TransactionOrchestrator>,
}

impl LedgerQueries {
    pub fn new(orchestrator: Arc<TransactionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Channel height information.
    ///
    /// Peers that do not expose `qscc` to this identity, or an open breaker,
    /// yield [`ChannelInfo::unavailable`] instead of an error.
    pub async fn chain_info(&self, ctx: &RequestContext, channel: &str) -> GatewayResult<ChannelInfo> {
        match self.query(ctx, channel, "GetChainInfo", &[channel]).await {
            Ok(raw) => Ok(ChannelInfo {
                channel_id: channel.to_string(),
                size: raw.len(),
                raw_info: hex::encode(raw),
            }),
            Err(e) if is_soft_failure(&e) => {
                warn!(channel, error = %e, "Chain info unavailable");
                Ok(ChannelInfo::unavailable(channel))
            }
            Err(e) => Err(e),
        }
    }

    /// Hex encoded block.
    pub async fn block_by_number(
        &self,
        ctx: &RequestContext,
        channel: &str,
        number: u64,
    ) -> GatewayResult<String> {
        let number = number.to_string();
        self.query(ctx, channel, "GetBlockByNumber", &[channel, &number])
            .await
            .map(hex::encode)
    }

    /// Hex encoded block containing `transaction_id`.
    pub async fn block_by_tx_id(
        &self,
        ctx: &RequestContext,
        channel: &str,
        transaction_id: &str,
    ) -> GatewayResult<String> {
        self.query(ctx, channel, "GetBlockByTxID", &[channel, transaction_id])
            .await
            .map(hex::encode)
    }

    /// Hex encoded processed transaction.
    pub async fn transaction_by_id(
        &self,
        ctx: &RequestContext,
        channel: &str,
        transaction_id: &str,
    ) -> GatewayResult<String> {
        self.query(ctx, channel, "GetTransactionByID", &[channel, transaction_id])
            .await
            .map(hex::encode)
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        channel: &str,
        function: &str,
        args: &[&str],
    ) -> GatewayResult<Vec<u8>> {
        let request = InvokeRequest::new(channel, QSCC, function).with_args(args.iter().copied());
        self.orchestrator.evaluate(ctx, &request).await
    }
}

fn is_soft_failure(error: &GatewayError) -> bool {
    match error {
        GatewayError::CircuitOpen { .. } => true,
        GatewayError::EvaluationFailed { source, .. } => matches!(
            source.code,
            StatusCode::Unimplemented
                | StatusCode::NotFound
                | StatusCode::Unavailable
                | StatusCode::PermissionDenied
        ),
        _ => false,
    }
}
