//! Transaction orchestration: propose, endorse, submit, await commit.
//!
//! Steps run strictly in order within one invocation. Transient data is
//! decoded and the breaker consulted before any network call is made. The
//! contract lease is released before the result is returned, and when the
//! request is cancelled it is dropped before `Cancelled` propagates.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::domain::config::TimeoutConfig;
use crate::domain::error::{GatewayError, GatewayResult, RpcError};
use crate::domain::identity::Identity;
use crate::domain::types::{InvokeRequest, Proposal, TransactionOutcome};
use crate::gateway::{ContractLease, IdentityGateway};
use crate::metrics;
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker};

/// Random nonce length used for transaction IDs
pub const NONCE_LEN: usize = 24;

pub struct TransactionOrchestrator {
    gateway: Arc<IdentityGateway>,
    breaker: Arc<CircuitBreaker>,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for TransactionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionOrchestrator")
            .field("breaker", &self.breaker)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl TransactionOrchestrator {
    pub fn new(
        gateway: Arc<IdentityGateway>,
        breaker: Arc<CircuitBreaker>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            gateway,
            breaker,
            timeouts,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Submit a transaction and wait for its commit status.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        request: &InvokeRequest,
    ) -> GatewayResult<TransactionOutcome> {
        let transient = decode_transient(&request.transient_data)?;
        self.breaker.reject_if_open()?;

        let result = ctx
            .run(async {
                let lease = self
                    .gateway
                    .get_contract(ctx.identity(), &request.channel, &request.chaincode)
                    .await?;
                let result = self.submit_transaction(&lease, request, transient).await;
                lease.release();
                result
            })
            .await;

        metrics::record_transaction(outcome_label(&result));
        match &result {
            Ok(outcome) => info!(
                request_id = %ctx.request_id(),
                transaction_id = %outcome.transaction_id(),
                block_number = outcome.block_number(),
                valid = outcome.committed_successfully(),
                function = %request.function,
                "Transaction committed"
            ),
            Err(e) => warn!(
                request_id = %ctx.request_id(),
                function = %request.function,
                error = %e,
                "Transaction failed"
            ),
        }
        result
    }

    /// Evaluate a read-only query through the breaker.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &InvokeRequest,
    ) -> GatewayResult<Vec<u8>> {
        let transient = decode_transient(&request.transient_data)?;
        self.breaker.reject_if_open()?;

        ctx.run(async {
            let lease = self
                .gateway
                .get_contract(ctx.identity(), &request.channel, &request.chaincode)
                .await?;
            let proposal = build_proposal(lease.identity(), request, transient);
            let contract = lease.contract();

            let result = self
                .breaker
                .execute(|| bounded(self.timeouts.evaluate, "evaluate", contract.evaluate(&proposal)))
                .await
                .map_err(|e| match e {
                    BreakerError::Rejected(open) => GatewayError::from(open),
                    BreakerError::Inner(source) => GatewayError::EvaluationFailed {
                        function: request.function.clone(),
                        source,
                    },
                });
            lease.release();
            result
        })
        .await
    }

    async fn submit_transaction(
        &self,
        lease: &ContractLease,
        request: &InvokeRequest,
        transient: BTreeMap<String, Vec<u8>>,
    ) -> GatewayResult<TransactionOutcome> {
        let contract = lease.contract();
        let proposal = build_proposal(lease.identity(), request, transient);
        let transaction_id = proposal.transaction_id.clone();
        debug!(
            transaction_id = %transaction_id,
            channel = %proposal.channel,
            chaincode = %proposal.chaincode,
            function = %proposal.function,
            forwarded = lease.is_forwarded(),
            "Endorsing proposal"
        );

        // Endorsement failures are chaincode decisions and never retried
        let endorsed = bounded(self.timeouts.endorse, "endorse", contract.endorse(&proposal))
            .await
            .map_err(|source| GatewayError::EndorsementFailed {
                transaction_id: transaction_id.clone(),
                source,
            })?;
        let result = endorsed.result.payload.clone();

        self.breaker
            .execute(|| bounded(self.timeouts.submit, "submit", contract.submit(&endorsed)))
            .await
            .map_err(|e| match e {
                BreakerError::Rejected(open) => GatewayError::from(open),
                BreakerError::Inner(source) => GatewayError::SubmissionFailed {
                    transaction_id: transaction_id.clone(),
                    source,
                },
            })?;
        debug!(transaction_id = %transaction_id, "Submitted, awaiting commit status");

        let timeout = self.timeouts.commit;
        let status = match tokio::time::timeout(timeout, contract.commit_status(&transaction_id)).await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(GatewayError::CommitStatusTimeout {
                    transaction_id,
                    timeout,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(GatewayError::CommitStatusTimeout {
                    transaction_id,
                    timeout,
                    reason: "no commit status before deadline".into(),
                })
            }
        };

        Ok(TransactionOutcome::new(
            transaction_id,
            status.block_number,
            status.is_successful(),
            result,
        ))
    }
}

/// Decode base64 transient values, naming the first malformed key.
pub fn decode_transient(
    encoded: &BTreeMap<String, String>,
) -> GatewayResult<BTreeMap<String, Vec<u8>>> {
    encoded
        .iter()
        .map(|(key, value)| {
            BASE64
                .decode(value)
                .map(|decoded| (key.clone(), decoded))
                .map_err(|e| GatewayError::InvalidTransientData {
                    key: key.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// `hex(sha256(nonce || creator))`
pub fn transaction_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator);
    hex::encode(hasher.finalize())
}

fn build_proposal(
    identity: &Identity,
    request: &InvokeRequest,
    transient: BTreeMap<String, Vec<u8>>,
) -> Proposal {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let creator = identity.creator();

    Proposal {
        transaction_id: transaction_id(&nonce, &creator),
        nonce,
        creator,
        channel: request.channel.clone(),
        chaincode: request.chaincode.clone(),
        function: request.function.clone(),
        args: request.args.iter().map(|arg| arg.as_bytes().to_vec()).collect(),
        transient,
        endorsing_orgs: request.endorsing_orgs.clone(),
    }
}

async fn bounded<T, F>(limit: Duration, call: &'static str, fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RpcError::deadline_exceeded(format!("{call} timed out after {limit:?}")))?
}

fn outcome_label(result: &GatewayResult<TransactionOutcome>) -> &'static str {
    match result {
        Ok(outcome) if outcome.committed_successfully() => "committed",
        Ok(_) => "invalid",
        Err(GatewayError::EndorsementFailed { .. }) => "endorsement_failed",
        Err(GatewayError::SubmissionFailed { .. }) => "submission_failed",
        Err(GatewayError::CircuitOpen { .. }) => "circuit_open",
        Err(GatewayError::CommitStatusTimeout { .. }) => "commit_unknown",
        Err(GatewayError::Cancelled { .. }) => "cancelled",
        Err(_) => "error",
    }
}
