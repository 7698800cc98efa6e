//! Per-request context handed down from the HTTP layer.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::identity::ForwardedIdentity;

/// Request id, optional forwarded identity, deadline and cancellation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    identity: Option<ForwardedIdentity>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Operator identity, no deadline.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            identity: None,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Submit on behalf of the caller instead of the operator.
    pub fn with_identity(mut self, identity: ForwardedIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Tie the request to an externally owned token, e.g. the HTTP connection.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn identity(&self) -> Option<&ForwardedIdentity> {
        self.identity.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Drive `fut` until it completes, the token fires or the deadline passes.
    ///
    /// On cancellation `fut` is dropped before the error is returned, so any
    /// guard it owns has already run.
    pub async fn run<T, F>(&self, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .unwrap_or(Err(GatewayError::Cancelled {
                        reason: "deadline exceeded",
                    })),
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(GatewayError::Cancelled {
                reason: "cancelled by caller",
            }),
            result = bounded => result,
        }
    }
}
