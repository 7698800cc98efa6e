//! # Forwarded Identity Lifecycle
//!
//! A call signed by a caller-supplied identity opens a dedicated channel and
//! gateway session. Both must be closed exactly once whichever way the call
//! ends.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use ibn_fabric_gateway::testing::{forwarded_identity, mock_gateway, MockPeer, Reply};
    use ibn_fabric_gateway::{
        ForwardedIdentity, GatewayError, RequestContext, RpcError, StatusCode,
    };

    use crate::integration::{create_batch, started_gateway};

    /// Forwarded resources still open: every dialled channel minus the
    /// managed one.
    fn leaked_channels(peer: &MockPeer) -> usize {
        peer.open_channels() - 1
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_releases_once() {
        let (peer, gateway) = started_gateway().await;
        let ctx = RequestContext::new().with_identity(forwarded_identity("Org1MSP"));

        gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-001")).await.unwrap();

        assert!(peer.session_identities().contains(&"Org1MSP".to_string()));
        assert_eq!(peer.sessions_closed(), 1);
        assert_eq!(leaked_channels(&peer), 0);
        assert!(gateway.connection().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_failure_step_releases_once() {
        let steps: [(&str, fn(&MockPeer)); 3] = [
            ("endorse", |peer| {
                peer.set_endorse(Reply::Fail(RpcError::new(StatusCode::Aborted, "rejected")))
            }),
            ("submit", |peer| {
                peer.set_submit(Reply::Fail(RpcError::unavailable("orderer down")))
            }),
            ("commit", |peer| peer.set_commit(Reply::Hang)),
        ];

        for (step, program) in steps {
            let (peer, gateway) = started_gateway().await;
            program(&peer);
            let ctx = RequestContext::new().with_identity(forwarded_identity("Org1MSP"));

            let err = gateway
                .invoke(&ctx, &create_batch(&gateway, "BATCH-001"))
                .await
                .unwrap_err();

            match step {
                "endorse" => assert!(matches!(err, GatewayError::EndorsementFailed { .. })),
                "submit" => assert!(matches!(err, GatewayError::SubmissionFailed { .. })),
                _ => assert!(matches!(err, GatewayError::CommitStatusTimeout { .. })),
            }
            assert_eq!(peer.sessions_closed(), 1, "session after {step} failure");
            assert_eq!(leaked_channels(&peer), 0, "channel after {step} failure");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_releases_once() {
        let (peer, gateway) = started_gateway().await;
        peer.set_commit(Reply::Hang);
        let token = CancellationToken::new();
        let ctx = RequestContext::new()
            .with_identity(forwarded_identity("Org1MSP"))
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        });
        let err = gateway
            .invoke(&ctx, &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, GatewayError::Cancelled { .. }));
        assert_eq!(err.http_status(), 400);
        assert_eq!(peer.sessions_closed(), 1);
        assert_eq!(leaked_channels(&peer), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_future_releases_once() {
        let (peer, gateway) = started_gateway().await;
        peer.set_commit(Reply::Hang);
        let ctx = RequestContext::new().with_identity(forwarded_identity("Org1MSP"));
        let request = create_batch(&gateway, "BATCH-001");

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), gateway.invoke(&ctx, &request)).await;
        assert!(abandoned.is_err());

        assert_eq!(peer.sessions_opened(), 1);
        assert_eq!(peer.sessions_closed(), 1);
        assert_eq!(leaked_channels(&peer), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_forwarded_calls_are_isolated() {
        let (peer, gateway) = started_gateway().await;
        let gateway = std::sync::Arc::new(gateway);

        let handles: Vec<_> = ["Org1MSP", "Org2MSP", "Org1MSP", "Org2MSP"]
            .into_iter()
            .enumerate()
            .map(|(n, msp)| {
                let gateway = std::sync::Arc::clone(&gateway);
                tokio::spawn(async move {
                    let ctx = RequestContext::new().with_identity(forwarded_identity(msp));
                    let request = create_batch(&gateway, &format!("BATCH-{n}"));
                    gateway.invoke(&ctx, &request).await
                })
            })
            .collect();
        for outcome in futures::future::join_all(handles).await {
            assert!(outcome.unwrap().unwrap().committed_successfully());
        }

        assert_eq!(peer.sessions_closed(), 4);
        assert_eq!(leaked_channels(&peer), 0);
        let creators: Vec<_> = peer.proposals().into_iter().map(|p| p.creator).collect();
        assert_eq!(creators.iter().filter(|c| c.starts_with(b"Org2MSP")).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_invoke_after_close_is_refused() {
        let (peer, gateway) = started_gateway().await;
        gateway.close().await;
        let ctx = RequestContext::new().with_identity(forwarded_identity("Org1MSP"));

        let err = gateway
            .invoke(&ctx, &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Closed));
        assert_eq!(peer.dial_attempts(), 1);
        assert!(peer.proposals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_identity_opens_nothing() {
        let peer = MockPeer::healthy();
        let gateway = mock_gateway(&peer);
        let garbage = ForwardedIdentity::new("Org1MSP", "not a certificate", "not a key");
        let ctx = RequestContext::new().with_identity(garbage);

        let err = gateway
            .invoke(&ctx, &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidIdentity { .. }));
        assert_eq!(err.http_status(), 400);
        assert_eq!(peer.dial_attempts(), 0);
        assert_eq!(peer.network_calls(), 0);
    }
}
