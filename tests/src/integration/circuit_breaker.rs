//! # Circuit Breaker Flow
//!
//! Orderer outages trip the breaker; while open, calls fail fast without
//! touching the network; after the cooldown, probes close it again.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ibn_fabric_gateway::testing::Reply;
    use ibn_fabric_gateway::{
        ChannelInfo, CircuitState, GatewayError, RequestContext, RpcError, StatusCode,
    };

    use crate::integration::{create_batch, started_gateway};

    async fn trip(gateway: &ibn_fabric_gateway::FabricGateway) {
        let ctx = RequestContext::new();
        for n in 0..3 {
            let err = gateway
                .invoke(&ctx, &create_batch(gateway, &format!("BATCH-{n:03}")))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::SubmissionFailed { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failed_submits_open_the_circuit() {
        let (peer, gateway) = started_gateway().await;
        peer.set_submit(Reply::Fail(RpcError::unavailable("orderer unreachable")));

        trip(&gateway).await;
        assert_eq!(gateway.breaker().state(), CircuitState::Open);

        let calls_before = peer.network_calls();
        let proposals_before = peer.proposals().len();
        let err = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-004"))
            .await
            .unwrap_err();

        match &err {
            GatewayError::CircuitOpen { name, retry_after } => {
                assert_eq!(name, "fabric-gateway");
                assert!(retry_after.is_some());
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(err.http_status(), 503);
        assert_eq!(peer.network_calls(), calls_before);
        assert_eq!(peer.proposals().len(), proposals_before);
        assert!(gateway.breaker_stats().total_rejections >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_evaluate() {
        let (peer, gateway) = started_gateway().await;
        peer.set_submit(Reply::Fail(RpcError::unavailable("orderer unreachable")));
        trip(&gateway).await;

        let calls_before = peer.network_calls();
        let request = gateway.request("queryBatch").with_args(["BATCH-001"]);
        let err = gateway.evaluate(&RequestContext::new(), &request).await.unwrap_err();

        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(peer.network_calls(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_info_degrades_while_open() {
        let (peer, gateway) = started_gateway().await;
        peer.set_submit(Reply::Fail(RpcError::unavailable("orderer unreachable")));
        trip(&gateway).await;

        let info = gateway
            .ledger()
            .chain_info(&RequestContext::new(), "ibnchannel")
            .await
            .unwrap();
        assert_eq!(info, ChannelInfo::unavailable("ibnchannel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_cooldown() {
        let (peer, gateway) = started_gateway().await;
        peer.set_submit(Reply::Fail(RpcError::unavailable("orderer unreachable")));
        trip(&gateway).await;

        peer.set_submit(Reply::Succeed);
        tokio::time::advance(Duration::from_secs(61)).await;

        let ctx = RequestContext::new();
        for n in 0..3 {
            let outcome = gateway
                .invoke(&ctx, &create_batch(&gateway, &format!("RECOVER-{n}")))
                .await
                .unwrap();
            assert!(outcome.committed_successfully());
        }
        assert_eq!(gateway.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let (peer, gateway) = started_gateway().await;
        peer.set_submit(Reply::Fail(RpcError::unavailable("orderer unreachable")));
        trip(&gateway).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let err = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "PROBE"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SubmissionFailed { .. }));
        assert_eq!(gateway.breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_business_rejections_do_not_trip() {
        let (peer, gateway) = started_gateway().await;
        peer.set_endorse(Reply::Fail(RpcError::new(
            StatusCode::Aborted,
            "batch already exists",
        )));

        let ctx = RequestContext::new();
        for n in 0..5 {
            let err = gateway
                .invoke(&ctx, &create_batch(&gateway, &format!("DUP-{n}")))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::EndorsementFailed { .. }));
        }
        assert_eq!(gateway.breaker().state(), CircuitState::Closed);
    }
}
