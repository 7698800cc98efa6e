//! # Submission Flow
//!
//! A transaction through the whole pipeline: transient decoding, endorsement,
//! submission to the orderer, and waiting for the commit status.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use ibn_fabric_gateway::testing::Reply;
    use ibn_fabric_gateway::{
        CircuitState, GatewayError, RequestContext, RpcError, StatusCode, TxStatus,
    };

    use crate::integration::{create_batch, started_gateway};

    // =========================================================================
    // HAPPY PATH
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_create_batch_commits() {
        let (peer, gateway) = started_gateway().await;
        peer.set_endorse_payload(br#"{"batchId":"BATCH-001","status":"CREATED"}"#.to_vec());

        let outcome = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap();

        assert!(outcome.committed_successfully());
        assert!(outcome.block_number() > 0);
        assert!(!outcome.transaction_id().is_empty());

        let proposal = &peer.proposals()[0];
        assert_eq!(proposal.channel, "ibnchannel");
        assert_eq!(proposal.chaincode, "teaTraceCC");
        assert_eq!(proposal.function, "createBatch");
        assert_eq!(proposal.transaction_id, outcome.transaction_id());

        let response = outcome.to_response();
        assert_eq!(response.status, TxStatus::Valid);
        assert_eq!(response.result["status"], "CREATED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_batches_advance_block_height() {
        let (peer, gateway) = started_gateway().await;
        let ctx = RequestContext::new();

        let first = gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-001")).await.unwrap();
        let second = gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-002")).await.unwrap();

        assert!(second.block_number() > first.block_number());
        assert_ne!(first.transaction_id(), second.transaction_id());
        assert_eq!(peer.block_height(), second.block_number());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_values_are_decoded() {
        let (peer, gateway) = started_gateway().await;
        let request = create_batch(&gateway, "BATCH-003")
            .with_transient("k1", BASE64.encode(b"private price"))
            .with_transient("k2", BASE64.encode([0u8, 255, 7]));

        gateway.invoke(&RequestContext::new(), &request).await.unwrap();

        let transient = &peer.proposals()[0].transient;
        assert_eq!(transient["k1"], b"private price".to_vec());
        assert_eq!(transient["k2"], vec![0u8, 255, 7]);
    }

    // =========================================================================
    // FAILURE PATHS
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_malformed_transient_is_client_error() {
        let (peer, gateway) = started_gateway().await;
        let calls_before = peer.network_calls();
        let request = create_batch(&gateway, "BATCH-004").with_transient("k1", "not base64!!");

        let err = gateway.invoke(&RequestContext::new(), &request).await.unwrap_err();

        assert!(matches!(&err, GatewayError::InvalidTransientData { key, .. } if key == "k1"));
        assert_eq!(err.http_status(), 400);
        assert_eq!(peer.network_calls(), calls_before);
        assert!(peer.proposals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_never_arrives() {
        let (peer, gateway) = started_gateway().await;
        peer.set_commit(Reply::Hang);

        let err = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-005"))
            .await
            .unwrap_err();

        match &err {
            GatewayError::CommitStatusTimeout { transaction_id, timeout, .. } => {
                assert_eq!(transaction_id, &peer.proposals()[0].transaction_id);
                assert_eq!(*timeout, Duration::from_secs(60));
            }
            other => panic!("expected CommitStatusTimeout, got {other:?}"),
        }
        assert_eq!(err.http_status(), 202);
        assert!(!err.is_retryable());
        // The orderer accepted the transaction, so the breaker saw a success
        assert_eq!(gateway.breaker_stats().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endorsement_rejection_carries_details() {
        let (peer, gateway) = started_gateway().await;
        peer.set_endorse(Reply::Fail(
            RpcError::new(StatusCode::Aborted, "chaincode response 500")
                .with_detail("peer0.org1.ibn.vn: batch BATCH-001 already exists"),
        ));

        let err = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::EndorsementFailed { .. }));
        assert_eq!(err.http_status(), 422);
        let details = &err.rpc_source().unwrap().details;
        assert!(details[0].contains("already exists"));
        assert_eq!(gateway.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transaction_is_reported_not_raised() {
        let (peer, gateway) = started_gateway().await;
        // MVCC_READ_CONFLICT
        peer.set_validation_code(11);

        let outcome = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-006"))
            .await
            .unwrap();

        assert!(!outcome.committed_successfully());
        assert_eq!(outcome.to_response().status, TxStatus::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_query_batch() {
        let (peer, gateway) = started_gateway().await;
        peer.set_evaluate_response("queryBatch", br#"{"batchId":"BATCH-001"}"#.to_vec());

        let request = gateway.request("queryBatch").with_args(["BATCH-001"]);
        let payload = gateway.evaluate(&RequestContext::new(), &request).await.unwrap();

        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["batchId"], "BATCH-001");
        // Evaluation never orders anything
        assert_eq!(peer.block_height(), 0);
    }
}
