//! # Connection Lifecycle
//!
//! Startup retries, single-flight reconnects, background recovery and
//! operator sessions following the managed channel.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ibn_fabric_gateway::testing::{mock_gateway, MockPeer};
    use ibn_fabric_gateway::{ChannelState, ConnectionState, GatewayError, RequestContext};

    use crate::integration::{create_batch, started_gateway};

    #[tokio::test(start_paused = true)]
    async fn test_start_survives_all_but_last_dial_failing() {
        let peer = MockPeer::healthy();
        // test_config allows 3 attempts
        peer.fail_first_dials(2);
        let gateway = mock_gateway(&peer);

        let status = gateway.start().await.unwrap();
        assert!(status.healthy);
        assert_eq!(status.state, ConnectionState::Ready);
        assert_eq!(peer.dial_attempts(), 3);
        assert_eq!(gateway.connection().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gives_up_after_max_attempts() {
        let peer = MockPeer::healthy();
        peer.fail_all_dials();
        let gateway = mock_gateway(&peer);

        let err = gateway.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionExhausted { attempts: 3, .. }));
        assert!(err.is_retryable());
        assert_eq!(peer.dial_attempts(), 3);
        assert!(!gateway.check_health().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_connects_lazily_once_peer_returns() {
        let peer = MockPeer::healthy();
        peer.fail_all_dials();
        let gateway = mock_gateway(&peer);
        assert!(gateway.start().await.is_err());

        peer.heal_dials();
        let outcome = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap();
        assert!(outcome.committed_successfully());
        assert!(gateway.connection().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reconnects_share_one_dial() {
        let (peer, gateway) = started_gateway().await;
        let gateway = Arc::new(gateway);
        peer.set_dial_delay(Some(Duration::from_millis(250)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move { gateway.connection().reconnect().await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        assert_eq!(peer.dial_attempts(), 2);
        assert_eq!(peer.channels_closed(), 1);
        assert_eq!(peer.open_channels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_session_follows_reconnect() {
        let (peer, gateway) = started_gateway().await;
        let ctx = RequestContext::new();

        gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-001")).await.unwrap();
        gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-002")).await.unwrap();
        assert_eq!(peer.sessions_opened(), 1);

        gateway.connection().reconnect().await.unwrap();
        gateway.invoke(&ctx, &create_batch(&gateway, "BATCH-003")).await.unwrap();

        assert_eq!(peer.sessions_opened(), 2);
        assert_eq!(peer.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_probe_recovers_failed_channel() {
        let (peer, gateway) = started_gateway().await;
        peer.last_channel().unwrap().set_state(ChannelState::TransientFailure);
        assert!(!gateway.check_health().healthy);

        // One probe interval plus time for the reconnect
        tokio::time::sleep(gateway.config().health.interval + Duration::from_secs(2)).await;

        assert_eq!(peer.dial_attempts(), 2);
        let status = gateway.check_health();
        assert!(status.healthy);
        assert_eq!(status.channel_state, Some(ChannelState::Ready));
        gateway.health().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_final() {
        let (peer, gateway) = started_gateway().await;
        gateway.close().await;

        let err = gateway
            .invoke(&RequestContext::new(), &create_batch(&gateway, "BATCH-001"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Closed));
        assert_eq!(peer.open_channels(), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(peer.dial_attempts(), 1);
    }
}
